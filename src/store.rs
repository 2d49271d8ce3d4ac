//! Sled-backed persistence collaborator.
//!
//! Everything lives in the default tree under namespaced keys with
//! CBOR-encoded values. Multi-key writes go through [`sled::Batch`] or a
//! serializable transaction so a failed step persists nothing. Each item keeps
//! an index key listing the orders that book it; reading and rewriting that
//! one key inside the booking transaction acts as the row-level lock on the
//! item during check-and-book.

use std::collections::BTreeSet;
use std::sync::Arc;

use sled::{Batch, Db};

use crate::error::LendingError;
use crate::model::{Group, Item, ItemBooking, Membership, Order, Organization, Tag};
use crate::privilege::PrivilegeLevel;
use crate::rights::MembershipSnapshot;

pub mod keys {
    pub const ITEM_PREFIX: &str = "item/";
    pub const TAG_PREFIX: &str = "tag/";
    pub const GROUP_PREFIX: &str = "group/";

    pub fn organization(id: &str) -> String {
        format!("org/{id}")
    }
    pub fn item(id: &str) -> String {
        format!("item/{id}")
    }
    pub fn tag(id: &str) -> String {
        format!("tag/{id}")
    }
    pub fn group(id: &str) -> String {
        format!("group/{id}")
    }
    pub fn order(id: &str) -> String {
        format!("order/{id}")
    }
    pub fn booking(order_id: &str, item_id: &str) -> String {
        format!("booking/{order_id}/{item_id}")
    }
    pub fn membership(user_id: &str, organization_id: &str) -> String {
        format!("member/{user_id}/{organization_id}")
    }
    pub fn membership_prefix(user_id: &str) -> String {
        format!("member/{user_id}/")
    }
    /// Order ids currently booking this item.
    pub fn item_orders(item_id: &str) -> String {
        format!("item-orders/{item_id}")
    }
}

pub fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, LendingError> {
    minicbor::to_vec(value).map_err(|e| LendingError::Codec(e.to_string()))
}

pub fn decode<T: for<'b> minicbor::Decode<'b, ()>>(bytes: &[u8]) -> Result<T, LendingError> {
    minicbor::decode(bytes).map_err(|e| LendingError::Codec(e.to_string()))
}

#[derive(Clone)]
pub struct Store {
    db: Arc<Db>,
}

impl Store {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Raw handle for transactional sequences owned by the service layer.
    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn apply(&self, batch: Batch) -> Result<(), LendingError> {
        self.db.apply_batch(batch)?;
        Ok(())
    }

    fn fetch<T>(&self, key: &str, kind: &'static str, id: &str) -> Result<T, LendingError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(LendingError::EntityNotFound {
                kind,
                id: id.to_string(),
            }),
        }
    }

    fn try_fetch<T>(&self, key: &str) -> Result<Option<T>, LendingError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<T: minicbor::Encode<()>>(&self, key: &str, value: &T) -> Result<(), LendingError> {
        self.db.insert(key.as_bytes(), encode(value)?)?;
        Ok(())
    }

    fn scan<T>(&self, prefix: &str) -> Result<Vec<T>, LendingError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (_key, value) = entry?;
            out.push(decode(&value)?);
        }
        Ok(out)
    }

    // organizations

    pub fn put_organization(&self, organization: &Organization) -> Result<(), LendingError> {
        self.put(&keys::organization(&organization.id), organization)
    }

    pub fn get_organization(&self, id: &str) -> Result<Organization, LendingError> {
        self.fetch(&keys::organization(id), "organization", id)
    }

    pub fn organization_exists(&self, id: &str) -> Result<bool, LendingError> {
        Ok(self.db.contains_key(keys::organization(id).as_bytes())?)
    }

    // items

    pub fn put_item(&self, item: &Item) -> Result<(), LendingError> {
        self.put(&keys::item(&item.id), item)
    }

    pub fn get_item(&self, id: &str) -> Result<Item, LendingError> {
        self.fetch(&keys::item(id), "item", id)
    }

    /// All items whose organization is in the given set.
    pub fn items_in_organizations(
        &self,
        organizations: &BTreeSet<String>,
    ) -> Result<Vec<Item>, LendingError> {
        let items: Vec<Item> = self.scan(keys::ITEM_PREFIX)?;
        Ok(items
            .into_iter()
            .filter(|item| organizations.contains(&item.organization_id))
            .collect())
    }

    // tags and groups

    pub fn put_tag(&self, tag: &Tag) -> Result<(), LendingError> {
        self.put(&keys::tag(&tag.id), tag)
    }

    pub fn get_tag(&self, id: &str) -> Result<Tag, LendingError> {
        self.fetch(&keys::tag(id), "tag", id)
    }

    pub fn all_tags(&self) -> Result<Vec<Tag>, LendingError> {
        self.scan(keys::TAG_PREFIX)
    }

    pub fn put_group(&self, group: &Group) -> Result<(), LendingError> {
        self.put(&keys::group(&group.id), group)
    }

    pub fn get_group(&self, id: &str) -> Result<Group, LendingError> {
        self.fetch(&keys::group(id), "group", id)
    }

    pub fn all_groups(&self) -> Result<Vec<Group>, LendingError> {
        self.scan(keys::GROUP_PREFIX)
    }

    // orders and bookings

    pub fn get_order(&self, id: &str) -> Result<Order, LendingError> {
        self.fetch(&keys::order(id), "order", id)
    }

    pub fn order_exists(&self, id: &str) -> Result<bool, LendingError> {
        Ok(self.db.contains_key(keys::order(id).as_bytes())?)
    }

    pub fn get_booking(&self, order_id: &str, item_id: &str) -> Result<ItemBooking, LendingError> {
        self.fetch(&keys::booking(order_id, item_id), "booking", item_id)
    }

    pub fn put_booking(&self, booking: &ItemBooking) -> Result<(), LendingError> {
        self.put(&keys::booking(&booking.order_id, &booking.item_id), booking)
    }

    pub fn bookings_for_order(&self, order_id: &str) -> Result<Vec<ItemBooking>, LendingError> {
        let order = self.get_order(order_id)?;
        let mut bookings = Vec::with_capacity(order.item_ids.len());
        for item_id in &order.item_ids {
            bookings.push(self.get_booking(order_id, item_id)?);
        }
        Ok(bookings)
    }

    /// All bookings for one item, across every order that references it.
    pub fn bookings_for_item(&self, item_id: &str) -> Result<Vec<ItemBooking>, LendingError> {
        let mut bookings = Vec::new();
        for order_id in self.order_ids_for_item(item_id)? {
            if let Some(booking) = self.try_fetch(&keys::booking(&order_id, item_id))? {
                bookings.push(booking);
            }
        }
        Ok(bookings)
    }

    pub fn order_ids_for_item(&self, item_id: &str) -> Result<Vec<String>, LendingError> {
        match self.try_fetch::<Vec<String>>(&keys::item_orders(item_id))? {
            Some(ids) => Ok(ids),
            None => Ok(Vec::new()),
        }
    }

    // memberships, unique per (user, organization) by key construction

    pub fn put_membership(&self, membership: &Membership) -> Result<(), LendingError> {
        self.put(
            &keys::membership(&membership.user_id, &membership.organization_id),
            membership,
        )
    }

    pub fn get_membership(
        &self,
        user_id: &str,
        organization_id: &str,
    ) -> Result<Option<Membership>, LendingError> {
        self.try_fetch(&keys::membership(user_id, organization_id))
    }

    pub fn remove_membership(
        &self,
        user_id: &str,
        organization_id: &str,
    ) -> Result<(), LendingError> {
        self.db
            .remove(keys::membership(user_id, organization_id).as_bytes())?;
        Ok(())
    }

    pub fn memberships_for(&self, user_id: &str) -> Result<Vec<Membership>, LendingError> {
        self.scan(&keys::membership_prefix(user_id))
    }

    /// Immutable membership view, loaded once per operation.
    pub fn membership_snapshot(&self, user_id: &str) -> Result<MembershipSnapshot, LendingError> {
        let pairs: Vec<(String, PrivilegeLevel)> = self
            .memberships_for(user_id)?
            .into_iter()
            .map(|m| (m.organization_id, m.level))
            .collect();
        Ok(MembershipSnapshot::new(pairs))
    }
}
