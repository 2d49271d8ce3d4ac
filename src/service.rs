//! Service layer: every externally callable operation of the lending core.
//!
//! Each mutating method runs the same sequence: load a membership snapshot,
//! reduce the target to its organization scope, resolve the actor's effective
//! privilege, gate it against the required level for the operation, then act.
//! Multi-step mutations commit through one sled transaction or batch so a
//! failure at any step persists nothing. Reminder scheduling happens only
//! after a successful commit and is fire-and-forget: a scheduler error is
//! logged, never propagated.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::{Batch, Db};

use crate::availability::overlaps;
use crate::deposit::compute_deposit;
use crate::error::LendingError;
use crate::model::{
    new_id, DateRange, DepositCaps, Group, Item, ItemBooking, Membership, Order, Organization,
    Tag, TimeStamp,
};
use crate::privilege::{is_authorized, PrivilegeLevel};
use crate::reminder::ReminderScheduler;
use crate::rights::{resolve, Resolved, Target, TargetScope};
use crate::status::BookingStatus;
use crate::store::{self, keys, Store};

pub struct LendingService {
    store: Store,
    scheduler: Arc<dyn ReminderScheduler>,
}

impl LendingService {
    pub fn new(db: Arc<Db>, scheduler: Arc<dyn ReminderScheduler>) -> Self {
        Self {
            store: Store::new(db),
            scheduler,
        }
    }

    // rights resolution

    /// Reduce a target to the organization scope that governs it. This is the
    /// only part of resolution that touches storage.
    fn scope_of(&self, target: &Target) -> Result<TargetScope, LendingError> {
        match target {
            Target::Organization(id) => {
                if !self.store.organization_exists(id)? {
                    return Err(LendingError::EntityNotFound {
                        kind: "organization",
                        id: id.clone(),
                    });
                }
                Ok(TargetScope::Single(id.clone()))
            }
            Target::Item(id) => {
                let item = self.store.get_item(id)?;
                Ok(TargetScope::Single(item.organization_id))
            }
            Target::Group(id) => {
                let group = self.store.get_group(id)?;
                // a group belongs to its first item's organization in practice
                match group.item_ids.first() {
                    Some(item_id) => {
                        let item = self.store.get_item(item_id)?;
                        Ok(TargetScope::Single(item.organization_id))
                    }
                    None => Err(LendingError::EntityNotScoped),
                }
            }
            Target::Tag(id) => {
                let tag = self.store.get_tag(id)?;
                Ok(TargetScope::Spanning(
                    self.organizations_of_items(&tag.item_ids)?,
                ))
            }
            Target::Order(id) => {
                let order = self.store.get_order(id)?;
                Ok(TargetScope::Single(order.organization_id))
            }
            Target::Ambient => Ok(TargetScope::Ambient),
        }
    }

    fn organizations_of_items(
        &self,
        item_ids: &[String],
    ) -> Result<BTreeSet<String>, LendingError> {
        let mut organizations = BTreeSet::new();
        for item_id in item_ids {
            organizations.insert(self.store.get_item(item_id)?.organization_id);
        }
        Ok(organizations)
    }

    /// Resolve and gate in one step. Every mutation funnels through here.
    fn authorize(
        &self,
        actor: &str,
        target: &Target,
        required: PrivilegeLevel,
    ) -> Result<Resolved, LendingError> {
        let scope = self.scope_of(target)?;
        self.authorize_scope(actor, scope, required)
    }

    fn authorize_scope(
        &self,
        actor: &str,
        scope: TargetScope,
        required: PrivilegeLevel,
    ) -> Result<Resolved, LendingError> {
        let snapshot = self.store.membership_snapshot(actor)?;
        let resolved = resolve(&snapshot, &scope)?;
        if !is_authorized(required, resolved.level) {
            return Err(LendingError::NotAuthorized);
        }
        Ok(resolved)
    }

    // organizations and rights

    /// Top-level organization creation. Requires `SystemAdmin` held anywhere.
    /// The creator becomes `OrganizationAdmin` of the new organization in the
    /// same commit; without that membership nobody could administer it.
    pub fn create_organization(
        &self,
        actor: &str,
        name: &str,
        location: &str,
        deposit_caps: DepositCaps,
    ) -> anyhow::Result<Organization> {
        self.authorize(actor, &Target::Ambient, PrivilegeLevel::SystemAdmin)?;

        let organization = Organization {
            id: new_id(),
            name: name.to_string(),
            location: location.to_string(),
            deposit_caps,
        };
        let creator = Membership {
            user_id: actor.to_string(),
            organization_id: organization.id.clone(),
            level: PrivilegeLevel::OrganizationAdmin,
            agreement_acknowledged: false,
        };

        let mut batch = Batch::default();
        batch.insert(
            keys::organization(&organization.id).as_bytes(),
            store::encode(&organization)?,
        );
        batch.insert(
            keys::membership(actor, &organization.id).as_bytes(),
            store::encode(&creator)?,
        );
        self.store.apply(batch)?;

        Ok(organization)
    }

    pub fn set_deposit_cap(
        &self,
        actor: &str,
        organization_id: &str,
        level: PrivilegeLevel,
        amount: u64,
    ) -> anyhow::Result<Organization> {
        self.authorize(
            actor,
            &Target::Organization(organization_id.to_string()),
            PrivilegeLevel::OrganizationAdmin,
        )?;

        let mut organization = self.store.get_organization(organization_id)?;
        organization.deposit_caps.set(level, amount);
        self.store.put_organization(&organization)?;

        Ok(organization)
    }

    /// Create or change a user's privilege level in an organization. There is
    /// at most one membership per (user, organization); a second call replaces
    /// the level and keeps the agreement flag.
    pub fn set_membership(
        &self,
        actor: &str,
        organization_id: &str,
        user_id: &str,
        level: PrivilegeLevel,
    ) -> anyhow::Result<Membership> {
        self.authorize(
            actor,
            &Target::Organization(organization_id.to_string()),
            PrivilegeLevel::OrganizationAdmin,
        )?;

        let acknowledged = self
            .store
            .get_membership(user_id, organization_id)?
            .map(|m| m.agreement_acknowledged)
            .unwrap_or(false);

        let membership = Membership {
            user_id: user_id.to_string(),
            organization_id: organization_id.to_string(),
            level,
            agreement_acknowledged: acknowledged,
        };
        self.store.put_membership(&membership)?;

        Ok(membership)
    }

    pub fn remove_membership(
        &self,
        actor: &str,
        organization_id: &str,
        user_id: &str,
    ) -> anyhow::Result<()> {
        self.authorize(
            actor,
            &Target::Organization(organization_id.to_string()),
            PrivilegeLevel::OrganizationAdmin,
        )?;

        self.store.remove_membership(user_id, organization_id)?;
        Ok(())
    }

    /// A user acknowledging the lending agreement of an organization they
    /// belong to. Self-service, no gate beyond the membership itself.
    pub fn acknowledge_agreement(
        &self,
        user_id: &str,
        organization_id: &str,
    ) -> anyhow::Result<Membership> {
        let mut membership = self
            .store
            .get_membership(user_id, organization_id)?
            .ok_or(LendingError::EntityNotMember)?;
        membership.agreement_acknowledged = true;
        self.store.put_membership(&membership)?;

        Ok(membership)
    }

    pub fn memberships_for(&self, user_id: &str) -> anyhow::Result<Vec<Membership>> {
        Ok(self.store.memberships_for(user_id)?)
    }

    // inventory

    pub fn create_item(
        &self,
        actor: &str,
        organization_id: &str,
        name: &str,
        deposit: u64,
        borrowable: bool,
    ) -> anyhow::Result<Item> {
        self.authorize(
            actor,
            &Target::Organization(organization_id.to_string()),
            PrivilegeLevel::InventoryAdmin,
        )?;

        let item = Item {
            id: new_id(),
            organization_id: organization_id.to_string(),
            name: name.to_string(),
            deposit,
            borrowable,
        };
        self.store.put_item(&item)?;

        Ok(item)
    }

    pub fn update_item(
        &self,
        actor: &str,
        item_id: &str,
        name: &str,
        deposit: u64,
        borrowable: bool,
    ) -> anyhow::Result<Item> {
        self.authorize(
            actor,
            &Target::Item(item_id.to_string()),
            PrivilegeLevel::InventoryAdmin,
        )?;

        let mut item = self.store.get_item(item_id)?;
        item.name = name.to_string();
        item.deposit = deposit;
        item.borrowable = borrowable;
        self.store.put_item(&item)?;

        Ok(item)
    }

    /// Delete an item and prune it from every tag and group in one batch.
    /// Items referenced by a live order must be removed from it first;
    /// deleting them would strand the order on a dangling item id.
    pub fn delete_item(&self, actor: &str, item_id: &str) -> anyhow::Result<()> {
        self.authorize(
            actor,
            &Target::Item(item_id.to_string()),
            PrivilegeLevel::InventoryAdmin,
        )?;

        if !self.store.order_ids_for_item(item_id)?.is_empty() {
            return Err(LendingError::ItemInUse(item_id.to_string()).into());
        }

        let mut batch = Batch::default();
        batch.remove(keys::item(item_id).as_bytes());
        batch.remove(keys::item_orders(item_id).as_bytes());

        for mut tag in self.store.all_tags()? {
            if tag.item_ids.iter().any(|id| id == item_id) {
                tag.item_ids.retain(|id| id != item_id);
                batch.insert(keys::tag(&tag.id).as_bytes(), store::encode(&tag)?);
            }
        }
        for mut group in self.store.all_groups()? {
            if group.item_ids.iter().any(|id| id == item_id) {
                group.item_ids.retain(|id| id != item_id);
                batch.insert(keys::group(&group.id).as_bytes(), store::encode(&group)?);
            }
        }

        self.store.apply(batch)?;
        Ok(())
    }

    /// Creating a tag requires `InventoryAdmin` in every organization whose
    /// items it references; the effective level is the weakest link.
    pub fn create_tag(&self, actor: &str, name: &str, item_ids: &[String]) -> anyhow::Result<Tag> {
        let scope = TargetScope::Spanning(self.organizations_of_items(item_ids)?);
        self.authorize_scope(actor, scope, PrivilegeLevel::InventoryAdmin)?;

        let tag = Tag {
            id: new_id(),
            name: name.to_string(),
            item_ids: item_ids.to_vec(),
        };
        self.store.put_tag(&tag)?;

        Ok(tag)
    }

    /// Updating a tag is gated across the union of the organizations it
    /// currently spans and the ones it would span afterwards.
    pub fn update_tag(
        &self,
        actor: &str,
        tag_id: &str,
        item_ids: &[String],
    ) -> anyhow::Result<Tag> {
        let mut tag = self.store.get_tag(tag_id)?;

        let mut organizations = self.organizations_of_items(&tag.item_ids)?;
        organizations.extend(self.organizations_of_items(item_ids)?);
        self.authorize_scope(
            actor,
            TargetScope::Spanning(organizations),
            PrivilegeLevel::InventoryAdmin,
        )?;

        tag.item_ids = item_ids.to_vec();
        self.store.put_tag(&tag)?;

        Ok(tag)
    }

    pub fn delete_tag(&self, actor: &str, tag_id: &str) -> anyhow::Result<()> {
        self.authorize(
            actor,
            &Target::Tag(tag_id.to_string()),
            PrivilegeLevel::InventoryAdmin,
        )?;

        self.store.db().remove(keys::tag(tag_id).as_bytes())?;
        Ok(())
    }

    pub fn create_group(
        &self,
        actor: &str,
        name: &str,
        item_ids: &[String],
    ) -> anyhow::Result<Group> {
        // a group's scope is its first item's organization
        let scope = match item_ids.first() {
            Some(item_id) => TargetScope::Single(self.store.get_item(item_id)?.organization_id),
            None => return Err(LendingError::EntityNotScoped.into()),
        };
        self.authorize_scope(actor, scope, PrivilegeLevel::InventoryAdmin)?;

        let group = Group {
            id: new_id(),
            name: name.to_string(),
            item_ids: item_ids.to_vec(),
        };
        self.store.put_group(&group)?;

        Ok(group)
    }

    /// Updating a group is gated in its current scope and, when the item set
    /// moves it elsewhere, in the prospective one as well.
    pub fn update_group(
        &self,
        actor: &str,
        group_id: &str,
        item_ids: &[String],
    ) -> anyhow::Result<Group> {
        let mut group = self.store.get_group(group_id)?;

        let mut organizations = BTreeSet::new();
        if let Some(item_id) = group.item_ids.first() {
            organizations.insert(self.store.get_item(item_id)?.organization_id);
        }
        if let Some(item_id) = item_ids.first() {
            organizations.insert(self.store.get_item(item_id)?.organization_id);
        }
        if organizations.is_empty() {
            return Err(LendingError::EntityNotScoped.into());
        }
        self.authorize_scope(
            actor,
            TargetScope::Spanning(organizations),
            PrivilegeLevel::InventoryAdmin,
        )?;

        group.item_ids = item_ids.to_vec();
        self.store.put_group(&group)?;

        Ok(group)
    }

    pub fn delete_group(&self, actor: &str, group_id: &str) -> anyhow::Result<()> {
        self.authorize(
            actor,
            &Target::Group(group_id.to_string()),
            PrivilegeLevel::InventoryAdmin,
        )?;

        self.store.db().remove(keys::group(group_id).as_bytes())?;
        Ok(())
    }

    // orders

    /// Create an order booking the given items for a date range.
    ///
    /// All items must belong to one organization, which the order locks in.
    /// An actor with no membership there joins implicitly as `Customer` in the
    /// same commit. The availability check and every write run inside one
    /// serializable transaction; re-reading and rewriting each item's order
    /// index acts as the row lock that closes the check-then-book race.
    pub fn create_order(
        &self,
        actor: &str,
        item_ids: &[String],
        period: DateRange,
        explicit_deposit: Option<u64>,
    ) -> anyhow::Result<Order> {
        if item_ids.is_empty() {
            return Err(LendingError::EntityNotScoped.into());
        }
        // an order holds a set of bookings: one booking per item
        let mut seen = BTreeSet::new();
        for item_id in item_ids {
            if !seen.insert(item_id.as_str()) {
                return Err(LendingError::ItemUnavailable(item_id.clone()).into());
            }
        }

        let organizations = self.organizations_of_items(item_ids)?;
        if organizations.len() != 1 {
            return Err(LendingError::OrganizationMismatch.into());
        }
        let organization_id = organizations
            .into_iter()
            .next()
            .ok_or(LendingError::EntityNotScoped)?;

        // implicit membership: the first booking joins the actor as Customer
        let snapshot = self.store.membership_snapshot(actor)?;
        let (acting_level, implicit_join) = match snapshot.level_in(&organization_id) {
            Some(level) => (level, false),
            None => (PrivilegeLevel::Customer, true),
        };
        if !is_authorized(PrivilegeLevel::Customer, acting_level) {
            return Err(LendingError::NotAuthorized.into());
        }

        let order_id = new_id();
        let created_at = TimeStamp::now();

        let result = self.store.db().transaction(|tx| {
            let organization: Organization =
                tx_fetch(tx, &keys::organization(&organization_id), "organization")?;

            let mut deposits = Vec::with_capacity(item_ids.len());
            for item_id in item_ids {
                let item: Item = tx_fetch(tx, &keys::item(item_id), "item")?;
                if item.organization_id != organization_id {
                    return abort(LendingError::OrganizationMismatch);
                }
                if !item.borrowable {
                    return abort(LendingError::ItemNotBorrowable(item_id.clone()));
                }
                deposits.push(item.deposit);

                check_availability(tx, item_id, &period, Some(&order_id))?;

                let mut order_ids = tx_order_index(tx, item_id)?;
                order_ids.push(order_id.clone());
                tx_put(tx, &keys::item_orders(item_id), &order_ids)?;

                let booking = ItemBooking::new(order_id.clone(), item_id.clone());
                tx_put(tx, &keys::booking(&order_id, item_id), &booking)?;
            }

            let deposit = compute_deposit(
                &deposits,
                &organization.deposit_caps,
                acting_level,
                explicit_deposit,
            );

            let order = Order {
                id: order_id.clone(),
                organization_id: organization_id.clone(),
                created_at: created_at.clone(),
                period: period.clone(),
                deposit,
                user_ids: vec![actor.to_string()],
                item_ids: item_ids.to_vec(),
            };
            tx_put(tx, &keys::order(&order_id), &order)?;

            if implicit_join {
                let membership = Membership {
                    user_id: actor.to_string(),
                    organization_id: organization_id.clone(),
                    level: PrivilegeLevel::Customer,
                    agreement_acknowledged: false,
                };
                tx_put(tx, &keys::membership(actor, &organization_id), &membership)?;
            }

            Ok(order)
        });

        let order = unwrap_tx(result)?;
        self.schedule_reminders(&order.id);

        Ok(order)
    }

    /// Add one item to an existing order. The item must belong to the order's
    /// locked organization and be available for the order's period.
    pub fn add_item(&self, actor: &str, order_id: &str, item_id: &str) -> anyhow::Result<Order> {
        let resolved = self.authorize(
            actor,
            &Target::Order(order_id.to_string()),
            PrivilegeLevel::Customer,
        )?;
        let acting_level = resolved.level;

        let result = self.store.db().transaction(|tx| {
            let mut order: Order = tx_fetch(tx, &keys::order(order_id), "order")?;

            let item: Item = tx_fetch(tx, &keys::item(item_id), "item")?;
            if item.organization_id != order.organization_id {
                return abort(LendingError::OrganizationMismatch);
            }
            if !item.borrowable {
                return abort(LendingError::ItemNotBorrowable(item_id.to_string()));
            }
            if order.item_ids.iter().any(|id| id == item_id) {
                return abort(LendingError::ItemUnavailable(item_id.to_string()));
            }

            check_availability(tx, item_id, &order.period, Some(order_id))?;

            let mut order_ids = tx_order_index(tx, item_id)?;
            order_ids.push(order_id.to_string());
            tx_put(tx, &keys::item_orders(item_id), &order_ids)?;

            let booking = ItemBooking::new(order_id.to_string(), item_id.to_string());
            tx_put(tx, &keys::booking(order_id, item_id), &booking)?;

            order.item_ids.push(item_id.to_string());
            recompute_order_deposit(tx, &mut order, acting_level)?;
            tx_put(tx, &keys::order(order_id), &order)?;

            Ok(order)
        });

        let order = unwrap_tx(result)?;
        self.reschedule_reminders(order_id);

        Ok(order)
    }

    /// Remove one item's booking from an order. Removing the last booking
    /// leaves an order with zero bookings, which is legal.
    pub fn remove_item(&self, actor: &str, order_id: &str, item_id: &str) -> anyhow::Result<Order> {
        let resolved = self.authorize(
            actor,
            &Target::Order(order_id.to_string()),
            PrivilegeLevel::Customer,
        )?;
        let acting_level = resolved.level;

        let result = self.store.db().transaction(|tx| {
            let mut order: Order = tx_fetch(tx, &keys::order(order_id), "order")?;

            if !order.item_ids.iter().any(|id| id == item_id) {
                return abort(LendingError::EntityNotFound {
                    kind: "booking",
                    id: item_id.to_string(),
                });
            }

            tx.remove(keys::booking(order_id, item_id).as_bytes())?;

            let mut order_ids = tx_order_index(tx, item_id)?;
            order_ids.retain(|id| id != order_id);
            tx_put(tx, &keys::item_orders(item_id), &order_ids)?;

            order.item_ids.retain(|id| id != item_id);
            recompute_order_deposit(tx, &mut order, acting_level)?;
            tx_put(tx, &keys::order(order_id), &order)?;

            Ok(order)
        });

        let order = unwrap_tx(result)?;
        self.reschedule_reminders(order_id);

        Ok(order)
    }

    /// Change an order's date range, re-checking availability of every booked
    /// item against the other orders that reference it.
    pub fn update_order(
        &self,
        actor: &str,
        order_id: &str,
        period: DateRange,
    ) -> anyhow::Result<Order> {
        self.authorize(
            actor,
            &Target::Order(order_id.to_string()),
            PrivilegeLevel::Customer,
        )?;

        let result = self.store.db().transaction(|tx| {
            let mut order: Order = tx_fetch(tx, &keys::order(order_id), "order")?;

            for item_id in &order.item_ids {
                check_availability(tx, item_id, &period, Some(order_id))?;
            }

            order.period = period.clone();
            tx_put(tx, &keys::order(order_id), &order)?;

            Ok(order)
        });

        let order = unwrap_tx(result)?;
        self.reschedule_reminders(order_id);

        Ok(order)
    }

    /// Set a booking's status from its string tag. Any tag may be written
    /// directly; the status set is flat, not an ordered workflow.
    pub fn set_status(
        &self,
        actor: &str,
        order_id: &str,
        item_id: &str,
        status_tag: &str,
    ) -> anyhow::Result<ItemBooking> {
        let status = BookingStatus::from_tag(status_tag)?;
        self.authorize(
            actor,
            &Target::Order(order_id.to_string()),
            PrivilegeLevel::Member,
        )?;

        let mut booking = self.store.get_booking(order_id, item_id)?;
        booking.status = status;
        self.store.put_booking(&booking)?;

        self.reschedule_reminders(order_id);

        Ok(booking)
    }

    pub fn set_return_date(
        &self,
        actor: &str,
        order_id: &str,
        item_id: &str,
        return_date: TimeStamp<Utc>,
    ) -> anyhow::Result<ItemBooking> {
        self.authorize(
            actor,
            &Target::Order(order_id.to_string()),
            PrivilegeLevel::Member,
        )?;

        let mut booking = self.store.get_booking(order_id, item_id)?;
        booking.return_date = Some(return_date);
        self.store.put_booking(&booking)?;

        Ok(booking)
    }

    pub fn set_return_notes(
        &self,
        actor: &str,
        order_id: &str,
        item_id: &str,
        notes: &str,
    ) -> anyhow::Result<ItemBooking> {
        self.authorize(
            actor,
            &Target::Order(order_id.to_string()),
            PrivilegeLevel::Member,
        )?;

        let mut booking = self.store.get_booking(order_id, item_id)?;
        booking.return_notes = Some(notes.to_string());
        self.store.put_booking(&booking)?;

        Ok(booking)
    }

    /// Delete an order: all of its bookings go first, then the order itself,
    /// in one transaction. Reminders are cancelled after the commit.
    pub fn delete_order(&self, actor: &str, order_id: &str) -> anyhow::Result<()> {
        self.authorize(
            actor,
            &Target::Order(order_id.to_string()),
            PrivilegeLevel::Customer,
        )?;

        let result = self.store.db().transaction(|tx| {
            let order: Order = tx_fetch(tx, &keys::order(order_id), "order")?;

            for item_id in &order.item_ids {
                tx.remove(keys::booking(order_id, item_id).as_bytes())?;

                let mut order_ids = tx_order_index(tx, item_id)?;
                order_ids.retain(|id| id != order_id);
                tx_put(tx, &keys::item_orders(item_id), &order_ids)?;
            }

            tx.remove(keys::order(order_id).as_bytes())?;

            Ok(())
        });

        unwrap_tx(result)?;
        self.cancel_reminders(order_id);

        Ok(())
    }

    pub fn get_order(&self, order_id: &str) -> anyhow::Result<Order> {
        Ok(self.store.get_order(order_id)?)
    }

    pub fn bookings_for_order(&self, order_id: &str) -> anyhow::Result<Vec<ItemBooking>> {
        Ok(self.store.bookings_for_order(order_id)?)
    }

    // reminder side effects, fire-and-forget

    fn schedule_reminders(&self, order_id: &str) {
        if let Err(err) = self.scheduler.schedule(order_id) {
            tracing::warn!(order_id, error = %err, "reminder scheduling failed");
        }
    }

    fn reschedule_reminders(&self, order_id: &str) {
        self.cancel_reminders(order_id);
        self.schedule_reminders(order_id);
    }

    fn cancel_reminders(&self, order_id: &str) {
        if let Err(err) = self.scheduler.cancel(order_id) {
            tracing::warn!(order_id, error = %err, "reminder cancel failed");
        }
    }
}

// transaction helpers

fn abort<T>(err: LendingError) -> ConflictableTransactionResult<T, LendingError> {
    Err(ConflictableTransactionError::Abort(err))
}

fn tx_get<T>(
    tx: &TransactionalTree,
    key: &str,
) -> ConflictableTransactionResult<Option<T>, LendingError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tx.get(key.as_bytes())? {
        Some(bytes) => store::decode(&bytes)
            .map(Some)
            .map_err(ConflictableTransactionError::Abort),
        None => Ok(None),
    }
}

fn tx_fetch<T>(
    tx: &TransactionalTree,
    key: &str,
    kind: &'static str,
) -> ConflictableTransactionResult<T, LendingError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tx_get(tx, key)? {
        Some(value) => Ok(value),
        None => abort(LendingError::EntityNotFound {
            kind,
            id: key.to_string(),
        }),
    }
}

fn tx_put<T: minicbor::Encode<()>>(
    tx: &TransactionalTree,
    key: &str,
    value: &T,
) -> ConflictableTransactionResult<(), LendingError> {
    let bytes = store::encode(value).map_err(ConflictableTransactionError::Abort)?;
    tx.insert(key.as_bytes(), bytes)?;
    Ok(())
}

fn tx_order_index(
    tx: &TransactionalTree,
    item_id: &str,
) -> ConflictableTransactionResult<Vec<String>, LendingError> {
    Ok(tx_get(tx, &keys::item_orders(item_id))?.unwrap_or_default())
}

/// Conflict check for one item against every order referencing it, except the
/// excluded one. The check compares against all bookings regardless of status;
/// excluding rejected or returned bookings is an unresolved product question.
fn check_availability(
    tx: &TransactionalTree,
    item_id: &str,
    candidate: &DateRange,
    exclude_order: Option<&str>,
) -> ConflictableTransactionResult<(), LendingError> {
    for order_id in tx_order_index(tx, item_id)? {
        if exclude_order == Some(order_id.as_str()) {
            continue;
        }
        let Some(existing) = tx_get::<Order>(tx, &keys::order(&order_id))? else {
            continue;
        };
        if overlaps(&existing.period, candidate) {
            return abort(LendingError::ItemUnavailable(item_id.to_string()));
        }
    }
    Ok(())
}

/// Recompute an order's deposit from its current items, bounded by the cap
/// for the privilege of whoever performed the mutation.
fn recompute_order_deposit(
    tx: &TransactionalTree,
    order: &mut Order,
    acting_level: PrivilegeLevel,
) -> ConflictableTransactionResult<(), LendingError> {
    let organization: Organization = tx_fetch(
        tx,
        &keys::organization(&order.organization_id),
        "organization",
    )?;

    let mut deposits = Vec::with_capacity(order.item_ids.len());
    for item_id in &order.item_ids {
        let item: Item = tx_fetch(tx, &keys::item(item_id), "item")?;
        deposits.push(item.deposit);
    }

    order.deposit = compute_deposit(&deposits, &organization.deposit_caps, acting_level, None);
    Ok(())
}

fn unwrap_tx<T>(result: Result<T, TransactionError<LendingError>>) -> Result<T, LendingError> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(err)) => Err(err),
        Err(TransactionError::Storage(err)) => Err(LendingError::Store(err)),
    }
}
