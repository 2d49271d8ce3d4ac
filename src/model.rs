//! Domain entities and their storage encodings.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use uuid7::uuid7;

use crate::privilege::PrivilegeLevel;
use crate::status::BookingStatus;

/// Mint a fresh opaque identifier: a 36-character hyphenated UUID string.
pub fn new_id() -> String {
    uuid7().to_string()
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn now() -> Self {
        Self(Utc::now())
    }
    /// Midnight on the given date, or `None` for an invalid calendar date.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        Self::from_ymd_hms(year, month, day, 0, 0, 0)
    }
    pub fn from_ymd_hms(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Into::into)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn date(&self) -> NaiveDate {
        self.0.date_naive()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// A closed `[from, till]` interval. Overlap semantics live in
/// [`crate::availability`]; the range itself is plain data.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    #[n(0)]
    pub from: TimeStamp<Utc>,
    #[n(1)]
    pub till: TimeStamp<Utc>,
}

impl DateRange {
    pub fn new(from: TimeStamp<Utc>, till: TimeStamp<Utc>) -> Self {
        Self { from, till }
    }
}

/// Per-privilege deposit caps. Every level has a defined cap, default 0.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct DepositCaps(#[n(0)] Vec<u64>);

impl DepositCaps {
    pub fn new() -> Self {
        Self(vec![0; PrivilegeLevel::ALL.len()])
    }

    pub fn cap_for(&self, level: PrivilegeLevel) -> u64 {
        self.0.get(level.rank() as usize).copied().unwrap_or(0)
    }

    pub fn set(&mut self, level: PrivilegeLevel, amount: u64) {
        let idx = level.rank() as usize;
        if self.0.len() <= idx {
            self.0.resize(PrivilegeLevel::ALL.len(), 0);
        }
        self.0[idx] = amount;
    }

    pub fn with(mut self, level: PrivilegeLevel, amount: u64) -> Self {
        self.set(level, amount);
        self
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Organization {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub location: String,
    #[n(3)]
    pub deposit_caps: DepositCaps,
}

/// A single lendable unit, owned by exactly one organization.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Item {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub organization_id: String,
    #[n(2)]
    pub name: String,
    #[n(3)]
    pub deposit: u64,
    #[n(4)]
    pub borrowable: bool,
}

/// A named item collection. Tags may span items from several organizations,
/// which is what makes their rights resolution special.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub item_ids: Vec<String>,
}

/// Like a tag, but in practice single-organization: the group's scope is the
/// organization of its first associated item.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Group {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub item_ids: Vec<String>,
}

/// A user's privilege level within one organization. At most one per
/// (user, organization) pair, enforced by the storage key.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    #[n(0)]
    pub user_id: String,
    #[n(1)]
    pub organization_id: String,
    #[n(2)]
    pub level: PrivilegeLevel,
    #[n(3)]
    pub agreement_acknowledged: bool,
}

/// A borrowing transaction. The organization is locked at creation; every
/// constituent booking must reference an item of that organization.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Order {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub organization_id: String,
    #[n(2)]
    pub created_at: TimeStamp<Utc>,
    #[n(3)]
    pub period: DateRange,
    #[n(4)]
    pub deposit: u64,
    #[n(5)]
    pub user_ids: Vec<String>,
    /// Item ids with a booking on this order. Kept inline so transactional
    /// code can reach every booking by key.
    #[n(6)]
    pub item_ids: Vec<String>,
}

/// The true lifecycle unit: status is tracked per item, not per order.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ItemBooking {
    #[n(0)]
    pub order_id: String,
    #[n(1)]
    pub item_id: String,
    #[n(2)]
    pub status: BookingStatus,
    #[n(3)]
    pub return_date: Option<TimeStamp<Utc>>,
    #[n(4)]
    pub return_notes: Option<String>,
}

impl ItemBooking {
    pub fn new(order_id: String, item_id: String) -> Self {
        Self {
            order_id,
            item_id,
            status: BookingStatus::Pending,
            return_date: None,
            return_notes: None,
        }
    }
}
