//! Per-item booking status tags.

use crate::error::LendingError;

/// Status of a single item booking. A closed tag set, deliberately not an
/// ordered workflow: any status value may be written directly by an actor who
/// passes the gate. A transition-validation layer would slot in at
/// `LendingService::set_status` if stricter guarantees are ever wanted.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Reserved,
    #[n(2)]
    Accepted,
    #[n(3)]
    Picked,
    #[n(4)]
    Rejected,
    #[n(5)]
    Returned,
}

impl BookingStatus {
    pub fn tag(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Reserved => "reserved",
            BookingStatus::Accepted => "accepted",
            BookingStatus::Picked => "picked",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Returned => "returned",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, LendingError> {
        match tag {
            "pending" => Ok(BookingStatus::Pending),
            "reserved" => Ok(BookingStatus::Reserved),
            "accepted" => Ok(BookingStatus::Accepted),
            "picked" => Ok(BookingStatus::Picked),
            "rejected" => Ok(BookingStatus::Rejected),
            "returned" => Ok(BookingStatus::Returned),
            other => Err(LendingError::InvalidStatus(other.to_string())),
        }
    }
}
