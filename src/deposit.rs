//! Deposit computation for new and modified orders.

use crate::model::DepositCaps;
use crate::privilege::PrivilegeLevel;

/// Compute the deposit for an order made of the given item deposits.
///
/// An explicit deposit is taken verbatim with no cap applied; this is the
/// administrative override path. Otherwise the sum of the item deposits is
/// bounded by the organization's cap for the acting privilege level. The same
/// computation runs again whenever items are added to or removed from an
/// order, using the privilege of whoever performed that mutation.
pub fn compute_deposit(
    item_deposits: &[u64],
    caps: &DepositCaps,
    acting: PrivilegeLevel,
    explicit: Option<u64>,
) -> u64 {
    if let Some(amount) = explicit {
        return amount;
    }

    let sum: u64 = item_deposits.iter().sum();
    sum.min(caps.cap_for(acting))
}
