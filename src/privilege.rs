//! Privilege levels and the authorization gate.

/// Ordered privilege levels, most privileged first. Lower rank = more privilege.
/// All comparisons go through the rank; variant identity carries no extra meaning.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrivilegeLevel {
    #[n(0)]
    SystemAdmin,
    #[n(1)]
    OrganizationAdmin,
    #[n(2)]
    InventoryAdmin,
    #[n(3)]
    Member,
    #[n(4)]
    Customer,
    #[n(5)]
    Watcher,
}

impl PrivilegeLevel {
    pub const ALL: [PrivilegeLevel; 6] = [
        PrivilegeLevel::SystemAdmin,
        PrivilegeLevel::OrganizationAdmin,
        PrivilegeLevel::InventoryAdmin,
        PrivilegeLevel::Member,
        PrivilegeLevel::Customer,
        PrivilegeLevel::Watcher,
    ];

    pub fn rank(self) -> u8 {
        match self {
            PrivilegeLevel::SystemAdmin => 0,
            PrivilegeLevel::OrganizationAdmin => 1,
            PrivilegeLevel::InventoryAdmin => 2,
            PrivilegeLevel::Member => 3,
            PrivilegeLevel::Customer => 4,
            PrivilegeLevel::Watcher => 5,
        }
    }

    pub fn from_rank(rank: u8) -> Option<Self> {
        Self::ALL.get(rank as usize).copied()
    }
}

/// The single comparison every gated operation goes through: the resolved level
/// must be at least as strong (numerically <=) as the required level.
pub fn is_authorized(required: PrivilegeLevel, resolved: PrivilegeLevel) -> bool {
    resolved.rank() <= required.rank()
}
