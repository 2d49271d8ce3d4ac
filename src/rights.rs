//! Rights resolution: which organization governs an action, and what privilege
//! the actor holds there.
//!
//! Resolution is pure logic over a [`MembershipSnapshot`] loaded once per
//! operation, so concurrent membership changes never shift a decision
//! mid-request. The storage lookups that turn a [`Target`] into a
//! [`TargetScope`] live in the service layer; everything here is deterministic.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::LendingError;
use crate::privilege::PrivilegeLevel;

/// What an operation is aimed at. Determines the organization scope the
/// authorization gate runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Organization(String),
    Item(String),
    Tag(String),
    Group(String),
    Order(String),
    /// No target: "my best organization".
    Ambient,
}

/// A target reduced to its organization scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetScope {
    /// The action is governed by exactly one organization.
    Single(String),
    /// The action touches items across several organizations (tags).
    Spanning(BTreeSet<String>),
    /// No target was given; fall back to the actor's best membership.
    Ambient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub organization_id: String,
    pub level: PrivilegeLevel,
}

/// Immutable per-operation view of a user's memberships.
#[derive(Debug, Clone, Default)]
pub struct MembershipSnapshot {
    by_org: BTreeMap<String, PrivilegeLevel>,
}

impl MembershipSnapshot {
    pub fn new<I>(memberships: I) -> Self
    where
        I: IntoIterator<Item = (String, PrivilegeLevel)>,
    {
        Self {
            by_org: memberships.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_org.is_empty()
    }

    pub fn level_in(&self, organization_id: &str) -> Option<PrivilegeLevel> {
        self.by_org.get(organization_id).copied()
    }

    /// The single most-privileged membership. Ties break deterministically by
    /// ascending organization id (map iteration order).
    pub fn best(&self) -> Option<(&str, PrivilegeLevel)> {
        let mut best: Option<(&str, PrivilegeLevel)> = None;
        for (org, level) in &self.by_org {
            match best {
                Some((_, current)) if level.rank() >= current.rank() => {}
                _ => best = Some((org.as_str(), *level)),
            }
        }
        best
    }

    /// Does the actor hold some membership in every one of these organizations?
    pub fn covers(&self, organizations: &BTreeSet<String>) -> bool {
        organizations.iter().all(|org| self.by_org.contains_key(org))
    }
}

/// Resolve the actor's effective privilege for a scope.
///
/// - `Single`: the membership level in that organization, or `EntityNotMember`.
/// - `Spanning`: the actor must hold a membership in every organization of the
///   set; otherwise the deny is unconditional, no matter how strong any single
///   membership is. When covered, the effective level is the weakest link: the
///   numerically highest rank among the relevant memberships, reported against
///   the first organization (ascending id) holding it.
/// - `Ambient`: the actor's best membership anywhere.
pub fn resolve(
    snapshot: &MembershipSnapshot,
    scope: &TargetScope,
) -> Result<Resolved, LendingError> {
    match scope {
        TargetScope::Single(org) => {
            let level = snapshot
                .level_in(org)
                .ok_or(LendingError::EntityNotMember)?;
            Ok(Resolved {
                organization_id: org.clone(),
                level,
            })
        }
        TargetScope::Spanning(orgs) => {
            if orgs.is_empty() {
                return Err(LendingError::EntityNotScoped);
            }
            if !snapshot.covers(orgs) {
                return Err(LendingError::EntityNotMember);
            }

            let mut weakest: Option<(&str, PrivilegeLevel)> = None;
            for org in orgs {
                // covers() already proved each lookup succeeds
                let level = snapshot
                    .level_in(org)
                    .ok_or(LendingError::EntityNotMember)?;
                match weakest {
                    Some((_, current)) if level.rank() <= current.rank() => {}
                    _ => weakest = Some((org.as_str(), level)),
                }
            }

            let (org, level) = weakest.ok_or(LendingError::EntityNotScoped)?;
            Ok(Resolved {
                organization_id: org.to_string(),
                level,
            })
        }
        TargetScope::Ambient => {
            let (org, level) = snapshot.best().ok_or(LendingError::EntityNotMember)?;
            Ok(Resolved {
                organization_id: org.to_string(),
                level,
            })
        }
    }
}
