//! Smoke Screen Unit tests for the lending core components
//!
//! These test are unit tests that span the codebase, testing behavior in
//! isolation from integration scenarios. These are intended as smoke-screen
//! and generally test the happy-path.
//!
#![allow(unused_imports)]

use std::sync::Arc;

use lending_core::{
    error::{LendingError, NOT_AUTHORIZED_MESSAGE},
    model::{new_id, DateRange, DepositCaps, Item, Membership, TimeStamp},
    privilege::{is_authorized, PrivilegeLevel},
    reminder::{NoopScheduler, RecordingScheduler, ReminderScheduler},
    service::LendingService,
    status::BookingStatus,
    store::Store,
};

fn open_db(dir: &tempfile::TempDir, name: &str) -> Arc<sled::Db> {
    let db = sled::open(dir.path().join(name)).unwrap();
    db.clear().unwrap();
    Arc::new(db)
}

/// Installs the bootstrap SystemAdmin membership the way an installer would,
/// directly through the store, and returns the admin's user id.
fn seed_sysadmin(store: &Store) -> String {
    let sysadmin = new_id();
    store
        .put_membership(&Membership {
            user_id: sysadmin.clone(),
            organization_id: "root".to_string(),
            level: PrivilegeLevel::SystemAdmin,
            agreement_acknowledged: true,
        })
        .unwrap();
    sysadmin
}

// PRIVILEGE MODULE TESTS
#[cfg(test)]
mod privilege_tests {
    use super::*;

    /// The full required/resolved grid, spelled out once: access is granted
    /// exactly when the resolved rank is at most the required rank.
    #[test]
    fn gate_grid_matches_rank_order() {
        for required in PrivilegeLevel::ALL {
            for resolved in PrivilegeLevel::ALL {
                assert_eq!(
                    is_authorized(required, resolved),
                    resolved.rank() <= required.rank(),
                    "required={required:?} resolved={resolved:?}"
                );
            }
        }
    }

    #[test]
    fn system_admin_is_strongest_watcher_weakest() {
        assert_eq!(PrivilegeLevel::SystemAdmin.rank(), 0);
        assert_eq!(PrivilegeLevel::Watcher.rank(), 5);
        assert!(is_authorized(PrivilegeLevel::Watcher, PrivilegeLevel::SystemAdmin));
        assert!(!is_authorized(PrivilegeLevel::SystemAdmin, PrivilegeLevel::Watcher));
    }
}

// STATUS MODULE TESTS
#[cfg(test)]
mod status_tests {
    use super::*;

    #[test]
    fn every_tag_parses_back() {
        for tag in ["pending", "reserved", "accepted", "picked", "rejected", "returned"] {
            assert_eq!(BookingStatus::from_tag(tag).unwrap().tag(), tag);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(matches!(
            BookingStatus::from_tag("lost"),
            Err(LendingError::InvalidStatus(_))
        ));
    }
}

// ERROR MODULE TESTS
#[cfg(test)]
mod error_tests {
    use super::*;

    /// Whether the target was unknown, unscoped or merely out of reach must
    /// look the same from the outside.
    #[test]
    fn resolution_failures_are_indistinguishable_to_callers() {
        let messages: Vec<String> = [
            LendingError::EntityNotScoped,
            LendingError::EntityNotMember,
            LendingError::NotAuthorized,
        ]
        .iter()
        .map(LendingError::public_message)
        .collect();

        assert!(messages.iter().all(|m| m == NOT_AUTHORIZED_MESSAGE));
    }

    #[test]
    fn operational_failures_stay_specific() {
        assert_ne!(
            LendingError::ItemUnavailable("item_1".into()).public_message(),
            NOT_AUTHORIZED_MESSAGE
        );
        assert_ne!(
            LendingError::InvalidStatus("lost".into()).public_message(),
            NOT_AUTHORIZED_MESSAGE
        );
    }
}

// AVAILABILITY MODULE TESTS
#[cfg(test)]
mod availability_tests {
    use super::*;
    use lending_core::availability::{is_available, overlaps};

    fn range(from: (i32, u32, u32), till: (i32, u32, u32)) -> DateRange {
        DateRange::new(
            TimeStamp::from_ymd(from.0, from.1, from.2).unwrap(),
            TimeStamp::from_ymd(till.0, till.1, till.2).unwrap(),
        )
    }

    /// Touching end dates conflict, a one-day gap does not.
    #[test]
    fn boundary_dates_conflict() {
        let first = range((2019, 1, 1), (2019, 1, 2));

        assert!(overlaps(&first, &range((2019, 1, 2), (2019, 1, 5))));
        assert!(!overlaps(&first, &range((2019, 1, 3), (2019, 1, 5))));
    }

    #[test]
    fn candidate_is_checked_against_every_existing_range() {
        let existing = vec![
            range((2019, 1, 1), (2019, 1, 2)),
            range((2019, 2, 1), (2019, 2, 10)),
        ];

        assert!(is_available(&existing, &range((2019, 1, 10), (2019, 1, 20))));
        assert!(!is_available(&existing, &range((2019, 2, 9), (2019, 2, 12))));
    }
}

// DEPOSIT MODULE TESTS
#[cfg(test)]
mod deposit_tests {
    use super::*;
    use lending_core::deposit::compute_deposit;

    #[test]
    fn capped_at_the_acting_level() {
        let caps = DepositCaps::new()
            .with(PrivilegeLevel::Member, 5)
            .with(PrivilegeLevel::OrganizationAdmin, 500);

        assert_eq!(compute_deposit(&[5], &caps, PrivilegeLevel::Member, None), 5);
        assert_eq!(compute_deposit(&[5, 5], &caps, PrivilegeLevel::Member, None), 5);
        assert_eq!(
            compute_deposit(&[5, 5], &caps, PrivilegeLevel::OrganizationAdmin, None),
            10
        );
    }

    #[test]
    fn empty_item_list_costs_nothing() {
        let caps = DepositCaps::new().with(PrivilegeLevel::Member, 100);
        assert_eq!(compute_deposit(&[], &caps, PrivilegeLevel::Member, None), 0);
    }
}

// RIGHTS MODULE TESTS
#[cfg(test)]
mod rights_tests {
    use super::*;
    use lending_core::rights::{resolve, MembershipSnapshot, TargetScope};
    use std::collections::BTreeSet;

    fn snapshot(entries: &[(&str, PrivilegeLevel)]) -> MembershipSnapshot {
        MembershipSnapshot::new(entries.iter().map(|(org, level)| (org.to_string(), *level)))
    }

    #[test]
    fn membership_elsewhere_does_not_leak_into_scope() {
        let snap = snapshot(&[("org_a", PrivilegeLevel::SystemAdmin)]);
        assert!(matches!(
            resolve(&snap, &TargetScope::Single("org_b".into())),
            Err(LendingError::EntityNotMember)
        ));
    }

    #[test]
    fn spanning_resolves_to_the_weakest_membership() {
        let snap = snapshot(&[
            ("org_a", PrivilegeLevel::InventoryAdmin),
            ("org_b", PrivilegeLevel::Watcher),
        ]);
        let orgs: BTreeSet<String> = ["org_a", "org_b"].iter().map(|s| s.to_string()).collect();

        let resolved = resolve(&snap, &TargetScope::Spanning(orgs)).unwrap();
        // the watcher membership drags the whole action down
        assert_eq!(resolved.level, PrivilegeLevel::Watcher);
        assert!(!is_authorized(PrivilegeLevel::InventoryAdmin, resolved.level));
    }

    #[test]
    fn ambient_is_the_best_membership_lowest_org_id_on_ties() {
        let snap = snapshot(&[
            ("org_c", PrivilegeLevel::Member),
            ("org_a", PrivilegeLevel::Customer),
            ("org_b", PrivilegeLevel::Member),
        ]);
        let resolved = resolve(&snap, &TargetScope::Ambient).unwrap();

        assert_eq!(resolved.level, PrivilegeLevel::Member);
        assert_eq!(resolved.organization_id, "org_b");
    }
}

// STORE MODULE TESTS
#[cfg(test)]
mod store_tests {
    use super::*;

    #[test]
    fn bookings_for_item_spans_orders() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir, "store_bookings_for_item.db");
        let store = Store::new(db.clone());
        let sysadmin = seed_sysadmin(&store);
        let service = LendingService::new(db, Arc::new(NoopScheduler));

        let org = service
            .create_organization(&sysadmin, "Org X", "Olten", DepositCaps::new())
            .unwrap();
        let item = service
            .create_item(&sysadmin, &org.id, "trailer", 0, true)
            .unwrap();

        for (from, till) in [((2024, 1, 1), (2024, 1, 2)), ((2024, 2, 1), (2024, 2, 2))] {
            service
                .create_order(
                    &new_id(),
                    std::slice::from_ref(&item.id),
                    DateRange::new(
                        TimeStamp::from_ymd(from.0, from.1, from.2).unwrap(),
                        TimeStamp::from_ymd(till.0, till.1, till.2).unwrap(),
                    ),
                    None,
                )
                .unwrap();
        }

        let bookings = store.bookings_for_item(&item.id).unwrap();
        assert_eq!(bookings.len(), 2);
        assert!(bookings.iter().all(|b| b.item_id == item.id));
    }
}

// SERVICE MODULE TESTS
#[cfg(test)]
mod service_tests {
    use super::*;

    #[test]
    fn organization_creation_needs_system_admin() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir, "service_org_create.db");
        let store = Store::new(db.clone());
        let service = LendingService::new(db, Arc::new(NoopScheduler));

        let nobody = new_id();
        let err = service
            .create_organization(&nobody, "Org X", "Nowhere", DepositCaps::new())
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<LendingError>().map(LendingError::public_message),
            Some(NOT_AUTHORIZED_MESSAGE.to_string())
        );

        let org_admin = new_id();
        store
            .put_membership(&Membership {
                user_id: org_admin.clone(),
                organization_id: "root".to_string(),
                level: PrivilegeLevel::OrganizationAdmin,
                agreement_acknowledged: true,
            })
            .unwrap();
        assert!(service
            .create_organization(&org_admin, "Org X", "Nowhere", DepositCaps::new())
            .is_err());

        let sysadmin = seed_sysadmin(&store);
        assert!(service
            .create_organization(&sysadmin, "Org X", "Nowhere", DepositCaps::new())
            .is_ok());
    }

    #[test]
    fn inventory_work_is_inventory_admin_gated() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir, "service_inventory_gate.db");
        let store = Store::new(db.clone());
        let sysadmin = seed_sysadmin(&store);
        let service = LendingService::new(db, Arc::new(NoopScheduler));

        let org = service
            .create_organization(&sysadmin, "Org X", "Brig", DepositCaps::new())
            .unwrap();

        let member = new_id();
        service
            .set_membership(&sysadmin, &org.id, &member, PrivilegeLevel::Member)
            .unwrap();
        let err = service
            .create_item(&member, &org.id, "ladder", 0, true)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LendingError>(),
            Some(LendingError::NotAuthorized)
        ));

        let keeper = new_id();
        service
            .set_membership(&sysadmin, &org.id, &keeper, PrivilegeLevel::InventoryAdmin)
            .unwrap();
        let item = service.create_item(&keeper, &org.id, "ladder", 0, true).unwrap();
        let item = service
            .update_item(&keeper, &item.id, "tall ladder", 5, false)
            .unwrap();
        assert_eq!(
            item,
            Item {
                id: item.id.clone(),
                organization_id: org.id.clone(),
                name: "tall ladder".into(),
                deposit: 5,
                borrowable: false,
            }
        );
    }

    /// A group's scope comes from its first item; an empty group has no scope
    /// and is rejected before any gate check runs.
    #[test]
    fn group_scope_is_first_item_and_empty_is_unscoped() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir, "service_group_scope.db");
        let store = Store::new(db.clone());
        let sysadmin = seed_sysadmin(&store);
        let service = LendingService::new(db, Arc::new(NoopScheduler));

        let org = service
            .create_organization(&sysadmin, "Org X", "Arosa", DepositCaps::new())
            .unwrap();
        let item = service.create_item(&sysadmin, &org.id, "skis", 0, true).unwrap();

        let err = service.create_group(&sysadmin, "winter", &[]).unwrap_err();
        let lending = err.downcast_ref::<LendingError>().unwrap();
        assert!(matches!(lending, LendingError::EntityNotScoped));
        assert_eq!(lending.public_message(), NOT_AUTHORIZED_MESSAGE);

        let group = service
            .create_group(&sysadmin, "winter", std::slice::from_ref(&item.id))
            .unwrap();
        service.delete_group(&sysadmin, &group.id).unwrap();
    }

    /// Group edits are gated in the group's current scope and, when the item
    /// set moves the group to another organization, in that one as well.
    #[test]
    fn group_updates_are_gated_in_both_scopes() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir, "service_group_update.db");
        let store = Store::new(db.clone());
        let sysadmin = seed_sysadmin(&store);
        let service = LendingService::new(db, Arc::new(NoopScheduler));

        let org_a = service
            .create_organization(&sysadmin, "Org A", "Chur", DepositCaps::new())
            .unwrap();
        let org_b = service
            .create_organization(&sysadmin, "Org B", "Sargans", DepositCaps::new())
            .unwrap();
        let item_a = service.create_item(&sysadmin, &org_a.id, "sled", 0, true).unwrap();
        let item_b = service.create_item(&sysadmin, &org_b.id, "skis", 0, true).unwrap();

        let group = service
            .create_group(&sysadmin, "winter", std::slice::from_ref(&item_a.id))
            .unwrap();

        let keeper = new_id();
        service
            .set_membership(&sysadmin, &org_a.id, &keeper, PrivilegeLevel::InventoryAdmin)
            .unwrap();

        // within the current scope the keeper may edit freely
        let group = service
            .update_group(&keeper, &group.id, std::slice::from_ref(&item_a.id))
            .unwrap();
        assert_eq!(group.item_ids, vec![item_a.id.clone()]);

        // moving the group into an organization the keeper is no member of
        // denies outright
        let err = service
            .update_group(&keeper, &group.id, std::slice::from_ref(&item_b.id))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LendingError>(),
            Some(LendingError::EntityNotMember)
        ));

        // a plain member in the current scope is too weak
        let member = new_id();
        service
            .set_membership(&sysadmin, &org_a.id, &member, PrivilegeLevel::Member)
            .unwrap();
        let err = service
            .update_group(&member, &group.id, std::slice::from_ref(&item_a.id))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LendingError>(),
            Some(LendingError::NotAuthorized)
        ));

        // the sysadmin administers both organizations and may move it
        let group = service
            .update_group(&sysadmin, &group.id, std::slice::from_ref(&item_b.id))
            .unwrap();
        assert_eq!(group.item_ids, vec![item_b.id.clone()]);
    }

    #[test]
    fn unknown_targets_surface_entity_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir, "service_not_found.db");
        let store = Store::new(db.clone());
        let sysadmin = seed_sysadmin(&store);
        let service = LendingService::new(db, Arc::new(NoopScheduler));

        let err = service.get_order("no-such-order").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LendingError>(),
            Some(LendingError::EntityNotFound { kind: "order", .. })
        ));

        let err = service
            .set_deposit_cap(&sysadmin, "no-such-org", PrivilegeLevel::Member, 5)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LendingError>(),
            Some(LendingError::EntityNotFound { kind: "organization", .. })
        ));

        let err = service
            .create_order(
                &new_id(),
                &["no-such-item".to_string()],
                DateRange::new(TimeStamp::from_ymd(2024, 1, 1).unwrap(), TimeStamp::from_ymd(2024, 1, 2).unwrap()),
                None,
            )
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LendingError>(),
            Some(LendingError::EntityNotFound { kind: "item", .. })
        ));
    }

    #[test]
    fn rights_changes_are_organization_admin_gated() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir, "service_rights_gate.db");
        let store = Store::new(db.clone());
        let sysadmin = seed_sysadmin(&store);
        let service = LendingService::new(db, Arc::new(NoopScheduler));

        let org = service
            .create_organization(&sysadmin, "Org X", "Davos", DepositCaps::new())
            .unwrap();

        let keeper = new_id();
        service
            .set_membership(&sysadmin, &org.id, &keeper, PrivilegeLevel::InventoryAdmin)
            .unwrap();

        // an inventory admin may not grant rights
        let err = service
            .set_membership(&keeper, &org.id, &new_id(), PrivilegeLevel::Member)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LendingError>(),
            Some(LendingError::NotAuthorized)
        ));

        // removal follows the same gate and really removes the membership
        service.remove_membership(&sysadmin, &org.id, &keeper).unwrap();
        assert!(store.get_membership(&keeper, &org.id).unwrap().is_none());
        assert!(service.memberships_for(&keeper).unwrap().is_empty());
    }

    #[test]
    fn agreement_acknowledgement_is_self_service() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir, "service_agreement.db");
        let store = Store::new(db.clone());
        let sysadmin = seed_sysadmin(&store);
        let service = LendingService::new(db, Arc::new(NoopScheduler));

        let org = service
            .create_organization(&sysadmin, "Org X", "Glarus", DepositCaps::new())
            .unwrap();
        let user = new_id();
        service
            .set_membership(&sysadmin, &org.id, &user, PrivilegeLevel::Customer)
            .unwrap();

        let membership = service.acknowledge_agreement(&user, &org.id).unwrap();
        assert!(membership.agreement_acknowledged);

        // level changes keep the acknowledged flag
        let membership = service
            .set_membership(&sysadmin, &org.id, &user, PrivilegeLevel::Member)
            .unwrap();
        assert!(membership.agreement_acknowledged);
        assert_eq!(membership.level, PrivilegeLevel::Member);

        let err = service.acknowledge_agreement(&new_id(), &org.id).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LendingError>(),
            Some(LendingError::EntityNotMember)
        ));
    }

    #[test]
    fn scheduler_failures_never_fail_the_booking() {
        struct FailingScheduler;
        impl ReminderScheduler for FailingScheduler {
            fn schedule(&self, _order_id: &str) -> anyhow::Result<()> {
                anyhow::bail!("timer service unreachable")
            }
            fn cancel(&self, _order_id: &str) -> anyhow::Result<()> {
                anyhow::bail!("timer service unreachable")
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir, "service_scheduler_failure.db");
        let store = Store::new(db.clone());
        let sysadmin = seed_sysadmin(&store);
        let service = LendingService::new(db, Arc::new(FailingScheduler));

        let org = service
            .create_organization(&sysadmin, "Org X", "Baden", DepositCaps::new())
            .unwrap();
        let item = service.create_item(&sysadmin, &org.id, "piano", 0, true).unwrap();

        // the booking commits even though every scheduler call errors
        let order = service
            .create_order(
                &new_id(),
                std::slice::from_ref(&item.id),
                DateRange::new(TimeStamp::from_ymd(2024, 1, 1).unwrap(), TimeStamp::from_ymd(2024, 1, 2).unwrap()),
                None,
            )
            .unwrap();
        assert!(service.get_order(&order.id).is_ok());
    }

    #[test]
    fn failed_creation_schedules_no_reminder() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir, "service_no_reminder_on_failure.db");
        let store = Store::new(db.clone());
        let sysadmin = seed_sysadmin(&store);
        let scheduler = Arc::new(RecordingScheduler::new());
        let service = LendingService::new(db, scheduler.clone());

        let org = service
            .create_organization(&sysadmin, "Org X", "Wil", DepositCaps::new())
            .unwrap();
        let item = service.create_item(&sysadmin, &org.id, "mixer", 0, true).unwrap();

        let range =
            DateRange::new(TimeStamp::from_ymd(2024, 1, 1).unwrap(), TimeStamp::from_ymd(2024, 1, 5).unwrap());
        service
            .create_order(&new_id(), std::slice::from_ref(&item.id), range.clone(), None)
            .unwrap();
        let calls_before = scheduler.calls().len();

        assert!(service
            .create_order(&new_id(), std::slice::from_ref(&item.id), range, None)
            .is_err());
        assert_eq!(scheduler.calls().len(), calls_before);
    }
}
