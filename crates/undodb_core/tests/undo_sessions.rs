//! Session semantics: undo, squash, commit, nesting, deltas.

mod common;

use common::{all_accounts, open_rw, open_rw_no_journal, seed_accounts, Account, Item};
use tempfile::tempdir;
use undodb_core::CoreError;

#[test]
fn dropping_a_session_undoes_it() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);

    let alice = accounts.find(0).unwrap().unwrap();
    let bob = accounts.find(1).unwrap().unwrap();

    {
        let session = db.start_undo_session().unwrap();
        accounts.modify(&bob, |b| b.balance = 200).unwrap();
        accounts
            .emplace(|a| {
                a.name = "dave".into();
                a.balance = 40;
            })
            .unwrap();
        accounts.remove(&alice).unwrap();

        assert_eq!(accounts.size(), 3);
        assert_eq!(accounts.find(0).unwrap(), None);
        assert_eq!(accounts.find(1).unwrap().unwrap().balance, 200);
        assert_eq!(accounts.find(3).unwrap().unwrap().balance, 40);
        drop(session);
    }

    assert_eq!(accounts.size(), 3);
    assert_eq!(accounts.find(0).unwrap().unwrap().balance, 10);
    assert_eq!(accounts.find(1).unwrap().unwrap().balance, 20);
    assert_eq!(accounts.find(3).unwrap(), None);
    assert_eq!(db.revision(), 0);

    // The undone id range is reusable.
    let dave = accounts
        .emplace(|a| {
            a.name = "dave".into();
            a.balance = 40;
        })
        .unwrap();
    assert_eq!(dave.id, 3);
}

#[test]
fn pushed_sessions_stay_until_undo() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);

    let session = db.start_undo_session().unwrap();
    accounts
        .emplace(|a| {
            a.name = "dave".into();
            a.balance = 40;
        })
        .unwrap();
    session.push();

    assert_eq!(accounts.size(), 4);
    assert_eq!(db.revision(), 1);

    // Pushed is not committed: an explicit undo still reverts it.
    db.undo().unwrap();
    assert_eq!(accounts.size(), 3);
    assert_eq!(db.revision(), 0);
}

#[test]
fn commit_discards_undo_history() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);

    let session = db.start_undo_session().unwrap();
    accounts
        .emplace(|a| {
            a.name = "dave".into();
            a.balance = 40;
        })
        .unwrap();
    session.push();
    db.commit(db.revision()).unwrap();

    // Nothing left to undo.
    db.undo().unwrap();
    db.undo_all().unwrap();
    assert_eq!(accounts.size(), 4);
    assert_eq!(db.revision(), 1);
    assert!(!accounts.has_undo_session());
}

#[test]
fn nested_pushed_sessions_compose() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);
    let bob = accounts.find(1).unwrap().unwrap();

    let outer = db.start_undo_session().unwrap();
    accounts.modify(&bob, |b| b.balance = 21).unwrap();

    let inner = db.start_undo_session().unwrap();
    accounts.modify(&bob, |b| b.balance = 22).unwrap();
    accounts
        .emplace(|a| {
            a.name = "dave".into();
            a.balance = 40;
        })
        .unwrap();
    inner.push();
    outer.push();

    assert_eq!(db.revision(), 2);
    assert_eq!(accounts.find(1).unwrap().unwrap().balance, 22);
    assert_eq!(accounts.size(), 4);

    // Undo the inner session only.
    db.undo().unwrap();
    assert_eq!(accounts.find(1).unwrap().unwrap().balance, 21);
    assert_eq!(accounts.size(), 3);

    // Undo the outer session.
    db.undo().unwrap();
    assert_eq!(accounts.find(1).unwrap().unwrap().balance, 20);
    assert_eq!(db.revision(), 0);
}

#[test]
fn squash_merges_into_the_enclosing_session() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);
    let alice = accounts.find(0).unwrap().unwrap();

    let outer = db.start_undo_session().unwrap();
    let inner = db.start_undo_session().unwrap();
    accounts.modify(&alice, |a| a.balance = 11).unwrap();
    inner.squash().unwrap();

    assert_eq!(db.revision(), 1);
    assert_eq!(accounts.find(0).unwrap().unwrap().balance, 11);

    // Undoing the (merged) outer session restores the pre-session state.
    drop(outer);
    assert_eq!(accounts.find(0).unwrap().unwrap().balance, 10);
    assert_eq!(db.revision(), 0);
    let rows = all_accounts(&accounts);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1].balance, 20);
}

#[test]
fn squash_of_a_single_session_keeps_the_state() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);

    let session = db.start_undo_session().unwrap();
    accounts
        .emplace(|a| {
            a.name = "dave".into();
            a.balance = 40;
        })
        .unwrap();
    session.squash().unwrap();

    assert_eq!(accounts.size(), 4);
    assert_eq!(db.revision(), 0);
    assert!(!accounts.has_undo_session());
    // The undo information is gone; undo is a no-op.
    db.undo().unwrap();
    assert_eq!(accounts.size(), 4);
}

#[test]
fn squash_drops_objects_created_and_removed_across_the_pair() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);

    let outer = db.start_undo_session().unwrap();
    let dave = accounts
        .emplace(|a| {
            a.name = "dave".into();
            a.balance = 40;
        })
        .unwrap();

    let inner = db.start_undo_session().unwrap();
    accounts.remove(&dave).unwrap();
    inner.squash().unwrap();

    assert_eq!(accounts.size(), 3);
    drop(outer);
    assert_eq!(accounts.size(), 3);
    assert_eq!(accounts.find(3).unwrap(), None);
    assert_eq!(accounts.find(0).unwrap().unwrap().balance, 10);
}

#[test]
fn squash_folds_a_modify_of_a_later_removed_object() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);
    let alice = accounts.find(0).unwrap().unwrap();

    let outer = db.start_undo_session().unwrap();
    let inner = db.start_undo_session().unwrap();
    accounts.modify(&alice, |a| a.balance = 111).unwrap();
    accounts.remove(&accounts.find(0).unwrap().unwrap()).unwrap();
    inner.squash().unwrap();

    assert_eq!(accounts.find(0).unwrap(), None);

    // Undo of the merged session restores alice with her original value.
    drop(outer);
    assert_eq!(accounts.find(0).unwrap().unwrap().balance, 10);
    assert_eq!(accounts.size(), 3);
}

#[test]
fn undo_restores_the_oldest_of_repeated_modifies() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);
    let carol = accounts.find(2).unwrap().unwrap();

    let session = db.start_undo_session().unwrap();
    accounts.modify(&carol, |c| c.balance = 31).unwrap();
    accounts.modify(&carol, |c| c.balance = 32).unwrap();
    accounts.modify(&carol, |c| c.balance = 33).unwrap();
    assert_eq!(accounts.find(2).unwrap().unwrap().balance, 33);

    drop(session);
    assert_eq!(accounts.find(2).unwrap().unwrap().balance, 30);
}

#[test]
fn undo_after_modify_then_remove_restores_the_original() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);
    let bob = accounts.find(1).unwrap().unwrap();

    let session = db.start_undo_session().unwrap();
    accounts.modify(&bob, |b| b.balance = 999).unwrap();
    accounts.remove(&accounts.find(1).unwrap().unwrap()).unwrap();
    assert_eq!(accounts.find(1).unwrap(), None);
    assert_eq!(accounts.size(), 2);

    drop(session);
    let bob = accounts.find(1).unwrap().unwrap();
    assert_eq!(bob.balance, 20);
    assert_eq!(bob.name, "bob");
    assert_eq!(accounts.size(), 3);
}

#[test]
fn undo_destroys_objects_created_in_the_session() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);

    let session = db.start_undo_session().unwrap();
    let dave = accounts
        .emplace(|a| {
            a.name = "dave".into();
            a.balance = 40;
        })
        .unwrap();
    accounts.modify(&dave, |d| d.balance = 41).unwrap();
    accounts.remove(&accounts.find(3).unwrap().unwrap()).unwrap();
    let erin = accounts
        .emplace(|a| {
            a.name = "erin".into();
            a.balance = 50;
        })
        .unwrap();
    assert_eq!(erin.id, 4);

    drop(session);
    assert_eq!(accounts.size(), 3);
    assert_eq!(accounts.find(3).unwrap(), None);
    assert_eq!(accounts.find(4).unwrap(), None);
}

#[test]
fn unique_conflict_on_modify_without_a_session_erases_the_object() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);
    let bob = accounts.find(1).unwrap().unwrap();

    let result = accounts.modify(&bob, |b| b.name = "alice".into());
    assert!(matches!(result, Err(CoreError::UniquenessViolation { .. })));

    let by_name = accounts.get_by_name("by_name").unwrap();
    assert_eq!(by_name.find("bob").unwrap(), None);
    assert_eq!(by_name.find("alice").unwrap().unwrap().balance, 10);
    assert_eq!(accounts.size(), 2);
}

#[test]
fn unique_conflict_on_modify_with_a_session_backup_restores_the_object() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);
    let bob = accounts.find(1).unwrap().unwrap();

    let session = db.start_undo_session().unwrap();
    let result = accounts.modify(&bob, |b| b.name = "alice".into());
    assert!(matches!(result, Err(CoreError::UniquenessViolation { .. })));

    // This modify pushed the backup, so bob survives intact.
    let bob = accounts.find(1).unwrap().unwrap();
    assert_eq!(bob.name, "bob");
    assert_eq!(bob.balance, 20);
    assert_eq!(accounts.size(), 3);

    drop(session);
    assert_eq!(accounts.find(1).unwrap().unwrap().name, "bob");
    assert_eq!(accounts.size(), 3);
}

#[test]
fn unique_conflict_on_emplace_rolls_back_cleanly() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);

    let result = accounts.emplace(|a| {
        a.name = "bob".into();
        a.balance = 1000;
    });
    assert!(matches!(result, Err(CoreError::UniquenessViolation { .. })));
    assert_eq!(accounts.size(), 3);

    // The failed id was not consumed.
    let dave = accounts
        .emplace(|a| {
            a.name = "dave".into();
            a.balance = 40;
        })
        .unwrap();
    assert_eq!(dave.id, 3);
}

#[test]
fn modifier_changing_the_id_is_rejected() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);
    let bob = accounts.find(1).unwrap().unwrap();

    let result = accounts.modify(&bob, |b| b.id = 77);
    assert!(matches!(result, Err(CoreError::IdChanged { .. })));
    assert_eq!(accounts.find(1).unwrap().unwrap().balance, 20);
    assert_eq!(accounts.find(77).unwrap(), None);
}

#[test]
fn undo_all_unwinds_every_session() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);

    for round in 0..3 {
        let session = db.start_undo_session().unwrap();
        accounts
            .emplace(|a| {
                a.name = format!("user-{round}");
                a.balance = round;
            })
            .unwrap();
        session.push();
    }
    assert_eq!(accounts.size(), 6);
    assert_eq!(db.revision(), 3);

    db.undo_all().unwrap();
    assert_eq!(accounts.size(), 3);
    assert_eq!(db.revision(), 0);
    assert!(!accounts.has_undo_session());
}

#[test]
fn partial_commit_keeps_newer_sessions_undoable() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);

    for round in 0..3 {
        let session = db.start_undo_session().unwrap();
        accounts
            .emplace(|a| {
                a.name = format!("user-{round}");
                a.balance = round;
            })
            .unwrap();
        session.push();
    }
    assert_eq!(accounts.undo_stack_revision_range(), (0, 3));

    db.commit(1).unwrap();
    assert_eq!(accounts.undo_stack_revision_range(), (1, 3));

    db.undo().unwrap();
    db.undo().unwrap();
    assert_eq!(accounts.size(), 4);
    assert!(all_accounts(&accounts).iter().any(|a| a.name == "user-0"));

    // The committed session is out of reach.
    db.undo().unwrap();
    assert_eq!(accounts.size(), 4);
    assert_eq!(db.revision(), 1);
}

#[test]
fn set_revision_requires_an_empty_stack_and_monotonicity() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();

    accounts.set_revision(10).unwrap();
    assert_eq!(db.revision(), 10);

    let result = accounts.set_revision(5);
    assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));

    let session = db.start_undo_session().unwrap();
    let result = accounts.set_revision(20);
    assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    drop(session);
}

#[test]
fn last_undo_session_reports_a_compressed_delta() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);
    let alice = accounts.find(0).unwrap().unwrap();
    let bob = accounts.find(1).unwrap().unwrap();

    let session = db.start_undo_session().unwrap();
    accounts
        .emplace(|a| {
            a.name = "dave".into();
            a.balance = 40;
        })
        .unwrap();
    accounts.modify(&bob, |b| b.balance = 200).unwrap();
    accounts.modify(&bob, |b| b.balance = 201).unwrap();
    accounts.remove(&alice).unwrap();

    let delta = accounts.last_undo_session().unwrap();
    assert_eq!(delta.new_values.len(), 1);
    assert_eq!(delta.new_values[0].name, "dave");
    assert_eq!(delta.old_values.len(), 1);
    assert_eq!(delta.old_values[0].balance, 20);
    assert_eq!(delta.removed_values.len(), 1);
    assert_eq!(delta.removed_values[0].name, "alice");
    assert_eq!(delta.removed_values[0].balance, 10);

    session.push();
}

#[test]
fn delta_folds_modified_then_removed_objects() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);
    let carol = accounts.find(2).unwrap().unwrap();

    let session = db.start_undo_session().unwrap();
    accounts.modify(&carol, |c| c.balance = 300).unwrap();
    accounts.remove(&accounts.find(2).unwrap().unwrap()).unwrap();

    let delta = accounts.last_undo_session().unwrap();
    assert!(delta.old_values.is_empty());
    assert_eq!(delta.removed_values.len(), 1);
    // The removed entry carries the pre-session value.
    assert_eq!(delta.removed_values[0].balance, 30);

    // Undo still restores the original after the fold.
    drop(session);
    assert_eq!(accounts.find(2).unwrap().unwrap().balance, 30);
}

#[test]
fn empty_delta_without_sessions() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);

    let delta = accounts.last_undo_session().unwrap();
    assert!(delta.new_values.is_empty());
    assert!(delta.old_values.is_empty());
    assert!(delta.removed_values.is_empty());
}

#[test]
fn sessions_fan_out_across_containers() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    let items = db.add_index::<Item>().unwrap();
    seed_accounts(&accounts);

    {
        let session = db.start_undo_session().unwrap();
        accounts
            .emplace(|a| {
                a.name = "dave".into();
                a.balance = 40;
            })
            .unwrap();
        items
            .emplace(|i| {
                i.sku = "sku-1".into();
                i.position = 7;
            })
            .unwrap();
        assert_eq!(accounts.revision(), items.revision());
        drop(session);
    }

    assert_eq!(accounts.size(), 3);
    assert_eq!(items.size(), 0);
    assert_eq!(accounts.revision(), 0);
    assert_eq!(items.revision(), 0);
}

#[test]
fn a_late_container_is_aligned_to_the_revision_line() {
    let dir = tempdir().unwrap();
    let db = open_rw(&dir.path().join("t1.db"));
    let accounts = db.add_index::<Account>().unwrap();
    seed_accounts(&accounts);

    for round in 0..2 {
        let session = db.start_undo_session().unwrap();
        accounts
            .emplace(|a| {
                a.name = format!("user-{round}");
                a.balance = 0;
            })
            .unwrap();
        session.push();
    }
    assert_eq!(accounts.undo_stack_revision_range(), (0, 2));

    let items = db.add_index::<Item>().unwrap();
    assert_eq!(items.undo_stack_revision_range(), (0, 2));
    assert_eq!(items.revision(), accounts.revision());

    // Coordinated undo still works across both.
    db.undo().unwrap();
    assert_eq!(accounts.revision(), 1);
    assert_eq!(items.revision(), 1);
}

#[test]
fn secondary_views_support_ordered_scans() {
    let dir = tempdir().unwrap();
    let db = open_rw_no_journal(&dir.path().join("t1.db"));
    let items = db.add_index::<Item>().unwrap();

    for (sku, position) in [("m", 3u64), ("a", 9), ("z", 1), ("k", 5)] {
        items
            .emplace(|i| {
                i.sku = sku.into();
                i.position = position;
            })
            .unwrap();
    }

    let by_sku: Vec<String> = items
        .get_by_name("by_sku")
        .unwrap()
        .collect()
        .unwrap()
        .into_iter()
        .map(|i| i.sku)
        .collect();
    assert_eq!(by_sku, vec!["a", "k", "m", "z"]);

    let by_position: Vec<u64> = items
        .get_by_name("by_position")
        .unwrap()
        .collect()
        .unwrap()
        .into_iter()
        .map(|i| i.position)
        .collect();
    assert_eq!(by_position, vec![1, 3, 5, 9]);

    let view = items.get_by_name("by_position").unwrap();
    assert_eq!(view.lower_bound(4u64).unwrap().unwrap().position, 5);
    assert_eq!(view.upper_bound(5u64).unwrap().unwrap().position, 9);
    let mid = view.range(2u64, 6u64).unwrap();
    assert_eq!(
        mid.iter().map(|i| i.position).collect::<Vec<_>>(),
        vec![3, 5]
    );

    // Projection between indices.
    let m = items.get_by_name("by_sku").unwrap().find("m").unwrap().unwrap();
    let via_position = items.project(&m, 2).unwrap().unwrap();
    assert_eq!(via_position.sku, "m");
}

#[test]
fn undo_repositions_secondary_indices_correctly() {
    let dir = tempdir().unwrap();
    let db = open_rw_no_journal(&dir.path().join("t1.db"));
    let items = db.add_index::<Item>().unwrap();

    for (sku, position) in [("a", 1u64), ("b", 2), ("c", 3)] {
        items
            .emplace(|i| {
                i.sku = sku.into();
                i.position = position;
            })
            .unwrap();
    }

    {
        let session = db.start_undo_session().unwrap();
        // Rotate the positions: a→3, b→1, c→2. Transient states collide,
        // so go through a free slot.
        let a = items.find(0).unwrap().unwrap();
        let b = items.find(1).unwrap().unwrap();
        let c = items.find(2).unwrap().unwrap();
        items.modify(&a, |i| i.position = 100).unwrap();
        items.modify(&b, |i| i.position = 1).unwrap();
        items.modify(&c, |i| i.position = 2).unwrap();
        items.modify(&items.find(0).unwrap().unwrap(), |i| i.position = 3).unwrap();

        let order: Vec<String> = items
            .get_by_name("by_position")
            .unwrap()
            .collect()
            .unwrap()
            .into_iter()
            .map(|i| i.sku)
            .collect();
        assert_eq!(order, vec!["b", "c", "a"]);
        drop(session);
    }

    let order: Vec<String> = items
        .get_by_name("by_position")
        .unwrap()
        .collect()
        .unwrap()
        .into_iter()
        .map(|i| i.sku)
        .collect();
    assert_eq!(order, vec!["a", "b", "c"]);
}
