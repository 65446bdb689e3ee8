//! Crash recovery through the per-container journal.

mod common;

use common::{open_rw, seed_accounts, Account};
use std::path::Path;
use tempfile::tempdir;
use undodb_core::{Database, DirtyAction, OpenMode, OpenOutcome};

fn set_dirty_byte(path: &Path) {
    use std::io::{Seek, SeekFrom, Write};
    let mut file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(12)).unwrap();
    file.write_all(&[1]).unwrap();
}

fn journal_path(path: &Path) -> std::path::PathBuf {
    std::path::PathBuf::from(format!("{}.account.journal", path.display()))
}

#[test]
fn journal_file_is_created_in_journaled_mode_only() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t1.db");
    {
        let db = open_rw(&path);
        let _accounts = db.add_index::<Account>().unwrap();
    }
    assert!(journal_path(&path).exists());

    let path2 = dir.path().join("t2.db");
    {
        let db = common::open_rw_no_journal(&path2);
        let _accounts = db.add_index::<Account>().unwrap();
    }
    assert!(!journal_path(&path2).exists());
}

#[test]
fn crash_replay_restores_journaled_mutations() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t1.db");
    let crash_journal = dir.path().join("crash.journal");

    {
        let db = open_rw(&path);
        let accounts = db.add_index::<Account>().unwrap();
        seed_accounts(&accounts);

        let session = db.start_undo_session().unwrap();
        let bob = accounts.find(1).unwrap().unwrap();
        accounts.modify(&bob, |b| b.balance = 200).unwrap();
        accounts
            .emplace(|a| {
                a.name = "dave".into();
                a.balance = 40;
            })
            .unwrap();

        // The crash happens here, before alice would have been removed:
        // snapshot the journal as it is on disk right now.
        std::fs::copy(journal_path(&path), &crash_journal).unwrap();
        drop(session);
    }
    // Re-create the crash state: the journal as of the crash, and the
    // dirty marker a dying process leaves behind.
    std::fs::copy(&crash_journal, journal_path(&path)).unwrap();
    set_dirty_byte(&path);

    let db = Database::open(&path, OpenMode::ReadWrite, 4 << 20, DirtyAction::Reset).unwrap();
    assert_eq!(db.outcome(), OpenOutcome::Reset);
    let accounts = db.add_index::<Account>().unwrap();

    assert_eq!(accounts.size(), 4);
    assert_eq!(accounts.find(0).unwrap().unwrap().balance, 10);
    assert_eq!(accounts.find(1).unwrap().unwrap().balance, 200);
    assert_eq!(accounts.find(2).unwrap().unwrap().balance, 30);
    assert_eq!(accounts.find(3).unwrap().unwrap().balance, 40);

    // The replayed session is still open on the stack.
    assert_eq!(db.revision(), 1);
    assert!(accounts.has_undo_session());
    db.undo().unwrap();
    assert_eq!(accounts.find(1).unwrap().unwrap().balance, 20);
    assert_eq!(accounts.find(3).unwrap(), None);
}

#[test]
fn replay_reproduces_session_undo() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t1.db");

    {
        let db = open_rw(&path);
        let accounts = db.add_index::<Account>().unwrap();
        seed_accounts(&accounts);

        // A session that was undone before the crash.
        {
            let session = db.start_undo_session().unwrap();
            accounts
                .emplace(|a| {
                    a.name = "ghost".into();
                    a.balance = 0;
                })
                .unwrap();
            drop(session);
        }
    }
    set_dirty_byte(&path);

    let db = Database::open(&path, OpenMode::ReadWrite, 4 << 20, DirtyAction::Reset).unwrap();
    let accounts = db.add_index::<Account>().unwrap();
    assert_eq!(accounts.size(), 3);
    assert_eq!(db.revision(), 0);
    let by_name = accounts.get_by_name("by_name").unwrap();
    assert_eq!(by_name.find("ghost").unwrap(), None);
}

#[test]
fn replay_handles_collapsed_empty_sessions() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t1.db");

    {
        let db = open_rw(&path);
        let accounts = db.add_index::<Account>().unwrap();
        seed_accounts(&accounts);

        // start_undo + commit with no mutations collapses to a single
        // revision marker in the journal.
        let session = db.start_undo_session().unwrap();
        session.push();
        db.commit(db.revision()).unwrap();
        assert_eq!(db.revision(), 1);

        // A later session on top of the moved revision line.
        let session = db.start_undo_session().unwrap();
        accounts
            .emplace(|a| {
                a.name = "dave".into();
                a.balance = 40;
            })
            .unwrap();
        session.push();
        assert_eq!(db.revision(), 2);
    }
    set_dirty_byte(&path);

    let db = Database::open(&path, OpenMode::ReadWrite, 4 << 20, DirtyAction::Reset).unwrap();
    let accounts = db.add_index::<Account>().unwrap();
    assert_eq!(accounts.size(), 4);
    assert_eq!(db.revision(), 2);
    assert_eq!(accounts.undo_stack_revision_range(), (1, 2));
}

#[test]
fn replay_reproduces_undo_all() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t1.db");

    {
        let db = open_rw(&path);
        let accounts = db.add_index::<Account>().unwrap();
        seed_accounts(&accounts);

        for round in 0..2 {
            let session = db.start_undo_session().unwrap();
            accounts
                .emplace(|a| {
                    a.name = format!("tmp-{round}");
                    a.balance = 0;
                })
                .unwrap();
            session.push();
        }
        db.undo_all().unwrap();
        assert_eq!(accounts.size(), 3);
    }
    set_dirty_byte(&path);

    let db = Database::open(&path, OpenMode::ReadWrite, 4 << 20, DirtyAction::Reset).unwrap();
    let accounts = db.add_index::<Account>().unwrap();
    assert_eq!(accounts.size(), 3);
    assert_eq!(db.revision(), 0);
}

#[test]
fn torn_journal_tail_replays_the_valid_prefix() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t1.db");

    {
        let db = open_rw(&path);
        let accounts = db.add_index::<Account>().unwrap();
        seed_accounts(&accounts);
    }

    // Tear the last record: chop a few bytes off the journal.
    let jpath = journal_path(&path);
    let data = std::fs::read(&jpath).unwrap();
    std::fs::write(&jpath, &data[..data.len() - 5]).unwrap();

    set_dirty_byte(&path);
    let db = Database::open(&path, OpenMode::ReadWrite, 4 << 20, DirtyAction::Reset).unwrap();
    let accounts = db.add_index::<Account>().unwrap();

    // The torn insert of carol is gone; alice and bob replayed.
    assert_eq!(accounts.size(), 2);
    assert_eq!(accounts.find(0).unwrap().unwrap().name, "alice");
    assert_eq!(accounts.find(1).unwrap().unwrap().name, "bob");
    assert_eq!(accounts.find(2).unwrap(), None);

    // And the container keeps working from there.
    let carol = accounts
        .emplace(|a| {
            a.name = "carol".into();
            a.balance = 30;
        })
        .unwrap();
    assert_eq!(carol.id, 2);
}

#[test]
fn clean_reopen_does_not_replay() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t1.db");

    {
        let db = open_rw(&path);
        let accounts = db.add_index::<Account>().unwrap();
        seed_accounts(&accounts);
    }

    // Clean close: the segment is authoritative, the journal is only
    // opened for appending.
    let db = open_rw(&path);
    assert_eq!(db.outcome(), OpenOutcome::Good);
    let accounts = db.add_index::<Account>().unwrap();
    assert_eq!(accounts.size(), 3);

    let dave = accounts
        .emplace(|a| {
            a.name = "dave".into();
            a.balance = 40;
        })
        .unwrap();
    assert_eq!(dave.id, 3);
}
