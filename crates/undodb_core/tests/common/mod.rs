//! Shared fixtures for the integration tests.

// Each integration test binary compiles this module separately and uses
// a different subset of it.
#![allow(dead_code)]

use std::path::Path;
use undodb_codec::{CodecResult, Decoder, Encoder};
use undodb_core::{Database, DirtyAction, IndexDef, IndexKey, Object, OpenMode};

/// The canonical test object: unique by `id` and by `name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub id: u64,
    pub name: String,
    pub balance: i64,
}

fn account_name_key(account: &Account) -> IndexKey {
    IndexKey::from_str(&account.name)
}

static ACCOUNT_INDICES: [IndexDef<Account>; 1] = [IndexDef {
    name: "by_name",
    key: account_name_key,
}];

impl Object for Account {
    const TYPE_NAME: &'static str = "account";
    const TYPE_ID: u16 = 1;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn encode(&self, enc: &mut Encoder) {
        enc.write_u64(self.id);
        enc.write_str(&self.name);
        enc.write_i64(self.balance);
    }

    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        Ok(Self {
            id: dec.read_u64()?,
            name: dec.read_string()?,
            balance: dec.read_i64()?,
        })
    }

    fn secondary_indices() -> &'static [IndexDef<Self>] {
        &ACCOUNT_INDICES
    }
}

/// A second object type, unique by `sku` and by `position`, for
/// multi-container and multi-secondary-index scenarios.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    pub id: u64,
    pub sku: String,
    pub position: u64,
}

fn item_sku_key(item: &Item) -> IndexKey {
    IndexKey::from_str(&item.sku)
}

fn item_position_key(item: &Item) -> IndexKey {
    IndexKey::from_u64(item.position)
}

static ITEM_INDICES: [IndexDef<Item>; 2] = [
    IndexDef {
        name: "by_sku",
        key: item_sku_key,
    },
    IndexDef {
        name: "by_position",
        key: item_position_key,
    },
];

impl Object for Item {
    const TYPE_NAME: &'static str = "item";
    const TYPE_ID: u16 = 2;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn encode(&self, enc: &mut Encoder) {
        enc.write_u64(self.id);
        enc.write_str(&self.sku);
        enc.write_u64(self.position);
    }

    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        Ok(Self {
            id: dec.read_u64()?,
            sku: dec.read_string()?,
            position: dec.read_u64()?,
        })
    }

    fn secondary_indices() -> &'static [IndexDef<Self>] {
        &ITEM_INDICES
    }
}

/// Opens a read-write database of 4 MiB at `path`.
pub fn open_rw(path: &Path) -> Database {
    Database::open(path, OpenMode::ReadWrite, 4 << 20, DirtyAction::Fail).unwrap()
}

/// Opens a read-write database without journaling.
pub fn open_rw_no_journal(path: &Path) -> Database {
    Database::open(
        path,
        OpenMode::ReadWriteNoJournal,
        4 << 20,
        DirtyAction::Fail,
    )
    .unwrap()
}

/// Seeds the three canonical rows of the E1 scenario.
pub fn seed_accounts(accounts: &undodb_core::UndoMultiIndex<Account>) {
    for (name, balance) in [("alice", 10), ("bob", 20), ("carol", 30)] {
        accounts
            .emplace(|a| {
                a.name = name.to_string();
                a.balance = balance;
            })
            .unwrap();
    }
}

/// All accounts in primary-index order.
pub fn all_accounts(accounts: &undodb_core::UndoMultiIndex<Account>) -> Vec<Account> {
    accounts.iter().collect::<Result<Vec<_>, _>>().unwrap()
}
