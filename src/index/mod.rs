//! Key index: maps arbitrary byte-string keys to the entry stored under them.

mod sharded;

pub(crate) use sharded::KeyIndex;
