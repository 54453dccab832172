//! Models for storing account balances in the database.

use alloy_primitives::Address;
use reth_db_api::table::Table;
use serde::{Deserialize, Serialize};

/// Balance snapshot of a single account.
///
/// Records are upserted by the balance sweeper and never deleted. They are
/// eventually consistent with the chain; staleness is bounded by the sweep
/// interval.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRecord {
    /// Account address.
    pub address: Address,
    /// Balance in decimal units.
    pub balance: String,
    /// Balance as a float, for sorting (rich list).
    pub balance_decimal: f64,
    /// Number of transactions sent from the account.
    pub nonce: u64,
    /// Start time (seconds since Unix epoch) of the sweep that wrote this record.
    pub last_updated: u64,
}

/// A table for storing account balances by address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct Addresses;

impl Table for Addresses {
    const NAME: &'static str = "addresses";

    const DUPSORT: bool = false;

    type Key = Address;

    type Value = AddressRecord;
}
