//! Database table schemas used by the indexer.
//!
//! This module defines the value types, keys, and table layouts for all data
//! persisted by the ingestion engine.
//!
//! The tables are registered using [`reth_db_api::table::TableInfo`] and grouped into a
//! [`reth_db_api::TableSet`] for database initialization via Reth's storage-api.

mod block;
pub use block::{Blocks, StoredBlock};

mod transaction;
pub use transaction::{BlockTransactions, StoredTransaction, Transactions};

mod address;
pub use address::{AddressRecord, Addresses};

mod checkpoint;
pub use checkpoint::{Checkpoint, CheckpointKey, Checkpoints};

/// Implements [`reth_db_api::table::Compress`] and [`reth_db_api::table::Decompress`] traits for
/// types that implement [`serde::Serialize`] and [`serde::Deserialize`].
///
/// Values carry decimal strings and optional addresses, so they are stored as JSON documents
/// rather than through the compact codec.
///
/// Encoding cannot fail for these types: they are plain structs of integers, strings,
/// fixed-size byte arrays and finite floats, with no maps and no custom serializers. A
/// type that breaks this must not use the macro, since a failed encode leaves the value
/// empty and the next read fails with [`reth_db_api::DatabaseError::Decode`].
///
/// # Example
/// ```ignore
/// impl_compression_for_serde!(StoredBlock, AddressRecord);
/// ```
macro_rules! impl_compression_for_serde {
    ($($name:ident),+ $(,)?) => {
        $(
            impl reth_db_api::table::Compress for $name {
                type Compressed = Vec<u8>;

                fn compress_to_buf<B: bytes::BufMut + AsMut<[u8]>>(&self, buf: &mut B) {
                    match serde_json::to_vec(self) {
                        Ok(encoded) => buf.put_slice(&encoded),
                        Err(err) => tracing::error!(
                            target: "chainvault_storage",
                            %err,
                            "Failed to encode {}, value left empty",
                            stringify!($name)
                        ),
                    }
                }
            }

            impl reth_db_api::table::Decompress for $name {
                fn decompress(value: &[u8]) -> Result<Self, reth_db_api::DatabaseError> {
                    serde_json::from_slice(value).map_err(|_| reth_db_api::DatabaseError::Decode)
                }
            }
        )+
    };
}

/// Implements [`reth_db_api::table::TableInfo`] for one or more table types that implement
/// [`reth_db_api::table::Table`] or [`reth_db_api::table::DupSort`].
///
/// This allows the table to be registered and introspected by the Reth database schema system.
macro_rules! impl_table_info {
    ($($table:ty),+ $(,)?) => {
        $(
            impl reth_db_api::table::TableInfo for $table
            where
                $table: reth_db_api::table::Table,
            {
                fn name(&self) -> &'static str {
                    <$table as reth_db_api::table::Table>::NAME
                }

                fn is_dupsort(&self) -> bool {
                    <$table as reth_db_api::table::Table>::DUPSORT
                }
            }
        )+
    };
}

/// Declares a struct representing a collection of tables and implements [`reth_db_api::TableSet`]
/// for it.
///
/// The resulting struct can be passed to Reth's `init_db_for::<_, YourTableSet>()`
/// to initialize only the specified tables.
macro_rules! impl_table_set {
    (
        $(#[$outer:meta])*
        $set_name:ident, $($table:ty),+ $(,)?
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, Copy)]
        pub(crate) struct $set_name;

        impl reth_db_api::TableSet for $set_name {
            fn tables() -> Box<dyn Iterator<Item = Box<dyn reth_db_api::table::TableInfo>>> {
                Box::new(vec![
                    $(
                        Box::new(<$table>::default()) as Box<dyn reth_db_api::table::TableInfo>
                    ),*
                ].into_iter())
            }
        }
    };
}

// Implement compression logic for all value types stored in tables
impl_compression_for_serde!(StoredBlock, StoredTransaction, AddressRecord, Checkpoint);

// Enable reflection for each table (name + dupsort metadata)
impl_table_info!(Blocks, Transactions, BlockTransactions, Addresses, Checkpoints);

// Define and register the full table set used by the indexer
impl_table_set!(
    /// Every table owned by the indexer.
    Tables,
    Blocks,
    Transactions,
    BlockTransactions,
    Addresses,
    Checkpoints
);

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, Bytes, U256};
    use reth_db_api::table::{Compress, Decompress};

    fn encoded<T: Compress<Compressed = Vec<u8>>>(value: T) -> Vec<u8> {
        let encoded = value.compress();
        assert!(!encoded.is_empty());
        encoded
    }

    #[test]
    fn test_every_value_type_encodes_at_its_extremes() {
        let block = StoredBlock {
            number: u64::MAX,
            hash: B256::repeat_byte(0xff),
            parent_hash: B256::ZERO,
            timestamp: u64::MAX,
            miner: Address::repeat_byte(0xff),
            extra_data: Bytes::from(vec![0xff; 97]),
            transactions_count: u64::MAX,
        };
        assert_eq!(StoredBlock::decompress(&encoded(block.clone())).unwrap(), block);

        let transaction = StoredTransaction {
            hash: B256::repeat_byte(0x11),
            block_number: u64::MAX,
            from: Address::ZERO,
            to: None,
            value: U256::MAX.to_string(),
            timestamp: 0,
        };
        assert_eq!(
            StoredTransaction::decompress(&encoded(transaction.clone())).unwrap(),
            transaction
        );

        let record = AddressRecord {
            address: Address::repeat_byte(0x22),
            balance: U256::MAX.to_string(),
            balance_decimal: f64::MAX,
            nonce: u64::MAX,
            last_updated: u64::MAX,
        };
        assert_eq!(AddressRecord::decompress(&encoded(record.clone())).unwrap(), record);

        let checkpoint = Checkpoint { value: u64::MAX };
        assert_eq!(Checkpoint::decompress(&encoded(checkpoint)).unwrap(), checkpoint);
    }

    #[test]
    fn test_empty_value_fails_to_decode() {
        assert!(matches!(
            AddressRecord::decompress(&[]),
            Err(reth_db_api::DatabaseError::Decode)
        ));
    }
}
