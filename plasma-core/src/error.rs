//! Error types for the child chain core

use crate::types::UtxoKey;
use thiserror::Error;

/// Result type for child chain operations
pub type Result<T> = std::result::Result<T, Error>;

/// Child chain errors
///
/// Every variant is recoverable at the call boundary: a failed call leaves
/// the ledger exactly as it was.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed transaction (empty inputs/outputs, bad slice, duplicate input)
    #[error("Structural error: {0}")]
    Structural(String),

    /// Signature over the declared inputs does not verify
    #[error("Signature verification failed: {0}")]
    Signature(String),

    /// Output ranges violate the range conservation rule
    #[error("Conservation error: {0}")]
    Conservation(String),

    /// Input references a key absent from the UTXO index
    #[error("No such UTXO: {0}")]
    UnknownUtxo(UtxoKey),

    /// Input key exists but owner or slice differ from the indexed entry
    #[error("Incorrect input data for UTXO: {0}")]
    StaleInput(UtxoKey),

    /// Input claims provenance from a block that is not finalized yet
    #[error("UTXO {key} belongs to block {block_index}, last finalized block is {last_block}")]
    FutureReference {
        /// Offending input key
        key: UtxoKey,
        /// Block index recorded in the input
        block_index: u32,
        /// Last finalized block number
        last_block: u32,
    },

    /// Block assembly refused because there is nothing to include
    #[error("Empty blocks are disabled")]
    EmptyBlock,

    /// Block number or previous hash does not continue the chain
    #[error("Chain linkage error: {0}")]
    ChainLinkage(String),

    /// Accumulator fold or proof failure
    #[error("Accumulator error: {0}")]
    Accumulator(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Block not found
    #[error("Block not found: {0}")]
    BlockNotFound(u32),

    /// Concurrency error (task mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error rejects a client-supplied transaction.
    ///
    /// Everything else is internal: the request layer logs it and must not
    /// expose the details to the client.
    pub fn is_client_rejection(&self) -> bool {
        matches!(
            self,
            Error::Structural(_)
                | Error::Signature(_)
                | Error::Conservation(_)
                | Error::UnknownUtxo(_)
                | Error::StaleInput(_)
                | Error::FutureReference { .. }
        )
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
