//! Core types for the child chain ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode, canonical byte encodings)
//! - Exact equality (owner bytes and slice bounds, never overlap)
//! - Total ordering of UTXO keys

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size of the fixed coin supply space. Slices live in `[0, COIN_SUPPLY)`.
pub const COIN_SUPPLY: u32 = 1 << 24;

/// First transaction index reserved for root-chain deposits.
///
/// Block outputs use `tx_index < DEPOSIT_TX_INDEX_BASE`, deposits use the
/// range above it, so the two never share a key.
pub const DEPOSIT_TX_INDEX_BASE: u32 = 1 << 31;

/// Keccak-256 digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// All-zero digest
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self)
    }
}

/// Owner address: the owner's Ed25519 verifying key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; 32]);

impl Address {
    /// Create from raw public key bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw)
            .map_err(|e| crate::Error::Structural(format!("invalid address hex: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| crate::Error::Structural("address must be 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }
}

/// Coin range `[begin, end)` over the fixed coin supply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoinSlice {
    /// First coin (inclusive)
    pub begin: u32,
    /// Last coin (exclusive)
    pub end: u32,
}

impl CoinSlice {
    /// Create a slice. Bounds are checked by [`CoinSlice::is_well_formed`].
    pub fn new(begin: u32, end: u32) -> Self {
        Self { begin, end }
    }

    /// `begin < end <= COIN_SUPPLY`
    pub fn is_well_formed(&self) -> bool {
        self.begin < self.end && self.end <= COIN_SUPPLY
    }

    /// Number of coins covered
    pub fn len(&self) -> u64 {
        u64::from(self.end.saturating_sub(self.begin))
    }

    /// Check if slice covers no coins
    pub fn is_empty(&self) -> bool {
        self.end <= self.begin
    }

    /// Whether the two slices share at least one coin
    pub fn overlaps(&self, other: &CoinSlice) -> bool {
        self.begin < other.end && other.begin < self.end
    }

    /// Whether `other` lies entirely inside this slice
    pub fn contains(&self, other: &CoinSlice) -> bool {
        self.begin <= other.begin && other.end <= self.end
    }
}

impl fmt::Display for CoinSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// Identity of a ledger entry: `(block_index, tx_index, output_index)`
///
/// Ordering is lexicographic over the tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtxoKey {
    /// Block the entry was (or will be) created in
    pub block_index: u32,
    /// Position of the creating transaction in that block
    pub tx_index: u32,
    /// Position of the output within the transaction
    pub output_index: u8,
}

impl UtxoKey {
    /// Create new key
    pub fn new(block_index: u32, tx_index: u32, output_index: u8) -> Self {
        Self {
            block_index,
            tx_index,
            output_index,
        }
    }

    /// Whether this key was assigned by a root-chain deposit
    pub fn is_deposit(&self) -> bool {
        self.tx_index >= DEPOSIT_TX_INDEX_BASE
    }

    /// Fixed-width big-endian encoding (9 bytes), order-preserving
    pub fn to_bytes(&self) -> [u8; 9] {
        let mut out = [0u8; 9];
        out[..4].copy_from_slice(&self.block_index.to_be_bytes());
        out[4..8].copy_from_slice(&self.tx_index.to_be_bytes());
        out[8] = self.output_index;
        out
    }
}

impl fmt::Display for UtxoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.block_index, self.tx_index, self.output_index)
    }
}

impl FromStr for UtxoKey {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let invalid = || crate::Error::Structural(format!("invalid UTXO key: {}", s));

        let mut parts = s.split(':');
        let block_index = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
        let tx_index = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
        let output_index = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self::new(block_index, tx_index, output_index))
    }
}

/// Value produced by a transaction before it has a ledger position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Output {
    /// Owner of the coins
    pub owner: Address,
    /// Coins owned
    pub slice: CoinSlice,
}

impl Output {
    /// Create new output
    pub fn new(owner: Address, slice: CoinSlice) -> Self {
        Self { owner, slice }
    }
}

/// Unspent, keyed claim on a coin range (UTXO)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Owner and slice
    pub output: Output,
    /// Block index
    pub block_index: u32,
    /// Transaction index within the block
    pub tx_index: u32,
    /// Output index within the transaction
    pub output_index: u8,
}

impl LedgerEntry {
    /// Place an output at a ledger position
    pub fn new(output: Output, key: UtxoKey) -> Self {
        Self {
            output,
            block_index: key.block_index,
            tx_index: key.tx_index,
            output_index: key.output_index,
        }
    }

    /// Identity key
    pub fn key(&self) -> UtxoKey {
        UtxoKey::new(self.block_index, self.tx_index, self.output_index)
    }

    /// Owner address
    pub fn owner(&self) -> &Address {
        &self.output.owner
    }

    /// Coin slice
    pub fn slice(&self) -> &CoinSlice {
        &self.output.slice
    }

    /// Whether both entries claim the same coins for the same owner.
    ///
    /// Exact match on owner bytes and slice bounds; overlap does not count.
    pub fn same_claim(&self, other: &LedgerEntry) -> bool {
        self.output == other.output
    }

    /// Canonical bytes: key (9) || owner (32) || begin (4) || end (4)
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(49);
        out.extend_from_slice(&self.key().to_bytes());
        out.extend_from_slice(self.output.owner.as_bytes());
        out.extend_from_slice(&self.output.slice.begin.to_be_bytes());
        out.extend_from_slice(&self.output.slice.end.to_be_bytes());
        out
    }
}

/// Digital signature (Ed25519)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Signature bytes (64 bytes)
    #[serde(with = "serde_bytes")]
    bytes: [u8; 64],
}

impl Signature {
    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self { bytes }
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.bytes
    }

    /// Verify signature against an owner address
    pub fn verify(&self, message: &[u8], owner: &Address) -> bool {
        crate::crypto::verify_signature(message, self, owner)
    }
}
