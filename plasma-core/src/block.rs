//! Immutable, hash-linked blocks
//!
//! A block is built once from the chain head, the pending transactions and
//! the root-chain updates applied since the previous block. Its hash and
//! accumulator are computed at construction and never change.
//!
//! # Hash encoding (v2)
//!
//! ```text
//! keccak256(
//!     0x02
//!  || number            u32 BE
//!  || previous_hash     32 bytes
//!  || accumulator       256 bytes BE, zero padded
//!  || transactions_root 32 bytes
//!  || tx_count          u32 BE
//!  || updates_root      32 bytes
//!  || update_count      u32 BE
//! )
//! ```

use crate::accumulator::{block_elements, Accumulator, AccumulatorElement};
use crate::crypto::{genesis_hash, keccak256};
use crate::merkle::{generate_proof, merkle_root, MerkleProof};
use crate::monitor::EventId;
use crate::transaction::Transaction;
use crate::types::{Hash256, LedgerEntry, UtxoKey};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Version byte of the block hash encoding
pub const BLOCK_ENCODING_VERSION: u8 = 2;

const DEPOSIT_UPDATE_TAG: u8 = 0;
const WITHDRAWAL_UPDATE_TAG: u8 = 1;

/// Root-chain event applied to the ledger, recorded in the next block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootChainUpdate {
    /// Deposit credited a new entry
    Deposit {
        /// Root-chain identity of the deposit
        event_id: EventId,
        /// Entry credited, at its deposit key
        entry: LedgerEntry,
    },

    /// Withdrawal removed an entry
    Withdrawal {
        /// Root-chain identity of the withdrawal
        event_id: EventId,
        /// Entry removed from the index
        entry: LedgerEntry,
    },
}

impl RootChainUpdate {
    /// Root-chain identity of the event
    pub fn event_id(&self) -> EventId {
        match self {
            RootChainUpdate::Deposit { event_id, .. }
            | RootChainUpdate::Withdrawal { event_id, .. } => *event_id,
        }
    }

    /// Entry credited or removed
    pub fn entry(&self) -> LedgerEntry {
        match self {
            RootChainUpdate::Deposit { entry, .. } | RootChainUpdate::Withdrawal { entry, .. } => {
                *entry
            }
        }
    }

    /// Accumulator element: deposits create, withdrawals spend
    pub fn element(&self) -> AccumulatorElement {
        match self {
            RootChainUpdate::Deposit { entry, .. } => AccumulatorElement::Created(*entry),
            RootChainUpdate::Withdrawal { entry, .. } => AccumulatorElement::Spent(*entry),
        }
    }

    /// Leaf hash under `updates_root`
    pub fn hash(&self) -> Hash256 {
        let tag = match self {
            RootChainUpdate::Deposit { .. } => DEPOSIT_UPDATE_TAG,
            RootChainUpdate::Withdrawal { .. } => WITHDRAWAL_UPDATE_TAG,
        };
        let event_id = self.event_id();

        let mut bytes = Vec::with_capacity(1 + 32 + 4 + 49);
        bytes.push(tag);
        bytes.extend_from_slice(event_id.tx_hash.as_bytes());
        bytes.extend_from_slice(&event_id.log_index.to_be_bytes());
        bytes.extend_from_slice(&self.entry().canonical_bytes());
        keccak256(&bytes)
    }
}

/// Block construction policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPolicy {
    /// Whether a block with neither transactions nor root-chain updates may
    /// be assembled
    pub allow_empty: bool,
}

impl Default for BlockPolicy {
    fn default() -> Self {
        Self { allow_empty: true }
    }
}

/// Finalized child chain block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block number (sequential, first block is 1)
    pub number: u32,

    /// Hash of previous block (genesis hash for block 1)
    pub previous_hash: Hash256,

    /// Accumulator after folding this block's transactions and updates
    pub accumulator: Accumulator,

    /// Merkle root of transaction hashes
    pub transactions_root: Hash256,

    /// Transactions in queue order
    pub transactions: Vec<Transaction>,

    /// Merkle root of root-chain update hashes
    pub updates_root: Hash256,

    /// Root-chain updates in the order they were applied
    pub updates: Vec<RootChainUpdate>,

    hash: Hash256,
}

impl Block {
    /// Build block `number` on top of `previous_hash` / `previous_accumulator`
    pub fn new(
        number: u32,
        previous_hash: Hash256,
        previous_accumulator: &Accumulator,
        transactions: Vec<Transaction>,
        policy: &BlockPolicy,
    ) -> Result<Self> {
        Self::with_updates(
            number,
            previous_hash,
            previous_accumulator,
            transactions,
            Vec::new(),
            policy,
        )
    }

    /// Build a block that also records root-chain updates
    pub fn with_updates(
        number: u32,
        previous_hash: Hash256,
        previous_accumulator: &Accumulator,
        transactions: Vec<Transaction>,
        updates: Vec<RootChainUpdate>,
        policy: &BlockPolicy,
    ) -> Result<Self> {
        if number == 0 {
            return Err(Error::ChainLinkage(
                "block number 0 is reserved for genesis".to_string(),
            ));
        }
        if transactions.is_empty() && updates.is_empty() && !policy.allow_empty {
            return Err(Error::EmptyBlock);
        }

        let primes: Vec<_> = Self::elements_of(number, &transactions, &updates)
            .iter()
            .map(AccumulatorElement::to_prime)
            .collect();
        let accumulator = previous_accumulator.fold(&primes)?;

        let transactions_root = Self::transactions_root_of(&transactions);
        let updates_root = Self::updates_root_of(&updates);

        let hash = Self::compute_hash(
            number,
            &previous_hash,
            &accumulator,
            &transactions_root,
            transactions.len(),
            &updates_root,
            updates.len(),
        )?;

        Ok(Self {
            number,
            previous_hash,
            accumulator,
            transactions_root,
            transactions,
            updates_root,
            updates,
            hash,
        })
    }

    /// Hash over the v2 header encoding
    pub fn compute_hash(
        number: u32,
        previous_hash: &Hash256,
        accumulator: &Accumulator,
        transactions_root: &Hash256,
        tx_count: usize,
        updates_root: &Hash256,
        update_count: usize,
    ) -> Result<Hash256> {
        let tx_count = u32::try_from(tx_count)
            .map_err(|_| Error::ChainLinkage(format!("{} transactions in one block", tx_count)))?;
        let update_count = u32::try_from(update_count)
            .map_err(|_| Error::ChainLinkage(format!("{} updates in one block", update_count)))?;

        let mut bytes = Vec::with_capacity(1 + 4 + 32 + 256 + 32 + 4 + 32 + 4);
        bytes.push(BLOCK_ENCODING_VERSION);
        bytes.extend_from_slice(&number.to_be_bytes());
        bytes.extend_from_slice(previous_hash.as_bytes());
        bytes.extend_from_slice(&accumulator.to_bytes()?);
        bytes.extend_from_slice(transactions_root.as_bytes());
        bytes.extend_from_slice(&tx_count.to_be_bytes());
        bytes.extend_from_slice(updates_root.as_bytes());
        bytes.extend_from_slice(&update_count.to_be_bytes());

        Ok(keccak256(&bytes))
    }

    fn transactions_root_of(transactions: &[Transaction]) -> Hash256 {
        let tx_hashes: Vec<Hash256> = transactions.iter().map(Transaction::hash).collect();
        merkle_root(&tx_hashes)
    }

    fn updates_root_of(updates: &[RootChainUpdate]) -> Hash256 {
        let leaves: Vec<Hash256> = updates.iter().map(RootChainUpdate::hash).collect();
        merkle_root(&leaves)
    }

    /// Block hash
    pub fn hash(&self) -> Hash256 {
        self.hash
    }

    /// Recompute the hash from contents, as an independent verifier would.
    ///
    /// Also rebuilds both Merkle roots, so tampering with any transaction
    /// or update is detected.
    pub fn recompute_hash(&self) -> Result<Hash256> {
        Self::compute_hash(
            self.number,
            &self.previous_hash,
            &self.accumulator,
            &Self::transactions_root_of(&self.transactions),
            self.transactions.len(),
            &Self::updates_root_of(&self.updates),
            self.updates.len(),
        )
    }

    /// Check this block directly continues `previous` (or genesis when `None`)
    pub fn verify_linkage(&self, previous: Option<&Block>) -> Result<()> {
        let (expected_number, expected_hash) = match previous {
            Some(prev) => (prev.number.checked_add(1), prev.hash),
            None => (Some(1), genesis_hash()),
        };
        let expected_number = expected_number.ok_or_else(|| {
            Error::ChainLinkage("previous block is the last numberable block".to_string())
        })?;

        if self.number != expected_number {
            return Err(Error::ChainLinkage(format!(
                "expected block {}, found {}",
                expected_number, self.number
            )));
        }
        if self.previous_hash != expected_hash {
            return Err(Error::ChainLinkage(format!(
                "block {} previous hash {} does not match {}",
                self.number, self.previous_hash, expected_hash
            )));
        }

        Ok(())
    }

    fn elements_of(
        number: u32,
        transactions: &[Transaction],
        updates: &[RootChainUpdate],
    ) -> Vec<AccumulatorElement> {
        let mut elements = block_elements(
            number,
            transactions
                .iter()
                .map(|tx| (tx.inputs.as_slice(), tx.outputs.as_slice())),
        );
        elements.extend(updates.iter().map(RootChainUpdate::element));
        elements
    }

    /// Elements folded into this block's accumulator
    pub fn accumulator_elements(&self) -> Vec<AccumulatorElement> {
        Self::elements_of(self.number, &self.transactions, &self.updates)
    }

    /// Entries created by this block's transactions, at their ledger keys
    pub fn created_entries(&self) -> Vec<LedgerEntry> {
        self.transactions
            .iter()
            .enumerate()
            .flat_map(|(tx_index, tx)| {
                tx.outputs.iter().enumerate().map(move |(i, output)| {
                    LedgerEntry::new(*output, UtxoKey::new(self.number, tx_index as u32, i as u8))
                })
            })
            .collect()
    }

    /// Inclusion proof for the transaction at `index` against `transactions_root`
    pub fn prove_transaction(&self, index: usize) -> Option<MerkleProof> {
        let tx_hashes: Vec<Hash256> = self.transactions.iter().map(Transaction::hash).collect();
        generate_proof(&tx_hashes, index)
    }

    /// Inclusion proof for the update at `index` against `updates_root`
    pub fn prove_update(&self, index: usize) -> Option<MerkleProof> {
        let leaves: Vec<Hash256> = self.updates.iter().map(RootChainUpdate::hash).collect();
        generate_proof(&leaves, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::types::{CoinSlice, Output, DEPOSIT_TX_INDEX_BASE};

    fn deposit_update(owner: &KeyPair, begin: u32, end: u32, nonce: u32) -> RootChainUpdate {
        RootChainUpdate::Deposit {
            event_id: EventId::new(keccak256(b"deposit"), nonce),
            entry: LedgerEntry::new(
                Output::new(owner.address(), CoinSlice::new(begin, end)),
                UtxoKey::new(0, DEPOSIT_TX_INDEX_BASE + nonce, 0),
            ),
        }
    }

    fn transfer(from: &KeyPair, to: &KeyPair, begin: u32, end: u32, nonce: u32) -> Transaction {
        let input = LedgerEntry::new(
            Output::new(from.address(), CoinSlice::new(begin, end)),
            UtxoKey::new(0, DEPOSIT_TX_INDEX_BASE + nonce, 0),
        );
        Transaction::new(
            vec![input],
            vec![Output::new(to.address(), CoinSlice::new(begin, end))],
        )
        .sign(&[from])
        .unwrap()
    }

    #[test]
    fn test_block_hash_is_reproducible() {
        let alice = KeyPair::from_seed(&[1u8; 32]);
        let bob = KeyPair::from_seed(&[2u8; 32]);
        let txs = vec![transfer(&alice, &bob, 0, 10, 0), transfer(&alice, &bob, 10, 20, 1)];

        let policy = BlockPolicy::default();
        let a = Block::new(1, genesis_hash(), &Accumulator::genesis(), txs.clone(), &policy).unwrap();
        let b = Block::new(1, genesis_hash(), &Accumulator::genesis(), txs, &policy).unwrap();

        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.accumulator, b.accumulator);
        assert_eq!(a.recompute_hash().unwrap(), a.hash());
        assert_ne!(a.accumulator, Accumulator::genesis());
    }

    #[test]
    fn test_transaction_order_changes_hash() {
        let alice = KeyPair::from_seed(&[1u8; 32]);
        let bob = KeyPair::from_seed(&[2u8; 32]);
        let t1 = transfer(&alice, &bob, 0, 10, 0);
        let t2 = transfer(&alice, &bob, 10, 20, 1);

        let policy = BlockPolicy::default();
        let a = Block::new(1, genesis_hash(), &Accumulator::genesis(), vec![t1.clone(), t2.clone()], &policy)
            .unwrap();
        let b = Block::new(1, genesis_hash(), &Accumulator::genesis(), vec![t2, t1], &policy).unwrap();

        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_tampering_detected() {
        let alice = KeyPair::from_seed(&[1u8; 32]);
        let bob = KeyPair::from_seed(&[2u8; 32]);
        let mut block = Block::new(
            1,
            genesis_hash(),
            &Accumulator::genesis(),
            vec![transfer(&alice, &bob, 0, 10, 0)],
            &BlockPolicy::default(),
        )
        .unwrap();

        block.transactions[0].outputs[0].owner = alice.address();
        assert_ne!(block.recompute_hash().unwrap(), block.hash());
    }

    #[test]
    fn test_empty_block_policy() {
        let allowed = Block::new(
            1,
            genesis_hash(),
            &Accumulator::genesis(),
            vec![],
            &BlockPolicy { allow_empty: true },
        )
        .unwrap();
        assert!(allowed.transactions.is_empty());
        assert_eq!(allowed.accumulator, Accumulator::genesis());
        assert_eq!(allowed.transactions_root, Hash256::ZERO);

        let refused = Block::new(
            1,
            genesis_hash(),
            &Accumulator::genesis(),
            vec![],
            &BlockPolicy { allow_empty: false },
        );
        assert!(matches!(refused, Err(Error::EmptyBlock)));
    }

    #[test]
    fn test_construction_failures() {
        let policy = BlockPolicy::default();
        assert!(matches!(
            Block::new(0, genesis_hash(), &Accumulator::genesis(), vec![], &policy),
            Err(Error::ChainLinkage(_))
        ));

        let broken = Accumulator::from_value(num_bigint::BigUint::from(1u32));
        assert!(matches!(
            Block::new(1, genesis_hash(), &broken, vec![], &policy),
            Err(Error::Accumulator(_))
        ));
    }

    #[test]
    fn test_linkage() {
        let policy = BlockPolicy::default();
        let b1 = Block::new(1, genesis_hash(), &Accumulator::genesis(), vec![], &policy).unwrap();
        let b2 = Block::new(2, b1.hash(), &b1.accumulator, vec![], &policy).unwrap();

        assert!(b1.verify_linkage(None).is_ok());
        assert!(b2.verify_linkage(Some(&b1)).is_ok());
        assert!(b2.verify_linkage(None).is_err());
        assert!(b1.verify_linkage(Some(&b2)).is_err());

        // Same number, wrong parent
        let forged = Block::new(2, genesis_hash(), &b1.accumulator, vec![], &policy).unwrap();
        assert!(matches!(
            forged.verify_linkage(Some(&b1)),
            Err(Error::ChainLinkage(_))
        ));
    }

    #[test]
    fn test_created_entries_and_inclusion_proofs() {
        let alice = KeyPair::from_seed(&[1u8; 32]);
        let bob = KeyPair::from_seed(&[2u8; 32]);
        let block = Block::new(
            4,
            genesis_hash(),
            &Accumulator::genesis(),
            vec![transfer(&alice, &bob, 0, 10, 0), transfer(&alice, &bob, 10, 20, 1)],
            &BlockPolicy::default(),
        )
        .unwrap();

        let created = block.created_entries();
        assert_eq!(created.len(), 2);
        assert_eq!(created[1].key(), UtxoKey::new(4, 1, 0));
        assert_eq!(created[1].output.owner, bob.address());

        let proof = block.prove_transaction(1).unwrap();
        assert_eq!(proof.root_hash, block.transactions_root);
        assert_eq!(proof.leaf_hash, block.transactions[1].hash());
        assert!(proof.verify());
        assert!(block.prove_transaction(2).is_none());
    }

    #[test]
    fn test_updates_are_folded_and_committed() {
        let alice = KeyPair::from_seed(&[1u8; 32]);
        let deposit = deposit_update(&alice, 0, 10, 0);
        let withdrawal = RootChainUpdate::Withdrawal {
            event_id: EventId::new(keccak256(b"exit"), 0),
            entry: deposit.entry(),
        };

        // Updates alone make a block even when empty blocks are refused
        let block = Block::with_updates(
            1,
            genesis_hash(),
            &Accumulator::genesis(),
            vec![],
            vec![deposit, withdrawal],
            &BlockPolicy { allow_empty: false },
        )
        .unwrap();
        assert_eq!(block.recompute_hash().unwrap(), block.hash());
        assert_ne!(block.updates_root, Hash256::ZERO);

        let elements = block.accumulator_elements();
        assert_eq!(
            elements,
            vec![
                AccumulatorElement::Created(deposit.entry()),
                AccumulatorElement::Spent(deposit.entry()),
            ]
        );
        let primes: Vec<_> = elements.iter().map(AccumulatorElement::to_prime).collect();
        assert_eq!(Accumulator::genesis().fold(&primes).unwrap(), block.accumulator);

        // Same updates without the withdrawal give a different block
        let fewer = Block::with_updates(
            1,
            genesis_hash(),
            &Accumulator::genesis(),
            vec![],
            vec![deposit],
            &BlockPolicy::default(),
        )
        .unwrap();
        assert_ne!(fewer.hash(), block.hash());
        assert_ne!(fewer.accumulator, block.accumulator);
    }

    #[test]
    fn test_update_tampering_detected() {
        let alice = KeyPair::from_seed(&[1u8; 32]);
        let bob = KeyPair::from_seed(&[2u8; 32]);
        let mut block = Block::with_updates(
            1,
            genesis_hash(),
            &Accumulator::genesis(),
            vec![],
            vec![deposit_update(&alice, 0, 10, 0)],
            &BlockPolicy::default(),
        )
        .unwrap();

        block.updates[0] = deposit_update(&bob, 0, 10, 0);
        assert_ne!(block.recompute_hash().unwrap(), block.hash());
    }

    #[test]
    fn test_update_inclusion_proofs() {
        let alice = KeyPair::from_seed(&[1u8; 32]);
        let updates: Vec<_> = (0..3).map(|n| deposit_update(&alice, n * 10, n * 10 + 10, n)).collect();
        let block = Block::with_updates(
            1,
            genesis_hash(),
            &Accumulator::genesis(),
            vec![],
            updates.clone(),
            &BlockPolicy::default(),
        )
        .unwrap();

        let proof = block.prove_update(2).unwrap();
        assert_eq!(proof.root_hash, block.updates_root);
        assert_eq!(proof.leaf_hash, updates[2].hash());
        assert!(proof.verify());
        assert!(block.prove_update(3).is_none());
    }

    #[test]
    fn test_linkage_past_last_block_number() {
        let policy = BlockPolicy::default();
        let last = Block::new(u32::MAX, genesis_hash(), &Accumulator::genesis(), vec![], &policy).unwrap();
        let b1 = Block::new(1, genesis_hash(), &Accumulator::genesis(), vec![], &policy).unwrap();
        assert!(matches!(
            b1.verify_linkage(Some(&last)),
            Err(Error::ChainLinkage(_))
        ));
    }
}
