//! RSA accumulator over ledger history
//!
//! Each block folds its ledger mutations into the previous accumulator:
//!
//! ```text
//! A_n = A_{n-1} ^ (x_1 · x_2 · … · x_k)  mod N
//! ```
//!
//! where every `x_i` is a 256-bit prime derived from one element: a
//! `Created(entry)` per transaction output or deposit, and a `Spent(entry)`
//! per transaction input or withdrawal. `N` is the RSA-2048 challenge
//! modulus, whose factorization is unknown, and the genesis value is 3.
//!
//! The fold is order-insensitive within a block (exponent products commute)
//! and depends only on the previous value and the block's contents.
//!
//! Proofs are constant size and relative to a base block `k`:
//! - membership: `w` with `w^x == A_n`
//! - non-membership since `k`: `(a, d)` with `A_n^a · d^x == A_k`, where
//!   `a·S + b·x == 1` over the product `S` folded in blocks `k+1..=n`
//!
//! The prover only touches the blocks between the base and the proven block,
//! so proof cost follows the age of the entry, not the age of the chain.

use crate::crypto::keccak256;
use crate::types::{LedgerEntry, Output, UtxoKey};
use crate::{Error, Result};
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Signed, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// RSA-2048 challenge number
const RSA_2048_MODULUS: &str = "25195908475657893494027183240048398571429282126204032027777137836043662020707595556264018525880784406918290641249515082189298559149176184502808489120072844992687392807287776735971418347270261896375014971824691165077613379859095700097330459748808428401797429100642458691817195118746121515172654632282216869987549182422433637259085141865462043576798423387184774447920739934236584823824281198163815010674810451660377306056201619676256133844143603833904414952634432190114657544454178424020924616515723350778707749817125772467962926386356373289912154831438167899885040445364023527381951378636564391212010397122822120720357";

/// Width of an encoded accumulator value
pub const ACCUMULATOR_BYTES: usize = 256;

/// Genesis accumulator value
pub const GENESIS_ACCUMULATOR: u32 = 3;

const CREATED_TAG: &[u8] = b"plasma/accumulator/created/v1";
const SPENT_TAG: &[u8] = b"plasma/accumulator/spent/v1";

const SMALL_PRIMES: [u32; 25] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
];

/// Fixed Miller-Rabin bases, so primality (and hash-to-prime) is reproducible
const WITNESS_BASES: [u32; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

/// The accumulator group modulus
pub fn modulus() -> &'static BigUint {
    static MODULUS: OnceLock<BigUint> = OnceLock::new();
    MODULUS.get_or_init(|| {
        BigUint::parse_bytes(RSA_2048_MODULUS.as_bytes(), 10)
            .unwrap_or_else(|| unreachable!("modulus literal is valid decimal"))
    })
}

/// Accumulator value, an element of `Z_N`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accumulator(BigUint);

impl Accumulator {
    /// Accumulator before any block
    pub fn genesis() -> Self {
        Self(BigUint::from(GENESIS_ACCUMULATOR))
    }

    /// Wrap a raw value (not checked until it is folded)
    pub fn from_value(value: BigUint) -> Self {
        Self(value)
    }

    /// Decode a big-endian value
    pub fn from_bytes_be(bytes: &[u8]) -> Self {
        Self(BigUint::from_bytes_be(bytes))
    }

    /// Raw value
    pub fn value(&self) -> &BigUint {
        &self.0
    }

    /// Whether the value is a usable group element: `1 < A < N`
    pub fn is_valid(&self) -> bool {
        self.0 > BigUint::one() && &self.0 < modulus()
    }

    /// Fixed-width big-endian encoding used in block hashes
    pub fn to_bytes(&self) -> Result<[u8; ACCUMULATOR_BYTES]> {
        let raw = self.0.to_bytes_be();
        if raw.len() > ACCUMULATOR_BYTES {
            return Err(Error::Accumulator(format!(
                "value is {} bytes, wider than {}",
                raw.len(),
                ACCUMULATOR_BYTES
            )));
        }

        let mut out = [0u8; ACCUMULATOR_BYTES];
        out[ACCUMULATOR_BYTES - raw.len()..].copy_from_slice(&raw);
        Ok(out)
    }

    /// Fold a set of element primes into this accumulator
    pub fn fold(&self, primes: &[BigUint]) -> Result<Accumulator> {
        if !self.is_valid() {
            return Err(Error::Accumulator(
                "previous accumulator is not a valid group element".to_string(),
            ));
        }

        let exponent = primes.iter().fold(BigUint::one(), |acc, p| acc * p);
        Ok(Accumulator(self.0.modpow(&exponent, modulus())))
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::genesis()
    }
}

impl fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.0.to_str_radix(16);
        if hex.len() > 16 {
            write!(f, "Accumulator(0x{}…)", &hex[..16])
        } else {
            write!(f, "Accumulator(0x{})", hex)
        }
    }
}

/// A ledger mutation folded into the accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorElement {
    /// Entry created by a transaction output
    Created(LedgerEntry),
    /// Entry consumed by a transaction input
    Spent(LedgerEntry),
}

impl AccumulatorElement {
    /// Map to the element's prime representative
    pub fn to_prime(&self) -> BigUint {
        match self {
            AccumulatorElement::Created(entry) => hash_to_prime(CREATED_TAG, &entry.canonical_bytes()),
            AccumulatorElement::Spent(entry) => hash_to_prime(SPENT_TAG, &entry.canonical_bytes()),
        }
    }
}

/// Elements a block folds: for each transaction in order, its inputs as
/// `Spent` then its outputs as `Created` at their in-block keys.
pub fn block_elements<'a, I>(block_number: u32, transactions: I) -> Vec<AccumulatorElement>
where
    I: IntoIterator<Item = (&'a [LedgerEntry], &'a [Output])>,
{
    let mut elements = Vec::new();
    for (tx_index, (inputs, outputs)) in transactions.into_iter().enumerate() {
        elements.extend(inputs.iter().copied().map(AccumulatorElement::Spent));
        elements.extend(outputs.iter().enumerate().map(|(i, output)| {
            let key = UtxoKey::new(block_number, tx_index as u32, i as u8);
            AccumulatorElement::Created(LedgerEntry::new(*output, key))
        }));
    }
    elements
}

/// Deterministically map bytes to a 256-bit prime.
///
/// The Keccak-256 digest of `tag || data` with its top and bottom bits set is
/// the starting point; the result is the next probable prime.
pub fn hash_to_prime(tag: &[u8], data: &[u8]) -> BigUint {
    let mut preimage = Vec::with_capacity(tag.len() + data.len());
    preimage.extend_from_slice(tag);
    preimage.extend_from_slice(data);

    let mut bytes = keccak256(&preimage).0;
    bytes[0] |= 0x80;
    bytes[31] |= 0x01;

    let mut candidate = BigUint::from_bytes_be(&bytes);
    while !is_probable_prime(&candidate) {
        candidate += 2u32;
    }
    candidate
}

/// Miller-Rabin with fixed bases after trial division
pub fn is_probable_prime(n: &BigUint) -> bool {
    let one = BigUint::one();
    if n <= &one {
        return false;
    }

    for &p in SMALL_PRIMES.iter() {
        if *n == BigUint::from(p) {
            return true;
        }
        if (n % p).is_zero() {
            return false;
        }
    }

    let n_minus_one = n - &one;
    let mut d = n_minus_one.clone();
    let mut s = 0u32;
    while (&d % 2u32).is_zero() {
        d >>= 1u32;
        s += 1;
    }

    'witness: for &base in WITNESS_BASES.iter() {
        let mut x = BigUint::from(base).modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = (&x * &x) % n;
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }

    true
}

/// Extended Euclid: returns `(g, s, t)` with `s·a + t·b == g`
fn extended_gcd(a: &BigInt, b: &BigInt) -> (BigInt, BigInt, BigInt) {
    let (mut old_r, mut r) = (a.clone(), b.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
    let (mut old_t, mut t) = (BigInt::zero(), BigInt::one());

    while !r.is_zero() {
        let q = &old_r / &r;

        let next_r = &old_r - &q * &r;
        old_r = std::mem::replace(&mut r, next_r);

        let next_s = &old_s - &q * &s;
        old_s = std::mem::replace(&mut s, next_s);

        let next_t = &old_t - &q * &t;
        old_t = std::mem::replace(&mut t, next_t);
    }

    (old_r, old_s, old_t)
}

/// Inverse of `a` modulo `n`, if it exists
fn mod_inverse(a: &BigUint, n: &BigUint) -> Option<BigUint> {
    let a = BigInt::from_biguint(Sign::Plus, a.clone());
    let n = BigInt::from_biguint(Sign::Plus, n.clone());

    let (g, s, _) = extended_gcd(&a, &n);
    if !g.is_one() {
        return None;
    }

    (((s % &n) + &n) % &n).to_biguint()
}

/// `base^exp mod N` for a signed exponent
fn pow_signed(base: &BigUint, exp: &BigInt) -> Option<BigUint> {
    let n = modulus();
    if exp.is_negative() {
        Some(mod_inverse(base, n)?.modpow(exp.magnitude(), n))
    } else {
        Some(base.modpow(exp.magnitude(), n))
    }
}

/// Proof that an element is folded into an accumulator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipWitness {
    /// `A` with the element's prime removed from the exponent
    pub witness: BigUint,
}

impl MembershipWitness {
    /// Check `w^x == A`
    pub fn verify(&self, accumulator: &Accumulator, element: &AccumulatorElement) -> bool {
        self.witness.modpow(&element.to_prime(), modulus()) == accumulator.0
    }
}

/// Proof that an element was not folded in after a base block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonMembershipWitness {
    /// Block whose accumulator the proof is anchored to
    pub since: u32,
    /// Bezout coefficient of the folded product
    pub a: BigInt,
    /// `A_since^b` for the Bezout coefficient of the element
    pub d: BigUint,
}

impl NonMembershipWitness {
    /// Check `A^a · d^x == A_since`
    pub fn verify(
        &self,
        accumulator: &Accumulator,
        element: &AccumulatorElement,
        since_accumulator: &Accumulator,
    ) -> bool {
        let n = modulus();
        let lhs = match pow_signed(&accumulator.0, &self.a) {
            Some(value) => value,
            None => return false,
        };
        let rhs = self.d.modpow(&element.to_prime(), n);
        (lhs * rhs) % n == since_accumulator.0
    }
}

/// Accumulator state after one block
#[derive(Debug)]
struct HistoryRecord {
    number: u32,
    accumulator: Accumulator,
    product: BigUint,
}

/// Consecutive history records after a base block.
///
/// Records are shared, so a segment is cheap to take under a lock and can be
/// proven against after the lock is released.
#[derive(Debug, Clone)]
pub struct HistorySegment {
    base: u32,
    base_accumulator: Accumulator,
    records: Vec<Arc<HistoryRecord>>,
}

impl HistorySegment {
    /// Block the segment starts after
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Accumulator after the base block
    pub fn base_accumulator(&self) -> &Accumulator {
        &self.base_accumulator
    }

    /// Last block covered
    pub fn last_block(&self) -> u32 {
        self.records.last().map(|r| r.number).unwrap_or(self.base)
    }

    /// Accumulator after the last covered block
    pub fn accumulator(&self) -> &Accumulator {
        self.records
            .last()
            .map(|r| &r.accumulator)
            .unwrap_or(&self.base_accumulator)
    }

    /// Witness that `element` was folded in by one of the covered blocks
    pub fn prove_membership(&self, element: &AccumulatorElement) -> Result<MembershipWitness> {
        let x = element.to_prime();
        let position = self
            .records
            .iter()
            .position(|r| (&r.product % &x).is_zero())
            .ok_or_else(|| {
                Error::Accumulator(format!(
                    "element not accumulated in blocks {}..={}",
                    self.base + 1,
                    self.last_block()
                ))
            })?;

        let previous = match position {
            0 => &self.base_accumulator,
            i => &self.records[i - 1].accumulator,
        };
        let n = modulus();
        let mut witness = previous.0.modpow(&(&self.records[position].product / &x), n);
        for record in &self.records[position + 1..] {
            witness = witness.modpow(&record.product, n);
        }

        Ok(MembershipWitness { witness })
    }

    /// Witness that `element` was not folded in by any covered block
    pub fn prove_non_membership(
        &self,
        element: &AccumulatorElement,
    ) -> Result<NonMembershipWitness> {
        let x = BigInt::from_biguint(Sign::Plus, element.to_prime());
        let product = self
            .records
            .iter()
            .fold(BigUint::one(), |acc, r| acc * &r.product);
        let product = BigInt::from_biguint(Sign::Plus, product);

        let (g, a, b) = extended_gcd(&product, &x);
        if !g.is_one() {
            return Err(Error::Accumulator(format!(
                "element is accumulated in blocks {}..={}",
                self.base + 1,
                self.last_block()
            )));
        }

        let d = pow_signed(&self.base_accumulator.0, &b).ok_or_else(|| {
            Error::Accumulator("base accumulator is not invertible modulo N".to_string())
        })?;
        Ok(NonMembershipWitness {
            since: self.base,
            a,
            d,
        })
    }
}

/// Per-block history kept by the prover.
///
/// Verifiers need only the constant-size witnesses; the prover keeps each
/// block's folded product to build them. With a retention limit, records
/// older than the limit are dropped and the newest dropped block becomes
/// the checkpoint proofs can start from.
#[derive(Debug, Clone)]
pub struct AccumulatorHistory {
    genesis: Accumulator,
    checkpoint: (u32, Accumulator),
    records: Vec<Arc<HistoryRecord>>,
    retain_blocks: usize,
}

impl AccumulatorHistory {
    /// Create empty history starting from `genesis`, keeping every block
    pub fn new(genesis: Accumulator) -> Self {
        Self::with_retention(genesis, 0)
    }

    /// Create empty history keeping at most `retain_blocks` records
    /// (0 keeps every block)
    pub fn with_retention(genesis: Accumulator, retain_blocks: usize) -> Self {
        Self {
            checkpoint: (0, genesis.clone()),
            genesis,
            records: Vec::new(),
            retain_blocks,
        }
    }

    /// Genesis accumulator
    pub fn genesis(&self) -> &Accumulator {
        &self.genesis
    }

    /// Oldest block proofs can start from
    pub fn checkpoint(&self) -> u32 {
        self.checkpoint.0
    }

    /// Last recorded block number (0 when empty)
    pub fn last_block(&self) -> u32 {
        self.records
            .last()
            .map(|r| r.number)
            .unwrap_or(self.checkpoint.0)
    }

    /// Accumulator value after `block`, if still held
    pub fn accumulator_at(&self, block: u32) -> Option<&Accumulator> {
        if block == self.checkpoint.0 {
            return Some(&self.checkpoint.1);
        }
        self.record_for(block).map(|r| &r.accumulator)
    }

    /// Record a block's elements, checking the fold reproduces `accumulator`
    pub fn record(
        &mut self,
        number: u32,
        elements: &[AccumulatorElement],
        accumulator: &Accumulator,
    ) -> Result<()> {
        let last = self.last_block();
        if last.checked_add(1) != Some(number) {
            return Err(Error::ChainLinkage(format!(
                "history at block {} cannot take block {}",
                last, number
            )));
        }

        let previous = self
            .accumulator_at(last)
            .ok_or_else(|| Error::Accumulator(format!("block {} not recorded", last)))?;
        let product = elements
            .iter()
            .map(AccumulatorElement::to_prime)
            .fold(BigUint::one(), |acc, p| acc * p);
        let folded = previous.fold(std::slice::from_ref(&product))?;
        if &folded != accumulator {
            return Err(Error::Accumulator(format!(
                "block {} accumulator does not match its elements",
                number
            )));
        }

        self.records.push(Arc::new(HistoryRecord {
            number,
            accumulator: folded,
            product,
        }));
        self.prune();
        Ok(())
    }

    /// Record an assembled block
    pub fn ingest(&mut self, block: &crate::block::Block) -> Result<()> {
        let elements = block.accumulator_elements();
        self.record(block.number, &elements, &block.accumulator)
    }

    fn prune(&mut self) {
        if self.retain_blocks == 0 || self.records.len() <= self.retain_blocks {
            return;
        }

        let excess = self.records.len() - self.retain_blocks;
        let newest_dropped = self.records.drain(..excess).last();
        if let Some(record) = newest_dropped {
            self.checkpoint = (record.number, record.accumulator.clone());
        }
    }

    fn record_for(&self, block: u32) -> Option<&Arc<HistoryRecord>> {
        let index = block.checked_sub(self.checkpoint.0)?.checked_sub(1)?;
        self.records.get(index as usize)
    }

    /// Records for blocks `since+1..=until`, detached from this history
    pub fn segment(&self, since: u32, until: u32) -> Result<HistorySegment> {
        if since < self.checkpoint.0 {
            return Err(Error::Accumulator(format!(
                "block {} is before checkpoint {}",
                since, self.checkpoint.0
            )));
        }
        if until > self.last_block() || since > until {
            return Err(Error::Accumulator(format!(
                "blocks {}..={} not recorded",
                since, until
            )));
        }

        let start = (since - self.checkpoint.0) as usize;
        let end = (until - self.checkpoint.0) as usize;
        let base_accumulator = self
            .accumulator_at(since)
            .cloned()
            .ok_or_else(|| Error::Accumulator(format!("block {} not recorded", since)))?;

        Ok(HistorySegment {
            base: since,
            base_accumulator,
            records: self.records[start..end].to_vec(),
        })
    }

    /// Witness that `element` is folded in as of `block`
    pub fn prove_membership(
        &self,
        element: &AccumulatorElement,
        block: u32,
    ) -> Result<MembershipWitness> {
        self.segment(self.checkpoint.0, block)?
            .prove_membership(element)
    }

    /// Witness that `element` was not folded in after `since`, as of `block`
    pub fn prove_non_membership(
        &self,
        element: &AccumulatorElement,
        since: u32,
        block: u32,
    ) -> Result<NonMembershipWitness> {
        self.segment(since, block)?.prove_non_membership(element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, CoinSlice};

    fn entry(owner: u8, begin: u32, end: u32, key: UtxoKey) -> LedgerEntry {
        LedgerEntry::new(
            Output::new(Address([owner; 32]), CoinSlice::new(begin, end)),
            key,
        )
    }

    #[test]
    fn test_modulus_shape() {
        let n = modulus();
        assert_eq!(n.bits(), 2048);
        assert!(!(n % 2u32).is_zero());
    }

    #[test]
    fn test_primality() {
        let mersenne_127 = (BigUint::one() << 127u32) - BigUint::one();
        assert!(is_probable_prime(&mersenne_127));
        assert!(is_probable_prime(&BigUint::from(97u32)));
        assert!(is_probable_prime(&BigUint::from(7919u32)));

        // Carmichael numbers and small composites
        assert!(!is_probable_prime(&BigUint::from(561u32)));
        assert!(!is_probable_prime(&BigUint::from(41041u32)));
        assert!(!is_probable_prime(&BigUint::from(1u32)));
        assert!(!is_probable_prime(&(&mersenne_127 * BigUint::from(101u32))));
    }

    #[test]
    fn test_hash_to_prime() {
        let p = hash_to_prime(CREATED_TAG, b"entry");
        assert_eq!(p.bits(), 256);
        assert!(is_probable_prime(&p));

        // Deterministic and domain separated
        assert_eq!(p, hash_to_prime(CREATED_TAG, b"entry"));
        assert_ne!(p, hash_to_prime(SPENT_TAG, b"entry"));
    }

    #[test]
    fn test_fold_is_deterministic_and_order_insensitive() {
        let e1 = AccumulatorElement::Created(entry(1, 0, 10, UtxoKey::new(1, 0, 0)));
        let e2 = AccumulatorElement::Spent(entry(2, 10, 20, UtxoKey::new(0, 0, 0)));
        let (p1, p2) = (e1.to_prime(), e2.to_prime());

        let genesis = Accumulator::genesis();
        let a = genesis.fold(&[p1.clone(), p2.clone()]).unwrap();
        let b = genesis.fold(&[p2, p1]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, genesis);
        assert!(a.is_valid());

        // Empty fold leaves the value unchanged
        assert_eq!(genesis.fold(&[]).unwrap(), genesis);
    }

    #[test]
    fn test_fold_rejects_invalid_previous_value() {
        let zero = Accumulator::from_value(BigUint::zero());
        assert!(matches!(zero.fold(&[]), Err(Error::Accumulator(_))));

        let too_big = Accumulator::from_value(modulus().clone());
        assert!(matches!(too_big.fold(&[]), Err(Error::Accumulator(_))));
    }

    #[test]
    fn test_fixed_width_encoding() {
        let bytes = Accumulator::genesis().to_bytes().unwrap();
        assert_eq!(bytes[ACCUMULATOR_BYTES - 1], 3);
        assert!(bytes[..ACCUMULATOR_BYTES - 1].iter().all(|b| *b == 0));
        assert_eq!(Accumulator::from_bytes_be(&bytes), Accumulator::genesis());
    }

    #[test]
    fn test_membership_and_non_membership_proofs() {
        let deposit = entry(1, 0, 100, UtxoKey::new(0, crate::types::DEPOSIT_TX_INDEX_BASE, 0));
        let created = entry(2, 0, 100, UtxoKey::new(1, 0, 0));

        let block1 = vec![
            AccumulatorElement::Spent(deposit),
            AccumulatorElement::Created(created),
        ];

        let mut history = AccumulatorHistory::new(Accumulator::genesis());
        let acc1 = Accumulator::genesis()
            .fold(&block1.iter().map(|e| e.to_prime()).collect::<Vec<_>>())
            .unwrap();
        history.record(1, &block1, &acc1).unwrap();

        // Block 2 spends the entry created in block 1
        let block2 = vec![AccumulatorElement::Spent(created)];
        let acc2 = acc1.fold(&[block2[0].to_prime()]).unwrap();
        history.record(2, &block2, &acc2).unwrap();

        // Created entry is a member from block 1 onwards
        let w = history.prove_membership(&block1[1], 1).unwrap();
        assert!(w.verify(&acc1, &block1[1]));
        let w = history.prove_membership(&block1[1], 2).unwrap();
        assert!(w.verify(&acc2, &block1[1]));
        assert!(!w.verify(&acc1, &block1[1]));

        // Its spend is absent at block 1 and present at block 2
        let spent = AccumulatorElement::Spent(created);
        let nm = history.prove_non_membership(&spent, 0, 1).unwrap();
        assert!(nm.verify(&acc1, &spent, history.genesis()));
        assert!(history.prove_non_membership(&spent, 0, 2).is_err());
        assert!(history.prove_membership(&spent, 1).is_err());
        let w = history.prove_membership(&spent, 2).unwrap();
        assert!(w.verify(&acc2, &spent));

        // A non-membership proof does not carry over to a later accumulator
        assert!(!nm.verify(&acc2, &spent, history.genesis()));

        // Anchored at block 1, the proof only covers block 2
        let since1 = history.prove_non_membership(&block1[0], 1, 2).unwrap();
        assert_eq!(since1.since, 1);
        assert!(since1.verify(&acc2, &block1[0], &acc1));
        assert!(!since1.verify(&acc2, &block1[0], history.genesis()));
    }

    #[test]
    fn test_history_rejects_gaps_and_mismatches() {
        let mut history = AccumulatorHistory::new(Accumulator::genesis());
        let genesis = Accumulator::genesis();
        assert!(matches!(
            history.record(2, &[], &genesis),
            Err(Error::ChainLinkage(_))
        ));

        let e = AccumulatorElement::Created(entry(1, 0, 1, UtxoKey::new(1, 0, 0)));
        assert!(matches!(
            history.record(1, &[e], &genesis),
            Err(Error::Accumulator(_))
        ));

        history.record(1, &[], &genesis).unwrap();
        assert_eq!(history.last_block(), 1);
        assert_eq!(history.accumulator_at(1), Some(&genesis));
        assert!(history.prove_membership(&e, 5).is_err());
    }

    fn chain_of(history: &mut AccumulatorHistory, blocks: u32) -> Vec<(AccumulatorElement, Accumulator)> {
        let mut out = Vec::new();
        let mut acc = Accumulator::genesis();
        for number in 1..=blocks {
            let e = AccumulatorElement::Created(entry(1, number, number + 1, UtxoKey::new(number, 0, 0)));
            acc = acc.fold(&[e.to_prime()]).unwrap();
            history.record(number, &[e], &acc).unwrap();
            out.push((e, acc.clone()));
        }
        out
    }

    #[test]
    fn test_segment_membership_matches_full_history() {
        let mut history = AccumulatorHistory::new(Accumulator::genesis());
        let chain = chain_of(&mut history, 5);
        let (e2, _) = &chain[1];
        let (_, acc5) = &chain[4];

        let full = history.prove_membership(e2, 5).unwrap();
        let segment = history.segment(1, 5).unwrap();
        assert_eq!(segment.base(), 1);
        assert_eq!(segment.last_block(), 5);
        assert_eq!(segment.accumulator(), acc5);
        assert_eq!(segment.prove_membership(e2).unwrap(), full);
        assert!(full.verify(acc5, e2));

        // Element folded before the segment starts is not found in it
        assert!(history.segment(2, 5).unwrap().prove_membership(e2).is_err());
        assert!(history.segment(3, 2).is_err());
        assert!(history.segment(0, 6).is_err());
    }

    #[test]
    fn test_retention_moves_checkpoint() {
        let mut history = AccumulatorHistory::with_retention(Accumulator::genesis(), 2);
        let chain = chain_of(&mut history, 5);

        assert_eq!(history.last_block(), 5);
        assert_eq!(history.checkpoint(), 3);
        assert_eq!(history.accumulator_at(3), Some(&chain[2].1));
        assert!(history.accumulator_at(2).is_none());
        assert!(history.accumulator_at(0).is_none());

        // Blocks after the checkpoint remain provable
        let (e5, acc5) = &chain[4];
        let w = history.prove_membership(e5, 5).unwrap();
        assert!(w.verify(acc5, e5));
        let absent = AccumulatorElement::Spent(entry(1, 5, 6, UtxoKey::new(5, 0, 0)));
        let nm = history.prove_non_membership(&absent, 3, 5).unwrap();
        assert!(nm.verify(acc5, &absent, &chain[2].1));

        // Older ones are gone
        assert!(history.prove_membership(&chain[0].0, 5).is_err());
        assert!(history.prove_non_membership(&absent, 2, 5).is_err());
    }

    #[test]
    fn test_history_rejects_block_past_last_number() {
        let mut history = AccumulatorHistory::with_retention(Accumulator::genesis(), 1);
        history.checkpoint = (u32::MAX, Accumulator::genesis());
        assert!(matches!(
            history.record(0, &[], &Accumulator::genesis()),
            Err(Error::ChainLinkage(_))
        ));
    }
}
