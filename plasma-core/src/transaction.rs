//! Child chain transactions
//!
//! A transaction consumes ledger entries and produces outputs over the same
//! coins. Self-validation does not consult the ledger; it runs before any
//! ledger-aware check.

use crate::crypto::{keccak256, KeyPair};
use crate::types::{Hash256, LedgerEntry, Output, Signature};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Version byte of the canonical transaction encoding
pub const TX_ENCODING_VERSION: u8 = 1;

/// Maximum outputs per transaction (`output_index` is a `u8`)
pub const MAX_OUTPUTS: usize = u8::MAX as usize + 1;

/// Transfer of coin ranges between owners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Consumed entries, in order
    pub inputs: Vec<LedgerEntry>,
    /// Produced outputs, in order
    pub outputs: Vec<Output>,
    /// One signature per input, by that input's owner over [`Transaction::signing_hash`]
    pub signatures: Vec<Signature>,
}

impl Transaction {
    /// Create an unsigned transaction
    pub fn new(inputs: Vec<LedgerEntry>, outputs: Vec<Output>) -> Self {
        Self {
            inputs,
            outputs,
            signatures: Vec::new(),
        }
    }

    /// Sign every input with the given keys.
    ///
    /// Each input is signed by the key whose address owns it.
    pub fn sign(mut self, keys: &[&KeyPair]) -> Result<Self> {
        let message = self.signing_hash();
        let mut signatures = Vec::with_capacity(self.inputs.len());

        for input in &self.inputs {
            let key = keys
                .iter()
                .find(|k| k.address() == input.output.owner)
                .ok_or_else(|| {
                    Error::Signature(format!("no key for owner of input {}", input.key()))
                })?;
            signatures.push(key.sign(message.as_bytes()));
        }

        self.signatures = signatures;
        Ok(self)
    }

    /// Canonical encoding of inputs and outputs (signatures excluded)
    fn body_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9 + self.inputs.len() * 49 + self.outputs.len() * 40);
        out.push(TX_ENCODING_VERSION);

        out.extend_from_slice(&(self.inputs.len() as u32).to_be_bytes());
        for input in &self.inputs {
            out.extend_from_slice(&input.canonical_bytes());
        }

        out.extend_from_slice(&(self.outputs.len() as u32).to_be_bytes());
        for output in &self.outputs {
            out.extend_from_slice(output.owner.as_bytes());
            out.extend_from_slice(&output.slice.begin.to_be_bytes());
            out.extend_from_slice(&output.slice.end.to_be_bytes());
        }

        out
    }

    /// Hash the input owners sign
    pub fn signing_hash(&self) -> Hash256 {
        keccak256(&self.body_bytes())
    }

    /// Hash identifying the transaction, signatures included
    pub fn hash(&self) -> Hash256 {
        let mut bytes = self.body_bytes();
        bytes.extend_from_slice(&(self.signatures.len() as u32).to_be_bytes());
        for signature in &self.signatures {
            bytes.extend_from_slice(signature.as_bytes());
        }
        keccak256(&bytes)
    }

    /// Structural, signature, then conservation checks.
    ///
    /// Does not consult the ledger.
    pub fn validate(&self) -> Result<()> {
        self.validate_structure()?;
        self.validate_signatures()?;
        self.validate_conservation()
    }

    fn validate_structure(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(Error::Structural("transaction has no inputs".to_string()));
        }
        if self.outputs.is_empty() {
            return Err(Error::Structural("transaction has no outputs".to_string()));
        }
        if self.outputs.len() > MAX_OUTPUTS {
            return Err(Error::Structural(format!(
                "{} outputs exceed the limit of {}",
                self.outputs.len(),
                MAX_OUTPUTS
            )));
        }

        let mut keys = HashSet::with_capacity(self.inputs.len());
        for input in &self.inputs {
            if !input.output.slice.is_well_formed() {
                return Err(Error::Structural(format!(
                    "input {} has malformed slice {}",
                    input.key(),
                    input.output.slice
                )));
            }
            if !keys.insert(input.key()) {
                return Err(Error::Structural(format!(
                    "input {} referenced twice",
                    input.key()
                )));
            }
        }

        for (i, output) in self.outputs.iter().enumerate() {
            if !output.slice.is_well_formed() {
                return Err(Error::Structural(format!(
                    "output {} has malformed slice {}",
                    i, output.slice
                )));
            }
        }

        if self.signatures.len() != self.inputs.len() {
            return Err(Error::Structural(format!(
                "{} signatures for {} inputs",
                self.signatures.len(),
                self.inputs.len()
            )));
        }

        Ok(())
    }

    fn validate_signatures(&self) -> Result<()> {
        let message = self.signing_hash();

        for (input, signature) in self.inputs.iter().zip(&self.signatures) {
            if !signature.verify(message.as_bytes(), &input.output.owner) {
                return Err(Error::Signature(format!(
                    "signature for input {} does not verify against owner {}",
                    input.key(),
                    input.output.owner
                )));
            }
        }

        Ok(())
    }

    fn validate_conservation(&self) -> Result<()> {
        let mut input_slices: Vec<_> = self.inputs.iter().map(|i| i.output.slice).collect();
        input_slices.sort();
        if let Some(pair) = input_slices.windows(2).find(|w| w[0].overlaps(&w[1])) {
            return Err(Error::Conservation(format!(
                "input slices {} and {} overlap",
                pair[0], pair[1]
            )));
        }

        let mut output_slices: Vec<_> = self.outputs.iter().map(|o| o.slice).collect();
        output_slices.sort();
        if let Some(pair) = output_slices.windows(2).find(|w| w[0].overlaps(&w[1])) {
            return Err(Error::Conservation(format!(
                "output slices {} and {} overlap",
                pair[0], pair[1]
            )));
        }

        for slice in &output_slices {
            if !input_slices.iter().any(|input| input.contains(slice)) {
                return Err(Error::Conservation(format!(
                    "output slice {} is not covered by a single input",
                    slice
                )));
            }
        }

        let total_in: u64 = input_slices.iter().map(|s| s.len()).sum();
        let total_out: u64 = output_slices.iter().map(|s| s.len()).sum();
        if total_in != total_out {
            return Err(Error::Conservation(format!(
                "outputs cover {} coins, inputs cover {}",
                total_out, total_in
            )));
        }

        Ok(())
    }
}
