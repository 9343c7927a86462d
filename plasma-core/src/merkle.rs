//! Merkle tree over transaction hashes
//!
//! Binds a block's ordered transaction list into `transactions_root` and
//! produces inclusion proofs for individual transactions.
//!
//! # Design
//!
//! - Binary tree with Keccak-256 (`hash(left || right)`)
//! - Odd levels duplicate their last node
//! - Empty tree has the all-zero root

use crate::crypto::keccak256_pair;
use crate::types::Hash256;

/// Direction of sibling in Merkle tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sibling is on the left
    Left,
    /// Sibling is on the right
    Right,
}

/// Merkle proof (path from leaf to root)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    /// Leaf hash being proven
    pub leaf_hash: Hash256,
    /// Sibling hashes along the path to root
    pub siblings: Vec<(Direction, Hash256)>,
    /// Root hash
    pub root_hash: Hash256,
}

impl MerkleProof {
    /// Verify proof against its root hash
    pub fn verify(&self) -> bool {
        let mut current = self.leaf_hash;

        for (direction, sibling) in &self.siblings {
            current = match direction {
                Direction::Left => keccak256_pair(sibling, &current),
                Direction::Right => keccak256_pair(&current, sibling),
            };
        }

        current == self.root_hash
    }
}

/// Fold one level into its parent level
fn next_level(level: &[Hash256]) -> Vec<Hash256> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => keccak256_pair(left, right),
            [single] => keccak256_pair(single, single),
            _ => unreachable!("chunks(2) yields one or two items"),
        })
        .collect()
}

/// Compute the Merkle root of an ordered list of leaves
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    match leaves {
        [] => Hash256::ZERO,
        [single] => *single,
        _ => {
            let mut level = next_level(leaves);
            while level.len() > 1 {
                level = next_level(&level);
            }
            level[0]
        }
    }
}

/// Generate Merkle proof for the leaf at `leaf_index`
pub fn generate_proof(leaves: &[Hash256], leaf_index: usize) -> Option<MerkleProof> {
    let leaf_hash = *leaves.get(leaf_index)?;
    let root_hash = merkle_root(leaves);
    let mut siblings = Vec::new();

    let mut level = leaves.to_vec();
    let mut index = leaf_index;

    while level.len() > 1 {
        let is_left = index % 2 == 0;
        let sibling = if is_left {
            // No right sibling on an odd level: the node pairs with itself
            *level.get(index + 1).unwrap_or(&level[index])
        } else {
            level[index - 1]
        };
        let direction = if is_left {
            Direction::Right
        } else {
            Direction::Left
        };
        siblings.push((direction, sibling));

        level = next_level(&level);
        index /= 2;
    }

    Some(MerkleProof {
        leaf_hash,
        siblings,
        root_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keccak256;

    fn leaves(n: usize) -> Vec<Hash256> {
        (0..n).map(|i| keccak256(format!("tx{}", i).as_bytes())).collect()
    }

    #[test]
    fn test_empty_and_single() {
        assert_eq!(merkle_root(&[]), Hash256::ZERO);

        let one = leaves(1);
        assert_eq!(merkle_root(&one), one[0]);

        let proof = generate_proof(&one, 0).unwrap();
        assert!(proof.siblings.is_empty());
        assert!(proof.verify());
    }

    #[test]
    fn test_two_and_four_leaves() {
        let two = leaves(2);
        assert_eq!(merkle_root(&two), keccak256_pair(&two[0], &two[1]));

        let four = leaves(4);
        let h01 = keccak256_pair(&four[0], &four[1]);
        let h23 = keccak256_pair(&four[2], &four[3]);
        assert_eq!(merkle_root(&four), keccak256_pair(&h01, &h23));
    }

    #[test]
    fn test_odd_number_leaves() {
        let three = leaves(3);

        // With odd number, last leaf is duplicated
        let h01 = keccak256_pair(&three[0], &three[1]);
        let h22 = keccak256_pair(&three[2], &three[2]);
        assert_eq!(merkle_root(&three), keccak256_pair(&h01, &h22));
    }

    #[test]
    fn test_every_proof_verifies() {
        for n in 1..12 {
            let items = leaves(n);
            let root = merkle_root(&items);
            for i in 0..n {
                let proof = generate_proof(&items, i).unwrap();
                assert_eq!(proof.root_hash, root);
                assert!(proof.verify(), "leaf {} of {}", i, n);
            }
            assert!(generate_proof(&items, n).is_none());
        }
    }

    #[test]
    fn test_tampered_proof_fails() {
        let items = leaves(5);
        let mut proof = generate_proof(&items, 3).unwrap();
        proof.leaf_hash = keccak256(b"forged");
        assert!(!proof.verify());

        let mut proof = generate_proof(&items, 3).unwrap();
        proof.root_hash = keccak256(b"fake_root");
        assert!(!proof.verify());
    }
}
