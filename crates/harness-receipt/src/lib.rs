// SPDX-License-Identifier: MIT OR Apache-2.0
//! Receipt hash verification and chain integrity for the SDLC harness.
//!
//! A "chain" here is the ordered sequence of receipts written for one
//! flow's routing log (§3 invariant 6: the routing log is append-only).
//! [`ReceiptChain`] lets the selftest runner and the HTTP surface replay a
//! flow's receipts and confirm none were tampered with after the fact.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod diff;

use harness_core::{canonical_json, sha256_hex, Receipt};
use std::collections::HashSet;
use std::fmt;

/// Recompute a receipt's `receipt_sha256` the same way [`Receipt::finalize_hash`]
/// does, and compare against the stored value.
fn compute_hash(receipt: &Receipt) -> String {
    let mut copy = receipt.clone();
    copy.receipt_sha256 = None;
    sha256_hex(canonical_json(&copy).as_bytes())
}

/// Unique key identifying a receipt attempt within a run.
pub type ReceiptKey = (String, String, String, u32);

fn key(receipt: &Receipt) -> ReceiptKey {
    (
        receipt.run_id.clone(),
        receipt.flow_key.clone(),
        receipt.step_id.clone(),
        receipt.attempt,
    )
}

/// Errors from receipt chain operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// A receipt's stored hash does not match the recomputed hash.
    HashMismatch {
        /// Index of the receipt with the mismatched hash.
        index: usize,
    },
    /// A receipt's `started_at` precedes its predecessor's — the
    /// routing-log append-only invariant requires monotonic ordering.
    BrokenLink {
        /// Index of the receipt with the broken link.
        index: usize,
    },
    /// The chain is empty when a non-empty chain was expected.
    EmptyChain,
    /// A receipt with a duplicate `(run_id, flow_key, step_id, attempt)`
    /// key was encountered.
    DuplicateAttempt {
        /// The duplicate key.
        key: ReceiptKey,
    },
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HashMismatch { index } => write!(f, "hash mismatch at chain index {index}"),
            Self::BrokenLink { index } => write!(f, "broken link at chain index {index}"),
            Self::EmptyChain => write!(f, "chain is empty"),
            Self::DuplicateAttempt { key } => write!(f, "duplicate receipt attempt: {key:?}"),
        }
    }
}

impl std::error::Error for ChainError {}

/// An ordered chain of [`Receipt`]s with integrity verification.
///
/// # Examples
///
/// ```
/// use harness_core::{ReceiptBuilder, step::StepStatus};
/// use harness_receipt::ReceiptChain;
///
/// let mut chain = ReceiptChain::new();
/// let r = ReceiptBuilder::new("run-1", "signal", "normalize", "signal-normalizer", "stub")
///     .status(StepStatus::Pass)
///     .build();
/// chain.push(r).unwrap();
/// assert_eq!(chain.len(), 1);
/// assert!(chain.verify().is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReceiptChain {
    receipts: Vec<Receipt>,
    seen: HashSet<ReceiptKey>,
}

impl ReceiptChain {
    /// Create an empty receipt chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and append a receipt to the chain.
    pub fn push(&mut self, receipt: Receipt) -> Result<(), ChainError> {
        let k = key(&receipt);
        if self.seen.contains(&k) {
            return Err(ChainError::DuplicateAttempt { key: k });
        }

        verify_receipt_hash(&receipt, self.receipts.len())?;

        if let Some(last) = self.receipts.last() {
            if receipt.started_at < last.started_at {
                return Err(ChainError::BrokenLink {
                    index: self.receipts.len(),
                });
            }
        }

        self.seen.insert(k);
        self.receipts.push(receipt);
        Ok(())
    }

    /// Verify all receipt hashes and chronological ordering in the chain.
    pub fn verify(&self) -> Result<(), ChainError> {
        if self.receipts.is_empty() {
            return Err(ChainError::EmptyChain);
        }
        for (i, receipt) in self.receipts.iter().enumerate() {
            verify_receipt_hash(receipt, i)?;
            if i > 0 && receipt.started_at < self.receipts[i - 1].started_at {
                return Err(ChainError::BrokenLink { index: i });
            }
        }
        Ok(())
    }

    /// Whether `other` (a later snapshot of the same flow's receipts) is an
    /// extension of `self` — i.e. `self` is a prefix of `other` (testable
    /// property "routing-log append-only").
    #[must_use]
    pub fn is_prefix_of(&self, other: &ReceiptChain) -> bool {
        if self.receipts.len() > other.receipts.len() {
            return false;
        }
        self.receipts
            .iter()
            .zip(other.receipts.iter())
            .all(|(a, b)| a.receipt_sha256 == b.receipt_sha256)
    }

    /// Number of receipts in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    /// Whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }

    /// The last (most recent) receipt, if any. For a microloop step, this
    /// is the authoritative receipt per invariant 3.
    #[must_use]
    pub fn latest(&self) -> Option<&Receipt> {
        self.receipts.last()
    }

    /// Iterate over the receipts in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Receipt> {
        self.receipts.iter()
    }
}

impl<'a> IntoIterator for &'a ReceiptChain {
    type Item = &'a Receipt;
    type IntoIter = std::slice::Iter<'a, Receipt>;

    fn into_iter(self) -> Self::IntoIter {
        self.receipts.iter()
    }
}

fn verify_receipt_hash(receipt: &Receipt, index: usize) -> Result<(), ChainError> {
    if let Some(ref stored) = receipt.receipt_sha256 {
        let recomputed = compute_hash(receipt);
        if *stored != recomputed {
            return Err(ChainError::HashMismatch { index });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::step::StepStatus;
    use harness_core::ReceiptBuilder;

    fn receipt(step_id: &str, attempt: u32, started_at: &str) -> Receipt {
        ReceiptBuilder::new("run-1", "plan", step_id, "agent", "stub")
            .attempt(attempt)
            .timing(started_at, started_at, 0)
            .status(StepStatus::Pass)
            .build()
    }

    #[test]
    fn push_and_verify_roundtrip() {
        let mut chain = ReceiptChain::new();
        chain.push(receipt("author", 1, "2026-01-01T00:00:00Z")).unwrap();
        chain.push(receipt("author", 2, "2026-01-01T00:00:01Z")).unwrap();
        assert_eq!(chain.len(), 2);
        assert!(chain.verify().is_ok());
    }

    #[test]
    fn tampered_hash_detected() {
        let mut r = receipt("author", 1, "2026-01-01T00:00:00Z");
        r.status = StepStatus::Fail; // mutate after hash was computed
        let mut chain = ReceiptChain::new();
        assert_eq!(
            chain.push(r),
            Err(ChainError::HashMismatch { index: 0 })
        );
    }

    #[test]
    fn duplicate_attempt_rejected() {
        let mut chain = ReceiptChain::new();
        chain.push(receipt("author", 1, "2026-01-01T00:00:00Z")).unwrap();
        let dup = chain.push(receipt("author", 1, "2026-01-01T00:00:01Z"));
        assert!(matches!(dup, Err(ChainError::DuplicateAttempt { .. })));
    }

    #[test]
    fn out_of_order_timestamp_rejected() {
        let mut chain = ReceiptChain::new();
        chain.push(receipt("author", 1, "2026-01-01T00:00:05Z")).unwrap();
        let broken = chain.push(receipt("author", 2, "2026-01-01T00:00:01Z"));
        assert!(matches!(broken, Err(ChainError::BrokenLink { .. })));
    }

    #[test]
    fn prefix_relationship_holds_for_append_only_log() {
        let mut early = ReceiptChain::new();
        early.push(receipt("author", 1, "2026-01-01T00:00:00Z")).unwrap();

        let mut later = ReceiptChain::new();
        later.push(receipt("author", 1, "2026-01-01T00:00:00Z")).unwrap();
        later.push(receipt("author", 2, "2026-01-01T00:00:01Z")).unwrap();

        assert!(early.is_prefix_of(&later));
        assert!(!later.is_prefix_of(&early));
    }

    #[test]
    fn empty_chain_fails_verify() {
        assert_eq!(ReceiptChain::new().verify(), Err(ChainError::EmptyChain));
    }
}
