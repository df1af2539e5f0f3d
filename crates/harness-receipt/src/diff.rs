//! Field-level receipt diffing, used by the HTTP timeline surface to show
//! what changed between a microloop's attempts.

use harness_core::Receipt;
use serde::{Deserialize, Serialize};

/// One field-level difference between two receipts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    /// Name of the differing field.
    pub field: String,
    /// Value on the "before" receipt, stringified.
    pub before: String,
    /// Value on the "after" receipt, stringified.
    pub after: String,
}

/// Compare two receipts field-by-field and return the differences.
///
/// Only fields meaningful for a human/UI diff are compared; transcript and
/// hash fields are intentionally excluded (they always differ between
/// attempts and carry no decision-relevant information).
#[must_use]
pub fn diff_receipts(before: &Receipt, after: &Receipt) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();

    if format!("{:?}", before.status) != format!("{:?}", after.status) {
        diffs.push(FieldDiff {
            field: "status".to_string(),
            before: format!("{:?}", before.status),
            after: format!("{:?}", after.status),
        });
    }
    if before.attempt != after.attempt {
        diffs.push(FieldDiff {
            field: "attempt".to_string(),
            before: before.attempt.to_string(),
            after: after.attempt.to_string(),
        });
    }
    if before.critic_verdicts != after.critic_verdicts {
        diffs.push(FieldDiff {
            field: "critic_verdicts".to_string(),
            before: format!("{:?}", before.critic_verdicts),
            after: format!("{:?}", after.critic_verdicts),
        });
    }

    diffs
}
