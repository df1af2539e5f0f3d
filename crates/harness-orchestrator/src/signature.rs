//! Progress-signature computation for microloop stall detection (§4.6).

use harness_core::{HandoffEnvelope, Receipt};

/// Stable hash over the fields that together define one microloop
/// iteration's "progress": the critic's routing signal and forensic tag,
/// its critic verdicts, its handoff's structured fields (carrying, by
/// convention, things like a pytest summary line or a numeric FR-status
/// map), and the set of artifact pointers it claims changed.
///
/// Two consecutive iterations with an identical signature indicate a
/// stall (§4.6) rather than genuine progress.
#[must_use]
pub fn progress_signature(receipt: &Receipt, handoff: &HandoffEnvelope) -> String {
    let mut changed_pointers = handoff.pointers.clone();
    changed_pointers.sort();

    let facet = serde_json::json!({
        "routing_signal": receipt.routing_signal,
        "forensic_summary": receipt.forensic_summary,
        "critic_verdicts": receipt.critic_verdicts,
        "structured_fields": handoff.structured_fields,
        "changed_pointers": changed_pointers,
    });
    harness_core::sha256_hex(harness_core::canonical_json(&facet).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::ReceiptBuilder;
    use harness_core::{HandoffTier, StepStatus};

    fn receipt(forensic: Option<&str>) -> Receipt {
        let mut builder = ReceiptBuilder::new("run-1", "build", "critic", "builder-critic", "stub").status(StepStatus::Pass);
        if let Some(tag) = forensic {
            builder = builder.forensic_summary(tag);
        }
        builder.build()
    }

    fn handoff(pointers: Vec<&str>) -> HandoffEnvelope {
        HandoffEnvelope {
            tier: HandoffTier::Standard,
            from_step: "critic".to_string(),
            to_step: "author".to_string(),
            pointers: pointers.into_iter().map(String::from).collect(),
            structured_fields: Default::default(),
            notes: String::new(),
        }
    }

    #[test]
    fn identical_inputs_produce_identical_signatures() {
        let a = progress_signature(&receipt(Some("tests_red")), &handoff(vec!["build/report.md"]));
        let b = progress_signature(&receipt(Some("tests_red")), &handoff(vec!["build/report.md"]));
        assert_eq!(a, b);
    }

    #[test]
    fn differing_forensic_tags_produce_different_signatures() {
        let a = progress_signature(&receipt(Some("tests_red")), &handoff(vec!["build/report.md"]));
        let b = progress_signature(&receipt(Some("tests_green")), &handoff(vec!["build/report.md"]));
        assert_ne!(a, b);
    }

    #[test]
    fn pointer_order_does_not_affect_signature() {
        let a = progress_signature(&receipt(None), &handoff(vec!["a.md", "b.md"]));
        let b = progress_signature(&receipt(None), &handoff(vec!["b.md", "a.md"]));
        assert_eq!(a, b);
    }
}
