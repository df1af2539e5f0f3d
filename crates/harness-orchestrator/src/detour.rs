//! Fixed detour catalog: `signature_pattern -> sidequest_step`, matched by
//! exact equality on a critic's `forensic_summary` tag. No free-form
//! inference — an unmatched tag routes ESCALATE.
//!
//! Entries are evaluated in priority order and the first match wins.

/// One entry in the fixed detour catalog.
#[derive(Debug, Clone)]
pub struct DetourEntry {
    /// Exact `forensic_summary` tag this entry matches.
    pub signature_pattern: String,
    /// Step id of the sidequest to run when this entry matches.
    pub sidequest_step: String,
}

/// Ordered table of detour entries. Earlier entries take precedence if a
/// tag were ever registered twice.
#[derive(Debug, Clone, Default)]
pub struct DetourCatalog {
    entries: Vec<DetourEntry>,
}

impl DetourCatalog {
    /// An empty catalog. Every tag routes ESCALATE until entries are added.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a detour entry.
    pub fn add(&mut self, signature_pattern: impl Into<String>, sidequest_step: impl Into<String>) {
        self.entries.push(DetourEntry {
            signature_pattern: signature_pattern.into(),
            sidequest_step: sidequest_step.into(),
        });
    }

    /// Look up the sidequest step id for an exact `forensic_summary` tag.
    /// Returns `None` if no entry matches — the caller routes ESCALATE.
    #[must_use]
    pub fn lookup(&self, forensic_summary: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.signature_pattern == forensic_summary)
            .map(|e| e.sidequest_step.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_only() {
        let mut catalog = DetourCatalog::new();
        catalog.add("flaky_test_detected", "rerun-tests");
        assert_eq!(catalog.lookup("flaky_test_detected"), Some("rerun-tests"));
        assert_eq!(catalog.lookup("flaky_test_detecte"), None);
    }

    #[test]
    fn unmatched_tag_has_no_entry() {
        let catalog = DetourCatalog::new();
        assert_eq!(catalog.lookup("anything"), None);
    }

    #[test]
    fn first_registered_entry_wins_on_duplicate_tag() {
        let mut catalog = DetourCatalog::new();
        catalog.add("dup", "first");
        catalog.add("dup", "second");
        assert_eq!(catalog.lookup("dup"), Some("first"));
    }
}
