//! Inbound call admission

use crate::config::{InboundConfig, InboundPolicy};

/// Decides whether an unknown inbound caller gets a call record
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    mode: InboundPolicy,
    allow_from: Vec<String>,
    min_match_digits: usize,
}

impl AdmissionPolicy {
    pub fn new(mode: InboundPolicy, allow_from: &[String], min_match_digits: usize) -> Self {
        Self {
            mode,
            allow_from: allow_from
                .iter()
                .map(|n| digits_only(n))
                .filter(|n| !n.is_empty())
                .collect(),
            min_match_digits: min_match_digits.max(1),
        }
    }

    pub fn from_config(config: &InboundConfig) -> Self {
        Self::new(config.policy, &config.allow_from, config.min_match_digits)
    }

    /// Accept every inbound call
    pub fn open() -> Self {
        Self::new(InboundPolicy::Open, &[], 1)
    }

    pub fn mode(&self) -> InboundPolicy {
        self.mode
    }

    pub fn admits(&self, caller: &str) -> bool {
        match self.mode {
            InboundPolicy::Disabled => false,
            InboundPolicy::Open => true,
            InboundPolicy::Allowlist | InboundPolicy::Pairing => {
                let caller = digits_only(caller);
                !caller.is_empty()
                    && self
                        .allow_from
                        .iter()
                        .any(|allowed| numbers_match(&caller, allowed, self.min_match_digits))
            }
        }
    }
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::new(InboundPolicy::Disabled, &[], 7)
    }
}

fn digits_only(number: &str) -> String {
    number.chars().filter(char::is_ascii_digit).collect()
}

/// Prefix or suffix match in either direction.
///
/// The shorter side must carry at least `min_digits` digits so that a short
/// allowlist entry cannot admit arbitrary callers.
fn numbers_match(a: &str, b: &str, min_digits: usize) -> bool {
    if a.len().min(b.len()) < min_digits {
        return false;
    }
    a.ends_with(b) || b.ends_with(a) || a.starts_with(b) || b.starts_with(a)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowlist(numbers: &[&str]) -> AdmissionPolicy {
        let numbers: Vec<String> = numbers.iter().map(|s| s.to_string()).collect();
        AdmissionPolicy::new(InboundPolicy::Allowlist, &numbers, 7)
    }

    #[test]
    fn test_disabled_rejects_everything() {
        assert!(!AdmissionPolicy::default().admits("+15551234567"));
    }

    #[test]
    fn test_open_accepts_everything() {
        assert!(AdmissionPolicy::open().admits("anonymous"));
    }

    #[test]
    fn test_country_code_difference_matches() {
        let policy = allowlist(&["5551234567"]);
        assert!(policy.admits("+15551234567"));
        assert!(policy.admits("(555) 123-4567"));
    }

    #[test]
    fn test_formatted_allow_entry_matches() {
        let policy = allowlist(&["+1 (555) 000-1111"]);
        assert!(policy.admits("+15550001111"));
        assert!(policy.admits("5550001111"));
    }

    #[test]
    fn test_no_match_rejected() {
        let policy = allowlist(&["5551234567"]);
        assert!(!policy.admits("+15559876543"));
        assert!(!policy.admits(""));
    }

    #[test]
    fn test_short_entries_cannot_match() {
        let policy = allowlist(&["123"]);
        assert!(!policy.admits("+1234567890"));
    }

    #[test]
    fn test_pairing_uses_allowlist_matching() {
        let numbers = vec!["5550001111".to_string()];
        let policy = AdmissionPolicy::new(InboundPolicy::Pairing, &numbers, 7);
        assert!(policy.admits("+15550001111"));
        assert!(!policy.admits("+15550002222"));
    }
}
