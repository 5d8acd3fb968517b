//! Consent gate applied to every parsed record.

use std::collections::HashSet;

use crate::models::LogRecord;

/// Decides whether a record may be embedded.
///
/// Built once per run. When filtering is disabled every record passes.
/// When enabled, records without a user id pass (they cannot be attributed
/// to anyone), and attributed records pass only if the user is eligible.
#[derive(Debug, Clone, Default)]
pub struct ConsentFilter {
    eligible: Option<HashSet<String>>,
}

impl ConsentFilter {
    /// A filter that lets every record through.
    pub fn disabled() -> Self {
        Self { eligible: None }
    }

    /// A filter restricted to the given eligible user ids.
    pub fn with_eligible(eligible: HashSet<String>) -> Self {
        Self {
            eligible: Some(eligible),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.eligible.is_some()
    }

    /// Number of eligible users, or `None` when filtering is disabled.
    pub fn eligible_count(&self) -> Option<usize> {
        self.eligible.as_ref().map(HashSet::len)
    }

    pub fn allows(&self, record: &LogRecord) -> bool {
        let Some(eligible) = &self.eligible else {
            return true;
        };
        match record.user_id() {
            Some(user_id) => eligible.contains(&user_id),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(user_id: serde_json::Value) -> LogRecord {
        let mut map = serde_json::Map::new();
        if !user_id.is_null() {
            map.insert("user_id".to_string(), user_id);
        }
        LogRecord::new(map)
    }

    #[test]
    fn test_disabled_passes_everything() {
        let filter = ConsentFilter::disabled();
        assert!(!filter.is_enabled());
        assert!(filter.allows(&record(json!("anyone"))));
        assert!(filter.allows(&record(json!(null))));
    }

    #[test]
    fn test_enabled_checks_membership() {
        let filter = ConsentFilter::with_eligible(["u1".to_string()].into_iter().collect());
        assert!(filter.allows(&record(json!("u1"))));
        assert!(!filter.allows(&record(json!("u2"))));
    }

    #[test]
    fn test_enabled_passes_unattributed_records() {
        let filter = ConsentFilter::with_eligible(HashSet::new());
        assert!(filter.allows(&record(json!(null))));
        assert!(filter.allows(&record(json!(""))));
        assert!(!filter.allows(&record(json!("u1"))));
        assert_eq!(filter.eligible_count(), Some(0));
    }
}
