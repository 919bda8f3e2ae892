//! Keyword auto-response rules.
//!
//! The table is ordered and evaluated first-match-wins: the message text is
//! lowercased and each rule's triggers are tested as plain substrings, so a
//! trigger like "hi" also fires inside "history". Later rules are never
//! consulted once one hits.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConfigError, ValidationError};

/// One auto-response rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoResponseRule {
    /// Lowercase keywords, any of which triggers the rule.
    pub triggers: Vec<String>,
    /// Reply sent when the rule fires.
    pub response: String,
}

impl AutoResponseRule {
    pub fn new<I, S>(triggers: I, response: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            triggers: triggers.into_iter().map(Into::into).collect(),
            response: response.into(),
        }
    }
}

/// A rule that fired for a given text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleMatch<'a> {
    /// Position of the rule in the table.
    pub index: usize,
    /// First trigger (in declared order) found in the text.
    pub trigger: &'a str,
    pub response: &'a str,
}

/// Ordered, immutable rule table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
    rules: Vec<AutoResponseRule>,
}

impl RuleTable {
    /// Build a table, lowercasing triggers and dropping blank ones.
    ///
    /// Rules left with no triggers or an empty response can never fire
    /// sensibly and are discarded with a warning.
    pub fn new(rules: Vec<AutoResponseRule>) -> Self {
        let rules = rules
            .into_iter()
            .filter_map(|rule| {
                let triggers: Vec<String> = rule
                    .triggers
                    .iter()
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect();
                if triggers.is_empty() || rule.response.trim().is_empty() {
                    warn!(response = %rule.response, "Discarding auto-response rule with no usable trigger or response");
                    return None;
                }
                Some(AutoResponseRule {
                    triggers,
                    response: rule.response,
                })
            })
            .collect();
        Self { rules }
    }

    /// Build a table from caller-supplied rules, rejecting unusable entries
    /// instead of silently dropping them.
    pub fn validated(rules: Vec<AutoResponseRule>) -> Result<Self, ValidationError> {
        for (i, rule) in rules.iter().enumerate() {
            if rule.triggers.iter().all(|t| t.trim().is_empty()) {
                return Err(ValidationError::InvalidField {
                    field: format!("rules[{i}].triggers"),
                    reason: "at least one non-empty trigger is required".into(),
                });
            }
            if rule.response.trim().is_empty() {
                return Err(ValidationError::InvalidField {
                    field: format!("rules[{i}].response"),
                    reason: "response must not be empty".into(),
                });
            }
        }
        Ok(Self::new(rules))
    }

    /// An empty table (never matches).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in table used when neither a rules file nor stored rules exist.
    pub fn default_rules() -> Self {
        Self::new(vec![
            AutoResponseRule::new(
                ["hello", "hi", "hey"],
                "Hello! Thanks for reaching out. How can we help you today?",
            ),
            AutoResponseRule::new(
                ["price", "pricing", "cost"],
                "Our pricing starts at $29/month. Reply PLANS to see every plan, or visit our website for details.",
            ),
            AutoResponseRule::new(
                ["hours", "open", "timing"],
                "We're available Monday to Friday, 9am to 6pm.",
            ),
            AutoResponseRule::new(
                ["help", "support"],
                "A member of our team will get back to you shortly.",
            ),
        ])
    }

    /// Load a JSON array of rules from disk.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let rules: Vec<AutoResponseRule> = serde_json::from_str(&raw).map_err(|e| {
            ConfigError::ParseError(format!("rules file {}: {e}", path.display()))
        })?;
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &[AutoResponseRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Find the first rule whose trigger occurs in `text`.
    pub fn find_match(&self, text: &str) -> Option<RuleMatch<'_>> {
        let folded = text.to_lowercase();

        for (index, rule) in self.rules.iter().enumerate() {
            if let Some(trigger) = rule.triggers.iter().find(|t| folded.contains(t.as_str())) {
                debug!(rule = index, trigger = %trigger, "Auto-response rule matched");
                return Some(RuleMatch {
                    index,
                    trigger,
                    response: &rule.response,
                });
            }
        }

        None
    }
}

/// Match an optional message body against the table.
///
/// A message without a text body never matches.
pub fn match_response<'a>(text: Option<&str>, table: &'a RuleTable) -> Option<RuleMatch<'a>> {
    table.find_match(text?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rules: Vec<(Vec<&str>, &str)>) -> RuleTable {
        RuleTable::new(
            rules
                .into_iter()
                .map(|(triggers, response)| AutoResponseRule::new(triggers, response))
                .collect(),
        )
    }

    #[test]
    fn first_table_entry_wins() {
        let rules = table(vec![(vec!["hello", "hi"], "r1"), (vec!["hi"], "r2")]);
        let hit = rules.find_match("hi there").unwrap();
        assert_eq!(hit.response, "r1");
        assert_eq!(hit.index, 0);
        assert_eq!(hit.trigger, "hi");
    }

    #[test]
    fn later_rule_fires_when_earlier_does_not() {
        let rules = table(vec![(vec!["hello"], "r1"), (vec!["bye"], "r2")]);
        assert_eq!(rules.find_match("ok bye").unwrap().response, "r2");
    }

    #[test]
    fn matching_is_case_insensitive() {
        let rules = table(vec![(vec!["price"], "r1")]);
        assert_eq!(rules.find_match("What's your PRICE?").unwrap().trigger, "price");
    }

    #[test]
    fn uppercase_triggers_are_folded_on_load() {
        let rules = table(vec![(vec!["  Pricing "], "r1")]);
        assert_eq!(rules.rules()[0].triggers, vec!["pricing"]);
        assert!(rules.find_match("pricing please").is_some());
    }

    #[test]
    fn substring_match_includes_false_positives() {
        let rules = table(vec![(vec!["hi"], "greeting")]);
        assert_eq!(
            rules.find_match("tell me about the history").unwrap().response,
            "greeting"
        );
    }

    #[test]
    fn reports_first_declared_trigger_present() {
        let rules = table(vec![(vec!["price", "pricing", "cost"], "pricing")]);
        let hit = rules.find_match("What's your price?").unwrap();
        assert_eq!(hit.trigger, "price");

        let hit = rules.find_match("what does it cost").unwrap();
        assert_eq!(hit.trigger, "cost");
    }

    #[test]
    fn no_text_never_matches() {
        let rules = RuleTable::default_rules();
        assert!(match_response(None, &rules).is_none());
    }

    #[test]
    fn no_trigger_no_match() {
        let rules = table(vec![(vec!["price"], "r1")]);
        assert!(rules.find_match("good morning").is_none());
    }

    #[test]
    fn empty_table_never_matches() {
        assert!(RuleTable::empty().find_match("hello").is_none());
    }

    #[test]
    fn blank_triggers_and_rules_are_dropped() {
        let rules = table(vec![(vec!["", "  "], "never"), (vec!["ok"], "r2"), (vec!["x"], " ")]);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.find_match("anything ok").unwrap().response, "r2");
    }

    #[test]
    fn validated_rejects_blank_trigger_set() {
        let err = RuleTable::validated(vec![AutoResponseRule::new([" "], "reply")]).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { ref field, .. } if field == "rules[0].triggers"));
    }

    #[test]
    fn validated_rejects_empty_response() {
        let err = RuleTable::validated(vec![AutoResponseRule::new(["hi"], "")]).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { ref field, .. } if field == "rules[0].response"));
    }

    #[test]
    fn default_rules_answer_pricing_question() {
        let rules = RuleTable::default_rules();
        let hit = rules.find_match("What's your price?").unwrap();
        assert_eq!(hit.trigger, "price");
        assert!(hit.response.starts_with("Our pricing starts at $29/month"));
    }

    #[test]
    fn loads_rules_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"[{"triggers": ["Refund"], "response": "Refunds take 5 days."}]"#,
        )
        .unwrap();

        let rules = RuleTable::from_json_file(&path).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.find_match("refund?").unwrap().response, "Refunds take 5 days.");
    }

    #[test]
    fn malformed_rules_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            RuleTable::from_json_file(&path),
            Err(ConfigError::ParseError(_))
        ));
    }
}
