use thiserror::Error;

use crate::types::Rule;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid rule JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid rule content: {0}")]
    Invalid(String),
}

/// Turns stored rule text back into a [`Rule`].
///
/// Version records keep rule content as submitted text. Implement this for
/// whatever format the loader uses.
pub trait RuleDecoder: Send + Sync {
    /// # Errors
    ///
    /// Returns [`DecodeError`] if `content` is not a valid rule.
    fn decode(&self, content: &str) -> Result<Rule, DecodeError>;
}

/// Decodes rules stored as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRuleDecoder;

impl RuleDecoder for JsonRuleDecoder {
    fn decode(&self, content: &str) -> Result<Rule, DecodeError> {
        let rule: Rule = serde_json::from_str(content)?;
        if rule.rule_id.trim().is_empty() {
            return Err(DecodeError::Invalid("rule_id is empty".into()));
        }
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_json_rule() {
        let rule = JsonRuleDecoder
            .decode(r#"{"rule_id": "r", "decision_tree": [{"node_id": "root", "decision": "ok"}]}"#)
            .unwrap();
        assert_eq!(rule.rule_id, "r");
        assert_eq!(rule.decision_tree.len(), 1);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = JsonRuleDecoder.decode("rule_id: r").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn rejects_empty_id() {
        let err = JsonRuleDecoder
            .decode(r#"{"rule_id": " ", "decision_tree": []}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid rule content: rule_id is empty");
    }
}
