use std::fmt;

/// Error produced when a condition expression cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionParseError {
    message: String,
}

impl ConditionParseError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The parser's diagnostic, including the position of the failure.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ConditionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "condition parse error: {}", self.message)
    }
}

impl std::error::Error for ConditionParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ConditionParseError::new("expected operator");
        assert_eq!(err.to_string(), "condition parse error: expected operator");
        assert_eq!(err.message(), "expected operator");
    }
}
