use std::fmt;

use crate::{Operator, Value};

/// A tree condition after parsing: `field operator operand`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCondition {
    pub field: String,
    pub operator: Operator,
    pub operand: Value,
}

/// Canonical text form. Parsing the output again yields an equal value.
impl fmt::Display for ParsedCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.operator, self.operand)
    }
}
