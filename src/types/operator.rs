use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Condition operators. Semantics live in [`Value::apply`](super::Value::apply).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    Eq,
    Neq,
    In,
    NotIn,
    Contains,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown operator '{0}'")]
pub struct UnknownOperator(pub String);

impl Operator {
    pub const ALL: [Operator; 9] = [
        Operator::Eq,
        Operator::Neq,
        Operator::In,
        Operator::NotIn,
        Operator::Contains,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
    ];

    /// Canonical symbol, used in premise keys and trace output.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Neq => "!=",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Contains => "contains",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
        }
    }

    /// Operators whose operand must be a list.
    #[must_use]
    pub fn takes_list(self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    /// Operators that require numeric operands.
    #[must_use]
    pub fn is_range(self) -> bool {
        matches!(
            self,
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte
        )
    }
}

impl FromStr for Operator {
    type Err = UnknownOperator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.as_str() {
            "==" | "=" | "eq" => Ok(Operator::Eq),
            "!=" | "ne" => Ok(Operator::Neq),
            "in" => Ok(Operator::In),
            "not_in" | "not in" => Ok(Operator::NotIn),
            "contains" => Ok(Operator::Contains),
            ">" | "gt" => Ok(Operator::Gt),
            ">=" | "gte" => Ok(Operator::Gte),
            "<" | "lt" => Ok(Operator::Lt),
            "<=" | "lte" => Ok(Operator::Lte),
            _ => Err(UnknownOperator(s.to_owned())),
        }
    }
}

impl TryFrom<String> for Operator {
    type Error = UnknownOperator;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.symbol().to_owned()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_round_trip_through_from_str() {
        for op in Operator::ALL {
            assert_eq!(op.symbol().parse::<Operator>(), Ok(op), "failed for {op}");
        }
    }

    #[test]
    fn aliases() {
        assert_eq!("not  in".parse::<Operator>(), Ok(Operator::NotIn));
        assert_eq!("=".parse::<Operator>(), Ok(Operator::Eq));
        assert_eq!("gte".parse::<Operator>(), Ok(Operator::Gte));
    }

    #[test]
    fn unknown_operator() {
        let err = "~=".parse::<Operator>().unwrap_err();
        assert_eq!(err.to_string(), "unknown operator '~='");
    }

    #[test]
    fn serde_uses_symbol() {
        assert_eq!(serde_json::to_string(&Operator::Gte).unwrap(), "\">=\"");
        let op: Operator = serde_json::from_str("\"not_in\"").unwrap();
        assert_eq!(op, Operator::NotIn);
        assert!(serde_json::from_str::<Operator>("\"like\"").is_err());
    }
}
