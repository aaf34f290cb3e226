mod error;
mod grammar;
mod parser;

pub use error::ConditionParseError;
pub use parser::ParsedCondition;

/// Parse a condition expression such as `reserve_ratio >= 1.0` or
/// `instrument_type in ['art', 'emt']`.
///
/// # Errors
///
/// Returns [`ConditionParseError`] if the input is not a single
/// `field operator operand` comparison.
pub fn parse_condition(input: &str) -> Result<ParsedCondition, ConditionParseError> {
    use winnow::Parser;
    grammar::condition
        .parse(input)
        .map_err(|e| ConditionParseError::new(e.to_string()))
}
