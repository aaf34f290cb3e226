use winnow::ascii::dec_int;
use winnow::combinator::{alt, cut_err, not, opt, separated, terminated};
use winnow::error::{ErrMode, ModalResult, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_while};

use crate::{Operator, Value};

use super::parser::ParsedCondition;

// -- Whitespace & identifiers -----------------------------------------------

fn ws(input: &mut &str) -> ModalResult<()> {
    take_while(0.., |c: char| c.is_ascii_whitespace())
        .void()
        .parse_next(input)
}

fn word_end(input: &mut &str) -> ModalResult<()> {
    not(one_of(|c: char| c.is_ascii_alphanumeric() || c == '_')).parse_next(input)
}

fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1.., |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| {
            c.is_ascii_alphanumeric() || c == '_' || c == '.'
        }),
    )
        .take()
        .parse_next(input)
}

// -- Operators --------------------------------------------------------------

fn operator(input: &mut &str) -> ModalResult<Operator> {
    alt((
        ">=".value(Operator::Gte),
        ">".value(Operator::Gt),
        "<=".value(Operator::Lte),
        "<".value(Operator::Lt),
        "==".value(Operator::Eq),
        "!=".value(Operator::Neq),
        "=".value(Operator::Eq),
        terminated("not_in", word_end).value(Operator::NotIn),
        (
            "not",
            take_while(1.., |c: char| c.is_ascii_whitespace()),
            "in",
            word_end,
        )
            .value(Operator::NotIn),
        terminated("in", word_end).value(Operator::In),
        terminated("contains", word_end).value(Operator::Contains),
    ))
    .parse_next(input)
}

// -- Operands ---------------------------------------------------------------

/// Single- or double-quoted string. Rule authors use both.
fn quoted_string(input: &mut &str) -> ModalResult<String> {
    let quote = one_of(['"', '\'']).parse_next(input)?;
    let mut s = String::new();
    loop {
        let ch = cut_err(any).parse_next(input)?;
        if ch == quote {
            return Ok(s);
        }
        if ch == '\\' {
            match cut_err(any).parse_next(input)? {
                'n' => s.push('\n'),
                't' => s.push('\t'),
                c @ ('"' | '\'' | '\\') => s.push(c),
                other => {
                    s.push('\\');
                    s.push(other);
                }
            }
        } else {
            s.push(ch);
        }
    }
}

fn negative_number(input: &mut &str) -> ModalResult<Value> {
    let neg_str = (
        '-',
        take_while(1.., |c: char| c.is_ascii_digit() || c == '.'),
    )
        .take()
        .parse_next(input)?;
    if neg_str.contains('.') {
        let f: f64 = neg_str
            .parse()
            .map_err(|_| ErrMode::from_input(input).cut())?;
        Ok(Value::Float(f))
    } else {
        let i: i64 = neg_str
            .parse()
            .map_err(|_| ErrMode::from_input(input).cut())?;
        Ok(Value::Int(i))
    }
}

fn float_literal(input: &mut &str) -> ModalResult<f64> {
    (
        take_while(1.., |c: char| c.is_ascii_digit()),
        '.',
        take_while(1.., |c: char| c.is_ascii_digit()),
    )
        .take()
        .try_map(|s: &str| s.parse::<f64>())
        .parse_next(input)
}

fn scalar(input: &mut &str) -> ModalResult<Value> {
    alt((
        quoted_string.map(Value::String),
        terminated(alt(("true", "True")), word_end).value(Value::Bool(true)),
        terminated(alt(("false", "False")), word_end).value(Value::Bool(false)),
        negative_number,
        float_literal.map(Value::Float),
        dec_int::<_, i64, _>.map(Value::Int),
    ))
    .parse_next(input)
}

fn list(input: &mut &str) -> ModalResult<Vec<Value>> {
    '['.parse_next(input)?;
    ws.parse_next(input)?;
    let items: Vec<Value> = separated(0.., scalar, (ws, ',', ws)).parse_next(input)?;
    let _ = opt((ws, ',')).parse_next(input)?;
    ws.parse_next(input)?;
    cut_err(']')
        .context(StrContext::Expected(StrContextValue::CharLiteral(']')))
        .parse_next(input)?;
    Ok(items)
}

fn operand(input: &mut &str) -> ModalResult<Value> {
    alt((list.map(Value::List), scalar))
        .context(StrContext::Expected(StrContextValue::Description(
            "operand",
        )))
        .parse_next(input)
}

// -- Top-level parser -------------------------------------------------------

pub fn condition(input: &mut &str) -> ModalResult<ParsedCondition> {
    ws.parse_next(input)?;
    let field = cut_err(ident)
        .context(StrContext::Expected(StrContextValue::Description(
            "field name",
        )))
        .parse_next(input)?;
    ws.parse_next(input)?;
    let operator = cut_err(operator)
        .context(StrContext::Expected(StrContextValue::Description(
            "operator",
        )))
        .parse_next(input)?;
    ws.parse_next(input)?;
    let operand = cut_err(operand).parse_next(input)?;
    ws.parse_next(input)?;

    Ok(ParsedCondition {
        field: field.to_owned(),
        operator,
        operand,
    })
}
