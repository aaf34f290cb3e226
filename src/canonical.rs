//! Canonical form of rule content, the pre-image of the content hash.
//!
//! Only `applies_if` and `decision_tree` are content. Object keys are
//! sorted and there is no insignificant whitespace. Conditions are
//! re-rendered from their parsed form, operators from their canonical
//! symbol and deadlines from their parsed duration, so inputs that differ
//! only in key order, condition spacing, quoting style or operator aliases
//! hash identically.
//!
//! Everything the compiler copies into [`RuleIR`](crate::RuleIR) verbatim
//! (operand strings, outcomes, obligation text) is kept byte-exact: equal
//! hashes must mean equal IR. Field names are trimmed, as the compiler
//! trims them. Node ids and node descriptions never reach the IR and are
//! only whitespace-collapsed.

use serde_json::{Map, Number, Value as Json, json};

use crate::parse::parse_condition;
use crate::types::{
    Applicability, Condition, ContentHash, DeadlineSpec, ObligationInput, Operator, Premise, Rule,
    TreeNode, Value,
};

/// BLAKE3 digest of [`canonical_json`].
#[must_use]
pub fn content_hash(rule: &Rule) -> ContentHash {
    ContentHash::of_bytes(canonical_json(rule).as_bytes())
}

/// The canonical JSON text of a rule's content.
#[must_use]
pub fn canonical_json(rule: &Rule) -> String {
    let content = json!({
        "applies_if": applicability(&rule.applies_if),
        "decision_tree": rule.decision_tree.nodes.iter().map(node).collect::<Vec<_>>(),
    });
    let mut out = String::new();
    write_sorted(&content, &mut out);
    out
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn operator_text(op: &str) -> String {
    op.parse::<Operator>()
        .map_or_else(|_| collapse(op), |op| op.symbol().to_owned())
}

fn value(v: &Value) -> Json {
    match v {
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        // Non-finite floats have no JSON number form; tagged so they never
        // collide with a string operand such as "NaN".
        Value::Float(f) => Number::from_f64(*f)
            .map_or_else(|| json!({ "float": f.to_string() }), Json::Number),
        Value::String(s) => Json::String(s.clone()),
        Value::List(items) => Json::Array(items.iter().map(value).collect()),
    }
}

fn premise(p: &Premise) -> Json {
    json!({
        "field": p.field.trim(),
        "operator": operator_text(&p.operator),
        "value": value(&p.value),
    })
}

fn applicability(a: &Applicability) -> Json {
    let (mode, premises) = match a {
        Applicability::All(p) => ("all", p),
        Applicability::Any(p) => ("any", p),
    };
    let mut map = Map::new();
    map.insert(mode.to_owned(), Json::Array(premises.iter().map(premise).collect()));
    Json::Object(map)
}

/// Both condition forms render to the same `field op operand` text when
/// they mean the same comparison. Anything that does not survive a parse
/// round trip is kept in a tagged form so it cannot alias a valid one.
fn condition(c: &Condition) -> Json {
    match c {
        Condition::Expression(text) => match parse_condition(text) {
            Ok(parsed) => Json::String(parsed.to_string()),
            Err(_) => json!({ "unparsed": collapse(text) }),
        },
        Condition::Structured {
            field,
            operator,
            value: operand,
        } => {
            let field = field.trim();
            let rendered = operator.parse::<Operator>().ok().and_then(|op| {
                let text = format!("{field} {op} {operand}");
                parse_condition(&text)
                    .ok()
                    .filter(|p| p.field == field && p.operator == op && &p.operand == operand)
                    .map(|_| text)
            });
            rendered.map_or_else(
                || {
                    json!({
                        "field": field,
                        "operator": operator_text(operator),
                        "value": value(operand),
                    })
                },
                Json::String,
            )
        }
    }
}

fn obligation(o: &ObligationInput) -> Json {
    let mut map = Map::new();
    map.insert("id".into(), Json::String(o.id.clone()));
    if let Some(d) = &o.description {
        map.insert("description".into(), Json::String(d.clone()));
    }
    if let Some(d) = &o.deadline {
        let deadline = d.parse::<DeadlineSpec>().map_or_else(
            |_| json!({ "unparsed": collapse(d) }),
            |spec| Json::String(spec.to_string()),
        );
        map.insert("deadline".into(), deadline);
    }
    Json::Object(map)
}

fn node(n: &TreeNode) -> Json {
    let mut map = Map::new();
    map.insert("node_id".into(), Json::String(collapse(&n.node_id)));
    if let Some(c) = &n.condition {
        map.insert("condition".into(), condition(c));
    }
    if let Some(d) = &n.description {
        map.insert("description".into(), Json::String(collapse(d)));
    }
    if let Some(t) = n.true_branch {
        map.insert("true_branch".into(), Json::Number(t.into()));
    }
    if let Some(f) = n.false_branch {
        map.insert("false_branch".into(), Json::Number(f.into()));
    }
    if let Some(d) = &n.decision {
        map.insert("decision".into(), Json::String(d.clone()));
    }
    if !n.obligations.is_empty() {
        map.insert(
            "obligations".into(),
            Json::Array(n.obligations.iter().map(obligation).collect()),
        );
    }
    Json::Object(map)
}

/// Compact JSON with object keys in byte order, independent of how
/// `serde_json::Map` orders its entries.
fn write_sorted(v: &Json, out: &mut String) {
    match v {
        Json::Object(map) => {
            let mut entries: Vec<(&String, &Json)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Json::String(k.clone()).to_string());
                out.push(':');
                write_sorted(v, out);
            }
            out.push('}');
        }
        Json::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_sorted(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
