use regula::parse::parse_condition;
use regula::{
    Applicability, CompilationError, DecisionTree, Node, Operator, Rule, RuleCompiler, Value,
};

#[test]
fn parses_authored_conditions() {
    let cases = [
        ("authorized == true", "authorized", Operator::Eq, Value::Bool(true)),
        ("reserve_ratio >= 1.0", "reserve_ratio", Operator::Gte, Value::Float(1.0)),
        ("client_count > 150", "client_count", Operator::Gt, Value::Int(150)),
        (
            "instrument_type in ['art', 'emt']",
            "instrument_type",
            Operator::In,
            Value::from(vec!["art", "emt"]),
        ),
        (
            "investor_types contains 'retail'",
            "investor_types",
            Operator::Contains,
            Value::from("retail"),
        ),
        ("jurisdiction != \"EU\"", "jurisdiction", Operator::Neq, Value::from("EU")),
    ];
    for (text, field, operator, operand) in cases {
        let parsed = parse_condition(text).unwrap();
        assert_eq!(parsed.field, field, "{text}");
        assert_eq!(parsed.operator, operator, "{text}");
        assert_eq!(parsed.operand, operand, "{text}");
    }
}

#[test]
fn error_points_at_input() {
    let err = parse_condition("reserve_ratio >= ").unwrap_err();
    assert!(err.to_string().starts_with("condition parse error: "));
    assert!(!err.message().is_empty());
}

#[test]
fn compiler_reports_parse_failures_with_node_path() {
    let rule = Rule::new(
        "bad",
        Applicability::default(),
        DecisionTree::from_node(Node::check(
            "a == 1",
            Node::check("b >> 2", Node::leaf("x"), Node::leaf("y")),
            Node::leaf("z"),
        )),
    );
    let err = RuleCompiler::default().compile_rule(&rule).unwrap_err();
    assert!(matches!(err, CompilationError::MalformedCondition { .. }));
    assert_eq!(err.node_path(), ["root", "root_t"]);
}

#[test]
fn operand_type_checked_against_operator() {
    for condition in ["x in 'art'", "x >= 'high'", "x contains ['a']"] {
        let rule = Rule::new(
            "typed",
            Applicability::default(),
            DecisionTree::from_node(Node::check(condition, Node::leaf("y"), Node::leaf("n"))),
        );
        let err = RuleCompiler::default().compile_rule(&rule).unwrap_err();
        assert!(
            matches!(err, CompilationError::InvalidOperand { .. }),
            "{condition}: {err}"
        );
    }
}

#[test]
fn display_is_reparseable() {
    for text in [
        "  authorized==True ",
        "instrument_type not in [\"art\",'emt']",
        "reserve_ratio<-0.5",
        "note == 'it\\'s'",
    ] {
        let parsed = parse_condition(text).unwrap();
        let canonical = parsed.to_string();
        assert_eq!(parse_condition(&canonical).unwrap(), parsed, "{text} -> {canonical}");
    }
}
