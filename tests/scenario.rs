use chrono::{DateTime, TimeZone, Utc};
use regula::{
    Applicability, DecisionEngine, DecisionTree, Due, Facts, Node, ObligationInput, Premise, Rule,
    SourceRef,
};

const RULE_ID: &str = "mica_art36_public_offer_authorization";

fn art36() -> Rule {
    Rule::new(
        RULE_ID,
        Applicability::all([Premise::new("activity", "==", "public_offer")]),
        DecisionTree::from_node(Node::check(
            "authorized == true",
            Node::leaf("authorized"),
            Node::check(
                "is_credit_institution == true",
                Node::leaf("exempt"),
                Node::leaf("not_authorized").obligation(
                    ObligationInput::new("obtain_authorization")
                        .description("Apply for authorization before offering to the public")
                        .deadline("60 days"),
                ),
            ),
        )),
    )
    .with_description("Public offers of asset-referenced tokens require authorization")
    .with_source(SourceRef {
        document_id: "mica_2023".into(),
        article: Some("36(1)".into()),
        text_excerpt: None,
    })
}

fn engine() -> DecisionEngine {
    let engine = DecisionEngine::default();
    let report = engine.load(&[art36()]);
    assert!(report.is_clean(), "{:?}", report.failed);
    engine
}

fn evaluated_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap()
}

#[test]
fn unauthorized_issuer_gets_obligation() {
    let facts = Facts::new()
        .set("activity", "public_offer")
        .set("authorized", false)
        .set("is_credit_institution", false);
    let results = engine().decide(&facts, evaluated_at());

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.rule_id(), RULE_ID);
    assert!(result.applicable());
    assert_eq!(result.decision(), Some("not_authorized"));
    assert_eq!(result.trace().len(), 2);
    assert_eq!(result.obligations().len(), 1);

    let obligation = &result.obligations()[0];
    assert_eq!(obligation.id, "obtain_authorization");
    assert_eq!(
        obligation.due,
        Some(Due::At(Utc.with_ymd_and_hms(2024, 8, 29, 0, 0, 0).unwrap()))
    );
    assert!(result.notes().is_empty());
}

#[test]
fn authorized_issuer_decides_in_one_step() {
    let facts = Facts::new()
        .set("activity", "public_offer")
        .set("authorized", true);
    let results = engine().decide(&facts, evaluated_at());

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].decision(), Some("authorized"));
    assert_eq!(results[0].trace().len(), 1);
    assert!(results[0].obligations().is_empty());
    assert_eq!(results[0].trace()[0].condition, "authorized == true");
    assert!(results[0].trace()[0].result);
}

#[test]
fn credit_institution_is_exempt() {
    let facts = Facts::new()
        .set("activity", "public_offer")
        .set("authorized", false)
        .set("is_credit_institution", true);
    let result = engine()
        .decide_rule(RULE_ID, &facts, evaluated_at())
        .unwrap();
    assert_eq!(result.decision(), Some("exempt"));
    let nodes: Vec<usize> = result.trace().iter().map(|s| s.node).collect();
    assert_eq!(nodes, vec![0, 2]);
}

#[test]
fn other_activity_is_not_applicable() {
    let facts = Facts::new()
        .set("activity", "custody")
        .set("authorized", false);
    let engine = engine();

    assert!(engine.decide(&facts, evaluated_at()).is_empty());

    let result = engine.decide_rule(RULE_ID, &facts, evaluated_at()).unwrap();
    assert!(!result.applicable());
    assert_eq!(result.decision(), None);
    assert!(result.trace().is_empty());
}

#[test]
fn json_form_has_the_same_content() {
    let json = r#"{
        "rule_id": "mica_art36_public_offer_authorization",
        "version": 1,
        "applies_if": {"all": [{"field": "activity", "operator": "eq", "value": "public_offer"}]},
        "decision_tree": [
            {"node_id": "root", "condition": "authorized==true", "true_branch": 1, "false_branch": 2},
            {"node_id": "root_t", "decision": "authorized"},
            {"node_id": "root_f", "condition": "is_credit_institution == True", "true_branch": 3, "false_branch": 4},
            {"node_id": "root_f_t", "decision": "exempt"},
            {"node_id": "root_f_f", "decision": "not_authorized",
             "obligations": [{
                "id": "obtain_authorization",
                "description": "Apply for authorization before offering to the public",
                "deadline": "60 days"
             }]}
        ]
    }"#;
    let rule: Rule = serde_json::from_str(json).unwrap();
    assert_eq!(regula::content_hash(&rule), regula::content_hash(&art36()));
}
