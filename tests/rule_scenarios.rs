use std::sync::{Arc, Mutex};

use event_engine::interpreter::{
    CapabilityHost, Expr, NoCapabilities, Rule, RuleContext, RuleError, always_map_payload, evaluate,
    parse_rules, parse_rules_str,
};
use event_engine::messaging::{MessageDescriptor, MessageKind};
use event_engine::runtime::{
    AggregateDescription, Engine, EngineConfig, EngineError, PolicyDescription, RegistryAction,
    RuntimeInfo,
};
use serde_json::{Value, json};

fn closing_rules() -> Vec<Rule> {
    vec![
        Rule::sequence(vec![
            Rule::guard(Expr::equals(Expr::field("payload.done"), Expr::lit(true))),
            Rule::assign("state.status", Expr::lit("closed")),
        ]),
        always_map_payload(),
    ]
}

#[test]
fn specific_rule_wins_over_default_mapping() {
    let context = RuleContext::new(json!({"done": true, "status": "open", "title": "t"}));
    let evaluation = evaluate(&closing_rules(), &context, &NoCapabilities).unwrap();

    assert_eq!(
        evaluation.state,
        Some(json!({"done": true, "status": "closed", "title": "t"}))
    );
}

#[test]
fn failed_guard_leaves_default_mapping() {
    let context = RuleContext::new(json!({"done": false, "status": "open"}));
    let evaluation = evaluate(&closing_rules(), &context, &NoCapabilities).unwrap();
    assert_eq!(evaluation.state, Some(json!({"done": false, "status": "open"})));
}

#[test]
fn rule_documents_load_from_json() {
    let text = r#"{
        "version": 1,
        "rules": [
            {"type": "sequence", "rules": [
                {"type": "condition", "when": {"eq": [{"field": "payload.done"}, {"literal": true}]}},
                {"type": "assign", "to": "state.status", "value": {"literal": "closed"}}
            ]},
            {"type": "map-payload", "default": true}
        ]
    }"#;

    assert_eq!(parse_rules_str(text).unwrap(), closing_rules());
}

#[test]
fn unknown_rule_fields_are_rejected() {
    let err = parse_rules(&json!([{"type": "assign", "to": "x", "value": {"literal": 1}, "when": {}}]))
        .unwrap_err();
    assert!(matches!(err, RuleError::Parse(_)));
}

#[test]
fn evaluation_errors_discard_state() {
    let rules = vec![
        Rule::assign("title", Expr::field("payload.title")),
        Rule::assign("owner", Expr::field("payload.owner.name")),
    ];
    let context = RuleContext::new(json!({"title": "t"})).with_state(json!({"title": "old"}));

    let err = evaluate(&rules, &context, &NoCapabilities).unwrap_err();
    assert_eq!(err, RuleError::UnknownField("payload.owner.name".to_string()));
}

#[test]
fn prior_state_is_readable() {
    let rules = vec![Rule::assign(
        "count",
        Expr::Add(Box::new(Expr::field("state.count")), Box::new(Expr::field("payload.by"))),
    )];
    let context = RuleContext::new(json!({"by": 2})).with_state(json!({"count": 40, "name": "n"}));

    let evaluation = evaluate(&rules, &context, &NoCapabilities).unwrap();
    assert_eq!(evaluation.state, Some(json!({"count": 42, "name": "n"})));
}

fn todo_engine() -> Engine {
    let engine = Engine::new(EngineConfig::default());
    let add_todo = RuntimeInfo::new(
        MessageDescriptor::new("AddTodo", MessageKind::Command).for_aggregate("Todo", "todoId"),
        json!({
            "type": "object",
            "required": ["todoId", "title"],
            "properties": {"todoId": {"type": "string"}, "title": {"type": "string"}}
        }),
    );
    let todo_added = RuntimeInfo::new(
        MessageDescriptor::new("TodoAdded", MessageKind::Event).for_aggregate("Todo", "todoId"),
        json!({"type": "object", "required": ["todoId"]}),
    );

    let business_rules = vec![
        Rule::Condition {
            when: Expr::Exists("state.todoId".to_string()),
            then: Some(vec![Rule::assign("error", Expr::lit("already exists"))]),
            otherwise: Some(vec![
                Rule::assign("todoId", Expr::field("payload.todoId")),
                Rule::assign("title", Expr::field("payload.title")),
            ]),
        },
        Rule::execute(
            "audit",
            [("command".to_string(), Expr::field("meta.command"))].into_iter().collect(),
        ),
    ];

    let notify = PolicyDescription {
        name: "NotifyOwner".to_string(),
        rules: vec![Rule::execute(
            "notify",
            [(
                "text".to_string(),
                Expr::Concat(vec![Expr::lit("Added "), Expr::field("payload.title")]),
            )]
            .into_iter()
            .collect(),
        )],
        service: None,
    };
    let archive = PolicyDescription {
        name: "ArchiveDone".to_string(),
        rules: vec![Rule::sequence(vec![
            Rule::guard(Expr::equals(Expr::field("payload.title"), Expr::lit("done"))),
            Rule::execute("archive", Default::default()),
        ])],
        service: None,
    };

    engine
        .load(vec![
            RegistryAction::AddCommand {
                name: "AddTodo".to_string(),
                command: add_todo,
            },
            RegistryAction::AddAggregate {
                name: "Todo".to_string(),
                command: "AddTodo".to_string(),
                aggregate: AggregateDescription {
                    name: "Todo".to_string(),
                    identifier: "todoId".to_string(),
                    state: "Todo".to_string(),
                    service: None,
                },
                business_rules,
            },
            RegistryAction::AddAggregateEvent {
                name: "TodoAdded".to_string(),
                aggregate: "Todo".to_string(),
                event: todo_added,
                reducer: Vec::new(),
            },
            RegistryAction::AddEventPolicy {
                name: "NotifyOwner".to_string(),
                event: "TodoAdded".to_string(),
                desc: notify,
            },
            RegistryAction::AddEventPolicy {
                name: "ArchiveDone".to_string(),
                event: "TodoAdded".to_string(),
                desc: archive,
            },
        ])
        .unwrap();
    engine
}

#[test]
fn command_business_rules_collect_effects() {
    let engine = todo_engine();
    let meta = json!({"command": "AddTodo"}).as_object().cloned();
    let command = engine
        .make_command("AddTodo", json!({"todoId": "t1", "title": "Buy milk"}), meta)
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut host = CapabilityHost::new();
    let sink = Arc::clone(&seen);
    host.register("audit", move |args| {
        sink.lock().unwrap().push(args.get("command").cloned().unwrap_or(Value::Null));
        Ok(())
    });

    let evaluation = engine.handle_command(&command, None, &host).unwrap();
    assert_eq!(evaluation.state, Some(json!({"todoId": "t1", "title": "Buy milk"})));
    assert_eq!(evaluation.effects.len(), 1);

    host.run(&evaluation.effects).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![json!("AddTodo")]);

    let again = engine
        .handle_command(&command, evaluation.state.clone(), &host)
        .unwrap();
    assert_eq!(again.state.unwrap()["error"], "already exists");
}

#[test]
fn business_rules_need_the_capabilities_they_execute() {
    let engine = todo_engine();
    let command = engine
        .make_command("AddTodo", json!({"todoId": "t1", "title": "Buy milk"}), None)
        .unwrap();

    let err = engine.handle_command(&command, None, &NoCapabilities).unwrap_err();
    assert!(matches!(err, EngineError::Rule(RuleError::UnknownCapability(name)) if name == "audit"));
}

#[test]
fn policies_fire_in_name_order() {
    let engine = todo_engine();
    let catalog: std::collections::BTreeSet<String> =
        ["notify", "archive"].into_iter().map(str::to_string).collect();

    let plain = engine
        .make_event("TodoAdded", json!({"todoId": "t1", "title": "Buy milk"}), None)
        .unwrap();
    let effects = engine.policy_effects(&plain, &catalog).unwrap();
    assert_eq!(effects.len(), 1);
    assert_eq!(effects[0].capability, "notify");
    assert_eq!(effects[0].args["text"], "Added Buy milk");

    let done = engine
        .make_event("TodoAdded", json!({"todoId": "t2", "title": "done"}), None)
        .unwrap();
    let names: Vec<_> = engine
        .policy_effects(&done, &catalog)
        .unwrap()
        .into_iter()
        .map(|effect| effect.capability)
        .collect();
    assert_eq!(names, vec!["archive", "notify"]);
}

#[test]
fn default_reducer_maps_event_payload() {
    let engine = todo_engine();
    let event = engine
        .make_event("TodoAdded", json!({"todoId": "t1", "title": "Buy milk"}), None)
        .unwrap();

    let state = engine.apply_event("Todo", &event, None).unwrap();
    assert_eq!(state, event.payload);
}
