//! Routing of engine mutation events to dependent computations.

use reactive_er::computation::RecordingScheduler;
use reactive_er::db::open_mem_db;
use reactive_er::{
    AttributeQuery, Cardinality, Computation, DataDep, DataType, DatabaseConfig, Engine,
    EngineError, EntityDef, EventType, MatchExp, Phase, Record, RelationDef, SchemaDefinition,
    Value,
};
use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

fn definition() -> SchemaDefinition {
    SchemaDefinition::new()
        .entity(
            EntityDef::new("User")
                .property("name", DataType::String)
                .property("age", DataType::Int),
        )
        .entity(EntityDef::new("Team").property("name", DataType::String))
        .relation(
            RelationDef::new("User", "teams", "Team", "members", Cardinality::ManyToMany)
                .property("role", DataType::String),
        )
}

#[fixture]
fn engine() -> Engine {
    let db = open_mem_db().expect("in-memory database should open");
    Engine::new(definition(), db).expect("engine should start")
}

fn payload(json: serde_json::Value) -> Record {
    Record::from_json(&json).expect("payload should be an object")
}

fn dispatched(engine: &Engine, events: &[reactive_er::MutationEvent]) -> Vec<String> {
    engine
        .dispatch(events)
        .iter()
        .map(|d| format!("{}:{}:{}", d.computation(), d.entry.record, d.event.event_type.as_str()))
        .collect()
}

#[rstest]
fn test_adding_computations_requires_initialization(mut engine: Engine) {
    let err = engine
        .add_computation(Computation::new("count").dep("users", DataDep::records("User")))
        .unwrap_err();
    assert!(matches!(err, EngineError::NotInitialized));

    engine.initialize_computations(Vec::new()).unwrap();
    engine
        .add_computation(Computation::new("count").dep("users", DataDep::records("User")))
        .unwrap();
    assert!(!engine.source_maps().is_empty());
}

#[rstest]
fn test_records_dependency_follows_projection(mut engine: Engine) {
    let members = AttributeQuery::new().nested("members", AttributeQuery::new().value("name"));
    engine
        .initialize_computations(vec![
            Computation::new("rosters").dep("teams", DataDep::records_with("Team", members)),
        ])
        .unwrap();

    let created = engine
        .create("User", &payload(json!({"name": "a", "teams": [{"name": "t"}]})))
        .unwrap();
    assert_eq!(
        dispatched(&engine, &created.events),
        vec![
            "rosters:Team:create".to_string(),
            "rosters:User_teams_members_Team:create".to_string(),
        ]
    );

    let renamed = engine
        .update("User", &MatchExp::eq("name", "a"), &payload(json!({"name": "b"})))
        .unwrap();
    assert_eq!(dispatched(&engine, &renamed.events), vec!["rosters:User:update".to_string()]);

    let aged = engine
        .update("User", &MatchExp::eq("name", "b"), &payload(json!({"age": 40})))
        .unwrap();
    assert_eq!(aged.events.len(), 1);
    assert!(dispatched(&engine, &aged.events).is_empty());
}

#[rstest]
fn test_property_dependency_watches_host_and_related(mut engine: Engine) {
    let teams = AttributeQuery::new().value("name").nested("teams", AttributeQuery::new().value("name"));
    engine
        .initialize_computations(vec![
            Computation::new("summary").on("User").dep("own", DataDep::property(teams)),
        ])
        .unwrap();

    let user = engine.create("User", &payload(json!({"name": "a"}))).unwrap();
    assert!(dispatched(&engine, &user.events).is_empty());
    let user_id = user.id().unwrap();

    let joined = engine
        .update(
            "User",
            &MatchExp::eq("id", user_id),
            &payload(json!({"teams": [{"name": "t"}]})),
        )
        .unwrap();
    let names = dispatched(&engine, &joined.events);
    assert!(names.contains(&"summary:User_teams_members_Team:create".to_string()));

    let renamed = engine
        .update("Team", &MatchExp::eq("name", "t"), &payload(json!({"name": "u"})))
        .unwrap();
    let dispatches = engine.dispatch(&renamed.events);
    assert_eq!(dispatches.len(), 1);
    assert_eq!(
        dispatches[0].entry.target_path,
        Some(vec!["teams".to_string()])
    );

    let aged = engine
        .update("User", &MatchExp::eq("id", user_id), &payload(json!({"age": 3})))
        .unwrap();
    assert!(dispatched(&engine, &aged.events).is_empty());
}

#[rstest]
fn test_global_dependency_matches_its_key(mut engine: Engine) {
    engine
        .initialize_computations(vec![
            Computation::new("scaled").dep("factor", DataDep::global("factor")),
        ])
        .unwrap();

    let other = engine.set_global("threshold", 10i64).unwrap();
    assert!(engine.dispatch(&other.events).is_empty());

    let created = engine.set_global("factor", 2i64).unwrap();
    assert_eq!(created.events[0].event_type, EventType::Create);
    assert_eq!(dispatched(&engine, &created.events).len(), 1);

    let updated = engine.set_global("factor", 5i64).unwrap();
    assert_eq!(dispatched(&engine, &updated.events).len(), 1);
    assert_eq!(engine.get_global("factor").unwrap(), Some(Value::Int(5)));
}

#[rstest]
fn test_run_hands_dispatches_over_by_phase(mut engine: Engine) {
    engine
        .initialize_computations(vec![
            Computation::new("late").phase(Phase::AfterAll).dep("teams", DataDep::records("Team")),
            Computation::new("plain").dep("users", DataDep::records("User")),
            Computation::new("early").phase(Phase::BeforeAll).dep("teams", DataDep::records("Team")),
        ])
        .unwrap();

    let created = engine
        .create("User", &payload(json!({"name": "a", "teams": [{"name": "t"}]})))
        .unwrap();
    let mut scheduler = RecordingScheduler::default();
    assert_eq!(engine.run(&created.events, &mut scheduler).unwrap(), 3);
    let order: Vec<&str> = scheduler.dispatched.iter().map(|d| d.computation()).collect();
    assert_eq!(order, vec!["early", "plain", "late"]);
}

#[rstest]
#[case::unknown_source(Computation::new("bad").dep("x", DataDep::records("Nope")))]
#[case::unknown_attribute(
    Computation::new("bad").dep("x", DataDep::records_with("User", AttributeQuery::new().value("nope")))
)]
#[case::property_without_host(Computation::new("bad").dep("x", DataDep::property(AttributeQuery::all())))]
fn test_invalid_computations_are_rejected(mut engine: Engine, #[case] computation: Computation) {
    let err = engine.initialize_computations(vec![computation]).unwrap_err();
    assert!(matches!(err, EngineError::InvalidComputation { .. }), "{err}");
}

#[test]
fn test_sqlite_file_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", dir.path().join("data.sqlite").display());
    let config = DatabaseConfig::from_url(&url).unwrap();

    {
        let engine = Engine::open(definition(), &config).unwrap();
        engine
            .create("User", &payload(json!({"name": "kept", "teams": [{"name": "t"}]})))
            .unwrap();
    }

    let engine = Engine::open(definition(), &config).unwrap();
    let query = AttributeQuery::new()
        .value("name")
        .nested("teams", AttributeQuery::new().value("name"));
    let users = engine.find("User", None, &query, None).unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].get_value("name"), Some(&Value::from("kept")));

    let created = engine.create("User", &payload(json!({"name": "next"}))).unwrap();
    assert!(created.id() > users[0].id());
}

#[test]
fn test_engine_opens_from_config_file() {
    let dir = TempDir::new().unwrap();
    let database = dir.path().join("configured.sqlite");
    let config_path = dir.path().join(".reactive_er.json");
    let config = json!({
        "database": {"type": "sqlite", "path": database},
        "engine": {"log_sql": true}
    });
    std::fs::write(&config_path, config.to_string()).unwrap();

    let engine = Engine::open_configured(definition(), &config_path).unwrap();
    assert_eq!(engine.database().backend_name(), "Sqlite");
    assert!(engine.options().log_sql);
    engine.create("User", &payload(json!({"name": "a"}))).unwrap();
    assert!(database.exists());
}

#[rstest]
#[case(":memory:", DatabaseConfig::Memory)]
#[case("sqlite:///tmp/x.sqlite", DatabaseConfig::Sqlite { path: "/tmp/x.sqlite".into() })]
#[case("data.sqlite", DatabaseConfig::Sqlite { path: "data.sqlite".into() })]
fn test_database_urls(#[case] url: &str, #[case] expected: DatabaseConfig) {
    assert_eq!(DatabaseConfig::from_url(url).unwrap(), expected);
}

#[test]
fn test_unknown_url_scheme_is_rejected() {
    assert!(DatabaseConfig::from_url("mysql://host/db").is_err());
    assert!(DatabaseConfig::from_url("").is_err());
}
