//! End-to-end scenarios against an in-memory SQLite engine.

use reactive_er::db::open_mem_db;
use reactive_er::{
    AttributeQuery, Cardinality, DataType, Engine, EngineError, EntityDef, EventType, Field,
    MatchExp, Modifier, Mutation, Operator, Order, PropertyDef, Record, RelationDef,
    SchemaDefinition, Value,
};
use reactive_er::executor::with_transaction;
use rstest::{fixture, rstest};
use serde_json::json;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn definition() -> SchemaDefinition {
    SchemaDefinition::new()
        .entity(
            EntityDef::new("User")
                .property("name", DataType::String)
                .property("age", DataType::Int),
        )
        .entity(EntityDef::new("Team").property("name", DataType::String))
        .entity(EntityDef::new("Profile").property("title", DataType::String))
        .entity(
            EntityDef::new("Post")
                .property("title", DataType::String)
                .with_property(PropertyDef::new("published", DataType::Bool).with_default(false)),
        )
        .relation(
            RelationDef::new("User", "teams", "Team", "members", Cardinality::ManyToMany)
                .property("role", DataType::String),
        )
        .relation(RelationDef::new("User", "friends", "User", "friends", Cardinality::ManyToMany))
        .relation(
            RelationDef::new("User", "profile", "Profile", "owner", Cardinality::OneToOne).combined(),
        )
        .relation(
            RelationDef::new("User", "posts", "Post", "author", Cardinality::OneToMany).reliance(),
        )
        .filtered_entity("Adult", "User", MatchExp::atom("age", Operator::Gte, 18i64))
        .filtered_entity("SeniorAdult", "Adult", MatchExp::atom("age", Operator::Gte, 65i64))
        .relation(RelationDef::new(
            "Team",
            "mentors",
            "SeniorAdult",
            "mentoring",
            Cardinality::ManyToMany,
        ))
        .filtered_relation(
            "Leadership",
            "User_teams_members_Team",
            "leads",
            "leaders",
            MatchExp::eq("role", "leader"),
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

fn kinds(mutation: &Mutation) -> Vec<(EventType, String)> {
    mutation
        .events
        .iter()
        .map(|e| (e.event_type, e.record_name.clone()))
        .collect()
}

fn names(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.get_value("name").and_then(Value::as_str).map(str::to_string))
        .collect()
}

fn create_user(engine: &Engine, json: serde_json::Value) -> i64 {
    engine
        .create("User", &payload(json))
        .expect("user should be created")
        .id()
        .expect("created user has an id")
}

#[rstest]
fn test_link_query_and_update(engine: Engine) {
    let user = create_user(
        &engine,
        json!({"name": "aaa", "teams": [{"name": "teamA", "&": {"role": "leader"}}]}),
    );
    let link = "User_teams_members_Team";
    let by_source = MatchExp::eq("source.id", user);
    let query = AttributeQuery::new()
        .value("role")
        .nested("source", AttributeQuery::new().value("name"))
        .nested("target", AttributeQuery::new().value("name"));

    let found = engine.find(link, Some(&by_source), &query, None).unwrap();
    assert_eq!(found.len(), 1);
    let before = &found[0];
    assert_eq!(before.get_value("role"), Some(&Value::from("leader")));
    assert_eq!(
        before.path(&["source", "name"]).and_then(Field::as_value),
        Some(&Value::from("aaa"))
    );
    assert_eq!(
        before.path(&["target", "name"]).and_then(Field::as_value),
        Some(&Value::from("teamA"))
    );

    let updated = engine
        .update(link, &by_source, &payload(json!({"role": "member"})))
        .unwrap();
    assert_eq!(kinds(&updated)[0], (EventType::Update, link.to_string()));

    let after = engine.find_one(link, Some(&by_source), &query).unwrap().unwrap();
    assert_eq!(after.get_value("role"), Some(&Value::from("member")));
    assert_eq!(after.get("source"), before.get("source"));
    assert_eq!(after.get("target"), before.get("target"));
}

#[rstest]
fn test_nested_round_trip(engine: Engine) {
    let user = create_user(
        &engine,
        json!({
            "name": "aaa",
            "age": 30,
            "teams": [
                {"name": "teamA", "&": {"role": "leader"}},
                {"name": "teamB", "&": {"role": "member"}}
            ],
            "posts": [{"title": "hello"}]
        }),
    );

    let query = AttributeQuery::new()
        .values(["name", "age"])
        .nested(
            "teams",
            AttributeQuery::new()
                .value("name")
                .with_link(AttributeQuery::new().value("role")),
        )
        .nested("posts", AttributeQuery::new().values(["title", "published"]));
    let found = engine
        .find_one("User", Some(&MatchExp::eq("id", user)), &query)
        .unwrap()
        .unwrap();

    assert_eq!(found.get_value("age"), Some(&Value::Int(30)));
    let teams = found.get("teams").and_then(Field::as_records).unwrap();
    assert_eq!(names(teams), vec!["teamA", "teamB"]);
    let roles: Vec<&Value> = teams
        .iter()
        .filter_map(|t| t.path(&["&", "role"]).and_then(Field::as_value))
        .collect();
    assert_eq!(roles, vec![&Value::from("leader"), &Value::from("member")]);

    let posts = found.get("posts").and_then(Field::as_records).unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].get_value("title"), Some(&Value::from("hello")));
    assert_eq!(posts[0].get_value("published"), Some(&Value::Bool(false)));
}

#[rstest]
fn test_filtered_views_follow_base_rows(engine: Engine) {
    let young = create_user(&engine, json!({"name": "young", "age": 10}));
    let adult = create_user(&engine, json!({"name": "adult", "age": 20}));
    let senior = engine
        .create("User", &payload(json!({"name": "senior", "age": 70})))
        .unwrap();
    assert_eq!(
        kinds(&senior),
        vec![
            (EventType::Create, "User".to_string()),
            (EventType::Create, "Adult".to_string()),
            (EventType::Create, "SeniorAdult".to_string()),
        ]
    );

    let all = AttributeQuery::all();
    let adults = engine.find("Adult", None, &all, None).unwrap();
    let base = engine
        .find("User", Some(&MatchExp::atom("age", Operator::Gte, 18i64)), &all, None)
        .unwrap();
    assert_eq!(adults, base);
    assert_eq!(names(&engine.find("SeniorAdult", None, &all, None).unwrap()), vec!["senior"]);

    let left = engine
        .update("User", &MatchExp::eq("id", adult), &payload(json!({"age": 12})))
        .unwrap();
    assert_eq!(
        kinds(&left),
        vec![
            (EventType::Update, "User".to_string()),
            (EventType::Delete, "Adult".to_string()),
        ]
    );
    let entered = engine
        .update("User", &MatchExp::eq("id", young), &payload(json!({"age": 40})))
        .unwrap();
    assert_eq!(
        kinds(&entered),
        vec![
            (EventType::Update, "User".to_string()),
            (EventType::Create, "Adult".to_string()),
        ]
    );
    let stayed = engine
        .update("SeniorAdult", &MatchExp::all(), &payload(json!({"age": 71})))
        .unwrap();
    assert_eq!(
        kinds(&stayed),
        vec![
            (EventType::Update, "User".to_string()),
            (EventType::Update, "Adult".to_string()),
            (EventType::Update, "SeniorAdult".to_string()),
        ]
    );
}

#[rstest]
fn test_symmetric_relation_from_both_ends(engine: Engine) {
    let a = create_user(&engine, json!({"name": "a"}));
    let b = create_user(&engine, json!({"name": "b"}));
    create_user(&engine, json!({"name": "c"}));
    engine
        .update("User", &MatchExp::eq("id", a), &payload(json!({"friends": [{"id": b}]})))
        .unwrap();

    let query = AttributeQuery::new()
        .value("name")
        .nested("friends", AttributeQuery::new().value("name"));
    for (me, partner) in [(a, "b"), (b, "a")] {
        let found = engine
            .find_one("User", Some(&MatchExp::eq("id", me)), &query)
            .unwrap()
            .unwrap();
        let friends = found.get("friends").and_then(Field::as_records).unwrap();
        assert_eq!(names(friends), vec![partner]);
    }

    let befriended_b = engine
        .find("User", Some(&MatchExp::eq("friends.id", b)), &AttributeQuery::new().value("name"), None)
        .unwrap();
    assert_eq!(names(&befriended_b), vec!["a"]);
    let befriended_a = engine
        .find("User", Some(&MatchExp::eq("friends.name", "a")), &AttributeQuery::new().value("name"), None)
        .unwrap();
    assert_eq!(names(&befriended_a), vec!["b"]);
}

#[rstest]
fn test_reliance_cascade_reports_children_first(engine: Engine) {
    let user = create_user(
        &engine,
        json!({"name": "writer", "posts": [{"title": "p1"}, {"title": "p2"}]}),
    );
    let link = "User_posts_author_Post".to_string();

    let deleted = engine.delete("User", &MatchExp::eq("id", user)).unwrap();
    assert_eq!(
        kinds(&deleted),
        vec![
            (EventType::Delete, link.clone()),
            (EventType::Delete, link),
            (EventType::Delete, "Post".to_string()),
            (EventType::Delete, "Post".to_string()),
            (EventType::Delete, "User".to_string()),
        ]
    );
    assert!(engine.find("Post", None, &AttributeQuery::all(), None).unwrap().is_empty());
}

#[rstest]
fn test_deleting_team_removes_memberships(engine: Engine) {
    create_user(&engine, json!({"name": "a", "teams": [{"name": "t"}]}));
    let deleted = engine.delete("Team", &MatchExp::eq("name", "t")).unwrap();
    assert_eq!(
        kinds(&deleted),
        vec![
            (EventType::Delete, "User_teams_members_Team".to_string()),
            (EventType::Delete, "Team".to_string()),
        ]
    );
    let users = engine.find("User", None, &AttributeQuery::all(), None).unwrap();
    assert_eq!(names(&users), vec!["a"]);
}

#[rstest]
fn test_combined_replacement_keeps_one_live_combination(engine: Engine) {
    let user = create_user(&engine, json!({"name": "a", "profile": {"title": "first"}}));
    let replaced = engine
        .update(
            "User",
            &MatchExp::eq("id", user),
            &payload(json!({"profile": {"title": "second"}})),
        )
        .unwrap();
    let link = "User_profile_owner_Profile".to_string();
    let link_events: Vec<(EventType, String)> = kinds(&replaced)
        .into_iter()
        .filter(|(_, name)| *name == link)
        .collect();
    assert_eq!(
        link_events,
        vec![(EventType::Delete, link.clone()), (EventType::Create, link.clone())]
    );

    let query = AttributeQuery::new()
        .value("name")
        .nested("profile", AttributeQuery::new().value("title"));
    let found = engine
        .find_one("User", Some(&MatchExp::eq("id", user)), &query)
        .unwrap()
        .unwrap();
    assert_eq!(
        found.path(&["profile", "title"]).and_then(Field::as_value),
        Some(&Value::from("second"))
    );
    assert_eq!(engine.find(&link, None, &AttributeQuery::all(), None).unwrap().len(), 1);
    assert_eq!(engine.find("Profile", None, &AttributeQuery::all(), None).unwrap().len(), 2);

    let unlinked = engine
        .update("User", &MatchExp::eq("id", user), &payload(json!({"profile": null})))
        .unwrap();
    assert!(kinds(&unlinked).contains(&(EventType::Delete, link.clone())));
    assert!(engine.find(&link, None, &AttributeQuery::all(), None).unwrap().is_empty());
    assert_eq!(engine.find("Profile", None, &AttributeQuery::all(), None).unwrap().len(), 2);
}

#[rstest]
fn test_filtered_relation_and_filtered_target(engine: Engine) {
    let leader = create_user(
        &engine,
        json!({"name": "lead", "teams": [{"name": "teamA", "&": {"role": "leader"}}]}),
    );
    let query = AttributeQuery::new().nested("leads", AttributeQuery::new().value("name"));
    let found = engine
        .find_one("User", Some(&MatchExp::eq("id", leader)), &query)
        .unwrap()
        .unwrap();
    let leads = found.get("leads").and_then(Field::as_records).unwrap();
    assert_eq!(names(leads), vec!["teamA"]);

    let team = engine
        .create("Team", &payload(json!({"name": "mentored", "mentors": [{"name": "old", "age": 80}]})))
        .unwrap();
    let mentors = engine
        .find_one(
            "Team",
            Some(&MatchExp::eq("id", team.id().unwrap())),
            &AttributeQuery::new().nested("mentors", AttributeQuery::new().value("name")),
        )
        .unwrap()
        .unwrap();
    assert_eq!(
        names(mentors.get("mentors").and_then(Field::as_records).unwrap()),
        vec!["old"]
    );

    let err = engine
        .create("Team", &payload(json!({"name": "x", "mentors": [{"id": leader}]})))
        .unwrap_err();
    assert!(matches!(err, EngineError::RecordNotFound { .. }));

    let err = engine
        .update("User", &MatchExp::eq("id", leader), &payload(json!({"leads": null})))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidPayload { .. }));
}

#[rstest]
fn test_link_paths_and_existence(engine: Engine) {
    create_user(&engine, json!({"name": "lead", "teams": [{"name": "t1", "&": {"role": "leader"}}]}));
    create_user(&engine, json!({"name": "member", "teams": [{"name": "t2", "&": {"role": "member"}}]}));
    create_user(&engine, json!({"name": "loner"}));

    let leaders = engine
        .find(
            "User",
            Some(&MatchExp::eq("teams.&.role", "leader")),
            &AttributeQuery::new().value("name"),
            None,
        )
        .unwrap();
    assert_eq!(names(&leaders), vec!["lead"]);

    let in_teams = engine
        .find(
            "User",
            Some(&MatchExp::exist("teams", None)),
            &AttributeQuery::new().value("name"),
            None,
        )
        .unwrap();
    assert_eq!(names(&in_teams), vec!["lead", "member"]);

    let in_t2 = engine
        .find(
            "User",
            Some(&MatchExp::exist("teams", Some(MatchExp::eq("name", "t2")))),
            &AttributeQuery::new().value("name"),
            None,
        )
        .unwrap();
    assert_eq!(names(&in_t2), vec!["member"]);
}

#[rstest]
fn test_modifiers(engine: Engine) {
    for (name, age) in [("a", 30), ("b", 10), ("c", 20), ("d", 40)] {
        create_user(&engine, json!({"name": name, "age": age}));
    }
    let modifier = Modifier::new().order_by("age", Order::Desc).limit(2).offset(1);
    let found = engine
        .find("User", None, &AttributeQuery::new().value("name"), Some(&modifier))
        .unwrap();
    assert_eq!(names(&found), vec!["a", "c"]);
}

#[rstest]
#[case::value_for_relation(json!({"name": "a", "teams": "x"}))]
#[case::wrong_type(json!({"name": "a", "age": "old"}))]
#[case::hidden_attribute(json!({"name": "a", "friends:source": [{"name": "b"}]}))]
#[case::many_into_one(json!({"name": "a", "profile": [{"title": "x"}]}))]
fn test_invalid_payloads(engine: Engine, #[case] body: serde_json::Value) {
    let err = engine.create("User", &payload(body)).unwrap_err();
    assert!(matches!(err, EngineError::InvalidPayload { .. }), "{err}");
    assert!(engine.find("User", None, &AttributeQuery::all(), None).unwrap().is_empty());
}

#[rstest]
fn test_add_and_remove_link(engine: Engine) {
    let user = create_user(&engine, json!({"name": "a"}));
    let team = engine
        .create("Team", &payload(json!({"name": "t"})))
        .unwrap()
        .id()
        .unwrap();
    let link = "User_teams_members_Team";
    let added = engine
        .add_link(link, user, team, &payload(json!({"role": "owner"})))
        .unwrap();
    assert_eq!(kinds(&added), vec![(EventType::Create, link.to_string())]);

    let removed = engine
        .remove_link(link, &MatchExp::eq("target.id", team))
        .unwrap();
    assert_eq!(kinds(&removed), vec![(EventType::Delete, link.to_string())]);
    assert_eq!(removed.records[0].get_value("role"), Some(&Value::from("owner")));
}

#[rstest]
#[case::unlink_all(json!({"teams": null}), vec![(EventType::Delete, "User_teams_members_Team")])]
#[case::link_more(json!({"teams": [{"name": "teamB"}]}), vec![
    (EventType::Create, "Team"),
    (EventType::Create, "User_teams_members_Team"),
])]
fn test_relation_only_update_leaves_entity_silent(
    engine: Engine,
    #[case] change: serde_json::Value,
    #[case] expected: Vec<(EventType, &str)>,
) {
    let user = create_user(&engine, json!({"name": "a", "teams": [{"name": "teamA"}]}));
    let updated = engine
        .update("User", &MatchExp::eq("id", user), &payload(change))
        .unwrap();
    let expected: Vec<(EventType, String)> = expected
        .into_iter()
        .map(|(kind, name)| (kind, name.to_string()))
        .collect();
    assert_eq!(kinds(&updated), expected);
}

fn chain_definition() -> SchemaDefinition {
    SchemaDefinition::new()
        .entity(EntityDef::new("A").property("n", DataType::String))
        .entity(EntityDef::new("B").property("n", DataType::String))
        .entity(EntityDef::new("C").property("n", DataType::String))
        .relation(RelationDef::new("A", "b", "B", "a", Cardinality::OneToOne).combined())
        .relation(RelationDef::new("B", "c", "C", "b", Cardinality::OneToOne).combined())
}

#[fixture]
fn chain_engine() -> Engine {
    let db = open_mem_db().expect("in-memory database should open");
    Engine::new(chain_definition(), db).expect("engine should start")
}

fn chain_of(engine: &Engine, b: &str) -> (Option<Value>, Option<Value>) {
    let query = AttributeQuery::new()
        .value("n")
        .nested("a", AttributeQuery::new().value("n"))
        .nested("c", AttributeQuery::new().value("n"));
    let found = engine
        .find_one("B", Some(&MatchExp::eq("n", b)), &query)
        .unwrap()
        .expect("B should exist");
    let end = |path: &[&str]| found.path(path).and_then(Field::as_value).cloned();
    (end(&["a", "n"]), end(&["c", "n"]))
}

#[rstest]
fn test_nested_combined_chain_is_created_whole(chain_engine: Engine) {
    chain_engine
        .create("A", &payload(json!({"n": "a1", "b": {"n": "b1", "c": {"n": "c1"}}})))
        .unwrap();
    assert_eq!(
        chain_of(&chain_engine, "b1"),
        (Some(Value::from("a1")), Some(Value::from("c1")))
    );
}

#[rstest]
fn test_moving_combined_member_keeps_its_own_link(chain_engine: Engine) {
    chain_engine
        .create("A", &payload(json!({"n": "a1", "b": {"n": "b1", "c": {"n": "c1"}}})))
        .unwrap();
    let a2 = chain_engine
        .create("A", &payload(json!({"n": "a2"})))
        .unwrap()
        .id()
        .unwrap();
    let b1 = chain_engine
        .find_one("B", Some(&MatchExp::eq("n", "b1")), &AttributeQuery::new())
        .unwrap()
        .and_then(|r| r.id())
        .unwrap();

    let moved = chain_engine
        .update("A", &MatchExp::eq("id", a2), &payload(json!({"b": {"id": b1}})))
        .unwrap();
    assert_eq!(
        kinds(&moved),
        vec![
            (EventType::Delete, "A_b_a_B".to_string()),
            (EventType::Create, "A_b_a_B".to_string()),
        ]
    );
    assert_eq!(
        chain_of(&chain_engine, "b1"),
        (Some(Value::from("a2")), Some(Value::from("c1")))
    );
    assert_eq!(chain_engine.find("B_c_b_C", None, &AttributeQuery::all(), None).unwrap().len(), 1);
    assert_eq!(chain_engine.find("A", None, &AttributeQuery::all(), None).unwrap().len(), 2);
}

#[rstest]
fn test_evicted_combined_member_leaves_with_its_own_link(chain_engine: Engine) {
    let a1 = chain_engine
        .create("A", &payload(json!({"n": "a1", "b": {"n": "b1", "c": {"n": "c1"}}})))
        .unwrap()
        .id()
        .unwrap();

    let replaced = chain_engine
        .update("A", &MatchExp::eq("id", a1), &payload(json!({"b": {"n": "b2"}})))
        .unwrap();
    let link_events: Vec<(EventType, String)> = kinds(&replaced)
        .into_iter()
        .filter(|(_, name)| name.contains('_'))
        .collect();
    assert_eq!(
        link_events,
        vec![
            (EventType::Delete, "A_b_a_B".to_string()),
            (EventType::Create, "A_b_a_B".to_string()),
        ]
    );

    assert_eq!(chain_of(&chain_engine, "b1"), (None, Some(Value::from("c1"))));
    assert_eq!(chain_of(&chain_engine, "b2"), (Some(Value::from("a1")), None));
    assert_eq!(chain_engine.find("B_c_b_C", None, &AttributeQuery::all(), None).unwrap().len(), 1);
    assert_eq!(chain_engine.find("C", None, &AttributeQuery::all(), None).unwrap().len(), 1);
}

#[rstest]
fn test_concurrent_transactions_stay_isolated(engine: Engine) {
    let (entered, inside) = mpsc::channel();
    thread::scope(|s| {
        let engine = &engine;
        let outer = s.spawn(move || {
            with_transaction(engine.database(), || {
                engine.create("User", &payload(json!({"name": "discarded"})))?;
                entered.send(()).ok();
                thread::sleep(Duration::from_millis(50));
                Err::<(), _>(EngineError::NotInitialized)
            })
        });
        inside.recv().unwrap();
        engine.create("User", &payload(json!({"name": "kept"}))).unwrap();
        assert!(outer.join().unwrap().is_err());
    });

    let users = engine.find("User", None, &AttributeQuery::all(), None).unwrap();
    assert_eq!(names(&users), vec!["kept"]);
}
