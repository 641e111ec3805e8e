//! Shared test utilities for unit tests.
//!
//! Two schemas are used throughout:
//!
//! - [`user_team_definition`]: `User(name, age)` and `Team(name)` linked
//!   n:n through `User.teams <-> Team.members` with link attribute `role`
//! - [`full_definition`]: the above plus a symmetric `friends` relation, a
//!   combined 1:1 `Profile`, filtered `Adult`/`SeniorAdult` views, a relation
//!   to a filtered view (`Team.mentors`), a merged `Contact`, a filtered
//!   relation `Leadership` and a reliant 1:n `User.posts <-> Post.author`

use crate::db::open_mem_db;
use crate::db::schema::{
    Cardinality, DataType, EntityDef, PropertyDef, RelationDef, SchemaDefinition, SchemaMap,
};
use crate::engine::Engine;
use crate::queries::{MatchExp, Operator};

pub fn user_team_definition() -> SchemaDefinition {
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

pub fn full_definition() -> SchemaDefinition {
    user_team_definition()
        .entity(EntityDef::new("Profile").property("title", DataType::String))
        .entity(
            EntityDef::new("Post")
                .property("title", DataType::String)
                .with_property(PropertyDef::new("published", DataType::Bool).with_default(false)),
        )
        .relation(RelationDef::new(
            "User",
            "friends",
            "User",
            "friends",
            Cardinality::ManyToMany,
        ))
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
        .merged_entity(
            "Contact",
            vec![
                EntityDef::new("EmailContact").property("email", DataType::String),
                EntityDef::new("PhoneContact").property("phone", DataType::String),
            ],
        )
        .filtered_relation(
            "Leadership",
            "User_teams_members_Team",
            "leads",
            "leaders",
            MatchExp::eq("role", "leader"),
        )
}

pub fn user_team_schema() -> SchemaMap {
    SchemaMap::build(&user_team_definition()).expect("user/team schema should resolve")
}

pub fn full_schema() -> SchemaMap {
    SchemaMap::build(&full_definition()).expect("full schema should resolve")
}

/// Engine over a fresh in-memory SQLite database.
pub fn engine(definition: SchemaDefinition) -> Engine {
    let db = open_mem_db().expect("in-memory database should open");
    Engine::new(definition, db).expect("engine should start")
}
