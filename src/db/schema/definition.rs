//! Schema definition types.
//!
//! These are the user-facing, unresolved descriptions of entities and
//! relations. [`SchemaMap::build`](super::SchemaMap::build) validates them and
//! turns them into the resolved arena the rest of the engine consults.

use crate::queries::MatchExp;
use crate::value::Value;

/// Represents a column data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// String/text data
    String,
    /// Integer data
    Int,
    /// Floating point data
    Float,
    /// Boolean data
    Bool,
    /// Arbitrary JSON document
    Json,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Bool => "bool",
            DataType::Json => "json",
        }
    }
}

/// Relation cardinality, read from source to target.
///
/// `OneToMany` means one source links many targets: the source-side
/// attribute is a collection, the target-side attribute a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl Cardinality {
    /// Whether the source-side attribute holds many targets.
    pub fn source_many(&self) -> bool {
        matches!(self, Cardinality::OneToMany | Cardinality::ManyToMany)
    }

    /// Whether the target-side attribute holds many sources.
    pub fn target_many(&self) -> bool {
        matches!(self, Cardinality::ManyToOne | Cardinality::ManyToMany)
    }
}

/// A value attribute of an entity or relation.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
    pub name: String,
    pub data_type: DataType,
    /// Value written on create when the payload omits the attribute.
    pub default: Option<Value>,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityDef {
    pub name: String,
    pub properties: Vec<PropertyDef>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    pub fn property(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.properties.push(PropertyDef::new(name, data_type));
        self
    }

    pub fn with_property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }
}

/// A relation between two entities, stored as a link record.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDef {
    /// Link record name. Defaults to
    /// `{source}_{source_property}_{target_property}_{target}`.
    pub name: Option<String>,
    pub source: String,
    pub source_property: String,
    pub target: String,
    pub target_property: String,
    pub cardinality: Cardinality,
    pub properties: Vec<PropertyDef>,
    /// Store source, target and link in one physical row (1:1 only).
    pub combined: bool,
    /// Targets live and die with their source.
    pub reliance: bool,
}

impl RelationDef {
    pub fn new(
        source: impl Into<String>,
        source_property: impl Into<String>,
        target: impl Into<String>,
        target_property: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            name: None,
            source: source.into(),
            source_property: source_property.into(),
            target: target.into(),
            target_property: target_property.into(),
            cardinality,
            properties: Vec::new(),
            combined: false,
            reliance: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn property(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.properties.push(PropertyDef::new(name, data_type));
        self
    }

    pub fn with_property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }

    pub fn combined(mut self) -> Self {
        self.combined = true;
        self
    }

    pub fn reliance(mut self) -> Self {
        self.reliance = true;
        self
    }

    /// Resolved link record name.
    pub fn link_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            format!(
                "{}_{}_{}_{}",
                self.source, self.source_property, self.target_property, self.target
            )
        })
    }

    /// Self-relation whose two attribute names coincide.
    pub fn is_symmetric(&self) -> bool {
        self.source == self.target && self.source_property == self.target_property
    }
}

/// An entity defined as the subset of a base entity matching `filter`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredEntityDef {
    pub name: String,
    pub base: String,
    pub filter: MatchExp,
}

/// A relation defined as the subset of a base relation's links matching
/// `filter` (evaluated on the link record), exposed through its own pair of
/// attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredRelationDef {
    pub name: String,
    pub base: String,
    pub source_property: String,
    pub target_property: String,
    pub filter: MatchExp,
}

/// Several entities sharing one table, told apart by the `__input_type`
/// discriminator. Each input becomes a filtered view of the merged entity.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedEntityDef {
    pub name: String,
    pub inputs: Vec<EntityDef>,
}

/// Complete, unresolved schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDefinition {
    pub entities: Vec<EntityDef>,
    pub relations: Vec<RelationDef>,
    pub filtered_entities: Vec<FilteredEntityDef>,
    pub filtered_relations: Vec<FilteredRelationDef>,
    pub merged_entities: Vec<MergedEntityDef>,
}

impl SchemaDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, entity: EntityDef) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn filtered_entity(
        mut self,
        name: impl Into<String>,
        base: impl Into<String>,
        filter: MatchExp,
    ) -> Self {
        self.filtered_entities.push(FilteredEntityDef {
            name: name.into(),
            base: base.into(),
            filter,
        });
        self
    }

    pub fn filtered_relation(
        mut self,
        name: impl Into<String>,
        base: impl Into<String>,
        source_property: impl Into<String>,
        target_property: impl Into<String>,
        filter: MatchExp,
    ) -> Self {
        self.filtered_relations.push(FilteredRelationDef {
            name: name.into(),
            base: base.into(),
            source_property: source_property.into(),
            target_property: target_property.into(),
            filter,
        });
        self
    }

    pub fn merged_entity(mut self, name: impl Into<String>, inputs: Vec<EntityDef>) -> Self {
        self.merged_entities.push(MergedEntityDef {
            name: name.into(),
            inputs,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_link_name() {
        let relation = RelationDef::new("User", "teams", "Team", "members", Cardinality::ManyToMany);
        assert_eq!(relation.link_name(), "User_teams_members_Team");
        assert_eq!(relation.clone().named("Membership").link_name(), "Membership");
    }

    #[test]
    fn test_symmetric_detection() {
        let friends = RelationDef::new("User", "friends", "User", "friends", Cardinality::ManyToMany);
        let mentor = RelationDef::new("User", "mentor", "User", "mentees", Cardinality::ManyToOne);
        assert!(friends.is_symmetric());
        assert!(!mentor.is_symmetric());
    }

    #[test]
    fn test_cardinality_sides() {
        assert!(Cardinality::OneToMany.source_many());
        assert!(!Cardinality::OneToMany.target_many());
        assert!(Cardinality::ManyToOne.target_many());
        assert!(!Cardinality::OneToOne.source_many());
        assert!(!Cardinality::OneToOne.target_many());
    }

    #[test]
    fn test_property_default() {
        let property = PropertyDef::new("score", DataType::Int).with_default(0i64);
        assert_eq!(property.default, Some(Value::Int(0)));
    }
}
