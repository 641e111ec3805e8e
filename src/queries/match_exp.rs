//! Boolean match expressions over attribute paths.
//!
//! A [`MatchExp`] is an AND/OR/NOT tree whose leaves are [`Condition`]s:
//! `{ path, operator, operand }`. Paths are attribute names walked from the
//! root record type; every intermediate segment must be a relation attribute
//! (or the `&` marker selecting the link record of the previous relation
//! step). The final segment is a value attribute, or a relation attribute
//! matched with [`Operator::Exist`].
//!
//! Expressions are plain data: construct them per call, compile them with
//! [`MatchCompiler`](super::MatchCompiler).

use std::fmt;

use crate::db::schema::{PathEnd, RecordId, SchemaMap};
use crate::error::{EngineError, Result};
use crate::value::{Value, LINK_KEY};

/// Comparison operator of a condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
    In,
    Between,
    /// `not` with a null operand means "is not null"; otherwise "not equal".
    Not,
    /// Existence of a related record, optionally matching a sub-expression.
    Exist,
    /// Driver-specific operator (e.g. `contains` on JSON columns).
    Custom(String),
}

impl Operator {
    pub fn parse(op: &str) -> Self {
        match op {
            "=" => Operator::Eq,
            "!=" | "<>" => Operator::NotEq,
            ">" => Operator::Gt,
            "<" => Operator::Lt,
            ">=" => Operator::Gte,
            "<=" => Operator::Lte,
            "like" => Operator::Like,
            "in" => Operator::In,
            "between" => Operator::Between,
            "not" => Operator::Not,
            "exist" => Operator::Exist,
            other => Operator::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::Like => "like",
            Operator::In => "in",
            Operator::Between => "between",
            Operator::Not => "not",
            Operator::Exist => "exist",
            Operator::Custom(op) => op,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side of a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Value(Value),
    List(Vec<Value>),
    Range(Value, Value),
    /// Sub-expression rooted at the related record (for `exist`).
    Match(Box<MatchExp>),
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Value(v)
    }
}

impl From<&str> for Operand {
    fn from(v: &str) -> Self {
        Operand::Value(v.into())
    }
}

impl From<String> for Operand {
    fn from(v: String) -> Self {
        Operand::Value(v.into())
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Value(v.into())
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Operand::Value(v.into())
    }
}

impl From<bool> for Operand {
    fn from(v: bool) -> Self {
        Operand::Value(v.into())
    }
}

impl From<Vec<Value>> for Operand {
    fn from(v: Vec<Value>) -> Self {
        Operand::List(v)
    }
}

impl From<MatchExp> for Operand {
    fn from(v: MatchExp) -> Self {
        Operand::Match(Box::new(v))
    }
}

/// A single `path operator operand` test.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub path: Vec<String>,
    pub operator: Operator,
    pub operand: Operand,
}

impl Condition {
    pub fn key(&self) -> String {
        self.path.join(".")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchExp {
    Atom(Condition),
    And(Vec<MatchExp>),
    Or(Vec<MatchExp>),
    Not(Box<MatchExp>),
}

pub(crate) fn split_path(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}

impl MatchExp {
    pub fn atom(path: &str, operator: Operator, operand: impl Into<Operand>) -> Self {
        MatchExp::Atom(Condition {
            path: split_path(path),
            operator,
            operand: operand.into(),
        })
    }

    pub fn from_path(path: Vec<String>, operator: Operator, operand: Operand) -> Self {
        MatchExp::Atom(Condition {
            path,
            operator,
            operand,
        })
    }

    pub fn eq(path: &str, value: impl Into<Value>) -> Self {
        Self::atom(path, Operator::Eq, Operand::Value(value.into()))
    }

    pub fn not_null(path: &str) -> Self {
        Self::atom(path, Operator::Not, Operand::Value(Value::Null))
    }

    pub fn is_in(path: &str, values: Vec<Value>) -> Self {
        Self::atom(path, Operator::In, Operand::List(values))
    }

    pub fn between(path: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::atom(path, Operator::Between, Operand::Range(low.into(), high.into()))
    }

    pub fn exist(path: &str, sub: Option<MatchExp>) -> Self {
        let operand = sub.map(Operand::from).unwrap_or(Operand::None);
        Self::atom(path, Operator::Exist, operand)
    }

    /// Matches everything.
    pub fn all() -> Self {
        MatchExp::And(Vec::new())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, MatchExp::And(items) if items.is_empty())
    }

    pub fn and(self, other: MatchExp) -> Self {
        match (self, other) {
            (a, b) if a.is_all() => b,
            (a, b) if b.is_all() => a,
            (MatchExp::And(mut a), MatchExp::And(b)) => {
                a.extend(b);
                MatchExp::And(a)
            }
            (MatchExp::And(mut a), b) => {
                a.push(b);
                MatchExp::And(a)
            }
            (a, b) => MatchExp::And(vec![a, b]),
        }
    }

    pub fn or(self, other: MatchExp) -> Self {
        match (self, other) {
            (MatchExp::Or(mut a), MatchExp::Or(b)) => {
                a.extend(b);
                MatchExp::Or(a)
            }
            (MatchExp::Or(mut a), b) => {
                a.push(b);
                MatchExp::Or(a)
            }
            (a, b) => MatchExp::Or(vec![a, b]),
        }
    }

    pub fn negate(self) -> Self {
        match self {
            MatchExp::Not(inner) => *inner,
            other => MatchExp::Not(Box::new(other)),
        }
    }

    /// AND-combine an optional expression with this one.
    pub fn and_option(self, other: Option<&MatchExp>) -> Self {
        match other {
            Some(other) => self.and(other.clone()),
            None => self,
        }
    }

    pub fn atoms(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_atoms(&mut out);
        out
    }

    fn collect_atoms<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            MatchExp::Atom(c) => out.push(c),
            MatchExp::And(items) | MatchExp::Or(items) => {
                items.iter().for_each(|i| i.collect_atoms(out))
            }
            MatchExp::Not(inner) => inner.collect_atoms(out),
        }
    }

    /// Replace every atom by the expression `f` returns for it.
    pub fn map_atoms<F>(&self, f: &mut F) -> Result<MatchExp>
    where
        F: FnMut(&Condition) -> Result<MatchExp>,
    {
        Ok(match self {
            MatchExp::Atom(c) => f(c)?,
            MatchExp::And(items) => MatchExp::And(
                items
                    .iter()
                    .map(|i| i.map_atoms(f))
                    .collect::<Result<_>>()?,
            ),
            MatchExp::Or(items) => MatchExp::Or(
                items
                    .iter()
                    .map(|i| i.map_atoms(f))
                    .collect::<Result<_>>()?,
            ),
            MatchExp::Not(inner) => MatchExp::Not(Box::new(inner.map_atoms(f)?)),
        })
    }

    /// Lengthen every path with `prefix`.
    pub fn prefix(&self, prefix: &[String]) -> MatchExp {
        match self {
            MatchExp::Atom(c) => {
                let mut path = prefix.to_vec();
                path.extend(c.path.iter().cloned());
                MatchExp::Atom(Condition {
                    path,
                    operator: c.operator.clone(),
                    operand: c.operand.clone(),
                })
            }
            MatchExp::And(items) => MatchExp::And(items.iter().map(|i| i.prefix(prefix)).collect()),
            MatchExp::Or(items) => MatchExp::Or(items.iter().map(|i| i.prefix(prefix)).collect()),
            MatchExp::Not(inner) => MatchExp::Not(Box::new(inner.prefix(prefix))),
        }
    }

    /// Whether any condition needs to leave the root record.
    pub fn has_related_paths(&self) -> bool {
        self.atoms()
            .iter()
            .any(|c| c.path.len() > 1 || c.operator == Operator::Exist)
    }

    /// Re-root an expression across a relation attribute.
    ///
    /// Given an expression rooted at `record` and a relation attribute of
    /// `record` leading to B, produce the equivalent expression rooted at B:
    /// conditions starting with `attribute` drop that segment, all others are
    /// prefixed with the reverse attribute path (which leads from B back to
    /// `record`).
    pub fn rebase(&self, schema: &SchemaMap, record: RecordId, attribute: &str) -> Result<MatchExp> {
        let info = schema.attribute(record, attribute)?;
        let relation = info.as_relation().ok_or_else(|| {
            EngineError::invalid_match(
                &schema.record(record).name,
                format!("cannot rebase across value attribute '{attribute}'"),
            )
        })?;
        let reverse = relation.reverse.clone();

        self.map_atoms(&mut |c: &Condition| {
            if c.path.first().map(String::as_str) != Some(attribute) {
                let mut path = reverse.clone();
                path.extend(c.path.iter().cloned());
                return Ok(MatchExp::from_path(path, c.operator.clone(), c.operand.clone()));
            }
            let rest = &c.path[1..];
            if rest.is_empty() {
                // `attribute exist (sub)` rooted at the target is `sub` itself.
                return Ok(match (&c.operator, &c.operand) {
                    (Operator::Exist, Operand::Match(sub)) => (**sub).clone(),
                    (Operator::Exist, _) => MatchExp::all(),
                    _ => {
                        return Err(EngineError::invalid_match(
                            &schema.record(record).name,
                            format!("operator '{}' is not valid on relation '{attribute}'", c.operator),
                        ));
                    }
                });
            }
            let mut path = Vec::with_capacity(rest.len() + reverse.len());
            if rest[0] == LINK_KEY {
                path.extend(reverse.iter().cloned());
            }
            path.extend(rest.iter().cloned());
            Ok(MatchExp::from_path(path, c.operator.clone(), c.operand.clone()))
        })
    }

    /// Check paths, operators and operand arity against the schema.
    pub fn validate(&self, schema: &SchemaMap, record: RecordId) -> Result<()> {
        let name = &schema.record(record).name;
        for condition in self.atoms() {
            if condition.path.is_empty() || condition.path.iter().any(String::is_empty) {
                return Err(EngineError::invalid_match(name, "empty path segment"));
            }
            let resolved = schema.resolve_path(record, &condition.path)?;
            let key = condition.key();
            match resolved.end {
                PathEnd::Value(_) => check_value_operand(name, &key, condition)?,
                PathEnd::Relation(attr) => {
                    if condition.operator != Operator::Exist {
                        return Err(EngineError::invalid_match(
                            name,
                            format!("'{key}' is a relation; only 'exist' applies to it"),
                        ));
                    }
                    match &condition.operand {
                        Operand::None => {}
                        Operand::Match(sub) => {
                            let target = attr.as_relation().map(|r| r.target).unwrap_or(record);
                            sub.validate(schema, target)?;
                        }
                        _ => {
                            return Err(EngineError::invalid_match(
                                name,
                                format!("'exist' on '{key}' takes a sub-expression or nothing"),
                            ));
                        }
                    }
                }
                PathEnd::Link(_) => {
                    return Err(EngineError::invalid_match(
                        name,
                        format!("'{key}' ends at a link marker; name a link attribute"),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn check_value_operand(record: &str, key: &str, c: &Condition) -> Result<()> {
    let ok = match (&c.operator, &c.operand) {
        (Operator::Exist, _) => false,
        (Operator::In, Operand::List(_)) => true,
        (Operator::Between, Operand::Range(low, high)) => !low.is_null() && !high.is_null(),
        (Operator::Eq | Operator::NotEq | Operator::Not, Operand::Value(_)) => true,
        (
            Operator::Gt | Operator::Lt | Operator::Gte | Operator::Lte | Operator::Like,
            Operand::Value(v),
        ) => !v.is_null(),
        (Operator::Custom(_), Operand::Value(_) | Operand::List(_)) => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(EngineError::invalid_match(
            record,
            format!("operator '{}' on '{key}' has an invalid operand {:?}", c.operator, c.operand),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::user_team_schema;

    #[test]
    fn test_and_flattens_and_drops_all() {
        let exp = MatchExp::eq("a", 1i64)
            .and(MatchExp::all())
            .and(MatchExp::eq("b", 2i64));
        assert_eq!(exp.atoms().len(), 2);
        assert!(matches!(exp, MatchExp::And(ref items) if items.len() == 2));
    }

    #[test]
    fn test_prefix() {
        let exp = MatchExp::eq("name", "x").prefix(&["team".to_string()]);
        assert_eq!(exp.atoms()[0].path, vec!["team", "name"]);
    }

    #[test]
    fn test_negate_twice_is_identity() {
        let exp = MatchExp::eq("a", 1i64);
        assert_eq!(exp.clone().negate().negate(), exp);
    }

    #[test]
    fn test_rebase_shortens_and_lengthens() {
        let schema = user_team_schema();
        let user = schema.record_id("User").unwrap();
        let exp = MatchExp::eq("teams.name", "A").and(MatchExp::eq("name", "u"));

        let rebased = exp.rebase(&schema, user, "teams").unwrap();
        let paths: Vec<Vec<String>> = rebased.atoms().iter().map(|c| c.path.clone()).collect();
        assert_eq!(paths, vec![vec!["name".to_string()], vec!["members".to_string(), "name".to_string()]]);
    }

    #[test]
    fn test_rebase_exist_becomes_sub_expression() {
        let schema = user_team_schema();
        let user = schema.record_id("User").unwrap();
        let exp = MatchExp::exist("teams", Some(MatchExp::eq("name", "A")));
        let rebased = exp.rebase(&schema, user, "teams").unwrap();
        assert_eq!(rebased, MatchExp::eq("name", "A"));
    }

    #[test]
    fn test_rebase_link_path_keeps_link_marker() {
        let schema = user_team_schema();
        let user = schema.record_id("User").unwrap();
        let exp = MatchExp::eq("teams.&.role", "leader");
        let rebased = exp.rebase(&schema, user, "teams").unwrap();
        assert_eq!(rebased.atoms()[0].path, vec!["members", "&", "role"]);
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        let schema = user_team_schema();
        let user = schema.record_id("User").unwrap();
        let exp = MatchExp::eq("teams.name", "A")
            .and(MatchExp::is_in("name", vec!["a".into(), "b".into()]))
            .and(MatchExp::between("age", 1i64, 9i64))
            .and(MatchExp::not_null("teams.&.role"))
            .and(MatchExp::exist("teams", Some(MatchExp::eq("name", "A"))));
        exp.validate(&schema, user).unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        let schema = user_team_schema();
        let user = schema.record_id("User").unwrap();

        let unknown = MatchExp::eq("nope", 1i64).validate(&schema, user);
        assert!(matches!(unknown, Err(EngineError::UnknownAttribute { .. })));

        let through_value = MatchExp::eq("name.x", 1i64).validate(&schema, user);
        assert!(matches!(through_value, Err(EngineError::InvalidMatch { .. })));

        let eq_on_relation = MatchExp::eq("teams", 1i64).validate(&schema, user);
        assert!(matches!(eq_on_relation, Err(EngineError::InvalidMatch { .. })));

        let in_without_list = MatchExp::atom("name", Operator::In, "a").validate(&schema, user);
        assert!(matches!(in_without_list, Err(EngineError::InvalidMatch { .. })));

        let gt_null = MatchExp::atom("age", Operator::Gt, Value::Null).validate(&schema, user);
        assert!(matches!(gt_null, Err(EngineError::InvalidMatch { .. })));
    }

    #[test]
    fn test_operator_parse_round_trip() {
        for op in ["=", "!=", ">", "<", ">=", "<=", "like", "in", "between", "not", "exist", "contains"] {
            assert_eq!(Operator::parse(op).as_str(), op);
        }
    }
}
