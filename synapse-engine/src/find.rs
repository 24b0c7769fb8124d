//! The `find` query DSL.
//!
//! A find combines up to three restrictions — `like` (vector similarity),
//! `where` (metadata predicates), `connected` (graph neighborhood) — with
//! pagination. Restrictions intersect; results are ranked when `like` is
//! present and insertion-ordered otherwise.

use serde_json::Value;
use synapse_core::{Noun, Result, SynapseError, SynapseId, VerbType};
use synapse_index::Filter;

/// Traversal direction for the `connected` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Out,
    In,
    Any,
}

/// Graph restriction: neighbors of `from`, optionally by verb.
#[derive(Debug, Clone)]
pub struct Connected {
    pub from: SynapseId,
    pub verb: Option<VerbType>,
    pub direction: Direction,
}

/// A parsed find query.
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    /// Rank by similarity to this text
    pub like: Option<String>,
    /// Metadata predicate tree
    pub filter: Option<Filter>,
    /// Graph neighborhood restriction
    pub connected: Option<Connected>,
    pub limit: usize,
    pub offset: usize,
}

/// Default page size when the query does not set one.
pub const DEFAULT_LIMIT: usize = 50;

impl FindQuery {
    pub fn new() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            ..Default::default()
        }
    }

    pub fn like(mut self, text: impl Into<String>) -> Self {
        self.like = Some(text.into());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn connected(mut self, connected: Connected) -> Self {
        self.connected = Some(connected);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Parse the JSON form. Recognized keys: `like`, `where`, `connected`,
    /// `limit`, `offset`; any other key is treated as a `where` field, so
    /// `{"type": "Product"}` filters on the indexed type field directly.
    pub fn from_json(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(SynapseError::invalid_input("find query must be an object"));
        };

        let mut query = FindQuery::new();
        let mut where_clause = serde_json::Map::new();

        for (key, entry) in map {
            match key.as_str() {
                "like" => {
                    query.like = Some(
                        entry
                            .as_str()
                            .ok_or_else(|| SynapseError::invalid_input("like expects a string"))?
                            .to_string(),
                    );
                }
                "where" => {
                    query.filter = Some(Filter::from_json(entry)?);
                }
                "connected" => {
                    query.connected = Some(Self::parse_connected(entry)?);
                }
                "limit" => {
                    query.limit = entry
                        .as_u64()
                        .ok_or_else(|| SynapseError::invalid_input("limit expects an integer"))?
                        as usize;
                }
                "offset" => {
                    query.offset = entry
                        .as_u64()
                        .ok_or_else(|| SynapseError::invalid_input("offset expects an integer"))?
                        as usize;
                }
                _ => {
                    where_clause.insert(key.clone(), entry.clone());
                }
            }
        }

        if !where_clause.is_empty() {
            let extra = Filter::from_json(&Value::Object(where_clause))?;
            query.filter = Some(match query.filter.take() {
                Some(existing) => Filter::And(vec![existing, extra]),
                None => extra,
            });
        }

        Ok(query)
    }

    fn parse_connected(value: &Value) -> Result<Connected> {
        let Value::Object(map) = value else {
            return Err(SynapseError::invalid_input("connected expects an object"));
        };
        let from = map
            .get("from")
            .and_then(Value::as_str)
            .ok_or_else(|| SynapseError::invalid_input("connected.from is required"))?;
        let from = SynapseId::parse(from)
            .map_err(|_| SynapseError::invalid_input("connected.from must be an entity id"))?;

        let verb = map
            .get("verb")
            .and_then(Value::as_str)
            .map(VerbType::parse)
            .transpose()?;

        let direction = match map.get("direction").and_then(Value::as_str) {
            None | Some("out") => Direction::Out,
            Some("in") => Direction::In,
            Some("any") => Direction::Any,
            Some(other) => {
                return Err(SynapseError::invalid_input(format!(
                    "unknown direction: {other}"
                )))
            }
        };

        Ok(Connected {
            from,
            verb,
            direction,
        })
    }
}

/// One find result; distance present only for ranked (`like`) queries.
#[derive(Debug, Clone)]
pub struct FindHit {
    pub noun: Noun,
    pub distance: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_fields_become_where() {
        let query =
            FindQuery::from_json(&json!({"type": "Product", "limit": 10000})).unwrap();
        assert_eq!(query.limit, 10_000);
        assert!(query.like.is_none());
        assert_eq!(
            query.filter,
            Some(Filter::Eq("type".to_string(), json!("Product")))
        );
    }

    #[test]
    fn test_where_and_bare_fields_combine() {
        let query = FindQuery::from_json(&json!({
            "where": {"price": {"lte": 100}},
            "category": "electronics"
        }))
        .unwrap();
        match query.filter {
            Some(Filter::And(clauses)) => assert_eq!(clauses.len(), 2),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn test_connected_parsing() {
        let id = SynapseId::new();
        let query = FindQuery::from_json(&json!({
            "connected": {"from": id.to_string(), "verb": "CreatedBy", "direction": "in"}
        }))
        .unwrap();
        let connected = query.connected.unwrap();
        assert_eq!(connected.from, id);
        assert_eq!(connected.verb, Some(VerbType::CreatedBy));
        assert_eq!(connected.direction, Direction::In);
    }

    #[test]
    fn test_bad_inputs() {
        assert!(FindQuery::from_json(&json!("nope")).is_err());
        assert!(FindQuery::from_json(&json!({"connected": {"verb": "CreatedBy"}})).is_err());
        assert!(
            FindQuery::from_json(&json!({"connected": {"from": "not-an-id"}})).is_err()
        );
    }
}
