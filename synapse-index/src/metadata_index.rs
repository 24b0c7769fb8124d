//! Metadata inverted index.
//!
//! Postings map `(field-path, token)` to compact id sets; numeric fields
//! additionally keep a sorted order index for range scans. Predicate trees
//! compile to set operations with a lazy complement, so `not`/`nin` never
//! materialize the universe until the end.

use crate::mapper::EntityIdMapper;
use parking_lot::RwLock;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use synapse_core::config::MetadataIndexConfig;
use synapse_core::{metadata, Result, SynapseError, SynapseId};
use tracing::{debug, warn};

/// Total-ordered f64 usable as a map key. Negative zero folds onto zero;
/// NaN never enters the index (non-finite numbers are not indexed).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderedF64(f64);

impl OrderedF64 {
    fn new(value: f64) -> Self {
        Self(if value == 0.0 { 0.0 } else { value })
    }
}

impl Eq for OrderedF64 {}

impl Ord for OrderedF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for OrderedF64 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::hash::Hash for OrderedF64 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// A scalar token in the inverted index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    Str(String),
    Num(OrderedF64),
    Bool(bool),
    Null,
}

impl Token {
    fn from_value(value: &Value) -> Option<Token> {
        match value {
            Value::String(s) => Some(Token::Str(s.clone())),
            Value::Number(n) => n.as_f64().filter(|f| f.is_finite()).map(|f| Token::Num(OrderedF64::new(f))),
            Value::Bool(b) => Some(Token::Bool(*b)),
            Value::Null => Some(Token::Null),
            _ => None,
        }
    }

    fn repr(&self) -> String {
        match self {
            Token::Str(s) => format!("s:{s}"),
            Token::Num(n) => format!("n:{}", n.0),
            Token::Bool(b) => format!("b:{b}"),
            Token::Null => "null".to_string(),
        }
    }
}

/// Posting set for one (field, token) pair. Past the configured limit the
/// set stops growing and is flagged; queries against it are approximate.
#[derive(Debug, Default, Clone)]
struct Postings {
    ids: BTreeSet<u32>,
    capped: bool,
}

/// Per-field indexed structures.
#[derive(Debug, Default)]
struct FieldPostings {
    tokens: HashMap<Token, Postings>,
    /// Sorted numeric order index for range predicates
    numeric: BTreeMap<OrderedF64, BTreeSet<u32>>,
    /// Ids where the field path is present at all
    exists: BTreeSet<u32>,
    /// JSON type name -> ids
    types: HashMap<&'static str, BTreeSet<u32>>,
    /// Array length -> ids
    sizes: HashMap<usize, BTreeSet<u32>>,
}

/// Flattened view of one field inside one document.
#[derive(Debug, Clone, PartialEq)]
struct DocField {
    tokens: Vec<Token>,
    type_name: &'static str,
    array_len: Option<usize>,
}

struct StoredDoc {
    value: Value,
    fields: HashMap<String, DocField>,
}

struct State {
    fields: HashMap<String, FieldPostings>,
    docs: HashMap<u32, StoredDoc>,
    universe: BTreeSet<u32>,
}

/// Statistics for one indexed field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldStats {
    /// Distinct token count
    pub cardinality: usize,
    /// Most frequent values with their document counts
    pub top_values: Vec<(String, usize)>,
}

/// The metadata index.
pub struct MetadataIndex {
    config: MetadataIndexConfig,
    mapper: Arc<EntityIdMapper>,
    state: RwLock<State>,
}

/// A compiled predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, f64),
    Gte(String, f64),
    Lt(String, f64),
    Lte(String, f64),
    Between(String, f64, f64),
    In(String, Vec<Value>),
    Nin(String, Vec<Value>),
    All(String, Vec<Value>),
    /// Array element or string substring containment
    Contains(String, Value),
    Size(String, usize),
    StartsWith(String, String),
    EndsWith(String, String),
    Regex(String, String, bool),
    Exists(String, bool),
    TypeIs(String, String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Nor(Vec<Filter>),
}

impl Filter {
    /// Parse the query DSL. Sibling keys combine with `and`; a field whose
    /// value is an object is an operator block, anything else is `eq`.
    pub fn from_json(value: &Value) -> Result<Filter> {
        let Value::Object(map) = value else {
            return Err(SynapseError::invalid_input("filter must be an object"));
        };

        let mut clauses = Vec::with_capacity(map.len());
        for (key, entry) in map {
            match key.as_str() {
                "and" | "or" | "nor" => {
                    let Value::Array(items) = entry else {
                        return Err(SynapseError::invalid_input(format!(
                            "{key} expects an array of filters"
                        )));
                    };
                    let parsed: Result<Vec<Filter>> = items.iter().map(Self::from_json).collect();
                    let parsed = parsed?;
                    clauses.push(match key.as_str() {
                        "and" => Filter::And(parsed),
                        "or" => Filter::Or(parsed),
                        _ => Filter::Nor(parsed),
                    });
                }
                "not" => clauses.push(Filter::Not(Box::new(Self::from_json(entry)?))),
                field => clauses.push(Self::parse_field(field, entry)?),
            }
        }

        Ok(if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            Filter::And(clauses)
        })
    }

    fn parse_field(field: &str, entry: &Value) -> Result<Filter> {
        let Value::Object(ops) = entry else {
            return Ok(Filter::Eq(field.to_string(), entry.clone()));
        };

        let mut clauses = Vec::with_capacity(ops.len());
        for (op, operand) in ops {
            let field = field.to_string();
            let clause = match op.as_str() {
                "eq" => Filter::Eq(field, operand.clone()),
                "ne" => Filter::Ne(field, operand.clone()),
                "gt" => Filter::Gt(field, Self::number(op, operand)?),
                "gte" => Filter::Gte(field, Self::number(op, operand)?),
                "lt" => Filter::Lt(field, Self::number(op, operand)?),
                "lte" => Filter::Lte(field, Self::number(op, operand)?),
                "between" => {
                    let bounds = operand
                        .as_array()
                        .filter(|a| a.len() == 2)
                        .ok_or_else(|| {
                            SynapseError::invalid_input("between expects [low, high]")
                        })?;
                    Filter::Between(
                        field,
                        Self::number(op, &bounds[0])?,
                        Self::number(op, &bounds[1])?,
                    )
                }
                "in" => Filter::In(field, Self::array(op, operand)?),
                "nin" => Filter::Nin(field, Self::array(op, operand)?),
                "all" => Filter::All(field, Self::array(op, operand)?),
                "includes" | "contains" => Filter::Contains(field, operand.clone()),
                "size" => {
                    let size = operand.as_u64().ok_or_else(|| {
                        SynapseError::invalid_input("size expects a non-negative integer")
                    })?;
                    Filter::Size(field, size as usize)
                }
                "startsWith" => Filter::StartsWith(field, Self::string(op, operand)?),
                "endsWith" => Filter::EndsWith(field, Self::string(op, operand)?),
                "regex" => match operand {
                    Value::String(pattern) => Filter::Regex(field, pattern.clone(), false),
                    Value::Object(spec) => {
                        let pattern = spec
                            .get("pattern")
                            .and_then(Value::as_str)
                            .ok_or_else(|| {
                                SynapseError::invalid_input("regex expects a pattern")
                            })?;
                        let ignore_case = spec
                            .get("ignoreCase")
                            .and_then(Value::as_bool)
                            .unwrap_or(false);
                        Filter::Regex(field, pattern.to_string(), ignore_case)
                    }
                    _ => return Err(SynapseError::invalid_input("regex expects a pattern")),
                },
                "exists" => Filter::Exists(
                    field,
                    operand.as_bool().ok_or_else(|| {
                        SynapseError::invalid_input("exists expects a boolean")
                    })?,
                ),
                "type" => Filter::TypeIs(field, Self::string(op, operand)?),
                other => {
                    return Err(SynapseError::invalid_input(format!(
                        "unknown operator: {other}"
                    )))
                }
            };
            clauses.push(clause);
        }

        Ok(match clauses.len() {
            0 => Filter::Exists(field.to_string(), true),
            1 => clauses.remove(0),
            _ => Filter::And(clauses),
        })
    }

    fn number(op: &str, value: &Value) -> Result<f64> {
        value
            .as_f64()
            .ok_or_else(|| SynapseError::invalid_input(format!("{op} expects a number")))
    }

    fn string(op: &str, value: &Value) -> Result<String> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SynapseError::invalid_input(format!("{op} expects a string")))
    }

    fn array(op: &str, value: &Value) -> Result<Vec<Value>> {
        value
            .as_array()
            .cloned()
            .ok_or_else(|| SynapseError::invalid_input(format!("{op} expects an array")))
    }
}

/// Set expression with lazy complement.
enum SetExpr {
    Include(BTreeSet<u32>),
    Exclude(BTreeSet<u32>),
}

impl SetExpr {
    fn empty() -> Self {
        SetExpr::Include(BTreeSet::new())
    }

    fn negate(self) -> Self {
        match self {
            SetExpr::Include(s) => SetExpr::Exclude(s),
            SetExpr::Exclude(s) => SetExpr::Include(s),
        }
    }

    fn intersect(self, other: Self) -> Self {
        use SetExpr::*;
        match (self, other) {
            (Include(a), Include(b)) => Include(a.intersection(&b).copied().collect()),
            (Include(a), Exclude(b)) | (Exclude(b), Include(a)) => {
                Include(a.difference(&b).copied().collect())
            }
            (Exclude(a), Exclude(b)) => Exclude(a.union(&b).copied().collect()),
        }
    }

    fn union(self, other: Self) -> Self {
        use SetExpr::*;
        match (self, other) {
            (Include(a), Include(b)) => Include(a.union(&b).copied().collect()),
            (Include(a), Exclude(b)) | (Exclude(b), Include(a)) => {
                Exclude(b.difference(&a).copied().collect())
            }
            (Exclude(a), Exclude(b)) => Exclude(a.intersection(&b).copied().collect()),
        }
    }

    fn materialize(self, universe: &BTreeSet<u32>) -> BTreeSet<u32> {
        match self {
            SetExpr::Include(s) => s,
            SetExpr::Exclude(s) => universe.difference(&s).copied().collect(),
        }
    }
}

impl MetadataIndex {
    pub fn new(config: MetadataIndexConfig, mapper: Arc<EntityIdMapper>) -> Self {
        Self {
            config,
            mapper,
            state: RwLock::new(State {
                fields: HashMap::new(),
                docs: HashMap::new(),
                universe: BTreeSet::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn field_indexed(&self, path: &str) -> bool {
        if self
            .config
            .exclude_fields
            .iter()
            .any(|ex| path == ex || path.starts_with(&format!("{ex}.")))
        {
            return false;
        }
        match &self.config.indexed_fields {
            None => true,
            Some(included) => included
                .iter()
                .any(|inc| path == inc || path.starts_with(&format!("{inc}.")) || inc.starts_with(&format!("{path}."))),
        }
    }

    fn field_map(&self, doc: &Value) -> HashMap<String, DocField> {
        let mut fields: HashMap<String, DocField> = HashMap::new();

        for path in metadata::field_paths(doc) {
            if !self.field_indexed(&path) {
                continue;
            }
            let Some(node) = metadata::get_path(doc, &path) else {
                continue;
            };
            fields.insert(
                path,
                DocField {
                    tokens: Vec::new(),
                    type_name: metadata::json_type_name(node),
                    array_len: node.as_array().map(Vec::len),
                },
            );
        }

        for (path, leaf) in metadata::flatten(doc) {
            if !self.field_indexed(&path) {
                continue;
            }
            if let Some(token) = Token::from_value(&leaf) {
                fields
                    .entry(path)
                    .or_insert_with(|| DocField {
                        tokens: Vec::new(),
                        type_name: metadata::json_type_name(&leaf),
                        array_len: None,
                    })
                    .tokens
                    .push(token);
            }
        }

        fields
    }

    /// Index or re-index a document, patching only changed fields.
    pub fn index_document(&self, id: SynapseId, doc: &Value) {
        let key = self.mapper.intern(id);
        let new_fields = self.field_map(doc);
        let mut state = self.state.write();
        state.universe.insert(key);

        let old_fields = state
            .docs
            .get(&key)
            .map(|d| d.fields.clone())
            .unwrap_or_default();

        for (path, old) in &old_fields {
            if new_fields.get(path) != Some(old) {
                Self::remove_field_postings(&mut state, key, path, old);
            }
        }
        for (path, field) in &new_fields {
            if old_fields.get(path) == Some(field) {
                continue;
            }
            self.add_field_postings(&mut state, key, path, field);
        }

        state.docs.insert(
            key,
            StoredDoc {
                value: doc.clone(),
                fields: new_fields,
            },
        );
        if self.config.auto_optimize {
            Self::prune_empty_fields(&mut state);
        }
        debug!(%id, "indexed metadata document");
    }

    /// Drop every posting for a document.
    pub fn remove_document(&self, id: SynapseId) {
        let Some(key) = self.mapper.key_of(id) else {
            return;
        };
        let mut state = self.state.write();
        state.universe.remove(&key);
        if let Some(doc) = state.docs.remove(&key) {
            for (path, field) in &doc.fields {
                Self::remove_field_postings(&mut state, key, path, field);
            }
        }
        if self.config.auto_optimize {
            Self::prune_empty_fields(&mut state);
        }
    }

    /// Drop field entries whose postings have all emptied out, so stale
    /// paths stop occupying the statistics surface.
    fn prune_empty_fields(state: &mut State) {
        state.fields.retain(|_, entry| {
            entry.types.retain(|_, ids| !ids.is_empty());
            entry.sizes.retain(|_, ids| !ids.is_empty());
            !entry.exists.is_empty() || !entry.tokens.is_empty()
        });
    }

    fn add_field_postings(&self, state: &mut State, key: u32, path: &str, field: &DocField) {
        let max = self.config.max_index_size;
        let entry = state.fields.entry(path.to_string()).or_default();
        entry.exists.insert(key);
        entry.types.entry(field.type_name).or_default().insert(key);
        if let Some(len) = field.array_len {
            entry.sizes.entry(len).or_default().insert(key);
        }
        for token in &field.tokens {
            let postings = entry.tokens.entry(token.clone()).or_default();
            if postings.ids.len() >= max {
                if !postings.capped {
                    postings.capped = true;
                    warn!(path, "posting list reached max_index_size; capping");
                }
                continue;
            }
            postings.ids.insert(key);
            if let Token::Num(value) = token {
                entry.numeric.entry(*value).or_default().insert(key);
            }
        }
    }

    fn remove_field_postings(state: &mut State, key: u32, path: &str, field: &DocField) {
        let Some(entry) = state.fields.get_mut(path) else {
            return;
        };
        entry.exists.remove(&key);
        if let Some(ids) = entry.types.get_mut(field.type_name) {
            ids.remove(&key);
        }
        if let Some(len) = field.array_len {
            if let Some(ids) = entry.sizes.get_mut(&len) {
                ids.remove(&key);
            }
        }
        for token in &field.tokens {
            if let Some(postings) = entry.tokens.get_mut(token) {
                postings.ids.remove(&key);
                if postings.ids.is_empty() {
                    entry.tokens.remove(token);
                }
            }
            if let Token::Num(value) = token {
                if let Some(ids) = entry.numeric.get_mut(value) {
                    ids.remove(&key);
                    if ids.is_empty() {
                        entry.numeric.remove(value);
                    }
                }
            }
        }
    }

    /// Evaluate a predicate tree to matching keys, insertion-ordered.
    pub fn query_keys(&self, filter: &Filter) -> Result<BTreeSet<u32>> {
        let state = self.state.read();
        let expr = Self::eval(&state, filter)?;
        Ok(expr.materialize(&state.universe))
    }

    /// Evaluate a predicate tree to entity ids, insertion-ordered.
    pub fn query(&self, filter: &Filter) -> Result<Vec<SynapseId>> {
        Ok(self
            .query_keys(filter)?
            .into_iter()
            .filter_map(|k| self.mapper.resolve(k))
            .collect())
    }

    fn eval(state: &State, filter: &Filter) -> Result<SetExpr> {
        Ok(match filter {
            Filter::Eq(field, value) => SetExpr::Include(Self::eval_eq(state, field, value)),
            Filter::Ne(field, value) => {
                SetExpr::Exclude(Self::eval_eq(state, field, value))
            }
            Filter::Gt(field, v) => Self::range(state, field, Bound::Excluded(*v), Bound::Unbounded),
            Filter::Gte(field, v) => Self::range(state, field, Bound::Included(*v), Bound::Unbounded),
            Filter::Lt(field, v) => Self::range(state, field, Bound::Unbounded, Bound::Excluded(*v)),
            Filter::Lte(field, v) => Self::range(state, field, Bound::Unbounded, Bound::Included(*v)),
            Filter::Between(field, low, high) => {
                Self::range(state, field, Bound::Included(*low), Bound::Included(*high))
            }
            Filter::In(field, values) => SetExpr::Include(
                values
                    .iter()
                    .flat_map(|v| Self::eval_eq(state, field, v))
                    .collect(),
            ),
            Filter::Nin(field, values) => SetExpr::Exclude(
                values
                    .iter()
                    .flat_map(|v| Self::eval_eq(state, field, v))
                    .collect(),
            ),
            Filter::All(field, values) => {
                let mut expr: Option<SetExpr> = None;
                for value in values {
                    let next = SetExpr::Include(Self::eval_eq(state, field, value));
                    expr = Some(match expr {
                        None => next,
                        Some(acc) => acc.intersect(next),
                    });
                }
                expr.unwrap_or_else(SetExpr::empty)
            }
            Filter::Contains(field, value) => SetExpr::Include(Self::eval_contains(state, field, value)),
            Filter::Size(field, size) => SetExpr::Include(
                state
                    .fields
                    .get(field)
                    .and_then(|f| f.sizes.get(size))
                    .cloned()
                    .unwrap_or_default(),
            ),
            Filter::StartsWith(field, prefix) => {
                SetExpr::Include(Self::scan_strings(state, field, |s| s.starts_with(prefix)))
            }
            Filter::EndsWith(field, suffix) => {
                SetExpr::Include(Self::scan_strings(state, field, |s| s.ends_with(suffix)))
            }
            Filter::Regex(field, pattern, ignore_case) => {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(*ignore_case)
                    .build()
                    .map_err(|e| SynapseError::invalid_input(format!("invalid regex: {e}")))?;
                SetExpr::Include(Self::scan_strings(state, field, |s| regex.is_match(s)))
            }
            Filter::Exists(field, true) => SetExpr::Include(
                state
                    .fields
                    .get(field)
                    .map(|f| f.exists.clone())
                    .unwrap_or_default(),
            ),
            Filter::Exists(field, false) => SetExpr::Exclude(
                state
                    .fields
                    .get(field)
                    .map(|f| f.exists.clone())
                    .unwrap_or_default(),
            ),
            Filter::TypeIs(field, type_name) => SetExpr::Include(
                state
                    .fields
                    .get(field)
                    .and_then(|f| f.types.get(type_name.as_str()))
                    .cloned()
                    .unwrap_or_default(),
            ),
            Filter::And(clauses) => {
                let mut expr = SetExpr::Exclude(BTreeSet::new()); // everything
                for clause in clauses {
                    expr = expr.intersect(Self::eval(state, clause)?);
                }
                expr
            }
            Filter::Or(clauses) => {
                let mut expr = SetExpr::empty();
                for clause in clauses {
                    expr = expr.union(Self::eval(state, clause)?);
                }
                expr
            }
            Filter::Not(clause) => Self::eval(state, clause)?.negate(),
            Filter::Nor(clauses) => {
                let mut expr = SetExpr::empty();
                for clause in clauses {
                    expr = expr.union(Self::eval(state, clause)?);
                }
                expr.negate()
            }
        })
    }

    /// Equality over scalars; an array operand requires every element.
    fn eval_eq(state: &State, field: &str, value: &Value) -> BTreeSet<u32> {
        match value {
            Value::Array(items) => {
                let mut expr: Option<BTreeSet<u32>> = None;
                for item in items {
                    let next = Self::eval_eq(state, field, item);
                    expr = Some(match expr {
                        None => next,
                        Some(acc) => acc.intersection(&next).copied().collect(),
                    });
                }
                expr.unwrap_or_default()
            }
            _ => Token::from_value(value)
                .and_then(|token| {
                    state
                        .fields
                        .get(field)
                        .and_then(|f| f.tokens.get(&token))
                        .map(|p| p.ids.clone())
                })
                .unwrap_or_default(),
        }
    }

    /// Array-element or string-substring containment.
    fn eval_contains(state: &State, field: &str, value: &Value) -> BTreeSet<u32> {
        let mut out = Self::eval_eq(state, field, value);
        if let Value::String(needle) = value {
            out.extend(Self::scan_strings(state, field, |s| s.contains(needle)));
        }
        out
    }

    fn range(state: &State, field: &str, low: Bound<f64>, high: Bound<f64>) -> SetExpr {
        let Some(entry) = state.fields.get(field) else {
            return SetExpr::empty();
        };
        let low = map_bound(low);
        let high = map_bound(high);
        let mut out = BTreeSet::new();
        for (_, ids) in entry.numeric.range((low, high)) {
            out.extend(ids.iter().copied());
        }
        SetExpr::Include(out)
    }

    fn scan_strings(state: &State, field: &str, predicate: impl Fn(&str) -> bool) -> BTreeSet<u32> {
        let Some(entry) = state.fields.get(field) else {
            return BTreeSet::new();
        };
        let mut out = BTreeSet::new();
        for (token, postings) in &entry.tokens {
            if let Token::Str(s) = token {
                if predicate(s) {
                    out.extend(postings.ids.iter().copied());
                }
            }
        }
        out
    }

    /// Per-field cardinality and top value frequencies.
    pub fn field_stats(&self) -> BTreeMap<String, FieldStats> {
        const TOP_N: usize = 10;
        let state = self.state.read();
        state
            .fields
            .iter()
            .map(|(path, entry)| {
                let mut counts: Vec<(String, usize)> = entry
                    .tokens
                    .iter()
                    .map(|(token, postings)| (token.repr(), postings.ids.len()))
                    .collect();
                counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
                counts.truncate(TOP_N);
                (
                    path.clone(),
                    FieldStats {
                        cardinality: entry.tokens.len(),
                        top_values: counts,
                    },
                )
            })
            .collect()
    }

    /// Serialize to the `metadata-index.json` singleton shape.
    pub fn snapshot(&self) -> MetadataSnapshot {
        let state = self.state.read();
        let documents = state
            .docs
            .iter()
            .filter_map(|(key, doc)| {
                self.mapper
                    .resolve(*key)
                    .map(|id| (id.to_string(), doc.value.clone()))
            })
            .collect();

        let inverted_index = state
            .fields
            .iter()
            .map(|(path, entry)| {
                let tokens = entry
                    .tokens
                    .iter()
                    .map(|(token, postings)| {
                        let ids = postings
                            .ids
                            .iter()
                            .filter_map(|k| self.mapper.resolve(*k))
                            .map(|id| id.to_string())
                            .collect();
                        (token.repr(), ids)
                    })
                    .collect();
                (path.clone(), tokens)
            })
            .collect();

        MetadataSnapshot {
            documents,
            inverted_index,
            field_stats: self.field_stats(),
        }
    }

    /// Restore from a snapshot; documents are re-indexed from source so the
    /// inverted structures are always self-consistent.
    pub fn restore(&self, snapshot: MetadataSnapshot) -> Result<()> {
        {
            let mut state = self.state.write();
            state.fields.clear();
            state.docs.clear();
            state.universe.clear();
        }
        for (id, doc) in &snapshot.documents {
            let id = SynapseId::parse(id)
                .map_err(|e| SynapseError::internal(format!("bad document id: {e}")))?;
            self.index_document(id, doc);
        }
        Ok(())
    }
}

fn map_bound(bound: Bound<f64>) -> Bound<OrderedF64> {
    match bound {
        Bound::Included(v) => Bound::Included(OrderedF64::new(v)),
        Bound::Excluded(v) => Bound::Excluded(OrderedF64::new(v)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Persisted shape of `metadata-index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    pub documents: BTreeMap<String, Value>,
    #[serde(rename = "invertedIndex")]
    pub inverted_index: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    #[serde(rename = "fieldStats")]
    pub field_stats: BTreeMap<String, FieldStats>,
}
