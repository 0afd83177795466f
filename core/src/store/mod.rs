//! Boundary to the embedded document store.
//!
//! [`Store`] is the capability set the repository needs: namespaces, index
//! configuration, a structured [`Query`] and upserts. [`SledStore`] is the
//! bundled implementation.

mod engine;
pub mod fulltext;

pub use engine::SledStore;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("namespace '{0}' is not open")]
    NamespaceNotOpen(String),
    #[error("namespace '{namespace}' has no index '{index}'")]
    UnknownIndex { namespace: String, index: String },
    #[error("invalid index config: {0}")]
    InvalidConfig(String),
    #[error("document has no integer primary key '{0}'")]
    MissingPrimaryKey(String),
    #[error("not found")]
    NotFound,
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("storage: {0}")]
    Storage(#[from] sled::Error),
}

/// Declared shape of a namespace: primary key and composite full-text fields.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceSchema {
    pub name: String,
    pub primary_key: String,
    pub composites: Vec<(String, Vec<String>)>,
}

impl NamespaceSchema {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self { name: name.into(), primary_key: primary_key.into(), composites: Vec::new() }
    }

    pub fn composite(mut self, name: &str, fields: &[&str]) -> Self {
        self.composites.push((name.to_string(), fields.iter().map(|f| f.to_string()).collect()));
        self
    }

    pub fn composite_fields(&self, name: &str) -> Option<&[String]> {
        self.composites.iter().find(|(n, _)| n == name).map(|(_, f)| f.as_slice())
    }
}

/// Engine-native full-text ranking configuration for one index.
#[derive(Debug, Clone, PartialEq)]
pub struct FtIndexConfig {
    pub bm25_boost: f64,
    pub bm25_weight: f64,
    pub distance_boost: f64,
    pub distance_weight: f64,
    pub term_len_boost: f64,
    pub term_len_weight: f64,
    /// Hits scoring below this fraction of the best hit are dropped.
    pub min_relevancy: f64,
    pub max_typos_in_word: u8,
    /// Rank penalty for prefix/substring matches compared to whole-word matches.
    pub partial_match_decrease: f64,
}

impl Default for FtIndexConfig {
    fn default() -> Self {
        Self {
            bm25_boost: 1.0,
            bm25_weight: 0.1,
            distance_boost: 1.0,
            distance_weight: 0.5,
            term_len_boost: 1.0,
            term_len_weight: 0.3,
            min_relevancy: 0.05,
            max_typos_in_word: 2,
            partial_match_decrease: 0.15,
        }
    }
}

impl FtIndexConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        let unit = [
            ("bm25_weight", self.bm25_weight),
            ("distance_weight", self.distance_weight),
            ("term_len_weight", self.term_len_weight),
            ("min_relevancy", self.min_relevancy),
            ("partial_match_decrease", self.partial_match_decrease),
        ];
        for (name, v) in unit {
            if !(0.0..=1.0).contains(&v) {
                return Err(StoreError::InvalidConfig(format!("{name} must be within [0, 1], got {v}")));
            }
        }
        let boosts = [("bm25_boost", self.bm25_boost), ("distance_boost", self.distance_boost), ("term_len_boost", self.term_len_boost)];
        for (name, v) in boosts {
            if !(0.0..=10.0).contains(&v) {
                return Err(StoreError::InvalidConfig(format!("{name} must be within [0, 10], got {v}")));
            }
        }
        if self.max_typos_in_word > 2 {
            return Err(StoreError::InvalidConfig(format!("max_typos_in_word must be at most 2, got {}", self.max_typos_in_word)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub condition: Condition,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub namespace: String,
    /// Field the joined documents are attached under.
    pub relation: String,
    pub left_field: String,
    pub right_field: String,
}

/// Post-processing directive replacing a text field by highlighted excerpts.
#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    pub field: String,
    pub pre: String,
    pub post: String,
    pub before: usize,
    pub after: usize,
    pub left_bound: String,
    pub right_bound: String,
}

impl Snippet {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            pre: "<b>".into(),
            post: "</b>".into(),
            before: 30,
            after: 30,
            left_bound: " ...".into(),
            right_bound: "... <br/>".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextMatch {
    pub field: String,
    pub dsl: String,
}

/// Structured query over one namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub namespace: String,
    pub predicates: Vec<Predicate>,
    pub text: Option<TextMatch>,
    pub sort: Option<Sort>,
    pub joins: Vec<Join>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub req_total: bool,
    pub snippets: Vec<Snippet>,
}

impl Query {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            predicates: Vec::new(),
            text: None,
            sort: None,
            joins: Vec::new(),
            limit: None,
            offset: None,
            req_total: false,
            snippets: Vec::new(),
        }
    }

    pub fn where_int(self, field: &str, condition: Condition, value: i64) -> Self {
        self.filter(field, condition, Value::from(value))
    }

    pub fn where_str(self, field: &str, condition: Condition, value: &str) -> Self {
        self.filter(field, condition, Value::from(value))
    }

    fn filter(mut self, field: &str, condition: Condition, value: Value) -> Self {
        self.predicates.push(Predicate { field: field.to_string(), condition, value });
        self
    }

    pub fn matches(mut self, field: &str, dsl: impl Into<String>) -> Self {
        self.text = Some(TextMatch { field: field.to_string(), dsl: dsl.into() });
        self
    }

    pub fn sort(mut self, field: &str, descending: bool) -> Self {
        self.sort = Some(Sort { field: field.to_string(), descending });
        self
    }

    pub fn join(mut self, namespace: &str, relation: &str, left_field: &str, right_field: &str) -> Self {
        self.joins.push(Join {
            namespace: namespace.to_string(),
            relation: relation.to_string(),
            left_field: left_field.to_string(),
            right_field: right_field.to_string(),
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn req_total(mut self) -> Self {
        self.req_total = true;
        self
    }

    pub fn snippet(mut self, snippet: Snippet) -> Self {
        self.snippets.push(snippet);
        self
    }
}

/// Documents produced by [`Store::execute`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResults {
    pub items: Vec<Value>,
    /// Matches before pagination; present only when the query asked for it.
    pub total: Option<usize>,
}

impl QueryResults {
    pub fn count(&self) -> usize {
        self.items.len()
    }

    /// Decode every document; the total falls back to the page size when not requested.
    pub fn decode<T: DeserializeOwned>(self) -> Result<(Vec<T>, usize), StoreError> {
        let total = self.total.unwrap_or(self.items.len());
        let items = self.items.into_iter().map(serde_json::from_value).collect::<Result<Vec<T>, _>>()?;
        Ok((items, total))
    }

    pub fn fetch_one<T: DeserializeOwned>(self) -> Result<T, StoreError> {
        let first = self.items.into_iter().next().ok_or(StoreError::NotFound)?;
        Ok(serde_json::from_value(first)?)
    }
}

pub trait Store: Send + Sync + 'static {
    /// Open (or reopen) a namespace; reopening drops any materialized index state.
    fn open_namespace(&self, schema: &NamespaceSchema) -> Result<(), StoreError>;

    fn close_namespace(&self, name: &str) -> Result<(), StoreError>;

    fn configure_index(&self, namespace: &str, index: &str, config: &FtIndexConfig) -> Result<(), StoreError>;

    fn execute(&self, query: &Query) -> Result<QueryResults, StoreError>;

    fn upsert(&self, namespace: &str, doc: Value) -> Result<(), StoreError>;
}
