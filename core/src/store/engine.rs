use super::fulltext::{self, DocText, FtQuery};
use super::{Condition, FtIndexConfig, NamespaceSchema, Predicate, Query, QueryResults, Store, StoreError};
use parking_lot::RwLock;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Embedded store on top of sled: one tree per namespace, JSON documents keyed by primary key.
pub struct SledStore {
    db: sled::Db,
    namespaces: RwLock<HashMap<String, Arc<OpenNamespace>>>,
}

struct OpenNamespace {
    schema: NamespaceSchema,
    tree: sled::Tree,
    ft_configs: RwLock<HashMap<String, FtIndexConfig>>,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
}

/// Decoded documents plus per-composite word lists, built on first read.
struct Snapshot {
    docs: Vec<Value>,
    text: HashMap<String, Vec<DocText>>,
}

fn encode_key(id: i64) -> [u8; 8] {
    ((id as u64) ^ (1 << 63)).to_be_bytes()
}

impl SledStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        tracing::info!(path = %path.display(), "opened store");
        Ok(Self { db, namespaces: RwLock::new(HashMap::new()) })
    }

    /// Store that lives in a temporary directory and is deleted on drop.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db, namespaces: RwLock::new(HashMap::new()) })
    }

    fn namespace(&self, name: &str) -> Result<Arc<OpenNamespace>, StoreError> {
        self.namespaces.read().get(name).cloned().ok_or_else(|| StoreError::NamespaceNotOpen(name.to_string()))
    }
}

impl OpenNamespace {
    fn snapshot(&self) -> Result<Arc<Snapshot>, StoreError> {
        if let Some(snap) = self.snapshot.read().as_ref() {
            return Ok(snap.clone());
        }
        let mut slot = self.snapshot.write();
        if let Some(snap) = slot.as_ref() {
            return Ok(snap.clone());
        }
        let mut docs = Vec::with_capacity(self.tree.len());
        for entry in self.tree.iter() {
            let (_, bytes) = entry?;
            docs.push(serde_json::from_slice::<Value>(&bytes)?);
        }
        let text = self
            .schema
            .composites
            .iter()
            .map(|(name, fields)| (name.clone(), docs.iter().map(|d| DocText::from_doc(d, fields)).collect()))
            .collect();
        tracing::debug!(namespace = %self.schema.name, docs = docs.len(), "materialized full-text index");
        let snap = Arc::new(Snapshot { docs, text });
        *slot = Some(snap.clone());
        Ok(snap)
    }

    fn ft_config(&self, index: &str) -> FtIndexConfig {
        self.ft_configs.read().get(index).cloned().unwrap_or_default()
    }
}

impl Store for SledStore {
    fn open_namespace(&self, schema: &NamespaceSchema) -> Result<(), StoreError> {
        let tree = self.db.open_tree(&schema.name)?;
        let ns = OpenNamespace {
            schema: schema.clone(),
            tree,
            ft_configs: RwLock::new(HashMap::new()),
            snapshot: RwLock::new(None),
        };
        self.namespaces.write().insert(schema.name.clone(), Arc::new(ns));
        tracing::info!(namespace = %schema.name, "opened namespace");
        Ok(())
    }

    fn close_namespace(&self, name: &str) -> Result<(), StoreError> {
        if let Some(ns) = self.namespaces.write().remove(name) {
            ns.tree.flush()?;
            tracing::info!(namespace = %name, "closed namespace");
        }
        Ok(())
    }

    fn configure_index(&self, namespace: &str, index: &str, config: &FtIndexConfig) -> Result<(), StoreError> {
        config.validate()?;
        let ns = self.namespace(namespace)?;
        if ns.schema.composite_fields(index).is_none() {
            return Err(StoreError::UnknownIndex { namespace: namespace.to_string(), index: index.to_string() });
        }
        ns.ft_configs.write().insert(index.to_string(), config.clone());
        Ok(())
    }

    fn execute(&self, query: &Query) -> Result<QueryResults, StoreError> {
        let ns = self.namespace(&query.namespace)?;
        let snap = ns.snapshot()?;

        let candidates: Vec<usize> =
            (0..snap.docs.len()).filter(|&i| query.predicates.iter().all(|p| eval_predicate(&snap.docs[i], p))).collect();

        let mut ft_query = None;
        let mut hits: Vec<(usize, f64)> = match &query.text {
            Some(m) => {
                let texts = snap.text.get(&m.field).ok_or_else(|| StoreError::UnknownIndex {
                    namespace: query.namespace.clone(),
                    index: m.field.clone(),
                })?;
                let config = ns.ft_config(&m.field);
                let parsed = FtQuery::parse(&m.dsl);
                let ranked = fulltext::search(&parsed, &config, texts, &candidates);
                ft_query = Some((parsed, config));
                ranked
            }
            None => candidates.into_iter().map(|i| (i, 0.0)).collect(),
        };

        match &query.sort {
            Some(sort) => hits.sort_by(|a, b| {
                let ord = compare_values(snap.docs[a.0].get(&sort.field), snap.docs[b.0].get(&sort.field));
                let ord = if sort.descending { ord.reverse() } else { ord };
                ord.then_with(|| b.1.total_cmp(&a.1))
            }),
            None if query.text.is_some() => hits.sort_by(|a, b| b.1.total_cmp(&a.1)),
            None => {}
        }

        let total = hits.len();
        let mut items: Vec<Value> = hits
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|(i, _)| snap.docs[i].clone())
            .collect();

        for join in &query.joins {
            let joined = self.namespace(&join.namespace)?.snapshot()?;
            let mut by_key: HashMap<String, Vec<&Value>> = HashMap::new();
            for doc in &joined.docs {
                if let Some(key) = doc.get(&join.right_field) {
                    by_key.entry(key.to_string()).or_default().push(doc);
                }
            }
            for item in items.iter_mut() {
                let attached: Vec<Value> = item
                    .get(&join.left_field)
                    .and_then(|k| by_key.get(&k.to_string()))
                    .map(|docs| docs.iter().map(|d| (*d).clone()).collect())
                    .unwrap_or_default();
                if let Value::Object(map) = item {
                    map.insert(join.relation.clone(), Value::Array(attached));
                }
            }
        }

        if let Some((parsed, config)) = &ft_query {
            for snip in &query.snippets {
                for item in items.iter_mut() {
                    let excerpt = match item.get(&snip.field) {
                        Some(Value::String(text)) => fulltext::snippet(text, parsed, config, snip),
                        _ => continue,
                    };
                    item[snip.field.as_str()] = Value::String(excerpt);
                }
            }
        }

        Ok(QueryResults { items, total: query.req_total.then_some(total) })
    }

    fn upsert(&self, namespace: &str, doc: Value) -> Result<(), StoreError> {
        let ns = self.namespace(namespace)?;
        let pk = &ns.schema.primary_key;
        let id = doc.get(pk).and_then(Value::as_i64).ok_or_else(|| StoreError::MissingPrimaryKey(pk.clone()))?;
        ns.tree.insert(encode_key(id), serde_json::to_vec(&doc)?)?;
        *ns.snapshot.write() = None;
        Ok(())
    }
}

fn eval_predicate(doc: &Value, p: &Predicate) -> bool {
    match doc.get(&p.field) {
        Some(Value::Array(items)) => items.iter().any(|v| satisfies(v, p)),
        Some(v) => satisfies(v, p),
        None => false,
    }
}

fn satisfies(v: &Value, p: &Predicate) -> bool {
    let Some(ord) = compare_scalars(v, &p.value) else { return false };
    match p.condition {
        Condition::Eq => ord == Ordering::Equal,
        Condition::Lt => ord == Ordering::Less,
        Condition::Le => ord != Ordering::Greater,
        Condition::Gt => ord == Ordering::Greater,
        Condition::Ge => ord != Ordering::Less,
    }
}

fn compare_scalars(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Sort order for field values; missing or incomparable values go last.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => compare_scalars(x, y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
