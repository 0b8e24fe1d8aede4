//! In-process document store adapter.
//!
//! Backs tests, the criterion benches and `memory://` endpoints. It evaluates
//! the full query vocabulary and models the costs the benchmarks exist to
//! surface:
//!
//! 1. Scan cost: an optional fixed cost per examined document. Unsorted scans
//!    stop after `skip + limit` matches; unindexed sorts examine everything; a
//!    filter whose leading field is indexed examines only its matches.
//! 2. Replication: `w > 1` waits `replication_lag × (w − 1)`; a wait longer
//!    than the write timeout sleeps for the timeout and fails with `Timeout`
//!    after the write was applied, like a real replica set.
//! 3. Fault injection for write, query, index and delete paths.

use crate::durability::DurabilityLevel;
use crate::indexes::IndexSpec;
use crate::model::{Document, RecordId, ID_FIELD};
use crate::query::{Accumulator, Filter, FindOptions, SortDirection, SortSpec, Stage};
use crate::store::{Cursor, Session, StoreConnector};
use crate::{BenchError, BenchResult, WriteError, WriteErrorKind};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

pub const SCHEME: &str = "memory://";

#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Data-bearing members available to acknowledge writes.
    pub replica_count: u32,
    /// Delay before each additional member acknowledges.
    pub replication_lag: Duration,
    /// Simulated cost of examining one document.
    pub scan_cost_per_document: Duration,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            replica_count: 3,
            replication_lag: Duration::ZERO,
            scan_cost_per_document: Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct Faults {
    failing_inserts: HashMap<u64, WriteErrorKind>,
    failing_queries: HashSet<String>,
    rejected_indexes: HashSet<String>,
    fail_deletes: bool,
    unreachable: bool,
}

struct Inner {
    config: MemoryStoreConfig,
    collections: RwLock<HashMap<String, Vec<Document>>>,
    indexes: RwLock<HashMap<String, BTreeMap<String, IndexSpec>>>,
    next_id: AtomicU64,
    insert_many_calls: AtomicU64,
    faults: Mutex<Faults>,
}

/// Shared store state; every [`MemorySession`] sees the same collections.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                collections: RwLock::new(HashMap::new()),
                indexes: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                insert_many_calls: AtomicU64::new(0),
                faults: Mutex::new(Faults::default()),
            }),
        }
    }

    // ── fault injection ──

    /// Fail the `ordinal`-th `insert_many` call (1-based, counted across sessions).
    pub fn fail_insert_many_call(&self, ordinal: u64, kind: WriteErrorKind) {
        self.inner.faults.lock().failing_inserts.insert(ordinal, kind);
    }

    pub fn fail_queries_on(&self, collection: &str) {
        self.inner.faults.lock().failing_queries.insert(collection.to_string());
    }

    pub fn reject_indexes_on(&self, collection: &str) {
        self.inner.faults.lock().rejected_indexes.insert(collection.to_string());
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.inner.faults.lock().fail_deletes = fail;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.faults.lock().unreachable = !reachable;
    }

    // ── inspection ──

    pub fn insert_many_calls(&self) -> u64 {
        self.inner.insert_many_calls.load(AtomicOrdering::SeqCst)
    }

    pub fn len(&self, collection: &str) -> usize {
        self.inner
            .collections
            .read()
            .get(collection)
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.inner
            .collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn index_names(&self, collection: &str) -> Vec<String> {
        self.inner
            .indexes
            .read()
            .get(collection)
            .map(|specs| specs.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn reachable(&self) -> bool {
        !self.inner.faults.lock().unreachable
    }

    fn assign_id(&self) -> RecordId {
        let seq = self.inner.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        let secs = chrono::Utc::now().timestamp() as u32;
        RecordId::new(format!("{:08x}{:016x}", secs, seq))
    }

    fn is_indexed(&self, collection: &str, field: &str) -> bool {
        self.inner.indexes.read().get(collection).map_or(false, |specs| {
            specs.values().any(|s| s.leading_field() == Some(field))
        })
    }

    fn charge(&self, examined: usize) {
        let cost = self.inner.config.scan_cost_per_document;
        if !cost.is_zero() && examined > 0 {
            std::thread::sleep(cost.saturating_mul(examined.min(u32::MAX as usize) as u32));
        }
    }

    fn acknowledge(&self, level: &DurabilityLevel) -> BenchResult<()> {
        let replicas = self.inner.config.replica_count.max(1);
        let required = level.w.required(replicas);
        if required <= 1 {
            return Ok(());
        }
        if required > replicas {
            return Err(WriteError::rejected(format!(
                "not enough data-bearing nodes: w={} with {} members",
                required, replicas
            ))
            .into());
        }
        let wait = self.inner.config.replication_lag * (required - 1);
        match level.timeout {
            Some(timeout) if wait > timeout => {
                std::thread::sleep(timeout);
                Err(WriteError::timeout(format!(
                    "waiting for replication timed out after {}ms",
                    timeout.as_millis()
                ))
                .into())
            }
            _ => {
                if !wait.is_zero() {
                    std::thread::sleep(wait);
                }
                Ok(())
            }
        }
    }

    fn check_query(&self, collection: &str) -> BenchResult<()> {
        let faults = self.inner.faults.lock();
        if faults.unreachable {
            return Err(BenchError::Connection("store unreachable".into()));
        }
        if faults.failing_queries.contains(collection) {
            return Err(BenchError::Query(format!(
                "injected query failure on '{}'",
                collection
            )));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryStoreConfig::default())
    }
}

impl StoreConnector for MemoryStore {
    fn connect(&self, endpoint: &str) -> BenchResult<Box<dyn Session>> {
        if !endpoint.starts_with(SCHEME) {
            return Err(BenchError::Connection(format!(
                "unsupported endpoint '{}' (expected {}...)",
                endpoint, SCHEME
            )));
        }
        if !self.reachable() {
            return Err(BenchError::Connection(format!("{} is unreachable", endpoint)));
        }
        Ok(Box::new(MemorySession {
            store: self.clone(),
        }))
    }
}

pub struct MemorySession {
    store: MemoryStore,
}

impl Session for MemorySession {
    fn name(&self) -> &str {
        "memory"
    }

    fn ping(&mut self) -> BenchResult<()> {
        if self.store.reachable() {
            Ok(())
        } else {
            Err(BenchError::Connection("store unreachable".into()))
        }
    }

    fn insert_many(
        &mut self,
        collection: &str,
        docs: Vec<Document>,
        durability: &DurabilityLevel,
    ) -> BenchResult<u64> {
        let ordinal = self.store.inner.insert_many_calls.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        {
            let faults = self.store.inner.faults.lock();
            if faults.unreachable {
                return Err(WriteError::connectivity("store unreachable").into());
            }
            if let Some(kind) = faults.failing_inserts.get(&ordinal) {
                return Err(WriteError::new(
                    *kind,
                    format!("injected failure on insert_many #{}", ordinal),
                )
                .into());
            }
        }
        let accepted = docs.len() as u64;
        let docs: Vec<Document> = docs
            .into_iter()
            .map(|mut doc| {
                doc.insert(ID_FIELD.into(), self.store.assign_id().into());
                doc
            })
            .collect();
        self.store
            .inner
            .collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
        self.store.acknowledge(durability)?;
        Ok(accepted)
    }

    fn insert_one(
        &mut self,
        collection: &str,
        mut doc: Document,
        durability: &DurabilityLevel,
    ) -> BenchResult<RecordId> {
        if !self.store.reachable() {
            return Err(WriteError::connectivity("store unreachable").into());
        }
        let id = self.store.assign_id();
        doc.insert(ID_FIELD.into(), id.clone().into());
        self.store
            .inner
            .collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(doc);
        self.store.acknowledge(durability)?;
        Ok(id)
    }

    fn delete_one(&mut self, collection: &str, filter: &Filter) -> BenchResult<u64> {
        self.delete(collection, filter, Some(1))
    }

    fn delete_many(&mut self, collection: &str, filter: &Filter) -> BenchResult<u64> {
        self.delete(collection, filter, None)
    }

    fn find(&mut self, collection: &str, options: &FindOptions) -> BenchResult<Cursor> {
        self.store.check_query(collection)?;
        let (docs, examined) = {
            let collections = self.store.inner.collections.read();
            let source = collections.get(collection).map_or(&[][..], Vec::as_slice);
            execute_find(source, options, |f| self.store.is_indexed(collection, f))
        };
        self.store.charge(examined);
        Ok(Cursor::from_documents(docs))
    }

    fn aggregate(&mut self, collection: &str, stages: &[Stage]) -> BenchResult<Cursor> {
        self.store.check_query(collection)?;
        let (docs, examined) = {
            let collections = self.store.inner.collections.read();
            let source = collections.get(collection).map_or(&[][..], Vec::as_slice);
            let (input, mut examined) =
                initial_input(source, stages, |f| self.store.is_indexed(collection, f));
            let out = apply_stages(input, stages, &collections, &mut examined);
            (out, examined)
        };
        self.store.charge(examined);
        Ok(Cursor::from_documents(docs))
    }

    fn create_indexes(&mut self, collection: &str, specs: &[IndexSpec]) -> BenchResult<u64> {
        {
            let faults = self.store.inner.faults.lock();
            if faults.unreachable {
                return Err(BenchError::Connection("store unreachable".into()));
            }
            if faults.rejected_indexes.contains(collection) {
                return Err(BenchError::Index(format!(
                    "index build rejected on '{}'",
                    collection
                )));
            }
        }
        let mut indexes = self.store.inner.indexes.write();
        let entry = indexes.entry(collection.to_string()).or_default();
        for spec in specs {
            entry.entry(spec.name.clone()).or_insert_with(|| spec.clone());
        }
        Ok(specs.len() as u64)
    }
}

impl MemorySession {
    fn delete(&mut self, collection: &str, filter: &Filter, max: Option<usize>) -> BenchResult<u64> {
        {
            let faults = self.store.inner.faults.lock();
            if faults.unreachable {
                return Err(WriteError::connectivity("store unreachable").into());
            }
            if faults.fail_deletes {
                return Err(WriteError::rejected("delete refused").into());
            }
        }
        let mut collections = self.store.inner.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut removed = 0usize;
        docs.retain(|doc| {
            let hit = max.map_or(true, |m| removed < m) && matches(filter, doc);
            if hit {
                removed += 1;
            }
            !hit
        });
        Ok(removed as u64)
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Find
// ────────────────────────────────────────────────────────────────────────────────

fn execute_find(
    source: &[Document],
    options: &FindOptions,
    is_indexed: impl Fn(&str) -> bool,
) -> (Vec<Document>, usize) {
    let filter_indexed = options.filter.fields().first().map_or(false, |f| is_indexed(*f));
    let window = options.limit.map(|l| options.skip.saturating_add(l) as usize);
    let skip = options.skip as usize;
    let limit = options.limit.map_or(usize::MAX, |l| l as usize);

    let sort = options.sort.as_ref().filter(|s| !s.is_empty());
    let (docs, examined) = match sort {
        None => {
            let mut scanned = 0;
            let mut matched = Vec::new();
            for doc in source {
                scanned += 1;
                if matches(&options.filter, doc) {
                    matched.push(doc);
                    if window.map_or(false, |w| matched.len() >= w) {
                        break;
                    }
                }
            }
            let examined = if filter_indexed { matched.len() } else { scanned };
            let page: Vec<Document> = matched.into_iter().skip(skip).take(limit).cloned().collect();
            (page, examined)
        }
        Some(sort) => {
            let mut matched: Vec<&Document> =
                source.iter().filter(|d| matches(&options.filter, d)).collect();
            let sort_indexed = sort.leading_field().map_or(false, &is_indexed);
            // An in-memory sort keeps the top `skip + limit` candidates.
            let kept = window.map_or(matched.len(), |w| w.min(matched.len()));
            let examined = if options.filter.is_all() && sort_indexed {
                window.unwrap_or(source.len()).min(source.len())
            } else if filter_indexed {
                matched.len() + kept
            } else {
                source.len() + kept
            };
            matched.sort_by(|a, b| compare_docs(a, b, sort));
            let page = matched.into_iter().skip(skip).take(limit).cloned().collect();
            (page, examined)
        }
    };

    let docs = match &options.projection {
        Some(fields) => docs
            .into_iter()
            .map(|doc| {
                let mut out = Document::new();
                if let Some(id) = doc.get(ID_FIELD) {
                    out.insert(ID_FIELD.into(), id.clone());
                }
                for field in fields {
                    if let Some(v) = resolve(&doc, field) {
                        set_path(&mut out, field, v.clone());
                    }
                }
                out
            })
            .collect(),
        None => docs,
    };
    (docs, examined)
}

// ────────────────────────────────────────────────────────────────────────────────
// Aggregation
// ────────────────────────────────────────────────────────────────────────────────

/// Input documents for the pipeline and the documents examined to get them.
fn initial_input(
    source: &[Document],
    stages: &[Stage],
    is_indexed: impl Fn(&str) -> bool,
) -> (Vec<Document>, usize) {
    match stages {
        [Stage::Match(filter), ..] if filter.fields().first().map_or(false, |f| is_indexed(*f)) => {
            let docs: Vec<Document> = source.iter().filter(|d| matches(filter, d)).cloned().collect();
            let examined = docs.len();
            (docs, examined)
        }
        [Stage::Sort(sort), Stage::Limit(n), ..]
            if sort.leading_field().map_or(false, &is_indexed) =>
        {
            (source.to_vec(), (*n as usize).min(source.len()))
        }
        _ => (source.to_vec(), source.len()),
    }
}

fn apply_stages(
    mut docs: Vec<Document>,
    stages: &[Stage],
    collections: &HashMap<String, Vec<Document>>,
    examined: &mut usize,
) -> Vec<Document> {
    for stage in stages {
        docs = apply_stage(docs, stage, collections, examined);
    }
    docs
}

fn apply_stage(
    mut docs: Vec<Document>,
    stage: &Stage,
    collections: &HashMap<String, Vec<Document>>,
    examined: &mut usize,
) -> Vec<Document> {
    match stage {
        Stage::Match(filter) => {
            docs.retain(|d| matches(filter, d));
            docs
        }
        Stage::Lookup {
            from,
            local_field,
            foreign_field,
            as_field,
        } => {
            let foreign = collections.get(from).map_or(&[][..], Vec::as_slice);
            let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
            for (i, doc) in foreign.iter().enumerate() {
                for v in collect_values(doc, foreign_field) {
                    by_key.entry(value_key(v)).or_default().push(i);
                }
            }
            *examined += docs.len();
            for doc in docs.iter_mut() {
                let mut hits = BTreeSet::new();
                for v in collect_values(doc, local_field) {
                    if let Some(idx) = by_key.get(&value_key(v)) {
                        hits.extend(idx.iter().copied());
                    }
                }
                let joined: Vec<Value> = hits
                    .into_iter()
                    .map(|i| Value::Object(foreign[i].clone()))
                    .collect();
                set_path(doc, as_field, Value::Array(joined));
            }
            docs
        }
        Stage::Unwind(path) => {
            let mut out = Vec::with_capacity(docs.len());
            for doc in docs {
                match resolve(&doc, path).cloned() {
                    Some(Value::Array(items)) => {
                        for item in items {
                            let mut d = doc.clone();
                            set_path(&mut d, path, item);
                            out.push(d);
                        }
                    }
                    None | Some(Value::Null) => {}
                    Some(_) => out.push(doc),
                }
            }
            out
        }
        Stage::Group { key, accumulators } => group(&docs, key, accumulators),
        Stage::Project(pairs) => docs
            .iter()
            .map(|doc| {
                let mut out = Document::new();
                for (target, source) in pairs {
                    if let Some(v) = resolve(doc, source) {
                        set_path(&mut out, target, v.clone());
                    }
                }
                out
            })
            .collect(),
        Stage::Sort(sort) => {
            docs.sort_by(|a, b| compare_docs(a, b, sort));
            docs
        }
        Stage::Skip(n) => docs.into_iter().skip(*n as usize).collect(),
        Stage::Limit(n) => {
            docs.truncate(*n as usize);
            docs
        }
        Stage::Count(field) => {
            if docs.is_empty() {
                Vec::new()
            } else {
                let mut out = Document::new();
                out.insert(field.clone(), Value::from(docs.len() as u64));
                vec![out]
            }
        }
        Stage::Facet(facets) => {
            let mut out = Document::new();
            for (name, sub) in facets {
                let result = apply_stages(docs.clone(), sub, collections, examined);
                out.insert(
                    name.clone(),
                    Value::Array(result.into_iter().map(Value::Object).collect()),
                );
            }
            vec![out]
        }
    }
}

fn group(docs: &[Document], key: &str, accumulators: &[(String, Accumulator)]) -> Vec<Document> {
    let mut order: Vec<(Value, Vec<&Document>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for doc in docs {
        let k = resolve(doc, key).cloned().unwrap_or(Value::Null);
        let slot = *index.entry(value_key(&k)).or_insert_with(|| {
            order.push((k.clone(), Vec::new()));
            order.len() - 1
        });
        order[slot].1.push(doc);
    }

    order
        .into_iter()
        .map(|(k, members)| {
            let mut out = Document::new();
            out.insert(ID_FIELD.into(), k);
            for (name, acc) in accumulators {
                let value = match acc {
                    Accumulator::Count => Value::from(members.len() as u64),
                    Accumulator::Sum(path) => Value::from(numbers(&members, path).sum::<f64>()),
                    Accumulator::Avg(path) => {
                        let vals: Vec<f64> = numbers(&members, path).collect();
                        if vals.is_empty() {
                            Value::Null
                        } else {
                            Value::from(vals.iter().sum::<f64>() / vals.len() as f64)
                        }
                    }
                    Accumulator::DistinctCount(path) => {
                        let distinct: HashSet<String> = members
                            .iter()
                            .filter_map(|d| resolve(d, path))
                            .map(value_key)
                            .collect();
                        Value::from(distinct.len() as u64)
                    }
                };
                out.insert(name.clone(), value);
            }
            out
        })
        .collect()
}

fn numbers<'a>(docs: &'a [&'a Document], path: &'a str) -> impl Iterator<Item = f64> + 'a {
    docs.iter().filter_map(move |d| resolve(d, path).and_then(Value::as_f64))
}

// ────────────────────────────────────────────────────────────────────────────────
// Document helpers
// ────────────────────────────────────────────────────────────────────────────────

/// Value at a dotted path, without descending into arrays.
fn resolve<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Every value reachable at a dotted path, descending into arrays.
fn collect_values<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    fn walk<'a>(value: &'a Value, parts: &[&str], out: &mut Vec<&'a Value>) {
        match (parts.split_first(), value) {
            (None, Value::Array(items)) => out.extend(items.iter()),
            (None, v) => out.push(v),
            (Some(_), Value::Array(items)) => {
                for item in items {
                    walk(item, parts, out);
                }
            }
            (Some((head, rest)), Value::Object(map)) => {
                if let Some(v) = map.get(*head) {
                    walk(v, rest, out);
                }
            }
            (Some(_), _) => {}
        }
    }

    let parts: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some((head, rest)) = parts.split_first() {
        if let Some(v) = doc.get(*head) {
            walk(v, rest, &mut out);
        }
    }
    out
}

fn set_path(doc: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let slot = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Document::new()));
            if !slot.is_object() {
                *slot = Value::Object(Document::new());
            }
            if let Value::Object(child) = slot {
                set_path(child, rest, value);
            }
        }
    }
}

fn value_key(v: &Value) -> String {
    v.to_string()
}

fn type_rank(v: Option<&Value>) -> u8 {
    match v {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn compare_docs(a: &Document, b: &Document, sort: &SortSpec) -> Ordering {
    for key in sort.keys() {
        let ord = compare_values(resolve(a, &key.field), resolve(b, &key.field));
        let ord = match key.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn any_value(doc: &Document, field: &str, pred: impl Fn(&Value) -> bool) -> bool {
    collect_values(doc, field).into_iter().any(pred)
}

/// Same-type comparison; values of different types never satisfy a range or equality.
fn cmp_same_type(a: &Value, b: &Value) -> Option<Ordering> {
    (type_rank(Some(a)) == type_rank(Some(b))).then(|| compare_values(Some(a), Some(b)))
}

fn matches(filter: &Filter, doc: &Document) -> bool {
    match filter {
        Filter::All => true,
        Filter::Eq(f, v) => any_value(doc, f, |x| cmp_same_type(x, v) == Some(Ordering::Equal)),
        Filter::Gt(f, v) => any_value(doc, f, |x| cmp_same_type(x, v) == Some(Ordering::Greater)),
        Filter::Gte(f, v) => any_value(doc, f, |x| {
            matches!(cmp_same_type(x, v), Some(Ordering::Greater | Ordering::Equal))
        }),
        Filter::Lt(f, v) => any_value(doc, f, |x| cmp_same_type(x, v) == Some(Ordering::Less)),
        Filter::Lte(f, v) => any_value(doc, f, |x| {
            matches!(cmp_same_type(x, v), Some(Ordering::Less | Ordering::Equal))
        }),
        Filter::In(f, vs) => any_value(doc, f, |x| {
            vs.iter().any(|v| cmp_same_type(x, v) == Some(Ordering::Equal))
        }),
        Filter::Contains(f, needle) => {
            any_value(doc, f, |x| x.as_str().map_or(false, |s| s.contains(needle.as_str())))
        }
        Filter::And(parts) => parts.iter().all(|p| matches(p, doc)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortSpec;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    fn seeded(store: &MemoryStore, collection: &str, docs: Vec<Value>) -> Vec<RecordId> {
        let mut s = store.connect("memory://t").unwrap();
        docs.into_iter()
            .map(|d| s.insert_one(collection, doc(d), &DurabilityLevel::default()).unwrap())
            .collect()
    }

    fn prices(docs: &[Document]) -> Vec<f64> {
        docs.iter().map(|d| d["price"].as_f64().unwrap()).collect()
    }

    #[test]
    fn test_connect_rejects_foreign_scheme_and_unreachable() {
        let store = MemoryStore::default();
        assert!(matches!(store.connect("mongodb://x"), Err(BenchError::Connection(_))));
        store.set_reachable(false);
        assert!(matches!(store.connect("memory://x"), Err(BenchError::Connection(_))));
    }

    #[test]
    fn test_find_sort_skip_limit() {
        let store = MemoryStore::default();
        seeded(&store, "p", (1..=5).map(|i| json!({"price": i * 10})).collect());
        let mut s = store.connect("memory://t").unwrap();
        let opts = FindOptions::default().sort(SortSpec::new().desc("price")).skip(1).limit(2);
        let docs = s.find("p", &opts).unwrap().materialize().unwrap();
        assert_eq!(prices(&docs), vec![40.0, 30.0]);
    }

    #[test]
    fn test_filters_on_numbers_strings_and_arrays() {
        let store = MemoryStore::default();
        seeded(
            &store,
            "o",
            vec![
                json!({"status": "Delivered", "amount": 1500, "items": [{"pid": "a"}, {"pid": "b"}]}),
                json!({"status": "Pending", "amount": 900, "items": [{"pid": "c"}]}),
            ],
        );
        let mut s = store.connect("memory://t").unwrap();
        let count = |s: &mut Box<dyn Session>, f: Filter| {
            s.find("o", &FindOptions::new(f)).unwrap().drain_count().unwrap()
        };
        assert_eq!(count(&mut s, Filter::eq("status", "Delivered")), 1);
        assert_eq!(count(&mut s, Filter::gt("amount", 1000)), 1);
        assert_eq!(count(&mut s, Filter::gt("amount", "1000")), 0);
        assert_eq!(count(&mut s, Filter::eq("items.pid", "c")), 1);
        assert_eq!(count(&mut s, Filter::is_in("items.pid", vec![json!("b"), json!("c")])), 2);
        assert_eq!(count(&mut s, Filter::contains("status", "liver")), 1);
    }

    #[test]
    fn test_lookup_unwind_is_inner_join() {
        let store = MemoryStore::default();
        let ids = seeded(&store, "products", vec![json!({"price": 10}), json!({"price": 20})]);
        seeded(
            &store,
            "orders",
            vec![
                json!({"n": 1, "products": [{"productId": ids[0].as_str()}, {"productId": "missing"}]}),
                json!({"n": 2, "products": [{"productId": "gone"}]}),
            ],
        );
        let mut s = store.connect("memory://t").unwrap();
        let stages = vec![
            Stage::lookup("products", "products.productId", "_id", "product"),
            Stage::Unwind("product".into()),
        ];
        let docs = s.aggregate("orders", &stages).unwrap().materialize().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["n"], 1);
        assert_eq!(docs[0]["product"]["price"], 10);
    }

    #[test]
    fn test_group_accumulators_and_facet_count() {
        let store = MemoryStore::default();
        seeded(
            &store,
            "x",
            vec![
                json!({"cat": "A", "amt": 10.0, "m": "m1"}),
                json!({"cat": "A", "amt": 5.0, "m": "m1"}),
                json!({"cat": "B", "amt": 7.5, "m": "m2"}),
                json!({"cat": "A", "amt": 1.0, "m": "m3"}),
            ],
        );
        let mut s = store.connect("memory://t").unwrap();
        let stages = vec![
            Stage::Group {
                key: "cat".into(),
                accumulators: vec![
                    ("n".into(), Accumulator::Count),
                    ("sum".into(), Accumulator::Sum("amt".into())),
                    ("avg".into(), Accumulator::Avg("amt".into())),
                    ("makers".into(), Accumulator::DistinctCount("m".into())),
                ],
            },
            Stage::Sort(SortSpec::new().desc("sum")),
        ];
        let docs = s.aggregate("x", &stages).unwrap().materialize().unwrap();
        assert_eq!(docs[0]["_id"], "A");
        assert_eq!(docs[0]["n"], 3);
        assert_eq!(docs[0]["sum"], 16.0);
        assert_eq!(docs[0]["makers"], 2);
        assert_eq!(docs[1]["avg"], 7.5);

        let facet = vec![Stage::Facet(vec![
            ("data".into(), vec![Stage::Skip(1), Stage::Limit(2)]),
            ("count".into(), vec![Stage::Count("total".into())]),
        ])];
        let out = s.aggregate("x", &facet).unwrap().materialize().unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["data"].as_array().unwrap().len(), 2);
        assert_eq!(out[0]["count"][0]["total"], 4);
    }

    #[test]
    fn test_count_on_empty_input_emits_nothing() {
        let store = MemoryStore::default();
        let mut s = store.connect("memory://t").unwrap();
        let out = s
            .aggregate("none", &[Stage::Count("total".into())])
            .unwrap()
            .materialize()
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_project_builds_nested_paths() {
        let store = MemoryStore::default();
        seeded(&store, "x", vec![json!({"a": 1, "p": {"price": 3}})]);
        let mut s = store.connect("memory://t").unwrap();
        let stages = vec![Stage::project([("product.cost", "p.price"), ("a", "a")])];
        let out = s.aggregate("x", &stages).unwrap().materialize().unwrap();
        assert_eq!(out[0], doc(json!({"product": {"cost": 3}, "a": 1})));
    }

    #[test]
    fn test_injected_insert_failure_hits_one_call() {
        let store = MemoryStore::default();
        store.fail_insert_many_call(2, WriteErrorKind::Connectivity);
        let mut s = store.connect("memory://t").unwrap();
        let level = DurabilityLevel::default();
        let batch = || vec![doc(json!({"a": 1})), doc(json!({"a": 2}))];
        assert_eq!(s.insert_many("c", batch(), &level).unwrap(), 2);
        let err = s.insert_many("c", batch(), &level).unwrap_err();
        assert_eq!(err.write_kind(), Some(WriteErrorKind::Connectivity));
        assert_eq!(s.insert_many("c", batch(), &level).unwrap(), 2);
        assert_eq!(store.len("c"), 4);
    }

    #[test]
    fn test_create_indexes_is_idempotent() {
        let store = MemoryStore::default();
        let mut s = store.connect("memory://t").unwrap();
        let specs = vec![IndexSpec::new(SortSpec::new().desc("price"))];
        assert_eq!(s.create_indexes("p", &specs).unwrap(), 1);
        assert_eq!(s.create_indexes("p", &specs).unwrap(), 1);
        assert_eq!(store.index_names("p"), vec!["price_-1".to_string()]);

        store.reject_indexes_on("q");
        assert!(matches!(s.create_indexes("q", &specs), Err(BenchError::Index(_))));
    }

    #[test]
    fn test_delete_one_removes_single_match() {
        let store = MemoryStore::default();
        seeded(&store, "x", vec![json!({"k": 1}), json!({"k": 1})]);
        let mut s = store.connect("memory://t").unwrap();
        assert_eq!(s.delete_one("x", &Filter::eq("k", 1)).unwrap(), 1);
        assert_eq!(store.len("x"), 1);
        assert_eq!(s.delete_many("x", &Filter::All).unwrap(), 1);
        assert!(store.is_empty("x"));
    }

    #[test]
    fn test_unsorted_scan_examines_only_window() {
        let docs: Vec<Document> = (0..100).map(|i| doc(json!({"i": i}))).collect();
        let opts = FindOptions::default().skip(10).limit(5);
        let (page, examined) = execute_find(&docs, &opts, |_| false);
        assert_eq!(page.len(), 5);
        assert_eq!(page[0]["i"], 10);
        assert_eq!(examined, 15);

        let sorted = opts.clone().sort(SortSpec::new().asc("i"));
        assert_eq!(execute_find(&docs, &sorted, |_| false).1, 100 + 15);
        assert_eq!(execute_find(&docs, &sorted, |f| f == "i").1, 15);
    }

    #[test]
    fn test_unindexed_sort_cost_grows_with_skip() {
        let docs: Vec<Document> = (0..2_000).map(|i| doc(json!({"createdAt": i}))).collect();
        let cost = |skip: u64| {
            let opts = FindOptions::default()
                .skip(skip)
                .limit(10)
                .sort(SortSpec::new().desc("createdAt"));
            execute_find(&docs, &opts, |_| false).1
        };
        let costs: Vec<usize> = [0, 500, 1_500, 5_000].into_iter().map(cost).collect();
        assert_eq!(costs, vec![2_010, 2_510, 3_510, 4_000]);
    }
}
