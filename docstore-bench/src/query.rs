//! Query vocabulary passed to a [`Session`](crate::store::Session).
//!
//! These types describe *what* to ask the store for; evaluating them is the
//! store's job. Field names are dotted paths (`product.price`,
//! `products.productId`).

use serde::Serialize;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// Conventional `1` / `-1` index-key notation.
    pub fn signum(&self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

/// Ordered list of sort keys; the first key is the most significant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct SortSpec(pub Vec<SortKey>);

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asc(mut self, field: impl Into<String>) -> Self {
        self.0.push(SortKey {
            field: field.into(),
            direction: SortDirection::Ascending,
        });
        self
    }

    pub fn desc(mut self, field: impl Into<String>) -> Self {
        self.0.push(SortKey {
            field: field.into(),
            direction: SortDirection::Descending,
        });
        self
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.0
    }

    pub fn leading_field(&self) -> Option<&str> {
        self.0.first().map(|k| k.field.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Renders as `price desc + category asc`.
impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|k| match k.direction {
                SortDirection::Ascending => format!("{} asc", k.field),
                SortDirection::Descending => format!("{} desc", k.field),
            })
            .collect();
        f.write_str(&parts.join(" + "))
    }
}

/// Predicate over documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub enum Filter {
    #[default]
    All,
    Eq(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    /// Substring match on a string field.
    Contains(String, String),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte(field.into(), value.into())
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In(field.into(), values)
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Filter::Contains(field.into(), needle.into())
    }

    /// Conjunction, flattening nested `And`s and dropping `All`.
    pub fn and(self, other: Filter) -> Self {
        let mut parts = Vec::new();
        for f in [self, other] {
            match f {
                Filter::All => {}
                Filter::And(inner) => parts.extend(inner),
                f => parts.push(f),
            }
        }
        match parts.len() {
            0 => Filter::All,
            1 => parts.remove(0),
            _ => Filter::And(parts),
        }
    }

    /// Fields the predicate reads, in declaration order.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Filter::All => Vec::new(),
            Filter::Eq(f, _)
            | Filter::Gt(f, _)
            | Filter::Gte(f, _)
            | Filter::Lt(f, _)
            | Filter::Lte(f, _)
            | Filter::In(f, _)
            | Filter::Contains(f, _) => vec![f.as_str()],
            Filter::And(parts) => parts.iter().flat_map(|p| p.fields()).collect(),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Filter::All)
    }
}

/// Options for a `find` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FindOptions {
    pub filter: Filter,
    pub sort: Option<SortSpec>,
    pub skip: u64,
    pub limit: Option<u64>,
    /// Fields to keep; `None` returns whole documents.
    pub projection: Option<Vec<String>>,
}

impl FindOptions {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn project<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Accumulator {
    Count,
    Sum(String),
    Avg(String),
    /// Number of distinct values of a field within the group.
    DistinctCount(String),
}

/// One aggregation pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stage {
    Match(Filter),
    /// Resolve `local_field` values against `foreign_field` of `from`,
    /// storing all matches as an array under `as_field`.
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    /// One output document per array element; empty or missing arrays drop the document.
    Unwind(String),
    /// Group by `key`; the output `_id` is the key value.
    Group {
        key: String,
        accumulators: Vec<(String, Accumulator)>,
    },
    /// `(output path, source path)` pairs; only listed outputs are kept.
    Project(Vec<(String, String)>),
    Sort(SortSpec),
    Skip(u64),
    Limit(u64),
    /// Single document `{ <field>: n }`, or nothing for empty input.
    Count(String),
    /// Run each sub-pipeline over the same input; emits one document of arrays.
    Facet(Vec<(String, Vec<Stage>)>),
}

impl Stage {
    pub fn lookup(
        from: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        as_field: impl Into<String>,
    ) -> Self {
        Stage::Lookup {
            from: from.into(),
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            as_field: as_field.into(),
        }
    }

    pub fn project<I, A, B>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        Stage::Project(pairs.into_iter().map(|(a, b)| (a.into(), b.into())).collect())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "match",
            Stage::Lookup { .. } => "lookup",
            Stage::Unwind(_) => "unwind",
            Stage::Group { .. } => "group",
            Stage::Project(_) => "project",
            Stage::Sort(_) => "sort",
            Stage::Skip(_) => "skip",
            Stage::Limit(_) => "limit",
            Stage::Count(_) => "count",
            Stage::Facet(_) => "facet",
        }
    }
}
