//! Query workload definitions.
//!
//! A [`Pipeline`] is a named, parameterized query shape. [`Pipeline::plan`]
//! turns it plus one [`QueryParams`] point into a concrete [`QueryPlan`] that
//! the runner issues against a session. [`QueryMatrix`] expands the
//! parameter cross-product for each pipeline.

use crate::model::{timestamp_value, ID_FIELD, ORDERS, PRODUCTS};
use crate::query::{Accumulator, Filter, FindOptions, SortSpec, Stage};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

/// Sub-result names of every faceted pipeline.
pub const FACET_DATA: &str = "data";
pub const FACET_COUNT: &str = "count";
pub const COUNT_FIELD: &str = "total";

const DEFAULT_WINDOW_DAYS: u32 = 30;

// ────────────────────────────────────────────────────────────────────────────────
// Catalog
// ────────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinShape {
    /// Every (order, product) pair, newest orders first.
    Simple,
    /// Delivered orders above an amount, ranked by amount.
    Filtered,
    /// Recent orders joined to expensive, well-stocked products.
    Complex,
    /// Per-category totals over the joined pairs.
    Grouped,
}

impl JoinShape {
    pub const ALL: [JoinShape; 4] = [
        JoinShape::Simple,
        JoinShape::Filtered,
        JoinShape::Complex,
        JoinShape::Grouped,
    ];
}

impl fmt::Display for JoinShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JoinShape::Simple => "simple",
            JoinShape::Filtered => "filtered",
            JoinShape::Complex => "complex",
            JoinShape::Grouped => "grouped",
        })
    }
}

/// Naive joins expand every order before filtering or limiting; optimized
/// ones filter, sort and limit the orders first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Naive,
    Optimized,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Variant::Naive => "naive",
            Variant::Optimized => "optimized",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pipeline {
    /// Offset pagination: `skip` then `page_size` records.
    Pagination { sort: Option<SortSpec> },
    SortedScan { sort: SortSpec },
    FilteredScan { label: String, filter: Filter },
    Join { shape: JoinShape, variant: Variant },
    /// One data page plus the total matching count in a single call.
    CountedPagination,
}

/// Which parameters a pipeline varies over besides the page size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Axes {
    pub skip: bool,
    pub date_window: bool,
}

impl Pipeline {
    pub fn name(&self) -> String {
        match self {
            Pipeline::Pagination { sort: None } => "pagination".to_string(),
            Pipeline::Pagination { sort: Some(s) } => format!("pagination [{}]", s),
            Pipeline::SortedScan { sort } => format!("sorted scan [{}]", sort),
            Pipeline::FilteredScan { label, .. } => format!("filtered scan [{}]", label),
            Pipeline::Join { shape, variant } => format!("{} join ({})", shape, variant),
            Pipeline::CountedPagination => "counted pagination".to_string(),
        }
    }

    pub fn collection(&self) -> &'static str {
        match self {
            Pipeline::Pagination { .. }
            | Pipeline::SortedScan { .. }
            | Pipeline::FilteredScan { .. } => PRODUCTS,
            Pipeline::Join { .. } | Pipeline::CountedPagination => ORDERS,
        }
    }

    pub fn axes(&self) -> Axes {
        match self {
            Pipeline::Pagination { .. } => Axes {
                skip: true,
                date_window: false,
            },
            Pipeline::Join {
                shape: JoinShape::Complex,
                ..
            } => Axes {
                skip: false,
                date_window: true,
            },
            Pipeline::CountedPagination => Axes {
                skip: true,
                date_window: true,
            },
            _ => Axes::default(),
        }
    }

    /// Field whose index coverage decides how the store can serve this query.
    pub fn access_field(&self) -> Option<&str> {
        match self {
            Pipeline::Pagination { sort } => sort.as_ref().and_then(SortSpec::leading_field),
            Pipeline::SortedScan { sort } => sort.leading_field(),
            Pipeline::FilteredScan { filter, .. } => filter.fields().first().copied(),
            Pipeline::Join { .. } => Some("products.productId"),
            Pipeline::CountedPagination => Some("orderDate"),
        }
    }

    pub fn plan(&self, params: &QueryParams, now: DateTime<Utc>) -> QueryPlan {
        let collection = self.collection();
        let page = params.page_size;
        match self {
            Pipeline::Pagination { sort } => {
                let mut options = FindOptions::default().skip(params.skip).limit(page);
                if let Some(sort) = sort {
                    options = options.sort(sort.clone());
                }
                QueryPlan::Find {
                    collection,
                    options,
                }
            }
            Pipeline::SortedScan { sort } => QueryPlan::Find {
                collection,
                options: FindOptions::default().sort(sort.clone()).limit(page),
            },
            Pipeline::FilteredScan { filter, .. } => QueryPlan::Find {
                collection,
                options: FindOptions::new(filter.clone()).limit(page),
            },
            Pipeline::Join { shape, variant } => {
                let since = window_start(now, params.date_window_days);
                let (stages, count) = join_stages(*shape, *variant, page, since);
                QueryPlan::Aggregate {
                    collection,
                    stages,
                    count,
                }
            }
            Pipeline::CountedPagination => {
                let since = window_start(now, params.date_window_days);
                QueryPlan::Aggregate {
                    collection,
                    stages: vec![
                        Stage::Match(since),
                        Stage::Sort(SortSpec::new().desc("orderDate")),
                        facet(vec![Stage::Skip(params.skip), Stage::Limit(page)]),
                    ],
                    count: ResultCount::Facet,
                }
            }
        }
    }
}

/// Every pipeline the benchmark measures.
pub fn standard_catalog() -> Vec<Pipeline> {
    let mut catalog = vec![
        Pipeline::Pagination { sort: None },
        Pipeline::Pagination {
            sort: Some(SortSpec::new().desc("createdAt")),
        },
    ];
    for sort in [
        SortSpec::new().desc("price"),
        SortSpec::new().desc("createdAt"),
        SortSpec::new().asc("manufacturer"),
        SortSpec::new().asc("category").desc("price"),
        SortSpec::new().desc("quantity"),
        SortSpec::new().asc("oemNumber"),
    ] {
        catalog.push(Pipeline::SortedScan { sort });
    }
    catalog.push(Pipeline::FilteredScan {
        label: "price > 500".into(),
        filter: Filter::gt("price", 500),
    });
    catalog.push(Pipeline::FilteredScan {
        label: "description ~ test".into(),
        filter: Filter::contains("description", "test"),
    });
    for shape in JoinShape::ALL {
        for variant in [Variant::Naive, Variant::Optimized] {
            catalog.push(Pipeline::Join { shape, variant });
        }
    }
    catalog.push(Pipeline::CountedPagination);
    catalog
}

// ────────────────────────────────────────────────────────────────────────────────
// Plans
// ────────────────────────────────────────────────────────────────────────────────

/// How the result count of an aggregate is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCount {
    /// Number of documents the cursor yields.
    Documents,
    /// `count[0].total` of the single facet document; zero when absent.
    Facet,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    Find {
        collection: &'static str,
        options: FindOptions,
    },
    Aggregate {
        collection: &'static str,
        stages: Vec<Stage>,
        count: ResultCount,
    },
}

impl QueryPlan {
    pub fn collection(&self) -> &'static str {
        match self {
            QueryPlan::Find { collection, .. } | QueryPlan::Aggregate { collection, .. } => {
                collection
            }
        }
    }
}

fn window_start(now: DateTime<Utc>, days: u32) -> Filter {
    Filter::gte(
        "orderDate",
        timestamp_value(now - Duration::days(i64::from(days))),
    )
}

fn facet(data: Vec<Stage>) -> Stage {
    Stage::Facet(vec![
        (FACET_DATA.to_string(), data),
        (
            FACET_COUNT.to_string(),
            vec![Stage::Count(COUNT_FIELD.to_string())],
        ),
    ])
}

fn join_product() -> [Stage; 2] {
    [
        Stage::lookup(PRODUCTS, "products.productId", ID_FIELD, "product"),
        Stage::Unwind("product".into()),
    ]
}

fn order_product_projection(with_quantity: bool) -> Stage {
    let mut pairs = vec![
        ("orderId", "orderId"),
        ("customerName", "customerName"),
        ("orderDate", "orderDate"),
        ("totalAmount", "totalAmount"),
        ("status", "status"),
        ("product.name", "product.productName"),
        ("product.price", "product.price"),
        ("product.manufacturer", "product.manufacturer"),
    ];
    if with_quantity {
        pairs.push(("product.quantity", "product.quantity"));
    } else {
        pairs.push(("product.category", "product.category"));
    }
    Stage::project(pairs)
}

fn well_stocked_expensive() -> Filter {
    Filter::gt("product.quantity", 100).and(Filter::gt("product.price", 500))
}

fn join_stages(
    shape: JoinShape,
    variant: Variant,
    page: u64,
    since: Filter,
) -> (Vec<Stage>, ResultCount) {
    let mut stages = Vec::new();
    match (shape, variant) {
        (JoinShape::Simple, Variant::Naive) => {
            stages.extend(join_product());
            stages.push(Stage::Sort(
                SortSpec::new().desc("orderDate").desc("product.price"),
            ));
            stages.push(Stage::Limit(page));
            (stages, ResultCount::Documents)
        }
        (JoinShape::Simple, Variant::Optimized) => {
            stages.push(Stage::Sort(SortSpec::new().desc("orderDate")));
            stages.push(Stage::Limit(page));
            stages.extend(join_product());
            stages.push(order_product_projection(false));
            stages.push(facet(Vec::new()));
            (stages, ResultCount::Facet)
        }
        (JoinShape::Filtered, variant) => {
            stages.push(Stage::Match(
                Filter::eq("status", "Delivered").and(Filter::gt("totalAmount", 1000)),
            ));
            if variant == Variant::Optimized {
                stages.push(Stage::Sort(SortSpec::new().desc("totalAmount")));
                stages.push(Stage::Limit(page));
            }
            stages.extend(join_product());
            stages.push(Stage::Sort(
                SortSpec::new().desc("totalAmount").asc("product.category"),
            ));
            stages.push(Stage::Limit(page));
            (stages, ResultCount::Documents)
        }
        (JoinShape::Complex, Variant::Naive) => {
            stages.push(Stage::Match(since));
            stages.extend(join_product());
            stages.push(Stage::Match(well_stocked_expensive()));
            stages.push(Stage::Sort(
                SortSpec::new()
                    .asc("product.manufacturer")
                    .desc("product.price")
                    .desc("orderDate"),
            ));
            stages.push(Stage::Limit(page));
            (stages, ResultCount::Documents)
        }
        (JoinShape::Complex, Variant::Optimized) => {
            stages.push(Stage::Match(
                since
                    .and(Filter::gt("totalAmount", 500))
                    .and(Filter::eq("status", "Delivered")),
            ));
            stages.push(Stage::Sort(SortSpec::new().desc("orderDate")));
            stages.push(Stage::Limit(page));
            stages.extend(join_product());
            stages.push(Stage::Match(well_stocked_expensive()));
            stages.push(order_product_projection(true));
            stages.push(Stage::Sort(
                SortSpec::new().desc("product.price").desc("orderDate"),
            ));
            stages.push(facet(Vec::new()));
            (stages, ResultCount::Facet)
        }
        (JoinShape::Grouped, Variant::Naive) => {
            stages.extend(join_product());
            stages.push(Stage::Group {
                key: "product.category".into(),
                accumulators: vec![
                    ("total_orders".into(), Accumulator::Count),
                    ("total_amount".into(), Accumulator::Sum("totalAmount".into())),
                    ("avg_price".into(), Accumulator::Avg("product.price".into())),
                    (
                        "manufacturer_count".into(),
                        Accumulator::DistinctCount("product.manufacturer".into()),
                    ),
                ],
            });
            stages.push(Stage::project([
                ("category", ID_FIELD),
                ("total_orders", "total_orders"),
                ("total_amount", "total_amount"),
                ("avg_price", "avg_price"),
                ("manufacturer_count", "manufacturer_count"),
            ]));
            stages.push(Stage::Sort(
                SortSpec::new().desc("total_amount").desc("avg_price"),
            ));
            (stages, ResultCount::Documents)
        }
        (JoinShape::Grouped, Variant::Optimized) => {
            stages.push(Stage::Sort(SortSpec::new().desc("totalAmount")));
            stages.push(Stage::Limit(page));
            stages.extend(join_product());
            stages.push(Stage::Group {
                key: "product.category".into(),
                accumulators: vec![
                    ("total_amount".into(), Accumulator::Sum("totalAmount".into())),
                    ("order_count".into(), Accumulator::Count),
                    ("avg_order_value".into(), Accumulator::Avg("totalAmount".into())),
                    (
                        "unique_customer_count".into(),
                        Accumulator::DistinctCount("customerName".into()),
                    ),
                ],
            });
            stages.push(Stage::project([
                ("category", ID_FIELD),
                ("total_amount", "total_amount"),
                ("order_count", "order_count"),
                ("avg_order_value", "avg_order_value"),
                ("unique_customer_count", "unique_customer_count"),
            ]));
            stages.push(Stage::Sort(SortSpec::new().desc("total_amount")));
            stages.push(facet(Vec::new()));
            (stages, ResultCount::Facet)
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Parameter matrix
// ────────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct QueryParams {
    pub page_size: u64,
    pub skip: u64,
    pub date_window_days: u32,
}

impl QueryParams {
    pub fn page(page_size: u64) -> Self {
        Self {
            page_size,
            skip: 0,
            date_window_days: DEFAULT_WINDOW_DAYS,
        }
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_window(mut self, days: u32) -> Self {
        self.date_window_days = days;
        self
    }
}

impl fmt::Display for QueryParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "page={} skip={} window={}d",
            self.page_size, self.skip, self.date_window_days
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMatrix {
    pub page_sizes: Vec<u64>,
    pub skip_offsets: Vec<u64>,
    pub date_windows_days: Vec<u32>,
}

impl QueryMatrix {
    /// Cross product of the axes `pipeline` uses; unused axes stay at their
    /// first value.
    pub fn params_for(&self, pipeline: &Pipeline) -> Vec<QueryParams> {
        let axes = pipeline.axes();
        let skips: Vec<u64> = if axes.skip {
            self.skip_offsets.clone()
        } else {
            vec![0]
        };
        let windows: Vec<u32> = if axes.date_window {
            self.date_windows_days.clone()
        } else {
            vec![self
                .date_windows_days
                .first()
                .copied()
                .unwrap_or(DEFAULT_WINDOW_DAYS)]
        };

        let mut out = Vec::with_capacity(self.page_sizes.len() * skips.len() * windows.len());
        for &page in &self.page_sizes {
            for &skip in &skips {
                for &window in &windows {
                    out.push(QueryParams::page(page).with_skip(skip).with_window(window));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn matrix() -> QueryMatrix {
        QueryMatrix {
            page_sizes: vec![10, 100],
            skip_offsets: vec![0, 1_000, 5_000],
            date_windows_days: vec![7, 30],
        }
    }

    fn stage_names(plan: &QueryPlan) -> Vec<&'static str> {
        match plan {
            QueryPlan::Aggregate { stages, .. } => stages.iter().map(Stage::name).collect(),
            QueryPlan::Find { .. } => Vec::new(),
        }
    }

    fn names_contain(catalog: &[Pipeline], name: &str) -> bool {
        catalog.iter().any(|p| p.name() == name)
    }

    #[test]
    fn test_catalog_names_are_unique() {
        let catalog = standard_catalog();
        assert_eq!(catalog.len(), 2 + 6 + 2 + 8 + 1);
        assert!(names_contain(&catalog, "pagination [createdAt desc]"));
        let names: HashSet<String> = catalog.iter().map(Pipeline::name).collect();
        assert_eq!(names.len(), catalog.len());
        assert!(names.contains("sorted scan [category asc + price desc]"));
        assert!(names.contains("grouped join (optimized)"));
    }

    #[test]
    fn test_params_follow_axes() {
        let m = matrix();
        let pagination = m.params_for(&Pipeline::Pagination { sort: None });
        assert_eq!(pagination.len(), 2 * 3);
        assert!(pagination.iter().all(|p| p.date_window_days == 7));

        let sorted = m.params_for(&Pipeline::SortedScan {
            sort: SortSpec::new().desc("price"),
        });
        assert_eq!(sorted.len(), 2);
        assert!(sorted.iter().all(|p| p.skip == 0));

        assert_eq!(m.params_for(&Pipeline::CountedPagination).len(), 2 * 3 * 2);
        let complex = Pipeline::Join {
            shape: JoinShape::Complex,
            variant: Variant::Naive,
        };
        assert_eq!(m.params_for(&complex).len(), 2 * 2);
    }

    #[test]
    fn test_optimized_joins_limit_before_lookup() {
        let now = Utc::now();
        for shape in JoinShape::ALL {
            let naive = Pipeline::Join {
                shape,
                variant: Variant::Naive,
            }
            .plan(&QueryParams::page(50), now);
            let optimized = Pipeline::Join {
                shape,
                variant: Variant::Optimized,
            }
            .plan(&QueryParams::page(50), now);

            let naive = stage_names(&naive);
            let optimized = stage_names(&optimized);
            let lookup = |names: &[&str]| names.iter().position(|n| *n == "lookup").unwrap();
            let first_limit = |names: &[&str]| names.iter().position(|n| *n == "limit");

            assert!(first_limit(&optimized).unwrap() < lookup(&optimized), "{shape}");
            assert!(first_limit(&naive).map_or(true, |i| i > lookup(&naive)), "{shape}");
        }
    }

    #[test]
    fn test_counted_pagination_is_one_facet_call() {
        let plan = Pipeline::CountedPagination.plan(&QueryParams::page(10).with_skip(20), Utc::now());
        match plan {
            QueryPlan::Aggregate { stages, count, .. } => {
                assert_eq!(count, ResultCount::Facet);
                match stages.last() {
                    Some(Stage::Facet(facets)) => {
                        assert_eq!(facets[0].0, FACET_DATA);
                        assert_eq!(facets[0].1, vec![Stage::Skip(20), Stage::Limit(10)]);
                        assert_eq!(facets[1].0, FACET_COUNT);
                    }
                    other => panic!("expected facet, got {:?}", other),
                }
            }
            QueryPlan::Find { .. } => panic!("expected aggregate"),
        }
    }

    #[test]
    fn test_sorted_pagination_sorts_before_skipping() {
        let pipeline = Pipeline::Pagination {
            sort: Some(SortSpec::new().desc("createdAt")),
        };
        assert_eq!(pipeline.axes().skip, true);
        assert_eq!(pipeline.access_field(), Some("createdAt"));
        assert_eq!(
            pipeline.plan(&QueryParams::page(10).with_skip(30), Utc::now()),
            QueryPlan::Find {
                collection: PRODUCTS,
                options: FindOptions::default()
                    .skip(30)
                    .limit(10)
                    .sort(SortSpec::new().desc("createdAt")),
            }
        );
    }

    #[test]
    fn test_scan_plans_target_products() {
        let plan = Pipeline::Pagination { sort: None }.plan(&QueryParams::page(10).with_skip(30), Utc::now());
        assert_eq!(
            plan,
            QueryPlan::Find {
                collection: PRODUCTS,
                options: FindOptions::default().skip(30).limit(10),
            }
        );
    }
}
