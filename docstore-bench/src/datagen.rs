//! Synthetic Product/Order generator (deterministic via ChaCha8Rng).
//!
//! Timestamps are relative to the clock captured when the generator is built,
//! so a generator is a pure function of `(seed, now)`.

use crate::model::{Category, LineItem, Order, OrderStatus, Product, RecordId};
use crate::{BenchError, BenchResult};
use chrono::{DateTime, Duration, Utc};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

const DESCRIPTION_MAX_CHARS: usize = 200;
const MAX_LINE_ITEMS: usize = 5;

const ADJECTIVES: &[&str] = &[
    "compact", "deluxe", "rugged", "classic", "smart", "portable", "premium", "organic",
    "wireless", "modular", "vintage", "heavy", "silent", "rapid", "eco",
];
const NOUNS: &[&str] = &[
    "drill", "jacket", "speaker", "kettle", "novel", "lamp", "wrench", "blender", "notebook",
    "charger", "sweater", "toolkit", "atlas", "monitor", "granola",
];
const FIRST_NAMES: &[&str] = &[
    "James", "Mary", "Robert", "Patricia", "John", "Jennifer", "Michael", "Linda", "David",
    "Elizabeth", "William", "Barbara", "Richard", "Susan", "Joseph", "Jessica",
];
const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Rodriguez",
    "Martinez", "Hernandez", "Lopez", "Wilson", "Anderson", "Thomas", "Taylor",
];
const COMPANY_SUFFIXES: &[&str] = &["Inc", "LLC", "Group", "Ltd", "and Sons", "PLC"];
const STREETS: &[&str] = &[
    "Maple", "Oak", "Cedar", "Pine", "Elm", "Washington", "Lake", "Hill", "Park", "River",
];
const STREET_SUFFIXES: &[&str] = &["Street", "Avenue", "Road", "Lane", "Drive", "Court"];
const CITIES: &[(&str, &str)] = &[
    ("Springfield", "IL"),
    ("Riverside", "CA"),
    ("Franklin", "TN"),
    ("Greenville", "SC"),
    ("Bristol", "CT"),
    ("Clinton", "IA"),
    ("Salem", "OR"),
    ("Madison", "WI"),
];
const EMAIL_DOMAINS: &[&str] = &["example.com", "example.org", "example.net", "mail.test"];
const LOREM: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit", "sed", "do",
    "eiusmod", "tempor", "incididunt", "labore", "dolore", "magna", "aliqua", "enim", "minim",
    "veniam", "quis", "nostrud", "exercitation", "ullamco", "laboris", "nisi", "aliquip",
    "commodo", "consequat", "test",
];

pub struct DataGen {
    rng: ChaCha8Rng,
    now: DateTime<Utc>,
}

impl DataGen {
    pub fn new(seed: u64) -> Self {
        Self::with_clock(seed, Utc::now())
    }

    /// Generator whose relative timestamps are anchored at `now`.
    pub fn with_clock(seed: u64, now: DateTime<Utc>) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            now,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Generate `n` Products.
    pub fn generate_products(&mut self, n: usize) -> Vec<Product> {
        (0..n).map(|_| self.product()).collect()
    }

    /// Generate `n` Orders whose line items reference ids from `pool`.
    ///
    /// Each order references 1–5 distinct products sampled without
    /// replacement; an empty pool is an error rather than empty references.
    pub fn generate_orders(&mut self, n: usize, pool: &[RecordId]) -> BenchResult<Vec<Order>> {
        if pool.is_empty() {
            return Err(BenchError::InsufficientReferenceData(
                "product identifier pool is empty".into(),
            ));
        }
        Ok((0..n).map(|_| self.order(pool)).collect())
    }

    pub fn product(&mut self) -> Product {
        let category = Category::ALL[self.rng.gen_range(0..Category::ALL.len())];
        let age_secs = self.rng.gen_range(0..30 * 86_400);
        Product {
            id: None,
            oem_number: self.rng.gen_range(1_000_000..=9_999_999u32).to_string(),
            zip_code: format!("{:05}", self.rng.gen_range(501..=99_950u32)),
            supplier_id: self.rng.gen_range(1_000..=9_999u32).to_string(),
            product_name: format!("{} {}", self.pick(ADJECTIVES), self.pick(NOUNS)),
            price: round_cents(self.rng.gen_range(10.0..=1000.0)),
            quantity: self.rng.gen_range(1..=1000),
            created_at: self.now - Duration::seconds(age_secs),
            description: self.description(),
            manufacturer: self.company(),
            category,
        }
    }

    fn order(&mut self, pool: &[RecordId]) -> Order {
        let line_count = self.rng.gen_range(1..=MAX_LINE_ITEMS);
        let picked: Vec<RecordId> = pool
            .choose_multiple(&mut self.rng, line_count)
            .cloned()
            .collect();
        let products: Vec<LineItem> = picked
            .into_iter()
            .map(|product_id| LineItem {
                product_id,
                quantity: self.rng.gen_range(1..=5),
            })
            .collect();

        let first = self.pick(FIRST_NAMES);
        let last = self.pick(LAST_NAMES);
        let days = self.rng.gen_range(0..365);
        let secs = self.rng.gen_range(0..86_400);
        let status = OrderStatus::ALL[self.rng.gen_range(0..OrderStatus::ALL.len())];

        Order {
            id: None,
            order_id: self.rng.gen_range(10_000_000..=99_999_999u32).to_string(),
            customer_name: format!("{} {}", first, last),
            customer_email: format!(
                "{}.{}{}@{}",
                first.to_lowercase(),
                last.to_lowercase(),
                self.rng.gen_range(1..1000),
                self.pick(EMAIL_DOMAINS)
            ),
            shipping_address: self.address(),
            order_date: self.now - Duration::days(days) - Duration::seconds(secs),
            status,
            products,
            total_amount: round_cents(self.rng.gen_range(50.0..=5000.0)),
        }
    }

    /// Fixed-shape orders for write probes: `ORDER{i}` ids, one line item.
    pub fn probe_orders(&mut self, n: usize, product_id: &RecordId) -> Vec<Order> {
        (0..n)
            .map(|i| Order {
                id: None,
                order_id: format!("ORDER{}", i),
                customer_name: format!("Customer {}", i),
                customer_email: format!("customer{}@test.com", i),
                shipping_address: self.address(),
                order_date: self.now,
                status: OrderStatus::Pending,
                products: vec![LineItem {
                    product_id: product_id.clone(),
                    quantity: 1,
                }],
                total_amount: round_cents(self.rng.gen_range(50.0..=5000.0)),
            })
            .collect()
    }

    fn pick(&mut self, words: &[&'static str]) -> &'static str {
        words.choose(&mut self.rng).copied().unwrap_or_default()
    }

    fn company(&mut self) -> String {
        format!("{} {}", self.pick(LAST_NAMES), self.pick(COMPANY_SUFFIXES))
    }

    fn address(&mut self) -> String {
        let (city, state) = CITIES[self.rng.gen_range(0..CITIES.len())];
        format!(
            "{} {} {}, {}, {} {:05}",
            self.rng.gen_range(1..9999),
            self.pick(STREETS),
            self.pick(STREET_SUFFIXES),
            city,
            state,
            self.rng.gen_range(501..=99_950u32)
        )
    }

    fn description(&mut self) -> String {
        let target = self.rng.gen_range(20..DESCRIPTION_MAX_CHARS);
        let mut text = String::new();
        loop {
            let word = self.pick(LOREM);
            // +2 leaves room for the separator and the closing period.
            if text.len() + word.len() + 2 > target {
                break;
            }
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(word);
        }
        if let Some(first) = text.get(0..1) {
            let upper = first.to_uppercase();
            text.replace_range(0..1, &upper);
        }
        text.push('.');
        text
    }
}

fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn pool(n: usize) -> Vec<RecordId> {
        (0..n).map(|i| RecordId::new(format!("p{i:04}"))).collect()
    }

    #[test]
    fn test_product_fields_within_ranges() {
        let mut gen = DataGen::new(7);
        for p in gen.generate_products(500) {
            assert_eq!(p.oem_number.len(), 7);
            assert!(p.oem_number.chars().all(|c| c.is_ascii_digit()));
            assert_eq!(p.supplier_id.len(), 4);
            assert!((10.0..=1000.0).contains(&p.price));
            assert!((1..=1000).contains(&p.quantity));
            assert!(p.description.chars().count() <= DESCRIPTION_MAX_CHARS);
            assert!(p.created_at <= gen.now());
            assert!(p.id.is_none());
        }
    }

    #[test]
    fn test_categories_drawn_from_enumeration() {
        let mut gen = DataGen::new(11);
        let seen: HashSet<Category> = gen.generate_products(400).iter().map(|p| p.category).collect();
        assert_eq!(seen.len(), Category::ALL.len());
    }

    #[test]
    fn test_order_references_come_from_pool() {
        let pool = pool(20);
        let mut gen = DataGen::new(3);
        let orders = gen.generate_orders(300, &pool).unwrap();
        assert_eq!(orders.len(), 300);
        for order in &orders {
            assert!((1..=MAX_LINE_ITEMS).contains(&order.products.len()));
            let distinct: HashSet<_> = order.products.iter().map(|l| &l.product_id).collect();
            assert_eq!(distinct.len(), order.products.len(), "sampled without replacement");
            for line in &order.products {
                assert!(pool.contains(&line.product_id));
                assert!((1..=5).contains(&line.quantity));
            }
            assert!((50.0..=5000.0).contains(&order.total_amount));
            assert!(order.order_date <= gen.now());
            assert!(order.order_date > gen.now() - Duration::days(365));
            assert_eq!(order.order_id.len(), 8);
        }
    }

    #[test]
    fn test_small_pool_caps_line_items() {
        let pool = pool(1);
        let mut gen = DataGen::new(5);
        for order in gen.generate_orders(50, &pool).unwrap() {
            assert_eq!(order.products.len(), 1);
        }
    }

    #[test]
    fn test_empty_pool_is_insufficient_reference_data() {
        let mut gen = DataGen::new(1);
        let err = gen.generate_orders(10, &[]).unwrap_err();
        assert!(matches!(err, BenchError::InsufficientReferenceData(_)));
    }

    #[test]
    fn test_same_seed_and_clock_is_deterministic() {
        let now = Utc::now();
        let a = DataGen::with_clock(42, now).generate_products(10);
        let b = DataGen::with_clock(42, now).generate_products(10);
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn prop_orders_reference_only_the_pool(seed in any::<u64>(), size in 1usize..40, n in 1usize..60) {
            let pool = pool(size);
            let members: HashSet<&RecordId> = pool.iter().collect();
            let orders = DataGen::new(seed).generate_orders(n, &pool).unwrap();
            prop_assert_eq!(orders.len(), n);
            for order in &orders {
                prop_assert!(!order.products.is_empty());
                for item in &order.products {
                    prop_assert!(members.contains(&item.product_id));
                }
            }
        }
    }
}
