//! Product and Order records and their document form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A stored record: a JSON object keyed by field name.
pub type Document = Map<String, Value>;

/// Background catalogue collection.
pub const PRODUCTS: &str = "products";
/// Orders referencing [`PRODUCTS`] by identifier.
pub const ORDERS: &str = "orders";
/// Store-assigned identifier field.
pub const ID_FIELD: &str = "_id";

/// Store-assigned record identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read the `_id` of a stored document.
    pub fn of(doc: &Document) -> Option<Self> {
        doc.get(ID_FIELD)
            .and_then(Value::as_str)
            .map(|s| Self(s.to_string()))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<RecordId> for Value {
    fn from(id: RecordId) -> Self {
        Value::String(id.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Electronics,
    Clothing,
    Food,
    Tools,
    Books,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Electronics,
        Category::Clothing,
        Category::Food,
        Category::Tools,
        Category::Books,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Electronics => "Electronics",
            Category::Clothing => "Clothing",
            Category::Food => "Food",
            Category::Tools => "Tools",
            Category::Books => "Books",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Processing => "Processing",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

/// Catalogue entry. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub oem_number: String,
    pub zip_code: String,
    pub supplier_id: String,
    pub product_name: String,
    pub price: f64,
    pub quantity: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub description: String,
    pub manufacturer: String,
    pub category: Category,
}

/// One referenced product inside an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: RecordId,
    pub quantity: u32,
}

/// Customer order. `total_amount` is independent of the referenced prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub order_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub shipping_address: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub order_date: DateTime<Utc>,
    pub status: OrderStatus,
    pub products: Vec<LineItem>,
    pub total_amount: f64,
}

impl Product {
    pub fn to_document(&self) -> Document {
        to_document(self)
    }

    pub fn from_document(doc: &Document) -> Option<Self> {
        serde_json::from_value(Value::Object(doc.clone())).ok()
    }
}

impl Order {
    pub fn to_document(&self) -> Document {
        to_document(self)
    }

    pub fn from_document(doc: &Document) -> Option<Self> {
        serde_json::from_value(Value::Object(doc.clone())).ok()
    }
}

fn to_document<T: Serialize>(record: &T) -> Document {
    match serde_json::to_value(record) {
        Ok(Value::Object(map)) => map,
        _ => Document::new(),
    }
}

/// Timestamps are stored as epoch milliseconds.
pub fn timestamp_value(ts: DateTime<Utc>) -> Value {
    Value::from(ts.timestamp_millis())
}
