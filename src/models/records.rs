use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value as Json;

use crate::schema::{catalog_listings, object_data, validation_results};

/// A single search-result row scraped off a catalog page, before any
/// validation has run against it.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = catalog_listings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CatalogListing {
    pub id: i32,
    pub articulum_id: i32,
    pub avito_item_id: String,
    pub title: Option<String>,
    pub price: Option<BigDecimal>,
    pub snippet_text: Option<String>,
    pub seller_name: Option<String>,
    pub seller_id: Option<String>,
    pub seller_rating: Option<BigDecimal>,
    pub seller_reviews: Option<i32>,
    pub images_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = catalog_listings)]
pub struct NewCatalogListing<'a> {
    pub articulum_id: i32,
    pub avito_item_id: &'a str,
    pub title: Option<&'a str>,
    pub price: Option<BigDecimal>,
    pub snippet_text: Option<&'a str>,
    pub seller_name: Option<&'a str>,
    pub seller_id: Option<&'a str>,
    pub seller_rating: Option<BigDecimal>,
    pub seller_reviews: Option<i32>,
    pub images_count: i32,
}

/// Which validation stage produced a `validation_results` row. Kept as an
/// owned enum rather than re-parsing strings at every call site that branches
/// on stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationType {
    PriceFilter,
    Mechanical,
    Ai,
}

impl ValidationType {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationType::PriceFilter => "price_filter",
            ValidationType::Mechanical => "mechanical",
            ValidationType::Ai => "ai",
        }
    }
}

impl std::fmt::Display for ValidationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized validation type: {0}")]
pub struct UnknownValidationType(pub String);

impl std::str::FromStr for ValidationType {
    type Err = UnknownValidationType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "price_filter" => Ok(ValidationType::PriceFilter),
            "mechanical" => Ok(ValidationType::Mechanical),
            "ai" => Ok(ValidationType::Ai),
            other => Err(UnknownValidationType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = validation_results)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ValidationResult {
    pub id: i32,
    pub articulum_id: i32,
    pub avito_item_id: String,
    pub validation_type: String,
    pub passed: bool,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = validation_results)]
pub struct NewValidationResult<'a> {
    pub articulum_id: i32,
    pub avito_item_id: &'a str,
    pub validation_type: &'a str,
    pub passed: bool,
    pub rejection_reason: Option<&'a str>,
}

/// The fully parsed listing page, persisted once an object task completes.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = object_data)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ObjectData {
    pub id: i32,
    pub articulum_id: i32,
    pub avito_item_id: String,
    pub title: Option<String>,
    pub price: Option<BigDecimal>,
    pub seller_name: Option<String>,
    pub seller_id: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub characteristics: Option<Json>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = object_data)]
pub struct NewObjectData<'a> {
    pub articulum_id: i32,
    pub avito_item_id: &'a str,
    pub title: Option<&'a str>,
    pub price: Option<BigDecimal>,
    pub seller_name: Option<&'a str>,
    pub seller_id: Option<&'a str>,
    pub description: Option<&'a str>,
    pub location: Option<&'a str>,
    pub characteristics: Option<Json>,
}
