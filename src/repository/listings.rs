//! Persistence for the three append-mostly record tables: `catalog_listings`
//! (immutable after insert), `validation_results` (append-only audit trail),
//! and `object_data` (one row per successful detail scrape, history kept).

use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::RunQueryDsl;
use serde_json::Value as Json;
use thiserror::Error;

use crate::models::{
    CatalogListing, CatalogTaskStatus, NewCatalogListing, NewObjectData, NewValidationResult,
    ObjectData, ValidationResult,
};
use crate::schema::catalog_listings::dsl as cl;
use crate::schema::catalog_tasks::dsl as ct;
use crate::schema::object_data::dsl as od;
use crate::schema::validation_results::dsl as vr;

use super::pool::PgPool;
use super::state_machine;

#[derive(Error, Debug)]
pub enum ListingsError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error(transparent)]
    StateMachine(#[from] state_machine::StateMachineError),

    #[error("catalog task {0} is not in a state that can be completed")]
    CompleteConflict(i32),
}

pub type Result<T> = std::result::Result<T, ListingsError>;

/// Owned input for one scraped catalog row, built by the catalog parser
/// collaborator. Kept owned (rather than borrowing `NewCatalogListing<'a>`
/// directly) so callers can assemble a `Vec` across `.await` points without
/// fighting borrowck.
#[derive(Debug, Clone, Default)]
pub struct CatalogListingInput {
    pub avito_item_id: String,
    pub title: Option<String>,
    pub price: Option<BigDecimal>,
    pub snippet_text: Option<String>,
    pub seller_name: Option<String>,
    pub seller_id: Option<String>,
    pub seller_rating: Option<BigDecimal>,
    pub seller_reviews: Option<i32>,
    pub images_count: i32,
}

/// Persist a batch of scraped listings, complete the catalog task, and
/// transition its articulum `CATALOG_PARSING -> CATALOG_PARSED`, all in one
/// transaction. If the state transition's precondition fails, the whole
/// insert rolls back with it — this is the `SUCCESS` arm of the browser
/// worker's completion policy.
pub async fn complete_catalog_task_with_listings(
    pool: &PgPool,
    task_id: i32,
    articulum_id: i32,
    listings: Vec<CatalogListingInput>,
) -> Result<()> {
    let mut conn = pool.get().await?;

    conn.transaction(|conn| {
        async move {
            if !state_machine::to_catalog_parsed(conn, articulum_id).await? {
                return Err(ListingsError::CompleteConflict(task_id));
            }

            let rows: Vec<NewCatalogListing> = listings
                .iter()
                .map(|l| NewCatalogListing {
                    articulum_id,
                    avito_item_id: &l.avito_item_id,
                    title: l.title.as_deref(),
                    price: l.price.clone(),
                    snippet_text: l.snippet_text.as_deref(),
                    seller_name: l.seller_name.as_deref(),
                    seller_id: l.seller_id.as_deref(),
                    seller_rating: l.seller_rating.clone(),
                    seller_reviews: l.seller_reviews,
                    images_count: l.images_count,
                })
                .collect();

            if !rows.is_empty() {
                diesel::insert_into(cl::catalog_listings)
                    .values(&rows)
                    .on_conflict((cl::articulum_id, cl::avito_item_id))
                    .do_nothing()
                    .execute(conn)
                    .await?;
            }

            diesel::update(ct::catalog_tasks.filter(ct::id.eq(task_id)))
                .set((
                    ct::status.eq(CatalogTaskStatus::Completed.as_str()),
                    ct::updated_at.eq(Utc::now()),
                ))
                .execute(conn)
                .await?;

            Ok(())
        }
        .scope_boxed()
    })
    .await
}

/// All catalog listings scraped for `articulum_id`, in insertion order —
/// the input set the validation pipeline's three stages filter down.
pub async fn listings_for_articulum(pool: &PgPool, articulum_id: i32) -> Result<Vec<CatalogListing>> {
    let mut conn = pool.get().await?;
    Ok(cl::catalog_listings
        .filter(cl::articulum_id.eq(articulum_id))
        .order(cl::id.asc())
        .select(CatalogListing::as_select())
        .load(&mut conn)
        .await?)
}

/// Append one audit row. Never updates or deletes an existing row — callers
/// that re-run a stage (there are none today) would produce a second row,
/// not overwrite the first.
pub async fn record_validation_result(
    pool: &PgPool,
    articulum_id: i32,
    avito_item_id: &str,
    validation_type: &str,
    passed: bool,
    rejection_reason: Option<&str>,
) -> Result<ValidationResult> {
    let mut conn = pool.get().await?;
    Ok(diesel::insert_into(vr::validation_results)
        .values(NewValidationResult {
            articulum_id,
            avito_item_id,
            validation_type,
            passed,
            rejection_reason,
        })
        .get_result(&mut conn)
        .await?)
}

pub async fn validation_results_for_articulum(
    pool: &PgPool,
    articulum_id: i32,
) -> Result<Vec<ValidationResult>> {
    let mut conn = pool.get().await?;
    Ok(vr::validation_results
        .filter(vr::articulum_id.eq(articulum_id))
        .order(vr::id.asc())
        .select(ValidationResult::as_select())
        .load(&mut conn)
        .await?)
}

/// Owned input for one successfully scraped detail page.
#[derive(Debug, Clone, Default)]
pub struct ObjectDataInput {
    pub title: Option<String>,
    pub price: Option<BigDecimal>,
    pub seller_name: Option<String>,
    pub seller_id: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub characteristics: Option<Json>,
}

/// Insert one `object_data` row. Multiple rows per listing are allowed
/// (history) — this never updates in place.
pub async fn insert_object_data(
    pool: &PgPool,
    articulum_id: i32,
    avito_item_id: &str,
    data: ObjectDataInput,
) -> Result<ObjectData> {
    let mut conn = pool.get().await?;
    Ok(diesel::insert_into(od::object_data)
        .values(NewObjectData {
            articulum_id,
            avito_item_id,
            title: data.title.as_deref(),
            price: data.price,
            seller_name: data.seller_name.as_deref(),
            seller_id: data.seller_id.as_deref(),
            description: data.description.as_deref(),
            location: data.location.as_deref(),
            characteristics: data.characteristics,
        })
        .get_result(&mut conn)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_listing_input_defaults_to_no_optional_fields() {
        let input = CatalogListingInput::default();
        assert!(input.title.is_none());
        assert_eq!(input.images_count, 0);
    }
}
