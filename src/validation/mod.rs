//! The three-stage validation pipeline: `price_filter` -> `mechanical` ->
//! `ai`. Each stage writes one append-only `validation_results` audit row
//! per listing it evaluates; any stage whose survivor count drops below
//! `MIN_VALIDATED_ITEMS` rejects the whole articulum.

pub mod ai;
pub mod mechanical;
pub mod price_filter;

use thiserror::Error;

use crate::config::Settings;
use crate::models::{CatalogListing, ValidationType};
use crate::repository::listings::{self, ListingsError};
use crate::repository::PgPool;

use ai::{AiListingInput, AiProviderError, AiValidator};

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error(transparent)]
    Listings(#[from] ListingsError),

    #[error(transparent)]
    AiProvider(#[from] AiProviderError),
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Which gate, if any, sent the articulum to `REJECTED_BY_MIN_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionStage {
    InsufficientListings,
    PriceFilter,
    Mechanical,
    Ai,
}

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Validated { survivor_count: usize },
    Rejected { stage: RejectionStage, survivor_count: usize },
}

/// Run the full pipeline for `articulum_id`/`articulum_code` against
/// whatever `catalog_listings` rows exist for it. `ai_validator` is `None`
/// when the `ai` stage is disabled or unconfigured, in which case the stage
/// is skipped entirely (mechanical survivors pass through unaudited).
pub async fn run_pipeline(
    pool: &PgPool,
    settings: &Settings,
    ai_validator: Option<&dyn AiValidator>,
    articulum_id: i32,
    articulum_code: &str,
) -> Result<PipelineOutcome> {
    let n = settings.min_validated_items;
    let all_listings = listings::listings_for_articulum(pool, articulum_id).await?;

    if all_listings.len() < n {
        return Ok(PipelineOutcome::Rejected {
            stage: RejectionStage::InsufficientListings,
            survivor_count: all_listings.len(),
        });
    }

    let price_survivors = run_price_filter(pool, articulum_id, &all_listings, settings).await?;
    if price_survivors.len() < n {
        return Ok(PipelineOutcome::Rejected {
            stage: RejectionStage::PriceFilter,
            survivor_count: price_survivors.len(),
        });
    }

    let mechanical_survivors =
        run_mechanical(pool, articulum_id, articulum_code, &price_survivors, settings).await?;
    if mechanical_survivors.len() < n {
        return Ok(PipelineOutcome::Rejected {
            stage: RejectionStage::Mechanical,
            survivor_count: mechanical_survivors.len(),
        });
    }

    let Some(validator) = ai_validator else {
        return Ok(PipelineOutcome::Validated {
            survivor_count: mechanical_survivors.len(),
        });
    };

    let ai_survivor_count =
        run_ai(pool, articulum_id, articulum_code, &mechanical_survivors, validator, settings).await?;
    if ai_survivor_count < n {
        return Ok(PipelineOutcome::Rejected {
            stage: RejectionStage::Ai,
            survivor_count: ai_survivor_count,
        });
    }

    Ok(PipelineOutcome::Validated {
        survivor_count: ai_survivor_count,
    })
}

async fn run_price_filter<'a>(
    pool: &PgPool,
    articulum_id: i32,
    listings_in: &'a [CatalogListing],
    settings: &Settings,
) -> Result<Vec<&'a CatalogListing>> {
    let floor = settings.min_price_decimal();
    let verdicts = price_filter::evaluate(listings_in, floor.as_ref());

    for verdict in &verdicts {
        listings::record_validation_result(
            pool,
            articulum_id,
            &verdict.avito_item_id,
            ValidationType::PriceFilter.as_str(),
            verdict.passed,
            verdict.rejection_reason.as_deref(),
        )
        .await?;
    }

    let passed_ids: std::collections::HashSet<&str> = verdicts
        .iter()
        .filter(|v| v.passed)
        .map(|v| v.avito_item_id.as_str())
        .collect();

    Ok(listings_in
        .iter()
        .filter(|l| passed_ids.contains(l.avito_item_id.as_str()))
        .collect())
}

async fn run_mechanical<'a>(
    pool: &PgPool,
    articulum_id: i32,
    articulum_code: &str,
    listings_in: &[&'a CatalogListing],
    settings: &Settings,
) -> Result<Vec<&'a CatalogListing>> {
    let owned: Vec<CatalogListing> = listings_in.iter().map(|l| (*l).clone()).collect();
    let config = mechanical::MechanicalConfig {
        articulum: articulum_code,
        require_articulum_in_text: settings.require_articulum_in_text,
        stopwords: &settings.mechanical_stopwords,
        min_seller_reviews: settings.min_seller_reviews,
    };
    let verdicts = mechanical::evaluate(&owned, &config);

    for verdict in &verdicts {
        listings::record_validation_result(
            pool,
            articulum_id,
            &verdict.avito_item_id,
            ValidationType::Mechanical.as_str(),
            verdict.passed,
            verdict.rejection_reason.as_deref(),
        )
        .await?;
    }

    let passed_ids: std::collections::HashSet<&str> = verdicts
        .iter()
        .filter(|v| v.passed)
        .map(|v| v.avito_item_id.as_str())
        .collect();

    Ok(listings_in
        .iter()
        .filter(|l| passed_ids.contains(l.avito_item_id.as_str()))
        .copied()
        .collect())
}

/// Runs the AI collaborator over `listings_in` and returns the number that
/// passed. Image collection (`use_images`) is wired through as a flag only —
/// actually fetching image bytes is the out-of-scope object-store
/// collaborator's job, so `image_urls` is always empty here.
async fn run_ai(
    pool: &PgPool,
    articulum_id: i32,
    articulum_code: &str,
    listings_in: &[&CatalogListing],
    validator: &dyn AiValidator,
    settings: &Settings,
) -> Result<usize> {
    let inputs: Vec<AiListingInput> = listings_in
        .iter()
        .map(|l| AiListingInput {
            avito_item_id: l.avito_item_id.clone(),
            title: l.title.clone(),
            snippet_text: l.snippet_text.clone(),
            price: l.price.as_ref().map(|p| p.to_string()),
            image_urls: Vec::new(),
        })
        .collect();

    let outcome = validator
        .validate(articulum_code, &inputs, settings.ai_use_images)
        .await?;

    let passed: std::collections::HashSet<&str> =
        outcome.passed_ids.iter().map(|s| s.as_str()).collect();

    for listing in listings_in {
        let id = listing.avito_item_id.as_str();
        let rejection = outcome
            .rejected
            .iter()
            .find(|r| r.avito_item_id == id)
            .map(|r| r.reason.as_str());
        listings::record_validation_result(
            pool,
            articulum_id,
            id,
            ValidationType::Ai.as_str(),
            passed.contains(id),
            rejection,
        )
        .await?;
    }

    Ok(passed.len())
}
