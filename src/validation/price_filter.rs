//! Stage `price_filter`: drop listings priced below a global floor.
//!
//! The floor is a single operator-configured constant, not derived from the
//! data the way `mechanical`'s outlier check is — it exists to cut obvious
//! junk/placeholder listings (price = 1, price = 0) before the statistical
//! checks downstream ever see them.

use bigdecimal::BigDecimal;

use crate::models::CatalogListing;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceFilterVerdict {
    pub avito_item_id: String,
    pub passed: bool,
    pub rejection_reason: Option<String>,
}

/// Evaluate every listing against `floor`. A listing with no recorded price
/// fails when a floor is configured (there is nothing to compare) and
/// passes through untouched when it isn't.
pub fn evaluate(listings: &[CatalogListing], floor: Option<&BigDecimal>) -> Vec<PriceFilterVerdict> {
    listings
        .iter()
        .map(|listing| {
            let verdict = match (floor, &listing.price) {
                (None, _) => (true, None),
                (Some(_), None) => (false, Some("listing has no recorded price".to_string())),
                (Some(floor), Some(price)) if price < floor => {
                    (false, Some(format!("price {price} below floor {floor}")))
                }
                (Some(_), Some(_)) => (true, None),
            };
            PriceFilterVerdict {
                avito_item_id: listing.avito_item_id.clone(),
                passed: verdict.0,
                rejection_reason: verdict.1,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn listing(id: &str, price: Option<&str>) -> CatalogListing {
        CatalogListing {
            id: 0,
            articulum_id: 1,
            avito_item_id: id.to_string(),
            title: None,
            price: price.map(|p| BigDecimal::from_str(p).unwrap()),
            snippet_text: None,
            seller_name: None,
            seller_id: None,
            seller_rating: None,
            seller_reviews: None,
            images_count: 0,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn no_floor_passes_everything_including_unpriced_listings() {
        let listings = vec![listing("a", None), listing("b", Some("1.00"))];
        let verdicts = evaluate(&listings, None);
        assert!(verdicts.iter().all(|v| v.passed));
    }

    #[test]
    fn floor_rejects_below_threshold_and_unpriced_listings() {
        let floor = BigDecimal::from_str("500").unwrap();
        let listings = vec![
            listing("cheap", Some("100")),
            listing("unpriced", None),
            listing("ok", Some("1000")),
        ];
        let verdicts = evaluate(&listings, Some(&floor));
        assert!(!verdicts[0].passed);
        assert!(!verdicts[1].passed);
        assert!(verdicts[2].passed);
    }
}
