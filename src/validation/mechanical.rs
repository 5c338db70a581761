//! Stage `mechanical`: rule-based rejection applied after `price_filter`.
//!
//! Checks run in order per listing — articulum-in-text, stopword, seller-
//! reviews floor — followed by a group-level price-outlier pass computed
//! over whatever survives those three. A listing's `rejection_reason` is
//! whichever check first rejected it.

use bigdecimal::{BigDecimal, ToPrimitive};

use crate::models::CatalogListing;

/// One listing's outcome from the `mechanical` stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MechanicalVerdict {
    pub avito_item_id: String,
    pub passed: bool,
    pub rejection_reason: Option<String>,
}

pub struct MechanicalConfig<'a> {
    pub articulum: &'a str,
    pub require_articulum_in_text: bool,
    pub stopwords: &'a [String],
    pub min_seller_reviews: Option<i32>,
}

/// Run the full `mechanical` stage over `listings`, returning one verdict
/// per input listing in the same order.
pub fn evaluate(listings: &[CatalogListing], config: &MechanicalConfig) -> Vec<MechanicalVerdict> {
    let mut verdicts = Vec::with_capacity(listings.len());
    let mut survivors: Vec<&CatalogListing> = Vec::new();

    for listing in listings {
        if let Some(reason) = per_listing_check(listing, config) {
            verdicts.push(MechanicalVerdict {
                avito_item_id: listing.avito_item_id.clone(),
                passed: false,
                rejection_reason: Some(reason),
            });
        } else {
            survivors.push(listing);
        }
    }

    let bounds = price_outlier_bounds(&survivor_prices(&survivors));

    for listing in survivors {
        let verdict = match (&bounds, listing.price.as_ref().and_then(|p| p.to_f64())) {
            (Some(bounds), Some(price)) if price < bounds.lower => MechanicalVerdict {
                avito_item_id: listing.avito_item_id.clone(),
                passed: false,
                rejection_reason: Some(format!(
                    "price {price:.2} below outlier floor {:.2}",
                    bounds.lower
                )),
            },
            (Some(bounds), Some(price)) if price > bounds.upper => MechanicalVerdict {
                avito_item_id: listing.avito_item_id.clone(),
                passed: false,
                rejection_reason: Some(format!(
                    "price {price:.2} above outlier ceiling {:.2}",
                    bounds.upper
                )),
            },
            _ => MechanicalVerdict {
                avito_item_id: listing.avito_item_id.clone(),
                passed: true,
                rejection_reason: None,
            },
        };
        verdicts.push(verdict);
    }

    verdicts
}

fn per_listing_check(listing: &CatalogListing, config: &MechanicalConfig) -> Option<String> {
    if config.require_articulum_in_text && !articulum_in_text(listing, config.articulum) {
        return Some(format!("articulum {} not found in listing text", config.articulum));
    }

    if let Some(word) = matching_stopword(listing, config.stopwords) {
        return Some(format!("matched stopword \"{word}\""));
    }

    if let Some(min_reviews) = config.min_seller_reviews {
        let reviews = listing.seller_reviews.unwrap_or(0);
        if reviews < min_reviews {
            return Some(format!("seller has {reviews} reviews, below floor {min_reviews}"));
        }
    }

    None
}

fn listing_text(listing: &CatalogListing) -> String {
    [
        listing.title.as_deref().unwrap_or(""),
        listing.snippet_text.as_deref().unwrap_or(""),
        listing.seller_name.as_deref().unwrap_or(""),
    ]
    .join(" ")
}

fn articulum_in_text(listing: &CatalogListing, articulum: &str) -> bool {
    normalize(&listing_text(listing)).contains(&normalize(articulum))
}

fn matching_stopword<'a>(listing: &CatalogListing, stopwords: &'a [String]) -> Option<&'a str> {
    let text = normalize(&listing_text(listing));
    stopwords
        .iter()
        .find(|word| !word.is_empty() && text.contains(normalize(word).as_str()))
        .map(|word| word.as_str())
}

/// Lowercase, fold visually-similar Cyrillic/Latin letters onto one
/// alphabet, then strip everything that isn't alphanumeric. Listings on a
/// Cyrillic-script marketplace routinely mix scripts (accidentally or to
/// dodge naive substring checks), so folding homoglyphs before comparing
/// is load-bearing, not cosmetic.
pub fn normalize(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .filter_map(fold_homoglyph)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Map a lowercase character to its folded form, or drop it if it isn't
/// alphanumeric at all (the caller's `is_alphanumeric` filter runs after
/// this, so punctuation simply passes through unfolded and gets stripped
/// there).
fn fold_homoglyph(c: char) -> Option<char> {
    let folded = match c {
        'а' => 'a',
        'е' => 'e',
        'ё' => 'e',
        'о' => 'o',
        'р' => 'p',
        'с' => 'c',
        'у' => 'y',
        'х' => 'x',
        'к' => 'k',
        'м' => 'm',
        'т' => 't',
        'в' => 'b',
        'н' => 'h',
        other => other,
    };
    Some(folded)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct OutlierBounds {
    lower: f64,
    upper: f64,
}

fn survivor_prices(survivors: &[&CatalogListing]) -> Vec<f64> {
    survivors
        .iter()
        .filter_map(|l| l.price.as_ref().and_then(BigDecimal::to_f64))
        .collect()
}

/// Derives the price-outlier acceptance window: IQR-filter (k=1.0), a second
/// 2.5x-median trim, a top-40% reference median, and a
/// `[0.5 x top40-median, Q3 + k*IQR]` acceptance window. Below 4 data points
/// the IQR step is skipped and 3x the plain median stands in for the upper
/// bound. With no price data at all there is nothing to bound, so the caller
/// treats every listing as passing.
fn price_outlier_bounds(prices: &[f64]) -> Option<OutlierBounds> {
    if prices.is_empty() {
        return None;
    }

    let mut sorted = prices.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    if sorted.len() < 4 {
        let med = median(&sorted);
        return Some(OutlierBounds {
            lower: 0.5 * med,
            upper: 3.0 * med,
        });
    }

    let q1 = median(lower_half(&sorted));
    let q3 = median(upper_half(&sorted));
    let iqr = q3 - q1;
    let k = 1.0;
    let lower_iqr = q1 - k * iqr;
    let upper_iqr = q3 + k * iqr;

    let iqr_filtered: Vec<f64> = sorted
        .iter()
        .copied()
        .filter(|&p| p >= lower_iqr && p <= upper_iqr)
        .collect();

    let median_filtered = median(&iqr_filtered);
    let twice_filtered: Vec<f64> = iqr_filtered
        .iter()
        .copied()
        .filter(|&p| p <= 2.5 * median_filtered)
        .collect();

    let final_set = if twice_filtered.is_empty() {
        &iqr_filtered
    } else {
        &twice_filtered
    };

    let top_count = (final_set.len() * 2 / 5).max(1);
    let top40 = &final_set[final_set.len().saturating_sub(top_count)..];
    let top40_median = median(top40);

    Some(OutlierBounds {
        lower: 0.5 * top40_median,
        upper: upper_iqr,
    })
}

fn median(sorted_ascending: &[f64]) -> f64 {
    let n = sorted_ascending.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted_ascending[n / 2]
    } else {
        (sorted_ascending[n / 2 - 1] + sorted_ascending[n / 2]) / 2.0
    }
}

fn lower_half(sorted_ascending: &[f64]) -> &[f64] {
    &sorted_ascending[..sorted_ascending.len() / 2]
}

fn upper_half(sorted_ascending: &[f64]) -> &[f64] {
    let n = sorted_ascending.len();
    &sorted_ascending[(n + 1) / 2..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_cyrillic_homoglyphs_onto_latin() {
        assert_eq!(normalize("Discovery"), normalize("Discovery"));
        assert_eq!(normalize("аbc"), "abc");
    }

    #[test]
    fn normalize_strips_punctuation_and_spaces() {
        assert_eq!(normalize("ABC-123, ltd."), "abc123ltd");
    }

    #[test]
    fn median_of_even_count_averages_middle_pair() {
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
    }

    #[test]
    fn median_of_odd_count_is_middle_element() {
        assert_eq!(median(&[1.0, 2.0, 3.0]), 2.0);
    }

    #[test]
    fn outlier_bounds_none_with_no_price_data() {
        assert_eq!(price_outlier_bounds(&[]), None);
    }

    #[test]
    fn outlier_bounds_small_n_uses_triple_median() {
        let bounds = price_outlier_bounds(&[100.0, 200.0]).unwrap();
        assert_eq!(bounds.lower, 0.5 * 150.0);
        assert_eq!(bounds.upper, 3.0 * 150.0);
    }

    #[test]
    fn outlier_bounds_reject_extreme_low_value_with_enough_points() {
        let prices = vec![100.0, 105.0, 110.0, 98.0, 102.0, 5.0];
        let bounds = price_outlier_bounds(&prices).unwrap();
        assert!(5.0 < bounds.lower, "bounds: {bounds:?}");
    }

    fn sample_listing(id: &str, price: Option<f64>, reviews: Option<i32>) -> CatalogListing {
        CatalogListing {
            id: 0,
            articulum_id: 1,
            avito_item_id: id.to_string(),
            title: Some("BMW brake pad set OEM".to_string()),
            price: price.map(|p| BigDecimal::try_from(p).unwrap()),
            snippet_text: Some("genuine part".to_string()),
            seller_name: Some("AutoParts Co".to_string()),
            seller_id: Some("seller-1".to_string()),
            seller_rating: None,
            seller_reviews: reviews,
            images_count: 1,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn rejects_listings_missing_the_articulum_in_their_text() {
        let listings = vec![sample_listing("a1", Some(100.0), Some(10))];
        let config = MechanicalConfig {
            articulum: "XYZ999",
            require_articulum_in_text: true,
            stopwords: &[],
            min_seller_reviews: None,
        };
        let verdicts = evaluate(&listings, &config);
        assert!(!verdicts[0].passed);
        assert!(verdicts[0].rejection_reason.as_ref().unwrap().contains("XYZ999"));
    }

    #[test]
    fn rejects_listings_below_seller_review_floor() {
        let listings = vec![sample_listing("a1", Some(100.0), Some(2))];
        let config = MechanicalConfig {
            articulum: "BMW",
            require_articulum_in_text: false,
            stopwords: &[],
            min_seller_reviews: Some(5),
        };
        let verdicts = evaluate(&listings, &config);
        assert!(!verdicts[0].passed);
    }

    #[test]
    fn stopword_match_is_case_insensitive_substring() {
        let mut listing = sample_listing("a1", Some(100.0), Some(10));
        listing.snippet_text = Some("Aftermarket replica part".to_string());
        let config = MechanicalConfig {
            articulum: "BMW",
            require_articulum_in_text: false,
            stopwords: &["replica".to_string()],
            min_seller_reviews: None,
        };
        let verdicts = evaluate(&[listing], &config);
        assert!(!verdicts[0].passed);
    }
}
