//! External collaborator contracts: the catalog parser, the card parser,
//! and the page detector. Real implementations (HTML extraction, DOM
//! detection, captcha solving) are out of scope for this core — only the
//! interfaces by which they plug into the Browser Worker Runtime live here,
//! plus stub implementations usable by tests and by a `--features
//! unsafe-dev` run against no real network egress.

pub mod card_parser;
pub mod catalog_parser;
pub mod detector;

pub use card_parser::{CardParseError, CardParser, StubCardParser};
pub use catalog_parser::{
    CatalogOutcomeStatus, CatalogParseContext, CatalogParseOutcome, CatalogParser, PageRequest,
    StubCatalogParser,
};
pub use detector::{enhanced_detect_page_state, DetectorState, PageDetector, StubPageDetector};

/// An opaque handle to whatever the browser session currently has loaded.
/// The real browser-driven collaborators (out of scope here) would carry a
/// live CDP page behind this; stub/test collaborators only need the label.
/// `http_status` carries the navigation response status when the session
/// observed one, feeding `enhanced_detect_page_state`'s server-error check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub marker: String,
    pub http_status: Option<u16>,
}

impl Page {
    pub fn new(marker: impl Into<String>) -> Self {
        Self { marker: marker.into(), http_status: None }
    }

    pub fn with_status(marker: impl Into<String>, http_status: Option<u16>) -> Self {
        Self { marker: marker.into(), http_status }
    }
}
