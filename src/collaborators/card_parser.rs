//! The card parser collaborator: extracts object-level fields from one
//! already-loaded detail ("card") page. Unlike the catalog parser, a card
//! parse never needs a second page — it either reads the loaded DOM or
//! fails outright.

use async_trait::async_trait;
use thiserror::Error;

use crate::repository::listings::ObjectDataInput;

use super::Page;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CardParseError {
    #[error("page did not contain a recognizable detail card")]
    NotACard,

    #[error("required field list referenced a selector the page does not have: {0}")]
    MissingField(String),
}

#[async_trait]
pub trait CardParser: Send + Sync {
    async fn parse_card(&self, page: &Page, field_list: &[String]) -> Result<ObjectDataInput, CardParseError>;
}

/// A scripted stand-in for tests: returns a fixed result regardless of the
/// page or field list it's handed.
pub struct StubCardParser {
    pub result: Result<ObjectDataInput, CardParseError>,
}

impl StubCardParser {
    pub fn ok(data: ObjectDataInput) -> Self {
        Self { result: Ok(data) }
    }

    pub fn err(error: CardParseError) -> Self {
        Self { result: Err(error) }
    }
}

#[async_trait]
impl CardParser for StubCardParser {
    async fn parse_card(&self, _page: &Page, _field_list: &[String]) -> Result<ObjectDataInput, CardParseError> {
        self.result.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_returns_the_fixed_result() {
        let parser = StubCardParser::ok(ObjectDataInput {
            title: Some("alternator".to_string()),
            ..Default::default()
        });
        let page = Page::new("card");
        let data = parser.parse_card(&page, &[]).await.unwrap();
        assert_eq!(data.title.as_deref(), Some("alternator"));
    }

    #[tokio::test]
    async fn stub_can_be_scripted_to_fail() {
        let parser = StubCardParser::err(CardParseError::NotACard);
        let page = Page::new("not-a-card");
        let err = parser.parse_card(&page, &[]).await.unwrap_err();
        assert_eq!(err, CardParseError::NotACard);
    }
}
