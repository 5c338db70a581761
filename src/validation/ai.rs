//! Stage `ai`: hand the mechanical survivors to a multimodal AI collaborator
//! for an originality judgement. The core treats every provider variant
//! uniformly through the `AiValidator` trait; only `validate` and the
//! `AiProviderError` transport-error kind matter to the pipeline.

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{AiProviderKind, Settings};

/// One listing handed to the AI collaborator.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AiListingInput {
    pub avito_item_id: String,
    pub title: Option<String>,
    pub snippet_text: Option<String>,
    pub price: Option<String>,
    pub image_urls: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AiRejection {
    pub avito_item_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct AiOutcome {
    pub passed_ids: Vec<String>,
    pub rejected: Vec<AiRejection>,
}

/// Transport-level failure talking to the AI collaborator. Distinguished
/// from "the AI rejected every listing", which is a normal `AiOutcome`, not
/// an error — only connectivity/protocol/quota failures land here.
#[derive(Error, Debug)]
pub enum AiProviderError {
    #[error("AI provider request failed: {0}")]
    Transport(String),

    #[error("AI provider returned an unparseable response: {0}")]
    Protocol(String),

    #[error("no AI provider configured")]
    NotConfigured,
}

#[async_trait]
pub trait AiValidator: Send + Sync {
    async fn validate(
        &self,
        articulum: &str,
        listings: &[AiListingInput],
        use_images: bool,
    ) -> Result<AiOutcome, AiProviderError>;
}

/// `reqwest`-backed multimodal HTTPS API client.
pub struct CloudApiValidator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CloudApiValidator {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl AiValidator for CloudApiValidator {
    async fn validate(
        &self,
        articulum: &str,
        listings: &[AiListingInput],
        use_images: bool,
    ) -> Result<AiOutcome, AiProviderError> {
        #[derive(serde::Serialize)]
        struct Request<'a> {
            articulum: &'a str,
            use_images: bool,
            listings: &'a [AiListingInput],
        }

        #[derive(serde::Deserialize)]
        struct Response {
            passed_ids: Vec<String>,
            rejected: Vec<RejectedEntry>,
        }

        #[derive(serde::Deserialize)]
        struct RejectedEntry {
            id: String,
            reason: String,
        }

        let response = self
            .client
            .post(format!("{}/v1/validate", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&Request {
                articulum,
                use_images,
                listings,
            })
            .send()
            .await
            .map_err(|e| AiProviderError::Transport(e.to_string()))?;

        let body: Response = response
            .error_for_status()
            .map_err(|e| AiProviderError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| AiProviderError::Protocol(e.to_string()))?;

        Ok(AiOutcome {
            passed_ids: body.passed_ids,
            rejected: body
                .rejected
                .into_iter()
                .map(|r| AiRejection {
                    avito_item_id: r.id,
                    reason: r.reason,
                })
                .collect(),
        })
    }
}

/// Shells out to a local CLI tool per invocation, passing listing data as
/// JSON on stdin and parsing the same `{passed_ids, rejected}` shape from
/// stdout.
pub struct CliSubprocessValidator {
    executable: String,
}

impl CliSubprocessValidator {
    pub fn new(executable: String) -> Self {
        Self { executable }
    }
}

#[async_trait]
impl AiValidator for CliSubprocessValidator {
    async fn validate(
        &self,
        articulum: &str,
        listings: &[AiListingInput],
        use_images: bool,
    ) -> Result<AiOutcome, AiProviderError> {
        use std::process::Stdio;
        use tokio::io::AsyncWriteExt;

        #[derive(serde::Serialize)]
        struct StdinPayload<'a> {
            articulum: &'a str,
            use_images: bool,
            listing_ids: Vec<&'a str>,
        }

        #[derive(serde::Deserialize)]
        struct StdoutPayload {
            passed_ids: Vec<String>,
            rejected: Vec<(String, String)>,
        }

        let payload = StdinPayload {
            articulum,
            use_images,
            listing_ids: listings.iter().map(|l| l.avito_item_id.as_str()).collect(),
        };
        let payload_json = serde_json::to_vec(&payload)
            .map_err(|e| AiProviderError::Protocol(e.to_string()))?;

        let mut child = tokio::process::Command::new(&self.executable)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AiProviderError::Transport(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload_json)
                .await
                .map_err(|e| AiProviderError::Transport(e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AiProviderError::Transport(e.to_string()))?;

        if !output.status.success() {
            return Err(AiProviderError::Transport(format!(
                "{} exited with {}: {}",
                self.executable,
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let parsed: StdoutPayload = serde_json::from_slice(&output.stdout)
            .map_err(|e| AiProviderError::Protocol(e.to_string()))?;

        Ok(AiOutcome {
            passed_ids: parsed.passed_ids,
            rejected: parsed
                .rejected
                .into_iter()
                .map(|(id, reason)| AiRejection { avito_item_id: id, reason })
                .collect(),
        })
    }
}

/// A cloud API fronted by a pay-per-seat subscription proxy endpoint —
/// same wire shape as `CloudApiValidator`, different base URL and no
/// per-request API key (the proxy authenticates the subscription itself).
pub struct SubscriptionProxyValidator {
    inner: CloudApiValidator,
}

impl SubscriptionProxyValidator {
    pub fn new(proxy_base_url: String) -> Self {
        Self {
            inner: CloudApiValidator::new(proxy_base_url, String::new()),
        }
    }
}

#[async_trait]
impl AiValidator for SubscriptionProxyValidator {
    async fn validate(
        &self,
        articulum: &str,
        listings: &[AiListingInput],
        use_images: bool,
    ) -> Result<AiOutcome, AiProviderError> {
        self.inner.validate(articulum, listings, use_images).await
    }
}

/// Delegates to `primary`; on any transport-level error, retries once
/// against `secondary` instead of surfacing the failure immediately.
pub struct FallbackValidator {
    primary: Box<dyn AiValidator>,
    secondary: Box<dyn AiValidator>,
}

impl FallbackValidator {
    pub fn new(primary: Box<dyn AiValidator>, secondary: Box<dyn AiValidator>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl AiValidator for FallbackValidator {
    async fn validate(
        &self,
        articulum: &str,
        listings: &[AiListingInput],
        use_images: bool,
    ) -> Result<AiOutcome, AiProviderError> {
        match self.primary.validate(articulum, listings, use_images).await {
            Ok(outcome) => Ok(outcome),
            Err(AiProviderError::Transport(reason)) => {
                tracing::warn!(reason, "primary AI provider failed, falling back");
                self.secondary.validate(articulum, listings, use_images).await
            }
            Err(other) => Err(other),
        }
    }
}

/// Build the configured `AiValidator` from `settings`. Returns `None` when
/// AI validation is disabled — the pipeline's `ai` stage then skips
/// entirely rather than calling `build_ai_validator` at all.
pub fn build_ai_validator(settings: &Settings) -> Option<Box<dyn AiValidator>> {
    if !settings.ai_validation_enabled {
        return None;
    }

    match settings.ai_provider {
        AiProviderKind::CloudApi => {
            let base_url = settings.ai_base_url.clone()?;
            let api_key = settings.ai_api_key.clone()?;
            Some(Box::new(CloudApiValidator::new(base_url, api_key)))
        }
        AiProviderKind::CliSubprocess => {
            let executable = settings.ai_cli_path.clone()?;
            Some(Box::new(CliSubprocessValidator::new(executable)))
        }
        AiProviderKind::SubscriptionProxy => {
            let base_url = settings.ai_base_url.clone()?;
            Some(Box::new(SubscriptionProxyValidator::new(base_url)))
        }
        AiProviderKind::Fallback => {
            let base_url = settings.ai_base_url.clone()?;
            let api_key = settings.ai_api_key.clone()?;
            let executable = settings.ai_cli_path.clone()?;
            Some(Box::new(FallbackValidator::new(
                Box::new(CloudApiValidator::new(base_url, api_key)),
                Box::new(CliSubprocessValidator::new(executable)),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;
    #[async_trait]
    impl AiValidator for AlwaysFails {
        async fn validate(
            &self,
            _articulum: &str,
            _listings: &[AiListingInput],
            _use_images: bool,
        ) -> Result<AiOutcome, AiProviderError> {
            Err(AiProviderError::Transport("connection reset".to_string()))
        }
    }

    struct AlwaysPasses;
    #[async_trait]
    impl AiValidator for AlwaysPasses {
        async fn validate(
            &self,
            _articulum: &str,
            listings: &[AiListingInput],
            _use_images: bool,
        ) -> Result<AiOutcome, AiProviderError> {
            Ok(AiOutcome {
                passed_ids: listings.iter().map(|l| l.avito_item_id.clone()).collect(),
                rejected: vec![],
            })
        }
    }

    #[tokio::test]
    async fn fallback_delegates_to_secondary_on_transport_error() {
        let validator = FallbackValidator::new(Box::new(AlwaysFails), Box::new(AlwaysPasses));
        let listings = vec![AiListingInput {
            avito_item_id: "1".to_string(),
            title: None,
            snippet_text: None,
            price: None,
            image_urls: vec![],
        }];
        let outcome = validator.validate("ABC123", &listings, false).await.unwrap();
        assert_eq!(outcome.passed_ids, vec!["1".to_string()]);
    }

    #[test]
    fn factory_returns_none_when_disabled() {
        let settings = test_settings();
        assert!(build_ai_validator(&settings).is_none());
    }

    fn test_settings() -> Settings {
        use clap::Parser;
        Settings::parse_from(["articulum", "--database-url", "postgres://localhost/test"])
    }
}
