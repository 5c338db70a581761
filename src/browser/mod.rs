//! Browser session lifecycle for the Browser Worker Runtime: lazy launch on
//! first claim, proxy-scoped relaunch on swap, bounded teardown.
//!
//! Chrome/Chromium executable discovery and the evasion argument list are
//! generalized to take a leased [`Proxy`](crate::models::Proxy) per launch
//! instead of a single config-wide proxy string, since a worker here swaps
//! proxies mid-run.

use std::time::Duration;

use thiserror::Error;

use crate::collaborators::Page;
use crate::models::Proxy;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("chrome/chromium executable not found")]
    ExecutableNotFound,

    #[error("failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("browser teardown did not complete within the bound")]
    TeardownTimedOut,

    #[cfg(not(feature = "browser"))]
    #[error("browser support not compiled; rebuild with --features browser")]
    NotCompiled,
}

pub type Result<T> = std::result::Result<T, BrowserError>;

const STEALTH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-dev-shm-usage",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-background-networking",
    "--disable-sync",
    "--disable-translate",
    "--metrics-recording-only",
    "--safebrowsing-disable-auto-update",
    "--no-sandbox",
    "--disable-gpu",
    "--disable-software-rasterizer",
];

const CHROME_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/opt/google/chrome/google-chrome",
];

fn find_chrome() -> Result<std::path::PathBuf> {
    for path in CHROME_PATHS {
        let p = std::path::Path::new(path);
        if p.exists() {
            return Ok(p.to_path_buf());
        }
    }
    for cmd in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Ok(std::path::PathBuf::from(path));
                }
            }
        }
    }
    Err(BrowserError::ExecutableNotFound)
}

#[cfg(feature = "browser")]
mod live {
    use super::*;
    use chromiumoxide::{Browser, BrowserConfig};
    use futures::StreamExt;

    pub struct BrowserSession {
        headless: bool,
        browser: Option<Browser>,
    }

    impl BrowserSession {
        pub fn new(headless: bool) -> Self {
            Self { headless, browser: None }
        }

        /// Launch a fresh browser scoped to `proxy`'s address, tearing down
        /// whatever session (if any) was already running.
        pub async fn launch_with_proxy(&mut self, proxy: &Proxy, close_timeout: Duration) -> Result<()> {
            self.close(close_timeout).await?;

            let chrome_path = find_chrome()?;
            let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);
            if !self.headless {
                builder = builder.with_head();
            }
            builder = builder.arg(format!("--proxy-server=http://{}:{}", proxy.host, proxy.port));
            for arg in STEALTH_ARGS {
                builder = builder.arg(*arg);
            }

            let config = builder
                .build()
                .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

            tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            self.browser = Some(browser);
            Ok(())
        }

        /// Open a fresh page. Panics if no browser has been launched; callers
        /// always go through `launch_with_proxy` first.
        pub async fn new_page(&self, url: &str) -> Result<Page> {
            let browser = self.browser.as_ref().expect("browser not launched");
            browser
                .new_page(url)
                .await
                .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;
            Ok(Page::new(url.to_string()))
        }

        /// Tear down whatever is running, bounded by `timeout`. A frozen
        /// subprocess must not be able to block shutdown indefinitely.
        pub async fn close(&mut self, timeout: Duration) -> Result<()> {
            let Some(mut browser) = self.browser.take() else {
                return Ok(());
            };
            tokio::time::timeout(timeout, async move { let _ = browser.close().await; })
                .await
                .map_err(|_| BrowserError::TeardownTimedOut)
        }

        pub fn is_launched(&self) -> bool {
            self.browser.is_some()
        }
    }
}

#[cfg(feature = "browser")]
pub use live::BrowserSession;

/// Stub used when the `browser` feature is off: every operation returns
/// `NotCompiled` rather than silently no-op'ing, so a misconfigured build
/// fails loudly the first time a worker actually tries to scrape.
#[cfg(not(feature = "browser"))]
pub struct BrowserSession {
    headless: bool,
}

#[cfg(not(feature = "browser"))]
impl BrowserSession {
    pub fn new(headless: bool) -> Self {
        Self { headless }
    }

    pub async fn launch_with_proxy(&mut self, _proxy: &Proxy, _close_timeout: Duration) -> Result<()> {
        let _ = self.headless;
        Err(BrowserError::NotCompiled)
    }

    pub async fn new_page(&self, _url: &str) -> Result<Page> {
        Err(BrowserError::NotCompiled)
    }

    pub async fn close(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    pub fn is_launched(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stealth_args_do_not_include_a_proxy_flag() {
        assert!(STEALTH_ARGS.iter().all(|a| !a.starts_with("--proxy-server")));
    }

    #[tokio::test]
    async fn fresh_session_is_not_launched() {
        let session = BrowserSession::new(true);
        assert!(!session.is_launched());
    }
}
