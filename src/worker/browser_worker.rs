//! Browser Worker Runtime: claims catalog/object tasks, drives a browser
//! session through proxy swaps, and applies the completion and
//! detector-state policies that decide each task's fate.

use std::time::Duration;

use tokio::sync::watch;

use crate::browser::BrowserSession;
use crate::collaborators::{
    CardParser, CatalogOutcomeStatus, CatalogParseContext, CatalogParser, DetectorState, PageDetector,
    PageRequest,
};
use crate::models::Proxy;
use crate::repository::catalog_queue::CatalogQueue;
use crate::repository::listings::{self, CatalogListingInput, ObjectDataInput};
use crate::repository::object_queue::ObjectQueue;
use crate::repository::proxy_pool::ProxyPool;
use crate::repository::state_machine;
use crate::repository::{self, PgPool};
use crate::{config::Settings, models::CatalogTask, models::ObjectTask};

use super::rendezvous::{new_rendezvous, PageProvider};

pub struct BrowserWorkerConfig {
    pub worker_id: String,
    pub reparse_mode: bool,
    pub idle_sleep: Duration,
    pub proxy_wait_poll: Duration,
    pub browser_close_timeout: Duration,
    pub proxy_error_block_threshold: i32,
    pub max_captcha_attempts: u32,
    pub browser_headless: bool,
    pub heartbeat_emit_interval: Duration,
}

impl BrowserWorkerConfig {
    pub fn from_settings(settings: &Settings, worker_id: String) -> Self {
        Self {
            worker_id,
            reparse_mode: settings.reparse_mode,
            idle_sleep: Duration::from_secs(settings.worker_idle_sleep_seconds),
            proxy_wait_poll: Duration::from_secs(settings.proxy_wait_poll_seconds),
            browser_close_timeout: Duration::from_secs(settings.browser_close_timeout_seconds),
            proxy_error_block_threshold: settings.proxy_error_block_threshold,
            max_captcha_attempts: settings.max_captcha_attempts,
            browser_headless: settings.browser_headless,
            heartbeat_emit_interval: Duration::from_secs(settings.heartbeat_emit_interval_seconds),
        }
    }
}

pub struct BrowserWorkerRuntime {
    config: BrowserWorkerConfig,
    pool: PgPool,
    catalog_queue: CatalogQueue,
    object_queue: ObjectQueue,
    proxy_pool: ProxyPool,
    catalog_parser: Box<dyn CatalogParser>,
    card_parser: Box<dyn CardParser>,
    detector: Box<dyn PageDetector>,
    browser: BrowserSession,
    current_proxy: Option<Proxy>,
}

impl BrowserWorkerRuntime {
    pub fn new(
        config: BrowserWorkerConfig,
        pool: PgPool,
        catalog_queue: CatalogQueue,
        object_queue: ObjectQueue,
        proxy_pool: ProxyPool,
        catalog_parser: Box<dyn CatalogParser>,
        card_parser: Box<dyn CardParser>,
        detector: Box<dyn PageDetector>,
    ) -> Self {
        let browser = BrowserSession::new(config.browser_headless);
        Self {
            config,
            pool,
            catalog_queue,
            object_queue,
            proxy_pool,
            catalog_parser,
            card_parser,
            detector,
            browser,
            current_proxy: None,
        }
    }

    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let worker_id = self.config.worker_id.clone();
        loop {
            if *shutdown.borrow() {
                break;
            }

            let claimed_catalog = if self.config.reparse_mode {
                None
            } else {
                match self.catalog_queue.acquire(&worker_id).await {
                    Ok(task) => task,
                    Err(err) => {
                        tracing::error!(%err, worker_id, "catalog acquire failed");
                        None
                    }
                }
            };

            if let Some(task) = claimed_catalog {
                let task_id = task.id;
                if let Err(err) = self.run_catalog_task(task).await {
                    tracing::error!(%err, worker_id, "catalog task run failed");
                    if let Err(requeue_err) = self.catalog_queue.return_to_queue(task_id).await {
                        tracing::error!(%requeue_err, worker_id, "failed to requeue catalog task after error");
                    }
                }
                continue;
            }

            let claimed_object = match self.object_queue.acquire(&worker_id).await {
                Ok(task) => task,
                Err(err) => {
                    tracing::error!(%err, worker_id, "object acquire failed");
                    None
                }
            };

            if let Some(task) = claimed_object {
                let task_id = task.id;
                if let Err(err) = self.run_object_task(task).await {
                    tracing::error!(%err, worker_id, "object task run failed");
                    if let Err(requeue_err) = self.object_queue.return_to_queue(task_id).await {
                        tracing::error!(%requeue_err, worker_id, "failed to requeue object task after error");
                    }
                }
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.idle_sleep) => {}
                _ = shutdown.changed() => {}
            }
        }

        // Tear down whatever browser session is still open before exiting.
        let _ = self.browser.close(self.config.browser_close_timeout).await;
        if let Some(proxy) = self.current_proxy.take() {
            let _ = self.proxy_pool.release(proxy.id).await;
        }
    }

    /// Lazily launch a browser/proxy pair on first use; subsequent calls
    /// reuse whatever is already running until `swap_proxy` tears it down.
    async fn ensure_browser(&mut self) -> anyhow::Result<Proxy> {
        if self.browser.is_launched() {
            if let Some(proxy) = self.current_proxy.clone() {
                return Ok(proxy);
            }
        }

        let worker_id = self.config.worker_id.clone();
        let proxy = self
            .proxy_pool
            .acquire_with_wait(&worker_id, self.config.proxy_wait_poll)
            .await?;

        if let Err(err) = self
            .browser
            .launch_with_proxy(&proxy, self.config.browser_close_timeout)
            .await
        {
            self.proxy_pool
                .increment_error(proxy.id, &err.to_string(), self.config.proxy_error_block_threshold)
                .await?;
            return Err(err.into());
        }

        self.current_proxy = Some(proxy.clone());
        Ok(proxy)
    }

    /// Tear down the current browser/proxy and lease a fresh identity,
    /// bounded by `browser_close_timeout`.
    async fn swap_proxy(&mut self) -> anyhow::Result<Proxy> {
        self.browser.close(self.config.browser_close_timeout).await?;
        if let Some(old) = self.current_proxy.take() {
            let _ = self.proxy_pool.release(old.id).await;
        }
        self.ensure_browser().await
    }

    async fn run_catalog_task(&mut self, task: CatalogTask) -> anyhow::Result<()> {
        let worker_id = self.config.worker_id.clone();
        let articulum = repository::find_articulum(&self.pool, task.articulum_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("articulum {} not found", task.articulum_id))?;

        self.ensure_browser().await?;

        let ctx = CatalogParseContext {
            articulum: articulum.articulum.clone(),
            search_url: format!("https://www.avito.ru/rossiya?q={}", articulum.articulum),
            field_list: Vec::new(),
            start_page: task.checkpoint_page,
            max_pages: i32::MAX,
            filter_overrides: serde_json::Value::Null,
        };

        let search_url = ctx.search_url.clone();
        let page = self.browser.new_page(&search_url).await?;

        let (mut parser_side, mut provider_side) = new_rendezvous();

        let heartbeat_task_id = task.id;
        let catalog_queue_for_heartbeat = self.catalog_queue.clone();
        let heartbeat_interval = self.config.heartbeat_emit_interval;
        let heartbeat_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            loop {
                ticker.tick().await;
                if catalog_queue_for_heartbeat
                    .update_heartbeat(heartbeat_task_id)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let catalog_parser = &self.catalog_parser;
        let browser = &mut self.browser;
        let current_proxy = &mut self.current_proxy;
        let proxy_pool = &self.proxy_pool;
        let catalog_queue = &self.catalog_queue;
        let close_timeout = self.config.browser_close_timeout;
        let poll_interval = self.config.proxy_wait_poll;

        let parser_fut = catalog_parser.parse(page, &ctx, &mut parser_side);
        tokio::pin!(parser_fut);

        let outcome = loop {
            tokio::select! {
                outcome = &mut parser_fut => break outcome,
                maybe_request = provider_side.next_request() => {
                    match maybe_request {
                        Some(request) => {
                            handle_page_request(
                                task.id,
                                &worker_id,
                                catalog_queue,
                                proxy_pool,
                                browser,
                                current_proxy,
                                &mut provider_side,
                                request,
                                close_timeout,
                                poll_interval,
                            ).await?;
                        }
                        None => continue,
                    }
                }
            }
        };

        heartbeat_handle.abort();

        match outcome.status {
            CatalogOutcomeStatus::Success => {
                let listings: Vec<CatalogListingInput> = outcome.listings;
                listings::complete_catalog_task_with_listings(&self.pool, task.id, task.articulum_id, listings)
                    .await?;
                self.release_current_proxy().await;
            }
            CatalogOutcomeStatus::Empty => {
                self.catalog_queue.complete(task.id, task.articulum_id).await?;
                self.release_current_proxy().await;
            }
            CatalogOutcomeStatus::ProxyBlocked | CatalogOutcomeStatus::ProxyAuthRequired => {
                if let Some(proxy) = self.current_proxy.take() {
                    self.proxy_pool.block(proxy.id, "catalog parser reported block").await?;
                }
                self.catalog_queue.return_to_queue(task.id).await?;
            }
            CatalogOutcomeStatus::CaptchaUnsolved => {
                self.catalog_queue.return_to_queue(task.id).await?;
                self.release_current_proxy().await;
            }
            CatalogOutcomeStatus::NotDetected => {
                self.catalog_queue.fail(task.id).await?;
                self.release_current_proxy().await;
            }
        }

        Ok(())
    }

    async fn release_current_proxy(&mut self) {
        if let Some(proxy) = self.current_proxy.take() {
            let _ = self.proxy_pool.release(proxy.id).await;
        }
    }

    async fn run_object_task(&mut self, task: ObjectTask) -> anyhow::Result<()> {
        self.ensure_browser().await?;

        if !self.config.reparse_mode {
            let _ = state_machine::to_object_parsing(&mut self.pool.get().await?, task.articulum_id).await;
        }

        let url = format!("https://www.avito.ru/items/{}", task.avito_item_id);
        let mut captcha_attempts = 0u32;

        loop {
            let page = self.browser.new_page(&url).await?;
            let state = crate::collaborators::enhanced_detect_page_state(
                self.detector.as_ref(),
                &page,
                page.http_status,
            )
            .await;

            match state {
                DetectorState::ServerError(_) => {
                    self.swap_proxy().await?;
                    continue;
                }
                DetectorState::ProxyBlock403 | DetectorState::ProxyAuthRequired => {
                    if let Some(proxy) = self.current_proxy.take() {
                        self.proxy_pool.block(proxy.id, "object detector reported block").await?;
                    }
                    self.object_queue.return_to_queue(task.id).await?;
                    return Ok(());
                }
                DetectorState::Captcha | DetectorState::RateLimit429 | DetectorState::ContinueButton => {
                    captcha_attempts += 1;
                    if captcha_attempts > self.config.max_captcha_attempts {
                        self.release_current_proxy().await;
                        self.object_queue.return_to_queue(task.id).await?;
                        return Ok(());
                    }
                    continue;
                }
                DetectorState::Removed => {
                    self.object_queue.invalidate(task.id).await?;
                    self.release_current_proxy().await;
                    return Ok(());
                }
                DetectorState::NotDetected | DetectorState::CatalogFound | DetectorState::SellerProfile => {
                    self.object_queue.fail(task.id).await?;
                    self.release_current_proxy().await;
                    return Ok(());
                }
                DetectorState::CardFound => {
                    match self.card_parser.parse_card(&page, &[]).await {
                        Ok(data) => {
                            self.persist_object_data(task.articulum_id, &task.avito_item_id, data).await?;
                            self.object_queue.complete(task.id).await?;
                            if let Some(proxy) = &self.current_proxy {
                                let _ = self.proxy_pool.reset_error_counter(proxy.id).await;
                            }
                            self.release_current_proxy().await;
                            return Ok(());
                        }
                        Err(_) => {
                            self.object_queue.fail(task.id).await?;
                            self.release_current_proxy().await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn persist_object_data(&self, articulum_id: i32, avito_item_id: &str, data: ObjectDataInput) -> anyhow::Result<()> {
        listings::insert_object_data(&self.pool, articulum_id, avito_item_id, data).await?;
        Ok(())
    }
}

/// Resolve one in-flight `PageRequest`: persist the checkpoint, block/rotate
/// the proxy when the parser reported a block, then supply a fresh page back
/// to the waiting parser. A free function (not a method) so the caller can
/// borrow its fields disjointly from the pinned parser future.
#[allow(clippy::too_many_arguments)]
async fn handle_page_request(
    task_id: i32,
    worker_id: &str,
    catalog_queue: &CatalogQueue,
    proxy_pool: &ProxyPool,
    browser: &mut BrowserSession,
    current_proxy: &mut Option<Proxy>,
    provider_side: &mut PageProvider,
    request: PageRequest,
    close_timeout: Duration,
    poll_interval: Duration,
) -> anyhow::Result<()> {
    catalog_queue.update_checkpoint(task_id, request.next_start_page).await?;

    let needs_rotation = matches!(
        request.status,
        CatalogOutcomeStatus::ProxyBlocked | CatalogOutcomeStatus::ProxyAuthRequired
    );

    if needs_rotation {
        if let Some(proxy) = current_proxy.take() {
            proxy_pool.block(proxy.id, "page-provider observed a block mid-run").await?;
        }
        browser.close(close_timeout).await?;
        let fresh = proxy_pool.acquire_with_wait(worker_id, poll_interval).await?;
        browser.launch_with_proxy(&fresh, close_timeout).await?;
        *current_proxy = Some(fresh);
    }

    let url = format!("resume-page-{}", request.next_start_page);
    let page = browser.new_page(&url).await?;
    let _ = provider_side.supply_page(page).await;
    Ok(())
}
