//! Headless browser tier.
//!
//! One browser process and one page, launched on first use and kept until
//! `close()`. Browser startup costs seconds, so the session outlives
//! individual requests. The page is a single shared resource: the session
//! mutex is held across launch and across a whole navigate-and-extract
//! cycle, so concurrent escalations queue instead of racing.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use scraper::Html;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::{Config, UpstreamConfig};
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::lightweight::random_user_agent;
use crate::search::ListingSource;
use crate::selectors::{self, CardPattern, RawListing};
use crate::types::ProductListing;

const VIEWPORT_WIDTH: u32 = 1366;
const VIEWPORT_HEIGHT: u32 = 768;
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A live page the manager can drive. Only ever used while the manager's
/// session lock is held.
#[async_trait]
pub trait PageSession: Send + Sync {
    async fn is_alive(&self) -> bool;
    async fn navigate(&self, url: &Url) -> AcquisitionResult<()>;
    async fn has_element(&self, selector: &str) -> bool;
    async fn content(&self) -> AcquisitionResult<String>;
    async fn evaluate(&self, script: String) -> AcquisitionResult<Vec<RawListing>>;
    async fn shutdown(&mut self);
}

/// Starts a browser process and opens the page it will be driven through.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> AcquisitionResult<Box<dyn PageSession>>;
}

/// Launches headless Chromium over CDP.
pub struct ChromeLauncher {
    chrome_executable: Option<String>,
    request_timeout: Duration,
}

impl ChromeLauncher {
    pub fn new(config: &Config) -> Self {
        Self {
            chrome_executable: config.chrome_executable.clone(),
            request_timeout: config.timeouts.navigation,
        }
    }

    fn browser_config(&self) -> AcquisitionResult<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .request_timeout(self.request_timeout)
            .viewport(Viewport {
                width: VIEWPORT_WIDTH,
                height: VIEWPORT_HEIGHT,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            })
            .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--mute-audio");

        if let Some(exe) = &self.chrome_executable {
            builder = builder.chrome_executable(exe);
        }

        builder.build().map_err(AcquisitionError::BrowserInit)
    }

    async fn open_page(browser: &Browser) -> AcquisitionResult<Page> {
        let init = |e: chromiumoxide::error::CdpError| AcquisitionError::BrowserInit(e.to_string());

        let page = browser.new_page("about:blank").await.map_err(init)?;
        page.set_user_agent(SetUserAgentOverrideParams::new(random_user_agent()))
            .await
            .map_err(init)?;
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(serde_json::json!({
            "Accept-Language": "en-US,en;q=0.9",
            "Cache-Control": "no-cache",
            "Upgrade-Insecure-Requests": "1",
        }))))
        .await
        .map_err(init)?;
        Ok(page)
    }
}

#[async_trait]
impl SessionLauncher for ChromeLauncher {
    async fn launch(&self) -> AcquisitionResult<Box<dyn PageSession>> {
        info!("Launching headless browser");
        let config = self.browser_config()?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AcquisitionError::BrowserInit(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!("CDP handler error: {}", e);
                }
            }
            debug!("CDP handler finished");
        });

        match Self::open_page(&browser).await {
            Ok(page) => Ok(Box::new(ChromeSession { browser, handler, page })),
            Err(e) => {
                if let Err(close_err) = browser.close().await {
                    warn!("Failed to close browser after page setup error: {}", close_err);
                }
                if let Err(wait_err) = browser.wait().await {
                    debug!("Failed to wait for browser exit: {}", wait_err);
                }
                handler.abort();
                Err(e)
            }
        }
    }
}

/// A launched browser, its CDP event loop, and the one page we drive.
struct ChromeSession {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        // Browser::drop kills the child process; the event loop must be stopped here.
        self.handler.abort();
    }
}

#[async_trait]
impl PageSession for ChromeSession {
    async fn is_alive(&self) -> bool {
        match self.browser.version().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Browser health check failed: {}", e);
                false
            }
        }
    }

    async fn navigate(&self, url: &Url) -> AcquisitionResult<()> {
        self.page
            .goto(url.as_str())
            .await
            .map(|_| ())
            .map_err(|e| AcquisitionError::Navigation(e.to_string()))
    }

    async fn has_element(&self, selector: &str) -> bool {
        self.page.find_element(selector).await.is_ok()
    }

    async fn content(&self) -> AcquisitionResult<String> {
        self.page
            .content()
            .await
            .map_err(|e| AcquisitionError::Script(e.to_string()))
    }

    async fn evaluate(&self, script: String) -> AcquisitionResult<Vec<RawListing>> {
        let mut params = EvaluateParams::new(script);
        params.return_by_value = Some(true);
        self.page
            .evaluate_expression(params)
            .await
            .map_err(|e| AcquisitionError::Script(e.to_string()))?
            .into_value()
            .map_err(|e| AcquisitionError::Script(e.to_string()))
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.page.clone().close().await {
            debug!("Page close failed: {}", e);
        }
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser cleanly: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("Failed to wait for browser exit: {}", e);
        }
    }
}

pub struct BrowserManager {
    session: Mutex<Option<Box<dyn PageSession>>>,
    launcher: Box<dyn SessionLauncher>,
    upstream: UpstreamConfig,
    navigation_timeout: Duration,
    selector_timeout: Duration,
}

impl BrowserManager {
    /// Nothing is launched until the first `ensure_ready` or `search`.
    pub fn new(config: &Config) -> Self {
        Self::with_launcher(config, Box::new(ChromeLauncher::new(config)))
    }

    pub fn with_launcher(config: &Config, launcher: Box<dyn SessionLauncher>) -> Self {
        Self {
            session: Mutex::new(None),
            launcher,
            upstream: config.upstream.clone(),
            navigation_timeout: config.timeouts.navigation,
            selector_timeout: config.timeouts.selector,
        }
    }

    /// Launch the browser and page if not already running. Concurrent callers
    /// wait on the same lock, so at most one process is ever started.
    pub async fn ensure_ready(&self) -> AcquisitionResult<()> {
        let mut guard = self.session.lock().await;
        self.ready(&mut *guard).await.map(|_| ())
    }

    pub async fn is_running(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Tear down the page and browser. A no-op when nothing is running.
    pub async fn close(&self) {
        let Some(mut session) = self.session.lock().await.take() else {
            return;
        };
        info!("Shutting down headless browser");
        session.shutdown().await;
    }

    async fn ready<'a>(
        &self,
        slot: &'a mut Option<Box<dyn PageSession>>,
    ) -> AcquisitionResult<&'a dyn PageSession> {
        if let Some(session) = slot.as_ref() {
            if !session.is_alive().await {
                warn!("Relaunching unresponsive browser");
                if let Some(mut dead) = slot.take() {
                    dead.shutdown().await;
                }
            }
        }

        if slot.is_none() {
            *slot = Some(self.launcher.launch().await?);
        }

        match slot.as_deref() {
            Some(session) => Ok(session),
            None => Err(AcquisitionError::BrowserInit("browser session missing after launch".into())),
        }
    }

    /// Drive the shared page to `url` and extract up to `limit` listings
    /// with `pattern`. A selector-wait timeout is an empty result.
    pub async fn extract(
        &self,
        url: &Url,
        ready_selector: &str,
        pattern: &CardPattern,
        limit: usize,
    ) -> AcquisitionResult<Vec<ProductListing>> {
        let mut guard = self.session.lock().await;
        let page = self.ready(&mut *guard).await?;

        info!("Browser navigating to {}", url);
        match tokio::time::timeout(self.navigation_timeout, page.navigate(url)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AcquisitionError::Navigation(format!(
                    "no response within {:?}",
                    self.navigation_timeout
                )))
            }
        }

        if !wait_for_selector(page, ready_selector, self.selector_timeout).await {
            let html = page.content().await.unwrap_or_default();
            if selectors::looks_blocked(&Html::parse_document(&html)) {
                return Err(AcquisitionError::Blocked);
            }
            warn!("No result cards rendered within {:?}", self.selector_timeout);
            return Ok(Vec::new());
        }

        let raw = page.evaluate(extraction_script(pattern, limit)?).await?;

        info!("Browser extracted {} listings", raw.len());
        Ok(raw
            .into_iter()
            .take(limit)
            .map(|r| r.normalize(url, &self.upstream.currency_symbol))
            .collect())
    }
}

#[async_trait]
impl ListingSource for BrowserManager {
    async fn search(&self, query: &str, count: usize) -> AcquisitionResult<Vec<ProductListing>> {
        let url = self
            .upstream
            .search_url(query)
            .map_err(|e| AcquisitionError::Navigation(e.to_string()))?;
        self.extract(&url, selectors::SEARCH_READY_SELECTOR, &selectors::SEARCH_RESULTS, count)
            .await
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}

/// Poll until `selector` matches or `timeout` passes.
async fn wait_for_selector(page: &dyn PageSession, selector: &str, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        if page.has_element(selector).await {
            debug!("'{}' appeared after {:?}", selector, start.elapsed());
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
    }
}

/// In-page routine applying `pattern` with the same first-match-wins rules
/// as the HTML tier. Returns an array of raw field objects.
pub fn extraction_script(pattern: &CardPattern, limit: usize) -> AcquisitionResult<String> {
    let pattern = serde_json::to_string(pattern).map_err(|e| AcquisitionError::Script(e.to_string()))?;
    Ok(format!(
        r#"(() => {{
  const pattern = {pattern};
  const limit = {limit};
  const pick = (card, rules) => {{
    for (const rule of rules) {{
      try {{
        const el = rule.css ? card.querySelector(rule.css) : card;
        if (!el) continue;
        const raw = rule.attr ? el.getAttribute(rule.attr) : el.textContent;
        const value = raw ? raw.trim() : '';
        if (value) return value;
      }} catch (_) {{}}
    }}
    return null;
  }};
  let cards = [];
  for (const css of pattern.cards) {{
    try {{
      const found = document.querySelectorAll(css);
      if (found.length) {{ cards = Array.from(found); break; }}
    }} catch (_) {{}}
  }}
  const f = pattern.fields;
  const seen = new Set();
  const out = [];
  for (const card of cards) {{
    if (out.length >= limit) break;
    const item = {{
      title: pick(card, f.title),
      url: pick(card, f.url),
      image: pick(card, f.image),
      price: pick(card, f.price),
      rating: pick(card, f.rating),
    }};
    if (!item.title && !item.image) continue;
    if (item.url) {{
      if (seen.has(item.url)) continue;
      seen.add(item.url);
    }}
    out.push(item);
  }}
  return out;
}})()"#
    ))
}
