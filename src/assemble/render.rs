//! HTML page to fixed-layout document rendering.
//!
//! The renderer receives the session cookies already translated for the
//! browser (see [`crate::session::cookies`]) and installs them before
//! navigating, so paywalled print views render as the logged-in user sees them.

use crate::error::AssemblyError;
use crate::session::cookies::{BrowserCookie, SameSitePolicy};
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use chromiumoxide::listeners::EventStream;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, CookieSameSite, EventLoadingFailed, EventLoadingFinished,
    EventRequestWillBeSent, SetCookiesParams, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use futures::StreamExt;
use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// A4 in inches.
const PAPER_WIDTH: f64 = 8.27;
const PAPER_HEIGHT: f64 = 11.69;

/// Turns a web page into a document file.
pub trait PageRenderer {
    /// Load `url` with `cookies` installed and write a paginated document to
    /// `dest`. Must not return before the page has stopped loading resources.
    async fn render_pdf(
        &self,
        url: &str,
        cookies: &[BrowserCookie],
        dest: &Path,
    ) -> Result<(), AssemblyError>;
}

/// Headless Chromium driven over the DevTools protocol.
pub struct ChromiumRenderer {
    browser: Browser,
    handler: JoinHandle<()>,
    /// No request may be in flight for this long to count as idle.
    quiet: Duration,
    /// Upper bound on waiting for idle after the load event.
    idle_timeout: Duration,
}

impl ChromiumRenderer {
    /// Start one browser for the whole run.
    #[instrument(level = "info")]
    pub async fn launch() -> Result<Self, AssemblyError> {
        let launch_err = |reason: String| AssemblyError::Render {
            url: "about:blank".to_string(),
            reason,
        };
        let config = BrowserConfig::builder().build().map_err(launch_err)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| launch_err(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        info!("Headless browser started");
        Ok(Self {
            browser,
            handler,
            quiet: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(30),
        })
    }

    pub async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "Browser did not close cleanly");
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
        debug!("Headless browser stopped");
    }

    /// Wait until no request has been in flight for `quiet`, or until
    /// `idle_timeout` has passed.
    async fn wait_for_network_idle(&self, network: &mut NetworkEvents) {
        let deadline = Instant::now() + self.idle_timeout;
        let mut in_flight = InFlight::default();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(pending = in_flight.len(), "Page never went idle; capturing anyway");
                return;
            }
            let wait = if in_flight.is_idle() {
                self.quiet.min(remaining)
            } else {
                remaining
            };

            tokio::select! {
                Some(ev) = network.sent.next() => in_flight.started(ev.request_id.inner()),
                Some(ev) = network.finished.next() => in_flight.settled(ev.request_id.inner()),
                Some(ev) = network.failed.next() => in_flight.settled(ev.request_id.inner()),
                _ = sleep(wait) => {
                    if in_flight.is_idle() {
                        return;
                    }
                }
            }
        }
    }

    async fn render(&self, url: &str, cookies: &[BrowserCookie], dest: &Path) -> Result<(), String> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| e.to_string())?;

        let result = async {
            if let Some(install) = set_cookies_command(cookies)? {
                page.execute(install).await.map_err(|e| e.to_string())?;
            }

            // Attached before navigation; events buffer until drained.
            let mut network = NetworkEvents::attach(&page)
                .await
                .map_err(|e| e.to_string())?;
            page.goto(url).await.map_err(|e| e.to_string())?;
            self.wait_for_network_idle(&mut network).await;

            let print = PrintToPdfParams {
                paper_width: Some(PAPER_WIDTH),
                paper_height: Some(PAPER_HEIGHT),
                print_background: Some(true),
                ..Default::default()
            };
            page.save_pdf(print, dest)
                .await
                .map_err(|e| e.to_string())?;
            Ok::<(), String>(())
        }
        .await;

        if let Err(e) = page.close().await {
            warn!(%url, error = %e, "Failed to close page");
        }
        result
    }
}

/// Request lifecycle events of one page.
struct NetworkEvents {
    sent: EventStream<EventRequestWillBeSent>,
    finished: EventStream<EventLoadingFinished>,
    failed: EventStream<EventLoadingFailed>,
}

impl NetworkEvents {
    async fn attach(page: &Page) -> Result<Self, CdpError> {
        Ok(Self {
            sent: page.event_listener::<EventRequestWillBeSent>().await?,
            finished: page.event_listener::<EventLoadingFinished>().await?,
            failed: page.event_listener::<EventLoadingFailed>().await?,
        })
    }
}

/// Request ids seen starting but not yet finished or failed.
///
/// Redirects reuse their request id, so sets rather than a counter. The three
/// event streams are read independently, so a request may settle before its
/// start is seen.
#[derive(Debug, Default)]
struct InFlight {
    pending: HashSet<String>,
    settled: HashSet<String>,
}

impl InFlight {
    fn started(&mut self, id: &str) {
        if !self.settled.contains(id) {
            self.pending.insert(id.to_string());
        }
    }

    fn settled(&mut self, id: &str) {
        self.pending.remove(id);
        self.settled.insert(id.to_string());
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    fn len(&self) -> usize {
        self.pending.len()
    }
}

impl PageRenderer for ChromiumRenderer {
    #[instrument(level = "info", skip(self, cookies), fields(cookies = cookies.len(), dest = %dest.display()))]
    async fn render_pdf(
        &self,
        url: &str,
        cookies: &[BrowserCookie],
        dest: &Path,
    ) -> Result<(), AssemblyError> {
        self.render(url, cookies, dest)
            .await
            .map_err(|reason| AssemblyError::Render {
                url: url.to_string(),
                reason,
            })?;
        debug!("Rendered page");
        Ok(())
    }
}

/// Browser-wide cookie install. `None` when there is nothing to install.
///
/// Sent as a raw command rather than through the page, which refuses cookies
/// while it still shows `about:blank`.
fn set_cookies_command(cookies: &[BrowserCookie]) -> Result<Option<SetCookiesParams>, String> {
    if cookies.is_empty() {
        return Ok(None);
    }
    let params = cookies
        .iter()
        .map(cookie_param)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(SetCookiesParams::new(params)))
}

fn cookie_param(cookie: &BrowserCookie) -> Result<CookieParam, String> {
    let mut builder = CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .domain(cookie.domain.clone())
        .path(cookie.path.clone())
        .secure(cookie.secure)
        .http_only(cookie.http_only);
    if cookie.expires >= 0.0 {
        builder = builder.expires(TimeSinceEpoch::new(cookie.expires));
    }
    if let Some(same_site) = cookie.same_site {
        builder = builder.same_site(match same_site {
            SameSitePolicy::Strict => CookieSameSite::Strict,
            SameSitePolicy::Lax => CookieSameSite::Lax,
            SameSitePolicy::None => CookieSameSite::None,
        });
    }
    builder.build()
}
