//! Authenticated session: login protocol, persistence and restore.
//!
//! A [`Session`] pairs a cookie store with the `reqwest` client that reads and
//! writes it. It is created once per process by [`ensure_session`], either by
//! restoring the store serialized by an earlier run or by running the login
//! protocol:
//!
//! 1. GET the bootstrap URL to obtain anonymous cookies.
//! 2. POST `forward`, `username`, `password`, `ajax` as a form to the submit URL.
//! 3. POST each returned one-time `token` to its remote login URL, in order.
//! 4. Serialize the cookie store, session cookies included, to disk.
//!
//! Any failure along the way is an [`AuthError`]; there is no retry at this
//! layer.

pub mod cookies;

use crate::config::{Credentials, SiteConfig};
use crate::error::AuthError;
use crate::utils::{ensure_parent, part_path, truncate_for_log};
use cookie_store::CookieStore;
use cookies::{BrowserCookie, CookieRecord};
use reqwest::Client;
use reqwest_cookie_store::CookieStoreMutex;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, instrument};
use url::Url;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Reply of the login submit endpoint.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    /// Absent on a rejected login.
    remote_login_urls: Vec<RemoteLogin>,
}

#[derive(Debug, Deserialize)]
struct RemoteLogin {
    url: String,
    data: RemoteLoginData,
}

#[derive(Debug, Deserialize)]
struct RemoteLoginData {
    token: String,
}

/// Cookie-backed identity shared by every request of a run.
#[derive(Clone)]
pub struct Session {
    store: Arc<CookieStoreMutex>,
    client: Client,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    fn from_store(store: CookieStore) -> Result<Self, AuthError> {
        let store = Arc::new(CookieStoreMutex::new(store));
        let client = Client::builder()
            .cookie_provider(Arc::clone(&store))
            .user_agent(USER_AGENT)
            .build()
            .map_err(AuthError::Client)?;
        Ok(Self { store, client })
    }

    #[cfg(test)]
    pub(crate) fn anonymous() -> Self {
        Self::from_store(CookieStore::default()).unwrap()
    }

    /// Store a `Set-Cookie` header value as if `origin` had sent it.
    #[cfg(test)]
    pub(crate) fn seed_cookie(&self, set_cookie: &str, origin: &Url) {
        self.store
            .lock()
            .unwrap()
            .parse(set_cookie, origin)
            .unwrap();
    }

    /// Client that sends this session's cookies.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Cookies that apply to `url`, regardless of path.
    pub fn cookies_for(&self, url: &Url) -> Vec<CookieRecord> {
        let store = self.store.lock().unwrap_or_else(|p| p.into_inner());
        cookies::records_for_url(&store, url)
    }

    /// [`Session::cookies_for`] translated for the page renderer.
    pub fn browser_cookies_for(&self, url: &Url) -> Vec<BrowserCookie> {
        self.cookies_for(url)
            .iter()
            .map(cookies::to_browser_cookie)
            .collect()
    }

    fn serialize(&self) -> Result<Vec<u8>, String> {
        let store = self.store.lock().map_err(|e| e.to_string())?;
        let mut buf = Vec::new();
        cookie_store::serde::json::save_incl_expired_and_nonpersistent(&store, &mut buf)
            .map_err(|e| e.to_string())?;
        Ok(buf)
    }

    /// Write the cookie store to `path` via a temp file and rename.
    async fn persist(&self, path: &Path) -> Result<(), AuthError> {
        let persist_err = |reason: String| AuthError::Persist {
            path: path.to_path_buf(),
            reason,
        };
        let bytes = self.serialize().map_err(persist_err)?;
        let part = part_path(path);
        ensure_parent(path)
            .await
            .map_err(|e| persist_err(e.to_string()))?;
        fs::write(&part, &bytes)
            .await
            .map_err(|e| persist_err(e.to_string()))?;
        fs::rename(&part, path)
            .await
            .map_err(|e| persist_err(e.to_string()))?;
        info!(path = %path.display(), bytes = bytes.len(), "Session persisted");
        Ok(())
    }

    async fn restore(path: &Path) -> Result<Self, AuthError> {
        let restore_err = |reason: String| AuthError::Restore {
            path: path.to_path_buf(),
            reason,
        };
        let bytes = fs::read(path).await.map_err(|e| restore_err(e.to_string()))?;
        let store = cookie_store::serde::json::load_all(&bytes[..])
            .map_err(|e| restore_err(e.to_string()))?;
        info!(path = %path.display(), "Session restored");
        Self::from_store(store)
    }
}

/// Restore the session persisted at `persist_path`, or log in and persist a
/// fresh one.
///
/// A stored session is trusted as is: restoring makes no network call, and
/// an expired session is only noticed later as failing fetches. Delete the
/// file to force a new login.
///
/// # Arguments
///
/// * `credentials` - Account used when no stored session exists
/// * `site` - Login bootstrap and submit URLs
/// * `persist_path` - Serialized cookie store, read or written
///
/// # Errors
///
/// Every [`AuthError`] is fatal for the run. A login reply without a
/// `remote_login_urls` list (a rejected login) is [`AuthError::Protocol`] and
/// nothing is written to `persist_path`.
///
/// # Examples
///
/// ```ignore
/// let session = ensure_session(&credentials, &site, &site.session_file).await?;
/// let fetcher = Fetcher::new(session.client().clone(), RetryPolicy::default());
/// ```
#[instrument(level = "info", skip(credentials, site), fields(persist_path = %persist_path.display()))]
pub async fn ensure_session(
    credentials: &Credentials,
    site: &SiteConfig,
    persist_path: &Path,
) -> Result<Session, AuthError> {
    if fs::try_exists(persist_path).await.unwrap_or(false) {
        return Session::restore(persist_path).await;
    }

    info!("No stored session; logging in");
    let session = login(credentials, site).await?;
    session.persist(persist_path).await?;
    info!("Login successful");
    Ok(session)
}

async fn login(credentials: &Credentials, site: &SiteConfig) -> Result<Session, AuthError> {
    let session = Session::from_store(CookieStore::default())?;
    let client = session.client();

    debug!(url = %site.login_bootstrap_url, "Opening anonymous session");
    client
        .get(&site.login_bootstrap_url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|source| AuthError::Http {
            url: site.login_bootstrap_url.clone(),
            source,
        })?;

    debug!(url = %site.login_submit_url, "Submitting credentials");
    let http_err = |source| AuthError::Http {
        url: site.login_submit_url.clone(),
        source,
    };
    let body = client
        .post(&site.login_submit_url)
        .form(&[
            ("forward", ""),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
            ("ajax", "1"),
        ])
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(http_err)?
        .text()
        .await
        .map_err(http_err)?;

    let response: LoginResponse = serde_json::from_str(&body).map_err(|e| {
        AuthError::Protocol(format!("{e}; body: {}", truncate_for_log(&body, 200)))
    })?;

    debug!(
        remote_logins = response.remote_login_urls.len(),
        "Credentials accepted"
    );

    for remote in &response.remote_login_urls {
        debug!(url = %remote.url, "Completing remote login");
        client
            .post(&remote.url)
            .form(&[("token", remote.data.token.as_str())])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| AuthError::Http {
                url: remote.url.clone(),
                source,
            })?;
    }

    Ok(session)
}
