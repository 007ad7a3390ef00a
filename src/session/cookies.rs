//! One-way translation from the HTTP client's cookie store to the page
//! renderer's cookie representation.
//!
//! The two sides disagree on a few details:
//!
//! | Detail | HTTP store | Renderer |
//! |--------|------------|----------|
//! | Domain | may carry a leading `.` | bare host |
//! | Expiry | absent for session cookies | [`SESSION_EXPIRY`] sentinel |
//! | SameSite | optional, free text | enum; `None` requires `Secure` |

use cookie_store::{CookieDomain, CookieExpiration, CookieStore};
use url::Url;

/// Expiry the renderer understands as "session cookie".
pub const SESSION_EXPIRY: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSitePolicy {
    Strict,
    Lax,
    None,
}

impl SameSitePolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "strict" => Some(SameSitePolicy::Strict),
            "lax" => Some(SameSitePolicy::Lax),
            "none" => Some(SameSitePolicy::None),
            _ => None,
        }
    }
}

/// A cookie as held by the HTTP client.
#[derive(Debug, Clone, PartialEq)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Unix seconds; `None` for session cookies.
    pub expires: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSitePolicy>,
}

/// A cookie ready to be injected into the renderer before navigation.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: f64,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSitePolicy>,
}

pub fn to_browser_cookie(record: &CookieRecord) -> BrowserCookie {
    let domain = record
        .domain
        .strip_prefix('.')
        .unwrap_or(&record.domain)
        .to_string();

    let expires = record.expires.map_or(SESSION_EXPIRY, |secs| secs as f64);

    // Chromium drops SameSite=None cookies that are not Secure.
    let same_site = match record.same_site {
        Some(SameSitePolicy::Strict) => Some(SameSitePolicy::Strict),
        Some(SameSitePolicy::Lax) => Some(SameSitePolicy::Lax),
        Some(SameSitePolicy::None) | None if record.secure => Some(SameSitePolicy::None),
        Some(SameSitePolicy::None) | None => None,
    };

    BrowserCookie {
        name: record.name.clone(),
        value: record.value.clone(),
        domain,
        path: if record.path.is_empty() {
            "/".to_string()
        } else {
            record.path.clone()
        },
        expires,
        http_only: record.http_only,
        secure: record.secure,
        same_site,
    }
}

/// Unexpired cookies whose domain covers `url`'s host, on any path.
pub fn records_for_url(store: &CookieStore, url: &Url) -> Vec<CookieRecord> {
    let Some(host) = url.host_str() else {
        return Vec::new();
    };

    store
        .iter_unexpired()
        .filter_map(|cookie| {
            let domain = match &cookie.domain {
                CookieDomain::HostOnly(d) if d.eq_ignore_ascii_case(host) => d.clone(),
                CookieDomain::Suffix(d) if domain_matches(host, d) => {
                    format!(".{}", d.trim_start_matches('.'))
                }
                _ => return None,
            };
            let path: &str = cookie.path.as_ref();
            let expires = match &cookie.expires {
                CookieExpiration::AtUtc(at) => Some(at.unix_timestamp()),
                CookieExpiration::SessionEnd => None,
            };
            Some(CookieRecord {
                name: cookie.name().to_string(),
                value: cookie.value().to_string(),
                domain,
                path: path.to_string(),
                expires,
                http_only: cookie.http_only().unwrap_or(false),
                secure: cookie.secure().unwrap_or(false),
                same_site: cookie
                    .same_site()
                    .and_then(|s| SameSitePolicy::parse(&s.to_string())),
            })
        })
        .collect()
}

fn domain_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim_start_matches('.');
    host.eq_ignore_ascii_case(domain)
        || (host.len() > domain.len()
            && host[host.len() - domain.len()..].eq_ignore_ascii_case(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}
