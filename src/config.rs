//! Runtime configuration resolved once at startup.
//!
//! Site knowledge (login endpoints, archive URL layout, article markers) lives
//! in [`SiteConfig`] rather than in the code paths that use it. The defaults
//! describe the reference archive; a YAML file passed with `--config` can
//! override any field.
//!
//! URL templates use `{publication}`, `{year}`, `{issue}` (unpadded) and
//! `{article}` placeholders.

use crate::error::ConfigError;
use crate::models::{ArticleKey, IssueKey};
use clap::ValueEnum;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

pub const USERNAME_ENV: &str = "ARCHIVE_USERNAME";
pub const PASSWORD_ENV: &str = "ARCHIVE_PASSWORD";

/// Account used by the login protocol.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Both values must be present; an absent one is named in the error.
    pub fn resolve(
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, ConfigError> {
        let username = username
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingCredential(USERNAME_ENV))?;
        let password = password
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::MissingCredential(PASSWORD_ENV))?;
        Ok(Self { username, password })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How an issue document is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Render every article's print view and merge them into one PDF.
    Articles,
    /// Download the publisher's whole-issue PDF.
    Issue,
    /// Like `issue`, but re-download bodies that are implausibly small.
    IssueChecked,
}

impl Mode {
    /// Highest issue number probed per year unless overridden.
    pub fn default_max_issue(self) -> u8 {
        match self {
            Mode::Articles | Mode::Issue => 32,
            Mode::IssueChecked => 10,
        }
    }
}

/// Site-specific URLs and markers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// GET to obtain an anonymous session.
    pub login_bootstrap_url: String,
    /// Form POST with username/password; answers with remote login URLs.
    pub login_submit_url: String,
    pub thumbnail_url: String,
    pub issue_index_url: String,
    pub issue_download_url: String,
    pub article_url: String,
    /// Query appended to an article URL for the print-oriented view.
    pub print_query: String,
    /// Suffix appended to an article URL for its document endpoint.
    pub article_pdf_suffix: String,
    /// Regex template locating article ids in the index markup. Must contain
    /// a capture group named `id`. Placeholder values are regex-escaped.
    pub article_pattern: String,
    /// Serialized cookie store, relative to the working directory.
    pub session_file: PathBuf,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            login_bootstrap_url: "https://www.heise.de/sso/login".to_string(),
            login_submit_url: "https://www.heise.de/sso/login/login".to_string(),
            thumbnail_url:
                "https://heise.cloudimg.io/v7/_www-heise-de_/select/thumbnail/{publication}/{year}/{issue}.jpg"
                    .to_string(),
            issue_index_url: "https://www.heise.de/select/{publication}/archiv/{year}/{issue}"
                .to_string(),
            issue_download_url:
                "https://www.heise.de/select/{publication}/archiv/{year}/{issue}/download"
                    .to_string(),
            article_url:
                "https://www.heise.de/select/{publication}/archiv/{year}/{issue}/seite-{article}"
                    .to_string(),
            print_query: "view=print".to_string(),
            article_pdf_suffix: "/pdf".to_string(),
            article_pattern: r"/select/{publication}/archiv/{year}/{issue}/seite-(?P<id>\d+)"
                .to_string(),
            session_file: PathBuf::from("cookiejar.json"),
        }
    }
}

impl SiteConfig {
    /// Load overrides from a YAML file; missing fields keep their defaults.
    #[instrument(level = "info", fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SiteConfig =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        info!("Loaded site configuration");
        Ok(config)
    }

    pub fn thumbnail_url(&self, key: &IssueKey) -> String {
        fill(&self.thumbnail_url, key, None, false)
    }

    pub fn issue_index_url(&self, key: &IssueKey) -> String {
        fill(&self.issue_index_url, key, None, false)
    }

    pub fn issue_download_url(&self, key: &IssueKey) -> String {
        fill(&self.issue_download_url, key, None, false)
    }

    pub fn article_url(&self, article: &ArticleKey) -> String {
        fill(&self.article_url, &article.issue, Some(&article.id), false)
    }

    pub fn article_print_url(&self, article: &ArticleKey) -> String {
        let base = self.article_url(article);
        if self.print_query.is_empty() {
            base
        } else if base.contains('?') {
            format!("{}&{}", base, self.print_query)
        } else {
            format!("{}?{}", base, self.print_query)
        }
    }

    pub fn article_pdf_url(&self, article: &ArticleKey) -> String {
        format!("{}{}", self.article_url(article), self.article_pdf_suffix)
    }

    /// Article-id pattern for one issue, placeholders regex-escaped.
    pub fn article_pattern(&self, key: &IssueKey) -> String {
        fill(&self.article_pattern, key, None, true)
    }
}

fn fill(template: &str, key: &IssueKey, article: Option<&str>, escape: bool) -> String {
    let esc = |s: &str| {
        if escape {
            regex::escape(s)
        } else {
            s.to_string()
        }
    };
    let mut out = template
        .replace("{publication}", &esc(&key.publication))
        .replace("{year}", &key.year.to_string())
        .replace("{issue}", &key.issue.to_string());
    if let Some(article) = article {
        out = out.replace("{article}", &esc(article));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_urls() {
        let site = SiteConfig::default();
        let key = IssueKey::new("ct", 2023, 5);
        assert_eq!(
            site.thumbnail_url(&key),
            "https://heise.cloudimg.io/v7/_www-heise-de_/select/thumbnail/ct/2023/5.jpg"
        );
        assert_eq!(
            site.issue_download_url(&key),
            "https://www.heise.de/select/ct/archiv/2023/5/download"
        );
        let article = ArticleKey::new(key, "12");
        assert_eq!(
            site.article_print_url(&article),
            "https://www.heise.de/select/ct/archiv/2023/5/seite-12?view=print"
        );
        assert_eq!(
            site.article_pdf_url(&article),
            "https://www.heise.de/select/ct/archiv/2023/5/seite-12/pdf"
        );
    }

    #[test]
    fn test_article_pattern_escapes_publication() {
        let site = SiteConfig::default();
        let pattern = site.article_pattern(&IssueKey::new("c.t", 2020, 1));
        assert!(pattern.starts_with(r"/select/c\.t/archiv/2020/1/seite-"));
    }

    #[test]
    fn test_credentials_missing_password() {
        let err = Credentials::resolve(Some("me".into()), None).unwrap_err();
        assert!(err.to_string().contains(PASSWORD_ENV));
    }

    #[test]
    fn test_credentials_empty_username() {
        let err = Credentials::resolve(Some(String::new()), Some("pw".into())).unwrap_err();
        assert!(err.to_string().contains(USERNAME_ENV));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::resolve(Some("me".into()), Some("hunter2".into())).unwrap();
        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn test_yaml_override_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.yaml");
        std::fs::write(&path, "session_file: other.json\nprint_query: ''\n").unwrap();
        let site = SiteConfig::load(&path).unwrap();
        assert_eq!(site.session_file, PathBuf::from("other.json"));
        assert_eq!(site.login_submit_url, SiteConfig::default().login_submit_url);
        let article = ArticleKey::new(IssueKey::new("ct", 2023, 1), "3");
        assert!(!site.article_print_url(&article).contains('?'));
    }

    #[test]
    fn test_mode_issue_ranges() {
        assert_eq!(Mode::Articles.default_max_issue(), 32);
        assert_eq!(Mode::Issue.default_max_issue(), 32);
        assert_eq!(Mode::IssueChecked.default_max_issue(), 10);
    }
}
