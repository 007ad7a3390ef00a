//! Walking the (year, issue) space of one publication.
//!
//! For every issue number the walker:
//!
//! 1. skips the issue when its document already exists (the only resume marker),
//! 2. fetches the thumbnail as a cheap existence probe,
//! 3. fetches the issue index and extracts article ids, if the strategy needs them,
//! 4. hands the issue to the [`IssueAssembler`].
//!
//! Strictly sequential. Any error inside one issue is logged with the issue
//! key and the walk moves on to the next issue.

use crate::assemble::{IssueAssembler, ProbePolicy};
use crate::config::SiteConfig;
use crate::error::IssueError;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::models::{ArticleKey, IssueKey};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("static selector"));

/// One article listed on an issue index page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleEntry {
    pub id: String,
    /// The index links a document endpoint for this article.
    pub offers_pdf: bool,
}

/// Articles of one issue, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueIndex {
    pub articles: Vec<ArticleEntry>,
}

/// Every distinct `id` capture of `pattern` in `markup`, first-seen order.
pub fn extract_article_ids(markup: &str, pattern: &Regex) -> Vec<String> {
    pattern
        .captures_iter(markup)
        .filter_map(|caps| caps.name("id"))
        .map(|m| m.as_str().to_string())
        .unique()
        .collect()
}

/// URL paths of all links on the page, resolved against `page_url`.
fn linked_paths(markup: &str, page_url: &Url) -> HashSet<String> {
    let document = Html::parse_document(markup);
    document
        .select(&LINK_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| page_url.join(href).ok())
        .map(|url| url.path().trim_end_matches('/').to_string())
        .collect()
}

/// Build the article list for `key` from its index page markup.
pub fn parse_issue_index(
    markup: &str,
    site: &SiteConfig,
    key: &IssueKey,
) -> Result<IssueIndex, regex::Error> {
    let pattern = Regex::new(&site.article_pattern(key))?;
    let ids = extract_article_ids(markup, &pattern);

    let index_url = Url::parse(&site.issue_index_url(key)).ok();
    let links = index_url
        .as_ref()
        .map(|base| linked_paths(markup, base))
        .unwrap_or_default();

    let articles = ids
        .into_iter()
        .map(|id| {
            let article = ArticleKey::new(key.clone(), id);
            let offers_pdf = Url::parse(&site.article_pdf_url(&article))
                .map(|u| links.contains(u.path().trim_end_matches('/')))
                .unwrap_or(false);
            ArticleEntry {
                id: article.id,
                offers_pdf,
            }
        })
        .collect();

    Ok(IssueIndex { articles })
}

/// How one issue ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueStatus {
    /// The document was already there; nothing was fetched.
    Skipped,
    Completed(PathBuf),
    /// The archive has no such issue.
    Missing,
}

/// Tally of a walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkSummary {
    pub completed: u32,
    pub skipped: u32,
    pub missing: u32,
    pub failed: u32,
}

pub struct ArchiveWalker<'a> {
    pub fetcher: &'a Fetcher,
    pub site: &'a SiteConfig,
    pub root: &'a Path,
}

impl ArchiveWalker<'_> {
    /// Visit every issue of `publication` in `years` × `issues`.
    ///
    /// Issues are processed one at a time, years ascending, issue numbers
    /// ascending. A failure abandons only the issue it happened in.
    ///
    /// # Arguments
    ///
    /// * `publication` - Short name used in URLs and file names
    /// * `years` - Inclusive year range
    /// * `issues` - Inclusive issue-number range tried in every year
    /// * `assembler` - Strategy that produces the issue document
    ///
    /// # Returns
    ///
    /// Counts of completed, skipped (already on disk), missing and failed
    /// issues. When the strategy's [`ProbePolicy`] is `HaltYear`, the first
    /// missing issue of a year ends that year.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let walker = ArchiveWalker { fetcher: &fetcher, site: &site, root: &out_dir };
    /// let summary = walker.for_each_issue("ct", 2022..=2023, 1..=32, &assembler).await;
    /// info!(failed = summary.failed, "Done");
    /// ```
    #[instrument(level = "info", skip(self, assembler))]
    pub async fn for_each_issue<A: IssueAssembler>(
        &self,
        publication: &str,
        years: RangeInclusive<u16>,
        issues: RangeInclusive<u8>,
        assembler: &A,
    ) -> WalkSummary {
        let mut summary = WalkSummary::default();

        for year in years {
            for issue in issues.clone() {
                let key = IssueKey::new(publication, year, issue);
                match self.process_issue(&key, assembler).await {
                    Ok(IssueStatus::Skipped) => {
                        debug!(issue = %key, "Skipping existing issue");
                        summary.skipped += 1;
                    }
                    Ok(IssueStatus::Completed(path)) => {
                        info!(issue = %key, path = %path.display(), "Issue complete");
                        summary.completed += 1;
                    }
                    Ok(IssueStatus::Missing) => {
                        summary.missing += 1;
                        if assembler.probe_policy() == ProbePolicy::HaltYear {
                            info!(issue = %key, "Issue not in archive; moving to next year");
                            break;
                        }
                        info!(issue = %key, "Issue not in archive");
                    }
                    Err(e) => {
                        error!(issue = %key, error = %e, "Failed to process issue");
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(
            completed = summary.completed,
            skipped = summary.skipped,
            missing = summary.missing,
            failed = summary.failed,
            "Walk finished"
        );
        summary
    }

    async fn process_issue<A: IssueAssembler>(
        &self,
        key: &IssueKey,
        assembler: &A,
    ) -> Result<IssueStatus, IssueError> {
        if fs::try_exists(key.artifact_path(self.root))
            .await
            .unwrap_or(false)
        {
            return Ok(IssueStatus::Skipped);
        }

        let thumb_url = self.site.thumbnail_url(key);
        let probe = self
            .fetcher
            .fetch(&thumb_url, &key.thumbnail_path(self.root))
            .await?;
        if probe == FetchOutcome::NotFound {
            match assembler.probe_policy() {
                ProbePolicy::HaltYear => return Ok(IssueStatus::Missing),
                ProbePolicy::Continue => {
                    warn!(issue = %key, url = %thumb_url, "No thumbnail; trying index anyway")
                }
            }
        }

        let index = if assembler.needs_index() {
            match self.discover(key).await? {
                Some(index) => Some(index),
                None => return Ok(IssueStatus::Missing),
            }
        } else {
            None
        };

        let path = assembler.assemble(key, index.as_ref()).await?;
        Ok(IssueStatus::Completed(path))
    }

    /// Fetch and parse the issue index. `None` when the index is a 404.
    #[instrument(level = "debug", skip(self), fields(issue = %key))]
    async fn discover(&self, key: &IssueKey) -> Result<Option<IssueIndex>, IssueError> {
        let url = self.site.issue_index_url(key);
        let markup = match self.fetcher.get_text(&url).await {
            Ok(markup) => markup,
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => return Ok(None),
            Err(source) => return Err(IssueError::Index { url, source }),
        };

        let index = parse_issue_index(&markup, self.site, key)?;
        debug!(articles = index.articles.len(), "Discovered articles");
        Ok(Some(index))
    }
}
