//! Producing the issue document.
//!
//! Two strategies sit behind [`IssueAssembler`], picked by [`crate::config::Mode`]:
//!
//! - [`WholeIssue`]: download the publisher's issue PDF, optionally behind a
//!   size plausibility check.
//! - [`ArticleAssembler`]: materialize every article listed in the issue index
//!   (direct PDF when offered, otherwise a rendered print view), merge them
//!   into the issue document and delete the per-article files.
//!
//! Both write the issue document through a `.part` sibling and rename, so the
//! canonical path only ever holds a finished document.
//!
//! When a merge fails, the partial output is removed but the article files are
//! kept; the next run reuses them instead of rendering again.

pub mod merge;
pub mod render;

use crate::archive::IssueIndex;
use crate::config::SiteConfig;
use crate::error::{AssemblyError, IssueError};
use crate::fetch::{FetchOutcome, Fetcher, SizeGuard};
use crate::models::{ArticleKey, IssueKey};
use crate::session::Session;
use crate::utils::{ensure_parent, part_path, remove_if_exists};
use merge::DocumentMerger;
use render::PageRenderer;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// What a 404 on the thumbnail probe means for the rest of the year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePolicy {
    /// Issues are numbered without gaps: stop at the first missing one.
    HaltYear,
    /// A missing thumbnail is only a hint; still try the index.
    Continue,
}

/// Produces the finished document for one issue.
pub trait IssueAssembler {
    fn probe_policy(&self) -> ProbePolicy;

    /// Whether [`IssueAssembler::assemble`] needs the issue index.
    fn needs_index(&self) -> bool;

    /// Write the issue document to `key.artifact_path(root)` and return it.
    async fn assemble(
        &self,
        key: &IssueKey,
        index: Option<&IssueIndex>,
    ) -> Result<PathBuf, IssueError>;
}

/// The publisher's own whole-issue PDF.
pub struct WholeIssue<'a> {
    pub fetcher: &'a Fetcher,
    pub site: &'a SiteConfig,
    pub root: &'a Path,
    pub size_guard: Option<SizeGuard>,
}

impl IssueAssembler for WholeIssue<'_> {
    fn probe_policy(&self) -> ProbePolicy {
        ProbePolicy::HaltYear
    }

    fn needs_index(&self) -> bool {
        false
    }

    #[instrument(level = "info", skip_all, fields(issue = %key))]
    async fn assemble(
        &self,
        key: &IssueKey,
        _index: Option<&IssueIndex>,
    ) -> Result<PathBuf, IssueError> {
        let url = self.site.issue_download_url(key);
        let dest = key.artifact_path(self.root);

        let outcome = match &self.size_guard {
            Some(guard) => self.fetcher.fetch_checked(&url, &dest, guard).await?,
            None => self.fetcher.fetch(&url, &dest).await?,
        };

        match outcome {
            FetchOutcome::Success { bytes } => {
                info!(path = %dest.display(), bytes, "Downloaded issue");
                Ok(dest)
            }
            FetchOutcome::NotFound => Err(IssueError::DocumentMissing { url }),
        }
    }
}

/// Article-by-article materialization followed by a merge.
pub struct ArticleAssembler<'a, R, M> {
    pub fetcher: &'a Fetcher,
    pub session: &'a Session,
    pub site: &'a SiteConfig,
    pub root: &'a Path,
    pub renderer: &'a R,
    pub merger: &'a M,
}

impl<R: PageRenderer, M: DocumentMerger> ArticleAssembler<'_, R, M> {
    /// Produce the per-article document, reusing one left by an earlier run.
    #[instrument(level = "info", skip(self), fields(issue = %article.issue, article = %article.id))]
    pub async fn materialize_article(
        &self,
        article: &ArticleKey,
        offers_pdf: bool,
    ) -> Result<PathBuf, IssueError> {
        let dest = article.artifact_path(self.root);
        if fs::try_exists(&dest).await.unwrap_or(false) {
            debug!(path = %dest.display(), "Reusing article document");
            return Ok(dest);
        }

        if offers_pdf {
            let url = self.site.article_pdf_url(article);
            match self.fetcher.fetch(&url, &dest).await? {
                FetchOutcome::Success { .. } => return Ok(dest),
                FetchOutcome::NotFound => {
                    warn!(%url, "Advertised article PDF missing; rendering instead")
                }
            }
        }

        let url = self.site.article_print_url(article);
        let cookies = match Url::parse(&url) {
            Ok(parsed) => self.session.browser_cookies_for(&parsed),
            Err(e) => {
                return Err(AssemblyError::Render {
                    url,
                    reason: e.to_string(),
                }
                .into());
            }
        };

        let io_err = |path: &Path, source| AssemblyError::Io {
            path: path.to_path_buf(),
            source,
        };
        ensure_parent(&dest).await.map_err(|e| io_err(&dest, e))?;
        let part = part_path(&dest);
        if let Err(e) = self.renderer.render_pdf(&url, &cookies, &part).await {
            let _ = remove_if_exists(&part).await;
            return Err(e.into());
        }
        fs::rename(&part, &dest)
            .await
            .map_err(|e| io_err(&dest, e))?;
        debug!(path = %dest.display(), "Rendered article");
        Ok(dest)
    }

    /// Merge `articles` into `output`, then delete them and their directory.
    ///
    /// # Arguments
    ///
    /// * `articles` - Per-article documents, in page order
    /// * `output` - Canonical issue document path
    ///
    /// # Errors
    ///
    /// [`AssemblyError::NoArticles`] for an empty list. On a merge failure the
    /// partial output is removed and the article files are left in place, so
    /// a later run can reuse them.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let output = key.artifact_path(root);
    /// assembler.assemble_issue(&article_paths, &output).await?;
    /// assert!(!key.article_dir(root).exists());
    /// ```
    #[instrument(level = "info", skip(self, articles), fields(articles = articles.len(), output = %output.display()))]
    pub async fn assemble_issue(
        &self,
        articles: &[PathBuf],
        output: &Path,
    ) -> Result<(), AssemblyError> {
        if articles.is_empty() {
            return Err(AssemblyError::NoArticles);
        }

        let io_err = |path: &Path, source| AssemblyError::Io {
            path: path.to_path_buf(),
            source,
        };
        ensure_parent(output).await.map_err(|e| io_err(output, e))?;
        let part = part_path(output);

        if let Err(e) = self.merger.merge(articles, &part).await {
            let _ = remove_if_exists(&part).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&part, output).await {
            let _ = remove_if_exists(&part).await;
            return Err(io_err(output, e));
        }

        for article in articles {
            remove_if_exists(article)
                .await
                .map_err(|e| io_err(article, e))?;
        }
        let mut dirs: Vec<&Path> = articles.iter().filter_map(|a| a.parent()).collect();
        dirs.dedup();
        for dir in dirs {
            if let Err(e) = fs::remove_dir(dir).await {
                warn!(dir = %dir.display(), error = %e, "Article directory not removed");
            }
        }
        Ok(())
    }
}

impl<R: PageRenderer, M: DocumentMerger> IssueAssembler for ArticleAssembler<'_, R, M> {
    fn probe_policy(&self) -> ProbePolicy {
        ProbePolicy::Continue
    }

    fn needs_index(&self) -> bool {
        true
    }

    #[instrument(level = "info", skip_all, fields(issue = %key))]
    async fn assemble(
        &self,
        key: &IssueKey,
        index: Option<&IssueIndex>,
    ) -> Result<PathBuf, IssueError> {
        let index = index.ok_or(AssemblyError::NoArticles)?;
        let mut paths = Vec::with_capacity(index.articles.len());

        for entry in &index.articles {
            let article = ArticleKey::new(key.clone(), entry.id.clone());
            paths.push(self.materialize_article(&article, entry.offers_pdf).await?);
        }

        let output = key.artifact_path(self.root);
        self.assemble_issue(&paths, &output).await?;
        info!(path = %output.display(), articles = paths.len(), "Merged issue");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArticleEntry;
    use crate::fetch::RetryPolicy;
    use crate::session::cookies::{SESSION_EXPIRY, SameSitePolicy};
    use crate::test_support::{ConcatMerger, FailingMerger, FakeRenderer, test_session};
    use std::time::Duration;

    fn fetcher() -> Fetcher {
        Fetcher::new(
            reqwest::Client::new(),
            RetryPolicy {
                max_attempts: 1,
                backoff: Duration::from_millis(1),
            },
        )
    }

    fn site() -> SiteConfig {
        SiteConfig {
            article_url: "http://127.0.0.1:9/{publication}/{year}/{issue}/seite-{article}"
                .to_string(),
            ..SiteConfig::default()
        }
    }

    fn write_articles(root: &Path, key: &IssueKey, ids: &[&str]) -> Vec<PathBuf> {
        ids.iter()
            .map(|id| {
                let path = ArticleKey::new(key.clone(), *id).artifact_path(root);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(&path, format!("[{id}]")).unwrap();
                path
            })
            .collect()
    }

    #[tokio::test]
    async fn test_merge_cleans_up_articles_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let key = IssueKey::new("xx", 2023, 1);
        let paths = write_articles(dir.path(), &key, &["1", "2", "3"]);
        let (fetcher, session, site) = (fetcher(), test_session(), site());
        let assembler = ArticleAssembler {
            fetcher: &fetcher,
            session: &session,
            site: &site,
            root: dir.path(),
            renderer: &FakeRenderer::default(),
            merger: &ConcatMerger,
        };
        let output = key.artifact_path(dir.path());

        assembler.assemble_issue(&paths, &output).await.unwrap();

        assert_eq!(std::fs::read_to_string(&output).unwrap(), "[1][2][3]");
        assert!(paths.iter().all(|p| !p.exists()));
        assert!(!key.article_dir(dir.path()).exists());
        let year_entries: Vec<_> = std::fs::read_dir(key.year_dir(dir.path()))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(year_entries, vec![std::ffi::OsString::from("xx.2023.01.pdf")]);
    }

    #[tokio::test]
    async fn test_merge_failure_keeps_articles_and_leaves_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let key = IssueKey::new("xx", 2023, 1);
        let paths = write_articles(dir.path(), &key, &["1", "2"]);
        let (fetcher, session, site) = (fetcher(), test_session(), site());
        let assembler = ArticleAssembler {
            fetcher: &fetcher,
            session: &session,
            site: &site,
            root: dir.path(),
            renderer: &FakeRenderer::default(),
            merger: &FailingMerger,
        };
        let output = key.artifact_path(dir.path());

        let err = assembler.assemble_issue(&paths, &output).await.unwrap_err();

        assert!(matches!(err, AssemblyError::Merge { .. }));
        assert!(!output.exists());
        assert!(!part_path(&output).exists());
        assert!(paths.iter().all(|p| p.exists()));
    }

    #[tokio::test]
    async fn test_empty_article_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (fetcher, session, site) = (fetcher(), test_session(), site());
        let assembler = ArticleAssembler {
            fetcher: &fetcher,
            session: &session,
            site: &site,
            root: dir.path(),
            renderer: &FakeRenderer::default(),
            merger: &ConcatMerger,
        };
        let err = assembler
            .assemble_issue(&[], &dir.path().join("x.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblyError::NoArticles));
    }

    #[tokio::test]
    async fn test_existing_article_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let key = IssueKey::new("xx", 2023, 4);
        write_articles(dir.path(), &key, &["7"]);
        let renderer = FakeRenderer::default();
        let (fetcher, session, site) = (fetcher(), test_session(), site());
        let assembler = ArticleAssembler {
            fetcher: &fetcher,
            session: &session,
            site: &site,
            root: dir.path(),
            renderer: &renderer,
            merger: &ConcatMerger,
        };

        let path = assembler
            .materialize_article(&ArticleKey::new(key, "7"), false)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(path).unwrap(), "[7]");
        assert!(renderer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_render_uses_print_view() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = FakeRenderer::default();
        let (fetcher, session, site) = (fetcher(), test_session(), site());
        let assembler = ArticleAssembler {
            fetcher: &fetcher,
            session: &session,
            site: &site,
            root: dir.path(),
            renderer: &renderer,
            merger: &ConcatMerger,
        };
        let article = ArticleKey::new(IssueKey::new("xx", 2023, 4), "9");

        let path = assembler.materialize_article(&article, false).await.unwrap();

        assert_eq!(
            renderer.calls(),
            vec!["http://127.0.0.1:9/xx/2023/4/seite-9?view=print".to_string()]
        );
        assert!(path.exists());
        assert!(!part_path(&path).exists());
    }

    #[tokio::test]
    async fn test_render_receives_translated_session_cookies() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = FakeRenderer::default();
        let (fetcher, session) = (fetcher(), test_session());
        let site = SiteConfig {
            article_url: "https://www.archive.example/{publication}/{year}/{issue}/seite-{article}"
                .to_string(),
            ..SiteConfig::default()
        };
        let origin = Url::parse("https://www.archive.example/sso/login").unwrap();
        session.seed_cookie("wide=1; Domain=archive.example; Path=/; Secure", &origin);
        session.seed_cookie("sid=abc; Path=/; Max-Age=3600; SameSite=Lax", &origin);
        session.seed_cookie("other=x; Path=/", &Url::parse("https://elsewhere.example/").unwrap());
        let assembler = ArticleAssembler {
            fetcher: &fetcher,
            session: &session,
            site: &site,
            root: dir.path(),
            renderer: &renderer,
            merger: &ConcatMerger,
        };
        let article = ArticleKey::new(IssueKey::new("xx", 2023, 4), "9");

        assembler.materialize_article(&article, false).await.unwrap();

        let mut cookies = renderer.cookies(0);
        cookies.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(cookies.len(), 2);

        let sid = &cookies[0];
        assert_eq!(sid.name, "sid");
        assert_eq!(sid.domain, "www.archive.example");
        assert!(sid.expires > 0.0);
        assert_eq!(sid.same_site, Some(SameSitePolicy::Lax));

        let wide = &cookies[1];
        assert_eq!(wide.name, "wide");
        assert_eq!(wide.domain, "archive.example");
        assert_eq!(wide.expires, SESSION_EXPIRY);
        assert_eq!(wide.same_site, Some(SameSitePolicy::None));
        assert_eq!(wide.path, "/");
    }

    #[tokio::test]
    async fn test_failed_render_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = FakeRenderer::failing();
        let (fetcher, session, site) = (fetcher(), test_session(), site());
        let assembler = ArticleAssembler {
            fetcher: &fetcher,
            session: &session,
            site: &site,
            root: dir.path(),
            renderer: &renderer,
            merger: &ConcatMerger,
        };
        let key = IssueKey::new("xx", 2023, 4);
        let index = IssueIndex {
            articles: vec![ArticleEntry {
                id: "9".to_string(),
                offers_pdf: false,
            }],
        };

        let err = assembler.assemble(&key, Some(&index)).await.unwrap_err();

        assert!(matches!(err, IssueError::Assembly(AssemblyError::Render { .. })));
        assert!(!key.artifact_path(dir.path()).exists());
        let article = ArticleKey::new(key, "9").artifact_path(dir.path());
        assert!(!article.exists());
        assert!(!part_path(&article).exists());
    }
}
