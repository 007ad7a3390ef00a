//! Identifiers for issues and articles, and the file layout derived from them.
//!
//! Every path the pipeline touches is computed from an [`IssueKey`] relative to
//! an output root:
//!
//! ```text
//! {root}/{publication}/{year}/{publication}.{year}.{issue:02}.pdf   issue artifact
//! {root}/{publication}/{year}/{publication}.{year}.{issue:02}.jpg   thumbnail probe
//! {root}/{publication}/{year}/{issue:02}/                           transient article dir
//! {root}/{publication}/{year}/{issue:02}/{stem}.{article}.pdf        article artifact
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

/// One periodical issue: publication + year + issue number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueKey {
    pub publication: String,
    pub year: u16,
    pub issue: u8,
}

impl IssueKey {
    pub fn new(publication: impl Into<String>, year: u16, issue: u8) -> Self {
        Self {
            publication: publication.into(),
            year,
            issue,
        }
    }

    /// `{publication}.{year}.{issue:02}`
    pub fn stem(&self) -> String {
        format!("{}.{}.{:02}", self.publication, self.year, self.issue)
    }

    /// Directory holding every artifact of this issue's year.
    pub fn year_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.publication).join(self.year.to_string())
    }

    /// Canonical path of the finished issue document. Its existence is the
    /// only "already done" marker.
    pub fn artifact_path(&self, root: &Path) -> PathBuf {
        self.year_dir(root).join(format!("{}.pdf", self.stem()))
    }

    pub fn thumbnail_path(&self, root: &Path) -> PathBuf {
        self.year_dir(root).join(format!("{}.jpg", self.stem()))
    }

    /// Transient directory for per-article documents; removed after merge.
    pub fn article_dir(&self, root: &Path) -> PathBuf {
        self.year_dir(root).join(format!("{:02}", self.issue))
    }
}

impl fmt::Display for IssueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{:02}", self.publication, self.year, self.issue)
    }
}

/// One article inside an issue. The id is an opaque token scraped from the
/// issue index page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArticleKey {
    pub issue: IssueKey,
    pub id: String,
}

impl ArticleKey {
    pub fn new(issue: IssueKey, id: impl Into<String>) -> Self {
        Self {
            issue,
            id: id.into(),
        }
    }

    pub fn artifact_path(&self, root: &Path) -> PathBuf {
        self.issue
            .article_dir(root)
            .join(format!("{}.{}.pdf", self.issue.stem(), self.id))
    }
}
