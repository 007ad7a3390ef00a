//! Command-line interface definitions.
//!
//! Credentials can be given as flags but are normally taken from the
//! `ARCHIVE_USERNAME` / `ARCHIVE_PASSWORD` environment variables.

use crate::config::{Mode, PASSWORD_ENV, USERNAME_ENV};
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments.
///
/// # Examples
///
/// ```sh
/// # One year of c't, article by article
/// periodical_archiver ct 2023
///
/// # A range of years, publisher PDFs with the size check
/// periodical_archiver ix 2019 2021 --mode issue-checked -v
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Publication short name as used in archive URLs (e.g. ct, ix)
    pub publication: String,

    /// First year to download
    pub start_year: u16,

    /// Last year to download (defaults to the start year)
    pub end_year: Option<u16>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// How issue documents are produced
    #[arg(short, long, value_enum, default_value_t = Mode::Articles)]
    pub mode: Mode,

    /// Highest issue number to try per year
    #[arg(long)]
    pub max_issue: Option<u8>,

    /// Root directory for downloaded files
    #[arg(short, long, default_value = ".")]
    pub out_dir: PathBuf,

    /// Optional YAML file overriding site URLs and the session file location
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Archive account name
    #[arg(long, env = USERNAME_ENV)]
    pub username: Option<String>,

    /// Archive account password
    #[arg(long, env = PASSWORD_ENV, hide_env_values = true)]
    pub password: Option<String>,
}

impl Cli {
    pub fn end_year(&self) -> u16 {
        self.end_year.unwrap_or(self.start_year)
    }

    pub fn max_issue(&self) -> u8 {
        self.max_issue.unwrap_or_else(|| self.mode.default_max_issue())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_positional_defaults() {
        let cli = Cli::parse_from(["periodical_archiver", "ct", "2023"]);
        assert_eq!(cli.publication, "ct");
        assert_eq!(cli.start_year, 2023);
        assert_eq!(cli.end_year(), 2023);
        assert_eq!(cli.mode, Mode::Articles);
        assert_eq!(cli.max_issue(), 32);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_year_range_and_flags() {
        let cli = Cli::parse_from([
            "periodical_archiver",
            "ix",
            "2019",
            "2021",
            "-v",
            "--mode",
            "issue-checked",
        ]);
        assert_eq!(cli.end_year(), 2021);
        assert!(cli.verbose);
        assert_eq!(cli.mode, Mode::IssueChecked);
        assert_eq!(cli.max_issue(), 10);
    }

    #[test]
    fn test_cli_max_issue_override() {
        let cli = Cli::parse_from(["periodical_archiver", "ct", "2023", "--max-issue", "4"]);
        assert_eq!(cli.max_issue(), 4);
    }

    #[test]
    fn test_cli_rejects_missing_year() {
        assert!(Cli::try_parse_from(["periodical_archiver", "ct"]).is_err());
    }
}
