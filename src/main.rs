//! # Periodical Archiver
//!
//! Downloads a periodical's back catalog from a paywalled archive, one PDF per
//! issue.
//!
//! ## Usage
//!
//! ```sh
//! ARCHIVE_USERNAME=me@example.com ARCHIVE_PASSWORD=... periodical_archiver ct 2022 2023
//! ```
//!
//! ## Architecture
//!
//! The run is a single sequential pipeline:
//! 1. **Session**: restore the stored cookie jar, or log in and store it
//! 2. **Walk**: for each year and issue number, skip finished issues and probe the rest
//! 3. **Assemble**: download the issue PDF, or render and merge its articles
//!
//! Re-running the same command resumes where the last run stopped: an issue
//! whose PDF exists is never requested again.

use clap::Parser;
use std::error::Error;
use std::process::ExitCode;
use tracing::{error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod archive;
mod assemble;
mod cli;
mod config;
mod error;
mod fetch;
mod models;
mod session;
#[cfg(test)]
mod test_support;
mod utils;

use archive::ArchiveWalker;
use assemble::merge::Ghostscript;
use assemble::render::ChromiumRenderer;
use assemble::{ArticleAssembler, WholeIssue};
use cli::Cli;
use config::{Credentials, Mode, SiteConfig};
use error::ConfigError;
use fetch::{Fetcher, RetryPolicy, SizeGuard};
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    // --- Tracing init ---
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tfmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Aborting");
            ExitCode::FAILURE
        }
    }
}

#[instrument(level = "info", skip_all, fields(publication = %args.publication))]
async fn run(args: Cli) -> Result<(), Box<dyn Error>> {
    let start_time = std::time::Instant::now();

    let (start_year, end_year) = (args.start_year, args.end_year());
    if end_year < start_year {
        return Err(ConfigError::YearRange {
            start: start_year,
            end: end_year,
        }
        .into());
    }
    let this_year = chrono::Utc::now().format("%Y").to_string();
    if this_year.parse::<u16>().is_ok_and(|y| end_year > y) {
        warn!(end_year, "End year lies in the future; later issues will be missing");
    }

    let credentials = Credentials::resolve(args.username.clone(), args.password.clone())?;
    let site = match &args.config {
        Some(path) => SiteConfig::load(path)?,
        None => SiteConfig::default(),
    };
    ensure_writable_dir(&args.out_dir).await?;

    let session = session::ensure_session(&credentials, &site, &site.session_file).await?;
    let fetcher = Fetcher::new(session.client().clone(), RetryPolicy::default());
    let walker = ArchiveWalker {
        fetcher: &fetcher,
        site: &site,
        root: &args.out_dir,
    };
    let years = start_year..=end_year;
    let issues = 1..=args.max_issue();

    info!(mode = ?args.mode, start_year, end_year, max_issue = args.max_issue(), "Starting walk");

    let summary = match args.mode {
        Mode::Issue | Mode::IssueChecked => {
            let assembler = WholeIssue {
                fetcher: &fetcher,
                site: &site,
                root: &args.out_dir,
                size_guard: (args.mode == Mode::IssueChecked).then(SizeGuard::default),
            };
            walker
                .for_each_issue(&args.publication, years, issues, &assembler)
                .await
        }
        Mode::Articles => {
            let renderer = ChromiumRenderer::launch().await?;
            let merger = Ghostscript::default();
            let assembler = ArticleAssembler {
                fetcher: &fetcher,
                session: &session,
                site: &site,
                root: &args.out_dir,
                renderer: &renderer,
                merger: &merger,
            };
            let summary = walker
                .for_each_issue(&args.publication, years, issues, &assembler)
                .await;
            renderer.shutdown().await;
            summary
        }
    };

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        completed = summary.completed,
        skipped = summary.skipped,
        missing = summary.missing,
        failed = summary.failed,
        "Execution complete"
    );
    Ok(())
}
