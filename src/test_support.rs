//! Test fixtures: in-process HTTP servers and fake renderer/merger implementations.

use crate::assemble::merge::DocumentMerger;
use crate::assemble::render::PageRenderer;
use crate::error::AssemblyError;
use crate::session::Session;
use crate::session::cookies::BrowserCookie;
use axum::Router;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Serve `app` on an ephemeral localhost port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Shared request counter.
#[derive(Clone, Default)]
pub struct Hits(Arc<AtomicU32>);

impl Hits {
    /// Record a hit and return how many came before it.
    pub fn bump(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Session with an empty cookie store.
pub fn test_session() -> Session {
    Session::anonymous()
}

/// Renderer that writes a stub document naming the URL it was asked for.
#[derive(Default)]
pub struct FakeRenderer {
    calls: Mutex<Vec<(String, Vec<BrowserCookie>)>>,
    fail: bool,
}

impl FakeRenderer {
    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// URLs rendered so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Cookies handed over with the `n`th render.
    pub fn cookies(&self, n: usize) -> Vec<BrowserCookie> {
        self.calls.lock().unwrap()[n].1.clone()
    }
}

impl PageRenderer for FakeRenderer {
    async fn render_pdf(
        &self,
        url: &str,
        cookies: &[BrowserCookie],
        dest: &Path,
    ) -> Result<(), AssemblyError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), cookies.to_vec()));
        if self.fail {
            return Err(AssemblyError::Render {
                url: url.to_string(),
                reason: "renderer crashed".to_string(),
            });
        }
        tokio::fs::write(dest, format!("%PDF {url}\n")).await.unwrap();
        Ok(())
    }
}

/// Merger that concatenates input bytes.
pub struct ConcatMerger;

impl DocumentMerger for ConcatMerger {
    async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), AssemblyError> {
        let mut merged = Vec::new();
        for input in inputs {
            merged.extend(tokio::fs::read(input).await.unwrap());
        }
        tokio::fs::write(output, merged).await.unwrap();
        Ok(())
    }
}

/// Merger that writes half a file and then fails.
pub struct FailingMerger;

impl DocumentMerger for FailingMerger {
    async fn merge(&self, _inputs: &[PathBuf], output: &Path) -> Result<(), AssemblyError> {
        tokio::fs::write(output, b"%PDF-trunc").await.unwrap();
        Err(AssemblyError::Merge {
            output: output.to_path_buf(),
            status: "exit status: 1".to_string(),
            stderr: "Unrecoverable error".to_string(),
        })
    }
}
