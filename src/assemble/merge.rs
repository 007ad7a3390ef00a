//! Concatenation of per-article documents into one issue document.

use crate::error::AssemblyError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, instrument};

/// Joins documents, pages in input order, into `output`.
pub trait DocumentMerger {
    async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), AssemblyError>;
}

/// Ghostscript `pdfwrite` run as a batch subprocess.
#[derive(Debug, Clone)]
pub struct Ghostscript {
    program: String,
}

impl Default for Ghostscript {
    fn default() -> Self {
        Self {
            program: "gs".to_string(),
        }
    }
}

impl Ghostscript {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(inputs: &[PathBuf], output: &Path) -> Vec<OsString> {
        let mut out_flag = OsString::from("-sOutputFile=");
        out_flag.push(output);

        let mut args: Vec<OsString> = ["-dBATCH", "-dNOPAUSE", "-q", "-sDEVICE=pdfwrite"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(out_flag);
        args.extend(inputs.iter().map(|p| p.as_os_str().to_owned()));
        args
    }
}

impl DocumentMerger for Ghostscript {
    #[instrument(level = "info", skip(self, inputs), fields(inputs = inputs.len(), output = %output.display()))]
    async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), AssemblyError> {
        let result = Command::new(&self.program)
            .args(Self::args(inputs, output))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| AssemblyError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !result.status.success() {
            return Err(AssemblyError::Merge {
                output: output.to_path_buf(),
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        debug!("Merge finished");
        Ok(())
    }
}
