use crate::errors::Result;
use crate::models::{BacktestBundle, EpisodeTrace};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const BUNDLE_FILE: &str = "bundle.json";
pub const TRACE_FILE: &str = "trace.jsonl";

/// Persists a run's bundle (and optionally its full trace) into a
/// per-run directory under the results root.
pub struct ResultsStore {
    results_dir: PathBuf,
}

impl ResultsStore {
    pub fn new<P: Into<PathBuf>>(results_dir: P) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    /// Write the bundle and the per-step trace; returns the run directory.
    pub fn store(&self, bundle: &BacktestBundle, trace: Option<&EpisodeTrace>) -> Result<PathBuf> {
        let run_dir = self
            .results_dir
            .join(format!("backtest_{}_{}", bundle.symbol, bundle.run_id));
        fs::create_dir_all(&run_dir)?;

        let json = serde_json::to_string_pretty(bundle)?;
        fs::write(run_dir.join(BUNDLE_FILE), json)?;

        if let Some(trace) = trace {
            let file = File::create(run_dir.join(TRACE_FILE))?;
            let mut writer = BufWriter::new(file);
            for record in trace.records() {
                let line = serde_json::to_string(record)?;
                writeln!(writer, "{}", line)?;
            }
            writer.flush()?;
        }

        Ok(run_dir)
    }

    /// Read a stored bundle back from a run directory.
    pub fn read_bundle<P: AsRef<Path>>(run_dir: P) -> Result<BacktestBundle> {
        let content = fs::read_to_string(run_dir.as_ref().join(BUNDLE_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }
}
