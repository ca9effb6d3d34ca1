//! Benchmark settings, fae a JSON file or the defaults

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, BenchResult};
use crate::logging::LoggerCore;
use crate::recurrence::DEFAULT_CAPACITY;
use crate::runner::BenchmarkRunner;
use crate::strategy::{EngineReuse, ExecutorSharing, PassOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Every knob a run takes
///
/// Missin' keys fall back tae the defaults, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    pub input: i64,
    pub count: usize,
    pub capacity: usize,
    pub reuse_engine: bool,
    pub shared_executor: bool,
    pub validate: bool,
    /// Log filter spec, e.g. `mutter` or `blether,haversbench::runner=whisper`
    pub log: Option<String>,
    /// Append log lines tae this file instead o' stderr
    pub log_file: Option<String>,
    pub format: OutputFormat,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            input: 80,
            count: 100,
            capacity: DEFAULT_CAPACITY,
            reuse_engine: false,
            shared_executor: false,
            validate: true,
            log: None,
            log_file: None,
            format: OutputFormat::Text,
        }
    }
}

impl BenchConfig {
    pub fn load(path: &Path) -> BenchResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| BenchError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| BenchError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn pass_options(&self) -> PassOptions {
        let engine_reuse = if self.reuse_engine {
            EngineReuse::Reuse
        } else {
            EngineReuse::Fresh
        };
        let sharing = if self.shared_executor {
            ExecutorSharing::Shared
        } else {
            ExecutorSharing::Fresh
        };
        PassOptions::new()
            .with_capacity(self.capacity)
            .with_engine_reuse(engine_reuse)
            .with_executor_sharing(sharing)
    }

    pub fn logger(&self) -> LoggerCore {
        match &self.log_file {
            Some(path) => LoggerCore::to_file(path),
            None => LoggerCore::new(),
        }
    }

    /// A runner wi' the three built-in strategies registered
    pub fn into_runner(self) -> BenchmarkRunner {
        BenchmarkRunner::with_default_strategies()
            .with_options(self.pass_options())
            .with_validation(self.validate)
            .with_logger(self.logger())
    }
}
