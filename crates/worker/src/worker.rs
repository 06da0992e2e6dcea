// Worker: top level of the build-worker process.
// Loads the unit of work, connects to the controller and hands the work to
// the JobRunner. One worker process runs one build.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use worker_common::{TraceManager, WorkerSettings};
use worker_sdk::TraceWriter;

use crate::controller_client::{Controller, HttpController};
use crate::job_runner::JobRunner;
use crate::model::{BuildResult, WorkUnit};

/// Reads the work unit from standard input.
pub const STDIN_SOURCE: &str = "-";

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("cannot read work unit from {source_name}: {source}")]
    Read {
        source_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid work unit in {source_name}: {source}")]
    Parse {
        source_name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse a JSON work unit.
pub fn parse_work_unit(json: &str, source_name: &str) -> Result<WorkUnit, WorkerError> {
    serde_json::from_str(json).map_err(|source| WorkerError::Parse {
        source_name: source_name.to_string(),
        source,
    })
}

/// Load a work unit from a file, or from stdin when `source` is `-`.
pub fn load_work_unit(source: &str) -> Result<WorkUnit, WorkerError> {
    let read_error = |e| WorkerError::Read {
        source_name: source.to_string(),
        source: e,
    };

    let content = if source == STDIN_SOURCE {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .map_err(read_error)?;
        buffer
    } else {
        std::fs::read_to_string(PathBuf::from(source)).map_err(read_error)?
    };

    parse_work_unit(&content, source)
}

pub struct Worker {
    settings: WorkerSettings,
    trace_manager: TraceManager,
}

impl Worker {
    pub fn new(settings: WorkerSettings) -> Self {
        Self {
            settings,
            trace_manager: TraceManager::default(),
        }
    }

    /// Run `work` against the controller named in the settings.
    pub async fn run(&self, work: WorkUnit) -> Result<BuildResult> {
        self.settings.validate().context("Invalid worker settings")?;
        let controller = HttpController::from_settings(&self.settings)
            .context("Failed to create controller client")?;
        Ok(self.run_with_controller(work, Arc::new(controller)).await)
    }

    pub async fn run_with_controller(
        &self,
        work: WorkUnit,
        controller: Arc<dyn Controller>,
    ) -> BuildResult {
        let trace = self.trace_manager.get("Worker");
        trace.info(&format!(
            "Worker {} picked up build {}",
            self.settings.name, work.action_build.id
        ));

        let runner = JobRunner::new(
            self.settings.clone(),
            controller,
            self.trace_manager.clone(),
        );
        let result = runner.run(work).await;

        trace.info(&format!(
            "Build {} completed with status {}",
            result.build_id, result.status
        ));
        result
    }
}
