// State of the unit of work being executed, shared by the engine and every
// handler: the build, where it runs, the build-variable table and the way
// out for log lines.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use worker_common::constants::SYSTEM_STEP;
use worker_common::{TraceManager, Tracing};
use worker_sdk::{ProcessInvoker, ProcessOutput, ProcessStartInfo};

use crate::controller_client::Controller;
use crate::log_shipper::LogSender;
use crate::model::ActionBuild;
use crate::variables::BuildVariables;

/// Per-build settings fixed before execution starts.
#[derive(Debug, Clone)]
pub struct Global {
    /// Prefix of the step log lines.
    pub worker_name: String,

    /// The build, with secrets already appended to its arguments.
    pub build: ActionBuild,

    /// Sandbox root; processes start here.
    pub working_directory: PathBuf,

    /// Scratch space inside the sandbox.
    pub temp_directory: PathBuf,

    pub plugins_directory: PathBuf,
}

pub struct ExecutionContext {
    global: Global,
    build_variables: BuildVariables,
    logs: LogSender,
    controller: Arc<dyn Controller>,
    invoker: ProcessInvoker,
    trace: Tracing,
}

impl ExecutionContext {
    pub fn new(
        global: Global,
        logs: LogSender,
        controller: Arc<dyn Controller>,
        trace_manager: &TraceManager,
    ) -> Self {
        Self {
            global,
            build_variables: BuildVariables::new(),
            logs,
            controller,
            invoker: ProcessInvoker::new(Arc::new(trace_manager.get("ProcessInvoker"))),
            trace: trace_manager.get("ExecutionContext"),
        }
    }

    pub fn build(&self) -> &ActionBuild {
        &self.global.build
    }

    pub fn build_id(&self) -> i64 {
        self.global.build.id
    }

    pub fn worker_name(&self) -> &str {
        &self.global.worker_name
    }

    pub fn working_directory(&self) -> &Path {
        &self.global.working_directory
    }

    pub fn temp_directory(&self) -> &Path {
        &self.global.temp_directory
    }

    pub fn plugins_directory(&self) -> &Path {
        &self.global.plugins_directory
    }

    pub fn build_variables(&self) -> &BuildVariables {
        &self.build_variables
    }

    pub fn controller(&self) -> &dyn Controller {
        self.controller.as_ref()
    }

    pub fn trace(&self) -> &Tracing {
        &self.trace
    }

    /// Queue a raw log line for `step`.
    pub fn log(&self, step: &str, text: impl Into<String>) {
        self.logs.log(self.build_id(), step, text);
    }

    /// Queue a line about step progress, prefixed with the worker name.
    pub fn log_step(&self, step: &str, text: &str) {
        self.log(step, format!("{}: {}", self.global.worker_name, text));
    }

    pub fn log_system(&self, text: impl Into<String>) {
        self.log(SYSTEM_STEP, text);
    }

    /// Run a process to completion, forwarding each output line to `step`'s log.
    pub async fn run_process(&self, step: &str, start: ProcessStartInfo) -> Result<i32> {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProcessOutput>();
        let forward = async {
            while let Some(output) = rx.recv().await {
                self.log(step, output.data);
            }
        };

        let (exit_code, ()) = tokio::join!(self.invoker.execute(start, tx), forward);
        exit_code
    }
}
