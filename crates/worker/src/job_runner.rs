// JobRunner: takes one unit of work from start to reported result.
//
//   register secrets → start log shipper → resolve variables
//     → append secrets to the build arguments → sandbox setup (+ SSH keys)
//     → arm watchdog → ActionRunner::start → disarm → sandbox teardown
//     → "Done." → drain logs → report the result

use std::sync::Arc;
use worker_common::constants::SYSTEM_STEP;
use worker_common::{TraceManager, Tracing, WorkerSettings};
use worker_sdk::TraceWriter;

use crate::action_runner::ActionRunner;
use crate::controller_client::Controller;
use crate::execution_context::{ExecutionContext, Global};
use crate::log_shipper::{LogSender, LogShipper};
use crate::model::{Action, ActionBuild, BuildResult, BuildStatus, Parameter, Secret, WorkUnit};
use crate::sandbox::{self, Sandbox};
use crate::variables::resolve_action;
use crate::watchdog::{AbortReport, Watchdog};

/// Runs a single unit of work.
pub struct JobRunner {
    settings: WorkerSettings,
    controller: Arc<dyn Controller>,
    trace_manager: TraceManager,
}

impl JobRunner {
    pub fn new(
        settings: WorkerSettings,
        controller: Arc<dyn Controller>,
        trace_manager: TraceManager,
    ) -> Self {
        Self {
            settings,
            controller,
            trace_manager,
        }
    }

    /// Run `work` to completion and report its status to the controller.
    ///
    /// Never fails: every problem ends up as a `Fail` status.
    pub async fn run(&self, work: WorkUnit) -> BuildResult {
        let WorkUnit {
            mut action,
            action_build: mut build,
            secrets,
        } = work;
        let trace = self.trace_manager.get("JobRunner");
        trace.info(&format!(
            "Starting build {} of action {} ({} secret(s))",
            build.id,
            action.name,
            secrets.len()
        ));

        let masker = self.trace_manager.secret_masker().clone();
        for secret in &secrets {
            masker.add_secret(&secret.name, &secret.value);
        }

        let (logs, shipper) = LogShipper::spawn(
            self.controller.clone(),
            masker.clone(),
            self.settings.log_flush_interval(),
        );

        let status = self
            .execute(&mut action, &mut build, &secrets, &logs, &shipper, &trace)
            .await;

        logs.log(build.id, SYSTEM_STEP, "Done.");
        drop(logs);
        shipper.shutdown().await;
        masker.clear();

        trace.info(&format!("Build {} finished with status {status}", build.id));
        if let Err(e) = self.controller.send_result(build.id, status).await {
            trace.error(&format!("Cannot report result of build {}: {e:#}", build.id));
        }

        BuildResult::new(status, build.id)
    }

    async fn execute(
        &self,
        action: &mut Action,
        build: &mut ActionBuild,
        secrets: &[Secret],
        logs: &LogSender,
        shipper: &LogShipper,
        trace: &Tracing,
    ) -> BuildStatus {
        if let Err(e) = resolve_action(action, None, build, secrets) {
            trace.error(&format!("Variable resolution failed: {e}"));
            logs.log(build.id, SYSTEM_STEP, format!("Error: {e}"));
            return BuildStatus::Fail;
        }

        build
            .args
            .extend(secrets.iter().map(|s| Parameter::new(&s.name, &s.value)));

        let root = sandbox::working_directory(&self.settings.base_dir, build);
        let sandbox = match Sandbox::setup(root) {
            Ok(sandbox) => sandbox,
            Err(e) => {
                trace.error(&format!("Sandbox setup failed: {e}"));
                logs.log(build.id, SYSTEM_STEP, format!("Error: {e}"));
                return BuildStatus::Fail;
            }
        };
        trace.verbose(&format!("Working directory: {}", sandbox.root().display()));

        let status = match sandbox.install_ssh_keys(secrets) {
            Ok(keys) => {
                if keys > 0 {
                    trace.verbose(&format!("Installed {keys} ssh key(s)"));
                }
                self.run_in_sandbox(action, build, &sandbox, logs, shipper)
                    .await
            }
            Err(e) => {
                trace.error(&format!("Sandbox setup failed: {e}"));
                logs.log(build.id, SYSTEM_STEP, format!("Error: {e}"));
                BuildStatus::Fail
            }
        };

        sandbox.teardown(trace);
        status
    }

    async fn run_in_sandbox(
        &self,
        action: &mut Action,
        build: &ActionBuild,
        sandbox: &Sandbox,
        logs: &LogSender,
        shipper: &LogShipper,
    ) -> BuildStatus {
        let watchdog = Watchdog::arm(
            self.settings.execution_timeout(),
            AbortReport {
                build_id: build.id,
                action_name: action.name.clone(),
                worker_name: self.settings.name.clone(),
                controller: self.controller.clone(),
                logs: logs.clone(),
                flusher: shipper.flusher(),
            },
        );

        let global = Global {
            worker_name: self.settings.name.clone(),
            build: build.clone(),
            working_directory: sandbox.root().to_path_buf(),
            temp_directory: sandbox.temp_directory().to_path_buf(),
            plugins_directory: self.settings.plugins_dir.clone(),
        };
        let context = ExecutionContext::new(
            global,
            logs.clone(),
            self.controller.clone(),
            &self.trace_manager,
        );

        let step = action.name.clone();
        context.log_step(&step, &format!("Starting step {step}..."));
        let status = ActionRunner::start(&context, action, &step).await;
        context.log_step(&step, &format!("Step {step} finished (status: {status})"));

        watchdog.disarm();
        status
    }
}
