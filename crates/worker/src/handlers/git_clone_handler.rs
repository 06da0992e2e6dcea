// GitCloneHandler: checks a repository out into the sandbox.

use anyhow::Result;
use async_trait::async_trait;
use worker_sdk::ProcessStartInfo;

use crate::execution_context::ExecutionContext;
use crate::handlers::handler::{optional_parameter, required_parameter, status_from_exit_code, Handler};
use crate::model::{Action, BuildStatus};

pub struct GitCloneHandler;

impl GitCloneHandler {
    pub fn new() -> Self {
        Self
    }

    /// `git clone [--branch B] URL [DIRECTORY]`
    pub fn start_info(action: &Action) -> Result<ProcessStartInfo> {
        let url = required_parameter(action, "url")?;

        let mut start = ProcessStartInfo::new("git").arg("clone");
        if let Some(branch) = optional_parameter(action, "branch") {
            start = start.arg("--branch").arg(branch);
        }
        start = start.arg(url);
        if let Some(directory) = optional_parameter(action, "directory") {
            start = start.arg(directory);
        }

        // Never wait on a credential prompt.
        Ok(start.env("GIT_TERMINAL_PROMPT", "0"))
    }
}

impl Default for GitCloneHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for GitCloneHandler {
    async fn run(
        &self,
        context: &ExecutionContext,
        action: &Action,
        step: &str,
    ) -> Result<BuildStatus> {
        let start = Self::start_info(action)?.current_dir(context.working_directory());
        context.log(step, format!("Running {} {}", start.file_name, start.arguments.join(" ")));

        let exit_code = context.run_process(step, start).await?;
        if exit_code != 0 {
            context.log(step, format!("git clone failed with exit code {exit_code}."));
        }
        Ok(status_from_exit_code(exit_code))
    }
}
