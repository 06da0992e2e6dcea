// PluginHandler: runs an external plugin binary.
// The binary receives one JSON line on stdin describing the action and
// reports its outcome through its exit code.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use worker_sdk::{PluginRequest, ProcessStartInfo};

use crate::execution_context::ExecutionContext;
use crate::handlers::handler::{status_from_exit_code, Handler};
use crate::model::{Action, ActionBuild, BuildStatus};

pub struct PluginHandler;

impl PluginHandler {
    pub fn new() -> Self {
        Self
    }

    /// Location of the plugin binary, or `None` for names that are not a
    /// plain file name.
    pub fn binary_path(plugins_dir: &Path, name: &str) -> Option<PathBuf> {
        let plain = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        plain.then(|| plugins_dir.join(name))
    }

    pub fn request(action: &Action, build: &ActionBuild) -> PluginRequest {
        let mut request = PluginRequest::new(&action.name, build.id);
        request.inputs = action
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect();
        request.args = build
            .args
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect();
        request
    }
}

impl Default for PluginHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for PluginHandler {
    async fn run(
        &self,
        context: &ExecutionContext,
        action: &Action,
        step: &str,
    ) -> Result<BuildStatus> {
        let binary = match Self::binary_path(context.plugins_directory(), &action.name) {
            Some(path) if path.is_file() => path,
            _ => {
                context.log(
                    step,
                    format!(
                        "Plugin {} not found in {}",
                        action.name,
                        context.plugins_directory().display()
                    ),
                );
                return Ok(BuildStatus::Fail);
            }
        };

        let request = Self::request(action, context.build());
        let start = ProcessStartInfo::new(binary.to_string_lossy())
            .current_dir(context.working_directory())
            .stdin(request.to_line()?);

        let exit_code = context.run_process(step, start).await?;
        if exit_code != 0 {
            context.log(
                step,
                format!("Plugin {} exited with code {exit_code}.", action.name),
            );
        }
        Ok(status_from_exit_code(exit_code))
    }
}
