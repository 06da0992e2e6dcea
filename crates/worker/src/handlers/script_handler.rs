// ScriptHandler: runs the `script` parameter of a `Script` action by writing
// it to a file in the sandbox and invoking it with `sh -e`, or directly when
// it carries its own interpreter line.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use worker_common::constants::variables::BUILD_VARIABLES_FILE;
use worker_sdk::{ProcessStartInfo, TraceWriter};

use crate::execution_context::ExecutionContext;
use crate::file_command_manager::FileCommandManager;
use crate::handlers::handler::{status_from_exit_code, Handler};
use crate::model::{Action, BuildStatus};
use crate::sandbox::directory_token;

/// Script handler for `Script` built-ins.
pub struct ScriptHandler;

impl ScriptHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ScriptHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for ScriptHandler {
    async fn run(
        &self,
        context: &ExecutionContext,
        action: &Action,
        step: &str,
    ) -> Result<BuildStatus> {
        let script = action.parameter("script").unwrap_or_default();
        if script.trim().is_empty() {
            context.log(step, "Script is empty, nothing to run.");
            return Ok(BuildStatus::Success);
        }

        let script_file = ScriptHandlerHelpers::write_script(context.temp_directory(), script)?;
        let variables_file = FileCommandManager::initialize(context.temp_directory())?;
        context
            .trace()
            .verbose(&format!("Script file: {}", script_file.display()));

        let start = ScriptHandlerHelpers::start_info(script, &script_file)
            .current_dir(context.working_directory())
            .env(BUILD_VARIABLES_FILE, variables_file.to_string_lossy());

        let exit_code = context.run_process(step, start).await;

        let _ = std::fs::remove_file(&script_file);
        FileCommandManager::process(&variables_file, context.build_variables(), context.trace());

        let exit_code = exit_code?;
        if exit_code != 0 {
            context.log(step, format!("Process completed with exit code {exit_code}."));
        }
        Ok(status_from_exit_code(exit_code))
    }
}

pub struct ScriptHandlerHelpers;

impl ScriptHandlerHelpers {
    /// Default interpreter; `-e` stops the script at the first failing command.
    pub const DEFAULT_SHELL: &'static str = "sh";
    pub const DEFAULT_SHELL_ARGS: &'static [&'static str] = &["-e"];

    pub fn has_interpreter_line(script: &str) -> bool {
        script.starts_with("#!")
    }

    /// Write `script` to a fresh executable file in `temp_dir`.
    pub fn write_script(temp_dir: &Path, script: &str) -> Result<PathBuf> {
        let file = temp_dir.join(format!("script_{}.sh", directory_token()));
        std::fs::write(&file, script)
            .with_context(|| format!("Failed to write script file: {}", file.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o755))
                .with_context(|| format!("Failed to make {} executable", file.display()))?;
        }

        Ok(file)
    }

    pub fn start_info(script: &str, script_file: &Path) -> ProcessStartInfo {
        let file = script_file.to_string_lossy().into_owned();
        if Self::has_interpreter_line(script) {
            ProcessStartInfo::new(file)
        } else {
            let mut start = ProcessStartInfo::new(Self::DEFAULT_SHELL);
            for arg in Self::DEFAULT_SHELL_ARGS {
                start = start.arg(*arg);
            }
            start.arg(file)
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::TestContext;

    fn script(body: &str) -> Action {
        Action::builtin("Script").with_parameter("script", body)
    }

    #[test]
    fn start_info_uses_shell_or_shebang() {
        let file = Path::new("/tmp/script_x.sh");
        let start = ScriptHandlerHelpers::start_info("make", file);
        assert_eq!(start.file_name, "sh");
        assert_eq!(start.arguments, vec!["-e", "/tmp/script_x.sh"]);

        let start = ScriptHandlerHelpers::start_info("#!/usr/bin/env python3\nprint(1)", file);
        assert_eq!(start.file_name, "/tmp/script_x.sh");
        assert!(start.arguments.is_empty());
    }

    #[tokio::test]
    async fn successful_script_logs_output() {
        let t = TestContext::new();
        let status = ScriptHandler::new()
            .run(&t.context, &script("echo building\necho done"), "root/Script-1")
            .await
            .unwrap();
        assert_eq!(status, BuildStatus::Success);

        let (controller, _dir) = t.finish().await;
        assert_eq!(controller.log_values(), vec!["building", "done"]);
        assert!(controller.batches()[0].iter().all(|l| l.step == "root/Script-1"));
    }

    #[tokio::test]
    async fn failing_command_stops_script() {
        let t = TestContext::new();
        let status = ScriptHandler::new()
            .run(&t.context, &script("echo before\nfalse\necho after"), "s")
            .await
            .unwrap();
        assert_eq!(status, BuildStatus::Fail);

        let (controller, _dir) = t.finish().await;
        let values = controller.log_values();
        assert!(values.contains(&"before".to_string()));
        assert!(!values.contains(&"after".to_string()));
        assert!(values.iter().any(|v| v.contains("exit code 1")));
    }

    #[tokio::test]
    async fn script_runs_in_working_directory_and_cleans_up() {
        let t = TestContext::new();
        let status = ScriptHandler::new()
            .run(&t.context, &script("touch marker"), "s")
            .await
            .unwrap();
        assert_eq!(status, BuildStatus::Success);
        assert!(t.dir.path().join("marker").exists());
        // script and variables files are removed
        assert_eq!(std::fs::read_dir(t.context.temp_directory()).unwrap().count(), 0);
        t.finish().await;
    }

    #[tokio::test]
    async fn script_publishes_build_variables() {
        let t = TestContext::new();
        let status = ScriptHandler::new()
            .run(
                &t.context,
                &script("echo \"version=1.4.2\" >> \"$BUILD_VARIABLES_FILE\""),
                "s",
            )
            .await
            .unwrap();
        assert_eq!(status, BuildStatus::Success);
        assert_eq!(t.context.build_variables().get("version").as_deref(), Some("1.4.2"));
        t.finish().await;
    }

    #[tokio::test]
    async fn shebang_script_runs_directly() {
        let t = TestContext::new();
        let status = ScriptHandler::new()
            .run(&t.context, &script("#!/bin/sh\necho from-shebang"), "s")
            .await
            .unwrap();
        assert_eq!(status, BuildStatus::Success);
        let (controller, _dir) = t.finish().await;
        assert_eq!(controller.log_values(), vec!["from-shebang"]);
    }

    #[tokio::test]
    async fn empty_script_succeeds() {
        let t = TestContext::new();
        let status = ScriptHandler::new()
            .run(&t.context, &Action::builtin("Script"), "s")
            .await
            .unwrap();
        assert_eq!(status, BuildStatus::Success);
        t.finish().await;
    }
}
