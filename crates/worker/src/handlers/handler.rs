// Handler trait and HandlerFactory.
// A handler runs one leaf action (a built-in or a plugin) and turns its
// outcome into a status.

use async_trait::async_trait;
use worker_common::constants::builtin;

use crate::execution_context::ExecutionContext;
use crate::model::{Action, BuildStatus};

/// Runs one leaf action.
///
/// `step` is the label the action's log lines are filed under. An `Err` is
/// a dispatch failure; the caller logs it and reports `Fail`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn run(
        &self,
        context: &ExecutionContext,
        action: &Action,
        step: &str,
    ) -> anyhow::Result<BuildStatus>;
}

/// Zero is success, anything else a failure.
pub fn status_from_exit_code(exit_code: i32) -> BuildStatus {
    if exit_code == 0 {
        BuildStatus::Success
    } else {
        BuildStatus::Fail
    }
}

/// Value of a parameter that must be present and non-empty.
pub fn required_parameter<'a>(action: &'a Action, name: &str) -> anyhow::Result<&'a str> {
    match action.parameter(name) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => anyhow::bail!("Parameter '{name}' of action '{}' is required", action.name),
    }
}

/// Value of an optional parameter; empty counts as absent.
pub fn optional_parameter<'a>(action: &'a Action, name: &str) -> Option<&'a str> {
    action.parameter(name).filter(|v| !v.trim().is_empty())
}

/// Factory for creating the handler of an action.
pub struct HandlerFactory;

impl HandlerFactory {
    /// Handler of the named built-in action, if there is one.
    pub fn builtin(name: &str) -> Option<Box<dyn Handler>> {
        match name {
            builtin::SCRIPT => Some(Box::new(super::script_handler::ScriptHandler::new())),
            builtin::GIT_CLONE => Some(Box::new(super::git_clone_handler::GitCloneHandler::new())),
            builtin::ARTIFACT_UPLOAD => Some(Box::new(
                super::artifact_upload_handler::ArtifactUploadHandler::new(),
            )),
            _ => None,
        }
    }

    pub fn plugin() -> Box<dyn Handler> {
        Box::new(super::plugin_handler::PluginHandler::new())
    }
}
