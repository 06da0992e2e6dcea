// ActionRunner: executes a single node of the action tree.
// Leaves are dispatched to a handler, groups are handed to the StepsRunner.

use std::future::Future;
use std::pin::Pin;

use crate::execution_context::ExecutionContext;
use crate::handlers::{Handler, HandlerFactory};
use crate::model::{Action, ActionKind, BuildStatus};
use crate::steps_runner::StepsRunner;
use crate::variables::apply_build_arguments;

/// Boxed so that groups can recurse through the steps runner.
pub type StatusFuture<'a> = Pin<Box<dyn Future<Output = BuildStatus> + Send + 'a>>;

pub struct ActionRunner;

impl ActionRunner {
    /// Run `action` after giving the build arguments precedence over its
    /// same-named parameters.
    pub fn start<'a>(
        context: &'a ExecutionContext,
        action: &'a mut Action,
        step: &'a str,
    ) -> StatusFuture<'a> {
        apply_build_arguments(action, context.build());
        Self::run(context, action, step)
    }

    pub fn run<'a>(
        context: &'a ExecutionContext,
        action: &'a mut Action,
        step: &'a str,
    ) -> StatusFuture<'a> {
        Box::pin(async move {
            // Values published by earlier steps.
            context.build_variables().substitute(action);

            match action.kind {
                ActionKind::Builtin => match HandlerFactory::builtin(&action.name) {
                    Some(handler) => Self::dispatch(context, handler.as_ref(), action, step).await,
                    None => {
                        context.log(step, format!("Unknown builtin step: {}", action.name));
                        BuildStatus::Fail
                    }
                },
                ActionKind::Plugin => {
                    let handler = HandlerFactory::plugin();
                    Self::dispatch(context, handler.as_ref(), action, step).await
                }
                ActionKind::Group if action.actions.is_empty() => BuildStatus::Success,
                ActionKind::Group => {
                    let Action { name, actions, .. } = action;
                    StepsRunner::run(context, name, actions).await
                }
            }
        })
    }

    async fn dispatch(
        context: &ExecutionContext,
        handler: &dyn Handler,
        action: &Action,
        step: &str,
    ) -> BuildStatus {
        match handler.run(context, action, step).await {
            Ok(status) => status,
            Err(e) => {
                context.trace().error_chain(&e);
                context.log(step, format!("Error: {e:#}"));
                BuildStatus::Fail
            }
        }
    }
}
