// StepsRunner: runs the children of a group and aggregates their status.
//
// Non-final children run in order until one of them does not succeed.
// Final children always run afterwards. A final's outcome replaces the one
// carried so far when that was Success or Disabled, and a successful final
// also replaces a failure. The first final that does not succeed stops the walk.

use crate::action_runner::ActionRunner;
use crate::execution_context::ExecutionContext;
use crate::model::{Action, BuildStatus};

pub struct StepsRunner;

impl StepsRunner {
    /// Label of the `index`-th (zero based) child of `parent`.
    pub fn child_label(parent: &str, child: &str, index: usize) -> String {
        format!("{parent}/{child}-{}", index + 1)
    }

    /// Run `children` of the group named `parent`.
    pub async fn run(
        context: &ExecutionContext,
        parent: &str,
        children: &mut [Action],
    ) -> BuildStatus {
        let non_final_count = children.iter().filter(|c| !c.is_final).count();
        let mut disabled = 0;
        let mut status = BuildStatus::Success;

        for (index, child) in children.iter_mut().enumerate() {
            if child.is_final {
                continue;
            }
            let label = Self::child_label(parent, &child.name, index);

            if !child.enabled {
                context.log_step(&label, &format!("Step {label} is disabled"));
                disabled += 1;
                continue;
            }

            context.log_step(&label, &format!("Starting step {label}..."));
            status = ActionRunner::start(context, child, &label).await;
            context.log_step(&label, &format!("Step {label} finished (status: {status})"));

            if status != BuildStatus::Success {
                tracing::info!(parent, step = %label, %status, "Stopping at failed step");
                break;
            }
        }

        if disabled == non_final_count {
            status = BuildStatus::Disabled;
        }

        for (index, child) in children.iter_mut().enumerate() {
            if !child.is_final {
                continue;
            }
            let label = Self::child_label(parent, &child.name, index);

            if !child.enabled {
                context.log_step(&label, &format!("Step {label} is disabled"));
                continue;
            }

            context.log_step(&label, &format!("Starting final step {label}..."));
            let final_status = ActionRunner::start(context, child, &label).await;
            context.log_step(
                &label,
                &format!("Final step {label} finished (status: {final_status})"),
            );

            if final_overrides(status, final_status) {
                status = final_status;
            }
            if final_status != BuildStatus::Success {
                tracing::info!(parent, step = %label, %final_status, "Stopping at failed final step");
                return status;
            }
        }

        status
    }
}

fn final_overrides(carried: BuildStatus, final_status: BuildStatus) -> bool {
    matches!(carried, BuildStatus::Success | BuildStatus::Disabled)
        || final_status == BuildStatus::Success
}
