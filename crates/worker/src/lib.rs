// build-worker: action-tree execution engine of the build worker.
// Depends on `worker-sdk` and `worker-common`.
//
// Architecture:
//   Worker::run → JobRunner::run → ActionRunner::start
//     → StepsRunner::run (groups) / Handler::run (built-ins and plugins)
//   with the LogShipper and the Watchdog running beside the main path.

pub mod action_runner;
pub mod controller_client;
pub mod execution_context;
pub mod file_command_manager;
pub mod handlers;
pub mod job_runner;
pub mod log_shipper;
pub mod model;
pub mod sandbox;
pub mod steps_runner;
pub mod variables;
pub mod watchdog;
pub mod worker;

#[cfg(test)]
mod testing;
