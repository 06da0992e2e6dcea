// worker-sdk: Foundation layer for the build worker.
// This crate has no dependency on the other worker crates. It provides the
// trace abstraction, child-process invocation and the plugin wire contract.

pub mod action_plugin;
pub mod process_invoker;
pub mod trace;

// Re-export commonly used items at crate root
pub use action_plugin::PluginRequest;
pub use process_invoker::{OutputStream, ProcessInvoker, ProcessOutput, ProcessStartInfo};
pub use trace::TraceWriter;
