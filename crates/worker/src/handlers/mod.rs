// Handlers module - implementations of built-in and plugin actions.

pub mod artifact_upload_handler;
pub mod git_clone_handler;
pub mod handler;
pub mod plugin_handler;
pub mod script_handler;

pub use handler::{Handler, HandlerFactory};
