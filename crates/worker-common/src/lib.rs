// worker-common: Shared services for the build worker.
// Depends on `worker-sdk`; used by the `build-worker` crate.

pub mod config_store;
pub mod constants;
pub mod http_client_factory;
pub mod secret_masker;
pub mod tracing;
pub mod util;

// ---------------------------------------------------------------------------
// Re-exports for convenient access
// ---------------------------------------------------------------------------

pub use config_store::{ConfigurationStore, WorkerSettings};
pub use http_client_factory::HttpClientFactory;
pub use secret_masker::SecretMasker;
pub use crate::tracing::{TraceManager, Tracing};
pub use util::status_util::{BuildStatus, StatusUtil};
