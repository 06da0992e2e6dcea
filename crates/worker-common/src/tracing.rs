// Component-scoped diagnostic trace sources that mask secrets before
// handing messages to the `tracing` subscriber.

use crate::secret_masker::SecretMasker;
use worker_sdk::TraceWriter;

/// Trace event severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TraceEventType {
    Verbose,
    Information,
    Warning,
    Error,
}

/// A named trace source.
///
/// Every component gets its own `Tracing`; all of them share the masker of
/// the current unit of work so diagnostics never carry secret values either.
#[derive(Clone)]
pub struct Tracing {
    name: String,
    secret_masker: SecretMasker,
}

impl Tracing {
    pub fn new(name: impl Into<String>, secret_masker: SecretMasker) -> Self {
        Self {
            name: name.into(),
            secret_masker,
        }
    }

    fn trace(&self, event_type: TraceEventType, message: &str) {
        let masked = self.secret_masker.mask_secrets(message);
        let component = self.name.as_str();
        match event_type {
            TraceEventType::Error => tracing::error!(component, "{}", masked),
            TraceEventType::Warning => tracing::warn!(component, "{}", masked),
            TraceEventType::Information => tracing::info!(component, "{}", masked),
            TraceEventType::Verbose => tracing::debug!(component, "{}", masked),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Log an error together with its chain of causes.
    pub fn error_chain(&self, err: &anyhow::Error) {
        self.error(&format!("{err}"));
        for cause in err.chain().skip(1) {
            self.error(&format!("  caused by: {cause}"));
        }
    }
}

impl TraceWriter for Tracing {
    fn info(&self, message: &str) {
        self.trace(TraceEventType::Information, message);
    }

    fn verbose(&self, message: &str) {
        self.trace(TraceEventType::Verbose, message);
    }

    fn warning(&self, message: &str) {
        self.trace(TraceEventType::Warning, message);
    }

    fn error(&self, message: &str) {
        self.trace(TraceEventType::Error, message);
    }
}

/// Hands out trace sources bound to one shared [`SecretMasker`].
#[derive(Clone, Default)]
pub struct TraceManager {
    secret_masker: SecretMasker,
}

impl TraceManager {
    pub fn new(secret_masker: SecretMasker) -> Self {
        Self { secret_masker }
    }

    /// Get (create) a named trace source.
    pub fn get(&self, name: &str) -> Tracing {
        Tracing::new(name, self.secret_masker.clone())
    }

    pub fn secret_masker(&self) -> &SecretMasker {
        &self.secret_masker
    }
}
