// Well-known names, paths and timings shared by the worker crates.

use std::time::Duration;

/// Step label used for log lines the worker emits about itself.
pub const SYSTEM_STEP: &str = "SYSTEM";

/// Secrets shorter than this are never masked: short values match too much
/// unrelated text.
pub const SECRET_MIN_LENGTH: usize = 6;

/// Upper bound on substitution passes for a single parameter value.
pub const MAX_RESOLUTION_PASSES: usize = 64;

/// A value growing past this many bytes during substitution is unresolvable.
pub const MAX_RESOLVED_VALUE_LENGTH: usize = 1024 * 1024;

/// Namespace of the late-bound build variables, as in `{{.cds.build.NAME}}`.
pub const BUILD_VARIABLE_PREFIX: &str = "cds.build.";

/// Suffix marking a secret as an SSH private key to install in the sandbox.
pub const SSH_KEY_SUFFIX: &str = ".priv";

pub mod timing {
    use super::Duration;

    /// How often the log shipper flushes its queue.
    pub const LOG_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

    /// Hard ceiling for one unit of work.
    pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

    /// Time given to the abort report before the process exits.
    pub const ABORT_GRACE: Duration = Duration::from_secs(5);

    /// Timeout for a single request to the controller.
    pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
}

pub mod path {
    pub const SSH_DIRECTORY: &str = ".ssh";
    pub const DEFAULT_SSH_KEY: &str = "id_rsa";
    pub const TEMP_DIRECTORY: &str = "tmp";
    pub const DEFAULT_BASE_DIRECTORY: &str = "build-worker";
    pub const PLUGINS_DIRECTORY: &str = "plugins";
}

pub mod variables {
    /// File a script step appends `NAME=value` lines to.
    pub const BUILD_VARIABLES_FILE: &str = "BUILD_VARIABLES_FILE";
    pub const HOME: &str = "HOME";

    pub mod settings {
        pub const API: &str = "WORKER_API";
        pub const TOKEN: &str = "WORKER_TOKEN";
        pub const NAME: &str = "WORKER_NAME";
        pub const BASE_DIR: &str = "WORKER_BASEDIR";
        pub const PLUGINS_DIR: &str = "WORKER_PLUGINS_DIR";
        pub const TLS_NO_VERIFY: &str = "WORKER_TLS_NO_VERIFY";
    }
}

/// Names of the built-in actions.
pub mod builtin {
    pub const SCRIPT: &str = "Script";
    pub const GIT_CLONE: &str = "GitClone";
    pub const ARTIFACT_UPLOAD: &str = "Artifact Upload";
}
