// Per-build working directory.
//
// Layout: <base>/<pipeline>/<pipeline action>/<build number>/<token>/ with a
// `tmp` directory for generated files and `.ssh` for keys taken from secrets.
// While the sandbox is active the process works inside it and `HOME` points
// at it; teardown restores both and deletes the tree.

use rand::RngCore;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use worker_common::constants::{path, variables, SSH_KEY_SUFFIX};
use worker_sdk::TraceWriter;

use crate::model::{ActionBuild, Secret};

/// Random bytes behind a directory token; hex-encoded to twice as many chars.
const TOKEN_BYTES: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("cannot create directory {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot enter working directory {}: {source}", path.display())]
    Enter {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot install ssh key {}: {source}", path.display())]
    SshKey {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 16 random hex characters.
pub fn directory_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A fresh working directory path for `build` under `base_dir`.
pub fn working_directory(base_dir: &Path, build: &ActionBuild) -> PathBuf {
    base_dir
        .join(build.pipeline_id.to_string())
        .join(build.pipeline_action_id.to_string())
        .join(build.build_number.to_string())
        .join(directory_token())
}

/// Create `dir` and its missing parents, owner-only.
fn create_private_dir(dir: &Path) -> Result<(), SandboxError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(dir)
        .map_err(|source| SandboxError::CreateDirectory {
            path: dir.to_path_buf(),
            source,
        })
}

fn write_private_file(file: &Path, content: &str) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut handle = options.open(file)?;
    handle.write_all(content.as_bytes())?;
    if !content.ends_with('\n') {
        handle.write_all(b"\n")?;
    }
    Ok(())
}

/// File name for an SSH key secret: `cds.key.deploy.priv` becomes `deploy`.
pub fn ssh_key_file_name(secret_name: &str) -> Option<&str> {
    let stem = secret_name.strip_suffix(SSH_KEY_SUFFIX)?;
    let short = stem.rsplit('.').next().unwrap_or(stem);
    (!short.is_empty()).then_some(short)
}

/// An active build directory.
#[derive(Debug)]
pub struct Sandbox {
    root: PathBuf,
    temp_directory: PathBuf,
    previous_directory: Option<PathBuf>,
    previous_home: Option<OsString>,
}

impl Sandbox {
    /// Create `root`, move the process into it and point `HOME` at it.
    pub fn setup(root: PathBuf) -> Result<Self, SandboxError> {
        create_private_dir(&root)?;
        let temp_directory = root.join(path::TEMP_DIRECTORY);
        create_private_dir(&temp_directory)?;

        let previous_directory = std::env::current_dir().ok();
        let previous_home = std::env::var_os(variables::HOME);

        std::env::set_current_dir(&root).map_err(|source| SandboxError::Enter {
            path: root.clone(),
            source,
        })?;
        std::env::set_var(variables::HOME, &root);

        Ok(Self {
            root,
            temp_directory,
            previous_directory,
            previous_home,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn temp_directory(&self) -> &Path {
        &self.temp_directory
    }

    pub fn ssh_directory(&self) -> PathBuf {
        self.root.join(path::SSH_DIRECTORY)
    }

    /// Write every `*.priv` secret as a key file under `.ssh`. The first key
    /// is also installed as the default identity. Returns the number of keys.
    pub fn install_ssh_keys(&self, secrets: &[Secret]) -> Result<usize, SandboxError> {
        let keys: Vec<(&str, &Secret)> = secrets
            .iter()
            .filter_map(|s| ssh_key_file_name(&s.name).map(|name| (name, s)))
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }

        let ssh_dir = self.ssh_directory();
        create_private_dir(&ssh_dir)?;

        let install = |file_name: &str, secret: &Secret| {
            let file = ssh_dir.join(file_name);
            write_private_file(&file, &secret.value)
                .map_err(|source| SandboxError::SshKey { path: file, source })
        };

        for (file_name, secret) in &keys {
            install(file_name, secret)?;
        }
        let (_, first) = keys[0];
        install(path::DEFAULT_SSH_KEY, first)?;

        Ok(keys.len())
    }

    /// Restore the previous directory and `HOME`, then delete the tree.
    /// Failures are traced, never returned.
    pub fn teardown(self, trace: &dyn TraceWriter) {
        if let Some(ref dir) = self.previous_directory {
            if let Err(e) = std::env::set_current_dir(dir) {
                trace.warning(&format!(
                    "Cannot return to {}: {e}",
                    dir.display()
                ));
            }
        }
        match self.previous_home {
            Some(ref home) => std::env::set_var(variables::HOME, home),
            None => std::env::remove_var(variables::HOME),
        }

        if let Err(e) = fs::remove_dir_all(&self.root) {
            trace.error(&format!(
                "Cannot remove build directory {}: {e}",
                self.root.display()
            ));
        } else {
            trace.verbose(&format!("Removed build directory {}", self.root.display()));
        }
    }
}
