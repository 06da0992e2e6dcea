// In-memory controller and helpers shared by the unit tests.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use worker_common::{SecretMasker, TraceManager};

use crate::controller_client::Controller;
use crate::execution_context::{ExecutionContext, Global};
use crate::log_shipper::LogShipper;
use crate::model::{ActionBuild, BuildStatus, LogLine, Parameter};

/// Tests that change the process working directory or `HOME` hold this.
pub static PROCESS_ENV_LOCK: Mutex<()> = parking_lot::const_mutex(());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedArtifact {
    pub build_id: i64,
    pub tag: String,
    pub name: String,
    pub content: Vec<u8>,
}

/// Records every call; optionally fails log delivery.
#[derive(Default)]
pub struct RecordingController {
    batches: Mutex<Vec<Vec<LogLine>>>,
    results: Mutex<Vec<(i64, BuildStatus)>>,
    artifacts: Mutex<Vec<UploadedArtifact>>,
    fail_logs: AtomicBool,
}

impl RecordingController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_logs(&self, fail: bool) {
        self.fail_logs.store(fail, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<LogLine>> {
        self.batches.lock().clone()
    }

    /// Text of every shipped line, in order.
    pub fn log_values(&self) -> Vec<String> {
        self.batches
            .lock()
            .iter()
            .flatten()
            .map(|l| l.value.clone())
            .collect()
    }

    pub fn results(&self) -> Vec<(i64, BuildStatus)> {
        self.results.lock().clone()
    }

    pub fn artifacts(&self) -> Vec<UploadedArtifact> {
        self.artifacts.lock().clone()
    }
}

#[async_trait]
impl Controller for RecordingController {
    async fn send_logs(&self, _build_id: i64, lines: &[LogLine]) -> Result<()> {
        if self.fail_logs.load(Ordering::SeqCst) {
            anyhow::bail!("log endpoint unavailable");
        }
        self.batches.lock().push(lines.to_vec());
        Ok(())
    }

    async fn send_result(&self, build_id: i64, status: BuildStatus) -> Result<()> {
        self.results.lock().push((build_id, status));
        Ok(())
    }

    async fn upload_artifact(
        &self,
        build_id: i64,
        tag: &str,
        name: &str,
        content: Vec<u8>,
    ) -> Result<()> {
        self.artifacts.lock().push(UploadedArtifact {
            build_id,
            tag: tag.to_string(),
            name: name.to_string(),
            content,
        });
        Ok(())
    }
}

/// A context over a temporary sandbox directory, wired to a recording
/// controller through a real log shipper.
pub struct TestContext {
    pub controller: Arc<RecordingController>,
    pub context: ExecutionContext,
    pub dir: tempfile::TempDir,
    shipper: LogShipper,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_args(Vec::new())
    }

    pub fn with_args(args: Vec<Parameter>) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let temp = dir.path().join("tmp");
        std::fs::create_dir_all(&temp).expect("temp subdir");

        let controller = Arc::new(RecordingController::new());
        let (logs, shipper) = LogShipper::spawn(
            controller.clone(),
            SecretMasker::new(),
            Duration::from_secs(3600),
        );
        let global = Global {
            worker_name: "worker-1".to_string(),
            build: ActionBuild {
                id: 42,
                args,
                ..ActionBuild::default()
            },
            working_directory: dir.path().to_path_buf(),
            temp_directory: temp,
            plugins_directory: dir.path().join("plugins"),
        };
        let context = ExecutionContext::new(
            global,
            logs,
            controller.clone(),
            &TraceManager::default(),
        );

        Self {
            controller,
            context,
            dir,
            shipper,
        }
    }

    /// Stop logging and hand back everything that was shipped.
    pub async fn finish(self) -> (Arc<RecordingController>, tempfile::TempDir) {
        let Self {
            controller,
            context,
            dir,
            shipper,
        } = self;
        drop(context);
        shipper.shutdown().await;
        (controller, dir)
    }
}
