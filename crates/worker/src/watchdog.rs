// Hard execution ceiling for one unit of work.
//
// The watchdog either fires once or is disarmed once. Firing is fatal: it
// reports Fail to the controller and terminates the worker process.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use worker_common::constants::{timing, SYSTEM_STEP};

use crate::controller_client::Controller;
use crate::log_shipper::{LogFlusher, LogSender};
use crate::model::BuildStatus;

/// Called with the process exit code once the abort has been reported.
pub type Terminator = Box<dyn FnOnce(i32) + Send + 'static>;

/// Exit code used when the watchdog terminates the worker.
pub const ABORT_EXIT_CODE: i32 = 1;

/// What the watchdog needs to report an abort.
pub struct AbortReport {
    pub build_id: i64,
    pub action_name: String,
    pub worker_name: String,
    pub controller: Arc<dyn Controller>,
    pub logs: LogSender,
    pub flusher: LogFlusher,
}

impl AbortReport {
    async fn send(&self, ceiling: Duration) {
        self.logs.log(
            self.build_id,
            SYSTEM_STEP,
            format!(
                "Error: Action {} running for {} on worker {}, aborting",
                self.action_name,
                describe(ceiling),
                self.worker_name
            ),
        );
        self.flusher.flush().await;

        if let Err(e) = self
            .controller
            .send_result(self.build_id, BuildStatus::Fail)
            .await
        {
            tracing::error!(build_id = self.build_id, "Cannot report aborted build: {e:#}");
        }
    }
}

fn describe(ceiling: Duration) -> String {
    let secs = ceiling.as_secs();
    match secs {
        s if s >= 3600 && s % 3600 == 0 => format!("{} hour(s)", s / 3600),
        s if s >= 60 && s % 60 == 0 => format!("{} minute(s)", s / 60),
        s => format!("{s} second(s)"),
    }
}

pub struct Watchdog {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Watchdog {
    /// Arm with the default terminator, which exits the process.
    pub fn arm(ceiling: Duration, report: AbortReport) -> Self {
        Self::arm_with_terminator(
            ceiling,
            report,
            Box::new(|code| {
                std::process::exit(code);
            }),
        )
    }

    pub fn arm_with_terminator(
        ceiling: Duration,
        report: AbortReport,
        terminator: Terminator,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(build_id = report.build_id, "Watchdog disarmed");
                }
                _ = tokio::time::sleep(ceiling) => {
                    tracing::error!(
                        build_id = report.build_id,
                        "Execution ceiling of {ceiling:?} reached, aborting build"
                    );
                    report.send(ceiling).await;
                    tokio::time::sleep(timing::ABORT_GRACE).await;
                    terminator(ABORT_EXIT_CODE);
                }
            }
        });

        Self { cancel, handle }
    }

    /// Cancel the timer. Consumes the watchdog so it cannot be disarmed twice.
    pub fn disarm(self) {
        self.cancel.cancel();
        drop(self.handle);
    }
}
