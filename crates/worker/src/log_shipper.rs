// Background log shipping.
//
// Every producer holds a cloneable `LogSender`. A single task owns the queue,
// flushes it to the controller once per interval, on explicit request, and a
// last time on shutdown. Delivery is best effort: a failed batch is dropped.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use worker_common::SecretMasker;

use crate::controller_client::Controller;
use crate::model::LogLine;

/// Producer side of the log channel. Sending never blocks.
#[derive(Clone, Debug)]
pub struct LogSender {
    tx: mpsc::UnboundedSender<LogLine>,
}

impl LogSender {
    pub fn send(&self, line: LogLine) {
        // The shipper outlives every producer; a closed channel only happens
        // while the process is going down.
        let _ = self.tx.send(line);
    }

    pub fn log(&self, build_id: i64, step: &str, value: impl Into<String>) {
        self.send(LogLine::new(build_id, step, value));
    }
}

/// Asks the shipper task for an immediate flush.
#[derive(Clone, Debug)]
pub struct LogFlusher {
    tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
}

impl LogFlusher {
    /// Returns once everything queued before the call has been handed to the
    /// controller (or dropped on delivery failure).
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(done_tx).is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// Handle on the shipper task.
pub struct LogShipper {
    flusher: LogFlusher,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl LogShipper {
    /// Start the shipper task on the current runtime.
    pub fn spawn(
        controller: Arc<dyn Controller>,
        masker: SecretMasker,
        interval: Duration,
    ) -> (LogSender, LogShipper) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let task = ShipperTask {
            controller,
            masker,
            queue: Vec::new(),
        };
        let handle = tokio::spawn(task.run(rx, flush_rx, interval, shutdown.clone()));

        (
            LogSender { tx },
            LogShipper {
                flusher: LogFlusher { tx: flush_tx },
                shutdown,
                handle,
            },
        )
    }

    pub fn flusher(&self) -> LogFlusher {
        self.flusher.clone()
    }

    pub async fn flush(&self) {
        self.flusher.flush().await;
    }

    /// Drain whatever is queued, ship it, and stop the task.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!("Log shipper task ended abnormally: {e}");
        }
    }
}

struct ShipperTask {
    controller: Arc<dyn Controller>,
    masker: SecretMasker,
    queue: Vec<LogLine>,
}

impl ShipperTask {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<LogLine>,
        mut flush_rx: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
        interval: Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    self.drain(&mut rx);
                    self.flush().await;
                    break;
                }
                Some(done) = flush_rx.recv() => {
                    self.drain(&mut rx);
                    self.flush().await;
                    let _ = done.send(());
                }
                _ = ticker.tick() => self.flush().await,
                line = rx.recv() => match line {
                    Some(line) => self.queue.push(line),
                    None => {
                        self.flush().await;
                        break;
                    }
                },
            }
        }

        tracing::debug!("Log shipper stopped");
    }

    /// Move everything already sitting in the channel into the queue.
    fn drain(&mut self, rx: &mut mpsc::UnboundedReceiver<LogLine>) {
        while let Ok(line) = rx.try_recv() {
            self.queue.push(line);
        }
    }

    async fn flush(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let batch = compact(std::mem::take(&mut self.queue), &self.masker);
        let build_id = batch[0].build_id;
        if let Err(e) = self.controller.send_logs(build_id, &batch).await {
            tracing::warn!(
                build_id,
                lines = batch.len(),
                "Cannot send logs, dropping batch: {e:#}"
            );
        }
    }
}

/// Turn queued lines into a shippable batch.
///
/// Secrets are masked first, then each run of consecutive lines with
/// identical text collapses into its first line prefixed with `[xN] `.
/// Newlines fold to spaces and surrounding whitespace is trimmed.
pub fn compact(lines: Vec<LogLine>, masker: &SecretMasker) -> Vec<LogLine> {
    let mut batch: Vec<LogLine> = Vec::with_capacity(lines.len());
    let mut run_length = 0usize;

    for mut line in lines {
        line.value = masker.mask_secrets(&line.value).into_owned();
        match batch.last() {
            Some(last) if run_length > 0 && last.value == line.value => run_length += 1,
            _ => {
                if let Some(last) = batch.last_mut() {
                    finish_line(last, run_length);
                }
                batch.push(line);
                run_length = 1;
            }
        }
    }
    if let Some(last) = batch.last_mut() {
        finish_line(last, run_length);
    }
    batch
}

fn finish_line(line: &mut LogLine, count: usize) {
    let text = if count > 1 {
        format!("[x{count}] {}", line.value)
    } else {
        std::mem::take(&mut line.value)
    };
    line.value = text
        .replace('\n', " ")
        .trim_matches(|c: char| c == ' ' || c == '\t' || c == '\n')
        .to_string();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingController;

    fn lines(values: &[&str]) -> Vec<LogLine> {
        values.iter().map(|v| LogLine::new(5, "step", *v)).collect()
    }

    fn values(batch: &[LogLine]) -> Vec<&str> {
        batch.iter().map(|l| l.value.as_str()).collect()
    }

    #[test]
    fn consecutive_duplicates_collapse() {
        let batch = compact(
            lines(&["build ok", "build ok", "build ok", "error"]),
            &SecretMasker::new(),
        );
        assert_eq!(values(&batch), vec!["[x3] build ok", "error"]);
    }

    #[test]
    fn non_adjacent_duplicates_are_kept() {
        let batch = compact(lines(&["a", "b", "a", "a"]), &SecretMasker::new());
        assert_eq!(values(&batch), vec!["a", "b", "[x2] a"]);
    }

    #[test]
    fn newlines_fold_and_whitespace_trims() {
        let batch = compact(lines(&["  line one\nline two\n", "\tdone \n"]), &SecretMasker::new());
        assert_eq!(values(&batch), vec!["line one line two", "done"]);
    }

    #[test]
    fn secrets_are_masked_in_single_and_collapsed_lines() {
        let masker = SecretMasker::new();
        masker.add_secret("db.password", "0123456789");

        let batch = compact(
            lines(&[
                "connecting with 0123456789",
                "retry 0123456789",
                "retry 0123456789",
            ]),
            &masker,
        );
        assert_eq!(
            values(&batch),
            vec!["connecting with **db.password**", "[x2] retry **db.password**"]
        );
        assert!(batch.iter().all(|l| !l.value.contains("0123456789")));
    }

    #[test]
    fn collapsed_line_keeps_first_metadata() {
        let mut input = lines(&["same", "same"]);
        input[1].step = "other".to_string();
        let batch = compact(input, &SecretMasker::new());
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].step, "step");
    }

    #[test]
    fn empty_queue_gives_empty_batch() {
        assert!(compact(Vec::new(), &SecretMasker::new()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ships_on_interval() {
        let controller = Arc::new(RecordingController::new());
        let (sender, shipper) =
            LogShipper::spawn(controller.clone(), SecretMasker::new(), Duration::from_secs(1));

        sender.log(9, "step", "hello");
        sender.log(9, "step", "hello");
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let batches = controller.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(values(&batches[0]), vec!["[x2] hello"]);
        assert_eq!(batches[0][0].build_id, 9);

        shipper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_trailing_lines() {
        let controller = Arc::new(RecordingController::new());
        let (sender, shipper) =
            LogShipper::spawn(controller.clone(), SecretMasker::new(), Duration::from_secs(3600));

        sender.log(1, "SYSTEM", "Done.");
        shipper.shutdown().await;

        assert_eq!(controller.log_values(), vec!["Done."]);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_flush_ships_immediately() {
        let controller = Arc::new(RecordingController::new());
        let (sender, shipper) =
            LogShipper::spawn(controller.clone(), SecretMasker::new(), Duration::from_secs(3600));

        sender.log(1, "step", "now");
        shipper.flush().await;
        assert_eq!(controller.log_values(), vec!["now"]);

        // Nothing left for shutdown to send.
        shipper.shutdown().await;
        assert_eq!(controller.batches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delivery_drops_batch() {
        let controller = Arc::new(RecordingController::new());
        controller.set_fail_logs(true);
        let (sender, shipper) =
            LogShipper::spawn(controller.clone(), SecretMasker::new(), Duration::from_secs(1));

        sender.log(1, "step", "lost");
        shipper.flush().await;

        controller.set_fail_logs(false);
        sender.log(1, "step", "kept");
        shipper.shutdown().await;

        assert_eq!(controller.log_values(), vec!["kept"]);
    }

    #[tokio::test]
    async fn single_producer_order_is_preserved() {
        let controller = Arc::new(RecordingController::new());
        let (sender, shipper) =
            LogShipper::spawn(controller.clone(), SecretMasker::new(), Duration::from_secs(3600));

        for i in 0..100 {
            sender.log(1, "step", format!("line {i}"));
        }
        shipper.shutdown().await;

        let expected: Vec<String> = (0..100).map(|i| format!("line {i}")).collect();
        assert_eq!(controller.log_values(), expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ships_on_interval_while_lines_keep_arriving() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let controller = Arc::new(RecordingController::new());
        let (sender, shipper) =
            LogShipper::spawn(controller.clone(), SecretMasker::new(), Duration::from_millis(100));

        let stop = Arc::new(AtomicBool::new(false));
        let producers: Vec<_> = (0..3)
            .map(|p| {
                let sender = sender.clone();
                let stop = stop.clone();
                std::thread::spawn(move || {
                    let mut i = 0u64;
                    while !stop.load(Ordering::Relaxed) {
                        sender.log(1, "step", format!("producer {p} line {i}"));
                        i += 1;
                    }
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(800)).await;
        let shipped_during_flood = controller.batches().len();
        stop.store(true, Ordering::Relaxed);
        for producer in producers {
            producer.join().unwrap();
        }

        assert!(shipped_during_flood > 0);
        drop(sender);
        shipper.shutdown().await;
    }
}
