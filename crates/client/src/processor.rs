//! Concurrent consumer loop: one dispatcher polling the queue, a fixed pool
//! of workers executing the user function under the queue's deadline, and a
//! single sink reporting terminal states back to the service.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use jobq_core::{Error, Result, Task, TaskStatus};

use crate::client::Client;

/// Configuration for [`Client::process_tasks`].
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Queue to poll.
    pub queue_name: String,
    /// Wait between polls when the queue returned nothing or an error.
    pub retry_interval: Duration,
    /// Terminate on the first poll/update error instead of logging and
    /// continuing.
    pub stop_on_error: bool,
    /// On failure, annotate object payloads in place; otherwise wrap the
    /// original bytes under `original_data`.
    pub preserve_error: bool,
    /// Worker parallelism; values below 1 are coerced up to 1.
    pub worker_count: usize,
    /// Capacity of the internal work and result channels.
    pub worker_buffer: usize,
}

impl ProcessorConfig {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            retry_interval: Duration::from_secs(5),
            stop_on_error: false,
            preserve_error: true,
            worker_count: 1,
            worker_buffer: 10,
        }
    }
}

struct TaskResult {
    task: Task,
    outcome: Result<Value>,
}

impl Client {
    /// Consume tasks from a queue until cancelled or, under
    /// `stop_on_error`, until the first poll/update failure.
    ///
    /// Each task runs on its own spawned future; the worker waits for its
    /// completion or the queue's `task_timeout` (read once at startup),
    /// whichever comes first. On cancellation the dispatcher stops, the
    /// work channel closes, workers drain it without starting new
    /// executions, the sink drains, and the call returns
    /// [`Error::Canceled`].
    pub async fn process_tasks<F, Fut>(
        &self,
        config: ProcessorConfig,
        shutdown: watch::Receiver<bool>,
        processor: F,
    ) -> Result<()>
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let worker_count = config.worker_count.max(1);
        let buffer = config.worker_buffer.max(1);

        let queue = self
            .get_queue(&config.queue_name)
            .await?
            .ok_or_else(|| Error::not_found(format!("queue {} does not exist", config.queue_name)))?;
        let task_timeout = queue.task_timeout();

        let (work_tx, work_rx) = mpsc::channel::<Task>(buffer);
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (result_tx, result_rx) = mpsc::channel::<TaskResult>(buffer);
        let (fail_tx, mut fail_rx) = mpsc::channel::<Error>(1);

        let processor = Arc::new(processor);
        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            workers.push(tokio::spawn(worker_loop(
                Arc::clone(&work_rx),
                result_tx.clone(),
                Arc::clone(&processor),
                task_timeout,
                shutdown.clone(),
            )));
        }
        // Workers hold the only result senders; the sink ends when they do.
        drop(result_tx);

        let sink = tokio::spawn(result_sink(
            self.clone(),
            config.clone(),
            result_rx,
            fail_tx,
        ));

        let mut shutdown = shutdown;
        let cause = loop {
            tokio::select! {
                _ = shutdown.changed() => break Error::Canceled,
                failure = fail_rx.recv() => {
                    break failure
                        .unwrap_or_else(|| Error::internal("result sink terminated unexpectedly"));
                }
                polled = self.get_next_task(&config.queue_name) => match polled {
                    Ok(Some(task)) => {
                        tokio::select! {
                            sent = work_tx.send(task) => {
                                if sent.is_err() {
                                    break Error::internal("work channel closed");
                                }
                            }
                            _ = shutdown.changed() => break Error::Canceled,
                        }
                    }
                    Ok(None) => {
                        tokio::select! {
                            _ = tokio::time::sleep(config.retry_interval) => {}
                            _ = shutdown.changed() => break Error::Canceled,
                        }
                    }
                    Err(err) => {
                        if config.stop_on_error {
                            break err;
                        }
                        warn!(
                            error = %err,
                            retry_in = ?config.retry_interval,
                            "failed to poll for next task"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(config.retry_interval) => {}
                            _ = shutdown.changed() => break Error::Canceled,
                        }
                    }
                }
            }
        };

        // Orderly drain: closing the work channel lets workers run dry,
        // dropping their result senders, which lets the sink run dry.
        drop(work_tx);
        for worker in workers {
            let _ = worker.await;
        }
        let _ = sink.await;

        Err(cause)
    }
}

async fn worker_loop<F, Fut>(
    work_rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    result_tx: mpsc::Sender<TaskResult>,
    processor: Arc<F>,
    task_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    loop {
        let task = {
            let mut rx = work_rx.lock().await;
            rx.recv().await
        };
        let Some(task) = task else { break };

        let outcome = if *shutdown.borrow() {
            // Drain mode: deadlines have collapsed, queued items are
            // reported without being executed.
            Err(Error::Canceled)
        } else {
            execute_task(&*processor, task.clone(), task_timeout, &mut shutdown).await
        };

        if result_tx.send(TaskResult { task, outcome }).await.is_err() {
            break;
        }
    }
}

async fn execute_task<F, Fut>(
    processor: &F,
    task: Task,
    task_timeout: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Value>
where
    F: Fn(Task) -> Fut,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    // The user function gets its own task so a missed deadline leaves it
    // running briefly; whatever it eventually returns is discarded.
    let mut execution = tokio::spawn(processor(task));

    tokio::select! {
        finished = &mut execution => match finished {
            Ok(outcome) => outcome,
            Err(join_err) => Err(Error::internal(format!("task processor panicked: {join_err}"))),
        },
        _ = tokio::time::sleep(task_timeout) => Err(Error::Timeout(task_timeout)),
        _ = shutdown.changed() => {
            execution.abort();
            Err(Error::Canceled)
        }
    }
}

async fn result_sink(
    client: Client,
    config: ProcessorConfig,
    mut results: mpsc::Receiver<TaskResult>,
    failures: mpsc::Sender<Error>,
) {
    while let Some(TaskResult { task, outcome }) = results.recv().await {
        let (status, data) = match outcome {
            Ok(data) => (TaskStatus::Completed, data),
            Err(err) => (
                TaskStatus::Failed,
                failure_data(&task.data, &err, config.preserve_error),
            ),
        };

        if let Err(err) = client.update_task(task.id, status, data).await {
            if config.stop_on_error {
                let _ = failures.send(err).await;
                return;
            }
            error!(task_id = %task.id, error = %err, "failed to report task result");
        }
    }
}

/// Payload written back for a failed task.
fn failure_data(original: &Value, err: &Error, preserve: bool) -> Value {
    if preserve {
        if let Value::Object(fields) = original {
            let mut annotated = fields.clone();
            annotated.insert("error".to_string(), json!(err.to_string()));
            return Value::Object(annotated);
        }
        if !original.is_null() {
            return json!({
                "original_data": original.to_string(),
                "error": err.to_string(),
            });
        }
    }
    json!({ "error": err.to_string() })
}

/// Handle to a processor spawned on the current runtime.
pub struct ProcessorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<Result<()>>,
}

impl ProcessorHandle {
    /// Spawn [`Client::process_tasks`] in the background.
    pub fn spawn<F, Fut>(client: Client, config: ProcessorConfig, processor: F) -> Self
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join =
            tokio::spawn(async move { client.process_tasks(config, shutdown_rx, processor).await });
        Self {
            shutdown: shutdown_tx,
            join,
        }
    }

    /// Cancel the processor and wait for the drain to finish.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        match self.join.await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(Error::internal(format!("processor task failed: {join_err}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_favor_resilient_processing() {
        let config = ProcessorConfig::new("emails");
        assert_eq!(config.queue_name, "emails");
        assert_eq!(config.retry_interval, Duration::from_secs(5));
        assert!(!config.stop_on_error);
        assert!(config.preserve_error);
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.worker_buffer, 10);
    }

    #[test]
    fn failure_annotates_object_payloads_in_place() {
        let original = json!({ "n": 1 });
        let err = Error::internal("boom");
        let data = failure_data(&original, &err, true);
        assert_eq!(data, json!({ "n": 1, "error": "boom" }));
    }

    #[test]
    fn failure_wraps_non_object_payloads() {
        let original = json!([1, 2, 3]);
        let err = Error::internal("boom");
        let data = failure_data(&original, &err, true);
        assert_eq!(data, json!({ "original_data": "[1,2,3]", "error": "boom" }));
    }

    #[test]
    fn failure_without_preserve_drops_the_payload() {
        let original = json!({ "n": 1 });
        let err = Error::internal("boom");
        let data = failure_data(&original, &err, false);
        assert_eq!(data, json!({ "error": "boom" }));
    }

    #[test]
    fn null_payload_becomes_a_plain_error_object() {
        let err = Error::internal("boom");
        let data = failure_data(&Value::Null, &err, true);
        assert_eq!(data, json!({ "error": "boom" }));
    }

    #[test]
    fn timeout_failures_carry_the_deadline() {
        let err = Error::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("exceeded timeout"));
        assert!(err.to_string().contains("30"));
    }
}
