//! Keyed sequential task executor
//!
//! A fixed pool of worker lanes consumes tasks in FIFO order; a task's lane
//! is the hash of its workflow identity, so tasks for one execution are
//! strictly serialized while different executions proceed in parallel.

use slog::Logger;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::replicator::task::SequentialTask;

const LANE_BUFFER: usize = 1000;

/// Executes replication tasks with per-identity ordering
pub struct SequentialTaskExecutor {
    lanes: Mutex<Vec<mpsc::Sender<Box<dyn SequentialTask>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    logger: Logger,
}

impl SequentialTaskExecutor {
    pub fn new(worker_count: usize, logger: Logger) -> Self {
        let worker_count = worker_count.max(1);
        let mut lanes = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for lane in 0..worker_count {
            let (sender, receiver) = mpsc::channel(LANE_BUFFER);
            let worker_logger = logger.new(slog::o!("lane" => lane));
            workers.push(tokio::spawn(worker_loop(receiver, worker_logger)));
            lanes.push(sender);
        }
        Self {
            lanes: Mutex::new(lanes),
            workers: Mutex::new(workers),
            logger,
        }
    }

    /// Queue a task on its identity's lane.
    ///
    /// A task that cannot be queued (executor already stopped) is nacked
    /// here so its message is redelivered; ack-xor-nack still holds.
    pub async fn submit(&self, task: Box<dyn SequentialTask>) {
        let sender = {
            let lanes = self.lanes.lock().unwrap();
            if lanes.is_empty() {
                None
            } else {
                let mut hasher = DefaultHasher::new();
                task.queue_id().hash(&mut hasher);
                let lane = (hasher.finish() as usize) % lanes.len();
                Some(lanes[lane].clone())
            }
        };
        match sender {
            Some(sender) => {
                if let Err(rejected) = sender.send(task).await {
                    slog::warn!(self.logger, "executor lane closed, nacking task");
                    rejected.0.nack().await;
                }
            }
            None => {
                slog::warn!(self.logger, "executor stopped, nacking task");
                task.nack().await;
            }
        }
    }

    /// Stop accepting tasks and wait for queued work to drain
    pub async fn shutdown(&self) {
        self.lanes.lock().unwrap().clear();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }
    }
}

async fn worker_loop(
    mut receiver: mpsc::Receiver<Box<dyn SequentialTask>>,
    logger: Logger,
) {
    while let Some(mut task) = receiver.recv().await {
        execute_task(task.as_mut(), &logger).await;
    }
}

/// Drive one task to its ack or nack
async fn execute_task(task: &mut dyn SequentialTask, logger: &Logger) {
    loop {
        let outcome = match task.execute().await {
            Ok(()) => Ok(()),
            Err(error) => task.handle_err(error).await,
        };
        match outcome {
            Ok(()) => {
                task.ack().await;
                return;
            }
            Err(error) => {
                if !task.retry_err(&error).await {
                    slog::warn!(logger, "replication task exhausted retries";
                        "workflow_id" => task.queue_id().workflow_id.as_str(),
                        "run_id" => %task.queue_id().run_id,
                        "error" => %error);
                    task.nack().await;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::WorkflowIdentity;
    use crate::replicator::error::ReplicationError;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    struct RecordingTask {
        queue_id: WorkflowIdentity,
        sequence: usize,
        delay: Duration,
        executed: Arc<Mutex<Vec<(String, usize)>>>,
        acked: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl SequentialTask for RecordingTask {
        fn queue_id(&self) -> &WorkflowIdentity {
            &self.queue_id
        }

        async fn execute(&self) -> Result<(), ReplicationError> {
            tokio::time::sleep(self.delay).await;
            self.executed
                .lock()
                .unwrap()
                .push((self.queue_id.workflow_id.clone(), self.sequence));
            Ok(())
        }

        async fn handle_err(&self, error: ReplicationError) -> Result<(), ReplicationError> {
            Err(error)
        }

        async fn retry_err(&mut self, _error: &ReplicationError) -> bool {
            false
        }

        async fn ack(&self) {
            *self.acked.lock().unwrap() += 1;
        }

        async fn nack(&self) {}
    }

    #[tokio::test]
    async fn test_one_identity_executes_in_submission_order() {
        let executor =
            SequentialTaskExecutor::new(4, crate::logging::discard_logger());
        let identity = WorkflowIdentity::new(Uuid::new_v4(), "wf", Uuid::new_v4());
        let executed = Arc::new(Mutex::new(Vec::new()));
        let acked = Arc::new(Mutex::new(0));

        for sequence in 0..20 {
            // an early slow task would expose reordering if lanes raced
            let delay = if sequence == 0 {
                Duration::from_millis(20)
            } else {
                Duration::ZERO
            };
            executor
                .submit(Box::new(RecordingTask {
                    queue_id: identity.clone(),
                    sequence,
                    delay,
                    executed: executed.clone(),
                    acked: acked.clone(),
                }))
                .await;
        }
        executor.shutdown().await;

        let order: Vec<usize> = executed.lock().unwrap().iter().map(|(_, s)| *s).collect();
        assert_eq!(order, (0..20).collect::<Vec<_>>());
        assert_eq!(*acked.lock().unwrap(), 20);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_nacks() {
        let executor = SequentialTaskExecutor::new(2, crate::logging::discard_logger());
        executor.shutdown().await;

        let executed = Arc::new(Mutex::new(Vec::new()));
        let acked = Arc::new(Mutex::new(0));
        executor
            .submit(Box::new(RecordingTask {
                queue_id: WorkflowIdentity::new(Uuid::new_v4(), "wf", Uuid::new_v4()),
                sequence: 0,
                delay: Duration::ZERO,
                executed: executed.clone(),
                acked: acked.clone(),
            }))
            .await;
        assert!(executed.lock().unwrap().is_empty());
        assert_eq!(*acked.lock().unwrap(), 0);
    }
}
