//! Replication stream processor
//!
//! Consumes one source cluster's replication stream, turns each message
//! into its task variant, and hands it to the sequential executor. A
//! message whose payload cannot be decoded never becomes a task; it is
//! logged and nacked on the spot.

use slog::Logger;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::ReplicatorConfig;
use crate::metrics::MetricsClient;
use crate::replicator::client::HistoryClient;
use crate::replicator::executor::SequentialTaskExecutor;
use crate::replicator::idlock::IdMutex;
use crate::replicator::message::{MessageStream, ReplicationPayload};
use crate::replicator::rereplicator::HistoryRereplicator;
use crate::replicator::task::{
    ActivityReplicationTask, HistoryMetadataReplicationTask, HistoryReplicationTask,
    SequentialTask, TaskContext,
};

/// Pulls replication messages and dispatches them as sequential tasks
pub struct ReplicationTaskProcessor {
    source_cluster: String,
    stream: Arc<dyn MessageStream>,
    executor: Arc<SequentialTaskExecutor>,
    context: TaskContext,
    logger: Logger,
}

impl ReplicationTaskProcessor {
    pub fn new(
        source_cluster: impl Into<String>,
        config: ReplicatorConfig,
        stream: Arc<dyn MessageStream>,
        history_client: Arc<dyn HistoryClient>,
        rereplicator: Arc<dyn HistoryRereplicator>,
        metrics: Arc<dyn MetricsClient>,
        logger: Logger,
    ) -> Self {
        let source_cluster = source_cluster.into();
        let logger = logger.new(slog::o!("source_cluster" => source_cluster.clone()));
        let executor = Arc::new(SequentialTaskExecutor::new(
            config.task_worker_count,
            logger.clone(),
        ));
        let context = TaskContext {
            config: Arc::new(config),
            history_client,
            metrics,
            rereplicator,
            resend_lock: IdMutex::new(),
            logger: logger.clone(),
        };
        Self {
            source_cluster,
            stream,
            executor,
            context,
            logger,
        }
    }

    /// Run the consumer loop until the stream closes, then drain the executor
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            slog::info!(self.logger, "replication task processor started");
            while let Some((payload, message)) = self.stream.receive().await {
                let task: Box<dyn SequentialTask> =
                    match serde_json::from_slice::<ReplicationPayload>(&payload) {
                        Ok(ReplicationPayload::SyncActivity(attributes)) => Box::new(
                            ActivityReplicationTask::new(attributes, message, &self.context),
                        ),
                        Ok(ReplicationPayload::HistoryEvents(attributes)) => {
                            Box::new(HistoryReplicationTask::new(
                                attributes,
                                message,
                                &self.source_cluster,
                                &self.context,
                            ))
                        }
                        Ok(ReplicationPayload::HistoryMetadata(attributes)) => Box::new(
                            HistoryMetadataReplicationTask::new(attributes, message, &self.context),
                        ),
                        Err(error) => {
                            slog::error!(self.logger, "malformed replication message";
                                "error" => %error);
                            if let Err(nack_error) = message.nack().await {
                                slog::error!(self.logger, "unable to nack message";
                                    "error" => nack_error);
                            }
                            continue;
                        }
                    };
                self.executor.submit(task).await;
            }
            self.executor.shutdown().await;
            slog::info!(self.logger, "replication task processor stopped");
        })
    }
}
