//! Replication task variants
//!
//! Three task kinds arrive on the stream: activity state sync, history
//! events, and history metadata. All share one lifecycle: execute against
//! the peer, classify failures, fall back to re-replication when the peer
//! reports a gap, and ack or nack the source message exactly once.

use async_trait::async_trait;
use bytes::Bytes;
use slog::Logger;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::ReplicatorConfig;
use crate::execution::WorkflowIdentity;
use crate::metrics::{Counter, MetricsClient, MetricsScope, Timer};
use crate::replicator::client::{HistoryClient, ReplicateEventsRequest, SyncActivityRequest};
use crate::replicator::error::ReplicationError;
use crate::replicator::idlock::IdMutex;
use crate::replicator::message::{
    HistoryEventsAttributes, HistoryMetadataAttributes, StreamMessage, SyncActivityAttributes,
};
use crate::replicator::rereplicator::HistoryRereplicator;

/// Fixed delay between in-place retries; longer backoff is amortized by the
/// per-lane serial executor
const TASK_RETRY_DELAY: Duration = Duration::from_micros(500);

/// One task in the per-workflow serial lane
#[async_trait]
pub trait SequentialTask: Send {
    /// Identity whose lane this task runs in
    fn queue_id(&self) -> &WorkflowIdentity;

    async fn execute(&self) -> Result<(), ReplicationError>;

    /// Classify a failed execution; may recover by re-replicating and
    /// re-executing, may rewrite the error, or may pass it through
    async fn handle_err(&self, error: ReplicationError) -> Result<(), ReplicationError>;

    /// Count one attempt; true when the runtime should retry in place
    async fn retry_err(&mut self, error: &ReplicationError) -> bool;

    async fn ack(&self);

    async fn nack(&self);
}

/// State and collaborators shared by all task variants
pub struct ReplicationTaskBase {
    scope: MetricsScope,
    start_time: Instant,
    queue_id: WorkflowIdentity,
    task_id: i64,
    attempt: usize,
    message: Arc<dyn StreamMessage>,
    logger: Logger,
    config: Arc<ReplicatorConfig>,
    history_client: Arc<dyn HistoryClient>,
    metrics: Arc<dyn MetricsClient>,
    rereplicator: Arc<dyn HistoryRereplicator>,
    resend_lock: IdMutex,
}

/// Collaborators handed to every task constructor
#[derive(Clone)]
pub struct TaskContext {
    pub config: Arc<ReplicatorConfig>,
    pub history_client: Arc<dyn HistoryClient>,
    pub metrics: Arc<dyn MetricsClient>,
    pub rereplicator: Arc<dyn HistoryRereplicator>,
    pub resend_lock: IdMutex,
    pub logger: Logger,
}

impl ReplicationTaskBase {
    fn new(
        scope: MetricsScope,
        queue_id: WorkflowIdentity,
        task_id: i64,
        message: Arc<dyn StreamMessage>,
        logger: Logger,
        context: &TaskContext,
    ) -> Self {
        Self {
            scope,
            start_time: Instant::now(),
            queue_id,
            task_id,
            attempt: 0,
            message,
            logger,
            config: context.config.clone(),
            history_client: context.history_client.clone(),
            metrics: context.metrics.clone(),
            rereplicator: context.rereplicator.clone(),
            resend_lock: context.resend_lock.clone(),
        }
    }

    async fn retry_err(&mut self, error: &ReplicationError) -> bool {
        self.attempt += 1;
        if self.attempt <= self.config.task_max_retry_count
            && self.start_time.elapsed() <= self.config.task_max_retry_duration
            && error.is_transient()
        {
            tokio::time::sleep(TASK_RETRY_DELAY).await;
            return true;
        }
        false
    }

    async fn ack(&self) {
        self.metrics.inc_counter(self.scope, Counter::ReplicatorMessages);
        self.metrics
            .record_timer(self.scope, Timer::ReplicatorLatency, self.start_time.elapsed());
        // the underlying stream is not expected to fail; log just in case
        if let Err(error) = self.message.ack().await {
            slog::error!(self.logger, "unable to ack message"; "error" => error);
        }
    }

    async fn nack(&self) {
        self.metrics.inc_counter(self.scope, Counter::ReplicatorMessages);
        self.metrics
            .record_timer(self.scope, Timer::ReplicatorLatency, self.start_time.elapsed());
        if let Err(error) = self.message.nack().await {
            slog::error!(self.logger, "unable to nack message"; "error" => error);
        }
    }

    /// Backfill the peer from the retry-task target up to `end_event_id`,
    /// serialized per workflow identity
    async fn resend_to_target(
        &self,
        rereplication_scope: MetricsScope,
        begin_run_id: Uuid,
        begin_event_id: i64,
        end_event_id: i64,
    ) -> Result<(), ReplicationError> {
        self.metrics
            .inc_counter(rereplication_scope, Counter::ClientRequests);
        let started = Instant::now();

        let _guard = self.resend_lock.lock(&self.queue_id.to_string()).await;
        let result = self
            .rereplicator
            .send_multi_workflow_history(
                self.queue_id.domain_id,
                &self.queue_id.workflow_id,
                begin_run_id,
                begin_event_id,
                self.queue_id.run_id,
                end_event_id,
            )
            .await;
        self.metrics
            .record_timer(rereplication_scope, Timer::ClientLatency, started.elapsed());
        result
    }
}

async fn with_deadline<F>(
    deadline: Duration,
    call: F,
) -> Result<(), ReplicationError>
where
    F: std::future::Future<Output = Result<(), ReplicationError>> + Send,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(ReplicationError::Timeout(format!(
            "replication call exceeded {:?}",
            deadline
        ))),
    }
}

/// Mirrors activity heartbeat/completion state onto the peer
pub struct ActivityReplicationTask {
    base: ReplicationTaskBase,
    request: SyncActivityRequest,
}

impl ActivityReplicationTask {
    pub fn new(
        attributes: SyncActivityAttributes,
        message: Arc<dyn StreamMessage>,
        context: &TaskContext,
    ) -> Self {
        let queue_id = WorkflowIdentity::new(
            attributes.domain_id,
            attributes.workflow_id.clone(),
            attributes.run_id,
        );
        let logger = context.logger.new(slog::o!(
            "workflow_id" => attributes.workflow_id.clone(),
            "run_id" => attributes.run_id.to_string(),
            "scheduled_id" => attributes.scheduled_id,
            "version" => attributes.version,
        ));
        let base = ReplicationTaskBase::new(
            MetricsScope::SyncActivityTask,
            queue_id,
            attributes.scheduled_id,
            message,
            logger,
            context,
        );
        let request = SyncActivityRequest {
            domain_id: attributes.domain_id,
            workflow_id: attributes.workflow_id,
            run_id: attributes.run_id,
            version: attributes.version,
            scheduled_id: attributes.scheduled_id,
            started_id: attributes.started_id,
            attempt: attributes.attempt,
            details: Bytes::from(attributes.details),
            last_failure_reason: attributes.last_failure_reason,
            last_worker_identity: attributes.last_worker_identity,
        };
        Self { base, request }
    }
}

#[async_trait]
impl SequentialTask for ActivityReplicationTask {
    fn queue_id(&self) -> &WorkflowIdentity {
        &self.base.queue_id
    }

    async fn execute(&self) -> Result<(), ReplicationError> {
        with_deadline(
            self.base.config.replication_timeout,
            self.base.history_client.sync_activity(&self.request),
        )
        .await
    }

    async fn handle_err(&self, error: ReplicationError) -> Result<(), ReplicationError> {
        if self.base.attempt < self.base.config.activity_buffer_retry_count {
            return Err(error);
        }
        let (run_id, next_event_id) = match error.retry_task_target() {
            Some(target) => target,
            None => return Err(error),
        };

        // the activity references its schedule event; the payload lives on
        // the successor, hence the extra one
        let resend = self
            .base
            .resend_to_target(
                MetricsScope::RereplicationByActivityReplication,
                run_id,
                next_event_id,
                self.base.task_id + 1,
            )
            .await;
        if let Err(resend_error) = resend {
            slog::error!(self.base.logger, "error resending history";
                "error" => %resend_error);
            // surface the replication error, not the resend error
            return Err(error);
        }
        self.execute().await
    }

    async fn retry_err(&mut self, error: &ReplicationError) -> bool {
        self.base.retry_err(error).await
    }

    async fn ack(&self) {
        self.base.ack().await
    }

    async fn nack(&self) {
        self.base.nack().await
    }
}

/// Applies a range of history events onto the peer
pub struct HistoryReplicationTask {
    base: ReplicationTaskBase,
    request: ReplicateEventsRequest,
}

impl HistoryReplicationTask {
    pub fn new(
        attributes: HistoryEventsAttributes,
        message: Arc<dyn StreamMessage>,
        source_cluster: &str,
        context: &TaskContext,
    ) -> Self {
        let queue_id = WorkflowIdentity::new(
            attributes.domain_id,
            attributes.workflow_id.clone(),
            attributes.run_id,
        );
        let logger = context.logger.new(slog::o!(
            "workflow_id" => attributes.workflow_id.clone(),
            "run_id" => attributes.run_id.to_string(),
            "first_event_id" => attributes.first_event_id,
            "next_event_id" => attributes.next_event_id,
            "version" => attributes.version,
        ));
        let base = ReplicationTaskBase::new(
            MetricsScope::HistoryReplicationTask,
            queue_id,
            attributes.first_event_id,
            message,
            logger,
            context,
        );
        let request = ReplicateEventsRequest {
            source_cluster: source_cluster.to_string(),
            domain_id: attributes.domain_id,
            workflow_id: attributes.workflow_id,
            run_id: attributes.run_id,
            first_event_id: attributes.first_event_id,
            next_event_id: attributes.next_event_id,
            version: attributes.version,
            history: attributes.history,
            new_run_history: attributes.new_run_history,
            force_buffer_events: false,
            reset_workflow: attributes.reset_workflow,
        };
        Self { base, request }
    }
}

#[async_trait]
impl SequentialTask for HistoryReplicationTask {
    fn queue_id(&self) -> &WorkflowIdentity {
        &self.base.queue_id
    }

    async fn execute(&self) -> Result<(), ReplicationError> {
        with_deadline(
            self.base.config.replication_timeout,
            self.base.history_client.replicate_events(&self.request),
        )
        .await
    }

    async fn handle_err(&self, error: ReplicationError) -> Result<(), ReplicationError> {
        if self.base.attempt < self.base.config.history_buffer_retry_count {
            return Err(error);
        }
        let (run_id, next_event_id) = match error.retry_task_target() {
            Some(target) => target,
            None => return Err(error),
        };

        let resend = self
            .base
            .resend_to_target(
                MetricsScope::RereplicationByHistoryReplication,
                run_id,
                next_event_id,
                self.base.task_id,
            )
            .await;
        if let Err(resend_error) = resend {
            slog::error!(self.base.logger, "error resending history";
                "error" => %resend_error);
            // surface the replication error, not the resend error
            return Err(error);
        }
        self.execute().await
    }

    async fn retry_err(&mut self, error: &ReplicationError) -> bool {
        self.base.retry_err(error).await
    }

    async fn ack(&self) {
        self.base.ack().await
    }

    async fn nack(&self) {
        self.base.nack().await
    }
}

/// Pushes a history range by re-replicating it wholesale; used when only
/// metadata about the range crossed clusters
pub struct HistoryMetadataReplicationTask {
    base: ReplicationTaskBase,
    first_event_id: i64,
    next_event_id: i64,
}

impl HistoryMetadataReplicationTask {
    pub fn new(
        attributes: HistoryMetadataAttributes,
        message: Arc<dyn StreamMessage>,
        context: &TaskContext,
    ) -> Self {
        let queue_id = WorkflowIdentity::new(
            attributes.domain_id,
            attributes.workflow_id.clone(),
            attributes.run_id,
        );
        let logger = context.logger.new(slog::o!(
            "workflow_id" => attributes.workflow_id.clone(),
            "run_id" => attributes.run_id.to_string(),
            "first_event_id" => attributes.first_event_id,
            "next_event_id" => attributes.next_event_id,
        ));
        let base = ReplicationTaskBase::new(
            MetricsScope::HistoryMetadataReplicationTask,
            queue_id,
            attributes.first_event_id,
            message,
            logger,
            context,
        );
        Self {
            base,
            first_event_id: attributes.first_event_id,
            next_event_id: attributes.next_event_id,
        }
    }
}

#[async_trait]
impl SequentialTask for HistoryMetadataReplicationTask {
    fn queue_id(&self) -> &WorkflowIdentity {
        &self.base.queue_id
    }

    async fn execute(&self) -> Result<(), ReplicationError> {
        self.base
            .resend_to_target(
                MetricsScope::RereplicationByHistoryMetadataReplication,
                self.base.queue_id.run_id,
                self.first_event_id,
                self.next_event_id,
            )
            .await
    }

    async fn handle_err(&self, error: ReplicationError) -> Result<(), ReplicationError> {
        let (run_id, next_event_id) = match error.retry_task_target() {
            Some(target) => target,
            None => return Err(error),
        };

        let resend = self
            .base
            .resend_to_target(
                MetricsScope::RereplicationByHistoryReplication,
                run_id,
                next_event_id,
                self.base.task_id,
            )
            .await;
        if let Err(resend_error) = resend {
            slog::error!(self.base.logger, "error resending history";
                "error" => %resend_error);
            // surface the replication error, not the resend error
            return Err(error);
        }
        self.execute().await
    }

    async fn retry_err(&mut self, error: &ReplicationError) -> bool {
        self.base.retry_err(error).await
    }

    async fn ack(&self) {
        self.base.ack().await
    }

    async fn nack(&self) {
        self.base.nack().await
    }
}
