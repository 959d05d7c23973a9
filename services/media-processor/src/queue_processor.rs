use crate::error::PipelineError;
use crate::pipeline::{MediaPipeline, ProcessOutcome};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingJob {
    pub record_id: String,
}

impl ProcessingJob {
    pub fn new(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
        }
    }
}

/// Sending half of the bounded in-process job queue
#[derive(Debug, Clone)]
pub struct ProcessingQueue {
    sender: mpsc::Sender<ProcessingJob>,
}

impl ProcessingQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProcessingJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Queue a job without waiting for room
    pub fn enqueue(&self, job: ProcessingJob) -> Result<(), PipelineError> {
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PipelineError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PipelineError::QueueClosed,
        })
    }
}

/// Drains the job queue, processing up to `concurrency` records at once.
pub struct ProcessingWorker {
    pipeline: Arc<MediaPipeline>,
    receiver: mpsc::Receiver<ProcessingJob>,
    concurrency: usize,
}

type JobResult = (String, Result<ProcessOutcome, PipelineError>);

impl ProcessingWorker {
    pub fn new(
        pipeline: Arc<MediaPipeline>,
        receiver: mpsc::Receiver<ProcessingJob>,
        concurrency: usize,
    ) -> Self {
        Self {
            pipeline,
            receiver,
            concurrency: concurrency.max(1),
        }
    }

    /// Run until `shutdown` resolves. Jobs already started are allowed to
    /// finish; jobs still queued are dropped.
    ///
    /// The pipeline keeps a sender of its own, so the queue never closes
    /// while the worker runs and `shutdown` is the only way to stop it.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            "Processing worker started with concurrency {}",
            self.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<JobResult> = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Processing worker shutting down");
                    self.receiver.close();
                    break;
                }
                job = self.receiver.recv() => {
                    let Some(job) = job else {
                        debug!("Job queue closed");
                        break;
                    };
                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                        break;
                    };
                    let pipeline = self.pipeline.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        let outcome = pipeline.process(&job.record_id).await;
                        (job.record_id, outcome)
                    });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    Self::log_result(joined);
                }
            }
        }

        if !tasks.is_empty() {
            info!("Waiting for {} in-flight jobs", tasks.len());
        }
        while let Some(joined) = tasks.join_next().await {
            Self::log_result(joined);
        }
    }

    fn log_result(joined: Result<JobResult, JoinError>) {
        match joined {
            Ok((record_id, Ok(ProcessOutcome::Completed { stored, failed }))) => {
                if failed.is_empty() {
                    debug!("Record {} processed, {} variants", record_id, stored);
                } else {
                    warn!(
                        "Record {} processed with {} of {} variants",
                        record_id,
                        stored,
                        stored + failed.len()
                    );
                }
            }
            Ok((record_id, Ok(outcome))) => {
                debug!("Record {} skipped: {:?}", record_id, outcome);
            }
            Ok((record_id, Err(e))) => {
                error!("Processing failed for record {}: {}", record_id, e);
            }
            Err(e) => {
                error!("Processing task panicked: {}", e);
            }
        }
    }
}
