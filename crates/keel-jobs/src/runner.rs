//! In-process job queue.
//!
//! [`JobQueue`] is the cloneable submit side; [`JobRunner`] owns the
//! receive side and runs jobs on tokio tasks, bounded by a semaphore. A
//! job id stays reserved from submit until its last attempt finishes, so
//! the same job never runs twice at once. Jobs that return `Err` are
//! retried with exponential backoff.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keel_core::{ConfigError, JobsConfig};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::context::JobContext;
use crate::deploy::DeployConsumer;
use crate::error::JobResult;
use crate::job::{Job, JobOutcome};
use crate::template::TemplateConsumer;

/// Runs one attempt of a job.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> JobResult<JobOutcome>;
}

/// Dispatches jobs to the deploy and template consumers.
pub struct Consumers {
    deploy: DeployConsumer,
    template: TemplateConsumer,
}

impl Consumers {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self {
            deploy: DeployConsumer::new(ctx.clone()),
            template: TemplateConsumer::new(ctx),
        }
    }
}

#[async_trait]
impl JobExecutor for Consumers {
    async fn execute(&self, job: &Job) -> JobResult<JobOutcome> {
        match job {
            Job::Deploy(job) => self.deploy.run(job).await.map(JobOutcome::Deploy),
            Job::Template(job) => self.template.run(job).await.map(JobOutcome::Template),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    pub concurrency: usize,
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub retry_backoff: Duration,
    pub queue_capacity: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(5),
            queue_capacity: 256,
        }
    }
}

impl RunnerSettings {
    pub fn from_config(config: &JobsConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            concurrency: config.concurrency.max(1),
            max_attempts: config.max_attempts.max(1),
            retry_backoff: config.retry_backoff()?,
            queue_capacity: config.queue_capacity.max(1),
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("job {0} is already queued or running")]
    Duplicate(String),

    #[error("job queue is full")]
    QueueFull,

    #[error("job runner has stopped")]
    Closed,
}

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl JobQueue {
    pub async fn submit(&self, job: Job) -> Result<(), SubmitError> {
        let id = job.id();
        let mut in_flight = self.in_flight.lock().await;
        if !in_flight.insert(id.clone()) {
            return Err(SubmitError::Duplicate(id));
        }
        match self.tx.try_send(job) {
            Ok(()) => {
                debug!(job = %id, "job queued");
                Ok(())
            }
            Err(e) => {
                in_flight.remove(&id);
                Err(match e {
                    TrySendError::Full(_) => SubmitError::QueueFull,
                    TrySendError::Closed(_) => SubmitError::Closed,
                })
            }
        }
    }

    pub async fn is_in_flight(&self, job_id: &str) -> bool {
        self.in_flight.lock().await.contains(job_id)
    }

    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}

pub struct JobRunner {
    rx: mpsc::Receiver<Job>,
    executor: Arc<dyn JobExecutor>,
    settings: RunnerSettings,
    in_flight: Arc<Mutex<HashSet<String>>>,
    shutdown: watch::Receiver<bool>,
}

impl JobRunner {
    pub fn new(
        executor: Arc<dyn JobExecutor>,
        settings: RunnerSettings,
        shutdown: watch::Receiver<bool>,
    ) -> (JobQueue, Self) {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let queue = JobQueue {
            tx,
            in_flight: in_flight.clone(),
        };
        let runner = Self {
            rx,
            executor,
            settings,
            in_flight,
            shutdown,
        };
        (queue, runner)
    }

    /// Run until shutdown is signalled or every queue handle is dropped,
    /// then wait for running jobs to finish.
    pub async fn run(mut self) {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        info!(
            concurrency = self.settings.concurrency,
            max_attempts = self.settings.max_attempts,
            "job runner started"
        );

        loop {
            tokio::select! {
                received = self.rx.recv() => {
                    let Some(job) = received else { break };
                    let Ok(permit) = semaphore.clone().acquire_owned().await else { break };
                    let executor = self.executor.clone();
                    let in_flight = self.in_flight.clone();
                    let settings = self.settings;
                    let shutdown = self.shutdown.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        run_with_retries(executor.as_ref(), &job, settings, shutdown).await;
                        in_flight.lock().await.remove(&job.id());
                    });
                }
                _ = self.shutdown.changed() => {
                    info!("job runner shutting down");
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "job task panicked");
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "job task panicked");
            }
        }
        info!("job runner stopped");
    }
}

async fn run_with_retries(
    executor: &dyn JobExecutor,
    job: &Job,
    settings: RunnerSettings,
    mut shutdown: watch::Receiver<bool>,
) -> Option<JobOutcome> {
    let max_attempts = settings.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match executor.execute(job).await {
            Ok(outcome) => {
                info!(%job, attempt, outcome = ?outcome, "job finished");
                return Some(outcome);
            }
            Err(e) if attempt < max_attempts => {
                let delay = settings.backoff(attempt);
                warn!(%job, attempt, error = %e, retry_in = ?delay, "job failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {
                        warn!(%job, attempt, "shutdown during retry backoff, giving up");
                        return None;
                    }
                }
            }
            Err(e) => {
                error!(%job, attempt, error = %e, "job failed, giving up");
            }
        }
    }
    None
}
