//! Batch job poller - submit a bulk member job, poll it to a terminal state
//! and check the job touched exactly the submitted members.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::bounded::{cancelled, CancelToken};
use super::types::MutationRecord;
use crate::config::RefsetConfig;
use crate::error::BatchError;
use crate::snowstorm::TerminologyStore;

/// A submitted job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub location: String,
    pub submitted_ids: BTreeSet<String>,
}

/// A job that completed and passed verification
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedBatch {
    pub location: String,
    pub members: usize,
    pub attempts: u32,
    pub seconds_duration: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub delay: Duration,
    pub max_attempts: u32,
    pub max_batch_size: usize,
}

impl PollSettings {
    pub fn from_config(config: &RefsetConfig) -> Self {
        Self {
            delay: config.poll_delay(),
            max_attempts: config.max_poll_attempts,
            max_batch_size: config.max_batch_size,
        }
    }
}

pub struct BatchJobPoller {
    store: Arc<dyn TerminologyStore>,
    settings: PollSettings,
}

impl BatchJobPoller {
    pub fn new(store: Arc<dyn TerminologyStore>, settings: PollSettings) -> Self {
        Self { store, settings }
    }

    /// Submit `records` in sequential batches of at most `max_batch_size`.
    /// Stops at the first failed batch; nothing is resubmitted.
    pub async fn apply(
        &self,
        records: &[MutationRecord],
        cancel: &CancelToken,
    ) -> Result<Vec<CompletedBatch>, BatchError> {
        self.apply_with(records, cancel, |_, _| {}).await
    }

    /// As `apply`, calling `on_completed` for every batch as soon as it has
    /// completed and passed verification. Batches that completed before a
    /// later failure have already been reported when the error returns.
    pub async fn apply_with<F>(
        &self,
        records: &[MutationRecord],
        cancel: &CancelToken,
        mut on_completed: F,
    ) -> Result<Vec<CompletedBatch>, BatchError>
    where
        F: FnMut(&[MutationRecord], &CompletedBatch),
    {
        let mut completed = Vec::new();
        for chunk in records.chunks(self.settings.max_batch_size.max(1)) {
            if *cancel.borrow() {
                return Err(BatchError::Cancelled);
            }
            let job = self.submit(chunk).await?;
            let batch = self.wait(&job, cancel).await?;
            on_completed(chunk, &batch);
            completed.push(batch);
        }
        Ok(completed)
    }

    pub async fn submit(&self, records: &[MutationRecord]) -> Result<BatchJob, BatchError> {
        let location = self
            .store
            .bulk_mutate_members(records)
            .await?
            .ok_or_else(|| BatchError::SubmissionFailed {
                reason: "response carried no Location header".to_string(),
            })?;

        info!(job = %location, records = records.len(), "Submitted bulk member job");
        Ok(BatchJob {
            location,
            submitted_ids: records.iter().map(|r| r.member_id.clone()).collect(),
        })
    }

    /// Poll `job` until it completes, fails or runs out of attempts
    pub async fn wait(
        &self,
        job: &BatchJob,
        cancel: &CancelToken,
    ) -> Result<CompletedBatch, BatchError> {
        let mut cancel = cancel.clone();
        let mut last_message: Option<String> = None;

        for attempt in 1..=self.settings.max_attempts {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.delay) => {}
                _ = cancelled(&mut cancel) => {
                    warn!(job = %job.location, attempts = attempt - 1, "Polling cancelled");
                    return Err(BatchError::Cancelled);
                }
            }

            let status = self.store.job_status(&job.location).await?;
            debug!(job = %job.location, attempts = attempt, status = %status.status, "Polled bulk job");

            match status.status.to_ascii_uppercase().as_str() {
                "RUNNING" | "PENDING" => {
                    if status.message.is_some() {
                        last_message = status.message;
                    }
                }
                "COMPLETED" => {
                    let returned: BTreeSet<String> = status.member_ids.into_iter().collect();
                    if returned != job.submitted_ids {
                        return Err(BatchError::VerificationFailed {
                            submitted: job.submitted_ids.clone(),
                            returned,
                        });
                    }
                    info!(
                        job = %job.location,
                        attempts = attempt,
                        seconds = status.seconds_duration.unwrap_or_default(),
                        "Bulk member job completed"
                    );
                    return Ok(CompletedBatch {
                        location: job.location.clone(),
                        members: returned.len(),
                        attempts: attempt,
                        seconds_duration: status.seconds_duration,
                    });
                }
                "FAILED" => {
                    return Err(BatchError::Failed {
                        message: status.message.unwrap_or_default(),
                    });
                }
                _ => {
                    return Err(BatchError::UnexpectedStatus {
                        status: status.status,
                    })
                }
            }
        }

        Err(BatchError::TimedOut {
            attempts: self.settings.max_attempts,
            last_message,
        })
    }
}
