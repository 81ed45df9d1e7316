//! Ticketing service integration - process gate and job result notification

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::TicketingError;
use crate::reconcile::RunReport;

pub use client::TicketingClient;

/// Registered external process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalProcess {
    #[serde(default)]
    pub id: Option<i64>,
    pub process_name: String,
    #[serde(default)]
    pub enabled: bool,
}

#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn external_processes(&self) -> Result<Vec<ExternalProcess>, TicketingError>;

    async fn post_job_result(&self, report: &RunReport) -> Result<(), TicketingError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    /// No process registered under the name
    NotRegistered,
    Disabled,
}

/// Ask the ticketing service whether `process_name` may run
pub async fn process_gate(
    sink: &dyn ReportSink,
    process_name: &str,
) -> Result<GateDecision, TicketingError> {
    let processes = sink.external_processes().await?;
    let decision = match processes.iter().find(|p| p.process_name == process_name) {
        None => GateDecision::NotRegistered,
        Some(process) if !process.enabled => GateDecision::Disabled,
        Some(_) => GateDecision::Proceed,
    };
    match decision {
        GateDecision::Proceed => info!(process_name, "External process enabled"),
        GateDecision::NotRegistered => warn!(process_name, "External process not registered"),
        GateDecision::Disabled => warn!(process_name, "External process disabled"),
    }
    Ok(decision)
}

/// Post the report; failures are logged and never change the run outcome
pub async fn notify(sink: &dyn ReportSink, report: &RunReport) {
    match sink.post_job_result(report).await {
        Ok(()) => info!(job_id = %report.job_id, "Posted job result"),
        Err(e) => warn!(job_id = %report.job_id, error = %e, "Failed to post job result"),
    }
}
