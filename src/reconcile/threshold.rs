//! Threshold guard - percentage and absolute count checks on a proposed change

use std::fmt;
use std::path::PathBuf;

use ecl_core::ConceptId;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::types::Direction;
use crate::config::{RefsetConfig, ThresholdPolicy};
use crate::error::SetError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ThresholdWarning {
    /// `delta / current_total` reached the configured ratio
    #[serde(rename_all = "camelCase")]
    Percent {
        set_id: ConceptId,
        direction: Direction,
        delta: u64,
        current_total: u64,
        /// `None` when the set has no current members
        ratio: Option<f64>,
        configured: f64,
        carried_out: bool,
    },
    /// Absolute change size reached the count threshold
    #[serde(rename_all = "camelCase")]
    Count {
        set_id: ConceptId,
        direction: Direction,
        count: u64,
        threshold: u64,
        carried_out: bool,
    },
}

impl fmt::Display for ThresholdWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdWarning::Percent {
                set_id,
                direction,
                delta,
                configured,
                carried_out,
                ..
            } => {
                write!(
                    f,
                    "Attempting to {} {} members for refset {} has exceeded the PERCENT threshold of {}.",
                    direction, delta, set_id, configured
                )?;
                if *carried_out {
                    f.write_str(" This action has been carried out, this is just a notification.")
                } else {
                    f.write_str(" This action HAS NOT been carried out.")
                }
            }
            ThresholdWarning::Count {
                set_id,
                direction,
                count,
                threshold,
                carried_out,
            } => {
                write!(
                    f,
                    "{} has exceeded the COUNT threshold of {} for refset {} while attempting to {} concepts.",
                    count, threshold, set_id, direction
                )?;
                if *carried_out {
                    f.write_str(" As the count threshold is ignored, this action HAS been carried out.")
                } else {
                    f.write_str(" This action HAS NOT been carried out.")
                }
            }
        }
    }
}

/// Ratio of `delta` to `current_total` when it is over `configured`.
///
/// Over iff `delta > 0` and either the set is empty or the ratio reaches the
/// configured value. Returns `Some(None)` for the empty-set case.
pub fn percent_breach(delta: u64, current_total: u64, configured: f64) -> Option<Option<f64>> {
    if delta == 0 {
        return None;
    }
    if current_total == 0 {
        return Some(None);
    }
    let ratio = delta as f64 / current_total as f64;
    (ratio >= configured).then_some(Some(ratio))
}

/// Appends breaches to the operator-facing threshold log
#[derive(Debug)]
pub struct ThresholdLog {
    path: Option<PathBuf>,
    lock: Mutex<()>,
}

impl ThresholdLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Write failures are logged, never propagated
    pub async fn append(&self, warning: &ThresholdWarning) {
        let Some(path) = &self.path else {
            return;
        };
        let _guard = self.lock.lock().await;
        let line = format!("### WARNING: {}\n", warning);
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to append to threshold log");
        }
    }
}

/// Outcome of checking one direction
#[derive(Debug, Default)]
pub struct GuardOutcome {
    pub warnings: Vec<ThresholdWarning>,
    /// Set when the direction must not be applied
    pub refused: Option<SetError>,
}

#[derive(Debug)]
pub struct ThresholdGuard {
    ratio: f64,
    policy: ThresholdPolicy,
    count_threshold: u64,
    ignore_count_threshold: bool,
    log: ThresholdLog,
}

impl ThresholdGuard {
    pub fn new(
        ratio: f64,
        policy: ThresholdPolicy,
        count_threshold: u64,
        ignore_count_threshold: bool,
        log: ThresholdLog,
    ) -> Self {
        Self {
            ratio,
            policy,
            count_threshold,
            ignore_count_threshold,
            log,
        }
    }

    pub fn from_config(config: &RefsetConfig) -> Self {
        Self::new(
            config.percent_change_threshold,
            config.threshold_policy,
            config.count_change_threshold,
            config.ignore_count_threshold,
            ThresholdLog::new(Some(config.threshold_log.clone())),
        )
    }

    pub async fn check(
        &self,
        set_id: &str,
        direction: Direction,
        delta: u64,
        current_total: u64,
    ) -> GuardOutcome {
        let mut outcome = GuardOutcome::default();

        if delta >= self.count_threshold && delta > 0 {
            let carried_out = self.ignore_count_threshold;
            let warning = ThresholdWarning::Count {
                set_id: set_id.to_string(),
                direction,
                count: delta,
                threshold: self.count_threshold,
                carried_out,
            };
            warn!(set_id, %direction, count = delta, threshold = self.count_threshold, carried_out, "Count threshold exceeded");
            self.log.append(&warning).await;
            outcome.warnings.push(warning);
            if !carried_out {
                outcome.refused = Some(SetError::CountThresholdExceeded {
                    direction,
                    count: delta,
                    threshold: self.count_threshold,
                });
                return outcome;
            }
        }

        match percent_breach(delta, current_total, self.ratio) {
            Some(ratio) => {
                let carried_out = self.policy == ThresholdPolicy::Warn;
                let warning = ThresholdWarning::Percent {
                    set_id: set_id.to_string(),
                    direction,
                    delta,
                    current_total,
                    ratio,
                    configured: self.ratio,
                    carried_out,
                };
                warn!(
                    set_id,
                    %direction,
                    delta,
                    current_total,
                    ratio = ratio.unwrap_or(f64::INFINITY),
                    configured = self.ratio,
                    "Percent threshold exceeded"
                );
                self.log.append(&warning).await;
                outcome.warnings.push(warning);
                if !carried_out {
                    outcome.refused = Some(SetError::ThresholdBlocked {
                        direction,
                        ratio: ratio.unwrap_or(f64::INFINITY),
                        configured: self.ratio,
                    });
                }
            }
            None => {
                info!(set_id, %direction, delta, current_total, "Within percent threshold");
            }
        }
        outcome
    }
}
