//! Run reporting: the sole user-visible surface of a run.
//!
//! A run with some accounts failed is a partial success, not an overall
//! failure; only an unusable bundle fails the run itself, and that happens
//! before any report exists.

use crate::bundle::{AccountId, BundleRef};
use crate::error::RvmError;
use crate::plan::OperationKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
    Skipped,
    TimedOut,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
            Outcome::Skipped => "skipped",
            Outcome::TimedOut => "timed_out",
        }
    }

    /// Map a per-account error to its reported outcome.
    ///
    /// `AccessDenied` is a benign skip (the account opted out of trust);
    /// `Unauthorized` is an unexpected skip; transient errors that survived
    /// the bounded retry budget count as failures.
    pub fn from_error(err: &RvmError) -> Outcome {
        match err {
            RvmError::AccessDenied { .. } | RvmError::Unauthorized { .. } => Outcome::Skipped,
            RvmError::TimedOut(_) => Outcome::TimedOut,
            _ => Outcome::Failed,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OperationResult
// ---------------------------------------------------------------------------

/// The result of processing one account within one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub account_id: AccountId,
    pub kind: OperationKind,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(
        serialize_with = "serialize_duration_ms",
        deserialize_with = "deserialize_duration_ms"
    )]
    pub duration: Duration,
}

fn serialize_duration_ms<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_u64(d.as_millis() as u64)
}

fn deserialize_duration_ms<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let ms = u64::deserialize(d)?;
    Ok(Duration::from_millis(ms))
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

/// Aggregate of all per-account results for one bundle application. Owned by
/// the orchestrator for the duration of one run; the core holds no state
/// between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub bundle: BundleRef,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<OperationResult>,
}

impl RunReport {
    pub fn new(bundle: BundleRef) -> Self {
        let now = Utc::now();
        RunReport {
            run_id: Uuid::new_v4(),
            bundle,
            started_at: now,
            finished_at: now,
            results: Vec::new(),
        }
    }

    pub fn push(&mut self, result: OperationResult) {
        self.results.push(result);
    }

    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(Outcome::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(Outcome::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(Outcome::Skipped)
    }

    pub fn timed_out(&self) -> usize {
        self.count(Outcome::TimedOut)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
