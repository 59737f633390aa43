//! Processing lifecycle shared by tagging and embedding.
//!
//! A status only moves forward:
//!
//! ```text
//! pending ──► processing ──► completed
//!    │            │   ▲  ──► failed
//!    │            └───┘  ──► skipped
//!    └──────────────────────► failed | skipped
//! ```
//!
//! `processing -> processing` is the re-claim taken by a redelivered message.
//! Terminal states have no outgoing edges.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::{ServiceError, ServiceResult};

/// Lifecycle of an asynchronous document processing step
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProcessingStatus {
    /// Uploaded, waiting for a worker
    Pending,
    /// Claimed by a worker
    Processing,
    /// Worker finished successfully
    Completed,
    /// Worker gave up; see the stored error
    Failed,
    /// Content type is not processed
    Skipped,
}

impl ProcessingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::Completed | ProcessingStatus::Failed | ProcessingStatus::Skipped
        )
    }

    /// The allowed-transition table.
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;

        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Pending, Skipped)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Skipped)
        )
    }

    /// Validate a transition, returning the target status.
    pub fn transition(&self, next: ProcessingStatus) -> ServiceResult<ProcessingStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ServiceError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }
}
