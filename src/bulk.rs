// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Bulk admin actions over payout batches.
//!
//! Applies one state transition to a list of payout ids with per-item
//! isolation: a failure on one item is captured in the outcome and does
//! not abort or roll back the remaining items. The coordinator holds no
//! lock of its own; the state machine's current-state guard is what
//! prevents corruption when bulk and single-item actions race.

use crate::base::PayoutId;
use crate::error::LedgerError;
use crate::settlement::PayoutService;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tracing::info;

/// The transition a bulk request applies to every item.
#[derive(Debug, Clone)]
pub enum BulkAction {
    Approve {
        notes: Option<String>,
    },
    Reject {
        reason: String,
        notes: Option<String>,
    },
    Process {
        notes: Option<String>,
    },
    /// Bulk completion against one settlement batch on the payment rail.
    /// Per-item settlement references are derived as
    /// `{batch_reference}/{payout_id}` so a replayed batch stays
    /// idempotent item by item.
    Complete {
        batch_reference: String,
    },
}

impl BulkAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
            Self::Process { .. } => "process",
            Self::Complete { .. } => "complete",
        }
    }
}

fn serialize_error<S>(error: &LedgerError, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&error.to_string())
}

/// One failed item in a bulk outcome.
#[derive(Debug, Clone, Serialize)]
pub struct BulkError {
    pub payout_id: PayoutId,
    #[serde(serialize_with = "serialize_error")]
    pub error: LedgerError,
}

/// Aggregate report of a bulk action.
///
/// `errors` preserves the order of the failed items in the input list.
#[derive(Debug, Clone, Serialize, Default)]
pub struct BulkOutcome {
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<BulkError>,
}

/// Applies a transition to a batch of payouts, isolating per-item
/// failures. Items are processed sequentially in input order; failed
/// items are not retried.
pub struct BulkCoordinator {
    service: Arc<PayoutService>,
}

impl BulkCoordinator {
    pub fn new(service: Arc<PayoutService>) -> Self {
        Self { service }
    }

    pub fn bulk_process(&self, payout_ids: &[PayoutId], action: BulkAction) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();

        for &payout_id in payout_ids {
            let result = match &action {
                BulkAction::Approve { notes } => {
                    self.service.approve(payout_id, notes.clone()).map(|_| ())
                }
                BulkAction::Reject { reason, notes } => self
                    .service
                    .reject(payout_id, reason.clone(), notes.clone())
                    .map(|_| ()),
                BulkAction::Process { notes } => {
                    self.service.process(payout_id, notes.clone()).map(|_| ())
                }
                BulkAction::Complete { batch_reference } => self
                    .service
                    .complete(
                        payout_id,
                        format!("{batch_reference}/{payout_id}"),
                        None,
                        None,
                    )
                    .map(|_| ()),
            };

            match result {
                Ok(()) => outcome.success += 1,
                Err(error) => {
                    outcome.failed += 1;
                    outcome.errors.push(BulkError { payout_id, error });
                }
            }
        }

        info!(
            action = action.name(),
            items = payout_ids.len(),
            success = outcome.success,
            failed = outcome.failed,
            "bulk action finished"
        );
        outcome
    }
}
