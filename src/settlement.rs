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

//! Payout settlement service.
//!
//! Drives the payout state machine declared in [`crate::payout`]. Every
//! transition locks the payout document, checks the current state against
//! the transition table, performs the balance effect through the ledger
//! store, and only then mutates the document. A transition attempted from
//! the wrong state fails with [`LedgerError::InvalidStateTransition`]
//! instead of silently succeeding, which is what protects against
//! double-processing by concurrent admin actions.
//!
//! Lock order is always payout document → agent balance, never the
//! reverse.

use crate::base::{AgentId, PayoutId};
use crate::error::LedgerError;
use crate::ledger::LedgerStore;
use crate::payout::{PaymentDetails, Payout, PayoutStatus};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

/// Governs the lifecycle of payout requests against agent balances.
pub struct PayoutService {
    ledger: Arc<LedgerStore>,
}

impl PayoutService {
    pub fn new(ledger: Arc<LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Creates a payout request, reserving the amount from the agent's
    /// available balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidPaymentDetails`] - details fail the
    ///   method-specific shape check.
    /// - [`LedgerError::BelowMinimumPayout`] / [`LedgerError::InsufficientFunds`]
    /// - [`LedgerError::AgentNotActive`] - only active agents may request
    ///   payouts.
    pub fn request(
        &self,
        agent_id: AgentId,
        amount: Decimal,
        details: PaymentDetails,
    ) -> Result<Payout, LedgerError> {
        details.validate()?;

        let payout_id = self.ledger.allocate_payout_id();
        self.ledger.reserve_for_payout(agent_id, payout_id, amount)?;

        let payout = Payout::new(payout_id, agent_id, amount, details, Utc::now());
        self.ledger.insert_payout(payout.clone());
        info!(
            payout = %payout_id,
            agent = %agent_id,
            amount = %amount,
            method = %payout.method,
            "payout requested"
        );
        Ok(payout)
    }

    /// `requested → pending_review`; the admin needs more information
    /// before deciding.
    pub fn set_to_review(
        &self,
        payout_id: PayoutId,
        review_message: impl Into<String>,
    ) -> Result<Payout, LedgerError> {
        self.transition(payout_id, "review", |payout| {
            Self::guard(payout, PayoutStatus::PendingReview, "review")?;
            payout.status = PayoutStatus::PendingReview;
            payout.reviewed_at = Some(Utc::now());
            payout.review_message = Some(review_message.into());
            Ok(())
        })
    }

    /// `requested|pending_review → approved`. No balance effect; the funds
    /// were reserved at request time.
    pub fn approve(
        &self,
        payout_id: PayoutId,
        notes: Option<String>,
    ) -> Result<Payout, LedgerError> {
        self.transition(payout_id, "approve", |payout| {
            Self::guard(payout, PayoutStatus::Approved, "approve")?;
            payout.status = PayoutStatus::Approved;
            payout.approved_at = Some(Utc::now());
            if notes.is_some() {
                payout.admin_notes = notes;
            }
            Ok(())
        })
    }

    /// `requested|pending_review → rejected`; releases the reservation
    /// back to the available balance.
    pub fn reject(
        &self,
        payout_id: PayoutId,
        reason: impl Into<String>,
        notes: Option<String>,
    ) -> Result<Payout, LedgerError> {
        let ledger = &self.ledger;
        self.transition(payout_id, "reject", |payout| {
            Self::guard(payout, PayoutStatus::Rejected, "reject")?;
            ledger.release_reservation(payout.agent_id, payout.id)?;
            payout.status = PayoutStatus::Rejected;
            payout.rejected_at = Some(Utc::now());
            payout.rejection_reason = Some(reason.into());
            if notes.is_some() {
                payout.admin_notes = notes;
            }
            Ok(())
        })
    }

    /// `approved → processing`; flags that the external payment workflow
    /// has been initiated. No balance effect and nothing is awaited.
    pub fn process(
        &self,
        payout_id: PayoutId,
        notes: Option<String>,
    ) -> Result<Payout, LedgerError> {
        self.transition(payout_id, "process", |payout| {
            Self::guard(payout, PayoutStatus::Processing, "process")?;
            payout.status = PayoutStatus::Processing;
            payout.processed_at = Some(Utc::now());
            if notes.is_some() {
                payout.admin_notes = notes;
            }
            Ok(())
        })
    }

    /// `processing → completed`; settles the reservation.
    ///
    /// `net_amount` is recomputed here as `amount - fees`, never trusted
    /// from earlier caller input. Replaying a completion with the same
    /// `transaction_id` is a success no-op; with a different one, a
    /// conflict.
    pub fn complete(
        &self,
        payout_id: PayoutId,
        transaction_id: impl Into<String>,
        fees: Option<Decimal>,
        notes: Option<String>,
    ) -> Result<Payout, LedgerError> {
        let transaction_id = transaction_id.into();
        let ledger = &self.ledger;
        self.transition(payout_id, "complete", |payout| {
            if payout.status == PayoutStatus::Completed {
                if payout.transaction_id.as_deref() == Some(transaction_id.as_str()) {
                    // At-least-once delivery replay of the same settlement.
                    return Ok(());
                }
                return Err(LedgerError::InvalidStateTransition {
                    from: payout.status,
                    action: "complete",
                });
            }
            Self::guard(payout, PayoutStatus::Completed, "complete")?;

            let fees = fees.unwrap_or(Decimal::ZERO);
            let net = ledger.settle_reservation(payout.agent_id, payout.id, fees)?;
            payout.status = PayoutStatus::Completed;
            payout.completed_at = Some(Utc::now());
            payout.fees = fees;
            payout.net_amount = net;
            payout.transaction_id = Some(transaction_id.clone());
            if notes.is_some() {
                payout.admin_notes = notes;
            }
            Ok(())
        })
    }

    /// Agent-initiated cancellation, allowed only before processing
    /// starts; releases the reservation.
    pub fn cancel(&self, payout_id: PayoutId) -> Result<Payout, LedgerError> {
        let ledger = &self.ledger;
        self.transition(payout_id, "cancel", |payout| {
            Self::guard(payout, PayoutStatus::Cancelled, "cancel")?;
            ledger.release_reservation(payout.agent_id, payout.id)?;
            payout.status = PayoutStatus::Cancelled;
            payout.cancelled_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Current state of a payout document.
    pub fn get(&self, payout_id: PayoutId) -> Result<Payout, LedgerError> {
        self.ledger
            .get_payout(payout_id)
            .ok_or(LedgerError::PayoutNotFound(payout_id))
    }

    fn guard(payout: &Payout, next: PayoutStatus, action: &'static str) -> Result<(), LedgerError> {
        if !payout.status.can_transition(next) {
            return Err(LedgerError::InvalidStateTransition {
                from: payout.status,
                action,
            });
        }
        Ok(())
    }

    /// Runs one atomic transition under the payout document's lock.
    fn transition<F>(
        &self,
        payout_id: PayoutId,
        action: &'static str,
        apply: F,
    ) -> Result<Payout, LedgerError>
    where
        F: FnOnce(&mut Payout) -> Result<(), LedgerError>,
    {
        let entry = self
            .ledger
            .payout_entry(payout_id)
            .ok_or(LedgerError::PayoutNotFound(payout_id))?;
        let mut payout = entry.lock();
        let from = payout.status;
        apply(&mut payout)?;
        info!(
            payout = %payout_id,
            agent = %payout.agent_id,
            from = %from,
            to = %payout.status,
            "payout {action}"
        );
        Ok(payout.clone())
    }
}
