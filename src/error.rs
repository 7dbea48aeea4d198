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

//! Error types for ledger and payout operations.

use crate::agent::AgentStatus;
use crate::base::{AgentId, EarningId, PayoutId};
use crate::payout::PayoutStatus;
use rust_decimal::Decimal;
use thiserror::Error;

/// Ledger and payout processing errors.
///
/// Every ledger-mutating operation fails closed: when one of these is
/// returned, no partial balance change is visible.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is zero, or negative where a positive amount is required
    #[error("invalid amount")]
    InvalidAmount,

    /// Payout amount is below the configured minimum
    #[error("payout amount {amount} is below the minimum {minimum}")]
    BelowMinimumPayout { amount: Decimal, minimum: Decimal },

    /// Requested amount exceeds the available balance
    #[error("insufficient available funds (requested {requested}, available {available})")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },

    /// Referenced agent does not exist
    #[error("agent {0} not found")]
    AgentNotFound(AgentId),

    /// Agent id is already registered
    #[error("agent {0} already registered")]
    DuplicateAgent(AgentId),

    /// Operation requires an active agent
    #[error("agent {0} is not active")]
    AgentNotActive(AgentId),

    /// Agent status change not allowed by the lifecycle
    #[error("agent status cannot change from {from} to {to}")]
    InvalidAgentTransition { from: AgentStatus, to: AgentStatus },

    /// Referenced earning does not exist
    #[error("earning {0} not found")]
    EarningNotFound(EarningId),

    /// Earning is already confirmed or cancelled
    #[error("earning {0} is already finalized")]
    AlreadyFinalized(EarningId),

    /// Referenced payout does not exist
    #[error("payout {0} not found")]
    PayoutNotFound(PayoutId),

    /// External reference id was already processed
    #[error("reference '{0}' was already processed")]
    DuplicateReference(String),

    /// Referral code inactive, expired, exhausted, or owned by an inactive agent
    #[error("referral code rejected: {0}")]
    InvalidCode(String),

    /// Transition attempted from a state that does not allow it
    #[error("cannot {action} a payout in the {from} state")]
    InvalidStateTransition {
        from: PayoutStatus,
        action: &'static str,
    },

    /// Payment details do not match the payout method's required shape
    #[error("invalid payment details: {0}")]
    InvalidPaymentDetails(String),

    /// Reserved funds were already consumed by a completed payout
    #[error("reservation for payout {0} is already settled")]
    ReservationSettled(PayoutId),

    /// Reserved funds were already returned to the available balance
    #[error("reservation for payout {0} was already released")]
    ReservationReleased(PayoutId),

    /// No reservation exists for the payout
    #[error("no reservation found for payout {0}")]
    ReservationNotFound(PayoutId),
}
