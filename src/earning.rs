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

//! Commission earning records.
//!
//! Earnings follow a state machine:
//! - [`Pending`] → [`Confirmed`] (credits the available balance)
//! - [`Pending`] → [`Cancelled`] (removed from the pending balance)
//!
//! Both terminal states are final; a finalized earning is immutable.
//!
//! [`Pending`]: EarningStatus::Pending
//! [`Confirmed`]: EarningStatus::Confirmed
//! [`Cancelled`]: EarningStatus::Cancelled

use crate::base::{AgentId, EarningId};
use crate::referral::CommissionSnapshot;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Classification of an earning event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EarningType {
    /// Commission from a redeemed referral code.
    ReferralCommission,
    /// Manual bonus credited by an admin.
    Bonus,
    /// Manual deduction (negative amount) applied by an admin.
    Penalty,
    /// Balance correction.
    Adjustment,
    /// Promotional campaign bonus.
    PromotionBonus,
}

/// Lifecycle state of an earning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EarningStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl EarningStatus {
    /// Whether the earning can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Cancelled)
    }
}

/// A ledger event representing commission owed to an agent.
///
/// The `amount` is signed: referral commissions and bonuses are strictly
/// positive, penalties carry a negative amount. `reference_id` is the
/// caller-supplied idempotency key; replaying the same reference never
/// creates a second earning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Earning {
    pub id: EarningId,
    pub agent_id: AgentId,
    pub amount: Decimal,
    pub earning_type: EarningType,
    pub status: EarningStatus,
    pub reference_id: String,
    pub earned_at: DateTime<Utc>,
    /// Referral code that produced this earning, when applicable.
    pub referral_code: Option<String>,
    /// Display name of the referred customer, when applicable.
    pub referred_user: Option<String>,
    /// Commission calculation captured at redemption time.
    pub commission: Option<CommissionSnapshot>,
    /// Reason supplied when the earning was cancelled.
    pub cancel_reason: Option<String>,
}
