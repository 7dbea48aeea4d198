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

//! Referral codes and usage events.

use crate::base::AgentId;
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Commission calculation captured when a referral code is redeemed.
///
/// The snapshot is stored on the earning so later rate or tier changes
/// never alter historical records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CommissionSnapshot {
    pub base_amount: Decimal,
    pub agent_rate: Decimal,
    pub bonus_rate: Decimal,
    pub final_amount: Decimal,
}

impl CommissionSnapshot {
    /// Computes `final_amount = base_amount * (agent_rate + bonus_rate)`.
    pub fn compute(base_amount: Decimal, agent_rate: Decimal, bonus_rate: Decimal) -> Self {
        Self {
            base_amount,
            agent_rate,
            bonus_rate,
            final_amount: base_amount * (agent_rate + bonus_rate),
        }
    }
}

/// A referral code owned by an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferralCode {
    pub code: String,
    pub agent_id: AgentId,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// Maximum number of redemptions; `None` means unlimited.
    pub max_usages: Option<u32>,
    pub usage_count: u32,
}

impl ReferralCode {
    pub fn new(code: impl Into<String>, agent_id: AgentId) -> Self {
        Self {
            code: code.into(),
            agent_id,
            active: true,
            expires_at: None,
            max_usages: None,
            usage_count: 0,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_usage_limit(mut self, max_usages: u32) -> Self {
        self.max_usages = Some(max_usages);
        self
    }

    /// Checks that the code can be redeemed at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidCode`] when the code is deactivated,
    /// expired, or has reached its usage limit.
    pub fn check_usable(&self, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if !self.active {
            return Err(LedgerError::InvalidCode(format!(
                "code '{}' is inactive",
                self.code
            )));
        }
        if let Some(expires_at) = self.expires_at
            && now >= expires_at
        {
            return Err(LedgerError::InvalidCode(format!(
                "code '{}' expired at {}",
                self.code, expires_at
            )));
        }
        if let Some(max) = self.max_usages
            && self.usage_count >= max
        {
            return Err(LedgerError::InvalidCode(format!(
                "code '{}' reached its usage limit of {}",
                self.code, max
            )));
        }
        Ok(())
    }
}

/// An inbound "referral code used" event.
///
/// Delivered at-least-once by upstream systems; `reference_id` is the
/// deduplication key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferralUsage {
    pub reference_id: String,
    /// Transaction amount the commission is computed from.
    pub base_amount: Decimal,
    pub referred_user_name: Option<String>,
    pub referred_user_email: Option<String>,
    pub referred_user_phone: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ReferralUsage {
    /// Best display identity of the referred customer.
    pub fn referred_user(&self) -> Option<String> {
        self.referred_user_name
            .clone()
            .or_else(|| self.referred_user_email.clone())
            .or_else(|| self.referred_user_phone.clone())
    }
}
