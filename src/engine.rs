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

//! The earning engine.
//!
//! Turns referral-usage events into pending commission earnings and drives
//! their terminal transitions. The engine owns the referral-code registry;
//! balances live in the shared [`LedgerStore`].
//!
//! # Idempotency
//!
//! Usage events arrive at least once. Each event carries a reference id;
//! replaying an already-processed reference fails with
//! [`LedgerError::DuplicateReference`] and creates nothing. Callers
//! treating replays as success can fetch the original record with
//! [`LedgerStore::earning_by_reference`].

use crate::base::{AgentId, EarningId};
use crate::earning::{Earning, EarningType};
use crate::error::LedgerError;
use crate::ledger::{EarningDraft, LedgerStore};
use crate::referral::{CommissionSnapshot, ReferralCode, ReferralUsage};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

/// Converts referral-code usage events into commission earnings.
pub struct EarningEngine {
    ledger: Arc<LedgerStore>,
    /// Referral codes indexed by code string. Each code carries its own
    /// mutex so usage counting is race-free per code.
    codes: DashMap<String, Mutex<ReferralCode>>,
}

impl EarningEngine {
    pub fn new(ledger: Arc<LedgerStore>) -> Self {
        Self {
            ledger,
            codes: DashMap::new(),
        }
    }

    // === Code registry ===

    /// Registers a referral code for an existing agent.
    pub fn register_code(&self, code: ReferralCode) -> Result<(), LedgerError> {
        if self.ledger.get_agent(&code.agent_id).is_none() {
            return Err(LedgerError::AgentNotFound(code.agent_id));
        }
        match self.codes.entry(code.code.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(LedgerError::InvalidCode(format!(
                "code '{}' is already registered",
                code.code
            ))),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Mutex::new(code));
                Ok(())
            }
        }
    }

    /// Deactivates a code; further usage events are rejected.
    pub fn deactivate_code(&self, code: &str) -> Result<(), LedgerError> {
        let entry = self
            .codes
            .get(code)
            .ok_or_else(|| LedgerError::InvalidCode(format!("unknown code '{code}'")))?;
        entry.lock().active = false;
        Ok(())
    }

    /// Current state of a registered code.
    pub fn get_code(&self, code: &str) -> Option<ReferralCode> {
        self.codes.get(code).map(|entry| entry.lock().clone())
    }

    // === Usage events ===

    /// Records a referral-code usage event as a pending earning.
    ///
    /// Validates the code (active, unexpired, unexhausted), computes the
    /// commission snapshot from the owning agent's rate and tier bonus,
    /// credits the agent's pending balance, and increments the code's
    /// usage count. The whole operation holds the code's lock so the
    /// usage limit cannot be overrun by concurrent deliveries.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidCode`] - unknown, inactive, expired, or
    ///   exhausted code.
    /// - [`LedgerError::DuplicateReference`] - event already processed.
    /// - [`LedgerError::AgentNotActive`] - owning agent is suspended or
    ///   not yet onboarded.
    pub fn record_usage(&self, code: &str, usage: ReferralUsage) -> Result<Earning, LedgerError> {
        let entry = self
            .codes
            .get(code)
            .ok_or_else(|| LedgerError::InvalidCode(format!("unknown code '{code}'")))?;
        let mut referral = entry.lock();
        referral.check_usable(usage.occurred_at)?;

        if usage.base_amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let agent = self.ledger.snapshot(referral.agent_id)?;
        let commission = CommissionSnapshot::compute(
            usage.base_amount,
            agent.commission_rate,
            agent.tier.bonus_rate(),
        );

        let earning = self.ledger.record_earning(EarningDraft {
            agent_id: referral.agent_id,
            amount: commission.final_amount,
            earning_type: EarningType::ReferralCommission,
            reference_id: usage.reference_id.clone(),
            earned_at: usage.occurred_at,
            referral_code: Some(referral.code.clone()),
            referred_user: usage.referred_user(),
            commission: Some(commission),
        })?;

        referral.usage_count += 1;
        info!(
            agent = %earning.agent_id,
            earning = %earning.id,
            code = %referral.code,
            amount = %earning.amount,
            reference = %earning.reference_id,
            "referral usage recorded"
        );
        Ok(earning)
    }

    /// Records a manual admin earning (bonus, penalty, adjustment).
    ///
    /// Penalties must carry a negative amount, the other types a positive
    /// one. Same pending lifecycle and reference-id idempotency as
    /// referral commissions.
    pub fn record_adjustment(
        &self,
        agent_id: AgentId,
        amount: Decimal,
        earning_type: EarningType,
        reference_id: impl Into<String>,
    ) -> Result<Earning, LedgerError> {
        let sign_ok = match earning_type {
            EarningType::Penalty => amount < Decimal::ZERO,
            EarningType::ReferralCommission => false,
            _ => amount > Decimal::ZERO,
        };
        if !sign_ok {
            return Err(LedgerError::InvalidAmount);
        }

        let earning = self.ledger.record_earning(EarningDraft {
            agent_id,
            amount,
            earning_type,
            reference_id: reference_id.into(),
            earned_at: Utc::now(),
            referral_code: None,
            referred_user: None,
            commission: None,
        })?;
        info!(
            agent = %agent_id,
            earning = %earning.id,
            amount = %amount,
            "manual earning recorded"
        );
        Ok(earning)
    }

    // === Terminal transitions ===

    /// Confirms a pending earning, moving its amount to the available
    /// balance. Fails with [`LedgerError::AlreadyFinalized`] on a terminal
    /// earning; retrying callers can safely ignore that error.
    pub fn confirm(&self, earning_id: EarningId) -> Result<Earning, LedgerError> {
        let earning = self.ledger.confirm_earning(earning_id)?;
        info!(
            agent = %earning.agent_id,
            earning = %earning.id,
            amount = %earning.amount,
            "earning confirmed"
        );
        Ok(earning)
    }

    /// Cancels a pending earning with no effect on the available balance.
    pub fn cancel(
        &self,
        earning_id: EarningId,
        reason: impl Into<String>,
    ) -> Result<Earning, LedgerError> {
        let earning = self.ledger.cancel_earning(earning_id, Some(reason.into()))?;
        info!(
            agent = %earning.agent_id,
            earning = %earning.id,
            reason = earning.cancel_reason.as_deref().unwrap_or(""),
            "earning cancelled"
        );
        Ok(earning)
    }
}
