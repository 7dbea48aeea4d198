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

//! Agent balance state.
//!
//! Each agent carries three monetary fields bound by the ledger identity
//! `total_earnings == available + pending + completed_net`, where
//! `completed_net` is the sum of net amounts of completed payouts. Every
//! balance-affecting operation runs under the agent's mutex and either
//! commits fully or leaves all fields untouched.
//!
//! # Example
//!
//! ```
//! use referral_ledger_rs::{Agent, AgentId, AgentTier};
//! use rust_decimal_macros::dec;
//!
//! let agent = Agent::new(AgentId(1), dec!(0.05), AgentTier::Silver);
//! assert_eq!(agent.available(), dec!(0.00));
//! ```

use crate::base::{AgentId, EarningId, PayoutId};
use crate::earning::EarningStatus;
use crate::error::LedgerError;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

/// Agent onboarding and standing lifecycle.
///
/// `pending_application → application_approved → code_generated →
/// credentials_sent → active ⇄ suspended`. Agents are never deleted.
#[derive(Debug, Clone, Copy, serde::Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    PendingApplication,
    ApplicationApproved,
    CodeGenerated,
    CredentialsSent,
    Active,
    Suspended,
}

impl AgentStatus {
    /// The lifecycle transition table.
    pub fn can_transition(self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        matches!(
            (self, next),
            (PendingApplication, ApplicationApproved)
                | (ApplicationApproved, CodeGenerated)
                | (CodeGenerated, CredentialsSent)
                | (CredentialsSent, Active)
                | (Active, Suspended)
                | (Suspended, Active)
        )
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PendingApplication => "pending_application",
            Self::ApplicationApproved => "application_approved",
            Self::CodeGenerated => "code_generated",
            Self::CredentialsSent => "credentials_sent",
            Self::Active => "active",
            Self::Suspended => "suspended",
        };
        write!(f, "{name}")
    }
}

/// Agent classification affecting the bonus commission rate.
///
/// The ledger reads the tier but never mutates it.
#[derive(Debug, Clone, Copy, serde::Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl AgentTier {
    /// Bonus rate added to the agent's own commission rate.
    pub fn bonus_rate(self) -> Decimal {
        match self {
            Self::Bronze => Decimal::ZERO,
            Self::Silver => Decimal::new(5, 3),    // 0.5%
            Self::Gold => Decimal::new(10, 3),     // 1.0%
            Self::Platinum => Decimal::new(20, 3), // 2.0%
        }
    }
}

/// State of the funds reserved for one payout.
//
//  Held ──release──► Released          (rejection / cancellation)
//   │
//   └──settle───► Settled              (completion, irreversible)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReservationStatus {
    Held,
    Released,
    Settled,
}

/// Funds provisionally debited from the available balance for a payout.
#[derive(Debug, Clone)]
struct Reservation {
    amount: Decimal,
    status: ReservationStatus,
}

/// Tracks a pending earning's amount and status for finalization.
#[derive(Debug, Clone)]
struct EarningSlot {
    amount: Decimal,
    status: EarningStatus,
}

#[derive(Debug)]
struct AgentData {
    agent_id: AgentId,
    status: AgentStatus,
    tier: AgentTier,
    commission_rate: Decimal,
    available: Decimal,
    pending: Decimal,
    total_earnings: Decimal,
    /// Sum of net amounts of completed payouts.
    completed_net: Decimal,
    /// Bumped on every balance-affecting mutation.
    version: u64,
    /// Earnings indexed by id for confirm/cancel lookup.
    earnings: HashMap<EarningId, EarningSlot>,
    /// Reservations indexed by the payout that holds them.
    reservations: HashMap<PayoutId, Reservation>,
}

impl AgentData {
    fn new(agent_id: AgentId, commission_rate: Decimal, tier: AgentTier) -> Self {
        Self {
            agent_id,
            status: AgentStatus::ApplicationApproved,
            tier,
            commission_rate,
            available: Decimal::ZERO,
            pending: Decimal::ZERO,
            total_earnings: Decimal::ZERO,
            completed_net: Decimal::ZERO,
            version: 0,
            earnings: HashMap::new(),
            reservations: HashMap::new(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.available >= Decimal::ZERO,
            "Invariant violated: available balance went negative: {}",
            self.available
        );
        debug_assert!(
            self.pending >= Decimal::ZERO,
            "Invariant violated: pending balance went negative: {}",
            self.pending
        );
        let held: Decimal = self
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Held)
            .map(|r| r.amount)
            .sum();
        debug_assert_eq!(
            self.total_earnings,
            self.available + self.pending + self.completed_net + held,
            "Invariant violated: total_earnings out of balance"
        );
    }

    fn require_active(&self) -> Result<(), LedgerError> {
        if self.status != AgentStatus::Active {
            return Err(LedgerError::AgentNotActive(self.agent_id));
        }
        Ok(())
    }

    /// Credits a new pending earning.
    fn credit_pending(&mut self, earning_id: EarningId, amount: Decimal) -> Result<(), LedgerError> {
        if amount == Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        self.require_active()?;
        if self.pending + amount < Decimal::ZERO {
            return Err(LedgerError::InsufficientFunds {
                requested: -amount,
                available: self.pending,
            });
        }
        self.pending += amount;
        self.total_earnings += amount;
        self.earnings.insert(
            earning_id,
            EarningSlot {
                amount,
                status: EarningStatus::Pending,
            },
        );
        self.version += 1;
        self.assert_invariants();
        Ok(())
    }

    /// Moves a pending earning's amount into the available balance.
    fn confirm_earning(&mut self, earning_id: EarningId) -> Result<Decimal, LedgerError> {
        let slot = self
            .earnings
            .get(&earning_id)
            .ok_or(LedgerError::EarningNotFound(earning_id))?;
        if slot.status.is_terminal() {
            return Err(LedgerError::AlreadyFinalized(earning_id));
        }
        self.require_active()?;

        let amount = slot.amount;
        // Negative amounts (penalties) debit available and must not overdraw.
        if self.available + amount < Decimal::ZERO {
            return Err(LedgerError::InsufficientFunds {
                requested: -amount,
                available: self.available,
            });
        }
        self.pending -= amount;
        self.available += amount;
        self.earnings.get_mut(&earning_id).unwrap().status = EarningStatus::Confirmed;
        self.version += 1;
        self.assert_invariants();
        Ok(amount)
    }

    /// Removes a pending earning with no effect on the available balance.
    fn cancel_earning(&mut self, earning_id: EarningId) -> Result<Decimal, LedgerError> {
        let slot = self
            .earnings
            .get(&earning_id)
            .ok_or(LedgerError::EarningNotFound(earning_id))?;
        if slot.status.is_terminal() {
            return Err(LedgerError::AlreadyFinalized(earning_id));
        }

        let amount = slot.amount;
        self.pending -= amount;
        self.total_earnings -= amount;
        self.earnings.get_mut(&earning_id).unwrap().status = EarningStatus::Cancelled;
        self.version += 1;
        self.assert_invariants();
        Ok(amount)
    }

    /// Debits the available balance and records a held reservation.
    ///
    /// A retried call for an already-held payout is a no-op.
    fn reserve(
        &mut self,
        payout_id: PayoutId,
        amount: Decimal,
        minimum: Decimal,
    ) -> Result<(), LedgerError> {
        if let Some(reservation) = self.reservations.get(&payout_id) {
            return match reservation.status {
                ReservationStatus::Held => Ok(()),
                ReservationStatus::Released => Err(LedgerError::ReservationReleased(payout_id)),
                ReservationStatus::Settled => Err(LedgerError::ReservationSettled(payout_id)),
            };
        }
        self.require_active()?;
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if amount < minimum {
            return Err(LedgerError::BelowMinimumPayout { amount, minimum });
        }
        if self.available < amount {
            return Err(LedgerError::InsufficientFunds {
                requested: amount,
                available: self.available,
            });
        }
        self.available -= amount;
        self.reservations.insert(
            payout_id,
            Reservation {
                amount,
                status: ReservationStatus::Held,
            },
        );
        self.version += 1;
        self.assert_invariants();
        Ok(())
    }

    /// Returns reserved funds to the available balance.
    ///
    /// Idempotent: releasing an already-released reservation reports
    /// `Ok(false)` and changes nothing.
    fn release(&mut self, payout_id: PayoutId) -> Result<bool, LedgerError> {
        let reservation = self
            .reservations
            .get_mut(&payout_id)
            .ok_or(LedgerError::ReservationNotFound(payout_id))?;
        match reservation.status {
            ReservationStatus::Held => {
                reservation.status = ReservationStatus::Released;
                let amount = reservation.amount;
                self.available += amount;
                self.version += 1;
                self.assert_invariants();
                Ok(true)
            }
            ReservationStatus::Released => Ok(false),
            ReservationStatus::Settled => Err(LedgerError::ReservationSettled(payout_id)),
        }
    }

    /// Consumes reserved funds for a completed payout. Irreversible.
    ///
    /// The net amount (`amount - fees`) is added to the completed total;
    /// the fee remainder returns to the available balance so the ledger
    /// identity holds. Replaying a settle is a no-op.
    fn settle(&mut self, payout_id: PayoutId, fees: Decimal) -> Result<Decimal, LedgerError> {
        let reservation = self
            .reservations
            .get_mut(&payout_id)
            .ok_or(LedgerError::ReservationNotFound(payout_id))?;
        if fees < Decimal::ZERO || fees > reservation.amount {
            return Err(LedgerError::InvalidAmount);
        }
        let net = reservation.amount - fees;
        match reservation.status {
            ReservationStatus::Held => {
                reservation.status = ReservationStatus::Settled;
                self.completed_net += net;
                self.available += fees;
                self.version += 1;
                self.assert_invariants();
                Ok(net)
            }
            ReservationStatus::Settled => Ok(net),
            ReservationStatus::Released => Err(LedgerError::ReservationReleased(payout_id)),
        }
    }

    fn set_status(&mut self, next: AgentStatus) -> Result<(), LedgerError> {
        if !self.status.can_transition(next) {
            return Err(LedgerError::InvalidAgentTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// A referral-program participant's ledger account.
pub struct Agent {
    inner: Mutex<AgentData>,
}

impl Agent {
    const DECIMAL_PRECISION: u32 = 2;

    /// Creates an agent in `application_approved`, the state agents are
    /// registered in when an admin approves their application.
    pub fn new(agent_id: AgentId, commission_rate: Decimal, tier: AgentTier) -> Self {
        Self {
            inner: Mutex::new(AgentData::new(agent_id, commission_rate, tier)),
        }
    }

    pub fn id(&self) -> AgentId {
        self.inner.lock().agent_id
    }

    pub fn available(&self) -> Decimal {
        self.inner.lock().available
    }

    pub fn pending(&self) -> Decimal {
        self.inner.lock().pending
    }

    pub fn total_earnings(&self) -> Decimal {
        self.inner.lock().total_earnings
    }

    /// Sum of net amounts of completed payouts.
    pub fn completed_net(&self) -> Decimal {
        self.inner.lock().completed_net
    }

    pub fn status(&self) -> AgentStatus {
        self.inner.lock().status
    }

    pub fn tier(&self) -> AgentTier {
        self.inner.lock().tier
    }

    pub fn commission_rate(&self) -> Decimal {
        self.inner.lock().commission_rate
    }

    /// Commission rate plus the tier bonus.
    pub fn effective_rate(&self) -> Decimal {
        let data = self.inner.lock();
        data.commission_rate + data.tier.bonus_rate()
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    pub fn set_status(&self, next: AgentStatus) -> Result<(), LedgerError> {
        self.inner.lock().set_status(next)
    }

    pub fn credit_pending(
        &self,
        earning_id: EarningId,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        self.inner.lock().credit_pending(earning_id, amount)
    }

    pub fn confirm_earning(&self, earning_id: EarningId) -> Result<Decimal, LedgerError> {
        self.inner.lock().confirm_earning(earning_id)
    }

    pub fn cancel_earning(&self, earning_id: EarningId) -> Result<Decimal, LedgerError> {
        self.inner.lock().cancel_earning(earning_id)
    }

    pub fn reserve(
        &self,
        payout_id: PayoutId,
        amount: Decimal,
        minimum: Decimal,
    ) -> Result<(), LedgerError> {
        self.inner.lock().reserve(payout_id, amount, minimum)
    }

    pub fn release(&self, payout_id: PayoutId) -> Result<bool, LedgerError> {
        self.inner.lock().release(payout_id)
    }

    pub fn settle(&self, payout_id: PayoutId, fees: Decimal) -> Result<Decimal, LedgerError> {
        self.inner.lock().settle(payout_id, fees)
    }

    /// Status of an earning slot, if this agent owns the earning.
    pub fn earning_status(&self, earning_id: EarningId) -> Option<EarningStatus> {
        self.inner.lock().earnings.get(&earning_id).map(|s| s.status)
    }

    /// Consistent snapshot of all balances under a single lock.
    pub fn snapshot(&self) -> AgentBalances {
        let data = self.inner.lock();
        AgentBalances {
            agent: data.agent_id,
            status: data.status,
            tier: data.tier,
            commission_rate: data.commission_rate,
            available: data.available,
            pending: data.pending,
            total_earnings: data.total_earnings,
            completed_net: data.completed_net,
            version: data.version,
        }
    }
}

/// Point-in-time view of an agent's balances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentBalances {
    pub agent: AgentId,
    pub status: AgentStatus,
    pub tier: AgentTier,
    pub commission_rate: Decimal,
    pub available: Decimal,
    pub pending: Decimal,
    pub total_earnings: Decimal,
    pub completed_net: Decimal,
    pub version: u64,
}

impl Serialize for AgentBalances {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("AgentBalances", 9)?;
        state.serialize_field("agent", &self.agent)?;
        state.serialize_field("status", &self.status)?;
        state.serialize_field("tier", &self.tier)?;
        state.serialize_field("commission_rate", &self.commission_rate)?;
        state.serialize_field("available", &self.available.round_dp(Agent::DECIMAL_PRECISION))?;
        state.serialize_field("pending", &self.pending.round_dp(Agent::DECIMAL_PRECISION))?;
        state.serialize_field(
            "total_earnings",
            &self.total_earnings.round_dp(Agent::DECIMAL_PRECISION),
        )?;
        state.serialize_field(
            "completed_net",
            &self.completed_net.round_dp(Agent::DECIMAL_PRECISION),
        )?;
        state.serialize_field("version", &self.version)?;
        state.end()
    }
}
