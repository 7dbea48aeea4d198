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

//! The ledger store.
//!
//! Single authoritative store for agent balances, earning records, payout
//! documents, and the idempotency reference log. Agents are sharded in a
//! [`DashMap`] so operations on different agents proceed in parallel;
//! balance mutations for one agent serialize on that agent's mutex.
//!
//! # Invariants
//!
//! - `total_earnings == available + pending + completed_net` for every
//!   agent, after every operation.
//! - The available balance never goes negative; operations that would
//!   violate this fail closed.
//! - A reference id produces at most one earning.
//! - Reserved funds are released at most once and settled at most once.

use crate::agent::{Agent, AgentBalances, AgentStatus, AgentTier};
use crate::base::{AgentId, EarningId, PayoutId};
use crate::earning::{Earning, EarningStatus, EarningType};
use crate::error::LedgerError;
use crate::payout::{Payout, PayoutStatus};
use crate::reference_log::ReferenceLog;
use crate::referral::CommissionSnapshot;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicU64, Ordering};

/// Parameters for a new earning, supplied by the earning engine.
#[derive(Debug, Clone)]
pub struct EarningDraft {
    pub agent_id: AgentId,
    pub amount: Decimal,
    pub earning_type: EarningType,
    pub reference_id: String,
    pub earned_at: DateTime<Utc>,
    pub referral_code: Option<String>,
    pub referred_user: Option<String>,
    pub commission: Option<CommissionSnapshot>,
}

/// Filter for payout listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayoutFilter {
    pub agent: Option<AgentId>,
    pub status: Option<PayoutStatus>,
}

/// Offset/limit window for paginated listings.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// Durable, transactional storage of agent balances, earnings, and payouts.
pub struct LedgerStore {
    /// Agent accounts indexed by agent id.
    agents: DashMap<AgentId, Agent>,
    /// Earning documents indexed by earning id.
    earnings: DashMap<EarningId, Mutex<Earning>>,
    /// Payout documents indexed by payout id.
    payouts: DashMap<PayoutId, Mutex<Payout>>,
    /// Global reference-id log for earning deduplication.
    references: ReferenceLog,
    minimum_payout: Decimal,
    next_earning_id: AtomicU64,
    next_payout_id: AtomicU64,
}

impl LedgerStore {
    /// Creates an empty store with the default minimum payout amount.
    pub fn new() -> Self {
        Self::with_minimum_payout(dec!(50.00))
    }

    pub fn with_minimum_payout(minimum_payout: Decimal) -> Self {
        Self {
            agents: DashMap::new(),
            earnings: DashMap::new(),
            payouts: DashMap::new(),
            references: ReferenceLog::new(),
            minimum_payout,
            next_earning_id: AtomicU64::new(1),
            next_payout_id: AtomicU64::new(1),
        }
    }

    pub fn minimum_payout(&self) -> Decimal {
        self.minimum_payout
    }

    // === Agents ===

    /// Registers an agent approved by an admin.
    ///
    /// The agent starts in `application_approved` with zero balances.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateAgent`] if the id already exists.
    pub fn register_agent(
        &self,
        agent_id: AgentId,
        commission_rate: Decimal,
        tier: AgentTier,
    ) -> Result<(), LedgerError> {
        match self.agents.entry(agent_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(LedgerError::DuplicateAgent(agent_id))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Agent::new(agent_id, commission_rate, tier));
                Ok(())
            }
        }
    }

    /// Applies a lifecycle transition to an agent's status.
    pub fn set_agent_status(
        &self,
        agent_id: AgentId,
        next: AgentStatus,
    ) -> Result<(), LedgerError> {
        self.agent(agent_id)?.set_status(next)
    }

    /// Retrieves an agent by id.
    pub fn get_agent(
        &self,
        agent_id: &AgentId,
    ) -> Option<dashmap::mapref::one::Ref<'_, AgentId, Agent>> {
        self.agents.get(agent_id)
    }

    /// Consistent balance snapshot of one agent.
    pub fn snapshot(&self, agent_id: AgentId) -> Result<AgentBalances, LedgerError> {
        Ok(self.agent(agent_id)?.snapshot())
    }

    /// Balance snapshots of all agents, ordered by agent id.
    pub fn snapshots(&self) -> Vec<AgentBalances> {
        let mut all: Vec<AgentBalances> =
            self.agents.iter().map(|entry| entry.snapshot()).collect();
        all.sort_by_key(|snapshot| snapshot.agent.0);
        all
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    fn agent(
        &self,
        agent_id: AgentId,
    ) -> Result<dashmap::mapref::one::Ref<'_, AgentId, Agent>, LedgerError> {
        self.agents
            .get(&agent_id)
            .ok_or(LedgerError::AgentNotFound(agent_id))
    }

    // === Reservations ===

    /// Atomically checks the available balance and minimum payout amount,
    /// debits the balance, and records the reservation under `payout_id`.
    ///
    /// Serialized per agent: two concurrent reservations against the same
    /// balance cannot both succeed. A retried call with the same payout id
    /// is a no-op.
    pub fn reserve_for_payout(
        &self,
        agent_id: AgentId,
        payout_id: PayoutId,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        self.agent(agent_id)?
            .reserve(payout_id, amount, self.minimum_payout)
    }

    /// Returns reserved funds to the available balance.
    ///
    /// Idempotent: a second release reports `Ok(false)` and changes
    /// nothing. Fails if the reservation was already settled.
    pub fn release_reservation(
        &self,
        agent_id: AgentId,
        payout_id: PayoutId,
    ) -> Result<bool, LedgerError> {
        self.agent(agent_id)?.release(payout_id)
    }

    /// Marks reserved funds as permanently spent and returns the net
    /// amount. Irreversible; replays are no-ops.
    pub fn settle_reservation(
        &self,
        agent_id: AgentId,
        payout_id: PayoutId,
        fees: Decimal,
    ) -> Result<Decimal, LedgerError> {
        self.agent(agent_id)?.settle(payout_id, fees)
    }

    // === Earnings ===

    /// Records a new pending earning and credits the agent's pending
    /// balance.
    ///
    /// The draft's reference id is claimed atomically before the balance
    /// is touched; if the credit then fails, the claim is rolled back so a
    /// corrected retry is not rejected as a duplicate.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::DuplicateReference`] - reference id already processed.
    /// - [`LedgerError::AgentNotFound`] / [`LedgerError::AgentNotActive`]
    /// - [`LedgerError::InvalidAmount`] - zero amount.
    pub fn record_earning(&self, draft: EarningDraft) -> Result<Earning, LedgerError> {
        let agent = self.agent(draft.agent_id)?;
        let earning_id = EarningId(self.next_earning_id.fetch_add(1, Ordering::Relaxed));

        self.references.register(&draft.reference_id, earning_id)?;
        if let Err(e) = agent.credit_pending(earning_id, draft.amount) {
            self.references.unregister(&draft.reference_id);
            return Err(e);
        }

        let earning = Earning {
            id: earning_id,
            agent_id: draft.agent_id,
            amount: draft.amount,
            earning_type: draft.earning_type,
            status: EarningStatus::Pending,
            reference_id: draft.reference_id,
            earned_at: draft.earned_at,
            referral_code: draft.referral_code,
            referred_user: draft.referred_user,
            commission: draft.commission,
            cancel_reason: None,
        };
        self.earnings.insert(earning_id, Mutex::new(earning.clone()));
        Ok(earning)
    }

    /// Confirms a pending earning, moving its amount from the pending to
    /// the available balance.
    ///
    /// # Errors
    ///
    /// [`LedgerError::AlreadyFinalized`] on a terminal earning; safe for
    /// retrying callers to ignore.
    pub fn confirm_earning(&self, earning_id: EarningId) -> Result<Earning, LedgerError> {
        let doc = self
            .earnings
            .get(&earning_id)
            .ok_or(LedgerError::EarningNotFound(earning_id))?;
        let agent_id = doc.lock().agent_id;

        self.agent(agent_id)?.confirm_earning(earning_id)?;

        let mut earning = doc.lock();
        earning.status = EarningStatus::Confirmed;
        Ok(earning.clone())
    }

    /// Cancels a pending earning, removing its amount from the pending
    /// balance with no effect on the available balance.
    pub fn cancel_earning(
        &self,
        earning_id: EarningId,
        reason: Option<String>,
    ) -> Result<Earning, LedgerError> {
        let doc = self
            .earnings
            .get(&earning_id)
            .ok_or(LedgerError::EarningNotFound(earning_id))?;
        let agent_id = doc.lock().agent_id;

        self.agent(agent_id)?.cancel_earning(earning_id)?;

        let mut earning = doc.lock();
        earning.status = EarningStatus::Cancelled;
        earning.cancel_reason = reason;
        Ok(earning.clone())
    }

    /// Retrieves an earning record by id.
    pub fn get_earning(&self, earning_id: EarningId) -> Option<Earning> {
        let earning = self.earnings.get(&earning_id)?.lock().clone();
        // The slot inside the agent is authoritative for the status; the
        // document copy can lag by a beat during a finalization.
        if let Some(agent) = self.agents.get(&earning.agent_id)
            && let Some(status) = agent.earning_status(earning_id)
        {
            let mut earning = earning;
            earning.status = status;
            return Some(earning);
        }
        Some(earning)
    }

    /// The earning previously recorded for a reference id, if any.
    pub fn earning_by_reference(&self, reference_id: &str) -> Option<Earning> {
        let earning_id = self.references.lookup(reference_id)?;
        self.get_earning(earning_id)
    }

    /// All earnings of one agent, ordered by earning id.
    pub fn earnings_for_agent(&self, agent_id: AgentId) -> Vec<Earning> {
        let mut all: Vec<Earning> = self
            .earnings
            .iter()
            .map(|entry| entry.lock().clone())
            .filter(|earning| earning.agent_id == agent_id)
            .collect();
        all.sort_by_key(|earning| earning.id.0);
        all
    }

    // === Payouts ===

    /// Allocates the next payout id. The id is also the reservation key.
    pub fn allocate_payout_id(&self) -> PayoutId {
        PayoutId(self.next_payout_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Stores a newly created payout document.
    pub fn insert_payout(&self, payout: Payout) {
        self.payouts.insert(payout.id, Mutex::new(payout));
    }

    pub(crate) fn payout_entry(
        &self,
        payout_id: PayoutId,
    ) -> Option<dashmap::mapref::one::Ref<'_, PayoutId, Mutex<Payout>>> {
        self.payouts.get(&payout_id)
    }

    /// Retrieves a payout document by id.
    pub fn get_payout(&self, payout_id: PayoutId) -> Option<Payout> {
        self.payouts
            .get(&payout_id)
            .map(|entry| entry.lock().clone())
    }

    /// Filtered, paginated payout listing ordered by payout id.
    ///
    /// Returns the page of documents and the total number of matches, for
    /// the admin list views and the CSV export projection.
    pub fn list_payouts(&self, filter: PayoutFilter, page: Page) -> (Vec<Payout>, usize) {
        let mut matches: Vec<Payout> = self
            .payouts
            .iter()
            .map(|entry| entry.lock().clone())
            .filter(|payout| {
                filter.agent.is_none_or(|agent| payout.agent_id == agent)
                    && filter.status.is_none_or(|status| payout.status == status)
            })
            .collect();
        matches.sort_by_key(|payout| payout.id.0);

        let total = matches.len();
        let page_items = matches
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        (page_items, total)
    }

    /// All payouts of one agent, ordered by payout id.
    pub fn payouts_for_agent(&self, agent_id: AgentId) -> Vec<Payout> {
        let (items, _) = self.list_payouts(
            PayoutFilter {
                agent: Some(agent_id),
                status: None,
            },
            Page {
                offset: 0,
                limit: usize::MAX,
            },
        );
        items
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}
