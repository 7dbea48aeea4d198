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

//! # Referral Ledger
//!
//! This library provides the balance ledger and payout settlement engine
//! of an agent-referral program: referral-code usage events become
//! pending commission earnings, confirmed earnings accumulate into a
//! spendable balance, payout requests reserve that balance, and admin
//! actions drive each payout through an explicit state machine, singly
//! or in failure-isolated bulk batches.
//!
//! ## Core Components
//!
//! - [`LedgerStore`]: authoritative store of agent balances, earnings,
//!   payouts, and the idempotency reference log
//! - [`EarningEngine`]: converts referral usage events into commission
//!   earnings and drives their confirm/cancel transitions
//! - [`PayoutService`]: the payout state machine
//!   (`requested → … → completed`, with rejection and cancellation)
//! - [`BulkCoordinator`]: applies one transition to many payouts with
//!   per-item failure isolation
//!
//! ## Example
//!
//! ```
//! use referral_ledger_rs::{
//!     AgentId, AgentStatus, AgentTier, EarningEngine, LedgerStore, PaymentDetails,
//!     PayoutService, ReferralCode, ReferralUsage,
//! };
//! use chrono::Utc;
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//!
//! let ledger = Arc::new(LedgerStore::new());
//! let engine = EarningEngine::new(Arc::clone(&ledger));
//! let payouts = PayoutService::new(Arc::clone(&ledger));
//!
//! // Onboard an agent and their referral code.
//! let agent = AgentId(1);
//! ledger.register_agent(agent, dec!(0.05), AgentTier::Gold).unwrap();
//! ledger.set_agent_status(agent, AgentStatus::CodeGenerated).unwrap();
//! ledger.set_agent_status(agent, AgentStatus::CredentialsSent).unwrap();
//! ledger.set_agent_status(agent, AgentStatus::Active).unwrap();
//! engine.register_code(ReferralCode::new("AGT-1", agent)).unwrap();
//!
//! // A customer redeems the code; the commission lands as pending.
//! let earning = engine
//!     .record_usage(
//!         "AGT-1",
//!         ReferralUsage {
//!             reference_id: "order-1001".into(),
//!             base_amount: dec!(2000.00),
//!             referred_user_name: Some("Ada".into()),
//!             referred_user_email: None,
//!             referred_user_phone: None,
//!             occurred_at: Utc::now(),
//!         },
//!     )
//!     .unwrap();
//! engine.confirm(earning.id).unwrap();
//! assert_eq!(ledger.snapshot(agent).unwrap().available, dec!(120.00));
//!
//! // The agent withdraws part of the balance.
//! let payout = payouts
//!     .request(
//!         agent,
//!         dec!(100.00),
//!         PaymentDetails::AirtimeTopup { phone_number: "+254700000001".into() },
//!     )
//!     .unwrap();
//! payouts.approve(payout.id, None).unwrap();
//! payouts.process(payout.id, None).unwrap();
//! payouts.complete(payout.id, "rail-tx-77", None, None).unwrap();
//! ```
//!
//! ## Thread Safety
//!
//! Agents are sharded in a concurrent map and each carries its own lock,
//! so operations on different agents proceed in parallel while balance
//! mutations for one agent are serialized. Every externally triggered
//! mutation is keyed by a reference id, tolerating at-least-once delivery
//! from upstream systems.

pub mod agent;
mod base;
mod bulk;
pub mod earning;
mod engine;
pub mod error;
mod ledger;
pub mod payout;
mod reference_log;
pub mod referral;
mod settlement;

pub use agent::{Agent, AgentBalances, AgentStatus, AgentTier};
pub use base::{AgentId, EarningId, PayoutId};
pub use bulk::{BulkAction, BulkCoordinator, BulkError, BulkOutcome};
pub use earning::{Earning, EarningStatus, EarningType};
pub use engine::EarningEngine;
pub use error::LedgerError;
pub use ledger::{EarningDraft, LedgerStore, Page, PayoutFilter};
pub use payout::{PaymentDetails, Payout, PayoutMethod, PayoutStatus};
pub use reference_log::ReferenceLog;
pub use referral::{CommissionSnapshot, ReferralCode, ReferralUsage};
pub use settlement::PayoutService;
