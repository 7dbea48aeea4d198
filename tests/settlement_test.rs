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

//! Payout state machine integration tests.

use chrono::Utc;
use referral_ledger_rs::{
    AgentId, AgentStatus, AgentTier, EarningDraft, EarningType, LedgerError, LedgerStore,
    PaymentDetails, PayoutService, PayoutStatus,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

// === Helper Functions ===

static REFERENCE_SEQ: AtomicU64 = AtomicU64::new(1);

fn setup() -> (Arc<LedgerStore>, PayoutService) {
    let ledger = Arc::new(LedgerStore::new());
    let service = PayoutService::new(Arc::clone(&ledger));
    (ledger, service)
}

fn onboard(ledger: &LedgerStore, id: u64) -> AgentId {
    let agent_id = AgentId(id);
    ledger
        .register_agent(agent_id, dec!(0.05), AgentTier::Bronze)
        .unwrap();
    ledger
        .set_agent_status(agent_id, AgentStatus::CodeGenerated)
        .unwrap();
    ledger
        .set_agent_status(agent_id, AgentStatus::CredentialsSent)
        .unwrap();
    ledger
        .set_agent_status(agent_id, AgentStatus::Active)
        .unwrap();
    agent_id
}

/// Puts confirmed funds on the agent's available balance.
fn fund(ledger: &LedgerStore, agent_id: AgentId, amount: Decimal) {
    let reference = format!(
        "fund-{}",
        REFERENCE_SEQ.fetch_add(1, Ordering::SeqCst)
    );
    let earning = ledger
        .record_earning(EarningDraft {
            agent_id,
            amount,
            earning_type: EarningType::Bonus,
            reference_id: reference,
            earned_at: Utc::now(),
            referral_code: None,
            referred_user: None,
            commission: None,
        })
        .unwrap();
    ledger.confirm_earning(earning.id).unwrap();
}

fn airtime() -> PaymentDetails {
    PaymentDetails::AirtimeTopup {
        phone_number: "+254700000001".into(),
    }
}

// === Request ===

#[test]
fn request_reserves_funds() {
    let (ledger, service) = setup();
    let agent = onboard(&ledger, 1);
    fund(&ledger, agent, dec!(100.00));

    let payout = service.request(agent, dec!(60.00), airtime()).unwrap();
    assert_eq!(payout.status, PayoutStatus::Requested);
    assert_eq!(payout.amount, dec!(60.00));
    assert_eq!(payout.fees, Decimal::ZERO);
    assert_eq!(payout.net_amount, dec!(60.00));

    let balances = ledger.snapshot(agent).unwrap();
    assert_eq!(balances.available, dec!(40.00));
    assert_eq!(balances.total_earnings, dec!(100.00));
}

#[test]
fn second_request_exceeding_balance_fails() {
    // Minimum 50, available 100: a 60.00 payout leaves 40, so a second
    // 50.00 request must fail and leave the balance at 40.
    let (ledger, service) = setup();
    let agent = onboard(&ledger, 1);
    fund(&ledger, agent, dec!(100.00));

    service.request(agent, dec!(60.00), airtime()).unwrap();
    let result = service.request(agent, dec!(50.00), airtime());
    assert_eq!(
        result,
        Err(LedgerError::InsufficientFunds {
            requested: dec!(50.00),
            available: dec!(40.00),
        })
    );
    assert_eq!(ledger.snapshot(agent).unwrap().available, dec!(40.00));
}

#[test]
fn request_below_minimum_fails() {
    let (ledger, service) = setup();
    let agent = onboard(&ledger, 1);
    fund(&ledger, agent, dec!(100.00));

    let result = service.request(agent, dec!(49.99), airtime());
    assert_eq!(
        result,
        Err(LedgerError::BelowMinimumPayout {
            amount: dec!(49.99),
            minimum: dec!(50.00),
        })
    );
}

#[test]
fn request_with_bad_details_reserves_nothing() {
    let (ledger, service) = setup();
    let agent = onboard(&ledger, 1);
    fund(&ledger, agent, dec!(100.00));

    let result = service.request(
        agent,
        dec!(60.00),
        PaymentDetails::AirtimeTopup {
            phone_number: "not-a-number".into(),
        },
    );
    assert!(matches!(
        result,
        Err(LedgerError::InvalidPaymentDetails(_))
    ));
    assert_eq!(ledger.snapshot(agent).unwrap().available, dec!(100.00));
}

#[test]
fn suspended_agent_cannot_request() {
    let (ledger, service) = setup();
    let agent = onboard(&ledger, 1);
    fund(&ledger, agent, dec!(100.00));
    ledger
        .set_agent_status(agent, AgentStatus::Suspended)
        .unwrap();

    let result = service.request(agent, dec!(60.00), airtime());
    assert_eq!(result, Err(LedgerError::AgentNotActive(agent)));
}

// === Happy Path ===

#[test]
fn full_lifecycle_to_completed() {
    let (ledger, service) = setup();
    let agent = onboard(&ledger, 1);
    fund(&ledger, agent, dec!(100.00));

    let payout = service.request(agent, dec!(60.00), airtime()).unwrap();
    let payout = service.approve(payout.id, Some("looks good".into())).unwrap();
    assert_eq!(payout.status, PayoutStatus::Approved);
    assert!(payout.approved_at.is_some());

    let payout = service.process(payout.id, None).unwrap();
    assert_eq!(payout.status, PayoutStatus::Processing);
    assert!(payout.processed_at.is_some());

    let payout = service
        .complete(payout.id, "rail-tx-1", Some(dec!(2.50)), None)
        .unwrap();
    assert_eq!(payout.status, PayoutStatus::Completed);
    assert_eq!(payout.fees, dec!(2.50));
    assert_eq!(payout.net_amount, dec!(57.50));
    assert_eq!(payout.transaction_id.as_deref(), Some("rail-tx-1"));
    assert!(payout.completed_at.is_some());

    let balances = ledger.snapshot(agent).unwrap();
    assert_eq!(balances.completed_net, dec!(57.50));
    assert_eq!(balances.available, dec!(42.50));
    assert_eq!(
        balances.total_earnings,
        balances.available + balances.pending + balances.completed_net
    );
}

#[test]
fn review_path_to_approval() {
    let (ledger, service) = setup();
    let agent = onboard(&ledger, 1);
    fund(&ledger, agent, dec!(100.00));

    let payout = service.request(agent, dec!(60.00), airtime()).unwrap();
    let payout = service
        .set_to_review(payout.id, "need bank confirmation")
        .unwrap();
    assert_eq!(payout.status, PayoutStatus::PendingReview);
    assert_eq!(
        payout.review_message.as_deref(),
        Some("need bank confirmation")
    );

    let payout = service.approve(payout.id, None).unwrap();
    assert_eq!(payout.status, PayoutStatus::Approved);
}

// === Rejection / Cancellation ===

#[test]
fn reject_releases_the_reservation() {
    let (ledger, service) = setup();
    let agent = onboard(&ledger, 1);
    fund(&ledger, agent, dec!(100.00));

    let payout = service.request(agent, dec!(60.00), airtime()).unwrap();
    assert_eq!(ledger.snapshot(agent).unwrap().available, dec!(40.00));

    let payout = service
        .reject(payout.id, "details mismatch", None)
        .unwrap();
    assert_eq!(payout.status, PayoutStatus::Rejected);
    assert_eq!(payout.rejection_reason.as_deref(), Some("details mismatch"));
    assert!(payout.rejected_at.is_some());
    assert_eq!(ledger.snapshot(agent).unwrap().available, dec!(100.00));
}

#[test]
fn reject_from_review_works() {
    let (ledger, service) = setup();
    let agent = onboard(&ledger, 1);
    fund(&ledger, agent, dec!(100.00));

    let payout = service.request(agent, dec!(60.00), airtime()).unwrap();
    service.set_to_review(payout.id, "checking").unwrap();
    let payout = service.reject(payout.id, "no", None).unwrap();
    assert_eq!(payout.status, PayoutStatus::Rejected);
    assert_eq!(ledger.snapshot(agent).unwrap().available, dec!(100.00));
}

#[test]
fn cancel_allowed_until_processing() {
    let (ledger, service) = setup();
    let agent = onboard(&ledger, 1);
    fund(&ledger, agent, dec!(200.00));

    // Cancel from requested.
    let p1 = service.request(agent, dec!(60.00), airtime()).unwrap();
    let p1 = service.cancel(p1.id).unwrap();
    assert_eq!(p1.status, PayoutStatus::Cancelled);

    // Cancel from approved.
    let p2 = service.request(agent, dec!(60.00), airtime()).unwrap();
    service.approve(p2.id, None).unwrap();
    let p2 = service.cancel(p2.id).unwrap();
    assert_eq!(p2.status, PayoutStatus::Cancelled);

    assert_eq!(ledger.snapshot(agent).unwrap().available, dec!(200.00));

    // Once processing, the agent can no longer cancel.
    let p3 = service.request(agent, dec!(60.00), airtime()).unwrap();
    service.approve(p3.id, None).unwrap();
    service.process(p3.id, None).unwrap();
    let result = service.cancel(p3.id);
    assert_eq!(
        result,
        Err(LedgerError::InvalidStateTransition {
            from: PayoutStatus::Processing,
            action: "cancel",
        })
    );
}

#[test]
fn rejecting_twice_fails_but_funds_return_once() {
    let (ledger, service) = setup();
    let agent = onboard(&ledger, 1);
    fund(&ledger, agent, dec!(100.00));

    let payout = service.request(agent, dec!(60.00), airtime()).unwrap();
    service.reject(payout.id, "first", None).unwrap();
    let result = service.reject(payout.id, "second", None);
    assert_eq!(
        result,
        Err(LedgerError::InvalidStateTransition {
            from: PayoutStatus::Rejected,
            action: "reject",
        })
    );
    // Released exactly once.
    assert_eq!(ledger.snapshot(agent).unwrap().available, dec!(100.00));
}

// === Guard Rails ===

#[test]
fn complete_requires_the_full_path() {
    let (ledger, service) = setup();
    let agent = onboard(&ledger, 1);
    fund(&ledger, agent, dec!(100.00));

    let payout = service.request(agent, dec!(60.00), airtime()).unwrap();

    // Straight from requested: refused.
    let result = service.complete(payout.id, "rail-tx-1", None, None);
    assert_eq!(
        result,
        Err(LedgerError::InvalidStateTransition {
            from: PayoutStatus::Requested,
            action: "complete",
        })
    );

    // From approved but not processing: still refused.
    service.approve(payout.id, None).unwrap();
    let result = service.complete(payout.id, "rail-tx-1", None, None);
    assert_eq!(
        result,
        Err(LedgerError::InvalidStateTransition {
            from: PayoutStatus::Approved,
            action: "complete",
        })
    );

    // The reservation is untouched by the failed attempts.
    assert_eq!(ledger.snapshot(agent).unwrap().completed_net, Decimal::ZERO);
}

#[test]
fn approve_completed_payout_fails() {
    let (ledger, service) = setup();
    let agent = onboard(&ledger, 1);
    fund(&ledger, agent, dec!(100.00));

    let payout = service.request(agent, dec!(60.00), airtime()).unwrap();
    service.approve(payout.id, None).unwrap();
    service.process(payout.id, None).unwrap();
    service.complete(payout.id, "rail-tx-1", None, None).unwrap();

    let result = service.approve(payout.id, None);
    assert_eq!(
        result,
        Err(LedgerError::InvalidStateTransition {
            from: PayoutStatus::Completed,
            action: "approve",
        })
    );
}

#[test]
fn unknown_payout_is_not_found() {
    let (_ledger, service) = setup();
    let result = service.approve(referral_ledger_rs::PayoutId(999), None);
    assert_eq!(
        result,
        Err(LedgerError::PayoutNotFound(referral_ledger_rs::PayoutId(
            999
        )))
    );
}

// === Completion Idempotency ===

#[test]
fn complete_replay_with_same_transaction_id_is_noop() {
    let (ledger, service) = setup();
    let agent = onboard(&ledger, 1);
    fund(&ledger, agent, dec!(100.00));

    let payout = service.request(agent, dec!(60.00), airtime()).unwrap();
    service.approve(payout.id, None).unwrap();
    service.process(payout.id, None).unwrap();

    let first = service
        .complete(payout.id, "rail-tx-1", Some(dec!(1.00)), None)
        .unwrap();
    let replay = service
        .complete(payout.id, "rail-tx-1", Some(dec!(1.00)), None)
        .unwrap();
    assert_eq!(first, replay);

    // Settled exactly once.
    assert_eq!(ledger.snapshot(agent).unwrap().completed_net, dec!(59.00));
}

#[test]
fn complete_replay_with_different_transaction_id_conflicts() {
    let (ledger, service) = setup();
    let agent = onboard(&ledger, 1);
    fund(&ledger, agent, dec!(100.00));

    let payout = service.request(agent, dec!(60.00), airtime()).unwrap();
    service.approve(payout.id, None).unwrap();
    service.process(payout.id, None).unwrap();
    service.complete(payout.id, "rail-tx-1", None, None).unwrap();

    let result = service.complete(payout.id, "rail-tx-2", None, None);
    assert_eq!(
        result,
        Err(LedgerError::InvalidStateTransition {
            from: PayoutStatus::Completed,
            action: "complete",
        })
    );
}

// === Concurrency ===

#[test]
fn concurrent_requests_one_winner() {
    for _ in 0..10 {
        let (ledger, service) = setup();
        let service = Arc::new(service);
        let agent = onboard(&ledger, 1);
        fund(&ledger, agent, dec!(100.00));

        let mut handles = vec![];
        for i in 0..2 {
            let service = Arc::clone(&service);
            handles.push(thread::spawn(move || {
                let amount = if i == 0 { dec!(60.00) } else { dec!(50.00) };
                service.request(agent, amount, PaymentDetails::AirtimeTopup {
                    phone_number: "+254700000001".into(),
                })
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let insufficient = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::InsufficientFunds { .. })))
            .count();

        assert_eq!(wins, 1, "exactly one request must win");
        assert_eq!(insufficient, 1, "the loser fails with InsufficientFunds");
        assert!(ledger.snapshot(agent).unwrap().available >= Decimal::ZERO);
    }
}

#[test]
fn concurrent_approvals_one_winner() {
    for _ in 0..10 {
        let (ledger, service) = setup();
        let service = Arc::new(service);
        let agent = onboard(&ledger, 1);
        fund(&ledger, agent, dec!(100.00));
        let payout_id = service.request(agent, dec!(60.00), airtime()).unwrap().id;

        let mut handles = vec![];
        for _ in 0..8 {
            let service = Arc::clone(&service);
            handles.push(thread::spawn(move || service.approve(payout_id, None).is_ok()));
        }

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1, "current-state guard admits one approval");
        assert_eq!(
            service.get(payout_id).unwrap().status,
            PayoutStatus::Approved
        );
    }
}
