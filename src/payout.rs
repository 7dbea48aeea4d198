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

//! Payout requests and their lifecycle.
//!
//! Payouts follow a one-directional state machine:
//!
//! ```text
//! requested ──► pending_review ──► approved ──► processing ──► completed
//!     │                │               │
//!     ├── rejected ◄───┤               │
//!     └── cancelled ◄──┴───────────────┘
//! ```
//!
//! `rejected` is reachable from `requested` and `pending_review`;
//! `cancelled` (agent-initiated) additionally from `approved`. No state is
//! re-enterable. The allowed edges live in a single transition table,
//! [`PayoutStatus::can_transition`]; call sites never re-derive them.

use crate::base::{AgentId, PayoutId};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Disbursement channel for a payout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayoutMethod {
    BankTransfer,
    AirtimeTopup,
    MobileMoney,
}

impl fmt::Display for PayoutMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BankTransfer => "bank_transfer",
            Self::AirtimeTopup => "airtime_topup",
            Self::MobileMoney => "mobile_money",
        };
        write!(f, "{name}")
    }
}

/// Method-specific disbursement details, validated at the request boundary.
///
/// The tag doubles as the payout method, so a payout can never carry
/// details that disagree with its method.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PaymentDetails {
    BankTransfer {
        bank_name: String,
        account_number: String,
        account_name: String,
    },
    AirtimeTopup {
        phone_number: String,
    },
    MobileMoney {
        provider: String,
        phone_number: String,
    },
}

impl PaymentDetails {
    pub fn method(&self) -> PayoutMethod {
        match self {
            Self::BankTransfer { .. } => PayoutMethod::BankTransfer,
            Self::AirtimeTopup { .. } => PayoutMethod::AirtimeTopup,
            Self::MobileMoney { .. } => PayoutMethod::MobileMoney,
        }
    }

    /// Validates the shape required by the method.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidPaymentDetails`] naming the offending
    /// field.
    pub fn validate(&self) -> Result<(), LedgerError> {
        fn require(field: &str, value: &str) -> Result<(), LedgerError> {
            if value.trim().is_empty() {
                return Err(LedgerError::InvalidPaymentDetails(format!(
                    "{field} must not be empty"
                )));
            }
            Ok(())
        }

        fn require_phone(field: &str, value: &str) -> Result<(), LedgerError> {
            require(field, value)?;
            let digits = value.strip_prefix('+').unwrap_or(value);
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(LedgerError::InvalidPaymentDetails(format!(
                    "{field} must be a phone number"
                )));
            }
            Ok(())
        }

        match self {
            Self::BankTransfer {
                bank_name,
                account_number,
                account_name,
            } => {
                require("bank_name", bank_name)?;
                require("account_name", account_name)?;
                require("account_number", account_number)?;
                if !account_number.chars().all(|c| c.is_ascii_digit()) {
                    return Err(LedgerError::InvalidPaymentDetails(
                        "account_number must be numeric".into(),
                    ));
                }
                Ok(())
            }
            Self::AirtimeTopup { phone_number } => require_phone("phone_number", phone_number),
            Self::MobileMoney {
                provider,
                phone_number,
            } => {
                require("provider", provider)?;
                require_phone("phone_number", phone_number)
            }
        }
    }
}

/// Lifecycle state of a payout request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Requested,
    PendingReview,
    Approved,
    Processing,
    Completed,
    Rejected,
    Cancelled,
}

impl PayoutStatus {
    /// Whether the payout can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Cancelled)
    }

    /// The transition table. Every edge of the state machine is listed
    /// here and nowhere else.
    pub fn can_transition(self, next: PayoutStatus) -> bool {
        use PayoutStatus::*;
        matches!(
            (self, next),
            (Requested, PendingReview)
                | (Requested, Approved)
                | (Requested, Rejected)
                | (Requested, Cancelled)
                | (PendingReview, Approved)
                | (PendingReview, Rejected)
                | (PendingReview, Cancelled)
                | (Approved, Processing)
                | (Approved, Cancelled)
                | (Processing, Completed)
        )
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Requested => "requested",
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// A withdrawal request against an agent's available balance.
///
/// `fees` default to zero and are only finalized at completion;
/// `net_amount` is recomputed there as `amount - fees` and never trusted
/// from caller input before that point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payout {
    pub id: PayoutId,
    pub agent_id: AgentId,
    pub amount: Decimal,
    pub fees: Decimal,
    pub net_amount: Decimal,
    pub method: PayoutMethod,
    pub details: PaymentDetails,
    pub status: PayoutStatus,
    pub requested_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Settlement reference from the payment rail; idempotency key for
    /// completion replays.
    pub transaction_id: Option<String>,
    pub admin_notes: Option<String>,
    pub review_message: Option<String>,
    pub rejection_reason: Option<String>,
}

impl Payout {
    pub fn new(
        id: PayoutId,
        agent_id: AgentId,
        amount: Decimal,
        details: PaymentDetails,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            agent_id,
            amount,
            fees: Decimal::ZERO,
            net_amount: amount,
            method: details.method(),
            details,
            status: PayoutStatus::Requested,
            requested_at,
            reviewed_at: None,
            approved_at: None,
            processed_at: None,
            completed_at: None,
            rejected_at: None,
            cancelled_at: None,
            transaction_id: None,
            admin_notes: None,
            review_message: None,
            rejection_reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_allows_happy_path() {
        use PayoutStatus::*;
        assert!(Requested.can_transition(PendingReview));
        assert!(Requested.can_transition(Approved));
        assert!(PendingReview.can_transition(Approved));
        assert!(Approved.can_transition(Processing));
        assert!(Processing.can_transition(Completed));
    }

    #[test]
    fn transition_table_rejects_shortcuts_and_reversals() {
        use PayoutStatus::*;
        assert!(!Requested.can_transition(Processing));
        assert!(!Requested.can_transition(Completed));
        assert!(!Approved.can_transition(Requested));
        assert!(!Processing.can_transition(Cancelled));
        assert!(!Processing.can_transition(Rejected));
        assert!(!Completed.can_transition(Approved));
        assert!(!Rejected.can_transition(Approved));
        assert!(!Cancelled.can_transition(Requested));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        use PayoutStatus::*;
        let all = [
            Requested,
            PendingReview,
            Approved,
            Processing,
            Completed,
            Rejected,
            Cancelled,
        ];
        for terminal in [Completed, Rejected, Cancelled] {
            assert!(terminal.is_terminal());
            for next in all {
                assert!(!terminal.can_transition(next));
            }
        }
    }

    #[test]
    fn details_tag_matches_method() {
        let details = PaymentDetails::AirtimeTopup {
            phone_number: "+254700000001".into(),
        };
        assert_eq!(details.method(), PayoutMethod::AirtimeTopup);

        let json = serde_json::to_string(&details).unwrap();
        assert!(json.contains("\"method\":\"airtime_topup\""));
    }

    #[test]
    fn bank_transfer_requires_numeric_account() {
        let details = PaymentDetails::BankTransfer {
            bank_name: "First Bank".into(),
            account_number: "12-34".into(),
            account_name: "A. Agent".into(),
        };
        assert!(matches!(
            details.validate(),
            Err(LedgerError::InvalidPaymentDetails(_))
        ));
    }

    #[test]
    fn empty_fields_are_rejected() {
        let details = PaymentDetails::MobileMoney {
            provider: "".into(),
            phone_number: "+254700000001".into(),
        };
        assert!(details.validate().is_err());

        let details = PaymentDetails::AirtimeTopup {
            phone_number: "not-a-number".into(),
        };
        assert!(details.validate().is_err());
    }

    #[test]
    fn valid_details_pass() {
        let details = PaymentDetails::BankTransfer {
            bank_name: "First Bank".into(),
            account_number: "0012345678".into(),
            account_name: "A. Agent".into(),
        };
        assert!(details.validate().is_ok());
    }

    #[test]
    fn unknown_method_fails_to_deserialize() {
        let err = serde_json::from_str::<PaymentDetails>(
            r#"{"method":"carrier_pigeon","coop":"north"}"#,
        );
        assert!(err.is_err());
    }
}
