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

use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use csv::{ReaderBuilder, Trim, Writer};
use referral_ledger_rs::{
    AgentId, AgentStatus, AgentTier, EarningEngine, LedgerError, LedgerStore, Page,
    PaymentDetails, PayoutFilter, PayoutId, PayoutMethod, PayoutService, PayoutStatus,
    ReferralCode, ReferralUsage,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Referral Ledger - Replay a ledger event CSV
///
/// Reads a scenario of ledger events from a CSV file, drives the earning
/// engine and payout state machine, and writes the resulting projection
/// to stdout.
#[derive(Parser, Debug)]
#[command(name = "referral-ledger-rs")]
#[command(about = "A referral ledger engine that replays event CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with ledger events
    ///
    /// Expected format: event,agent,reference,code,amount,tier,rate,method,target,reason
    /// Example: cargo run -- scenario.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Projection to write to stdout
    #[arg(long, value_enum, default_value = "agents")]
    export: Export,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Export {
    /// Agent balance snapshots
    Agents,
    /// The payout ledger
    Payouts,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let app = match replay_scenario(BufReader::new(file)) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error replaying scenario: {}", e);
            process::exit(1);
        }
    };

    let result = match args.export {
        Export::Agents => write_agents(&app.ledger, std::io::stdout()),
        Export::Payouts => write_payouts(&app.ledger, std::io::stdout()),
    };
    if let Err(e) = result {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the scenario format.
///
/// Fields: `event,agent,reference,code,amount,tier,rate,method,target,reason`
#[derive(Debug, Deserialize)]
struct ScenarioRecord {
    event: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    agent: Option<u64>,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    #[serde(default)]
    tier: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    rate: Option<Decimal>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// A single parsed scenario event.
#[derive(Debug)]
enum LedgerEvent {
    Register {
        agent: AgentId,
        rate: Decimal,
        tier: AgentTier,
    },
    Code {
        agent: AgentId,
        code: String,
    },
    Usage {
        code: String,
        reference: String,
        base_amount: Decimal,
    },
    ConfirmEarning {
        reference: String,
    },
    CancelEarning {
        reference: String,
        reason: String,
    },
    Request {
        agent: AgentId,
        label: String,
        amount: Decimal,
        details: PaymentDetails,
    },
    Review {
        label: String,
        message: String,
    },
    Approve {
        label: String,
    },
    Reject {
        label: String,
        reason: String,
    },
    Process {
        label: String,
    },
    Complete {
        label: String,
        transaction_id: String,
        fees: Option<Decimal>,
    },
    CancelPayout {
        label: String,
    },
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn parse_tier(tier: &str) -> Option<AgentTier> {
    match tier {
        "bronze" => Some(AgentTier::Bronze),
        "silver" => Some(AgentTier::Silver),
        "gold" => Some(AgentTier::Gold),
        "platinum" => Some(AgentTier::Platinum),
        _ => None,
    }
}

/// Parses the `method`/`target` columns into payment details.
///
/// - `airtime` with target `+254700000001`
/// - `mobile` with target `provider:+254700000001`
/// - `bank` with target `bank|account_number|account_name`
fn parse_details(method: &str, target: &str) -> Option<PaymentDetails> {
    match method {
        "airtime" => Some(PaymentDetails::AirtimeTopup {
            phone_number: target.to_owned(),
        }),
        "mobile" => {
            let (provider, phone) = target.split_once(':')?;
            Some(PaymentDetails::MobileMoney {
                provider: provider.to_owned(),
                phone_number: phone.to_owned(),
            })
        }
        "bank" => {
            let mut parts = target.split('|');
            Some(PaymentDetails::BankTransfer {
                bank_name: parts.next()?.to_owned(),
                account_number: parts.next()?.to_owned(),
                account_name: parts.next()?.to_owned(),
            })
        }
        _ => None,
    }
}

impl ScenarioRecord {
    /// Converts the CSV record to a ledger event.
    ///
    /// Returns `None` for unknown events or missing required fields.
    fn into_event(self) -> Option<LedgerEvent> {
        let agent = self.agent.map(AgentId);
        let reference = non_empty(self.reference);
        let code = non_empty(self.code);
        let reason = non_empty(self.reason);
        let target = non_empty(self.target);
        let method = non_empty(self.method);

        match self.event.to_lowercase().as_str() {
            "register" => Some(LedgerEvent::Register {
                agent: agent?,
                rate: self.rate?,
                tier: parse_tier(non_empty(self.tier)?.as_str())?,
            }),
            "code" => Some(LedgerEvent::Code {
                agent: agent?,
                code: code?,
            }),
            "usage" => Some(LedgerEvent::Usage {
                code: code?,
                reference: reference?,
                base_amount: self.amount?,
            }),
            "confirm" => Some(LedgerEvent::ConfirmEarning {
                reference: reference?,
            }),
            "cancel" => Some(LedgerEvent::CancelEarning {
                reference: reference?,
                reason: reason.unwrap_or_else(|| "cancelled".to_owned()),
            }),
            "request" => Some(LedgerEvent::Request {
                agent: agent?,
                label: reference?,
                amount: self.amount?,
                details: parse_details(method?.as_str(), target?.as_str())?,
            }),
            "review" => Some(LedgerEvent::Review {
                label: reference?,
                message: reason.unwrap_or_else(|| "needs review".to_owned()),
            }),
            "approve" => Some(LedgerEvent::Approve { label: reference? }),
            "reject" => Some(LedgerEvent::Reject {
                label: reference?,
                reason: reason.unwrap_or_else(|| "rejected".to_owned()),
            }),
            "process" => Some(LedgerEvent::Process { label: reference? }),
            "complete" => Some(LedgerEvent::Complete {
                label: reference?,
                transaction_id: target?,
                fees: self.amount,
            }),
            "cancel_payout" => Some(LedgerEvent::CancelPayout { label: reference? }),
            _ => None,
        }
    }
}

/// The assembled service stack driven by a scenario.
pub struct App {
    pub ledger: Arc<LedgerStore>,
    pub engine: EarningEngine,
    pub payouts: PayoutService,
    /// Scenario labels mapped to the payout ids they created.
    labels: HashMap<String, PayoutId>,
}

impl App {
    fn new() -> Self {
        let ledger = Arc::new(LedgerStore::new());
        Self {
            engine: EarningEngine::new(Arc::clone(&ledger)),
            payouts: PayoutService::new(Arc::clone(&ledger)),
            ledger,
            labels: HashMap::new(),
        }
    }

    fn payout_for(&self, label: &str) -> Option<PayoutId> {
        let id = self.labels.get(label).copied();
        if id.is_none() {
            warn!(label, "no payout recorded under this label");
        }
        id
    }

    fn earning_for(&self, reference: &str) -> Option<referral_ledger_rs::Earning> {
        let earning = self.ledger.earning_by_reference(reference);
        if earning.is_none() {
            warn!(reference, "no earning recorded under this reference");
        }
        earning
    }

    fn apply(&mut self, event: LedgerEvent) -> Result<(), LedgerError> {
        match event {
            LedgerEvent::Register { agent, rate, tier } => {
                self.ledger.register_agent(agent, rate, tier)?;
                // Scenario agents onboard straight through to active.
                self.ledger
                    .set_agent_status(agent, AgentStatus::CodeGenerated)?;
                self.ledger
                    .set_agent_status(agent, AgentStatus::CredentialsSent)?;
                self.ledger.set_agent_status(agent, AgentStatus::Active)?;
                Ok(())
            }
            LedgerEvent::Code { agent, code } => {
                self.engine.register_code(ReferralCode::new(code, agent))
            }
            LedgerEvent::Usage {
                code,
                reference,
                base_amount,
            } => {
                self.engine.record_usage(
                    &code,
                    ReferralUsage {
                        reference_id: reference,
                        base_amount,
                        referred_user_name: None,
                        referred_user_email: None,
                        referred_user_phone: None,
                        occurred_at: Utc::now(),
                    },
                )?;
                Ok(())
            }
            LedgerEvent::ConfirmEarning { reference } => {
                if let Some(earning) = self.earning_for(&reference) {
                    self.engine.confirm(earning.id)?;
                }
                Ok(())
            }
            LedgerEvent::CancelEarning { reference, reason } => {
                if let Some(earning) = self.earning_for(&reference) {
                    self.engine.cancel(earning.id, reason)?;
                }
                Ok(())
            }
            LedgerEvent::Request {
                agent,
                label,
                amount,
                details,
            } => {
                let payout = self.payouts.request(agent, amount, details)?;
                self.labels.insert(label, payout.id);
                Ok(())
            }
            LedgerEvent::Review { label, message } => {
                if let Some(id) = self.payout_for(&label) {
                    self.payouts.set_to_review(id, message)?;
                }
                Ok(())
            }
            LedgerEvent::Approve { label } => {
                if let Some(id) = self.payout_for(&label) {
                    self.payouts.approve(id, None)?;
                }
                Ok(())
            }
            LedgerEvent::Reject { label, reason } => {
                if let Some(id) = self.payout_for(&label) {
                    self.payouts.reject(id, reason, None)?;
                }
                Ok(())
            }
            LedgerEvent::Process { label } => {
                if let Some(id) = self.payout_for(&label) {
                    self.payouts.process(id, None)?;
                }
                Ok(())
            }
            LedgerEvent::Complete {
                label,
                transaction_id,
                fees,
            } => {
                if let Some(id) = self.payout_for(&label) {
                    self.payouts.complete(id, transaction_id, fees, None)?;
                }
                Ok(())
            }
            LedgerEvent::CancelPayout { label } => {
                if let Some(id) = self.payout_for(&label) {
                    self.payouts.cancel(id)?;
                }
                Ok(())
            }
        }
    }
}

/// Replays scenario events from a CSV reader.
///
/// Streaming parse; malformed rows and events that fail to apply are
/// logged and skipped so one bad row never aborts the replay.
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is
/// invalid.
pub fn replay_scenario<R: Read>(reader: R) -> Result<App, csv::Error> {
    let mut app = App::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<ScenarioRecord>() {
        match result {
            Ok(record) => {
                let Some(event) = record.into_event() else {
                    warn!("skipping invalid scenario record");
                    continue;
                };

                if let Err(e) = app.apply(event) {
                    warn!(reason = %e, "skipping event");
                }
            }
            Err(e) => {
                warn!(reason = %e, "skipping malformed row");
                continue;
            }
        }
    }

    Ok(app)
}

/// Flat payout projection for the CSV export.
#[derive(Debug, Serialize)]
struct PayoutRow {
    payout: PayoutId,
    agent: AgentId,
    amount: Decimal,
    fees: Decimal,
    net_amount: Decimal,
    method: PayoutMethod,
    status: PayoutStatus,
    requested_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    transaction_id: Option<String>,
    rejection_reason: Option<String>,
}

/// Writes agent balance snapshots as CSV.
///
/// Columns: `agent,status,tier,commission_rate,available,pending,
/// total_earnings,completed_net,version`
pub fn write_agents<W: Write>(ledger: &LedgerStore, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for snapshot in ledger.snapshots() {
        wtr.serialize(&snapshot)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes the payout ledger as CSV, ordered by payout id.
pub fn write_payouts<W: Write>(ledger: &LedgerStore, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    let (payouts, _) = ledger.list_payouts(
        PayoutFilter::default(),
        Page {
            offset: 0,
            limit: usize::MAX,
        },
    );
    for payout in payouts {
        wtr.serialize(PayoutRow {
            payout: payout.id,
            agent: payout.agent_id,
            amount: payout.amount,
            fees: payout.fees,
            net_amount: payout.net_amount,
            method: payout.method,
            status: payout.status,
            requested_at: payout.requested_at,
            completed_at: payout.completed_at,
            transaction_id: payout.transaction_id,
            rejection_reason: payout.rejection_reason,
        })?;
    }
    wtr.flush()?;
    Ok(())
}
