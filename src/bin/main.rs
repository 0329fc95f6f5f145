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

use clap::{Parser, ValueEnum};
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use trip_ledger::{
    Category, Engine, EngineConfig, ExpenseId, LedgerError, Money, NewExpense, SplitPolicy,
    Transfer, TripId, UserId, apply_transfers, plan_settlement,
};

/// Trip Ledger - Replay a trip command log and report who owes whom
///
/// Reads roster changes, expenses and settlements from a CSV file and writes
/// the requested report to stdout.
#[derive(Parser, Debug)]
#[command(name = "trip-ledger")]
#[command(
    about = "Replays trip expense CSVs into balances and settlement plans",
    long_about = None
)]
struct Args {
    /// Path to CSV file with commands
    ///
    /// Expected format: type,trip,user,amount,description,category,split,expense,to
    /// Example: cargo run -- trip.csv --report plan > plan.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Report written to stdout
    #[arg(long, value_enum, default_value_t = Report::Balances)]
    report: Report,

    /// Fractional digits of the currency's minor unit
    #[arg(long, env = "TRIP_LEDGER_SCALE", default_value_t = EngineConfig::DEFAULT_SCALE)]
    scale: u32,

    /// Give up on a busy trip lock after this many milliseconds
    #[arg(long, env = "TRIP_LEDGER_LOCK_TIMEOUT_MS")]
    lock_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Report {
    /// Net balance per participant
    Balances,
    /// Transfers that settle every trip
    Plan,
    /// Paid, owed and net per participant
    Sheet,
    /// Every recorded expense
    Expenses,
}

impl Args {
    fn config(&self) -> EngineConfig {
        let config = EngineConfig::default().with_currency_scale(self.scale);
        match self.lock_timeout_ms {
            Some(ms) => config.with_lock_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("trip_ledger=info")),
        )
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

    let (engine, trips) = match process_commands(BufReader::new(file), args.config()) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error processing commands: {}", e);
            process::exit(1);
        }
    };
    info!(trips = trips.len(), "command log replayed");

    if let Err(e) = write_report(&engine, &trips, args.report, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, trip, user, amount, description, category, split, expense, to`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    command: String,
    trip: u32,
    user: u32,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    split: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    expense: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    to: Option<u32>,
}

/// A validated command ready for the engine.
#[derive(Debug)]
enum Command {
    Join(TripId, UserId),
    Leave(TripId, UserId),
    Expense(NewExpense),
    Settle(ExpenseId, UserId),
    Transfer(TripId, Transfer),
}

impl CsvRecord {
    /// Converts the record into a command.
    ///
    /// Returns `None` for unknown command types, missing fields, or amounts
    /// that are not whole minor units at `scale`.
    fn into_command(self, scale: u32) -> Option<Command> {
        let trip = TripId(self.trip);
        let user = UserId(self.user);

        match self.command.to_lowercase().as_str() {
            "join" => Some(Command::Join(trip, user)),
            "leave" => Some(Command::Leave(trip, user)),
            "expense" => {
                let amount = Money::from_decimal(self.amount?, scale).ok()?;
                let split = parse_split(&self.split, scale)?;
                Some(Command::Expense(NewExpense {
                    trip,
                    payer: user,
                    amount,
                    description: self.description,
                    category: Category::from(self.category.as_str()),
                    split,
                }))
            }
            "settle" => Some(Command::Settle(ExpenseId(self.expense?), user)),
            "transfer" => {
                let amount = Money::from_decimal(self.amount?, scale).ok()?;
                Some(Command::Transfer(
                    trip,
                    Transfer {
                        from: user,
                        to: UserId(self.to?),
                        amount,
                    },
                ))
            }
            _ => None,
        }
    }
}

/// Parses `""` as an equal split and `"1:5.00;2:4.50"` as custom shares.
fn parse_split(raw: &str, scale: u32) -> Option<SplitPolicy> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("equal") {
        return Some(SplitPolicy::Equal);
    }

    let mut shares = Vec::new();
    for part in raw.split(';').filter(|part| !part.trim().is_empty()) {
        let (user, amount) = part.split_once(':')?;
        let user = user.trim().parse::<u32>().ok()?;
        let amount = amount.trim().parse::<Decimal>().ok()?;
        shares.push((UserId(user), Money::from_decimal(amount, scale).ok()?));
    }
    Some(SplitPolicy::Custom(shares))
}

fn apply(engine: &Engine, command: Command) -> Result<(), LedgerError> {
    match command {
        Command::Join(trip, user) => {
            engine.join_trip(trip, user);
        }
        Command::Leave(trip, user) => engine.leave_trip(trip, user)?,
        Command::Expense(request) => {
            engine.add_expense(request)?;
        }
        Command::Settle(expense, user) => {
            engine.settle_split(expense, user)?;
        }
        Command::Transfer(trip, transfer) => {
            engine.record_transfer(trip, &transfer)?;
        }
    }
    Ok(())
}

/// Replays a CSV command log into a fresh engine.
///
/// Streams the input, so arbitrarily long logs are fine. Malformed rows and
/// rejected commands are logged and skipped; they never stop the replay.
///
/// # CSV Format
///
/// Columns: `type, trip, user, amount, description, category, split, expense, to`
/// - `join` / `leave`: `trip`, `user`
/// - `expense`: `trip`, `user` (payer), `amount`, `description`, `category`,
///   optional `split` (`1:5.00;2:5.00`; empty for equal)
/// - `settle`: `user`, `expense` (marks that split paid)
/// - `transfer`: `trip`, `user` (payer), `to`, `amount`
///
/// # Example
///
/// ```csv
/// type,trip,user,amount,description,category,split,expense,to
/// join,1,1,,,,,,
/// join,1,2,,,,,,
/// expense,1,1,30.00,Dinner,food,,,
/// transfer,1,2,15.00,,,,,1
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the header is unreadable.
pub fn process_commands<R: Read>(
    reader: R,
    config: EngineConfig,
) -> Result<(Engine, BTreeSet<TripId>), csv::Error> {
    let engine = Engine::with_config(config);
    let mut trips = BTreeSet::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                debug!(line, error = %e, "skipping malformed row");
                continue;
            }
        };

        let row_trip = TripId(record.trip);
        let Some(command) = record.into_command(config.currency_scale) else {
            debug!(line, "skipping invalid command");
            continue;
        };
        let settled = match &command {
            Command::Settle(expense, _) => Some(*expense),
            _ => None,
        };

        if let Err(e) = apply(&engine, command) {
            warn!(line, error = %e, "command rejected");
            continue;
        }
        // A settle row only names the expense; its trip column is not trusted.
        match settled {
            Some(expense) => match engine.expense(expense) {
                Ok(expense) => {
                    trips.insert(expense.trip);
                }
                Err(e) => warn!(line, error = %e, "settled expense not readable"),
            },
            None => {
                trips.insert(row_trip);
            }
        }
    }

    Ok((engine, trips))
}

#[derive(Debug, Serialize)]
struct BalanceRow {
    trip: TripId,
    participant: UserId,
    balance: Decimal,
}

#[derive(Debug, Serialize)]
struct TransferRow {
    trip: TripId,
    from: UserId,
    to: UserId,
    amount: Decimal,
}

#[derive(Debug, Serialize)]
struct SheetRow {
    trip: TripId,
    participant: UserId,
    paid: Decimal,
    owed: Decimal,
    net: Decimal,
}

#[derive(Debug, Serialize)]
struct ExpenseRow {
    trip: TripId,
    expense: ExpenseId,
    payer: UserId,
    amount: Decimal,
    category: String,
    description: String,
    settled: bool,
}

#[derive(Debug)]
enum ReportError {
    Csv(csv::Error),
    Ledger(TripId, LedgerError),
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csv(e) => write!(f, "{}", e),
            Self::Ledger(trip, e) => write!(f, "trip {}: {}", trip, e),
        }
    }
}

impl From<csv::Error> for ReportError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e)
    }
}

/// Writes the requested report for every trip as CSV.
///
/// # Errors
///
/// Returns an error if writing fails or a trip's ledger cannot be reported.
fn write_report<W: Write>(
    engine: &Engine,
    trips: &BTreeSet<TripId>,
    report: Report,
    writer: W,
) -> Result<(), ReportError> {
    let mut wtr = Writer::from_writer(writer);
    let fmt = |trip: TripId, amount: Money| {
        engine
            .format_amount(amount)
            .map_err(|e| ReportError::Ledger(trip, e))
    };

    for &trip in trips {
        match report {
            Report::Balances => {
                let balances = engine.balances(trip).map_err(|e| ReportError::Ledger(trip, e))?;
                for (participant, balance) in balances {
                    wtr.serialize(BalanceRow {
                        trip,
                        participant,
                        balance: fmt(trip, balance)?,
                    })?;
                }
            }
            Report::Plan => {
                let balances = engine.balances(trip).map_err(|e| ReportError::Ledger(trip, e))?;
                let plan = plan_settlement(&balances).map_err(|e| ReportError::Ledger(trip, e))?;
                let residual =
                    apply_transfers(&balances, &plan).map_err(|e| ReportError::Ledger(trip, e))?;
                if residual.values().any(|balance| !balance.is_zero()) {
                    warn!(%trip, "settlement plan leaves residual balances");
                }
                for transfer in plan {
                    wtr.serialize(TransferRow {
                        trip,
                        from: transfer.from,
                        to: transfer.to,
                        amount: fmt(trip, transfer.amount)?,
                    })?;
                }
            }
            Report::Sheet => {
                let sheet = engine
                    .balance_sheet(trip)
                    .map_err(|e| ReportError::Ledger(trip, e))?;
                for (participant, line) in sheet {
                    wtr.serialize(SheetRow {
                        trip,
                        participant,
                        paid: fmt(trip, line.paid)?,
                        owed: fmt(trip, line.owed)?,
                        net: fmt(trip, line.net)?,
                    })?;
                }
            }
            Report::Expenses => {
                for expense in engine.list_expenses(trip) {
                    wtr.serialize(ExpenseRow {
                        trip,
                        expense: expense.id,
                        payer: expense.payer,
                        amount: fmt(trip, expense.amount)?,
                        category: expense.category.to_string(),
                        description: expense.description,
                        settled: expense.settled_at.is_some(),
                    })?;
                }
            }
        }
    }

    wtr.flush().map_err(|e| ReportError::Csv(e.into()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HEADER: &str = "type,trip,user,amount,description,category,split,expense,to\n";

    fn replay(body: &str) -> (Engine, BTreeSet<TripId>) {
        let input = format!("{HEADER}{body}");
        process_commands(Cursor::new(input), EngineConfig::default()).unwrap()
    }

    fn report(body: &str, report: Report) -> String {
        let (engine, trips) = replay(body);
        let mut output = Vec::new();
        write_report(&engine, &trips, report, &mut output).unwrap();
        String::from_utf8(output).unwrap()
    }

    const THREE_FRIENDS: &str = "join,1,1,,,,,,\n\
                                 join,1,2,,,,,,\n\
                                 join,1,3,,,,,,\n";

    #[test]
    fn equal_expense_balances() {
        let (engine, _) = replay(&format!("{THREE_FRIENDS}expense,1,1,1.00,Dinner,food,,,\n"));

        let balances = engine.balances(TripId(1)).unwrap();
        assert_eq!(balances[&UserId(1)], Money(66));
        assert_eq!(balances[&UserId(2)], Money(-33));
        assert_eq!(balances[&UserId(3)], Money(-33));
    }

    #[test]
    fn custom_split_column() {
        let (engine, _) = replay(&format!(
            "{THREE_FRIENDS}expense,1,2,0.10,Taxi,transport,1:0.05;2:0.05;3:0,,\n"
        ));

        let expense = engine.list_expenses(TripId(1)).next().unwrap();
        assert_eq!(expense.category, Category::Transport);
        assert_eq!(expense.split_for(UserId(3)).unwrap().amount, Money(0));
        assert_eq!(engine.balances(TripId(1)).unwrap()[&UserId(1)], Money(-5));
    }

    #[test]
    fn rejected_commands_are_skipped() {
        let (engine, _) = replay(&format!(
            "{THREE_FRIENDS}\
             expense,1,1,0,Nothing,other,,,\n\
             expense,1,9,5.00,Stranger,other,,,\n\
             expense,1,1,5.001,Precise,other,,,\n\
             bogus,1,1,,,,,,\n\
             expense,1,1,3.00,Coffee,food,,,\n"
        ));
        assert_eq!(engine.list_expenses(TripId(1)).count(), 1);
    }

    #[test]
    fn transfer_settles_balances() {
        let (engine, _) = replay(&format!(
            "{THREE_FRIENDS}\
             expense,1,1,1.00,Dinner,food,,,\n\
             transfer,1,2,0.33,,,,,1\n\
             transfer,1,3,0.33,,,,,1\n"
        ));
        assert!(engine.balances(TripId(1)).unwrap().values().all(|b| b.is_zero()));
        assert!(engine.settlement_plan(TripId(1)).unwrap().is_empty());
    }

    #[test]
    fn settle_marks_split_without_moving_balance() {
        let (engine, _) = replay(&format!(
            "{THREE_FRIENDS}expense,1,1,1.00,Dinner,food,,,\nsettle,1,2,,,,,1,\n"
        ));
        let expense = engine.expense(ExpenseId(1)).unwrap();
        assert!(expense.split_for(UserId(2)).unwrap().paid);
        assert_eq!(engine.balances(TripId(1)).unwrap()[&UserId(2)], Money(-33));
    }

    #[test]
    fn settle_row_reports_the_expense_trip() {
        let (engine, trips) = replay(&format!(
            "{THREE_FRIENDS}expense,1,1,1.00,Dinner,food,,,\nsettle,99,2,,,,,1,\n"
        ));
        assert_eq!(trips, BTreeSet::from([TripId(1)]));
        assert!(engine.expense(ExpenseId(1)).unwrap().split_for(UserId(2)).unwrap().paid);
    }

    #[test]
    fn rejected_rows_add_no_trips() {
        let (_, trips) = replay(&format!(
            "{THREE_FRIENDS}expense,7,1,1.00,Lost,food,,,\nsettle,8,2,,,,,42,\n"
        ));
        assert_eq!(trips, BTreeSet::from([TripId(1)]));
    }

    #[test]
    fn plan_report_lists_transfers() {
        let output = report(
            &format!("{THREE_FRIENDS}expense,1,1,1.00,Dinner,food,,,\n"),
            Report::Plan,
        );
        assert_eq!(
            output,
            "trip,from,to,amount\n1,2,1,0.33\n1,3,1,0.33\n"
        );
    }

    #[test]
    fn balances_report_uses_currency_scale() {
        let output = report(
            &format!("{THREE_FRIENDS}expense,1,1,1.00,Dinner,food,,,\n"),
            Report::Balances,
        );
        assert_eq!(
            output,
            "trip,participant,balance\n1,1,0.66\n1,2,-0.33\n1,3,-0.33\n"
        );
    }

    #[test]
    fn sheet_report_has_paid_and_owed() {
        let output = report(
            &format!("{THREE_FRIENDS}expense,1,1,1.00,Dinner,food,,,\n"),
            Report::Sheet,
        );
        assert!(output.starts_with("trip,participant,paid,owed,net\n"));
        assert!(output.contains("1,1,1.00,0.34,0.66\n"));
    }

    #[test]
    fn expenses_report_in_creation_order() {
        let output = report(
            &format!(
                "{THREE_FRIENDS}\
                 expense,1,1,1.00,Dinner,food,,,\n\
                 expense,1,2,2.00,Museum,activity,,,\n"
            ),
            Report::Expenses,
        );
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "trip,expense,payer,amount,category,description,settled");
        assert_eq!(lines[1], "1,1,1,1.00,food,Dinner,false");
        assert_eq!(lines[2], "1,2,2,2.00,activity,Museum,false");
    }

    #[test]
    fn parse_split_variants() {
        assert_eq!(parse_split("", 2), Some(SplitPolicy::Equal));
        assert_eq!(parse_split("equal", 2), Some(SplitPolicy::Equal));
        assert_eq!(
            parse_split("1:1.50; 2:0.50", 2),
            Some(SplitPolicy::Custom(vec![
                (UserId(1), Money(150)),
                (UserId(2), Money(50)),
            ]))
        );
        assert_eq!(parse_split("1-1.50", 2), None);
        assert_eq!(parse_split("1:0.001", 2), None);
    }
}
