// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use report_courier::codec::{encrypt_for, open_message};
use report_courier::config::CourierConfig;
use report_courier::keys::{Address, KeyRing};
use report_courier::ledger::NoLedgerClient;
use report_courier::logging::{self, LogFormat};
use report_courier::service::Courier;
use report_courier::sources::{problem_channel, LogRecord, ProblemEvent, ProblemSender};

const PROBLEM_CAPACITY: usize = 64;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Encrypt and decrypt report payloads with the device identity.
#[derive(Parser)]
#[command(name = "report-courier", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a new seed phrase and print it with its address.
    Keygen,
    /// Print the address of the configured seed.
    Address,
    /// Encrypt input for one or more recipients (the sender can always read it).
    Encrypt {
        #[arg(long = "recipient", required = true)]
        recipients: Vec<String>,
        /// Read from this file instead of stdin.
        input: Option<PathBuf>,
    },
    /// Decrypt an envelope or sealed value written by `sender`.
    Decrypt {
        #[arg(long)]
        sender: String,
        input: Option<PathBuf>,
    },
    /// Run the report service until ctrl-c. Host log records are read as
    /// JSON lines from stdin.
    Run,
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = logging::init(LogFormat::from_env()) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    match cli.command {
        Command::Keygen => {
            let keyring = KeyRing::generate()?;
            println!("{}", keyring.phrase());
            println!("{}", keyring.address());
        }
        Command::Address => {
            println!("{}", sender_keyring()?.address());
        }
        Command::Encrypt { recipients, input } => {
            let keyring = sender_keyring()?;
            let plaintext = read_input(input)?;
            let envelope = encrypt_for(&plaintext, &keyring, &recipients)?;
            println!("{}", envelope.to_json()?);
        }
        Command::Decrypt { sender, input } => {
            let keyring = sender_keyring()?;
            let sender = Address::parse(&sender)?;
            let message = String::from_utf8(read_input(input)?)?;
            let plaintext = open_message(message.trim(), &keyring, &sender)?;
            io::stdout().write_all(&plaintext)?;
        }
        Command::Run => run_service().await?,
    }
    Ok(())
}

async fn run_service() -> CliResult<()> {
    let config = CourierConfig::from_env()?;
    warn!("No ledger client configured; ledger writes will fail and release their content");
    let courier = Courier::from_config(&config, Arc::new(NoLedgerClient))?;

    let (problems, receiver) = problem_channel(PROBLEM_CAPACITY);
    tokio::spawn(forward_log_records(problems));

    courier
        .run(receiver, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for ctrl-c");
            }
        })
        .await?;
    Ok(())
}

async fn forward_log_records(problems: ProblemSender) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Reading log records failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let record: LogRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed log record");
                continue;
            }
        };
        if let Some(event) = ProblemEvent::from_log_record(&record) {
            if problems.send(event).await.is_err() {
                break;
            }
        }
    }
    info!("Log record input closed");
}

fn sender_keyring() -> CliResult<KeyRing> {
    let config = CourierConfig::from_env()?;
    let keyring = KeyRing::from_seed(config.require_sender_seed()?)?;
    debug!(address = %keyring.address(), "Loaded sender seed");
    Ok(keyring)
}

fn read_input(path: Option<PathBuf>) -> CliResult<Vec<u8>> {
    match path {
        Some(path) => Ok(std::fs::read(path)?),
        None => {
            let mut buffer = Vec::new();
            io::stdin().read_to_end(&mut buffer)?;
            Ok(buffer)
        }
    }
}
