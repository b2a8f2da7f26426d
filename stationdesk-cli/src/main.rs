use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use stationdesk::worker::{Command, Request, Worker, WorkerEvent, WorkerHandle};
use stationdesk::{Paths, RepositoryFacade};

#[derive(Parser)]
#[command(name = "stationdesk-cli")]
#[command(author, version, about = "Spreadsheet-backed station asset store")]
struct Cli {
    /// Data root; defaults to $STATIONDESK_DATA_DIR or the user data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON-line requests on stdin, answering on stdout
    Serve,

    /// Run a single command given as JSON, e.g. '{"command":"listSheets","args":{"path":"a.xlsx"}}'
    Exec {
        command: String,
    },

    /// Create the lookup workbook and any missing sheets
    EnsureLookups,

    /// Read every station workbook and print the counts
    Aggregate {
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let paths = match cli.data_dir {
        Some(root) => Paths::at(root),
        None => Paths::from_env()?,
    };
    log::info!("Data root: {}", paths.root().display());

    let facade = RepositoryFacade::open(paths)?;
    let mut worker = Worker::spawn(facade)?;

    let outcome = match cli.command {
        Commands::Serve => serve(&mut worker).await,
        Commands::Exec { command } => {
            let command: Command =
                serde_json::from_str(&command).context("Failed to parse command JSON")?;
            run(&mut worker, command).await.and_then(print_json)
        }
        Commands::EnsureLookups => run(&mut worker, Command::EnsureLookupsReady)
            .await
            .and_then(print_json),
        Commands::Aggregate { json } => {
            let report = run(&mut worker, Command::ReadStationsAggregate).await?;
            if json {
                print_json(report)
            } else {
                println!(
                    "{} stations, {} with coordinates, {} files scanned, {} skipped",
                    report["totalCount"],
                    report["validCount"],
                    report["filesScanned"],
                    report["skippedFiles"].as_array().map_or(0, Vec::len)
                );
                Ok(())
            }
        }
    };

    worker.shutdown()?;
    outcome
}

async fn run(worker: &mut WorkerHandle, command: Command) -> Result<Value> {
    worker
        .call(command, |percent, stage| log::info!("[{:>3}%] {}", percent, stage))
        .await
}

fn print_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Requests that cannot be parsed are answered here, under their id when
/// one can be read
fn malformed(line: &str, error: serde_json::Error) -> WorkerEvent {
    let id = serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|v| v.get("id").and_then(Value::as_u64))
        .unwrap_or(0);
    log::warn!("Malformed request {}: {}", id, error);
    WorkerEvent::Response {
        id,
        ok: false,
        result: None,
        error: Some(format!("Malformed request: {}", error)),
    }
}

async fn write_event(stdout: &mut tokio::io::Stdout, event: &WorkerEvent) -> Result<()> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    stdout.write_all(&line).await?;
    stdout.flush().await?;
    Ok(())
}

/// Bridge stdin/stdout to the worker until stdin closes and every accepted
/// request has been answered
async fn serve(worker: &mut WorkerHandle) -> Result<()> {
    let sender = worker.sender();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut input_open = true;
    let mut pending = 0usize;

    loop {
        if !input_open && pending == 0 {
            break;
        }
        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line.context("Failed to read stdin")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match serde_json::from_str::<Request>(&line) {
                        Ok(request) => {
                            sender.send(request)?;
                            pending += 1;
                        }
                        Err(e) => write_event(&mut stdout, &malformed(&line, e)).await?,
                    },
                    None => input_open = false,
                }
            }
            event = worker.next_event() => {
                let Some(event) = event else { break };
                if matches!(event, WorkerEvent::Response { .. }) {
                    pending = pending.saturating_sub(1);
                }
                write_event(&mut stdout, &event).await?;
            }
        }
    }
    Ok(())
}
