//! CLI entrypoint for the frankenio harness.

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};

use frankenio_harness::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
use frankenio_harness::{HarnessError, StressConfig, dump, pipe_stress, roundtrip, sha256_hex};

/// Inspection and stress tooling for frankenio streams.
#[derive(Debug, Parser)]
#[command(name = "frankenio-harness")]
#[command(about = "Inspection and stress harness for frankenio streams")]
struct Cli {
    /// Write a structured JSONL record of the run to this path.
    #[arg(long, global = true)]
    log: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Decode a serialization stream to JSON.
    Dump {
        /// Serialized input file.
        #[arg(long)]
        input: PathBuf,
        /// Output JSON path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Decode a stream, re-encode it and compare the bytes.
    Roundtrip {
        /// Serialized input file.
        #[arg(long)]
        input: PathBuf,
        /// Protocol version used to re-encode (1 or 2).
        #[arg(long, default_value_t = 2)]
        protocol: u8,
    },
    /// Push bytes through a pipe between two threads and report throughput.
    PipeStress {
        /// Total bytes to transfer.
        #[arg(long, default_value_t = 1 << 24)]
        bytes: u64,
        /// Pipe buffer size.
        #[arg(long, default_value_t = 1024)]
        size: usize,
        /// Writer chunk size.
        #[arg(long, default_value_t = 4096)]
        chunk: usize,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Dump { .. } => "dump",
            Self::Roundtrip { .. } => "roundtrip",
            Self::PipeStress { .. } => "pipe-stress",
        }
    }
}

fn run(command: &Command) -> Result<LogEntry, HarnessError> {
    let entry = LogEntry::new("", LogLevel::Info, format!("{}_done", command.name()))
        .with_command(command.name());
    match command {
        Command::Dump { input, output } => {
            let bytes = std::fs::read(input)?;
            let rendered = serde_json::to_string_pretty(&dump(&bytes)?)?;
            match output {
                Some(path) => std::fs::write(path, format!("{rendered}\n"))?,
                None => println!("{rendered}"),
            }
            Ok(entry
                .with_outcome(Outcome::Pass)
                .with_bytes(bytes.len() as u64)
                .with_sha256(sha256_hex(&bytes)))
        }
        Command::Roundtrip { input, protocol } => {
            let bytes = std::fs::read(input)?;
            let report = roundtrip(&bytes, *protocol)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            let outcome = if report.identical {
                Outcome::Pass
            } else {
                Outcome::Fail
            };
            Ok(entry
                .with_outcome(outcome)
                .with_bytes(report.input_len as u64)
                .with_sha256(report.output_sha256.clone())
                .with_details(serde_json::to_value(&report)?))
        }
        Command::PipeStress { bytes, size, chunk } => {
            let report = pipe_stress(StressConfig {
                bytes: *bytes,
                pipe_size: *size,
                chunk: *chunk,
            })?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            let outcome = if report.intact() {
                Outcome::Pass
            } else {
                Outcome::Fail
            };
            Ok(entry
                .with_component("pipe")
                .with_outcome(outcome)
                .with_bytes(report.bytes)
                .with_latency_ns(report.elapsed_ns)
                .with_sha256(report.reader_sha256.clone()))
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let run_id = format!("run-{}", std::process::id());
    let mut emitter = match &cli.log {
        Some(path) => Some(LogEmitter::to_file(path, "harness", &run_id)?),
        None => None,
    };

    let started = Instant::now();
    let result = run(&cli.command);
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    if let Some(emitter) = emitter.as_mut() {
        let entry = match &result {
            Ok(entry) => entry.clone(),
            Err(err) => {
                let mut entry = LogEntry::new(
                    "",
                    LogLevel::Error,
                    format!("{}_failed", cli.command.name()),
                )
                .with_command(cli.command.name())
                .with_outcome(Outcome::Error)
                .with_details(serde_json::json!({ "error": err.to_string() }));
                if let Some(errno) = err.errno() {
                    entry = entry.with_errno(errno);
                }
                entry
            }
        };
        emitter.emit_entry(entry.with_duration_ms(elapsed_ms))?;
        emitter.flush()?;
    }

    match result {
        Ok(entry) if entry.outcome == Some(Outcome::Fail) => {
            Err(format!("{} reported a mismatch", cli.command.name()).into())
        }
        Ok(_) => Ok(()),
        Err(err) => Err(err.into()),
    }
}
