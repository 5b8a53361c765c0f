//! Passgate CLI - WebAuthn payload inspection and ceremony rehearsal.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use colored::Colorize;
use passgate_core::CoseAlgorithm;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod exit_codes;
mod utils;

use commands::demo::{AttestationArg, DemoOptions};
use commands::inspect::PayloadKind;
use exit_codes::ExitCode;

const EXIT_CODES_HELP: &str = "Exit codes:
  0   Success
  1   General error
  64  Invalid relying party configuration
  65  Payload rejected or ceremony failed
  66  Input file not found or unreadable";

#[derive(Parser)]
#[command(name = "passgate")]
#[command(author, version, about = "WebAuthn relying-party toolkit", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Only report failures (exit code and stderr)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log ceremony details to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode authenticator data, an attestation object or a COSE key
    Inspect {
        /// Structure to decode
        #[arg(value_enum)]
        kind: PayloadKind,

        /// Encoded payload (base64url, or hex with --hex)
        #[arg(value_name = "DATA", required_unless_present = "file")]
        data: Option<String>,

        /// Read the payload from a file (raw bytes, or hex text with --hex)
        #[arg(short, long, value_name = "FILE", conflicts_with = "data")]
        file: Option<PathBuf>,

        /// Payload is hex instead of base64url
        #[arg(long)]
        hex: bool,

        /// Print the decoded fields as JSON
        #[arg(long)]
        json: bool,
    },

    /// Register a passkey and sign in with it against an in-memory relying party
    Demo {
        /// Credential algorithm (ES256, ES384, ES512, EdDSA, RS256.., PS256..)
        #[arg(short, long, default_value = "ES256", value_parser = utils::parse_algorithm)]
        algorithm: CoseAlgorithm,

        /// Attestation produced by the software authenticator
        #[arg(long, value_enum, default_value = "none")]
        attestation: AttestationArg,

        /// Number of authentication ceremonies to run
        #[arg(short, long, default_value_t = 1)]
        rounds: u32,

        /// Relying party id
        #[arg(long, default_value = "localhost")]
        rp_id: String,

        /// Origin the ceremonies run on
        #[arg(long, default_value = "http://localhost:3001")]
        origin: String,

        /// Replay an old signature counter on the last round, as a cloned authenticator would
        #[arg(long)]
        clone_last: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "passgate_core=debug,passgate=debug,info"
    } else {
        "error"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Inspect {
            kind,
            data,
            file,
            hex,
            json,
        } => utils::read_payload(data.as_deref(), file.as_deref(), hex)
            .and_then(|bytes| commands::inspect::execute(kind, &bytes, json, cli.quiet)),
        Commands::Demo {
            algorithm,
            attestation,
            rounds,
            rp_id,
            origin,
            clone_last,
        } => {
            let options = DemoOptions {
                algorithm,
                attestation,
                rounds,
                rp_id,
                origin,
                clone_last,
            };
            commands::demo::execute(options, cli.quiet).await
        }
    };

    if let Err(err) = result {
        let exit = ExitCode::from_anyhow(&err);
        eprintln!("{} {}", "Error:".red().bold(), exit.message);
        process::exit(exit.code);
    }
}
