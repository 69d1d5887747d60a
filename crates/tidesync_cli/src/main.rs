//! TideSync CLI
//!
//! Command-line tools for TideSync export bundles and payloads.
//!
//! # Commands
//!
//! - `inspect` - Display bundle statistics and metadata
//! - `verify` - Verify bundle integrity (optionally that payloads decrypt)
//! - `encrypt` / `decrypt` - Convert between plaintext and wire payloads
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use commands::verify::KeyCheck;
use std::path::PathBuf;
use tidesync_engine::KdfParams;
use tracing_subscriber::EnvFilter;

/// TideSync command-line tools.
#[derive(Parser)]
#[command(name = "tidesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Key derivation arguments shared by the payload commands.
#[derive(clap::Args)]
struct KeyArgs {
    /// Account password
    #[arg(long)]
    password: String,

    /// Key derivation salt in hex
    #[arg(long)]
    salt: String,

    /// Argon2 memory cost in KiB
    #[arg(long)]
    kdf_memory: Option<u32>,

    /// Argon2 iterations
    #[arg(long)]
    kdf_iterations: Option<u32>,
}

impl KeyArgs {
    fn kdf(&self) -> KdfParams {
        let mut params = KdfParams::default();
        if let Some(memory) = self.kdf_memory {
            params.mem_cost_kib = memory;
        }
        if let Some(iterations) = self.kdf_iterations {
            params.time_cost = iterations;
        }
        params
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Display bundle statistics and metadata
    Inspect {
        /// Bundle file (JSON)
        bundle: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify bundle integrity
    Verify {
        /// Bundle file (JSON)
        bundle: PathBuf,

        /// Also check that every live payload decrypts with this password
        #[arg(long, requires = "salt")]
        password: Option<String>,

        /// Key derivation salt in hex
        #[arg(long, requires = "password")]
        salt: Option<String>,
    },

    /// Encrypt a file (or `-` for stdin) into a wire payload
    Encrypt {
        #[command(flatten)]
        key: KeyArgs,

        /// Input file
        input: PathBuf,
    },

    /// Decrypt a wire payload read from a file (or `-` for stdin)
    Decrypt {
        #[command(flatten)]
        key: KeyArgs,

        /// Input file
        input: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { bundle, format } => {
            commands::inspect::run(&bundle, &format)?;
        }
        Commands::Verify {
            bundle,
            password,
            salt,
        } => {
            let key = password.zip(salt).map(|(password, salt_hex)| KeyCheck {
                password,
                salt_hex,
                kdf: KdfParams::default(),
            });
            commands::verify::run(&bundle, key.as_ref())?;
        }
        Commands::Encrypt { key, input } => {
            commands::crypt::run_encrypt(&key.password, &key.salt, &input, &key.kdf())?;
        }
        Commands::Decrypt { key, input } => {
            commands::crypt::run_decrypt(&key.password, &key.salt, &input, &key.kdf())?;
        }
        Commands::Version => {
            println!("TideSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Bundle format v{}",
                tidesync_protocol::BUNDLE_FORMAT_VERSION
            );
        }
    }

    Ok(())
}
