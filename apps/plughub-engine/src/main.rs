//! PlugHub processing engine
//!
//! File-in, file-out command line tool run by the server once per request.
//! Exit status follows sysexits: 64 usage, 65 data, 66 missing input,
//! 70 internal failure. Failures are reported as one line on stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod error;

use error::EX_USAGE;

#[derive(Parser, Debug)]
#[command(name = "plughub-engine")]
#[command(version, about = "PDF processing engine for PlugHub")]
struct Cli {
    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt a PDF with one password for opening and owning
    Lock {
        input: PathBuf,
        output: PathBuf,
        password: String,
    },
    /// Remove encryption with the user or owner password
    Unlock {
        input: PathBuf,
        output: PathBuf,
        password: String,
    },
    /// One PDF per page, zipped
    Split {
        input: PathBuf,
        output: PathBuf,
        /// Page ranges such as "1-3, 5"
        #[arg(long)]
        pages: Option<String>,
    },
    /// Concatenate PDFs in argument order
    Merge {
        output: PathBuf,
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },
    /// Cover text runs containing any term
    Redact {
        input: PathBuf,
        output: PathBuf,
        #[arg(required = true, num_args = 1..)]
        terms: Vec<String>,
    },
    /// Render every page to PNG, zipped (needs pdfium at runtime)
    PdfToImages { input: PathBuf, output: PathBuf },
    /// One page per image
    ImagesToPdf {
        output: PathBuf,
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => {
            // --help and --version
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let rendered = e.to_string();
            eprintln!("{}", rendered.lines().next().unwrap_or("Invalid arguments."));
            return ExitCode::from(EX_USAGE);
        }
    };

    let default_filter = if cli.verbose {
        "plughub_engine=debug,plughub_core=debug"
    } else {
        "plughub_engine=warn"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match commands::run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.line());
            ExitCode::from(e.exit_code())
        }
    }
}
