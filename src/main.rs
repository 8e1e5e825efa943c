use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use pkgdat::archive::{self, ExtractOptions, FileKind};
use pkgdat::{LayeredImage, PkgArchive};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "pkgdat", about = "Decode PKG archives, DAT cipher trees and GI images", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Default log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Log decoder progress (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a .pkg archive into a directory
    Unpack {
        input:  PathBuf,
        output: PathBuf,
        /// Overwrite files that already exist
        #[arg(short, long)]
        force: bool,
    },
    /// Write the decoded structure of a .pkg, .dat or .gi file as JSON
    Dump {
        input:  PathBuf,
        output: PathBuf,
    },
    /// Composite a .gi image and write it as TGA
    Tga {
        input:  PathBuf,
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&cli);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<clap::Error>() {
                Some(usage) => { let _ = usage.print(); }
                None => {
                    tracing::error!("{e}");
                    eprintln!("error: {e}");
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(cli: &Cli) {
    let level: tracing::Level = if cli.verbose {
        tracing::Level::DEBUG
    } else if cli.quiet {
        tracing::Level::ERROR
    } else {
        cli.log_level.parse().unwrap_or(tracing::Level::WARN)
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    tracing_subscriber::registry().with(stderr_layer).init();
}

fn run(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { input, output, force } => {
            require_kind("unpack", &input, FileKind::Pkg)?;
            let pkg = PkgArchive::decode(&mut BufReader::new(File::open(&input)?))?;
            let n = archive::extract_all(&pkg, &output, &ExtractOptions { overwrite: force })?;
            println!("Unpacked {n} file(s) to: {}", output.display());
        }

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { input, output } => {
            FileKind::from_path(&input).map_err(|e| usage(&e.to_string()))?;
            let decoded = archive::open(&input)?;
            std::fs::write(&output, decoded.to_json()?)?;
            println!("Dumped {} → {}", decoded.kind().name(), output.display());
        }

        // ── Tga ──────────────────────────────────────────────────────────────
        Commands::Tga { input, output } => {
            require_kind("tga", &input, FileKind::Gi)?;
            let img = LayeredImage::decode(&mut BufReader::new(File::open(&input)?))?;
            archive::write_image(&img, &output)?;
            println!("Wrote {}x{} image → {}", img.width, img.height, output.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn require_kind(command: &str, input: &Path, expected: FileKind) -> Result<(), clap::Error> {
    let kind = FileKind::from_path(input).map_err(|e| usage(&e.to_string()))?;
    if kind != expected {
        return Err(usage(&format!(
            "'{command}' does not support .{} input (expected .{})",
            kind.name(),
            expected.name()
        )));
    }
    Ok(())
}

fn usage(msg: &str) -> clap::Error {
    Cli::command().error(ErrorKind::InvalidValue, msg)
}
