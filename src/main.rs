//! downsonic command line interface

use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

use downsonic::credentials::{self, CredentialRequest, TerminalPrompt};
use downsonic::{
    Progress, Result, RunSummary, ServerAddress, SubsonicClient, SyncConfig, Synchronizer,
    TranscodeOptions,
};

/// Exit code for failed tracks and fatal errors
const EXIT_FAILURE: u8 = 1;
/// Exit code for a run stopped by SIGINT/SIGTERM
const EXIT_INTERRUPTED: u8 = 130;
/// Spinner refresh interval
const PROGRESS_TICK: Duration = Duration::from_millis(120);

/// Mirror an OpenSubsonic music library into a local directory
#[derive(Debug, Parser)]
#[command(name = "downsonic")]
struct Args {
    /// Server address: [http[s]://]host[:port][/path]
    source: String,

    /// Existing directory the library is mirrored into
    destination: PathBuf,

    /// netrc file to read credentials from (default: ~/.netrc)
    #[arg(long, value_name = "PATH")]
    netrc_file: Option<PathBuf>,

    /// Username
    #[arg(short = 'u', long = "user", env = "DOWNSONIC_USER")]
    user: Option<String>,

    /// Password
    #[arg(short = 'p', long, env = "DOWNSONIC_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Maximum bitrate in kbps (0 = no limit)
    #[arg(short = 'b', long, value_name = "KBPS")]
    bitrate: Option<u32>,

    /// Format the server should transcode to ("raw" for the original files)
    #[arg(short = 'F', long, value_name = "FORMAT")]
    format: Option<String>,

    /// Extension every track is saved with (default: inferred per track)
    #[arg(short = 'e', long, value_name = "EXT")]
    extension: Option<String>,

    /// Number of concurrent downloads (default: CPUs + 4, at most 32)
    #[arg(short = 't', long = "threads", value_name = "THREADS")]
    threads: Option<usize>,

    /// Download tracks even when a file already exists at their path
    #[arg(short = 'f', long)]
    force: bool,

    /// Verbosity: -V errors, -VVV warnings, -VVVV info, -VVVVV debug
    #[arg(short = 'V', long = "verbose", action = ArgAction::Count)]
    verbosity: u8,

    /// Never prompt and never draw a progress bar
    #[arg(long)]
    non_interactive: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let draw = !args.non_interactive && std::io::stderr().is_terminal();

    // Stays hidden until credentials are resolved so it never covers a prompt
    let bar = ProgressBar::hidden();
    init_tracing(args.verbosity, bar.clone());

    let result = run(args, &bar, draw).await;
    bar.finish_and_clear();

    match &result {
        Ok(summary) => println!("{summary}"),
        Err(e) => tracing::error!(severity = %e.severity(), "{e}"),
    }
    ExitCode::from(exit_code(&result))
}

/// Process exit status for the outcome of a run
fn exit_code(result: &Result<RunSummary>) -> u8 {
    match result {
        Ok(summary) if summary.interrupted => EXIT_INTERRUPTED,
        Ok(summary) if summary.has_failures() => EXIT_FAILURE,
        Ok(_) => 0,
        Err(_) => EXIT_FAILURE,
    }
}

async fn run(args: Args, bar: &ProgressBar, draw: bool) -> Result<RunSummary> {
    let synchronizer = prepare(args)?;
    if draw {
        start_drawing(bar);
    }

    let cancel = CancellationToken::new();
    let signals = downsonic::cancel_on_signal(cancel.clone());
    let display = tokio::spawn(show_progress(synchronizer.progress(), bar.clone()));

    let result = synchronizer.run(cancel).await;

    display.abort();
    signals.abort();
    result
}

/// Resolve credentials (possibly prompting) and build the synchronizer
fn prepare(args: Args) -> Result<Synchronizer> {
    let address = ServerAddress::parse(&args.source)?;

    let request = CredentialRequest {
        username: args.user,
        password: args.password,
        netrc_file: args.netrc_file,
        machines: vec![address.host.clone(), args.source.clone()],
        interactive: !args.non_interactive,
    };
    let credentials = credentials::resolve(&request, &TerminalPrompt)?;

    let mut config = SyncConfig::new(args.destination);
    config.transcode = TranscodeOptions::new(args.format, args.bitrate);
    config.extension = args.extension;
    config.force = args.force;
    if let Some(threads) = args.threads {
        config.concurrency = threads;
    }

    tracing::info!(server = %address, destination = %config.destination.display(), "starting sync");
    let client = SubsonicClient::new(&address, credentials)?;
    Synchronizer::new(Arc::new(client), config)
}

/// Mirror progress counts onto the bar until the run ends
async fn show_progress(progress: Arc<Progress>, bar: ProgressBar) {
    let mut updates = progress.subscribe();
    loop {
        let snapshot = *updates.borrow_and_update();
        bar.set_length(snapshot.total);
        bar.set_position(snapshot.resolved());
        bar.set_message(format!(
            "{} active, {} skipped, {} failed",
            snapshot.active, snapshot.skipped, snapshot.failed
        ));
        if updates.changed().await.is_err() {
            break;
        }
    }
}

/// Style the bar and start drawing it on stderr
fn start_drawing(bar: &ProgressBar) {
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} tracks ({elapsed}) {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("━━╌");
    bar.set_style(style);
    bar.set_draw_target(ProgressDrawTarget::stderr());
    bar.enable_steady_tick(PROGRESS_TICK);
}

/// Level shown for a given number of `-V` flags
fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 | 2 => "error",
        3 => "warn",
        4 => "info",
        _ => "debug",
    }
}

/// Install the fmt subscriber; `RUST_LOG` overrides the `-V` level
fn init_tracing(verbosity: u8, bar: ProgressBar) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("downsonic={}", level_for(verbosity))));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(BarWriter(bar))
        .try_init();
    if let Err(e) = installed {
        eprintln!("failed to install tracing subscriber: {e}");
    }
}

/// stderr writer that hides the progress bar while a log line is printed
#[derive(Clone)]
struct BarWriter(ProgressBar);

impl Write for BarWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.suspend(|| std::io::stderr().write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.0.suspend(|| std::io::stderr().write_all(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for BarWriter {
    type Writer = BarWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
