use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use simplelog::{Config, LevelFilter, WriteLogger};
use tokio_util::sync::CancellationToken;

use speedbinb_export::export::{
    ConsoleSurface, DirectorySaver, ExportJob, ExportOptions, ExportRequest, Exporter,
};
use speedbinb_export::ExportError;
use speedbinb_export::host::HostReader;
use speedbinb_export::host::snapshot::SnapshotReader;
use speedbinb_export::panic_handler;
use speedbinb_export::settings::{self, Settings};

#[derive(Parser, Debug)]
#[command(name = "speedbinb-export", version, about)]
struct Args {
    /// Directory holding the captured reader session (session.json + tiles)
    #[arg(short, long)]
    session: PathBuf,

    /// Pages to export, e.g. "1-5, 8, 11-13"; blank exports every page
    #[arg(short, long, default_value = "")]
    pages: String,

    /// Export every page, ignoring --pages
    #[arg(short, long)]
    all: bool,

    /// Archive name; defaults to the comic title
    #[arg(short, long, default_value = "")]
    name: String,

    /// Directory the archive is saved into
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Give up on a page that has not rendered after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Interval between render checks in milliseconds
    #[arg(long)]
    poll_ms: Option<u64>,

    /// Settings file to use instead of the per-user config
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "speedbinb-export.log")]
    log_file: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// No progress output on stderr
    #[arg(short, long)]
    quiet: bool,
}

fn apply_overrides(settings: &mut Settings, args: &Args) {
    if let Some(dir) = &args.output_dir {
        settings.output_dir = Some(dir.clone());
    }
    if let Some(timeout) = args.timeout_ms.filter(|ms| *ms > 0) {
        settings.navigation.timeout_ms = timeout;
    }
    if let Some(poll) = args.poll_ms.filter(|ms| *ms > 0) {
        settings.navigation.poll_interval_ms = poll;
    }
}

/// Rejected input exits with 2, a failed or cancelled job with 1.
fn exit_with(err: ExportError) -> ! {
    eprintln!("{err}");
    log::logger().flush();
    std::process::exit(if err.is_validation() { 2 } else { 1 });
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    WriteLogger::init(
        level,
        Config::default(),
        File::create(&args.log_file)
            .with_context(|| format!("Failed to create log file {}", args.log_file.display()))?,
    )?;
    panic_handler::initialize_panic_handler();

    info!("Starting speedbinb-export");

    let mut settings = settings::load_settings(args.config.as_deref());
    apply_overrides(&mut settings, &args);

    let reader = SnapshotReader::open(&args.session)?;

    let request = ExportRequest {
        pages: args.pages.clone(),
        all_pages: args.all,
        archive_name: args.name.clone(),
    };
    let title = reader.title();
    let job = match ExportJob::from_request(&request, reader.total_pages(), title.as_deref()) {
        Ok(job) => job,
        Err(e) => {
            error!("Rejected page selection {:?}: {e}", request.pages);
            exit_with(ExportError::from(e));
        }
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling export");
            on_interrupt.cancel();
        }
    });

    let saver = DirectorySaver::new(settings.output_dir());
    info!("Saving archives into {}", saver.dir().display());
    let surface = ConsoleSurface::new(args.quiet);
    let exporter = Exporter::new(
        &reader,
        &saver,
        &surface,
        ExportOptions::from_settings(&settings),
    );

    let started = std::time::Instant::now();
    let archive = match exporter.run_export(job, &cancel).await {
        Ok(archive) => archive,
        Err(e) => exit_with(e),
    };
    info!(
        "Exported {} pages to {} in {:?}",
        archive.entries.len(),
        archive.path.display(),
        started.elapsed()
    );
    println!("{}", archive.path.display());

    info!("Shutting down speedbinb-export");
    Ok(())
}
