use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use daloy_service::config::{Config, SourceConfig};
use daloy_service::delivery::{DeliveryWorker, LogMailer, SmtpMailer};
use daloy_service::ingest::ReadingSource;
use daloy_service::ingest::remote::RemoteSource;
use daloy_service::ingest::replay::ReplaySource;
use daloy_service::ingest::serial::SerialSource;
use daloy_service::logging::{self, DataSource};
use daloy_service::monitor::Monitor;
use daloy_service::snapshot::SnapshotHandle;
use daloy_service::verify;

#[derive(Parser, Debug)]
#[command(name = "daloy_service", version, about = "Canal water-level monitor and alerter")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "DALOY_CONFIG", default_value = "daloy.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start monitoring (default)
    Run,
    /// Check the source, journal and SMTP relay, then exit
    Verify {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config),
        Command::Verify { json } => {
            let report = verify::run_verification(&config);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                verify::print_summary(&report);
            }
            if report.is_deployable() {
                Ok(())
            } else {
                Err("verification failed".into())
            }
        }
    }
}

fn run(config: Config) -> Result<(), Box<dyn Error>> {
    logging::init_logger(&config.logging.level, config.logging.file.as_deref())?;

    let journal = config.journal.journal();
    let mut source = build_source(&config.source, &journal)?;

    let (queue, worker) = match config.smtp.clone() {
        Some(smtp) => DeliveryWorker::spawn(SmtpMailer::new(smtp)?)?,
        None => {
            tracing::warn!(
                source = %DataSource::Mail,
                "no [smtp] section; alerts will be logged, not mailed"
            );
            DeliveryWorker::spawn(LogMailer)?
        }
    };

    // Logs from one policy are not comparable with logs from the other.
    tracing::info!(
        source = %DataSource::System,
        policy = %config.monitor.policy,
        journal = %journal.dir().display(),
        "classification policy for this deployment"
    );

    let monitor = Monitor::new(
        config.monitor.policy,
        config.recipient().map(str::to_string),
        queue,
        journal,
        SnapshotHandle::new(config.monitor.history_len),
    )
    .with_stale_after(config.monitor.stale_after());

    let ticks = crossbeam_channel::tick(config.monitor.poll_interval());
    monitor.run(source.as_mut(), &ticks);

    drop(monitor);
    match worker.join() {
        Ok(stats) => tracing::info!(sent = stats.sent, failed = stats.failed, "delivery worker stopped"),
        Err(_) => tracing::error!(source = %DataSource::Mail, "delivery worker panicked"),
    }
    Ok(())
}

fn build_source(
    source: &SourceConfig,
    journal: &daloy_service::journal::Journal,
) -> Result<Box<dyn ReadingSource>, Box<dyn Error>> {
    Ok(match source {
        SourceConfig::Serial { path } => Box::new(SerialSource::new(path.clone())),
        SourceConfig::Remote { url, timeout_ms } => Box::new(RemoteSource::new(
            url.clone(),
            Duration::from_millis(*timeout_ms),
        )?),
        SourceConfig::Replay { day, looped } => {
            let mut replay = ReplaySource::load(journal, *day)?;
            replay.looped = *looped;
            Box::new(replay)
        }
    })
}
