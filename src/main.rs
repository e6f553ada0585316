use chrono::Utc;
use clap::Parser;
use miette::{IntoDiagnostic, Result, miette};
use paycontrol::application::service::PaymentService;
use paycontrol::config::PaymentConfig;
use paycontrol::domain::clock::{Clock, ClockMock, SystemClock};
use paycontrol::domain::payment::InternalCallContext;
use paycontrol::domain::plugin::PluginRegistry;
use paycontrol::domain::ports::PaymentDaoRef;
use paycontrol::infrastructure::in_memory::InMemoryPaymentDao;
use paycontrol::infrastructure::notification_queue::InMemoryNotificationQueueService;
use paycontrol::infrastructure::plugins::RetrySchedulePlugin;
use paycontrol::interfaces::csv::request_reader::PaymentRequestReader;
use paycontrol::interfaces::csv::summary_writer::SummaryWriter;
use paycontrol::interfaces::simulation::{
    SIMULATION_TENANT_RECORD_ID, ScriptedPaymentGateway, run_until_idle, summarize,
    wait_until_idle,
};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Upper bound on clock jumps while draining scheduled notifications.
const MAX_SIMULATION_STEPS: usize = 10_000;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input payment requests CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// JSON configuration file (optional)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Deliver notifications on the wall clock through the queue pollers
    /// instead of fast-forwarding a simulated clock.
    #[arg(long)]
    realtime: bool,

    /// How long to wait for pending notifications in realtime mode.
    #[arg(long, default_value_t = 30)]
    wait_secs: u64,
}

fn open_dao(db_path: Option<PathBuf>) -> Result<PaymentDaoRef> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let dao = paycontrol::infrastructure::rocksdb::RocksDbPaymentDao::open(path)
                .into_diagnostic()?;
            Ok(Arc::new(dao))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            tracing::warn!(
                "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Arc::new(InMemoryPaymentDao::new()))
        }
        None => Ok(Arc::new(InMemoryPaymentDao::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PaymentConfig::from_file(path).into_diagnostic()?,
        None => PaymentConfig::default(),
    };

    let simulated_clock = (!cli.realtime).then(|| Arc::new(ClockMock::new(Utc::now())));
    let clock: Arc<dyn Clock> = match &simulated_clock {
        Some(mock) => mock.clone(),
        None => Arc::new(SystemClock),
    };
    let poll_interval = if cli.realtime {
        Some(config.notification_queue.poll_interval().ok_or_else(|| {
            miette!("--realtime needs notification_queue.poll_interval_ms to be set")
        })?)
    } else {
        // The simulator delivers notifications itself as it moves the clock
        None
    };
    let dao = open_dao(cli.db_path)?;
    let gateway = Arc::new(ScriptedPaymentGateway::new());
    let registry = Arc::new(PluginRegistry::new());
    for plugin in &config.control_plugins {
        registry
            .register(
                plugin.name.clone(),
                Arc::new(RetrySchedulePlugin::new(clock.clone(), plugin.retry_delays())),
            )
            .await;
    }
    let queues = Arc::new(InMemoryNotificationQueueService::new(
        clock.clone(),
        poll_interval,
    ));

    let service = PaymentService::new(
        &config,
        dao.clone(),
        gateway.clone(),
        registry,
        queues.clone(),
        clock.clone(),
    );
    service.initialize().await.into_diagnostic()?;
    service.start().await.into_diagnostic()?;

    let file = File::open(cli.input).into_diagnostic()?;
    let reader = PaymentRequestReader::new(file);
    let mut processed: Vec<(String, InternalCallContext)> = Vec::new();
    for record_result in reader.requests() {
        let (record, outcomes) = match record_result.and_then(|record| {
            let outcomes = record.outcomes()?;
            Ok((record, outcomes))
        }) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("Error reading payment request: {}", e);
                continue;
            }
        };
        gateway.script(&record.key, outcomes).await;

        let context = record.call_context(SIMULATION_TENANT_RECORD_ID);
        if let Err(e) = service.process_payment(record.to_request(), context).await {
            error!("Error processing payment request {}: {}", record.key, e);
        }
        if !processed.iter().any(|(key, _)| key == &record.key) {
            processed.push((record.key.clone(), context));
        }
    }

    match (&simulated_clock, poll_interval) {
        (Some(mock), _) => {
            run_until_idle(&queues, mock, MAX_SIMULATION_STEPS).await;
        }
        (None, Some(tick)) => {
            wait_until_idle(&queues, tick, Duration::from_secs(cli.wait_secs)).await;
        }
        (None, None) => {}
    }
    service.stop().await.into_diagnostic()?;

    let summaries = summarize(dao.as_ref(), &processed).await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = SummaryWriter::new(stdout.lock());
    writer.write_summaries(summaries).into_diagnostic()?;

    Ok(())
}
