use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, ValueEnum};
use tributary::{
    BrokerBackend, ConfigLoader, TopicRegistry, schema::InMemorySchemaRegistry, shutdown_channel,
    telemetry,
};
use tributary_stations::{StationsPipeline, demo};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum BackendKind {
    Memory,
    Kafka,
}

#[derive(Parser, Debug)]
#[command(
    name = "stations-stream",
    version,
    author,
    about = "Transform transit station rows into per-line station records"
)]
struct Args {
    /// Config file (JSON or YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Broker backend: memory or kafka
    #[arg(long, value_enum, default_value_t = BackendKind::Memory)]
    backend: BackendKind,

    /// Produce a few demo stations to the input topic before starting (always
    /// done with the memory backend)
    #[arg(long)]
    seed_demo: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    run_for: Option<u64>,

    /// Default log directive when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    telemetry::init_with_default(&args.log_level);

    let mut config = StationsPipeline::default_config();
    if let Some(path) = &args.config {
        let loaded = ConfigLoader::from_path(path)?;
        config.broker = loaded.broker;
        config.provisioner = loaded.provisioner;
        config.consumer = loaded.consumer.or(config.consumer);
        config.producer = loaded.producer.or(config.producer);
    }

    let backend = match args.backend {
        BackendKind::Memory => BrokerBackend::new_memory(),
        #[cfg(feature = "kafka")]
        BackendKind::Kafka => BrokerBackend::Kafka(config.broker.clone()),
        #[cfg(not(feature = "kafka"))]
        BackendKind::Kafka => {
            return Err("built without the `kafka` feature".into());
        }
    };

    let schema_registry = Arc::new(InMemorySchemaRegistry::new());
    let topics = TopicRegistry::new();

    if args.seed_demo || matches!(args.backend, BackendKind::Memory) {
        let seeded = demo::seed(&backend, schema_registry.clone(), topics.clone()).await?;
        tracing::info!(seeded, "demo stations produced");
    }

    let pipeline =
        StationsPipeline::build(&backend, schema_registry, topics, &config).await?;
    let table = pipeline.table();

    let (trigger, shutdown) = shutdown_channel();
    let run_for = args.run_for.map(Duration::from_secs);
    tokio::spawn(async move {
        match run_for {
            Some(limit) => tokio::time::sleep(limit).await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                }
            }
        }
        tracing::info!("shutting down stations stream");
        trigger.trigger();
    });

    let report = pipeline.run(shutdown).await?;
    for station in &report.stations {
        tracing::info!(
            station_id = station.station_id,
            name = %station.station_name,
            line = %station.line,
            order = station.order,
            "station"
        );
    }
    tracing::info!(
        consumed = report.records_consumed,
        forwarded = report.records_forwarded,
        tabled = table.len(),
        "done"
    );
    Ok(())
}
