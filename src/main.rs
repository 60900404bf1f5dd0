use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio::time;

use traffic_inspector::config::{load_config, AppConfig, CliArgs};
use traffic_inspector::listener::capture::check_input_path;
use traffic_inspector::listener::tracking::geo;
use traffic_inspector::listener::Settings;
use traffic_inspector::logging::setup_logging;
use traffic_inspector::{Input, Pipeline, PipelineStatus, TrafficAggregator};

// Headless run: ingest one export, log progress, summarize devices at the end.
pub struct TrafficInspector {
    config: AppConfig,
    aggregator: Arc<TrafficAggregator>,
    pipeline: Pipeline,
}

impl TrafficInspector {
    pub fn new(config: AppConfig) -> Result<Self> {
        let Some(input) = config.ingest.input.clone() else {
            bail!("No input given, pass a file or named pipe");
        };
        check_input_path(&input)?;

        let aggregator = Arc::new(TrafficAggregator::new(
            geo::from_config(&config.geo),
            config.export.dir.clone(),
        ));
        let pipeline = Pipeline::new(&config.ingest, Input::Path(input), aggregator.clone());
        Ok(Self {
            config,
            aggregator,
            pipeline,
        })
    }

    pub async fn blocking_event_loop(mut self) -> Self {
        let mut poll = time::interval(Settings::LIVENESS_POLL);
        let mut report = time::interval(Settings::STATUS_INTERVAL);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl-C");
                    break;
                },
                _ = report.tick() => log_status(&self.pipeline.status()),
                _ = poll.tick() => {
                    if !self.pipeline.is_live() {
                        info!("Ingestion finished");
                        break;
                    }
                },
            }
        }
        self
    }

    pub async fn stop(mut self) -> PipelineStatus {
        self.pipeline.stop().await;
        let status = self.pipeline.status();
        log_status(&status);
        self.summarize(status.time);
        status
    }

    fn summarize(&self, now: f64) {
        let clients = self.aggregator.clients();
        for mac in self.aggregator.devices() {
            let Some(stats) = self.aggregator.device_stats(&mac, now) else {
                continue;
            };
            println!(
                "{}{}\ttx {} B / {} pkts\trx {} B / {} pkts\t{} peers\t{}",
                mac,
                if clients.contains(&mac) { " (client)" } else { "" },
                stats.tx_bytes,
                stats.tx_packets,
                stats.rx_bytes,
                stats.rx_packets,
                stats.connections,
                stats.hostnames.join(",")
            );
            if self.config.export.on_exit && !self.aggregator.export_device(&mac, now) {
                warn!("Export of {} failed", mac);
            }
        }
    }
}

fn log_status(status: &PipelineStatus) {
    info!(
        "time {:.3} processed {} queued {} dropped {} throughput {}/s live {}",
        status.time,
        status.processed,
        status.queue_len,
        status.dropped,
        status.throughput,
        status.live
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config = load_config(&args)?;
    setup_logging(&config.logging)?;

    let mut inspector = TrafficInspector::new(config)?;
    if let Err(e) = inspector.pipeline.start() {
        error!("Ingestion did not start: {}", e);
        eprintln!("{}", e);
        std::process::exit(i32::from(e.code()));
    }

    let status = inspector.blocking_event_loop().await.stop().await;
    info!("Shutting down traffic inspector");
    if let Some(e) = status.error() {
        eprintln!("{}", e);
        std::process::exit(i32::from(e.code()));
    }
    Ok(())
}
