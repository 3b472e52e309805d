//! `consign` operator commands.
//!
//! Every invocation rebuilds a coordinator from the JSON file repository in
//! the configured data directory, so commands compose across processes:
//! `open`, then any number of `add`, then `close`.
//!
//! Courier queues die with each process, so `close` and `retry` first requeue
//! the unsent consignments of every closed batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use consign_batch::{BatchStatus, ConsignmentRecord};
use consign_core::{BatchId, ProductRef};
use consign_dispatch::{CoordinatorConfig, DispatchCoordinator};
use consign_infra::{AppConfig, ConfiguredCarriers, JsonFileDispatchRepository, WeightBandSelector};

type Coordinator = DispatchCoordinator<JsonFileDispatchRepository, WeightBandSelector, Arc<ConfiguredCarriers>>;

#[derive(Debug, Parser)]
#[command(name = "consign")]
#[command(about = "Batch consignments and dispatch them to couriers", long_about = None)]
pub struct Cli {
    /// Log output: json (default) or pretty
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Open a dispatch batch (prints the open batch id if one already exists)
    Open,

    /// Add a consignment to the open batch
    Add {
        /// Product SKU; repeat together with --weight and --value
        #[arg(long = "sku", conflicts_with = "products")]
        skus: Vec<String>,

        /// Product weight in grams
        #[arg(long = "weight")]
        weights: Vec<u32>,

        /// Product value in cents
        #[arg(long = "value")]
        values: Vec<u64>,

        /// JSON file with an array of {"sku", "weight_grams", "value_cents"}
        #[arg(long)]
        products: Option<PathBuf>,
    },

    /// Close the open batch and flush its couriers, with anything left unsent earlier
    Close,

    /// Requeue unsent consignments of every closed batch and flush them
    Retry,

    /// Show the latest batch
    Status,
}

#[derive(Debug, Serialize)]
struct StatusView {
    batch_id: BatchId,
    status: BatchStatus,
    consignments: usize,
    unsent: Vec<ConsignmentRecord>,
}

/// Run one command and return what should be printed.
pub fn run(command: Command, config: &AppConfig) -> Result<String> {
    let mut coordinator = build(config)?;

    match command {
        Command::Open => {
            let id = coordinator.open_batch().context("opening batch")?;
            Ok(format!("batch {id} open"))
        }
        Command::Add {
            skus,
            weights,
            values,
            products,
        } => {
            let products = match products {
                Some(path) => products_from_file(&path)?,
                None => products_from_args(skus, weights, values)?,
            };
            resume_open(&mut coordinator)?;
            let consignment = coordinator
                .create_consignment(products)
                .context("creating consignment")?;
            to_json(&consignment.record())
        }
        Command::Close => {
            resume_open(&mut coordinator)?;
            requeue_leftovers(&mut coordinator)?;
            let report = coordinator.close_current_batch().context("closing batch")?;
            to_json(&report)
        }
        Command::Retry => {
            requeue_leftovers(&mut coordinator)?;
            let report = coordinator.retry_pending().context("flushing pending consignments")?;
            to_json(&report)
        }
        Command::Status => {
            let batch = coordinator.latest_batch().context("loading latest batch")?;
            if batch.batch_id() == BatchId::SENTINEL {
                return Ok("no batches yet".to_string());
            }
            to_json(&StatusView {
                batch_id: batch.batch_id(),
                status: batch.status(),
                consignments: batch.len(),
                unsent: batch.unsent().map(|c| c.record()).collect(),
            })
        }
    }
}

fn build(config: &AppConfig) -> Result<Coordinator> {
    let carriers = config.load_carriers().context("loading carriers config")?;
    let carriers = Arc::new(ConfiguredCarriers::new(carriers));
    let repository = JsonFileDispatchRepository::open(&config.data_dir)
        .with_context(|| format!("opening data directory {}", config.data_dir.display()))?;

    Ok(DispatchCoordinator::new(repository, carriers.selector(), carriers)
        .with_config(CoordinatorConfig::default().with_flush_mode(config.flush_mode)))
}

/// Adopt the batch a previous invocation left open, if any.
fn resume_open(coordinator: &mut Coordinator) -> Result<()> {
    let latest = coordinator.latest_batch().context("loading latest batch")?;
    if !latest.is_open() {
        bail!("no open batch; run `consign open` first");
    }
    coordinator.open_batch().context("resuming open batch")?;
    Ok(())
}

fn requeue_leftovers(coordinator: &mut Coordinator) -> Result<usize> {
    let requeued = coordinator
        .requeue_all_unsent()
        .context("requeueing unsent consignments")?;
    if requeued > 0 {
        info!(requeued, "picked up consignments left unsent by earlier runs");
    }
    Ok(requeued)
}

fn products_from_args(skus: Vec<String>, weights: Vec<u32>, values: Vec<u64>) -> Result<Vec<ProductRef>> {
    if skus.len() != weights.len() || skus.len() != values.len() {
        bail!(
            "--sku, --weight and --value must be given the same number of times (got {}, {}, {})",
            skus.len(),
            weights.len(),
            values.len()
        );
    }
    Ok(skus
        .into_iter()
        .zip(weights)
        .zip(values)
        .map(|((sku, weight), value)| ProductRef::new(sku, weight, value))
        .collect())
}

fn products_from_file(path: &Path) -> Result<Vec<ProductRef>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str::<Vec<ProductRef>>(&raw).with_context(|| format!("parsing products in {}", path.display()))
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("serializing output")
}
