//! PatternSim CLI
//!
//! Builds one of the sample workloads, schedules it with the greedy device
//! optimizer and prints the roofline runtime estimate.
//!
//! # Usage
//!
//! ## Simulate a workload
//! ```bash
//! cargo run --bin patternsim -- simulate \
//!   --cluster clusters/cluster_c18g.json \
//!   --workload jacobi \
//!   --size 8192 \
//!   --iterations 50 \
//!   --report jacobi.json \
//!   --verbose
//! ```
//!
//! ## Inspect a topology
//! ```bash
//! cargo run --bin patternsim -- topology --cluster clusters/cluster_c18g.json
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use patternsim::roofline::PerformanceModel;
use patternsim::topology::load_cluster;
use patternsim::{workloads, AptBuilder, GreedyDeviceOptimizer, RooflineModel, SimConfig};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser)]
#[clap(name = "patternsim")]
#[clap(about = "PatternSim - performance prediction for index-parallel workloads")]
#[clap(version = "0.1")]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Workload {
    Jacobi,
    Mxv,
    Kmeans,
    Mandelbrot,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, schedule and cost a sample workload
    Simulate {
        /// Cluster description (JSON)
        #[clap(long = "cluster", short = 'c', value_name = "FILE")]
        cluster: PathBuf,

        /// Workload to simulate
        #[clap(long = "workload", short = 'w', value_enum)]
        workload: Workload,

        /// Problem size (rows, points or image width)
        #[clap(long = "size", short = 'n', default_value = "1024")]
        size: usize,

        /// Iterations for iterative workloads
        #[clap(long = "iterations", short = 'k', default_value = "10")]
        iterations: usize,

        /// Centroids for k-means
        #[clap(long = "clusters", default_value = "6")]
        clusters: usize,

        /// Simulation settings (JSON)
        #[clap(long = "config", value_name = "FILE")]
        config: Option<PathBuf>,

        /// Write the schedule and per-step costs as JSON
        #[clap(long = "report", short = 'o', value_name = "FILE")]
        report: Option<PathBuf>,

        /// Enable verbose output
        #[clap(long = "verbose", short = 'v')]
        verbose: bool,
    },

    /// Print the hierarchy of a cluster description
    Topology {
        /// Cluster description (JSON)
        #[clap(long = "cluster", short = 'c', value_name = "FILE")]
        cluster: PathBuf,
    },
}

/// Route the library's `log` records through a stderr `fmt` subscriber.
fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Simulate {
            cluster,
            workload,
            size,
            iterations,
            clusters,
            config,
            report,
            verbose,
        } => {
            init_logging(verbose);
            simulate_command(cluster, workload, size, iterations, clusters, config, report)?;
        }

        Commands::Topology { cluster } => {
            init_logging(false);
            topology_command(cluster)?;
        }
    }

    Ok(())
}

/// Build, optimize and evaluate one workload
fn simulate_command(
    cluster_path: PathBuf,
    workload: Workload,
    size: usize,
    iterations: usize,
    clusters: usize,
    config_path: Option<PathBuf>,
    report_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let cluster = load_cluster(&cluster_path)
        .map_err(|e| format!("Failed to load cluster {}: {}", cluster_path.display(), e))?;
    let config = match config_path {
        Some(path) => SimConfig::from_file(&path)
            .map_err(|e| format!("Failed to load config {}: {}", path.display(), e))?,
        None => SimConfig::default(),
    };
    let overlap = config.overlap;

    let mut builder = AptBuilder::new(config);
    match workload {
        Workload::Jacobi => workloads::jacobi(&mut builder, size, iterations)?,
        Workload::Mxv => workloads::mxv(&mut builder, size)?,
        Workload::Kmeans => workloads::kmeans(&mut builder, size, clusters, iterations)?,
        Workload::Mandelbrot => workloads::mandelbrot(&mut builder, size)?,
    }
    let mut apt = builder.compile()?;

    let mut optimizer = GreedyDeviceOptimizer::with_overlap(&cluster, overlap);
    apt.optimize(&mut optimizer)
        .map_err(|e| format!("Optimization failed: {}", e))?;

    let mut model = RooflineModel::with_overlap(&cluster, overlap);
    let runtime = apt.evaluate(&mut model)?;

    println!("Workload: {:?} (size {}, {} steps)", workload, size, apt.len());
    for (cost, device) in model.costs().iter().zip(optimizer.choices()) {
        let device = cluster.device(*device)?;
        let node = cluster.node(device.node)?;
        info!(
            "step {:>4}: {}/{} execution {:.3e}s network {:.3e}s",
            cost.index, node.identifier, device.identifier, cost.execution, cost.network
        );
    }
    println!("Estimated runtime: {:.6e}s", runtime);

    if let Some(path) = report_path {
        let report = apt
            .report(&cluster)?
            .with_costs(model.costs(), model.runtime());
        std::fs::write(&path, report.to_json()?)
            .map_err(|e| format!("Failed to write report {}: {}", path.display(), e))?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

fn topology_command(cluster_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let cluster = load_cluster(&cluster_path)?;
    println!("Cluster ({} topology)", cluster.topology);
    for node in cluster.nodes() {
        let address = node.address.as_deref().unwrap_or("-");
        println!("  Node {} [{}] at {}", node.identifier, node.node_type, address);
        for device_id in &node.devices {
            let device = cluster.device(*device_id)?;
            println!(
                "    Device {} {:?}: {:.0} KB, {} ns, {} MB/s (max {} MB/s)",
                device.identifier,
                device.device_type,
                device.memory_size,
                device.memory_latency,
                device.memory_bandwidth,
                device.memory_max_bandwidth
            );
            for processor_id in &device.processors {
                let p = cluster.processor(*processor_id)?;
                println!(
                    "      Processor {}: {} cores @ {} MHz, cache {} KB",
                    p.identifier, p.cores, p.frequency, p.cache_size
                );
            }
        }
    }
    Ok(())
}
