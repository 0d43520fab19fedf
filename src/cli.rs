use clap::{Parser, Subcommand};
use graph_kernel::config::Config;
use graph_kernel::error::{Error, Result};
use graph_kernel::kernel::GraphKernel;
use graph_kernel::logger;
use graph_kernel::storage::command::{Command, NodeRecord, Value};
use std::fs;
use std::io::{self, Read};

#[derive(Parser)]
#[command(name = "graph-kernel")]
#[command(about = "Graph Kernel CLI - durable transaction log and record store administration")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: "human" or "json"
    #[arg(short, long, default_value = "human")]
    pub format: String,

    /// Data directory path
    #[arg(short, long)]
    pub data_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the data directory and the first log segment
    Init,

    /// Commit a transaction given as a JSON array of commands
    Commit {
        /// Transaction JSON (or read from stdin if not provided)
        #[arg(short, long)]
        tx: Option<String>,

        /// Transaction file path
        #[arg(short, long)]
        file: Option<String>,
    },

    /// List the retained log segments
    Segments,

    /// Close the active log segment and start a new one
    Rotate,

    /// Checkpoint the stores and delete segments that are no longer needed
    Prune,

    /// Run recovery and report what was replayed
    Recover,

    /// Show a node with its properties
    Node {
        /// Node id
        id: u64,
    },
}

/// Parse commands from JSON string
fn parse_commands(json: &str) -> Result<Vec<Command>> {
    serde_json::from_str(json)
        .map_err(|e| Error::Serialization(format!("Failed to parse transaction JSON: {}", e)))
}

/// Read transaction from file or stdin
fn read_tx(file: Option<&str>) -> Result<String> {
    match file {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| Error::io(format!("read {}", path), e)),
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|e| Error::io("read stdin", e))?;
            Ok(buffer)
        }
    }
}

/// Format output based on format type
fn format_output<T: serde::Serialize + std::fmt::Debug>(data: &T, format: &str) -> Result<String> {
    match format {
        "json" => serde_json::to_string_pretty(data)
            .map_err(|e| Error::Serialization(format!("Failed to serialize JSON: {}", e))),
        _ => Ok(format!("{:#?}", data)),
    }
}

pub fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env();
    if let Some(dir) = cli.data_dir {
        config.set_data_dir(std::path::PathBuf::from(dir));
    }
    if cli.format == "json" {
        config.set_output_format("json".to_string());
    }
    logger::init(config.get_log_level());
    let format = config.get_output_format().to_string();

    match cli.command {
        Commands::Init => {
            fs::create_dir_all(config.get_data_dir())
                .map_err(|e| Error::io(format!("create {}", config.get_data_dir().display()), e))?;
            let kernel = GraphKernel::open(config)?;
            println!(
                "Initialized data directory at: {}",
                kernel.config().get_data_dir().display()
            );
            Ok(())
        }

        Commands::Commit { tx, file } => {
            let json = match tx {
                Some(json) => json,
                None => read_tx(file.as_deref())?,
            };
            let commands = parse_commands(&json)?;
            let kernel = GraphKernel::open(config)?;
            let committed = kernel.commit(commands)?;
            if format == "json" {
                println!("{}", format_output(&committed, &format)?);
            } else {
                println!("✓ Transaction {} committed at {}", committed.tx_id, committed.position);
            }
            Ok(())
        }

        Commands::Segments => {
            let kernel = GraphKernel::open(config)?;
            let log = kernel.log();
            let mut segments = Vec::new();
            for version in log.versions() {
                let header = log.open_for_version(version)?.header;
                segments.push(SegmentOutput {
                    version,
                    size: fs::metadata(log.segment_path(version))
                        .map(|m| m.len())
                        .map_err(|e| Error::io(format!("stat segment {}", version), e))?,
                    previous_close: header.previous_close.to_string(),
                    last_committed_tx_id: header.last_committed_tx_id,
                    store_id: header.store_id.to_string(),
                });
            }
            let output = SegmentsOutput {
                active: log.active_segment()?.version,
                segments,
            };
            println!("{}", format_output(&output, &format)?);
            Ok(())
        }

        Commands::Rotate => {
            let kernel = GraphKernel::open(config)?;
            let closed = kernel.rotate()?;
            println!("✓ Closed segment at {}", closed);
            Ok(())
        }

        Commands::Prune => {
            let kernel = GraphKernel::open(config)?;
            let outcome = kernel.checkpoint()?;
            println!("{}", format_output(&outcome, &format)?);
            Ok(())
        }

        Commands::Recover => {
            let kernel = GraphKernel::open(config)?;
            println!("{}", format_output(&kernel.recovery_outcome(), &format)?);
            Ok(())
        }

        Commands::Node { id } => {
            let kernel = GraphKernel::open(config)?;
            let output = kernel.engine().with_stores(|stores| {
                stores.node(id).map(|record: &NodeRecord| NodeOutput {
                    id,
                    labels: record.labels.clone(),
                    properties: stores
                        .node_properties_of(id)
                        .map(|(key, value)| (key, value.clone()))
                        .collect(),
                    relationships: stores
                        .relationships
                        .iter()
                        .filter(|(_, r)| r.start == id || r.end == id)
                        .map(|(rel, _)| *rel)
                        .collect(),
                })
            });
            match output {
                Some(node) => {
                    println!("{}", format_output(&node, &format)?);
                    Ok(())
                }
                None => Err(Error::InvalidOperation(format!("Node {} not found", id))),
            }
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct SegmentOutput {
    version: u64,
    size: u64,
    previous_close: String,
    last_committed_tx_id: u64,
    store_id: String,
}

#[derive(Debug, serde::Serialize)]
struct SegmentsOutput {
    active: u64,
    segments: Vec<SegmentOutput>,
}

#[derive(Debug, serde::Serialize)]
struct NodeOutput {
    id: u64,
    labels: Vec<u32>,
    properties: Vec<(u32, Value)>,
    relationships: Vec<u64>,
}
