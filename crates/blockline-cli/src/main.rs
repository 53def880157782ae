use anyhow::{Context, Result};
use blockline_core::{digest, Block};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

/// How long `send` waits for anything the node writes back.
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "blockline-cli")]
#[command(about = "Peer client for a blockline node")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send records to a node, one per line
    Send {
        /// Node peer address
        #[arg(long, default_value = "127.0.0.1:8080")]
        node: String,
        /// Input file; stdin when omitted
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Print a block with its hash recomputed
    Seal {
        /// Block JSON file; stdin when omitted
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Print the digest of a block
    Digest {
        /// Block JSON file; stdin when omitted
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Send { node, file } => {
            let input = read_input(file.as_ref())?;
            send(&node, &records(&input)).await?;
        }
        Command::Seal { file } => {
            let block = read_block(file.as_ref())?.seal();
            println!("{}", serde_json::to_string_pretty(&block)?);
        }
        Command::Digest { file } => {
            let block = read_block(file.as_ref())?;
            println!("{}", digest(&block));
        }
    }
    Ok(())
}

fn read_input(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("failed to read stdin")?;
            Ok(input)
        }
    }
}

fn read_block(file: Option<&PathBuf>) -> Result<Block> {
    let input = read_input(file)?;
    serde_json::from_str(&input).context("input is not a block")
}

/// Split input into wire records.
///
/// Input made only of JSON values (pretty printed or not) is re-encoded one
/// value per line, with top-level arrays such as a chain dump expanded into
/// their elements. Anything else is sent line by line as written, which lets
/// you probe the node with malformed messages.
fn records(input: &str) -> Vec<String> {
    let values: Result<Vec<Value>, _> = serde_json::Deserializer::from_str(input)
        .into_iter::<Value>()
        .collect();
    match values {
        Ok(values) if !values.is_empty() => values
            .into_iter()
            .flat_map(|value| match value {
                Value::Array(items) => items,
                other => vec![other],
            })
            .map(|value| value.to_string())
            .collect(),
        _ => input
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_owned)
            .collect(),
    }
}

async fn send(node: &str, records: &[String]) -> Result<()> {
    let mut stream = TcpStream::connect(node)
        .await
        .with_context(|| format!("failed to connect to {node}"))?;
    for record in records {
        stream.write_all(record.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        debug!(bytes = record.len(), "record sent");
    }
    stream.flush().await?;
    info!(count = records.len(), %node, "records sent");
    println!("sent {} record(s) to {node}", records.len());

    // The node has no in-band replies; print whatever arrives anyway.
    let mut buf = vec![0u8; 4096];
    if let Ok(Ok(n)) = tokio::time::timeout(PROBE_TIMEOUT, stream.read(&mut buf)).await {
        if n > 0 {
            println!("node response: {}", String::from_utf8_lossy(&buf[..n]));
        }
    }
    Ok(())
}
