use crate::constants::PROMPT_CHANNEL_CAPACITY;
use blockline_core::{BlockFactory, ChainError, Transaction};
use std::io::BufRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

const USAGE: &str = "Enter a transaction as `SENDER RECEIVER AMOUNT`, or a bare AMOUNT for A -> B:";

/// Parse one prompt line into a transaction batch.
///
/// `None` for lines that are neither `SENDER RECEIVER AMOUNT` nor a bare
/// amount. Blank lines give an empty batch so nothing is produced for them
/// either; callers skip those.
pub fn parse_line(line: &str) -> Option<Vec<Transaction>> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields.as_slice() {
        [] => Some(vec![]),
        [amount] => Some(vec![Transaction::new("A", "B", parse_amount(amount)?)]),
        [sender, receiver, amount] => Some(vec![Transaction::new(
            *sender,
            *receiver,
            parse_amount(amount)?,
        )]),
        _ => None,
    }
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|amount| amount.is_finite())
}

/// Read stdin on a plain thread and forward its lines. The thread is never
/// joined, so a pending read does not hold up shutdown.
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(PROMPT_CHANNEL_CAPACITY);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Interactive local producer. Every valid line becomes a block built on the
/// current tip and offered to the chain. Returns how many blocks were
/// accepted once input ends or `shutdown` fires.
pub async fn run_prompt(
    factory: BlockFactory,
    mut lines: mpsc::Receiver<String>,
    shutdown: CancellationToken,
) -> Result<usize, ChainError> {
    let mut accepted_count = 0;
    println!("{USAGE}");
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        let batch = match parse_line(&line) {
            Some(batch) if batch.is_empty() => continue,
            Some(batch) => batch,
            None => {
                println!("Invalid input {line:?}. {USAGE}");
                continue;
            }
        };

        // The nonce search can be CPU heavy; keep it off the reactor.
        let producer = factory.clone();
        let submitted =
            tokio::task::spawn_blocking(move || producer.submit_transactions(batch)).await;
        let (block, accepted) = match submitted {
            Ok(result) => result?,
            Err(err) => {
                error!(%err, "block producer task failed");
                continue;
            }
        };

        match serde_json::to_string(&block) {
            Ok(json) => println!("\nSending new block: {json}"),
            Err(err) => warn!(%err, "failed to encode new block"),
        }
        if accepted {
            accepted_count += 1;
            println!("Block {} appended, chain length {}", block.index, factory.store().len());
        } else {
            println!("Block {} was stale and has been dropped", block.index);
        }
    }
    Ok(accepted_count)
}
