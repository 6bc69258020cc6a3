// src/cli/ingest.rs — Feed raw upstream events into graph and miner

use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::context::HabitusContext;

/// Ingest one JSON value per line. Lines that are not JSON count as
/// rejected; blank lines are skipped.
pub fn run_ingest(ctx: &HabitusContext, file: &Path) -> anyhow::Result<()> {
    let reader: Box<dyn BufRead> = if file.as_os_str() == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        Box::new(BufReader::new(std::fs::File::open(file)?))
    };

    let mut raws = Vec::new();
    let mut unparsable = 0usize;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(v) => raws.push(v),
            Err(e) => {
                tracing::debug!("Line {} is not JSON: {}", lineno + 1, e);
                unparsable += 1;
            }
        }
    }

    let summary = ctx.ingest_raw(&raws, super::now_ms())?;

    println!(
        "Ingested {} events: {} accepted ({} heartbeats), {} rejected",
        raws.len() + unparsable,
        summary.accepted,
        summary.heartbeats,
        summary.rejected + unparsable
    );
    if unparsable > 0 {
        println!("  {:<20} {}", "not_json", unparsable);
    }
    for (code, count) in summary.counts_by_code() {
        println!("  {:<20} {}", code, count);
    }
    let (nodes, edges) = ctx.graph.counts();
    println!("Graph: {} nodes, {} edges", nodes, edges);
    Ok(())
}
