// src/cli/status.rs — Status display

use crate::context::HabitusContext;
use crate::infra::paths;

pub fn show_status(ctx: &HabitusContext) -> anyhow::Result<()> {
    let now = super::now_ms();

    println!("habitus v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let config_path = paths::config_file_path();
    if config_path.exists() {
        println!("  Config:     {} (loaded)", config_path.display());
    } else {
        println!("  Config:     (using defaults)");
    }

    if ctx.db.is_some() {
        let db_path = ctx.config.storage.database_path();
        let size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
        println!("  Database:   {} ({})", db_path.display(), format_bytes(size));
    } else {
        println!("  Database:   (disabled)");
    }

    let stats = ctx.graph.stats(now)?;
    println!();
    println!("  Graph:");
    println!(
        "    Nodes:      {} ({} visible)",
        stats.nodes, stats.visible_nodes
    );
    println!(
        "    Edges:      {} ({} visible)",
        stats.edges, stats.visible_edges
    );
    for (kind, count) in &stats.nodes_by_kind {
        println!("    {:<11} {}", format!("{kind}:"), count);
    }

    println!();
    println!("  Mining:");
    println!("    Buffered:   {} events", ctx.habitus.buffered());
    let zones = ctx.habitus.zones().map(|z| z.zone_ids().len()).unwrap_or(0);
    println!("    Zones:      {}", zones);

    let experiments = ctx.experiments.list()?;
    let running = experiments.iter().filter(|e| e.is_running()).count();
    println!();
    println!(
        "  Experiments: {} ({} running)",
        experiments.len(),
        running
    );
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
