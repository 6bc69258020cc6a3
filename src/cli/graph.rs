// src/cli/graph.rs — Brain graph inspection and export

use std::path::PathBuf;

use crate::context::HabitusContext;
use crate::graph::model::{GraphQuery, NodeKind};

pub struct GraphArgs {
    pub center: Option<String>,
    pub hops: u32,
    pub kinds: Vec<String>,
    pub domains: Vec<String>,
    pub export: Option<PathBuf>,
    pub import: Option<PathBuf>,
    pub prune: bool,
}

pub fn run_graph(ctx: &HabitusContext, args: GraphArgs) -> anyhow::Result<()> {
    let now = super::now_ms();

    let kinds = args
        .kinds
        .iter()
        .map(|k| NodeKind::parse(k).ok_or_else(|| anyhow::anyhow!("unknown node kind '{k}'")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let query = GraphQuery {
        kinds: (!kinds.is_empty()).then_some(kinds),
        domains: (!args.domains.is_empty()).then_some(args.domains),
        center_node: args.center,
        hops: args.hops,
        ..Default::default()
    };

    if let Some(path) = args.import {
        let state = ctx.graph.import_json(&path)?;
        println!(
            "Imported {} nodes, {} edges from {}",
            state.nodes.len(),
            state.edges.len(),
            path.display()
        );
    }

    if args.prune {
        let eviction = ctx.graph.prune(now)?;
        println!(
            "Pruned {} nodes, {} edges",
            eviction.nodes.len(),
            eviction.edges.len() + eviction.cascaded_edges.len()
        );
    }

    if let Some(path) = args.export {
        let state = ctx.graph.export_json(&path, &query, now)?;
        println!(
            "Exported {} nodes, {} edges to {}",
            state.nodes.len(),
            state.edges.len(),
            path.display()
        );
        return Ok(());
    }

    let state = ctx.graph.get_graph_state(&query, now)?;
    println!("{}", serde_json::to_string_pretty(&state)?);

    let stats = ctx.graph.stats(now)?;
    eprintln!(
        "{} of {} nodes and {} of {} edges visible",
        stats.visible_nodes, stats.nodes, stats.visible_edges, stats.edges
    );
    Ok(())
}
