// src/main.rs — habitus entry point

use clap::Parser;

use habitus::cli::{self, Cli, Commands};
use habitus::context::HabitusContext;
use habitus::infra::config::Config;
use habitus::infra::logger;
use habitus::patterns::rule::RuleFilter;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    // Load config (falls back to defaults if no config.toml)
    let config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Initialize logging (RUST_LOG > --log-level > [logging].level)
    logger::init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level));

    // Migrations run on their own connection, before anything opens the database
    if let Commands::Migrate { status, rollback } = cli.command {
        return cli::migrate::run_migrate(&config.storage.database_path(), status, rollback);
    }

    let ctx = HabitusContext::new(config, cli::now_ms())?;

    match cli.command {
        Commands::Ingest { file } => cli::ingest::run_ingest(&ctx, &file),
        Commands::Mine {
            lookback_hours,
            zone,
            json,
        } => cli::mine::run_mine(&ctx, lookback_hours, zone.as_deref(), json),
        Commands::Rules {
            limit,
            min_score,
            a,
            b,
            domain,
            json,
        } => {
            let filter = RuleFilter {
                limit,
                min_score,
                a_filter: a,
                b_filter: b,
                domain_filter: domain,
            };
            cli::mine::run_rules(&ctx, filter, json)
        }
        Commands::Zones { limit, json } => cli::mine::run_zones(&ctx, limit, json),
        Commands::Graph {
            center,
            hops,
            kind,
            domain,
            export,
            import,
            prune,
        } => cli::graph::run_graph(
            &ctx,
            cli::graph::GraphArgs {
                center,
                hops,
                kinds: kind,
                domains: domain,
                export,
                import,
                prune,
            },
        ),
        Commands::Experiment { action } => cli::experiment::run_experiment(&ctx, action),
        Commands::Status => cli::status::show_status(&ctx),
        Commands::Migrate { .. } => Ok(()),
    }
}
