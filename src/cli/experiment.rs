// src/cli/experiment.rs — A/B experiment commands

use serde_json::Value;

use super::ExperimentAction;
use crate::context::HabitusContext;
use crate::experiments::significance::Variant;

pub fn run_experiment(ctx: &HabitusContext, action: ExperimentAction) -> anyhow::Result<()> {
    let registry = &ctx.experiments;
    match action {
        ExperimentAction::Start {
            id,
            variant_a,
            variant_b,
        } => {
            let exp = registry.start(&id, parse_variant(&variant_a), parse_variant(&variant_b))?;
            println!("Started experiment '{}'", exp.id);
        }
        ExperimentAction::Record {
            id,
            variant,
            overridden,
        } => {
            let variant = Variant::parse(&variant)
                .ok_or_else(|| anyhow::anyhow!("variant must be 'a' or 'b', got '{variant}'"))?;
            let exp = registry.record(&id, variant, overridden)?;
            let obs = exp.observation(variant);
            println!(
                "Variant {}: {} overrides in {} samples",
                variant, obs.overrides, obs.total
            );
        }
        ExperimentAction::Check { id } => {
            let r = registry.check_significance(&id)?;
            println!(
                "A: {:.1}% overridden (n={})  B: {:.1}% overridden (n={})",
                r.override_rate_a * 100.0,
                r.sample_size_a,
                r.override_rate_b * 100.0,
                r.sample_size_b
            );
            println!("chi2 = {:.3}, p = {:.4}", r.chi_squared, r.p_value);
            match r.winner {
                Some(w) if r.significant => println!("Significant: variant {} wins", w),
                _ => println!("Not significant yet"),
            }
        }
        ExperimentAction::List => {
            let all = registry.list()?;
            if all.is_empty() {
                println!("No experiments.");
            }
            for exp in all {
                let winner = exp.winner.map(|w| w.to_string()).unwrap_or_else(|| "-".into());
                println!(
                    "{:<20} {:<10} winner {}  A {}/{}  B {}/{}",
                    exp.id,
                    exp.status.as_str(),
                    winner,
                    exp.a.overrides,
                    exp.a.total,
                    exp.b.overrides,
                    exp.b.total
                );
            }
        }
    }
    Ok(())
}

/// Variants are JSON; anything else is taken as a plain string.
fn parse_variant(s: &str) -> Value {
    serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string()))
}
