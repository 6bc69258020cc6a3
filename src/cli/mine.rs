// src/cli/mine.rs — Mining, rule listing and zone suggestions

use crate::context::HabitusContext;
use crate::patterns::habitus::MinedPattern;
use crate::patterns::rule::{Rule, RuleFilter};
use crate::patterns::zone::get_top_suggestions;

const HOUR_MS: i64 = 3_600_000;

pub fn run_mine(
    ctx: &HabitusContext,
    lookback_hours: Option<u32>,
    zone: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let lookback = lookback_hours.unwrap_or(ctx.config.scheduler.lookback_hours);
    let patterns = ctx.habitus.mine_patterns(lookback, zone, super::now_ms())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&patterns)?);
        return Ok(());
    }

    let mut ranked: Vec<(&String, &MinedPattern)> = patterns.iter().collect();
    ranked.sort_by(|x, y| y.1.evidence.score.total_cmp(&x.1.evidence.score));

    if ranked.is_empty() {
        println!("No patterns found.");
    }
    for (id, p) in ranked {
        println!(
            "{}  {} -> {} within {}s  conf {:.2} (lb {:.2})  lift {:.2}  n={}",
            id,
            p.antecedent,
            p.consequent,
            p.evidence.dt_sec,
            p.evidence.confidence,
            p.evidence.confidence_lb,
            p.evidence.lift,
            p.evidence.n_ab,
        );
    }
    if let Some(stats) = ctx.habitus.last_stats() {
        println!();
        println!(
            "Scanned {} events, {} keys, {} pairs evaluated, {} rules",
            stats.events_scanned, stats.distinct_keys, stats.pairs_evaluated, stats.rules_emitted
        );
    }
    Ok(())
}

/// Rules are not persisted between runs, so this mines first.
pub fn run_rules(ctx: &HabitusContext, filter: RuleFilter, json: bool) -> anyhow::Result<()> {
    ctx.habitus
        .mine_patterns(ctx.config.scheduler.lookback_hours, None, super::now_ms())?;
    let rules = ctx.habitus.get_rules(&filter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rules)?);
        return Ok(());
    }
    if rules.is_empty() {
        println!("No rules match.");
    }
    for rule in &rules {
        print_rule(rule, "");
    }
    Ok(())
}

pub fn run_zones(ctx: &HabitusContext, limit: usize, json: bool) -> anyhow::Result<()> {
    let Some(zones) = ctx.habitus.zones() else {
        println!("No zones configured. Add [[zones]] tables to the config file.");
        return Ok(());
    };

    let now = super::now_ms();
    let since = now - ctx.config.scheduler.lookback_hours as i64 * HOUR_MS;
    let events = ctx.habitus.events_since(since)?;
    let results = zones.mine_all_zones(&events, &ctx.habitus.mining_config()?, now);
    let suggestions = get_top_suggestions(&results, limit);

    if json {
        let out = serde_json::json!({ "zones": results, "suggestions": suggestions });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for r in &results {
        match r.stats.reason {
            Some(ref reason) if r.stats.skipped => {
                println!("{:<16} skipped ({}, {} events)", r.zone_id, reason, r.stats.events)
            }
            _ => println!(
                "{:<16} {} events: {} rules, {} filtered, {} safety-blocked",
                r.zone_id, r.stats.events, r.stats.rules, r.stats.filtered, r.stats.blocked
            ),
        }
    }
    println!();
    if suggestions.is_empty() {
        println!("No suggestions.");
    }
    for s in &suggestions {
        let confirm = if s.requires_confirmation { " [confirm]" } else { "" };
        print_rule(&s.rule, &format!("[{}]{} ", s.zone_id, confirm));
    }
    Ok(())
}

fn print_rule(rule: &Rule, prefix: &str) {
    println!(
        "{}{} -> {} within {}s  score {:.3}  conf {:.2}  lift {:.2}  n={}/{}",
        prefix,
        rule.a,
        rule.b,
        rule.dt_sec,
        rule.score(),
        rule.confidence,
        rule.lift,
        rule.n_ab,
        rule.n_a,
    );
}
