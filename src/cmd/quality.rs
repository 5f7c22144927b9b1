//! `brandflow quality-check`.

use std::collections::HashMap;

use anyhow::{Context, Result};

use brandflow::config::Config;
use brandflow::gates::standards::StaticMetrics;
use brandflow::phase::Phase;

use super::{load_state, print_json, save_state, split_pair};
use crate::QualityCheckArgs;

pub fn cmd_quality_check(config: &Config, args: &QualityCheckArgs) -> Result<()> {
    let phase: Phase = args.phase.parse()?;
    let mut scores = HashMap::new();
    for raw in &args.metrics {
        let (name, score) = split_pair(raw, "metric")?;
        let score: f64 = score
            .trim()
            .parse()
            .with_context(|| format!("Invalid score for metric '{}'", name))?;
        scores.insert(name.to_string(), score);
    }
    let evaluator = StaticMetrics::new(scores, args.default_score);

    let mut state = load_state(config)?;
    let check = config
        .settings
        .quality_standards()
        .check(&mut state, phase, &args.deliverable, &evaluator)?;
    save_state(config, &state)?;
    print_json(&check)
}
