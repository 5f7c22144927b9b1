//! `brandflow report-error`: run the failure engine for one report.
//!
//! The engine may block while waiting out a retry backoff, so it runs on
//! the blocking pool under the caller's deadline. The sleeper shares the
//! same deadline and refuses any delay that would overrun it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::warn;

use brandflow::config::Config;
use brandflow::recovery::strategy::{BlockingSleeper, NoopSleeper, Sleeper};
use brandflow::recovery::{ErrorEngine, FailureReport};

use super::{load_state, parse_value, print_json, save_state, split_pair};
use crate::ReportErrorArgs;

/// Headroom for classification and bookkeeping after the last sleep.
const DEADLINE_GRACE: Duration = Duration::from_secs(1);

pub async fn cmd_report_error(config: &Config, args: ReportErrorArgs) -> Result<()> {
    let mut failure = FailureReport::new(&args.error_type, &args.message);
    for raw in &args.context {
        let (key, value) = split_pair(raw, "context")?;
        failure = failure.with_context(key, parse_value(value));
    }
    if let Some(agent) = args.agent {
        failure = failure.with_context("agent", Value::from(agent));
    }

    let mut state = load_state(config)?;
    let deadline = Duration::from_secs(args.deadline_secs);
    let blocking = BlockingSleeper::new().with_timeout(deadline);
    let cancel = blocking.cancel_handle();
    let sleeper: Arc<dyn Sleeper> = if args.no_wait {
        Arc::new(NoopSleeper)
    } else {
        Arc::new(blocking)
    };
    let policy = Arc::new(config.settings.recovery.clone());
    let mut engine = ErrorEngine::resume(policy, &state)?.with_sleeper(sleeper);

    let task = tokio::task::spawn_blocking(move || {
        let decision = engine.report(&mut state, failure);
        (state, decision)
    });

    let (state, decision) = match tokio::time::timeout(deadline + DEADLINE_GRACE, task).await {
        Ok(joined) => joined.context("Failure engine task panicked")?,
        Err(_) => {
            cancel.cancel();
            warn!(deadline_secs = args.deadline_secs, "failure engine timed out");
            anyhow::bail!(
                "Failure handling did not finish within {}s",
                args.deadline_secs
            );
        }
    };
    let decision = decision?;

    save_state(config, &state)?;
    print_json(&decision)
}
