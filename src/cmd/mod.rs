//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled                                              |
//! |------------|---------------------------------------------------------------|
//! | `project`  | `Init`, `Set`, `Append`                                       |
//! | `phase`    | `Phases`, `Status`, `Check`, `Advance`, `Transition`, `Rework`, `NextAgent` |
//! | `recovery` | `ReportError`                                                 |
//! | `quality`  | `QualityCheck`                                                |
//!
//! Results are printed to stdout as pretty JSON. Logs go to stderr.

pub mod phase;
pub mod project;
pub mod quality;
pub mod recovery;

pub use phase::{
    cmd_advance, cmd_check, cmd_next_agent, cmd_phases, cmd_rework, cmd_status, cmd_transition,
};
pub use project::{cmd_append, cmd_init, cmd_set, cmd_unset};
pub use quality::cmd_quality_check;
pub use recovery::cmd_report_error;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use brandflow::config::Config;
use brandflow::session::SessionState;

/// Load the session, pointing at `init` when there is none yet.
fn load_state(config: &Config) -> Result<SessionState> {
    if !config.state_file.exists() {
        anyhow::bail!(
            "No session found at {}. Run 'brandflow init' first.",
            config.state_file.display()
        );
    }
    Ok(SessionState::load(&config.state_file)?)
}

fn save_state(config: &Config, state: &SessionState) -> Result<()> {
    Ok(state.save(&config.state_file)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", rendered);
    Ok(())
}

/// Parse a CLI value as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Split a `KEY=VALUE` argument.
fn split_pair<'a>(raw: &'a str, what: &str) -> Result<(&'a str, &'a str)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value)),
        _ => anyhow::bail!("Invalid {} '{}'. Expected KEY=VALUE", what, raw),
    }
}
