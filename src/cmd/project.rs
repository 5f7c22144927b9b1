//! Session setup and state writes: `brandflow init`, `set`, `append`, `unset`.

use anyhow::Result;
use serde_json::json;
use tracing::info;

use brandflow::config::Config;
use brandflow::session::SessionState;

use super::{load_state, parse_value, print_json, save_state};

pub fn cmd_init(
    config: &Config,
    client_id: &str,
    project_name: Option<&str>,
    force: bool,
) -> Result<()> {
    if config.state_file.exists() && !force {
        anyhow::bail!(
            "Session already exists at {}. Use --force to start over.",
            config.state_file.display()
        );
    }
    let state = SessionState::initial(client_id, project_name);
    save_state(config, &state)?;
    info!(path = %config.state_file.display(), "session created");
    print_json(&state)
}

pub fn cmd_set(config: &Config, key: &str, raw: &str) -> Result<()> {
    let mut state = load_state(config)?;
    state.update(key, parse_value(raw))?;
    save_state(config, &state)?;
    print_json(&json!({ "updated": [key] }))
}

pub fn cmd_append(config: &Config, key: &str, raw: &str) -> Result<()> {
    let mut state = load_state(config)?;
    state.append_update(key, parse_value(raw))?;
    let length = state.list(key)?.len();
    save_state(config, &state)?;
    print_json(&json!({ "key": key, "length": length }))
}

pub fn cmd_unset(config: &Config, key: &str) -> Result<()> {
    let mut state = load_state(config)?;
    let previous = state.take(key)?;
    save_state(config, &state)?;
    print_json(&json!({ "key": key, "removed": previous.is_some() }))
}
