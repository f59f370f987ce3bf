//! The `mastery progress` and `mastery sessions` commands.

use std::path::PathBuf;

use anyhow::Result;

use mastery_core::report::SessionSummary;
use mastery_core::service::load_session;
use mastery_core::{SessionId, SessionStore};
use mastery_providers::config::load_config_from;

use super::{open_store, print_summary};

pub async fn execute(session: SessionId, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let store = open_store(&config).await?;
    let state = load_session(&store, &session).await?;

    let summary = SessionSummary::from_state(&state);
    println!("Session: {} ({})", summary.session_id, summary.topic);
    print_summary(&summary);
    Ok(())
}

pub async fn list_sessions(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let store = open_store(&config).await?;

    let ids = store.list().await?;
    if ids.is_empty() {
        println!("No sessions in {}", config.sessions_dir.display());
        return Ok(());
    }

    for id in ids {
        match load_session(&store, &id).await {
            Ok(state) => {
                let summary = SessionSummary::from_state(&state);
                println!(
                    "{id}  {}  {}/{} mastered  {}",
                    summary.lesson_id,
                    summary.mastered_count,
                    summary.outcomes.len(),
                    summary.phase
                );
            }
            Err(e) => println!("{id}  unreadable: {e}"),
        }
    }
    Ok(())
}
