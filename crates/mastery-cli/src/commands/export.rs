//! The `mastery export` command.

use std::path::PathBuf;

use anyhow::Result;

use mastery_core::report::SessionReport;
use mastery_core::service::load_session;
use mastery_core::SessionId;
use mastery_providers::config::load_config_from;

use super::open_store;

pub async fn execute(
    session: SessionId,
    output: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let store = open_store(&config).await?;
    let report = SessionReport::from_state(&load_session(&store, &session).await?);

    match output {
        Some(path) => {
            report.save_json(&path)?;
            println!(
                "Exported {} turns to {}",
                report.turns.len(),
                path.display()
            );
        }
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}
