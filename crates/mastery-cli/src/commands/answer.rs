//! The `mastery answer` and `mastery continue` commands.

use anyhow::Result;

use mastery_core::SessionId;

use super::{build_service, print_event, EngineArgs};

/// Submit `answer`, or continue past feedback when it is `None`.
pub async fn execute(session: SessionId, answer: Option<String>, args: EngineArgs) -> Result<()> {
    let (_, service) = build_service(&args).await?;

    let (state, event) = match answer {
        Some(text) => service.submit_answer(&session, &text).await?,
        None => service.continue_session(&session).await?,
    };
    tracing::debug!(
        session = %session,
        version = state.version,
        phase = %state.phase,
        "turn stored"
    );

    print_event(&session, &event, args.json)
}
