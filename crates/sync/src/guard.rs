//! "Start new session" decision shared by every workflow page.
//!
//! What counts as content differs per workflow, so callers pass their own
//! predicates. An empty session is reused instead of piling up blank ones.

use tracing::info;

use nino_protocol::SessionType;

use crate::error::SyncResult;
use crate::registry::SessionRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewSessionOutcome {
    /// The current session had no content and was kept.
    Reused,
    Created { session_id: String },
}

/// Reuse the current session when every predicate is false, otherwise create
/// and select a fresh one. `reset` runs exactly once on success in both
/// branches; a failed create propagates without calling it.
pub async fn start_new_session(
    registry: &SessionRegistry,
    session_type: SessionType,
    has_content: &[&dyn Fn() -> bool],
    reset: impl FnOnce(),
) -> SyncResult<NewSessionOutcome> {
    // every predicate is evaluated, even after one returns true
    let has_content = has_content
        .iter()
        .map(|predicate| predicate())
        .fold(false, |acc, hit| acc || hit);

    if !has_content {
        info!(
            component = "guard",
            event = "guard.session_reused",
            session_type = session_type.as_str(),
        );
        reset();
        return Ok(NewSessionOutcome::Reused);
    }

    let session = registry.create_session(None, session_type, None).await?;
    registry.select_session(Some(&session.id)).await;
    reset();

    info!(
        component = "guard",
        event = "guard.session_created",
        session_id = %session.id,
        session_type = session_type.as_str(),
    );
    Ok(NewSessionOutcome::Created {
        session_id: session.id,
    })
}
