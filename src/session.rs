//! Session invalidation on user delete (§9 design notes): modeled as an
//! out-of-core side effect. This module only emits the intent; the actual
//! session store lives outside the core, as does authentication itself.

use tracing::info;

/// Emit the intent to purge all of a user's sessions. The real session
/// store (external to this subsystem) is expected to observe this event and
/// act on it; no message bus is implemented here.
pub fn invalidate_user_sessions(user_id: i64) {
    info!(event = "user_sessions_invalidate_requested", user_id, "session");
}
