//! Context Validator: active cloud session and selected target.

use crate::core::collaborators::CloudSession;
use crate::core::error::GateError;
use crate::core::session::ValidationSession;

pub const CHECK_IDENTITY: &str = "session-identity";
pub const CHECK_TARGET: &str = "session-target";

pub fn check_context(
    session: &mut ValidationSession,
    cloud: &dyn CloudSession,
) -> Result<(), GateError> {
    match cloud.active_identity() {
        Ok(identity) if !identity.is_empty() => {
            session.pass(CHECK_IDENTITY, format!("authenticated as {}", identity));
            session.active_identity = Some(identity);
        }
        Ok(_) => session.fail(CHECK_IDENTITY, "no active authenticated cloud session"),
        Err(e) => session.fail(CHECK_IDENTITY, format!("cannot query cloud session: {}", e)),
    }

    let active = match cloud.active_target() {
        Ok(t) => t,
        Err(e) => {
            session.fail(
                CHECK_TARGET,
                format!("cannot query active target context: {}", e),
            );
            return Ok(());
        }
    };
    if !active.is_empty() {
        session.active_target = Some(active.clone());
    }

    match session.expected_target.clone() {
        Some(expected) if expected == active => {
            session.pass(
                CHECK_TARGET,
                format!("active target '{}' matches expected target", active),
            );
        }
        Some(expected) if active.is_empty() => {
            session.fail(
                CHECK_TARGET,
                format!(
                    "active session has no target selected; expected '{}'",
                    expected
                ),
            );
        }
        Some(expected) => {
            session.fail(
                CHECK_TARGET,
                format!(
                    "active target '{}' does not match expected target '{}'",
                    active, expected
                ),
            );
        }
        None if active.is_empty() => {
            session.fail(
                CHECK_TARGET,
                "no expected target supplied and no active target selected; no target could be determined",
            );
        }
        None => {
            session.warn(
                CHECK_TARGET,
                format!(
                    "no expected target supplied; cannot assert intent (using active target '{}')",
                    active
                ),
            );
        }
    }
    Ok(())
}
