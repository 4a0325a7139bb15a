//! Startup reconciliation
//!
//! Decides how a persisted session is merged with the live status of the
//! database service. Pure functions only; the controller executes the
//! resulting plan.

use crate::servers::ServerRegistry;
use crate::service::LiveStatus;
use crate::session::{ConnectionMode, ConnectionSession, ResumeHint, SessionStatus};
use chrono::{DateTime, Utc};

/// Side effects to run after the reconciled session is committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffectPlan {
    /// Nothing to do
    None,
    /// Reconnect in the background using the captured hint
    AutoReconnect(ResumeHint),
}

/// Outcome of reconciling persisted and live state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Session to commit
    pub session: ConnectionSession,
    /// Clear catalog, schema and working context along with the session
    pub clear_dependents: bool,
    /// Deferred side effects
    pub plan: SideEffectPlan,
}

/// Merge the persisted session with the service's live status
pub fn reconcile(
    persisted: &ConnectionSession,
    live: LiveStatus,
    servers: &ServerRegistry,
    now: DateTime<Utc>,
) -> Reconciliation {
    let live_status = SessionStatus::from(live);

    if persisted.status() == live_status {
        return Reconciliation {
            session: persisted.clone(),
            clear_dependents: false,
            plan: SideEffectPlan::None,
        };
    }

    let mut session = persisted.clone();

    if live == LiveStatus::Disconnected {
        let hint = persisted.resume_hint();
        session.set_status(SessionStatus::Disconnected, now);

        let plan = if can_auto_reconnect(&hint, servers) {
            SideEffectPlan::AutoReconnect(hint)
        } else {
            SideEffectPlan::None
        };

        return Reconciliation {
            session,
            clear_dependents: true,
            plan,
        };
    }

    session.set_status(live_status, now);
    Reconciliation {
        session,
        clear_dependents: false,
        plan: SideEffectPlan::None,
    }
}

/// Whether a hint points at a known local server in embedded mode
fn can_auto_reconnect(hint: &ResumeHint, servers: &ServerRegistry) -> bool {
    if hint.mode != ConnectionMode::Embedded {
        return false;
    }
    hint.saved_server_ref
        .as_deref()
        .and_then(|id| servers.get(id))
        .is_some_and(|server| server.is_local())
}

/// Status to commit for a live status push, if any
///
/// Pushes are ignored while the controller owns a transition
/// (connecting or reconnecting): that operation commits its own outcome.
pub fn mirror_status(current: SessionStatus, live: LiveStatus) -> Option<SessionStatus> {
    let next = SessionStatus::from(live);
    if next == current || current.is_transitional() {
        return None;
    }
    Some(next)
}
