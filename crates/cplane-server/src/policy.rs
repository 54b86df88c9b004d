//! Engine selection policy.
//!
//! Used whenever a call carries no explicit engine id and (for
//! session-scoped calls) the session has no recorded engine yet.
//! There is no load balancing: the engine that registered first wins.

use indexmap::IndexMap;

use crate::types::EngineId;

/// Pick the engine for calls that do not name one.
pub fn pick_default_engine<V>(engines: &IndexMap<EngineId, V>) -> Option<EngineId> {
    engines.keys().next().copied()
}
