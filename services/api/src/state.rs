//! Shared Application State

use crate::guard::Gatekeeper;
use crate::upstream::Upstream;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub gatekeeper: Arc<Gatekeeper>,
    pub upstream: Arc<Upstream>,
}
