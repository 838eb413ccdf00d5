// =============================================================================
// Presentation Surface — thin HTTP/WS control plane over the engine
// =============================================================================

pub mod auth;
pub mod rest;
pub mod ws;
