//! Gemchat - streaming client runtime for the GEM guided-journey chat service.

// ============================================================================
// Core Infrastructure
// ============================================================================

pub mod api;
pub mod config;
pub mod store;

// ============================================================================
// Streaming Core
// ============================================================================

pub mod frame;
pub mod render;
pub mod session;

// ============================================================================
// Domain
// ============================================================================

pub mod gems;
pub mod orchestrator;

// ============================================================================
// Client
// ============================================================================

pub mod client;
