//! Deployment module

pub mod cancel;
pub mod orchestrator;
pub mod platform;
pub mod poller;
pub mod status;
pub mod store;
