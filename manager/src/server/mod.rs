//! HTTP control surface

pub mod errors;
pub mod events;
pub mod handlers;
pub mod serve;
pub mod state;
