//! Bot Manager Library
//!
//! Builds and deploys small worker bots onto a managed container platform,
//! tracks their deployment status and streams progress to observers.

pub mod app;
pub mod bots;
pub mod deploy;
pub mod errors;
pub mod events;
pub mod filesys;
pub mod logs;
pub mod runner;
pub mod sandbox;
pub mod server;
pub mod storage;
pub mod utils;
