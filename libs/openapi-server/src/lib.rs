//! Wire models for the bot manager REST surface and event stream.

pub mod models;
