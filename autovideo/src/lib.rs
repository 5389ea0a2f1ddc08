//! autovideo library crate.
//!
//! Topic-to-video job orchestration: quota ledger, job store, a four-stage
//! generation pipeline with fallbacks, the job orchestrator and its worker
//! pool, the submission gateway and a Telegram front end.

pub mod bot;
pub mod config;
pub mod database;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod media;
pub mod notification;
pub mod panic_hook;
pub mod pipeline;
pub mod providers;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
