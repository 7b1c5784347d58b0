//! logwatcher library crate.
//!
//! Follows log files and systemd journal units, matches every new line
//! against include and exclude substrings, and delivers an alert per match
//! through the configured notification channels.
//!
//! The pipeline is assembled by [`services::Orchestrator`]:
//!
//! ```text
//! watch sources ──▶ alert queue ──▶ dispatcher ──▶ fan-out ──▶ channels
//!        └──────────────┴───────────────┴──▶ error sink
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod notification;
pub mod services;
pub mod utils;
pub mod watch;

pub use error::{ChannelFailure, Error, Result};
