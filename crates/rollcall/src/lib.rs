//! rollcall — Face-matched attendance sessions.
//!
//! Ties the face sampler, matcher and attendance store together behind a
//! [`Controller`] that moves an explicit [`Session`] through login, capture
//! and marking.

pub mod config;
pub mod controller;
pub mod error;
pub mod session;

pub use config::{Config, ConfigError};
pub use controller::{history, Controller, MarkOutcome, Registration};
pub use error::FlowError;
pub use session::{Session, SessionState};
