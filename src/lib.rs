//! Media conversion between container and codec combinations.
//!
//! The [`worker::Worker`] is the entry point for embedders: it accepts
//! `inspect`, `start` and `cancel` requests and streams back analysis,
//! progress and exactly one terminal response per run.

pub mod backend;
pub mod config;
pub mod error;
pub mod media;
pub mod worker;

pub use error::TranscodeError;
pub use media::session::{Outcome, Session, TranscodeOutput};
pub use media::types::{MediaInfo, TranscodeSettings};
pub use worker::{Request, Response, Worker};
