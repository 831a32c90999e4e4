//! Conversion pipeline.
//!
//! Data Flow:
//! ```text
//!                        ┌─► passthrough chunks ─────────────────────────┐
//!                        │                                               ▼
//! Input (Demux) ─────────┤                                         Mux Coordinator ─► output buffer
//!                        │                                               ▲
//!                        └─► Decode ─► [frame grid / scale] ─► Encode ───┘
//! ```
//!
//! 1. `inspector` reads the source once and produces a `MediaInfo`.
//! 2. `decision` fixes every track's mode before the run starts.
//! 3. `session` spawns one blocking stage per box above and waits for all
//!    of them before reporting the outcome.

pub mod cancel;
pub mod decision;
#[cfg(test)]
pub(crate) mod fake;
pub mod inspector;
pub mod mux;
pub mod pipeline;
pub mod preset;
pub mod session;
pub mod types;
