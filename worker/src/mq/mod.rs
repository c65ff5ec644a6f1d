//! Broker-facing core: the per-queue processing pipeline.
//!
//! ```text
//! broker ── Consumer ──> Message ── Sender ──┬─ done ──> ack
//!                                            └─ retry ─> Producer ──> ack
//! ```
//!
//! One [`Manager`] per configured queue owns a connection, a channel, and
//! the loop above.

pub mod consumer;
pub mod manager;
pub mod producer;

pub use consumer::Consumer;
pub use manager::{retry_connect, Manager, RetryPolicy};
pub use producer::Producer;
