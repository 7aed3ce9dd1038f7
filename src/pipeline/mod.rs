//! Message processing pipeline.
//!
//! Every inbound event flows through:
//! 1. `router::route()` — source-channel check and text extraction
//! 2. `filter::should_forward()` — keyword/length rules
//! 3. `MessageRouter::on_message()` — the single best-effort send

pub mod filter;
pub mod router;

pub use filter::should_forward;
pub use router::{DropReason, MessageRouter, RouteDecision, RouteOutcome, route};
