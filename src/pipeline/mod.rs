//! Inbound message pipeline.
//!
//! Webhook batches flow through `MessageProcessor`:
//! 1. mark-read (best-effort)
//! 2. `message_received` broadcast
//! 3. first-match-wins rule lookup
//! 4. auto-response dispatch and `auto_response_sent` broadcast
//!
//! Status callbacks advance the tracked lifecycle and are broadcast only
//! when it moves forward.

pub mod processor;
pub mod rules;
pub mod types;

pub use processor::{MessageProcessor, OutboundMessage, StatusLookup};
pub use rules::{AutoResponseRule, RuleTable};
