//! Safety guardrails for replica queries
//!
//! Every query against a customer replica passes through a per-connection
//! budget: a trailing-minute rate window plus a concurrent-query cap.

pub mod controller;

pub use controller::{GuardrailController, GuardrailLimits, GuardrailSlot};
