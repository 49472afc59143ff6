//! Completion provider abstractions used by AI invocation steps.
//!
//! - `CompletionProvider`: RPITIT trait for concrete implementations
//! - `BoxCompletionProvider`: object-safe wrapper for dynamic dispatch

pub mod box_provider;
pub mod provider;
