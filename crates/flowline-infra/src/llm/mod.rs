//! Completion provider implementations.

pub mod http;

pub use http::HttpCompletionProvider;
