//! Ingestion processing.

pub mod processor;

pub use processor::{parse_message, MessageProcessor};
