//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod artifact;
pub mod message_buffer;
pub mod prompt;
pub mod router;
pub mod types;
