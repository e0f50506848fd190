//! Deterministic, pure logic shared by the onslaught engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (paths, text, phase descriptors) and return deterministic outputs
//! suitable for tests.

pub mod path;
pub mod phase;
pub mod redact;
pub mod sdist_log;
