//! Shared test utilities: an in-memory gateway with failure injection
