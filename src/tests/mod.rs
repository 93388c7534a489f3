//! Integration-style tests exercising more than one module together.
//! Module-local unit tests stay in their own `#[cfg(test)]` blocks
//! (`ring.rs`, `sound_file.rs`, `worker.rs`, `reactor.rs`, `cli.rs`,
//! `config.rs` each carry their own); this directory is reserved for tests
//! that need two or more of those modules wired together, matching the
//! split the teacher's own `src/tests/` directory uses.

mod audio_client_tests;
mod driver_tests;
