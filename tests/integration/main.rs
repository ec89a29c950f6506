//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that drives the bootstrap core (or a
//! host adapter) against recording mock ports.  All tests run on the host
//! with no radio, socket or broker required.

mod sequencer_tests;
mod session_tests;
