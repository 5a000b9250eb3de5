//! End-to-end test support for the Telos core
//!
//! The harness spins up fully wired, isolated cores (one temp data root
//! per test) with millisecond-scale background intervals so scenarios run
//! in wall-clock milliseconds.

pub mod harness;
