//! Ratewarden - In-Process Admission Control
//!
//! This crate decides, per logical caller, whether a unit of work may proceed
//! given a budget over time. It provides four throttling algorithms over a
//! shared concurrent counter store, a burst/sustained composition layer and
//! pluggable partition-key derivation.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
