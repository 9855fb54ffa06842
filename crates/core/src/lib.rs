//! Shared types for the Transaction Status Oracle.
//!
//! This crate defines the vocabulary every other `tso-*` crate builds on:
//! [`Timestamp`] and [`CellHash`] (the data model of the TSO, §3), the
//! [`TsoConfig`] value object (§6), and the component-agnostic error kinds
//! of §7.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cell;
pub mod config;
pub mod error;
pub mod timestamp;

pub use cell::CellHash;
pub use config::TsoConfig;
pub use error::{CoreError, Result};
pub use timestamp::Timestamp;
