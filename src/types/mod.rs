//! Data types for Lightwave entities.
//!
//! This module contains the telemetry structures reported by TRVs.

pub mod trv;

pub use trv::{TrvReading, TrvStatus, battery_percentage};
