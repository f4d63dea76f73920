//! Ksat calibration for the openLISEM rainfall-runoff model.
//!
//! The crate edits openLISEM runfiles, runs the simulator as a subprocess,
//! reads its discharge output and searches for the saturated hydraulic
//! conductivity calibration factor that best reproduces an observed
//! hydrograph, either by grid refinement on NSE or by regula falsi on the
//! percentage bias.

pub mod config;
pub mod error;
pub mod evaluate;
pub mod objective;
pub mod output;
pub mod runfile;
pub mod runner;
pub mod search;
pub mod timeseries;

pub use error::{CalibError, Result};
