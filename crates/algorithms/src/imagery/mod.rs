//! Change detection and radiometric normalization of multi-temporal imagery
//!
//! - **mad**: IR-MAD transform and chi-square no-change statistic
//! - **radcal**: invariant-pixel orthogonal regression (single pair and batch)
//! - **omnibus**: sequential Wishart omnibus test for SAR series
//! - **sar**: decibel / linear conversion

pub mod mad;
pub mod omnibus;
pub mod radcal;
pub mod sar;

pub use mad::{imad_step, run_mad, Imad, ImadParams, MadResult, MadState};
pub use omnibus::{
    change_probabilities, omnibus, omnibus_cdf, ChangeMaps, CovarianceLayout, Omnibus,
    OmnibusParams,
};
pub use radcal::{
    calibrate, invariant_mask, radcal, radcal_pair, radcalbatch, BandCalibration, BatchResult,
    RadcalBatch, RadcalParams, RadcalResult,
};
pub use sar::db_to_linear;
