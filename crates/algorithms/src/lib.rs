//! # changedet algorithms
//!
//! Statistical change-detection engines for multi-temporal imagery.
//!
//! ## Available Algorithm Categories
//!
//! - **imagery**: IR-MAD, radiometric normalization, omnibus SAR change test
//! - **statistics**: chi-square distribution, weighted covariance, focal
//!   filters, region reducers
//! - **classification**: principal components
//! - **linalg**: small dense symmetric eigen solvers

pub mod classification;
pub mod imagery;
pub mod linalg;
pub(crate) mod maybe_rayon;
pub mod statistics;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classification::{pca, PcaParams, PcaResult};
    pub use crate::imagery::{
        calibrate, change_probabilities, db_to_linear, imad_step, invariant_mask, omnibus,
        radcal, radcal_pair, radcalbatch, run_mad, BandCalibration, BatchResult, ChangeMaps,
        CovarianceLayout, Imad, ImadParams, MadResult, MadState, Omnibus, OmnibusParams,
        RadcalBatch, RadcalParams, RadcalResult,
    };
    pub use crate::statistics::{chi2_cdf, chi2_sf, chi2_survival, reduce, Reducer};
    pub use changedet_core::prelude::*;
}
