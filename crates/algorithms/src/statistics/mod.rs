//! Statistical building blocks shared by the change-detection engines
//!
//! - **chi_square**: chi-square CDF / survival function and incomplete gamma
//! - **covariance**: weighted band covariance
//! - **focal**: moving-window filters
//! - **region**: region reducers (sum, mean, min, max, count)

pub mod chi_square;
pub mod covariance;
pub mod focal;
pub mod region;

pub use chi_square::{
    chi2_cdf, chi2_sf, chi2_survival, ln_gamma, regularized_gamma_p, regularized_gamma_q,
};
pub use covariance::{weighted_covariance, WeightedCovariance};
pub use focal::{focal_median, focal_statistics, FocalParams, FocalStatistic};
pub use region::{reduce, reduce_region, Reducer};
