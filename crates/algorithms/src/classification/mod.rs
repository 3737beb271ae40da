//! Unsupervised transforms of multi-band images
//!
//! - **PCA**: Principal Component Analysis

mod pca;

pub use pca::{pca, PcaParams, PcaResult};
