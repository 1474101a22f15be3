//! Adaptive bitrate (ABR) decision engine.
//!
//! Protocol-agnostic: the quality ladder is read through the [`LevelSource`]
//! trait, throughput goes through the [`Estimator`] trait. The default
//! estimator is a pair of bias-corrected EWMAs with different half-lives whose
//! minimum is reported, so the estimate drops quickly and rises slowly.
//!
//! ## Example
//!
//! ```rust
//! use lyra_abr::{AbrContext, AbrOptions, DefaultAbrController, LevelInfo, PlaybackState};
//!
//! let levels = vec![
//!     LevelInfo::new(500_000),
//!     LevelInfo::new(1_500_000),
//!     LevelInfo::new(3_000_000),
//! ];
//! let mut abr = DefaultAbrController::new(AbrOptions::default());
//! abr.ensure_estimator(false);
//!
//! let ctx = AbrContext {
//!     min_auto_level: 0,
//!     max_auto_level: 2,
//!     playback: PlaybackState::new(0.0, 0.0, 1.0),
//!     current_frag_duration: None,
//! };
//! // Default estimate is 500 kbps: only the lowest level fits.
//! assert_eq!(abr.next_auto_level(levels.as_slice(), &ctx), 0);
//! ```

#![forbid(unsafe_code)]

mod controller;
mod estimator;
mod ewma;
mod types;

pub use controller::{
    ABANDON_BANDWIDTH_FACTOR, AbandonDecision, AbrController, BestLevelQuery, DefaultAbrController,
    real_bitrate,
};
pub use estimator::{Estimator, EwmaBandwidthEstimator};
pub use ewma::Ewma;
pub use types::{AbrContext, AbrOptions, InFlightLoad, LevelInfo, LevelSource, PlaybackState};

#[cfg(test)]
pub use estimator::MockEstimator;
