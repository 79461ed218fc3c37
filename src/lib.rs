//! Laser alignment scan engine.
//!
//! Building blocks for automated beam alignment: a motion stage is walked
//! through a sequence of positions, a photodiode-style sensor is read at each
//! one, and the readings are validated before being recorded. Once a scan
//! completes the stage can be driven to the discrete or parabolic optimum.
//!
//! - [`sequence`]: raster, fixed-timer and explicit position sequences plus
//!   revisit checking
//! - [`validators`]: per-reading checks (zero, saturation, noise)
//! - [`baking`] and [`pipeline`]: partial application of validators and
//!   chaining them into a capture pipeline
//! - [`optimum`]: discrete and parabolic maximum finding
//! - [`hardware`]: stage, sensor state and operator decision seams
//! - [`sim`]: simulated stage and beam sensor with a reference capture loop

pub mod baking;
pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod measurement;
pub mod optimum;
pub mod pipeline;
pub mod sequence;
pub mod sim;
pub mod validators;
