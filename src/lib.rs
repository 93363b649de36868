//! Greedy stroke-based painterly rendering.
//!
//! A photograph is analysed into edge and detail maps ([`features`]), brush
//! images are expanded into an atlas of sizes and orientations ([`brush`]),
//! and a [`canvas::Canvas`] accepts only those sampled strokes that bring it
//! closer to the photograph, optionally on a worker pool with optimistic
//! per-pixel version checks.

#[macro_use]
pub mod logger;
pub mod brush;
pub mod canvas;
pub mod cli;
pub mod features;
pub mod grid;
pub mod io;
pub mod ops;
