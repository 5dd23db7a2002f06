//! Rectifies photographed or scanned multiple-choice answer sheets and
//! extracts, per subject and question, which option bubble was marked.
//!
//! The pipeline detects the printed bubble lattice, filters detection
//! noise by density clustering, derives the sheet's outer corners,
//! undoes skew with a perspective warp, lays the fixed answer grid over
//! the rectified sheet, and reads the marked option per cell. Bubble
//! detection and corner estimation each carry an independent fallback
//! strategy, so a failed primary method degrades instead of aborting.
//!
//! Every invocation is a pure function of (image, [`PipelineConfig`]);
//! batches can run concurrently without shared state.

pub mod cluster;
pub mod config;
pub mod corners;
pub mod debug;
pub mod fiducials;
pub mod geometry;
pub mod grid;
pub mod image_utils;
pub mod marks;
pub mod pipeline;
pub mod rectify;

pub use config::PipelineConfig;
pub use marks::AnswerMatrix;
pub use pipeline::{interpret_sheet, interpret_sheet_image, PipelineError, SheetInterpretation};
