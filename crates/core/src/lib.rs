//! Domain logic for long-form video assembly.
//!
//! Everything here is free of network access: request validation,
//! resolution selection, workflow template materialisation, and the
//! media layer (frame extraction and stitching) behind decoder/encoder
//! traits with ffmpeg-backed implementations.

pub mod error;
pub mod ffmpeg;
pub mod frames;
pub mod media;
pub mod resolution;
pub mod segment;
pub mod stitch;
pub mod types;
pub mod workflow_template;
