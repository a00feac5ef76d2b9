//! ComfyUI render-server client.
//!
//! Submits materialized workflows over HTTP, polls the history endpoint
//! until a job completes, and locates the rendered file in the server's
//! output directory.

pub mod api;
pub mod error;
pub mod outputs;
pub mod poll;
pub mod renderer;

pub use error::RenderError;
pub use renderer::{ComfyUIRenderer, RenderClient};
