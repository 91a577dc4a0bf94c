//! The three processing steps of the pipeline: fetch, render, persist.

pub mod fetch;
pub mod persist;
pub mod render;

pub use fetch::{CanvasClient, CanvasMetadata, FetchOptions, FetchStage};
pub use persist::{PersistStage, SaveLayout};
pub use render::RenderStage;
