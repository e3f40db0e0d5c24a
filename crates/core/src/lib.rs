//! Frame-tree model and transformation pipeline for sampled execution
//! profiles.
//!
//! A profile session is parsed into per-thread call trees of [`model::FrameId`]
//! handles owned by a [`model::FrameTree`] arena. An ordered list of
//! [`processors::Processor`] passes then rewrites each tree while conserving
//! total recorded time. The result is consumed by a renderer through the
//! read-only derived fields on `FrameTree` and the JSON payload in [`render`].

pub mod model;
pub mod pipeline;
pub mod processors;
pub mod render;

pub use model::{
    FrameContext, FrameId, FrameTree, FrameTreeError, GroupId, NullContext, ReplaceWith, Session,
    SessionError,
};
pub use pipeline::{apply_processors, apply_processors_to_roots, default_processors};
pub use processors::{
    EntryFrameMarkers, Processor, ProcessorOptions, ProcessorOptionsConfig,
};
