//! `ip-common`: Shared types, traits, and errors for the tunneled image pipeline.
//!
//! This crate is the vocabulary the engine crate is written in:
//!
//! - **Types**: `PortIndex`, `PortPair`, `Command`, `Event`, `ComponentState` (protocol newtypes)
//! - **Buffers**: `BufferId`, `BufferHandle`, `BufferHeader`, `BufferFlags`, `MemoryRegion`
//! - **Collaborators**: `Component`, `ComponentCallbacks`, `Platform`, `RenderTarget`, `ByteSource`
//! - **Errors**: `PipelineError`, `ComponentError`, `PoolError`, etc. (thiserror-based)
//! - **Config**: `PipelineConfig`, `FatalPolicy`

pub mod buffer;
pub mod component;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used items at crate root
pub use buffer::{
    BufferFlags, BufferHandle, BufferHeader, BufferId, BufferRequirements, MemoryRegion,
    PortDefinition, SurfaceHandle,
};
pub use component::{
    ByteSource, Component, ComponentCallbacks, Param, ParamIndex, Platform, RenderTarget,
};
pub use config::{FatalPolicy, PipelineConfig, DEFAULT_MIN_CHUNK_SIZE};
pub use error::{
    ComponentError, ConfigError, PipelineError, PipelineResult, PoolError, SurfaceError,
};
pub use types::{
    Command, CommandKind, ComponentRole, ComponentState, Event, EventKind, FrameGeometry,
    ImageCoding, PortIndex, PortPair,
};
