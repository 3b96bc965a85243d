//! `ip-pipeline`: Command/event engine for a tunneled image pipeline.
//!
//! Drives an image decoder tunneled into a renderer through an
//! asynchronous command/event protocol: commands complete later on a
//! callback context the caller does not own, a fixed pool of input
//! buffers rotates between the engine and the hardware, and reset drains
//! everything in flight before resources are released.
//!
//! # Architecture
//!
//! All shared state lives behind one [`monitor::Monitor`] (a single mutex
//! and condition variable). The controller thread issues commands and
//! blocks on the monitor; the hardware's callback context mutates the same
//! state and wakes it.
//!
//! ## Module Overview
//!
//! - [`controller`]: Pipeline state machine and callback routing
//! - [`session`]: Per-load bookkeeping and input fill logic
//! - [`waitset`]: Registry of expected completions
//! - [`pool`]: Released / in-flight input buffer tracking
//! - [`memory`]: Aligned input buffer memory
//! - [`monitor`]: The engine's single lock
//! - [`source`]: File and in-memory byte streams
//! - [`sim`]: Simulated decoder and renderer components
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use ip_common::PipelineConfig;
//! use ip_pipeline::{Pipeline, FileSource, sim::{SimPlatform, SimSurface}};
//!
//! let platform = Arc::new(SimPlatform::default());
//! let mut pipeline = Pipeline::new(platform, PipelineConfig::default())?;
//!
//! let report = pipeline.load(
//!     Box::new(FileSource::open("image.png")?),
//!     Box::new(SimSurface::new()),
//!     |filled| println!("rendered: {filled}"),
//! )?;
//! pipeline.reset()?;
//! pipeline.shutdown()?;
//! ```

pub mod controller;
pub mod memory;
pub mod monitor;
pub mod pool;
pub mod session;
pub mod sim;
pub mod source;
pub mod waitset;

pub use controller::{Pipeline, PipelineState, PoolLayout};
pub use pool::PoolStats;
pub use session::{LoadReport, RenderNotifier, SessionStage};
pub use source::{FileSource, MemorySource};
