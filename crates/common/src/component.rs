//! Collaborator traits.
//!
//! These traits define the interface between the engine and everything it
//! drives but does not implement: the hardware components, the platform that
//! hands them out and links them, the render target, and the byte stream.
//! The engine programs against these traits only.

use std::io;
use std::sync::Arc;

use crate::buffer::{BufferHandle, BufferHeader, BufferId, MemoryRegion, PortDefinition, SurfaceHandle};
use crate::error::{ComponentError, SurfaceError};
use crate::types::{Command, ComponentRole, Event, FrameGeometry, ImageCoding, PortIndex, PortPair};

/// Parameter blocks a component can be asked for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParamIndex {
    /// Port range of an image-domain component.
    ImagePorts,
    /// Port range of a video-domain component.
    VideoPorts,
    /// Definition of a single port.
    PortDefinition(PortIndex),
}

/// A parameter block, as returned by `get_parameter` or passed to
/// `set_parameter`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Param {
    Ports(PortPair),
    PortDefinition(PortDefinition),
    ImagePortFormat { port: PortIndex, coding: ImageCoding },
}

/// Opaque hardware processing stage.
///
/// Every method returns immediately. Commands and buffer submissions take
/// effect asynchronously and are reported through the
/// [`ComponentCallbacks`] the component was opened with.
pub trait Component: Send + Sync {
    /// Name the component was opened under.
    fn name(&self) -> &str;

    /// Role this component plays in the pipeline.
    fn role(&self) -> ComponentRole;

    /// Queue an asynchronous command. The immediate result only says whether
    /// the command was accepted.
    fn send_command(&self, command: Command) -> Result<(), ComponentError>;

    /// Synchronous parameter query.
    fn get_parameter(&self, index: ParamIndex) -> Result<Param, ComponentError>;

    /// Synchronous parameter update.
    fn set_parameter(&self, param: &Param) -> Result<(), ComponentError>;

    /// Register application memory as a buffer on `port`.
    fn use_buffer(&self, port: PortIndex, region: &MemoryRegion) -> Result<BufferHandle, ComponentError>;

    /// Register a render-target image as the buffer of an output port.
    fn use_surface(&self, port: PortIndex, surface: SurfaceHandle) -> Result<BufferHandle, ComponentError>;

    /// Release a registration made by `use_buffer` or `use_surface`.
    fn free_buffer(&self, port: PortIndex, handle: BufferHandle) -> Result<(), ComponentError>;

    /// Hand a filled input buffer to the component. It comes back through
    /// [`ComponentCallbacks::on_buffer_returned`] once consumed.
    fn empty_this_buffer(&self, header: &BufferHeader) -> Result<(), ComponentError>;

    /// Ask the component to produce into an output buffer. Completion is
    /// reported through [`ComponentCallbacks::on_buffer_filled`].
    fn fill_this_buffer(&self, handle: BufferHandle) -> Result<(), ComponentError>;
}

/// Engine-side sink for everything a component reports.
///
/// Invoked on a context owned by the hardware driver, concurrently with the
/// controller thread. Implementations must never block for long.
pub trait ComponentCallbacks: Send + Sync {
    fn on_event(&self, source: ComponentRole, event: Event);

    /// An input buffer has been consumed and may be refilled.
    fn on_buffer_returned(&self, source: ComponentRole, id: BufferId);

    /// An output buffer has been produced.
    fn on_buffer_filled(&self, source: ComponentRole, handle: BufferHandle);
}

/// Factory and linker for hardware components.
pub trait Platform: Send + Sync {
    /// Acquire a component by name, wiring its callbacks.
    fn open(
        &self,
        name: &str,
        role: ComponentRole,
        callbacks: Arc<dyn ComponentCallbacks>,
    ) -> Result<Arc<dyn Component>, ComponentError>;

    /// Link `output` directly to `input`. `None` disconnects `output`.
    fn setup_tunnel(
        &self,
        output: (&dyn Component, PortIndex),
        input: Option<(&dyn Component, PortIndex)>,
    ) -> Result<(), ComponentError>;
}

/// Final render target: an image the renderer's output port writes into.
pub trait RenderTarget: Send {
    fn create_image(&mut self, geometry: FrameGeometry) -> Result<SurfaceHandle, SurfaceError>;

    fn destroy_image(&mut self, handle: SurfaceHandle);
}

/// Sequential byte stream feeding the decoder.
pub trait ByteSource: Send {
    /// Total size in bytes.
    fn len(&self) -> u64;

    /// Current read offset.
    fn position(&self) -> u64;

    /// Read up to `buf.len()` bytes. Returns 0 only at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Reset the offset to the start of the stream.
    fn rewind(&mut self) -> io::Result<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remaining(&self) -> u64 {
        self.len().saturating_sub(self.position())
    }
}
