//! Software platform: Simulated decoder and renderer components.
//!
//! Stands in for the hardware when none is present (tests, the `ip-load`
//! demo). Each simulated component honors the collaborator contract:
//!
//! - every call returns immediately; completions and buffer callbacks are
//!   delivered later on a dedicated per-component callback thread
//! - a port enable completes only once the port holds all the buffers it
//!   requires, a port disable only once all its buffers are freed
//! - the decoder hands each input buffer back after consuming it and
//!   reports its output format once, after a configurable byte count or at
//!   end of stream
//! - the renderer reports its output buffer filled when asked while
//!   executing
//!
//! Everything the engine does to the components is written to a shared
//! [`SimRecord`] for inspection.

mod component;
mod surface;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use ip_common::{
    BufferFlags, BufferId, Command, Component, ComponentCallbacks, ComponentError,
    ComponentRole, Event, FrameGeometry, ImageCoding, ParamIndex, Platform, PortIndex,
};

pub use component::SimComponent;
pub use surface::{SimSurface, SurfaceRecord};

/// Shape and behavior of the simulated hardware.
#[derive(Clone, Debug)]
pub struct SimSettings {
    /// First port number of the decoder (input; output follows).
    pub decoder_start_port: u32,
    /// First port number of the renderer.
    pub renderer_start_port: u32,
    pub input_buffer_count: usize,
    pub input_buffer_size: usize,
    pub input_buffer_alignment: usize,
    /// Bytes the decoder consumes before reporting its output format.
    /// `None` reports it with the end-of-stream buffer.
    pub format_change_after: Option<usize>,
    /// Geometry of the decoded image.
    pub output_geometry: FrameGeometry,
    /// Refuse to open the component with this role.
    pub reject_open: Option<ComponentRole>,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            decoder_start_port: 320,
            renderer_start_port: 220,
            input_buffer_count: 3,
            input_buffer_size: 81_920,
            input_buffer_alignment: 16,
            format_change_after: None,
            output_geometry: FrameGeometry::packed(640, 480),
            reject_open: None,
        }
    }
}

/// One input buffer as the decoder received it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub id: BufferId,
    pub filled_len: usize,
    pub flags: BufferFlags,
    /// The first `filled_len` bytes of the buffer.
    pub payload: Vec<u8>,
}

/// A tunnel connect (`input` set) or disconnect (`input` empty).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelChange {
    pub output: (ComponentRole, PortIndex),
    pub input: Option<(ComponentRole, PortIndex)>,
}

/// Everything the engine did to the simulated components.
#[derive(Clone, Debug, Default)]
pub struct SimRecord {
    pub commands: Vec<(ComponentRole, Command)>,
    pub queries: Vec<(ComponentRole, ParamIndex)>,
    pub codings: Vec<ImageCoding>,
    pub output_hints: Vec<FrameGeometry>,
    pub registrations: usize,
    pub frees: usize,
    pub submissions: Vec<Submission>,
    /// Input buffers handed back to the engine.
    pub returns: usize,
    /// Output buffers reported filled.
    pub fills: usize,
    pub tunnels: Vec<TunnelChange>,
}

impl SimRecord {
    /// Commands sent to `role`, in order.
    pub fn commands_to(&self, role: ComponentRole) -> Vec<Command> {
        self.commands
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, c)| *c)
            .collect()
    }

    /// How many times `index` was queried on `role`.
    pub fn query_count(&self, role: ComponentRole, index: ParamIndex) -> usize {
        self.queries
            .iter()
            .filter(|(r, i)| *r == role && *i == index)
            .count()
    }
}

/// Factory for simulated components.
pub struct SimPlatform {
    settings: SimSettings,
    record: Arc<Mutex<SimRecord>>,
    components: Mutex<Vec<Arc<SimComponent>>>,
}

impl SimPlatform {
    pub fn new(settings: SimSettings) -> Self {
        Self {
            settings,
            record: Arc::new(Mutex::new(SimRecord::default())),
            components: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &SimSettings {
        &self.settings
    }

    /// Snapshot of everything recorded so far.
    pub fn record(&self) -> SimRecord {
        self.record.lock().clone()
    }

    pub fn clear_record(&self) {
        *self.record.lock() = SimRecord::default();
    }

    /// Deliver `event` from the component playing `role`, as if the
    /// hardware raised it. Returns false if no such component is open.
    pub fn inject(&self, role: ComponentRole, event: Event) -> bool {
        let components = self.components.lock();
        match components.iter().find(|c| c.role() == role) {
            Some(component) => {
                component.inject(event);
                true
            }
            None => false,
        }
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new(SimSettings::default())
    }
}

impl Platform for SimPlatform {
    fn open(
        &self,
        name: &str,
        role: ComponentRole,
        callbacks: Arc<dyn ComponentCallbacks>,
    ) -> Result<Arc<dyn Component>, ComponentError> {
        if self.settings.reject_open == Some(role) {
            return Err(ComponentError::Unavailable {
                name: name.to_string(),
                reason: "no such component on this platform".into(),
            });
        }
        let component = Arc::new(SimComponent::spawn(
            name,
            role,
            &self.settings,
            callbacks,
            Arc::clone(&self.record),
        )?);
        self.components.lock().push(Arc::clone(&component));
        debug!(name, %role, "Simulated component opened");
        Ok(component)
    }

    fn setup_tunnel(
        &self,
        output: (&dyn Component, PortIndex),
        input: Option<(&dyn Component, PortIndex)>,
    ) -> Result<(), ComponentError> {
        let (out_component, out_port) = output;
        if out_component.role() != ComponentRole::Decoder {
            return Err(ComponentError::Tunnel(format!(
                "{} cannot source a tunnel",
                out_component.role()
            )));
        }
        if let Some((in_component, _)) = input {
            if in_component.role() != ComponentRole::Renderer {
                return Err(ComponentError::Tunnel(format!(
                    "{} cannot sink a tunnel",
                    in_component.role()
                )));
            }
        }
        self.record.lock().tunnels.push(TunnelChange {
            output: (out_component.role(), out_port),
            input: input.map(|(c, p)| (c.role(), p)),
        });
        Ok(())
    }
}

impl std::fmt::Debug for SimPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimPlatform")
            .field("settings", &self.settings)
            .field("components", &self.components.lock().len())
            .finish()
    }
}
