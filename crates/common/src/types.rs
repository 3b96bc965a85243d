//! Core protocol types with newtype pattern for type safety.
//!
//! Commands flow out to the hardware components; events flow back in on
//! the driver's callback context. Every event carries a kind plus two
//! opaque discriminators, which is exactly what the wait-set matches on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a port on a hardware component.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortIndex(pub u32);

impl PortIndex {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PortIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {}", self.0)
    }
}

/// The input/output port pair of a two-port component.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortPair {
    pub input: PortIndex,
    pub output: PortIndex,
}

impl PortPair {
    /// Build the pair from the component's first port number. The output
    /// port always directly follows the input port.
    pub fn from_start(start: u32) -> Self {
        Self {
            input: PortIndex(start),
            output: PortIndex(start + 1),
        }
    }
}

/// Which stage of the pipeline a component plays.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentRole {
    Decoder,
    Renderer,
}

impl ComponentRole {
    pub fn display_name(self) -> &'static str {
        match self {
            ComponentRole::Decoder => "decoder",
            ComponentRole::Renderer => "renderer",
        }
    }
}

impl fmt::Display for ComponentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Hardware component state machine states the engine drives.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentState {
    Loaded,
    Idle,
    Executing,
}

impl ComponentState {
    /// Stable wire code, used as the second discriminator of a
    /// state-set completion event.
    pub fn code(self) -> u32 {
        match self {
            ComponentState::Loaded => 1,
            ComponentState::Idle => 2,
            ComponentState::Executing => 3,
        }
    }
}

/// Discriminant of a [`Command`], used as the first discriminator of its
/// completion event.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    StateSet,
    Flush,
    PortDisable,
    PortEnable,
}

impl CommandKind {
    pub fn code(self) -> u32 {
        match self {
            CommandKind::StateSet => 0,
            CommandKind::Flush => 1,
            CommandKind::PortDisable => 2,
            CommandKind::PortEnable => 3,
        }
    }
}

/// An asynchronous command sent to a hardware component.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    StateSet(ComponentState),
    Flush(PortIndex),
    PortDisable(PortIndex),
    PortEnable(PortIndex),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::StateSet(_) => CommandKind::StateSet,
            Command::Flush(_) => CommandKind::Flush,
            Command::PortDisable(_) => CommandKind::PortDisable,
            Command::PortEnable(_) => CommandKind::PortEnable,
        }
    }

    /// The command's parameter as carried on the wire.
    pub fn param(&self) -> u32 {
        match *self {
            Command::StateSet(state) => state.code(),
            Command::Flush(port) | Command::PortDisable(port) | Command::PortEnable(port) => {
                port.as_u32()
            }
        }
    }

    /// The event a component delivers once this command has taken effect.
    pub fn completion(&self) -> Event {
        Event::new(EventKind::CmdComplete, self.kind().code(), self.param())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::StateSet(state) => write!(f, "StateSet({state:?})"),
            Command::Flush(port) => write!(f, "Flush({})", port.0),
            Command::PortDisable(port) => write!(f, "PortDisable({})", port.0),
            Command::PortEnable(port) => write!(f, "PortEnable({})", port.0),
        }
    }
}

/// Kind of an inbound component event.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A previously sent command has completed.
    CmdComplete,
    /// A port's format was (re)negotiated by the hardware.
    PortSettingsChanged,
    /// A buffer carrying a flag (e.g. end-of-stream) went through a port.
    BufferFlag,
    /// Unrecoverable hardware error.
    Error,
}

/// An inbound event: a kind plus two opaque discriminators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Event {
    pub kind: EventKind,
    pub data1: u32,
    pub data2: u32,
}

impl Event {
    pub fn new(kind: EventKind, data1: u32, data2: u32) -> Self {
        Self { kind, data1, data2 }
    }

    /// The event a decoder emits once it has worked out its output format.
    pub fn port_settings_changed(port: PortIndex) -> Self {
        Self::new(EventKind::PortSettingsChanged, port.as_u32(), 0)
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == EventKind::Error
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:#x}, {:#x})", self.kind, self.data1, self.data2)
    }
}

/// Compressed image encoding expected on the decoder input port.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageCoding {
    #[default]
    Png,
    Jpeg,
    Gif,
    Bmp,
}

/// Geometry of an uncompressed frame on a port.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub slice_height: u32,
}

impl FrameGeometry {
    /// Tightly packed geometry (stride == width, slice height == height).
    pub fn packed(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            stride: width,
            slice_height: height,
        }
    }
}

impl fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
