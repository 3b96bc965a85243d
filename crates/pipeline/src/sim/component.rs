//! A simulated component and its callback thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use ip_common::{
    BufferFlags, BufferHandle, BufferHeader, BufferId, Command, Component, ComponentCallbacks,
    ComponentError, ComponentRole, ComponentState, Event, FrameGeometry, MemoryRegion, Param,
    ParamIndex, PortDefinition, PortIndex, PortPair, SurfaceHandle,
};

use super::{SimRecord, SimSettings, Submission};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(0x1000);

fn next_handle() -> BufferHandle {
    BufferHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
}

/// Work delivered on the callback thread.
enum Job {
    Event(Event),
    Return(BufferId),
    Filled(BufferHandle),
}

#[derive(Default)]
struct PortModel {
    enabled: bool,
    enabling: bool,
    disabling: bool,
    /// Registered buffers; `None` marks a render-target surface.
    buffers: HashMap<BufferHandle, Option<MemoryRegion>>,
}

struct Model {
    state: ComponentState,
    /// Indexed 0 = input, 1 = output.
    ports: [PortModel; 2],
    /// Inputs received while not executing.
    held: Vec<BufferId>,
    pending_fill: Option<BufferHandle>,
    bytes_seen: usize,
    format_reported: bool,
    output_hint: Option<FrameGeometry>,
}

impl Model {
    fn new() -> Self {
        let enabled = || PortModel {
            enabled: true,
            ..PortModel::default()
        };
        Self {
            state: ComponentState::Loaded,
            ports: [enabled(), enabled()],
            held: Vec::new(),
            pending_fill: None,
            bytes_seen: 0,
            format_reported: false,
            output_hint: None,
        }
    }
}

/// Simulated decoder or renderer.
pub struct SimComponent {
    name: String,
    role: ComponentRole,
    ports: PortPair,
    /// Buffers each port needs before an enable completes.
    required: [usize; 2],
    settings: SimSettings,
    model: Mutex<Model>,
    record: Arc<Mutex<SimRecord>>,
    tx: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl SimComponent {
    pub(crate) fn spawn(
        name: &str,
        role: ComponentRole,
        settings: &SimSettings,
        callbacks: Arc<dyn ComponentCallbacks>,
        record: Arc<Mutex<SimRecord>>,
    ) -> Result<Self, ComponentError> {
        let (ports, required) = match role {
            ComponentRole::Decoder => (
                PortPair::from_start(settings.decoder_start_port),
                [settings.input_buffer_count, 0],
            ),
            ComponentRole::Renderer => (PortPair::from_start(settings.renderer_start_port), [0, 1]),
        };

        let (tx, rx) = channel::unbounded::<Job>();
        let thread_record = Arc::clone(&record);
        let worker = thread::Builder::new()
            .name(format!("sim-{role}"))
            .spawn(move || deliver(role, rx, callbacks, thread_record))
            .map_err(|e| ComponentError::Unavailable {
                name: name.to_string(),
                reason: format!("failed to spawn callback thread: {e}"),
            })?;

        Ok(Self {
            name: name.to_string(),
            role,
            ports,
            required,
            settings: settings.clone(),
            model: Mutex::new(Model::new()),
            record,
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Raise `event` as if the hardware reported it.
    pub fn inject(&self, event: Event) {
        self.post(Job::Event(event));
    }

    pub fn ports(&self) -> PortPair {
        self.ports
    }

    pub fn state(&self) -> ComponentState {
        self.model.lock().state
    }

    fn post(&self, job: Job) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(job);
        }
    }

    fn index(&self, port: PortIndex) -> Option<usize> {
        if port == self.ports.input {
            Some(0)
        } else if port == self.ports.output {
            Some(1)
        } else {
            None
        }
    }

    fn port_index(&self, port: PortIndex) -> Result<usize, ComponentError> {
        self.index(port).ok_or_else(|| ComponentError::Buffer {
            role: self.role,
            port,
            reason: "no such port".into(),
        })
    }

    fn buffer_error(&self, port: PortIndex, reason: &str) -> ComponentError {
        ComponentError::Buffer {
            role: self.role,
            port,
            reason: reason.to_string(),
        }
    }

    fn definition(&self, port: PortIndex, model: &Model) -> Option<PortDefinition> {
        let i = self.index(port)?;
        let (buffer_size, buffer_alignment) = match (self.role, i) {
            (ComponentRole::Decoder, 0) => (
                self.settings.input_buffer_size,
                self.settings.input_buffer_alignment,
            ),
            _ => (0, 0),
        };
        let frame = match (self.role, i) {
            (ComponentRole::Decoder, 1) if model.format_reported => self.settings.output_geometry,
            (ComponentRole::Decoder, 1) => model.output_hint.unwrap_or_default(),
            (ComponentRole::Renderer, _) => self.settings.output_geometry,
            _ => FrameGeometry::default(),
        };
        Some(PortDefinition {
            port,
            buffer_count: self.required[i],
            buffer_size,
            buffer_alignment,
            enabled: model.ports[i].enabled,
            frame,
        })
    }

    /// Register a buffer on `port` and complete a pending enable once the
    /// port is populated.
    fn register(
        &self,
        port: PortIndex,
        region: Option<MemoryRegion>,
    ) -> Result<BufferHandle, ComponentError> {
        let i = self.port_index(port)?;
        let mut model = self.model.lock();
        let p = &mut model.ports[i];
        if !p.enabled && !p.enabling {
            return Err(self.buffer_error(port, "port is disabled"));
        }
        if p.buffers.len() >= self.required[i] {
            return Err(self.buffer_error(port, "port is already populated"));
        }

        let handle = next_handle();
        p.buffers.insert(handle, region);
        if p.enabling && p.buffers.len() == self.required[i] {
            p.enabling = false;
            p.enabled = true;
            self.post(Job::Event(Command::PortEnable(port).completion()));
        }
        self.record.lock().registrations += 1;
        trace!(role = %self.role, %port, handle = handle.0, "Buffer registered");
        Ok(handle)
    }
}

impl Component for SimComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> ComponentRole {
        self.role
    }

    fn send_command(&self, command: Command) -> Result<(), ComponentError> {
        let rejected = |reason: &str| ComponentError::CommandRejected {
            role: self.role,
            command,
            reason: reason.to_string(),
        };
        let mut model = self.model.lock();
        self.record.lock().commands.push((self.role, command));
        debug!(role = %self.role, %command, "Simulated command");

        match command {
            Command::StateSet(state) => {
                model.state = state;
                if state == ComponentState::Idle {
                    model.bytes_seen = 0;
                    model.format_reported = false;
                }
                self.post(Job::Event(command.completion()));
                if state == ComponentState::Executing {
                    for id in model.held.drain(..) {
                        self.post(Job::Return(id));
                    }
                    if let Some(handle) = model.pending_fill.take() {
                        self.post(Job::Filled(handle));
                    }
                }
            }
            Command::Flush(port) => {
                let i = self.index(port).ok_or_else(|| rejected("no such port"))?;
                if i == 0 {
                    for id in model.held.drain(..) {
                        self.post(Job::Return(id));
                    }
                } else {
                    model.pending_fill = None;
                }
                self.post(Job::Event(command.completion()));
            }
            Command::PortDisable(port) => {
                let i = self.index(port).ok_or_else(|| rejected("no such port"))?;
                let p = &mut model.ports[i];
                p.enabled = false;
                p.enabling = false;
                if p.buffers.is_empty() {
                    self.post(Job::Event(command.completion()));
                } else {
                    p.disabling = true;
                }
            }
            Command::PortEnable(port) => {
                let i = self.index(port).ok_or_else(|| rejected("no such port"))?;
                let p = &mut model.ports[i];
                p.disabling = false;
                if p.buffers.len() >= self.required[i] {
                    p.enabled = true;
                    self.post(Job::Event(command.completion()));
                } else {
                    p.enabling = true;
                }
            }
        }
        Ok(())
    }

    fn get_parameter(&self, index: ParamIndex) -> Result<Param, ComponentError> {
        self.record.lock().queries.push((self.role, index));
        let unsupported = |reason: &str| ComponentError::Parameter {
            role: self.role,
            param: format!("{index:?}"),
            reason: reason.to_string(),
        };
        match (index, self.role) {
            (ParamIndex::ImagePorts, ComponentRole::Decoder)
            | (ParamIndex::VideoPorts, ComponentRole::Renderer) => Ok(Param::Ports(self.ports)),
            (ParamIndex::ImagePorts | ParamIndex::VideoPorts, _) => {
                Err(unsupported("wrong port domain"))
            }
            (ParamIndex::PortDefinition(port), _) => {
                let model = self.model.lock();
                self.definition(port, &model)
                    .map(Param::PortDefinition)
                    .ok_or_else(|| unsupported("no such port"))
            }
        }
    }

    fn set_parameter(&self, param: &Param) -> Result<(), ComponentError> {
        let unsupported = |reason: &str| ComponentError::Parameter {
            role: self.role,
            param: format!("{param:?}"),
            reason: reason.to_string(),
        };
        match *param {
            Param::ImagePortFormat { port, coding } => {
                if self.role != ComponentRole::Decoder || port != self.ports.input {
                    return Err(unsupported("not an image input port"));
                }
                self.record.lock().codings.push(coding);
                Ok(())
            }
            Param::PortDefinition(def) => {
                if self.index(def.port).is_none() {
                    return Err(unsupported("no such port"));
                }
                if self.role == ComponentRole::Decoder && def.port == self.ports.output {
                    self.model.lock().output_hint = Some(def.frame);
                    self.record.lock().output_hints.push(def.frame);
                }
                Ok(())
            }
            Param::Ports(_) => Err(unsupported("read-only")),
        }
    }

    fn use_buffer(
        &self,
        port: PortIndex,
        region: &MemoryRegion,
    ) -> Result<BufferHandle, ComponentError> {
        if self.role == ComponentRole::Decoder
            && port == self.ports.input
            && region.len < self.settings.input_buffer_size
        {
            return Err(self.buffer_error(port, "region smaller than the port buffer size"));
        }
        self.register(port, Some(*region))
    }

    fn use_surface(
        &self,
        port: PortIndex,
        surface: SurfaceHandle,
    ) -> Result<BufferHandle, ComponentError> {
        if self.role != ComponentRole::Renderer || port != self.ports.output {
            return Err(self.buffer_error(port, "surfaces bind only to the renderer output"));
        }
        trace!(surface = surface.0, "Binding render surface");
        self.register(port, None)
    }

    fn free_buffer(&self, port: PortIndex, handle: BufferHandle) -> Result<(), ComponentError> {
        let i = self.port_index(port)?;
        let mut model = self.model.lock();
        let p = &mut model.ports[i];
        if p.buffers.remove(&handle).is_none() {
            return Err(self.buffer_error(port, "unknown buffer handle"));
        }
        if p.disabling && p.buffers.is_empty() {
            p.disabling = false;
            self.post(Job::Event(Command::PortDisable(port).completion()));
        }
        self.record.lock().frees += 1;
        Ok(())
    }

    fn empty_this_buffer(&self, header: &BufferHeader) -> Result<(), ComponentError> {
        let port = self.ports.input;
        if self.role != ComponentRole::Decoder {
            return Err(self.buffer_error(port, "component takes no input buffers"));
        }
        let mut model = self.model.lock();
        let p = &model.ports[0];
        if !p.enabled {
            return Err(self.buffer_error(port, "input port not enabled"));
        }
        let region = match p.buffers.get(&header.handle) {
            Some(Some(region)) => *region,
            _ => return Err(self.buffer_error(port, "unknown buffer handle")),
        };
        if header.filled_len > region.len {
            return Err(self.buffer_error(port, "filled length exceeds buffer"));
        }

        // SAFETY: the region stays allocated while registered, and the
        // engine does not write it while the buffer is in flight.
        let payload =
            unsafe { std::slice::from_raw_parts(region.ptr, header.filled_len) }.to_vec();
        self.record.lock().submissions.push(Submission {
            id: header.id,
            filled_len: header.filled_len,
            flags: header.flags,
            payload,
        });

        model.bytes_seen += header.filled_len;
        let at_threshold = self
            .settings
            .format_change_after
            .is_some_and(|n| model.bytes_seen >= n);
        if !model.format_reported
            && (at_threshold || header.flags.contains(BufferFlags::END_OF_STREAM))
        {
            model.format_reported = true;
            self.post(Job::Event(Event::port_settings_changed(self.ports.output)));
        }

        if model.state == ComponentState::Executing {
            self.post(Job::Return(header.id));
        } else {
            model.held.push(header.id);
        }
        Ok(())
    }

    fn fill_this_buffer(&self, handle: BufferHandle) -> Result<(), ComponentError> {
        let port = self.ports.output;
        let mut model = self.model.lock();
        if !model.ports[1].buffers.contains_key(&handle) {
            return Err(self.buffer_error(port, "unknown buffer handle"));
        }
        if model.state == ComponentState::Executing && model.ports[1].enabled {
            self.post(Job::Filled(handle));
        } else {
            model.pending_fill = Some(handle);
        }
        Ok(())
    }
}

impl Drop for SimComponent {
    fn drop(&mut self) {
        // Closing the channel ends the callback thread.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for SimComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimComponent")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("ports", &self.ports)
            .finish()
    }
}

/// Callback thread body: deliver jobs in order until the component drops.
fn deliver(
    role: ComponentRole,
    rx: Receiver<Job>,
    callbacks: Arc<dyn ComponentCallbacks>,
    record: Arc<Mutex<SimRecord>>,
) {
    for job in rx.iter() {
        match job {
            Job::Event(event) => callbacks.on_event(role, event),
            Job::Return(id) => {
                record.lock().returns += 1;
                callbacks.on_buffer_returned(role, id);
            }
            Job::Filled(handle) => {
                record.lock().fills += 1;
                callbacks.on_buffer_filled(role, handle);
            }
        }
    }
    trace!(%role, "Callback thread finished");
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Collects callbacks on a channel for the test thread.
    struct Probe(Sender<String>);

    impl ComponentCallbacks for Probe {
        fn on_event(&self, source: ComponentRole, event: Event) {
            let _ = self.0.send(format!("{source} {event}"));
        }
        fn on_buffer_returned(&self, source: ComponentRole, id: BufferId) {
            let _ = self.0.send(format!("{source} returned {id}"));
        }
        fn on_buffer_filled(&self, source: ComponentRole, handle: BufferHandle) {
            let _ = self.0.send(format!("{source} filled {}", handle.0));
        }
    }

    fn component(role: ComponentRole, settings: SimSettings) -> (SimComponent, Receiver<String>) {
        let (tx, rx) = channel::unbounded();
        let c = SimComponent::spawn(
            "sim",
            role,
            &settings,
            Arc::new(Probe(tx)),
            Arc::new(Mutex::new(SimRecord::default())),
        )
        .unwrap();
        (c, rx)
    }

    fn next(rx: &Receiver<String>) -> String {
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    fn settings(count: usize) -> SimSettings {
        SimSettings {
            input_buffer_count: count,
            input_buffer_size: 64,
            ..SimSettings::default()
        }
    }

    // ── Ports ────────────────────────────────────────────────────

    #[test]
    fn enable_waits_for_population() {
        let (c, rx) = component(ComponentRole::Decoder, settings(2));
        let input = c.ports().input;
        let mut mem = [0u8; 128];
        let region = MemoryRegion {
            ptr: mem.as_mut_ptr(),
            len: 64,
            alignment: 1,
        };

        c.send_command(Command::PortDisable(input)).unwrap();
        assert_eq!(next(&rx), format!("decoder {}", Command::PortDisable(input).completion()));

        assert!(c.use_buffer(input, &region).is_err(), "disabled port refuses buffers");

        c.send_command(Command::PortEnable(input)).unwrap();
        c.use_buffer(input, &region).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        c.use_buffer(input, &region).unwrap();
        assert_eq!(next(&rx), format!("decoder {}", Command::PortEnable(input).completion()));
    }

    #[test]
    fn disable_waits_for_frees() {
        let (c, rx) = component(ComponentRole::Renderer, SimSettings::default());
        let output = c.ports().output;
        let handle = c.use_surface(output, SurfaceHandle(5)).unwrap();

        c.send_command(Command::PortDisable(output)).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        c.free_buffer(output, handle).unwrap();
        assert_eq!(next(&rx), format!("renderer {}", Command::PortDisable(output).completion()));
    }

    // ── Decoding ─────────────────────────────────────────────────

    #[test]
    fn decoder_reports_format_once_then_returns_buffer() {
        let (c, rx) = component(ComponentRole::Decoder, settings(1));
        let mut mem = vec![7u8; 64];
        let region = MemoryRegion {
            ptr: mem.as_mut_ptr(),
            len: 64,
            alignment: 1,
        };
        let handle = c.use_buffer(c.ports().input, &region).unwrap();
        c.send_command(Command::StateSet(ComponentState::Executing)).unwrap();
        next(&rx);

        let header = BufferHeader {
            handle,
            id: BufferId(0),
            alloc_len: 64,
            offset: 0,
            filled_len: 10,
            flags: BufferFlags::END_OF_STREAM,
        };
        c.empty_this_buffer(&header).unwrap();
        assert_eq!(
            next(&rx),
            format!("decoder {}", Event::port_settings_changed(c.ports().output))
        );
        assert_eq!(next(&rx), "decoder returned #0");
    }

    #[test]
    fn wrong_domain_query_fails() {
        let (c, _rx) = component(ComponentRole::Decoder, SimSettings::default());
        assert!(c.get_parameter(ParamIndex::VideoPorts).is_err());
        assert_eq!(
            c.get_parameter(ParamIndex::ImagePorts).unwrap(),
            Param::Ports(PortPair::from_start(320))
        );
    }
}
