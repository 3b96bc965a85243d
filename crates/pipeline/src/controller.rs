//! Pipeline controller: sequences the decoder and renderer through
//! initialization, streaming sessions, reset, and shutdown.
//!
//! ```text
//!  new() ──► Initializing ──► Ready ──► Loading ──reset()──► Initializing ──► …
//!                                          │        shutdown() ──► Closing ──► Closed
//!                                          └─ load error ──► Failed ──shutdown()──► Closed
//! ```
//!
//! Every command follows register-then-send: its completion is added to the
//! current phase's wait-set before the command leaves, so a completion can
//! never race ahead of its registration. The controller then blocks on the
//! engine monitor until the wait-set drains.
//!
//! Hardware callbacks arrive on the driver's context through
//! [`EventRouter`], which mutates shared state under the same monitor and
//! never blocks.

use std::mem;
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use ip_common::{
    BufferHandle, BufferId, BufferRequirements, ByteSource, Command, Component,
    ComponentCallbacks, ComponentError, ComponentRole, ComponentState, ConfigError, Event,
    FatalPolicy, Param, ParamIndex, PipelineConfig, PipelineResult, Platform,
    PortDefinition, PortIndex, PortPair, RenderTarget,
};

use crate::memory::AlignedRegion;
use crate::monitor::Monitor;
use crate::pool::{BufferPool, PoolStats};
use crate::session::{LoadQueue, LoadReport, RenderNotifier, Session, SessionStage};
use crate::waitset::{Dispatch, FollowUp, WaitSet};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// What the engine is currently waiting on. Exactly one phase is current,
/// so an initialization wait-set and a session can never coexist.
pub(crate) enum Phase {
    Initializing(WaitSet),
    Ready,
    Loading(LoadQueue),
    Closing(WaitSet),
    /// A load failed part-way; nothing further is awaited.
    Failed,
    Closed,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Initializing(_) => "initializing",
            Phase::Ready => "ready",
            Phase::Loading(_) => "loading",
            Phase::Closing(_) => "closing",
            Phase::Failed => "failed",
            Phase::Closed => "closed",
        }
    }
}

/// Everything guarded by the engine monitor.
pub(crate) struct Shared {
    phase: Phase,
}

impl Shared {
    fn new() -> Self {
        Self {
            phase: Phase::Initializing(WaitSet::new()),
        }
    }

    /// The wait-set commands register into right now.
    fn waits_mut(&mut self) -> &mut WaitSet {
        match &mut self.phase {
            Phase::Initializing(waits) | Phase::Closing(waits) => waits,
            Phase::Loading(queue) => &mut queue.waits,
            other => panic!("no wait-set in phase {}", other.name()),
        }
    }

    /// No completion is outstanding.
    fn is_settled(&self) -> bool {
        match &self.phase {
            Phase::Initializing(waits) | Phase::Closing(waits) => waits.is_empty(),
            Phase::Loading(queue) => queue.waits.is_empty(),
            Phase::Ready | Phase::Failed | Phase::Closed => true,
        }
    }

    fn load_queue(&mut self) -> &mut LoadQueue {
        match &mut self.phase {
            Phase::Loading(queue) => queue,
            other => panic!("no active session in phase {}", other.name()),
        }
    }
}

// ---------------------------------------------------------------------------
// Callback side
// ---------------------------------------------------------------------------

/// Receives every component callback and applies it to the shared state.
pub(crate) struct EventRouter {
    monitor: Arc<Monitor<Shared>>,
    policy: FatalPolicy,
}

impl EventRouter {
    fn fatal(&self, source: ComponentRole, event: Event) -> ! {
        error!(
            %source,
            data1 = event.data1,
            data2 = event.data2,
            "Fatal component error"
        );
        match self.policy {
            FatalPolicy::Abort => std::process::abort(),
            FatalPolicy::Panic => panic!("fatal {source} error event {event}"),
        }
    }
}

impl ComponentCallbacks for EventRouter {
    fn on_event(&self, source: ComponentRole, event: Event) {
        let mut guard = self.monitor.lock();
        let dispatch = match &mut guard.phase {
            Phase::Initializing(waits) | Phase::Closing(waits) => waits.dispatch(event),
            Phase::Loading(queue) => {
                let dispatch = queue.waits.dispatch(event);
                if let Dispatch::Matched {
                    follow_up: Some(follow_up),
                    ..
                } = dispatch
                {
                    queue.apply(follow_up);
                }
                dispatch
            }
            Phase::Ready | Phase::Failed | Phase::Closed if event.is_fatal() => Dispatch::Fatal,
            Phase::Ready | Phase::Failed | Phase::Closed => Dispatch::Unmatched,
        };

        match dispatch {
            Dispatch::Fatal => {
                drop(guard);
                self.fatal(source, event);
            }
            Dispatch::Unmatched => {
                trace!(%source, %event, "Ignoring unexpected event");
            }
            Dispatch::Matched { drained, .. } => {
                debug!(%source, %event, drained, "Matched completion");
                if drained {
                    self.monitor.notify_one();
                }
            }
        }
    }

    fn on_buffer_returned(&self, source: ComponentRole, id: BufferId) {
        let mut guard = self.monitor.lock();
        let phase = guard.phase.name();
        let returned = match &mut guard.phase {
            Phase::Loading(queue) => Some(queue.pool_mut().return_buffer(id)),
            Phase::Failed => {
                debug!(%source, %id, "Input buffer returned after a failed load");
                return;
            }
            _ => None,
        };
        match returned {
            Some(Ok(returned)) => {
                trace!(%source, %id, "Input buffer returned");
                if returned.should_wake() {
                    self.monitor.notify_one();
                }
            }
            Some(Err(e)) => {
                drop(guard);
                panic!("{source} buffer return rejected: {e}");
            }
            None => {
                drop(guard);
                panic!("{source} returned input buffer {id} in phase {phase}");
            }
        }
    }

    fn on_buffer_filled(&self, source: ComponentRole, handle: BufferHandle) {
        let notifier: Option<RenderNotifier> = {
            let mut guard = self.monitor.lock();
            match &mut guard.phase {
                Phase::Loading(queue) => {
                    queue.frames_rendered += 1;
                    Some(Arc::clone(&queue.notifier))
                }
                _ => None,
            }
        };
        match notifier {
            Some(notify) => {
                debug!(%source, handle = handle.0, "Render target filled");
                notify(true);
            }
            None => warn!(%source, handle = handle.0, "Output buffer filled with no active session"),
        }
    }
}

// ---------------------------------------------------------------------------
// Public views
// ---------------------------------------------------------------------------

/// Observable controller state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineState {
    /// Setup commands issued; `pending` completions outstanding.
    Initializing { pending: usize },
    Ready,
    /// A session is active.
    Loading,
    Closing,
    /// A load failed; only [`Pipeline::shutdown`] remains.
    Failed,
    Closed,
}

/// Layout of the cached input buffer memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolLayout {
    pub count: usize,
    pub size: usize,
    pub alignment: usize,
    /// Region start addresses, in registration order.
    pub addresses: Vec<usize>,
}

/// Input buffer memory, allocated on first load and kept across sessions.
struct InputBuffers {
    requirements: BufferRequirements,
    regions: Vec<AlignedRegion>,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A decoder tunneled into a renderer, driven through one engine monitor.
pub struct Pipeline {
    monitor: Arc<Monitor<Shared>>,
    platform: Arc<dyn Platform>,
    decoder: Arc<dyn Component>,
    renderer: Arc<dyn Component>,
    decoder_ports: PortPair,
    renderer_ports: PortPair,
    config: PipelineConfig,
    input: Option<InputBuffers>,
    session: Option<Session>,
}

impl Pipeline {
    /// Open both components and start initialization.
    ///
    /// Discovers each component's ports, sets the decoder input coding,
    /// then issues the port-disable and state commands without waiting for
    /// them. [`load`](Self::load) or [`wait_ready`](Self::wait_ready)
    /// drains the initialization wait-set.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or any synchronous setup step
    /// is rejected. No usable pipeline exists afterwards.
    pub fn new(platform: Arc<dyn Platform>, config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;

        let monitor = Arc::new(Monitor::new(Shared::new()));
        let router: Arc<dyn ComponentCallbacks> = Arc::new(EventRouter {
            monitor: Arc::clone(&monitor),
            policy: config.fatal_policy,
        });

        let decoder = platform.open(
            &config.decoder_component,
            ComponentRole::Decoder,
            Arc::clone(&router),
        )?;
        let renderer = platform.open(&config.renderer_component, ComponentRole::Renderer, router)?;

        let decoder_ports = query_ports(decoder.as_ref(), ParamIndex::ImagePorts)?;
        let renderer_ports = query_ports(renderer.as_ref(), ParamIndex::VideoPorts)?;
        info!(
            decoder = decoder.name(),
            input = %decoder_ports.input,
            output = %decoder_ports.output,
            "Decoder opened"
        );
        info!(
            renderer = renderer.name(),
            input = %renderer_ports.input,
            output = %renderer_ports.output,
            "Renderer opened"
        );

        decoder.set_parameter(&Param::ImagePortFormat {
            port: decoder_ports.input,
            coding: config.input_coding,
        })?;

        let pipeline = Self {
            monitor,
            platform,
            decoder,
            renderer,
            decoder_ports,
            renderer_ports,
            config,
            input: None,
            session: None,
        };

        use ComponentRole::{Decoder, Renderer};
        pipeline.issue(Decoder, Command::PortDisable(decoder_ports.input))?;
        pipeline.issue(Decoder, Command::PortDisable(decoder_ports.output))?;
        pipeline.issue(Renderer, Command::PortDisable(renderer_ports.input))?;
        pipeline.issue(Renderer, Command::PortDisable(renderer_ports.output))?;
        pipeline.issue(Decoder, Command::StateSet(ComponentState::Idle))?;
        pipeline.issue(Renderer, Command::StateSet(ComponentState::Idle))?;
        pipeline.issue(Decoder, Command::StateSet(ComponentState::Executing))?;

        debug!("Initialization commands issued");
        Ok(pipeline)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> PipelineState {
        match &self.monitor.lock().phase {
            Phase::Initializing(waits) => PipelineState::Initializing {
                pending: waits.len(),
            },
            Phase::Ready => PipelineState::Ready,
            Phase::Loading(_) => PipelineState::Loading,
            Phase::Closing(_) => PipelineState::Closing,
            Phase::Failed => PipelineState::Failed,
            Phase::Closed => PipelineState::Closed,
        }
    }

    /// Stage of the active session, if any.
    pub fn session_stage(&self) -> Option<SessionStage> {
        self.session.as_ref().map(Session::stage)
    }

    pub fn decoder_ports(&self) -> PortPair {
        self.decoder_ports
    }

    pub fn renderer_ports(&self) -> PortPair {
        self.renderer_ports
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Layout of the input buffer memory, once the first load allocated it.
    pub fn pool_layout(&self) -> Option<PoolLayout> {
        self.input.as_ref().map(|input| PoolLayout {
            count: input.requirements.count,
            size: input.requirements.size,
            alignment: input.requirements.alignment,
            addresses: input.regions.iter().map(AlignedRegion::address).collect(),
        })
    }

    /// Occupancy of the active session's buffer pool.
    pub fn pool_stats(&self) -> Option<PoolStats> {
        match &self.monitor.lock().phase {
            Phase::Loading(queue) if queue.has_pool() => Some(queue.pool().stats()),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Block until initialization completes.
    pub fn wait_ready(&self) {
        let mut guard = self.monitor.lock();
        self.monitor.wait_until(&mut guard, |s| s.is_settled());
        if let Phase::Initializing(_) = guard.phase {
            guard.phase = Phase::Ready;
            info!("Pipeline ready");
        }
    }

    /// Stream `source` through the decoder into a fresh image on `target`.
    ///
    /// Blocks until the render target fill has been requested and every
    /// input buffer has come back. `notifier` is invoked with `true` from
    /// the callback context once the renderer reports the image filled.
    ///
    /// # Errors
    ///
    /// Synchronous component, render-target, and byte-stream failures are
    /// returned as they occur. Registrations and the render-target image
    /// made so far are released and the pipeline moves to
    /// [`PipelineState::Failed`]; only [`shutdown`](Self::shutdown) is
    /// valid afterwards.
    ///
    /// # Panics
    ///
    /// Panics if a session is already active, or the pipeline has failed
    /// or is closed.
    pub fn load<F>(
        &mut self,
        source: Box<dyn ByteSource>,
        target: Box<dyn RenderTarget>,
        notifier: F,
    ) -> PipelineResult<LoadReport>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        assert!(self.session.is_none(), "load() called while a session is active");
        let mut session = Session::new(source, target, self.config.min_chunk_size)?;

        {
            let mut guard = self.monitor.lock();
            self.monitor.wait_until(&mut guard, |s| s.is_settled());
            match &guard.phase {
                Phase::Initializing(_) | Phase::Ready => {}
                other => panic!("load() called in phase {}", other.name()),
            }
            guard.phase = Phase::Loading(LoadQueue::new(Arc::new(notifier)));
        }
        info!(size = session.size(), "Session started");

        if let Err(e) = self.run_session(&mut session) {
            error!(error = %e, stage = %session.stage(), "Load failed");
            self.abandon(&mut session);
            return Err(e);
        }

        let report = session.report();
        info!(
            submissions = report.submissions,
            bytes = report.bytes_consumed,
            geometry = %report.geometry,
            "Session complete"
        );
        self.session = Some(session);
        Ok(report)
    }

    /// Drive `session` from streaming through to the final drain.
    fn run_session(&mut self, session: &mut Session) -> PipelineResult<()> {
        use ComponentRole::{Decoder, Renderer};
        let dec = self.decoder_ports;
        let ren = self.renderer_ports;

        // Completes only once every input buffer is registered.
        self.issue(Decoder, Command::PortEnable(dec.input))?;
        self.register_input_buffers()?;

        if let Some(hint) = self.config.output_frame_hint {
            let mut def = port_definition(self.decoder.as_ref(), dec.output)?;
            def.frame = hint;
            self.decoder.set_parameter(&Param::PortDefinition(def))?;
            debug!(geometry = %hint, "Decoder output geometry hint set");
        }

        self.expect(
            Event::port_settings_changed(dec.output),
            Some(FollowUp::MarkOutputFormatChanged),
        );

        session.advance(SessionStage::StreamingInput);
        self.stream_input(session, true)?;

        session.advance(SessionStage::AwaitingFormatChange);
        self.wait_phase();

        self.platform.setup_tunnel(
            (self.decoder.as_ref(), dec.output),
            Some((self.renderer.as_ref(), ren.input)),
        )?;
        self.issue(Decoder, Command::PortEnable(dec.output))?;
        self.issue(Renderer, Command::PortEnable(ren.input))?;
        self.wait_phase();
        session.advance(SessionStage::TunnelEstablished);

        let geometry = port_definition(self.decoder.as_ref(), dec.output)?.frame;
        session.geometry = geometry;
        let surface = session.target_mut().create_image(geometry)?;
        session.surface = Some(surface);
        debug!(%geometry, surface = surface.0, "Render target image created");

        self.issue(Renderer, Command::PortEnable(ren.output))?;
        let render_buffer = self.renderer.use_surface(ren.output, surface)?;
        session.render_buffer = Some(render_buffer);
        self.issue(Renderer, Command::StateSet(ComponentState::Executing))?;
        self.wait_phase();
        session.advance(SessionStage::Rendering);

        self.stream_input(session, false)?;
        self.renderer.fill_this_buffer(render_buffer)?;

        session.advance(SessionStage::Draining);
        self.wait_drained();
        session.advance(SessionStage::Complete);
        Ok(())
    }

    /// Release what a failed load acquired and park the engine in
    /// [`Phase::Failed`]. Buffers the decoder still holds come back to a
    /// router that ignores them.
    fn abandon(&mut self, session: &mut Session) {
        let mut queue = {
            let mut guard = self.monitor.lock();
            match mem::replace(&mut guard.phase, Phase::Failed) {
                Phase::Loading(queue) => queue,
                other => panic!("load() found phase {}", other.name()),
            }
        };

        if let Some(handle) = session.render_buffer.take() {
            if let Err(e) = self.renderer.free_buffer(self.renderer_ports.output, handle) {
                warn!(error = %e, "Failed to free render target buffer");
            }
        }
        if let Some(surface) = session.surface.take() {
            session.target_mut().destroy_image(surface);
        }
        if let Some(pool) = queue.take_pool() {
            let stats = pool.stats();
            if stats.in_flight > 0 {
                warn!(in_flight = stats.in_flight, "Abandoning input buffers held by the decoder");
            }
            self.free_input_registrations(pool.handles());
        }
    }

    fn free_input_registrations(&self, handles: impl IntoIterator<Item = BufferHandle>) {
        let port = self.decoder_ports.input;
        for handle in handles {
            if let Err(e) = self.decoder.free_buffer(port, handle) {
                warn!(%port, handle = handle.0, error = %e, "Failed to free input buffer");
            }
        }
    }

    /// Tear the active session down and return to initialization.
    ///
    /// Input buffer memory is kept for the next load; only its
    /// registrations are released. The decoder input stays disabled until
    /// the next load enables it.
    ///
    /// # Panics
    ///
    /// Panics if no session is active.
    pub fn reset(&mut self) -> PipelineResult<()> {
        let Some(mut session) = self.session.take() else {
            panic!("reset() called without an active session");
        };
        info!("Resetting pipeline");

        use ComponentRole::{Decoder, Renderer};
        let dec = self.decoder_ports;
        let ren = self.renderer_ports;

        self.issue(Renderer, Command::Flush(ren.output))?;
        self.issue(Decoder, Command::Flush(dec.input))?;
        self.wait_phase();
        self.wait_drained();

        self.issue(Decoder, Command::StateSet(ComponentState::Idle))?;
        self.issue(Renderer, Command::StateSet(ComponentState::Idle))?;
        self.wait_phase();

        self.issue(Decoder, Command::PortDisable(dec.output))?;
        self.issue(Renderer, Command::PortDisable(ren.input))?;
        self.platform
            .setup_tunnel((self.decoder.as_ref(), dec.output), None)?;
        self.issue(Renderer, Command::PortDisable(ren.output))?;
        if let Some(handle) = session.render_buffer.take() {
            self.renderer.free_buffer(ren.output, handle)?;
        }
        self.wait_phase();

        if let Some(surface) = session.surface.take() {
            session.target_mut().destroy_image(surface);
        }

        let handles: Vec<BufferHandle> = {
            let mut guard = self.monitor.lock();
            match mem::replace(&mut guard.phase, Phase::Initializing(WaitSet::new())) {
                Phase::Loading(mut queue) => queue
                    .take_pool()
                    .map(|pool| pool.handles().collect::<Vec<_>>())
                    .unwrap_or_default(),
                other => panic!("reset() found phase {}", other.name()),
            }
        };

        self.issue(Decoder, Command::PortDisable(dec.input))?;
        for handle in handles {
            self.decoder.free_buffer(dec.input, handle)?;
        }
        self.issue(Decoder, Command::StateSet(ComponentState::Executing))?;

        debug!(stage = %session.stage(), "Session released");
        Ok(())
    }

    /// Reset any active session, bring both components back to loaded, and
    /// release the input buffer memory.
    ///
    /// After a failed load the components are left where the failure put
    /// them and nothing is awaited.
    ///
    /// # Panics
    ///
    /// Panics if the pipeline is already closed.
    pub fn shutdown(&mut self) -> PipelineResult<()> {
        match self.state() {
            PipelineState::Closed => panic!("pipeline already shut down"),
            PipelineState::Failed => {
                warn!("Shutting down after a failed load");
                self.input = None;
                self.monitor.lock().phase = Phase::Closed;
                return Ok(());
            }
            _ => {}
        }
        if self.session.is_some() {
            self.reset()?;
        }
        self.wait_ready();
        self.monitor.lock().phase = Phase::Closing(WaitSet::new());

        use ComponentRole::{Decoder, Renderer};
        self.issue(Decoder, Command::StateSet(ComponentState::Idle))?;
        self.wait_phase();
        self.issue(Decoder, Command::StateSet(ComponentState::Loaded))?;
        self.issue(Renderer, Command::StateSet(ComponentState::Loaded))?;
        self.wait_phase();

        self.input = None;
        self.monitor.lock().phase = Phase::Closed;
        info!("Pipeline shut down");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn component(&self, role: ComponentRole) -> &dyn Component {
        match role {
            ComponentRole::Decoder => self.decoder.as_ref(),
            ComponentRole::Renderer => self.renderer.as_ref(),
        }
    }

    fn expect(&self, event: Event, follow_up: Option<FollowUp>) {
        self.monitor.lock().waits_mut().expect(event, follow_up);
    }

    /// Register the command's completion, then send it.
    fn issue(&self, role: ComponentRole, command: Command) -> Result<(), ComponentError> {
        self.expect(command.completion(), None);
        debug!(%role, %command, "Sending command");
        self.component(role).send_command(command)
    }

    fn wait_phase(&self) {
        let mut guard = self.monitor.lock();
        self.monitor.wait_until(&mut guard, |s| s.is_settled());
    }

    fn wait_drained(&self) {
        let mut guard = self.monitor.lock();
        self.monitor
            .wait_until(&mut guard, |s| s.load_queue().pool().is_drained());
    }

    /// Decoder input requirements, with the configured size override.
    fn input_requirements(&self) -> PipelineResult<BufferRequirements> {
        let port = self.decoder_ports.input;
        let def = port_definition(self.decoder.as_ref(), port)?;
        if def.buffer_count == 0 {
            return Err(ComponentError::Parameter {
                role: ComponentRole::Decoder,
                param: format!("port definition of {port}"),
                reason: "zero buffer count".into(),
            }
            .into());
        }
        let size = self.config.input_buffer_size.unwrap_or(def.buffer_size);
        if size < self.config.min_chunk_size {
            return Err(ConfigError::BufferTooSmall {
                size,
                min_chunk: self.config.min_chunk_size,
            }
            .into());
        }
        Ok(BufferRequirements {
            count: def.buffer_count,
            size,
            alignment: def.buffer_alignment,
        })
    }

    /// Register the cached input regions with the decoder and attach a
    /// fresh pool over them. Requirements are queried and memory allocated
    /// on the first call only.
    fn register_input_buffers(&mut self) -> PipelineResult<()> {
        if self.input.is_none() {
            let requirements = self.input_requirements()?;
            let regions = (0..requirements.count)
                .map(|_| AlignedRegion::new(requirements.size, requirements.alignment))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ComponentError::Parameter {
                    role: ComponentRole::Decoder,
                    param: format!("port definition of {}", self.decoder_ports.input),
                    reason: format!("buffer alignment {}: {e}", requirements.alignment),
                })?;
            info!(
                count = requirements.count,
                size = requirements.size,
                alignment = requirements.alignment,
                "Input buffers allocated"
            );
            self.input = Some(InputBuffers {
                requirements,
                regions,
            });
        }
        let Some(input) = self.input.as_ref() else {
            unreachable!("input buffers allocated above");
        };

        let port = self.decoder_ports.input;
        let mut handles = Vec::with_capacity(input.regions.len());
        for region in &input.regions {
            match self.decoder.use_buffer(port, &region.descriptor()) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    self.free_input_registrations(handles);
                    return Err(e.into());
                }
            }
        }
        let pool = BufferPool::new(&handles, input.requirements.size);
        self.monitor.lock().load_queue().attach(pool);
        Ok(())
    }

    /// Fill and submit input buffers until the stream is exhausted or, when
    /// `until_format_change` is set, the decoder has settled its output
    /// format. The first buffer of a session is always submitted.
    ///
    /// The stop check and the next acquisition share one lock acquisition,
    /// so a format change landing between submissions cannot be missed.
    fn stream_input(
        &mut self,
        session: &mut Session,
        until_format_change: bool,
    ) -> PipelineResult<()> {
        let Some(input) = self.input.as_mut() else {
            panic!("input buffers are not registered");
        };
        let mut first = session.submissions() == 0;

        loop {
            let slot = {
                let mut guard = self.monitor.lock();
                let stop = session.is_exhausted()
                    || (until_format_change && guard.load_queue().output_format_changed);
                if stop && !first {
                    break;
                }
                self.monitor
                    .wait_until(&mut guard, |s| s.load_queue().pool().has_released());
                match guard.load_queue().pool_mut().try_acquire() {
                    Some(slot) => slot,
                    None => unreachable!("released buffer vanished under the lock"),
                }
            };

            let region = &mut input.regions[slot.slot];
            let fill = match session.fill(region.as_mut_slice(), first) {
                Ok(fill) => fill,
                Err(e) => {
                    if let Err(pool_err) =
                        self.monitor.lock().load_queue().pool_mut().return_buffer(slot.id)
                    {
                        warn!(id = %slot.id, error = %pool_err, "Unfilled buffer not released");
                    }
                    return Err(e.into());
                }
            };
            let header = self
                .monitor
                .lock()
                .load_queue()
                .pool_mut()
                .stamp(slot.id, fill.filled_len, fill.flags)?;

            debug!(
                id = %slot.id,
                read = fill.read,
                filled = fill.filled_len,
                flags = ?fill.flags,
                "Submitting input buffer"
            );
            if let Err(e) = self.decoder.empty_this_buffer(&header) {
                if let Err(pool_err) =
                    self.monitor.lock().load_queue().pool_mut().return_buffer(slot.id)
                {
                    warn!(id = %slot.id, error = %pool_err, "Rejected buffer not released");
                }
                return Err(e.into());
            }
            first = false;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("decoder", &self.decoder.name())
            .field("renderer", &self.renderer.name())
            .field("decoder_ports", &self.decoder_ports)
            .field("renderer_ports", &self.renderer_ports)
            .field("session", &self.session)
            .finish()
    }
}

fn query_ports(component: &dyn Component, index: ParamIndex) -> Result<PortPair, ComponentError> {
    match component.get_parameter(index)? {
        Param::Ports(ports) => Ok(ports),
        _ => Err(ComponentError::UnexpectedParameter {
            role: component.role(),
            expected: "port range",
        }),
    }
}

fn port_definition(
    component: &dyn Component,
    port: PortIndex,
) -> Result<PortDefinition, ComponentError> {
    match component.get_parameter(ParamIndex::PortDefinition(port))? {
        Param::PortDefinition(def) => Ok(def),
        _ => Err(ComponentError::UnexpectedParameter {
            role: component.role(),
            expected: "port definition",
        }),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
