//! Session: Bookkeeping for one streaming (load) operation.
//!
//! A session is split in two along the lock boundary:
//!
//! - [`LoadQueue`] lives inside the engine monitor. The callback context
//!   touches it: the session wait-set, the input buffer pool, the
//!   output-format-changed flag, and the completion notifier.
//! - [`Session`] is owned by the controller thread alone: the byte stream
//!   and its cursor, the render target, and the stage machine.
//!
//! Stages run strictly forward:
//!
//! ```text
//! Created → StreamingInput → AwaitingFormatChange → TunnelEstablished
//!         → Rendering → Draining → Complete
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::debug;

use ip_common::{
    BufferFlags, BufferHandle, ByteSource, FrameGeometry, RenderTarget, SurfaceHandle,
};

use crate::pool::BufferPool;
use crate::waitset::{FollowUp, WaitSet};

/// Invoked from the callback context once the render target has been
/// filled. Never called with the engine lock held.
pub type RenderNotifier = Arc<dyn Fn(bool) + Send + Sync>;

/// Where a session is in its streaming operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionStage {
    /// Byte stream opened, size known, buffer pool attached.
    Created,
    /// Input buffers are being filled and submitted.
    StreamingInput,
    /// Waiting for the decoder to settle its output format.
    AwaitingFormatChange,
    /// Decoder output is linked to the renderer input.
    TunnelEstablished,
    /// Render target bound; remaining input fed and a fill requested.
    Rendering,
    /// Waiting for all input buffers to come back.
    Draining,
    Complete,
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Shared half
// ---------------------------------------------------------------------------

/// Session state reachable from the callback context.
pub struct LoadQueue {
    pub waits: WaitSet,
    /// Attached once the input buffers are registered, which can only
    /// happen after the decoder input enable has been requested.
    pool: Option<BufferPool>,
    /// Set once by the port-settings-changed follow-up. Tracked apart from
    /// the wait-set because it races with input streaming.
    pub output_format_changed: bool,
    pub notifier: RenderNotifier,
    pub frames_rendered: u64,
}

impl LoadQueue {
    pub fn new(notifier: RenderNotifier) -> Self {
        Self {
            waits: WaitSet::new(),
            pool: None,
            output_format_changed: false,
            notifier,
            frames_rendered: 0,
        }
    }

    /// Attach the session's buffer pool.
    ///
    /// # Panics
    ///
    /// Panics if a pool is already attached.
    pub fn attach(&mut self, pool: BufferPool) {
        assert!(self.pool.is_none(), "session already has a buffer pool");
        self.pool = Some(pool);
    }

    pub fn has_pool(&self) -> bool {
        self.pool.is_some()
    }

    /// # Panics
    ///
    /// Panics if no pool is attached.
    pub fn pool(&self) -> &BufferPool {
        match &self.pool {
            Some(pool) => pool,
            None => panic!("session has no buffer pool attached"),
        }
    }

    /// # Panics
    ///
    /// Panics if no pool is attached.
    pub fn pool_mut(&mut self) -> &mut BufferPool {
        match &mut self.pool {
            Some(pool) => pool,
            None => panic!("session has no buffer pool attached"),
        }
    }

    /// Detach the pool, leaving the session without one.
    pub fn take_pool(&mut self) -> Option<BufferPool> {
        self.pool.take()
    }

    /// Run a follow-up bound to a matched wait-set entry.
    pub fn apply(&mut self, follow_up: FollowUp) {
        match follow_up {
            FollowUp::MarkOutputFormatChanged => {
                debug!("Decoder output format settled");
                self.output_format_changed = true;
            }
        }
    }
}

impl fmt::Debug for LoadQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadQueue")
            .field("pending", &self.waits.len())
            .field("pool", &self.pool)
            .field("output_format_changed", &self.output_format_changed)
            .field("frames_rendered", &self.frames_rendered)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Controller half
// ---------------------------------------------------------------------------

/// Summary of a completed load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadReport {
    /// Stages in the order they were entered.
    pub stages: Vec<SessionStage>,
    /// Input buffers submitted to the decoder.
    pub submissions: usize,
    /// Bytes consumed from the byte stream.
    pub bytes_consumed: u64,
    /// Filled length of the first submitted buffer (after padding).
    pub first_filled_len: usize,
    /// Decoded output geometry reported by the decoder.
    pub geometry: FrameGeometry,
}

/// Result of filling one input buffer from the byte stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Fill {
    /// Bytes taken from the stream.
    pub read: usize,
    /// Length to report to the hardware (may include padding).
    pub filled_len: usize,
    pub flags: BufferFlags,
}

/// Controller-owned session state.
pub struct Session {
    source: Box<dyn ByteSource>,
    target: Box<dyn RenderTarget>,
    size: u64,
    offset: u64,
    min_chunk: usize,
    stage: SessionStage,
    stages: Vec<SessionStage>,
    submissions: usize,
    first_filled_len: usize,
    pub(crate) geometry: FrameGeometry,
    pub(crate) surface: Option<SurfaceHandle>,
    pub(crate) render_buffer: Option<BufferHandle>,
}

impl Session {
    /// Open a session over `source`, rewound to its start.
    pub fn new(
        mut source: Box<dyn ByteSource>,
        target: Box<dyn RenderTarget>,
        min_chunk: usize,
    ) -> io::Result<Self> {
        source.rewind()?;
        let size = source.len();
        debug!(size, "Session created");
        Ok(Self {
            source,
            target,
            size,
            offset: 0,
            min_chunk,
            stage: SessionStage::Created,
            stages: vec![SessionStage::Created],
            submissions: 0,
            first_filled_len: 0,
            geometry: FrameGeometry::default(),
            surface: None,
            render_buffer: None,
        })
    }

    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset == self.size
    }

    pub fn submissions(&self) -> usize {
        self.submissions
    }

    /// Move to `next`.
    ///
    /// # Panics
    ///
    /// Panics if `next` does not come after the current stage.
    pub fn advance(&mut self, next: SessionStage) {
        assert!(
            next > self.stage,
            "session stage cannot go from {} to {}",
            self.stage,
            next
        );
        debug!(from = %self.stage, to = %next, "Session stage");
        self.stage = next;
        self.stages.push(next);
    }

    /// Copy up to one buffer's worth of the stream into `buf`.
    ///
    /// If the whole stream is shorter than the minimum chunk size, the first
    /// buffer is zero-padded up to it while only the real bytes count as
    /// consumed. The buffer that exhausts the stream is flagged end of
    /// stream and end of frame.
    pub fn fill(&mut self, buf: &mut [u8], first: bool) -> io::Result<Fill> {
        let want = (self.size - self.offset).min(buf.len() as u64) as usize;
        let mut read = 0;
        while read < want {
            let n = self.source.read(&mut buf[read..want])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "byte stream ended at {} of {} bytes",
                        self.offset + read as u64,
                        self.size
                    ),
                ));
            }
            read += n;
        }

        let small = first && self.size < self.min_chunk as u64;
        let filled_len = if small {
            let padded = self.min_chunk.min(buf.len());
            buf[read..padded].fill(0);
            padded
        } else {
            read
        };

        self.offset += read as u64;
        let flags = if self.is_exhausted() {
            BufferFlags::END_OF_STREAM | BufferFlags::END_OF_FRAME
        } else {
            BufferFlags::NONE
        };

        if first {
            self.first_filled_len = filled_len;
        }
        self.submissions += 1;
        Ok(Fill {
            read,
            filled_len,
            flags,
        })
    }

    pub(crate) fn target_mut(&mut self) -> &mut dyn RenderTarget {
        self.target.as_mut()
    }

    pub fn report(&self) -> LoadReport {
        LoadReport {
            stages: self.stages.clone(),
            submissions: self.submissions,
            bytes_consumed: self.offset,
            first_filled_len: self.first_filled_len,
            geometry: self.geometry,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("stage", &self.stage)
            .field("size", &self.size)
            .field("offset", &self.offset)
            .field("submissions", &self.submissions)
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
