//! In-memory render target.

use std::sync::Arc;

use parking_lot::Mutex;

use ip_common::{FrameGeometry, RenderTarget, SurfaceError, SurfaceHandle};

/// What happened to a [`SimSurface`]'s images.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SurfaceRecord {
    pub created: Vec<(SurfaceHandle, FrameGeometry)>,
    pub destroyed: Vec<SurfaceHandle>,
}

impl SurfaceRecord {
    /// Images created and not yet destroyed.
    pub fn live(&self) -> usize {
        self.created.len() - self.destroyed.len()
    }
}

/// Render target that hands out numbered image handles.
///
/// Clones share the same record, so a test can keep one clone while the
/// pipeline owns another.
#[derive(Clone, Debug, Default)]
pub struct SimSurface {
    record: Arc<Mutex<SurfaceRecord>>,
}

impl SimSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) -> SurfaceRecord {
        self.record.lock().clone()
    }
}

impl RenderTarget for SimSurface {
    fn create_image(&mut self, geometry: FrameGeometry) -> Result<SurfaceHandle, SurfaceError> {
        if geometry.width == 0 || geometry.height == 0 {
            return Err(SurfaceError::CreateFailed {
                width: geometry.width,
                height: geometry.height,
                reason: "empty image".into(),
            });
        }
        let mut record = self.record.lock();
        let handle = SurfaceHandle(record.created.len() as u64 + 1);
        record.created.push((handle, geometry));
        Ok(handle)
    }

    fn destroy_image(&mut self, handle: SurfaceHandle) {
        self.record.lock().destroyed.push(handle);
    }
}
