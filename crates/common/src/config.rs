//! Pipeline configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{ComponentRole, FrameGeometry, ImageCoding};

/// Smallest input the decoder accepts in a single first buffer. Shorter
/// streams are zero-padded up to this size.
pub const DEFAULT_MIN_CHUNK_SIZE: usize = 8750;

/// What to do when a component reports an unrecoverable error.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FatalPolicy {
    /// Abort the process. Hardware state is unknown after a fatal error.
    #[default]
    Abort,
    /// Panic on the callback context instead (for tests and embedding).
    Panic,
}

/// Top-level pipeline configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Component name of the image decoder.
    pub decoder_component: String,
    /// Component name of the renderer.
    pub renderer_component: String,
    /// Encoding of the data fed to the decoder input port.
    pub input_coding: ImageCoding,
    /// Overrides the hardware-reported input buffer size.
    pub input_buffer_size: Option<usize>,
    /// Padding threshold for small inputs.
    pub min_chunk_size: usize,
    /// Output geometry written to the decoder output port before streaming.
    pub output_frame_hint: Option<FrameGeometry>,
    pub fatal_policy: FatalPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decoder_component: "OMX.broadcom.image_decode".to_string(),
            renderer_component: "OMX.broadcom.egl_render".to_string(),
            input_coding: ImageCoding::Png,
            input_buffer_size: None,
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            output_frame_hint: None,
            fatal_policy: FatalPolicy::Abort,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decoder_component.is_empty() {
            return Err(ConfigError::EmptyComponentName(ComponentRole::Decoder));
        }
        if self.renderer_component.is_empty() {
            return Err(ConfigError::EmptyComponentName(ComponentRole::Renderer));
        }
        if self.min_chunk_size == 0 {
            return Err(ConfigError::Zero {
                field: "min_chunk_size",
            });
        }
        if let Some(size) = self.input_buffer_size {
            if size < self.min_chunk_size {
                return Err(ConfigError::BufferTooSmall {
                    size,
                    min_chunk: self.min_chunk_size,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let cfg = PipelineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.min_chunk_size, 8750);
        assert_eq!(cfg.fatal_policy, FatalPolicy::Abort);
    }

    #[test]
    fn rejects_zero_min_chunk() {
        let cfg = PipelineConfig {
            min_chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Zero {
                field: "min_chunk_size"
            })
        ));
    }

    #[test]
    fn rejects_buffer_override_below_min_chunk() {
        let cfg = PipelineConfig {
            input_buffer_size: Some(4096),
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::BufferTooSmall { size: 4096, .. })
        ));
    }

    #[test]
    fn rejects_empty_component_name() {
        let cfg = PipelineConfig {
            renderer_component: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::EmptyComponentName(ComponentRole::Renderer))
        ));
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = PipelineConfig {
            input_buffer_size: Some(909_808),
            output_frame_hint: Some(FrameGeometry {
                width: 161,
                height: 64,
                stride: 160,
                slice_height: 64,
            }),
            fatal_policy: FatalPolicy::Panic,
            ..Default::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let restored: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, cfg);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(r#"{"min_chunk_size": 1024}"#).unwrap();
        assert_eq!(cfg.min_chunk_size, 1024);
        assert_eq!(cfg.decoder_component, "OMX.broadcom.image_decode");
        assert_eq!(cfg.input_coding, ImageCoding::Png);
    }
}
