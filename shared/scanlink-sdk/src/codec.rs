//! Seams for the 2D code decoder and renderer
//!
//! Symbol encoding is delegated to whatever backend the host platform
//! provides; the SDK only fixes the call shapes and the error surface.

use crate::camera::Frame;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest payload a version-40 symbol holds in byte mode at level L
pub const MAX_PAYLOAD_BYTES: usize = 2953;

pub trait Decoder: Send + Sync {
    /// Decoded text if the frame contains a readable code
    fn decode(&self, frame: &Frame) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCorrectionLevel {
    Low,
    #[default]
    Medium,
    Quartile,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Edge length of the square output, in pixels
    pub size: u32,
    pub error_correction: ErrorCorrectionLevel,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            size: 256,
            error_correction: ErrorCorrectionLevel::Medium,
        }
    }
}

/// Rendered symbol as 8-bit luma
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("Nothing to render")]
    Empty,

    #[error("Payload of {len} bytes exceeds symbol capacity of {max}")]
    TooLong { len: usize, max: usize },

    #[error("Renderer failed: {0}")]
    Backend(String),
}

impl RenderError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::TooLong { .. } => "too-long",
            Self::Backend(_) => "backend",
        }
    }
}

pub trait CodeRenderer: Send + Sync {
    fn render(&self, text: &str, options: &RenderOptions) -> Result<CodeImage, RenderError>;
}

/// Checks shared by every renderer before handing off to the backend
pub fn check_renderable(text: &str) -> Result<(), RenderError> {
    if text.is_empty() {
        return Err(RenderError::Empty);
    }
    if text.len() > MAX_PAYLOAD_BYTES {
        return Err(RenderError::TooLong {
            len: text.len(),
            max: MAX_PAYLOAD_BYTES,
        });
    }
    Ok(())
}
