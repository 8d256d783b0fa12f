//! Vision service contract.
//!
//! Image matching and OCR are consumed capabilities: the engine describes
//! what to look for and branches on the outcome. A miss is an ordinary
//! `None`, never an error — [`VisionError`](crate::error::VisionError) is
//! reserved for backend failures (capture broken, model crashed). Queries
//! carry an optional per-call timeout; a backend that exceeds it reports
//! not-found rather than blocking.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::VisionError;

/// Screen-space rectangle, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width as i32 / 2,
            y: self.y + self.height as i32 / 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn offset(&self, dx: i32, dy: i32) -> Point {
        Point {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageQuery {
    /// Template reference understood by the backend (usually a file path).
    pub template: String,
    pub region: Option<Region>,
    /// Minimum match score; lower-scoring candidates are not-found.
    pub confidence: f32,
    pub scale_range: Option<(f32, f32)>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct TextQuery {
    pub target: String,
    pub region: Option<Region>,
    pub exact_match: bool,
    pub confidence_threshold: f32,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageHit {
    pub bbox: Region,
    pub center: Point,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextHit {
    /// The recognized text of the matched region.
    pub text: String,
    pub bbox: Region,
    pub center: Point,
    pub confidence: f32,
}

/// An encoded screen capture (format is the backend's choice, PNG typical).
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub data: Vec<u8>,
    pub region: Option<Region>,
}

#[async_trait]
pub trait VisionService: Send + Sync {
    /// Finds the best template match at or above the query confidence.
    async fn find_image(&self, query: &ImageQuery) -> Result<Option<ImageHit>, VisionError>;

    /// Finds the single best text match for the target.
    async fn find_text(&self, query: &TextQuery) -> Result<Option<TextHit>, VisionError>;

    /// Finds every text match for the target, best first.
    async fn find_all_text(&self, query: &TextQuery) -> Result<Vec<TextHit>, VisionError>;

    /// Captures the screen, or `region` of it.
    async fn capture_screen(&self, region: Option<Region>) -> Result<Screenshot, VisionError>;
}
