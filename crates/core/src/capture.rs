//! Freehand signature capture surface.
//!
//! A pointer-driven drawing state machine local to the signing view. Strokes
//! accumulate in memory only; nothing is persisted until the surrounding
//! submission is accepted, so abandoning the view leaves no state behind.
//! Finalization rasterizes whatever strokes exist into a BMP image at
//! submission time.

use serde::{Deserialize, Serialize};

use crate::domain::outcome::SignatureImage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Empty,
    Drawing,
    Captured,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// One continuous pen-down .. pen-up polyline.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub points: Vec<Point>,
}

#[derive(Clone, Debug)]
pub struct SignatureCanvas {
    width: u32,
    height: u32,
    state: CaptureState,
    strokes: Vec<Stroke>,
    active: Option<Stroke>,
}

impl Default for SignatureCanvas {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }
}

const DEFAULT_WIDTH: u32 = 400;
const DEFAULT_HEIGHT: u32 = 160;

impl SignatureCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            state: CaptureState::Empty,
            strokes: Vec::new(),
            active: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn stroke_count(&self) -> usize {
        self.strokes.len() + usize::from(self.active.is_some())
    }

    pub fn is_blank(&self) -> bool {
        self.strokes.is_empty() && self.active.is_none()
    }

    /// First pointer-down inside the drawing region starts a stroke. A
    /// pointer-down on a captured surface starts an additional stroke.
    pub fn pointer_down(&mut self, point: Point) {
        let mut stroke = Stroke::default();
        stroke.points.push(self.clamp(point));
        self.active = Some(stroke);
        self.state = CaptureState::Drawing;
    }

    /// Appends a line segment to the in-flight stroke; ignored outside the
    /// drawing state (e.g. moves with the pointer released).
    pub fn pointer_move(&mut self, point: Point) {
        if self.state != CaptureState::Drawing {
            return;
        }
        let clamped = self.clamp(point);
        if let Some(active) = self.active.as_mut() {
            active.points.push(clamped);
        }
    }

    /// Ends the in-flight stroke. The surface stays capturable: more strokes
    /// may follow, and nothing is finalized yet.
    pub fn pointer_up(&mut self) {
        if let Some(active) = self.active.take() {
            if !active.points.is_empty() {
                self.strokes.push(active);
            }
        }
        self.state = if self.is_blank() { CaptureState::Empty } else { CaptureState::Captured };
    }

    /// Resets the buffer unconditionally, from any state.
    pub fn clear(&mut self) {
        self.strokes.clear();
        self.active = None;
        self.state = CaptureState::Empty;
    }

    /// Synchronously serializes the stroke buffer to a raster image.
    ///
    /// Returns `None` for a blank surface so the submission validator can
    /// raise `SignatureRequired` where the document kind mandates a drawn
    /// signature.
    pub fn finalize(&self) -> Option<SignatureImage> {
        if self.is_blank() {
            return None;
        }

        let mut raster = Raster::new(self.width, self.height);
        for stroke in self.strokes.iter().chain(self.active.as_ref()) {
            raster.draw_stroke(stroke);
        }
        Some(SignatureImage(raster.encode_bmp()))
    }

    fn clamp(&self, point: Point) -> Point {
        Point {
            x: point.x.clamp(0.0, (self.width - 1) as f32),
            y: point.y.clamp(0.0, (self.height - 1) as f32),
        }
    }
}

/// Monochrome pixel grid: `true` is ink.
struct Raster {
    width: u32,
    height: u32,
    ink: Vec<bool>,
}

impl Raster {
    fn new(width: u32, height: u32) -> Self {
        Self { width, height, ink: vec![false; (width * height) as usize] }
    }

    fn draw_stroke(&mut self, stroke: &Stroke) {
        match stroke.points.as_slice() {
            [] => {}
            [single] => self.plot(single.x as i64, single.y as i64),
            points => {
                for segment in points.windows(2) {
                    self.draw_segment(segment[0], segment[1]);
                }
            }
        }
    }

    /// Bresenham line between two clamped points.
    fn draw_segment(&mut self, from: Point, to: Point) {
        let (mut x0, mut y0) = (from.x as i64, from.y as i64);
        let (x1, y1) = (to.x as i64, to.y as i64);

        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        loop {
            self.plot(x0, y0);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let doubled = 2 * err;
            if doubled >= dy {
                err += dy;
                x0 += sx;
            }
            if doubled <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    fn plot(&mut self, x: i64, y: i64) {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return;
        }
        self.ink[(y as u32 * self.width + x as u32) as usize] = true;
    }

    /// 24-bit bottom-up BMP: white background, black ink. Deterministic for
    /// a given stroke buffer, which keeps stored digests stable.
    fn encode_bmp(&self) -> Vec<u8> {
        let row_bytes = (self.width * 3).div_ceil(4) * 4;
        let pixel_bytes = row_bytes * self.height;
        let file_size = BMP_HEADER_SIZE + pixel_bytes;

        let mut out = Vec::with_capacity(file_size as usize);
        out.extend_from_slice(b"BM");
        out.extend_from_slice(&file_size.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&BMP_HEADER_SIZE.to_le_bytes());

        out.extend_from_slice(&40u32.to_le_bytes());
        out.extend_from_slice(&(self.width as i32).to_le_bytes());
        out.extend_from_slice(&(self.height as i32).to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&24u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&pixel_bytes.to_le_bytes());
        out.extend_from_slice(&PIXELS_PER_METRE.to_le_bytes());
        out.extend_from_slice(&PIXELS_PER_METRE.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());

        for row in (0..self.height).rev() {
            let row_start = out.len();
            for col in 0..self.width {
                let value =
                    if self.ink[(row * self.width + col) as usize] { 0x00 } else { 0xff };
                out.extend_from_slice(&[value, value, value]);
            }
            while (out.len() - row_start) % 4 != 0 {
                out.push(0);
            }
        }

        out
    }
}

const BMP_HEADER_SIZE: u32 = 54;
const PIXELS_PER_METRE: i32 = 2835;
