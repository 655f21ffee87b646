//! Software render surface.
//!
//! `Canvas` stands in for the UI layer: it composes the latest displayable image
//! into display space with the same transform used for the boxes, then strokes
//! every overlay rectangle on top. The result can be written out as JPEG.

use std::path::Path;

use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};

use crate::frame::DisplayImage;
use crate::geometry::{GeometryContext, Point, Rect, Size};
use crate::overlay::{RenderSurface, SurfaceUpdate};

/// A render surface that also shows the frame under the overlay.
pub trait DisplaySurface: RenderSurface {
    /// Image to show with the next overlay set, and the geometry it was mapped under.
    fn show_image(&mut self, image: DisplayImage, geometry: GeometryContext);

    /// Change the target size. Takes effect on the next `apply`.
    fn resize(&mut self, size: Size);
}

const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const STROKE: Rgb<u8> = Rgb([255, 204, 0]);
const STROKE_WIDTH: u32 = 2;

pub struct Canvas {
    presented: RgbImage,
    background: Option<(DisplayImage, GeometryContext)>,
    frames_presented: u64,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            presented: RgbImage::from_pixel(width, height, BACKGROUND),
            background: None,
            frames_presented: 0,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.presented.dimensions()
    }

    /// Last fully composed picture.
    pub fn presented(&self) -> &RgbImage {
        &self.presented
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn save_jpeg(&self, path: &Path) -> Result<()> {
        self.presented
            .save_with_format(path, ImageFormat::Jpeg)
            .with_context(|| format!("writing snapshot to {}", path.display()))
    }

    fn compose_background(&self, target: &mut RgbImage) {
        let Some((image, geometry)) = &self.background else {
            return;
        };
        let Some(inverse) = geometry.transform().inverse() else {
            return;
        };
        for (x, y, px) in target.enumerate_pixels_mut() {
            let src = inverse.apply(Point::new(x as f64 + 0.5, y as f64 + 0.5));
            if let Some(rgb) = image.sample(src.x.floor() as i64, src.y.floor() as i64) {
                *px = Rgb(rgb);
            }
        }
    }
}

/// Outline `rect` on `target`, clipped to its bounds.
fn stroke_rect(target: &mut RgbImage, rect: &Rect, color: Rgb<u8>, width: u32) {
    let (tw, th) = target.dimensions();
    if tw == 0 || th == 0 || !rect.width.is_finite() || !rect.height.is_finite() {
        return;
    }
    let clip = |v: f64, max: u32| v.round().clamp(0.0, max as f64) as u32;
    let x0 = clip(rect.x, tw);
    let y0 = clip(rect.y, th);
    let x1 = clip(rect.max_x(), tw);
    let y1 = clip(rect.max_y(), th);
    if x0 >= x1 || y0 >= y1 {
        return;
    }
    let on_edge = |v: u32, lo: u32, hi: u32| v < lo + width || v + width >= hi;
    for y in y0..y1 {
        for x in x0..x1 {
            if on_edge(x, x0, x1) || on_edge(y, y0, y1) {
                target.put_pixel(x, y, color);
            }
        }
    }
}

impl DisplaySurface for Canvas {
    fn show_image(&mut self, image: DisplayImage, geometry: GeometryContext) {
        self.background = Some((image, geometry));
    }

    fn resize(&mut self, size: Size) {
        let (width, height) = (size.width.max(0.0) as u32, size.height.max(0.0) as u32);
        if self.presented.dimensions() != (width, height) {
            self.presented = RgbImage::from_pixel(width, height, BACKGROUND);
        }
    }
}

impl RenderSurface for Canvas {
    fn apply(&mut self, update: SurfaceUpdate<'_>) -> Result<()> {
        let (w, h) = self.presented.dimensions();
        let mut next = RgbImage::from_pixel(w, h, BACKGROUND);
        self.compose_background(&mut next);
        for shape in update.set.shapes() {
            stroke_rect(&mut next, &shape.rect, STROKE, STROKE_WIDTH);
            log::debug!("overlay: {:?} {}", shape.rect, shape.caption().replace('\n', " | "));
        }
        // Swap the finished picture in one step.
        self.presented = next;
        self.frames_presented += 1;
        Ok(())
    }
}
