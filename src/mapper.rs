//! Normalized detection boxes to display-space rectangles.

use crate::detect::Detection;
use crate::geometry::{AffineTransform, GeometryContext, Rect};

/// A detection placed in the render target's coordinate space.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayRect {
    pub label: String,
    pub confidence: f32,
    pub rect: Rect,
}

/// Maps detections into display space.
///
/// The composed transform is cached per `GeometryContext`. A different buffer
/// or display size, fit mode or rotation rebuilds it; anything else reuses it.
#[derive(Debug, Default)]
pub struct CoordinateMapper {
    cached: Option<(GeometryContext, AffineTransform)>,
    rebuilds: u64,
}

impl CoordinateMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the cached transform. Call on resize when reusing a stale context.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// How many times the transform has been rebuilt.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    fn transform_for(&mut self, geometry: &GeometryContext) -> AffineTransform {
        match &self.cached {
            Some((ctx, transform)) if ctx == geometry => *transform,
            _ => {
                let transform = geometry.transform();
                log::debug!(
                    "geometry changed: buffer={}x{} display={}x{} fit={:?} scale={:.4}",
                    geometry.buffer.width,
                    geometry.buffer.height,
                    geometry.display.width,
                    geometry.display.height,
                    geometry.fit,
                    geometry.scale()
                );
                self.cached = Some((*geometry, transform));
                self.rebuilds += 1;
                transform
            }
        }
    }

    /// Map one detection. Boxes reaching outside [0, 1] are clamped first.
    pub fn map_to_display(
        &mut self,
        detection: &Detection,
        geometry: &GeometryContext,
    ) -> DisplayRect {
        let transform = self.transform_for(geometry);
        DisplayRect {
            label: detection.label.clone(),
            confidence: detection.confidence,
            rect: map_rect(detection, geometry, &transform),
        }
    }

    pub fn map_all(
        &mut self,
        detections: &[Detection],
        geometry: &GeometryContext,
    ) -> Vec<DisplayRect> {
        detections
            .iter()
            .map(|d| self.map_to_display(d, geometry))
            .collect()
    }
}

fn map_rect(
    detection: &Detection,
    geometry: &GeometryContext,
    transform: &AffineTransform,
) -> Rect {
    let pixels = detection.bbox.clamped().to_pixels(geometry.buffer);
    transform.apply_rect(&pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ContentFit, NormalizedRect, Size};

    const EPS: f64 = 1e-6;

    fn detection(bbox: NormalizedRect) -> Detection {
        Detection {
            label: "banana".to_string(),
            confidence: 0.95,
            bbox,
        }
    }

    fn phone(fit: ContentFit) -> GeometryContext {
        GeometryContext::new(Size::new(1920.0, 1080.0), Size::new(375.0, 812.0), fit)
    }

    #[test]
    fn full_frame_box_covers_display_with_aspect_fill() {
        let mut mapper = CoordinateMapper::new();
        let geometry = phone(ContentFit::AspectFill);
        let display = Rect::from_size(geometry.display);

        let mapped = mapper.map_to_display(&detection(NormalizedRect::FULL), &geometry);
        assert!(mapped.rect.area() >= display.area());
        assert!(mapped.rect.contains_rect(&display, EPS));
        assert_eq!(mapped.label, "banana");
        assert_eq!(mapped.confidence, 0.95);
    }

    #[test]
    fn full_frame_box_fits_inside_display_with_aspect_fit() {
        let mut mapper = CoordinateMapper::new();
        let geometry = phone(ContentFit::AspectFit);
        let display = Rect::from_size(geometry.display);

        let mapped = mapper.map_to_display(&detection(NormalizedRect::FULL), &geometry);
        assert!(display.contains_rect(&mapped.rect, EPS));
        // Letterboxed along display height, touching both side edges.
        assert!((mapped.rect.width - 375.0).abs() < EPS);
        assert!((mapped.rect.center().y - 406.0).abs() < EPS);
    }

    #[test]
    fn rotation_transposes_box_axes() {
        let mut mapper = CoordinateMapper::new();
        let geometry = GeometryContext::new(
            Size::new(200.0, 100.0),
            Size::new(100.0, 200.0),
            ContentFit::AspectFill,
        );
        // Left strip of the buffer becomes the top strip of the display.
        let mapped = mapper.map_to_display(
            &detection(NormalizedRect::new(0.0, 0.0, 0.25, 1.0)),
            &geometry,
        );
        assert!(mapped.rect.approx_eq(&Rect::new(0.0, 0.0, 100.0, 50.0), EPS));

        let mapped = mapper.map_to_display(
            &detection(NormalizedRect::new(0.5, 0.5, 0.5, 0.5)),
            &geometry,
        );
        assert!(mapped.rect.approx_eq(&Rect::new(50.0, 100.0, 50.0, 100.0), EPS));
    }

    #[test]
    fn mapping_is_deterministic() {
        let geometry = phone(ContentFit::AspectFill);
        let input = detection(NormalizedRect::new(0.31, 0.12, 0.2, 0.44));

        let a = CoordinateMapper::new().map_to_display(&input, &geometry);
        let mut warm = CoordinateMapper::new();
        warm.map_to_display(&detection(NormalizedRect::FULL), &geometry);
        let b = warm.map_to_display(&input, &geometry);
        assert_eq!(a, b);
    }

    #[test]
    fn degenerate_geometry_maps_without_nan() {
        let mut mapper = CoordinateMapper::new();
        let geometry = GeometryContext::new(
            Size::new(0.0, 0.0),
            Size::new(375.0, 812.0),
            ContentFit::AspectFill,
        );
        let mapped = mapper.map_to_display(&detection(NormalizedRect::FULL), &geometry);
        for v in [mapped.rect.x, mapped.rect.y, mapped.rect.width, mapped.rect.height] {
            assert!(v.is_finite());
        }
        // Zero-size buffer collapses to the display center.
        assert!(mapped.rect.approx_eq(&Rect::new(187.5, 406.0, 0.0, 0.0), EPS));
    }

    #[test]
    fn out_of_range_box_is_clamped_before_mapping() {
        let mut mapper = CoordinateMapper::new();
        let geometry = phone(ContentFit::AspectFill);
        let wild = mapper.map_to_display(
            &detection(NormalizedRect::new(-3.0, -1.0, 10.0, 8.0)),
            &geometry,
        );
        let full = mapper.map_to_display(&detection(NormalizedRect::FULL), &geometry);
        assert!(wild.rect.approx_eq(&full.rect, EPS));
    }

    #[test]
    fn transform_is_rebuilt_only_when_geometry_changes() {
        let mut mapper = CoordinateMapper::new();
        let geometry = phone(ContentFit::AspectFill);
        let d = detection(NormalizedRect::FULL);

        mapper.map_to_display(&d, &geometry);
        mapper.map_to_display(&d, &geometry);
        assert_eq!(mapper.rebuilds(), 1);

        let resized = GeometryContext {
            display: Size::new(812.0, 375.0),
            ..geometry
        };
        mapper.map_to_display(&d, &resized);
        assert_eq!(mapper.rebuilds(), 2);

        mapper.invalidate();
        mapper.map_to_display(&d, &resized);
        assert_eq!(mapper.rebuilds(), 3);
    }
}
