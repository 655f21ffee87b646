//! Overlay state owned by the render thread.
//!
//! An `OverlaySet` is an immutable snapshot of one inference result in display
//! space. `OverlayRenderer::replace` swaps the whole set in one step; there is no
//! API for adding or removing individual shapes.

use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Result;

use crate::geometry::Rect;
use crate::mapper::DisplayRect;

/// One rendered box with its caption.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayShape {
    pub rect: Rect,
    pub label: String,
    pub confidence: f32,
}

impl OverlayShape {
    /// Caption drawn next to the box.
    pub fn caption(&self) -> String {
        format!("{}\nConfidence: {:.2}", self.label, self.confidence)
    }
}

impl From<DisplayRect> for OverlayShape {
    fn from(r: DisplayRect) -> Self {
        Self {
            rect: r.rect,
            label: r.label,
            confidence: r.confidence,
        }
    }
}

/// Shapes from exactly one completed inference result.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlaySet {
    /// Sequence number of the frame the shapes were computed for.
    pub sequence: u64,
    /// Geometry version the shapes were mapped against.
    pub geometry_version: u64,
    shapes: Arc<[OverlayShape]>,
}

impl OverlaySet {
    pub fn new(sequence: u64, geometry_version: u64, rects: Vec<DisplayRect>) -> Self {
        Self {
            sequence,
            geometry_version,
            shapes: rects.into_iter().map(OverlayShape::from).collect(),
        }
    }

    pub fn empty() -> Self {
        Self {
            sequence: 0,
            geometry_version: 0,
            shapes: Arc::from(Vec::new()),
        }
    }

    pub fn shapes(&self) -> &[OverlayShape] {
        &self.shapes
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

impl Default for OverlaySet {
    fn default() -> Self {
        Self::empty()
    }
}

/// What a surface receives on each replacement.
#[derive(Debug)]
pub struct SurfaceUpdate<'a> {
    pub set: &'a OverlaySet,
    /// Always false: replacements are instantaneous.
    pub animated: bool,
}

/// Something that can draw an overlay set.
pub trait RenderSurface {
    fn apply(&mut self, update: SurfaceUpdate<'_>) -> Result<()>;
}

/// Read handle for sampling the visible set from any thread.
#[derive(Clone, Debug)]
pub struct OverlayObserver {
    current: Arc<RwLock<Arc<OverlaySet>>>,
}

impl OverlayObserver {
    pub fn current(&self) -> Arc<OverlaySet> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Owns the visible overlay set and pushes it to a surface.
pub struct OverlayRenderer<S: RenderSurface> {
    surface: S,
    current: Arc<RwLock<Arc<OverlaySet>>>,
    replacements: u64,
}

impl<S: RenderSurface> OverlayRenderer<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            current: Arc::new(RwLock::new(Arc::new(OverlaySet::empty()))),
            replacements: 0,
        }
    }

    pub fn observer(&self) -> OverlayObserver {
        OverlayObserver {
            current: self.current.clone(),
        }
    }

    pub fn current(&self) -> Arc<OverlaySet> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replacements(&self) -> u64 {
        self.replacements
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Swap in `set` wholesale.
    ///
    /// The surface draws the new set without animation, then the visible pointer
    /// flips. If the surface fails, the previous set stays visible.
    pub fn replace(&mut self, set: OverlaySet) -> Result<()> {
        self.surface.apply(SurfaceUpdate {
            set: &set,
            animated: false,
        })?;
        let set = Arc::new(set);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = set;
        self.replacements += 1;
        Ok(())
    }
}
