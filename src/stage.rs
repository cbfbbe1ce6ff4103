//! The live stage: an ordered registry of drawing surfaces attached by the
//! host (editor previews and the like). Surfaces may legitimately carry zero
//! extents mid-resize, which is exactly why capture must never run while any
//! remain attached. `CaptureGuard` detaches them all for the duration of a
//! capture run and restores them on drop, success or error alike.

use std::fmt;

use tiny_skia::Pixmap;

use crate::guards;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One live surface. `pixmap` is `None` while the surface has a zero extent.
#[derive(Debug)]
pub struct LiveSurface {
    pub id: SurfaceId,
    pub width: u32,
    pub height: u32,
    pub pixmap: Option<Pixmap>,
}

#[derive(Debug, Default)]
pub struct Stage {
    surfaces: Vec<LiveSurface>,
    next_id: u64,
}

impl Stage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a surface and returns its id. A zero extent is accepted and
    /// simply carries no pixmap until resized.
    pub fn attach(&mut self, width: u32, height: u32) -> SurfaceId {
        self.next_id += 1;
        let id = SurfaceId(self.next_id);
        self.surfaces.push(LiveSurface {
            id,
            width,
            height,
            pixmap: allocate(width, height),
        });
        id
    }

    pub fn detach(&mut self, id: SurfaceId) -> Option<LiveSurface> {
        let index = self.surfaces.iter().position(|s| s.id == id)?;
        Some(self.surfaces.remove(index))
    }

    /// Resizes a surface in place, reallocating (or dropping) its pixmap.
    pub fn resize(&mut self, id: SurfaceId, width: u32, height: u32) -> bool {
        let Some(surface) = self.surfaces.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        surface.width = width;
        surface.height = height;
        surface.pixmap = allocate(width, height);
        true
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&LiveSurface> {
        self.surfaces.iter().find(|s| s.id == id)
    }

    pub fn attached(&self) -> &[LiveSurface] {
        &self.surfaces
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }
}

fn allocate(width: u32, height: u32) -> Option<Pixmap> {
    if !guards::surface_ready(width, height) {
        return None;
    }
    Pixmap::new(width, height)
}

/// Scoped exclusive hold over the stage for a capture run. Acquisition
/// detaches every live surface into the guard; drop restores them at their
/// original positions unconditionally.
pub struct CaptureGuard<'a> {
    stage: &'a mut Stage,
    detached: Vec<(usize, LiveSurface)>,
}

impl<'a> CaptureGuard<'a> {
    pub fn acquire(stage: &'a mut Stage) -> Self {
        let detached = stage.surfaces.drain(..).enumerate().collect();
        Self { stage, detached }
    }

    /// The stage as the capture pipeline sees it: no surfaces attached.
    pub fn stage(&self) -> &Stage {
        self.stage
    }

    pub fn detached_count(&self) -> usize {
        self.detached.len()
    }
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        for (index, surface) in self.detached.drain(..) {
            let at = index.min(self.stage.surfaces.len());
            self.stage.surfaces.insert(at, surface);
        }
    }
}
