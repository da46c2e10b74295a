//! Buffered frames and presentation.
//!
//! The [`FrameDriver`] lets the CPU record frame N+1 while the GPU still executes
//! frame N. Each of the [`BUFFERED_FRAMES`](crate::BUFFERED_FRAMES) slots owns the
//! command list it submitted and the fence value that list signals.
//!
//! # Frame Overlap
//!
//! ```text
//! Frame 0: [CPU record] [submit] ───────────────────────────────────────►
//!                                [GPU execute frame 0] ────────────────►
//!
//! Frame 1:              [CPU record] [submit] ─────────────────────────►
//!                                             [GPU execute frame 1] ──►
//!
//! Frame 2:                           [wait F0] [CPU record] [submit] ──►
//! ```
//!
//! # End of Frame
//!
//! ```text
//! submit(list, fence = F) ─► present(image) ─► advance slot ─► wait(slot fence) ─► drop slot's old list
//! ```
//!
//! The wait is the only point the CPU blocks on the GPU during normal rendering.
//! Dropping a slot's old list releases the last references to resources that were
//! released while that frame was in flight.
//!
//! # Thread Safety
//!
//! `FrameDriver` is **not** meant to be shared. It is owned by the
//! [`Rhi`](crate::Rhi), which records on one thread.

use std::sync::Arc;

use crate::backend::{FrameSubmit, GpuBackend, SurfaceConfig, SurfaceInfo, SurfaceTarget};
use crate::command::CommandList;
use crate::error::RhiError;
use crate::profiling::profile_scope;

#[derive(Debug, Default)]
struct FrameSlot {
    /// Fence value the slot's last submission signals. 0 = never submitted.
    fence_value: u64,
    /// The submitted list, kept alive until the fence is reached.
    retained: CommandList,
}

/// What happened when a frame was finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutcome {
    /// Fence value the frame signals.
    pub fence_value: u64,
    /// A back buffer was handed to the presentation engine.
    pub presented: bool,
    /// The surface no longer matches the window and must be resized.
    pub surface_outdated: bool,
}

/// Buffered-frame bookkeeping and the presentation surface.
pub struct FrameDriver {
    slots: Vec<FrameSlot>,
    current_slot: usize,
    frame_count: u64,
    next_fence: u64,
    surface: Option<SurfaceInfo>,
    current_image: Option<u32>,
    presents: u64,
    backend: Arc<dyn GpuBackend>,
}

impl FrameDriver {
    /// Create a driver with `frames_in_flight` slots.
    ///
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is 0.
    pub fn new(backend: Arc<dyn GpuBackend>, frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "frames_in_flight must be at least 1");

        Self {
            slots: (0..frames_in_flight).map(|_| FrameSlot::default()).collect(),
            current_slot: 0,
            frame_count: 0,
            next_fence: 1,
            surface: None,
            current_image: None,
            presents: 0,
            backend,
        }
    }

    /// Number of buffered frames.
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Slot the current frame records into.
    pub fn frame_index(&self) -> usize {
        self.current_slot
    }

    /// Frames finished so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Presentation calls made so far.
    pub fn present_count(&self) -> u64 {
        self.presents
    }

    /// Fence value the frame being recorded will signal.
    pub fn pending_fence(&self) -> u64 {
        self.next_fence
    }

    /// Last fence value the GPU reached.
    pub fn completed_fence(&self) -> u64 {
        self.backend.completed_fence()
    }

    /// The presentation surface, if one was created.
    pub fn surface(&self) -> Option<SurfaceInfo> {
        self.surface
    }

    /// Back buffer acquired for the current frame.
    pub fn current_image(&self) -> Option<u32> {
        self.current_image
    }

    /// Create the presentation surface.
    pub fn create_surface(
        &mut self,
        target: SurfaceTarget,
        config: &SurfaceConfig,
    ) -> Result<Option<SurfaceInfo>, RhiError> {
        self.surface = self.backend.create_surface(target, config)?;
        if let Some(info) = self.surface {
            log::info!(
                "Surface: {}x{} {:?}, {} back buffers",
                info.width,
                info.height,
                info.format,
                info.image_count
            );
        }
        Ok(self.surface)
    }

    /// Start a frame: acquire the back buffer it renders into.
    pub fn begin_frame(&mut self) -> Result<Option<u32>, RhiError> {
        profile_scope!("begin_frame");

        self.current_image = None;
        if self.surface.is_some() {
            self.current_image = Some(self.backend.acquire_image(self.current_slot)?);
        }
        log::trace!(
            "Begin frame {} (slot {}, image {:?})",
            self.frame_count,
            self.current_slot,
            self.current_image
        );
        Ok(self.current_image)
    }

    /// Finish a frame: submit, signal its fence, present, advance to the next slot
    /// and wait until that slot's previous frame completed.
    pub fn end_frame(&mut self, list: CommandList) -> Result<FrameOutcome, RhiError> {
        profile_scope!("end_frame");

        let fence_value = self.next_fence;
        self.next_fence += 1;

        let present_image = self.current_image.take();
        self.backend.submit(
            &list,
            &FrameSubmit {
                frame_index: self.current_slot,
                fence_value,
                present_image,
            },
        )?;

        let slot = &mut self.slots[self.current_slot];
        slot.fence_value = fence_value;
        slot.retained = list;

        let mut outcome = FrameOutcome {
            fence_value,
            presented: false,
            surface_outdated: false,
        };
        if let Some(image) = present_image {
            self.presents += 1;
            outcome.presented = true;
            match self.backend.present(image) {
                Ok(()) => {}
                Err(RhiError::SurfaceOutdated) => outcome.surface_outdated = true,
                Err(e) => return Err(e),
            }
        }

        log::trace!(
            "End frame {} (slot {}, fence {fence_value})",
            self.frame_count,
            self.current_slot
        );
        self.frame_count += 1;
        self.current_slot = (self.current_slot + 1) % self.slots.len();

        self.wait_slot(self.current_slot)?;
        Ok(outcome)
    }

    fn wait_slot(&mut self, index: usize) -> Result<(), RhiError> {
        let slot = &mut self.slots[index];
        if slot.fence_value > 0 {
            self.backend.wait_for_fence(slot.fence_value)?;
        }
        slot.retained.clear();
        Ok(())
    }

    /// Wait for every in-flight frame.
    pub fn wait_idle(&mut self) -> Result<(), RhiError> {
        log::trace!("Waiting for GPU idle ({} slots)", self.slots.len());
        for index in 0..self.slots.len() {
            self.wait_slot(index)?;
        }
        Ok(())
    }

    /// Recreate the surface at a new size. Waits for every in-flight frame first.
    pub fn resize_surface(&mut self, width: u32, height: u32) -> Result<SurfaceInfo, RhiError> {
        profile_scope!("resize_surface");

        self.wait_idle()?;
        self.backend.wait_idle()?;
        let info = self.backend.resize_surface(width, height)?;
        self.surface = Some(info);
        self.current_image = None;
        log::info!("Surface resized to {}x{}", info.width, info.height);
        Ok(info)
    }
}

impl std::fmt::Debug for FrameDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDriver")
            .field("frames_in_flight", &self.slots.len())
            .field("current_slot", &self.current_slot)
            .field("frame_count", &self.frame_count)
            .field("surface", &self.surface)
            .finish_non_exhaustive()
    }
}
