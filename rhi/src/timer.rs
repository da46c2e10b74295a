//! GPU timestamp timers.
//!
//! A [`GpuTimer`] brackets commands of a frame with two timestamp queries and
//! resolves both into a small read-back buffer. The result becomes readable once
//! the frame that recorded it has retired:
//!
//! ```text
//! begin_timer        end_timer                   frame fence reached
//!     │ ts[0] ... ts[1] │ resolve ─► readback ──────────►│ elapsed_ms()
//! ```
//!
//! Timers never block; [`GpuTimer::elapsed_ms`] returns `None` until the data is
//! there. A measurement is bound to a fence only when its frame is submitted, so
//! a frame that never reached the GPU leaves the timer without a result.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::{GpuBuffer, GpuQueryPool};
use crate::command::Command;
use crate::context::Rhi;
use crate::device::Device;
use crate::error::RhiError;
use crate::types::BufferUsage;

const QUERY_COUNT: u32 = 2;
const RESULT_SIZE: u64 = QUERY_COUNT as u64 * std::mem::size_of::<u64>() as u64;

/// Measures GPU time between two points of a frame.
#[derive(Debug)]
pub struct GpuTimer {
    label: String,
    pool: Arc<GpuQueryPool>,
    readback: Arc<GpuBuffer>,
    /// Fence of the frame that resolved the last measurement. 0 = none.
    fence: Arc<AtomicU64>,
    running: bool,
    period_ns: f64,
}

impl GpuTimer {
    /// Create a timer on `device`.
    pub fn new(device: &Device, label: impl Into<String>) -> Result<Self, RhiError> {
        let label = label.into();
        let backend = device.backend();
        let pool = Arc::new(backend.create_query_pool(QUERY_COUNT)?);
        let readback = Arc::new(backend.create_buffer(
            &format!("{label} timestamps"),
            RESULT_SIZE,
            BufferUsage::Readback,
        )?);
        Ok(Self {
            label,
            pool,
            readback,
            fence: Arc::new(AtomicU64::new(0)),
            running: false,
            period_ns: f64::from(device.limits().timestamp_period_ns),
        })
    }

    /// Timer name.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether `begin_timer` was recorded without a matching `end_timer`.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Milliseconds between the two timestamps of the last finished measurement.
    ///
    /// Returns `None` while no measurement was recorded or its frame is still in
    /// flight.
    pub fn elapsed_ms(&self, device: &Device) -> Option<f64> {
        let fence = self.fence.load(Ordering::Acquire);
        if fence == 0 || device.backend().completed_fence() < fence {
            return None;
        }
        let bytes = match device.backend().read_buffer(&self.readback, 0, RESULT_SIZE) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Failed to read timer '{}': {e}", self.label);
                return None;
            }
        };
        let ticks: &[u64] = bytemuck::try_cast_slice(&bytes).ok()?;
        let (start, end) = (ticks.first()?, ticks.get(1)?);
        Some(end.saturating_sub(*start) as f64 * self.period_ns / 1_000_000.0)
    }
}

impl Rhi {
    /// Record the start timestamp of `timer`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidParameter`] outside a frame, inside a render pass
    /// and for a timer that is already running.
    pub fn begin_timer(&mut self, timer: &mut GpuTimer) -> Result<(), RhiError> {
        self.recording_list()?;
        if self.session.pass.is_some() {
            return Err(RhiError::invalid("timers cannot start inside a render pass"));
        }
        if timer.running {
            return Err(RhiError::invalid(format!(
                "timer '{}' is already running",
                timer.label
            )));
        }
        self.session.list.push(Command::ResetQueries {
            pool: timer.pool.clone(),
            first: 0,
            count: QUERY_COUNT,
        });
        self.session.list.push(Command::WriteTimestamp {
            pool: timer.pool.clone(),
            index: 0,
        });
        timer.running = true;
        Ok(())
    }

    /// Record the end timestamp of `timer` and resolve both into its read-back
    /// buffer.
    pub fn end_timer(&mut self, timer: &mut GpuTimer) -> Result<(), RhiError> {
        self.recording_list()?;
        if self.session.pass.is_some() {
            return Err(RhiError::invalid("timers cannot stop inside a render pass"));
        }
        if !timer.running {
            return Err(RhiError::invalid(format!(
                "timer '{}' was not started",
                timer.label
            )));
        }
        self.session.list.push(Command::WriteTimestamp {
            pool: timer.pool.clone(),
            index: 1,
        });
        self.session.list.push(Command::ResolveQueries {
            pool: timer.pool.clone(),
            first: 0,
            count: QUERY_COUNT,
            dst: timer.readback.clone(),
            offset: 0,
        });
        timer.running = false;
        timer.fence.store(0, Ordering::Release);
        self.session.timers.push(timer.fence.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, SurfaceTarget};
    use crate::config::RhiConfig;
    use crate::render_pass::RenderPassDesc;

    fn rhi() -> Rhi {
        Rhi::with_backend(
            Arc::new(DummyBackend::new()),
            &RhiConfig::default(),
            SurfaceTarget::Offscreen,
            64,
            64,
        )
        .unwrap()
    }

    #[test]
    fn test_timer_resolves_after_frame() {
        let mut rhi = rhi();
        let mut timer = GpuTimer::new(rhi.device(), "frame").unwrap();
        assert_eq!(timer.elapsed_ms(rhi.device()), None);

        rhi.begin_render().unwrap();
        rhi.begin_timer(&mut timer).unwrap();
        assert!(timer.is_running());
        rhi.end_timer(&mut timer).unwrap();
        rhi.end_render().unwrap();
        rhi.render().unwrap();

        // The dummy backend advances its clock by 1000 ticks of 1 ns per write.
        let elapsed = timer.elapsed_ms(rhi.device()).unwrap();
        assert!((elapsed - 0.001).abs() < 1e-9, "{elapsed}");
    }

    #[test]
    fn test_timer_of_failed_frame_has_no_result() {
        let backend = Arc::new(DummyBackend::new());
        let mut rhi = Rhi::with_backend(
            backend.clone(),
            &RhiConfig::default(),
            SurfaceTarget::Offscreen,
            64,
            64,
        )
        .unwrap();
        let mut timer = GpuTimer::new(rhi.device(), "lost").unwrap();

        rhi.begin_render().unwrap();
        rhi.begin_timer(&mut timer).unwrap();
        rhi.end_timer(&mut timer).unwrap();
        assert_eq!(timer.elapsed_ms(rhi.device()), None);
        rhi.end_render().unwrap();
        backend.simulate_device_lost();
        assert_eq!(rhi.render(), Err(RhiError::DeviceLost));

        // Later frames signal higher fences; the lost measurement stays empty.
        for _ in 0..2 {
            rhi.begin_render().unwrap();
            rhi.end_render().unwrap();
            rhi.render().unwrap();
        }
        assert!(rhi.frames().completed_fence() >= 2);
        assert_eq!(timer.elapsed_ms(rhi.device()), None);

        rhi.begin_render().unwrap();
        rhi.begin_timer(&mut timer).unwrap();
        rhi.end_timer(&mut timer).unwrap();
        rhi.end_render().unwrap();
        rhi.render().unwrap();
        assert!(timer.elapsed_ms(rhi.device()).is_some());
    }

    #[test]
    fn test_timer_misuse() {
        let mut rhi = rhi();
        let pass = rhi
            .create_render_pass(&RenderPassDesc::swapchain(64, 64))
            .unwrap();
        let mut timer = GpuTimer::new(rhi.device(), "misuse").unwrap();

        assert!(rhi.begin_timer(&mut timer).is_err());
        rhi.begin_render().unwrap();
        assert!(rhi.end_timer(&mut timer).is_err());
        rhi.begin_timer(&mut timer).unwrap();
        assert!(rhi.begin_timer(&mut timer).is_err());

        rhi.begin_render_pass(pass).unwrap();
        assert!(rhi.end_timer(&mut timer).is_err());
        rhi.end_render_pass().unwrap();
        rhi.end_timer(&mut timer).unwrap();
    }
}
