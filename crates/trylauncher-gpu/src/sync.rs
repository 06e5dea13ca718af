//! Synchronization primitives.

use crate::device::DeviceContext;
use crate::error::Result;
use ash::vk;

/// Frames that may be in flight at once.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Frame synchronization resources.
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    /// Semaphore signaled when image is available
    pub image_available: vk::Semaphore,
    /// Semaphore signaled when rendering is complete
    pub render_finished: vk::Semaphore,
    /// Fence to wait for frame completion
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Create frame synchronization resources. The fence starts signaled.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new<D: DeviceContext>(device: &D) -> Result<Self> {
        let image_available = unsafe { device.create_semaphore() }?;

        let render_finished = match unsafe { device.create_semaphore() } {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { device.destroy_semaphore(image_available) };
                return Err(e);
            }
        };

        let in_flight = match unsafe { device.create_fence(true) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe {
                    device.destroy_semaphore(image_available);
                    device.destroy_semaphore(render_finished);
                }
                return Err(e);
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Destroy synchronization resources.
    ///
    /// # Safety
    /// The device must be valid and resources must not be in use.
    pub unsafe fn destroy<D: DeviceContext>(&self, device: &D) {
        unsafe {
            device.destroy_semaphore(self.image_available);
            device.destroy_semaphore(self.render_finished);
            device.destroy_fence(self.in_flight);
        }
    }
}

/// Fixed ring of per-frame synchronization objects.
///
/// Waiting on a slot's fence before reusing it keeps at most `len()` frames
/// in flight.
#[derive(Debug, Default)]
pub struct FrameSyncRing {
    frames: Vec<FrameSync>,
    current: usize,
}

impl FrameSyncRing {
    /// Create a ring of `len` slots. Partial rings are destroyed on failure.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new<D: DeviceContext>(device: &D, len: usize) -> Result<Self> {
        let mut ring = Self {
            frames: Vec::with_capacity(len),
            current: 0,
        };

        for _ in 0..len {
            match unsafe { FrameSync::new(device) } {
                Ok(sync) => ring.frames.push(sync),
                Err(e) => {
                    tracing::error!("Failed to create frame sync objects: {e}");
                    unsafe { ring.destroy(device) };
                    return Err(e);
                }
            }
        }

        Ok(ring)
    }

    /// Get the current frame's sync resources.
    ///
    /// # Panics
    /// Panics if the ring is empty.
    pub fn current(&self) -> &FrameSync {
        &self.frames[self.current]
    }

    /// Get the current frame index.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Advance to the next slot.
    pub fn advance(&mut self) {
        if !self.frames.is_empty() {
            self.current = (self.current + 1) % self.frames.len();
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Every in-flight fence, in slot order.
    pub fn fences(&self) -> Vec<vk::Fence> {
        self.frames.iter().map(|sync| sync.in_flight).collect()
    }

    /// Destroy all resources and empty the ring.
    ///
    /// # Safety
    /// The device must be valid and all resources must not be in use.
    pub unsafe fn destroy<D: DeviceContext>(&mut self, device: &D) {
        for sync in self.frames.drain(..) {
            unsafe { sync.destroy(device) };
        }
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(len: usize) -> FrameSyncRing {
        FrameSyncRing {
            frames: vec![
                FrameSync {
                    image_available: vk::Semaphore::null(),
                    render_finished: vk::Semaphore::null(),
                    in_flight: vk::Fence::null(),
                };
                len
            ],
            current: 0,
        }
    }

    #[test]
    fn advance_wraps_at_ring_length() {
        let mut ring = ring(MAX_FRAMES_IN_FLIGHT);
        assert_eq!(ring.current_index(), 0);
        ring.advance();
        assert_eq!(ring.current_index(), 1);
        ring.advance();
        assert_eq!(ring.current_index(), 0);
    }

    #[test]
    fn advancing_an_empty_ring_is_a_no_op() {
        let mut ring = FrameSyncRing::default();
        ring.advance();
        assert_eq!(ring.current_index(), 0);
        assert!(ring.is_empty());
    }
}
