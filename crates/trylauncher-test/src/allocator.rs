//! In-memory allocator double.
//!
//! [`MockAllocator`] backs every allocation with a host `Vec<u8>`, so mapped
//! writes can be read back. Clones share state: hand one clone to the
//! resource manager and keep another to inspect what happened.

use ash::vk::{self, Handle};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::Arc;
use trylauncher_gpu::{
    AllocationFlags, AllocationHandle, AllocationInfo, AllocationRequest, GpuError, HeapBudget,
    MemoryAllocator, MemoryStatistics, MemoryUsage, Result,
};

/// Heap reported by [`MockAllocator::heap_budgets`].
const DEVICE_HEAP_SIZE: u64 = 8 << 30;
const HOST_HEAP_SIZE: u64 = 16 << 30;

/// What kind of resource an allocation backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Buffer(vk::Buffer),
    Image(vk::Image),
}

/// One live allocation.
#[derive(Debug, Clone)]
pub struct AllocationRecord {
    pub kind: ResourceKind,
    pub size: u64,
    pub usage: MemoryUsage,
    pub flags: AllocationFlags,
    pub name: String,
}

/// A flush or invalidate request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeOp {
    pub allocation: AllocationHandle,
    pub offset: u64,
    pub size: Option<u64>,
}

struct Allocation {
    record: AllocationRecord,
    storage: Box<[u8]>,
    map_count: u32,
}

#[derive(Default)]
struct State {
    next_id: u64,
    allocations: HashMap<AllocationHandle, Allocation>,
    flushes: Vec<RangeOp>,
    invalidations: Vec<RangeOp>,
    fail_next_allocation: Option<vk::Result>,
    fail_next_map: bool,
    destroyed: usize,
    shutdown: bool,
    leaked_at_shutdown: usize,
}

impl State {
    fn allocate(
        &mut self,
        kind: ResourceKind,
        size: u64,
        request: &AllocationRequest<'_>,
    ) -> Result<(AllocationHandle, AllocationInfo)> {
        if self.shutdown {
            return Err(GpuError::NotInitialized("mock allocator"));
        }
        if let Some(result) = self.fail_next_allocation.take() {
            return Err(GpuError::AllocationFailed(format!("{result:?}")));
        }

        self.next_id += 1;
        let handle = AllocationHandle::from_raw(self.next_id)
            .ok_or_else(|| GpuError::Other("allocation id overflow".to_string()))?;
        let len = usize::try_from(size)
            .map_err(|_| GpuError::AllocationFailed(format!("{size} bytes")))?;
        let mut storage = vec![0u8; len.max(1)].into_boxed_slice();

        let host_visible = request.usage != MemoryUsage::DeviceLocal;
        let mapped_ptr = if host_visible && request.flags.contains(AllocationFlags::MAPPED) {
            NonNull::new(storage.as_mut_ptr())
        } else {
            None
        };

        self.allocations.insert(
            handle,
            Allocation {
                record: AllocationRecord {
                    kind,
                    size,
                    usage: request.usage,
                    flags: request.flags,
                    name: request.name.to_string(),
                },
                storage,
                map_count: 0,
            },
        );

        Ok((
            handle,
            AllocationInfo {
                size,
                offset: 0,
                mapped_ptr,
            },
        ))
    }

    fn release(&mut self, kind: ResourceKind, allocation: AllocationHandle) -> Result<()> {
        match self.allocations.get(&allocation) {
            Some(a) if a.record.kind == kind => {
                self.allocations.remove(&allocation);
                self.destroyed += 1;
                Ok(())
            }
            Some(_) => Err(GpuError::InvalidResource(format!(
                "allocation {} does not back {kind:?}",
                allocation.raw()
            ))),
            None => Err(GpuError::InvalidResource(format!(
                "unknown allocation {}",
                allocation.raw()
            ))),
        }
    }

    fn range(&self, allocation: AllocationHandle, offset: u64, size: Option<u64>) -> Result<()> {
        let a = self.allocations.get(&allocation).ok_or_else(|| {
            GpuError::InvalidResource(format!("unknown allocation {}", allocation.raw()))
        })?;
        if a.record.usage == MemoryUsage::DeviceLocal {
            return Err(GpuError::InvalidResource("memory is not host visible".to_string()));
        }
        let end = offset.saturating_add(size.unwrap_or(0));
        if offset > a.record.size || end > a.record.size {
            return Err(GpuError::InvalidArgument(format!(
                "range {offset}..{end} outside allocation of {} bytes",
                a.record.size
            )));
        }
        Ok(())
    }
}

/// Host-memory stand-in for the GPU allocator.
#[derive(Clone, Default)]
pub struct MockAllocator {
    state: Arc<Mutex<State>>,
}

impl MockAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next buffer or image allocation fail.
    pub fn fail_next_allocation(&self) {
        self.state.lock().fail_next_allocation = Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
    }

    /// Make the next explicit map fail.
    pub fn fail_next_map(&self) {
        self.state.lock().fail_next_map = true;
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().allocations.len()
    }

    /// Allocations released through `destroy_*`.
    pub fn destroyed_count(&self) -> usize {
        self.state.lock().destroyed
    }

    pub fn record(&self, allocation: AllocationHandle) -> Option<AllocationRecord> {
        self.state
            .lock()
            .allocations
            .get(&allocation)
            .map(|a| a.record.clone())
    }

    /// Records of all live allocations, in no particular order.
    pub fn records(&self) -> Vec<AllocationRecord> {
        self.state
            .lock()
            .allocations
            .values()
            .map(|a| a.record.clone())
            .collect()
    }

    /// Contents of the allocation backing `buffer`.
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state
            .allocations
            .values()
            .find(|a| a.record.kind == ResourceKind::Buffer(buffer))
            .map(|a| {
                let len = usize::try_from(a.record.size).unwrap_or(a.storage.len());
                a.storage[..len.min(a.storage.len())].to_vec()
            })
    }

    pub fn flushes(&self) -> Vec<RangeOp> {
        self.state.lock().flushes.clone()
    }

    pub fn invalidations(&self) -> Vec<RangeOp> {
        self.state.lock().invalidations.clone()
    }

    /// Outstanding explicit maps across all allocations.
    pub fn open_maps(&self) -> u32 {
        self.state
            .lock()
            .allocations
            .values()
            .map(|a| a.map_count)
            .sum()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Allocations still alive when [`MemoryAllocator::shutdown`] ran.
    pub fn leaked_at_shutdown(&self) -> usize {
        self.state.lock().leaked_at_shutdown
    }
}

impl MemoryAllocator for MockAllocator {
    fn create_buffer(
        &mut self,
        info: &vk::BufferCreateInfo<'_>,
        request: &AllocationRequest<'_>,
    ) -> Result<(vk::Buffer, AllocationHandle, AllocationInfo)> {
        let mut state = self.state.lock();
        let buffer = vk::Buffer::from_raw(0xB000_0000 + state.next_id + 1);
        let (allocation, alloc_info) =
            state.allocate(ResourceKind::Buffer(buffer), info.size, request)?;
        Ok((buffer, allocation, alloc_info))
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer, allocation: AllocationHandle) -> Result<()> {
        self.state
            .lock()
            .release(ResourceKind::Buffer(buffer), allocation)
    }

    fn create_image(
        &mut self,
        info: &vk::ImageCreateInfo<'_>,
        request: &AllocationRequest<'_>,
    ) -> Result<(vk::Image, AllocationHandle, AllocationInfo)> {
        let texel_size = 4u64;
        let size = u64::from(info.extent.width)
            * u64::from(info.extent.height)
            * u64::from(info.extent.depth.max(1))
            * u64::from(info.array_layers.max(1))
            * texel_size;
        let mut state = self.state.lock();
        let image = vk::Image::from_raw(0x1_0000_0000 + state.next_id + 1);
        let (allocation, alloc_info) = state.allocate(ResourceKind::Image(image), size, request)?;
        Ok((image, allocation, alloc_info))
    }

    fn destroy_image(&mut self, image: vk::Image, allocation: AllocationHandle) -> Result<()> {
        self.state
            .lock()
            .release(ResourceKind::Image(image), allocation)
    }

    fn map(&mut self, allocation: AllocationHandle) -> Result<NonNull<u8>> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_map) {
            return Err(GpuError::Vulkan(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        let a = state.allocations.get_mut(&allocation).ok_or_else(|| {
            GpuError::InvalidResource(format!("unknown allocation {}", allocation.raw()))
        })?;
        if a.record.usage == MemoryUsage::DeviceLocal {
            return Err(GpuError::InvalidResource(
                "device-local memory cannot be mapped".to_string(),
            ));
        }
        a.map_count += 1;
        NonNull::new(a.storage.as_mut_ptr())
            .ok_or_else(|| GpuError::Other("null host storage".to_string()))
    }

    fn unmap(&mut self, allocation: AllocationHandle) {
        if let Some(a) = self.state.lock().allocations.get_mut(&allocation) {
            a.map_count = a.map_count.saturating_sub(1);
        }
    }

    fn flush(&mut self, allocation: AllocationHandle, offset: u64, size: Option<u64>) -> Result<()> {
        let mut state = self.state.lock();
        state.range(allocation, offset, size)?;
        state.flushes.push(RangeOp {
            allocation,
            offset,
            size,
        });
        Ok(())
    }

    fn invalidate(
        &mut self,
        allocation: AllocationHandle,
        offset: u64,
        size: Option<u64>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.range(allocation, offset, size)?;
        state.invalidations.push(RangeOp {
            allocation,
            offset,
            size,
        });
        Ok(())
    }

    fn statistics(&self) -> MemoryStatistics {
        let state = self.state.lock();
        MemoryStatistics {
            allocation_count: state.allocations.len(),
            allocated_bytes: state.allocations.values().map(|a| a.record.size).sum(),
        }
    }

    fn heap_budgets(&self) -> Vec<HeapBudget> {
        let state = self.state.lock();
        let usage_of = |device_local: bool| -> u64 {
            state
                .allocations
                .values()
                .filter(|a| (a.record.usage == MemoryUsage::DeviceLocal) == device_local)
                .map(|a| a.record.size)
                .sum()
        };
        vec![
            HeapBudget {
                heap_index: 0,
                device_local: true,
                size: DEVICE_HEAP_SIZE,
                usage: usage_of(true),
                budget: DEVICE_HEAP_SIZE / 5 * 4,
            },
            HeapBudget {
                heap_index: 1,
                device_local: false,
                size: HOST_HEAP_SIZE,
                usage: usage_of(false),
                budget: HOST_HEAP_SIZE / 5 * 4,
            },
        ]
    }

    fn shutdown(&mut self) {
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        state.leaked_at_shutdown = state.allocations.len();
        if state.leaked_at_shutdown > 0 {
            tracing::warn!(
                "mock allocator shut down with {} live allocations",
                state.leaked_at_shutdown
            );
        }
        state.allocations.clear();
        state.shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(usage: MemoryUsage, flags: AllocationFlags) -> AllocationRequest<'static> {
        AllocationRequest {
            usage,
            flags,
            name: "test",
        }
    }

    #[test]
    fn clones_share_state() {
        let observer = MockAllocator::new();
        let mut backend = observer.clone();
        let info = vk::BufferCreateInfo::default().size(64);
        let (buffer, allocation, _) = backend
            .create_buffer(&info, &request(MemoryUsage::Upload, AllocationFlags::MAPPED))
            .unwrap();
        assert_eq!(observer.live_count(), 1);

        backend.destroy_buffer(buffer, allocation).unwrap();
        assert_eq!(observer.live_count(), 0);
        assert_eq!(observer.destroyed_count(), 1);
    }

    #[test]
    fn device_local_memory_is_not_mappable() {
        let mut backend = MockAllocator::new();
        let info = vk::BufferCreateInfo::default().size(64);
        let (_, allocation, alloc_info) = backend
            .create_buffer(&info, &request(MemoryUsage::DeviceLocal, AllocationFlags::MAPPED))
            .unwrap();
        assert!(alloc_info.mapped_ptr.is_none());
        assert!(backend.map(allocation).is_err());
    }

    #[test]
    fn mismatched_release_is_rejected() {
        let mut backend = MockAllocator::new();
        let info = vk::BufferCreateInfo::default().size(16);
        let (_, allocation, _) = backend
            .create_buffer(&info, &request(MemoryUsage::Upload, AllocationFlags::empty()))
            .unwrap();
        assert!(backend
            .destroy_image(vk::Image::from_raw(1), allocation)
            .is_err());
    }
}
