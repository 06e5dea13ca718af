//! [`MemoryAllocator`] backend over `gpu-allocator`.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::memory::{
    AllocationFlags, AllocationHandle, AllocationInfo, AllocationRequest, HeapBudget,
    MemoryAllocator, MemoryStatistics, MemoryUsage,
};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use hashbrown::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;

struct TrackedAllocation {
    allocation: Allocation,
    heap_index: usize,
    name: String,
}

/// GPU memory allocator wrapper.
pub struct GpuAllocator {
    context: Arc<GpuContext>,
    allocator: Option<Allocator>,
    allocations: HashMap<AllocationHandle, TrackedAllocation>,
    next_id: u64,
    heap_usage: Vec<u64>,
}

impl GpuAllocator {
    /// Create a new allocator for `context`'s device.
    pub fn new(context: Arc<GpuContext>) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: context.instance().clone(),
            device: context.device().clone(),
            physical_device: context.physical_device(),
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        let heap_count = context.memory_properties().memory_heap_count as usize;

        Ok(Self {
            context,
            allocator: Some(allocator),
            allocations: HashMap::new(),
            next_id: 1,
            heap_usage: vec![0; heap_count],
        })
    }

    fn allocate(
        &mut self,
        requirements: vk::MemoryRequirements,
        request: &AllocationRequest<'_>,
        linear: bool,
        scheme: AllocationScheme,
    ) -> Result<(AllocationHandle, AllocationInfo)> {
        let allocation = self
            .allocator
            .as_mut()
            .ok_or(GpuError::NotInitialized("gpu allocator"))?
            .allocate(&AllocationCreateDesc {
                name: request.name,
                requirements,
                location: memory_location(request.usage),
                linear,
                allocation_scheme: scheme,
            })
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        let heap_index = heap_index_for(
            self.context.memory_properties(),
            requirements.memory_type_bits,
            allocation.memory_properties(),
        );
        if let Some(usage) = self.heap_usage.get_mut(heap_index) {
            *usage += allocation.size();
        }

        let handle = AllocationHandle::from_raw(self.next_id)
            .ok_or_else(|| GpuError::Other("allocation ids exhausted".to_string()))?;
        self.next_id += 1;

        let info = AllocationInfo {
            size: allocation.size(),
            offset: allocation.offset(),
            mapped_ptr: allocation.mapped_ptr().map(NonNull::cast),
        };
        self.allocations.insert(
            handle,
            TrackedAllocation {
                allocation,
                heap_index,
                name: request.name.to_string(),
            },
        );

        Ok((handle, info))
    }

    fn release(&mut self, handle: AllocationHandle) -> Result<()> {
        let tracked = self
            .allocations
            .remove(&handle)
            .ok_or_else(|| GpuError::InvalidResource(format!("unknown allocation {handle:?}")))?;

        if let Some(usage) = self.heap_usage.get_mut(tracked.heap_index) {
            *usage = usage.saturating_sub(tracked.allocation.size());
        }

        self.allocator
            .as_mut()
            .ok_or(GpuError::NotInitialized("gpu allocator"))?
            .free(tracked.allocation)
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))
    }

    fn tracked(&self, handle: AllocationHandle) -> Result<&TrackedAllocation> {
        self.allocations
            .get(&handle)
            .ok_or_else(|| GpuError::InvalidResource(format!("unknown allocation {handle:?}")))
    }

    fn mapped_range(
        &self,
        handle: AllocationHandle,
        offset: u64,
        size: Option<u64>,
    ) -> Result<Option<vk::MappedMemoryRange<'static>>> {
        let tracked = self.tracked(handle)?;
        let allocation = &tracked.allocation;
        if allocation
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        {
            return Ok(None);
        }

        let (start, len) = aligned_range(
            allocation.offset(),
            allocation.size(),
            offset,
            size,
            self.context.capabilities().non_coherent_atom_size,
        );
        let memory = unsafe { allocation.memory() };
        Ok(Some(
            vk::MappedMemoryRange::default()
                .memory(memory)
                .offset(start)
                .size(len),
        ))
    }
}

impl MemoryAllocator for GpuAllocator {
    fn create_buffer(
        &mut self,
        info: &vk::BufferCreateInfo<'_>,
        request: &AllocationRequest<'_>,
    ) -> Result<(vk::Buffer, AllocationHandle, AllocationInfo)> {
        let device = self.context.device().clone();
        let buffer = unsafe { device.create_buffer(info, None) }?;
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let scheme = if request.flags.contains(AllocationFlags::DEDICATED) {
            AllocationScheme::DedicatedBuffer(buffer)
        } else {
            AllocationScheme::GpuAllocatorManaged
        };

        let (handle, alloc_info) = match self.allocate(requirements, request, true, scheme) {
            Ok(allocated) => allocated,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let memory = unsafe { self.tracked(handle)?.allocation.memory() };
        if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, alloc_info.offset) } {
            let _ = self.release(handle);
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        Ok((buffer, handle, alloc_info))
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer, allocation: AllocationHandle) -> Result<()> {
        let released = self.release(allocation);
        unsafe { self.context.device().destroy_buffer(buffer, None) };
        released
    }

    fn create_image(
        &mut self,
        info: &vk::ImageCreateInfo<'_>,
        request: &AllocationRequest<'_>,
    ) -> Result<(vk::Image, AllocationHandle, AllocationInfo)> {
        let device = self.context.device().clone();
        let image = unsafe { device.create_image(info, None) }?;
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let scheme = if request.flags.contains(AllocationFlags::DEDICATED) {
            AllocationScheme::DedicatedImage(image)
        } else {
            AllocationScheme::GpuAllocatorManaged
        };
        let linear = info.tiling == vk::ImageTiling::LINEAR;

        let (handle, alloc_info) = match self.allocate(requirements, request, linear, scheme) {
            Ok(allocated) => allocated,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let memory = unsafe { self.tracked(handle)?.allocation.memory() };
        if let Err(e) = unsafe { device.bind_image_memory(image, memory, alloc_info.offset) } {
            let _ = self.release(handle);
            unsafe { device.destroy_image(image, None) };
            return Err(e.into());
        }

        Ok((image, handle, alloc_info))
    }

    fn destroy_image(&mut self, image: vk::Image, allocation: AllocationHandle) -> Result<()> {
        let released = self.release(allocation);
        unsafe { self.context.device().destroy_image(image, None) };
        released
    }

    fn map(&mut self, allocation: AllocationHandle) -> Result<NonNull<u8>> {
        self.tracked(allocation)?
            .allocation
            .mapped_ptr()
            .map(NonNull::cast)
            .ok_or_else(|| GpuError::InvalidState("memory is not host visible".to_string()))
    }

    // gpu-allocator keeps host-visible blocks mapped for their whole lifetime.
    fn unmap(&mut self, _allocation: AllocationHandle) {}

    fn flush(
        &mut self,
        allocation: AllocationHandle,
        offset: u64,
        size: Option<u64>,
    ) -> Result<()> {
        if let Some(range) = self.mapped_range(allocation, offset, size)? {
            unsafe { self.context.device().flush_mapped_memory_ranges(&[range]) }?;
        }
        Ok(())
    }

    fn invalidate(
        &mut self,
        allocation: AllocationHandle,
        offset: u64,
        size: Option<u64>,
    ) -> Result<()> {
        if let Some(range) = self.mapped_range(allocation, offset, size)? {
            unsafe { self.context.device().invalidate_mapped_memory_ranges(&[range]) }?;
        }
        Ok(())
    }

    fn statistics(&self) -> MemoryStatistics {
        MemoryStatistics {
            allocation_count: self.allocations.len(),
            allocated_bytes: self
                .allocations
                .values()
                .map(|tracked| tracked.allocation.size())
                .sum(),
        }
    }

    fn heap_budgets(&self) -> Vec<HeapBudget> {
        let properties = self.context.memory_properties();
        let heap_count = properties.memory_heap_count as usize;

        let queried = self.context.memory_budget_enabled().then(|| {
            let mut budget = vk::PhysicalDeviceMemoryBudgetPropertiesEXT::default();
            {
                let mut properties2 =
                    vk::PhysicalDeviceMemoryProperties2::default().push_next(&mut budget);
                unsafe {
                    self.context.instance().get_physical_device_memory_properties2(
                        self.context.physical_device(),
                        &mut properties2,
                    );
                }
            }
            (budget.heap_usage, budget.heap_budget)
        });

        properties.memory_heaps[..heap_count]
            .iter()
            .enumerate()
            .map(|(i, heap)| {
                let (usage, budget) = match &queried {
                    Some((usage, budget)) => (usage[i], budget[i]),
                    None => (
                        self.heap_usage.get(i).copied().unwrap_or(0),
                        fallback_budget(heap.size),
                    ),
                };
                HeapBudget {
                    heap_index: i as u32,
                    device_local: heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL),
                    size: heap.size,
                    usage,
                    budget,
                }
            })
            .collect()
    }

    fn shutdown(&mut self) {
        let Some(mut allocator) = self.allocator.take() else {
            return;
        };

        for (handle, tracked) in self.allocations.drain() {
            tracing::warn!(
                "Leaked allocation {} ({}, {} bytes)",
                handle.raw(),
                tracked.name,
                tracked.allocation.size()
            );
            if let Err(e) = allocator.free(tracked.allocation) {
                tracing::error!("Failed to free leaked allocation: {e}");
            }
        }
        self.heap_usage.iter_mut().for_each(|usage| *usage = 0);

        // Dropping the allocator releases every memory block.
        drop(allocator);
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        // Shutdown if not already done
        self.shutdown();
    }
}

/// Map a usage hint onto a `gpu-allocator` memory location.
pub fn memory_location(usage: MemoryUsage) -> MemoryLocation {
    match usage {
        MemoryUsage::DeviceLocal => MemoryLocation::GpuOnly,
        MemoryUsage::Upload => MemoryLocation::CpuToGpu,
        MemoryUsage::Readback => MemoryLocation::GpuToCpu,
    }
}

/// Budget assumed when `VK_EXT_memory_budget` is unavailable.
pub fn fallback_budget(heap_size: u64) -> u64 {
    heap_size / 10 * 8
}

/// Heap backing the first memory type in `type_bits` whose flags equal `flags`.
fn heap_index_for(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> usize {
    (0..properties.memory_type_count)
        .find(|&i| {
            type_bits & (1 << i) != 0 && properties.memory_types[i as usize].property_flags == flags
        })
        .map_or(0, |i| properties.memory_types[i as usize].heap_index as usize)
}

/// Byte range inside the memory block covering `offset..offset + size` of
/// an allocation, widened to multiples of `atom`.
fn aligned_range(
    alloc_offset: u64,
    alloc_size: u64,
    offset: u64,
    size: Option<u64>,
    atom: u64,
) -> (u64, u64) {
    let atom = atom.max(1);
    let start = alloc_offset + offset.min(alloc_size);
    let end = alloc_offset
        + size.map_or(alloc_size, |size| offset.saturating_add(size).min(alloc_size));

    let aligned_start = start / atom * atom;
    let aligned_end = end.div_ceil(atom) * atom;
    (aligned_start, aligned_end - aligned_start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_hints_map_to_locations() {
        assert_eq!(memory_location(MemoryUsage::DeviceLocal), MemoryLocation::GpuOnly);
        assert_eq!(memory_location(MemoryUsage::Upload), MemoryLocation::CpuToGpu);
        assert_eq!(memory_location(MemoryUsage::Readback), MemoryLocation::GpuToCpu);
    }

    #[test]
    fn fallback_budget_is_eighty_percent() {
        assert_eq!(fallback_budget(1000), 800);
        assert_eq!(fallback_budget(0), 0);
    }

    #[test]
    fn flush_ranges_align_to_atom() {
        // Allocation at 100..356 in its block, atom 64.
        assert_eq!(aligned_range(100, 256, 0, None, 64), (64, 320));
        assert_eq!(aligned_range(100, 256, 10, Some(20), 64), (64, 128));
        assert_eq!(aligned_range(128, 64, 0, Some(1000), 64), (128, 64));
    }

    #[test]
    fn heap_lookup_matches_exact_flags() {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            memory_heap_count: 2,
            ..Default::default()
        };
        props.memory_types[0] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };
        props.memory_types[1] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 1,
        };

        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(heap_index_for(&props, 0b11, host), 1);
        assert_eq!(
            heap_index_for(&props, 0b11, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            0
        );
    }
}
