//! GPU memory management.
//!
//! [`ResourceManager`] is the single factory and destructor for buffers and
//! images. It pairs every native handle with its allocation (and, for
//! images, a view) and only hands them out as [`AllocatedBuffer`] /
//! [`AllocatedImage`], which are destroyed by passing them back.

use crate::device::DeviceContext;
use crate::error::{GpuError, Result};
use crate::layout::aspect_mask_for_format;
use ash::vk;
use bitflags::bitflags;
use hashbrown::HashSet;
use std::num::NonZeroU64;
use std::ptr::NonNull;
use std::sync::Arc;

/// Where an allocation should live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MemoryUsage {
    /// Device-local, not host visible.
    #[default]
    DeviceLocal,
    /// Host visible, written by the CPU and read by the GPU.
    Upload,
    /// Host visible and cached, written by the GPU and read by the CPU.
    Readback,
}

bitflags! {
    /// Allocation creation flags.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct AllocationFlags: u32 {
        /// Keep the memory persistently mapped.
        const MAPPED = 1 << 0;
        /// Give the resource its own memory block.
        const DEDICATED = 1 << 1;
    }
}

/// Opaque identifier of one allocation inside a [`MemoryAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocationHandle(NonZeroU64);

impl AllocationHandle {
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

/// Metadata of a live allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationInfo {
    /// Bytes reserved for the resource.
    pub size: u64,
    /// Offset inside the backing memory block.
    pub offset: u64,
    /// Persistent host pointer, if the memory is mapped.
    pub mapped_ptr: Option<NonNull<u8>>,
}

/// Allocation parameters shared by buffers and images.
#[derive(Debug, Clone, Copy)]
pub struct AllocationRequest<'a> {
    pub usage: MemoryUsage,
    pub flags: AllocationFlags,
    pub name: &'a str,
}

/// Aggregate allocator statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStatistics {
    pub allocation_count: usize,
    pub allocated_bytes: u64,
}

/// Usage and budget of one memory heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapBudget {
    pub heap_index: u32,
    pub device_local: bool,
    pub size: u64,
    pub usage: u64,
    pub budget: u64,
}

/// Backend performing raw allocations.
///
/// Implementations create the native resource, allocate and bind its
/// memory, and release both again on `destroy_*`.
pub trait MemoryAllocator {
    fn create_buffer(
        &mut self,
        info: &vk::BufferCreateInfo<'_>,
        request: &AllocationRequest<'_>,
    ) -> Result<(vk::Buffer, AllocationHandle, AllocationInfo)>;

    fn destroy_buffer(&mut self, buffer: vk::Buffer, allocation: AllocationHandle) -> Result<()>;

    fn create_image(
        &mut self,
        info: &vk::ImageCreateInfo<'_>,
        request: &AllocationRequest<'_>,
    ) -> Result<(vk::Image, AllocationHandle, AllocationInfo)>;

    fn destroy_image(&mut self, image: vk::Image, allocation: AllocationHandle) -> Result<()>;

    /// Host pointer to the start of the allocation.
    fn map(&mut self, allocation: AllocationHandle) -> Result<NonNull<u8>>;

    fn unmap(&mut self, allocation: AllocationHandle);

    /// Make host writes in `offset..offset + size` visible to the device.
    /// `None` covers the rest of the allocation.
    fn flush(&mut self, allocation: AllocationHandle, offset: u64, size: Option<u64>)
        -> Result<()>;

    /// Make device writes in `offset..offset + size` visible to the host.
    fn invalidate(
        &mut self,
        allocation: AllocationHandle,
        offset: u64,
        size: Option<u64>,
    ) -> Result<()>;

    fn statistics(&self) -> MemoryStatistics;

    fn heap_budgets(&self) -> Vec<HeapBudget>;

    /// Release the backend. Allocations still alive are reported as leaks.
    fn shutdown(&mut self);
}

/// A buffer paired with its allocation.
///
/// The default value is the invalid sentinel.
#[derive(Debug, Default)]
pub struct AllocatedBuffer {
    buffer: vk::Buffer,
    allocation: Option<AllocationHandle>,
    info: AllocationInfo,
    size: u64,
    usage: vk::BufferUsageFlags,
    memory_usage: MemoryUsage,
    flags: AllocationFlags,
}

impl AllocatedBuffer {
    /// Both the buffer and its allocation exist.
    pub fn is_valid(&self) -> bool {
        self.buffer != vk::Buffer::null() && self.allocation.is_some()
    }

    /// Native handle for recording commands.
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Requested size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        self.memory_usage
    }

    pub fn flags(&self) -> AllocationFlags {
        self.flags
    }

    pub fn allocation_info(&self) -> &AllocationInfo {
        &self.info
    }

    /// Persistent host pointer, set for buffers created with [`AllocationFlags::MAPPED`].
    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.info.mapped_ptr
    }
}

/// An image paired with its allocation and a view covering all of it.
///
/// The default value is the invalid sentinel.
#[derive(Debug, Default)]
pub struct AllocatedImage {
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<AllocationHandle>,
    info: AllocationInfo,
    format: vk::Format,
    extent: vk::Extent3D,
    mip_levels: u32,
    array_layers: u32,
    usage: vk::ImageUsageFlags,
}

impl AllocatedImage {
    /// Image, view and allocation all exist.
    pub fn is_valid(&self) -> bool {
        self.image != vk::Image::null()
            && self.view != vk::ImageView::null()
            && self.allocation.is_some()
    }

    /// Native handle for recording commands.
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    pub fn allocation_info(&self) -> &AllocationInfo {
        &self.info
    }
}

/// View type matching an image's dimensionality and layer count.
pub fn view_type_for(info: &vk::ImageCreateInfo<'_>) -> vk::ImageViewType {
    match info.image_type {
        vk::ImageType::TYPE_1D if info.array_layers > 1 => vk::ImageViewType::TYPE_1D_ARRAY,
        vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
        vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
        _ if info.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE)
            && info.array_layers == 6 =>
        {
            vk::ImageViewType::CUBE
        }
        _ if info.array_layers > 1 => vk::ImageViewType::TYPE_2D_ARRAY,
        _ => vk::ImageViewType::TYPE_2D,
    }
}

/// Factory and destructor for GPU buffers and images.
pub struct ResourceManager<D: DeviceContext, A: MemoryAllocator> {
    device: Arc<D>,
    allocator: Option<A>,
    live: HashSet<AllocationHandle>,
}

impl<D: DeviceContext, A: MemoryAllocator> ResourceManager<D, A> {
    /// Create a facade over `allocator`.
    pub fn new(device: Arc<D>, allocator: A) -> Self {
        Self {
            device,
            allocator: Some(allocator),
            live: HashSet::new(),
        }
    }

    /// A facade with no backend; every operation fails with `NotInitialized`.
    pub fn uninitialized(device: Arc<D>) -> Self {
        Self {
            device,
            allocator: None,
            live: HashSet::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.allocator.is_some()
    }

    /// The device resources are created on.
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Number of buffers and images created and not yet destroyed.
    pub fn allocation_count(&self) -> usize {
        self.live.len()
    }

    /// Direct access to the backend.
    pub fn allocator(&self) -> Option<&A> {
        self.allocator.as_ref()
    }

    fn backend(&mut self) -> Result<&mut A> {
        self.allocator.as_mut().ok_or_else(|| {
            tracing::error!("Resource manager used while not initialized");
            GpuError::NotInitialized("resource manager")
        })
    }

    /// Create a buffer of `size` bytes.
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        memory_usage: MemoryUsage,
        flags: AllocationFlags,
    ) -> Result<AllocatedBuffer> {
        if size == 0 {
            tracing::error!("Refusing to create a zero-sized buffer");
            return Err(GpuError::InvalidArgument("buffer size must be > 0".to_string()));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let request = AllocationRequest {
            usage: memory_usage,
            flags,
            name: "buffer",
        };

        let backend = self.backend()?;
        let (buffer, allocation, mut info) =
            backend.create_buffer(&buffer_info, &request).map_err(|e| {
                tracing::error!("Failed to create buffer of {size} bytes: {e}");
                e
            })?;

        if flags.contains(AllocationFlags::MAPPED) && info.mapped_ptr.is_none() {
            match backend.map(allocation) {
                Ok(ptr) => info.mapped_ptr = Some(ptr),
                Err(e) => {
                    tracing::error!("Failed to map buffer created with MAPPED: {e}");
                    if let Err(e) = backend.destroy_buffer(buffer, allocation) {
                        tracing::error!("Failed to release unmappable buffer: {e}");
                    }
                    return Err(e);
                }
            }
        }

        self.live.insert(allocation);
        tracing::debug!(
            "Created buffer: {size} bytes, usage {usage:?}, {memory_usage:?} ({} live)",
            self.live.len()
        );

        Ok(AllocatedBuffer {
            buffer,
            allocation: Some(allocation),
            info,
            size,
            usage,
            memory_usage,
            flags,
        })
    }

    fn host_visible_policy(host_visible: bool) -> (MemoryUsage, AllocationFlags) {
        if host_visible {
            (MemoryUsage::Upload, AllocationFlags::MAPPED)
        } else {
            (MemoryUsage::DeviceLocal, AllocationFlags::empty())
        }
    }

    /// Vertex buffer, device-local unless `host_visible`.
    pub fn create_vertex_buffer(&mut self, size: u64, host_visible: bool) -> Result<AllocatedBuffer> {
        let (memory_usage, flags) = Self::host_visible_policy(host_visible);
        self.create_buffer(
            size,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            memory_usage,
            flags,
        )
    }

    /// Index buffer, device-local unless `host_visible`.
    pub fn create_index_buffer(&mut self, size: u64, host_visible: bool) -> Result<AllocatedBuffer> {
        let (memory_usage, flags) = Self::host_visible_policy(host_visible);
        self.create_buffer(
            size,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            memory_usage,
            flags,
        )
    }

    /// Persistently mapped uniform buffer.
    pub fn create_uniform_buffer(&mut self, size: u64) -> Result<AllocatedBuffer> {
        self.create_buffer(
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryUsage::Upload,
            AllocationFlags::MAPPED,
        )
    }

    /// Persistently mapped, host-cached transfer source.
    pub fn create_staging_buffer(&mut self, size: u64) -> Result<AllocatedBuffer> {
        self.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryUsage::Readback,
            AllocationFlags::MAPPED,
        )
    }

    /// Create an image and a view over all of its levels and layers.
    ///
    /// If the view cannot be created the image is released again.
    pub fn create_image(
        &mut self,
        image_info: &vk::ImageCreateInfo<'_>,
        memory_usage: MemoryUsage,
        flags: AllocationFlags,
    ) -> Result<AllocatedImage> {
        let request = AllocationRequest {
            usage: memory_usage,
            flags,
            name: "image",
        };

        let backend = self.backend()?;
        let (image, allocation, info) =
            backend.create_image(image_info, &request).map_err(|e| {
                tracing::error!(
                    "Failed to create {:?} image {}x{}: {e}",
                    image_info.format,
                    image_info.extent.width,
                    image_info.extent.height
                );
                e
            })?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type_for(image_info))
            .format(image_info.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_mask_for_format(image_info.format))
                    .base_mip_level(0)
                    .level_count(image_info.mip_levels)
                    .base_array_layer(0)
                    .layer_count(image_info.array_layers),
            );

        let view = match unsafe { self.device.create_image_view(&view_info) } {
            Ok(view) => view,
            Err(e) => {
                tracing::error!("Failed to create image view, releasing image: {e}");
                if let Some(backend) = self.allocator.as_mut() {
                    if let Err(e) = backend.destroy_image(image, allocation) {
                        tracing::error!("Failed to release image after view failure: {e}");
                    }
                }
                return Err(e);
            }
        };

        self.live.insert(allocation);
        tracing::debug!(
            "Created image: {}x{}x{} {:?}, {} mips ({} live)",
            image_info.extent.width,
            image_info.extent.height,
            image_info.extent.depth,
            image_info.format,
            image_info.mip_levels,
            self.live.len()
        );

        Ok(AllocatedImage {
            image,
            view,
            allocation: Some(allocation),
            info,
            format: image_info.format,
            extent: image_info.extent,
            mip_levels: image_info.mip_levels,
            array_layers: image_info.array_layers,
            usage: image_info.usage,
        })
    }

    /// Device-local, optimally tiled single-layer 2D image.
    pub fn create_image_2d(
        &mut self,
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mip_levels: u32,
    ) -> Result<AllocatedImage> {
        if width == 0 || height == 0 || mip_levels == 0 {
            tracing::error!("Invalid 2D image request {width}x{height} with {mip_levels} mips");
            return Err(GpuError::InvalidArgument(format!(
                "image {width}x{height} with {mip_levels} mip levels"
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        self.create_image(&image_info, MemoryUsage::DeviceLocal, AllocationFlags::empty())
    }

    /// Sampled 2D texture filled by transfers. With more than one level it
    /// is also a transfer source so the mip chain can be blitted.
    pub fn create_texture_2d(
        &mut self,
        width: u32,
        height: u32,
        format: vk::Format,
        mip_levels: u32,
    ) -> Result<AllocatedImage> {
        let mut usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED;
        if mip_levels > 1 {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        self.create_image_2d(width, height, format, usage, mip_levels)
    }

    /// Destroy a buffer. Invalid buffers and buffers this facade does not
    /// track are ignored.
    pub fn destroy_buffer(&mut self, buffer: AllocatedBuffer) {
        let Some(allocation) = buffer.allocation else {
            return;
        };
        if !self.live.contains(&allocation) {
            tracing::warn!("Ignoring destroy of untracked buffer {:?}", buffer.buffer);
            return;
        }
        let Some(backend) = self.allocator.as_mut() else {
            return;
        };

        if let Err(e) = backend.destroy_buffer(buffer.buffer, allocation) {
            tracing::error!("Failed to destroy buffer: {e}");
        }
        self.live.remove(&allocation);
        tracing::debug!("Destroyed buffer ({} live)", self.live.len());
    }

    /// Destroy an image and its view. Invalid images and images this facade
    /// does not track are ignored.
    pub fn destroy_image(&mut self, image: AllocatedImage) {
        let Some(allocation) = image.allocation else {
            return;
        };
        if !self.live.contains(&allocation) {
            tracing::warn!("Ignoring destroy of untracked image {:?}", image.image);
            return;
        }
        let Some(backend) = self.allocator.as_mut() else {
            return;
        };

        if image.view != vk::ImageView::null() {
            unsafe { self.device.destroy_image_view(image.view) };
        }
        if let Err(e) = backend.destroy_image(image.image, allocation) {
            tracing::error!("Failed to destroy image: {e}");
        }
        self.live.remove(&allocation);
        tracing::debug!("Destroyed image ({} live)", self.live.len());
    }

    fn tracked_allocation(&self, buffer: &AllocatedBuffer) -> Result<AllocationHandle> {
        buffer
            .allocation
            .filter(|allocation| self.live.contains(allocation))
            .ok_or_else(|| GpuError::InvalidResource("buffer is not live".to_string()))
    }

    /// Host pointer to the buffer's memory. Persistently mapped buffers
    /// return their existing pointer.
    pub fn map_buffer(&mut self, buffer: &AllocatedBuffer) -> Result<NonNull<u8>> {
        let allocation = self.tracked_allocation(buffer)?;
        if let Some(ptr) = buffer.info.mapped_ptr {
            return Ok(ptr);
        }
        self.backend()?.map(allocation).map_err(|e| {
            tracing::error!("Failed to map buffer: {e}");
            e
        })
    }

    /// Undo [`map_buffer`](Self::map_buffer). No-op for persistently mapped buffers.
    pub fn unmap_buffer(&mut self, buffer: &AllocatedBuffer) {
        if buffer.flags.contains(AllocationFlags::MAPPED) {
            return;
        }
        if let Ok(allocation) = self.tracked_allocation(buffer) {
            if let Some(backend) = self.allocator.as_mut() {
                backend.unmap(allocation);
            }
        }
    }

    /// Flush host writes; `size` of `None` means the rest of the buffer.
    pub fn flush_buffer(
        &mut self,
        buffer: &AllocatedBuffer,
        offset: u64,
        size: Option<u64>,
    ) -> Result<()> {
        let allocation = self.tracked_allocation(buffer)?;
        self.backend()?.flush(allocation, offset, size).map_err(|e| {
            tracing::error!("Failed to flush buffer: {e}");
            e
        })
    }

    /// Invalidate host caches; `size` of `None` means the rest of the buffer.
    pub fn invalidate_buffer(
        &mut self,
        buffer: &AllocatedBuffer,
        offset: u64,
        size: Option<u64>,
    ) -> Result<()> {
        let allocation = self.tracked_allocation(buffer)?;
        self.backend()?.invalidate(allocation, offset, size).map_err(|e| {
            tracing::error!("Failed to invalidate buffer: {e}");
            e
        })
    }

    /// Copy `data` into a host-visible buffer at `offset` and flush it.
    pub fn write_buffer<T: bytemuck::Pod>(
        &mut self,
        buffer: &AllocatedBuffer,
        offset: u64,
        data: &[T],
    ) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let len = bytes.len() as u64;
        check_range(buffer.size, offset, len)?;

        let ptr = self.map_buffer(buffer)?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                ptr.as_ptr().add(offset as usize),
                bytes.len(),
            );
        }
        let flushed = self.flush_buffer(buffer, offset, Some(len));
        self.unmap_buffer(buffer);
        flushed
    }

    /// Read `len` bytes at `offset` from a host-visible buffer.
    pub fn read_buffer(
        &mut self,
        buffer: &AllocatedBuffer,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>> {
        check_range(buffer.size, offset, len)?;

        let ptr = self.map_buffer(buffer)?;
        if let Err(e) = self.invalidate_buffer(buffer, offset, Some(len)) {
            self.unmap_buffer(buffer);
            return Err(e);
        }

        let mut out = vec![0u8; len as usize];
        unsafe {
            std::ptr::copy_nonoverlapping(
                ptr.as_ptr().add(offset as usize),
                out.as_mut_ptr(),
                out.len(),
            );
        }
        self.unmap_buffer(buffer);
        Ok(out)
    }

    /// Aggregate statistics; zeroed when not initialized.
    pub fn statistics(&self) -> MemoryStatistics {
        self.allocator
            .as_ref()
            .map(MemoryAllocator::statistics)
            .unwrap_or_default()
    }

    /// Per-heap usage and budget; empty when not initialized.
    pub fn heap_budgets(&self) -> Vec<HeapBudget> {
        self.allocator
            .as_ref()
            .map(MemoryAllocator::heap_budgets)
            .unwrap_or_default()
    }

    /// Release the backend. Resources still alive are logged as leaks.
    pub fn shutdown(&mut self) {
        let Some(mut allocator) = self.allocator.take() else {
            return;
        };

        if !self.live.is_empty() {
            tracing::warn!(
                "Resource manager shutting down with {} leaked allocations",
                self.live.len()
            );
        }
        if let Err(e) = self.device.wait_idle() {
            tracing::warn!("Device wait idle failed during resource teardown: {e}");
        }
        allocator.shutdown();
        self.live.clear();
        tracing::info!("Resource manager shut down");
    }
}

impl<D: DeviceContext, A: MemoryAllocator> Drop for ResourceManager<D, A> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn check_range(capacity: u64, offset: u64, len: u64) -> Result<()> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| GpuError::InvalidArgument("offset overflow".to_string()))?;
    if end > capacity {
        return Err(GpuError::InvalidArgument(format!(
            "range {offset}..{end} exceeds buffer of {capacity} bytes"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_invalid() {
        assert!(!AllocatedBuffer::default().is_valid());
        assert!(!AllocatedImage::default().is_valid());
    }

    #[test]
    fn allocation_handle_rejects_zero() {
        assert!(AllocationHandle::from_raw(0).is_none());
        assert_eq!(AllocationHandle::from_raw(7).map(AllocationHandle::raw), Some(7));
    }

    #[test]
    fn view_type_tracks_layers() {
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .array_layers(1);
        assert_eq!(view_type_for(&info), vk::ImageViewType::TYPE_2D);

        let info = info.array_layers(4);
        assert_eq!(view_type_for(&info), vk::ImageViewType::TYPE_2D_ARRAY);

        let info = info
            .array_layers(6)
            .flags(vk::ImageCreateFlags::CUBE_COMPATIBLE);
        assert_eq!(view_type_for(&info), vk::ImageViewType::CUBE);

        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_3D)
            .array_layers(1);
        assert_eq!(view_type_for(&info), vk::ImageViewType::TYPE_3D);
    }

    #[test]
    fn range_checks() {
        assert!(check_range(16, 0, 16).is_ok());
        assert!(check_range(16, 8, 9).is_err());
        assert!(check_range(16, u64::MAX, 2).is_err());
    }
}
