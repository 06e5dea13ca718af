//! Synchronous transfer operations: buffer copies, buffer-to-image uploads,
//! layout transitions and mip chain generation.
//!
//! Each call records into a one-time command buffer, submits it to the
//! graphics queue and waits for the queue to go idle. Meant for load time,
//! not for per-frame work.

use crate::command::{CommandPool, CommandPoolDesc};
use crate::device::DeviceContext;
use crate::error::{GpuError, Result};
use crate::layout::{aspect_mask_for_format, mip_chain, transition_aspect_mask, TransitionMasks};
use crate::memory::{AllocatedBuffer, AllocatedImage};
use ash::vk;
use std::sync::Arc;

/// One-shot transfer executor bound to the graphics queue family.
pub struct Transfer<D: DeviceContext> {
    device: Arc<D>,
    pool: CommandPool<D>,
}

impl<D: DeviceContext> Transfer<D> {
    /// Create the executor and its transient command pool.
    pub fn new(device: Arc<D>) -> Result<Self> {
        let queue_family = device.queue_families().graphics_family()?;
        let pool = CommandPool::new(
            Arc::clone(&device),
            CommandPoolDesc {
                queue_family,
                flags: vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                initial_buffers: 0,
            },
        )?;

        Ok(Self { device, pool })
    }

    /// The pool one-shot buffers come from.
    pub fn command_pool(&self) -> &CommandPool<D> {
        &self.pool
    }

    /// Copy `size` bytes from `src` at `src_offset` to `dst` at `dst_offset`.
    pub fn copy_buffer(
        &mut self,
        src: &AllocatedBuffer,
        dst: &AllocatedBuffer,
        size: u64,
        src_offset: u64,
        dst_offset: u64,
    ) -> Result<()> {
        if !src.is_valid() || !dst.is_valid() {
            tracing::error!("copy_buffer called with an invalid buffer");
            return Err(GpuError::InvalidResource("copy_buffer".to_string()));
        }
        if size == 0
            || src_offset.saturating_add(size) > src.size()
            || dst_offset.saturating_add(size) > dst.size()
        {
            tracing::error!(
                "copy_buffer range out of bounds: {size} bytes from {src_offset} (of {}) to {dst_offset} (of {})",
                src.size(),
                dst.size()
            );
            return Err(GpuError::InvalidArgument(
                "copy range outside buffer".to_string(),
            ));
        }

        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        let device = &*self.device;
        let (src, dst) = (src.handle(), dst.handle());

        self.pool.execute_single_time(|cmd| unsafe {
            device.cmd_copy_buffer(cmd, src, dst, &[region]);
        })
    }

    /// Copy tightly packed texels into mip level 0 of `image`.
    ///
    /// The image must already be in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(
        &mut self,
        buffer: &AllocatedBuffer,
        image: &AllocatedImage,
        width: u32,
        height: u32,
        layer_count: u32,
    ) -> Result<()> {
        if !buffer.is_valid() || !image.is_valid() {
            tracing::error!("copy_buffer_to_image called with an invalid resource");
            return Err(GpuError::InvalidResource("copy_buffer_to_image".to_string()));
        }
        if width == 0 || height == 0 || layer_count == 0 {
            tracing::error!("copy_buffer_to_image with empty extent {width}x{height}x{layer_count}");
            return Err(GpuError::InvalidArgument("empty copy extent".to_string()));
        }
        check_extent(image, width, height, "copy_buffer_to_image")?;
        check_subresources(image, 1, layer_count, "copy_buffer_to_image")?;

        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: aspect_mask_for_format(image.format()),
                mip_level: 0,
                base_array_layer: 0,
                layer_count,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
        };
        let device = &*self.device;
        let (src, dst) = (buffer.handle(), image.handle());

        self.pool.execute_single_time(|cmd| unsafe {
            device.cmd_copy_buffer_to_image(
                cmd,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        })
    }

    /// Move `image` from `old_layout` to `new_layout` with a single barrier.
    ///
    /// Only the pairs known to [`TransitionMasks::lookup`] are accepted;
    /// anything else fails before a command buffer is allocated.
    pub fn transition_image_layout(
        &mut self,
        image: &AllocatedImage,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        mip_levels: u32,
        layer_count: u32,
    ) -> Result<()> {
        if !image.is_valid() {
            tracing::error!("transition_image_layout called with an invalid image");
            return Err(GpuError::InvalidResource("transition_image_layout".to_string()));
        }
        check_subresources(image, mip_levels, layer_count, "transition_image_layout")?;
        let Some(masks) = TransitionMasks::lookup(old_layout, new_layout) else {
            tracing::error!("Unsupported layout transition {old_layout:?} -> {new_layout:?}");
            return Err(GpuError::UnsupportedTransition {
                old: old_layout,
                new: new_layout,
            });
        };

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image.handle())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: transition_aspect_mask(image.format(), new_layout),
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count,
            })
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access);
        let device = &*self.device;

        self.pool.execute_single_time(|cmd| unsafe {
            device.cmd_pipeline_barrier(cmd, masks.src_stage, masks.dst_stage, &[barrier]);
        })
    }

    /// Fill levels `1..mip_levels` of `image` by successive linear blits
    /// and leave every level in `SHADER_READ_ONLY_OPTIMAL`.
    ///
    /// All levels must be in `TRANSFER_DST_OPTIMAL` with level 0 holding
    /// the base texels. The format must support linear filtering with
    /// optimal tiling.
    pub fn generate_mipmaps(
        &mut self,
        image: &AllocatedImage,
        width: u32,
        height: u32,
        mip_levels: u32,
    ) -> Result<()> {
        if !image.is_valid() {
            tracing::error!("generate_mipmaps called with an invalid image");
            return Err(GpuError::InvalidResource("generate_mipmaps".to_string()));
        }
        if mip_levels == 0 {
            tracing::error!("generate_mipmaps called with zero mip levels");
            return Err(GpuError::InvalidArgument("mip_levels must be > 0".to_string()));
        }
        check_extent(image, width, height, "generate_mipmaps")?;
        check_subresources(image, mip_levels, 1, "generate_mipmaps")?;

        let format = image.format();
        let feature = vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR;
        if !self
            .device
            .format_properties(format)
            .optimal_tiling_features
            .contains(feature)
        {
            tracing::error!("Texture format {format:?} does not support linear blitting");
            return Err(GpuError::UnsupportedFormat { format, feature });
        }

        let aspect = aspect_mask_for_format(format);
        let image = image.handle();
        let barrier_for = |level: u32| {
            vk::ImageMemoryBarrier::default()
                .image(image)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    base_mip_level: level,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
        };
        let chain = mip_chain(width, height, mip_levels);
        let device = &*self.device;

        self.pool.execute_single_time(|cmd| unsafe {
            for blit in &chain {
                let to_src = barrier_for(blit.src_level)
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::TRANSFER_READ);
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                    &[to_src],
                );

                device.cmd_blit_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit.region(aspect)],
                    vk::Filter::LINEAR,
                );

                let to_read = barrier_for(blit.src_level)
                    .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                    .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .src_access_mask(vk::AccessFlags::TRANSFER_READ)
                    .dst_access_mask(vk::AccessFlags::SHADER_READ);
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    &[to_read],
                );
            }

            // The last level was only ever written.
            let last = barrier_for(mip_levels - 1)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                &[last],
            );
        })
    }
}

/// Reject level or layer ranges the image does not have.
fn check_subresources(
    image: &AllocatedImage,
    mip_levels: u32,
    layer_count: u32,
    op: &str,
) -> Result<()> {
    if mip_levels == 0 || layer_count == 0 {
        tracing::error!("{op} called with an empty subresource range");
        return Err(GpuError::InvalidArgument(format!(
            "{op}: empty subresource range"
        )));
    }
    if mip_levels > image.mip_levels() || layer_count > image.array_layers() {
        tracing::error!(
            "{op} covers {mip_levels} levels x {layer_count} layers, image has {} x {}",
            image.mip_levels(),
            image.array_layers()
        );
        return Err(GpuError::InvalidArgument(format!(
            "{op}: subresource range outside image"
        )));
    }
    Ok(())
}

/// Reject a base extent larger than the image.
fn check_extent(image: &AllocatedImage, width: u32, height: u32, op: &str) -> Result<()> {
    let extent = image.extent();
    if width > extent.width || height > extent.height {
        tracing::error!(
            "{op} extent {width}x{height} exceeds image {}x{}",
            extent.width,
            extent.height
        );
        return Err(GpuError::InvalidArgument(format!(
            "{op}: extent outside image"
        )));
    }
    Ok(())
}
