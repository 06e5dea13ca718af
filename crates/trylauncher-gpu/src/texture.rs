//! Staged texture upload.

use crate::device::DeviceContext;
use crate::error::{GpuError, Result};
use crate::memory::{AllocatedBuffer, AllocatedImage, MemoryAllocator, ResourceManager};
use crate::transfer::Transfer;
use ash::vk;

/// Format used for decoded RGBA8 textures.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Upload tightly packed RGBA8 `pixels` into a new sampled texture.
///
/// With `mip_levels > 1` the chain is generated on the GPU. The returned
/// image is in `SHADER_READ_ONLY_OPTIMAL`. The staging buffer is released
/// on every path, and so is the texture when any step fails.
pub fn upload_texture_rgba8<D, A>(
    resources: &mut ResourceManager<D, A>,
    transfer: &mut Transfer<D>,
    pixels: &[u8],
    width: u32,
    height: u32,
    mip_levels: u32,
) -> Result<AllocatedImage>
where
    D: DeviceContext,
    A: MemoryAllocator,
{
    let expected = u64::from(width) * u64::from(height) * 4;
    if expected == 0 || (pixels.len() as u64) < expected {
        tracing::error!(
            "Texture data of {} bytes does not cover {width}x{height} RGBA8",
            pixels.len()
        );
        return Err(GpuError::InvalidArgument(format!(
            "{} bytes of pixel data for a {width}x{height} texture",
            pixels.len()
        )));
    }

    let staging = resources.create_staging_buffer(expected)?;
    if let Err(e) = resources.write_buffer(&staging, 0, &pixels[..expected as usize]) {
        resources.destroy_buffer(staging);
        return Err(e);
    }

    let texture = match resources.create_texture_2d(width, height, TEXTURE_FORMAT, mip_levels) {
        Ok(texture) => texture,
        Err(e) => {
            resources.destroy_buffer(staging);
            return Err(e);
        }
    };

    let uploaded = record_upload(transfer, &staging, &texture, width, height, mip_levels);
    resources.destroy_buffer(staging);

    match uploaded {
        Ok(()) => {
            tracing::debug!("Uploaded {width}x{height} texture with {mip_levels} mips");
            Ok(texture)
        }
        Err(e) => {
            resources.destroy_image(texture);
            Err(e)
        }
    }
}

fn record_upload<D: DeviceContext>(
    transfer: &mut Transfer<D>,
    staging: &AllocatedBuffer,
    texture: &AllocatedImage,
    width: u32,
    height: u32,
    mip_levels: u32,
) -> Result<()> {
    transfer.transition_image_layout(
        texture,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        mip_levels,
        1,
    )?;
    transfer.copy_buffer_to_image(staging, texture, width, height, 1)?;

    if mip_levels > 1 {
        transfer.generate_mipmaps(texture, width, height, mip_levels)
    } else {
        transfer.transition_image_layout(
            texture,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            mip_levels,
            1,
        )
    }
}
