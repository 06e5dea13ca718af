//! The launcher application.

use std::sync::Arc;

use ash::vk;
use tracing::{error, info};
use trylauncher_app::{AppContext, FrameContext, LauncherApp};
use trylauncher_core::SceneChanged;
use trylauncher_gpu::{mip_levels_for, upload_texture_rgba8, AllocatedImage, DeviceContext};

use crate::scenes::{self, InputModule, Requests, Screen, SettingsModule, HOME, SETTINGS};

const BANNER_SIZE: u32 = 256;
const CHECKER_CELL: u32 = 32;

pub struct Launcher {
    requests: Requests,
    banner: Option<AllocatedImage>,
    elapsed: f32,
}

impl LauncherApp for Launcher {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let requests = Requests::default();

        ctx.modules.register(Box::new(SettingsModule))?;
        ctx.modules
            .register(Box::new(InputModule::new(Arc::clone(&requests))))?;

        ctx.scenes.register(HOME, Box::new(Screen::new(HOME)))?;
        ctx.scenes.register(SETTINGS, Box::new(Screen::new(SETTINGS)))?;
        ctx.engine.events.subscribe(|change: &SceneChanged| {
            info!("Now showing {}", change.to);
        });
        ctx.scenes.navigate_to(HOME, &mut ctx.engine)?;

        let pixels = checkerboard(BANNER_SIZE, CHECKER_CELL);
        let banner = upload_texture_rgba8(
            &mut ctx.resources,
            &mut ctx.transfer,
            &pixels,
            BANNER_SIZE,
            BANNER_SIZE,
            mip_levels_for(BANNER_SIZE, BANNER_SIZE),
        )?;
        info!(
            "Banner texture ready ({} mips); device memory in use: {} bytes",
            banner.mip_levels(),
            ctx.resources.statistics().allocated_bytes
        );

        Ok(Self {
            requests,
            banner: Some(banner),
            elapsed: 0.0,
        })
    }

    fn update(&mut self, ctx: &mut AppContext, dt: f32) {
        self.elapsed += dt;
        if let Err(e) = scenes::apply_requests(&self.requests, &mut ctx.scenes, &mut ctx.engine) {
            error!("Failed to apply input: {e}");
        }
    }

    fn render(&mut self, ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()> {
        let color = clear_color(ctx.scenes.current(), self.elapsed);
        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .level_count(1)
            .layer_count(1);

        let to_transfer = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(frame.swapchain_image)
            .subresource_range(range);
        let to_present = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::empty())
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(frame.swapchain_image)
            .subresource_range(range);

        // SAFETY: the command buffer is recording and the image belongs to the swapchain
        unsafe {
            ctx.gpu.cmd_pipeline_barrier(
                frame.command_buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                &[to_transfer],
            );
            ctx.gpu.cmd_clear_color_image(
                frame.command_buffer,
                frame.swapchain_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &vk::ClearColorValue { float32: color },
                &[range],
            );
            ctx.gpu.cmd_pipeline_barrier(
                frame.command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                &[to_present],
            );
        }

        Ok(())
    }

    fn on_resize(&mut self, _ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        info!("Launcher window now {width}x{height}");
        Ok(())
    }

    fn cleanup(&mut self, ctx: &mut AppContext) {
        if let Some(banner) = self.banner.take() {
            ctx.resources.destroy_image(banner);
        }
    }
}

/// Tightly packed RGBA8 checkerboard, `size` pixels square.
fn checkerboard(size: u32, cell: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let light = ((x / cell) + (y / cell)) % 2 == 0;
            let texel: [u8; 4] = if light {
                [0xE0, 0xE6, 0xF0, 0xFF]
            } else {
                [0x20, 0x28, 0x38, 0xFF]
            };
            pixels.extend_from_slice(&texel);
        }
    }
    pixels
}

fn clear_color(scene: Option<&str>, elapsed: f32) -> [f32; 4] {
    let pulse = 0.5 + 0.5 * (elapsed * 0.8).sin();
    match scene {
        Some(SETTINGS) => [0.12, 0.12, 0.14, 1.0],
        _ => [0.05, 0.08 + 0.04 * pulse, 0.18 + 0.08 * pulse, 1.0],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkerboard_alternates_cells() {
        let pixels = checkerboard(4, 2);
        assert_eq!(pixels.len(), 4 * 4 * 4);
        let texel = |x: usize, y: usize| &pixels[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(texel(0, 0), texel(1, 1));
        assert_ne!(texel(0, 0), texel(2, 0));
        assert_eq!(texel(0, 0), texel(2, 2));
    }

    #[test]
    fn settings_scene_has_a_fixed_color() {
        assert_eq!(clear_color(Some(SETTINGS), 0.0), clear_color(Some(SETTINGS), 3.0));
        assert_ne!(clear_color(Some(HOME), 0.0), clear_color(Some(HOME), 2.0));
    }
}
