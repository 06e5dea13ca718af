//! Image layout rules: the supported transition table, aspect masks and
//! the mip blit chain.

use ash::vk;

/// Barrier configuration for one supported layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl TransitionMasks {
    /// Look up the barrier for `old -> new`.
    ///
    /// Only three pairs are supported; everything else returns `None`.
    pub fn lookup(old: vk::ImageLayout, new: vk::ImageLayout) -> Option<Self> {
        match (old, new) {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Some(Self {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            }),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
                Some(Self {
                    src_access: vk::AccessFlags::TRANSFER_WRITE,
                    dst_access: vk::AccessFlags::SHADER_READ,
                    src_stage: vk::PipelineStageFlags::TRANSFER,
                    dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                })
            }
            (
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ) => Some(Self {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            }),
            _ => None,
        }
    }
}

/// Formats carrying a depth component.
pub fn has_depth_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Formats carrying a stencil component.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Aspect mask for a view over an image of `format`.
pub fn aspect_mask_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match (has_depth_component(format), has_stencil_component(format)) {
        (true, true) => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        (true, false) => vk::ImageAspectFlags::DEPTH,
        (false, true) => vk::ImageAspectFlags::STENCIL,
        (false, false) => vk::ImageAspectFlags::COLOR,
    }
}

/// Aspect mask a barrier into `new_layout` must cover.
pub fn transition_aspect_mask(format: vk::Format, new_layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    if new_layout == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
        let mut mask = vk::ImageAspectFlags::DEPTH;
        if has_stencil_component(format) {
            mask |= vk::ImageAspectFlags::STENCIL;
        }
        mask
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Number of levels in a full mip chain for a `width` x `height` image.
pub fn mip_levels_for(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// One step of the mip chain: blit `src_level` into `dst_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipBlit {
    pub src_level: u32,
    pub dst_level: u32,
    pub src_extent: (i32, i32),
    pub dst_extent: (i32, i32),
}

impl MipBlit {
    /// The blit region for this step.
    pub fn region(&self, aspect: vk::ImageAspectFlags) -> vk::ImageBlit {
        let subresource = |level| vk::ImageSubresourceLayers {
            aspect_mask: aspect,
            mip_level: level,
            base_array_layer: 0,
            layer_count: 1,
        };

        vk::ImageBlit {
            src_subresource: subresource(self.src_level),
            src_offsets: [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: self.src_extent.0,
                    y: self.src_extent.1,
                    z: 1,
                },
            ],
            dst_subresource: subresource(self.dst_level),
            dst_offsets: [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: self.dst_extent.0,
                    y: self.dst_extent.1,
                    z: 1,
                },
            ],
        }
    }
}

/// Blit plan for levels `1..mip_levels`; each level is half of the
/// previous one, floored and clamped to 1.
pub fn mip_chain(width: u32, height: u32, mip_levels: u32) -> Vec<MipBlit> {
    let mut width = i32::try_from(width).unwrap_or(i32::MAX).max(1);
    let mut height = i32::try_from(height).unwrap_or(i32::MAX).max(1);

    (1..mip_levels)
        .map(|level| {
            let next = ((width / 2).max(1), (height / 2).max(1));
            let blit = MipBlit {
                src_level: level - 1,
                dst_level: level,
                src_extent: (width, height),
                dst_extent: next,
            };
            (width, height) = next;
            blit
        })
        .collect()
}
