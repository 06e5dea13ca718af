//! Vulkan instance creation and physical device selection.

use crate::capabilities::GpuCapabilities;
use crate::device::QueueFamilyIndices;
use crate::error::{GpuError, Result};
use crate::surface::SurfaceContext;
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, c_void, CStr, CString};

/// Validation layers to enable in debug builds.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Create a Vulkan instance.
///
/// With a display handle the platform surface extensions are enabled;
/// validation adds the debug utils extension.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
    display: Option<RawDisplayHandle>,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::Other(format!("Invalid application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"TryLauncher")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_2);

    let mut extension_names: Vec<*const c_char> = match display {
        Some(display) => ash_window::enumerate_required_extensions(display)
            .map_err(|e| GpuError::ExtensionNotSupported(e.to_string()))?
            .to_vec(),
        None => Vec::new(),
    };
    if enable_validation {
        extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
    }
    #[cfg(target_os = "macos")]
    extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());

    let layers = if enable_validation {
        validation_layers()
    } else {
        vec![]
    };

    // Check that requested layers are available
    let available_layers = unsafe { entry.enumerate_instance_layer_properties() }?;
    let layers: Vec<&CStr> = layers
        .into_iter()
        .filter(|layer| {
            let found = available_layers
                .iter()
                .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == *layer));
            if !found {
                tracing::warn!("Validation layer {layer:?} not available");
            }
            found
        })
        .collect();
    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = unsafe { entry.create_instance(&create_info, None) }?;
    Ok(instance)
}

/// Forward validation messages into `tracing`.
unsafe extern "system" fn vulkan_debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if data.is_null() || unsafe { (*data).p_message.is_null() } {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!("[vulkan {message_type:?}] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!("[vulkan {message_type:?}] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::debug!("[vulkan {message_type:?}] {message}");
    } else {
        tracing::trace!("[vulkan {message_type:?}] {message}");
    }

    vk::FALSE
}

/// Debug messenger and the loader that owns it.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// Install the validation message forwarder.
    ///
    /// # Safety
    /// The instance must have been created with the debug utils extension.
    pub unsafe fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));

        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }?;
        Ok(Self { loader, messenger })
    }

    /// # Safety
    /// Must be called before the instance is destroyed.
    pub unsafe fn destroy(&self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

/// Assign queue families to roles.
///
/// Graphics is the first graphics-capable family. Present prefers the
/// graphics family, then any family `supports_present` accepts. Transfer
/// prefers a dedicated family without graphics, else shares graphics.
pub fn pick_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> QueueFamilyIndices {
    let indexed = || {
        families
            .iter()
            .enumerate()
            .filter(|(_, family)| family.queue_count > 0)
            .filter_map(|(i, family)| u32::try_from(i).ok().map(|i| (i, family)))
    };

    let graphics = indexed()
        .find(|(_, family)| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|(i, _)| i);

    let present = graphics
        .filter(|&i| supports_present(i))
        .or_else(|| indexed().map(|(i, _)| i).find(|&i| supports_present(i)));

    let transfer = indexed()
        .find(|(_, family)| {
            family.queue_flags.contains(vk::QueueFlags::TRANSFER)
                && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .map(|(i, _)| i)
        .or(graphics);

    QueueFamilyIndices {
        graphics,
        present,
        transfer,
    }
}

/// A physical device that passed the suitability checks.
pub struct DeviceCandidate {
    pub physical_device: vk::PhysicalDevice,
    pub capabilities: GpuCapabilities,
    pub queue_families: QueueFamilyIndices,
}

/// Select the best suitable physical device.
///
/// A device is suitable when every queue role is covered, the requirements
/// in [`GpuCapabilities::meets_requirements`] hold and, when presenting,
/// it supports swapchains and offers at least one surface format and
/// present mode.
///
/// # Safety
/// The instance and surface must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface: Option<&SurfaceContext>,
) -> Result<DeviceCandidate> {
    let devices = unsafe { instance.enumerate_physical_devices() }?;

    if devices.is_empty() {
        return Err(GpuError::NoSuitableDevice);
    }

    let mut best: Option<DeviceCandidate> = None;
    for physical_device in devices {
        let Some(candidate) = (unsafe { rate_physical_device(instance, physical_device, surface) })
        else {
            continue;
        };
        tracing::debug!(
            "Suitable GPU: {} (score {})",
            candidate.capabilities.summary(),
            candidate.capabilities.score()
        );
        if best
            .as_ref()
            .map_or(true, |b| candidate.capabilities.score() > b.capabilities.score())
        {
            best = Some(candidate);
        }
    }

    best.ok_or(GpuError::NoSuitableDevice)
}

unsafe fn rate_physical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface: Option<&SurfaceContext>,
) -> Option<DeviceCandidate> {
    let capabilities = unsafe { GpuCapabilities::query(instance, physical_device) };
    if !capabilities.meets_requirements() {
        tracing::debug!("Skipping {}: requirements not met", capabilities.device_name);
        return None;
    }

    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let queue_families = pick_queue_families(&families, |family| {
        surface.map_or(true, |surface| unsafe {
            surface.supports_present(physical_device, family)
        })
    });
    if !queue_families.is_complete() {
        tracing::debug!("Skipping {}: incomplete queue families", capabilities.device_name);
        return None;
    }

    if let Some(surface) = surface {
        if !capabilities.has_extension(ash::khr::swapchain::NAME) {
            tracing::debug!("Skipping {}: no swapchain support", capabilities.device_name);
            return None;
        }
        let adequate = unsafe { surface.capabilities(physical_device) }
            .map(|caps| caps.is_adequate())
            .unwrap_or(false);
        if !adequate {
            tracing::debug!("Skipping {}: inadequate surface support", capabilities.device_name);
            return None;
        }
    }

    Some(DeviceCandidate {
        physical_device,
        capabilities,
        queue_families,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn single_universal_family_serves_every_role() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        let indices = pick_queue_families(&families, |_| true);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
        assert_eq!(indices.transfer, Some(0));
        assert!(indices.is_complete());
    }

    #[test]
    fn dedicated_transfer_family_is_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = pick_queue_families(&families, |_| true);
        assert_eq!(indices.transfer, Some(2));
    }

    #[test]
    fn present_falls_back_to_another_family() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::COMPUTE)];
        let indices = pick_queue_families(&families, |i| i == 1);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
    }

    #[test]
    fn no_present_support_leaves_indices_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = pick_queue_families(&families, |_| false);
        assert!(indices.present.is_none());
        assert!(!indices.is_complete());
    }
}
