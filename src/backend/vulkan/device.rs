//! Physical device selection and logical device creation.

use std::ffi::CStr;

use ash::vk;

use crate::backend::BackendError;

/// A physical device able to render into the surface, with its graphics queue family.
pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub queue_family: u32,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub anisotropy: bool,
}

/// Picks the best device with a queue family that does graphics and presents
/// to `surface`. Discrete GPUs win over integrated ones.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<SelectedDevice, BackendError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        BackendError::InitializationFailed(format!(
            "Failed to enumerate physical devices: {:?}",
            e
        ))
    })?;

    if devices.is_empty() {
        return Err(BackendError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best: Option<(u32, SelectedDevice)> = None;
    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };

        if properties.api_version < vk::make_api_version(0, 1, 3, 0) {
            log::info!("Skipping GPU {:?}: Vulkan 1.3 not supported", device_name);
            continue;
        }
        let Some(queue_family) = find_queue_family(instance, device, surface_loader, surface)
        else {
            log::info!("Skipping GPU {:?}: cannot present to the surface", device_name);
            continue;
        };

        let mut score = match properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            _ => 1,
        };
        score += properties.limits.max_image_dimension2_d / 1024;
        log::info!(
            "Found GPU: {:?} (type: {:?}, score: {})",
            device_name,
            properties.device_type,
            score
        );

        if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
            let features = unsafe { instance.get_physical_device_features(device) };
            best = Some((
                score,
                SelectedDevice {
                    physical_device: device,
                    queue_family,
                    properties,
                    memory_properties: unsafe {
                        instance.get_physical_device_memory_properties(device)
                    },
                    anisotropy: features.sampler_anisotropy == vk::TRUE,
                },
            ));
        }
    }

    best.map(|(_, selected)| selected)
        .ok_or_else(|| BackendError::InitializationFailed("No suitable GPU found".to_string()))
}

fn find_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Option<u32> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    queue_families
        .iter()
        .enumerate()
        .find(|(index, family)| {
            let presents = unsafe {
                surface_loader
                    .get_physical_device_surface_support(physical_device, *index as u32, surface)
                    .unwrap_or(false)
            };
            family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && presents
        })
        .map(|(index, _)| index as u32)
}

/// Creates the logical device with one queue, the swapchain extension and the
/// 1.3 dynamic rendering feature.
pub fn create_logical_device(
    instance: &ash::Instance,
    selected: &SelectedDevice,
) -> Result<ash::Device, BackendError> {
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(selected.queue_family)
        .queue_priorities(&queue_priorities)];

    let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];
    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(selected.anisotropy);
    let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features)
        .push_next(&mut vulkan_13_features);

    unsafe { instance.create_device(selected.physical_device, &create_info, None) }.map_err(|e| {
        BackendError::DeviceCreationFailed(format!("Failed to create logical device: {:?}", e))
    })
}

/// Index of the first memory type with all of `flags`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    flags: vk::MemoryPropertyFlags,
    allowed_types: u32,
) -> Option<u32> {
    memory_properties.memory_types[..memory_properties.memory_type_count as usize]
        .iter()
        .enumerate()
        .position(|(index, memory_type)| {
            allowed_types & (1 << index) != 0 && memory_type.property_flags.contains(flags)
        })
        .map(|index| index as u32)
}
