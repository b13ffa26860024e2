//! Vulkan backend implementation using ash
//!
//! Every backend handle carries the raw value of the Vulkan handle it stands for,
//! so most calls are a direct translation. The backend keeps a little state of its
//! own:
//! - persistent mappings of host-visible memory blocks
//! - the image behind each view and the layout each image was last transitioned
//!   to, used when writing sampled-image descriptors
//! - the swapchain, behind a lock so it can be recreated through `&self`
//!
//! Rendering uses Vulkan 1.3 dynamic rendering. Attachments are always in the
//! `GENERAL` layout, which is where render targets rest between passes.
//! Ray tracing is not enabled; pipelines and acceleration structures of that
//! kind fail with [`BackendError::Unsupported`].

mod conversion;
mod device;
mod instance;
mod swapchain;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use parking_lot::{Mutex, RwLock};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resolution::Resolution;

use self::conversion::*;
use self::device::{create_logical_device, find_memory_type, select_physical_device};
use self::instance::VulkanInstance;
use self::swapchain::{SurfaceContext, VulkanSwapchain};

/// A host-visible memory block and its persistent mapping.
struct MappedMemory {
    address: usize,
    size: u64,
}

/// Bookkeeping the Vulkan API does not do for us.
#[derive(Default)]
struct Tracking {
    memory_types: HashMap<u64, u32>,
    mapped: HashMap<u64, MappedMemory>,
    view_images: HashMap<u64, u64>,
    image_layouts: HashMap<u64, vk::ImageLayout>,
    secondary_command_buffers: HashSet<u64>,
}

/// Vulkan-based GPU backend using ash.
pub struct VulkanBackend {
    instance: VulkanInstance,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    anisotropy: bool,
    device: ash::Device,
    swapchain_loader: ash::khr::swapchain::Device,
    queue: vk::Queue,
    queue_family: u32,
    vsync: bool,
    swapchain: RwLock<VulkanSwapchain>,
    tracking: Mutex<Tracking>,
    // Field order: the entry and the window must outlive everything above.
    _entry: ash::Entry,
    _window: Arc<winit::window::Window>,
}

impl VulkanBackend {
    /// Creates instance, device and swapchain for `window`.
    pub fn new(
        window: Arc<winit::window::Window>,
        vsync: bool,
        validation: bool,
    ) -> BackendResult<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            BackendError::InitializationFailed(format!("Failed to load Vulkan: {}", e))
        })?;

        let display_handle = window
            .display_handle()
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?
            .as_raw();

        let mut instance = VulkanInstance::new(&entry, display_handle, validation)?;
        let surface = match unsafe {
            ash_window::create_surface(
                &entry,
                &instance.instance,
                display_handle,
                window_handle,
                None,
            )
        } {
            Ok(surface) => surface,
            Err(e) => {
                unsafe { instance.destroy() };
                return Err(BackendError::SurfaceCreationFailed(format!("{:?}", e)));
            }
        };
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance.instance);

        let destroy_surface = |instance: &mut VulkanInstance| unsafe {
            surface_loader.destroy_surface(surface, None);
            instance.destroy();
        };

        let selected = match select_physical_device(&instance.instance, &surface_loader, surface) {
            Ok(selected) => selected,
            Err(e) => {
                destroy_surface(&mut instance);
                return Err(e);
            }
        };
        let device = match create_logical_device(&instance.instance, &selected) {
            Ok(device) => device,
            Err(e) => {
                destroy_surface(&mut instance);
                return Err(e);
            }
        };

        let queue = unsafe { device.get_device_queue(selected.queue_family, 0) };
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance.instance, &device);

        let size = window.inner_size();
        let swapchain = match VulkanSwapchain::new(
            &SurfaceContext {
                device: &device,
                surface_loader: &surface_loader,
                swapchain_loader: &swapchain_loader,
                physical_device: selected.physical_device,
                surface,
                vsync,
            },
            size.width.max(1),
            size.height.max(1),
            vk::SwapchainKHR::null(),
        ) {
            Ok(swapchain) => swapchain,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                destroy_surface(&mut instance);
                return Err(e);
            }
        };

        let device_name =
            unsafe { std::ffi::CStr::from_ptr(selected.properties.device_name.as_ptr()) };
        log::info!(
            "Vulkan backend initialized on {:?} (validation: {})",
            device_name,
            instance.debug.is_some()
        );

        Ok(Self {
            instance,
            surface_loader,
            surface,
            physical_device: selected.physical_device,
            properties: selected.properties,
            memory_properties: selected.memory_properties,
            anisotropy: selected.anisotropy,
            device,
            swapchain_loader,
            queue,
            queue_family: selected.queue_family,
            vsync,
            swapchain: RwLock::new(swapchain),
            tracking: Mutex::new(Tracking::default()),
            _entry: entry,
            _window: window,
        })
    }

    /// The logical device, for interop with code that records its own commands.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    fn surface_context(&self) -> SurfaceContext<'_> {
        SurfaceContext {
            device: &self.device,
            surface_loader: &self.surface_loader,
            swapchain_loader: &self.swapchain_loader,
            physical_device: self.physical_device,
            surface: self.surface,
            vsync: self.vsync,
        }
    }

    /// Layout a sampled image is read in: the one it was last transitioned to,
    /// `GENERAL` if it was never seen.
    fn sampled_layout(&self, view: ImageViewHandle) -> vk::ImageLayout {
        let tracking = self.tracking.lock();
        tracking
            .view_images
            .get(&view.0)
            .and_then(|image| tracking.image_layouts.get(image))
            .copied()
            .unwrap_or(vk::ImageLayout::GENERAL)
    }

    fn mapped_range(
        &self,
        memory: MemoryHandle,
        offset: u64,
        size: u64,
    ) -> BackendResult<*mut u8> {
        let tracking = self.tracking.lock();
        let mapped = tracking.mapped.get(&memory.0).ok_or_else(|| {
            BackendError::InvalidParameter(format!("memory {:?} is not host visible", memory))
        })?;
        if offset.checked_add(size).map_or(true, |end| end > mapped.size) {
            return Err(BackendError::InvalidParameter(format!(
                "range {}..{} outside memory block of {} bytes",
                offset,
                offset.saturating_add(size),
                mapped.size
            )));
        }
        Ok((mapped.address + offset as usize) as *mut u8)
    }
}

fn memory_flags(properties: MemoryProperty) -> vk::MemoryPropertyFlags {
    let mut flags = vk::MemoryPropertyFlags::empty();
    if properties.contains(MemoryProperty::DEVICE_LOCAL) {
        flags |= vk::MemoryPropertyFlags::DEVICE_LOCAL;
    }
    if properties.contains(MemoryProperty::HOST_VISIBLE) {
        flags |= vk::MemoryPropertyFlags::HOST_VISIBLE;
    }
    if properties.contains(MemoryProperty::HOST_COHERENT) {
        flags |= vk::MemoryPropertyFlags::HOST_COHERENT;
    }
    flags
}

fn full_range(format: TextureFormat) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect_mask(format),
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}

fn extent_2d(extent: Resolution) -> vk::Extent2D {
    vk::Extent2D {
        width: extent.width,
        height: extent.height,
    }
}

impl GraphicsBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan Backend"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            ray_tracing: false,
            min_uniform_buffer_alignment: self.properties.limits.min_uniform_buffer_offset_alignment,
            buffer_image_granularity: self.properties.limits.buffer_image_granularity,
        }
    }

    // === Queues ===

    fn queue(&self, _kind: QueueKind) -> QueueInfo {
        QueueInfo {
            handle: QueueHandle(self.queue.as_raw()),
            family_index: self.queue_family,
        }
    }

    fn queue_submit(
        &self,
        queue: QueueHandle,
        submit: &SubmitInfo<'_>,
        fence: Option<FenceHandle>,
    ) -> BackendResult<()> {
        let command_buffers: Vec<vk::CommandBuffer> = submit
            .command_buffers
            .iter()
            .map(|cb| vk::CommandBuffer::from_raw(cb.0))
            .collect();
        let wait_semaphores: Vec<vk::Semaphore> = submit
            .wait_semaphores
            .iter()
            .map(|(semaphore, _)| vk::Semaphore::from_raw(semaphore.0))
            .collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = submit
            .wait_semaphores
            .iter()
            .map(|(_, stage)| convert_pipeline_stages(*stage))
            .collect();
        let signal_semaphores: Vec<vk::Semaphore> = submit
            .signal_semaphores
            .iter()
            .map(|semaphore| vk::Semaphore::from_raw(semaphore.0))
            .collect();

        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);
        let fence = fence.map_or(vk::Fence::null(), |fence| vk::Fence::from_raw(fence.0));

        unsafe {
            self.device
                .queue_submit(vk::Queue::from_raw(queue.0), &[submit_info], fence)
        }
        .map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
            other => BackendError::SubmitFailed(format!("{:?}", other)),
        })
    }

    fn queue_wait_idle(&self, queue: QueueHandle) -> BackendResult<()> {
        unsafe { self.device.queue_wait_idle(vk::Queue::from_raw(queue.0)) }
            .map_err(|e| convert_result(e, "queue wait idle"))
    }

    fn device_wait_idle(&self) -> BackendResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(|e| convert_result(e, "device wait idle"))
    }

    // === Memory ===

    fn memory_type_index(&self, class: MemoryClass, memory_type_bits: u32) -> BackendResult<u32> {
        let flags = memory_flags(class.properties());
        find_memory_type(&self.memory_properties, flags, memory_type_bits).ok_or_else(|| {
            BackendError::MemoryAllocationFailed(format!(
                "no memory type with {:?} in mask {:#b}",
                flags, memory_type_bits
            ))
        })
    }

    fn allocate_memory(
        &self,
        class: MemoryClass,
        type_index: u32,
        size: u64,
    ) -> BackendResult<MemoryHandle> {
        let flags = memory_flags(class.properties());
        let matches_class = type_index < self.memory_properties.memory_type_count
            && self.memory_properties.memory_types[type_index as usize]
                .property_flags
                .contains(flags);
        if !matches_class {
            return Err(BackendError::InvalidParameter(format!(
                "memory type {} does not provide {:?}",
                type_index, flags
            )));
        }

        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(type_index);
        let memory = unsafe { self.device.allocate_memory(&allocate_info, None) }
            .map_err(|e| convert_result(e, "allocate memory"))?;

        let mut tracking = self.tracking.lock();
        if class.is_host_visible() {
            let address = match unsafe {
                self.device
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            } {
                Ok(address) => address as usize,
                Err(e) => {
                    unsafe { self.device.free_memory(memory, None) };
                    return Err(convert_result(e, "map memory"));
                }
            };
            tracking
                .mapped
                .insert(memory.as_raw(), MappedMemory { address, size });
        }
        tracking.memory_types.insert(memory.as_raw(), type_index);
        log::debug!(
            "Allocated {} bytes of {:?} memory (type {})",
            size,
            class,
            type_index
        );
        Ok(MemoryHandle(memory.as_raw()))
    }

    fn free_memory(&self, memory: MemoryHandle) {
        let mut tracking = self.tracking.lock();
        tracking.memory_types.remove(&memory.0);
        let memory = vk::DeviceMemory::from_raw(memory.0);
        unsafe {
            if tracking.mapped.remove(&memory.as_raw()).is_some() {
                self.device.unmap_memory(memory);
            }
            self.device.free_memory(memory, None);
        }
    }

    fn write_memory(&self, memory: MemoryHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let destination = self.mapped_range(memory, offset, data.len() as u64)?;
        // SAFETY: the range was checked against the mapped block
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), destination, data.len()) };
        Ok(())
    }

    fn read_memory(&self, memory: MemoryHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>> {
        let source = self.mapped_range(memory, offset, size)?;
        let mut data = vec![0u8; size as usize];
        // SAFETY: the range was checked against the mapped block
        unsafe { std::ptr::copy_nonoverlapping(source, data.as_mut_ptr(), data.len()) };
        Ok(data)
    }

    // === Buffers and images ===

    fn create_buffer(&self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let create_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(convert_buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&create_info, None) }
            .map_err(|e| BackendError::BufferCreationFailed(format!("{:?}", e)))?;
        Ok(BufferHandle(buffer.as_raw()))
    }

    fn buffer_memory_requirements(&self, buffer: BufferHandle) -> MemoryRequirements {
        let requirements = unsafe {
            self.device
                .get_buffer_memory_requirements(vk::Buffer::from_raw(buffer.0))
        };
        MemoryRequirements {
            size: requirements.size,
            alignment: requirements.alignment,
            memory_type_bits: requirements.memory_type_bits,
            tiling: ResourceTiling::Linear,
        }
    }

    fn bind_buffer_memory(
        &self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> BackendResult<()> {
        let buffer = vk::Buffer::from_raw(buffer.0);
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        self.check_memory_type(memory, requirements.memory_type_bits)?;
        unsafe {
            self.device
                .bind_buffer_memory(buffer, vk::DeviceMemory::from_raw(memory.0), offset)
        }
        .map_err(|e| BackendError::BufferCreationFailed(format!("bind memory: {:?}", e)))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        unsafe {
            self.device
                .destroy_buffer(vk::Buffer::from_raw(buffer.0), None)
        };
    }

    fn create_image(&self, desc: &ImageDescriptor) -> BackendResult<ImageHandle> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(convert_texture_format(desc.format))
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels.max(1))
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_image_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&create_info, None) }
            .map_err(|e| BackendError::ImageCreationFailed(format!("{:?}", e)))?;
        Ok(ImageHandle(image.as_raw()))
    }

    fn image_memory_requirements(&self, image: ImageHandle) -> MemoryRequirements {
        let requirements = unsafe {
            self.device
                .get_image_memory_requirements(vk::Image::from_raw(image.0))
        };
        MemoryRequirements {
            size: requirements.size,
            alignment: requirements.alignment,
            memory_type_bits: requirements.memory_type_bits,
            tiling: ResourceTiling::Optimal,
        }
    }

    fn bind_image_memory(
        &self,
        image: ImageHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> BackendResult<()> {
        let image = vk::Image::from_raw(image.0);
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        self.check_memory_type(memory, requirements.memory_type_bits)?;
        unsafe {
            self.device
                .bind_image_memory(image, vk::DeviceMemory::from_raw(memory.0), offset)
        }
        .map_err(|e| BackendError::ImageCreationFailed(format!("bind memory: {:?}", e)))
    }

    fn destroy_image(&self, image: ImageHandle) {
        self.tracking.lock().image_layouts.remove(&image.0);
        unsafe { self.device.destroy_image(vk::Image::from_raw(image.0), None) };
    }

    fn create_image_view(
        &self,
        image: ImageHandle,
        format: TextureFormat,
        mip_levels: u32,
    ) -> BackendResult<ImageViewHandle> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(vk::Image::from_raw(image.0))
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(convert_texture_format(format))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_mask(format),
                base_mip_level: 0,
                level_count: mip_levels.max(1),
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { self.device.create_image_view(&create_info, None) }
            .map_err(|e| BackendError::ImageCreationFailed(format!("image view: {:?}", e)))?;
        self.tracking
            .lock()
            .view_images
            .insert(view.as_raw(), image.0);
        Ok(ImageViewHandle(view.as_raw()))
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        self.tracking.lock().view_images.remove(&view.0);
        unsafe {
            self.device
                .destroy_image_view(vk::ImageView::from_raw(view.0), None)
        };
    }

    fn create_sampler(&self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let address_mode = convert_address_mode(desc.address_mode);
        let anisotropy = desc.max_anisotropy.filter(|_| self.anisotropy);
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter_mode(desc.mag_filter))
            .min_filter(convert_filter_mode(desc.min_filter))
            .mipmap_mode(convert_mipmap_filter_mode(desc.mipmap_filter))
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(
                anisotropy
                    .unwrap_or(1.0)
                    .min(self.properties.limits.max_sampler_anisotropy),
            )
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);
        let sampler = unsafe { self.device.create_sampler(&create_info, None) }
            .map_err(|e| BackendError::SamplerCreationFailed(format!("{:?}", e)))?;
        Ok(SamplerHandle(sampler.as_raw()))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        unsafe {
            self.device
                .destroy_sampler(vk::Sampler::from_raw(sampler.0), None)
        };
    }

    fn create_shader_module(&self, code: &[u32]) -> BackendResult<ShaderModuleHandle> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = unsafe { self.device.create_shader_module(&create_info, None) }
            .map_err(|e| BackendError::ShaderCreationFailed(format!("{:?}", e)))?;
        Ok(ShaderModuleHandle(module.as_raw()))
    }

    fn destroy_shader_module(&self, module: ShaderModuleHandle) {
        unsafe {
            self.device
                .destroy_shader_module(vk::ShaderModule::from_raw(module.0), None)
        };
    }

    // === Descriptors ===

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(convert_descriptor_type(binding.ty))
                    .descriptor_count(binding.count)
                    .stage_flags(convert_shader_stages(binding.stages))
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        let layout = unsafe { self.device.create_descriptor_set_layout(&create_info, None) }
            .map_err(|e| BackendError::DescriptorCreationFailed(format!("set layout: {:?}", e)))?;
        Ok(DescriptorSetLayoutHandle(layout.as_raw()))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        unsafe {
            self.device.destroy_descriptor_set_layout(
                vk::DescriptorSetLayout::from_raw(layout.0),
                None,
            )
        };
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[DescriptorPoolSize],
    ) -> BackendResult<DescriptorPoolHandle> {
        // Acceleration structure descriptors need an extension this backend never enables.
        let pool_sizes: Vec<vk::DescriptorPoolSize> = sizes
            .iter()
            .filter(|size| size.ty != DescriptorType::AccelerationStructure && size.count > 0)
            .map(|size| vk::DescriptorPoolSize {
                ty: convert_descriptor_type(size.ty),
                descriptor_count: size.count,
            })
            .collect();
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { self.device.create_descriptor_pool(&create_info, None) }
            .map_err(|e| BackendError::DescriptorCreationFailed(format!("pool: {:?}", e)))?;
        Ok(DescriptorPoolHandle(pool.as_raw()))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        unsafe {
            self.device
                .destroy_descriptor_pool(vk::DescriptorPool::from_raw(pool.0), None)
        };
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        let layouts = [vk::DescriptorSetLayout::from_raw(layout.0)];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(vk::DescriptorPool::from_raw(pool.0))
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&allocate_info) }
            .map_err(|e| convert_result(e, "allocate descriptor set"))?;
        sets.into_iter()
            .next()
            .map(|set| DescriptorSetHandle(set.as_raw()))
            .ok_or(BackendError::DescriptorPoolExhausted)
    }

    fn free_descriptor_set(&self, pool: DescriptorPoolHandle, set: DescriptorSetHandle) {
        let result = unsafe {
            self.device.free_descriptor_sets(
                vk::DescriptorPool::from_raw(pool.0),
                &[vk::DescriptorSet::from_raw(set.0)],
            )
        };
        if let Err(e) = result {
            log::error!("Failed to free descriptor set {:?}: {:?}", set, e);
        }
    }

    fn update_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        enum Info {
            Buffer(usize),
            Image(usize),
        }

        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        let mut pending = Vec::with_capacity(writes.len());

        for write in writes {
            let (ty, info) = match write.resource {
                DescriptorResource::Buffer {
                    buffer,
                    offset,
                    range,
                } => {
                    buffer_infos.push(vk::DescriptorBufferInfo {
                        buffer: vk::Buffer::from_raw(buffer.0),
                        offset,
                        range,
                    });
                    (
                        vk::DescriptorType::UNIFORM_BUFFER,
                        Info::Buffer(buffer_infos.len() - 1),
                    )
                }
                DescriptorResource::StorageBuffer {
                    buffer,
                    offset,
                    range,
                } => {
                    buffer_infos.push(vk::DescriptorBufferInfo {
                        buffer: vk::Buffer::from_raw(buffer.0),
                        offset,
                        range,
                    });
                    (
                        vk::DescriptorType::STORAGE_BUFFER,
                        Info::Buffer(buffer_infos.len() - 1),
                    )
                }
                DescriptorResource::CombinedImageSampler { view, sampler } => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::from_raw(sampler.0),
                        image_view: vk::ImageView::from_raw(view.0),
                        image_layout: self.sampled_layout(view),
                    });
                    (
                        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                        Info::Image(image_infos.len() - 1),
                    )
                }
                DescriptorResource::SampledImage(view) => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: vk::ImageView::from_raw(view.0),
                        image_layout: self.sampled_layout(view),
                    });
                    (
                        vk::DescriptorType::SAMPLED_IMAGE,
                        Info::Image(image_infos.len() - 1),
                    )
                }
                DescriptorResource::StorageImage(view) => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: vk::ImageView::from_raw(view.0),
                        image_layout: vk::ImageLayout::GENERAL,
                    });
                    (
                        vk::DescriptorType::STORAGE_IMAGE,
                        Info::Image(image_infos.len() - 1),
                    )
                }
                DescriptorResource::Sampler(sampler) => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::from_raw(sampler.0),
                        image_view: vk::ImageView::null(),
                        image_layout: vk::ImageLayout::UNDEFINED,
                    });
                    (vk::DescriptorType::SAMPLER, Info::Image(image_infos.len() - 1))
                }
                DescriptorResource::AccelerationStructure(_) => {
                    log::warn!(
                        "Skipping acceleration structure write to binding {}: ray tracing is not enabled",
                        write.binding
                    );
                    continue;
                }
            };
            pending.push((write, ty, info));
        }

        let set = vk::DescriptorSet::from_raw(set.0);
        let vk_writes: Vec<vk::WriteDescriptorSet> = pending
            .iter()
            .map(|(write, ty, info)| {
                let vk_write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(write.binding)
                    .dst_array_element(write.array_element)
                    .descriptor_type(*ty);
                match info {
                    Info::Buffer(index) => {
                        vk_write.buffer_info(std::slice::from_ref(&buffer_infos[*index]))
                    }
                    Info::Image(index) => {
                        vk_write.image_info(std::slice::from_ref(&image_infos[*index]))
                    }
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }

    // === Pipelines ===

    fn create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayoutHandle],
        push_constants: &[PushConstantRange],
    ) -> BackendResult<PipelineLayoutHandle> {
        let layouts: Vec<vk::DescriptorSetLayout> = set_layouts
            .iter()
            .map(|layout| vk::DescriptorSetLayout::from_raw(layout.0))
            .collect();
        let ranges: Vec<vk::PushConstantRange> = push_constants
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: convert_shader_stages(range.stages),
                offset: range.offset,
                size: range.size,
            })
            .collect();
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&layouts)
            .push_constant_ranges(&ranges);
        let layout = unsafe { self.device.create_pipeline_layout(&create_info, None) }
            .map_err(|e| BackendError::PipelineCreationFailed(format!("layout: {:?}", e)))?;
        Ok(PipelineLayoutHandle(layout.as_raw()))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        unsafe {
            self.device
                .destroy_pipeline_layout(vk::PipelineLayout::from_raw(layout.0), None)
        };
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor<'_>,
    ) -> BackendResult<PipelineHandle> {
        let mut stages = vec![vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vk::ShaderModule::from_raw(desc.vertex_shader.0))
            .name(c"main")];
        if let Some(geometry) = desc.geometry_shader {
            stages.push(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::GEOMETRY)
                    .module(vk::ShaderModule::from_raw(geometry.0))
                    .name(c"main"),
            );
        }
        if let Some(fragment) = desc.fragment_shader {
            stages.push(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(vk::ShaderModule::from_raw(fragment.0))
                    .name(c"main"),
            );
        }

        let vertex_bindings: Vec<vk::VertexInputBindingDescription> = desc
            .vertex_bindings
            .iter()
            .map(|binding| vk::VertexInputBindingDescription {
                binding: binding.binding,
                stride: binding.stride,
                input_rate: convert_input_rate(binding.rate),
            })
            .collect();
        let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = desc
            .vertex_attributes
            .iter()
            .map(|attribute| vk::VertexInputAttributeDescription {
                location: attribute.location,
                binding: attribute.binding,
                format: convert_vertex_format(attribute.format),
                offset: attribute.offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(convert_topology(desc.topology));
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(convert_cull_mode(desc.cull_mode))
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth.test_enable)
            .depth_write_enable(desc.depth.write_enable)
            .depth_compare_op(convert_compare_operator(desc.depth.compare));

        let blend_attachments =
            vec![convert_blend_state(&desc.blend); desc.color_formats.len()];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats: Vec<vk::Format> = desc
            .color_formats
            .iter()
            .map(|format| convert_texture_format(*format))
            .collect();
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(
                desc.depth_format
                    .map_or(vk::Format::UNDEFINED, convert_texture_format),
            );

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(vk::PipelineLayout::from_raw(desc.layout.0))
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, e)| {
            BackendError::PipelineCreationFailed(format!(
                "{}: {:?}",
                desc.label.unwrap_or("graphics pipeline"),
                e
            ))
        })?;
        pipelines
            .into_iter()
            .next()
            .map(|pipeline| PipelineHandle(pipeline.as_raw()))
            .ok_or_else(|| BackendError::PipelineCreationFailed("no pipeline returned".into()))
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDescriptor<'_>,
    ) -> BackendResult<PipelineHandle> {
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(vk::ShaderModule::from_raw(desc.shader.0))
            .name(c"main");
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(vk::PipelineLayout::from_raw(desc.layout.0));

        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, e)| {
            BackendError::PipelineCreationFailed(format!(
                "{}: {:?}",
                desc.label.unwrap_or("compute pipeline"),
                e
            ))
        })?;
        pipelines
            .into_iter()
            .next()
            .map(|pipeline| PipelineHandle(pipeline.as_raw()))
            .ok_or_else(|| BackendError::PipelineCreationFailed("no pipeline returned".into()))
    }

    fn create_ray_tracing_pipeline(
        &self,
        desc: &RayTracingPipelineDescriptor<'_>,
    ) -> BackendResult<PipelineHandle> {
        Err(BackendError::Unsupported(format!(
            "{}: ray tracing pipelines are not enabled on the Vulkan backend",
            desc.label.unwrap_or("ray tracing pipeline")
        )))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        unsafe {
            self.device
                .destroy_pipeline(vk::Pipeline::from_raw(pipeline.0), None)
        };
    }

    fn create_top_level_acceleration_structure(
        &self,
        _instances: &[AccelerationStructureInstance],
    ) -> BackendResult<AccelerationStructureHandle> {
        Err(BackendError::Unsupported(
            "acceleration structures are not enabled on the Vulkan backend".into(),
        ))
    }

    fn destroy_acceleration_structure(&self, structure: AccelerationStructureHandle) {
        log::warn!(
            "destroy_acceleration_structure({:?}) on a backend that never creates them",
            structure
        );
    }

    // === Synchronization ===

    fn create_fence(&self, signaled: bool) -> BackendResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence = unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }
        .map_err(|e| BackendError::SyncCreationFailed(format!("fence: {:?}", e)))?;
        Ok(FenceHandle(fence.as_raw()))
    }

    fn wait_for_fence(&self, fence: FenceHandle) -> BackendResult<()> {
        unsafe {
            self.device
                .wait_for_fences(&[vk::Fence::from_raw(fence.0)], true, u64::MAX)
        }
        .map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
            other => BackendError::FenceWaitFailed(format!("{:?}", other)),
        })
    }

    fn reset_fence(&self, fence: FenceHandle) -> BackendResult<()> {
        unsafe { self.device.reset_fences(&[vk::Fence::from_raw(fence.0)]) }
            .map_err(|e| convert_result(e, "reset fence"))
    }

    fn is_fence_signaled(&self, fence: FenceHandle) -> bool {
        unsafe { self.device.get_fence_status(vk::Fence::from_raw(fence.0)) }.unwrap_or(false)
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        unsafe { self.device.destroy_fence(vk::Fence::from_raw(fence.0), None) };
    }

    fn create_semaphore(&self) -> BackendResult<SemaphoreHandle> {
        let semaphore = unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
        .map_err(|e| BackendError::SyncCreationFailed(format!("semaphore: {:?}", e)))?;
        Ok(SemaphoreHandle(semaphore.as_raw()))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        unsafe {
            self.device
                .destroy_semaphore(vk::Semaphore::from_raw(semaphore.0), None)
        };
    }

    // === Command pools and buffers ===

    fn create_command_pool(&self, _queue: QueueKind) -> BackendResult<CommandPoolHandle> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { self.device.create_command_pool(&create_info, None) }
            .map_err(|e| BackendError::CommandCreationFailed(format!("pool: {:?}", e)))?;
        Ok(CommandPoolHandle(pool.as_raw()))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        unsafe {
            self.device
                .destroy_command_pool(vk::CommandPool::from_raw(pool.0), None)
        };
    }

    fn allocate_command_buffer(
        &self,
        pool: CommandPoolHandle,
        level: CommandBufferLevel,
    ) -> BackendResult<CommandBufferHandle> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(vk::CommandPool::from_raw(pool.0))
            .level(convert_command_buffer_level(level))
            .command_buffer_count(1);
        let command_buffer = unsafe { self.device.allocate_command_buffers(&allocate_info) }
            .map_err(|e| BackendError::CommandCreationFailed(format!("buffer: {:?}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::CommandCreationFailed("no command buffer returned".into()))?;

        let handle = command_buffer.as_raw();
        if level == CommandBufferLevel::Secondary {
            self.tracking.lock().secondary_command_buffers.insert(handle);
        }
        Ok(CommandBufferHandle(handle))
    }

    fn free_command_buffer(&self, pool: CommandPoolHandle, command_buffer: CommandBufferHandle) {
        self.tracking
            .lock()
            .secondary_command_buffers
            .remove(&command_buffer.0);
        unsafe {
            self.device.free_command_buffers(
                vk::CommandPool::from_raw(pool.0),
                &[vk::CommandBuffer::from_raw(command_buffer.0)],
            )
        };
    }

    fn begin_command_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        one_time_submit: bool,
    ) -> BackendResult<()> {
        let flags = if one_time_submit {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let secondary = self
            .tracking
            .lock()
            .secondary_command_buffers
            .contains(&command_buffer.0);
        let inheritance = vk::CommandBufferInheritanceInfo::default();
        let mut begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        if secondary {
            begin_info = begin_info.inheritance_info(&inheritance);
        }
        unsafe {
            self.device
                .begin_command_buffer(vk::CommandBuffer::from_raw(command_buffer.0), &begin_info)
        }
        .map_err(|e| BackendError::RecordingFailed(format!("begin: {:?}", e)))
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        unsafe {
            self.device
                .end_command_buffer(vk::CommandBuffer::from_raw(command_buffer.0))
        }
        .map_err(|e| BackendError::RecordingFailed(format!("end: {:?}", e)))
    }

    fn reset_command_buffer(&self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        unsafe {
            self.device.reset_command_buffer(
                vk::CommandBuffer::from_raw(command_buffer.0),
                vk::CommandBufferResetFlags::empty(),
            )
        }
        .map_err(|e| BackendError::RecordingFailed(format!("reset: {:?}", e)))
    }

    // === Command recording ===

    fn cmd_begin_rendering(&self, command_buffer: CommandBufferHandle, info: &RenderingInfo) {
        let color_attachments: Vec<vk::RenderingAttachmentInfo> = info
            .color_attachments
            .iter()
            .map(|attachment| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(vk::ImageView::from_raw(attachment.view.0))
                    .image_layout(vk::ImageLayout::GENERAL)
                    .load_op(convert_load_op(attachment.load))
                    .store_op(convert_store_op(attachment.store))
                    .clear_value(vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: attachment.clear_color,
                        },
                    })
            })
            .collect();
        let depth_attachment = info.depth_attachment.map(|attachment| {
            vk::RenderingAttachmentInfo::default()
                .image_view(vk::ImageView::from_raw(attachment.view.0))
                .image_layout(vk::ImageLayout::GENERAL)
                .load_op(convert_load_op(attachment.load))
                .store_op(convert_store_op(attachment.store))
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: attachment.clear_depth,
                        stencil: 0,
                    },
                })
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: extent_2d(info.extent),
            })
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
        }

        unsafe {
            self.device
                .cmd_begin_rendering(vk::CommandBuffer::from_raw(command_buffer.0), &rendering_info)
        };
    }

    fn cmd_end_rendering(&self, command_buffer: CommandBufferHandle) {
        unsafe {
            self.device
                .cmd_end_rendering(vk::CommandBuffer::from_raw(command_buffer.0))
        };
    }

    fn cmd_set_viewport(&self, command_buffer: CommandBufferHandle, extent: Resolution) {
        let command_buffer = vk::CommandBuffer::from_raw(command_buffer.0);
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: extent_2d(extent),
        };
        unsafe {
            self.device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            self.device.cmd_set_scissor(command_buffer, 0, &[scissor]);
        }
    }

    fn cmd_bind_pipeline(
        &self,
        command_buffer: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        pipeline: PipelineHandle,
    ) {
        unsafe {
            self.device.cmd_bind_pipeline(
                vk::CommandBuffer::from_raw(command_buffer.0),
                convert_bind_point(bind_point),
                vk::Pipeline::from_raw(pipeline.0),
            )
        };
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    ) {
        let sets: Vec<vk::DescriptorSet> = sets
            .iter()
            .map(|set| vk::DescriptorSet::from_raw(set.0))
            .collect();
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                vk::CommandBuffer::from_raw(command_buffer.0),
                convert_bind_point(bind_point),
                vk::PipelineLayout::from_raw(layout.0),
                first_set,
                &sets,
                &[],
            )
        };
    }

    fn cmd_push_constants(
        &self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStage,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device.cmd_push_constants(
                vk::CommandBuffer::from_raw(command_buffer.0),
                vk::PipelineLayout::from_raw(layout.0),
                convert_shader_stages(stages),
                offset,
                data,
            )
        };
    }

    fn cmd_bind_vertex_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        binding: u32,
        buffer: BufferHandle,
        offset: u64,
    ) {
        unsafe {
            self.device.cmd_bind_vertex_buffers(
                vk::CommandBuffer::from_raw(command_buffer.0),
                binding,
                &[vk::Buffer::from_raw(buffer.0)],
                &[offset],
            )
        };
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    ) {
        unsafe {
            self.device.cmd_bind_index_buffer(
                vk::CommandBuffer::from_raw(command_buffer.0),
                vk::Buffer::from_raw(buffer.0),
                offset,
                convert_index_format(format),
            )
        };
    }

    fn cmd_draw(&self, command_buffer: CommandBufferHandle, vertex_count: u32, instance_count: u32) {
        unsafe {
            self.device.cmd_draw(
                vk::CommandBuffer::from_raw(command_buffer.0),
                vertex_count,
                instance_count,
                0,
                0,
            )
        };
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                vk::CommandBuffer::from_raw(command_buffer.0),
                index_count,
                instance_count,
                0,
                0,
                0,
            )
        };
    }

    fn cmd_dispatch(&self, command_buffer: CommandBufferHandle, x: u32, y: u32, z: u32) {
        unsafe {
            self.device
                .cmd_dispatch(vk::CommandBuffer::from_raw(command_buffer.0), x, y, z)
        };
    }

    fn cmd_trace_rays(
        &self,
        _command_buffer: CommandBufferHandle,
        width: u32,
        height: u32,
        depth: u32,
    ) {
        log::error!(
            "trace_rays({}x{}x{}) recorded on a backend without ray tracing",
            width,
            height,
            depth
        );
    }

    fn cmd_image_barrier(&self, command_buffer: CommandBufferHandle, barrier: &ImageBarrier) {
        let new_layout = convert_image_layout(barrier.new_layout);
        let image_barrier = vk::ImageMemoryBarrier::default()
            .old_layout(convert_image_layout(barrier.old_layout))
            .new_layout(new_layout)
            .src_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(vk::Image::from_raw(barrier.image.0))
            .subresource_range(full_range(barrier.format));

        unsafe {
            self.device.cmd_pipeline_barrier(
                vk::CommandBuffer::from_raw(command_buffer.0),
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[image_barrier],
            )
        };
        self.tracking
            .lock()
            .image_layouts
            .insert(barrier.image.0, new_layout);
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        source: BufferHandle,
        destination: BufferHandle,
        size: u64,
    ) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.device.cmd_copy_buffer(
                vk::CommandBuffer::from_raw(command_buffer.0),
                vk::Buffer::from_raw(source.0),
                vk::Buffer::from_raw(destination.0),
                &[region],
            )
        };
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: CommandBufferHandle,
        source: BufferHandle,
        destination: ImageHandle,
        extent: Resolution,
    ) {
        let region = vk::BufferImageCopy::default()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                vk::CommandBuffer::from_raw(command_buffer.0),
                vk::Buffer::from_raw(source.0),
                vk::Image::from_raw(destination.0),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        };
    }

    fn cmd_execute_commands(
        &self,
        command_buffer: CommandBufferHandle,
        secondary: &[CommandBufferHandle],
    ) {
        let secondary: Vec<vk::CommandBuffer> = secondary
            .iter()
            .map(|handle| vk::CommandBuffer::from_raw(handle.0))
            .collect();
        unsafe {
            self.device
                .cmd_execute_commands(vk::CommandBuffer::from_raw(command_buffer.0), &secondary)
        };
    }

    // === Swapchain ===

    fn swapchain_info(&self) -> SwapchainInfo {
        let swapchain = self.swapchain.read();
        SwapchainInfo {
            image_count: swapchain.images.len() as u32,
            format: convert_format_back(swapchain.format).unwrap_or(TextureFormat::Bgra8UnormSrgb),
            extent: Resolution::new(swapchain.extent.width, swapchain.extent.height),
        }
    }

    fn swapchain_image(&self, index: u32) -> (ImageHandle, ImageViewHandle) {
        let swapchain = self.swapchain.read();
        let image = swapchain.images.get(index as usize);
        let view = swapchain.image_views.get(index as usize);
        match (image, view) {
            (Some(image), Some(view)) => {
                (ImageHandle(image.as_raw()), ImageViewHandle(view.as_raw()))
            }
            _ => (ImageHandle::NULL, ImageViewHandle::NULL),
        }
    }

    fn acquire_next_image(&self, signal: SemaphoreHandle) -> BackendResult<u32> {
        let swapchain = self.swapchain.read();
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                swapchain.swapchain,
                u64::MAX,
                vk::Semaphore::from_raw(signal.0),
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image_index, suboptimal)) => {
                if suboptimal {
                    log::trace!("Swapchain suboptimal");
                }
                Ok(image_index)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(BackendError::SurfaceOutOfDate),
            Err(e) => Err(BackendError::AcquireImageFailed(format!("{:?}", e))),
        }
    }

    fn present(
        &self,
        queue: QueueHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> BackendResult<()> {
        let swapchain = self.swapchain.read();
        let wait_semaphores = [vk::Semaphore::from_raw(wait.0)];
        let swapchains = [swapchain.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.swapchain_loader
                .queue_present(vk::Queue::from_raw(queue.0), &present_info)
        };
        match result {
            Ok(_) => Ok(()),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(BackendError::SurfaceOutOfDate),
            Err(e) => Err(BackendError::PresentFailed(format!("{:?}", e))),
        }
    }

    fn recreate_swapchain(&self, width: u32, height: u32) -> BackendResult<()> {
        let mut swapchain = self.swapchain.write();
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| convert_result(e, "wait idle before swapchain recreation"))?;

        let mut recreated =
            VulkanSwapchain::new(&self.surface_context(), width, height, swapchain.swapchain)?;
        std::mem::swap(&mut *swapchain, &mut recreated);

        let mut tracking = self.tracking.lock();
        for image in &recreated.images {
            tracking.image_layouts.remove(&image.as_raw());
        }
        unsafe { recreated.destroy(&self.device, &self.swapchain_loader) };
        Ok(())
    }
}

impl VulkanBackend {
    fn check_memory_type(&self, memory: MemoryHandle, allowed_types: u32) -> BackendResult<()> {
        let type_index = self
            .tracking
            .lock()
            .memory_types
            .get(&memory.0)
            .copied()
            .ok_or_else(|| {
                BackendError::InvalidParameter(format!("unknown memory {:?}", memory))
            })?;
        if allowed_types & (1 << type_index) == 0 {
            return Err(BackendError::MemoryAllocationFailed(format!(
                "memory type {} not allowed by the resource (mask {:#b})",
                type_index, allowed_types
            )));
        }
        Ok(())
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            let tracking = self.tracking.get_mut();
            if !tracking.memory_types.is_empty() {
                log::warn!(
                    "Vulkan backend dropped with {} memory block(s) still allocated",
                    tracking.memory_types.len()
                );
            }

            self.swapchain
                .get_mut()
                .destroy(&self.device, &self.swapchain_loader);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy();
        }
        log::info!("Vulkan backend destroyed");
    }
}
