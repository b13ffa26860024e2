//! Images: sampled textures, depth buffers and render targets.
//!
//! All three own one native image, one full view of it and one device-local
//! allocation. They differ in usage flags and in how they are filled.

use crate::backend::{
    check_result, BackendError, BackendResult, BufferUsage, ImageBarrier, ImageDescriptor,
    ImageHandle, ImageLayout, ImageUsage, ImageViewHandle, MemoryClass, MemoryProperty,
    TextureFormat,
};
use crate::device::Device;
use crate::memory::{Allocation, MemoryAllocator};
use crate::resolution::Resolution;
use crate::resources::buffer::Buffer;
use crate::resources::command::execute_one_time;
use crate::resources::deferred::{DeferredResource, DestructionQueue};

#[derive(Debug, Clone, Copy)]
struct ImageInner {
    image: ImageHandle,
    view: ImageViewHandle,
    allocation: Allocation,
    extent: Resolution,
    format: TextureFormat,
    mip_levels: u32,
}

fn create_image(
    device: &Device,
    allocator: &mut MemoryAllocator,
    desc: &ImageDescriptor,
) -> BackendResult<ImageInner> {
    let backend = device.backend();
    let image = check_result(backend.create_image(desc), "create image")?;
    let requirements = backend.image_memory_requirements(image);
    let allocation = match check_result(
        allocator.get_allocation(backend, MemoryClass::DeviceLocal, requirements),
        "allocate image memory",
    ) {
        Ok(allocation) => allocation,
        Err(e) => {
            backend.destroy_image(image);
            return Err(e);
        }
    };

    let view = check_result(
        backend.bind_image_memory(image, allocation.memory, allocation.offset),
        "bind image memory",
    )
    .and_then(|_| {
        check_result(
            backend.create_image_view(image, desc.format, desc.mip_levels),
            "create image view",
        )
    });
    let view = match view {
        Ok(view) => view,
        Err(e) => {
            allocator.free(backend, allocation);
            backend.destroy_image(image);
            return Err(e);
        }
    };

    log::debug!(
        "Created image {:?} {}x{} {:?}",
        desc.label,
        desc.extent.width,
        desc.extent.height,
        desc.format
    );
    Ok(ImageInner {
        image,
        view,
        allocation,
        extent: desc.extent,
        format: desc.format,
        mip_levels: desc.mip_levels,
    })
}

fn destroy_image(device: &Device, allocator: &mut MemoryAllocator, inner: ImageInner) {
    let backend = device.backend();
    backend.destroy_image_view(inner.view);
    backend.destroy_image(inner.image);
    allocator.free(backend, inner.allocation);
}

fn defer_image(queue: &mut DestructionQueue, inner: ImageInner) {
    queue.push(DeferredResource::Image {
        image: inner.image,
        view: inner.view,
        allocation: inner.allocation,
    });
}

macro_rules! image_accessors {
    ($name:ident) => {
        impl $name {
            pub fn get(&self) -> ImageHandle {
                debug_assert!(
                    self.inner.is_some(),
                    concat!(stringify!($name), " used before initialize")
                );
                self.inner.map(|inner| inner.image).unwrap_or_default()
            }

            pub fn view(&self) -> ImageViewHandle {
                debug_assert!(
                    self.inner.is_some(),
                    concat!(stringify!($name), " used before initialize")
                );
                self.inner.map(|inner| inner.view).unwrap_or_default()
            }

            pub fn is_initialized(&self) -> bool {
                self.inner.is_some()
            }

            pub fn extent(&self) -> Resolution {
                self.inner.map(|inner| inner.extent).unwrap_or_default()
            }

            pub fn format(&self) -> Option<TextureFormat> {
                self.inner.map(|inner| inner.format)
            }

            pub fn release(&mut self, device: &Device, allocator: &mut MemoryAllocator) {
                debug_assert!(
                    self.inner.is_some(),
                    concat!(stringify!($name), " released before initialize")
                );
                if let Some(inner) = self.inner.take() {
                    destroy_image(device, allocator, inner);
                }
            }

            /// Hands the image to `queue` so it is destroyed once the GPU is done with it.
            pub fn release_deferred(&mut self, queue: &mut DestructionQueue) {
                debug_assert!(
                    self.inner.is_some(),
                    concat!(stringify!($name), " released before initialize")
                );
                if let Some(inner) = self.inner.take() {
                    defer_image(queue, inner);
                }
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                if let Some(inner) = self.inner {
                    log::warn!(
                        concat!(stringify!($name), " {:?} dropped without release"),
                        inner.image
                    );
                }
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("image", &self.inner.map(|inner| inner.image))
                    .field("extent", &self.extent())
                    .field("format", &self.format())
                    .finish()
            }
        }
    };
}

/// A sampled texture.
#[derive(Default)]
pub struct Image {
    inner: Option<ImageInner>,
}

impl Image {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(
        &mut self,
        device: &Device,
        allocator: &mut MemoryAllocator,
        extent: Resolution,
        format: TextureFormat,
        mip_levels: u32,
    ) -> BackendResult<()> {
        debug_assert!(self.inner.is_none(), "Image initialized twice without release");
        let desc = Self::create_info(extent, format, mip_levels);
        self.inner = Some(create_image(device, allocator, &desc)?);
        Ok(())
    }

    /// Creates the texture and uploads `pixels` (tightly packed, first mip only).
    pub fn initialize_with_data(
        &mut self,
        device: &Device,
        allocator: &mut MemoryAllocator,
        extent: Resolution,
        format: TextureFormat,
        pixels: &[u8],
    ) -> BackendResult<()> {
        let expected = extent.pixel_count() * format.bytes_per_pixel() as u64;
        if pixels.len() as u64 != expected {
            return Err(BackendError::InvalidParameter(format!(
                "texture data is {} bytes, {}x{} {:?} needs {}",
                pixels.len(),
                extent.width,
                extent.height,
                format,
                expected
            )));
        }
        self.initialize(device, allocator, extent, format, 1)?;
        let image = self.get();

        let mut staging = Buffer::new();
        staging.initialize(
            device,
            allocator,
            expected,
            BufferUsage::TRANSFER_SRC,
            MemoryProperty::HOST_VISIBLE | MemoryProperty::HOST_COHERENT,
        )?;
        let result = staging.write(device, 0, pixels).and_then(|_| {
            let source = staging.get();
            execute_one_time(device, |backend, command_buffer| {
                backend.cmd_image_barrier(
                    command_buffer,
                    &ImageBarrier {
                        image,
                        format,
                        old_layout: ImageLayout::Undefined,
                        new_layout: ImageLayout::TransferDst,
                    },
                );
                backend.cmd_copy_buffer_to_image(command_buffer, source, image, extent);
                backend.cmd_image_barrier(
                    command_buffer,
                    &ImageBarrier {
                        image,
                        format,
                        old_layout: ImageLayout::TransferDst,
                        new_layout: ImageLayout::ShaderReadOnly,
                    },
                );
            })
        });
        staging.release(device, allocator);
        result
    }

    fn create_info(extent: Resolution, format: TextureFormat, mip_levels: u32) -> ImageDescriptor {
        ImageDescriptor {
            label: Some("texture".into()),
            extent,
            mip_levels: mip_levels.max(1),
            format,
            usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
        }
    }

    pub fn mip_levels(&self) -> u32 {
        self.inner.map(|inner| inner.mip_levels).unwrap_or(0)
    }
}

image_accessors!(Image);

/// A depth attachment that can also be sampled.
#[derive(Default)]
pub struct DepthBuffer {
    inner: Option<ImageInner>,
}

impl DepthBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(
        &mut self,
        device: &Device,
        allocator: &mut MemoryAllocator,
        extent: Resolution,
        format: TextureFormat,
    ) -> BackendResult<()> {
        debug_assert!(
            self.inner.is_none(),
            "DepthBuffer initialized twice without release"
        );
        debug_assert!(format.is_depth(), "DepthBuffer needs a depth format");
        let desc = Self::create_info(extent, format);
        self.inner = Some(create_image(device, allocator, &desc)?);
        Ok(())
    }

    fn create_info(extent: Resolution, format: TextureFormat) -> ImageDescriptor {
        ImageDescriptor {
            label: Some("depth buffer".into()),
            extent,
            mip_levels: 1,
            format,
            usage: ImageUsage::DEPTH_STENCIL_ATTACHMENT | ImageUsage::SAMPLED,
        }
    }
}

image_accessors!(DepthBuffer);

/// An image rendered into by one pipeline and read by later ones.
#[derive(Default)]
pub struct RenderTarget {
    inner: Option<ImageInner>,
}

impl RenderTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(
        &mut self,
        device: &Device,
        allocator: &mut MemoryAllocator,
        extent: Resolution,
        format: TextureFormat,
    ) -> BackendResult<()> {
        debug_assert!(
            self.inner.is_none(),
            "RenderTarget initialized twice without release"
        );
        let desc = Self::create_info(extent, format);
        self.inner = Some(create_image(device, allocator, &desc)?);
        Ok(())
    }

    fn create_info(extent: Resolution, format: TextureFormat) -> ImageDescriptor {
        let attachment = if format.is_depth() {
            ImageUsage::DEPTH_STENCIL_ATTACHMENT
        } else {
            ImageUsage::COLOR_ATTACHMENT | ImageUsage::STORAGE
        };
        ImageDescriptor {
            label: Some("render target".into()),
            extent,
            mip_levels: 1,
            format,
            usage: attachment | ImageUsage::SAMPLED | ImageUsage::TRANSFER_SRC,
        }
    }
}

image_accessors!(RenderTarget);

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::RecordedCall;
    use crate::resources::test_support::dummy_device;

    #[test]
    fn test_texture_upload_transitions_layouts() {
        let (backend, device, mut allocator) = dummy_device();
        let mut image = Image::new();
        let pixels = vec![255u8; 4 * 4 * 4];
        image
            .initialize_with_data(
                &device,
                &mut allocator,
                Resolution::new(4, 4),
                TextureFormat::Rgba8Unorm,
                &pixels,
            )
            .unwrap();

        let layouts: Vec<_> = backend
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::ImageBarrier { new_layout, .. } => Some(new_layout),
                _ => None,
            })
            .collect();
        assert_eq!(
            layouts,
            vec![ImageLayout::TransferDst, ImageLayout::ShaderReadOnly]
        );
        image.release(&device, &mut allocator);
    }

    #[test]
    fn test_texture_data_size_mismatch() {
        let (_backend, device, mut allocator) = dummy_device();
        let mut image = Image::new();
        let result = image.initialize_with_data(
            &device,
            &mut allocator,
            Resolution::new(4, 4),
            TextureFormat::Rgba8Unorm,
            &[0; 3],
        );
        assert!(matches!(result, Err(BackendError::InvalidParameter(_))));
        assert!(!image.is_initialized());
    }

    #[test]
    fn test_render_target_release() {
        let (backend, device, mut allocator) = dummy_device();
        let mut target = RenderTarget::new();
        target
            .initialize(
                &device,
                &mut allocator,
                Resolution::new(64, 32),
                TextureFormat::Rgba16Float,
            )
            .unwrap();
        assert_eq!(target.extent(), Resolution::new(64, 32));
        assert!(!target.view().is_null());

        target.release(&device, &mut allocator);
        allocator.release(device.backend());
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_depth_buffer() {
        let (_backend, device, mut allocator) = dummy_device();
        let mut depth = DepthBuffer::new();
        depth
            .initialize(
                &device,
                &mut allocator,
                Resolution::new(16, 16),
                TextureFormat::Depth32Float,
            )
            .unwrap();
        assert_eq!(depth.format(), Some(TextureFormat::Depth32Float));
        depth.release(&device, &mut allocator);
    }
}
