//! Descriptor set layouts, pools and sets.

use crate::backend::{
    check_result, BackendResult, DescriptorBinding, DescriptorPoolHandle, DescriptorPoolSize,
    DescriptorSetHandle, DescriptorSetLayoutHandle, DescriptorType, DescriptorWrite,
};
use crate::device::Device;

/// Immutable binding schema shared by every set allocated against it.
#[derive(Default)]
pub struct DescriptorSetLayout {
    handle: Option<DescriptorSetLayoutHandle>,
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&mut self, device: &Device, bindings: &[DescriptorBinding]) -> BackendResult<()> {
        debug_assert!(
            self.handle.is_none(),
            "DescriptorSetLayout initialized twice without release"
        );
        debug_assert!(
            bindings
                .iter()
                .enumerate()
                .all(|(i, a)| bindings[i + 1..].iter().all(|b| b.binding != a.binding)),
            "duplicate descriptor binding index"
        );
        self.handle = Some(check_result(
            device.backend().create_descriptor_set_layout(bindings),
            "create descriptor set layout",
        )?);
        self.bindings = bindings.to_vec();
        Ok(())
    }

    pub fn release(&mut self, device: &Device) {
        debug_assert!(
            self.handle.is_some(),
            "DescriptorSetLayout released before initialize"
        );
        if let Some(handle) = self.handle.take() {
            device.backend().destroy_descriptor_set_layout(handle);
        }
        self.bindings.clear();
    }

    pub fn get(&self) -> DescriptorSetLayoutHandle {
        debug_assert!(
            self.handle.is_some(),
            "DescriptorSetLayout used before initialize"
        );
        self.handle.unwrap_or_default()
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            log::warn!("DescriptorSetLayout {:?} dropped without release", handle);
        }
    }
}

/// Pool descriptor sets are allocated from.
#[derive(Default)]
pub struct DescriptorPool {
    handle: Option<DescriptorPoolHandle>,
}

impl DescriptorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pool for `max_sets` sets, each holding up to `per_set` descriptors of
    /// every type.
    pub fn initialize(&mut self, device: &Device, max_sets: u32, per_set: u32) -> BackendResult<()> {
        debug_assert!(
            self.handle.is_none(),
            "DescriptorPool initialized twice without release"
        );
        let sizes = Self::create_info(max_sets, per_set);
        self.handle = Some(check_result(
            device.backend().create_descriptor_pool(max_sets, &sizes),
            "create descriptor pool",
        )?);
        log::debug!("Created descriptor pool for {} sets", max_sets);
        Ok(())
    }

    fn create_info(max_sets: u32, per_set: u32) -> Vec<DescriptorPoolSize> {
        [
            DescriptorType::UniformBuffer,
            DescriptorType::StorageBuffer,
            DescriptorType::CombinedImageSampler,
            DescriptorType::SampledImage,
            DescriptorType::StorageImage,
            DescriptorType::Sampler,
            DescriptorType::AccelerationStructure,
        ]
        .into_iter()
        .map(|ty| DescriptorPoolSize {
            ty,
            count: max_sets.saturating_mul(per_set),
        })
        .collect()
    }

    pub fn release(&mut self, device: &Device) {
        debug_assert!(self.handle.is_some(), "DescriptorPool released before initialize");
        if let Some(handle) = self.handle.take() {
            device.backend().destroy_descriptor_pool(handle);
        }
    }

    pub fn get(&self) -> DescriptorPoolHandle {
        debug_assert!(self.handle.is_some(), "DescriptorPool used before initialize");
        self.handle.unwrap_or_default()
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            log::warn!("DescriptorPool {:?} dropped without release", handle);
        }
    }
}

/// Concrete resources bound to a layout's slots.
#[derive(Default)]
pub struct DescriptorSet {
    handle: Option<(DescriptorSetHandle, DescriptorPoolHandle)>,
}

impl DescriptorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the set. Fails with `DescriptorPoolExhausted` when the pool is full.
    pub fn initialize(
        &mut self,
        device: &Device,
        pool: &DescriptorPool,
        layout: &DescriptorSetLayout,
    ) -> BackendResult<()> {
        debug_assert!(
            self.handle.is_none(),
            "DescriptorSet initialized twice without release"
        );
        let set = check_result(
            device
                .backend()
                .allocate_descriptor_set(pool.get(), layout.get()),
            "allocate descriptor set",
        )?;
        self.handle = Some((set, pool.get()));
        Ok(())
    }

    pub fn update(&self, device: &Device, writes: &[DescriptorWrite]) {
        device.backend().update_descriptor_set(self.get(), writes);
    }

    pub fn release(&mut self, device: &Device) {
        debug_assert!(self.handle.is_some(), "DescriptorSet released before initialize");
        if let Some((set, pool)) = self.handle.take() {
            device.backend().free_descriptor_set(pool, set);
        }
    }

    pub fn get(&self) -> DescriptorSetHandle {
        debug_assert!(self.handle.is_some(), "DescriptorSet used before initialize");
        self.handle.map(|(set, _)| set).unwrap_or_default()
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        if let Some((set, _)) = self.handle {
            log::warn!("DescriptorSet {:?} dropped without release", set);
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::{BackendError, ShaderStage};
    use crate::resources::test_support::dummy_device;

    #[test]
    fn test_descriptor_lifecycle() {
        let (backend, device, _allocator) = dummy_device();
        let mut layout = DescriptorSetLayout::new();
        layout
            .initialize(
                &device,
                &[DescriptorBinding::new(
                    0,
                    DescriptorType::UniformBuffer,
                    ShaderStage::VERTEX_FRAGMENT,
                )],
            )
            .unwrap();
        assert_eq!(layout.bindings().len(), 1);

        let mut pool = DescriptorPool::new();
        pool.initialize(&device, 2, 4).unwrap();

        let mut sets: Vec<DescriptorSet> = (0..2).map(|_| DescriptorSet::new()).collect();
        for set in &mut sets {
            set.initialize(&device, &pool, &layout).unwrap();
        }
        let mut overflow = DescriptorSet::new();
        assert_eq!(
            overflow.initialize(&device, &pool, &layout),
            Err(BackendError::DescriptorPoolExhausted)
        );
        assert!(!overflow.is_initialized());

        for set in &mut sets {
            set.release(&device);
        }
        pool.release(&device);
        layout.release(&device);
        assert_eq!(backend.live_object_count(), 0);
    }
}
