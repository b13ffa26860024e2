//! Texture samplers.

use crate::backend::{
    check_result, AddressMode, BackendResult, FilterMode, SamplerDescriptor, SamplerHandle,
};
use crate::device::Device;

/// A texture sampler.
#[derive(Default)]
pub struct Sampler {
    handle: Option<SamplerHandle>,
}

impl Sampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(
        &mut self,
        device: &Device,
        filter: FilterMode,
        mipmap_filter: FilterMode,
        address_mode: AddressMode,
    ) -> BackendResult<()> {
        debug_assert!(self.handle.is_none(), "Sampler initialized twice without release");
        let desc = Self::create_info(filter, mipmap_filter, address_mode);
        self.handle = Some(check_result(
            device.backend().create_sampler(&desc),
            "create sampler",
        )?);
        Ok(())
    }

    fn create_info(
        filter: FilterMode,
        mipmap_filter: FilterMode,
        address_mode: AddressMode,
    ) -> SamplerDescriptor {
        SamplerDescriptor {
            label: None,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter,
            address_mode,
            max_anisotropy: None,
        }
    }

    pub fn release(&mut self, device: &Device) {
        debug_assert!(self.handle.is_some(), "Sampler released before initialize");
        if let Some(handle) = self.handle.take() {
            device.backend().destroy_sampler(handle);
        }
    }

    pub fn get(&self) -> SamplerHandle {
        debug_assert!(self.handle.is_some(), "Sampler used before initialize");
        self.handle.unwrap_or_default()
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            log::warn!("Sampler {:?} dropped without release", handle);
        }
    }
}

/// Samplers shared by every pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommonSampler {
    LinearClampToEdge,
    LinearRepeat,
    NearestClampToEdge,
    NearestRepeat,
}

impl CommonSampler {
    pub const ALL: [CommonSampler; 4] = [
        CommonSampler::LinearClampToEdge,
        CommonSampler::LinearRepeat,
        CommonSampler::NearestClampToEdge,
        CommonSampler::NearestRepeat,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    fn filter(self) -> FilterMode {
        match self {
            CommonSampler::LinearClampToEdge | CommonSampler::LinearRepeat => FilterMode::Linear,
            CommonSampler::NearestClampToEdge | CommonSampler::NearestRepeat => FilterMode::Nearest,
        }
    }

    fn address_mode(self) -> AddressMode {
        match self {
            CommonSampler::LinearClampToEdge | CommonSampler::NearestClampToEdge => {
                AddressMode::ClampToEdge
            }
            CommonSampler::LinearRepeat | CommonSampler::NearestRepeat => AddressMode::Repeat,
        }
    }
}

/// The full set of [`CommonSampler`]s.
#[derive(Default)]
pub struct CommonSamplers {
    samplers: [Sampler; 4],
}

impl CommonSamplers {
    pub fn initialize(&mut self, device: &Device) -> BackendResult<()> {
        for kind in CommonSampler::ALL {
            self.samplers[kind.index()].initialize(
                device,
                kind.filter(),
                kind.filter(),
                kind.address_mode(),
            )?;
        }
        Ok(())
    }

    pub fn release(&mut self, device: &Device) {
        for sampler in &mut self.samplers {
            if sampler.is_initialized() {
                sampler.release(device);
            }
        }
    }

    pub fn get(&self, kind: CommonSampler) -> SamplerHandle {
        self.samplers[kind.index()].get()
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::resources::test_support::dummy_device;

    #[test]
    fn test_common_samplers_are_distinct() {
        let (backend, device, _allocator) = dummy_device();
        let mut samplers = CommonSamplers::default();
        samplers.initialize(&device).unwrap();

        let mut handles: Vec<_> = CommonSampler::ALL
            .iter()
            .map(|kind| samplers.get(*kind))
            .collect();
        handles.dedup();
        assert_eq!(handles.len(), 4);

        samplers.release(&device);
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_common_sampler_modes() {
        assert_eq!(CommonSampler::NearestRepeat.filter(), FilterMode::Nearest);
        assert_eq!(
            CommonSampler::LinearClampToEdge.address_mode(),
            AddressMode::ClampToEdge
        );
    }
}
