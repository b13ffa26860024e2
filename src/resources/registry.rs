//! Generation-checked registry of render targets.
//!
//! Pipelines never hold a render target directly. They hold a [`RenderTargetId`] and
//! resolve it through the registry when they bind resources, so a target that was
//! recreated (resize) or destroyed is detected instead of read through a stale handle.
//!
//! | Operation  | Slot generation | Old ids      |
//! |------------|-----------------|--------------|
//! | `insert`   | unchanged       | -            |
//! | `remove`   | incremented     | become stale |
//! | `get`      | -               | `None`       |

use crate::backend::{BackendResult, ImageBarrier, ImageLayout, ImageViewHandle, TextureFormat};
use crate::device::Device;
use crate::memory::MemoryAllocator;
use crate::resolution::{Resolution, SCALED_RESOLUTION_LEVELS};
use crate::resources::command::execute_one_time;
use crate::resources::deferred::DestructionQueue;
use crate::resources::image::RenderTarget;

/// Side of the square shadow map
pub const SHADOW_MAP_RESOLUTION: u32 = 2048;

/// Index into a [`RenderTargetRegistry`] plus the generation it was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetId {
    index: u32,
    generation: u32,
}

impl RenderTargetId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Default)]
struct Slot {
    generation: u32,
    target: Option<RenderTarget>,
}

/// Owner of every render target, addressed by [`RenderTargetId`].
#[derive(Default)]
pub struct RenderTargetRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl RenderTargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a render target and registers it.
    pub fn create(
        &mut self,
        device: &Device,
        allocator: &mut MemoryAllocator,
        extent: Resolution,
        format: TextureFormat,
    ) -> BackendResult<RenderTargetId> {
        let mut target = RenderTarget::new();
        target.initialize(device, allocator, extent, format)?;
        Ok(self.insert(target))
    }

    pub fn insert(&mut self, target: RenderTarget) -> RenderTargetId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.target = Some(target);
                RenderTargetId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    target: Some(target),
                });
                RenderTargetId {
                    index: self.slots.len() as u32 - 1,
                    generation: 0,
                }
            }
        }
    }

    /// Resolves `id`, or `None` if it is stale or was never issued.
    pub fn get(&self, id: RenderTargetId) -> Option<&RenderTarget> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.target.as_ref())
    }

    /// The view of `id`, or the null view if the id is stale.
    pub fn view(&self, id: RenderTargetId) -> ImageViewHandle {
        let target = self.get(id);
        debug_assert!(target.is_some(), "stale render target id {:?}", id);
        target.map(RenderTarget::view).unwrap_or_default()
    }

    pub fn contains(&self, id: RenderTargetId) -> bool {
        self.get(id).is_some()
    }

    /// Unregisters `id`, invalidating every copy of it.
    pub fn remove(&mut self, id: RenderTargetId) -> Option<RenderTarget> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let target = slot.target.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(target)
    }

    /// Removes and releases `id` immediately. The GPU must no longer use it.
    pub fn destroy(&mut self, id: RenderTargetId, device: &Device, allocator: &mut MemoryAllocator) {
        match self.remove(id) {
            Some(mut target) => target.release(device, allocator),
            None => debug_assert!(false, "destroying stale render target id {:?}", id),
        }
    }

    /// Removes `id` and queues it for deferred destruction.
    pub fn destroy_deferred(&mut self, id: RenderTargetId, queue: &mut DestructionQueue) {
        match self.remove(id) {
            Some(mut target) => target.release_deferred(queue),
            None => debug_assert!(false, "destroying stale render target id {:?}", id),
        }
    }

    /// Releases every registered target.
    pub fn release_all(&mut self, device: &Device, allocator: &mut MemoryAllocator) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(mut target) = slot.target.take() {
                target.release(device, allocator);
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
    }

    /// Moves `ids` from the undefined layout to the general layout render targets
    /// rest in between passes. Blocks until the transition retired.
    pub fn transition_to_general(&self, device: &Device, ids: &[RenderTargetId]) -> BackendResult<()> {
        let barriers: Vec<ImageBarrier> = ids
            .iter()
            .filter_map(|id| self.get(*id))
            .filter_map(|target| {
                target.format().map(|format| ImageBarrier {
                    image: target.get(),
                    format,
                    old_layout: ImageLayout::Undefined,
                    new_layout: ImageLayout::General,
                })
            })
            .collect();
        if barriers.is_empty() {
            return Ok(());
        }
        execute_one_time(device, |backend, command_buffer| {
            for barrier in &barriers {
                backend.cmd_image_barrier(command_buffer, barrier);
            }
        })
    }

    /// Number of live targets
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.target.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Render targets shared by the built-in passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharedRenderTarget {
    /// Lit scene radiance
    Scene,
    /// Albedo and material parameters
    SceneFeatures1,
    /// Normals and view depth
    SceneFeatures2,
    IntermediateRgba8,
    IntermediateRgba16FloatHalf,
    IntermediateRgba16FloatQuarter,
    ShadowMap,
    AmbientOcclusion,
    TemporalHistoryA,
    TemporalHistoryB,
}

impl SharedRenderTarget {
    pub const ALL: [SharedRenderTarget; 10] = [
        SharedRenderTarget::Scene,
        SharedRenderTarget::SceneFeatures1,
        SharedRenderTarget::SceneFeatures2,
        SharedRenderTarget::IntermediateRgba8,
        SharedRenderTarget::IntermediateRgba16FloatHalf,
        SharedRenderTarget::IntermediateRgba16FloatQuarter,
        SharedRenderTarget::ShadowMap,
        SharedRenderTarget::AmbientOcclusion,
        SharedRenderTarget::TemporalHistoryA,
        SharedRenderTarget::TemporalHistoryB,
    ];

    pub fn format(self) -> TextureFormat {
        match self {
            SharedRenderTarget::SceneFeatures1 | SharedRenderTarget::IntermediateRgba8 => {
                TextureFormat::Rgba8Unorm
            }
            SharedRenderTarget::ShadowMap => TextureFormat::R32Float,
            SharedRenderTarget::AmbientOcclusion => TextureFormat::R8Unorm,
            _ => TextureFormat::Rgba16Float,
        }
    }

    /// Extent of this target given the scaled resolution chain.
    pub fn extent(self, scaled: &[Resolution; SCALED_RESOLUTION_LEVELS]) -> Resolution {
        match self {
            SharedRenderTarget::ShadowMap => {
                Resolution::new(SHADOW_MAP_RESOLUTION, SHADOW_MAP_RESOLUTION)
            }
            SharedRenderTarget::IntermediateRgba16FloatHalf
            | SharedRenderTarget::AmbientOcclusion => scaled[1],
            SharedRenderTarget::IntermediateRgba16FloatQuarter => scaled[2],
            _ => scaled[0],
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// The ids of all [`SharedRenderTarget`]s.
#[derive(Debug, Default)]
pub struct SharedRenderTargets {
    ids: Option<[RenderTargetId; 10]>,
}

impl SharedRenderTargets {
    pub fn create(
        &mut self,
        registry: &mut RenderTargetRegistry,
        device: &Device,
        allocator: &mut MemoryAllocator,
        scaled: &[Resolution; SCALED_RESOLUTION_LEVELS],
    ) -> BackendResult<()> {
        debug_assert!(self.ids.is_none(), "shared render targets created twice");
        let mut ids = Vec::with_capacity(SharedRenderTarget::ALL.len());
        for kind in SharedRenderTarget::ALL {
            match registry.create(device, allocator, kind.extent(scaled), kind.format()) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids {
                        registry.destroy(id, device, allocator);
                    }
                    return Err(e);
                }
            }
        }
        let mut array = [ids[0]; 10];
        array.copy_from_slice(&ids);
        self.ids = Some(array);
        Ok(())
    }

    pub fn destroy(
        &mut self,
        registry: &mut RenderTargetRegistry,
        device: &Device,
        allocator: &mut MemoryAllocator,
    ) {
        if let Some(ids) = self.ids.take() {
            for id in ids {
                registry.destroy(id, device, allocator);
            }
        }
    }

    /// Id of `kind`. Panics in debug builds if the targets were not created.
    pub fn get(&self, kind: SharedRenderTarget) -> RenderTargetId {
        debug_assert!(self.ids.is_some(), "shared render targets not created");
        self.ids
            .map(|ids| ids[kind.index()])
            .unwrap_or(RenderTargetId {
                index: u32::MAX,
                generation: u32::MAX,
            })
    }

    pub fn is_created(&self) -> bool {
        self.ids.is_some()
    }

    /// Every id, in [`SharedRenderTarget::ALL`] order. Empty before create.
    pub fn ids(&self) -> &[RenderTargetId] {
        self.ids.as_ref().map(|ids| ids.as_slice()).unwrap_or(&[])
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::resolution::scaled_resolutions;
    use crate::resources::test_support::dummy_device;

    #[test]
    fn test_stale_id_is_detected() {
        let (_backend, device, mut allocator) = dummy_device();
        let mut registry = RenderTargetRegistry::new();
        let first = registry
            .create(&device, &mut allocator, Resolution::new(8, 8), TextureFormat::Rgba8Unorm)
            .unwrap();
        assert!(registry.contains(first));

        registry.destroy(first, &device, &mut allocator);
        assert!(registry.get(first).is_none());

        let second = registry
            .create(&device, &mut allocator, Resolution::new(8, 8), TextureFormat::Rgba8Unorm)
            .unwrap();
        assert_eq!(second.index(), first.index());
        assert_ne!(second.generation(), first.generation());
        assert!(registry.get(first).is_none());
        assert!(registry.get(second).is_some());

        registry.release_all(&device, &mut allocator);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_shared_targets_follow_resolution_chain() {
        let (backend, device, mut allocator) = dummy_device();
        let mut registry = RenderTargetRegistry::new();
        let scaled = scaled_resolutions(Resolution::new(1920, 1080), 1.0);
        let mut shared = SharedRenderTargets::default();
        shared
            .create(&mut registry, &device, &mut allocator, &scaled)
            .unwrap();
        assert_eq!(registry.len(), SharedRenderTarget::ALL.len());

        let half = registry
            .get(shared.get(SharedRenderTarget::IntermediateRgba16FloatHalf))
            .unwrap();
        assert_eq!(half.extent(), Resolution::new(960, 540));
        let shadow = registry.get(shared.get(SharedRenderTarget::ShadowMap)).unwrap();
        assert_eq!(shadow.format(), Some(TextureFormat::R32Float));

        shared.destroy(&mut registry, &device, &mut allocator);
        allocator.release(device.backend());
        assert_eq!(backend.live_object_count(), 0);
    }
}
