//! Common types shared between backends

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::backend::traits::{
    AccelerationStructureHandle, BufferHandle, ImageHandle, ImageViewHandle, SamplerHandle,
};
use crate::resolution::Resolution;

bitflags! {
    /// Memory property flags requested for an allocation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryProperty: u32 {
        /// Memory local to the GPU.
        const DEVICE_LOCAL = 1 << 0;
        /// Memory coherent between host and device without explicit flushes.
        const HOST_COHERENT = 1 << 1;
        /// Memory that can be mapped on the host.
        const HOST_VISIBLE = 1 << 2;
    }
}

/// The allocation bucket a memory request is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryClass {
    DeviceLocal,
    HostVisibleCoherent,
}

impl MemoryClass {
    pub const ALL: [MemoryClass; 2] = [MemoryClass::DeviceLocal, MemoryClass::HostVisibleCoherent];

    /// Host visibility wins: a request for `DEVICE_LOCAL | HOST_VISIBLE` must be mappable.
    pub fn from_properties(properties: MemoryProperty) -> Self {
        if properties.contains(MemoryProperty::HOST_VISIBLE) {
            MemoryClass::HostVisibleCoherent
        } else {
            MemoryClass::DeviceLocal
        }
    }

    pub fn properties(self) -> MemoryProperty {
        match self {
            MemoryClass::DeviceLocal => MemoryProperty::DEVICE_LOCAL,
            MemoryClass::HostVisibleCoherent => {
                MemoryProperty::HOST_VISIBLE | MemoryProperty::HOST_COHERENT
            }
        }
    }

    pub fn index(self) -> usize {
        match self {
            MemoryClass::DeviceLocal => 0,
            MemoryClass::HostVisibleCoherent => 1,
        }
    }

    pub fn is_host_visible(self) -> bool {
        self == MemoryClass::HostVisibleCoherent
    }
}

/// Memory layout of a resource, for buffer/image granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceTiling {
    /// Buffers
    Linear,
    /// Optimally tiled images
    Optimal,
}

/// What a resource needs from its backing memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
    /// Bit `i` is set when memory type `i` may back the resource
    pub memory_type_bits: u32,
    pub tiling: ResourceTiling,
}

impl MemoryRequirements {
    /// A linear resource any memory type may back.
    pub fn linear(size: u64, alignment: u64) -> Self {
        Self {
            size,
            alignment,
            memory_type_bits: u32::MAX,
            tiling: ResourceTiling::Linear,
        }
    }

    /// An optimally tiled resource any memory type may back.
    pub fn optimal(size: u64, alignment: u64) -> Self {
        Self {
            tiling: ResourceTiling::Optimal,
            ..Self::linear(size, alignment)
        }
    }
}

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const TRANSFER_SRC = 1 << 4;
        const TRANSFER_DST = 1 << 5;
        /// Input to acceleration structure builds.
        const ACCELERATION_STRUCTURE_INPUT = 1 << 6;
    }
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
}

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    R32Float,
    Rg16Float,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8
            | TextureFormat::R32Float
            | TextureFormat::Rg16Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Usage flags for images.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const COLOR_ATTACHMENT = 1 << 4;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
    }
}

/// Image descriptor
#[derive(Debug, Clone)]
pub struct ImageDescriptor {
    pub label: Option<String>,
    pub extent: Resolution,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub usage: ImageUsage,
}

/// Image layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    General,
    ColorAttachment,
    DepthAttachment,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    PresentSrc,
}

/// Layout transition of a whole image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: ImageHandle,
    pub format: TextureFormat,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
}

/// Filter mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Address mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

/// Sampler descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDescriptor {
    pub label: Option<String>,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub address_mode: AddressMode,
    pub max_anisotropy: Option<f32>,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Linear,
            address_mode: AddressMode::ClampToEdge,
            max_anisotropy: None,
        }
    }
}

bitflags! {
    /// Shader stages a binding or push constant range is visible to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStage: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
        const GEOMETRY = 1 << 3;
        const RAY_GENERATION = 1 << 4;
        const RAY_MISS = 1 << 5;
        const RAY_CLOSEST_HIT = 1 << 6;
        const VERTEX_FRAGMENT = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

bitflags! {
    /// Pipeline stages used for semaphore waits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStage: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const TRANSFER = 1 << 1;
        const COMPUTE_SHADER = 1 << 2;
        const FRAGMENT_SHADER = 1 << 3;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 4;
        const RAY_TRACING_SHADER = 1 << 5;
        const ALL_COMMANDS = 1 << 6;
    }
}

/// Descriptor binding type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    UniformBuffer,
    StorageBuffer,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    Sampler,
    AccelerationStructure,
}

/// One slot of a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub ty: DescriptorType,
    pub count: u32,
    pub stages: ShaderStage,
}

impl DescriptorBinding {
    pub fn new(binding: u32, ty: DescriptorType, stages: ShaderStage) -> Self {
        Self {
            binding,
            ty,
            count: 1,
            stages,
        }
    }
}

/// Number of descriptors of one type a pool can hand out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolSize {
    pub ty: DescriptorType,
    pub count: u32,
}

/// A resource written into a descriptor slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        range: u64,
    },
    StorageBuffer {
        buffer: BufferHandle,
        offset: u64,
        range: u64,
    },
    CombinedImageSampler {
        view: ImageViewHandle,
        sampler: SamplerHandle,
    },
    SampledImage(ImageViewHandle),
    StorageImage(ImageViewHandle),
    Sampler(SamplerHandle),
    AccelerationStructure(AccelerationStructureHandle),
}

/// One descriptor update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub array_element: u32,
    pub resource: DescriptorResource,
}

/// Push constant range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    pub stages: ShaderStage,
    pub offset: u32,
    pub size: u32,
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
}

/// Vertex step mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexInputRate {
    Vertex,
    Instance,
}

/// Vertex input binding description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexInputBinding {
    pub binding: u32,
    pub stride: u32,
    pub rate: VertexInputRate,
}

/// Vertex input attribute description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexInputAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

/// Cull mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
    FrontAndBack,
}

/// Compare operator for depth testing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOperator {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

/// Depth test state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthState {
    pub test_enable: bool,
    pub write_enable: bool,
    pub compare: CompareOperator,
}

impl DepthState {
    pub fn disabled() -> Self {
        Self {
            test_enable: false,
            write_enable: false,
            compare: CompareOperator::Always,
        }
    }

    /// Test and write, nearer fragments win.
    pub fn less() -> Self {
        Self {
            test_enable: true,
            write_enable: true,
            compare: CompareOperator::Less,
        }
    }
}

impl Default for DepthState {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SourceColor,
    OneMinusSourceColor,
    DestinationColor,
    OneMinusDestinationColor,
    SourceAlpha,
    OneMinusSourceAlpha,
    DestinationAlpha,
    OneMinusDestinationAlpha,
}

/// Blend operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendOperator {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Blend state applied to every color attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendState {
    pub enabled: bool,
    pub color_source: BlendFactor,
    pub color_destination: BlendFactor,
    pub color_operator: BlendOperator,
    pub alpha_source: BlendFactor,
    pub alpha_destination: BlendFactor,
    pub alpha_operator: BlendOperator,
}

impl BlendState {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            color_source: BlendFactor::One,
            color_destination: BlendFactor::Zero,
            color_operator: BlendOperator::Add,
            alpha_source: BlendFactor::One,
            alpha_destination: BlendFactor::Zero,
            alpha_operator: BlendOperator::Add,
        }
    }

    pub fn alpha_blending() -> Self {
        Self {
            enabled: true,
            color_source: BlendFactor::SourceAlpha,
            color_destination: BlendFactor::OneMinusSourceAlpha,
            color_operator: BlendOperator::Add,
            alpha_source: BlendFactor::One,
            alpha_destination: BlendFactor::OneMinusSourceAlpha,
            alpha_operator: BlendOperator::Add,
        }
    }

    pub fn additive() -> Self {
        Self {
            enabled: true,
            color_source: BlendFactor::One,
            color_destination: BlendFactor::One,
            color_operator: BlendOperator::Add,
            ..Self::disabled()
        }
    }
}

impl Default for BlendState {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Pipeline bind point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
    RayTracing,
}

/// Queue capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
    Transfer,
}

/// Command buffer level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferLevel {
    Primary,
    Secondary,
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Attachment load operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadOp {
    Load,
    #[default]
    Clear,
    DontCare,
}

/// Attachment store operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

/// Color attachment of a dynamic rendering scope
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAttachment {
    pub view: ImageViewHandle,
    pub load: LoadOp,
    pub store: StoreOp,
    pub clear_color: [f32; 4],
}

/// Depth attachment of a dynamic rendering scope
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthAttachment {
    pub view: ImageViewHandle,
    pub load: LoadOp,
    pub store: StoreOp,
    pub clear_depth: f32,
}

/// Begin-rendering parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RenderingInfo {
    pub extent: Resolution,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_attachment: Option<DepthAttachment>,
}

/// One instance of a top level acceleration structure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelerationStructureInstance {
    pub transform: Mat4,
    pub custom_index: u32,
    pub mask: u8,
    /// Bottom level structure the instance refers to
    pub geometry: AccelerationStructureHandle,
}

/// Vertex layout of model buffers
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

static_assertions::const_assert_eq!(std::mem::size_of::<Vertex>(), 32);

impl Vertex {
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }

    pub fn binding() -> VertexInputBinding {
        VertexInputBinding {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            rate: VertexInputRate::Vertex,
        }
    }

    pub fn attributes() -> [VertexInputAttribute; 3] {
        [
            VertexInputAttribute {
                location: 0,
                binding: 0,
                format: VertexFormat::Float32x3,
                offset: 0,
            },
            VertexInputAttribute {
                location: 1,
                binding: 0,
                format: VertexFormat::Float32x3,
                offset: 12,
            },
            VertexInputAttribute {
                location: 2,
                binding: 0,
                format: VertexFormat::Float32x2,
                offset: 24,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_class_from_properties() {
        assert_eq!(
            MemoryClass::from_properties(MemoryProperty::DEVICE_LOCAL),
            MemoryClass::DeviceLocal
        );
        assert_eq!(
            MemoryClass::from_properties(MemoryProperty::HOST_VISIBLE | MemoryProperty::HOST_COHERENT),
            MemoryClass::HostVisibleCoherent
        );
        assert_eq!(
            MemoryClass::from_properties(MemoryProperty::DEVICE_LOCAL | MemoryProperty::HOST_VISIBLE),
            MemoryClass::HostVisibleCoherent
        );
    }

    #[test]
    fn test_texture_format_depth() {
        assert!(TextureFormat::Depth32Float.is_depth());
        assert!(!TextureFormat::Rgba16Float.is_depth());
        assert_eq!(TextureFormat::Rgba32Float.bytes_per_pixel(), 16);
    }

    #[test]
    fn test_vertex_layout_matches_struct() {
        let attributes = Vertex::attributes();
        assert_eq!(Vertex::binding().stride, 32);
        assert_eq!(attributes[2].offset, 24);
    }
}
