//! Rasterization pipelines recorded inside a dynamic rendering scope.

use crate::backend::{
    check_result, BackendError, BackendResult, BlendState, BufferHandle, ColorAttachment, CullMode,
    DepthAttachment, DepthState, GraphicsPipelineDescriptor, ImageViewHandle, IndexFormat, LoadOp,
    PipelineBindPoint, PrimitiveTopology, PushConstantRange, RenderingInfo, ShaderStage, StoreOp,
    TextureFormat, VertexInputAttribute, VertexInputBinding,
};
use crate::pipeline::{PipelineCore, ResourceBinding, StageModules};
use crate::render_pass::{FrameContext, RenderContext};
use crate::resolution::Resolution;
use crate::resources::RenderTargetId;

/// Image a color attachment renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentTarget {
    RenderTarget(RenderTargetId),
    /// The swapchain image acquired for the current frame
    Swapchain,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorTarget {
    pub target: AttachmentTarget,
    pub load: LoadOp,
    pub clear_color: [f32; 4],
}

impl ColorTarget {
    pub fn render_target(id: RenderTargetId) -> Self {
        Self {
            target: AttachmentTarget::RenderTarget(id),
            load: LoadOp::Clear,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn swapchain() -> Self {
        Self {
            target: AttachmentTarget::Swapchain,
            load: LoadOp::Clear,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn with_load(mut self, load: LoadOp) -> Self {
        self.load = load;
        self
    }

    pub fn with_clear_color(mut self, clear_color: [f32; 4]) -> Self {
        self.clear_color = clear_color;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthTarget {
    pub target: RenderTargetId,
    pub load: LoadOp,
    pub clear_depth: f32,
}

impl DepthTarget {
    pub fn new(target: RenderTargetId) -> Self {
        Self {
            target,
            load: LoadOp::Clear,
            clear_depth: 1.0,
        }
    }
}

/// Draw call issued after binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawCommand {
    /// One triangle covering the viewport, generated in the vertex shader
    Fullscreen,
    Vertices {
        vertex_count: u32,
        instance_count: u32,
    },
    Indexed {
        vertex_buffer: BufferHandle,
        index_buffer: BufferHandle,
        index_format: IndexFormat,
        index_count: u32,
        instance_count: u32,
    },
}

/// Everything needed to build a [`GraphicsPipeline`].
#[derive(Debug, Clone)]
pub struct GraphicsPipelineParameters {
    pub name: String,
    pub vertex_shader: Vec<u32>,
    pub fragment_shader: Option<Vec<u32>>,
    pub geometry_shader: Option<Vec<u32>>,
    /// Descriptor set 1, binding `i` is `bindings[i]`
    pub bindings: Vec<ResourceBinding>,
    pub push_constant_ranges: Vec<PushConstantRange>,
    pub vertex_bindings: Vec<VertexInputBinding>,
    pub vertex_attributes: Vec<VertexInputAttribute>,
    pub topology: PrimitiveTopology,
    pub cull_mode: CullMode,
    pub depth: DepthState,
    pub blend: BlendState,
    /// Render area. Defaults to the first attachment's extent.
    pub extent: Option<Resolution>,
    pub color_targets: Vec<ColorTarget>,
    pub depth_target: Option<DepthTarget>,
    pub draw: DrawCommand,
}

impl GraphicsPipelineParameters {
    /// A fullscreen triangle pass without vertex input, culling or depth.
    pub fn fullscreen(name: impl Into<String>, vertex_shader: Vec<u32>, fragment_shader: Vec<u32>) -> Self {
        Self {
            name: name.into(),
            vertex_shader,
            fragment_shader: Some(fragment_shader),
            geometry_shader: None,
            bindings: Vec::new(),
            push_constant_ranges: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
            cull_mode: CullMode::None,
            depth: DepthState::disabled(),
            blend: BlendState::disabled(),
            extent: None,
            color_targets: Vec::new(),
            depth_target: None,
            draw: DrawCommand::Fullscreen,
        }
    }

    pub fn with_bindings(mut self, bindings: Vec<ResourceBinding>) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn with_push_constants(mut self, ranges: Vec<PushConstantRange>) -> Self {
        self.push_constant_ranges = ranges;
        self
    }

    pub fn with_color_target(mut self, target: ColorTarget) -> Self {
        self.color_targets.push(target);
        self
    }

    pub fn with_depth_target(mut self, target: DepthTarget) -> Self {
        self.depth_target = Some(target);
        self
    }
}

struct ResolvedAttachments {
    extent: Resolution,
    // `None` stands for the swapchain image of the frame being recorded.
    colors: Vec<(Option<ImageViewHandle>, ColorTarget)>,
    depth: Option<DepthAttachment>,
}

/// A graphics pipeline plus the attachments and draw it records.
pub struct GraphicsPipeline {
    pub(super) core: PipelineCore,
    params: GraphicsPipelineParameters,
    extent: Resolution,
    attachments: Option<ResolvedAttachments>,
}

impl GraphicsPipeline {
    pub fn new(mut params: GraphicsPipelineParameters) -> Self {
        let core = PipelineCore::new(
            params.name.clone(),
            std::mem::take(&mut params.bindings),
            std::mem::take(&mut params.push_constant_ranges),
        );
        Self {
            core,
            params,
            extent: Resolution::default(),
            attachments: None,
        }
    }

    /// Render area resolved at initialize
    pub fn extent(&self) -> Resolution {
        self.extent
    }

    pub fn draw(&self) -> DrawCommand {
        self.params.draw
    }

    /// Replaces the draw recorded from the next frame on.
    pub fn set_draw(&mut self, draw: DrawCommand) {
        self.params.draw = draw;
    }

    fn target_format(ctx: &RenderContext<'_>, id: RenderTargetId) -> BackendResult<(TextureFormat, Resolution)> {
        let target = ctx.registry.get(id).ok_or_else(|| {
            BackendError::InvalidParameter(format!("stale render target {:?}", id))
        })?;
        let format = target.format().ok_or_else(|| {
            BackendError::InvalidParameter(format!("render target {:?} has no image", id))
        })?;
        Ok((format, target.extent()))
    }

    pub(super) fn initialize(&mut self, ctx: &mut RenderContext<'_>) -> BackendResult<()> {
        let mut color_formats = Vec::with_capacity(self.params.color_targets.len());
        let mut attachment_extent = None;
        for color in &self.params.color_targets {
            let (format, extent) = match color.target {
                AttachmentTarget::RenderTarget(id) => Self::target_format(ctx, id)?,
                AttachmentTarget::Swapchain => (ctx.swapchain_format, ctx.swapchain_extent),
            };
            color_formats.push(format);
            attachment_extent.get_or_insert(extent);
        }
        let depth_format = match self.params.depth_target {
            Some(depth) => {
                let (format, extent) = Self::target_format(ctx, depth.target)?;
                attachment_extent.get_or_insert(extent);
                Some(format)
            }
            None => None,
        };
        self.extent = self
            .params
            .extent
            .or(attachment_extent)
            .unwrap_or_else(|| ctx.resolution());

        let mut stages = ShaderStage::VERTEX;
        let mut codes: Vec<&[u32]> = vec![&self.params.vertex_shader];
        if let Some(fragment) = &self.params.fragment_shader {
            stages |= ShaderStage::FRAGMENT;
            codes.push(fragment);
        }
        if let Some(geometry) = &self.params.geometry_shader {
            stages |= ShaderStage::GEOMETRY;
            codes.push(geometry);
        }

        let layout = self.core.create_layout(ctx, stages)?;
        let modules = StageModules::load(ctx.device, &codes)?;
        // Modules are ordered vertex, fragment, geometry with absent stages skipped.
        let fragment_shader = self.params.fragment_shader.as_ref().map(|_| modules.handle(1));
        let geometry_index = 1 + usize::from(fragment_shader.is_some());
        let geometry_shader = self
            .params
            .geometry_shader
            .as_ref()
            .map(|_| modules.handle(geometry_index));

        let descriptor = GraphicsPipelineDescriptor {
            label: Some(&self.params.name),
            layout,
            vertex_shader: modules.handle(0),
            fragment_shader,
            geometry_shader,
            vertex_bindings: &self.params.vertex_bindings,
            vertex_attributes: &self.params.vertex_attributes,
            topology: self.params.topology,
            cull_mode: self.params.cull_mode,
            depth: self.params.depth,
            blend: self.params.blend,
            viewport: self.extent,
            color_formats: &color_formats,
            depth_format,
        };
        let result = check_result(
            ctx.device.backend().create_graphics_pipeline(&descriptor),
            "create graphics pipeline",
        );
        modules.release(ctx.device);

        self.core.finish_initialize(ctx, result?)
    }

    /// Looks up the attachment views. Runs at post-initialize.
    pub(super) fn resolve_attachments(&mut self, ctx: &RenderContext<'_>) -> BackendResult<()> {
        let view = |id: RenderTargetId| {
            ctx.registry
                .get(id)
                .map(|target| target.view())
                .ok_or_else(|| BackendError::InvalidParameter(format!("stale render target {:?}", id)))
        };

        let colors = self
            .params
            .color_targets
            .iter()
            .map(|color| match color.target {
                AttachmentTarget::RenderTarget(id) => Ok((Some(view(id)?), *color)),
                AttachmentTarget::Swapchain => Ok((None, *color)),
            })
            .collect::<BackendResult<Vec<_>>>()?;
        let depth = match self.params.depth_target {
            Some(depth) => Some(DepthAttachment {
                view: view(depth.target)?,
                load: depth.load,
                store: StoreOp::Store,
                clear_depth: depth.clear_depth,
            }),
            None => None,
        };

        self.attachments = Some(ResolvedAttachments {
            extent: self.extent,
            colors,
            depth,
        });
        Ok(())
    }

    pub(super) fn execute(&self, frame: &FrameContext<'_>) {
        let Some(attachments) = &self.attachments else {
            return;
        };
        let backend = frame.device.backend();
        let command_buffer = frame.command_buffer;

        let info = RenderingInfo {
            extent: attachments.extent,
            color_attachments: attachments
                .colors
                .iter()
                .map(|(view, color)| ColorAttachment {
                    view: view.unwrap_or(frame.swapchain_view),
                    load: color.load,
                    store: StoreOp::Store,
                    clear_color: color.clear_color,
                })
                .collect(),
            depth_attachment: attachments.depth,
        };
        backend.cmd_begin_rendering(command_buffer, &info);
        backend.cmd_set_viewport(command_buffer, attachments.extent);
        self.core.bind(frame, PipelineBindPoint::Graphics);

        match self.params.draw {
            DrawCommand::Fullscreen => backend.cmd_draw(command_buffer, 3, 1),
            DrawCommand::Vertices {
                vertex_count,
                instance_count,
            } => backend.cmd_draw(command_buffer, vertex_count, instance_count),
            DrawCommand::Indexed {
                vertex_buffer,
                index_buffer,
                index_format,
                index_count,
                instance_count,
            } => {
                backend.cmd_bind_vertex_buffer(command_buffer, 0, vertex_buffer, 0);
                backend.cmd_bind_index_buffer(command_buffer, index_buffer, 0, index_format);
                backend.cmd_draw_indexed(command_buffer, index_count, instance_count);
            }
        }
        backend.cmd_end_rendering(command_buffer);
    }
}
