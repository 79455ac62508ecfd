//! Headless recording backend.
//!
//! This backend doesn't talk to a GPU. It hands out handles, remembers the
//! descriptors it was given and appends every command to a shared log, so pass
//! ordering and resource setup can be checked without graphics hardware.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::ResourceAccess;

/// One command seen by the recording backend
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginFrame {
        swapchain_view: TextureViewHandle,
    },
    BeginRenderPass {
        label: Option<String>,
        color_targets: Vec<TextureViewHandle>,
        color_loads: Vec<LoadOp>,
        depth_target: Option<TextureViewHandle>,
        depth_load: Option<LoadOp>,
    },
    EndRenderPass,
    SetPipeline {
        label: Option<String>,
    },
    SetBindGroup {
        index: u32,
        bind_group: BindGroupHandle,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: BufferHandle,
    },
    SetIndexBuffer {
        buffer: BufferHandle,
    },
    SetViewport {
        width: f32,
        height: f32,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    CopyTexture {
        src: TextureHandle,
        dst: TextureHandle,
        width: u32,
        height: u32,
    },
    Transition {
        texture: TextureHandle,
        from: ResourceAccess,
        to: ResourceAccess,
    },
    WriteTexture {
        texture: TextureHandle,
        region: TextureWrite,
    },
    WriteBuffer {
        buffer: BufferHandle,
        size: usize,
    },
    Submit,
    Present,
    DiscardFrame,
}

/// Shared, cloneable view of the recorded command stream
#[derive(Debug, Clone, Default)]
pub struct CommandLog(Arc<Mutex<Vec<RecordedCommand>>>);

impl CommandLog {
    fn push(&self, command: RecordedCommand) {
        log::trace!("RecordingBackend: {:?}", command);
        self.0.lock().push(command);
    }

    /// Copy of everything recorded so far
    pub fn snapshot(&self) -> Vec<RecordedCommand> {
        self.0.lock().clone()
    }

    /// Drain the log
    pub fn take(&self) -> Vec<RecordedCommand> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// What a texture view points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedView {
    pub texture: Option<TextureHandle>,
    pub desc: TextureViewDescriptor,
    /// Edge lengths of the mip the view starts at
    pub extent: (u32, u32),
}

/// Headless backend that records commands instead of executing them
pub struct RecordingBackend {
    width: u32,
    height: u32,
    max_texture_dimension: u32,
    swapchain_format: TextureFormat,
    log: CommandLog,

    buffers: HashMap<u64, BufferDescriptor>,
    textures: HashMap<u64, TextureDescriptor>,
    views: HashMap<u64, RecordedView>,
    /// Every view ever created, including destroyed ones
    view_history: HashMap<u64, RecordedView>,
    bind_groups: HashSet<u64>,
    pipelines: HashMap<u64, RenderPipelineDescriptor>,
    layouts: HashMap<u64, Vec<BindGroupLayoutEntry>>,

    next_id: u64,
    in_render_pass: bool,
    frame_open: bool,
    /// Creation fails once this many textures are live
    texture_budget: Option<usize>,
    /// Attachments of passes recorded since the last submit
    pending_attachments: Vec<TextureViewHandle>,
    /// Attachments that were already destroyed when their pass was submitted
    dangling_attachments: Vec<TextureViewHandle>,
}

impl RecordingBackend {
    /// Create a backend whose swapchain has the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            max_texture_dimension: 8192,
            swapchain_format: TextureFormat::Bgra8UnormSrgb,
            log: CommandLog::default(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            view_history: HashMap::new(),
            bind_groups: HashSet::new(),
            pipelines: HashMap::new(),
            layouts: HashMap::new(),
            next_id: 1,
            in_render_pass: false,
            frame_open: false,
            texture_budget: None,
            pending_attachments: Vec::new(),
            dangling_attachments: Vec::new(),
        }
    }

    pub fn with_max_texture_dimension(mut self, max: u32) -> Self {
        self.max_texture_dimension = max;
        self
    }

    /// Make `create_texture` fail with `OutOfMemory` while `budget` textures are live
    pub fn set_texture_budget(&mut self, budget: Option<usize>) {
        self.texture_budget = budget;
    }

    /// Handle to the command log that stays valid after the backend moves
    pub fn command_log(&self) -> CommandLog {
        self.log.clone()
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0)
    }

    pub fn view(&self, view: TextureViewHandle) -> Option<RecordedView> {
        self.views.get(&view.0).copied()
    }

    /// Like [`view`](Self::view) but also finds views that have since been destroyed
    pub fn view_ever_created(&self, view: TextureViewHandle) -> Option<RecordedView> {
        self.view_history.get(&view.0).copied()
    }

    /// Pass attachments that no longer existed when their work was submitted
    pub fn dangling_attachments(&self) -> &[TextureViewHandle] {
        &self.dangling_attachments
    }

    pub fn pipeline_descriptor(
        &self,
        pipeline: RenderPipelineHandle,
    ) -> Option<&RenderPipelineDescriptor> {
        self.pipelines.get(&pipeline.0)
    }

    /// Find a pipeline by label
    pub fn pipeline_by_label(&self, label: &str) -> Option<&RenderPipelineDescriptor> {
        self.pipelines
            .values()
            .find(|desc| desc.label.as_deref() == Some(label))
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Views created with `create_texture_view` that are still alive
    pub fn live_view_count(&self) -> usize {
        self.views.values().filter(|view| view.texture.is_some()).count()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_bind_group_count(&self) -> usize {
        self.bind_groups.len()
    }

    fn flush(&mut self) {
        self.record(RecordedCommand::Submit);
        let views = &self.views;
        let dead = self
            .pending_attachments
            .drain(..)
            .filter(|view| !views.contains_key(&view.0));
        self.dangling_attachments.extend(dead);
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&self, command: RecordedCommand) {
        self.log.push(command);
    }

    fn record_in_pass(&self, command: RecordedCommand) {
        if self.in_render_pass {
            self.record(command);
        } else {
            log::warn!("RecordingBackend: {:?} outside of a render pass", command);
        }
    }
}

impl GraphicsBackend for RecordingBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.width = width.min(self.max_texture_dimension);
            self.height = height.min(self.max_texture_dimension);
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dimension
    }

    fn begin_frame(&mut self) -> BackendResult<FrameTarget> {
        let id = self.allocate_id();
        let view = RecordedView {
            texture: None,
            desc: TextureViewDescriptor::default(),
            extent: (self.width, self.height),
        };
        self.views.insert(id, view);
        self.view_history.insert(id, view);
        self.frame_open = true;
        let swapchain_view = TextureViewHandle(id);
        self.record(RecordedCommand::BeginFrame { swapchain_view });
        Ok(FrameTarget {
            swapchain_view,
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.flush();
        if self.frame_open {
            self.record(RecordedCommand::Present);
            self.frame_open = false;
        }
        Ok(())
    }

    fn discard_frame(&mut self) {
        self.record(RecordedCommand::DiscardFrame);
        self.pending_attachments.clear();
        self.in_render_pass = false;
        self.frame_open = false;
    }

    fn submit(&mut self) {
        self.flush();
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.swapchain_format
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?}: zero-sized buffer",
                desc.label
            )));
        }
        let id = self.allocate_id();
        self.buffers.insert(id, desc.clone());
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let desc = BufferDescriptor {
            size: data.len() as u64,
            ..desc.clone()
        };
        self.create_buffer(&desc)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, _offset: u64, data: &[u8]) {
        self.record(RecordedCommand::WriteBuffer {
            buffer,
            size: data.len(),
        });
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0
            || desc.height == 0
            || desc.width > self.max_texture_dimension
            || desc.height > self.max_texture_dimension
        {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: invalid size {}x{}",
                desc.label, desc.width, desc.height
            )));
        }
        if let Some(budget) = self.texture_budget {
            if self.textures.len() >= budget {
                return Err(BackendError::OutOfMemory);
            }
        }
        if desc.dimension == TextureDimension::Cube && desc.array_layers != 6 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: cube textures need 6 layers",
                desc.label
            )));
        }
        let id = self.allocate_id();
        self.textures.insert(id, desc.clone());
        Ok(TextureHandle(id))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "texture",
                id: texture.0,
            })?;
        if desc.base_mip_level >= tex.mip_levels || desc.base_array_layer >= tex.array_layers {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: view outside of texture",
                tex.label
            )));
        }
        let extent = (
            (tex.width >> desc.base_mip_level).max(1),
            (tex.height >> desc.base_mip_level).max(1),
        );
        let id = self.allocate_id();
        let view = RecordedView {
            texture: Some(texture),
            desc: *desc,
            extent,
        };
        self.views.insert(id, view);
        self.view_history.insert(id, view);
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, region: &TextureWrite, _data: &[u8]) {
        self.record(RecordedCommand::WriteTexture {
            texture,
            region: *region,
        });
    }

    fn create_sampler(&mut self, _desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        Ok(SamplerHandle(self.allocate_id()))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let id = self.allocate_id();
        self.layouts.insert(id, entries.to_vec());
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout_entries = self
            .layouts
            .get(&layout.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "bind group layout",
                id: layout.0,
            })?;
        if layout_entries.len() != entries.len() {
            return Err(BackendError::PipelineCreationFailed(format!(
                "bind group has {} entries, layout expects {}",
                entries.len(),
                layout_entries.len()
            )));
        }
        let id = self.allocate_id();
        self.bind_groups.insert(id);
        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        let id = self.allocate_id();
        self.pipelines.insert(id, desc.clone());
        Ok(RenderPipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.in_render_pass = true;
        self.pending_attachments.extend(
            desc.color_attachments
                .iter()
                .map(|a| a.view)
                .chain(desc.depth_stencil_attachment.as_ref().map(|d| d.view)),
        );
        self.record(RecordedCommand::BeginRenderPass {
            label: desc.label.clone(),
            color_targets: desc.color_attachments.iter().map(|a| a.view).collect(),
            color_loads: desc
                .color_attachments
                .iter()
                .map(|a| a.load_op.clone())
                .collect(),
            depth_target: desc.depth_stencil_attachment.as_ref().map(|d| d.view),
            depth_load: desc
                .depth_stencil_attachment
                .as_ref()
                .map(|d| d.depth_load_op.clone()),
        });
    }

    fn end_render_pass(&mut self) {
        if self.in_render_pass {
            self.record(RecordedCommand::EndRenderPass);
            self.in_render_pass = false;
        }
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        let label = self
            .pipelines
            .get(&pipeline.0)
            .and_then(|desc| desc.label.clone());
        self.record_in_pass(RecordedCommand::SetPipeline { label });
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        self.record_in_pass(RecordedCommand::SetBindGroup { index, bind_group });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, _offset: u64) {
        self.record_in_pass(RecordedCommand::SetVertexBuffer { slot, buffer });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, _offset: u64) {
        self.record_in_pass(RecordedCommand::SetIndexBuffer { buffer });
    }

    fn set_viewport(&mut self, _x: f32, _y: f32, width: f32, height: f32) {
        self.record_in_pass(RecordedCommand::SetViewport { width, height });
    }

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        self.record_in_pass(RecordedCommand::Draw {
            vertex_count: vertices.len() as u32,
            instance_count: instances.len() as u32,
        });
    }

    fn draw_indexed(&mut self, indices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        self.record_in_pass(RecordedCommand::DrawIndexed {
            index_count: indices.len() as u32,
            instance_count: instances.len() as u32,
        });
    }

    fn copy_texture_to_texture(
        &mut self,
        src: TextureHandle,
        dst: TextureHandle,
        width: u32,
        height: u32,
    ) {
        self.record(RecordedCommand::CopyTexture {
            src,
            dst,
            width,
            height,
        });
    }

    fn transition_texture(&mut self, texture: TextureHandle, from: ResourceAccess, to: ResourceAccess) {
        self.record(RecordedCommand::Transition { texture, from, to });
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
        self.views.retain(|_, view| view.texture != Some(texture));
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.views.remove(&view.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_face_view_is_addressable() {
        let mut backend = RecordingBackend::new(64, 64);
        let desc = TextureDescriptor::cube(
            "env",
            32,
            3,
            TextureFormat::Rgba16Float,
            TextureUsage::RENDER_ATTACHMENT,
        );
        let tex = backend.create_texture(&desc).unwrap();
        let view = backend
            .create_texture_view(tex, &TextureViewDescriptor::cube_face(5, 2))
            .unwrap();
        let recorded = backend.view(view).unwrap();
        assert_eq!(recorded.texture, Some(tex));
        assert_eq!(recorded.desc.base_array_layer, 5);

        let out_of_range = backend.create_texture_view(tex, &TextureViewDescriptor::cube_face(0, 3));
        assert!(out_of_range.is_err());
    }

    #[test]
    fn test_rejects_textures_past_device_limit() {
        let mut backend = RecordingBackend::new(64, 64).with_max_texture_dimension(256);
        let desc = TextureDescriptor {
            width: 512,
            height: 16,
            ..Default::default()
        };
        assert!(backend.create_texture(&desc).is_err());
    }

    #[test]
    fn test_draws_outside_pass_are_not_recorded() {
        let mut backend = RecordingBackend::new(8, 8);
        let log = backend.command_log();
        backend.draw(0..3, 0..1);
        assert!(log.is_empty());
    }

    #[test]
    fn test_attachment_destroyed_before_submit_is_reported() {
        let mut backend = RecordingBackend::new(8, 8);
        let tex = backend.create_texture(&TextureDescriptor::default()).unwrap();
        let view = backend
            .create_texture_view(tex, &TextureViewDescriptor::default())
            .unwrap();
        backend.begin_render_pass(&RenderPassDescriptor {
            label: None,
            color_attachments: vec![ColorAttachment {
                view,
                load_op: LoadOp::Load,
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        });
        backend.end_render_pass();
        backend.destroy_texture(tex);
        backend.submit();

        assert_eq!(backend.dangling_attachments(), &[view]);
        assert_eq!(backend.view_ever_created(view).unwrap().extent, (1, 1));
    }

    #[test]
    fn test_texture_budget_fails_creation() {
        let mut backend = RecordingBackend::new(8, 8);
        backend.set_texture_budget(Some(1));
        assert!(backend.create_texture(&TextureDescriptor::default()).is_ok());
        assert!(matches!(
            backend.create_texture(&TextureDescriptor::default()),
            Err(BackendError::OutOfMemory)
        ));
    }

    #[test]
    fn test_destroying_texture_drops_its_views() {
        let mut backend = RecordingBackend::new(8, 8);
        let tex = backend.create_texture(&TextureDescriptor::default()).unwrap();
        let view = backend
            .create_texture_view(tex, &TextureViewDescriptor::default())
            .unwrap();
        backend.destroy_texture(tex);
        assert!(backend.view(view).is_none());
        assert_eq!(backend.live_texture_count(), 0);
    }
}
