//! Offscreen render targets
//!
//! A [`SurfaceDescriptor`] lists the attachments of a render target. The
//! [`FramebufferBuilder`] validates the combination once and allocates the
//! backing textures; the resulting [`Framebuffer`] owns them until
//! [`Framebuffer::destroy`].

use crate::backend::traits::*;
use crate::backend::types::*;
use thiserror::Error;

/// Colour attachment limit shared by every backend we target
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// What an attachment holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentRole {
    /// World-space position in rgb, metallic in a
    Position,
    /// World-space normal in rgb, roughness in a
    Normal,
    /// Albedo in rgb, ambient occlusion in a
    Albedo,
    /// Generic colour output
    Color,
    Depth,
}

impl AttachmentRole {
    pub fn is_depth(&self) -> bool {
        matches!(self, AttachmentRole::Depth)
    }
}

/// One attachment of a surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceAttachment {
    pub role: AttachmentRole,
    pub format: TextureFormat,
    pub filter: FilterMode,
    pub wrap: AddressMode,
    /// Sampled by a later pass, as opposed to only drawn into
    pub sampled: bool,
}

impl SurfaceAttachment {
    pub fn color(role: AttachmentRole, format: TextureFormat) -> Self {
        Self {
            role,
            format,
            filter: FilterMode::Nearest,
            wrap: AddressMode::ClampToEdge,
            sampled: true,
        }
    }

    pub fn depth(format: TextureFormat) -> Self {
        Self {
            role: AttachmentRole::Depth,
            format,
            filter: FilterMode::Nearest,
            wrap: AddressMode::ClampToEdge,
            sampled: false,
        }
    }

    pub fn with_filter(mut self, filter: FilterMode) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_wrap(mut self, wrap: AddressMode) -> Self {
        self.wrap = wrap;
        self
    }

    pub fn sampled(mut self, sampled: bool) -> Self {
        self.sampled = sampled;
        self
    }

    fn usage(&self) -> TextureUsage {
        let mut usage =
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC | TextureUsage::COPY_DST;
        if self.sampled {
            usage = usage | TextureUsage::TEXTURE_BINDING;
        }
        usage
    }
}

/// Declares the attachments of an offscreen render target
#[derive(Debug, Clone)]
pub struct SurfaceDescriptor {
    pub label: String,
    pub attachments: Vec<SurfaceAttachment>,
    /// Adds a Depth32Float attachment when none is declared
    pub depth_test: bool,
}

impl SurfaceDescriptor {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            attachments: Vec::new(),
            depth_test: false,
        }
    }

    pub fn with_attachment(mut self, attachment: SurfaceAttachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_depth_test(mut self, depth_test: bool) -> Self {
        self.depth_test = depth_test;
        self
    }

    /// Position+metallic, normal+roughness, albedo+ao and depth
    pub fn gbuffer() -> Self {
        Self::new("G-Buffer")
            .with_attachment(SurfaceAttachment::color(
                AttachmentRole::Position,
                TextureFormat::Rgba16Float,
            ))
            .with_attachment(SurfaceAttachment::color(
                AttachmentRole::Normal,
                TextureFormat::Rgba16Float,
            ))
            .with_attachment(SurfaceAttachment::color(
                AttachmentRole::Albedo,
                TextureFormat::Rgba8Unorm,
            ))
            .with_attachment(SurfaceAttachment::depth(TextureFormat::Depth32Float))
    }

    /// Depth-only target shared by cubemap captures.
    ///
    /// The colour target of each capture draw is a face of the cubemap being
    /// produced, so only the depth buffer lives here.
    pub fn capture(depth_format: TextureFormat) -> Self {
        Self::new("Capture").with_attachment(SurfaceAttachment::depth(depth_format))
    }

    /// Depth buffer paired with the swapchain for forward draws
    pub fn presentation_depth() -> Self {
        Self::new("Presentation Depth")
            .with_attachment(SurfaceAttachment::depth(TextureFormat::Depth32Float))
    }

    fn color_attachments(&self) -> impl Iterator<Item = &SurfaceAttachment> {
        self.attachments.iter().filter(|a| !a.role.is_depth())
    }

    fn depth_attachment(&self) -> Option<&SurfaceAttachment> {
        self.attachments.iter().find(|a| a.role.is_depth())
    }
}

/// Framebuffer errors
#[derive(Error, Debug)]
pub enum FramebufferError {
    #[error("Invalid framebuffer size {width}x{height} (limit {max})")]
    InvalidSize { width: u32, height: u32, max: u32 },
    #[error("Surface '{0}' has no attachments")]
    NoAttachments(String),
    #[error("Attachment {role:?} cannot use format {format:?}")]
    FormatMismatch {
        role: AttachmentRole,
        format: TextureFormat,
    },
    #[error("Surface declares more than one depth attachment")]
    MultipleDepthAttachments,
    #[error("Attachment role {0:?} declared twice")]
    DuplicateRole(AttachmentRole),
    #[error("{0} colour attachments exceed the limit of 8")]
    TooManyColorAttachments(usize),
    #[error("No attachment with role {0:?}")]
    MissingAttachment(AttachmentRole),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Allocated attachment
#[derive(Debug, Clone, Copy)]
pub struct FramebufferAttachment {
    pub desc: SurfaceAttachment,
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
    pub sampler: SamplerHandle,
}

/// A complete, allocated set of attachments
#[derive(Debug)]
pub struct Framebuffer {
    descriptor: SurfaceDescriptor,
    width: u32,
    height: u32,
    attachments: Vec<FramebufferAttachment>,
}

/// Validates surface descriptors and allocates framebuffers
pub struct FramebufferBuilder;

impl FramebufferBuilder {
    /// Check that a descriptor can be realised at the given size
    pub fn validate(
        descriptor: &SurfaceDescriptor,
        width: u32,
        height: u32,
        max_dimension: u32,
    ) -> Result<(), FramebufferError> {
        if width == 0 || height == 0 || width > max_dimension || height > max_dimension {
            return Err(FramebufferError::InvalidSize {
                width,
                height,
                max: max_dimension,
            });
        }
        if descriptor.attachments.is_empty() && !descriptor.depth_test {
            return Err(FramebufferError::NoAttachments(descriptor.label.clone()));
        }

        let mut seen = Vec::with_capacity(descriptor.attachments.len());
        for attachment in &descriptor.attachments {
            let format_ok = if attachment.role.is_depth() {
                attachment.format.is_depth()
            } else {
                attachment.format.is_color_renderable()
            };
            if !format_ok {
                return Err(FramebufferError::FormatMismatch {
                    role: attachment.role,
                    format: attachment.format,
                });
            }
            if seen.contains(&attachment.role) {
                return Err(if attachment.role.is_depth() {
                    FramebufferError::MultipleDepthAttachments
                } else {
                    FramebufferError::DuplicateRole(attachment.role)
                });
            }
            seen.push(attachment.role);
        }

        let colors = descriptor.color_attachments().count();
        if colors > MAX_COLOR_ATTACHMENTS {
            return Err(FramebufferError::TooManyColorAttachments(colors));
        }
        Ok(())
    }

    /// Validate `descriptor` and allocate every attachment in declaration order
    pub fn build<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        descriptor: &SurfaceDescriptor,
        width: u32,
        height: u32,
    ) -> Result<Framebuffer, FramebufferError> {
        Self::validate(descriptor, width, height, backend.max_texture_dimension())?;

        let mut descriptor = descriptor.clone();
        if descriptor.depth_test && descriptor.depth_attachment().is_none() {
            descriptor
                .attachments
                .push(SurfaceAttachment::depth(TextureFormat::Depth32Float));
        }

        let textures = allocate_textures(backend, &descriptor, width, height)?;
        let mut attachments = Vec::with_capacity(textures.len());
        for (desc, &(texture, view)) in descriptor.attachments.iter().zip(&textures) {
            let sampler = backend.create_sampler(&SamplerDescriptor {
                label: Some(format!("{} {:?} Sampler", descriptor.label, desc.role)),
                mag_filter: desc.filter,
                min_filter: desc.filter,
                mipmap_filter: FilterMode::Nearest,
                address_mode: desc.wrap,
            });
            let sampler = match sampler {
                Ok(sampler) => sampler,
                Err(err) => {
                    release_textures(backend, &textures);
                    return Err(err.into());
                }
            };
            attachments.push(FramebufferAttachment {
                desc: *desc,
                texture,
                view,
                sampler,
            });
        }

        log::debug!(
            "Framebuffer '{}' built at {}x{} with {} attachments",
            descriptor.label,
            width,
            height,
            attachments.len()
        );

        Ok(Framebuffer {
            descriptor,
            width,
            height,
            attachments,
        })
    }
}

fn allocate_attachment<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    label: &str,
    desc: &SurfaceAttachment,
    width: u32,
    height: u32,
) -> BackendResult<(TextureHandle, TextureViewHandle)> {
    let texture = backend.create_texture(&TextureDescriptor {
        label: Some(format!("{} {:?}", label, desc.role)),
        width,
        height,
        format: desc.format,
        usage: desc.usage(),
        ..Default::default()
    })?;
    match backend.create_texture_view(texture, &TextureViewDescriptor::default()) {
        Ok(view) => Ok((texture, view)),
        Err(err) => {
            backend.destroy_texture(texture);
            Err(err)
        }
    }
}

/// Allocate a texture for every attachment of `descriptor`, or none at all
fn allocate_textures<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    descriptor: &SurfaceDescriptor,
    width: u32,
    height: u32,
) -> BackendResult<Vec<(TextureHandle, TextureViewHandle)>> {
    let mut textures = Vec::with_capacity(descriptor.attachments.len());
    for desc in &descriptor.attachments {
        match allocate_attachment(backend, &descriptor.label, desc, width, height) {
            Ok(allocated) => textures.push(allocated),
            Err(err) => {
                release_textures(backend, &textures);
                return Err(err);
            }
        }
    }
    Ok(textures)
}

fn release_textures<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    textures: &[(TextureHandle, TextureViewHandle)],
) {
    for &(texture, _) in textures {
        backend.destroy_texture(texture);
    }
}

/// Attachments allocated at a new size that have not replaced the old ones yet
#[derive(Debug)]
#[must_use = "pass to Framebuffer::apply_resize or discard"]
pub struct ResizedAttachments {
    width: u32,
    height: u32,
    textures: Vec<(TextureHandle, TextureViewHandle)>,
}

impl ResizedAttachments {
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Release the new textures and keep the framebuffer as it was
    pub fn discard<B: GraphicsBackend + ?Sized>(self, backend: &mut B) {
        release_textures(backend, &self.textures);
    }
}

impl Framebuffer {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn descriptor(&self) -> &SurfaceDescriptor {
        &self.descriptor
    }

    pub fn attachments(&self) -> &[FramebufferAttachment] {
        &self.attachments
    }

    pub fn attachment(&self, role: AttachmentRole) -> Option<&FramebufferAttachment> {
        self.attachments.iter().find(|a| a.desc.role == role)
    }

    /// Number of colour outputs a pass drawing into this framebuffer writes
    pub fn drawable_count(&self) -> usize {
        self.attachments.iter().filter(|a| !a.desc.role.is_depth()).count()
    }

    pub fn color_view(&self, role: AttachmentRole) -> Option<TextureViewHandle> {
        if role.is_depth() {
            return None;
        }
        self.attachment(role).map(|a| a.view)
    }

    pub fn depth_view(&self) -> Option<TextureViewHandle> {
        self.attachment(AttachmentRole::Depth).map(|a| a.view)
    }

    pub fn depth_texture(&self) -> Option<TextureHandle> {
        self.attachment(AttachmentRole::Depth).map(|a| a.texture)
    }

    pub fn depth_format(&self) -> Option<TextureFormat> {
        self.attachment(AttachmentRole::Depth).map(|a| a.desc.format)
    }

    /// Colour formats in attachment order, for pipeline creation
    pub fn color_formats(&self) -> Vec<TextureFormat> {
        self.attachments
            .iter()
            .filter(|a| !a.desc.role.is_depth())
            .map(|a| a.desc.format)
            .collect()
    }

    /// Colour attachments in declaration order, all cleared to `clear`
    pub fn color_attachments(&self, clear: [f32; 4]) -> Vec<ColorAttachment> {
        self.attachments
            .iter()
            .filter(|a| !a.desc.role.is_depth())
            .map(|a| ColorAttachment {
                view: a.view,
                load_op: LoadOp::Clear(clear),
                store_op: StoreOp::Store,
            })
            .collect()
    }

    /// Depth attachment cleared to the far plane
    pub fn depth_attachment(&self) -> Option<DepthStencilAttachment> {
        self.depth_view().map(|view| DepthStencilAttachment {
            view,
            depth_load_op: LoadOp::Clear([1.0, 0.0, 0.0, 0.0]),
            depth_store_op: StoreOp::Store,
            depth_clear_value: 1.0,
        })
    }

    /// Allocate replacement attachments at a new size without touching the
    /// current ones. `None` when the size is unchanged.
    pub fn allocate_resize<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> Result<Option<ResizedAttachments>, FramebufferError> {
        if (width, height) == (self.width, self.height) {
            return Ok(None);
        }
        FramebufferBuilder::validate(
            &self.descriptor,
            width,
            height,
            backend.max_texture_dimension(),
        )?;
        let textures = allocate_textures(backend, &self.descriptor, width, height)?;
        Ok(Some(ResizedAttachments {
            width,
            height,
            textures,
        }))
    }

    /// Swap in attachments from [`allocate_resize`](Self::allocate_resize) and release the old ones
    pub fn apply_resize<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        resized: ResizedAttachments,
    ) {
        for (attachment, (texture, view)) in self.attachments.iter_mut().zip(resized.textures) {
            backend.destroy_texture(attachment.texture);
            attachment.texture = texture;
            attachment.view = view;
        }
        log::debug!(
            "Framebuffer '{}' resized {}x{} -> {}x{}",
            self.descriptor.label,
            self.width,
            self.height,
            resized.width,
            resized.height
        );
        self.width = resized.width;
        self.height = resized.height;
    }

    /// Reallocate every attachment at a new size.
    ///
    /// On failure the framebuffer keeps its old attachments. On success, handles
    /// held elsewhere (bind groups in particular) become stale and must be
    /// recreated by the caller.
    pub fn resize<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> Result<bool, FramebufferError> {
        match self.allocate_resize(backend, width, height)? {
            Some(resized) => {
                self.apply_resize(backend, resized);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Release every attachment texture
    pub fn destroy<B: GraphicsBackend + ?Sized>(self, backend: &mut B) {
        for attachment in self.attachments {
            backend.destroy_texture(attachment.texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;

    #[test]
    fn test_gbuffer_has_three_drawables_and_depth() {
        let mut backend = RecordingBackend::new(800, 600);
        let fb = FramebufferBuilder::build(&mut backend, &SurfaceDescriptor::gbuffer(), 800, 600)
            .unwrap();

        assert_eq!(fb.drawable_count(), 3);
        assert!(fb.depth_view().is_some());
        assert_eq!(fb.color_attachments([0.0; 4]).len(), 3);
        assert_eq!(backend.live_texture_count(), 4);

        let position = fb.attachment(AttachmentRole::Position).unwrap();
        let desc = backend.texture_descriptor(position.texture).unwrap();
        assert_eq!((desc.width, desc.height), (800, 600));
        assert_eq!(desc.format, TextureFormat::Rgba16Float);
    }

    #[test]
    fn test_depth_test_adds_implicit_depth() {
        let mut backend = RecordingBackend::new(64, 64);
        let descriptor = SurfaceDescriptor::new("Color Only")
            .with_attachment(SurfaceAttachment::color(
                AttachmentRole::Color,
                TextureFormat::Rgba8Unorm,
            ))
            .with_depth_test(true);
        let fb = FramebufferBuilder::build(&mut backend, &descriptor, 64, 64).unwrap();
        assert_eq!(fb.depth_format(), Some(TextureFormat::Depth32Float));
        assert_eq!(fb.drawable_count(), 1);
    }

    #[test]
    fn test_rejects_zero_and_oversized() {
        let descriptor = SurfaceDescriptor::gbuffer();
        assert!(matches!(
            FramebufferBuilder::validate(&descriptor, 0, 10, 4096),
            Err(FramebufferError::InvalidSize { .. })
        ));
        assert!(matches!(
            FramebufferBuilder::validate(&descriptor, 8192, 10, 4096),
            Err(FramebufferError::InvalidSize { .. })
        ));
    }

    #[test]
    fn test_rejects_incomplete_combinations() {
        let depth_as_color = SurfaceDescriptor::new("bad").with_attachment(
            SurfaceAttachment::color(AttachmentRole::Albedo, TextureFormat::Depth32Float),
        );
        assert!(matches!(
            FramebufferBuilder::validate(&depth_as_color, 4, 4, 64),
            Err(FramebufferError::FormatMismatch { .. })
        ));

        let two_depths = SurfaceDescriptor::new("bad")
            .with_attachment(SurfaceAttachment::depth(TextureFormat::Depth32Float))
            .with_attachment(SurfaceAttachment::depth(TextureFormat::Depth24Plus));
        assert!(matches!(
            FramebufferBuilder::validate(&two_depths, 4, 4, 64),
            Err(FramebufferError::MultipleDepthAttachments)
        ));

        let duplicate = SurfaceDescriptor::new("bad")
            .with_attachment(SurfaceAttachment::color(
                AttachmentRole::Normal,
                TextureFormat::Rgba16Float,
            ))
            .with_attachment(SurfaceAttachment::color(
                AttachmentRole::Normal,
                TextureFormat::Rgba16Float,
            ));
        assert!(matches!(
            FramebufferBuilder::validate(&duplicate, 4, 4, 64),
            Err(FramebufferError::DuplicateRole(AttachmentRole::Normal))
        ));

        assert!(matches!(
            FramebufferBuilder::validate(&SurfaceDescriptor::new("empty"), 4, 4, 64),
            Err(FramebufferError::NoAttachments(_))
        ));
    }

    #[test]
    fn test_resize_reallocates_and_noop_on_same_size() {
        let mut backend = RecordingBackend::new(320, 240);
        let mut fb =
            FramebufferBuilder::build(&mut backend, &SurfaceDescriptor::gbuffer(), 320, 240)
                .unwrap();
        let old_depth = fb.depth_texture().unwrap();

        assert!(!fb.resize(&mut backend, 320, 240).unwrap());
        assert_eq!(fb.depth_texture(), Some(old_depth));

        assert!(fb.resize(&mut backend, 640, 480).unwrap());
        let new_depth = fb.depth_texture().unwrap();
        assert_ne!(new_depth, old_depth);
        assert!(backend.texture_descriptor(old_depth).is_none());
        let desc = backend.texture_descriptor(new_depth).unwrap();
        assert_eq!((desc.width, desc.height), (640, 480));
        assert_eq!(backend.live_texture_count(), 4);

        fb.destroy(&mut backend);
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_failed_resize_keeps_old_attachments() {
        let mut backend = RecordingBackend::new(320, 240);
        let mut fb =
            FramebufferBuilder::build(&mut backend, &SurfaceDescriptor::gbuffer(), 320, 240)
                .unwrap();
        let before: Vec<TextureHandle> = fb.attachments().iter().map(|a| a.texture).collect();

        // Room for two of the four replacements
        backend.set_texture_budget(Some(6));
        assert!(matches!(
            fb.resize(&mut backend, 640, 480),
            Err(FramebufferError::Backend(BackendError::OutOfMemory))
        ));

        assert_eq!(fb.size(), (320, 240));
        assert_eq!(backend.live_texture_count(), 4);
        for (attachment, old) in fb.attachments().iter().zip(&before) {
            assert_eq!(attachment.texture, *old);
            let desc = backend.texture_descriptor(attachment.texture).unwrap();
            assert_eq!((desc.width, desc.height), (320, 240));
            assert!(backend.view(attachment.view).is_some());
        }

        backend.set_texture_budget(None);
        assert!(fb.resize(&mut backend, 640, 480).unwrap());
        assert_eq!(backend.live_texture_count(), 4);
    }

    #[test]
    fn test_failed_build_releases_partial_attachments() {
        let mut backend = RecordingBackend::new(64, 64);
        backend.set_texture_budget(Some(2));
        let result = FramebufferBuilder::build(&mut backend, &SurfaceDescriptor::gbuffer(), 64, 64);
        assert!(result.is_err());
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_discarded_resize_leaves_framebuffer_untouched() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut fb = FramebufferBuilder::build(
            &mut backend,
            &SurfaceDescriptor::presentation_depth(),
            64,
            64,
        )
        .unwrap();
        assert!(fb.allocate_resize(&mut backend, 64, 64).unwrap().is_none());

        let resized = fb.allocate_resize(&mut backend, 32, 32).unwrap().unwrap();
        assert_eq!(resized.size(), (32, 32));
        assert_eq!(backend.live_texture_count(), 2);
        resized.discard(&mut backend);
        assert_eq!(backend.live_texture_count(), 1);
        assert_eq!(fb.size(), (64, 64));

        let resized = fb.allocate_resize(&mut backend, 32, 32).unwrap().unwrap();
        fb.apply_resize(&mut backend, resized);
        assert_eq!(fb.size(), (32, 32));
        assert_eq!(backend.live_texture_count(), 1);
        fb.destroy(&mut backend);
    }

    #[test]
    fn test_capture_surface_is_depth_only() {
        let mut backend = RecordingBackend::new(16, 16);
        let fb = FramebufferBuilder::build(
            &mut backend,
            &SurfaceDescriptor::capture(TextureFormat::Depth32Float),
            512,
            512,
        )
        .unwrap();
        assert_eq!(fb.drawable_count(), 0);
        assert!(fb.color_view(AttachmentRole::Color).is_none());
        assert!(fb.depth_view().is_some());
    }
}
