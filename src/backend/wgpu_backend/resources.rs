//! Handle-indexed storage for the objects the wgpu backend owns

use crate::backend::traits::*;
use std::collections::HashMap;

/// One kind of GPU object keyed by handle id. Ids start at 1 and are never reused.
pub(super) struct Registry<T> {
    kind: &'static str,
    next_id: u64,
    items: HashMap<u64, T>,
}

impl<T> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            next_id: 1,
            items: HashMap::new(),
        }
    }

    /// Claim an id without storing anything under it
    pub fn reserve(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, item: T) -> u64 {
        let id = self.reserve();
        self.items.insert(id, item);
        id
    }

    pub fn get(&self, id: u64) -> BackendResult<&T> {
        self.items.get(&id).ok_or(BackendError::InvalidHandle {
            kind: self.kind,
            id,
        })
    }

    pub fn remove(&mut self, id: u64) -> Option<T> {
        self.items.remove(&id)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.items.retain(|_, item| keep(item));
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// View plus the id of the texture it was created from
pub(super) struct StoredView {
    pub texture: u64,
    pub view: wgpu::TextureView,
}

/// Swapchain image acquired for the current frame. The view drops before the texture.
pub(super) struct AcquiredFrame {
    pub view: wgpu::TextureView,
    pub texture: wgpu::SurfaceTexture,
    pub view_id: u64,
}

pub(super) struct Resources {
    pub buffers: Registry<wgpu::Buffer>,
    pub textures: Registry<wgpu::Texture>,
    pub views: Registry<StoredView>,
    pub samplers: Registry<wgpu::Sampler>,
    pub layouts: Registry<wgpu::BindGroupLayout>,
    pub bind_groups: Registry<wgpu::BindGroup>,
    pub pipelines: Registry<wgpu::RenderPipeline>,
}

impl Resources {
    pub fn new() -> Self {
        Self {
            buffers: Registry::new("buffer"),
            textures: Registry::new("texture"),
            views: Registry::new("texture view"),
            samplers: Registry::new("sampler"),
            layouts: Registry::new("bind group layout"),
            bind_groups: Registry::new("bind group"),
            pipelines: Registry::new("render pipeline"),
        }
    }

    /// Resolve a view handle; the frame's swapchain view shares the view id space.
    pub fn view<'a>(
        &'a self,
        frame: Option<&'a AcquiredFrame>,
        handle: TextureViewHandle,
    ) -> BackendResult<&'a wgpu::TextureView> {
        match frame {
            Some(frame) if frame.view_id == handle.0 => Ok(&frame.view),
            _ => self.views.get(handle.0).map(|stored| &stored.view),
        }
    }

    /// Drop a texture along with every view created from it
    pub fn remove_texture(&mut self, texture: TextureHandle) -> Option<wgpu::Texture> {
        self.views.retain(|stored| stored.texture != texture.0);
        self.textures.remove(texture.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_ids_are_not_reissued() {
        let mut registry: Registry<&str> = Registry::new("label");
        let a = registry.insert("a");
        let reserved = registry.reserve();
        let b = registry.insert("b");

        assert!(a < reserved && reserved < b);
        assert!(matches!(
            registry.get(reserved),
            Err(BackendError::InvalidHandle { kind: "label", .. })
        ));
        assert_eq!(registry.get(b).ok(), Some(&"b"));
    }

    #[test]
    fn test_retain_and_remove() {
        let mut registry = Registry::new("number");
        let ids: Vec<u64> = (0..6).map(|n| registry.insert(n)).collect();
        registry.retain(|n| n % 2 == 0);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.remove(ids[2]), Some(2));
        assert!(registry.remove(ids[1]).is_none());
    }
}
