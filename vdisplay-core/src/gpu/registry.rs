//! Registry of cross-process swap texture sets
//!
//! A client process creates a set of three shared textures and refers to
//! them afterwards only by their opaque handles. The registry maps each
//! handle back to its set and slot and tracks which process owns the set.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use super::{GpuDevice, PixelFormat, ShareMode, SharedHandle, Texture, TextureDesc};
use crate::error::{DisplayError, Result, ResultExt};

/// Textures per swap set
pub const SWAP_SET_SIZE: usize = 3;

type SetId = u64;

struct SwapTextureSet {
    owner_pid: u32,
    textures: [Arc<Texture>; SWAP_SET_SIZE],
}

/// Handle → (set, slot) mapping with per-owner bulk release
pub struct SwapTextureRegistry {
    device: Arc<dyn GpuDevice>,
    sets: HashMap<SetId, SwapTextureSet>,
    handles: BTreeMap<SharedHandle, (SetId, usize)>,
    next_set: SetId,
}

impl SwapTextureRegistry {
    pub fn new(device: Arc<dyn GpuDevice>) -> Self {
        Self {
            device,
            sets: HashMap::new(),
            handles: BTreeMap::new(),
            next_set: 1,
        }
    }

    /// Create a set of shared textures owned by `owner_pid`.
    ///
    /// Returns the handles in slot order.
    pub fn create(
        &mut self,
        owner_pid: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<[SharedHandle; SWAP_SET_SIZE]> {
        let desc = TextureDesc::new(width, height, format)
            .render_target()
            .shader_resource()
            .shared(ShareMode::Shared);

        let mut created = Vec::with_capacity(SWAP_SET_SIZE);
        for slot in 0..SWAP_SET_SIZE {
            match self.device.create_texture(&desc) {
                Ok(texture) => created.push(texture),
                Err(e) => {
                    self.release_textures(&created);
                    return Err(e).context(format!("Failed to create swap texture {}", slot));
                }
            }
        }

        let textures: [Arc<Texture>; SWAP_SET_SIZE] = created
            .try_into()
            .map_err(|_| DisplayError::gpu("Swap set is missing textures"))?;
        let mut handles = [0; SWAP_SET_SIZE];
        let id = self.next_set;
        self.next_set += 1;
        for (slot, texture) in textures.iter().enumerate() {
            // Created with ShareMode::Shared, so the device always assigns a handle
            let handle = texture.shared_handle().unwrap_or_default();
            handles[slot] = handle;
            self.handles.insert(handle, (id, slot));
        }
        self.sets.insert(
            id,
            SwapTextureSet {
                owner_pid,
                textures,
            },
        );

        debug!(
            "Swap set {} for pid {}: {}x{} {} handles {:x?}",
            id, owner_pid, width, height, format, handles
        );
        Ok(handles)
    }

    /// Destroy the set containing `handle`. Any one of the set's handles
    /// releases the whole set. Returns false for unknown handles.
    pub fn destroy(&mut self, handle: SharedHandle) -> bool {
        let Some(&(id, _)) = self.handles.get(&handle) else {
            return false;
        };
        self.remove_set(id);
        true
    }

    /// Destroy every set owned by `owner_pid`; returns how many were released
    pub fn destroy_all(&mut self, owner_pid: u32) -> usize {
        let ids: Vec<SetId> = self
            .sets
            .iter()
            .filter(|(_, set)| set.owner_pid == owner_pid)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.remove_set(*id);
        }
        if !ids.is_empty() {
            info!("Released {} swap sets owned by pid {}", ids.len(), owner_pid);
        }
        ids.len()
    }

    /// Texture behind a handle
    pub fn lookup(&self, handle: SharedHandle) -> Option<Arc<Texture>> {
        let (id, slot) = self.handles.get(&handle)?;
        self.sets.get(id).map(|set| set.textures[*slot].clone())
    }

    /// Owning process and slot index of a handle
    pub fn owner(&self, handle: SharedHandle) -> Option<(u32, usize)> {
        let (id, slot) = self.handles.get(&handle)?;
        self.sets.get(id).map(|set| (set.owner_pid, *slot))
    }

    /// All registered handles in ascending order
    pub fn handles(&self) -> impl Iterator<Item = SharedHandle> + '_ {
        self.handles.keys().copied()
    }

    /// Number of live sets
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Advance per-eye swap indices to the next slot
    pub fn next_index(indices: [usize; 2]) -> [usize; 2] {
        indices.map(|i| (i + 1) % SWAP_SET_SIZE)
    }

    fn remove_set(&mut self, id: SetId) {
        if let Some(set) = self.sets.remove(&id) {
            for texture in &set.textures {
                if let Some(handle) = texture.shared_handle() {
                    self.handles.remove(&handle);
                }
            }
            self.release_textures(&set.textures);
            debug!("Destroyed swap set {} (pid {})", id, set.owner_pid);
        }
    }

    fn release_textures(&self, textures: &[Arc<Texture>]) {
        for handle in textures.iter().filter_map(|t| t.shared_handle()) {
            self.device.release_shared_texture(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareDevice;

    fn registry() -> (Arc<SoftwareDevice>, SwapTextureRegistry) {
        let device = Arc::new(SoftwareDevice::new());
        let registry = SwapTextureRegistry::new(device.clone());
        (device, registry)
    }

    #[test]
    fn test_create_and_lookup() {
        let (device, mut registry) = registry();
        let handles = registry.create(100, 8, 8, PixelFormat::Bgra8).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(device.shared_texture_count(), 3);
        for (slot, handle) in handles.iter().enumerate() {
            assert_eq!(registry.owner(*handle), Some((100, slot)));
            assert_eq!(registry.lookup(*handle).unwrap().width(), 8);
        }
    }

    #[test]
    fn test_destroy_by_any_handle_releases_set() {
        let (device, mut registry) = registry();
        let handles = registry.create(100, 8, 8, PixelFormat::Bgra8).unwrap();

        assert!(registry.destroy(handles[1]));
        assert!(registry.is_empty());
        assert!(registry.lookup(handles[0]).is_none());
        assert_eq!(device.shared_texture_count(), 0);
        assert!(!registry.destroy(handles[2]));
    }

    #[test]
    fn test_destroy_all_for_owner() {
        let (_device, mut registry) = registry();
        registry.create(100, 4, 4, PixelFormat::Bgra8).unwrap();
        registry.create(100, 4, 4, PixelFormat::Bgra8).unwrap();
        let kept = registry.create(200, 4, 4, PixelFormat::Rgba8).unwrap();

        assert_eq!(registry.destroy_all(100), 2);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.handles().collect::<Vec<_>>(), kept.to_vec());
        assert_eq!(registry.destroy_all(100), 0);
    }

    #[test]
    fn test_next_index_wraps() {
        assert_eq!(SwapTextureRegistry::next_index([0, 0]), [1, 1]);
        assert_eq!(SwapTextureRegistry::next_index([2, 1]), [0, 2]);
    }
}
