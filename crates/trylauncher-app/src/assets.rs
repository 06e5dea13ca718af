//! Texture loading and caching.

use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use trylauncher_gpu::{
    mip_levels_for, upload_texture_rgba8, AllocatedImage, DeviceContext, GpuError,
    MemoryAllocator, ResourceManager, Transfer,
};

/// Asset loading failures.
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Asset not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
}

pub type Result<T> = std::result::Result<T, AssetError>;

/// Mip chain policy for loaded textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MipPolicy {
    /// Full chain down to 1x1.
    #[default]
    Full,
    /// Base level only.
    None,
}

/// Loads textures from disk under a root directory and keeps one GPU copy per path.
///
/// Textures live until [`unload`](Self::unload) or
/// [`unload_all`](Self::unload_all) releases them through the same
/// [`ResourceManager`] that created them.
pub struct AssetManager {
    root: PathBuf,
    mips: MipPolicy,
    textures: HashMap<PathBuf, AllocatedImage>,
}

impl AssetManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mips: MipPolicy::default(),
            textures: HashMap::new(),
        }
    }

    /// Set the mip chain policy for textures loaded from now on.
    #[must_use]
    pub const fn with_mips(mut self, mips: MipPolicy) -> Self {
        self.mips = mips;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load `path` (relative to the root) as an RGBA8 texture, or return the cached copy.
    pub fn load_texture<D, A>(
        &mut self,
        resources: &mut ResourceManager<D, A>,
        transfer: &mut Transfer<D>,
        path: impl AsRef<Path>,
    ) -> Result<&AllocatedImage>
    where
        D: DeviceContext,
        A: MemoryAllocator,
    {
        let key = path.as_ref().to_path_buf();
        if !self.textures.contains_key(&key) {
            let texture = self.upload(resources, transfer, &key)?;
            self.textures.insert(key.clone(), texture);
        }
        self.textures
            .get(&key)
            .ok_or(AssetError::NotFound(key))
    }

    fn upload<D, A>(
        &self,
        resources: &mut ResourceManager<D, A>,
        transfer: &mut Transfer<D>,
        key: &Path,
    ) -> Result<AllocatedImage>
    where
        D: DeviceContext,
        A: MemoryAllocator,
    {
        let full_path = self.root.join(key);
        if !full_path.is_file() {
            error!("Texture not found: {}", full_path.display());
            return Err(AssetError::NotFound(full_path));
        }

        let decoded = image::open(&full_path)
            .map_err(|source| {
                error!("Failed to decode {}: {source}", full_path.display());
                AssetError::Decode {
                    path: full_path.clone(),
                    source,
                }
            })?
            .into_rgba8();
        let (width, height) = decoded.dimensions();
        let mip_levels = match self.mips {
            MipPolicy::Full => mip_levels_for(width, height),
            MipPolicy::None => 1,
        };

        let texture =
            upload_texture_rgba8(resources, transfer, decoded.as_raw(), width, height, mip_levels)?;
        info!(
            "Loaded texture {} ({width}x{height}, {mip_levels} mips)",
            key.display()
        );
        Ok(texture)
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&AllocatedImage> {
        self.textures.get(path.as_ref())
    }

    pub fn is_loaded(&self, path: impl AsRef<Path>) -> bool {
        self.textures.contains_key(path.as_ref())
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Release one texture. Returns whether it was loaded.
    pub fn unload<D, A>(
        &mut self,
        resources: &mut ResourceManager<D, A>,
        path: impl AsRef<Path>,
    ) -> bool
    where
        D: DeviceContext,
        A: MemoryAllocator,
    {
        match self.textures.remove(path.as_ref()) {
            Some(texture) => {
                resources.destroy_image(texture);
                debug!("Unloaded texture {}", path.as_ref().display());
                true
            }
            None => false,
        }
    }

    /// Release every texture.
    pub fn unload_all<D, A>(&mut self, resources: &mut ResourceManager<D, A>)
    where
        D: DeviceContext,
        A: MemoryAllocator,
    {
        let count = self.textures.len();
        for (_, texture) in self.textures.drain() {
            resources.destroy_image(texture);
        }
        if count > 0 {
            debug!("Unloaded {count} textures");
        }
    }

    /// Bytes of device memory held by loaded textures.
    pub fn memory_usage(&self) -> u64 {
        self.textures
            .values()
            .map(|texture| texture.allocation_info().size)
            .sum()
    }
}

impl Drop for AssetManager {
    fn drop(&mut self) {
        if !self.textures.is_empty() {
            warn!(
                "Asset manager dropped with {} textures still loaded",
                self.textures.len()
            );
        }
    }
}

impl std::fmt::Debug for AssetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetManager")
            .field("root", &self.root)
            .field("textures", &self.textures.len())
            .field("memory_usage", &self.memory_usage())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_paths_are_not_loaded() {
        let assets = AssetManager::new("assets");
        assert!(assets.is_empty());
        assert!(!assets.is_loaded("missing.png"));
        assert!(assets.get("missing.png").is_none());
        assert_eq!(assets.memory_usage(), 0);
    }
}
