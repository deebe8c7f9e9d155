//! Named asset registration, resolution and caching.
//!
//! Names are unique per kind-namespace and resolve in O(1). Resolution
//! strategy is pluggable: a live directory root, or a precomputed manifest
//! with optional embedded payloads (the export/standalone mode). Missing
//! files are explicit errors naming the path — registration never silently
//! succeeds on a bad path.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Image,
    Font,
    Sound,
    Music,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Image => "image",
            AssetKind::Font => "font",
            AssetKind::Sound => "sound",
            AssetKind::Music => "music",
        }
    }
}

/// One manifest entry: the original path plus an optional embedded base64
/// payload (a data URL body). Entries without a payload fall back to the
/// filesystem path.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub path: String,
    pub data: Option<String>,
}

/// Where asset bytes come from.
pub enum AssetSource {
    /// Relative paths resolve against the root; absolute paths bypass it.
    Dir(PathBuf),
    /// Precomputed name→entry map for self-contained artifacts. Audio
    /// registration is only accepted before `start()` under this source.
    Manifest(HashMap<String, ManifestEntry>),
}

impl AssetSource {
    pub fn dir(root: impl Into<PathBuf>) -> Self {
        AssetSource::Dir(root.into())
    }

    pub fn resolve(&self, path: &str) -> Result<Vec<u8>> {
        match self {
            AssetSource::Dir(root) => {
                let p = Path::new(path);
                let full = if p.is_absolute() { p.to_path_buf() } else { root.join(p) };
                std::fs::read(&full).with_context(|| format!("asset not found: {}", full.display()))
            }
            AssetSource::Manifest(entries) => {
                let entry = entries
                    .get(path)
                    .with_context(|| format!("asset not found in manifest: {path}"))?;
                match &entry.data {
                    Some(data) => {
                        // Tolerate full data URLs as well as bare base64
                        let body = data.rsplit_once("base64,").map(|(_, b)| b).unwrap_or(data);
                        BASE64
                            .decode(body.trim())
                            .with_context(|| format!("invalid embedded data for asset: {path}"))
                    }
                    None => std::fs::read(&entry.path)
                        .with_context(|| format!("asset not found: {}", entry.path)),
                }
            }
        }
    }

    pub fn is_manifest(&self) -> bool {
        matches!(self, AssetSource::Manifest(_))
    }
}

#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub path: String,
    pub width: u32,
    pub height: u32,
    /// RGBA8, row-major.
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct FontAsset {
    pub path: String,
    pub bytes: Vec<u8>,
}

pub struct AssetStore {
    source: AssetSource,
    images: HashMap<String, ImageAsset>,
    fonts: HashMap<String, FontAsset>,
    /// (name, path) registered before preload; resolved during `preload`.
    pending_images: Vec<(String, String)>,
    pending_fonts: Vec<(String, String)>,
    preloaded: bool,
}

impl AssetStore {
    pub fn new(source: AssetSource) -> Self {
        Self {
            source,
            images: HashMap::new(),
            fonts: HashMap::new(),
            pending_images: Vec::new(),
            pending_fonts: Vec::new(),
            preloaded: false,
        }
    }

    pub fn source(&self) -> &AssetSource {
        &self.source
    }

    /// Register an image. Before `preload` the load is deferred (and a bad
    /// path fails `start()`); afterwards it loads immediately and a bad
    /// path fails this call.
    pub fn register_image(&mut self, name: &str, path: &str) -> Result<()> {
        if self.preloaded {
            self.load_image(name.to_string(), path.to_string())
        } else {
            self.pending_images.push((name.to_string(), path.to_string()));
            Ok(())
        }
    }

    pub fn register_font(&mut self, name: &str, path: &str) -> Result<()> {
        if self.preloaded {
            self.load_font(name.to_string(), path.to_string())
        } else {
            self.pending_fonts.push((name.to_string(), path.to_string()));
            Ok(())
        }
    }

    /// Resolve and read audio bytes at registration time. Decode timing is
    /// the audio engine's concern (it defers until unlock); this only hands
    /// the raw bytes over. Errors name the missing path.
    pub fn load_audio_bytes(&self, path: &str) -> Result<Vec<u8>> {
        self.source.resolve(path)
    }

    /// Resolve everything registered before start, in registration order.
    /// The first missing path aborts with an error identifying it.
    pub fn preload(&mut self) -> Result<()> {
        for (name, path) in std::mem::take(&mut self.pending_images) {
            self.load_image(name, path)?;
        }
        for (name, path) in std::mem::take(&mut self.pending_fonts) {
            self.load_font(name, path)?;
        }
        self.preloaded = true;
        Ok(())
    }

    fn load_image(&mut self, name: String, path: String) -> Result<()> {
        let bytes = self.source.resolve(&path)?;
        let decoded = image::load_from_memory(&bytes)
            .with_context(|| format!("failed to decode image '{name}' from {path}"))?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        tracing::debug!("Loaded image '{}' ({}x{}) from {}", name, width, height, path);
        self.images.insert(name, ImageAsset { path, width, height, pixels: rgba.into_raw() });
        Ok(())
    }

    fn load_font(&mut self, name: String, path: String) -> Result<()> {
        let bytes = self.source.resolve(&path)?;
        tracing::debug!("Loaded font '{}' ({} bytes) from {}", name, bytes.len(), path);
        self.fonts.insert(name, FontAsset { path, bytes });
        Ok(())
    }

    /// Synchronous dimension query. None until decoded — callers surface a
    /// 0 sentinel, never an unrelated error.
    pub fn image_size(&self, name: &str) -> Option<(u32, u32)> {
        self.images.get(name).map(|i| (i.width, i.height))
    }

    pub fn image(&self, name: &str) -> Option<&ImageAsset> {
        self.images.get(name)
    }

    pub fn font(&self, name: &str) -> Option<&FontAsset> {
        self.fonts.get(name)
    }

    pub fn has_image(&self, name: &str) -> bool {
        self.images.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_source_reports_missing_path() {
        let source = AssetSource::dir("/nonexistent-root");
        let err = source.resolve("missing.png").unwrap_err();
        assert!(err.to_string().contains("missing.png"), "{err}");
    }

    #[test]
    fn manifest_embedded_data_round_trips() {
        let mut entries = HashMap::new();
        entries.insert(
            "blip".to_string(),
            ManifestEntry { path: "sounds/blip.wav".into(), data: Some(BASE64.encode(b"RIFFdata")) },
        );
        entries.insert(
            "blip-url".to_string(),
            ManifestEntry {
                path: "sounds/blip.wav".into(),
                data: Some(format!("data:audio/wav;base64,{}", BASE64.encode(b"RIFFdata"))),
            },
        );
        let source = AssetSource::Manifest(entries);
        assert_eq!(source.resolve("blip").unwrap(), b"RIFFdata");
        assert_eq!(source.resolve("blip-url").unwrap(), b"RIFFdata");
        assert!(source.resolve("other").is_err());
    }

    #[test]
    fn pending_registration_defers_missing_path_to_preload() {
        let mut store = AssetStore::new(AssetSource::dir("/nonexistent-root"));
        // Registration itself succeeds before start
        store.register_image("hero", "hero.png").unwrap();
        assert_eq!(store.image_size("hero"), None);
        let err = store.preload().unwrap_err();
        assert!(err.to_string().contains("hero.png"), "{err}");
    }
}
