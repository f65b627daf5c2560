//! Attachment files: a flat folder of store-generated names.

use super::fsutil::{remove_if_exists, write_atomic};
use crate::config::Config;
use crate::error::{Error, Result};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const IMAGE_PREFIX: &str = "img_";
const AUDIO_PREFIX: &str = "aud_";
const IMAGE_EXTENSION: &str = "jpg";

#[derive(Debug, Clone)]
pub struct AttachmentDir {
    dir: PathBuf,
    image_quality: u8,
    default_audio_extension: String,
}

impl AttachmentDir {
    pub fn new(config: &Config) -> Self {
        Self {
            dir: config.paths.attachments_dir.clone(),
            image_quality: config.store.image_quality,
            default_audio_extension: config.store.default_audio_extension.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    pub async fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await
    }

    /// Re-encode as JPEG and write `img_<unique>.jpg`; returns the filename
    pub async fn save_image(&self, image: &DynamicImage, unique: &str) -> Result<String> {
        let bytes = encode_jpeg(image, self.image_quality)?;
        let name = format!("{}{}.{}", IMAGE_PREFIX, unique, IMAGE_EXTENSION);

        self.ensure().await?;
        write_atomic(&self.path_for(&name), &bytes).await?;
        debug!("Saved image attachment {} ({} bytes)", name, bytes.len());
        Ok(name)
    }

    /// Copy an audio file in as `aud_<unique>.<ext>`; returns the filename
    pub async fn save_audio(&self, source: &Path, unique: &str) -> Result<String> {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .unwrap_or(self.default_audio_extension.as_str());
        let name = format!("{}{}.{}", AUDIO_PREFIX, unique, ext);
        let dest = self.path_for(&name);

        self.ensure().await?;
        remove_if_exists(&dest).await?;
        if let Err(e) = fs::copy(source, &dest).await {
            let _ = remove_if_exists(&dest).await;
            return Err(Error::Io(io::Error::new(
                e.kind(),
                format!("copying {}: {}", source.display(), e),
            )));
        }
        debug!("Saved audio attachment {} from {:?}", name, source);
        Ok(name)
    }

    /// Delete a stored file. A file that is already gone is not an error.
    pub async fn remove(&self, filename: &str) -> io::Result<bool> {
        remove_if_exists(&self.path_for(filename)).await
    }

    pub async fn exists(&self, filename: &str) -> bool {
        fs::try_exists(self.path_for(filename))
            .await
            .unwrap_or(false)
    }
}

/// Encode a bitmap as JPEG at the given quality. Alpha is dropped.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    if image.width() == 0 || image.height() == 0 {
        return Err(Error::Encoding("image has no pixels".to_string()));
    }

    let rgb = image.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(&rgb)
        .map_err(|e| Error::Encoding(e.to_string()))?;
    Ok(buf)
}
