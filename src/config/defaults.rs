//! Default values for configuration

/// Default index file name inside the base directory
pub fn default_index_file() -> String {
    "memories.json".to_string()
}

/// Default attachments folder name inside the base directory
pub fn default_attachments_dir() -> String {
    "attachments".to_string()
}

/// JPEG quality used when re-encoding image attachments (1-100)
pub fn default_image_quality() -> u8 {
    85
}

/// Extension for audio attachments whose source has none
pub fn default_audio_extension() -> String {
    "m4a".to_string()
}

/// Ceiling for obtaining a fallback image, in seconds
pub fn default_fallback_timeout() -> u64 {
    20
}

/// User agent for fallback image downloads
pub fn default_fallback_user_agent() -> String {
    format!("keepsake/{}", env!("CARGO_PKG_VERSION"))
}

/// Default local assets folder name inside the base directory
pub fn default_assets_dir() -> String {
    "assets".to_string()
}
