//! Image lookup and encoding for visual comparison.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::TierError;

/// An image ready to embed in a remote request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime: &'static str,
    pub base64: String,
}

impl EncodedImage {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64)
    }
}

/// Locate an image. Absolute paths are used as-is when they exist; otherwise
/// each root is tried with the path itself, then with `images/<file name>`.
pub fn resolve_image_path(image: &str, roots: &[PathBuf]) -> Result<PathBuf, TierError> {
    let requested = Path::new(image);
    if requested.is_absolute() && requested.exists() {
        return Ok(requested.to_path_buf());
    }

    let relative = requested.strip_prefix("/").unwrap_or(requested);
    let mut candidates = Vec::with_capacity(roots.len() * 2);
    for root in roots {
        candidates.push(root.join(relative));
        if let Some(file_name) = requested.file_name() {
            candidates.push(root.join("images").join(file_name));
        }
    }

    candidates
        .iter()
        .find(|candidate| candidate.is_file())
        .cloned()
        .ok_or_else(|| {
            let tried: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
            TierError::Image(format!("image not found: {image} (tried {})", tried.join(", ")))
        })
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

pub fn encode_image(path: &Path) -> Result<EncodedImage, TierError> {
    let bytes = std::fs::read(path)
        .map_err(|e| TierError::Image(format!("failed to read {}: {e}", path.display())))?;
    Ok(EncodedImage {
        mime: mime_for(path),
        base64: STANDARD.encode(bytes),
    })
}
