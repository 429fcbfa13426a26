use std::path::{Path, PathBuf};

use crate::error::ImagingError;

/// Lower-case file extensions accepted as source images.
pub const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Image files directly inside `dir`, sorted by file name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, ImagingError> {
    let folder_error = |reason: String| ImagingError::Folder(dir.display().to_string(), reason);
    if !dir.is_dir() {
        return Err(folder_error("not a directory".to_string()));
    }

    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| folder_error(e.to_string()))? {
        let path = entry.map_err(|e| folder_error(e.to_string()))?.path();
        if path.is_file() && has_image_extension(&path) {
            images.push(path);
        }
    }
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(images)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| {
            let extension = extension.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&extension.as_str())
        })
        .unwrap_or(false)
}
