//! Helpers bridging `image` buffers and label fixtures into pipeline inputs.

use std::path::{Path, PathBuf};

use tangram_pose_core::{FrameView, GrayImageView};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tif"];

/// Borrow an `image::GrayImage` as a single-channel frame.
pub fn gray_frame(img: &::image::GrayImage) -> FrameView<'_> {
    FrameView {
        width: img.width() as usize,
        height: img.height() as usize,
        channels: 1,
        data: img.as_raw(),
    }
}

pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Convert an RGB image into the BGR byte order expected by [`FrameView`].
pub fn rgb_to_bgr(img: &::image::RgbImage) -> Vec<u8> {
    img.as_raw()
        .chunks_exact(3)
        .flat_map(|px| [px[2], px[1], px[0]])
        .collect()
}

/// `images_dir/<stem>.<ext>` for the first known image extension that exists.
pub fn find_image_for_stem(images_dir: &Path, stem: &str) -> Option<PathBuf> {
    IMAGE_EXTENSIONS
        .iter()
        .map(|ext| images_dir.join(format!("{stem}.{ext}")))
        .find(|p| p.is_file())
}

/// Pixel size of the image paired with a label file, read from its header.
pub fn label_image_size(images_dir: &Path, label_path: &Path) -> Result<(u32, u32), ::image::ImageError> {
    let stem = label_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let path = find_image_for_stem(images_dir, stem).ok_or_else(|| {
        ::image::ImageError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no image for `{stem}` in {}", images_dir.display()),
        ))
    })?;
    ::image::image_dimensions(path)
}
