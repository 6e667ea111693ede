//! Decoding of uploaded photo payloads and on-disk photo naming.

use std::path::{Path, PathBuf};

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, RgbImage};
use thiserror::Error;

use crate::store::VisitorInfo;

/// Standard alphabet; browsers always pad, hand-built payloads sometimes don't.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const DATA_URI_PREFIX: &str = "data:image";
const UNKNOWN_PART: &str = "unknown";

#[derive(Error, Debug)]
pub enum PhotoError {
    #[error("invalid base64 image data: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("data URI has no payload after its header")]
    MalformedDataUri,
    #[error("cannot identify image: {0}")]
    ImageFormat(#[source] image::ImageError),
    #[error("failed to create image directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to save image {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Drop a `data:image/...;base64,` header if present.
///
/// The header ends at the first comma; everything after it is payload, so a
/// stray comma inside the payload surfaces as a base64 error instead of
/// silently truncating the image.
pub fn strip_data_uri(payload: &str) -> Result<&str, PhotoError> {
    if !payload.starts_with(DATA_URI_PREFIX) {
        return Ok(payload);
    }
    payload
        .split_once(',')
        .map(|(_, data)| data)
        .ok_or(PhotoError::MalformedDataUri)
}

/// Decode an uploaded image field (bare base64 or data URI) into an image.
pub fn decode_image(payload: &str) -> Result<DynamicImage, PhotoError> {
    let data = strip_data_uri(payload.trim())?;
    let bytes = PAYLOAD_ENGINE.decode(data.trim())?;
    image::load_from_memory(&bytes).map_err(PhotoError::ImageFormat)
}

/// Keep ASCII alphanumerics, `-` and `_`; everything else becomes `_`.
fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        UNKNOWN_PART.to_string()
    } else {
        cleaned
    }
}

/// File name for a visitor's photo.
///
/// `{name}-{company}.png` when either field is present, otherwise a random
/// token. Two visitors with the same name and company share a file name, and
/// the later photo replaces the earlier one.
pub fn photo_filename(info: &VisitorInfo) -> String {
    let name = info.get("name").filter(|v| !v.trim().is_empty());
    let company = info.get("company").filter(|v| !v.trim().is_empty());

    if name.is_none() && company.is_none() {
        return format!("{}.png", uuid::Uuid::new_v4().simple());
    }

    let part = |v: Option<&String>| v.map_or_else(|| UNKNOWN_PART.to_string(), |s| sanitize(s));
    format!("{}-{}.png", part(name), part(company))
}

/// Write `image` as PNG into `dir` (created if absent) and return its path.
pub fn save_png(image: &DynamicImage, dir: &Path, filename: &str) -> Result<PathBuf, PhotoError> {
    std::fs::create_dir_all(dir).map_err(|source| PhotoError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let path = dir.join(filename);
    image
        .save_with_format(&path, ImageFormat::Png)
        .map_err(|source| PhotoError::Save {
            path: path.clone(),
            source,
        })?;

    Ok(path)
}

/// Rewrite a photo at `path` from already decoded pixels.
pub fn restore_png(image: &RgbImage, path: &Path) -> Result<(), PhotoError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| PhotoError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|source| PhotoError::Save {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    /// Base64 of a small solid-color PNG.
    pub(crate) fn png_base64(color: [u8; 3]) -> String {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb(color)));
        let mut buf = Vec::new();
        image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        base64::engine::general_purpose::STANDARD.encode(buf)
    }

    fn info(pairs: &[(&str, &str)]) -> VisitorInfo {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_strip_data_uri() {
        assert_eq!(strip_data_uri("data:image/png;base64,AAAA").unwrap(), "AAAA");
        assert_eq!(strip_data_uri("data:image/jpeg;base64,").unwrap(), "");
        assert_eq!(strip_data_uri("AAAA").unwrap(), "AAAA");
        assert!(matches!(strip_data_uri("data:image/png"), Err(PhotoError::MalformedDataUri)));
        assert_eq!(strip_data_uri("data:image/png;base64,AAAA,BBBB").unwrap(), "AAAA,BBBB");
    }

    #[test]
    fn test_decode_bare_and_data_uri_identical() {
        let b64 = png_base64([200, 10, 10]);
        let bare = decode_image(&b64).unwrap();
        let uri = decode_image(&format!("data:image/png;base64,{b64}")).unwrap();
        assert_eq!(bare.to_rgb8(), uri.to_rgb8());
        assert_eq!(bare.to_rgb8().get_pixel(0, 0), &Rgb([200, 10, 10]));
    }

    #[test]
    fn test_decode_accepts_missing_padding() {
        let b64 = png_base64([1, 2, 3]);
        assert!(decode_image(b64.trim_end_matches('=')).is_ok());
    }

    #[test]
    fn test_decode_malformed_base64() {
        assert!(matches!(decode_image("!!not base64!!"), Err(PhotoError::Decode(_))));
    }

    #[test]
    fn test_decode_comma_inside_payload_is_rejected() {
        let payload = format!("data:image/png;base64,{},AAAA", png_base64([9, 9, 9]));
        assert!(matches!(decode_image(&payload), Err(PhotoError::Decode(_))));
    }

    #[test]
    fn test_decode_not_an_image() {
        let b64 = base64::engine::general_purpose::STANDARD.encode(b"hello, world");
        assert!(matches!(decode_image(&b64), Err(PhotoError::ImageFormat(_))));
        assert!(matches!(decode_image(""), Err(PhotoError::ImageFormat(_))));
    }

    #[test]
    fn test_filename_from_name_only() {
        assert_eq!(photo_filename(&info(&[("name", "Alice")])), "Alice-unknown.png");
    }

    #[test]
    fn test_filename_from_name_and_company() {
        let name = photo_filename(&info(&[("name", "Bo Ek"), ("company", "Acme/AB")]));
        assert_eq!(name, "Bo_Ek-Acme_AB.png");
    }

    #[test]
    fn test_filename_company_only() {
        assert_eq!(photo_filename(&info(&[("company", "Acme")])), "unknown-Acme.png");
    }

    #[test]
    fn test_filename_random_without_identity() {
        let a = photo_filename(&info(&[("visiting", "Carl")]));
        let b = photo_filename(&VisitorInfo::new());
        assert!(a.ends_with(".png") && b.ends_with(".png"));
        assert_eq!(a.len(), 32 + 4);
        assert_ne!(a, b);
    }

    #[test]
    fn test_filename_no_path_traversal() {
        let name = photo_filename(&info(&[("name", "../../etc/passwd")]));
        assert!(!name.contains('/'));
        assert!(!name.contains(".."));
    }

    #[test]
    fn test_save_png_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        let image = decode_image(&png_base64([9, 9, 9])).unwrap();

        let path = save_png(&image, &images, "Alice-unknown.png").unwrap();
        assert_eq!(path, images.join("Alice-unknown.png"));
        assert_eq!(image::open(&path).unwrap().to_rgb8().get_pixel(3, 3), &Rgb([9, 9, 9]));
    }
}
