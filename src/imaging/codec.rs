use std::borrow::Cow;
use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

use crate::error::ImagingError;

/// Compressed format of a frame payload, named on the wire by [`tag`](Self::tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
    Bmp,
}

impl PayloadEncoding {
    pub fn tag(self) -> &'static str {
        match self {
            PayloadEncoding::Png => "png",
            PayloadEncoding::Jpeg => "jpeg",
            PayloadEncoding::Bmp => "bmp",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            PayloadEncoding::Png => ImageFormat::Png,
            PayloadEncoding::Jpeg => ImageFormat::Jpeg,
            PayloadEncoding::Bmp => ImageFormat::Bmp,
        }
    }
}

pub trait ImageCodec: Send + Sync {
    fn encode(&self, image: &DynamicImage, encoding: PayloadEncoding) -> Result<Vec<u8>, ImagingError>;
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, ImagingError>;
}

/// Codec backed by the `image` crate; the format is sniffed on decode.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCodec;

impl ImageCodec for StandardCodec {
    fn encode(&self, image: &DynamicImage, encoding: PayloadEncoding) -> Result<Vec<u8>, ImagingError> {
        // JPEG carries neither alpha nor 16-bit channels.
        let image = match encoding {
            PayloadEncoding::Jpeg => Cow::Owned(DynamicImage::ImageRgb8(image.to_rgb8())),
            _ => Cow::Borrowed(image),
        };
        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, encoding.image_format())
            .map_err(|e| ImagingError::Encode(encoding.tag().to_string(), e.to_string()))?;
        Ok(buffer.into_inner())
    }

    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, ImagingError> {
        if bytes.is_empty() {
            return Err(ImagingError::Decode("empty payload".to_string()));
        }
        image::load_from_memory(bytes).map_err(|e| ImagingError::Decode(e.to_string()))
    }
}
