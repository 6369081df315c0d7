use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use runcatcher_common::frame::FaceBox;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("crop {crop:?} does not fit in a {width}x{height} frame")]
    OutOfBounds {
        crop: CropRect,
        width: u32,
        height: u32,
    },
    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// Pixel rectangle cut out of a frame around a face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// The face box grown by `padding` on every side, clamped to the frame.
    ///
    /// The origin is clamped at 0 without shrinking the size first, so a face
    /// near the top-left edge gets a crop shifted into the frame rather than a
    /// smaller one. Returns `None` when nothing of the crop lies in the frame.
    pub fn around(face: &FaceBox, padding: u32, frame_width: u32, frame_height: u32) -> Option<Self> {
        let pad = padding as f64;
        let x = (face.x - pad).max(0.0).floor();
        let y = (face.y - pad).max(0.0).floor();
        let width = (frame_width as f64 - x).min(face.width + pad * 2.0).floor();
        let height = (frame_height as f64 - y).min(face.height + pad * 2.0).floor();

        if !(width >= 1.0 && height >= 1.0) {
            return None;
        }

        Some(Self {
            x: x as u32,
            y: y as u32,
            width: width as u32,
            height: height as u32,
        })
    }

    pub fn fits(&self, frame_width: u32, frame_height: u32) -> bool {
        self.x.checked_add(self.width).is_some_and(|r| r <= frame_width)
            && self.y.checked_add(self.height).is_some_and(|b| b <= frame_height)
    }
}

/// Cut `crop` out of `frame` and encode it as JPEG at `quality` (1-100).
pub fn encode_crop(frame: &RgbImage, crop: CropRect, quality: u8) -> Result<Vec<u8>, EncodeError> {
    if !crop.fits(frame.width(), frame.height()) {
        return Err(EncodeError::OutOfBounds {
            crop,
            width: frame.width(),
            height: frame.height(),
        });
    }

    let face = image::imageops::crop_imm(frame, crop.x, crop.y, crop.width, crop.height).to_image();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100)).encode_image(&face)?;
    Ok(jpeg)
}
