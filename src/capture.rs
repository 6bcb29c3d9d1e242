use failure::Fail;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, RgbaImage};
use log::debug;

/// Largest width or height a baseline JPEG can describe.
pub const MAX_FRAME_DIMENSION: u32 = 65535;

#[derive(Debug, Fail)]
pub enum CaptureError {
    #[fail(
        display = "frame is {}x{}; camera has not produced a usable frame yet",
        width, height
    )]
    InvalidFrame { width: u32, height: u32 },
    #[fail(
        display = "pixel buffer holds {} bytes, expected {}",
        actual, expected
    )]
    PixelBufferSize { expected: usize, actual: usize },
    #[fail(
        display = "frame is {}x{}; JPEG allows at most {} pixels per side",
        width, height, max
    )]
    FrameTooLarge { width: u32, height: u32, max: u32 },
    #[fail(display = "{} must be within [0, 1], got {}", name, value)]
    InvalidSetting { name: &'static str, value: f64 },
    #[fail(
        display = "crop band at offset {} with height {} extends past the frame",
        offset, fraction
    )]
    CropBandOutOfFrame { offset: f64, fraction: f64 },
    #[fail(display = "crop band of a {}-row frame is empty", height)]
    EmptyCropBand { height: u32 },
    #[fail(display = "failed to decode frame: {}", _0)]
    Decode(#[cause] image::ImageError),
    #[fail(display = "failed to encode JPEG: {}", _0)]
    Encode(#[cause] image::ImageError),
}

/// A single RGBA8 snapshot of the camera feed.
#[derive(Debug)]
pub struct RawFrame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RawFrame {
    /// Wraps a row-major RGBA8 buffer. The buffer must hold exactly
    /// `width * height * 4` bytes.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<RawFrame, CaptureError> {
        if width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
            return Err(CaptureError::FrameTooLarge {
                width,
                height,
                max: MAX_FRAME_DIMENSION,
            });
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .unwrap_or(usize::MAX);
        if pixels.len() != expected {
            return Err(CaptureError::PixelBufferSize {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(RawFrame {
            width,
            height,
            pixels,
        })
    }

    /// Decodes an encoded still (JPEG, PNG or BMP) into a frame.
    pub fn decode(bytes: &[u8]) -> Result<RawFrame, CaptureError> {
        let rgba = image::load_from_memory(bytes)
            .map_err(CaptureError::Decode)?
            .to_rgba8();
        let (width, height) = rgba.dimensions();
        RawFrame::from_rgba(width, height, rgba.into_raw())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropSettings {
    /// Height of the retained band, as a fraction of the frame height.
    pub crop_fraction: f64,
    /// Top of the retained band, as a fraction of the frame height.
    pub offset_fraction: f64,
    pub jpeg_quality: f64,
}

impl Default for CropSettings {
    fn default() -> Self {
        CropSettings {
            crop_fraction: 0.6,
            offset_fraction: 0.2,
            jpeg_quality: 0.9,
        }
    }
}

impl CropSettings {
    pub fn validate(&self) -> Result<(), CaptureError> {
        for &(name, value) in &[
            ("crop fraction", self.crop_fraction),
            ("crop offset", self.offset_fraction),
            ("JPEG quality", self.jpeg_quality),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(CaptureError::InvalidSetting { name, value });
            }
        }
        if self.offset_fraction + self.crop_fraction > 1.0 {
            return Err(CaptureError::CropBandOutOfFrame {
                offset: self.offset_fraction,
                fraction: self.crop_fraction,
            });
        }
        Ok(())
    }

    fn jpeg_quality_percent(&self) -> u8 {
        (self.jpeg_quality * 100.0).round().max(1.0).min(100.0) as u8
    }
}

/// A JPEG-encoded horizontal band of a frame, ready for OCR upload.
#[derive(Debug, Clone)]
pub struct CroppedImage {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub bytes: Vec<u8>,
}

pub fn capture(frame: &RawFrame, settings: &CropSettings) -> Result<CroppedImage, CaptureError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(CaptureError::InvalidFrame {
            width: frame.width,
            height: frame.height,
        });
    }
    settings.validate()?;

    let frame_height = f64::from(frame.height);
    let band_height = ((frame_height * settings.crop_fraction).round() as u32).min(frame.height);
    if band_height == 0 {
        return Err(CaptureError::EmptyCropBand {
            height: frame.height,
        });
    }
    // A rounded-up band height can reach one row past the bottom.
    let band_top =
        ((frame_height * settings.offset_fraction).floor() as u32).min(frame.height - band_height);
    debug!(
        "Cropping {}x{} frame to rows {}..{}",
        frame.width,
        frame.height,
        band_top,
        band_top + band_height
    );

    let row_bytes = frame.width as usize * 4;
    let start = band_top as usize * row_bytes;
    let end = start + band_height as usize * row_bytes;
    let band = RgbaImage::from_raw(frame.width, band_height, frame.pixels[start..end].to_vec())
        .ok_or(CaptureError::PixelBufferSize {
            expected: end - start,
            actual: frame.pixels.len(),
        })?;
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgba8(band).to_rgb8();

    let quality = settings.jpeg_quality_percent();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode(rgb.as_raw(), frame.width, band_height, ColorType::Rgb8)
        .map_err(CaptureError::Encode)?;

    Ok(CroppedImage {
        width: frame.width,
        height: band_height,
        quality,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;

    fn solid_frame(width: u32, height: u32) -> RawFrame {
        RawFrame::from_rgba(width, height, vec![200u8; (width * height * 4) as usize]).unwrap()
    }

    fn decode(image: &CroppedImage) -> image::RgbImage {
        image::load_from_memory_with_format(&image.bytes, ImageFormat::Jpeg)
            .unwrap()
            .to_rgb8()
    }

    #[test]
    fn test_capture_720p() {
        let frame = solid_frame(1280, 720);
        let cropped = capture(&frame, &CropSettings::default()).unwrap();

        assert_eq!(cropped.width, 1280);
        assert_eq!(cropped.height, 432);
        assert_eq!(cropped.quality, 90);
        assert_eq!(decode(&cropped).dimensions(), (1280, 432));
    }

    #[test]
    fn test_band_height_ignores_width() {
        for &(width, height) in &[(1, 720), (640, 480), (17, 33), (3, 1), (800, 5)] {
            let cropped = capture(&solid_frame(width, height), &CropSettings::default()).unwrap();
            let expected = (f64::from(height) * 0.6).round() as u32;
            assert_eq!(cropped.height, expected, "{}x{}", width, height);
            assert_eq!(cropped.width, width);
        }
    }

    #[test]
    fn test_capture_keeps_middle_band() {
        let (width, height) = (64u32, 100u32);
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            let color = if (20..80).contains(&y) {
                [0, 255, 0, 255]
            } else {
                [255, 0, 0, 255]
            };
            for _ in 0..width {
                pixels.extend_from_slice(&color);
            }
        }
        let frame = RawFrame::from_rgba(width, height, pixels).unwrap();
        let cropped = capture(&frame, &CropSettings::default()).unwrap();
        assert_eq!(cropped.height, 60);

        let decoded = decode(&cropped);
        for &y in &[5, 30, 55] {
            let px = decoded.get_pixel(32, y);
            assert!(px[1] > 200 && px[0] < 60, "row {} is {:?}", y, px);
        }
    }

    #[test]
    fn test_zero_area_frame() {
        for &(width, height) in &[(0, 720), (1280, 0), (0, 0)] {
            let frame = RawFrame::from_rgba(width, height, vec![]).unwrap();
            match capture(&frame, &CropSettings::default()) {
                Err(CaptureError::InvalidFrame { .. }) => {}
                other => panic!("expected InvalidFrame, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_pixel_buffer_mismatch() {
        match RawFrame::from_rgba(4, 4, vec![0; 10]) {
            Err(CaptureError::PixelBufferSize {
                expected: 64,
                actual: 10,
            }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_frame_too_large_for_jpeg() {
        match RawFrame::from_rgba(70000, 2, vec![0; 70000 * 2 * 4]) {
            Err(CaptureError::FrameTooLarge {
                width: 70000,
                height: 2,
                max: MAX_FRAME_DIMENSION,
            }) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            RawFrame::from_rgba(1, 65536, vec![0; 65536 * 4]),
            Err(CaptureError::FrameTooLarge { .. })
        ));

        let widest = RawFrame::from_rgba(MAX_FRAME_DIMENSION, 2, vec![0; 65535 * 2 * 4]).unwrap();
        let cropped = capture(&widest, &CropSettings::default()).unwrap();
        assert_eq!((cropped.width, cropped.height), (65535, 1));
    }

    #[test]
    fn test_invalid_settings() {
        let frame = solid_frame(8, 8);
        let bad_quality = CropSettings {
            jpeg_quality: 1.5,
            ..CropSettings::default()
        };
        assert!(matches!(
            capture(&frame, &bad_quality),
            Err(CaptureError::InvalidSetting { .. })
        ));

        let past_bottom = CropSettings {
            crop_fraction: 0.7,
            offset_fraction: 0.5,
            ..CropSettings::default()
        };
        assert!(matches!(
            capture(&frame, &past_bottom),
            Err(CaptureError::CropBandOutOfFrame { .. })
        ));

        let empty = CropSettings {
            crop_fraction: 0.0,
            ..CropSettings::default()
        };
        assert!(matches!(
            capture(&frame, &empty),
            Err(CaptureError::EmptyCropBand { .. })
        ));
    }

    #[test]
    fn test_band_stays_inside_frame() {
        let settings = CropSettings {
            crop_fraction: 0.75,
            offset_fraction: 0.25,
            jpeg_quality: 0.5,
        };
        let cropped = capture(&solid_frame(4, 2), &settings).unwrap();
        assert_eq!(cropped.height, 2);
        assert_eq!(cropped.quality, 50);
    }

    #[test]
    fn test_decode_png() {
        let img = RgbaImage::from_pixel(10, 6, image::Rgba([1, 2, 3, 255]));
        let mut png = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();

        let frame = RawFrame::decode(png.get_ref()).unwrap();
        assert_eq!((frame.width(), frame.height()), (10, 6));
    }
}
