//! Image descriptors accepted by `process`.
//!
//! Three input shapes describe the same logical operation: a packed
//! buffer, three planar YUV buffers, or an encoded (JPEG/PNG/BMP) byte
//! stream. Descriptors borrow the caller's memory; validation copies what
//! the evaluation needs into an owned [`Frame`] so nothing borrowed
//! outlives the call, even in parallel mode.

use std::path::Path;

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};

use crate::error::{KycError, Result};
use crate::exif;

/// Supported image types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(C)]
pub enum ImageType {
    /// R, G, B, 8 bits per channel
    Rgb24 = 0,
    /// R, G, B, A, 8 bits per channel (Android ARGB_8888)
    Rgba32 = 1,
    /// B, G, R, A, 8 bits per channel (iOS 32BGRA)
    Bgra32 = 2,
    /// B, G, R, 8 bits per channel (OpenCV default)
    Bgr24 = 3,
    /// Y plane followed by interleaved U/V, 2x2 subsampled
    Nv12 = 4,
    /// Y plane followed by interleaved V/U, 2x2 subsampled
    Nv21 = 5,
    /// Y, U, V planes, 2x2 subsampled chroma (I420)
    Yuv420p = 6,
    /// Y, V, U planes, 2x2 subsampled chroma (YV12)
    Yvu420p = 7,
    /// Y, U, V planes, horizontally subsampled chroma
    Yuv422p = 8,
    /// Y, U, V planes, full resolution chroma
    Yuv444p = 9,
    /// Luminance only
    Y = 10,
}

impl ImageType {
    /// Map a raw discriminant (C ABI) to an image type.
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            0 => ImageType::Rgb24,
            1 => ImageType::Rgba32,
            2 => ImageType::Bgra32,
            3 => ImageType::Bgr24,
            4 => ImageType::Nv12,
            5 => ImageType::Nv21,
            6 => ImageType::Yuv420p,
            7 => ImageType::Yvu420p,
            8 => ImageType::Yuv422p,
            9 => ImageType::Yuv444p,
            10 => ImageType::Y,
            _ => return None,
        })
    }

    /// Bytes per pixel for single-plane types, `None` for YUV types.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            ImageType::Rgb24 | ImageType::Bgr24 => Some(3),
            ImageType::Rgba32 | ImageType::Bgra32 => Some(4),
            ImageType::Y => Some(1),
            _ => None,
        }
    }

    pub fn is_yuv(&self) -> bool {
        self.bytes_per_pixel().is_none()
    }

    pub fn is_semi_planar(&self) -> bool {
        matches!(self, ImageType::Nv12 | ImageType::Nv21)
    }

    /// Chroma plane size in samples for YUV types.
    pub fn chroma_size(&self, width: usize, height: usize) -> (usize, usize) {
        match self {
            ImageType::Yuv444p => (width, height),
            ImageType::Yuv422p => (width.div_ceil(2), height),
            _ => (width.div_ceil(2), height.div_ceil(2)),
        }
    }

    /// Distance between consecutive chroma samples when left at 0.
    pub fn default_uv_pixel_stride(&self) -> usize {
        if self.is_semi_planar() {
            2
        } else {
            1
        }
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// Single buffer image. Strides are in samples (pixels); 0 means tight.
#[derive(Debug, Clone, Copy)]
pub struct PackedImage<'a> {
    pub image_type: ImageType,
    pub data: &'a [u8],
    pub width: usize,
    pub height: usize,
    pub stride: usize,
    pub exif_orientation: i32,
}

impl<'a> PackedImage<'a> {
    pub fn new(image_type: ImageType, data: &'a [u8], width: usize, height: usize) -> Self {
        Self {
            image_type,
            data,
            width,
            height,
            stride: 0,
            exif_orientation: exif::DEFAULT_ORIENTATION as i32,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_orientation(mut self, orientation: i32) -> Self {
        self.exif_orientation = orientation;
        self
    }
}

/// Three-plane YUV image. Strides are in bytes; 0 means tight.
#[derive(Debug, Clone, Copy)]
pub struct PlanarImage<'a> {
    pub image_type: ImageType,
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
    pub width: usize,
    pub height: usize,
    pub y_stride: usize,
    pub u_stride: usize,
    pub v_stride: usize,
    /// 1 for planar, 2 for semi-planar, 0 to derive from the type
    pub uv_pixel_stride: usize,
    pub exif_orientation: i32,
}

impl<'a> PlanarImage<'a> {
    pub fn new(
        image_type: ImageType,
        planes: [&'a [u8]; 3],
        width: usize,
        height: usize,
    ) -> Self {
        let [y, u, v] = planes;
        Self {
            image_type,
            y,
            u,
            v,
            width,
            height,
            y_stride: 0,
            u_stride: 0,
            v_stride: 0,
            uv_pixel_stride: 0,
            exif_orientation: exif::DEFAULT_ORIENTATION as i32,
        }
    }

    pub fn with_strides(mut self, y_stride: usize, u_stride: usize, v_stride: usize) -> Self {
        self.y_stride = y_stride;
        self.u_stride = u_stride;
        self.v_stride = v_stride;
        self
    }

    pub fn with_uv_pixel_stride(mut self, uv_pixel_stride: usize) -> Self {
        self.uv_pixel_stride = uv_pixel_stride;
        self
    }

    pub fn with_orientation(mut self, orientation: i32) -> Self {
        self.exif_orientation = orientation;
        self
    }
}

/// Encoded JPEG/PNG/BMP bytes.
#[derive(Debug, Clone, Copy)]
pub struct EncodedImage<'a> {
    pub data: &'a [u8],
}

/// Any of the three input shapes.
#[derive(Debug, Clone, Copy)]
pub enum ImageInput<'a> {
    Packed(PackedImage<'a>),
    Planar(PlanarImage<'a>),
    Encoded(EncodedImage<'a>),
}

impl<'a> ImageInput<'a> {
    pub fn packed(image_type: ImageType, data: &'a [u8], width: usize, height: usize) -> Self {
        ImageInput::Packed(PackedImage::new(image_type, data, width, height))
    }

    pub fn encoded(data: &'a [u8]) -> Self {
        ImageInput::Encoded(EncodedImage { data })
    }

    /// Validate the descriptor and copy what evaluation needs.
    pub(crate) fn to_source(&self) -> Result<FrameSource> {
        match self {
            ImageInput::Packed(img) => packed_frame(img).map(FrameSource::Raw),
            ImageInput::Planar(img) => planar_frame(img).map(FrameSource::Raw),
            ImageInput::Encoded(img) => {
                if img.data.is_empty() {
                    return Err(invalid("encoded buffer is empty"));
                }
                let format = image::guess_format(img.data)
                    .map_err(|e| KycError::Decode(format!("unrecognized encoded image: {}", e)))?;
                Ok(FrameSource::Encoded {
                    bytes: copy_prefix(img.data, img.data.len())?,
                    format,
                })
            }
        }
    }
}

impl<'a> From<PackedImage<'a>> for ImageInput<'a> {
    fn from(img: PackedImage<'a>) -> Self {
        ImageInput::Packed(img)
    }
}

impl<'a> From<PlanarImage<'a>> for ImageInput<'a> {
    fn from(img: PlanarImage<'a>) -> Self {
        ImageInput::Planar(img)
    }
}

impl<'a> From<EncodedImage<'a>> for ImageInput<'a> {
    fn from(img: EncodedImage<'a>) -> Self {
        ImageInput::Encoded(img)
    }
}

// ============================================================================
// Owned frames
// ============================================================================

/// One owned image plane. `stride` and `pixel_stride` are in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    pub stride: usize,
    pub pixel_stride: usize,
}

/// Validated, owned frame handed to the verification backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub image_type: ImageType,
    pub width: usize,
    pub height: usize,
    /// EXIF orientation, 1-8
    pub orientation: u8,
    /// One plane for packed types, three (Y, U, V) for YUV types
    pub planes: Vec<Plane>,
}

impl Frame {
    /// Render the frame as an 8-bit image (YUV frames as their luma plane).
    pub fn to_dynamic_image(&self) -> Option<DynamicImage> {
        let plane = self.planes.first()?;
        let bpp = self.image_type.bytes_per_pixel().unwrap_or(1);
        let row_bytes = self.width * bpp;

        let mut tight = Vec::with_capacity(row_bytes * self.height);
        for row in 0..self.height {
            let start = row * plane.stride;
            tight.extend_from_slice(plane.data.get(start..start + row_bytes)?);
        }

        match self.image_type {
            ImageType::Rgb24 => {
                RgbImage::from_raw(self.width as u32, self.height as u32, tight).map(Into::into)
            }
            ImageType::Bgr24 => {
                tight.chunks_exact_mut(3).for_each(|px| px.swap(0, 2));
                RgbImage::from_raw(self.width as u32, self.height as u32, tight).map(Into::into)
            }
            ImageType::Rgba32 => {
                RgbaImage::from_raw(self.width as u32, self.height as u32, tight).map(Into::into)
            }
            ImageType::Bgra32 => {
                tight.chunks_exact_mut(4).for_each(|px| px.swap(0, 2));
                RgbaImage::from_raw(self.width as u32, self.height as u32, tight).map(Into::into)
            }
            _ => GrayImage::from_raw(self.width as u32, self.height as u32, tight).map(Into::into),
        }
    }
}

/// Input as queued for evaluation: raw frames are ready, encoded bytes
/// are decoded by whoever evaluates them.
#[derive(Debug, Clone)]
pub(crate) enum FrameSource {
    Raw(Frame),
    Encoded { bytes: Vec<u8>, format: ImageFormat },
}

impl FrameSource {
    pub(crate) fn into_frame(self) -> Result<Frame> {
        match self {
            FrameSource::Raw(frame) => Ok(frame),
            FrameSource::Encoded { bytes, format } => decode(&bytes, format),
        }
    }

    /// Write the input under `dir` for offline inspection.
    pub(crate) fn dump(&self, dir: &Path, index: u64) -> Result<()> {
        match self {
            FrameSource::Raw(frame) => {
                let img = frame
                    .to_dynamic_image()
                    .ok_or_else(|| invalid("frame cannot be rendered"))?;
                img.save(dir.join(format!("kyc-input-{}.png", index)))
                    .map_err(|e| KycError::Io(e.to_string()))
            }
            FrameSource::Encoded { bytes, .. } => {
                std::fs::write(dir.join(format!("kyc-input-{}.bin", index)), bytes)?;
                Ok(())
            }
        }
    }
}

fn decode(bytes: &[u8], format: ImageFormat) -> Result<Frame> {
    let orientation = if format == ImageFormat::Jpeg {
        exif::orientation_or_default(bytes)
    } else {
        exif::DEFAULT_ORIENTATION
    };

    let rgb = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| KycError::Decode(e.to_string()))?
        .to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);

    Ok(Frame {
        image_type: ImageType::Rgb24,
        width,
        height,
        orientation,
        planes: vec![Plane {
            data: rgb.into_raw(),
            stride: width * 3,
            pixel_stride: 3,
        }],
    })
}

// ============================================================================
// Validation
// ============================================================================

fn invalid(reason: impl Into<String>) -> KycError {
    KycError::InvalidImageDescriptor(reason.into())
}

fn check_common(width: usize, height: usize, orientation: i32) -> Result<u8> {
    if width == 0 || height == 0 {
        return Err(invalid(format!(
            "dimensions must be non-zero, got {}x{}",
            width, height
        )));
    }
    if !(1..=8).contains(&orientation) {
        return Err(invalid(format!(
            "EXIF orientation {} outside [1, 8]",
            orientation
        )));
    }
    Ok(orientation as u8)
}

fn mul(a: usize, b: usize) -> Result<usize> {
    a.checked_mul(b)
        .ok_or_else(|| invalid("image dimensions overflow"))
}

fn add(a: usize, b: usize) -> Result<usize> {
    a.checked_add(b)
        .ok_or_else(|| invalid("image dimensions overflow"))
}

/// Bytes needed to hold `rows` rows of `row_bytes` spaced by `stride`.
fn span(stride: usize, rows: usize, row_bytes: usize) -> Result<usize> {
    add(mul(stride, rows - 1)?, row_bytes)
}

fn check_len(name: &str, have: usize, need: usize) -> Result<()> {
    if have < need {
        return Err(invalid(format!(
            "{} buffer holds {} bytes, {} required",
            name, have, need
        )));
    }
    Ok(())
}

fn copy_prefix(data: &[u8], len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)?;
    buf.extend_from_slice(&data[..len]);
    Ok(buf)
}

fn packed_frame(img: &PackedImage<'_>) -> Result<Frame> {
    let orientation = check_common(img.width, img.height, img.exif_orientation)?;
    let stride = if img.stride == 0 { img.width } else { img.stride };
    if stride < img.width {
        return Err(invalid(format!(
            "stride {} smaller than width {}",
            stride, img.width
        )));
    }

    let planes = match img.image_type.bytes_per_pixel() {
        Some(bpp) => {
            let stride_bytes = mul(stride, bpp)?;
            let need = span(stride_bytes, img.height, mul(img.width, bpp)?)?;
            check_len("image", img.data.len(), need)?;
            vec![Plane {
                data: copy_prefix(img.data, need)?,
                stride: stride_bytes,
                pixel_stride: bpp,
            }]
        }
        None => {
            // Contiguous planes sharing the luma stride
            let (_, ch) = img.image_type.chroma_size(img.width, img.height);
            let luma_len = mul(stride, img.height)?;
            let (chroma_stride, chroma_planes) = if img.image_type.is_semi_planar() {
                (stride, 1)
            } else if img.image_type == ImageType::Yuv444p {
                (stride, 2)
            } else {
                (stride.div_ceil(2), 2)
            };
            let chroma_len = mul(chroma_stride, ch)?;
            let need = add(luma_len, mul(chroma_len, chroma_planes)?)?;
            check_len("image", img.data.len(), need)?;

            let data = &img.data[..need];
            let chroma = &data[luma_len..];
            let pixel_stride = img.image_type.default_uv_pixel_stride();
            let (u, v) = match img.image_type {
                ImageType::Nv12 => (&chroma[..], &chroma[1..]),
                ImageType::Nv21 => (&chroma[1..], &chroma[..]),
                ImageType::Yvu420p => (&chroma[chroma_len..], &chroma[..chroma_len]),
                _ => (&chroma[..chroma_len], &chroma[chroma_len..]),
            };
            vec![
                Plane {
                    data: copy_prefix(data, luma_len)?,
                    stride,
                    pixel_stride: 1,
                },
                Plane {
                    data: copy_prefix(u, u.len().min(chroma_len))?,
                    stride: chroma_stride,
                    pixel_stride,
                },
                Plane {
                    data: copy_prefix(v, v.len().min(chroma_len))?,
                    stride: chroma_stride,
                    pixel_stride,
                },
            ]
        }
    };

    Ok(Frame {
        image_type: img.image_type,
        width: img.width,
        height: img.height,
        orientation,
        planes,
    })
}

fn planar_frame(img: &PlanarImage<'_>) -> Result<Frame> {
    if !img.image_type.is_yuv() {
        return Err(invalid(format!(
            "{:?} is not a planar YUV type",
            img.image_type
        )));
    }
    let orientation = check_common(img.width, img.height, img.exif_orientation)?;

    let pixel_stride = match img.uv_pixel_stride {
        0 => img.image_type.default_uv_pixel_stride(),
        1 | 2 => img.uv_pixel_stride,
        other => {
            return Err(invalid(format!(
                "uv pixel stride {} must be 0, 1 or 2",
                other
            )))
        }
    };
    let (cw, ch) = img.image_type.chroma_size(img.width, img.height);
    let chroma_row = add(mul(cw - 1, pixel_stride)?, 1)?;

    let y_stride = if img.y_stride == 0 { img.width } else { img.y_stride };
    let u_stride = if img.u_stride == 0 { mul(cw, pixel_stride)? } else { img.u_stride };
    let v_stride = if img.v_stride == 0 { mul(cw, pixel_stride)? } else { img.v_stride };
    if y_stride < img.width {
        return Err(invalid(format!(
            "Y stride {} smaller than width {}",
            y_stride, img.width
        )));
    }
    if u_stride < chroma_row || v_stride < chroma_row {
        return Err(invalid(format!(
            "chroma strides {}/{} smaller than chroma row {}",
            u_stride, v_stride, chroma_row
        )));
    }

    let y_need = span(y_stride, img.height, img.width)?;
    let u_need = span(u_stride, ch, chroma_row)?;
    let v_need = span(v_stride, ch, chroma_row)?;
    check_len("Y", img.y.len(), y_need)?;
    check_len("U", img.u.len(), u_need)?;
    check_len("V", img.v.len(), v_need)?;

    Ok(Frame {
        image_type: img.image_type,
        width: img.width,
        height: img.height,
        orientation,
        planes: vec![
            Plane {
                data: copy_prefix(img.y, y_need)?,
                stride: y_stride,
                pixel_stride: 1,
            },
            Plane {
                data: copy_prefix(img.u, u_need)?,
                stride: u_stride,
                pixel_stride,
            },
            Plane {
                data: copy_prefix(img.v, v_need)?,
                stride: v_stride,
                pixel_stride,
            },
        ],
    })
}
