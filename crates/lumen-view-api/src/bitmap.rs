//! Bitmap types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{DeviceIntSize, Frame};

/// Pixel byte layout, all formats are 32 bits per pixel.
///
/// The name lists the bytes in memory order, so `Bgra8888` pixels read as a little-endian `u32` are `0xAARRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitmapFormat {
    /// Blue, green, red, alpha. Renderers paint in this format.
    Bgra8888,
    /// Blue, green, red, ignored.
    Bgrx8888,
    /// Red, green, blue, alpha. Most host platform bitmaps use this format.
    Rgba8888,
    /// Red, green, blue, ignored.
    Rgbx8888,
}
impl BitmapFormat {
    /// All formats.
    pub const ALL: [BitmapFormat; 4] = [
        BitmapFormat::Bgra8888,
        BitmapFormat::Bgrx8888,
        BitmapFormat::Rgba8888,
        BitmapFormat::Rgbx8888,
    ];

    /// Bytes used by each pixel.
    pub const fn bytes_per_pixel(self) -> usize {
        4
    }

    /// If the fourth byte is alpha, otherwise it is padding.
    pub const fn has_alpha(self) -> bool {
        matches!(self, BitmapFormat::Bgra8888 | BitmapFormat::Rgba8888)
    }

    /// Meaning of each byte of a pixel, in memory order.
    pub const fn layout(self) -> [PixelChannel; 4] {
        use PixelChannel::*;
        match self {
            BitmapFormat::Bgra8888 => [B, G, R, A],
            BitmapFormat::Bgrx8888 => [B, G, R, X],
            BitmapFormat::Rgba8888 => [R, G, B, A],
            BitmapFormat::Rgbx8888 => [R, G, B, X],
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            BitmapFormat::Bgra8888 => 0,
            BitmapFormat::Bgrx8888 => 1,
            BitmapFormat::Rgba8888 => 2,
            BitmapFormat::Rgbx8888 => 3,
        }
    }
}

/// Meaning of a pixel byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelChannel {
    /// Red.
    R,
    /// Green.
    G,
    /// Blue.
    B,
    /// Alpha.
    A,
    /// Padding, occupies the alpha slot.
    X,
}

/// How the color channels relate to alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlphaType {
    /// Color channels are already multiplied by alpha.
    Premultiplied,
    /// Straight alpha.
    Unpremultiplied,
}

/// Format and alpha combinations that can be wrapped and composited.
pub const SUPPORTED_FORMATS: &[(BitmapFormat, AlphaType)] = &[
    (BitmapFormat::Bgra8888, AlphaType::Premultiplied),
    (BitmapFormat::Bgrx8888, AlphaType::Premultiplied),
    (BitmapFormat::Rgba8888, AlphaType::Premultiplied),
    (BitmapFormat::Rgbx8888, AlphaType::Premultiplied),
];

/// If the `format` and `alpha` combination is in [`SUPPORTED_FORMATS`].
pub fn is_supported(format: BitmapFormat, alpha: AlphaType) -> bool {
    SUPPORTED_FORMATS.contains(&(format, alpha))
}

/// 8-bit per channel color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    /// Red.
    pub r: u8,
    /// Green.
    pub g: u8,
    /// Blue.
    pub b: u8,
    /// Alpha.
    pub a: u8,
}
impl Rgba {
    /// Magenta, used to make missing frames obvious.
    pub const MAGENTA: Rgba = Rgba::new(255, 0, 255, 255);
    /// Opaque black.
    pub const BLACK: Rgba = Rgba::new(0, 0, 0, 255);
    /// Opaque white.
    pub const WHITE: Rgba = Rgba::new(255, 255, 255, 255);

    /// New color.
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Encode the color as one pixel of `format`.
    pub fn to_pixel(self, format: BitmapFormat) -> [u8; 4] {
        format.layout().map(|c| match c {
            PixelChannel::R => self.r,
            PixelChannel::G => self.g,
            PixelChannel::B => self.b,
            PixelChannel::A | PixelChannel::X => self.a,
        })
    }

    /// Decode one pixel of `format`.
    pub fn from_pixel(px: [u8; 4], format: BitmapFormat) -> Self {
        let mut c = Rgba::new(0, 0, 0, 0);
        for (byte, channel) in px.into_iter().zip(format.layout()) {
            match channel {
                PixelChannel::R => c.r = byte,
                PixelChannel::G => c.g = byte,
                PixelChannel::B => c.b = byte,
                PixelChannel::A | PixelChannel::X => c.a = byte,
            }
        }
        c
    }
}

/// Bitmap error.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BitmapError {
    /// Format and alpha combination is not in [`SUPPORTED_FORMATS`].
    UnsupportedFormat(BitmapFormat, AlphaType),
    /// Width or height is negative.
    InvalidSize(DeviceIntSize),
    /// Stride is less than `width * 4`.
    StrideTooSmall {
        /// Requested stride.
        stride: usize,
        /// Minimum stride for the width.
        min: usize,
    },
    /// Buffer is shorter than `stride * height`.
    BufferTooSmall {
        /// Buffer length.
        len: usize,
        /// Required length.
        min: usize,
    },
    /// The byte length of a row or of the whole bitmap does not fit in `usize`.
    SizeOverflow(DeviceIntSize),
}
impl fmt::Display for BitmapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BitmapError::UnsupportedFormat(format, alpha) => write!(f, "unsupported bitmap format {format:?} with {alpha:?} alpha"),
            BitmapError::InvalidSize(size) => write!(f, "invalid bitmap size {}x{}", size.width, size.height),
            BitmapError::StrideTooSmall { stride, min } => write!(f, "bitmap stride {stride} is less than the minimum {min}"),
            BitmapError::BufferTooSmall { len, min } => write!(f, "bitmap buffer of {len} bytes is less than the required {min}"),
            BitmapError::SizeOverflow(size) => write!(f, "bitmap of {}x{} pixels is too large", size.width, size.height),
        }
    }
}
impl std::error::Error for BitmapError {}

/// Minimal stride for the `size`.
fn min_stride(format: BitmapFormat, size: DeviceIntSize) -> Result<usize, BitmapError> {
    if size.width < 0 || size.height < 0 {
        return Err(BitmapError::InvalidSize(size));
    }
    (size.width as usize)
        .checked_mul(format.bytes_per_pixel())
        .ok_or(BitmapError::SizeOverflow(size))
}

/// Returns the `stride * height` byte length that is accessed.
fn validate(format: BitmapFormat, alpha: AlphaType, size: DeviceIntSize, stride: usize, len: usize) -> Result<usize, BitmapError> {
    if !is_supported(format, alpha) {
        return Err(BitmapError::UnsupportedFormat(format, alpha));
    }
    let min = min_stride(format, size)?;
    if stride < min {
        return Err(BitmapError::StrideTooSmall { stride, min });
    }
    let min = stride.checked_mul(size.height as usize).ok_or(BitmapError::SizeOverflow(size))?;
    if len < min {
        return Err(BitmapError::BufferTooSmall { len, min });
    }
    Ok(min)
}

enum BitmapData<'a> {
    Owned(Vec<u8>),
    Borrowed(&'a mut [u8]),
}

/// Fixed format, fixed stride pixel buffer.
///
/// Owned bitmaps are `Bitmap<'static>`, bitmaps that wrap caller memory borrow it for `'a` and
/// cannot outlive the call that received the memory.
pub struct Bitmap<'a> {
    size: DeviceIntSize,
    stride: usize,
    // validated `stride * height`.
    len: usize,
    format: BitmapFormat,
    alpha: AlphaType,
    data: BitmapData<'a>,
}
impl<'a> Bitmap<'a> {
    /// Wrap external pixel memory.
    ///
    /// Only the first `stride * height` bytes of `data` are ever accessed.
    pub fn wrap(format: BitmapFormat, alpha: AlphaType, size: DeviceIntSize, stride: usize, data: &'a mut [u8]) -> Result<Self, BitmapError> {
        let len = validate(format, alpha, size, stride, data.len())?;
        Ok(Self {
            size,
            stride,
            len,
            format,
            alpha,
            data: BitmapData::Borrowed(data),
        })
    }

    /// Size in pixels.
    pub fn size(&self) -> DeviceIntSize {
        self.size
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.size.width as usize
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.size.height as usize
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Pixel format.
    pub fn format(&self) -> BitmapFormat {
        self.format
    }

    /// Alpha encoding.
    pub fn alpha(&self) -> AlphaType {
        self.alpha
    }

    /// If the bitmap wraps external memory.
    pub fn is_borrowed(&self) -> bool {
        matches!(self.data, BitmapData::Borrowed(_))
    }

    /// All rows, `stride * height` bytes.
    pub fn bytes(&self) -> &[u8] {
        let len = self.len;
        match &self.data {
            BitmapData::Owned(d) => &d[..len],
            BitmapData::Borrowed(d) => &d[..len],
        }
    }

    /// All rows, `stride * height` bytes.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        match &mut self.data {
            BitmapData::Owned(d) => &mut d[..len],
            BitmapData::Borrowed(d) => &mut d[..len],
        }
    }

    /// Pixels of the row `y`, `width * 4` bytes, row padding excluded.
    ///
    /// # Panics
    ///
    /// If `y` is out of bounds.
    pub fn scanline(&self, y: usize) -> &[u8] {
        assert!(y < self.height(), "scanline {y} out of bounds");
        let start = y * self.stride;
        let w = self.width() * self.format.bytes_per_pixel();
        &self.bytes()[start..start + w]
    }

    /// Pixels of the row `y`, `width * 4` bytes, row padding excluded.
    ///
    /// # Panics
    ///
    /// If `y` is out of bounds.
    pub fn scanline_mut(&mut self, y: usize) -> &mut [u8] {
        assert!(y < self.height(), "scanline {y} out of bounds");
        let start = y * self.stride;
        let w = self.width() * self.format.bytes_per_pixel();
        &mut self.bytes_mut()[start..start + w]
    }

    /// Read one pixel.
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        assert!(x < self.width(), "pixel x {x} out of bounds");
        let i = x * 4;
        let row = self.scanline(y);
        [row[i], row[i + 1], row[i + 2], row[i + 3]]
    }

    /// Copy into a new owned bitmap with the same stride.
    pub fn to_owned_bitmap(&self) -> Bitmap<'static> {
        Bitmap {
            size: self.size,
            stride: self.stride,
            len: self.len,
            format: self.format,
            alpha: self.alpha,
            data: BitmapData::Owned(self.bytes().to_vec()),
        }
    }
}
impl Bitmap<'static> {
    /// New zeroed bitmap with the minimal stride.
    pub fn new_owned(format: BitmapFormat, alpha: AlphaType, size: DeviceIntSize) -> Result<Self, BitmapError> {
        let stride = min_stride(format, size)?;
        let len = stride.checked_mul(size.height as usize).ok_or(BitmapError::SizeOverflow(size))?;
        let data = vec![0; len];
        validate(format, alpha, size, stride, len)?;
        Ok(Self {
            size,
            stride,
            len,
            format,
            alpha,
            data: BitmapData::Owned(data),
        })
    }

    /// Take ownership of the pixels of a frame received from the renderer.
    pub fn from_frame(frame: Frame) -> Result<Self, BitmapError> {
        let len = validate(frame.format, frame.alpha, frame.size, frame.stride, frame.pixels.len())?;
        Ok(Self {
            size: frame.size,
            stride: frame.stride,
            len,
            format: frame.format,
            alpha: frame.alpha,
            data: BitmapData::Owned(frame.pixels),
        })
    }

    /// Convert to a frame that can be send to the UI process.
    pub fn into_frame(self) -> Frame {
        let len = self.len;
        let pixels = match self.data {
            BitmapData::Owned(mut d) => {
                d.truncate(len);
                d
            }
            BitmapData::Borrowed(d) => d[..len].to_vec(),
        };
        Frame {
            size: self.size,
            stride: self.stride,
            format: self.format,
            alpha: self.alpha,
            pixels,
        }
    }
}
impl fmt::Debug for Bitmap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("size", &self.size)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("alpha", &self.alpha)
            .field("borrowed", &self.is_borrowed())
            .finish_non_exhaustive()
    }
}
