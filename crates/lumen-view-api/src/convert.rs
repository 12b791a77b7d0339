//! Pixel format conversion.
//!
//! All supported formats share the 32-bit pixel size and only differ in the byte order of the color
//! channels, so every conversion is a byte permutation. The permutations live in a table keyed by
//! `(source, destination)`, alpha (or padding) always stays in the fourth byte. Padding is undefined, a
//! conversion from a padded format into an alpha format sets the alpha byte to `0xFF`.

use crate::bitmap::BitmapFormat;

/// Byte permutation of one pixel, the destination byte `i` is the source byte `indices()[i]`.
///
/// If [`fills_alpha`] the fourth destination byte is set to `0xFF` after the permutation.
///
/// [`fills_alpha`]: Self::fills_alpha
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Swizzle {
    indices: [u8; 4],
    fill_alpha: bool,
}
impl Swizzle {
    /// Keeps the bytes.
    pub const IDENTITY: Swizzle = Swizzle::new([0, 1, 2, 3]);
    /// Swaps the first and third bytes, converts between BGR and RGB orders.
    pub const SWAP_RB: Swizzle = Swizzle::new([2, 1, 0, 3]);

    /// New permutation.
    pub const fn new(indices: [u8; 4]) -> Self {
        Self { indices, fill_alpha: false }
    }

    /// Same permutation that also sets the fourth byte to `0xFF`.
    pub const fn with_opaque_alpha(self) -> Self {
        Self {
            indices: self.indices,
            fill_alpha: true,
        }
    }

    /// Source byte index for each destination byte.
    pub const fn indices(self) -> [u8; 4] {
        self.indices
    }

    /// If the fourth destination byte is set to `0xFF`.
    pub const fn fills_alpha(self) -> bool {
        self.fill_alpha
    }

    /// If applying the permutation does not change any pixel.
    pub fn is_identity(self) -> bool {
        self == Self::IDENTITY
    }

    /// Permutation equivalent to applying `self` and then `next`.
    pub fn then(self, next: Swizzle) -> Swizzle {
        Swizzle {
            indices: next.indices.map(|i| self.indices[i as usize]),
            // alpha always maps to the fourth byte.
            fill_alpha: self.fill_alpha || next.fill_alpha,
        }
    }

    /// Permute one pixel.
    pub fn apply(self, px: [u8; 4]) -> [u8; 4] {
        let mut out = self.indices.map(|i| px[i as usize]);
        if self.fill_alpha {
            out[3] = 0xFF;
        }
        out
    }

    /// Permute every pixel of `pixels` in place.
    ///
    /// # Panics
    ///
    /// If the length is not a multiple of 4.
    pub fn apply_in_place(self, pixels: &mut [u8]) {
        if self.is_identity() {
            return;
        }
        let pixels: &mut [[u8; 4]] = bytemuck::cast_slice_mut(pixels);
        for px in pixels {
            *px = self.apply(*px);
        }
    }
}

const I: Swizzle = Swizzle::IDENTITY;
const S: Swizzle = Swizzle::SWAP_RB;
const IF: Swizzle = Swizzle::IDENTITY.with_opaque_alpha();
const SF: Swizzle = Swizzle::SWAP_RB.with_opaque_alpha();

/// Indexed by `[source][destination]`, in the order of [`BitmapFormat::ALL`].
static CONVERSIONS: [[Swizzle; 4]; 4] = [
    // Bgra8888  Bgrx8888  Rgba8888  Rgbx8888
    [I, I, S, S],   // from Bgra8888
    [IF, I, SF, S], // from Bgrx8888
    [S, S, I, I],   // from Rgba8888
    [SF, S, IF, I], // from Rgbx8888
];

/// Get the permutation that converts pixels from `source` to `destination` format.
pub fn conversion(source: BitmapFormat, destination: BitmapFormat) -> Swizzle {
    CONVERSIONS[source.index()][destination.index()]
}

/// Convert every pixel of `pixels` in place.
pub fn convert_in_place(pixels: &mut [u8], source: BitmapFormat, destination: BitmapFormat) {
    conversion(source, destination).apply_in_place(pixels)
}
