//! Copies renderer frames into host bitmaps.

use lumen_view_api::{
    bitmap::{Bitmap, Rgba},
    convert,
};

/// Composites a renderer frame into a host bitmap.
///
/// The source is copied at the origin, clipped to the destination, without scaling. The destination
/// area not covered by the source is filled with the [`sentinel`] color, so the host never shows
/// undefined memory. Only the `width * 4` bytes of each destination row are written, row padding is
/// never touched.
///
/// [`sentinel`]: Self::sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCompositor {
    sentinel: Rgba,
}
impl FrameCompositor {
    /// New compositor.
    pub fn new(sentinel: Rgba) -> Self {
        Self { sentinel }
    }

    /// Color painted where there is no frame.
    pub fn sentinel(&self) -> Rgba {
        self.sentinel
    }

    /// Copy the `source` into the `dest`, converting pixel format, or fill the `dest` with the sentinel
    /// color if there is no source.
    pub fn composite(&self, dest: &mut Bitmap<'_>, source: Option<&Bitmap<'_>>) {
        let dest_format = dest.format();
        let fill: [u8; 4] = self.sentinel.to_pixel(dest_format);
        let dest_width = dest.width();
        let dest_height = dest.height();

        let (copy_width, copy_height, swizzle) = match source {
            Some(s) => (
                s.width().min(dest_width),
                s.height().min(dest_height),
                convert::conversion(s.format(), dest_format),
            ),
            None => (0, 0, convert::conversion(dest_format, dest_format)),
        };
        let copy_len = copy_width * 4;

        for y in 0..dest_height {
            let row = dest.scanline_mut(y);
            let (copied, uncovered) = if y < copy_height {
                row.split_at_mut(copy_len)
            } else {
                row.split_at_mut(0)
            };

            if let Some(s) = source.filter(|_| !copied.is_empty()) {
                copied.copy_from_slice(&s.scanline(y)[..copy_len]);
                swizzle.apply_in_place(copied);
            }

            let uncovered: &mut [[u8; 4]] = bytemuck::cast_slice_mut(uncovered);
            uncovered.fill(fill);
        }
    }
}
impl Default for FrameCompositor {
    /// Magenta sentinel.
    fn default() -> Self {
        Self::new(Rgba::MAGENTA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_view_api::{AlphaType, BitmapFormat, DeviceIntSize};
    use pretty_assertions::assert_eq;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn bgra_into_rgba() {
        // 0xAARRGGBB, blue then green.
        let mut src = words_to_bytes(&[0xFF0000FF, 0xFF00FF00]);
        let source = Bitmap::wrap(BitmapFormat::Bgra8888, AlphaType::Premultiplied, DeviceIntSize::new(2, 1), 8, &mut src).unwrap();

        let mut dst = vec![0u8; 8];
        let mut dest = Bitmap::wrap(BitmapFormat::Rgba8888, AlphaType::Premultiplied, DeviceIntSize::new(2, 1), 8, &mut dst).unwrap();

        FrameCompositor::default().composite(&mut dest, Some(&source));
        drop(dest);

        // 0xAABBGGRR, alpha kept in the last byte.
        assert_eq!(dst, words_to_bytes(&[0xFFFF0000, 0xFF00FF00]));
        assert_eq!(&dst[..4], &[0x00, 0x00, 0xFF, 0xFF]);
    }

    #[test]
    fn padded_source_is_opaque() {
        let mut src = vec![11, 22, 33, 0, 44, 55, 66, 0x80];
        let source = Bitmap::wrap(BitmapFormat::Bgrx8888, AlphaType::Premultiplied, DeviceIntSize::new(2, 1), 8, &mut src).unwrap();
        let mut dest = Bitmap::new_owned(BitmapFormat::Rgba8888, AlphaType::Premultiplied, DeviceIntSize::new(2, 1)).unwrap();

        FrameCompositor::default().composite(&mut dest, Some(&source));

        assert_eq!(dest.bytes(), &[33, 22, 11, 255, 66, 55, 44, 255]);
    }

    #[test]
    fn no_source_fills_sentinel() {
        for format in BitmapFormat::ALL {
            let mut dst = vec![0u8; 3 * 4 * 2];
            let mut dest = Bitmap::wrap(format, AlphaType::Premultiplied, DeviceIntSize::new(3, 2), 12, &mut dst).unwrap();
            FrameCompositor::default().composite(&mut dest, None);

            for y in 0..2 {
                for x in 0..3 {
                    assert_eq!(Rgba::from_pixel(dest.pixel(x, y), format), Rgba::MAGENTA, "{format:?}");
                }
            }
        }
    }

    #[test]
    fn custom_sentinel() {
        let compositor = FrameCompositor::new(Rgba::new(1, 2, 3, 255));
        let mut dest = Bitmap::new_owned(BitmapFormat::Rgba8888, AlphaType::Premultiplied, DeviceIntSize::new(1, 1)).unwrap();
        compositor.composite(&mut dest, None);
        assert_eq!(dest.bytes(), &[1, 2, 3, 255]);
    }

    #[test]
    fn clips_and_fills_uncovered() {
        // 3x1 source into 2x2 destination.
        let mut src = words_to_bytes(&[0xFF112233, 0xFF445566, 0xFF778899]);
        let source = Bitmap::wrap(BitmapFormat::Bgra8888, AlphaType::Premultiplied, DeviceIntSize::new(3, 1), 12, &mut src).unwrap();
        let mut dest = Bitmap::new_owned(BitmapFormat::Bgra8888, AlphaType::Premultiplied, DeviceIntSize::new(2, 2)).unwrap();

        FrameCompositor::default().composite(&mut dest, Some(&source));

        assert_eq!(dest.pixel(0, 0), 0xFF112233u32.to_le_bytes());
        assert_eq!(dest.pixel(1, 0), 0xFF445566u32.to_le_bytes());
        let magenta = Rgba::MAGENTA.to_pixel(BitmapFormat::Bgra8888);
        assert_eq!(dest.pixel(0, 1), magenta);
        assert_eq!(dest.pixel(1, 1), magenta);
    }

    #[test]
    fn stride_padding_untouched() {
        const PAD: u8 = 0xAB;
        for (w, h, src_stride, dst_stride) in [(1, 1, 4, 4), (2, 3, 12, 16), (3, 2, 16, 12), (4, 4, 20, 28), (5, 1, 20, 24)] {
            let mut src: Vec<u8> = (0..src_stride * h).map(|i| i as u8).collect();
            let source = Bitmap::wrap(
                BitmapFormat::Bgra8888,
                AlphaType::Premultiplied,
                DeviceIntSize::new(w as i32, h as i32),
                src_stride,
                &mut src,
            )
            .unwrap();

            // one extra row after the destination end.
            let mut dst = vec![PAD; dst_stride * (h + 1)];
            let mut dest = Bitmap::wrap(
                BitmapFormat::Rgba8888,
                AlphaType::Premultiplied,
                DeviceIntSize::new(w as i32, h as i32),
                dst_stride,
                &mut dst,
            )
            .unwrap();
            FrameCompositor::default().composite(&mut dest, Some(&source));
            drop(dest);

            for y in 0..h {
                let row = &dst[y * dst_stride..(y + 1) * dst_stride];
                assert!(row[w * 4..].iter().all(|&b| b == PAD), "row {y} padding, {w}x{h}");
            }
            assert!(dst[dst_stride * h..].iter().all(|&b| b == PAD), "past end, {w}x{h}");
        }
    }

    #[test]
    fn composite_is_idempotent() {
        let mut src = words_to_bytes(&[0xFF0000FF, 0x80402010, 0xFF00FF00, 0x00000000]);
        let source = Bitmap::wrap(BitmapFormat::Bgra8888, AlphaType::Premultiplied, DeviceIntSize::new(2, 2), 8, &mut src).unwrap();
        let mut dest = Bitmap::new_owned(BitmapFormat::Rgba8888, AlphaType::Premultiplied, DeviceIntSize::new(3, 2)).unwrap();

        let compositor = FrameCompositor::default();
        compositor.composite(&mut dest, Some(&source));
        let first = dest.bytes().to_vec();
        compositor.composite(&mut dest, Some(&source));
        assert_eq!(dest.bytes(), &first[..]);
    }

    #[test]
    fn same_format_is_plain_copy() {
        let mut src = words_to_bytes(&[0x11223344, 0x55667788]);
        let expected = src.clone();
        let source = Bitmap::wrap(BitmapFormat::Rgba8888, AlphaType::Premultiplied, DeviceIntSize::new(2, 1), 8, &mut src).unwrap();
        let mut dest = Bitmap::new_owned(BitmapFormat::Rgbx8888, AlphaType::Premultiplied, DeviceIntSize::new(2, 1)).unwrap();
        FrameCompositor::default().composite(&mut dest, Some(&source));
        assert_eq!(dest.bytes(), &expected[..]);
    }
}
