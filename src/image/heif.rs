//! HEIC/HEIF decoding.
//!
//! Decoding goes through libheif and is only compiled with the `heic`
//! feature; builds without it report every HEIF upload as a conversion
//! failure.

use crate::error::{RecolorError, Result};
use image::{DynamicImage, RgbImage};

#[cfg(feature = "heic")]
pub(crate) fn decode_heif(bytes: &[u8]) -> Result<DynamicImage> {
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let conversion = |e: libheif_rs::HeifError| RecolorError::ConversionFailed(e.to_string());

    let lib = LibHeif::new();
    let ctx = HeifContext::read_from_bytes(bytes).map_err(conversion)?;
    let handle = ctx.primary_image_handle().map_err(conversion)?;
    let decoded = lib
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(conversion)?;

    let plane = decoded
        .planes()
        .interleaved
        .ok_or_else(|| RecolorError::ConversionFailed("no interleaved RGB plane".into()))?;

    rgb_from_plane(plane.data, plane.stride, plane.width, plane.height).map(DynamicImage::ImageRgb8)
}

#[cfg(not(feature = "heic"))]
pub(crate) fn decode_heif(_bytes: &[u8]) -> Result<DynamicImage> {
    Err(RecolorError::ConversionFailed(
        "HEIC support is not enabled in this build".into(),
    ))
}

/// Copies an interleaved 8-bit RGB plane into a tightly packed image,
/// dropping the per-row padding beyond `width * 3` bytes.
#[cfg_attr(not(feature = "heic"), allow(dead_code))]
fn rgb_from_plane(data: &[u8], stride: usize, width: u32, height: u32) -> Result<RgbImage> {
    let row_len = width as usize * 3;
    if stride < row_len {
        return Err(RecolorError::ConversionFailed(format!(
            "plane stride {stride} is shorter than a {width} pixel row"
        )));
    }

    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in data.chunks(stride).take(height as usize) {
        let row = row.get(..row_len).ok_or_else(|| {
            RecolorError::ConversionFailed("decoded plane ends mid-row".into())
        })?;
        pixels.extend_from_slice(row);
    }

    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| RecolorError::ConversionFailed("decoded plane has unexpected size".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_from_plane_drops_row_padding() {
        // 2x2 pixels, stride 8: two padding bytes per row, none after the last.
        let data = [
            1, 2, 3, 4, 5, 6, 0xEE, 0xEE, //
            7, 8, 9, 10, 11, 12,
        ];
        let img = rgb_from_plane(&data, 8, 2, 2).unwrap();
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.as_raw(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_rgb_from_plane_rejects_short_input() {
        assert!(matches!(
            rgb_from_plane(&[0; 12], 4, 2, 2),
            Err(RecolorError::ConversionFailed(_))
        ));
        assert!(matches!(
            rgb_from_plane(&[0; 10], 6, 2, 2),
            Err(RecolorError::ConversionFailed(_))
        ));
    }

    #[cfg(not(feature = "heic"))]
    #[test]
    fn test_default_build_rejects_heif() {
        let err = decode_heif(b"\x00\x00\x00\x18ftypheic").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConversionFailed);
        assert!(err.to_string().contains("not enabled"));
    }

    #[cfg(feature = "heic")]
    mod libheif {
        use crate::image::{ImageFormat, Normalizer, RawUpload};
        use libheif_rs::{
            Channel, ColorSpace, CompressionFormat, HeifContext, Image, LibHeif, RgbChroma,
        };

        /// Encodes a flat grey HEIC, or `None` when libheif has no HEVC encoder.
        fn heic_fixture(width: u32, height: u32) -> Option<Vec<u8>> {
            let lib = LibHeif::new();
            let mut encoder = match lib.encoder_for_format(CompressionFormat::Hevc) {
                Ok(encoder) => encoder,
                Err(e) => {
                    eprintln!("skipping: libheif has no HEVC encoder ({e})");
                    return None;
                }
            };

            let mut image = Image::new(width, height, ColorSpace::Rgb(RgbChroma::C444)).unwrap();
            for channel in [Channel::R, Channel::G, Channel::B] {
                image.create_plane(channel, width, height, 8).unwrap();
            }
            let planes = image.planes_mut();
            for mut plane in [planes.r, planes.g, planes.b].into_iter().flatten() {
                plane.data.fill(128);
            }

            let mut ctx = HeifContext::new().unwrap();
            ctx.encode_image(&image, &mut encoder, None).unwrap();
            Some(ctx.write_to_bytes().unwrap())
        }

        #[test]
        fn test_decode_heif_keeps_dimensions() {
            let Some(bytes) = heic_fixture(64, 48) else {
                return;
            };
            let img = crate::image::heif::decode_heif(&bytes).unwrap();
            assert_eq!((img.width(), img.height()), (64, 48));
        }

        #[test]
        fn test_normalize_transcodes_heic_to_jpeg() {
            let Some(bytes) = heic_fixture(64, 48) else {
                return;
            };
            let out = Normalizer::new()
                .normalize(&RawUpload::new(bytes).with_declared_type("image/heic"))
                .unwrap();
            assert_eq!(out.source_format, ImageFormat::Heic);
            assert_eq!((out.width, out.height), (64, 48));
            assert_eq!(out.content_type(), "image/jpeg");
        }
    }
}
