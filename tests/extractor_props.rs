use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use proptest::prelude::*;

use mlaas_core::features::FeatureExtractor;

fn encode(width: u32, height: u32, pixels: &[u8], format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        let i = ((y * width + x) as usize * 3) % pixels.len();
        Rgb([
            pixels[i],
            pixels[(i + 1) % pixels.len()],
            pixels[(i + 2) % pixels.len()],
        ])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img).write_to(&mut out, format).unwrap();
    out.into_inner()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn extraction_is_pure_and_fixed_length(
        width in 1u32..24,
        height in 1u32..24,
        pixels in prop::collection::vec(any::<u8>(), 3..64),
        side in 1u32..12,
    ) {
        let payload = encode(width, height, &pixels, ImageFormat::Png);
        let extractor = FeatureExtractor::new(side, side);

        let first = extractor.extract(&payload).unwrap();
        let second = extractor.extract(&payload).unwrap();
        prop_assert_eq!(first.len(), extractor.feature_len());
        prop_assert!(first.as_slice().iter().all(|v| (0.0..=255.0).contains(v)));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn bmp_and_png_of_the_same_pixels_agree(
        width in 1u32..16,
        height in 1u32..16,
        pixels in prop::collection::vec(any::<u8>(), 3..32),
    ) {
        let extractor = FeatureExtractor::new(8, 8);
        let png = extractor.extract(&encode(width, height, &pixels, ImageFormat::Png)).unwrap();
        let bmp = extractor.extract(&encode(width, height, &pixels, ImageFormat::Bmp)).unwrap();
        prop_assert_eq!(png, bmp);
    }
}
