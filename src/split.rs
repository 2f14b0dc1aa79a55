use image::DynamicImage;
use std::num::NonZeroU32;

/// Number of cameras on the rig.
pub const SPLIT_COUNT: NonZeroU32 = match NonZeroU32::new(4) {
    Some(count) => count,
    None => unreachable!(),
};

/// Cuts `image` into `parts` equal-width vertical strips, left to right.
/// Columns past `parts * (width / parts)` are dropped.
pub fn split_image(image: &DynamicImage, parts: NonZeroU32) -> Vec<DynamicImage> {
    let sub_width = image.width() / parts.get();

    (0..parts.get())
        .map(|i| image.crop_imm(i * sub_width, 0, sub_width, image.height()))
        .collect()
}

/// Output topic of strip `index`, e.g. `/arducam/image_2/compressed`.
pub fn sub_topic(prefix: &str, index: u32) -> String {
    format!("{}_{}/compressed", prefix, index)
}
