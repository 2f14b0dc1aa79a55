//! Converting image messages to pixel buffers and back.

use crate::msg::{CompressedImage, Header, Image, MsgError, RosMessage};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Luma, Rgb, Rgba};
use std::io::Cursor;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("`{0}` is not an image message type")]
    UnsupportedType(String),
    #[error("unsupported raw image encoding `{0}`")]
    UnsupportedEncoding(String),
    #[error("raw image is empty")]
    Empty,
    #[error("raw image data is {have} bytes, {width}x{height} with step {step} needs {need}")]
    SizeMismatch {
        width: u32,
        height: u32,
        step: u32,
        have: usize,
        need: usize,
    },
    #[error(transparent)]
    Message(#[from] MsgError),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// An image message from one of the combined topics.
#[derive(Debug, Clone)]
pub enum FrameMessage {
    Raw(Image),
    Compressed(CompressedImage),
}

impl FrameMessage {
    pub fn decode(datatype: &str, payload: &[u8]) -> Result<Self, CodecError> {
        if datatype == Image::DATATYPE {
            Ok(Self::Raw(Image::decode(payload)?))
        } else if datatype == CompressedImage::DATATYPE {
            Ok(Self::Compressed(CompressedImage::decode(payload)?))
        } else {
            Err(CodecError::UnsupportedType(datatype.to_owned()))
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            Self::Raw(image) => &image.header,
            Self::Compressed(image) => &image.header,
        }
    }

    pub fn to_image(&self) -> Result<DynamicImage, CodecError> {
        match self {
            Self::Raw(image) => decode_raw(image),
            Self::Compressed(image) => decode_compressed(image),
        }
    }
}

#[derive(Clone, Copy)]
enum Layout {
    Mono8,
    Mono16,
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
}

impl Layout {
    fn from_encoding(encoding: &str) -> Result<Self, CodecError> {
        Ok(match encoding {
            "mono8" | "8UC1" => Self::Mono8,
            "mono16" | "16UC1" => Self::Mono16,
            "rgb8" => Self::Rgb8,
            // OpenCV's 3 and 4 channel types are BGR ordered
            "bgr8" | "8UC3" => Self::Bgr8,
            "rgba8" => Self::Rgba8,
            "bgra8" | "8UC4" => Self::Bgra8,
            other => return Err(CodecError::UnsupportedEncoding(other.to_owned())),
        })
    }

    fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Mono8 => 1,
            Self::Mono16 => 2,
            Self::Rgb8 | Self::Bgr8 => 3,
            Self::Rgba8 | Self::Bgra8 => 4,
        }
    }
}

pub fn decode_raw(message: &Image) -> Result<DynamicImage, CodecError> {
    let layout = Layout::from_encoding(&message.encoding)?;
    let (width, height) = (message.width, message.height);

    if width == 0 || height == 0 {
        return Err(CodecError::Empty);
    }

    let row_len = width as usize * layout.bytes_per_pixel();
    let step = message.step as usize;
    let need = step * (height as usize - 1) + row_len;
    if step < row_len || message.data.len() < need {
        return Err(CodecError::SizeMismatch {
            width,
            height,
            step: message.step,
            have: message.data.len(),
            need,
        });
    }

    let mut packed = Vec::with_capacity(row_len * height as usize);
    for row in message.data.chunks(step).take(height as usize) {
        packed.extend_from_slice(&row[..row_len]);
    }

    let mismatch = || CodecError::SizeMismatch {
        width,
        height,
        step: message.step,
        have: message.data.len(),
        need,
    };

    let image = match layout {
        Layout::Mono8 => DynamicImage::ImageLuma8(
            ImageBuffer::<Luma<u8>, _>::from_raw(width, height, packed).ok_or_else(mismatch)?,
        ),
        Layout::Mono16 => {
            let mut samples = vec![0u16; packed.len() / 2];
            if message.is_bigendian {
                BigEndian::read_u16_into(&packed, &mut samples);
            } else {
                LittleEndian::read_u16_into(&packed, &mut samples);
            }
            DynamicImage::ImageLuma16(
                ImageBuffer::<Luma<u16>, _>::from_raw(width, height, samples)
                    .ok_or_else(mismatch)?,
            )
        }
        Layout::Rgb8 | Layout::Bgr8 => {
            if let Layout::Bgr8 = layout {
                swap_red_blue(&mut packed, 3);
            }
            DynamicImage::ImageRgb8(
                ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, packed).ok_or_else(mismatch)?,
            )
        }
        Layout::Rgba8 | Layout::Bgra8 => {
            if let Layout::Bgra8 = layout {
                swap_red_blue(&mut packed, 4);
            }
            DynamicImage::ImageRgba8(
                ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, packed)
                    .ok_or_else(mismatch)?,
            )
        }
    };

    Ok(image)
}

fn swap_red_blue(pixels: &mut [u8], channels: usize) {
    for pixel in pixels.chunks_exact_mut(channels) {
        pixel.swap(0, 2);
    }
}

pub fn decode_compressed(message: &CompressedImage) -> Result<DynamicImage, CodecError> {
    Ok(image::load_from_memory(&message.data)?)
}

/// Compression used for the sub-images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg { quality: u8 },
    Png,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Jpeg { quality: 95 }
    }
}

/// Compresses `image` into a message carrying `header`. 16-bit images are
/// always written as PNG since JPEG has no 16-bit mode.
pub fn encode_compressed(
    image: &DynamicImage,
    header: &Header,
    format: OutputFormat,
) -> Result<CompressedImage, CodecError> {
    let mut data = Cursor::new(Vec::new());

    let format_name = match (format, image) {
        (OutputFormat::Png, _)
        | (
            OutputFormat::Jpeg { .. },
            DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_)
            | DynamicImage::ImageRgb16(_)
            | DynamicImage::ImageRgba16(_),
        ) => {
            image.write_to(&mut data, ImageOutputFormat::Png)?;
            "png"
        }
        (OutputFormat::Jpeg { quality }, DynamicImage::ImageLuma8(_)) => {
            image.write_to(&mut data, ImageOutputFormat::Jpeg(quality))?;
            "jpeg"
        }
        (OutputFormat::Jpeg { quality }, _) => {
            DynamicImage::ImageRgb8(image.to_rgb8())
                .write_to(&mut data, ImageOutputFormat::Jpeg(quality))?;
            "jpeg"
        }
    };

    Ok(CompressedImage {
        header: header.clone(),
        format: format_name.to_owned(),
        data: data.into_inner(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::Time;
    use image::GenericImageView;

    fn raw(encoding: &str, width: u32, height: u32, step: u32, data: Vec<u8>) -> Image {
        Image {
            header: Header::default(),
            height,
            width,
            encoding: encoding.to_owned(),
            is_bigendian: false,
            step,
            data,
        }
    }

    #[test]
    fn bgr_is_converted_to_rgb() {
        let image = decode_raw(&raw("bgr8", 2, 1, 6, vec![1, 2, 3, 4, 5, 6])).unwrap();
        let rgb = image.to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [3, 2, 1]);
        assert_eq!(rgb.get_pixel(1, 0).0, [6, 5, 4]);
    }

    #[test]
    fn row_padding_is_dropped() {
        // 2x2 mono with 2 bytes of padding per row
        let image = decode_raw(&raw("mono8", 2, 2, 4, vec![1, 2, 0, 0, 3, 4])).unwrap();
        assert_eq!(image.to_luma8().into_raw(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn mono16_honours_endianness() {
        let mut message = raw("mono16", 1, 1, 2, vec![0x01, 0x02]);
        let little = decode_raw(&message).unwrap();
        assert_eq!(little.as_luma16().unwrap().get_pixel(0, 0).0, [0x0201]);

        message.is_bigendian = true;
        let big = decode_raw(&message).unwrap();
        assert_eq!(big.as_luma16().unwrap().get_pixel(0, 0).0, [0x0102]);
    }

    #[test]
    fn rejects_bad_raw_images() {
        assert!(matches!(
            decode_raw(&raw("yuv422", 2, 2, 4, vec![0; 8])),
            Err(CodecError::UnsupportedEncoding(_))
        ));
        assert!(matches!(
            decode_raw(&raw("rgb8", 2, 2, 6, vec![0; 11])),
            Err(CodecError::SizeMismatch { need: 12, .. })
        ));
        assert!(matches!(
            decode_raw(&raw("rgb8", 2, 2, 5, vec![0; 12])),
            Err(CodecError::SizeMismatch { .. })
        ));
        assert!(matches!(
            decode_raw(&raw("rgb8", 0, 2, 0, vec![])),
            Err(CodecError::Empty)
        ));
    }

    #[test]
    fn encoded_message_carries_header() {
        let header = Header {
            seq: 9,
            stamp: Time::new(100, 200),
            frame_id: "cam".to_owned(),
        };
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(16, 8, Rgb([200, 10, 10])));

        let message = encode_compressed(&image, &header, OutputFormat::default()).unwrap();
        assert_eq!(message.header, header);
        assert_eq!(message.format, "jpeg");

        let decoded = decode_compressed(&message).unwrap();
        assert_eq!(decoded.dimensions(), (16, 8));
    }

    #[test]
    fn png_output_is_lossless() {
        let image = DynamicImage::ImageRgba8(ImageBuffer::from_fn(5, 3, |x, y| {
            Rgba([x as u8, y as u8, 7, 255])
        }));
        let message = encode_compressed(&image, &Header::default(), OutputFormat::Png).unwrap();
        assert_eq!(message.format, "png");
        assert_eq!(decode_compressed(&message).unwrap(), image);
    }

    #[test]
    fn sixteen_bit_images_fall_back_to_png() {
        let image = DynamicImage::ImageLuma16(ImageBuffer::from_pixel(4, 4, Luma([4000u16])));
        let message =
            encode_compressed(&image, &Header::default(), OutputFormat::default()).unwrap();
        assert_eq!(message.format, "png");
        assert_eq!(decode_compressed(&message).unwrap(), image);
    }

    #[test]
    fn sixteen_bit_colour_keeps_its_depth() {
        let image = DynamicImage::ImageRgb16(ImageBuffer::from_pixel(
            8,
            4,
            Rgb([4000u16, 100, 60000]),
        ));
        let message =
            encode_compressed(&image, &Header::default(), OutputFormat::default()).unwrap();
        assert_eq!(message.format, "png");
        assert_eq!(decode_compressed(&message).unwrap(), image);

        let image = DynamicImage::ImageRgba16(ImageBuffer::from_pixel(
            2,
            2,
            Rgba([1u16, 2, 3, 65535]),
        ));
        let message =
            encode_compressed(&image, &Header::default(), OutputFormat::default()).unwrap();
        assert_eq!(message.format, "png");
    }

    #[test]
    fn frame_message_selects_decoder_by_type() {
        let raw_payload = raw("mono8", 1, 1, 1, vec![9]).encode();
        let frame = FrameMessage::decode(Image::DATATYPE, &raw_payload).unwrap();
        assert!(matches!(frame, FrameMessage::Raw(_)));
        assert_eq!(frame.to_image().unwrap().to_luma8().into_raw(), vec![9]);

        assert!(matches!(
            FrameMessage::decode("std_msgs/String", &raw_payload),
            Err(CodecError::UnsupportedType(name)) if name == "std_msgs/String"
        ));
    }
}
