#![allow(dead_code)]

use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Rgb};
use quadcam_tools::bag::{BagReader, BagWriter, Compression, ConnectionInfo, Time};
use quadcam_tools::msg::{CompressedImage, Header, Image, RosMessage};
use std::io::Cursor;
use std::path::Path;

pub const COMPRESSED_TOPIC: &str = "/arducam/image/compressed";
pub const RAW_TOPIC: &str = "/arducam/image/raw";

/// One entry of a test bag, written in order.
pub enum Entry {
    Combined { time: Time, seq: u32 },
    RawCombined { time: Time, seq: u32 },
    Other { topic: &'static str, time: Time, payload: Vec<u8> },
}

pub fn string_info() -> ConnectionInfo {
    ConnectionInfo {
        datatype: "std_msgs/String".to_owned(),
        md5sum: "992ce8a1687cec8c8bd883ec73ca41d1".to_owned(),
        definition: "string data\n".to_owned(),
        callerid: Some("/recorder".to_owned()),
        latching: false,
    }
}

pub fn header(seq: u32, time: Time) -> Header {
    Header {
        seq,
        stamp: time,
        frame_id: "quadcam".to_owned(),
    }
}

/// A combined frame whose four quarters have distinct flat colours.
pub fn quad_frame(width: u32, height: u32) -> DynamicImage {
    let quarter = (width / 4).max(1);
    DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, _| {
        quarter_colour((x / quarter).min(3))
    }))
}

pub fn quarter_colour(i: u32) -> Rgb<u8> {
    [
        Rgb([250, 0, 0]),
        Rgb([0, 250, 0]),
        Rgb([0, 0, 250]),
        Rgb([250, 250, 250]),
    ][i as usize]
}

pub fn compressed_frame(seq: u32, time: Time, width: u32, height: u32) -> CompressedImage {
    let mut data = Cursor::new(Vec::new());
    quad_frame(width, height)
        .write_to(&mut data, ImageOutputFormat::Png)
        .unwrap();
    CompressedImage {
        header: header(seq, time),
        format: "png".to_owned(),
        data: data.into_inner(),
    }
}

pub fn raw_frame(seq: u32, time: Time, width: u32, height: u32) -> Image {
    let mut data = quad_frame(width, height).to_rgb8().into_raw();
    for pixel in data.chunks_exact_mut(3) {
        pixel.swap(0, 2);
    }
    Image {
        header: header(seq, time),
        height,
        width,
        encoding: "bgr8".to_owned(),
        is_bigendian: false,
        step: width * 3,
        data,
    }
}

pub fn write_bag(path: &Path, entries: &[Entry], width: u32, height: u32) {
    let mut writer = BagWriter::create(path, Compression::None).unwrap();

    for entry in entries {
        match entry {
            Entry::Combined { time, seq } => {
                let conn = writer
                    .add_connection(COMPRESSED_TOPIC, &CompressedImage::connection_info())
                    .unwrap();
                let message = compressed_frame(*seq, *time, width, height);
                writer.write(conn, *time, &message.encode()).unwrap();
            }
            Entry::RawCombined { time, seq } => {
                let conn = writer
                    .add_connection(RAW_TOPIC, &Image::connection_info())
                    .unwrap();
                let message = raw_frame(*seq, *time, width, height);
                writer.write(conn, *time, &message.encode()).unwrap();
            }
            Entry::Other {
                topic,
                time,
                payload,
            } => {
                let conn = writer.add_connection(topic, &string_info()).unwrap();
                writer.write(conn, *time, payload).unwrap();
            }
        }
    }

    writer.finish().unwrap();
}

/// Every message of a bag as (topic, time, payload), in read order.
pub fn read_all(path: &Path) -> Vec<(String, Time, Vec<u8>)> {
    let mut reader = BagReader::open(path).unwrap();
    reader
        .messages()
        .map(|record| {
            let record = record.unwrap();
            (record.connection.topic.clone(), record.time, record.data)
        })
        .collect()
}

pub fn time(ms: u64) -> Time {
    Time::from_nanos(1_700_000_000_000_000_000 + ms * 1_000_000)
}
