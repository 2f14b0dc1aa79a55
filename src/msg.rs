//! ROS1 serialization of the handful of message types the splitter touches.

use crate::bag::{ConnectionInfo, Time};
use byteorder::{LittleEndian, ReadBytesExt};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MsgError {
    #[error("message is truncated")]
    Truncated,
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

pub trait RosMessage: Sized {
    const DATATYPE: &'static str;
    const MD5SUM: &'static str;
    const DEFINITION: &'static str;

    fn read(input: &mut &[u8]) -> Result<Self, MsgError>;

    fn write(&self, out: &mut Vec<u8>);

    fn decode(mut bytes: &[u8]) -> Result<Self, MsgError> {
        let message = Self::read(&mut bytes)?;
        if !bytes.is_empty() {
            return Err(MsgError::TrailingBytes(bytes.len()));
        }
        Ok(message)
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out);
        out
    }

    fn connection_info() -> ConnectionInfo {
        ConnectionInfo {
            datatype: Self::DATATYPE.to_owned(),
            md5sum: Self::MD5SUM.to_owned(),
            definition: Self::DEFINITION.to_owned(),
            callerid: None,
            latching: false,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Header {
    pub seq: u32,
    pub stamp: Time,
    pub frame_id: String,
}

impl Header {
    fn read(input: &mut &[u8]) -> Result<Self, MsgError> {
        Ok(Self {
            seq: read_u32(input)?,
            stamp: Time::new(read_u32(input)?, read_u32(input)?),
            frame_id: read_string(input)?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        write_u32(out, self.seq);
        write_u32(out, self.stamp.sec);
        write_u32(out, self.stamp.nsec);
        write_bytes(out, self.frame_id.as_bytes());
    }
}

/// `sensor_msgs/Image`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Image {
    pub header: Header,
    pub height: u32,
    pub width: u32,
    pub encoding: String,
    pub is_bigendian: bool,
    pub step: u32,
    pub data: Vec<u8>,
}

impl RosMessage for Image {
    const DATATYPE: &'static str = "sensor_msgs/Image";
    const MD5SUM: &'static str = "060021388200f6f0f447d0fcd9c64743";
    const DEFINITION: &'static str = concat!(
        "std_msgs/Header header\n",
        "uint32 height\n",
        "uint32 width\n",
        "string encoding\n",
        "uint8 is_bigendian\n",
        "uint32 step\n",
        "uint8[] data\n",
        "\n",
        "================================================================================\n",
        "MSG: std_msgs/Header\n",
        "uint32 seq\n",
        "time stamp\n",
        "string frame_id\n",
    );

    fn read(input: &mut &[u8]) -> Result<Self, MsgError> {
        Ok(Self {
            header: Header::read(input)?,
            height: read_u32(input)?,
            width: read_u32(input)?,
            encoding: read_string(input)?,
            is_bigendian: input.read_u8().map_err(|_| MsgError::Truncated)? != 0,
            step: read_u32(input)?,
            data: read_bytes(input)?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        self.header.write(out);
        write_u32(out, self.height);
        write_u32(out, self.width);
        write_bytes(out, self.encoding.as_bytes());
        out.push(self.is_bigendian as u8);
        write_u32(out, self.step);
        write_bytes(out, &self.data);
    }
}

/// `sensor_msgs/CompressedImage`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompressedImage {
    pub header: Header,
    pub format: String,
    pub data: Vec<u8>,
}

impl RosMessage for CompressedImage {
    const DATATYPE: &'static str = "sensor_msgs/CompressedImage";
    const MD5SUM: &'static str = "8f7a12909da2c9d3332d540a0977563f";
    const DEFINITION: &'static str = concat!(
        "std_msgs/Header header\n",
        "string format\n",
        "uint8[] data\n",
        "\n",
        "================================================================================\n",
        "MSG: std_msgs/Header\n",
        "uint32 seq\n",
        "time stamp\n",
        "string frame_id\n",
    );

    fn read(input: &mut &[u8]) -> Result<Self, MsgError> {
        Ok(Self {
            header: Header::read(input)?,
            format: read_string(input)?,
            data: read_bytes(input)?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        self.header.write(out);
        write_bytes(out, self.format.as_bytes());
        write_bytes(out, &self.data);
    }
}

fn read_u32(input: &mut &[u8]) -> Result<u32, MsgError> {
    input
        .read_u32::<LittleEndian>()
        .map_err(|_| MsgError::Truncated)
}

fn read_bytes(input: &mut &[u8]) -> Result<Vec<u8>, MsgError> {
    let len = read_u32(input)? as usize;
    if len > input.len() {
        return Err(MsgError::Truncated);
    }
    let remaining: &[u8] = *input;
    let (bytes, rest) = remaining.split_at(len);
    *input = rest;
    Ok(bytes.to_vec())
}

fn read_string(input: &mut &[u8]) -> Result<String, MsgError> {
    String::from_utf8(read_bytes(input)?).map_err(|_| MsgError::InvalidUtf8)
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Header {
        Header {
            seq: 42,
            stamp: Time::new(1_650_000_000, 123),
            frame_id: "arducam".to_owned(),
        }
    }

    #[test]
    fn compressed_image_wire_layout() {
        let message = CompressedImage {
            header: header(),
            format: "jpeg".to_owned(),
            data: vec![0xff, 0xd8],
        };

        let mut expected = Vec::new();
        expected.extend_from_slice(&42u32.to_le_bytes());
        expected.extend_from_slice(&1_650_000_000u32.to_le_bytes());
        expected.extend_from_slice(&123u32.to_le_bytes());
        expected.extend_from_slice(&7u32.to_le_bytes());
        expected.extend_from_slice(b"arducam");
        expected.extend_from_slice(&4u32.to_le_bytes());
        expected.extend_from_slice(b"jpeg");
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.extend_from_slice(&[0xff, 0xd8]);

        assert_eq!(message.encode(), expected);
        assert_eq!(CompressedImage::decode(&expected).unwrap(), message);
    }

    #[test]
    fn image_keeps_every_field() {
        let message = Image {
            header: header(),
            height: 2,
            width: 3,
            encoding: "bgr8".to_owned(),
            is_bigendian: false,
            step: 9,
            data: (0..18).collect(),
        };

        let decoded = Image::decode(&message.encode()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn rejects_short_and_long_payloads() {
        let bytes = CompressedImage {
            header: header(),
            format: "png".to_owned(),
            data: vec![1, 2, 3],
        }
        .encode();

        assert_eq!(
            CompressedImage::decode(&bytes[..bytes.len() - 1]),
            Err(MsgError::Truncated)
        );

        let mut long = bytes.clone();
        long.push(0);
        assert_eq!(
            CompressedImage::decode(&long),
            Err(MsgError::TrailingBytes(1))
        );
    }

    #[test]
    fn rejects_invalid_frame_id() {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, 0);
        write_u32(&mut bytes, 0);
        write_u32(&mut bytes, 0);
        write_bytes(&mut bytes, &[0xc3, 0x28]);
        write_bytes(&mut bytes, b"jpeg");
        write_bytes(&mut bytes, &[]);

        assert_eq!(CompressedImage::decode(&bytes), Err(MsgError::InvalidUtf8));
    }

    #[test]
    fn connection_info_matches_message_type() {
        let info = CompressedImage::connection_info();
        assert_eq!(info.datatype, "sensor_msgs/CompressedImage");
        assert!(info.definition.contains("MSG: std_msgs/Header"));
        assert!(!info.latching);
    }
}
