//! Reading and writing ROS bag 2.0 files.
//!
//! A bag is a magic line followed by records. Each record is a header made of
//! `name=value` fields and an opaque data block. Messages are grouped in chunks
//! (optionally compressed), and an index section at the end of the file lists
//! connections and chunk positions.

mod reader;
mod record;
mod writer;

pub use reader::{BagReader, MessageRecord, Messages};
pub use writer::BagWriter;

use std::fmt;
use std::str::FromStr;

pub const MAGIC: &[u8] = b"#ROSBAG V2.0\n";

/// Size of the bag header record, padding included.
pub const BAG_HEADER_LEN: u64 = 4096;

#[derive(Debug, thiserror::Error)]
pub enum BagError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("not a ROS bag 2.0 file")]
    BadMagic,
    #[error("record is truncated")]
    Truncated,
    #[error("malformed header field")]
    MalformedField,
    #[error("missing header field `{0}`")]
    MissingField(&'static str),
    #[error("header field `{0}` has an invalid value")]
    BadField(&'static str),
    #[error("expected record op {expected:#04x}, found {found:#04x}")]
    UnexpectedOp { expected: u8, found: u8 },
    #[error("unsupported chunk compression `{0}`")]
    UnsupportedCompression(String),
    #[error("bag is not indexed")]
    Unindexed,
    #[error("message references unknown connection {0}")]
    UnknownConnection(u32),
    #[error(transparent)]
    Lz4(#[from] lz4_flex::frame::Error),
    #[error("chunk decompressed to {have} bytes, header says {need}")]
    ChunkSize { have: usize, need: usize },
}

/// ROS time: seconds and nanoseconds since the epoch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time {
    pub sec: u32,
    pub nsec: u32,
}

impl Time {
    pub const fn new(sec: u32, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    pub fn from_nanos(nanos: u64) -> Self {
        Self {
            sec: (nanos / 1_000_000_000) as u32,
            nsec: (nanos % 1_000_000_000) as u32,
        }
    }

    pub fn as_nanos(&self) -> u64 {
        self.sec as u64 * 1_000_000_000 + self.nsec as u64
    }

    /// Signed difference `self - earlier` in seconds.
    pub fn secs_since(&self, earlier: Time) -> f64 {
        (self.as_nanos() as i128 - earlier.as_nanos() as i128) as f64 / 1e9
    }

    pub fn to_le_bytes(&self) -> [u8; 8] {
        let mut bytes = [0; 8];
        bytes[..4].copy_from_slice(&self.sec.to_le_bytes());
        bytes[4..].copy_from_slice(&self.nsec.to_le_bytes());
        bytes
    }

    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self {
            sec: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            nsec: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}

/// Chunk compression.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Lz4,
    Bz2,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lz4 => "lz4",
            Self::Bz2 => "bz2",
        }
    }

    pub(crate) fn compress(&self, data: &[u8]) -> Result<Vec<u8>, BagError> {
        use std::io::Write;

        match self {
            Self::None => Ok(data.to_vec()),
            Self::Lz4 => {
                let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            Self::Bz2 => {
                let mut encoder =
                    bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
        }
    }

    pub(crate) fn decompress(&self, data: &[u8], size: usize) -> Result<Vec<u8>, BagError> {
        use std::io::Read;

        let out = match self {
            Self::None => data.to_vec(),
            Self::Lz4 => {
                let mut out = Vec::with_capacity(size);
                lz4_flex::frame::FrameDecoder::new(data).read_to_end(&mut out)?;
                out
            }
            Self::Bz2 => {
                let mut out = Vec::with_capacity(size);
                bzip2::read::BzDecoder::new(data).read_to_end(&mut out)?;
                out
            }
        };

        if out.len() != size {
            return Err(BagError::ChunkSize {
                have: out.len(),
                need: size,
            });
        }

        Ok(out)
    }
}

impl FromStr for Compression {
    type Err = BagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "lz4" => Ok(Self::Lz4),
            "bz2" => Ok(Self::Bz2),
            other => Err(BagError::UnsupportedCompression(other.to_owned())),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a connection carries, apart from its topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub datatype: String,
    pub md5sum: String,
    pub definition: String,
    pub callerid: Option<String>,
    pub latching: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: u32,
    pub topic: String,
    pub info: ConnectionInfo,
}
