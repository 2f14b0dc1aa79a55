use super::{BagError, Time};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

pub const OP_MESSAGE_DATA: u8 = 0x02;
pub const OP_BAG_HEADER: u8 = 0x03;
pub const OP_INDEX_DATA: u8 = 0x04;
pub const OP_CHUNK: u8 = 0x05;
pub const OP_CHUNK_INFO: u8 = 0x06;
pub const OP_CONNECTION: u8 = 0x07;

/// Header of a record: an ordered list of `name=value` fields.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Fields {
    inner: Vec<(String, Vec<u8>)>,
}

impl Fields {
    pub fn with_op(op: u8) -> Self {
        Self::default().bytes("op", [op])
    }

    pub fn parse(mut bytes: &[u8]) -> Result<Self, BagError> {
        let mut inner = Vec::new();

        while !bytes.is_empty() {
            let len = bytes
                .read_u32::<LittleEndian>()
                .map_err(|_| BagError::Truncated)? as usize;
            if len > bytes.len() {
                return Err(BagError::Truncated);
            }
            let (field, rest) = bytes.split_at(len);
            bytes = rest;

            let eq = field
                .iter()
                .position(|&b| b == b'=')
                .ok_or(BagError::MalformedField)?;
            let name = std::str::from_utf8(&field[..eq]).map_err(|_| BagError::MalformedField)?;
            inner.push((name.to_owned(), field[eq + 1..].to_vec()));
        }

        Ok(Self { inner })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in &self.inner {
            out.extend_from_slice(&((name.len() + 1 + value.len()) as u32).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.push(b'=');
            out.extend_from_slice(value);
        }
        out
    }

    pub fn bytes(mut self, name: &str, value: impl AsRef<[u8]>) -> Self {
        self.inner.push((name.to_owned(), value.as_ref().to_vec()));
        self
    }

    pub fn u32(self, name: &str, value: u32) -> Self {
        self.bytes(name, value.to_le_bytes())
    }

    pub fn u64(self, name: &str, value: u64) -> Self {
        self.bytes(name, value.to_le_bytes())
    }

    pub fn time(self, name: &str, value: Time) -> Self {
        self.bytes(name, value.to_le_bytes())
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.inner
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_slice())
    }

    fn require(&self, name: &'static str) -> Result<&[u8], BagError> {
        self.get(name).ok_or(BagError::MissingField(name))
    }

    fn fixed<const N: usize>(&self, name: &'static str) -> Result<[u8; N], BagError> {
        self.require(name)?
            .try_into()
            .map_err(|_| BagError::BadField(name))
    }

    pub fn op(&self) -> Result<u8, BagError> {
        Ok(self.fixed::<1>("op")?[0])
    }

    pub fn expect_op(&self, expected: u8) -> Result<(), BagError> {
        match self.op()? {
            found if found == expected => Ok(()),
            found => Err(BagError::UnexpectedOp { expected, found }),
        }
    }

    pub fn read_u32(&self, name: &'static str) -> Result<u32, BagError> {
        Ok(u32::from_le_bytes(self.fixed(name)?))
    }

    pub fn read_u64(&self, name: &'static str) -> Result<u64, BagError> {
        Ok(u64::from_le_bytes(self.fixed(name)?))
    }

    pub fn read_time(&self, name: &'static str) -> Result<Time, BagError> {
        Ok(Time::from_le_bytes(self.fixed(name)?))
    }

    pub fn read_string(&self, name: &'static str) -> Result<String, BagError> {
        String::from_utf8(self.require(name)?.to_vec()).map_err(|_| BagError::BadField(name))
    }

    pub fn read_optional_string(&self, name: &'static str) -> Result<Option<String>, BagError> {
        match self.get(name) {
            Some(_) => self.read_string(name).map(Some),
            None => Ok(None),
        }
    }
}

/// Reads a record header and the length of the data block that follows it.
/// Returns `None` at a clean end of file.
pub fn read_header<R: Read>(reader: &mut R) -> Result<Option<(Fields, u32)>, BagError> {
    let header_len = match reader.read_u32::<LittleEndian>() {
        Ok(len) => len,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let header = read_exact_vec(reader, header_len)?;
    let fields = Fields::parse(&header)?;
    let data_len = reader
        .read_u32::<LittleEndian>()
        .map_err(truncated_on_eof)?;

    Ok(Some((fields, data_len)))
}

pub fn read_record<R: Read>(reader: &mut R) -> Result<Option<(Fields, Vec<u8>)>, BagError> {
    match read_header(reader)? {
        Some((fields, data_len)) => Ok(Some((fields, read_exact_vec(reader, data_len)?))),
        None => Ok(None),
    }
}

fn read_exact_vec<R: Read>(reader: &mut R, len: u32) -> Result<Vec<u8>, BagError> {
    let mut buf = Vec::new();
    reader.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len as usize {
        return Err(BagError::Truncated);
    }
    Ok(buf)
}

fn truncated_on_eof(err: io::Error) -> BagError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        BagError::Truncated
    } else {
        err.into()
    }
}

/// Writes one record, returning the number of bytes written.
pub fn write_record<W: Write>(writer: &mut W, fields: &Fields, data: &[u8]) -> io::Result<u64> {
    let header = fields.encode();
    writer.write_u32::<LittleEndian>(header.len() as u32)?;
    writer.write_all(&header)?;
    writer.write_u32::<LittleEndian>(data.len() as u32)?;
    writer.write_all(data)?;
    Ok(8 + header.len() as u64 + data.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_keep_binary_values() {
        let fields = Fields::with_op(OP_MESSAGE_DATA)
            .u32("conn", 7)
            .time("time", Time::new(12, 34))
            .bytes("topic", "/a=b");
        let parsed = Fields::parse(&fields.encode()).unwrap();

        assert_eq!(parsed.op().unwrap(), OP_MESSAGE_DATA);
        assert_eq!(parsed.read_u32("conn").unwrap(), 7);
        assert_eq!(parsed.read_time("time").unwrap(), Time::new(12, 34));
        // only the first `=` separates name and value
        assert_eq!(parsed.read_string("topic").unwrap(), "/a=b");
    }

    #[test]
    fn rejects_bad_fields() {
        let fields = Fields::with_op(OP_CHUNK).bytes("size", [1, 2]);
        assert!(matches!(
            fields.read_u32("size"),
            Err(BagError::BadField("size"))
        ));
        assert!(matches!(
            fields.read_u32("conn"),
            Err(BagError::MissingField("conn"))
        ));
        assert!(matches!(
            fields.expect_op(OP_CONNECTION),
            Err(BagError::UnexpectedOp {
                expected: OP_CONNECTION,
                found: OP_CHUNK
            })
        ));

        let mut encoded = fields.encode();
        encoded.truncate(encoded.len() - 1);
        assert!(matches!(Fields::parse(&encoded), Err(BagError::Truncated)));
        assert!(matches!(
            Fields::parse(&[3, 0, 0, 0, b'a', b'b', b'c']),
            Err(BagError::MalformedField)
        ));
    }

    #[test]
    fn reads_back_written_records() {
        let mut buf = Vec::new();
        let fields = Fields::with_op(OP_CHUNK).bytes("compression", "none");
        let written = write_record(&mut buf, &fields, b"payload").unwrap();
        assert_eq!(written, buf.len() as u64);

        let mut cursor = buf.as_slice();
        let (read_fields, data) = read_record(&mut cursor).unwrap().unwrap();
        assert_eq!(read_fields, fields);
        assert_eq!(data, b"payload");
        assert!(read_record(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn truncated_data_is_an_error() {
        let mut buf = Vec::new();
        write_record(&mut buf, &Fields::with_op(OP_CHUNK), b"payload").unwrap();
        buf.truncate(buf.len() - 2);
        assert!(matches!(
            read_record(&mut buf.as_slice()),
            Err(BagError::Truncated)
        ));
    }
}
