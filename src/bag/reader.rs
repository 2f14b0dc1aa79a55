use super::record::{
    read_header, read_record, Fields, OP_BAG_HEADER, OP_CHUNK, OP_CHUNK_INFO, OP_CONNECTION,
    OP_INDEX_DATA, OP_MESSAGE_DATA,
};
use super::{BagError, Compression, Connection, ConnectionInfo, Time, MAGIC};
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

struct ChunkInfo {
    pos: u64,
    start: Time,
    end: Time,
}

struct IndexEntry {
    time: Time,
    conn: u32,
    chunk: usize,
    offset: u32,
}

/// An indexed bag opened for reading.
pub struct BagReader {
    file: BufReader<File>,
    connections: BTreeMap<u32, Connection>,
    chunks: Vec<ChunkInfo>,
    index: Vec<IndexEntry>,
}

impl BagReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BagError> {
        let mut file = BufReader::new(File::open(path.as_ref())?);

        let mut magic = [0; MAGIC.len()];
        file.read_exact(&mut magic).map_err(|_| BagError::BadMagic)?;
        if magic != MAGIC {
            return Err(BagError::BadMagic);
        }

        let (header, _) = read_record(&mut file)?.ok_or(BagError::Truncated)?;
        header.expect_op(OP_BAG_HEADER)?;
        let index_pos = header.read_u64("index_pos")?;
        if index_pos == 0 {
            return Err(BagError::Unindexed);
        }

        file.seek(SeekFrom::Start(index_pos))?;

        let mut connections = BTreeMap::new();
        let mut chunks = Vec::new();

        while let Some((fields, data)) = read_record(&mut file)? {
            match fields.op()? {
                OP_CONNECTION => {
                    let connection = parse_connection(&fields, &data)?;
                    connections.insert(connection.id, connection);
                }
                OP_CHUNK_INFO => chunks.push(ChunkInfo {
                    pos: fields.read_u64("chunk_pos")?,
                    start: fields.read_time("start_time")?,
                    end: fields.read_time("end_time")?,
                }),
                _ => {}
            }
        }

        chunks.sort_by_key(|chunk| chunk.pos);

        let mut index = Vec::new();

        for (chunk_number, chunk) in chunks.iter().enumerate() {
            file.seek(SeekFrom::Start(chunk.pos))?;

            let (fields, data_len) = read_header(&mut file)?.ok_or(BagError::Truncated)?;
            fields.expect_op(OP_CHUNK)?;
            file.seek(SeekFrom::Current(data_len as i64))?;

            // index data records follow their chunk
            while let Some((fields, data_len)) = read_header(&mut file)? {
                if fields.op()? != OP_INDEX_DATA {
                    break;
                }

                let conn = fields.read_u32("conn")?;
                let count = fields.read_u32("count")?;
                if data_len as u64 != count as u64 * 12 {
                    return Err(BagError::BadField("count"));
                }

                for _ in 0..count {
                    let sec = file.read_u32::<LittleEndian>()?;
                    let nsec = file.read_u32::<LittleEndian>()?;
                    let offset = file.read_u32::<LittleEndian>()?;
                    index.push(IndexEntry {
                        time: Time::new(sec, nsec),
                        conn,
                        chunk: chunk_number,
                        offset,
                    });
                }
            }
        }

        index.sort_by_key(|entry| (entry.time, entry.chunk, entry.offset));

        log::debug!(
            "opened bag {} ({} connections, {} chunks, {} messages)",
            path.as_ref().display(),
            connections.len(),
            chunks.len(),
            index.len()
        );

        Ok(Self {
            file,
            connections,
            chunks,
            index,
        })
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn message_total(&self) -> usize {
        self.index.len()
    }

    pub fn message_count(&self, topic: &str) -> usize {
        self.index
            .iter()
            .filter(|entry| {
                self.connections
                    .get(&entry.conn)
                    .map_or(false, |connection| connection.topic == topic)
            })
            .count()
    }

    pub fn start_time(&self) -> Option<Time> {
        self.chunks.iter().map(|chunk| chunk.start).min()
    }

    pub fn end_time(&self) -> Option<Time> {
        self.chunks.iter().map(|chunk| chunk.end).max()
    }

    /// Iterates over every message in timestamp order.
    pub fn messages(&mut self) -> Messages<'_> {
        Messages {
            file: &mut self.file,
            connections: &self.connections,
            chunks: &self.chunks,
            entries: self.index.iter(),
            cached: None,
        }
    }
}

fn parse_connection(fields: &Fields, data: &[u8]) -> Result<Connection, BagError> {
    let details = Fields::parse(data)?;

    Ok(Connection {
        id: fields.read_u32("conn")?,
        topic: fields.read_string("topic")?,
        info: ConnectionInfo {
            datatype: details.read_string("type")?,
            md5sum: details.read_string("md5sum")?,
            definition: details.read_string("message_definition")?,
            callerid: details.read_optional_string("callerid")?,
            latching: details.get("latching") == Some(b"1".as_slice()),
        },
    })
}

pub struct MessageRecord<'a> {
    pub connection: &'a Connection,
    pub time: Time,
    pub data: Vec<u8>,
}

pub struct Messages<'a> {
    file: &'a mut BufReader<File>,
    connections: &'a BTreeMap<u32, Connection>,
    chunks: &'a [ChunkInfo],
    entries: std::slice::Iter<'a, IndexEntry>,
    cached: Option<(usize, Vec<u8>)>,
}

impl<'a> Messages<'a> {
    fn load_chunk(&mut self, chunk: usize) -> Result<&[u8], BagError> {
        if self.cached.as_ref().map(|(number, _)| *number) != Some(chunk) {
            self.file.seek(SeekFrom::Start(self.chunks[chunk].pos))?;
            let (fields, data) = read_record(self.file)?.ok_or(BagError::Truncated)?;
            fields.expect_op(OP_CHUNK)?;

            let compression = fields.read_string("compression")?;
            let compression: Compression = compression.parse()?;
            let size = fields.read_u32("size")? as usize;

            self.cached = Some((chunk, compression.decompress(&data, size)?));
        }

        match &self.cached {
            Some((_, data)) => Ok(data),
            None => Err(BagError::Truncated),
        }
    }

    fn read_entry(&mut self, entry: &IndexEntry) -> Result<MessageRecord<'a>, BagError> {
        let connections = self.connections;
        let chunk = self.load_chunk(entry.chunk)?;

        let mut cursor = chunk
            .get(entry.offset as usize..)
            .ok_or(BagError::Truncated)?;
        let (fields, data) = read_record(&mut cursor)?.ok_or(BagError::Truncated)?;
        fields.expect_op(OP_MESSAGE_DATA)?;

        let conn = fields.read_u32("conn")?;
        let connection = connections
            .get(&conn)
            .ok_or(BagError::UnknownConnection(conn))?;

        Ok(MessageRecord {
            connection,
            time: fields.read_time("time")?,
            data,
        })
    }
}

impl<'a> Iterator for Messages<'a> {
    type Item = Result<MessageRecord<'a>, BagError>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.next()?;
        Some(self.read_entry(entry))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}
