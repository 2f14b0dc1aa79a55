use super::record::{
    write_record, Fields, OP_BAG_HEADER, OP_CHUNK, OP_CHUNK_INFO, OP_CONNECTION, OP_INDEX_DATA,
    OP_MESSAGE_DATA,
};
use super::{BagError, Compression, Connection, ConnectionInfo, Time, BAG_HEADER_LEN, MAGIC};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

const CHUNK_THRESHOLD: usize = 768 * 1024;

struct OpenChunk {
    buf: Vec<u8>,
    start: Time,
    end: Time,
    index: BTreeMap<u32, Vec<(Time, u32)>>,
}

impl OpenChunk {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            start: Time::new(u32::MAX, 0),
            end: Time::default(),
            index: BTreeMap::new(),
        }
    }
}

struct ChunkSummary {
    pos: u64,
    start: Time,
    end: Time,
    counts: Vec<(u32, u32)>,
}

/// Writes a bag incrementally. Call [`BagWriter::finish`] to write the index;
/// a writer dropped without it tries to finish on its own.
pub struct BagWriter {
    file: BufWriter<File>,
    pos: u64,
    compression: Compression,
    connections: Vec<Connection>,
    by_topic: HashMap<(String, String, Option<String>), u32>,
    chunk: Option<OpenChunk>,
    summaries: Vec<ChunkSummary>,
    finished: bool,
}

impl BagWriter {
    pub fn create(path: impl AsRef<Path>, compression: Compression) -> Result<Self, BagError> {
        let mut file = BufWriter::new(File::create(path.as_ref())?);
        file.write_all(MAGIC)?;
        let header_len = write_bag_header(&mut file, 0, 0, 0)?;

        log::debug!(
            "writing bag {} ({} chunks)",
            path.as_ref().display(),
            compression
        );

        Ok(Self {
            file,
            pos: MAGIC.len() as u64 + header_len,
            compression,
            connections: Vec::new(),
            by_topic: HashMap::new(),
            chunk: None,
            summaries: Vec::new(),
            finished: false,
        })
    }

    /// Returns the connection id for `topic`, creating the connection on first use.
    /// Publishers with different caller ids get separate connections.
    pub fn add_connection(&mut self, topic: &str, info: &ConnectionInfo) -> Result<u32, BagError> {
        let key = (
            topic.to_owned(),
            info.datatype.clone(),
            info.callerid.clone(),
        );
        if let Some(&id) = self.by_topic.get(&key) {
            return Ok(id);
        }

        let connection = Connection {
            id: self.connections.len() as u32,
            topic: topic.to_owned(),
            info: info.clone(),
        };
        let (fields, data) = connection_record(&connection);
        let chunk = self.chunk.get_or_insert_with(OpenChunk::new);
        write_record(&mut chunk.buf, &fields, &data)?;

        self.by_topic.insert(key, connection.id);
        self.connections.push(connection);

        Ok(self.connections.len() as u32 - 1)
    }

    pub fn write(&mut self, conn: u32, time: Time, data: &[u8]) -> Result<(), BagError> {
        if conn as usize >= self.connections.len() {
            return Err(BagError::UnknownConnection(conn));
        }

        let chunk = self.chunk.get_or_insert_with(OpenChunk::new);
        let offset = chunk.buf.len() as u32;
        let fields = Fields::with_op(OP_MESSAGE_DATA)
            .u32("conn", conn)
            .time("time", time);
        write_record(&mut chunk.buf, &fields, data)?;

        chunk.start = chunk.start.min(time);
        chunk.end = chunk.end.max(time);
        chunk.index.entry(conn).or_default().push((time, offset));

        if chunk.buf.len() >= CHUNK_THRESHOLD {
            self.flush_chunk()?;
        }

        Ok(())
    }

    fn flush_chunk(&mut self) -> Result<(), BagError> {
        let chunk = match self.chunk.take() {
            Some(chunk) => chunk,
            None => return Ok(()),
        };

        // connection records are repeated in the index section
        if chunk.index.is_empty() {
            return Ok(());
        }

        let chunk_pos = self.pos;
        let fields = Fields::with_op(OP_CHUNK)
            .bytes("compression", self.compression.as_str())
            .u32("size", chunk.buf.len() as u32);
        let packed = self.compression.compress(&chunk.buf)?;
        self.pos += write_record(&mut self.file, &fields, &packed)?;

        let mut counts = Vec::with_capacity(chunk.index.len());
        for (conn, entries) in &chunk.index {
            let fields = Fields::with_op(OP_INDEX_DATA)
                .u32("ver", 1)
                .u32("conn", *conn)
                .u32("count", entries.len() as u32);
            let mut data = Vec::with_capacity(entries.len() * 12);
            for (time, offset) in entries {
                data.extend_from_slice(&time.to_le_bytes());
                data.extend_from_slice(&offset.to_le_bytes());
            }
            self.pos += write_record(&mut self.file, &fields, &data)?;
            counts.push((*conn, entries.len() as u32));
        }

        log::debug!(
            "flushed chunk at {} ({} bytes, {} -> {} bytes packed)",
            chunk_pos,
            chunk.buf.len(),
            self.compression,
            packed.len()
        );

        self.summaries.push(ChunkSummary {
            pos: chunk_pos,
            start: chunk.start,
            end: chunk.end,
            counts,
        });

        Ok(())
    }

    fn close(&mut self) -> Result<(), BagError> {
        self.finished = true;

        self.flush_chunk()?;

        let index_pos = self.pos;

        for connection in &self.connections {
            let (fields, data) = connection_record(connection);
            self.pos += write_record(&mut self.file, &fields, &data)?;
        }

        for summary in &self.summaries {
            let fields = Fields::with_op(OP_CHUNK_INFO)
                .u32("ver", 1)
                .u64("chunk_pos", summary.pos)
                .time("start_time", summary.start)
                .time("end_time", summary.end)
                .u32("count", summary.counts.len() as u32);
            let mut data = Vec::with_capacity(summary.counts.len() * 8);
            for (conn, count) in &summary.counts {
                data.extend_from_slice(&conn.to_le_bytes());
                data.extend_from_slice(&count.to_le_bytes());
            }
            self.pos += write_record(&mut self.file, &fields, &data)?;
        }

        self.file.seek(SeekFrom::Start(MAGIC.len() as u64))?;
        write_bag_header(
            &mut self.file,
            index_pos,
            self.connections.len() as u32,
            self.summaries.len() as u32,
        )?;
        self.file.flush()?;

        Ok(())
    }

    pub fn finish(mut self) -> Result<(), BagError> {
        self.close()
    }
}

impl Drop for BagWriter {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.close() {
                log::warn!("failed to finish bag: {}", err);
            }
        }
    }
}

fn connection_record(connection: &Connection) -> (Fields, Vec<u8>) {
    let fields = Fields::with_op(OP_CONNECTION)
        .u32("conn", connection.id)
        .bytes("topic", &connection.topic);

    let info = &connection.info;
    let mut details = Fields::default()
        .bytes("topic", &connection.topic)
        .bytes("type", &info.datatype)
        .bytes("md5sum", &info.md5sum)
        .bytes("message_definition", &info.definition);
    if let Some(callerid) = &info.callerid {
        details = details.bytes("callerid", callerid);
    }
    if info.latching {
        details = details.bytes("latching", "1");
    }

    (fields, details.encode())
}

fn write_bag_header<W: Write>(
    writer: &mut W,
    index_pos: u64,
    conn_count: u32,
    chunk_count: u32,
) -> Result<u64, BagError> {
    let fields = Fields::with_op(OP_BAG_HEADER)
        .u64("index_pos", index_pos)
        .u32("conn_count", conn_count)
        .u32("chunk_count", chunk_count);
    let padding = BAG_HEADER_LEN as usize - 8 - fields.encode().len();
    Ok(write_record(writer, &fields, &vec![b' '; padding])?)
}
