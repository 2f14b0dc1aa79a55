//! The splitting pass: one walk over the input bag in timestamp order.

use crate::bag::{BagReader, BagWriter, Connection, MessageRecord, Time};
use crate::codec::{encode_compressed, FrameMessage, OutputFormat};
use crate::msg::{CompressedImage, RosMessage};
use crate::preview::Preview;
use crate::progress::Progress;
use crate::split::{split_image, sub_topic, SPLIT_COUNT};
use anyhow::Context;
use image::DynamicImage;
use std::collections::HashMap;
use std::num::NonZeroU32;

/// Topics carrying the side-by-side frames, and where the strips go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedTopics {
    pub raw: String,
    pub compressed: String,
    pub output_prefix: String,
}

impl Default for CombinedTopics {
    fn default() -> Self {
        Self {
            raw: "/arducam/image/raw".to_owned(),
            compressed: "/arducam/image/compressed".to_owned(),
            output_prefix: "/arducam/image".to_owned(),
        }
    }
}

impl CombinedTopics {
    pub fn contains(&self, topic: &str) -> bool {
        topic == self.raw || topic == self.compressed
    }
}

#[derive(Debug, Clone)]
pub struct TranscodeOptions {
    pub topics: CombinedTopics,
    pub split_count: NonZeroU32,
    /// Keep every `step`-th combined frame.
    pub step: NonZeroU32,
    /// Seconds after the first record before anything is kept.
    pub start: f64,
    pub format: OutputFormat,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            topics: CombinedTopics::default(),
            split_count: SPLIT_COUNT,
            step: NonZeroU32::MIN,
            start: 0.0,
            format: OutputFormat::default(),
        }
    }
}

impl TranscodeOptions {
    /// Number of frames the pass will transcode, as shown by the progress bar.
    pub fn expected_frames(&self, reader: &BagReader) -> usize {
        let combined = reader.message_count(&self.topics.raw)
            + reader.message_count(&self.topics.compressed);
        combined / self.step.get() as usize
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TranscodeStats {
    pub records_read: u64,
    pub before_start: u64,
    pub frames_seen: u64,
    pub frames_skipped: u64,
    pub frames_transcoded: u64,
    pub sub_images_written: u64,
    pub passthrough: u64,
}

/// State of one splitting pass.
pub struct Transcoder<'a> {
    options: &'a TranscodeOptions,
    t0: Option<Time>,
    counter: u64,
    sub_connections: Vec<u32>,
    passthrough_connections: HashMap<u32, u32>,
    stats: TranscodeStats,
}

impl<'a> Transcoder<'a> {
    pub fn new(options: &'a TranscodeOptions) -> Self {
        Self {
            options,
            t0: None,
            counter: 0,
            sub_connections: Vec::new(),
            passthrough_connections: HashMap::new(),
            stats: TranscodeStats::default(),
        }
    }

    pub fn run(
        mut self,
        reader: &mut BagReader,
        writer: &mut BagWriter,
        progress: &mut dyn Progress,
        mut preview: Option<&mut dyn Preview>,
    ) -> anyhow::Result<TranscodeStats> {
        for record in reader.messages() {
            let record = record.context("reading input bag")?;
            self.stats.records_read += 1;

            let t0 = *self.t0.get_or_insert(record.time);
            if record.time.secs_since(t0) < self.options.start {
                self.stats.before_start += 1;
                continue;
            }

            if !self.options.topics.contains(&record.connection.topic) {
                self.passthrough(writer, &record)?;
                continue;
            }

            self.stats.frames_seen += 1;
            self.counter += 1;
            if self.counter % self.options.step.get() as u64 != 0 {
                self.stats.frames_skipped += 1;
                continue;
            }

            let (image, strips) = self.transcode(writer, &record).with_context(|| {
                format!(
                    "splitting frame on {} at {}",
                    record.connection.topic, record.time
                )
            })?;
            progress.advance();

            if let Some(preview) = preview.as_deref_mut() {
                show_frame(preview, &record.connection.topic, &image, &strips);
            }
        }

        log::info!(
            "read {} records: {} frames split into {} images, {} skipped by step, {} passed through, {} before start",
            self.stats.records_read,
            self.stats.frames_transcoded,
            self.stats.sub_images_written,
            self.stats.frames_skipped,
            self.stats.passthrough,
            self.stats.before_start
        );

        Ok(self.stats)
    }

    fn passthrough(
        &mut self,
        writer: &mut BagWriter,
        record: &MessageRecord<'_>,
    ) -> anyhow::Result<()> {
        let conn = self.output_connection(writer, record.connection)?;
        writer.write(conn, record.time, &record.data)?;
        self.stats.passthrough += 1;
        Ok(())
    }

    fn output_connection(
        &mut self,
        writer: &mut BagWriter,
        connection: &Connection,
    ) -> anyhow::Result<u32> {
        if let Some(&conn) = self.passthrough_connections.get(&connection.id) {
            return Ok(conn);
        }

        let conn = writer.add_connection(&connection.topic, &connection.info)?;
        self.passthrough_connections.insert(connection.id, conn);
        Ok(conn)
    }

    fn transcode(
        &mut self,
        writer: &mut BagWriter,
        record: &MessageRecord<'_>,
    ) -> anyhow::Result<(DynamicImage, Vec<DynamicImage>)> {
        let frame = FrameMessage::decode(&record.connection.info.datatype, &record.data)?;
        let image = frame.to_image()?;
        let strips = split_image(&image, self.options.split_count);

        if self.sub_connections.is_empty() {
            for i in 0..self.options.split_count.get() {
                let topic = sub_topic(&self.options.topics.output_prefix, i);
                self.sub_connections
                    .push(writer.add_connection(&topic, &CompressedImage::connection_info())?);
            }
        }

        for (strip, &conn) in strips.iter().zip(&self.sub_connections) {
            let message = encode_compressed(strip, frame.header(), self.options.format)?;
            writer.write(conn, record.time, &message.encode())?;
            self.stats.sub_images_written += 1;
        }

        self.stats.frames_transcoded += 1;
        Ok((image, strips))
    }
}

/// Preview failures are logged; they never stop the pass.
fn show_frame(
    preview: &mut dyn Preview,
    topic: &str,
    image: &DynamicImage,
    strips: &[DynamicImage],
) {
    let named = strips
        .iter()
        .enumerate()
        .map(|(i, strip)| (format!("{}-{}", topic, i), strip))
        .chain(std::iter::once((topic.to_owned(), image)));

    for (name, image) in named {
        if let Err(err) = preview.show(&name, image) {
            log::warn!("preview of {} failed: {:#}", name, err);
        }
    }
}
