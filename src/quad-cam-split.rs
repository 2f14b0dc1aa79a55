use anyhow::Context;
use quadcam_tools::bag::{BagReader, BagWriter, Compression};
use quadcam_tools::codec::OutputFormat;
use quadcam_tools::preview::{DirectoryPreview, Preview};
use quadcam_tools::transcode::{CombinedTopics, TranscodeOptions, Transcoder};
use std::num::NonZeroU32;
use std::path::PathBuf;
use structopt::StructOpt;

/// Split quad camera images into one topic per camera
#[derive(StructOpt)]
pub struct Opts {
    /// Input bag file
    #[structopt(short, long)]
    input: PathBuf,
    /// Write previews of the split images next to the input
    #[structopt(short = "v", long)]
    show: bool,
    /// Keep every n-th combined image
    #[structopt(short, long, default_value = "1")]
    step: u32,
    /// Seconds after the start of the bag to skip
    #[structopt(short = "t", long, default_value = "0")]
    start: f64,
    /// Chunk compression of the output bag (none, lz4 or bz2)
    #[structopt(long, default_value = "none")]
    compression: Compression,
    /// JPEG quality of the split images
    #[structopt(long, default_value = "95")]
    quality: u8,
    /// Encode the split images as PNG instead of JPEG
    #[structopt(long)]
    png: bool,
    #[structopt(long, default_value = "/arducam/image/raw")]
    raw_topic: String,
    #[structopt(long, default_value = "/arducam/image/compressed")]
    compressed_topic: String,
    /// Output topics are <prefix>_<i>/compressed
    #[structopt(long, default_value = "/arducam/image")]
    output_prefix: String,
}

fn main() -> anyhow::Result<()> {
    quadcam_tools::init_logging();

    let opts = Opts::from_args();
    let output = quadcam_tools::output_path(&opts.input);

    if !opts.input.exists() {
        println!("Input bag file {} does not exist", opts.input.display());
        std::process::exit(1);
    }

    let step = NonZeroU32::new(opts.step).context("--step must be at least 1")?;
    if opts.start.is_nan() || opts.start < 0.0 {
        anyhow::bail!("--start must be a non-negative number of seconds");
    }
    if !(1..=100).contains(&opts.quality) {
        anyhow::bail!("--quality must be between 1 and 100");
    }

    let options = TranscodeOptions {
        topics: CombinedTopics {
            raw: opts.raw_topic,
            compressed: opts.compressed_topic,
            output_prefix: opts.output_prefix,
        },
        step,
        start: opts.start,
        format: if opts.png {
            OutputFormat::Png
        } else {
            OutputFormat::Jpeg {
                quality: opts.quality,
            }
        },
        ..Default::default()
    };

    let mut reader = BagReader::open(&opts.input)
        .with_context(|| format!("opening {}", opts.input.display()))?;

    let expected = options.expected_frames(&reader);
    println!(
        "Total number of images: {}",
        reader.message_count(&options.topics.raw) + reader.message_count(&options.topics.compressed)
    );

    let mut preview = if opts.show {
        Some(DirectoryPreview::create(quadcam_tools::preview_dir(
            &opts.input,
        ))?)
    } else {
        None
    };

    let mut writer = BagWriter::create(&output, opts.compression)
        .with_context(|| format!("creating {}", output.display()))?;
    let mut pbar = tqdm::pbar(Some(expected));

    let stats = Transcoder::new(&options).run(
        &mut reader,
        &mut writer,
        &mut pbar,
        preview.as_mut().map(|preview| preview as &mut dyn Preview),
    )?;

    writer
        .finish()
        .with_context(|| format!("finishing {}", output.display()))?;

    log::info!(
        "wrote {} ({} split images)",
        output.display(),
        stats.sub_images_written
    );

    Ok(())
}
