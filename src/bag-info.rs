use anyhow::Context;
use quadcam_tools::bag::BagReader;
use structopt::StructOpt;

/// Print the topics and message counts of a bag
#[derive(StructOpt)]
pub struct Opts {
    path: std::path::PathBuf,
}

fn main() -> anyhow::Result<()> {
    quadcam_tools::init_logging();

    let opts = Opts::from_args();
    let reader =
        BagReader::open(&opts.path).with_context(|| format!("opening {}", opts.path.display()))?;

    println!("path:     {}", opts.path.display());
    if let (Some(start), Some(end)) = (reader.start_time(), reader.end_time()) {
        println!("start:    {}", start);
        println!("end:      {}", end);
        println!("duration: {:.3}s", end.secs_since(start));
    }
    println!("messages: {}", reader.message_total());

    for connection in reader.connections() {
        println!(
            "  {:<40} {:>8} msgs  {}",
            connection.topic,
            reader.message_count(&connection.topic),
            connection.info.datatype
        );
    }

    Ok(())
}
