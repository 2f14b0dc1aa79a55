pub mod bag;
pub mod codec;
pub mod msg;
pub mod preview;
pub mod progress;
pub mod split;
pub mod transcode;

use std::path::{Path, PathBuf};

/// `dir/name.bag` becomes `dir/name-split.bag`.
pub fn output_path(input: &Path) -> PathBuf {
    sibling_with_suffix(input, "-split.bag")
}

/// `dir/name.bag` becomes `dir/name-preview`.
pub fn preview_dir(input: &Path) -> PathBuf {
    sibling_with_suffix(input, "-preview")
}

fn sibling_with_suffix(input: &Path, suffix: &str) -> PathBuf {
    let mut name = input.file_stem().unwrap_or_default().to_os_string();
    name.push(suffix);

    match input.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_sits_next_to_input() {
        assert_eq!(
            output_path(Path::new("/data/run1/quad.bag")),
            Path::new("/data/run1/quad-split.bag")
        );
        assert_eq!(output_path(Path::new("quad.bag")), Path::new("quad-split.bag"));
        assert_eq!(
            output_path(Path::new("logs/two.dots.bag")),
            Path::new("logs/two.dots-split.bag")
        );
        assert_eq!(
            preview_dir(Path::new("/data/quad.bag")),
            Path::new("/data/quad-preview")
        );
    }
}
