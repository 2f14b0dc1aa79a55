use anyhow::Context;
use image::DynamicImage;
use std::path::{Path, PathBuf};

pub trait Preview {
    fn show(&mut self, name: &str, image: &DynamicImage) -> anyhow::Result<()>;
}

/// Headless preview: keeps the latest image per name as a PNG in a directory,
/// overwritten as new frames arrive.
pub struct DirectoryPreview {
    dir: PathBuf,
}

impl DirectoryPreview {
    pub fn create(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating preview directory {}", dir.display()))?;
        log::info!("writing previews to {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_for(&self, name: &str) -> PathBuf {
        let stem: String = name
            .trim_start_matches('/')
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.png", stem))
    }
}

impl Preview for DirectoryPreview {
    fn show(&mut self, name: &str, image: &DynamicImage) -> anyhow::Result<()> {
        let path = self.file_for(name);
        image
            .save(&path)
            .with_context(|| format!("writing preview {}", path.display()))
    }
}
