//! Writing generated images to disk

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tracing::{debug, info};

use crate::domain::Step;

/// File name for the step at `position` (zero-based)
pub fn file_name(position: usize, step: &Step) -> Option<String> {
    step.image
        .as_ref()
        .map(|image| format!("step-{:02}.{}", position + 1, image.extension()))
}

/// Write every step that holds an image into `dir`
///
/// Files are named by position so the order of the flow is preserved on
/// disk. Steps without an image leave a gap in the numbering.
pub fn export_images(steps: &[Step], dir: &Path) -> Result<Vec<PathBuf>> {
    debug!(dir = %dir.display(), step_count = steps.len(), "export_images: called");
    fs::create_dir_all(dir).context(format!("Failed to create output directory {}", dir.display()))?;

    let mut written = Vec::new();
    for (position, step) in steps.iter().enumerate() {
        let (Some(image), Some(name)) = (&step.image, file_name(position, step)) else {
            continue;
        };
        let path = dir.join(name);
        fs::write(&path, image.bytes()).context(format!("Failed to write {}", path.display()))?;
        debug!(path = %path.display(), bytes = image.len(), "export_images: wrote image");
        written.push(path);
    }

    info!(count = written.len(), dir = %dir.display(), "export_images: done");
    Ok(written)
}
