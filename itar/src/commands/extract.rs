use anyhow::{Context, Result};
use indexed_tar::{IndexedTar, Matcher, Mode, UnpackOptions};
use std::path::Path;
use tracing::info;

pub fn extract_archive(
    archive: &Path,
    output_dir: &Path,
    fnmatch_filter: Option<&str>,
    numeric_owner: bool,
) -> Result<()> {
    info!(
        "extract {} -> {}",
        archive.display(),
        output_dir.display()
    );

    let mut it = IndexedTar::open(archive, Mode::Read)
        .with_context(|| format!("open {}", archive.display()))?;
    let matcher = fnmatch_filter.map(Matcher::wildcard).transpose()?;
    let options = UnpackOptions {
        numeric_owner,
        ..UnpackOptions::default()
    };

    let written = it
        .extract_matching(matcher, output_dir, &options)
        .with_context(|| format!("extract into {}", output_dir.display()))?;
    it.close()?;

    info!("done: {} members extracted", written.len());
    Ok(())
}
