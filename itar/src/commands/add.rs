use anyhow::{bail, Context, Result};
use indexed_tar::{IndexedTar, Mode};
use std::path::{Path, PathBuf};
use tracing::info;

/// Adds every target to `archive`: files under their own name, directories
/// relative to their parent.
pub fn add_targets(archive: &Path, mode: Mode, targets: &[PathBuf], recurse: bool) -> Result<()> {
    info!("{} {} ({} targets)", mode, archive.display(), targets.len());

    let mut it = IndexedTar::open(archive, mode)
        .with_context(|| format!("open {} ({mode})", archive.display()))?;
    let before = it.len();

    for target in targets {
        if target.is_dir() {
            it.add_dir(target, recurse)
                .with_context(|| format!("add directory {}", target.display()))?;
        } else if target.is_file() {
            let Some(name) = target.file_name().and_then(|n| n.to_str()) else {
                bail!("{} has no usable file name", target.display());
            };
            it.add(target, Some(name))
                .with_context(|| format!("add {}", target.display()))?;
        } else {
            bail!("{} is neither a file nor a directory", target.display());
        }
    }

    let added = it.len() - before;
    it.close()
        .with_context(|| format!("finalize {}", archive.display()))?;
    info!("done: {} members added, {} total", added, before + added);
    Ok(())
}
