use anyhow::{Context, Result};
use indexed_tar::{IndexedTar, Matcher, Member, Mode};
use std::{
    io::{self, BufWriter, Write},
    path::Path,
};

pub fn list_members(
    archive: &Path,
    fnmatch_filter: Option<&str>,
    regex: Option<&str>,
    reverse: bool,
) -> Result<()> {
    let mut it = IndexedTar::open(archive, Mode::Read)
        .with_context(|| format!("open {}", archive.display()))?;

    let matcher = match (fnmatch_filter, regex) {
        (Some(p), _) => Matcher::wildcard(p)?,
        (None, Some(re)) => Matcher::regex(re)?,
        (None, None) => Matcher::wildcard("*")?,
    };

    let mut out = BufWriter::new(io::stdout().lock());
    let index = it.index()?;
    let hits = index.lookup(matcher);
    let hits: Box<dyn Iterator<Item = &Member>> = if reverse {
        Box::new(hits.rev())
    } else {
        Box::new(hits)
    };
    for m in hits {
        writeln!(out, "{}", m.name)?;
    }
    out.flush()?;

    it.close()?;
    Ok(())
}
