use crate::models::LibraryManga;
use crate::sources::SourceRegistry;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Writes a grouped run report to `<dir>/update_<name>.txt`:
///
/// ```text
/// ! reason
///   # source
///     - title
/// ```
///
/// Best effort: on any failure the error is logged and an empty path returned.
pub fn write_report(
    dir: &Path,
    name: &str,
    entries: &[(LibraryManga, String)],
    sources: &SourceRegistry,
    header: Option<&str>,
) -> PathBuf {
    if entries.is_empty() {
        return PathBuf::new();
    }
    match try_write_report(dir, name, entries, sources, header) {
        Ok(path) => path,
        Err(e) => {
            warn!("Could not write {} report: {}", name, e);
            PathBuf::new()
        }
    }
}

fn try_write_report(
    dir: &Path,
    name: &str,
    entries: &[(LibraryManga, String)],
    sources: &SourceRegistry,
    header: Option<&str>,
) -> std::io::Result<PathBuf> {
    let mut grouped: BTreeMap<&str, BTreeMap<String, Vec<&str>>> = BTreeMap::new();
    for (manga, reason) in entries {
        grouped
            .entry(reason.as_str())
            .or_default()
            .entry(sources.name_or_stub(manga.source))
            .or_default()
            .push(manga.title.as_str());
    }

    fs::create_dir_all(dir)?;
    let path = dir.join(format!("update_{}.txt", name));
    let mut out = BufWriter::new(fs::File::create(&path)?);

    if let Some(header) = header {
        writeln!(out, "{}", header)?;
    }
    for (reason, by_source) in grouped {
        writeln!(out, "! {}", reason)?;
        for (source, mut titles) in by_source {
            writeln!(out, "  # {}", source)?;
            titles.sort_unstable();
            for title in titles {
                writeln!(out, "    - {}", title)?;
            }
        }
    }
    out.flush()?;

    Ok(path)
}
