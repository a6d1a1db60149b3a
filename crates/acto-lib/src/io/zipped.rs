//! Resolve a "possibly zipped" input to a real on-disk path.
//!
//! Decoders need a plain file (memory-mapped or handed to an external
//! process), not a stream inside an archive. Non-`.zip` paths pass through
//! untouched; a `.zip` archive must contain exactly one entry with an
//! accepted extension, which is extracted to a temporary file that is
//! removed when the handle is dropped.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tempfile::NamedTempFile;
use zip::ZipArchive;

/// Default extensions accepted inside an archive.
pub const DEFAULT_EXTENSIONS: &[&str] = &["cwa", "omx"];

pub struct ResolvedInput {
    path: PathBuf,
    /// Deleted on drop when the input was archive-embedded.
    _extracted: Option<NamedTempFile>,
}

impl ResolvedInput {
    /// Resolve `source`, extracting from a `.zip` archive if needed.
    pub fn resolve(source: &Path, extensions: &[&str]) -> Result<Self> {
        let is_zip = source
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("zip"))
            .unwrap_or(false);
        if !is_zip {
            return Ok(Self {
                path: source.to_path_buf(),
                _extracted: None,
            });
        }

        let file =
            File::open(source).with_context(|| format!("opening {}", source.display()))?;
        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("{} is not a readable archive", source.display()))?;

        let matching: Vec<(usize, String)> = (0..archive.len())
            .filter_map(|index| {
                let name = archive.name_for_index(index)?.to_string();
                (!name.ends_with('/') && matches_extension(&name, extensions))
                    .then_some((index, name))
            })
            .collect();

        let (index, name) = match matching.as_slice() {
            [] => bail!(
                "no entry in {} matches extensions {:?}",
                source.display(),
                extensions
            ),
            [single] => single.clone(),
            multiple => bail!(
                "multiple entries in {} match extensions {:?}: {:?}",
                source.display(),
                extensions,
                multiple.iter().map(|(_, name)| name).collect::<Vec<_>>()
            ),
        };

        let suffix = Path::new(&name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let mut temp = tempfile::Builder::new()
            .prefix("acto-unzip-")
            .suffix(&suffix)
            .tempfile()
            .context("creating extraction scratch file")?;
        let mut entry = archive
            .by_index(index)
            .with_context(|| format!("reading archive entry {}", name))?;
        std::io::copy(&mut entry, &mut temp)
            .with_context(|| format!("extracting {}", name))?;

        Ok(Self {
            path: temp.path().to_path_buf(),
            _extracted: Some(temp),
        })
    }

    /// The on-disk path to hand to a decoder or external process.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the path points at an extracted temporary copy.
    pub fn is_extracted(&self) -> bool {
        self._extracted.is_some()
    }
}

fn matches_extension(name: &str, extensions: &[&str]) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| {
            extensions
                .iter()
                .any(|accepted| ext.eq_ignore_ascii_case(accepted))
        })
        .unwrap_or(false)
}
