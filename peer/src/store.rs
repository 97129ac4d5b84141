//! Local RFC files under `./RFCs/`.
//!
//! Filenames follow `<number>_<title>.txt`. The directory is re-read on
//! every GET so files added while the peer is running are served.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const RFC_DIR: &str = "RFCs";

#[derive(Debug, Clone, PartialEq)]
pub struct LocalRfc {
    pub number: String,
    pub title: String,
    pub path: PathBuf,
}

/// Splits `<number>_<title>.txt` into number and title. Returns `None`
/// for names that do not match.
pub fn parse_file_name(name: &str) -> Option<(String, String)> {
    let stem = name.strip_suffix(".txt")?;
    let (number, title) = stem.split_once('_')?;
    if number.is_empty() || title.is_empty() {
        return None;
    }
    if !number.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((number.to_owned(), title.to_owned()))
}

pub fn scan(dir: &Path) -> Result<Vec<LocalRfc>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("reading RFC directory {}", dir.display()))?;
    let mut rfcs = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            warn!(?name, "skipping non-UTF-8 filename");
            continue;
        };
        match parse_file_name(name) {
            Some((number, title)) => rfcs.push(LocalRfc {
                number,
                title,
                path: entry.path(),
            }),
            None => warn!(file = name, "skipping file without <number>_<title>.txt name"),
        }
    }
    rfcs.sort_by(|a, b| a.number.cmp(&b.number));
    Ok(rfcs)
}

/// Re-reads the directory and returns the RFC with the given number, if
/// a matching file exists right now.
pub fn find(dir: &Path, number: &str) -> Result<Option<LocalRfc>> {
    Ok(scan(dir)?.into_iter().find(|rfc| rfc.number == number))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_names() {
        assert_eq!(
            Some(("9110".to_owned(), "Semantics".to_owned())),
            parse_file_name("9110_Semantics.txt")
        );
        // Underscores after the first belong to the title.
        assert_eq!(
            Some(("7230".to_owned(), "HTTP_Messaging".to_owned())),
            parse_file_name("7230_HTTP_Messaging.txt")
        );
    }

    #[test]
    fn parse_rejects_bad_names() {
        assert_eq!(None, parse_file_name("notes.txt"));
        assert_eq!(None, parse_file_name("9110_Semantics.pdf"));
        assert_eq!(None, parse_file_name("abc_Semantics.txt"));
        assert_eq!(None, parse_file_name("_Semantics.txt"));
        assert_eq!(None, parse_file_name("9110_.txt"));
    }

    #[test]
    fn scan_skips_non_matching_files() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("rfc-scan-{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("9110_Semantics.txt"), "hello")?;
        std::fs::write(dir.join("README.md"), "not an rfc")?;

        let rfcs = scan(&dir)?;
        assert_eq!(1, rfcs.len());
        assert_eq!("9110", rfcs[0].number);
        assert_eq!("Semantics", rfcs[0].title);

        assert!(find(&dir, "9110")?.is_some());
        assert!(find(&dir, "404404")?.is_none());

        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn scan_missing_dir_fails() {
        assert!(scan(Path::new("/definitely/not/here")).is_err());
    }
}
