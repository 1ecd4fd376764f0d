//! Write-then-rename helpers so readers never see a partial file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

/// Replace `path` with `contents` via a sibling temp file and `rename`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = temp_path(path);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Pretty JSON with a trailing newline.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

/// Append one compact JSON record to a JSONL log.
///
/// The log is rewritten through a temp file, so a concurrent reader sees either
/// the old file or the old file plus the complete new line.
pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let mut existing = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    if !existing.is_empty() && !existing.ends_with(b"\n") {
        existing.push(b'\n');
    }
    serde_json::to_writer(&mut existing, record)
        .with_context(|| format!("serialize record for {}", path.display()))?;
    existing
        .write_all(b"\n")
        .context("buffer newline")?;
    write_atomic(path, &existing)
}

/// Read every record of a JSONL log; a missing file is an empty log.
pub fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parse {} line {}", path.display(), idx + 1))
        })
        .collect()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        n: u32,
    }

    #[test]
    fn append_then_read_preserves_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("audit").join("log.jsonl");
        for n in 0..3 {
            append_jsonl(&path, &Entry { n }).expect("append");
        }
        let entries: Vec<Entry> = read_jsonl(&path).expect("read");
        assert_eq!(entries, vec![Entry { n: 0 }, Entry { n: 1 }, Entry { n: 2 }]);
        assert!(!temp.path().join("audit").join("log.jsonl.tmp").exists());
    }

    #[test]
    fn missing_log_reads_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let entries: Vec<Entry> = read_jsonl(&temp.path().join("none.jsonl")).expect("read");
        assert!(entries.is_empty());
    }

    #[test]
    fn json_write_ends_with_newline() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("x.json");
        write_json_atomic(&path, &Entry { n: 7 }).expect("write");
        let text = fs::read_to_string(&path).expect("read");
        assert!(text.ends_with("}\n"));
    }
}
