//! Durable file helpers for the remote outbox.
//!
//! - Atomic writes: write to a temp file, sync to disk, then rename
//! - JSONL appending with fsync after each line

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Write bytes to a file atomically.
///
/// If any step fails, the original file (if any) remains untouched.
///
/// # Errors
///
/// Returns an error if any file operation fails.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Append one value as a JSON line.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or written.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(value)?;
    writeln!(file, "{line}")?;
    file.sync_all()?;
    Ok(())
}

/// Replace a JSONL file with `values`, atomically.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_jsonl<T: Serialize>(path: &Path, values: &[T]) -> Result<()> {
    let mut content = String::new();
    for value in values {
        content.push_str(&serde_json::to_string(value)?);
        content.push('\n');
    }
    atomic_write(path, content.as_bytes())
}

/// Read every line of a JSONL file. A missing file reads as empty.
///
/// # Errors
///
/// Returns an error naming the line number if a line does not parse.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let mut values = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(&line).map_err(|e| {
            Error::Other(format!("{}:{}: {e}", path.display(), line_num + 1))
        })?;
        values.push(value);
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        seq: u32,
        key: String,
    }

    fn entry(seq: u32) -> Entry {
        Entry {
            seq,
            key: format!("k{seq}"),
        }
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("blob.bin");

        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!temp_dir.path().join("nested").join("blob.bin.tmp").exists());
    }

    #[test]
    fn test_append_then_read_keeps_order() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("outbox.jsonl");

        append_jsonl(&path, &entry(1)).unwrap();
        append_jsonl(&path, &entry(2)).unwrap();

        let read: Vec<Entry> = read_jsonl(&path).unwrap();
        assert_eq!(read, vec![entry(1), entry(2)]);
    }

    #[test]
    fn test_write_jsonl_truncates() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("outbox.jsonl");

        write_jsonl(&path, &[entry(1), entry(2), entry(3)]).unwrap();
        write_jsonl(&path, &[entry(3)]).unwrap();

        let read: Vec<Entry> = read_jsonl(&path).unwrap();
        assert_eq!(read, vec![entry(3)]);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let read: Vec<Entry> = read_jsonl(Path::new("/nonexistent/outbox.jsonl")).unwrap();
        assert!(read.is_empty());
    }

    #[test]
    fn test_bad_line_reports_line_number() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("outbox.jsonl");
        fs::write(&path, "{\"seq\":1,\"key\":\"a\"}\nnot json\n").unwrap();

        let err = read_jsonl::<Entry>(&path).unwrap_err();
        assert!(err.to_string().contains(":2:"));
    }
}
