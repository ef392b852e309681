//! JSONL storage: one record per line.
//!
//! Used for both the object file and the changeset ledger. Writes go to a
//! temp file that is synced and renamed over the target, so readers never
//! observe a partial file.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Read records from a JSONL reader. Blank lines and `#` comments are skipped.
pub fn read_records<T: DeserializeOwned>(reader: impl BufRead) -> Result<Vec<T>, JsonlError> {
    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| JsonlError::Io(line_no + 1, e.to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let record: T = serde_json::from_str(trimmed)
            .map_err(|e| JsonlError::Parse(line_no + 1, e.to_string()))?;
        records.push(record);
    }
    Ok(records)
}

pub fn write_records<T: Serialize>(writer: &mut impl Write, records: &[T]) -> Result<(), JsonlError> {
    for record in records {
        let line =
            serde_json::to_string(record).map_err(|e| JsonlError::Serialize(e.to_string()))?;
        writeln!(writer, "{line}").map_err(|e| JsonlError::Io(0, e.to_string()))?;
    }
    Ok(())
}

/// Read records from a file. A missing file reads as empty.
pub fn read_records_from_path<T: DeserializeOwned>(
    path: impl AsRef<Path>,
) -> Result<Vec<T>, JsonlError> {
    let path = path.as_ref();
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(path, e)),
    };
    let text = decode_text(path, &bytes)?;
    read_records(BufReader::new(text.as_bytes()))
}

/// Replace the file at `path` with `records`.
///
/// The records land in a sibling temp file first; the rename and the parent
/// directory sync make the replacement durable.
pub fn write_records_to_path<T: Serialize>(
    path: impl AsRef<Path>,
    records: &[T],
) -> Result<(), JsonlError> {
    let path = path.as_ref();
    let dir = parent_dir(path);
    if let Some(dir) = dir {
        fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
    }

    let staged = staging_path(path);
    if let Err(error) = write_staged(&staged, records) {
        let _ = fs::remove_file(&staged);
        return Err(error);
    }
    if let Err(e) = fs::rename(&staged, path) {
        let _ = fs::remove_file(&staged);
        return Err(JsonlError::Io(
            0,
            format!("{} -> {}: {e}", staged.display(), path.display()),
        ));
    }

    match dir {
        Some(dir) => File::open(dir)
            .and_then(|handle| handle.sync_all())
            .map_err(|e| io_error(dir, e)),
        None => Ok(()),
    }
}

fn write_staged<T: Serialize>(staged: &Path, records: &[T]) -> Result<(), JsonlError> {
    let file = File::create(staged).map_err(|e| io_error(staged, e))?;
    let mut writer = BufWriter::new(file);
    write_records(&mut writer, records)?;
    let file = writer
        .into_inner()
        .map_err(|e| io_error(staged, e.into_error()))?;
    file.sync_all().map_err(|e| io_error(staged, e))
}

fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|dir| !dir.as_os_str().is_empty())
}

/// `<path>.tmp.<pid>.<nanos>`, unique per writer.
fn staging_path(path: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut staged: OsString = path.as_os_str().to_os_string();
    staged.push(format!(".tmp.{}.{nanos}", std::process::id()));
    PathBuf::from(staged)
}

/// Store files are UTF-8 text without NUL bytes; anything else is corruption.
fn decode_text<'a>(path: &Path, bytes: &'a [u8]) -> Result<&'a str, JsonlError> {
    if bytes.contains(&0) {
        return Err(JsonlError::Corrupt(format!(
            "{}: contains NUL byte(s)",
            path.display()
        )));
    }
    std::str::from_utf8(bytes).map_err(|e| {
        JsonlError::Corrupt(format!(
            "{}: contains non-UTF-8 byte sequence(s) at offset {}",
            path.display(),
            e.valid_up_to()
        ))
    })
}

fn io_error(path: &Path, error: std::io::Error) -> JsonlError {
    JsonlError::Io(0, format!("{}: {error}", path.display()))
}

/// Errors from JSONL operations.
#[derive(Debug, thiserror::Error)]
pub enum JsonlError {
    #[error("line {0}: I/O error: {1}")]
    Io(usize, String),

    #[error("line {0}: parse error: {1}")]
    Parse(usize, String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("corrupted file: {0}")]
    Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::StoredObject;
    use std::collections::BTreeMap;

    fn temp_path(prefix: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "stageset-jsonl-{prefix}-{}-{unique}.jsonl",
            std::process::id()
        ))
    }

    #[test]
    fn read_records_from_path_rejects_nul_payload() {
        let path = temp_path("nul");
        fs::write(
            &path,
            b"{\"object_type\":\"Base\",\"id\":1,\"class_name\":\"Base\"}\n\0garbage",
        )
        .expect("fixture should write");

        let result = read_records_from_path::<StoredObject>(&path);
        match result {
            Err(JsonlError::Corrupt(message)) => {
                assert!(message.contains("contains NUL"));
            }
            other => panic!("expected corrupt file error, got {other:?}"),
        }

        let _ = fs::remove_file(path);
    }

    #[test]
    fn read_records_from_path_rejects_non_utf8_payload() {
        let path = temp_path("non-utf8");
        fs::write(&path, [0xff, 0xfe, 0xfd]).expect("fixture should write");

        let result = read_records_from_path::<StoredObject>(&path);
        match result {
            Err(JsonlError::Corrupt(message)) => {
                assert!(message.contains("non-UTF-8"));
            }
            other => panic!("expected corrupt file error, got {other:?}"),
        }

        let _ = fs::remove_file(path);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let path = temp_path("missing");
        let records: Vec<StoredObject> =
            read_records_from_path(&path).expect("missing file should read as empty");
        assert!(records.is_empty());
    }

    #[test]
    fn parse_errors_report_line_numbers() {
        let input = "# header\n\n{\"object_type\":\"Base\",\"id\":1,\"class_name\":\"Base\"}\nnot json\n";
        let err = read_records::<StoredObject>(input.as_bytes()).expect_err("line 4 is invalid");
        assert!(matches!(err, JsonlError::Parse(4, _)));
    }

    #[test]
    fn write_records_to_path_replaces_file_atomically() {
        let path = temp_path("atomic-write");
        let first = StoredObject::new_draft("Base", 1, "Base", BTreeMap::new());
        write_records_to_path(&path, &[first]).expect("first write should succeed");

        let second = StoredObject::new_draft("Mid", 2, "Mid", BTreeMap::new());
        write_records_to_path(&path, &[second]).expect("second write should succeed");

        let read: Vec<StoredObject> = read_records_from_path(&path).expect("file should read");
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].object_type, "Mid");

        let _ = fs::remove_file(path);
    }
}
