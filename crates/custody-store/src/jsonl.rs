use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, StoreError};

/// A line that could not be decoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedLine {
    /// 1-based line number.
    pub position: usize,
    pub error: String,
}

/// Read every non-blank line of `path`. A missing file reads as empty.
pub(crate) fn read_lines<T: DeserializeOwned>(
    path: &Path,
) -> Result<Vec<std::result::Result<T, MalformedLine>>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut out = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let position = index + 1;
        let line = match line {
            Ok(line) => line,
            // Non-UTF-8 bytes are a bad record, not a failed read.
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(position, error = %e, "undecodable line");
                out.push(Err(MalformedLine {
                    position,
                    error: e.to_string(),
                }));
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(value) => out.push(Ok(value)),
            Err(e) => {
                warn!(path = %path.display(), position, error = %e, "skipping malformed line");
                out.push(Err(MalformedLine {
                    position,
                    error: e.to_string(),
                }));
            }
        }
    }
    Ok(out)
}

/// Open `path` for appending, creating it and its parent directory.
pub(crate) fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Serialize `value` as one line.
pub(crate) fn write_line<T: Serialize, W: Write>(writer: &mut W, value: &T) -> Result<()> {
    let mut line =
        serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    line.push(b'\n');
    writer.write_all(&line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let lines = read_lines::<serde_json::Value>(&dir.path().join("absent.jsonl")).unwrap();
        assert!(lines.is_empty());
    }

    #[test]
    fn bad_lines_keep_their_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.jsonl");
        fs::write(&path, "{\"a\":1}\n\nnot json\n{\"a\":2}\n").unwrap();

        let lines = read_lines::<serde_json::Value>(&path).unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].is_ok());
        assert_eq!(lines[1].as_ref().unwrap_err().position, 3);
        assert!(lines[2].is_ok());
    }
}
