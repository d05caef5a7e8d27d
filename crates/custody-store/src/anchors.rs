use std::io::Write;
use std::path::{Path, PathBuf};

use custody_types::AnchorRecord;
use tracing::debug;

use crate::error::Result;
use crate::jsonl::{open_append, read_lines, write_line, MalformedLine};

/// Decoded anchor records plus the lines that could not be read.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnchorLogContents {
    pub records: Vec<AnchorRecord>,
    pub malformed: Vec<MalformedLine>,
}

/// JSON-lines log of anchor records, written after each batch is anchored.
pub struct AnchorLog {
    path: PathBuf,
}

impl AnchorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &AnchorRecord) -> Result<()> {
        let mut file = open_append(&self.path)?;
        write_line(&mut file, record)?;
        file.flush()?;
        debug!(tx = %record.tx_reference, "anchor record appended");
        Ok(())
    }

    pub fn read(&self) -> Result<AnchorLogContents> {
        let mut contents = AnchorLogContents::default();
        for line in read_lines::<AnchorRecord>(&self.path)? {
            match line {
                Ok(record) => contents.records.push(record),
                Err(bad) => contents.malformed.push(bad),
            }
        }
        Ok(contents)
    }
}
