use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use custody_crypto::append_link;
use custody_types::{ChainState, Link, LinkContent, LinkRecord};
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::jsonl::{open_append, read_lines, write_line};

/// Flush/sync strategy for appends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// `fsync` after every write.
    EveryWrite,
    /// Flush to the OS and rely on its page cache.
    #[default]
    OsDefault,
}

struct LogWriter {
    writer: BufWriter<File>,
    tail: ChainState,
}

/// Append-only JSON-lines log of custody links.
///
/// The ordered lines are the chain. `append` refuses any link that does not
/// continue the stored tail, so a healthy producer cannot write a gap.
pub struct LinkLog {
    path: PathBuf,
    writer: Mutex<LogWriter>,
    sync_mode: SyncMode,
}

impl LinkLog {
    /// Open (or create) the log and resume its tail.
    ///
    /// The tail is taken from the last decodable link. Malformed lines are
    /// left for verification to report.
    pub fn open(path: &Path, sync_mode: SyncMode) -> Result<Self> {
        let tail = tail_of(&read_records_at(path)?);
        let writer = BufWriter::new(open_append(path)?);
        debug!(path = %path.display(), next_sequence = tail.next_sequence, "link log opened");
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(LogWriter { writer, tail }),
            sync_mode,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Position the next append must continue from.
    pub fn chain_state(&self) -> ChainState {
        self.lock().tail
    }

    /// Append an already-built link after checking continuity with the tail.
    pub fn append(&self, link: &Link) -> Result<()> {
        let mut w = self.lock();
        if link.sequence != w.tail.next_sequence {
            return Err(StoreError::SequenceGap {
                expected: w.tail.next_sequence,
                found: link.sequence,
            });
        }
        if link.previous_hash != w.tail.last_hash {
            return Err(StoreError::PreviousHashMismatch {
                sequence: link.sequence,
            });
        }

        write_line(&mut w.writer, link)?;
        w.writer.flush()?;
        if self.sync_mode == SyncMode::EveryWrite {
            w.writer.get_ref().sync_all()?;
        }
        w.tail = ChainState::after(link);

        debug!(sequence = link.sequence, hash = %link.hash.short_hex(), "link appended");
        Ok(())
    }

    /// Build the next link from `content` and append it.
    pub fn append_content(&self, content: LinkContent) -> Result<Link> {
        let state = self.chain_state();
        let (link, _) = append_link(&state, content)?;
        self.append(&link)?;
        Ok(link)
    }

    /// Every line in order, decoded or not.
    pub fn read_records(&self) -> Result<Vec<LinkRecord>> {
        read_records_at(&self.path)
    }

    /// Replace the stored links with `links`, which must carry the same
    /// sequences, previous hashes and hashes. Only signatures may differ.
    ///
    /// The new file is written beside the old one and renamed over it.
    pub fn rewrite(&self, links: &[Link]) -> Result<()> {
        let mut w = self.lock();
        let current = read_records_at(&self.path)?;
        if current.len() != links.len() {
            return Err(StoreError::ChainAltered {
                position: current.len().min(links.len()) + 1,
            });
        }
        for (index, (record, link)) in current.iter().zip(links).enumerate() {
            let existing = match record {
                LinkRecord::Decoded(existing) => existing,
                LinkRecord::Malformed { position, .. } => {
                    return Err(StoreError::MalformedRecord {
                        position: *position,
                    })
                }
            };
            if existing.sequence != link.sequence
                || existing.previous_hash != link.previous_hash
                || existing.hash != link.hash
                || existing.content != link.content
            {
                return Err(StoreError::ChainAltered { position: index + 1 });
            }
        }

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut out = BufWriter::new(staged.as_file_mut());
            for link in links {
                write_line(&mut out, link)?;
            }
            out.flush()?;
        }
        staged.as_file().sync_all()?;
        staged
            .persist(&self.path)
            .map_err(|e| StoreError::Io(e.error))?;

        // The old handle points at the replaced inode.
        w.writer = BufWriter::new(open_append(&self.path)?);
        info!(links = links.len(), "link log rewritten");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, LogWriter> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read a link log without opening it for writing.
pub fn read_records_at(path: &Path) -> Result<Vec<LinkRecord>> {
    Ok(read_lines::<Link>(path)?
        .into_iter()
        .map(|line| match line {
            Ok(link) => LinkRecord::Decoded(link),
            Err(bad) => LinkRecord::Malformed {
                position: bad.position,
                error: bad.error,
            },
        })
        .collect())
}

fn tail_of(records: &[LinkRecord]) -> ChainState {
    records
        .iter()
        .rev()
        .find_map(LinkRecord::link)
        .map(ChainState::after)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::fs::{self, OpenOptions};

    use custody_crypto::{generate_keypair, sign_link, verify_chain, verify_records};
    use custody_types::{Digest, OpaquePayload};

    use super::*;

    fn content(seed: u8) -> LinkContent {
        LinkContent::Opaque(OpaquePayload::new(vec![seed; 3]))
    }

    fn decoded(records: &[LinkRecord]) -> Vec<Link> {
        records.iter().filter_map(LinkRecord::link).cloned().collect()
    }

    #[test]
    fn append_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let log = LinkLog::open(&dir.path().join("links.jsonl"), SyncMode::EveryWrite).unwrap();

        for i in 0..3 {
            log.append_content(content(i)).unwrap();
        }

        let records = log.read_records().unwrap();
        assert_eq!(records.len(), 3);
        assert!(verify_chain(&decoded(&records)).valid);
        assert_eq!(log.chain_state().next_sequence, 3);
    }

    #[test]
    fn reopen_resumes_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("links.jsonl");
        let last = {
            let log = LinkLog::open(&path, SyncMode::OsDefault).unwrap();
            log.append_content(content(1)).unwrap();
            log.append_content(content(2)).unwrap()
        };

        let log = LinkLog::open(&path, SyncMode::OsDefault).unwrap();
        assert_eq!(log.chain_state(), ChainState::after(&last));
        let next = log.append_content(content(3)).unwrap();
        assert_eq!(next.previous_hash, last.hash);
    }

    #[test]
    fn append_rejects_discontinuity() {
        let dir = tempfile::tempdir().unwrap();
        let log = LinkLog::open(&dir.path().join("links.jsonl"), SyncMode::OsDefault).unwrap();
        let (first, state) = append_link(&ChainState::genesis(), content(1)).unwrap();
        let (second, _) = append_link(&state, content(2)).unwrap();

        let err = log.append(&second).unwrap_err();
        assert!(matches!(err, StoreError::SequenceGap { expected: 0, found: 1 }));

        log.append(&first).unwrap();
        let mut forged = second.clone();
        forged.previous_hash = Digest::of(b"elsewhere");
        let err = log.append(&forged).unwrap_err();
        assert!(matches!(err, StoreError::PreviousHashMismatch { sequence: 1 }));
    }

    #[test]
    fn malformed_line_is_kept_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.jsonl");
        {
            let log = LinkLog::open(&path, SyncMode::OsDefault).unwrap();
            log.append_content(content(1)).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"sequence\": 1, \"trunc\n").unwrap();
        drop(file);

        let log = LinkLog::open(&path, SyncMode::OsDefault).unwrap();
        let records = log.read_records().unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[1], LinkRecord::Malformed { position: 2, .. }));

        let report = verify_records(ChainState::genesis(), &records);
        assert_eq!(report.broken_at, Some(1));
    }

    #[test]
    fn rewrite_attaches_signatures_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.jsonl");
        let log = LinkLog::open(&path, SyncMode::OsDefault).unwrap();
        log.append_content(content(1)).unwrap();
        log.append_content(content(2)).unwrap();

        let keypair = generate_keypair("operator-1");
        let signed: Vec<Link> = decoded(&log.read_records().unwrap())
            .into_iter()
            .map(|link| sign_link(link, &keypair).unwrap())
            .collect();
        log.rewrite(&signed).unwrap();

        let reread = decoded(&log.read_records().unwrap());
        assert!(reread.iter().all(Link::is_signed));
        // Appends continue on the new file.
        log.append_content(content(3)).unwrap();
        assert_eq!(log.read_records().unwrap().len(), 3);
    }

    #[test]
    fn rewrite_refuses_altered_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.jsonl");
        let log = LinkLog::open(&path, SyncMode::OsDefault).unwrap();
        log.append_content(content(1)).unwrap();

        let mut links = decoded(&log.read_records().unwrap());
        links[0].content = content(9);
        let err = log.rewrite(&links).unwrap_err();
        assert!(matches!(err, StoreError::ChainAltered { position: 1 }));
        assert_eq!(decoded(&log.read_records().unwrap())[0].content, content(1));
        assert!(fs::metadata(&path).unwrap().len() > 0);
    }
}
