//! File-backed durable queue.
//!
//! The queue lives in a directory with a head file and one active log:
//!
//! - `queue.<generation>.log` holds framed records:
//!
//!   ```text
//!   u32 length | u32 payload checksum | u32 header checksum | payload
//!   ```
//!
//!   All integers are big-endian. Checksums are the first four bytes of a
//!   SHA-256 digest. Every append is synced before it returns.
//! - `queue.head` holds the active generation and the offset of the oldest
//!   unread record. It is replaced atomically (write temp file, sync, rename)
//!   on every dequeue, so a crash can at worst hand out the last record again.
//!
//! Consumed records are dropped by compaction: the unread tail is copied into
//! the next generation's log, and the head file switching to that generation
//! commits it. Logs of other generations are leftovers of an interrupted
//! compaction and are removed on open.
//!
//! On open the whole log is verified. A damaged final record is the remains
//! of an interrupted append and is cut off. Damage anywhere else is
//! [`Error::QueueCorrupted`].
//!
//! # Example
//!
//! ```rust,no_run
//! use event_tracker::queue::{DurableQueue, FileQueue};
//!
//! # async fn example() -> event_tracker::Result<()> {
//! let queue = FileQueue::open("cache/tracker.safe-dev-local-host-svc").await?;
//! queue.enqueue(b"clicks\0{}").await?;
//!
//! while let Some(item) = queue.dequeue().await? {
//!     println!("{} bytes", item.len());
//! }
//! queue.close().await?;
//! # Ok(())
//! # }
//! ```

use super::DurableQueue;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const HEAD_FILE: &str = "queue.head";
const HEADER_LEN: u64 = 12;

/// Consumed bytes tolerated before the log is compacted, as long as they are
/// at least half of the log.
const COMPACT_MIN_BYTES: u64 = 64 * 1024;

/// Persisted read position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Head {
    #[serde(default)]
    generation: u64,
    offset: u64,
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

struct QueueState {
    log: File,
    generation: u64,
    head: u64,
    tail: u64,
}

/// Result of checking the record at one offset.
enum Frame {
    Valid { payload: Vec<u8>, end: u64 },
    /// An append that never completed. Only valid at the end of the log.
    Torn,
    Corrupted(String),
}

/// Durable FIFO queue stored in a directory.
pub struct FileQueue {
    dir: PathBuf,
    state: Mutex<Option<QueueState>>,
    len: AtomicU64,
}

impl FileQueue {
    /// Opens or creates the queue in `dir`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the directory or files cannot be accessed, or
    /// [`Error::QueueCorrupted`] if the head file or a record other than the
    /// last one is damaged.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        let head = load_head(&dir).await?;
        remove_stale_logs(&dir, head.generation).await?;

        let mut log = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(log_path(&dir, head.generation))
            .await?;

        let mut tail = log.metadata().await?.len();
        let scan = scan(&mut log, head.offset, tail).await?;
        if scan.end < tail {
            warn!(
                discarded_bytes = tail - scan.end,
                "Truncating partially written record at end of retry queue"
            );
            log.set_len(scan.end).await?;
            log.sync_all().await?;
            tail = scan.end;
        }

        let mut offset = head.offset;
        if offset > tail {
            warn!(head = offset, tail, "Retry queue head points past the log, resetting");
            offset = tail;
            save_head(&dir, head.generation, offset).await?;
        } else if !scan.head_aligned {
            return Err(Error::QueueCorrupted {
                message: format!("head offset {} is not on a record boundary", offset),
            });
        }

        info!(path = ?dir, entries = scan.pending, generation = head.generation, "Opened retry queue");

        let mut state = QueueState {
            log,
            generation: head.generation,
            head: offset,
            tail,
        };
        if should_compact(state.head, state.tail) {
            compact(&dir, &mut state).await?;
        }

        Ok(Self {
            dir,
            state: Mutex::new(Some(state)),
            len: AtomicU64::new(scan.pending),
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

fn log_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("queue.{}.log", generation))
}

fn checksum(parts: &[&[u8]]) -> u32 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

fn frame(item: &[u8], len: u32) -> BytesMut {
    let payload_sum = checksum(&[item]);
    let header_sum = checksum(&[&len.to_be_bytes()[..], &payload_sum.to_be_bytes()[..]]);

    let mut frame = BytesMut::with_capacity(item.len() + HEADER_LEN as usize);
    frame.put_u32(len);
    frame.put_u32(payload_sum);
    frame.put_u32(header_sum);
    frame.put_slice(item);
    frame
}

fn should_compact(head: u64, tail: u64) -> bool {
    head > 0 && (head == tail || (head >= COMPACT_MIN_BYTES && head * 2 >= tail))
}

async fn load_head(dir: &Path) -> Result<Head> {
    let path = dir.join(HEAD_FILE);
    if !path.exists() {
        return Ok(Head::default());
    }

    let content = fs::read(&path).await?;
    serde_json::from_slice(&content).map_err(|e| Error::QueueCorrupted {
        message: format!("invalid head file {:?}: {}", path, e),
    })
}

async fn save_head(dir: &Path, generation: u64, offset: u64) -> Result<()> {
    let head = Head {
        generation,
        offset,
        timestamp: Some(chrono::Utc::now()),
    };
    let path = dir.join(HEAD_FILE);
    let temp_path = path.with_extension("tmp");

    let json = serde_json::to_vec(&head)?;
    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(&json).await?;
    file.sync_all().await?;

    fs::rename(&temp_path, &path).await?;
    Ok(())
}

/// Removes logs of generations other than `current`.
async fn remove_stale_logs(dir: &Path, current: u64) -> Result<()> {
    let active = log_path(dir, current);
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("queue.") && name.ends_with(".log") && path != active {
            debug!(path = ?path, "Removing log left by an interrupted compaction");
            fs::remove_file(&path).await?;
        }
    }
    Ok(())
}

/// Checks the record at `pos`. The file cursor must be at `pos`.
async fn read_frame(log: &mut File, pos: u64, tail: u64) -> Result<Frame> {
    if tail - pos < HEADER_LEN {
        return Ok(Frame::Torn);
    }

    let len = log.read_u32().await?;
    let payload_sum = log.read_u32().await?;
    let header_sum = log.read_u32().await?;

    if checksum(&[&len.to_be_bytes()[..], &payload_sum.to_be_bytes()[..]]) != header_sum {
        // A crash can leave the end of the file zero-filled.
        if rest_is_zeroed(log, pos).await? {
            return Ok(Frame::Torn);
        }
        return Ok(Frame::Corrupted(format!("bad record header at offset {}", pos)));
    }

    let end = pos + HEADER_LEN + u64::from(len);
    if end > tail {
        return Ok(Frame::Torn);
    }

    let mut payload = vec![0u8; len as usize];
    log.read_exact(&mut payload).await?;
    if checksum(&[payload.as_slice()]) != payload_sum {
        if end == tail {
            return Ok(Frame::Torn);
        }
        return Ok(Frame::Corrupted(format!("bad record checksum at offset {}", pos)));
    }

    Ok(Frame::Valid { payload, end })
}

async fn rest_is_zeroed(log: &mut File, pos: u64) -> Result<bool> {
    log.seek(SeekFrom::Start(pos)).await?;
    let mut rest = Vec::new();
    log.read_to_end(&mut rest).await?;
    Ok(rest.iter().all(|b| *b == 0))
}

struct Scan {
    /// End of the last intact record.
    end: u64,
    /// Intact records at or after the head.
    pending: u64,
    head_aligned: bool,
}

/// Verifies every record from the start of the log.
async fn scan(log: &mut File, head: u64, tail: u64) -> Result<Scan> {
    let mut pos = 0;
    let mut pending = 0;
    let mut head_aligned = false;

    log.seek(SeekFrom::Start(0)).await?;
    while pos < tail {
        if pos == head {
            head_aligned = true;
        }
        match read_frame(log, pos, tail).await? {
            Frame::Valid { end, .. } => {
                if pos >= head {
                    pending += 1;
                }
                pos = end;
            }
            Frame::Torn => break,
            Frame::Corrupted(message) => return Err(Error::QueueCorrupted { message }),
        }
        log.seek(SeekFrom::Start(pos)).await?;
    }
    if pos == head {
        head_aligned = true;
    }

    Ok(Scan {
        end: pos,
        pending,
        head_aligned,
    })
}

/// Moves the unread records into a fresh log of the next generation.
async fn compact(dir: &Path, state: &mut QueueState) -> Result<()> {
    let next = state.generation + 1;
    let live = state.tail - state.head;
    let path = log_path(dir, next);

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .await?;

    state.log.seek(SeekFrom::Start(state.head)).await?;
    let mut unread = (&mut state.log).take(live);
    let copied = tokio::io::copy(&mut unread, &mut file).await?;
    if copied != live {
        return Err(Error::QueueCorrupted {
            message: format!("compaction copied {} of {} unread bytes", copied, live),
        });
    }
    file.flush().await?;
    file.sync_all().await?;

    // Switching the head to the new generation commits the compaction.
    save_head(dir, next, 0).await?;

    let old = log_path(dir, state.generation);
    debug!(generation = next, reclaimed = state.head, "Compacted retry queue");
    state.log = file;
    state.generation = next;
    state.head = 0;
    state.tail = live;

    if let Err(e) = fs::remove_file(&old).await {
        warn!(path = ?old, error = %e, "Could not remove compacted log");
    }
    Ok(())
}

fn corrupted(offset: u64, e: Error) -> Error {
    match e {
        Error::Io(e) => Error::QueueCorrupted {
            message: format!("unreadable record at offset {}: {}", offset, e),
        },
        other => other,
    }
}

#[async_trait]
impl DurableQueue for FileQueue {
    async fn enqueue(&self, item: &[u8]) -> Result<()> {
        let len = u32::try_from(item.len()).map_err(|_| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("item of {} bytes exceeds the record limit", item.len()),
            ))
        })?;

        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(Error::Closed)?;

        let frame = frame(item, len);
        state.log.seek(SeekFrom::Start(state.tail)).await?;
        state.log.write_all(&frame).await?;
        state.log.flush().await?;
        state.log.sync_data().await?;

        state.tail += frame.len() as u64;
        self.len.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Vec<u8>>> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(Error::Closed)?;

        if state.head >= state.tail {
            return Ok(None);
        }

        let offset = state.head;
        state.log.seek(SeekFrom::Start(offset)).await?;
        let frame = read_frame(&mut state.log, offset, state.tail)
            .await
            .map_err(|e| corrupted(offset, e))?;

        let (item, end) = match frame {
            Frame::Valid { payload, end } => (payload, end),
            Frame::Torn => {
                return Err(Error::QueueCorrupted {
                    message: format!("incomplete record at offset {}", offset),
                })
            }
            Frame::Corrupted(message) => return Err(Error::QueueCorrupted { message }),
        };

        save_head(&self.dir, state.generation, end).await?;
        state.head = end;

        // The head is already committed, so the item is handed out even if
        // compaction fails. The next dequeue tries again.
        if should_compact(state.head, state.tail) {
            if let Err(e) = compact(&self.dir, state).await {
                warn!(error = %e, "Retry queue compaction failed");
            }
        }

        self.len.fetch_sub(1, Ordering::AcqRel);
        Ok(Some(item))
    }

    fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        if let Some(mut state) = self.state.lock().await.take() {
            state.log.flush().await?;
            state.log.sync_all().await?;
            debug!(path = ?self.dir, "Closed retry queue");
        }
        Ok(())
    }
}
