//! Follows the game's log file from the start, line by line.
//!
//! The file may not exist when the game is spawned, so opening is retried on a
//! fixed schedule. Truncation or replacement of the file is an error; the
//! stream ends once the writer is known to have exited and the file is drained.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
    sync::watch,
};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error("log file {} unavailable after {attempts} attempts: {source}", .path.display())]
    Unavailable {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("log file {} was truncated", .0.display())]
    Truncated(PathBuf),
    #[error("log file {} was replaced or removed", .0.display())]
    Rotated(PathBuf),
    #[error("read log file: {0}")]
    Io(#[from] std::io::Error),
}

async fn open_with_retry(path: &Path, attempts: u32, interval: Duration) -> Result<File, TailError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match File::open(path).await {
            Ok(f) => return Ok(f),
            Err(source) if attempt >= attempts => {
                return Err(TailError::Unavailable {
                    path: path.to_path_buf(),
                    attempts,
                    source,
                });
            }
            Err(e) => {
                tracing::info!(path = %path.display(), attempt, error = %e, "waiting for game log");
            }
        }
        attempt += 1;
        tokio::time::sleep(interval).await;
    }
}

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

pub struct LogTail {
    path: PathBuf,
    reader: BufReader<File>,
    file_id: Option<u64>,
    pos: u64,
    partial: Vec<u8>,
    writer_done: watch::Receiver<bool>,
    writer_gone: bool,
}

impl LogTail {
    /// `writer_done` flips to true once the process writing the log has exited.
    pub async fn open(
        path: impl Into<PathBuf>,
        attempts: u32,
        interval: Duration,
        writer_done: watch::Receiver<bool>,
    ) -> Result<Self, TailError> {
        let path = path.into();
        let file = open_with_retry(&path, attempts, interval).await?;
        let file_id = file_id(&file.metadata().await?);
        tracing::info!(path = %path.display(), "following game log");
        Ok(Self {
            path,
            reader: BufReader::new(file),
            file_id,
            pos: 0,
            partial: Vec::new(),
            writer_done,
            writer_gone: false,
        })
    }

    fn take_line(&mut self) -> String {
        while matches!(self.partial.last(), Some(b'\n' | b'\r')) {
            self.partial.pop();
        }
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        line
    }

    async fn ensure_same_file(&self) -> Result<(), TailError> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TailError::Rotated(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        if meta.len() < self.pos {
            return Err(TailError::Truncated(self.path.clone()));
        }
        if self.file_id.is_some() && file_id(&meta) != self.file_id {
            return Err(TailError::Rotated(self.path.clone()));
        }
        Ok(())
    }

    /// Next complete line, or `None` once the writer has exited and every
    /// byte has been read.
    pub async fn next_line(&mut self) -> Result<Option<String>, TailError> {
        loop {
            let finished = self.writer_gone || *self.writer_done.borrow();

            let n = self.reader.read_until(b'\n', &mut self.partial).await?;
            self.pos += n as u64;
            if self.partial.ends_with(b"\n") {
                return Ok(Some(self.take_line()));
            }
            if n > 0 {
                continue;
            }

            if finished {
                if self.partial.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }

            self.ensure_same_file().await?;
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                changed = self.writer_done.changed() => {
                    if changed.is_err() {
                        self.writer_gone = true;
                    }
                }
            }
        }
    }
}
