//! Chunked tee of a child stream into a log file and a live mirror.

use std::io;
use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest chunk read from the source before it is fanned out.
pub const CHUNK_SIZE: usize = 512;

/// Duplicates every chunk of a stream to a log and a mirror, in that order
pub struct TeeSink<L, M> {
    log: L,
    mirror: M,
}

impl<M> TeeSink<File, M>
where
    M: AsyncWrite + Unpin,
{
    /// Open `path` for appending (creating it and its directory if needed).
    pub async fn open(path: &Path, mirror: M) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self::new(log, mirror))
    }
}

impl<L, M> TeeSink<L, M>
where
    L: AsyncWrite + Unpin,
    M: AsyncWrite + Unpin,
{
    pub fn new(log: L, mirror: M) -> Self {
        Self { log, mirror }
    }

    /// Consume `source` until end of stream, returning the number of bytes teed.
    ///
    /// Each chunk is fully written and flushed to the log, then to the
    /// mirror, before the next read is issued.
    pub async fn run<R>(&mut self, mut source: R) -> io::Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let chunk = &buf[..n];
            self.log.write_all(chunk).await?;
            self.log.flush().await?;
            self.mirror.write_all(chunk).await?;
            self.mirror.flush().await?;
            total += n as u64;
        }
        Ok(total)
    }

    pub fn into_parts(self) -> (L, M) {
        (self.log, self.mirror)
    }
}
