use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Sequential source of upload data.
#[async_trait]
pub trait ByteSource: Send {
    /// Reads up to `max_len` bytes. Anything shorter than `max_len` means
    /// the source is exhausted.
    async fn read_chunk(&mut self, max_len: usize) -> io::Result<Vec<u8>>;
}

/// Sequential sink for download data.
#[async_trait]
pub trait ByteSink: Send {
    async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()>;

    /// Pushes buffered data down to the underlying file.
    async fn finish(&mut self) -> io::Result<()>;
}

#[async_trait]
impl<R> ByteSource for R
where
    R: AsyncRead + Unpin + Send,
{
    async fn read_chunk(&mut self, max_len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0; max_len];
        let mut filled = 0;
        // A single read may return less than asked without being at EOF
        while filled < max_len {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

#[async_trait]
impl<W> ByteSink for W
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_all(data).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_full_chunks_then_short() {
        let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let mut src = &data[..];
        let first = src.read_chunk(512).await.unwrap();
        let second = src.read_chunk(512).await.unwrap();
        let third = src.read_chunk(512).await.unwrap();
        assert_eq!(first.len(), 512);
        assert_eq!(second.len(), 488);
        assert!(third.is_empty());
        assert_eq!([first, second].concat(), data);
    }

    #[tokio::test]
    async fn fills_chunk_across_partial_reads() {
        let (mut tx, mut rx) = tokio::io::duplex(8);
        let writer = tokio::spawn(async move {
            tx.write_all(&[1u8; 20]).await.unwrap();
        });
        let chunk = rx.read_chunk(16).await.unwrap();
        assert_eq!(chunk, vec![1u8; 16]);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn sink_appends() {
        let mut out: Vec<u8> = Vec::new();
        out.write_chunk(b"ab").await.unwrap();
        out.write_chunk(b"").await.unwrap();
        out.write_chunk(b"cd").await.unwrap();
        ByteSink::finish(&mut out).await.unwrap();
        assert_eq!(out, b"abcd");
    }
}
