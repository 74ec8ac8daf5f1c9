use md5::{Digest, Md5};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Copy buffer size. Memory use per upload is bounded by this regardless of
/// the declared length.
const CHUNK_SIZE: usize = 8192;

#[derive(Error, Debug)]
pub enum ChecksumError {
    #[error("upload truncated: declared {expected} bytes, received {received}")]
    Truncated { expected: u64, received: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Streams exactly `declared_len` bytes from `reader` into `writer`,
/// feeding an MD5 hasher as it goes, and returns the lowercase hex digest.
///
/// Stops reading at `declared_len`; bytes beyond it are never consumed.
/// Fails with `Truncated` if the stream ends early. The writer is flushed
/// before the digest is returned.
pub async fn copy_with_digest<R, W>(
    reader: &mut R,
    writer: &mut W,
    declared_len: u64,
) -> Result<String, ChecksumError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut hasher = Md5::new();
    let mut buffer = [0u8; CHUNK_SIZE];
    let mut received: u64 = 0;

    while received < declared_len {
        let want = CHUNK_SIZE.min((declared_len - received) as usize);
        let n = reader.read(&mut buffer[..want]).await?;
        if n == 0 {
            return Err(ChecksumError::Truncated {
                expected: declared_len,
                received,
            });
        }
        hasher.update(&buffer[..n]);
        writer.write_all(&buffer[..n]).await?;
        received += n as u64;
    }

    writer.flush().await?;
    Ok(hex::encode(hasher.finalize()))
}
