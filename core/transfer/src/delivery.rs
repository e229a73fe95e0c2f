//! Plaintext handed back to a receiver.

use futures::{stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::cleanup::BlobGuard;
use secureshare_common::{ByteStream, Result, TransferId};

/// A decrypted file on its way to the receiver.
///
/// The transfer is delivered once [`stream`](Self::into_stream) has been read
/// to its end. Dropping the delivery (or the stream) early cancels it and
/// removes any staged plaintext.
pub struct Delivery {
    transfer_id: TransferId,
    file_name: String,
    stream: ByteStream,
}

impl Delivery {
    pub(crate) fn new(transfer_id: TransferId, file_name: String, stream: ByteStream) -> Self {
        Self {
            transfer_id,
            file_name,
            stream,
        }
    }

    pub fn transfer_id(&self) -> &TransferId {
        &self.transfer_id
    }

    /// Name to deliver the file under.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// The plaintext as a chunk stream.
    pub fn into_stream(self) -> ByteStream {
        self.stream
    }

    /// Collect the whole plaintext in memory.
    pub async fn into_bytes(self) -> Result<Vec<u8>> {
        let mut stream = self.stream;
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    /// Copy the plaintext into `writer`, returning the number of bytes written.
    pub async fn write_to<W>(self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut stream = self.stream;
        let mut total = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(total)
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("transfer_id", &self.transfer_id)
            .field("file_name", &self.file_name)
            .finish_non_exhaustive()
    }
}

/// Stream a staged plaintext blob and remove it once the stream ends or fails.
///
/// An early drop leaves removal to the guard.
pub(crate) fn staged_stream(source: ByteStream, guard: BlobGuard) -> ByteStream {
    Box::pin(stream::try_unfold((source, Some(guard)), next_staged_chunk))
}

type StagedState = (ByteStream, Option<BlobGuard>);

async fn next_staged_chunk(
    (mut source, guard): StagedState,
) -> Result<Option<(Vec<u8>, StagedState)>> {
    let Some(guard) = guard else {
        return Ok(None);
    };

    match source.next().await {
        Some(Ok(chunk)) => Ok(Some((chunk, (source, Some(guard))))),
        Some(Err(e)) => {
            release(guard).await;
            Err(e)
        }
        None => {
            release(guard).await;
            debug!("Staged plaintext fully delivered");
            Ok(None)
        }
    }
}

async fn release(guard: BlobGuard) {
    let path = guard.path().map(|p| p.to_string_path());
    if let Err(e) = guard.discard().await {
        warn!(path = ?path, error = %e, "Failed to remove staged plaintext");
    }
}
