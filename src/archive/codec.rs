//! Line codec for archived message streams.
//!
//! One JSON document per line, newline-terminated. Decoding is fail-fast: the
//! first malformed line ends the stream with an error and nothing after it is
//! yielded. Blank lines (including the empty tail after the final newline) are
//! skipped.

use bytes::Bytes;
use futures::stream::{Stream, StreamExt, TryStreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_stream::wrappers::LinesStream;

use super::error::ArchiveError;

/// Encode a stream of records into newline-terminated JSON lines.
pub fn encode_lines<T, S>(records: S) -> impl Stream<Item = Result<Bytes, ArchiveError>>
where
    T: Serialize,
    S: Stream<Item = Result<T, ArchiveError>>,
{
    records.map(|record| {
        let record = record?;
        let mut line = serde_json::to_vec(&record).map_err(ArchiveError::Encode)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    })
}

/// Decode newline-delimited JSON records from a byte stream.
///
/// The returned stream is fused after its first error.
pub fn decode_lines<T, R>(reader: R) -> impl Stream<Item = Result<T, ArchiveError>> + Send
where
    T: DeserializeOwned + Send,
    R: AsyncRead + Send + Unpin + 'static,
{
    LinesStream::new(BufReader::new(reader).lines())
        .map_err(ArchiveError::from)
        .try_filter_map(|line| async move {
            if line.trim().is_empty() {
                return Ok(None);
            }
            serde_json::from_str(&line)
                .map(Some)
                .map_err(ArchiveError::Decode)
        })
        .scan(false, |failed, item| {
            if *failed {
                return futures::future::ready(None);
            }
            *failed = item.is_err();
            futures::future::ready(Some(item))
        })
}
