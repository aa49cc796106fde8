//! Chunked multi-part upload orchestration.
//!
//! An upload creates a session, streams the source in fixed-size parts and
//! finalizes the session. Parts go out strictly one after another with
//! 1-based, gap-free part numbers; a part is only counted once its send
//! (including any retries inside [`UploadApi::send_part`]) has succeeded.

use std::future::Future;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{wire::FileUpload, CallContext, NotionError, Result};

/// Part size used when none is configured (10 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Upload endpoints the orchestrator drives.
///
/// Each method is one logical operation; implementations are expected to
/// retry internally.
pub trait UploadApi {
    /// Starts a multi-part upload session.
    fn create_upload(
        &self,
        ctx: &CallContext,
        filename: &str,
        number_of_parts: Option<u32>,
    ) -> impl Future<Output = Result<FileUpload>> + Send;

    /// Sends one part. `chunk` is owned by the call for its whole retry cycle.
    fn send_part(
        &self,
        ctx: &CallContext,
        session: &UploadSession,
        part_number: u32,
        chunk: Vec<u8>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn complete_upload(
        &self,
        ctx: &CallContext,
        upload_id: &str,
    ) -> impl Future<Output = Result<FileUpload>> + Send;
}

/// State of an in-progress upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadSession {
    pub upload_id: String,
    pub filename: String,
    pub upload_target_uri: String,
    pub chunk_size: usize,
    /// Part number the next chunk will be sent with.
    pub next_part_number: u32,
}

/// Splits a byte stream into parts and uploads them through an [`UploadApi`].
#[derive(Debug)]
pub struct ChunkedUploader<'a, A> {
    api: &'a A,
    chunk_size: usize,
    content_length: Option<u64>,
}

impl<'a, A: UploadApi> ChunkedUploader<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self {
            api,
            chunk_size: DEFAULT_CHUNK_SIZE,
            content_length: None,
        }
    }

    /// Sets the part size. Zero keeps the default.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        if chunk_size > 0 {
            self.chunk_size = chunk_size;
        }
        self
    }

    /// Announces the total length so the session can declare its part count.
    pub fn content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    pub async fn upload<R>(
        &self,
        ctx: &CallContext,
        filename: &str,
        mut reader: R,
    ) -> Result<FileUpload>
    where
        R: AsyncRead + Unpin,
    {
        let number_of_parts = self
            .content_length
            .map(|length| part_count(length, self.chunk_size))
            .transpose()?;
        let created = self
            .api
            .create_upload(ctx, filename, number_of_parts)
            .await?;

        let mut session = UploadSession {
            upload_target_uri: created
                .upload_url
                .unwrap_or_else(|| format!("file_uploads/{}/send", created.id)),
            upload_id: created.id,
            filename: filename.to_owned(),
            chunk_size: self.chunk_size,
            next_part_number: 1,
        };

        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let filled = tokio::select! {
                biased;
                interrupt = ctx.done() => return Err(interrupt.into()),
                filled = read_full(&mut reader, &mut buf) => filled?,
            };
            if filled == 0 {
                break;
            }

            // `buf` is refilled for the next part; the send gets its own copy.
            let chunk = buf[..filled].to_vec();
            let part_number = session.next_part_number;
            self.api
                .send_part(ctx, &session, part_number, chunk)
                .await?;
            session.next_part_number += 1;

            #[cfg(feature = "tracing")]
            tracing::debug!(
                upload_id = %session.upload_id,
                part_number,
                bytes = filled,
                "uploaded part"
            );

            if filled < self.chunk_size {
                break;
            }
        }

        let completed = self.api.complete_upload(ctx, &session.upload_id).await?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            upload_id = %session.upload_id,
            parts = session.next_part_number - 1,
            "completed chunked upload"
        );

        Ok(completed)
    }
}

fn part_count(length: u64, chunk_size: usize) -> Result<u32> {
    let parts = length.div_ceil(chunk_size as u64);
    u32::try_from(parts)
        .map_err(|_| NotionError::Config(format!("upload of {length} bytes needs too many parts")))
}

/// Reads until `buf` is full or the stream ends; returns the bytes read.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = reader.read(&mut buf[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};

    use tokio::io::{AsyncRead, ReadBuf};

    use super::{ChunkedUploader, UploadApi, UploadSession};
    use crate::{wire::FileUpload, CallContext, NotionError, Result};

    #[derive(Debug, PartialEq, Eq)]
    enum Call {
        Create(Option<u32>),
        Send(u32, Vec<u8>),
        Complete(String),
    }

    #[derive(Default)]
    struct FakeApi {
        calls: Mutex<Vec<Call>>,
        fail_part: Option<u32>,
    }

    impl FakeApi {
        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn sent_parts(&self) -> Vec<u32> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|call| match call {
                    Call::Send(part, _) => Some(*part),
                    _ => None,
                })
                .collect()
        }

        fn completions(&self) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|call| matches!(call, Call::Complete(_)))
                .count()
        }
    }

    fn file_upload(id: &str, status: &str) -> FileUpload {
        FileUpload {
            id: id.to_owned(),
            upload_url: Some(format!("https://uploads.test/{id}/send")),
            status: Some(status.to_owned()),
            filename: None,
            content_type: None,
            number_of_parts: None,
        }
    }

    impl UploadApi for FakeApi {
        async fn create_upload(
            &self,
            _ctx: &CallContext,
            _filename: &str,
            number_of_parts: Option<u32>,
        ) -> Result<FileUpload> {
            self.record(Call::Create(number_of_parts));
            Ok(file_upload("up-1", "pending"))
        }

        async fn send_part(
            &self,
            _ctx: &CallContext,
            session: &UploadSession,
            part_number: u32,
            chunk: Vec<u8>,
        ) -> Result<()> {
            assert_eq!(session.upload_target_uri, "https://uploads.test/up-1/send");
            if self.fail_part == Some(part_number) {
                return Err(NotionError::Decode("part rejected".to_owned()));
            }
            self.record(Call::Send(part_number, chunk));
            Ok(())
        }

        async fn complete_upload(&self, _ctx: &CallContext, upload_id: &str) -> Result<FileUpload> {
            self.record(Call::Complete(upload_id.to_owned()));
            Ok(file_upload(upload_id, "uploaded"))
        }
    }

    /// Yields at most `step` bytes per read.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let end = (self.pos + self.step)
                .min(self.data.len())
                .min(self.pos + buf.remaining());
            buf.put_slice(&self.data[self.pos..end]);
            self.pos = end;
            Poll::Ready(Ok(()))
        }
    }

    async fn upload(api: &FakeApi, data: &[u8], chunk_size: usize) -> Result<FileUpload> {
        ChunkedUploader::new(api)
            .chunk_size(chunk_size)
            .upload(&CallContext::new(), "report.pdf", data)
            .await
    }

    #[tokio::test]
    async fn exact_multiple_sends_no_trailing_empty_part() {
        let api = FakeApi::default();
        let data = vec![7u8; 12];

        let result = upload(&api, &data, 4).await.expect("upload must succeed");

        assert_eq!(result.status.as_deref(), Some("uploaded"));
        assert_eq!(api.sent_parts(), vec![1, 2, 3]);
        assert_eq!(api.completions(), 1);
    }

    #[tokio::test]
    async fn empty_stream_still_finalizes() {
        let api = FakeApi::default();

        upload(&api, &[], 4).await.expect("empty upload must succeed");

        assert!(api.sent_parts().is_empty());
        assert_eq!(api.completions(), 1);
    }

    #[tokio::test]
    async fn small_file_is_a_single_part() {
        let api = FakeApi::default();

        upload(&api, b"abc", 1024).await.expect("upload must succeed");

        let calls = api.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                Call::Create(None),
                Call::Send(1, b"abc".to_vec()),
                Call::Complete("up-1".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn parts_keep_their_own_bytes() {
        let api = FakeApi::default();

        upload(&api, b"aaaabbbbcc", 4).await.expect("upload must succeed");

        let calls = api.calls.lock().unwrap();
        assert_eq!(calls[1], Call::Send(1, b"aaaa".to_vec()));
        assert_eq!(calls[2], Call::Send(2, b"bbbb".to_vec()));
        assert_eq!(calls[3], Call::Send(3, b"cc".to_vec()));
    }

    #[tokio::test]
    async fn trickling_reader_still_fills_whole_parts() {
        let api = FakeApi::default();
        let reader = Trickle {
            data: (0..10u8).collect(),
            pos: 0,
            step: 3,
        };

        ChunkedUploader::new(&api)
            .chunk_size(5)
            .content_length(10)
            .upload(&CallContext::new(), "trickle.bin", reader)
            .await
            .expect("upload must succeed");

        let calls = api.calls.lock().unwrap();
        assert_eq!(calls[0], Call::Create(Some(2)));
        assert_eq!(calls[1], Call::Send(1, vec![0, 1, 2, 3, 4]));
        assert_eq!(calls[2], Call::Send(2, vec![5, 6, 7, 8, 9]));
        assert_eq!(calls.len(), 4);
    }

    #[tokio::test]
    async fn failed_part_stops_before_finalize() {
        let api = FakeApi {
            fail_part: Some(2),
            ..FakeApi::default()
        };

        let err = upload(&api, &[1u8; 16], 4)
            .await
            .expect_err("part 2 must fail the upload");

        assert!(matches!(err, NotionError::Decode(_)));
        assert_eq!(api.sent_parts(), vec![1]);
        assert_eq!(api.completions(), 0);
    }

    #[tokio::test]
    async fn canceled_context_stops_reading() {
        let api = FakeApi::default();
        let ctx = CallContext::new();
        ctx.cancel();

        let err = ChunkedUploader::new(&api)
            .chunk_size(4)
            .upload(&ctx, "x", &b"abcdefgh"[..])
            .await
            .expect_err("canceled upload must fail");

        assert!(matches!(err, NotionError::Canceled));
        assert!(api.sent_parts().is_empty());
    }
}
