use crate::domain::ports::{ByteSource, FetchFault, PullResult};

/// Result of one [`ImageFetcher::next_chunk`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FetchResult {
    /// `n` bytes at the start of the buffer, `n` may be zero
    Data(usize),
    Finished,
    Retryable(FetchFault),
    Fatal(FetchFault),
}

/// Pull-based reader over a [`ByteSource`].
///
/// Only tracks the byte offset into the remote image. Retry scheduling is up
/// to the caller: a failed pull leaves the offset untouched, so the next call
/// asks for the same bytes again.
pub struct ImageFetcher<S: ByteSource> {
    source: S,
    offset: u32,
    expected: Option<u32>,
}

impl<S: ByteSource> ImageFetcher<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            offset: 0,
            expected: None,
        }
    }

    /// Fetcher that stops after `size` bytes.
    pub fn with_expected_size(source: S, size: u32) -> Self {
        Self {
            source,
            offset: 0,
            expected: Some(size),
        }
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn expected_size(&self) -> Option<u32> {
        self.expected
    }

    pub fn set_expected_size(&mut self, size: Option<u32>) {
        self.expected = size;
    }

    /// Rewinds to the start of the image.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    pub fn resume_at(&mut self, offset: u32) {
        self.offset = offset;
    }

    pub fn source(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    pub async fn next_chunk(&mut self, buf: &mut [u8]) -> FetchResult {
        let want = match self.expected {
            Some(total) => {
                let remaining = total.saturating_sub(self.offset);
                if remaining == 0 {
                    return FetchResult::Finished;
                }
                buf.len().min(remaining as usize)
            }
            None => buf.len(),
        };

        match self.source.pull(self.offset, &mut buf[..want]).await {
            PullResult::Data(n) if n > want => FetchResult::Fatal(FetchFault::Protocol),
            PullResult::Data(n) => {
                // n <= want, which fits into u32
                #[allow(clippy::cast_possible_truncation)]
                let advance = n as u32;
                self.offset += advance;
                FetchResult::Data(n)
            }
            PullResult::Eof => FetchResult::Finished,
            PullResult::Retryable(fault) => FetchResult::Retryable(fault),
            PullResult::Fatal(fault) => FetchResult::Fatal(fault),
        }
    }
}
