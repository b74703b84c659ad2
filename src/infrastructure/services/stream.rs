use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Receiver;
use heapless::Vec;

use crate::domain::ports::{ByteSource, FetchFault, PullResult};
use crate::fmt::warn;

/// Message pushed by a transport task that receives the image itself
/// (MQTT, raw TCP upload).
#[allow(clippy::large_enum_variant)]
pub enum StreamMsg<const CHUNK: usize> {
    Data(Vec<u8, CHUNK>),
    Finish,
    Abort,
}

/// [`ByteSource`] fed through a channel.
///
/// A pushed stream cannot seek: pulls must continue where the previous one
/// stopped. Asking for another offset fails the session.
pub struct StreamSource<'a, M: RawMutex, const CHUNK: usize, const N: usize> {
    receiver: Receiver<'a, M, StreamMsg<CHUNK>, N>,
    pending: Vec<u8, CHUNK>,
    consumed: usize,
    position: u32,
}

impl<'a, M: RawMutex, const CHUNK: usize, const N: usize> StreamSource<'a, M, CHUNK, N> {
    pub fn new(receiver: Receiver<'a, M, StreamMsg<CHUNK>, N>) -> Self {
        Self {
            receiver,
            pending: Vec::new(),
            consumed: 0,
            position: 0,
        }
    }

    /// Bytes handed out so far.
    pub fn position(&self) -> u32 {
        self.position
    }
}

impl<M: RawMutex, const CHUNK: usize, const N: usize> ByteSource for StreamSource<'_, M, CHUNK, N> {
    async fn pull(&mut self, offset: u32, buf: &mut [u8]) -> PullResult {
        if offset != self.position {
            warn!(
                "fota: stream cannot seek from {} to {}",
                self.position,
                offset
            );
            return PullResult::Fatal(FetchFault::Protocol);
        }

        if self.consumed == self.pending.len() {
            match self.receiver.receive().await {
                StreamMsg::Data(bytes) => {
                    self.pending = bytes;
                    self.consumed = 0;
                }
                StreamMsg::Finish => return PullResult::Eof,
                StreamMsg::Abort => return PullResult::Fatal(FetchFault::Rejected),
            }
        }

        let rest = &self.pending[self.consumed..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.consumed += n;
        // n <= CHUNK
        #[allow(clippy::cast_possible_truncation)]
        {
            self.position += n as u32;
        }
        PullResult::Data(n)
    }
}
