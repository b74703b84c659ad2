#![allow(dead_code)]

use std::collections::VecDeque;
use std::vec::Vec;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_time::Duration;
use myrtio_fota::config::{BackoffPolicy, UpdateConfig};
use myrtio_fota::core::region::RegionMap;
use myrtio_fota::core::sync::{AbortSignal, SharedStorage};
use myrtio_fota::domain::entity::ProgressSample;
use myrtio_fota::infrastructure::drivers::RamFlash;
use myrtio_fota::{
    BootSlot, BootTrigger, ByteSource, FetchFault, PullResult, RegionReader, StatusEvent,
    StatusSink, StorageDevice, UpdateController, Validator,
};
use myrtio_fota::domain::ports::FirmwareError;

pub const FLASH_SIZE: usize = 1024;
pub const BLOCK_SIZE: u32 = 256;
pub const UNIT: usize = 4;

pub type Flash = RamFlash<FLASH_SIZE>;
pub type Storage = SharedStorage<NoopRawMutex, Flash>;
pub type Abort = AbortSignal<NoopRawMutex>;
pub type Controller<'a, const CHUNK: usize> = UpdateController<'a, NoopRawMutex, Flash, CHUNK>;

pub fn flash() -> Flash {
    let layout = RegionMap::uniform(0, BLOCK_SIZE, 4).unwrap();
    RamFlash::new(layout, UNIT).unwrap()
}

pub fn storage() -> Storage {
    SharedStorage::new(StorageDevice::new(flash()))
}

/// Short delays so failure paths run quickly on the host.
pub fn fast_config() -> UpdateConfig {
    UpdateConfig::DEFAULT
        .with_fetch_timeout(Duration::from_millis(20))
        .with_max_retries(5)
        .with_retry_timeout(Duration::from_secs(1))
        .with_backoff(BackoffPolicy::Fixed(Duration::from_millis(1)))
        .with_progress(5, Duration::from_millis(0))
}

/// Deterministic test image.
pub fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 256) as u8).collect()
}

pub enum Step {
    /// Serve up to `n` bytes at the requested offset
    Chunk(usize),
    Retry,
    Fatal,
    Eof,
    /// Never answer
    Hang,
    /// Request an abort, then serve like `Chunk`
    Cancel(usize),
}

/// Byte source driven by a script of steps. Once the script runs out it
/// serves `chunk` sized pieces of the image and then reports EOF.
pub struct ScriptedSource<'a> {
    image: Vec<u8>,
    script: VecDeque<Step>,
    chunk: usize,
    abort: Option<&'a Abort>,
    pub pulls: usize,
}

impl<'a> ScriptedSource<'a> {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            script: VecDeque::new(),
            chunk: usize::MAX,
            abort: None,
            pulls: 0,
        }
    }

    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk;
        self
    }

    pub fn with_script(mut self, script: impl IntoIterator<Item = Step>) -> Self {
        self.script = script.into_iter().collect();
        self
    }

    pub fn with_abort(mut self, abort: &'a Abort) -> Self {
        self.abort = Some(abort);
        self
    }

    fn serve(&self, offset: u32, buf: &mut [u8], limit: usize) -> PullResult {
        let start = offset as usize;
        if start >= self.image.len() {
            return PullResult::Eof;
        }
        let n = buf.len().min(limit).min(self.image.len() - start);
        buf[..n].copy_from_slice(&self.image[start..start + n]);
        PullResult::Data(n)
    }
}

impl ByteSource for ScriptedSource<'_> {
    async fn pull(&mut self, offset: u32, buf: &mut [u8]) -> PullResult {
        self.pulls += 1;
        match self.script.pop_front() {
            None => self.serve(offset, buf, self.chunk),
            Some(Step::Chunk(n)) => self.serve(offset, buf, n),
            Some(Step::Retry) => PullResult::Retryable(FetchFault::Network),
            Some(Step::Fatal) => PullResult::Fatal(FetchFault::Rejected),
            Some(Step::Eof) => PullResult::Eof,
            Some(Step::Hang) => core::future::pending::<PullResult>().await,
            Some(Step::Cancel(n)) => {
                if let Some(abort) = self.abort {
                    abort.abort();
                }
                self.serve(offset, buf, n)
            }
        }
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<StatusEvent>,
}

impl RecordingSink {
    pub fn progress(&self) -> Vec<ProgressSample> {
        self.events
            .iter()
            .filter_map(|event| match event {
                StatusEvent::Progress(sample) => Some(*sample),
                _ => None,
            })
            .collect()
    }
}

impl StatusSink for RecordingSink {
    fn on_event(&mut self, event: StatusEvent) {
        self.events.push(event);
    }
}

/// Validator with a fixed verdict that records what it was asked to check.
pub struct FixedValidator {
    pub verdict: bool,
    pub checked: Option<(u32, u32)>,
}

impl FixedValidator {
    pub fn new(verdict: bool) -> Self {
        Self {
            verdict,
            checked: None,
        }
    }
}

impl Validator for FixedValidator {
    fn validate<R: RegionReader>(&mut self, _reader: &mut R, base: u32, len: u32) -> bool {
        self.checked = Some((base, len));
        self.verdict
    }
}

pub struct MockBoot {
    pub active: BootSlot,
    pub commits: Vec<BootSlot>,
    pub fail: bool,
}

impl MockBoot {
    pub fn new(active: BootSlot) -> Self {
        Self {
            active,
            commits: Vec::new(),
            fail: false,
        }
    }
}

impl BootTrigger for MockBoot {
    fn active_slot(&mut self) -> BootSlot {
        self.active
    }

    async fn commit_and_reset(&mut self, slot: BootSlot) -> Result<(), FirmwareError> {
        if self.fail {
            return Err(FirmwareError::Activate);
        }
        self.commits.push(slot);
        Ok(())
    }
}

/// Runs `f` on the simulated flash behind `storage`.
pub fn with_flash<R>(storage: &Storage, f: impl FnOnce(&Flash) -> R) -> R {
    let lock = storage.try_lock().ok().expect("storage is held by a session");
    f(lock.driver())
}
