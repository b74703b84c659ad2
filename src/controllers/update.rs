//! Update session controller
//!
//! Drives one firmware update session: fetch a chunk, erase what the chunk
//! touches, program it, report progress, and once the image is complete ask
//! the validator whether it may be booted.

use core::fmt;

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Instant, Timer, with_timeout};

use super::writer::{ImageWriter, MAX_PROGRAM_UNIT, align_up};
use crate::config::{DEFAULT_CHUNK_SIZE, ErasePolicy, UpdateConfig};
use crate::core::progress::ProgressGate;
use crate::core::retry::{RetryBudget, RetryDecision};
use crate::core::sync::{AbortSignal, SharedStorage};
use crate::domain::entity::{AbortReason, FirmwareImage, ProgressSample, SessionState};
use crate::domain::ports::{
    ByteSource, FetchFault, FlashDriver, StatusEvent, StatusSink, StorageError, Validator,
};
use crate::fmt::{debug, info, warn};
use crate::infrastructure::services::{FetchResult, ImageFetcher, StorageDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionError {
    /// The storage is owned by another session
    AlreadyActive,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::AlreadyActive => f.write_str("update session already active"),
        }
    }
}

/// Terminal state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Image written and accepted by the validator
    Completed(FirmwareImage),
    Aborted(AbortReason),
}

impl SessionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SessionOutcome::Completed(_))
    }
}

/// Update session state machine.
///
/// `CHUNK` is the size of the session buffer handed to the fetcher.
pub struct UpdateController<'a, M: RawMutex, D: FlashDriver, const CHUNK: usize = DEFAULT_CHUNK_SIZE>
{
    storage: &'a SharedStorage<M, D>,
    abort: &'a AbortSignal<M>,
    config: UpdateConfig,
    state: SessionState,
    retry: RetryBudget,
}

impl<'a, M: RawMutex, D: FlashDriver, const CHUNK: usize> UpdateController<'a, M, D, CHUNK> {
    pub fn new(
        storage: &'a SharedStorage<M, D>,
        abort: &'a AbortSignal<M>,
        config: UpdateConfig,
    ) -> Self {
        let retry = RetryBudget::new(&config.retry);
        Self {
            storage,
            abort,
            config,
            state: SessionState::Idle,
            retry,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Retry accounting of the current (or last) session.
    pub fn retry_budget(&self) -> &RetryBudget {
        &self.retry
    }

    /// Runs a session writing an image of `total_size` bytes (`None` when
    /// streaming an image of unknown size) to `target_base`.
    pub async fn start<S: ByteSource, V: Validator, K: StatusSink>(
        &mut self,
        total_size: Option<u32>,
        target_base: u32,
        fetcher: &mut ImageFetcher<S>,
        validator: &mut V,
        sink: &mut K,
    ) -> Result<SessionOutcome, SessionError> {
        self.run(
            FirmwareImage::new(total_size, target_base),
            fetcher,
            validator,
            sink,
        )
        .await
    }

    /// Same as [`Self::start`] for a prepared image description.
    ///
    /// The storage stays locked and unlocked for writing until the session
    /// reaches a terminal state. Fails with [`SessionError::AlreadyActive`]
    /// when another session holds the storage.
    pub async fn run<S: ByteSource, V: Validator, K: StatusSink>(
        &mut self,
        image: FirmwareImage,
        fetcher: &mut ImageFetcher<S>,
        validator: &mut V,
        sink: &mut K,
    ) -> Result<SessionOutcome, SessionError> {
        let storage = self.storage;
        let mut lock = storage.try_lock().map_err(|_| {
            warn!("fota: storage busy, session rejected");
            SessionError::AlreadyActive
        })?;

        self.abort.clear();
        self.retry.reset();
        fetcher.reset();
        fetcher.set_expected_size(image.total_size);

        info!(
            "fota: session started ({:?} bytes at {:#x})",
            image.total_size,
            image.target_base
        );
        sink.on_event(StatusEvent::Started {
            total: image.total_size,
            target: image.target_base,
        });
        self.state = SessionState::Fetching;

        let result = {
            let mut guard = lock.unlock();
            self.session(&mut guard, image, fetcher, validator, sink)
                .await
        };
        drop(lock);

        let outcome = match result {
            Ok(image) => {
                info!("fota: session completed ({} bytes)", image.bytes_written);
                self.state = SessionState::Completed;
                sink.on_event(StatusEvent::Completed {
                    bytes: image.bytes_written,
                });
                SessionOutcome::Completed(image)
            }
            Err(reason) => {
                warn!("fota: session aborted ({:?})", reason);
                self.state = SessionState::Aborted(reason);
                sink.on_event(StatusEvent::Aborted { reason });
                SessionOutcome::Aborted(reason)
            }
        };

        Ok(outcome)
    }

    async fn session<S: ByteSource, V: Validator, K: StatusSink>(
        &mut self,
        device: &mut StorageDevice<D>,
        mut image: FirmwareImage,
        fetcher: &mut ImageFetcher<S>,
        validator: &mut V,
        sink: &mut K,
    ) -> Result<FirmwareImage, AbortReason> {
        let (mut writer, span_end) = self.prepare(device, &image)?;
        if self.config.erase_policy == ErasePolicy::Upfront && image.total_size.is_some() {
            debug!(
                "fota: erasing {:#x}..{:#x}",
                image.target_base,
                span_end
            );
            while let Err(err) = writer.ensure_erased(device, span_end) {
                self.stalled(err).await?;
            }
        }

        let mut gate = ProgressGate::new(&self.config.progress);
        let mut buf = [0u8; CHUNK];

        loop {
            if self.abort.is_aborted() {
                return Err(AbortReason::Cancelled);
            }
            if image.is_complete() {
                break;
            }

            self.state = SessionState::Fetching;
            let fetched = match select(
                with_timeout(self.config.fetch_timeout, fetcher.next_chunk(&mut buf)),
                self.abort.wait(),
            )
            .await
            {
                Either::First(Ok(result)) => result,
                Either::First(Err(_)) => FetchResult::Retryable(FetchFault::Timeout),
                Either::Second(()) => return Err(AbortReason::Cancelled),
            };

            match fetched {
                FetchResult::Data(0) => self.backoff(FetchFault::Stalled).await?,
                FetchResult::Data(n) => {
                    self.state = SessionState::Writing;
                    self.retry.reset();

                    let mut pending = &buf[..n];
                    while let Err(err) = writer.write(device, pending) {
                        pending = &pending[writer.consumed()..];
                        self.stalled(err).await?;
                    }
                    // n <= CHUNK and the fetcher never passes the expected size
                    #[allow(clippy::cast_possible_truncation)]
                    let written = n as u32;
                    image.bytes_written += written;

                    let sample = ProgressSample {
                        bytes_done: image.bytes_written,
                        bytes_total: image.total_size,
                        at: Instant::now(),
                    };
                    if let Some(sample) = gate.offer(sample) {
                        debug!(
                            "fota: progress {}% ({} bytes)",
                            sample.percent(),
                            sample.bytes_done
                        );
                        sink.on_event(StatusEvent::Progress(sample));
                    }
                }
                FetchResult::Finished => {
                    if image.total_size.is_some() {
                        warn!(
                            "fota: source finished early at {} bytes",
                            image.bytes_written
                        );
                        return Err(AbortReason::Truncated);
                    }
                    break;
                }
                FetchResult::Retryable(fault) => self.backoff(fault).await?,
                FetchResult::Fatal(fault) => return Err(AbortReason::FetchFatal(fault)),
            }
        }

        self.state = SessionState::Validating;
        while let Err(err) = writer.flush(device) {
            self.stalled(err).await?;
        }

        let last = ProgressSample {
            bytes_done: image.bytes_written,
            bytes_total: Some(image.total_size.unwrap_or(image.bytes_written)),
            at: Instant::now(),
        };
        if let Some(sample) = gate.finish(last) {
            sink.on_event(StatusEvent::Progress(sample));
        }

        if self.abort.is_aborted() {
            return Err(AbortReason::Cancelled);
        }
        if !validator.validate(&mut *device, image.target_base, image.bytes_written) {
            return Err(AbortReason::ValidationFailed);
        }

        Ok(image)
    }

    /// Checks the target span. Returns the writer and the end of the span.
    fn prepare(
        &self,
        device: &mut StorageDevice<D>,
        image: &FirmwareImage,
    ) -> Result<(ImageWriter, u32), AbortReason> {
        let unit = device.unit_size();
        if unit == 0 || unit > MAX_PROGRAM_UNIT || image.target_base as usize % unit != 0 {
            return Err(AbortReason::WriteFailed(StorageError::Misaligned));
        }

        // unit <= MAX_PROGRAM_UNIT
        #[allow(clippy::cast_possible_truncation)]
        let unit_len = unit as u32;
        let span_end = match image.total_size {
            Some(total) => align_up(total, unit_len)
                .and_then(|len| image.target_base.checked_add(len)),
            // at least the first unit has to be writable
            None => image.target_base.checked_add(unit_len),
        }
        .ok_or(AbortReason::WriteFailed(StorageError::OutOfRange))?;
        device
            .check_writable(image.target_base, span_end)
            .map_err(AbortReason::WriteFailed)?;

        // erasing the first block must not reach below the image
        let first = device
            .layout()
            .block_at(image.target_base)
            .map_err(|_| AbortReason::WriteFailed(StorageError::OutOfRange))?;
        if first.base_address != image.target_base {
            warn!(
                "fota: target {:#x} is inside block {}",
                image.target_base,
                first.index.0
            );
            return Err(AbortReason::WriteFailed(StorageError::Misaligned));
        }

        Ok((ImageWriter::new(image.target_base, unit), span_end))
    }

    async fn backoff(&mut self, fault: FetchFault) -> Result<(), AbortReason> {
        match self.retry.record_failure() {
            RetryDecision::Exhausted => {
                warn!(
                    "fota: fetch failed ({:?}), giving up after {} attempts",
                    fault,
                    self.retry.failures()
                );
                Err(AbortReason::FetchExhausted)
            }
            RetryDecision::RetryAfter(delay) => {
                warn!(
                    "fota: fetch failed ({:?}), retry {} in {} ms",
                    fault,
                    self.retry.failures(),
                    delay.as_millis()
                );
                self.sleep(delay).await
            }
        }
    }

    /// Handles a failed write. Only a busy device is retried, from the same
    /// retry budget as the fetches.
    async fn stalled(&mut self, err: StorageError) -> Result<(), AbortReason> {
        if err != StorageError::Busy {
            return Err(AbortReason::WriteFailed(err));
        }

        match self.retry.record_failure() {
            RetryDecision::Exhausted => {
                warn!(
                    "fota: flash still busy after {} attempts",
                    self.retry.failures()
                );
                Err(AbortReason::WriteFailed(StorageError::Busy))
            }
            RetryDecision::RetryAfter(delay) => {
                warn!(
                    "fota: flash busy, retry {} in {} ms",
                    self.retry.failures(),
                    delay.as_millis()
                );
                self.sleep(delay).await
            }
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<(), AbortReason> {
        match select(Timer::after(delay), self.abort.wait()).await {
            Either::First(()) => Ok(()),
            Either::Second(()) => Err(AbortReason::Cancelled),
        }
    }
}
