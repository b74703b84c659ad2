use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::{
    config::DEFAULT_CHUNK_SIZE,
    controllers::{SessionOutcome, UpdateController},
    domain::{
        dto::FirmwareOffer,
        entity::{BootSlot, FirmwareImage, SlotLayout},
        ports::{BootTrigger, ByteSource, FirmwareError, FlashDriver, StatusSink, Validator},
    },
    fmt::{info, warn},
    infrastructure::services::{Crc32Validator, ImageFetcher},
};

/// A/B firmware installation.
///
/// New images always go to the slot that is not running. Only a completed
/// session switches the boot slot; an aborted one leaves the running image
/// untouched.
pub struct FirmwareUsecases<
    'a,
    M: RawMutex,
    D: FlashDriver,
    B: BootTrigger,
    const CHUNK: usize = DEFAULT_CHUNK_SIZE,
> {
    controller: UpdateController<'a, M, D, CHUNK>,
    slots: SlotLayout,
    boot: B,
}

impl<'a, M: RawMutex, D: FlashDriver, B: BootTrigger, const CHUNK: usize>
    FirmwareUsecases<'a, M, D, B, CHUNK>
{
    pub fn new(controller: UpdateController<'a, M, D, CHUNK>, slots: SlotLayout, boot: B) -> Self {
        Self {
            controller,
            slots,
            boot,
        }
    }

    pub fn controller(&self) -> &UpdateController<'a, M, D, CHUNK> {
        &self.controller
    }

    pub fn boot(&mut self) -> &mut B {
        &mut self.boot
    }

    /// Slot the next image is written to.
    pub fn target_slot(&mut self) -> BootSlot {
        self.boot.active_slot().next()
    }

    #[allow(clippy::unused_self)]
    pub fn parse_offer(&self, payload: &[u8]) -> Result<FirmwareOffer, FirmwareError> {
        FirmwareOffer::from_json(payload).ok_or(FirmwareError::InvalidOffer)
    }

    /// Installs the offered image, checked against its CRC-32, and resets
    /// into it.
    pub async fn install<S: ByteSource, K: StatusSink>(
        &mut self,
        offer: &FirmwareOffer,
        source: S,
        sink: &mut K,
    ) -> Result<BootSlot, FirmwareError> {
        let mut validator = Crc32Validator::new(offer.crc32);
        self.install_with(offer.size, source, &mut validator, sink)
            .await
    }

    /// Installs a `size` byte image accepted by `validator`.
    pub async fn install_with<S: ByteSource, V: Validator, K: StatusSink>(
        &mut self,
        size: u32,
        source: S,
        validator: &mut V,
        sink: &mut K,
    ) -> Result<BootSlot, FirmwareError> {
        let slot = self.target_slot();
        let region = self.slots.region(slot);
        info!(
            "fota: installing {} bytes into slot {:?} at {:#x}",
            size,
            slot,
            region.base
        );
        if size > region.len {
            warn!(
                "fota: image of {} bytes does not fit slot of {} bytes",
                size,
                region.len
            );
            return Err(FirmwareError::ImageTooLarge);
        }

        let mut fetcher = ImageFetcher::new(source);
        let image = FirmwareImage::new(Some(size), region.base).with_slot(slot);
        let outcome = self
            .controller
            .run(image, &mut fetcher, validator, sink)
            .await
            .map_err(|_| FirmwareError::Busy)?;

        match outcome {
            SessionOutcome::Completed(_) => {
                info!("fota: switching boot slot to {:?}", slot);
                self.boot.commit_and_reset(slot).await?;
                Ok(slot)
            }
            SessionOutcome::Aborted(reason) => Err(FirmwareError::Aborted(reason)),
        }
    }
}
