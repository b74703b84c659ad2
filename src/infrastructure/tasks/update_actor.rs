use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex};
use embassy_sync::channel::{Channel, Receiver, Sender};

use crate::app::usecases::FirmwareUsecases;
use crate::domain::dto::FirmwareOffer;
use crate::domain::entity::BootSlot;
use crate::domain::ports::{BootTrigger, ByteSource, FirmwareError, FlashDriver, StatusSink};
use crate::fmt::{info, warn};

pub const UPDATE_QUEUE_CAP: usize = 2;

pub struct UpdateRequest {
    pub offer: FirmwareOffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateOutcome {
    /// Boot slot switched. Only seen when the boot trigger returns.
    Installed(BootSlot),
    Failed(FirmwareError),
}

pub type UpdateRequestChannel =
    Channel<CriticalSectionRawMutex, UpdateRequest, UPDATE_QUEUE_CAP>;
pub type UpdateOutcomeChannel =
    Channel<CriticalSectionRawMutex, UpdateOutcome, UPDATE_QUEUE_CAP>;

/// Serves update requests one at a time.
///
/// The board wraps this in its executor task. `open_source` connects to the
/// image described by an offer; the actor installs it and answers every
/// request on `replies`.
pub async fn update_actor<'a, M, C, D, B, S, F, K, const CHUNK: usize, const N: usize, const R: usize>(
    usecases: &mut FirmwareUsecases<'a, M, D, B, CHUNK>,
    requests: Receiver<'_, C, UpdateRequest, N>,
    replies: Sender<'_, C, UpdateOutcome, R>,
    mut open_source: F,
    sink: &mut K,
) where
    M: RawMutex,
    C: RawMutex,
    D: FlashDriver,
    B: BootTrigger,
    S: ByteSource,
    F: FnMut(&FirmwareOffer) -> S,
    K: StatusSink,
{
    info!("update_actor: starting");

    loop {
        let UpdateRequest { offer } = requests.receive().await;
        info!(
            "update_actor: offer received ({} bytes, crc {:#x})",
            offer.size,
            offer.crc32
        );

        let source = open_source(&offer);
        let outcome = match usecases.install(&offer, source, sink).await {
            Ok(slot) => UpdateOutcome::Installed(slot),
            Err(err) => {
                warn!("update_actor: update failed ({:?})", err);
                UpdateOutcome::Failed(err)
            }
        };

        replies.send(outcome).await;
    }
}
