mod common;

use common::*;
use crc::{CRC_32_ISO_HDLC, Crc};
use embassy_futures::block_on;
use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec as HVec;
use myrtio_fota::core::region::BlockIndex;
use myrtio_fota::domain::dto::FirmwareOffer;
use myrtio_fota::domain::entity::{SlotLayout, SlotRegion};
use myrtio_fota::domain::ports::FirmwareError;
use myrtio_fota::infrastructure::services::{ReportPublisher, ReportingSink, StreamMsg, StreamSource};
use myrtio_fota::infrastructure::tasks::{UpdateOutcome, UpdateRequest, update_actor};
use myrtio_fota::{AbortReason, BootSlot, FirmwareUsecases};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

type Usecases<'a> = FirmwareUsecases<'a, NoopRawMutex, Flash, MockBoot, 128>;

fn slots() -> SlotLayout {
    SlotLayout::new(
        SlotRegion { base: 0, len: 512 },
        SlotRegion { base: 512, len: 512 },
    )
}

fn usecases<'a>(storage: &'a Storage, abort: &'a Abort, active: BootSlot) -> Usecases<'a> {
    FirmwareUsecases::new(
        Controller::<128>::new(storage, abort, fast_config()),
        slots(),
        MockBoot::new(active),
    )
}

fn offer_json(size: u32, crc32: u32) -> String {
    format!(r#"{{"version":"1.2.0","module":"light","size":{size},"crc32":{crc32}}}"#)
}

fn offer_for(usecases: &Usecases<'_>, img: &[u8]) -> FirmwareOffer {
    let json = offer_json(img.len() as u32, CRC32.checksum(img));
    usecases.parse_offer(json.as_bytes()).unwrap()
}

#[test]
fn installs_into_inactive_slot_and_commits() {
    let storage = storage();
    let abort = Abort::new();
    let mut usecases = usecases(&storage, &abort, BootSlot::A);
    let img = image(400);
    let offer = offer_for(&usecases, &img);
    let mut sink = RecordingSink::default();

    let result = block_on(usecases.install(
        &offer,
        ScriptedSource::new(img.clone()).with_chunk(100),
        &mut sink,
    ));

    assert_eq!(result, Ok(BootSlot::B));
    assert_eq!(usecases.boot().commits, [BootSlot::B]);
    with_flash(&storage, |flash| {
        assert_eq!(flash.bytes_at(512, 400), img.as_slice());
        assert_eq!(flash.log().erased(), [BlockIndex(2), BlockIndex(3)]);
        assert_eq!(flash.bytes_at(0, 512), [0xFF; 512]);
    });
}

#[test]
fn slot_b_running_targets_slot_a() {
    let storage = storage();
    let abort = Abort::new();
    let mut usecases = usecases(&storage, &abort, BootSlot::B);
    let img = image(256);
    let offer = offer_for(&usecases, &img);

    assert_eq!(usecases.target_slot(), BootSlot::A);
    let result = block_on(usecases.install(&offer, ScriptedSource::new(img), &mut ()));

    assert_eq!(result, Ok(BootSlot::A));
    with_flash(&storage, |flash| {
        assert_eq!(flash.log().erased(), [BlockIndex(0)]);
    });
}

#[test]
fn checksum_mismatch_keeps_current_slot() {
    let storage = storage();
    let abort = Abort::new();
    let mut usecases = usecases(&storage, &abort, BootSlot::A);
    let img = image(300);
    let json = offer_json(300, CRC32.checksum(&img) ^ 1);
    let offer = usecases.parse_offer(json.as_bytes()).unwrap();

    let result = block_on(usecases.install(&offer, ScriptedSource::new(img), &mut ()));

    assert_eq!(
        result,
        Err(FirmwareError::Aborted(AbortReason::ValidationFailed))
    );
    assert!(usecases.boot().commits.is_empty());
}

#[test]
fn oversized_offer_is_refused_before_erasing() {
    let storage = storage();
    let abort = Abort::new();
    let mut usecases = usecases(&storage, &abort, BootSlot::A);
    let img = image(600);
    let offer = offer_for(&usecases, &img);
    let mut sink = RecordingSink::default();

    let result = block_on(usecases.install(&offer, ScriptedSource::new(img), &mut sink));

    assert_eq!(result, Err(FirmwareError::ImageTooLarge));
    assert!(sink.events.is_empty());
    with_flash(&storage, |flash| assert_eq!(flash.log().erase_count, 0));
}

#[test]
fn malformed_offer_is_rejected() {
    let storage = storage();
    let abort = Abort::new();
    let usecases = usecases(&storage, &abort, BootSlot::A);

    assert_eq!(
        usecases.parse_offer(br#"{"version":"1.2.0","size":"big"}"#),
        Err(FirmwareError::InvalidOffer)
    );
}

#[test]
fn busy_storage_reports_busy() {
    let storage = storage();
    let abort = Abort::new();
    let mut usecases = usecases(&storage, &abort, BootSlot::A);
    let img = image(64);
    let offer = offer_for(&usecases, &img);

    let held = storage.try_lock().ok().unwrap();
    let result = block_on(usecases.install(&offer, ScriptedSource::new(img), &mut ()));
    drop(held);

    assert_eq!(result, Err(FirmwareError::Busy));
}

#[test]
fn failed_activation_is_reported() {
    let storage = storage();
    let abort = Abort::new();
    let mut usecases = usecases(&storage, &abort, BootSlot::A);
    usecases.boot().fail = true;
    let img = image(64);
    let offer = offer_for(&usecases, &img);

    let result = block_on(usecases.install(&offer, ScriptedSource::new(img), &mut ()));

    assert_eq!(result, Err(FirmwareError::Activate));
}

#[derive(Default)]
struct Published(Vec<String>);

impl ReportPublisher for Published {
    fn publish(&mut self, payload: &str) {
        self.0.push(payload.to_string());
    }
}

#[test]
fn progress_reports_are_published_as_json() {
    let storage = storage();
    let abort = Abort::new();
    let mut usecases = usecases(&storage, &abort, BootSlot::A);
    let img = image(512);
    let offer = offer_for(&usecases, &img);
    let mut sink = ReportingSink::new(Published::default());

    let result = block_on(usecases.install(&offer, ScriptedSource::new(img), &mut sink));
    assert_eq!(result, Ok(BootSlot::B));

    let reports = sink.into_inner().0;
    assert_eq!(reports.first().map(String::as_str), Some(r#"{"step":0,"desc":"started"}"#));
    assert!(reports.contains(&r#"{"step":50,"desc":"downloading"}"#.to_string()));
    assert_eq!(reports.last().map(String::as_str), Some(r#"{"step":100,"desc":"completed"}"#));
}

#[test]
fn pushed_stream_is_installed() {
    let storage = storage();
    let abort = Abort::new();
    let mut usecases = usecases(&storage, &abort, BootSlot::A);
    let img = image(300);
    let offer = offer_for(&usecases, &img);
    let stream = Channel::<NoopRawMutex, StreamMsg<64>, 2>::new();
    let mut sink = RecordingSink::default();

    let install = usecases.install(&offer, StreamSource::new(stream.receiver()), &mut sink);
    let producer = async {
        for part in img.chunks(64) {
            stream
                .send(StreamMsg::Data(HVec::from_slice(part).unwrap()))
                .await;
        }
        stream.send(StreamMsg::Finish).await;
        core::future::pending::<()>().await;
    };

    match block_on(select(install, producer)) {
        Either::First(result) => assert_eq!(result, Ok(BootSlot::B)),
        Either::Second(()) => unreachable!(),
    }
    with_flash(&storage, |flash| {
        assert_eq!(flash.bytes_at(512, 300), img.as_slice());
    });
}

#[test]
fn actor_serves_queued_requests() {
    let storage = storage();
    let abort = Abort::new();
    let mut usecases = usecases(&storage, &abort, BootSlot::A);
    let good_offer = offer_for(&usecases, &image(200));
    let bad_offer = usecases
        .parse_offer(offer_json(200, 0).as_bytes())
        .unwrap();
    let requests = Channel::<NoopRawMutex, UpdateRequest, 2>::new();
    let replies = Channel::<NoopRawMutex, UpdateOutcome, 2>::new();
    let mut sink = RecordingSink::default();

    let actor = update_actor(
        &mut usecases,
        requests.receiver(),
        replies.sender(),
        |_offer: &FirmwareOffer| ScriptedSource::new(image(200)),
        &mut sink,
    );
    let client = async {
        requests.send(UpdateRequest { offer: bad_offer }).await;
        let first = replies.receive().await;
        requests.send(UpdateRequest { offer: good_offer }).await;
        let second = replies.receive().await;
        (first, second)
    };

    match block_on(select(actor, client)) {
        Either::First(()) => unreachable!(),
        Either::Second((first, second)) => {
            assert_eq!(
                first,
                UpdateOutcome::Failed(FirmwareError::Aborted(AbortReason::ValidationFailed))
            );
            assert_eq!(second, UpdateOutcome::Installed(BootSlot::B));
        }
    }
    assert_eq!(usecases.boot().commits, [BootSlot::B]);
}
