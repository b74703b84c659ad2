//! Firmware-over-the-air update pipeline.
//!
//! The crate pulls a firmware image from an unreliable byte source, commits it
//! into block-erasable flash one program unit at a time, validates the written
//! region and only then hands control to the boot trigger.
//!
//! Layers follow the rest of the MyrtIO firmware:
//! - [`domain`]: entities, DTOs and the ports implemented by the board
//! - [`core`]: pure building blocks (address map, retry budget, progress gate, sync)
//! - [`infrastructure`]: flash drivers, storage device, fetcher, validators, sinks, tasks
//! - [`controllers`]: the update session state machine
//! - [`app`]: use cases wiring slots, offers and commit together

#![cfg_attr(not(test), no_std)]

pub(crate) mod fmt;

pub mod app;
pub mod config;
pub mod controllers;
pub mod core;
pub mod domain;
pub mod infrastructure;

pub use app::usecases::FirmwareUsecases;
pub use config::UpdateConfig;
pub use controllers::{SessionError, SessionOutcome, UpdateController};
pub use domain::entity::{AbortReason, BootSlot, FirmwareImage, ProgressSample, SessionState};
pub use domain::ports::{
    BootTrigger, ByteSource, DriverFault, FetchFault, FlashDriver, FlashStatus, PullResult,
    RegionReader, StatusEvent, StatusSink, Validator,
};
pub use infrastructure::services::{ImageFetcher, StorageDevice, StorageError};
