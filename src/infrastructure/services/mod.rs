mod fetcher;
mod report;
mod storage;
mod stream;
mod validator;

pub use fetcher::{FetchResult, ImageFetcher};
pub use report::{
    ChannelStatusSink, REPORT_LEN, ReportPublisher, ReportingSink, STEP_BURN_FAILED,
    STEP_CHECK_FAILED, STEP_FETCH_FAILED, STEP_GENERAL_FAILED, encode_report, report_step,
};
pub use storage::{MAX_PROTECTED_BLOCKS, ProtectionMap, StorageDevice, WriteGuard};
pub use stream::{StreamMsg, StreamSource};
pub use validator::Crc32Validator;

pub use crate::domain::ports::StorageError;
