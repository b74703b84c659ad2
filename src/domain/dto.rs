use heapless::String;
use serde::{Deserialize, Serialize};

/// New firmware announcement, e.g.
/// `{"version":"1.4.0","module":"light","size":524288,"crc32":305419896}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareOffer {
    pub version: String<32>,
    pub module: String<32>,
    /// Image size in bytes
    pub size: u32,
    /// CRC-32 (ISO-HDLC) of the whole image
    pub crc32: u32,
}

impl FirmwareOffer {
    /// Parses an offer from its JSON form.
    pub fn from_json(payload: &[u8]) -> Option<Self> {
        serde_json_core::from_slice::<Self>(payload)
            .ok()
            .map(|(offer, _)| offer)
    }
}

/// Progress report payload published by [`crate::infrastructure::services::ReportingSink`].
///
/// `step` is the completion percentage, or a negative failure code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressReport<'a> {
    pub step: i8,
    pub desc: &'a str,
}
