use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One normalized subtitle event as shipped to the client.
///
/// Times are milliseconds. `head_pos` is the offset of the Cluster the
/// packet came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleEvent {
    pub track_number: u64,
    pub text: String,
    pub start_time: f64,
    pub duration: f64,
    #[serde(rename = "codecID")]
    pub codec_id: String,
    pub extra_data: BTreeMap<String, String>,
    pub head_pos: u64,
}

impl SubtitleEvent {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    pub fn is_image(&self) -> bool {
        self.extra_data.get("type").is_some_and(|t| t == "image")
    }

    /// Identity used to drop duplicates across overlapping streamers.
    ///
    /// The cluster position is excluded: the same cue decoded by two
    /// streamers is the same event.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.track_number.to_be_bytes());
        hasher.update(self.start_time.to_bits().to_be_bytes());
        hasher.update(self.duration.to_bits().to_be_bytes());
        hasher.update(self.codec_id.as_bytes());
        hasher.update([0]);
        hasher.update(self.text.as_bytes());
        for (key, value) in &self.extra_data {
            hasher.update([0]);
            hasher.update(key.as_bytes());
            hasher.update([1]);
            hasher.update(value.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}
