//! `CollectedClientData` as serialised by the browser.

use serde::{Deserialize, Serialize};

use crate::base64url;
use crate::error::Reason;

pub const TYPE_CREATE: &str = "webauthn.create";
pub const TYPE_GET: &str = "webauthn.get";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedClientData {
    #[serde(rename = "type")]
    pub type_: String,
    /// base64url challenge, exactly as the browser echoed it
    pub challenge: String,
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_origin: Option<bool>,
}

impl CollectedClientData {
    /// Parse the raw client-data JSON bytes.
    ///
    /// `malformed` is the reason reported when the bytes are not valid client
    /// data, which depends on the ceremony being finished.
    pub fn parse(bytes: &[u8], malformed: Reason) -> Result<Self, Reason> {
        serde_json::from_slice(bytes).map_err(|_| malformed)
    }

    /// Decoded challenge bytes; `None` when not valid base64url.
    pub fn challenge_bytes(&self) -> Option<Vec<u8>> {
        base64url::decode(&self.challenge).ok()
    }
}
