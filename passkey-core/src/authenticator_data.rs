//! Authenticator data parsing
//!
//! Layout:
//! ```text
//! rpIdHash (32) | flags (1) | signCount (4, BE) | [attestedCredentialData] | [extensions]
//! attestedCredentialData = aaguid (16) | credIdLen (2, BE) | credId | COSE_Key
//! ```

use std::io::Cursor;

use ciborium::value::Value;
use thiserror::Error;

use crate::crypto::CoseKey;

pub const FLAG_USER_PRESENT: u8 = 0x01;
pub const FLAG_USER_VERIFIED: u8 = 0x04;
pub const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
pub const FLAG_EXTENSION_DATA: u8 = 0x80;

const RP_ID_HASH_LEN: usize = 32;
const HEADER_LEN: usize = RP_ID_HASH_LEN + 1 + 4;
const AAGUID_LEN: usize = 16;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{0}")]
pub struct MalformedData(pub &'static str);

/// Credential data present when the AT flag is set (registration).
#[derive(Debug, Clone)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    /// The COSE_Key exactly as encoded by the authenticator
    pub public_key_bytes: Vec<u8>,
    pub public_key: CoseKey,
}

#[derive(Debug, Clone)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub attested: Option<AttestedCredentialData>,
}

impl AuthenticatorData {
    pub fn parse(data: &[u8]) -> Result<Self, MalformedData> {
        if data.len() < HEADER_LEN {
            return Err(MalformedData("authenticator data too short"));
        }

        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&data[..RP_ID_HASH_LEN]);
        let flags = data[RP_ID_HASH_LEN];
        let sign_count = u32::from_be_bytes([data[33], data[34], data[35], data[36]]);

        let mut rest = &data[HEADER_LEN..];
        let attested = if flags & FLAG_ATTESTED_CREDENTIAL_DATA != 0 {
            let (attested, remaining) = parse_attested(rest)?;
            rest = remaining;
            Some(attested)
        } else {
            None
        };

        if flags & FLAG_EXTENSION_DATA != 0 {
            let _: Value = ciborium::from_reader(rest)
                .map_err(|_| MalformedData("invalid extension data"))?;
        } else if !rest.is_empty() {
            return Err(MalformedData("trailing bytes after authenticator data"));
        }

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested,
        })
    }

    pub fn user_present(&self) -> bool {
        self.flags & FLAG_USER_PRESENT != 0
    }

    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_USER_VERIFIED != 0
    }
}

fn parse_attested(data: &[u8]) -> Result<(AttestedCredentialData, &[u8]), MalformedData> {
    if data.len() < AAGUID_LEN + 2 {
        return Err(MalformedData("attested credential data too short"));
    }
    let mut aaguid = [0u8; 16];
    aaguid.copy_from_slice(&data[..AAGUID_LEN]);

    let id_len = u16::from_be_bytes([data[16], data[17]]) as usize;
    let id_start = AAGUID_LEN + 2;
    let key_start = id_start + id_len;
    if id_len == 0 || data.len() < key_start {
        return Err(MalformedData("credential id length out of range"));
    }
    let credential_id = data[id_start..key_start].to_vec();

    let mut cursor = Cursor::new(&data[key_start..]);
    let value: Value = ciborium::from_reader(&mut cursor)
        .map_err(|_| MalformedData("credential public key is not CBOR"))?;
    let key_len = cursor.position() as usize;
    let public_key_bytes = data[key_start..key_start + key_len].to_vec();
    let public_key =
        CoseKey::from_value(&value).map_err(|_| MalformedData("unsupported credential public key"))?;

    Ok((
        AttestedCredentialData {
            aaguid,
            credential_id,
            public_key_bytes,
            public_key,
        },
        &data[key_start + key_len..],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SoftAuthenticator;

    #[test]
    fn test_parse_assertion_data() {
        let mut data = vec![0xab; 32];
        data.push(FLAG_USER_PRESENT | FLAG_USER_VERIFIED);
        data.extend_from_slice(&42u32.to_be_bytes());

        let parsed = AuthenticatorData::parse(&data).unwrap();
        assert_eq!(parsed.rp_id_hash, [0xab; 32]);
        assert_eq!(parsed.sign_count, 42);
        assert!(parsed.user_present());
        assert!(parsed.user_verified());
        assert!(parsed.attested.is_none());
    }

    #[test]
    fn test_parse_attested_credential() {
        let authenticator = SoftAuthenticator::new();
        let data = authenticator.make_auth_data("localhost", true);

        let parsed = AuthenticatorData::parse(&data).unwrap();
        let attested = parsed.attested.expect("AT flag set");
        assert_eq!(attested.credential_id, authenticator.credential_id());
        assert_eq!(attested.public_key, authenticator.cose_key());
        assert_eq!(
            CoseKey::from_bytes(&attested.public_key_bytes).unwrap(),
            attested.public_key
        );
    }

    #[test]
    fn test_rejects_truncated() {
        assert!(AuthenticatorData::parse(&[0u8; 36]).is_err());

        let authenticator = SoftAuthenticator::new();
        let data = authenticator.make_auth_data("localhost", true);
        assert!(AuthenticatorData::parse(&data[..data.len() - 3]).is_err());
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut data = vec![0u8; 37];
        data.push(0xff);
        assert_eq!(
            AuthenticatorData::parse(&data).unwrap_err(),
            MalformedData("trailing bytes after authenticator data")
        );
    }
}
