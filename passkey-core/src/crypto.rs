//! OpenSSL wrappers: hashing, randomness, HMAC, COSE public keys and
//! signature verification.

use ciborium::value::Value;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Public};
use openssl::rsa::Rsa;
use openssl::sign::{Signer, Verifier};
use openssl::x509::X509;
use thiserror::Error;

/// COSE algorithm: ECDSA over P-256 with SHA-256.
pub const COSE_ALG_ES256: i64 = -7;
/// COSE algorithm: RSASSA-PKCS1-v1_5 with SHA-256.
pub const COSE_ALG_RS256: i64 = -257;

/// Algorithms offered in creation options, in preference order.
pub const SUPPORTED_ALGORITHMS: [i64; 2] = [COSE_ALG_ES256, COSE_ALG_RS256];

const COSE_KTY: i64 = 1;
const COSE_ALG: i64 = 3;
const COSE_KTY_EC2: i64 = 2;
const COSE_KTY_RSA: i64 = 3;
const COSE_EC2_CRV: i64 = -1;
const COSE_EC2_X: i64 = -2;
const COSE_EC2_Y: i64 = -3;
const COSE_RSA_N: i64 = -1;
const COSE_RSA_E: i64 = -2;
const COSE_CRV_P256: i64 = 1;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid COSE key: {0}")]
    InvalidKey(&'static str),

    #[error("Unsupported COSE algorithm {0}")]
    UnsupportedAlgorithm(i64),

    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    openssl::sha::sha256(data)
}

/// Cryptographically secure random bytes.
pub fn random_bytes(len: usize) -> Result<Vec<u8>, ErrorStack> {
    let mut buf = vec![0u8; len];
    openssl::rand::rand_bytes(&mut buf)?;
    Ok(buf)
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ErrorStack> {
    let key = PKey::hmac(key)?;
    let mut signer = Signer::new(MessageDigest::sha256(), &key)?;
    signer.update(data)?;
    signer.sign_to_vec()
}

/// Constant-time equality for equal-length secrets.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && openssl::memcmp::eq(a, b)
}

/// Public key material carried by a COSE_Key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoseKeyMaterial {
    /// P-256 affine coordinates
    Ec2 { x: [u8; 32], y: [u8; 32] },
    Rsa { n: Vec<u8>, e: Vec<u8> },
}

/// A credential public key as found in attested credential data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseKey {
    pub alg: i64,
    pub material: CoseKeyMaterial,
}

impl CoseKey {
    /// Parse COSE_Key CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let value: Value =
            ciborium::from_reader(bytes).map_err(|_| CryptoError::InvalidKey("not CBOR"))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, CryptoError> {
        let map = value
            .as_map()
            .ok_or(CryptoError::InvalidKey("not a CBOR map"))?;

        let kty = map_int(map, COSE_KTY).ok_or(CryptoError::InvalidKey("missing kty"))?;
        let alg = map_int(map, COSE_ALG).ok_or(CryptoError::InvalidKey("missing alg"))?;

        let material = match (kty, alg) {
            (COSE_KTY_EC2, COSE_ALG_ES256) => {
                if map_int(map, COSE_EC2_CRV) != Some(COSE_CRV_P256) {
                    return Err(CryptoError::InvalidKey("curve is not P-256"));
                }
                let x = map_bytes(map, COSE_EC2_X).ok_or(CryptoError::InvalidKey("missing x"))?;
                let y = map_bytes(map, COSE_EC2_Y).ok_or(CryptoError::InvalidKey("missing y"))?;
                CoseKeyMaterial::Ec2 {
                    x: x.try_into()
                        .map_err(|_| CryptoError::InvalidKey("x must be 32 bytes"))?,
                    y: y.try_into()
                        .map_err(|_| CryptoError::InvalidKey("y must be 32 bytes"))?,
                }
            }
            (COSE_KTY_RSA, COSE_ALG_RS256) => {
                let n = map_bytes(map, COSE_RSA_N).ok_or(CryptoError::InvalidKey("missing n"))?;
                let e = map_bytes(map, COSE_RSA_E).ok_or(CryptoError::InvalidKey("missing e"))?;
                CoseKeyMaterial::Rsa {
                    n: n.to_vec(),
                    e: e.to_vec(),
                }
            }
            (COSE_KTY_EC2, other) | (COSE_KTY_RSA, other) => {
                return Err(CryptoError::UnsupportedAlgorithm(other))
            }
            _ => return Err(CryptoError::InvalidKey("unsupported key type")),
        };

        let key = CoseKey { alg, material };
        // rejects points that are not on the curve
        key.public_key()?;
        Ok(key)
    }

    /// Encode back to COSE_Key CBOR.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        let mut entries = vec![
            (int(COSE_KTY), int(self.kty())),
            (int(COSE_ALG), int(self.alg)),
        ];
        match &self.material {
            CoseKeyMaterial::Ec2 { x, y } => {
                entries.push((int(COSE_EC2_CRV), int(COSE_CRV_P256)));
                entries.push((int(COSE_EC2_X), Value::Bytes(x.to_vec())));
                entries.push((int(COSE_EC2_Y), Value::Bytes(y.to_vec())));
            }
            CoseKeyMaterial::Rsa { n, e } => {
                entries.push((int(COSE_RSA_N), Value::Bytes(n.clone())));
                entries.push((int(COSE_RSA_E), Value::Bytes(e.clone())));
            }
        }
        let mut buf = Vec::new();
        ciborium::into_writer(&Value::Map(entries), &mut buf)
            .map_err(|_| CryptoError::InvalidKey("CBOR encoding failed"))?;
        Ok(buf)
    }

    fn kty(&self) -> i64 {
        match self.material {
            CoseKeyMaterial::Ec2 { .. } => COSE_KTY_EC2,
            CoseKeyMaterial::Rsa { .. } => COSE_KTY_RSA,
        }
    }

    pub fn public_key(&self) -> Result<PKey<Public>, CryptoError> {
        match &self.material {
            CoseKeyMaterial::Ec2 { x, y } => {
                let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
                let x = BigNum::from_slice(x)?;
                let y = BigNum::from_slice(y)?;
                let ec_key = EcKey::from_public_key_affine_coordinates(&group, &x, &y)?;
                ec_key.check_key()?;
                Ok(PKey::from_ec_key(ec_key)?)
            }
            CoseKeyMaterial::Rsa { n, e } => {
                let rsa = Rsa::from_public_components(BigNum::from_slice(n)?, BigNum::from_slice(e)?)?;
                Ok(PKey::from_rsa(rsa)?)
            }
        }
    }

    /// Uncompressed SEC1 point `0x04 || x || y`, as signed over by FIDO U2F.
    pub fn x962_raw(&self) -> Result<Vec<u8>, CryptoError> {
        match &self.material {
            CoseKeyMaterial::Ec2 { x, y } => {
                let mut raw = Vec::with_capacity(65);
                raw.push(0x04);
                raw.extend_from_slice(x);
                raw.extend_from_slice(y);
                Ok(raw)
            }
            CoseKeyMaterial::Rsa { .. } => Err(CryptoError::InvalidKey("not an EC2 key")),
        }
    }

    /// Verify `signature` over `data`. A malformed signature is `Ok(false)`.
    pub fn verify(&self, signature: &[u8], data: &[u8]) -> Result<bool, CryptoError> {
        let pkey = self.public_key()?;
        Ok(verify_with(&pkey, signature, data))
    }
}

/// Build a COSE key from an uncompressed or compressed P-256 point.
#[cfg(any(test, feature = "test-utils"))]
pub fn ec2_from_point(point: &[u8]) -> Result<CoseKey, CryptoError> {
    use openssl::bn::BigNumContext;
    use openssl::ec::{EcPoint, PointConversionForm};

    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let mut ctx = BigNumContext::new()?;
    let point = EcPoint::from_bytes(&group, point, &mut ctx)?;
    let raw = point.to_bytes(&group, PointConversionForm::UNCOMPRESSED, &mut ctx)?;
    if raw.len() != 65 {
        return Err(CryptoError::InvalidKey("unexpected point length"));
    }
    let mut x = [0u8; 32];
    let mut y = [0u8; 32];
    x.copy_from_slice(&raw[1..33]);
    y.copy_from_slice(&raw[33..65]);
    Ok(CoseKey {
        alg: COSE_ALG_ES256,
        material: CoseKeyMaterial::Ec2 { x, y },
    })
}

/// Verify a SHA-256 signature made by the subject key of a DER certificate.
pub fn verify_x509(cert_der: &[u8], signature: &[u8], data: &[u8]) -> Result<bool, CryptoError> {
    let cert = X509::from_der(cert_der)?;
    let pkey = cert.public_key()?;
    Ok(verify_with(&pkey, signature, data))
}

/// Whether the certificate's subject key suits the COSE algorithm `alg`.
pub fn x509_matches_alg(cert_der: &[u8], alg: i64) -> Result<bool, CryptoError> {
    let cert = X509::from_der(cert_der)?;
    let pkey = cert.public_key()?;
    match alg {
        COSE_ALG_ES256 => Ok(pkey
            .ec_key()
            .map(|ec| ec.group().curve_name() == Some(Nid::X9_62_PRIME256V1))
            .unwrap_or(false)),
        COSE_ALG_RS256 => Ok(pkey.rsa().is_ok()),
        other => Err(CryptoError::UnsupportedAlgorithm(other)),
    }
}

fn verify_with(pkey: &PKey<Public>, signature: &[u8], data: &[u8]) -> bool {
    let Ok(mut verifier) = Verifier::new(MessageDigest::sha256(), pkey) else {
        return false;
    };
    if verifier.update(data).is_err() {
        return false;
    }
    // openssl reports undecodable DER signatures as errors
    verifier.verify(signature).unwrap_or(false)
}

#[cfg(any(test, feature = "test-utils"))]
fn int(v: i64) -> Value {
    Value::Integer(v.into())
}

fn map_get(map: &[(Value, Value)], key: i64) -> Option<&Value> {
    map.iter().find_map(|(k, v)| match k {
        Value::Integer(i) if i128::from(*i) == i128::from(key) => Some(v),
        _ => None,
    })
}

fn map_int(map: &[(Value, Value)], key: i64) -> Option<i64> {
    map_get(map, key)?
        .as_integer()
        .and_then(|i| i64::try_from(i).ok())
}

fn map_bytes(map: &[(Value, Value)], key: i64) -> Option<&[u8]> {
    map_get(map, key)?.as_bytes().map(Vec::as_slice)
}
