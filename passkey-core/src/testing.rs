//! Software authenticator producing genuine WebAuthn responses
//!
//! Holds one P-256 credential. Used by this crate's tests and, through the
//! `test-utils` feature, by the server's integration tests. All methods panic
//! on OpenSSL failures.

use ciborium::value::Value;
use openssl::asn1::{Asn1Object, Asn1OctetString, Asn1Time};
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey, PointConversionForm};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use openssl::x509::extension::BasicConstraints;
use openssl::x509::{X509Builder, X509Extension, X509NameBuilder, X509};

use crate::authenticator_data::{FLAG_ATTESTED_CREDENTIAL_DATA, FLAG_USER_PRESENT, FLAG_USER_VERIFIED};
use crate::base64url::{self, Base64UrlBytes};
use crate::client_data::{TYPE_CREATE, TYPE_GET};
use crate::crypto::{self, CoseKey};
use crate::protocol::{
    AuthenticationResponseJson, AuthenticatorAssertionResponseJson,
    AuthenticatorAttestationResponseJson, CredentialCreationOptions, CredentialRequestOptions,
    RegistrationResponseJson, PUBLIC_KEY_TYPE,
};

pub const TEST_AAGUID: [u8; 16] = *b"passkey-core-sw!";

/// Shape of a minted attestation certificate and the statement `alg`.
#[derive(Debug, Clone)]
pub struct CertificateProfile {
    pub ou: &'static str,
    pub ca: bool,
    /// Value of the id-fido-gen-ce-aaguid extension, if present
    pub aaguid: Option<[u8; 16]>,
    pub alg: i64,
}

impl Default for CertificateProfile {
    fn default() -> Self {
        Self {
            ou: "Authenticator Attestation",
            ca: false,
            aaguid: Some(TEST_AAGUID),
            alg: crypto::COSE_ALG_ES256,
        }
    }
}

pub struct SoftAuthenticator {
    key: PKey<Private>,
    cose: CoseKey,
    credential_id: Vec<u8>,
    user_handle: Option<Vec<u8>>,
    sign_count: u32,
    counter_step: u32,
    flags: u8,
}

impl Default for SoftAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftAuthenticator {
    pub fn new() -> Self {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).expect("P-256 group");
        let ec = EcKey::generate(&group).expect("P-256 key");
        let mut ctx = BigNumContext::new().expect("bn context");
        let point = ec
            .public_key()
            .to_bytes(&group, PointConversionForm::UNCOMPRESSED, &mut ctx)
            .expect("public point");
        let cose = crypto::ec2_from_point(&point).expect("COSE key");
        Self {
            key: PKey::from_ec_key(ec).expect("pkey"),
            cose,
            credential_id: crypto::random_bytes(16).expect("credential id"),
            user_handle: None,
            sign_count: 0,
            counter_step: 1,
            flags: FLAG_USER_PRESENT | FLAG_USER_VERIFIED,
        }
    }

    /// An authenticator that always reports a zero signature counter.
    pub fn without_counter() -> Self {
        Self {
            counter_step: 0,
            ..Self::new()
        }
    }

    /// Reuse another authenticator's credential id (collision tests).
    pub fn with_credential_id(mut self, id: Vec<u8>) -> Self {
        self.credential_id = id;
        self
    }

    pub fn credential_id(&self) -> Vec<u8> {
        self.credential_id.clone()
    }

    pub fn credential_id_b64(&self) -> String {
        base64url::encode(&self.credential_id)
    }

    pub fn cose_key(&self) -> CoseKey {
        self.cose.clone()
    }

    pub fn user_handle(&self) -> Option<Vec<u8>> {
        self.user_handle.clone()
    }

    pub fn sign_count(&self) -> u32 {
        self.sign_count
    }

    pub fn set_sign_count(&mut self, count: u32) {
        self.sign_count = count;
    }

    /// Override the UP/UV flag bits reported in authenticator data.
    pub fn set_flags(&mut self, flags: u8) {
        self.flags = flags;
    }

    pub fn client_data(type_: &str, challenge: &[u8], origin: &str) -> Vec<u8> {
        serde_json::json!({
            "type": type_,
            "challenge": base64url::encode(challenge),
            "origin": origin,
            "crossOrigin": false,
        })
        .to_string()
        .into_bytes()
    }

    pub fn make_auth_data(&self, rp_id: &str, attested: bool) -> Vec<u8> {
        let mut data = crypto::sha256(rp_id.as_bytes()).to_vec();
        let flags = if attested {
            self.flags | FLAG_ATTESTED_CREDENTIAL_DATA
        } else {
            self.flags
        };
        data.push(flags);
        data.extend_from_slice(&self.sign_count.to_be_bytes());
        if attested {
            data.extend_from_slice(&TEST_AAGUID);
            data.extend_from_slice(&(self.credential_id.len() as u16).to_be_bytes());
            data.extend_from_slice(&self.credential_id);
            data.extend_from_slice(&self.cose.to_bytes().expect("COSE encoding"));
        }
        data
    }

    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        sign_with(&self.key, data)
    }

    pub fn attestation_object_none(&self, rp_id: &str) -> Vec<u8> {
        self.attestation_object_with_format(rp_id, "none")
    }

    /// Any format with an empty statement.
    pub fn attestation_object_with_format(&self, rp_id: &str, fmt: &str) -> Vec<u8> {
        encode_attestation(fmt, Vec::new(), self.make_auth_data(rp_id, true))
    }

    /// Packed self-attestation signed with the credential key.
    pub fn attestation_object_packed(&self, rp_id: &str, client_data_hash: &[u8; 32]) -> Vec<u8> {
        let auth_data = self.make_auth_data(rp_id, true);
        let mut signed = auth_data.clone();
        signed.extend_from_slice(client_data_hash);
        let stmt = vec![
            (text("alg"), Value::Integer(crypto::COSE_ALG_ES256.into())),
            (text("sig"), Value::Bytes(self.sign(&signed))),
        ];
        encode_attestation("packed", stmt, auth_data)
    }

    /// Packed basic attestation signed by a freshly minted certificate.
    pub fn attestation_object_packed_x5c(
        &self,
        rp_id: &str,
        client_data_hash: &[u8; 32],
        profile: &CertificateProfile,
    ) -> Vec<u8> {
        let (attestation_key, cert) = attestation_certificate(profile);
        let auth_data = self.make_auth_data(rp_id, true);
        let mut signed = auth_data.clone();
        signed.extend_from_slice(client_data_hash);
        let stmt = vec![
            (text("alg"), Value::Integer(profile.alg.into())),
            (text("sig"), Value::Bytes(sign_with(&attestation_key, &signed))),
            (
                text("x5c"),
                Value::Array(vec![Value::Bytes(cert.to_der().expect("DER"))]),
            ),
        ];
        encode_attestation("packed", stmt, auth_data)
    }

    /// FIDO U2F attestation signed by a freshly minted self-signed certificate.
    pub fn attestation_object_fido_u2f(&self, rp_id: &str, client_data_hash: &[u8; 32]) -> Vec<u8> {
        let (attestation_key, cert) = attestation_certificate(&CertificateProfile::default());
        let mut signed = vec![0x00];
        signed.extend_from_slice(&crypto::sha256(rp_id.as_bytes()));
        signed.extend_from_slice(client_data_hash);
        signed.extend_from_slice(&self.credential_id);
        signed.extend_from_slice(&self.cose.x962_raw().expect("EC2 key"));
        let stmt = vec![
            (text("sig"), Value::Bytes(sign_with(&attestation_key, &signed))),
            (
                text("x5c"),
                Value::Array(vec![Value::Bytes(cert.to_der().expect("DER"))]),
            ),
        ];
        encode_attestation("fido-u2f", stmt, self.make_auth_data(rp_id, true))
    }

    /// Respond to creation options with a `none` attestation, remembering the user handle.
    pub fn register(
        &mut self,
        options: &CredentialCreationOptions,
        origin: &str,
    ) -> RegistrationResponseJson {
        self.user_handle = Some(options.user.id.as_slice().to_vec());
        let client_data = Self::client_data(TYPE_CREATE, options.challenge.as_slice(), origin);
        let attestation = self.attestation_object_none(&options.rp.id);
        self.registration_response(client_data, attestation)
    }

    pub fn registration_response(
        &self,
        client_data_json: Vec<u8>,
        attestation_object: Vec<u8>,
    ) -> RegistrationResponseJson {
        RegistrationResponseJson {
            id: self.credential_id_b64(),
            raw_id: Base64UrlBytes(self.credential_id.clone()),
            type_: PUBLIC_KEY_TYPE.to_string(),
            response: AuthenticatorAttestationResponseJson {
                client_data_json: Base64UrlBytes(client_data_json),
                attestation_object: Base64UrlBytes(attestation_object),
                transports: vec!["internal".to_string()],
            },
            authenticator_attachment: Some("platform".to_string()),
        }
    }

    /// Sign an assertion for request options, advancing the counter.
    pub fn assert(
        &mut self,
        options: &CredentialRequestOptions,
        origin: &str,
    ) -> AuthenticationResponseJson {
        self.sign_count = self.sign_count.wrapping_add(self.counter_step);
        let client_data = Self::client_data(TYPE_GET, options.challenge.as_slice(), origin);
        let auth_data = self.make_auth_data(&options.rp_id, false);
        self.assertion_response(client_data, auth_data)
    }

    /// Build an assertion over arbitrary client data and authenticator data.
    pub fn assertion_response(
        &self,
        client_data_json: Vec<u8>,
        authenticator_data: Vec<u8>,
    ) -> AuthenticationResponseJson {
        let mut signed = authenticator_data.clone();
        signed.extend_from_slice(&crypto::sha256(&client_data_json));
        AuthenticationResponseJson {
            id: self.credential_id_b64(),
            raw_id: Base64UrlBytes(self.credential_id.clone()),
            type_: PUBLIC_KEY_TYPE.to_string(),
            response: AuthenticatorAssertionResponseJson {
                client_data_json: Base64UrlBytes(client_data_json),
                authenticator_data: Base64UrlBytes(authenticator_data),
                signature: Base64UrlBytes(self.sign(&signed)),
                user_handle: self.user_handle.clone().map(Base64UrlBytes),
            },
            authenticator_attachment: Some("platform".to_string()),
        }
    }
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn sign_with(key: &PKey<Private>, data: &[u8]) -> Vec<u8> {
    let mut signer = Signer::new(MessageDigest::sha256(), key).expect("signer");
    signer.update(data).expect("signer update");
    signer.sign_to_vec().expect("signature")
}

fn encode_attestation(fmt: &str, stmt: Vec<(Value, Value)>, auth_data: Vec<u8>) -> Vec<u8> {
    let object = Value::Map(vec![
        (text("fmt"), text(fmt)),
        (text("attStmt"), Value::Map(stmt)),
        (text("authData"), Value::Bytes(auth_data)),
    ]);
    let mut buf = Vec::new();
    ciborium::into_writer(&object, &mut buf).expect("attestation object encoding");
    buf
}

fn attestation_certificate(profile: &CertificateProfile) -> (PKey<Private>, X509) {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).expect("P-256 group");
    let key = PKey::from_ec_key(EcKey::generate(&group).expect("key")).expect("pkey");

    let mut name = X509NameBuilder::new().expect("name builder");
    name.append_entry_by_text("C", "US").expect("C");
    name.append_entry_by_text("O", "Soft Authenticator").expect("O");
    name.append_entry_by_text("OU", profile.ou).expect("OU");
    name.append_entry_by_text("CN", "passkey-core test").expect("CN");
    let name = name.build();

    let mut builder = X509Builder::new().expect("x509 builder");
    builder.set_version(2).expect("version");
    let serial = BigNum::from_u32(1)
        .and_then(|bn| bn.to_asn1_integer())
        .expect("serial");
    builder.set_serial_number(&serial).expect("serial");
    builder.set_subject_name(&name).expect("subject");
    builder.set_issuer_name(&name).expect("issuer");
    builder.set_pubkey(&key).expect("pubkey");
    builder
        .set_not_before(&Asn1Time::days_from_now(0).expect("time"))
        .expect("not before");
    builder
        .set_not_after(&Asn1Time::days_from_now(1).expect("time"))
        .expect("not after");
    let mut constraints = BasicConstraints::new();
    constraints.critical();
    if profile.ca {
        constraints.ca();
    }
    builder
        .append_extension(constraints.build().expect("basic constraints"))
        .expect("append basic constraints");
    if let Some(aaguid) = profile.aaguid {
        // DER OCTET STRING wrapping the 16 AAGUID bytes
        let mut der = vec![0x04, 0x10];
        der.extend_from_slice(&aaguid);
        let extension = X509Extension::new_from_der(
            &Asn1Object::from_str("1.3.6.1.4.1.45724.1.1.4").expect("oid"),
            false,
            &Asn1OctetString::new_from_bytes(&der).expect("octet string"),
        )
        .expect("aaguid extension");
        builder.append_extension(extension).expect("append aaguid");
    }
    builder.sign(&key, MessageDigest::sha256()).expect("sign cert");
    (key, builder.build())
}
