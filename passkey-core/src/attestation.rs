//! Attestation object parsing and statement verification.

use ciborium::value::Value;
use x509_parser::der_parser::der::parse_der_octetstring;
use x509_parser::x509::X509Version;

use crate::authenticator_data::{AttestedCredentialData, AuthenticatorData, MalformedData};
use crate::config::AttestationPolicy;
use crate::crypto;
use crate::error::Reason;
use crate::model::AttestationFormat;

/// id-fido-gen-ce-aaguid
const FIDO_GEN_CE_AAGUID: &str = "1.3.6.1.4.1.45724.1.1.4";

/// Decoded `attestationObject`: `{fmt, attStmt, authData}`.
#[derive(Debug, Clone)]
pub struct AttestationObject {
    pub fmt: String,
    pub att_stmt: Vec<(Value, Value)>,
    pub auth_data: Vec<u8>,
}

impl AttestationObject {
    pub fn parse(bytes: &[u8]) -> Result<Self, MalformedData> {
        let value: Value =
            ciborium::from_reader(bytes).map_err(|_| MalformedData("attestation object is not CBOR"))?;
        let map = value
            .into_map()
            .map_err(|_| MalformedData("attestation object is not a map"))?;

        let mut fmt = None;
        let mut att_stmt = None;
        let mut auth_data = None;
        for (key, value) in map {
            match (key.as_text(), value) {
                (Some("fmt"), Value::Text(s)) => fmt = Some(s),
                (Some("attStmt"), Value::Map(m)) => att_stmt = Some(m),
                (Some("authData"), Value::Bytes(b)) => auth_data = Some(b),
                _ => {}
            }
        }

        Ok(Self {
            fmt: fmt.ok_or(MalformedData("missing fmt"))?,
            att_stmt: att_stmt.ok_or(MalformedData("missing attStmt"))?,
            auth_data: auth_data.ok_or(MalformedData("missing authData"))?,
        })
    }

    pub fn format(&self) -> AttestationFormat {
        AttestationFormat::from_fmt(&self.fmt)
    }

    /// Check the attestation statement against `policy`.
    ///
    /// `none` is always accepted. Under [`AttestationPolicy::Strict`],
    /// `packed` and `fido-u2f` signatures must verify and every other format is
    /// rejected as untrusted. Certificates are checked for the shape the
    /// format requires; no chain is built to a trust anchor.
    pub fn verify(
        &self,
        auth_data: &AuthenticatorData,
        attested: &AttestedCredentialData,
        client_data_hash: &[u8; 32],
        policy: AttestationPolicy,
    ) -> Result<AttestationFormat, Reason> {
        let format = self.format();
        match (format, policy) {
            (AttestationFormat::None, _) => {
                if !self.att_stmt.is_empty() {
                    return Err(Reason::MalformedAttestation("none attestation has a statement"));
                }
            }
            (_, AttestationPolicy::Permissive) => {
                tracing::debug!(fmt = %self.fmt, "Accepting attestation without verification");
            }
            (AttestationFormat::Packed, AttestationPolicy::Strict) => {
                self.verify_packed(attested, client_data_hash)?;
            }
            (AttestationFormat::FidoU2f, AttestationPolicy::Strict) => {
                self.verify_fido_u2f(auth_data, attested, client_data_hash)?;
            }
            (_, AttestationPolicy::Strict) => {
                tracing::warn!(fmt = %self.fmt, "Attestation format not trusted");
                return Err(Reason::UntrustedAttestation);
            }
        }
        Ok(format)
    }

    fn verify_packed(
        &self,
        attested: &AttestedCredentialData,
        client_data_hash: &[u8; 32],
    ) -> Result<(), Reason> {
        let alg = stmt_get(&self.att_stmt, "alg")
            .and_then(Value::as_integer)
            .and_then(|i| i64::try_from(i).ok())
            .ok_or(Reason::MalformedAttestation("packed statement missing alg"))?;
        let sig = stmt_bytes(&self.att_stmt, "sig")
            .ok_or(Reason::MalformedAttestation("packed statement missing sig"))?;

        let mut signed = self.auth_data.clone();
        signed.extend_from_slice(client_data_hash);

        let verified = match stmt_get(&self.att_stmt, "x5c") {
            Some(x5c) => {
                let cert = first_certificate(x5c)?;
                if !crypto::x509_matches_alg(cert, alg).map_err(|_| Reason::UntrustedAttestation)? {
                    tracing::debug!(alg, "Attestation certificate key does not match alg");
                    return Err(Reason::UntrustedAttestation);
                }
                if let Err(requirement) = check_packed_certificate(cert, &attested.aaguid) {
                    tracing::debug!(requirement, "Packed attestation certificate rejected");
                    return Err(Reason::UntrustedAttestation);
                }
                crypto::verify_x509(cert, sig, &signed).map_err(|_| Reason::UntrustedAttestation)?
            }
            None => {
                if alg != attested.public_key.alg {
                    return Err(Reason::UntrustedAttestation);
                }
                attested
                    .public_key
                    .verify(sig, &signed)
                    .map_err(|_| Reason::UntrustedAttestation)?
            }
        };

        if verified {
            Ok(())
        } else {
            Err(Reason::UntrustedAttestation)
        }
    }

    fn verify_fido_u2f(
        &self,
        auth_data: &AuthenticatorData,
        attested: &AttestedCredentialData,
        client_data_hash: &[u8; 32],
    ) -> Result<(), Reason> {
        let sig = stmt_bytes(&self.att_stmt, "sig")
            .ok_or(Reason::MalformedAttestation("fido-u2f statement missing sig"))?;
        let x5c = stmt_get(&self.att_stmt, "x5c")
            .and_then(Value::as_array)
            .ok_or(Reason::MalformedAttestation("fido-u2f statement missing x5c"))?;
        if x5c.len() != 1 {
            return Err(Reason::MalformedAttestation("fido-u2f x5c must hold one certificate"));
        }
        let cert = x5c[0]
            .as_bytes()
            .ok_or(Reason::MalformedAttestation("x5c entry is not bytes"))?;

        if !crypto::x509_matches_alg(cert, crypto::COSE_ALG_ES256)
            .map_err(|_| Reason::UntrustedAttestation)?
        {
            return Err(Reason::UntrustedAttestation);
        }

        let public_key_u2f = attested
            .public_key
            .x962_raw()
            .map_err(|_| Reason::UntrustedAttestation)?;

        let mut signed = Vec::with_capacity(1 + 32 + 32 + attested.credential_id.len() + 65);
        signed.push(0x00);
        signed.extend_from_slice(&auth_data.rp_id_hash);
        signed.extend_from_slice(client_data_hash);
        signed.extend_from_slice(&attested.credential_id);
        signed.extend_from_slice(&public_key_u2f);

        match crypto::verify_x509(cert, sig, &signed) {
            Ok(true) => Ok(()),
            _ => Err(Reason::UntrustedAttestation),
        }
    }
}

fn stmt_get<'a>(stmt: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    stmt.iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

fn stmt_bytes<'a>(stmt: &'a [(Value, Value)], key: &str) -> Option<&'a [u8]> {
    stmt_get(stmt, key)?.as_bytes().map(Vec::as_slice)
}

/// Packed attestation certificate requirements (WebAuthn 8.2.1). Returns the
/// first unmet requirement.
fn check_packed_certificate(cert_der: &[u8], aaguid: &[u8; 16]) -> Result<(), &'static str> {
    let (_, cert) =
        x509_parser::parse_x509_certificate(cert_der).map_err(|_| "certificate is not DER")?;
    if cert.version() != X509Version::V3 {
        return Err("certificate is not version 3");
    }

    let subject = cert.subject();
    if subject.iter_country().next().is_none()
        || subject.iter_organization().next().is_none()
        || subject.iter_common_name().next().is_none()
    {
        return Err("subject lacks C, O or CN");
    }
    let ou = subject
        .iter_organizational_unit()
        .next()
        .and_then(|ou| ou.as_str().ok());
    if ou != Some("Authenticator Attestation") {
        return Err("subject OU is not Authenticator Attestation");
    }

    match cert.basic_constraints() {
        Ok(Some(constraints)) if constraints.value.ca => return Err("certificate is a CA"),
        Ok(_) => {}
        Err(_) => return Err("basic constraints are malformed"),
    }

    // the extension is optional, but when present must carry our AAGUID
    let extension = cert
        .extensions()
        .iter()
        .find(|ext| ext.oid.to_id_string() == FIDO_GEN_CE_AAGUID);
    if let Some(ext) = extension {
        if ext.critical {
            return Err("AAGUID extension is critical");
        }
        let (_, value) =
            parse_der_octetstring(ext.value).map_err(|_| "AAGUID extension is not an octet string")?;
        if value.as_slice().ok() != Some(&aaguid[..]) {
            return Err("AAGUID extension does not match authenticator data");
        }
    }
    Ok(())
}

fn first_certificate(x5c: &Value) -> Result<&[u8], Reason> {
    x5c.as_array()
        .and_then(|certs| certs.first())
        .and_then(Value::as_bytes)
        .map(Vec::as_slice)
        .ok_or(Reason::MalformedAttestation("x5c is empty"))
}
