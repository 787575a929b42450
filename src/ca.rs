//! In-memory certificate authority for TLS interception.
//!
//! One self-signed ECDSA P-256 CA is generated at process start and never
//! touches disk; it mints a fresh leaf per intercepted host. Grounded on the
//! `rcgen` usage in `i1-ca`'s intermediate-CA issuance (`signed_by`,
//! `KeyUsagePurpose`, `DistinguishedName`) and the CA-generation shape in
//! a MITM forward proxy's `generate_ca`/`issue_host_certificate_pem`.

use std::sync::atomic::{AtomicU64, Ordering};

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use time::{Duration, OffsetDateTime};

use crate::error::ProxyError;

const CA_VALIDITY_HOURS: i64 = 6;
const LEAF_VALIDITY_HOURS: i64 = 2;
const BACKDATE_MINUTES: i64 = 5;

/// A minted leaf certificate plus its private key, ready for a
/// `rustls::ServerConfig`.
pub struct IssuedLeaf {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// The proxy's self-signed authority. Immutable after construction except
/// for the atomic serial counter.
pub struct CertificateAuthority {
    key_pair: KeyPair,
    certificate: rcgen::Certificate,
    cert_pem: String,
    next_serial: AtomicU64,
}

impl CertificateAuthority {
    /// Generates a fresh CA: ECDSA P-256, `KeyUsage = digitalSignature |
    /// keyCertSign`, `IsCA = true`, validity ~6 hours backdated by 5 minutes
    /// to tolerate clock skew on the guest.
    pub fn generate() -> Result<CertificateAuthority, ProxyError> {
        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;

        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyCertSign];

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "hermit-proxy CA");
        params.distinguished_name = dn;

        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::minutes(BACKDATE_MINUTES);
        params.not_after = now + Duration::hours(CA_VALIDITY_HOURS);

        let certificate = params.self_signed(&key_pair)?;
        let cert_pem = certificate.pem();

        Ok(CertificateAuthority {
            key_pair,
            certificate,
            cert_pem,
            next_serial: AtomicU64::new(1),
        })
    }

    /// PEM encoding of the CA certificate, served from the well-known
    /// endpoint.
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Issues a leaf certificate for `host`: a fresh ECDSA P-256 key (never
    /// the CA key), CN and single DNS SAN both `host`, validity ~2 hours
    /// backdated by 5 minutes, `ExtKeyUsage = clientAuth, serverAuth`.
    /// Safe for concurrent callers — the serial counter is the only shared
    /// mutable state.
    pub fn issue_leaf(&self, host: &str) -> Result<IssuedLeaf, ProxyError> {
        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;

        let mut params = CertificateParams::new(vec![host.to_string()])?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, host);
        params.distinguished_name = dn;

        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth, ExtendedKeyUsagePurpose::ServerAuth];

        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::minutes(BACKDATE_MINUTES);
        params.not_after = now + Duration::hours(LEAF_VALIDITY_HOURS);

        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        params.serial_number = Some(serial.into());

        let certificate = params.signed_by(&key_pair, &self.certificate, &self.key_pair)?;

        let key_der = PrivatePkcs8KeyDer::from(key_pair.serialize_der());
        Ok(IssuedLeaf {
            cert_chain: vec![certificate.der().clone()],
            key: PrivateKeyDer::Pkcs8(key_der),
        })
    }
}
