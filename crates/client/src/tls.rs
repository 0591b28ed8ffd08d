//! TLS-Konfiguration fuer den Control-Kanal
//!
//! Zwei Betriebsarten:
//! - Zertifikatspruefung gegen die Webpki-Wurzelzertifikate
//! - Akzeptanz selbstsignierter Zertifikate (Standard, da die meisten
//!   Server ohne oeffentlich signiertes Zertifikat laufen)

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

/// Baut die rustls-Clientkonfiguration fuer die gewaehlte Betriebsart
pub fn client_config(zertifikat_pruefen: bool) -> Arc<ClientConfig> {
    if zertifikat_pruefen {
        let mut wurzeln = RootCertStore::empty();
        wurzeln.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Arc::new(
            ClientConfig::builder()
                .with_root_certificates(wurzeln)
                .with_no_client_auth(),
        )
    } else {
        Arc::new(
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SelbstsigniertAkzeptieren::neu()))
                .with_no_client_auth(),
        )
    }
}

/// Zertifikats-Pruefer der jedes Server-Zertifikat akzeptiert.
/// Die Signaturen des Handshakes selbst werden weiterhin geprueft.
#[derive(Debug)]
struct SelbstsigniertAkzeptieren {
    provider: CryptoProvider,
}

impl SelbstsigniertAkzeptieren {
    fn neu() -> Self {
        Self {
            provider: rustls::crypto::ring::default_provider(),
        }
    }
}

impl ServerCertVerifier for SelbstsigniertAkzeptieren {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
