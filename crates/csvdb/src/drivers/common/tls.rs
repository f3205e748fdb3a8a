//! TLS setup derived from a connection's `sslmode`.
//!
//! PostgreSQL connections use rustls through `tokio-postgres-rustls`;
//! SQL Server connections map the same mode onto tiberius' encryption
//! settings. MySQL uses its driver's own TLS options.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

use crate::config::SslMode;
use crate::error::{Result, TransferError};

/// Builds TLS connectors for one `SslMode`.
pub struct TlsBuilder {
    ssl_mode: SslMode,
}

impl TlsBuilder {
    pub fn new(ssl_mode: SslMode) -> Self {
        Self { ssl_mode }
    }

    /// A PostgreSQL TLS connector, or `None` when TLS is disabled.
    pub fn postgres_connector(&self) -> Result<Option<MakeRustlsConnect>> {
        if !self.ssl_mode.requires_tls() {
            return Ok(None);
        }
        Ok(Some(MakeRustlsConnect::new(self.client_config()?)))
    }

    /// The rustls client configuration for this mode.
    pub fn client_config(&self) -> Result<ClientConfig> {
        match self.ssl_mode {
            SslMode::Disable => Err(TransferError::Config(
                "Cannot build TLS config for sslmode=disable".into(),
            )),
            SslMode::Require => {
                // SECURITY: encryption only, the server certificate is not checked
                warn!(
                    "sslmode=require encrypts the connection but does NOT verify the server \
                     certificate; use sslmode=verify-full outside trusted networks"
                );
                Ok(ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
                    .with_no_client_auth())
            }
            SslMode::VerifyCa | SslMode::VerifyFull => {
                if self.ssl_mode == SslMode::VerifyCa {
                    info!("sslmode=verify-ca: rustls also verifies the host name");
                }
                let mut roots = rustls::RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                Ok(ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth())
            }
        }
    }

    /// tiberius encryption level and whether to trust any certificate.
    pub fn mssql_encryption(&self) -> (tiberius::EncryptionLevel, bool) {
        match self.ssl_mode {
            SslMode::Disable => (tiberius::EncryptionLevel::NotSupported, false),
            SslMode::Require => (tiberius::EncryptionLevel::Required, true),
            SslMode::VerifyCa | SslMode::VerifyFull => (tiberius::EncryptionLevel::Required, false),
        }
    }
}

/// Certificate verifier that accepts every certificate. Only used for
/// `sslmode=require`.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        use SignatureScheme::*;
        vec![
            RSA_PKCS1_SHA256,
            RSA_PKCS1_SHA384,
            RSA_PKCS1_SHA512,
            ECDSA_NISTP256_SHA256,
            ECDSA_NISTP384_SHA384,
            ECDSA_NISTP521_SHA512,
            RSA_PSS_SHA256,
            RSA_PSS_SHA384,
            RSA_PSS_SHA512,
            ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_has_no_connector() {
        let builder = TlsBuilder::new(SslMode::Disable);
        assert!(builder.postgres_connector().unwrap().is_none());
        assert!(builder.client_config().is_err());
    }

    #[test]
    fn test_require_and_verify_build_connectors() {
        assert!(TlsBuilder::new(SslMode::Require)
            .postgres_connector()
            .unwrap()
            .is_some());
        assert!(TlsBuilder::new(SslMode::VerifyFull)
            .postgres_connector()
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_mssql_encryption() {
        let (level, trust) = TlsBuilder::new(SslMode::Require).mssql_encryption();
        assert!(matches!(level, tiberius::EncryptionLevel::Required));
        assert!(trust);
        let (level, _) = TlsBuilder::new(SslMode::Disable).mssql_encryption();
        assert!(matches!(level, tiberius::EncryptionLevel::NotSupported));
    }
}
