//! mTLS context construction. Mandatory on both ends: the server
//! requires a client certificate signed by the configured CA, and the
//! client verifies the server's certificate against the same CA.

use crate::error::{Error, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::io::BufReader;
use std::sync::Arc;

fn load_cert_chain(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut BufReader::new(pem))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("invalid certificate PEM: {e}")))
}

fn load_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut BufReader::new(pem))
        .map_err(|e| Error::Tls(format!("invalid private key PEM: {e}")))?
        .ok_or_else(|| Error::Tls("no private key found in PEM".into()))
}

fn root_store(ca_pem: &[u8]) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_cert_chain(ca_pem)? {
        roots
            .add(cert)
            .map_err(|e| Error::Tls(format!("invalid CA certificate: {e}")))?;
    }
    Ok(roots)
}

/// Server-side config with `CERT_REQUIRED`: any connection lacking a
/// client certificate signed by `ca_pem` is rejected at the handshake.
pub fn server_tls_config(cert_pem: &[u8], key_pem: &[u8], ca_pem: &[u8]) -> Result<Arc<ServerConfig>> {
    let roots = Arc::new(root_store(ca_pem)?);
    let client_verifier = WebPkiClientVerifier::builder(roots)
        .build()
        .map_err(|e| Error::Tls(format!("failed to build client verifier: {e}")))?;

    let cert_chain = load_cert_chain(cert_pem)?;
    let key = load_private_key(key_pem)?;

    let config = ServerConfig::builder()
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(cert_chain, key)
        .map_err(|e| Error::Tls(format!("invalid server certificate/key: {e}")))?;
    Ok(Arc::new(config))
}

/// Client-side config presenting its own certificate (mTLS) and
/// verifying the server's certificate against `ca_pem`.
pub fn client_tls_config(cert_pem: &[u8], key_pem: &[u8], ca_pem: &[u8]) -> Result<Arc<ClientConfig>> {
    let roots = root_store(ca_pem)?;
    let cert_chain = load_cert_chain(cert_pem)?;
    let key = load_private_key(key_pem)?;

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(cert_chain, key)
        .map_err(|e| Error::Tls(format!("invalid client certificate/key: {e}")))?;
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed_ca() -> (rcgen::Certificate, Vec<u8>, Vec<u8>) {
        let ca = rcgen::generate_simple_self_signed(vec!["test-ca".into()]).unwrap();
        let cert_pem = ca.serialize_pem().unwrap();
        let key_pem = ca.serialize_private_key_pem();
        (ca, cert_pem.into_bytes(), key_pem.into_bytes())
    }

    #[test]
    fn builds_server_config_from_self_signed_material() {
        let (_ca, cert_pem, key_pem) = self_signed_ca();
        server_tls_config(&cert_pem, &key_pem, &cert_pem).unwrap();
    }

    #[test]
    fn builds_client_config_from_self_signed_material() {
        let (_ca, cert_pem, key_pem) = self_signed_ca();
        client_tls_config(&cert_pem, &key_pem, &cert_pem).unwrap();
    }

    #[test]
    fn rejects_garbage_pem() {
        assert!(server_tls_config(b"not pem", b"not pem", b"not pem").is_err());
    }
}
