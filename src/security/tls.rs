//! Loads a server-only rustls configuration from a `[server]` section's
//! `tls.certificate` / `tls.private_key` paths (SPEC_FULL.md §6.2). There is
//! no client certificate verification: the protocol has no notion of
//! client authentication (spec.md §1 non-goals), so this only ever builds
//! `with_no_client_auth()`.

use std::fs;

use anyhow::{anyhow, Context, Result};
use rustls_pemfile::Item;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;

use crate::config::TlsListenerConfig;

/// Builds a rustls `ServerConfig` for one TLS-enabled listener.
pub fn build_server_config(tls: &TlsListenerConfig) -> Result<ServerConfig> {
    if tls.private_key_password.is_some() {
        tracing::warn!(
            "a private_key_password was configured but encrypted private keys are not supported; \
             the password will be ignored and key loading may fail"
        );
    }

    let cert_chain = load_cert_chain(&tls.certificate)?;
    let private_key = load_private_key(&tls.private_key)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)
        .map_err(|err| anyhow!("invalid TLS certificate/private key pair: {err}"))?;

    Ok(config)
}

fn load_cert_chain(path: &std::path::Path) -> Result<Vec<CertificateDer<'static>>> {
    let data = fs::read(path)
        .with_context(|| format!("failed to read TLS certificate at {}", path.display()))?;
    let mut reader = data.as_slice();
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse TLS certificate at {}", path.display()))?;

    if certs.is_empty() {
        anyhow::bail!("no certificates found in {}", path.display());
    }

    Ok(certs)
}

fn load_private_key(path: &std::path::Path) -> Result<PrivateKeyDer<'static>> {
    let data = fs::read(path)
        .with_context(|| format!("failed to read TLS private key at {}", path.display()))?;
    let mut reader = data.as_slice();

    while let Some(item) = rustls_pemfile::read_one(&mut reader)
        .with_context(|| format!("failed to parse PEM entry in {}", path.display()))?
    {
        let der: PrivateKeyDer<'static> = match item {
            Item::Pkcs8Key(key) => key.into(),
            Item::Pkcs1Key(key) => key.into(),
            Item::Sec1Key(key) => key.into(),
            _ => continue,
        };
        return Ok(der);
    }

    anyhow::bail!(
        "no supported private key (pkcs8/pkcs1/sec1) found in {}",
        path.display()
    );
}
