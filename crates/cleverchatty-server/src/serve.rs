//! HTTP serving: plain TCP via axum, TLS via a rustls accept loop.

use std::io::BufReader;
use std::sync::Arc;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cleverchatty_core::config::TlsSettings;

/// Serve `router` on `addr` until `shutdown` fires.
pub async fn serve_plain(
    addr: &str,
    router: Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr, "listening (plain)");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Serve `router` over TLS. Accepts TLS 1.2 and 1.3 only.
pub async fn serve_tls(
    addr: &str,
    tls: &TlsSettings,
    router: Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let config = load_tls_config(tls)?;
    let acceptor = TlsAcceptor::from(Arc::new(config));
    let listener = TcpListener::bind(addr).await?;
    info!(addr, "listening (tls)");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "tcp accept failed");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let app = router.clone();
                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(s) => s,
                        Err(e) => {
                            debug!(peer = %peer, error = %e, "tls handshake failed");
                            return;
                        }
                    };
                    let service = TowerToHyperService::new(app);
                    let builder =
                        hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
                    if let Err(e) = builder
                        .serve_connection_with_upgrades(TokioIo::new(tls_stream), service)
                        .await
                    {
                        debug!(peer = %peer, error = %e, "tls connection closed with error");
                    }
                });
            }
            _ = shutdown.cancelled() => break,
        }
    }
    Ok(())
}

/// Load cert chain + private key; require at least TLS 1.2.
fn load_tls_config(tls: &TlsSettings) -> anyhow::Result<rustls::ServerConfig> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(std::fs::File::open(
        &tls.cert_file,
    )?))
    .collect::<Result<_, _>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(std::fs::File::open(
        &tls.key_file,
    )?))?
    .ok_or_else(|| anyhow::anyhow!("no private key found in {}", tls.key_file))?;

    let config = rustls::ServerConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS13,
        &rustls::version::TLS12,
    ])
    .with_no_client_auth()
    .with_single_cert(certs, key)?;
    Ok(config)
}
