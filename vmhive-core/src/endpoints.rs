//! Network listeners
//!
//! Three listeners feed the same router: the primary control socket, the
//! guest socket and an optional HTTPS address. Each accepted connection gets
//! a [`ConnectionInfo`] request extension so the authentication gate knows
//! the transport and peer credentials.

use axum::Router;
use hyper::server::conn::http1;
use hyper::{body::Incoming, Request};
use hyper_util::rt::TokioIo;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, ServerConfig, SignatureScheme};
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use crate::{
    api::request::ConnectionInfo,
    certs::CertificateInfo,
    error::{HiveError, HiveResult},
};

/// How long `down` waits for open connections to finish
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub unix_socket: PathBuf,
    pub guest_socket: PathBuf,
    pub socket_group: Option<String>,
    pub https_address: Option<SocketAddr>,
}

pub struct Endpoints {
    token: CancellationToken,
    tracker: TaskTracker,
    sockets: Vec<PathBuf>,
    https_address: Option<SocketAddr>,
}

impl Endpoints {
    /// Bind every configured listener and start serving
    pub async fn up(
        settings: &EndpointSettings,
        main: Router,
        guest: Router,
        certificate: &CertificateInfo,
    ) -> HiveResult<Self> {
        let mut endpoints = Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            sockets: Vec::new(),
            https_address: None,
        };

        if let Err(e) = endpoints.listen(settings, main, guest, certificate).await {
            endpoints.abort();
            return Err(e);
        }

        Ok(endpoints)
    }

    async fn listen(
        &mut self,
        settings: &EndpointSettings,
        main: Router,
        guest: Router,
        certificate: &CertificateInfo,
    ) -> HiveResult<()> {
        let listener = bind_unix(&settings.unix_socket, settings.socket_group.as_deref())?;
        self.sockets.push(settings.unix_socket.clone());
        info!(path = %settings.unix_socket.display(), "Listening on control socket");
        self.spawn_unix(listener, main.clone(), false);

        let listener = bind_unix(&settings.guest_socket, None)?;
        self.sockets.push(settings.guest_socket.clone());
        // Guests of any uid must be able to reach their socket
        std::fs::set_permissions(&settings.guest_socket, std::fs::Permissions::from_mode(0o666))?;
        info!(path = %settings.guest_socket.display(), "Listening on guest socket");
        self.spawn_unix(listener, guest, true);

        if let Some(address) = settings.https_address {
            let acceptor = tls_acceptor(certificate)?;
            let listener = TcpListener::bind(address).await?;
            let bound = listener.local_addr()?;
            info!(address = %bound, "Listening on HTTPS");
            self.spawn_tls(listener, acceptor, main);
            self.https_address = Some(bound);
        }

        Ok(())
    }

    /// Tear down listeners already started by a failed `up`
    fn abort(&self) {
        self.token.cancel();
        self.tracker.close();
        self.remove_sockets();
    }

    fn remove_sockets(&self) {
        for path in &self.sockets {
            if let Err(e) = std::fs::remove_file(path) {
                debug!(path = %path.display(), error = %e, "Socket file already gone");
            }
        }
    }

    /// Bound HTTPS address, useful when configured with port 0
    pub fn https_address(&self) -> Option<SocketAddr> {
        self.https_address
    }

    fn spawn_unix(&self, listener: UnixListener, router: Router, guest: bool) {
        let token = self.token.clone();
        let tracker = self.tracker.clone();

        self.tracker.spawn(async move {
            loop {
                let (stream, _) = tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Socket accept failed");
                            continue;
                        }
                    },
                };

                let cred = stream.peer_cred().ok();
                let uid = cred.map(|c| c.uid());
                let pid = cred.and_then(|c| c.pid());
                let info = if guest {
                    ConnectionInfo::Guest { uid, pid }
                } else {
                    ConnectionInfo::Unix { uid, pid }
                };
                tracker.spawn(serve_connection(stream, router.clone(), info, token.clone()));
            }
        });
    }

    fn spawn_tls(&self, listener: TcpListener, acceptor: TlsAcceptor, router: Router) {
        let token = self.token.clone();
        let tracker = self.tracker.clone();

        self.tracker.spawn(async move {
            loop {
                let (stream, remote) = tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "HTTPS accept failed");
                            continue;
                        }
                    },
                };

                let acceptor = acceptor.clone();
                let router = router.clone();
                let token = token.clone();
                tracker.spawn(async move {
                    let stream = match acceptor.accept(stream).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            debug!(%remote, error = %e, "TLS handshake failed");
                            return;
                        }
                    };
                    let peer_certificates = stream
                        .get_ref()
                        .1
                        .peer_certificates()
                        .map(|certs| certs.iter().map(|c| c.as_ref().to_vec()).collect())
                        .unwrap_or_default();
                    let info = ConnectionInfo::Tls {
                        remote,
                        peer_certificates,
                    };
                    serve_connection(stream, router, info, token).await;
                });
            }
        });
    }

    /// Stop accepting, let open connections finish, remove socket files
    pub async fn down(&self) -> HiveResult<()> {
        self.token.cancel();
        self.tracker.close();

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, self.tracker.wait()).await;
        self.remove_sockets();

        match drained {
            Ok(()) => {
                info!("Network endpoints closed");
                Ok(())
            }
            Err(_) => Err(HiveError::timeout("draining connections", DRAIN_TIMEOUT)),
        }
    }
}

async fn serve_connection<S>(io: S, router: Router, info: ConnectionInfo, token: CancellationToken)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = hyper::service::service_fn(move |mut req: Request<Incoming>| {
        req.extensions_mut().insert(info.clone());
        router.clone().oneshot(req)
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = token.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = result {
        debug!(error = %e, "HTTP connection error");
    }
}

fn bind_unix(path: &Path, group: Option<&str>) -> HiveResult<UnixListener> {
    if path.exists() {
        if std::os::unix::net::UnixStream::connect(path).is_ok() {
            return Err(HiveError::configuration(
                "endpoints",
                format!("{} is already in use by another process", path.display()),
            ));
        }
        debug!(path = %path.display(), "Removing stale socket");
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(path)?;
    if let Err(e) = restrict_socket(path, group) {
        drop(listener);
        let _ = std::fs::remove_file(path);
        return Err(e);
    }

    Ok(listener)
}

fn restrict_socket(path: &Path, group: Option<&str>) -> HiveResult<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660))?;

    if let Some(group) = group {
        let gid = nix::unistd::Group::from_name(group)?
            .ok_or_else(|| {
                HiveError::configuration("daemon.socket_group", format!("unknown group '{}'", group))
            })?
            .gid;
        nix::unistd::chown(path, None, Some(gid))?;
    }
    Ok(())
}

fn tls_acceptor(certificate: &CertificateInfo) -> HiveResult<TlsAcceptor> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let key = pem::parse(certificate.key_pem.as_bytes())?.into_contents();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key));
    let chain = vec![CertificateDer::from(certificate.der().to_vec())];

    let config = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(Arc::new(AcceptAnyClientCert::new(&provider)))
        .with_single_cert(chain, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Requests a client certificate and checks the handshake signature, but
/// leaves trust decisions to the authentication gate
#[derive(Debug)]
struct AcceptAnyClientCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl AcceptAnyClientCert {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ClientCertVerifier for AcceptAnyClientCert {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
