use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use geostack_registry::ProbeTarget;
use tokio::net::TcpStream;
use url::Url;

/// Per-attempt connect budget for the port probe, so a blackholed port
/// cannot stall an attempt past the overall deadline.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Facts about the started process a probe may need.
#[derive(Debug, Clone, Copy)]
pub struct ProbeContext {
    /// When the process under observation was spawned.
    pub started_at: SystemTime,
}

/// A single readiness check against a started service.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Human-readable description for logs.
    fn describe(&self) -> String;

    /// Runs one check. `true` means the service can accept work.
    async fn check(&self, ctx: &ProbeContext) -> bool;
}

/// Builds the probe declared by a readiness spec.
#[must_use]
pub fn for_target(target: &ProbeTarget, http: &reqwest::Client) -> Box<dyn Probe> {
    match target {
        ProbeTarget::Port(port) => Box::new(PortProbe { port: *port }),
        ProbeTarget::Http(url) => Box::new(HttpProbe {
            client: http.clone(),
            url: url.clone(),
        }),
        ProbeTarget::FileMarker(path) => Box::new(FileMarkerProbe { path: path.clone() }),
    }
}

/// Succeeds on a successful TCP connection to the declared port.
struct PortProbe {
    port: u16,
}

#[async_trait]
impl Probe for PortProbe {
    fn describe(&self) -> String {
        format!("port {}", self.port)
    }

    async fn check(&self, _ctx: &ProbeContext) -> bool {
        tokio::time::timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect(("127.0.0.1", self.port)),
        )
        .await
        .is_ok_and(|connected| connected.is_ok())
    }
}

/// Succeeds on a 2xx response from the declared endpoint.
struct HttpProbe {
    client: reqwest::Client,
    url: Url,
}

#[async_trait]
impl Probe for HttpProbe {
    fn describe(&self) -> String {
        format!("http {}", self.url)
    }

    async fn check(&self, _ctx: &ProbeContext) -> bool {
        (self.client.get(self.url.clone()).send().await)
            .is_ok_and(|response| response.status().is_success())
    }
}

/// Succeeds once the marker file's modification time advances past the
/// process start time.
struct FileMarkerProbe {
    path: PathBuf,
}

#[async_trait]
impl Probe for FileMarkerProbe {
    fn describe(&self) -> String {
        format!("marker {}", self.path.display())
    }

    async fn check(&self, ctx: &ProbeContext) -> bool {
        tokio::fs::metadata(&self.path)
            .await
            .ok()
            .and_then(|meta| meta.modified().ok())
            .is_some_and(|mtime| mtime > ctx.started_at)
    }
}
