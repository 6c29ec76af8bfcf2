//! In-cluster control-plane client.
//!
//! Authenticates with the pod's service account token and trusts the cluster
//! CA bundle when present. Status and logs go over plain HTTPS; exec upgrades
//! to a websocket speaking the `v4.channel.k8s.io` subprotocol.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::Connector;
use tracing::{debug, info};

use super::{
    container_status_from_pod, ClusterApi, ClusterError, ClusterResult, ContainerStatus,
    ExecOptions,
};
use crate::settings::KubernetesSettings;
use crate::transport::{ExecSession, WsFrameSocket};

/// Exec subprotocol: one leading channel byte per binary frame.
pub const EXEC_SUBPROTOCOL: &str = "v4.channel.k8s.io";

/// Client bound to one pod and its user container.
pub struct KubeClient {
    http: reqwest::Client,
    tls: Option<Arc<rustls::ClientConfig>>,
    api_url: String,
    namespace: String,
    pod_name: String,
    container: String,
    token: String,
}

impl KubeClient {
    /// Build a client from the service account mounted into the pod.
    pub async fn from_settings(settings: &KubernetesSettings) -> ClusterResult<Self> {
        let token = tokio::fs::read_to_string(&settings.token_path)
            .await
            .map_err(|e| {
                ClusterError::Config(format!(
                    "cannot read service account token {}: {e}",
                    settings.token_path.display()
                ))
            })?
            .trim()
            .to_string();

        let ca_pem = read_optional(&settings.ca_path).await?;

        let mut http = reqwest::Client::builder();
        let tls = match ca_pem {
            Some(pem) => {
                let cert = reqwest::Certificate::from_pem(&pem)
                    .map_err(|e| ClusterError::Config(format!("invalid CA bundle: {e}")))?;
                http = http.add_root_certificate(cert);
                Some(tls_config(&pem)?)
            }
            None => None,
        };
        let http = http
            .build()
            .map_err(|e| ClusterError::Config(e.to_string()))?;

        info!(
            api_url = %settings.api_url,
            namespace = %settings.namespace,
            pod = %settings.pod_name,
            container = %settings.user_container,
            custom_ca = tls.is_some(),
            "control plane client ready"
        );

        Ok(Self {
            http,
            tls,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            namespace: settings.namespace.clone(),
            pod_name: settings.pod_name.clone(),
            container: settings.user_container.clone(),
            token,
        })
    }

    fn pod_url(&self) -> String {
        format!(
            "{}/api/v1/namespaces/{}/pods/{}",
            self.api_url, self.namespace, self.pod_name
        )
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> ClusterResult<Vec<u8>> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ClusterError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| ClusterError::Transport(e.to_string()))?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClusterError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(ClusterError::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body.to_vec())
    }
}

#[async_trait]
impl ClusterApi for KubeClient {
    async fn read_container_status(&self) -> ClusterResult<ContainerStatus> {
        let pod = self.get(&self.pod_url(), &[]).await?;
        container_status_from_pod(&pod, &self.container)
    }

    async fn read_container_logs(&self) -> ClusterResult<String> {
        let url = format!("{}/log", self.pod_url());
        let logs = self.get(&url, &[("container", &self.container)]).await?;
        Ok(String::from_utf8_lossy(&logs).into_owned())
    }

    async fn exec(&self, options: ExecOptions) -> ClusterResult<ExecSession> {
        let url = exec_url(&self.pod_url(), &self.container, &options)?;
        debug!(url = %url, "opening exec session");

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ClusterError::Config(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(EXEC_SUBPROTOCOL),
        );
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", self.token))
                .map_err(|e| ClusterError::Config(format!("invalid token: {e}")))?,
        );

        let connector = self.tls.clone().map(Connector::Rustls);
        let (stream, _) =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
                .await
                .map_err(|e| ClusterError::Transport(e.to_string()))?;

        Ok(ExecSession::new(
            Box::new(WsFrameSocket::new(stream)),
            options.streams,
        ))
    }
}

/// Websocket URL of the exec subresource.
pub(crate) fn exec_url(
    pod_url: &str,
    container: &str,
    options: &ExecOptions,
) -> ClusterResult<reqwest::Url> {
    let mut url = reqwest::Url::parse(&format!("{pod_url}/exec"))
        .map_err(|e| ClusterError::Config(format!("invalid api url: {e}")))?;

    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(ClusterError::Config(format!(
                "unsupported api url scheme: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ClusterError::Config("cannot switch api url to websocket".to_string()))?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("container", container);
        for arg in &options.command {
            query.append_pair("command", arg);
        }
        query.append_pair("stdin", bool_str(options.stdin));
        query.append_pair("stdout", bool_str(options.streams.stdout));
        query.append_pair("stderr", bool_str(options.streams.stderr));
        query.append_pair("tty", bool_str(options.tty));
    }
    Ok(url)
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

async fn read_optional(path: &Path) -> ClusterResult<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ClusterError::Config(format!(
            "cannot read {}: {e}",
            path.display()
        ))),
    }
}

fn tls_config(ca_pem: &[u8]) -> ClusterResult<Arc<rustls::ClientConfig>> {
    let mut roots = rustls::RootCertStore::empty();
    let mut reader = ca_pem;
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| ClusterError::Config(format!("invalid CA bundle: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| ClusterError::Config(format!("rejected CA certificate: {e}")))?;
    }
    if roots.is_empty() {
        return Err(ClusterError::Config("CA bundle holds no certificates".to_string()));
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ClusterError::Config(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}
