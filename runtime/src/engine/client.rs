//! Docker Engine HTTP API client.
//!
//! Every request runs on its own HTTP/1.1 connection to the endpoint.
//! Streaming endpoints hand back the response body as a [`ByteStream`]
//! that is pulled only as fast as the caller consumes it.

use std::io;

use async_trait::async_trait;
use futures::StreamExt;
use http::{header, Method, Request, Response, StatusCode};
use hyper::client::conn;
use hyper::Body;
use mbl_core::error::{MblError, Result};
use mbl_core::MblConfig;
use serde::Deserialize;

use super::{
    BuildOptions, ContainerSpec, Engine, EngineEndpoint, EngineVersion, ImageInfo,
};
use crate::pipe::ByteStream;

const TAR_CONTENT_TYPE: &str = "application/x-tar";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Request body variants used by the engine API.
enum Payload {
    Empty,
    Json(serde_json::Value),
    Tar(ByteStream),
}

/// [`Engine`] over the Docker Engine HTTP API.
pub struct HttpEngine {
    endpoint: EngineEndpoint,
}

impl HttpEngine {
    pub fn new(endpoint: EngineEndpoint) -> Self {
        Self { endpoint }
    }

    /// Client for the engine builds run against.
    pub fn from_config(config: &MblConfig) -> Result<Self> {
        Ok(Self::new(EngineEndpoint::from_config(config)?))
    }

    pub fn address(&self) -> &EngineEndpoint {
        &self.endpoint
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        payload: Payload,
    ) -> Result<Response<Body>> {
        let uri = request_uri(path, query)?;
        let io = self.endpoint.connect().await?;
        let (mut sender, connection) = conn::handshake(io)
            .await
            .map_err(|e| self.transport(e))?;

        let endpoint = self.endpoint.to_string();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(endpoint = %endpoint, error = %e, "Engine connection ended with error");
            }
        });

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(uri.as_str())
            .header(header::HOST, self.endpoint.host_header());
        let body = match payload {
            Payload::Empty => Body::empty(),
            Payload::Json(value) => {
                builder = builder.header(header::CONTENT_TYPE, JSON_CONTENT_TYPE);
                Body::from(serde_json::to_vec(&value)?)
            }
            Payload::Tar(stream) => {
                builder = builder.header(header::CONTENT_TYPE, TAR_CONTENT_TYPE);
                Body::wrap_stream(stream)
            }
        };
        let request = builder
            .body(body)
            .map_err(|e| MblError::Other(format!("invalid engine request {uri}: {e}")))?;

        futures::future::poll_fn(|cx| sender.poll_ready(cx))
            .await
            .map_err(|e| self.transport(e))?;
        let response = sender
            .send_request(request)
            .await
            .map_err(|e| self.transport(e))?;

        let status = response.status();
        tracing::debug!(%method, uri = %uri, status = status.as_u16(), "Engine request");
        if status.is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        payload: Payload,
    ) -> Result<T> {
        let response = self.send(method, path, query, payload).await?;
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| self.transport(e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn send_empty(&self, method: Method, path: &str, query: &[(&str, &str)]) -> Result<()> {
        let response = self.send(method, path, query, Payload::Empty).await?;
        // Drain so the engine sees the exchange complete.
        hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| self.transport(e))?;
        Ok(())
    }

    async fn send_stream(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        payload: Payload,
    ) -> Result<ByteStream> {
        let response = self.send(method, path, query, payload).await?;
        Ok(body_stream(response.into_body()))
    }

    fn transport(&self, err: hyper::Error) -> MblError {
        MblError::Transport(format!("{}: {}", self.endpoint, err))
    }
}

#[async_trait]
impl Engine for HttpEngine {
    fn endpoint(&self) -> String {
        self.endpoint.to_string()
    }

    async fn version(&self) -> Result<EngineVersion> {
        self.send_json(Method::GET, "/version", &[], Payload::Empty)
            .await
            .map_err(|e| match e {
                MblError::Transport(message) => MblError::EngineUnavailable {
                    endpoint: self.endpoint.to_string(),
                    message,
                },
                other => other,
            })
    }

    async fn build_image(&self, context: ByteStream, options: &BuildOptions) -> Result<ByteStream> {
        let no_cache = if options.no_cache { "true" } else { "false" };
        self.send_stream(
            Method::POST,
            "/build",
            &[("t", options.tag.as_str()), ("nocache", no_cache), ("rm", "true")],
            Payload::Tar(context),
        )
        .await
    }

    async fn export_image(&self, name: &str) -> Result<ByteStream> {
        self.send_stream(
            Method::GET,
            &format!("/images/{name}/get"),
            &[],
            Payload::Empty,
        )
        .await
    }

    async fn inspect_image(&self, name: &str) -> Result<Option<ImageInfo>> {
        match self
            .send_json(Method::GET, &format!("/images/{name}/json"), &[], Payload::Empty)
            .await
        {
            Ok(info) => Ok(Some(info)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn remove_image(&self, id: &str, force: bool) -> Result<()> {
        let force = if force { "true" } else { "false" };
        self.send_empty(Method::DELETE, &format!("/images/{id}"), &[("force", force)])
            .await
    }

    async fn load_image(&self, image: ByteStream) -> Result<ByteStream> {
        self.send_stream(
            Method::POST,
            "/images/load",
            &[("quiet", "0")],
            Payload::Tar(image),
        )
        .await
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        #[derive(Deserialize)]
        struct Created {
            #[serde(rename = "Id")]
            id: String,
        }

        let created: Created = self
            .send_json(
                Method::POST,
                "/containers/create",
                &[("name", spec.name.as_str())],
                Payload::Json(create_body(spec)),
            )
            .await?;
        Ok(created.id)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.send_empty(Method::POST, &format!("/containers/{name}/start"), &[])
            .await
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        self.send_empty(Method::POST, &format!("/containers/{name}/stop"), &[])
            .await
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        let force = if force { "true" } else { "false" };
        self.send_empty(Method::DELETE, &format!("/containers/{name}"), &[("force", force)])
            .await
    }

    async fn attach_container(&self, name: &str) -> Result<ByteStream> {
        self.send_stream(
            Method::POST,
            &format!("/containers/{name}/attach"),
            &[("stream", "1"), ("stdout", "1"), ("stderr", "1"), ("logs", "1")],
            Payload::Empty,
        )
        .await
    }

    async fn container_logs(&self, name: &str, follow: bool) -> Result<ByteStream> {
        let follow = if follow { "1" } else { "0" };
        self.send_stream(
            Method::GET,
            &format!("/containers/{name}/logs"),
            &[("stdout", "1"), ("stderr", "1"), ("follow", follow)],
            Payload::Empty,
        )
        .await
    }
}

/// Origin-form request target with a percent-encoded query.
fn request_uri(path: &str, query: &[(&str, &str)]) -> Result<String> {
    let mut url = reqwest::Url::parse("http://engine")
        .map_err(|e| MblError::Other(format!("invalid engine path {path}: {e}")))?;
    url.set_path(path);
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    })
}

fn create_body(spec: &ContainerSpec) -> serde_json::Value {
    let network_mode = if spec.host_network { "host" } else { "default" };
    serde_json::json!({
        "Image": spec.image,
        "HostConfig": {
            "NetworkMode": network_mode,
            "Privileged": spec.privileged,
        }
    })
}

fn body_stream(body: Body) -> ByteStream {
    Box::pin(body.map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e))))
}

async fn error_from_response(response: Response<Body>) -> MblError {
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body())
        .await
        .unwrap_or_default();
    MblError::Engine {
        status: status.as_u16(),
        message: error_message(status, &bytes),
    }
}

/// The engine reports failures as `{"message": "..."}`.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
        return parsed.message;
    }
    let text = String::from_utf8_lossy(body).trim().to_string();
    if text.is_empty() {
        status.canonical_reason().unwrap_or("unknown error").to_string()
    } else {
        text
    }
}
