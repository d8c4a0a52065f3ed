//! Client for the remote sandbox execution service.
//!
//! The sandbox runs untrusted commands inside isolated containers and
//! keeps produced files in a server-side cache addressed by file ids, so
//! a compiled binary never travels back through the orchestrator between
//! its compile task and the run tasks that use it. The wire protocol is
//! defined in `proto/sandbox.proto`; everything above speaks through the
//! [`Sandbox`] trait so the scheduler and the pipeline can be exercised
//! against an in-process fake.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::{Channel, Endpoint};

pub mod pb {
    tonic::include_proto!("sandbox");
}

use pb::executor_client::ExecutorClient;

/// Builds an inline memory file.
pub fn memory_file(content: Vec<u8>) -> pb::request::File {
    pb::request::File {
        file: Some(pb::request::file::File::Memory(pb::request::MemoryFile {
            content,
        })),
    }
}

/// Builds a reference to a sandbox-cached file.
pub fn cached_file(file_id: impl Into<String>) -> pb::request::File {
    pb::request::File {
        file: Some(pb::request::file::File::Cached(pb::request::CachedFile {
            file_id: file_id.into(),
        })),
    }
}

/// Builds a reference to a file on the sandbox server's filesystem.
#[allow(dead_code)]
pub fn local_file(src: impl Into<String>) -> pb::request::File {
    pb::request::File {
        file: Some(pb::request::file::File::Local(pb::request::LocalFile {
            src: src.into(),
        })),
    }
}

/// Builds a size-capped pipe collector for an output stream.
pub fn pipe_collector(name: impl Into<String>, max: i64) -> pb::request::File {
    pb::request::File {
        file: Some(pb::request::file::File::Pipe(pb::request::PipeCollector {
            name: name.into(),
            max,
        })),
    }
}

/// One remote sandbox server.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Runs one command and returns its results.
    async fn exec(&self, request: pb::Request) -> Result<pb::Response>;

    /// Uploads a file into the sandbox cache, returning its id.
    async fn file_add(&self, name: String, content: Vec<u8>) -> Result<String>;

    /// Downloads a cached file.
    async fn file_get(&self, file_id: &str) -> Result<Vec<u8>>;

    /// Removes a cached file.
    async fn file_delete(&self, file_id: &str) -> Result<()>;

    /// Lists cached files as id -> name.
    async fn file_list(&self) -> Result<HashMap<String, String>>;
}

/// Adds `authorization: Bearer <token>` to every call when configured.
#[derive(Clone)]
pub struct AuthInterceptor {
    token: Option<MetadataValue<Ascii>>,
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: tonic::Request<()>) -> Result<tonic::Request<()>, tonic::Status> {
        if let Some(token) = &self.token {
            request.metadata_mut().insert("authorization", token.clone());
        }
        Ok(request)
    }
}

/// gRPC client for one sandbox server.
#[derive(Clone)]
pub struct SandboxClient {
    client: ExecutorClient<InterceptedService<Channel, AuthInterceptor>>,
}

impl SandboxClient {
    /// Creates a client for `host` (host:port). The connection is
    /// established lazily and is insecure; authentication, if any, is the
    /// bearer token.
    pub fn connect(host: &str, token: Option<&str>) -> Result<Self> {
        let channel = Endpoint::from_shared(format!("http://{host}"))
            .with_context(|| format!("invalid sandbox address '{host}'"))?
            .connect_lazy();
        let token = token
            .map(|t| {
                MetadataValue::try_from(format!("Bearer {t}"))
                    .context("invalid sandbox token")
            })
            .transpose()?;
        Ok(Self {
            client: ExecutorClient::with_interceptor(channel, AuthInterceptor { token }),
        })
    }
}

#[async_trait]
impl Sandbox for SandboxClient {
    async fn exec(&self, request: pb::Request) -> Result<pb::Response> {
        let mut client = self.client.clone();
        let response = client.exec(request).await.context("sandbox exec failed")?;
        Ok(response.into_inner())
    }

    async fn file_add(&self, name: String, content: Vec<u8>) -> Result<String> {
        let mut client = self.client.clone();
        let response = client
            .file_add(pb::FileContent { name, content })
            .await
            .context("sandbox file add failed")?;
        Ok(response.into_inner().file_id)
    }

    async fn file_get(&self, file_id: &str) -> Result<Vec<u8>> {
        let mut client = self.client.clone();
        let response = client
            .file_get(pb::FileId {
                file_id: file_id.to_string(),
            })
            .await
            .with_context(|| format!("sandbox file get '{file_id}' failed"))?;
        Ok(response.into_inner().content)
    }

    async fn file_delete(&self, file_id: &str) -> Result<()> {
        let mut client = self.client.clone();
        client
            .file_delete(pb::FileId {
                file_id: file_id.to_string(),
            })
            .await
            .with_context(|| format!("sandbox file delete '{file_id}' failed"))?;
        Ok(())
    }

    async fn file_list(&self) -> Result<HashMap<String, String>> {
        let mut client = self.client.clone();
        let response = client
            .file_list(pb::Empty {})
            .await
            .context("sandbox file list failed")?;
        Ok(response.into_inner().file_ids)
    }
}
