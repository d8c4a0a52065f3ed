//! Archived test data in the blob store.
//!
//! Each problem gets a bucket named after its id; object keys are the
//! materialized file paths (`<prefix>.in`, `<prefix>.ans`). A successful
//! build replaces the bucket contents wholesale: clear, then upload every
//! test case in parallel under one cancellation scope, first error wins.

use anyhow::{anyhow, Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use std::collections::HashMap;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::memfs::MemFs;

use super::testgroup::TestGroup;

/// S3/MinIO client for archived test data.
#[derive(Clone)]
pub struct StorageClient {
    client: Client,
}

impl StorageClient {
    pub fn from_config(conf: &StorageConfig) -> Self {
        let protocol = if conf.use_ssl { "https" } else { "http" };
        let endpoint_url = format!("{}://{}:{}", protocol, conf.endpoint, conf.port);

        info!("Using blob storage at {}", endpoint_url);

        let credentials = Credentials::new(
            conf.access_key.clone(),
            conf.secret_key.clone(),
            None,
            None,
            "probuild",
        );

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(&endpoint_url)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(config),
        }
    }

    /// Creates the bucket unless it already exists.
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        if self
            .client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .is_ok()
        {
            return Ok(());
        }
        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .with_context(|| format!("failed to create bucket '{bucket}'"))?;
        Ok(())
    }

    pub async fn put(&self, bucket: &str, key: &str, content: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(content))
            .send()
            .await
            .with_context(|| format!("failed to upload '{key}'"))?;
        Ok(())
    }

    pub async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to download '{key}'"))?;
        let data = response.body.collect().await?;
        Ok(data.into_bytes().to_vec())
    }

    /// Lists every object key in the bucket.
    pub async fn list(&self, bucket: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket);
            if let Some(token) = continuation {
                request = request.continuation_token(token);
            }
            let response = request
                .send()
                .await
                .with_context(|| format!("failed to list bucket '{bucket}'"))?;
            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }

    pub async fn bulk_delete(&self, bucket: &str, keys: Vec<String>) -> Result<()> {
        for chunk in keys.chunks(1000) {
            let objects = chunk
                .iter()
                .map(|key| {
                    ObjectIdentifier::builder()
                        .key(key)
                        .build()
                        .context("invalid object key")
                })
                .collect::<Result<Vec<_>>>()?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .build()
                .context("failed to build delete request")?;
            self.client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .with_context(|| format!("failed to delete objects from '{bucket}'"))?;
        }
        Ok(())
    }
}

/// Replaces the problem's archived test data with the given filesystem.
/// Uploads run in parallel per test case; the first failure cancels the
/// rest and is returned.
pub async fn save_test_data(
    storage: &StorageClient,
    problem_id: Uuid,
    test_groups: &HashMap<String, TestGroup>,
    fs: &MemFs,
) -> Result<()> {
    let bucket = problem_id.to_string();
    storage.ensure_bucket(&bucket).await?;

    let existing = storage.list(&bucket).await?;
    if !existing.is_empty() {
        debug!("clearing {} stale objects from '{bucket}'", existing.len());
        storage.bulk_delete(&bucket, existing).await?;
    }

    let scope = CancellationToken::new();
    let mut uploads = JoinSet::new();
    for group in test_groups.values() {
        for test in &group.tests {
            for path in [test.inf_path(), test.ans_path()] {
                let content = fs.read(&path)?.to_vec();
                let storage = storage.clone();
                let bucket = bucket.clone();
                let scope = scope.clone();
                uploads.spawn(async move {
                    tokio::select! {
                        _ = scope.cancelled() => Err(anyhow!("upload of '{path}' cancelled")),
                        result = storage.put(&bucket, &path, content) => result,
                    }
                });
            }
        }
    }

    let mut first_error = None;
    while let Some(joined) = uploads.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(err) => Err(anyhow!("upload task panicked: {err}")),
        };
        if let Err(err) = result {
            scope.cancel();
            if first_error.is_none() {
                first_error = Some(err);
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Loads the problem's archived test data into a filesystem.
#[allow(dead_code)]
pub async fn load_test_data(
    storage: &StorageClient,
    problem_id: Uuid,
    test_groups: &HashMap<String, TestGroup>,
    fs: &mut MemFs,
) -> Result<()> {
    let bucket = problem_id.to_string();
    for group in test_groups.values() {
        for test in &group.tests {
            for path in [test.inf_path(), test.ans_path()] {
                let content = storage.get(&bucket, &path).await?;
                fs.write(path, content);
            }
        }
    }
    Ok(())
}
