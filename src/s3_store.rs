use crate::blob_store::{BlobEntry, BlobFetcher, BlobWriter};
use crate::{PostprocessError, Result};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::{Client, primitives::ByteStream, types::Object};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// One S3 bucket used as a blob container
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    prefix: String,
    runtime: Arc<Runtime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3StoreConfig {
    pub bucket: String,
    pub region: String,
    pub prefix: String,
    pub endpoint: Option<String>,
}

impl S3StoreConfig {
    /// Settings for the bucket named after `container`
    pub fn from_env(container: &str) -> Self {
        let region = std::env::var("RT_S3_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let prefix = std::env::var("RT_S3_PREFIX").unwrap_or_default();
        let endpoint = std::env::var("RT_S3_ENDPOINT").ok().filter(|e| !e.is_empty());

        Self {
            bucket: container.to_string(),
            region,
            prefix,
            endpoint,
        }
    }
}

impl S3BlobStore {
    pub fn new(config: S3StoreConfig) -> Result<Self> {
        let runtime = Runtime::new().map_err(|e| PostprocessError::Other(format!("tokio runtime error: {}", e)))?;
        let region = Region::new(config.region.clone());
        let base_config = runtime.block_on(aws_config::defaults(BehaviorVersion::latest()).region(region.clone()).load());

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&base_config).region(region);
        if let Some(endpoint) = &config.endpoint {
            s3_builder = s3_builder.endpoint_url(endpoint);
            s3_builder = s3_builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(s3_builder.build()),
            bucket: config.bucket,
            prefix: config.prefix,
            runtime: Arc::new(runtime),
        })
    }

    pub fn from_env(container: &str) -> Result<Self> {
        Self::new(S3StoreConfig::from_env(container))
    }

    fn list_objects(&self, prefix: &str) -> Result<Vec<Object>> {
        let mut token: Option<String> = None;
        let mut objects = Vec::new();
        let prefixed_prefix = self.prefixed(prefix);

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefixed_prefix.clone());
            if let Some(ref cont) = token {
                request = request.continuation_token(cont);
            }

            let resp = self
                .runtime
                .block_on(request.send())
                .map_err(|e| PostprocessError::Blob(format!("S3 list {}/{}: {}", self.bucket, prefix, e)))?;
            objects.extend(resp.contents().iter().cloned());

            if resp.is_truncated().unwrap_or(false) {
                token = resp.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        Ok(objects)
    }

    fn put(&self, path: &str, body: ByteStream, overwrite: bool) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.prefixed(path))
            .content_type(content_type(path))
            .body(body);
        // Conditional write: S3 rejects the put if the key already exists
        if !overwrite {
            request = request.if_none_match("*");
        }

        self.runtime.block_on(request.send()).map_err(|e| {
            if e.code() == Some("PreconditionFailed") {
                PostprocessError::BlobExists(self.location(path))
            } else {
                PostprocessError::Blob(format!("S3 put {}: {}", self.location(path), e))
            }
        })?;
        Ok(())
    }

    fn prefixed(&self, key: &str) -> String {
        let clean = key.trim_start_matches('/');
        if self.prefix.is_empty() {
            clean.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), clean)
        }
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            return key;
        }
        key.strip_prefix(&format!("{}/", self.prefix.trim_end_matches('/')))
            .unwrap_or(key)
    }
}

impl BlobFetcher for S3BlobStore {
    fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let resp = self
            .runtime
            .block_on(
                self.client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(self.prefixed(path))
                    .send(),
            )
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    PostprocessError::BlobNotFound(self.location(path))
                } else {
                    PostprocessError::Blob(format!("S3 get {}: {}", self.location(path), e))
                }
            })?;

        let data = self
            .runtime
            .block_on(resp.body.collect())
            .map_err(|e| PostprocessError::Blob(format!("S3 read {}: {}", self.location(path), e)))?
            .to_vec();
        Ok(data)
    }

    fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>> {
        let mut entries: Vec<BlobEntry> = self
            .list_objects(prefix)?
            .iter()
            .filter_map(|object| {
                let key = object.key()?;
                let modified = object.last_modified()?;
                Some(BlobEntry {
                    name: self.strip_prefix(key).to_string(),
                    created: DateTime::<Utc>::from_timestamp(modified.secs(), modified.subsec_nanos())?,
                    size: object.size().unwrap_or_default().max(0) as u64,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

impl BlobWriter for S3BlobStore {
    fn write(&self, path: &str, bytes: &[u8], overwrite: bool) -> Result<()> {
        self.put(path, ByteStream::from(bytes.to_vec()), overwrite)
    }

    fn upload_file(&self, path: &str, local: &Path, overwrite: bool) -> Result<()> {
        let body = self
            .runtime
            .block_on(ByteStream::from_path(local))
            .map_err(|e| PostprocessError::Blob(format!("read {}: {}", local.display(), e)))?;
        self.put(path, body, overwrite)
    }

    fn location(&self, path: &str) -> String {
        format!("s3://{}/{}", self.bucket, self.prefixed(path))
    }
}

fn content_type(path: &str) -> &'static str {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("csv") => "text/csv",
        Some("html") => "text/html",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}
