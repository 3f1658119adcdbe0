use anyhow::{Context, Result};
use bytes::Bytes;
use chunkyard_core::UploadOutcome;
use chunkyard_core::wire::{self, fields};
use futures::Stream;
use reqwest::Url;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, de::DeserializeOwned};

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

/// One chunk of a resumable upload.
pub struct ChunkRequest<'a> {
    pub fingerprint: &'a str,
    pub index: u64,
    pub total: u64,
    pub file_name: &'a str,
    pub bucket: Option<&'a str>,
    pub data: Bytes,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("failed to build API URL")
    }

    async fn send_text(&self, req: reqwest::RequestBuilder) -> Result<String> {
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("API error ({}): {}", status, body);
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let body = self.send_text(req).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn send_empty(&self, req: reqwest::RequestBuilder) -> Result<()> {
        self.send_text(req).await.map(|_| ())
    }

    /// Submit one chunk and decode the server's answer.
    pub async fn upload_chunk(&self, chunk: ChunkRequest<'_>) -> Result<UploadOutcome> {
        let url = self.url("/objects/chunked")?;
        let part = Part::bytes(chunk.data.to_vec()).file_name("blob");
        let mut form = Form::new()
            .part(fields::FILE, part)
            .text(fields::SLICE_INDEX, chunk.index.to_string())
            .text(fields::TOTAL_PIECES, chunk.total.to_string())
            .text(fields::FILE_NAME, chunk.file_name.to_string())
            .text(fields::FINGERPRINT, chunk.fingerprint.to_string());
        if let Some(bucket) = chunk.bucket {
            form = form.text(fields::BUCKET, bucket.to_string());
        }

        let body = self.send_text(self.http.post(url).multipart(form)).await?;
        wire::decode_outcome(&body).context("unexpected chunk response")
    }

    /// Upload a whole file in one request.
    pub async fn upload_object(
        &self,
        file_name: &str,
        data: Bytes,
        bucket: Option<&str>,
        rename: bool,
    ) -> Result<ObjectLocation> {
        let mut url = self.url("/objects")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("rename", if rename { "true" } else { "false" });
            if let Some(bucket) = bucket {
                query.append_pair("bucket", bucket);
            }
        }
        let part = Part::bytes(data.to_vec()).file_name(file_name.to_string());
        let form = Form::new().part(fields::FILE, part);
        self.send_json(self.http.post(url).multipart(form)).await
    }

    /// Stream an object's content.
    pub async fn download(
        &self,
        bucket: Option<&str>,
        file_name: &str,
    ) -> Result<impl Stream<Item = reqwest::Result<Bytes>> + use<>> {
        let mut url = self.url("/objects/download")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("fileName", file_name);
            if let Some(bucket) = bucket {
                query.append_pair("bucket", bucket);
            }
        }
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }
        Ok(response.bytes_stream())
    }

    pub async fn list_objects(&self, bucket: Option<&str>) -> Result<Vec<String>> {
        let mut url = self.url("/objects")?;
        if let Some(bucket) = bucket {
            url.query_pairs_mut().append_pair("bucket", bucket);
        }
        self.send_json(self.http.get(url)).await
    }

    pub async fn delete_object(&self, bucket: Option<&str>, file_name: &str) -> Result<()> {
        let mut url = self.url("/objects")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("fileName", file_name);
            if let Some(bucket) = bucket {
                query.append_pair("bucket", bucket);
            }
        }
        self.send_empty(self.http.delete(url)).await
    }

    pub async fn stat_object(&self, bucket: Option<&str>, object: &str) -> Result<ObjectStat> {
        let mut url = self.url("/objects/stat")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("objectName", object);
            if let Some(bucket) = bucket {
                query.append_pair("bucket", bucket);
            }
        }
        self.send_json(self.http.get(url)).await
    }

    pub async fn presigned_url(
        &self,
        bucket: Option<&str>,
        object: &str,
        expires_secs: u64,
    ) -> Result<String> {
        let mut url = self.url("/objects/presigned")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("objectName", object);
            query.append_pair("expires", &expires_secs.to_string());
            if let Some(bucket) = bucket {
                query.append_pair("bucket", bucket);
            }
        }
        let response: PresignedResponse = self.send_json(self.http.get(url)).await?;
        Ok(response.url)
    }

    pub async fn list_buckets(&self) -> Result<Vec<BucketEntry>> {
        let url = self.url("/buckets")?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut url = self.url("/buckets")?;
        url.query_pairs_mut().append_pair("bucket", bucket);
        self.send_empty(self.http.post(url)).await
    }

    pub async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let mut url = self.url("/buckets")?;
        url.query_pairs_mut().append_pair("bucket", bucket);
        self.send_empty(self.http.delete(url)).await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.url("/health")?;
        self.send_json(self.http.get(url)).await
    }
}

#[derive(Debug, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub object: String,
}

#[derive(Debug, Deserialize)]
pub struct ObjectStat {
    pub bucket: String,
    pub object: String,
    pub size: u64,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PresignedResponse {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct BucketEntry {
    pub name: String,
    pub created: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend: String,
    pub version: String,
}
