use colored::*;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use slug::slugify;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::pdf_merger::sanitize_filename;

/// Where a fetched body lives until the merge consumes it.
#[derive(Debug, Clone)]
pub enum DocumentBody {
    Memory(Vec<u8>),
    Disk(PathBuf),
}

/// A downloaded PDF together with the link it came from.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub link: String,
    pub content_type: Option<String>,
    pub body: DocumentBody,
}

/// Builds the HTTP client shared by the collector and the fetcher.
///
/// A zero timeout means no timeout.
pub fn http_client(timeout: Duration) -> Result<Client> {
    let mut builder = Client::builder().user_agent(concat!(
        env!("CARGO_PKG_NAME"),
        "/",
        env!("CARGO_PKG_VERSION")
    ));

    if !timeout.is_zero() {
        builder = builder.timeout(timeout);
    }

    Ok(builder.build()?)
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Downloads the raw bytes behind `url`.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.request(url).await?;
        read_body(url, response).await
    }

    /// Like [`Fetcher::fetch`], but rejects responses whose `Content-Type`
    /// does not mention `pdf` before reading the body.
    pub async fn fetch_validated(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.request(url).await?;
        check_content_type(url, declared_content_type(&response).as_deref())?;
        read_body(url, response).await
    }

    /// Fetches `url` into memory, recording the declared content type.
    pub async fn fetch_document(&self, url: &str, validate: bool) -> Result<FetchedDocument> {
        info!("Downloading \"{}\"", url.green());

        let response = self.request(url).await?;
        let content_type = declared_content_type(&response);
        if validate {
            check_content_type(url, content_type.as_deref())?;
        }
        let bytes = read_body(url, response).await?;
        debug!("Fetched {} bytes from {}", bytes.len(), url);

        Ok(FetchedDocument {
            link: url.to_string(),
            content_type,
            body: DocumentBody::Memory(bytes),
        })
    }

    async fn request(&self, url: &str) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::fetch(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(url, format!("HTTP {}", status)));
        }

        Ok(response)
    }
}

fn declared_content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn check_content_type(url: &str, content_type: Option<&str>) -> Result<()> {
    match content_type {
        Some(value) if value.contains("pdf") => Ok(()),
        other => Err(Error::InvalidContentType {
            url: url.to_string(),
            content_type: other.unwrap_or("none").to_string(),
        }),
    }
}

async fn read_body(url: &str, response: Response) -> Result<Vec<u8>> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::fetch(url, e))?;
    Ok(bytes.to_vec())
}

/// Filename a download is stored under: the trailing path segment of the URL.
///
/// Falls back to a slug of the whole URL when the path has no usable segment.
pub fn download_filename(url: &str) -> String {
    let segment = Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .unwrap_or_else(|| url.rsplit('/').next().unwrap_or_default().to_string());

    let name = sanitize_filename(&segment);
    if name.is_empty() || name == "." || name == ".." {
        format!("{}.pdf", slugify(url))
    } else {
        name
    }
}

/// Moves an in-memory document to `dir/filename`, creating `dir` as needed.
///
/// Documents already on disk are returned unchanged.
pub async fn store_on_disk(
    document: FetchedDocument,
    dir: &Path,
    filename: &str,
) -> Result<FetchedDocument> {
    let bytes = match document.body {
        DocumentBody::Memory(bytes) => bytes,
        DocumentBody::Disk(_) => return Ok(document),
    };

    fs::create_dir_all(dir).await?;
    let path = dir.join(filename);
    fs::write(&path, &bytes).await?;
    info!("Downloaded: {}", path.display().to_string().blue());

    Ok(FetchedDocument {
        body: DocumentBody::Disk(path),
        ..document
    })
}
