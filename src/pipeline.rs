use colored::*;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::collector::{resolve_links, LinkCollector};
use crate::error::{Error, Result};
use crate::fetcher::{download_filename, http_client, store_on_disk, FetchedDocument, Fetcher};
use crate::pdf_merger::{self, sanitize_filename, MergeResult};

/// Most direct URLs accepted for a single run.
pub const MAX_DIRECT_URLS: usize = 40;

pub const DEFAULT_DOWNLOAD_DIR: &str = "pdfs";
pub const DEFAULT_OUTPUT_NAME: &str = "merged.pdf";

/// Where the PDF links for a run come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceReference {
    /// A page to scrape for `.pdf` links.
    Page(String),
    /// PDF URLs entered directly, in merge order.
    DirectUrls(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    ScrapePage,
    DirectUrls,
}

impl SourceReference {
    pub fn mode(&self) -> SourceMode {
        match self {
            SourceReference::Page(_) => SourceMode::ScrapePage,
            SourceReference::DirectUrls(_) => SourceMode::DirectUrls,
        }
    }

    fn describe(&self) -> String {
        match self {
            SourceReference::Page(url) => url.clone(),
            SourceReference::DirectUrls(_) => "the URL list".to_string(),
        }
    }
}

/// Where fetched PDFs are held before the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Each PDF is written to the download directory and merged from there.
    Disk,
    /// PDFs stay in memory; only the merged output touches the filesystem.
    Memory,
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disk" => Ok(StorageMode::Disk),
            "memory" => Ok(StorageMode::Memory),
            other => Err(format!("unknown storage mode \"{}\" (expected disk or memory)", other)),
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::Disk => write!(f, "disk"),
            StorageMode::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub storage: StorageMode,
    pub download_dir: PathBuf,
    pub validate_content_type: bool,
    /// Fetches allowed in flight at once. Merge order is unaffected.
    pub jobs: usize,
    /// Per-request timeout; zero disables it.
    pub timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage: StorageMode::Disk,
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            validate_content_type: false,
            jobs: 1,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Collect, fetch, merge.
pub struct Pipeline {
    config: PipelineConfig,
    collector: LinkCollector,
    fetcher: Fetcher,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let client = http_client(config.timeout)?;
        Ok(Self {
            config,
            collector: LinkCollector::new(client.clone()),
            fetcher: Fetcher::new(client),
        })
    }

    /// Runs the whole pipeline and writes the merged PDF to `output_path`.
    ///
    /// The first failure aborts the run; nothing is merged unless every
    /// link was fetched.
    pub async fn run(&self, source: &SourceReference, output_path: &Path) -> Result<MergeResult> {
        debug!("Resolving links ({:?})", source.mode());
        let links = self.resolve(source).await?;

        if links.is_empty() {
            warn!("No PDF links found in {}", source.describe());
            return Err(Error::NoLinksFound {
                source_name: source.describe(),
            });
        }

        info!("Found {} PDF links", links.len());
        for (i, link) in links.iter().enumerate() {
            debug!("  {}: {}", i + 1, link);
        }

        let documents = self.fetch_all(&links).await?;
        pdf_merger::merge(&documents, output_path).await
    }

    /// Turns a source into the ordered list of PDF URLs to fetch.
    pub async fn resolve(&self, source: &SourceReference) -> Result<Vec<String>> {
        match source {
            SourceReference::Page(page_url) => {
                let hrefs = self.collector.collect_links(page_url).await?;
                resolve_links(page_url, &hrefs)
            }
            SourceReference::DirectUrls(urls) => direct_links(urls),
        }
    }

    /// Fetches every link, keeping input order regardless of completion order.
    pub async fn fetch_all(&self, links: &[String]) -> Result<Vec<FetchedDocument>> {
        let filenames = match self.config.storage {
            StorageMode::Disk => unique_filenames(links),
            StorageMode::Memory => Vec::new(),
        };
        let filenames = &filenames;

        let fetches = links.iter().enumerate().map(|(i, link)| async move {
            let document = self
                .fetcher
                .fetch_document(link, self.config.validate_content_type)
                .await?;

            match self.config.storage {
                StorageMode::Disk => {
                    store_on_disk(document, &self.config.download_dir, &filenames[i]).await
                }
                StorageMode::Memory => Ok(document),
            }
        });

        stream::iter(fetches)
            .buffered(self.config.jobs.max(1))
            .try_collect()
            .await
    }
}

/// Trims direct URL entries, drops blank ones and checks the rest parse.
fn direct_links(urls: &[String]) -> Result<Vec<String>> {
    urls.iter()
        .map(|url| url.trim())
        .filter(|url| !url.is_empty())
        .map(|url| {
            Url::parse(url)
                .map(|_| url.to_string())
                .map_err(|e| Error::InvalidUrl {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

/// Download filenames for `links`, prefixing an index when a name repeats.
///
/// Names are compared case-insensitively and no two entries share a name.
pub fn unique_filenames(links: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();

    links
        .iter()
        .enumerate()
        .map(|(i, link)| {
            let name = download_filename(link);
            if seen.insert(name.to_lowercase()) {
                return name;
            }

            let mut index = i + 1;
            loop {
                let renamed = format!("{:02}_{}", index, name);
                if seen.insert(renamed.to_lowercase()) {
                    debug!("Duplicate filename {}, saving as {}", name, renamed);
                    return renamed;
                }
                index += 1;
            }
        })
        .collect()
}

/// Output path for a user-entered file name inside `dir`.
///
/// The name is sanitised and gets a `.pdf` extension unless it already has one.
pub fn output_file_path(name: &str, dir: &Path) -> Result<PathBuf> {
    let mut file_name = sanitize_filename(name.trim());
    if file_name.is_empty() {
        return Err(Error::merge(
            format!("\"{}\"", name),
            "output file name is empty after removing forbidden characters",
        ));
    }

    if !file_name.to_ascii_lowercase().ends_with(".pdf") {
        file_name.push_str(".pdf");
    }

    let path = dir.join(file_name);
    debug!("Output path resolved to {}", path.display().to_string().blue());
    Ok(path)
}
