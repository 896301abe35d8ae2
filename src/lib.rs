//! # pdfgather
//!
//! A CLI utility that collects the PDF files linked from a web page, or a list
//! of PDF URLs, and merges them into a single document.
//!
//! ## Current Features
//!
//! - Scraping a page for `.pdf` links in document order
//! - Downloading to a `pdfs/` directory or keeping everything in memory
//! - Optional content-type validation of each download
//! - Ordered PDF merging that never leaves a half-written output behind
//! - Persisted default save location
//!
//! ## Usage
//!
//! ```bash
//! pdfgather scrape https://example.com/worksheets/ -o worksheets.pdf
//! pdfgather urls https://example.com/a.pdf https://example.com/b.pdf --name handouts
//! ```

mod collector;
mod error;
mod fetcher;
mod pdf_merger;
mod pipeline;
mod settings;

pub use collector::{extract_pdf_links, resolve_links, LinkCollector};
pub use error::{Error, Result};
pub use fetcher::{download_filename, http_client, DocumentBody, FetchedDocument, Fetcher};
pub use pdf_merger::{count_pages, merge, sanitize_filename, MergeResult, PdfMerger};
pub use pipeline::{
    output_file_path, unique_filenames, Pipeline, PipelineConfig, SourceMode, SourceReference,
    StorageMode, DEFAULT_DOWNLOAD_DIR, DEFAULT_OUTPUT_NAME, MAX_DIRECT_URLS,
};
pub use settings::Settings;
