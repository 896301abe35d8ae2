use colored::*;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};

const PDF_SUFFIX: &str = ".pdf";

/// Scrapes a page for hyperlinks that point at PDF files.
#[derive(Debug, Clone)]
pub struct LinkCollector {
    client: Client,
}

impl LinkCollector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Fetches `page_url` and returns the `href` of every anchor ending in `.pdf`,
    /// in document order, duplicates included.
    ///
    /// An empty vector is a valid result; deciding what to do about it is up to
    /// the caller.
    pub async fn collect_links(&self, page_url: &str) -> Result<Vec<String>> {
        info!("Visiting \"{}\"", page_url.green());

        let response = self
            .client
            .get(page_url)
            .send()
            .await
            .map_err(|e| Error::fetch(page_url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(page_url, format!("HTTP {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::fetch(page_url, e))?;

        let links = extract_pdf_links(&body);
        debug!("Collected {} PDF links from {}", links.len(), page_url);
        Ok(links)
    }
}

/// Returns the `href` of every `<a>` whose value ends with `.pdf`, in document order.
pub fn extract_pdf_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("static selector is valid");

    document
        .select(&selector)
        .filter_map(|element| element.value().attr("href"))
        .filter(|href| href.ends_with(PDF_SUFFIX))
        .map(str::to_string)
        .collect()
}

/// Resolves scraped hrefs against the page they came from.
///
/// Absolute hrefs come back unchanged apart from URL normalisation.
pub fn resolve_links(page_url: &str, hrefs: &[String]) -> Result<Vec<String>> {
    let base = Url::parse(page_url).map_err(|e| Error::InvalidUrl {
        url: page_url.to_string(),
        reason: e.to_string(),
    })?;

    hrefs
        .iter()
        .map(|href| {
            base.join(href)
                .map(|url| url.to_string())
                .map_err(|e| Error::InvalidUrl {
                    url: href.clone(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
            <a href="https://example.com/files/first.pdf">first</a>
            <a href="/docs/readme.html">not a pdf</a>
            <p><a href="second.pdf">second</a></p>
            <a>no href</a>
            <a href="https://example.com/files/first.pdf">again</a>
            <a href="upper.PDF">wrong case</a>
            <a href="third.pdf?download=1">query string</a>
        </body></html>
    "#;

    #[test]
    fn test_extract_keeps_document_order_and_duplicates() {
        let links = extract_pdf_links(PAGE);
        assert_eq!(
            links,
            vec![
                "https://example.com/files/first.pdf",
                "second.pdf",
                "https://example.com/files/first.pdf",
            ]
        );
    }

    #[test]
    fn test_extract_without_links_is_empty() {
        assert!(extract_pdf_links("<html><body><p>nothing here</p></body></html>").is_empty());
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let hrefs = vec![
            "second.pdf".to_string(),
            "/root.pdf".to_string(),
            "https://cdn.example.org/x.pdf".to_string(),
        ];
        let resolved = resolve_links("https://example.com/worksheets/index.html", &hrefs).unwrap();
        assert_eq!(
            resolved,
            vec![
                "https://example.com/worksheets/second.pdf",
                "https://example.com/root.pdf",
                "https://cdn.example.org/x.pdf",
            ]
        );
    }

    #[test]
    fn test_resolve_rejects_bad_base() {
        let err = resolve_links("not a url", &["a.pdf".to_string()]).unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_collect_links_from_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/page")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(PAGE)
            .create_async()
            .await;

        let collector = LinkCollector::new(Client::new());
        let links = collector
            .collect_links(&format!("{}/page", server.url()))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(links.len(), 3);
        assert_eq!(links[1], "second.pdf");
    }

    #[tokio::test]
    async fn test_collect_links_non_success_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let url = format!("{}/missing", server.url());
        let err = LinkCollector::new(Client::new())
            .collect_links(&url)
            .await
            .unwrap_err();

        match err {
            Error::Fetch { url: failed, reason } => {
                assert_eq!(failed, url);
                assert!(reason.contains("404"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
