use colored::*;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fetcher::{DocumentBody, FetchedDocument};

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"Resources", b"CropBox", b"Rotate"];

/// Characters that are not allowed in a filename on common filesystems.
const FORBIDDEN_FILENAME_CHARS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// Outcome of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    pub output_path: PathBuf,
    pub documents: usize,
    pub pages: usize,
}

/// Collects parsed PDFs in order and writes them out as one document.
pub struct PdfMerger {
    documents: Vec<(String, Document)>,
}

impl PdfMerger {
    pub fn new() -> Self {
        Self {
            documents: Vec::new(),
        }
    }

    pub async fn add_pdf(&mut self, path: &Path) -> Result<()> {
        let data = fs::read(path)
            .await
            .map_err(|e| Error::merge(path.display(), format!("failed to read PDF: {}", e)))?;

        self.add_bytes(&path.display().to_string(), &data)
    }

    /// Parses `data` as a PDF and queues it after everything added so far.
    pub fn add_bytes(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let document = Document::load_mem(data)
            .map_err(|e| Error::merge(name, format!("not a valid PDF: {}", e)))?;

        let pages = document.get_pages().len();
        if pages == 0 {
            return Err(Error::merge(name, "PDF has no pages"));
        }

        debug!("Loaded PDF with {} pages from {}", pages, name);
        self.documents.push((name.to_string(), document));

        Ok(())
    }

    pub async fn add_document(&mut self, document: &FetchedDocument) -> Result<()> {
        match &document.body {
            DocumentBody::Memory(bytes) => self.add_bytes(&document.link, bytes),
            DocumentBody::Disk(path) => {
                let data = fs::read(path).await.map_err(|e| {
                    Error::merge(&document.link, format!("failed to read {}: {}", path.display(), e))
                })?;
                self.add_bytes(&document.link, &data)
            }
        }
    }

    /// Combines the queued documents into a single in-memory document.
    fn build(&self) -> Result<(Document, usize)> {
        if self.documents.is_empty() {
            return Err(Error::merge("output", "no PDFs added to merge"));
        }

        info!("Starting PDF merge process with {} documents", self.documents.len());

        let mut max_id = 1;
        let mut page_ids: Vec<ObjectId> = Vec::new();
        let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();

        for (i, (name, document)) in self.documents.iter().enumerate() {
            let mut doc = document.clone();
            doc.renumber_objects_with(max_id);
            max_id = doc.max_id + 1;

            let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
            debug!("Processing document {}: {} with {} pages", i + 1, name, pages.len());

            for &page_id in &pages {
                inherit_page_attributes(&mut doc, page_id);
            }
            page_ids.extend(pages);

            objects.extend(
                doc.objects
                    .into_iter()
                    .filter(|(_, object)| !is_page_tree_root(object)),
            );
        }

        info!("Total pages collected: {}", page_ids.len());

        let mut merged = Document::with_version("1.5");
        merged.objects.extend(objects);
        merged.max_id = max_id - 1;

        let pages_id = merged.new_object_id();
        let catalog_id = merged.new_object_id();

        let mut pages = Dictionary::new();
        pages.set("Type", Object::Name(b"Pages".to_vec()));
        pages.set("Count", Object::Integer(page_ids.len() as i64));
        pages.set(
            "Kids",
            Object::Array(page_ids.iter().copied().map(Object::Reference).collect()),
        );

        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog.set("Pages", Object::Reference(pages_id));

        merged.objects.insert(pages_id, Object::Dictionary(pages));
        merged.objects.insert(catalog_id, Object::Dictionary(catalog));
        merged.trailer.set("Root", Object::Reference(catalog_id));

        for &page_id in &page_ids {
            if let Ok(Object::Dictionary(page)) = merged.get_object_mut(page_id) {
                page.set("Parent", Object::Reference(pages_id));
            }
        }

        merged.compress();
        Ok((merged, page_ids.len()))
    }

    /// Writes the merged document to `output_path`.
    ///
    /// The document is serialised in memory and written to a sibling `.part`
    /// file that is renamed into place, so a failed save leaves no output.
    pub async fn save(&self, output_path: &Path) -> Result<MergeResult> {
        let (mut merged, pages) = self.build()?;

        let mut data = Vec::new();
        merged
            .save_to(&mut data)
            .map_err(|e| Error::merge(output_path.display(), format!("failed to serialize: {}", e)))?;

        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::merge(output_path.display(), format!("failed to create directory: {}", e))
            })?;
        }

        let part_path = part_path(output_path);
        if let Err(e) = write_then_rename(&part_path, output_path, &data).await {
            if fs::remove_file(&part_path).await.is_ok() {
                debug!("Removed partial output {}", part_path.display());
            }
            return Err(Error::merge(output_path.display(), format!("failed to write: {}", e)));
        }

        info!(
            "Successfully merged {} PDFs ({} pages) into {}",
            self.documents.len(),
            pages,
            output_path.display().to_string().green()
        );

        Ok(MergeResult {
            output_path: output_path.to_path_buf(),
            documents: self.documents.len(),
            pages,
        })
    }
}

impl Default for PdfMerger {
    fn default() -> Self {
        Self::new()
    }
}

/// Merges `documents` in the order given and writes the result to `output_path`.
pub async fn merge(documents: &[FetchedDocument], output_path: &Path) -> Result<MergeResult> {
    let mut merger = PdfMerger::new();
    for document in documents {
        merger.add_document(document).await?;
    }
    merger.save(output_path).await
}

/// Number of pages in the PDF at `path`.
pub async fn count_pages(path: &Path) -> Result<usize> {
    let data = fs::read(path).await?;
    let document = Document::load_mem(&data)
        .map_err(|e| Error::merge(path.display(), format!("not a valid PDF: {}", e)))?;
    Ok(document.get_pages().len())
}

/// Strips `\ / * ? : " < > |` from a user-supplied filename.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !FORBIDDEN_FILENAME_CHARS.contains(c))
        .collect()
}

fn part_path(output_path: &Path) -> PathBuf {
    let file_name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "merged.pdf".to_string());
    output_path.with_file_name(format!(".{}.part", file_name))
}

async fn write_then_rename(part_path: &Path, output_path: &Path, data: &[u8]) -> std::io::Result<()> {
    fs::write(part_path, data).await?;
    fs::rename(part_path, output_path).await
}

fn is_page_tree_root(object: &Object) -> bool {
    match object {
        Object::Dictionary(dict) => matches!(
            dict.get(b"Type").and_then(Object::as_name),
            Ok(b"Catalog") | Ok(b"Pages")
        ),
        _ => false,
    }
}

/// Copies attributes a page inherits from its page-tree ancestors onto the page
/// itself, so they survive re-parenting into the merged tree.
fn inherit_page_attributes(doc: &mut Document, page_id: ObjectId) {
    let mut inherited: Vec<(&[u8], Object)> = Vec::new();

    {
        let Ok(page) = doc.get_dictionary(page_id) else {
            warn!("Page {:?} is not a dictionary", page_id);
            return;
        };

        let mut missing: Vec<&[u8]> = INHERITABLE
            .iter()
            .copied()
            .filter(|key| !page.has(key))
            .collect();
        let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
        let mut depth = 0;

        while let Some(parent_id) = parent {
            if missing.is_empty() || depth > 64 {
                break;
            }
            let Ok(node) = doc.get_dictionary(parent_id) else {
                break;
            };

            missing.retain(|key| match node.get(key) {
                Ok(value) => {
                    inherited.push((*key, value.clone()));
                    false
                }
                Err(_) => true,
            });

            parent = node.get(b"Parent").and_then(Object::as_reference).ok();
            depth += 1;
        }
    }

    if inherited.is_empty() {
        return;
    }

    if let Ok(Object::Dictionary(page)) = doc.get_object_mut(page_id) {
        for (key, value) in inherited {
            page.set(key.to_vec(), value);
        }
    }
}

/// Builds a minimal valid PDF with `pages` blank pages.
#[cfg(test)]
pub(crate) fn sample_pdf(pages: usize) -> Vec<u8> {
    use lopdf::{dictionary, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();

    for i in 0..pages {
        let content = format!("BT /F1 12 Tf 72 720 Td (page {}) Tj ET", i + 1);
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842),
            ],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut data = Vec::new();
    doc.save_to(&mut data).unwrap();
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn memory_doc(link: &str, bytes: Vec<u8>) -> FetchedDocument {
        FetchedDocument {
            link: link.to_string(),
            content_type: Some("application/pdf".to_string()),
            body: DocumentBody::Memory(bytes),
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a/b:c*d"), "abcd");
        assert_eq!(sanitize_filename(r#"q?u"o<t>e|s\"#), "quotes");
        assert_eq!(sanitize_filename("漢字ドリル 2年"), "漢字ドリル 2年");
    }

    #[test]
    fn test_part_path_is_hidden_sibling() {
        let part = part_path(Path::new("/tmp/out/merged.pdf"));
        assert_eq!(part, Path::new("/tmp/out/.merged.pdf.part"));
    }

    #[tokio::test]
    async fn test_merge_page_count_is_sum() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("nested").join("merged.pdf");
        let documents = vec![
            memory_doc("a", sample_pdf(1)),
            memory_doc("b", sample_pdf(2)),
            memory_doc("c", sample_pdf(3)),
        ];

        let result = merge(&documents, &output).await.unwrap();

        assert_eq!(result.documents, 3);
        assert_eq!(result.pages, 6);
        assert_eq!(count_pages(&output).await.unwrap(), 6);
        assert!(!part_path(&output).exists());
    }

    #[tokio::test]
    async fn test_merge_keeps_page_order_and_inherited_media_box() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("ordered.pdf");
        let documents = vec![memory_doc("a", sample_pdf(2)), memory_doc("b", sample_pdf(1))];

        merge(&documents, &output).await.unwrap();

        let merged = Document::load(&output).unwrap();
        let pages = merged.get_pages();
        assert_eq!(pages.len(), 3);
        for page_id in pages.values() {
            let page = merged.get_dictionary(*page_id).unwrap();
            assert!(page.has(b"MediaBox"));
        }

        let texts: Vec<String> = pages
            .values()
            .map(|id| String::from_utf8_lossy(&merged.get_page_content(*id).unwrap()).into_owned())
            .collect();
        assert!(texts[0].contains("page 1"));
        assert!(texts[1].contains("page 2"));
        assert!(texts[2].contains("page 1"));
    }

    #[tokio::test]
    async fn test_merge_single_document() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("single.pdf");

        let result = merge(&[memory_doc("only", sample_pdf(4))], &output).await.unwrap();
        assert_eq!(result.pages, 4);
        assert_eq!(count_pages(&output).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_invalid_source_leaves_no_output() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("broken.pdf");
        let documents = vec![
            memory_doc("good", sample_pdf(1)),
            memory_doc("https://example.com/bad.pdf", b"<html>not a pdf</html>".to_vec()),
        ];

        let err = merge(&documents, &output).await.unwrap_err();

        match err {
            Error::Merge { subject, .. } => assert_eq!(subject, "https://example.com/bad.pdf"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_unwritable_output_is_merge_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let output = blocker.join("merged.pdf");

        let err = merge(&[memory_doc("a", sample_pdf(1))], &output).await.unwrap_err();
        assert!(matches!(err, Error::Merge { .. }));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_add_pdf_from_disk() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.pdf");
        std::fs::write(&input, sample_pdf(2)).unwrap();

        let document = FetchedDocument {
            link: "https://example.com/in.pdf".to_string(),
            content_type: None,
            body: DocumentBody::Disk(input.clone()),
        };
        let output = dir.path().join("out.pdf");
        let result = merge(&[document], &output).await.unwrap();

        assert_eq!(result.pages, 2);
        assert!(input.exists());
    }

    #[tokio::test]
    async fn test_save_without_documents_fails() {
        let dir = TempDir::new().unwrap();
        let err = PdfMerger::new()
            .save(&dir.path().join("empty.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Merge { .. }));
    }
}
