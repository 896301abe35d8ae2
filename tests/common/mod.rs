//! Shared helpers for integration tests

use lopdf::{dictionary, Dictionary, Document, Object, Stream};

/// Builds a valid PDF with `pages` pages whose content streams read
/// `(<label> page <n>)`.
pub fn labeled_pdf(label: &str, pages: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();

    for i in 0..pages {
        let content = format!("BT /F1 12 Tf 72 720 Td ({} page {}) Tj ET", label, i + 1);
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842),
            ],
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
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut data = Vec::new();
    doc.save_to(&mut data).expect("serialize test PDF");
    data
}

/// Page texts of the PDF at `path`, in page order.
pub fn page_texts(path: &std::path::Path) -> Vec<String> {
    let doc = Document::load(path).expect("load merged PDF");
    doc.get_pages()
        .values()
        .map(|id| String::from_utf8_lossy(&doc.get_page_content(*id).expect("page content")).into_owned())
        .collect()
}
