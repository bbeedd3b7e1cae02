use std::io::Write;

use book_distill::chunk;
use book_distill::extract::extract_text;
use book_distill::models::DocumentFormat;

/// Builds a PDF with one page per entry; an empty entry gives a page without text.
/// Writes body then xref with correct byte offsets so the parsers accept it.
fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut offsets = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");

    let kids: Vec<String> = (0..pages.len()).map(|i| format!("{} 0 R", 4 + 2 * i)).collect();
    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "2 0 obj << /Type /Pages /Kids [{}] /Count {} >> endobj\n",
            kids.join(" "),
            pages.len()
        )
        .as_bytes(),
    );
    offsets.push(out.len());
    out.extend_from_slice(b"3 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");

    for (i, text) in pages.iter().enumerate() {
        let page_id = 4 + 2 * i;
        let content_id = page_id + 1;
        let content = if text.is_empty() {
            String::new()
        } else {
            format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", text)
        };
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 3 0 R >> >> >> endobj\n",
                page_id, content_id
            )
            .as_bytes(),
        );
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
                content_id,
                content.len(),
                content
            )
            .as_bytes(),
        );
    }

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", offsets.len() + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            offsets.len() + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

fn chapter(title: &str, body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>{title}</title>\
         <style>p {{ color: red; }}</style></head>\
         <body><h1>{title}</h1><p>{body}</p></body></html>"
    )
}

const CONTAINER_XML: &str = "<?xml version=\"1.0\"?>\
     <container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\
     <rootfiles><rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/></rootfiles>\
     </container>";

fn package(manifest: &str, spine: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?>\
         <package xmlns=\"http://www.idpf.org/2007/opf\" version=\"3.0\">\
         <manifest>{manifest}</manifest><spine>{spine}</spine></package>"
    )
}

fn zip_entries(files: &[(&str, String)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        let opts = zip::write::SimpleFileOptions::default();
        for (name, body) in files {
            zip.start_file(*name, opts).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

/// An EPUB whose spine reads ch2 before ch1 and references an item that is
/// not in the archive.
fn epub_with_spine() -> Vec<u8> {
    zip_entries(&[
        ("mimetype", "application/epub+zip".to_string()),
        ("META-INF/container.xml", CONTAINER_XML.to_string()),
        (
            "OEBPS/content.opf",
            package(
                "<item id=\"c1\" href=\"text/ch1.xhtml\" media-type=\"application/xhtml+xml\"/>\
                 <item id=\"c2\" href=\"text/ch2.xhtml\" media-type=\"application/xhtml+xml\"/>\
                 <item id=\"gone\" href=\"text/missing.xhtml\" media-type=\"application/xhtml+xml\"/>",
                "<itemref idref=\"c2\"/><itemref idref=\"gone\"/><itemref idref=\"c1\"/>",
            ),
        ),
        ("OEBPS/text/ch1.xhtml", chapter("Chapter One", "Habits compound.")),
        ("OEBPS/text/ch2.xhtml", chapter("Preface", "Why this book exists.")),
    ])
}

#[test]
fn epub_follows_spine_order_and_skips_missing_items() {
    let text = extract_text(&epub_with_spine(), DocumentFormat::Epub);

    let preface = text.find("Why this book exists.").expect("preface text");
    let chapter_one = text.find("Habits compound.").expect("chapter one text");
    assert!(preface < chapter_one, "spine order not respected: {}", text);
    assert!(!text.contains("color: red"), "style leaked: {}", text);
    assert!(!text.contains("<p>"));
}

#[test]
fn epub_text_chunks_like_any_other_text() {
    let text = extract_text(&epub_with_spine(), DocumentFormat::Epub);
    let chunks = chunk::split(&text, 30);
    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.text.chars().count() <= 30));
    assert_eq!(chunks[0].index, 0);
}

#[test]
fn pdf_text_is_extracted() {
    let text = extract_text(&pdf_with_pages(&["focused work phrase"]), DocumentFormat::Pdf);
    assert!(text.contains("focused work phrase"), "got: {:?}", text);
}

#[test]
fn pdf_reads_every_page() {
    let text = extract_text(
        &pdf_with_pages(&["first page phrase", "second page phrase", "third page phrase"]),
        DocumentFormat::Pdf,
    );
    for phrase in ["first page phrase", "second page phrase", "third page phrase"] {
        assert!(text.contains(phrase), "missing {:?} in {:?}", phrase, text);
    }
}

#[test]
fn pdf_without_text_is_empty() {
    let text = extract_text(&pdf_with_pages(&[""]), DocumentFormat::Pdf);
    assert!(text.trim().is_empty(), "got: {:?}", text);
}

#[test]
fn epub_escaped_hrefs_match_archive_names() {
    let epub = zip_entries(&[
        ("mimetype", "application/epub+zip".to_string()),
        ("META-INF/container.xml", CONTAINER_XML.to_string()),
        (
            "OEBPS/content.opf",
            package(
                "<item id=\"c1\" href=\"Text/Chapter%201.xhtml\" media-type=\"application/xhtml+xml\"/>",
                "<itemref idref=\"c1\"/>",
            ),
        ),
        ("OEBPS/Text/Chapter 1.xhtml", chapter("Chapter 1", "Spaces in file names.")),
    ]);

    let text = extract_text(&epub, DocumentFormat::Epub);
    assert!(text.contains("Spaces in file names."), "got: {:?}", text);
}

#[test]
fn epub_unresolvable_spine_falls_back_to_archive_order() {
    let epub = zip_entries(&[
        ("mimetype", "application/epub+zip".to_string()),
        ("META-INF/container.xml", CONTAINER_XML.to_string()),
        (
            "OEBPS/content.opf",
            package(
                "<item id=\"a\" href=\"renamed/a.xhtml\" media-type=\"application/xhtml+xml\"/>\
                 <item id=\"b\" href=\"renamed/b.xhtml\" media-type=\"application/xhtml+xml\"/>",
                "<itemref idref=\"a\"/><itemref idref=\"b\"/>",
            ),
        ),
        ("OEBPS/b.xhtml", chapter("Second", "Later argument.")),
        ("OEBPS/a.xhtml", chapter("First", "Opening argument.")),
    ]);

    let text = extract_text(&epub, DocumentFormat::Epub);
    let first = text.find("Opening argument.").expect("first entry text");
    let second = text.find("Later argument.").expect("second entry text");
    assert!(first < second, "archive name order not used: {}", text);
}
