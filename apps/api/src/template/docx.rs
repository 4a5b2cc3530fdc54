//! DOCX text extraction.
//!
//! Reads the WordprocessingML parts of a .docx package and flattens them to
//! plain text: body first (paragraphs and table cells in document order),
//! then headers, then footers. Each paragraph ends with a newline.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

use crate::errors::ConversionError;

const BODY_PART: &str = "word/document.xml";

/// Flattens every text-bearing part of a DOCX package into one string.
pub fn extract_docx_text(bytes: &[u8]) -> Result<String, ConversionError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| {
        ConversionError::DocumentFormat {
            reason: format!("not a DOCX (zip) package: {e}"),
        }
    })?;

    let mut headers = Vec::new();
    let mut footers = Vec::new();
    for name in archive.file_names() {
        if is_part(name, "word/header") {
            headers.push(name.to_string());
        } else if is_part(name, "word/footer") {
            footers.push(name.to_string());
        }
    }
    headers.sort();
    footers.sort();

    let mut text = read_part_text(&mut archive, BODY_PART)?;
    for part in headers.iter().chain(footers.iter()) {
        text.push_str(&read_part_text(&mut archive, part)?);
    }
    Ok(text)
}

fn is_part(name: &str, prefix: &str) -> bool {
    name.starts_with(prefix) && name.ends_with(".xml")
}

fn read_part_text(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    part: &str,
) -> Result<String, ConversionError> {
    let mut xml = String::new();
    archive
        .by_name(part)
        .map_err(|e| ConversionError::DocumentFormat {
            reason: format!("missing part '{part}': {e}"),
        })?
        .read_to_string(&mut xml)
        .map_err(|e| ConversionError::DocumentFormat {
            reason: format!("part '{part}' is not valid UTF-8 XML: {e}"),
        })?;
    wordprocessing_text(&xml).map_err(|reason| ConversionError::DocumentFormat {
        reason: format!("part '{part}': {reason}"),
    })
}

/// Collects `<w:t>` run text; `<w:tab/>` and `<w:br/>` become whitespace and
/// every closed `<w:p>` ends a line.
fn wordprocessing_text(xml: &str) -> Result<String, String> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| format!("bad text at byte {}: {e}", reader.buffer_position()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "malformed XML at byte {}: {e}",
                    reader.buffer_position()
                ))
            }
        }
    }

    Ok(out)
}

/// Builds a minimal DOCX package in memory for tests.
#[cfg(test)]
pub(crate) fn build_test_docx(parts: &[(&str, &str)]) -> Vec<u8> {
    use std::io::Write;
    use zip::write::FileOptions;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in parts {
        writer.start_file(*name, FileOptions::default()).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Wraps paragraphs of run text in a `word/document.xml` body.
#[cfg(test)]
pub(crate) fn document_xml(paragraphs: &[&str]) -> String {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t xml:space=\"preserve\">{p}</w:t></w:r></w:p>"))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
         <w:body>{body}</w:body></w:document>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_paragraph_text_in_order() {
        let body = document_xml(&["Dear «Contact_FirstName»,", "Account: «Account_Name»"]);
        let docx = build_test_docx(&[(BODY_PART, body.as_str())]);
        let text = extract_docx_text(&docx).unwrap();
        assert_eq!(text, "Dear «Contact_FirstName»,\nAccount: «Account_Name»\n");
    }

    #[test]
    fn test_joins_split_runs_within_a_paragraph() {
        let xml = "<w:document xmlns:w=\"w\"><w:body><w:p>\
                   <w:r><w:t>«Account_</w:t></w:r><w:r><w:t>Name»</w:t></w:r>\
                   </w:p></w:body></w:document>";
        let docx = build_test_docx(&[(BODY_PART, xml)]);
        assert_eq!(extract_docx_text(&docx).unwrap(), "«Account_Name»\n");
    }

    #[test]
    fn test_table_cells_keep_body_order() {
        let xml = "<w:document xmlns:w=\"w\"><w:body>\
                   <w:p><w:r><w:t>Before</w:t></w:r></w:p>\
                   <w:tbl><w:tr><w:tc><w:p><w:r><w:t>«Cell_Field»</w:t></w:r></w:p></w:tc></w:tr></w:tbl>\
                   <w:p><w:r><w:t>After</w:t></w:r></w:p>\
                   </w:body></w:document>";
        let docx = build_test_docx(&[(BODY_PART, xml)]);
        assert_eq!(extract_docx_text(&docx).unwrap(), "Before\n«Cell_Field»\nAfter\n");
    }

    #[test]
    fn test_headers_and_footers_follow_body() {
        let footer = document_xml(&["«Footer_Field»"]);
        let body = document_xml(&["«Body_Field»"]);
        let header = document_xml(&["«Header_Field»"]);
        let docx = build_test_docx(&[
            ("word/footer1.xml", footer.as_str()),
            (BODY_PART, body.as_str()),
            ("word/header1.xml", header.as_str()),
        ]);
        let text = extract_docx_text(&docx).unwrap();
        assert_eq!(text, "«Body_Field»\n«Header_Field»\n«Footer_Field»\n");
    }

    #[test]
    fn test_tabs_breaks_and_entities() {
        let xml = "<w:document xmlns:w=\"w\"><w:body><w:p>\
                   <w:r><w:t>A &amp; B</w:t><w:tab/><w:t>C</w:t><w:br/><w:t>D</w:t></w:r>\
                   </w:p></w:body></w:document>";
        let docx = build_test_docx(&[(BODY_PART, xml)]);
        assert_eq!(extract_docx_text(&docx).unwrap(), "A & B\tC\nD\n");
    }

    #[test]
    fn test_non_zip_bytes_are_a_document_format_error() {
        let err = extract_docx_text(b"plain text, not a package").unwrap_err();
        assert!(matches!(err, ConversionError::DocumentFormat { .. }));
    }

    #[test]
    fn test_missing_body_part_is_a_document_format_error() {
        let docx = build_test_docx(&[("word/styles.xml", "<w:styles/>")]);
        let err = extract_docx_text(&docx).unwrap_err();
        assert!(err.to_string().contains("word/document.xml"));
    }

    #[test]
    fn test_malformed_xml_is_a_document_format_error() {
        let docx = build_test_docx(&[(BODY_PART, "<w:document><w:body></w:document>")]);
        assert!(matches!(
            extract_docx_text(&docx),
            Err(ConversionError::DocumentFormat { .. })
        ));
    }
}
