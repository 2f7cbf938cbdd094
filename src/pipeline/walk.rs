//! Annotation walking: read every page's `/Annots` array through lopdf.
//!
//! pdfium-render hides the `/IRT` (in-reply-to) link between annotations, so
//! the annotation graph is read from the raw object dictionaries instead.
//! The walk visits pages in document order and annotations in their stored
//! order. Only annotations carrying a `/Contents` entry are kept; everything
//! else (popups, links, bare highlights) is counted as skipped.
//!
//! Encrypted documents (standard security handler, RC4) are read without
//! decrypting the whole file: `/Contents` and `/T` strings are decrypted with
//! the key of the indirect object that holds them. lopdf's
//! `Document::decrypt` leaves strings nested in dictionaries untouched.

use crate::error::AnnotError;
use crate::output::Rect;
use lopdf::encryption::{self, DecryptionError};
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, info, warn};

/// Author used when an annotation has no `/T` entry.
pub const DEFAULT_AUTHOR: &str = "No Author";

/// US Letter, used when neither a page nor its ancestors carry a `/MediaBox`.
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// Logical size of one page in PDF units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    /// 1-based page number.
    pub number: usize,
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    /// Pixel dimensions of the page image: the logical box, rounded.
    pub fn pixel_dimensions(&self) -> (u32, u32) {
        (
            self.width.round().max(1.0) as u32,
            self.height.round().max(1.0) as u32,
        )
    }
}

/// The annotation an `/IRT` entry points at.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyTarget {
    /// Object id of the target, when `/IRT` is an indirect reference.
    pub object_id: Option<ObjectId>,
    /// `/Rect` of the target, when readable.
    pub rect: Option<Rect>,
}

/// One content-bearing annotation as stored in the PDF.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAnnotation {
    /// 1-based page number.
    pub page: usize,
    /// Own object id, when the `/Annots` entry is an indirect reference.
    pub object_id: Option<ObjectId>,
    pub content: String,
    pub author: String,
    pub rect: Rect,
    pub reply_to: Option<ReplyTarget>,
}

impl RawAnnotation {
    pub fn is_reply(&self) -> bool {
        self.reply_to.is_some()
    }
}

/// Everything the walk learned about a document.
#[derive(Debug, Clone, Default)]
pub struct WalkedDocument {
    pub pages: Vec<PageSize>,
    /// Content-bearing annotations in document order.
    pub annotations: Vec<RawAnnotation>,
    /// Annotations ignored for lack of `/Contents` or a readable `/Rect`.
    pub skipped: usize,
}

/// Parse `bytes` and walk every page's annotations.
///
/// `password` is tried first on encrypted documents, then the empty
/// password. When neither opens the document the walk fails with
/// [`AnnotError::PasswordRequired`]; encrypted text is never returned.
pub fn walk_document(
    bytes: &[u8],
    source_name: &str,
    password: Option<&str>,
) -> Result<WalkedDocument, AnnotError> {
    let doc = Document::load_mem(bytes).map_err(|e| {
        let detail = e.to_string();
        if detail.to_ascii_lowercase().contains("encrypt")
            || detail.to_ascii_lowercase().contains("password")
        {
            AnnotError::PasswordRequired {
                source_name: source_name.to_string(),
            }
        } else {
            AnnotError::CorruptPdf {
                source_name: source_name.to_string(),
                detail,
            }
        }
    })?;

    let key = document_key(&doc, password, source_name)?;
    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    info!("PDF parsed: {} pages", page_ids.len());

    let mut walked = WalkedDocument::default();

    for (idx, page_id) in page_ids.iter().enumerate() {
        let number = idx + 1;
        let media_box = resolve_inherited(&doc, *page_id, b"MediaBox")
            .and_then(|obj| resolve(&doc, obj).as_array().ok())
            .and_then(|arr| rect_from_array(&doc, arr))
            .unwrap_or_else(|| Rect::from(DEFAULT_MEDIA_BOX));

        walked.pages.push(PageSize {
            number,
            width: (media_box.x1 - media_box.x0).abs(),
            height: (media_box.y1 - media_box.y0).abs(),
        });

        walk_page(&doc, key.as_deref(), *page_id, number, &mut walked)?;
    }

    info!(
        "Walked {} content annotations ({} skipped)",
        walked.annotations.len(),
        walked.skipped
    );
    Ok(walked)
}

/// The file key of an encrypted document, `None` for a plain one.
fn document_key(
    doc: &Document,
    password: Option<&str>,
    source_name: &str,
) -> Result<Option<Vec<u8>>, AnnotError> {
    if !doc.is_encrypted() {
        return Ok(None);
    }
    let attempt = |pw: &str| encryption::get_encryption_key(doc, pw, true);
    let result = match password {
        Some(pw) if !pw.is_empty() => attempt(pw).or_else(|_| attempt("")),
        _ => attempt(""),
    };
    match result {
        Ok(key) => {
            debug!("Document is encrypted, decrypting annotation text");
            Ok(Some(key))
        }
        Err(DecryptionError::IncorrectPassword) => Err(AnnotError::PasswordRequired {
            source_name: source_name.to_string(),
        }),
        Err(e) => Err(AnnotError::CorruptPdf {
            source_name: source_name.to_string(),
            detail: format!("cannot decrypt: {e}"),
        }),
    }
}

fn walk_page(
    doc: &Document,
    key: Option<&[u8]>,
    page_id: ObjectId,
    number: usize,
    walked: &mut WalkedDocument,
) -> Result<(), AnnotError> {
    let page_dict = doc
        .get_object(page_id)
        .and_then(|o| o.as_dict())
        .map_err(|e| AnnotError::CorruptPdf {
            source_name: format!("page {number}"),
            detail: format!("failed to get page dictionary: {e}"),
        })?;

    // Inline annotation dictionaries are encrypted with the key of the
    // object that stores them.
    let annots_owner = match page_dict.get(b"Annots") {
        Ok(Object::Reference(id)) => *id,
        _ => page_id,
    };

    let annots = match page_dict.get(b"Annots") {
        Ok(obj) => match resolve(doc, obj).as_array() {
            Ok(arr) => arr,
            Err(_) => {
                warn!("Page {}: /Annots is not an array, ignoring", number);
                return Ok(());
            }
        },
        Err(_) => return Ok(()),
    };

    for entry in annots {
        let object_id = entry.as_reference().ok();
        let dict = match resolve(doc, entry).as_dict() {
            Ok(d) => d,
            Err(_) => {
                walked.skipped += 1;
                continue;
            }
        };

        if !dict.has(b"Contents") {
            walked.skipped += 1;
            continue;
        }

        let rect = match dict
            .get(b"Rect")
            .ok()
            .and_then(|o| resolve(doc, o).as_array().ok())
            .and_then(|arr| rect_from_array(doc, arr))
        {
            Some(r) => r,
            None => {
                warn!("Page {}: annotation {:?} has no usable /Rect, skipping", number, object_id);
                walked.skipped += 1;
                continue;
            }
        };

        let owner = object_id.unwrap_or(annots_owner);
        let content = match text_entry(doc, key, dict, owner, b"Contents") {
            Ok(text) => text.unwrap_or_default(),
            Err(e) => {
                warn!("Page {}: cannot decrypt annotation {:?}: {}", number, object_id, e);
                walked.skipped += 1;
                continue;
            }
        };
        let author = text_entry(doc, key, dict, owner, b"T")
            .ok()
            .flatten()
            .unwrap_or_else(|| DEFAULT_AUTHOR.to_string());
        let reply_to = dict.get(b"IRT").ok().map(|irt| reply_target(doc, irt));

        debug!(
            "Page {}: annotation {:?} by {:?}{}",
            number,
            object_id,
            author,
            if reply_to.is_some() { " (reply)" } else { "" }
        );

        walked.annotations.push(RawAnnotation {
            page: number,
            object_id,
            content,
            author,
            rect,
            reply_to,
        });
    }

    Ok(())
}

fn reply_target(doc: &Document, irt: &Object) -> ReplyTarget {
    let object_id = irt.as_reference().ok();
    let rect = resolve(doc, irt)
        .as_dict()
        .ok()
        .and_then(|d| d.get(b"Rect").ok())
        .and_then(|o| resolve(doc, o).as_array().ok())
        .and_then(|arr| rect_from_array(doc, arr));
    ReplyTarget { object_id, rect }
}

/// Follow one level of indirection; unresolvable references come back as-is.
fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        other => other,
    }
}

/// Look up `key` on the page, then up the `/Parent` chain.
fn resolve_inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = page_id;
    // Page trees deeper than this are malformed (or cyclic).
    for _ in 0..64 {
        let dict = doc.get_object(current).and_then(|o| o.as_dict()).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        current = dict.get(b"Parent").and_then(|p| p.as_reference()).ok()?;
    }
    None
}

fn rect_from_array(doc: &Document, arr: &[Object]) -> Option<Rect> {
    if arr.len() != 4 {
        return None;
    }
    let mut v = [0.0f64; 4];
    for (slot, obj) in v.iter_mut().zip(arr) {
        *slot = number(resolve(doc, obj))?;
    }
    Some(Rect::from(v))
}

/// Integer or Real as f64. Reals are stored as f32, so they are rounded to
/// 1e-4 to drop the widening noise (100.1 stays 100.1).
fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(f) => Some(((*f as f64) * 10_000.0).round() / 10_000.0),
        _ => None,
    }
}

/// Read text entry `name` of `dict`, stored in object `owner`.
///
/// An indirect string is decrypted with its own object's key. `Ok(None)`
/// means the entry is absent or not text.
fn text_entry(
    doc: &Document,
    key: Option<&[u8]>,
    dict: &Dictionary,
    owner: ObjectId,
    name: &[u8],
) -> Result<Option<String>, DecryptionError> {
    let Ok(entry) = dict.get(name) else {
        return Ok(None);
    };
    let (obj, owner) = match entry {
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(obj) => (obj, *id),
            Err(_) => return Ok(None),
        },
        other => (other, owner),
    };
    match obj {
        Object::String(bytes, _) => match key {
            None => Ok(Some(decode_text(bytes))),
            Some(key) => encryption::decrypt_object(key, owner, obj).map(|plain| Some(decode_text(&plain))),
        },
        Object::Name(n) => Ok(Some(String::from_utf8_lossy(n).into_owned())),
        _ => Ok(None),
    }
}

/// Decode a PDF text string: UTF-16BE with BOM, else UTF-8, else Latin-1.

pub(crate) fn decode_text(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, StringFormat};

    fn save(mut doc: Document) -> Vec<u8> {
        let mut buf = Vec::new();
        doc.save_to(&mut buf).expect("failed to save test PDF");
        buf
    }

    /// One page with the given annotation dictionaries, stored indirectly.
    fn one_page_pdf(annots: Vec<Dictionary>, media_box: Option<Vec<Object>>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let annot_refs: Vec<Object> = annots
            .into_iter()
            .map(|a| Object::Reference(doc.add_object(a)))
            .collect();
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Annots" => annot_refs,
        };
        if let Some(mb) = media_box {
            page.set("MediaBox", mb);
        }
        let page_id = doc.add_object(page);
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => Object::Integer(1),
                "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(595), Object::Integer(842)],
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        save(doc)
    }

    fn rect(a: i64, b: i64, c: i64, d: i64) -> Vec<Object> {
        vec![Object::Integer(a), Object::Integer(b), Object::Integer(c), Object::Integer(d)]
    }

    #[test]
    fn keeps_only_annotations_with_contents() {
        let bytes = one_page_pdf(
            vec![
                dictionary! { "Type" => "Annot", "Subtype" => "Text", "Rect" => rect(10, 10, 20, 20),
                              "Contents" => Object::string_literal("Typo here"), "T" => Object::string_literal("Alice") },
                dictionary! { "Type" => "Annot", "Subtype" => "Popup", "Rect" => rect(30, 30, 40, 40) },
            ],
            None,
        );
        let walked = walk_document(&bytes, "t", None).unwrap();
        assert_eq!(walked.annotations.len(), 1);
        assert_eq!(walked.skipped, 1);
        let a = &walked.annotations[0];
        assert_eq!(a.content, "Typo here");
        assert_eq!(a.author, "Alice");
        assert_eq!(a.rect, Rect::new(10.0, 10.0, 20.0, 20.0));
        assert!(!a.is_reply());
        assert!(a.object_id.is_some());
    }

    #[test]
    fn missing_author_defaults() {
        let bytes = one_page_pdf(
            vec![dictionary! { "Subtype" => "Text", "Rect" => rect(1, 2, 3, 4),
                               "Contents" => Object::string_literal("x") }],
            None,
        );
        let walked = walk_document(&bytes, "t", None).unwrap();
        assert_eq!(walked.annotations[0].author, DEFAULT_AUTHOR);
    }

    #[test]
    fn media_box_is_inherited_from_pages_node() {
        let bytes = one_page_pdf(vec![], None);
        let walked = walk_document(&bytes, "t", None).unwrap();
        assert_eq!(walked.pages.len(), 1);
        assert_eq!(walked.pages[0].width, 595.0);
        assert_eq!(walked.pages[0].height, 842.0);
        assert_eq!(walked.pages[0].pixel_dimensions(), (595, 842));
    }

    #[test]
    fn page_media_box_wins_over_parent() {
        let bytes = one_page_pdf(vec![], Some(rect(0, 0, 612, 792)));
        let walked = walk_document(&bytes, "t", None).unwrap();
        assert_eq!(walked.pages[0].height, 792.0);
    }

    #[test]
    fn annotation_without_rect_is_skipped() {
        let bytes = one_page_pdf(
            vec![dictionary! { "Subtype" => "Text", "Contents" => Object::string_literal("x") }],
            None,
        );
        let walked = walk_document(&bytes, "t", None).unwrap();
        assert!(walked.annotations.is_empty());
        assert_eq!(walked.skipped, 1);
    }

    #[test]
    fn garbage_is_corrupt_pdf() {
        let err = walk_document(b"%PDF-1.4 this is not a pdf", "broken", None).unwrap_err();
        assert!(matches!(err, AnnotError::CorruptPdf { .. } | AnnotError::PasswordRequired { .. }));
    }

    #[test]
    fn decodes_utf16_and_latin1() {
        assert_eq!(decode_text(&[0xFE, 0xFF, 0x00, 0x48, 0x00, 0xE9]), "Hé");
        assert_eq!(decode_text(&[0x43, 0x61, 0x66, 0xE9]), "Café");
        assert_eq!(decode_text("déjà".as_bytes()), "déjà");
    }

    #[test]
    fn reply_target_reads_indirect_and_direct_irt() {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let parent = doc.add_object(dictionary! { "Subtype" => "Text", "Rect" => vec![
            Object::Real(100.0), Object::Real(700.0), Object::Real(300.0), Object::Real(720.0)],
            "Contents" => Object::string_literal("Typo") });
        let indirect = doc.add_object(dictionary! { "Subtype" => "Text", "Rect" => rect(100, 690, 300, 700),
            "Contents" => Object::string_literal("Agreed"), "IRT" => parent });
        let direct = doc.add_object(dictionary! { "Subtype" => "Text", "Rect" => rect(0, 0, 5, 5),
            "Contents" => Object::string_literal("Me too"),
            "IRT" => dictionary! { "Rect" => rect(100, 700, 300, 720) } });
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Annots" => vec![Object::Reference(parent), Object::Reference(indirect), Object::Reference(direct)],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => Object::Integer(1),
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);

        let walked = walk_document(&save(doc), "t", None).unwrap();
        assert_eq!(walked.pages[0].height, 792.0);
        let [root, by_ref, by_dict] = walked.annotations.as_slice() else {
            panic!("expected three annotations, got {:?}", walked.annotations);
        };
        let expected = Rect::new(100.0, 700.0, 300.0, 720.0);
        assert_eq!(root.rect, expected);
        assert_eq!(
            by_ref.reply_to,
            Some(ReplyTarget { object_id: Some(parent), rect: Some(expected) })
        );
        assert_eq!(
            by_dict.reply_to,
            Some(ReplyTarget { object_id: None, rect: Some(expected) })
        );
    }

    // ── Encrypted documents ──────────────────────────────────────────────

    const PAD: [u8; 32] = [
        0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08, 0x2E,
        0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
    ];

    /// Plain RC4, to compute the `/U` entry of a revision 2 security handler.
    fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut s: Vec<u8> = (0..=255).collect();
        let mut j = 0u8;
        for i in 0..256 {
            j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
            s.swap(i, j as usize);
        }
        let (mut i, mut j) = (0u8, 0u8);
        data.iter()
            .map(|b| {
                i = i.wrapping_add(1);
                j = j.wrapping_add(s[i as usize]);
                s.swap(i as usize, j as usize);
                b ^ s[s[i as usize].wrapping_add(s[j as usize]) as usize]
            })
            .collect()
    }

    /// RC4 40-bit (V1 R2) document whose user password is `user_password`,
    /// with one annotation "Typo here" by "Alice". `version` overrides `/V`.
    fn encrypted_pdf(user_password: &str, version: i64) -> Vec<u8> {
        let mut doc = Document::with_version("1.4");
        let encrypt_id = doc.add_object(dictionary! {
            "Filter" => "Standard",
            "V" => version,
            "R" => 2,
            "Length" => 40,
            "O" => Object::String(vec![0x5A; 32], StringFormat::Hexadecimal),
            "P" => -44,
        });
        doc.trailer.set("Encrypt", encrypt_id);
        let file_id = Object::String(b"0123456789abcdef".to_vec(), StringFormat::Hexadecimal);
        doc.trailer.set("ID", vec![file_id.clone(), file_id]);

        let annot_id = doc.new_object_id();
        let (contents, author) = match encryption::get_encryption_key(&doc, user_password, false) {
            Ok(key) => {
                let u = rc4(&key, &PAD);
                if let Ok(Object::Dictionary(d)) = doc.get_object_mut(encrypt_id) {
                    d.set("U", Object::String(u, StringFormat::Hexadecimal));
                }
                // RC4 is symmetric: "decrypting" plaintext encrypts it.
                let seal = |text: &str| {
                    let plain = Object::string_literal(text);
                    Object::String(encryption::decrypt_object(&key, annot_id, &plain).unwrap(), StringFormat::Hexadecimal)
                };
                (seal("Typo here"), seal("Alice"))
            }
            Err(_) => (Object::string_literal("unreadable"), Object::string_literal("unreadable")),
        };
        doc.objects.insert(
            annot_id,
            Object::Dictionary(dictionary! { "Subtype" => "Text", "Rect" => rect(10, 10, 20, 20),
                "Contents" => contents, "T" => author }),
        );

        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Annots" => vec![Object::Reference(annot_id)],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => Object::Integer(1),
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        save(doc)
    }

    #[test]
    fn empty_user_password_is_decrypted() {
        let walked = walk_document(&encrypted_pdf("", 1), "enc", None).unwrap();
        assert_eq!(walked.annotations[0].content, "Typo here");
        assert_eq!(walked.annotations[0].author, "Alice");
    }

    #[test]
    fn user_password_opens_protected_document() {
        let bytes = encrypted_pdf("secret", 1);
        let walked = walk_document(&bytes, "enc", Some("secret")).unwrap();
        assert_eq!(walked.annotations[0].content, "Typo here");
        assert_eq!(walked.annotations[0].author, "Alice");
    }

    #[test]
    fn missing_or_wrong_password_is_reported() {
        let bytes = encrypted_pdf("secret", 1);
        for password in [None, Some("guess")] {
            let err = walk_document(&bytes, "enc.pdf", password).unwrap_err();
            assert!(
                matches!(err, AnnotError::PasswordRequired { ref source_name } if source_name == "enc.pdf"),
                "{err:?}"
            );
        }
    }

    #[test]
    fn unsupported_security_handler_is_not_read_as_text() {
        let err = walk_document(&encrypted_pdf("", 4), "aes.pdf", None).unwrap_err();
        assert!(matches!(err, AnnotError::CorruptPdf { .. }), "{err:?}");
    }

    #[test]
    fn real_coordinates_drop_f32_noise() {
        assert_eq!(number(&Object::Real(100.1)), Some(100.1));
        assert_eq!(number(&Object::Integer(7)), Some(7.0));
        assert_eq!(number(&Object::Boolean(true)), None);
    }
}
