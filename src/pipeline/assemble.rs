//! Record assembly: one pass over the walked annotations.
//!
//! A primary annotation opens a new record (next id, cropped image). A reply
//! is routed through the [`ReplyCorrelator`] and appended to the record it
//! belongs to; it also registers itself so a reply to that reply lands on
//! the same root record. Ids are handed out only to records, so they are
//! contiguous `1..=N` in document order whatever the thread depth.

use crate::config::{ExtractionConfig, OrphanPolicy};
use crate::error::AnnotError;
use crate::output::{AnnotationRecord, OrphanedReply};
use crate::pipeline::correlate::ReplyCorrelator;
use crate::pipeline::walk::{RawAnnotation, WalkedDocument};
use crate::pipeline::{crop, encode};
use image::DynamicImage;
use tracing::{debug, warn};

/// Records and leftovers produced by one assembly pass.
#[derive(Debug, Default)]
pub struct Assembled {
    pub records: Vec<AnnotationRecord>,
    pub orphaned_replies: Vec<OrphanedReply>,
    pub replies_merged: usize,
}

/// Build the record set for `walked`, cropping from `page_images`
/// (one image per entry of `walked.pages`).
pub fn assemble_records(
    walked: &WalkedDocument,
    page_images: &[DynamicImage],
    config: &ExtractionConfig,
) -> Result<Assembled, AnnotError> {
    if page_images.len() != walked.pages.len() {
        return Err(AnnotError::PageCountMismatch {
            expected: walked.pages.len(),
            rendered: page_images.len(),
        });
    }

    let mut out = Assembled::default();
    let mut correlator = ReplyCorrelator::new();

    for annot in &walked.annotations {
        if let Some(ref target) = annot.reply_to {
            if let Some(record_id) = correlator.resolve(target) {
                let idx = (record_id - 1) as usize;
                let record = &mut out.records[idx];
                record.contents.push(annot.content.clone());
                record.authors.push(annot.author.clone());
                correlator.register(annot.object_id, annot.rect, record_id);
                out.replies_merged += 1;
                debug!("Page {}: reply by {:?} merged into record {}", annot.page, annot.author, record_id);
                continue;
            }

            match config.orphan_policy {
                OrphanPolicy::Drop => {
                    warn!(
                        "Page {}: reply by {:?} has no matching annotation, dropped",
                        annot.page, annot.author
                    );
                    out.orphaned_replies.push(OrphanedReply {
                        page: annot.page,
                        content: annot.content.clone(),
                        author: annot.author.clone(),
                        rect: annot.rect,
                    });
                    continue;
                }
                OrphanPolicy::Fail => {
                    return Err(AnnotError::OrphanedReply {
                        page: annot.page,
                        content: annot.content.clone(),
                    });
                }
                OrphanPolicy::Promote => {
                    warn!(
                        "Page {}: reply by {:?} has no matching annotation, promoted to a record",
                        annot.page, annot.author
                    );
                }
            }
        }

        let record = new_record(annot, out.records.len() as u32 + 1, walked, page_images, config)?;
        correlator.register(annot.object_id, annot.rect, record.id);
        out.records.push(record);
    }

    Ok(out)
}

fn new_record(
    annot: &RawAnnotation,
    id: u32,
    walked: &WalkedDocument,
    page_images: &[DynamicImage],
    config: &ExtractionConfig,
) -> Result<AnnotationRecord, AnnotError> {
    let idx = annot.page - 1;
    let page_height = walked.pages[idx].height;
    let strip = crop::crop_region(&page_images[idx], page_height, annot.rect, config.padding);
    let image = encode::encode_png_base64(&strip).map_err(|e| AnnotError::ImageEncodingFailed {
        page: annot.page,
        detail: e.to_string(),
    })?;

    debug!(
        "Record {}: page {}, {}x{} crop, author {:?}",
        id,
        annot.page,
        strip.width(),
        strip.height(),
        annot.author
    );

    Ok(AnnotationRecord {
        id,
        page: annot.page,
        contents: vec![annot.content.clone()],
        authors: vec![annot.author.clone()],
        coordinates: annot.rect,
        image,
        nature: None,
        defect_type: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Rect;
    use crate::pipeline::walk::{PageSize, ReplyTarget};
    use image::{Rgba, RgbaImage};

    fn doc(pages: usize, annotations: Vec<RawAnnotation>) -> (WalkedDocument, Vec<DynamicImage>) {
        let sizes: Vec<PageSize> = (1..=pages)
            .map(|number| PageSize { number, width: 200.0, height: 300.0 })
            .collect();
        let images = sizes
            .iter()
            .map(|_| DynamicImage::ImageRgba8(RgbaImage::from_pixel(200, 300, Rgba([255, 255, 255, 255]))))
            .collect();
        (
            WalkedDocument { pages: sizes, annotations, skipped: 0 },
            images,
        )
    }

    fn primary(page: usize, obj: u32, author: &str, content: &str, rect: Rect) -> RawAnnotation {
        RawAnnotation {
            page,
            object_id: Some((obj, 0)),
            content: content.into(),
            author: author.into(),
            rect,
            reply_to: None,
        }
    }

    fn reply(page: usize, obj: u32, author: &str, content: &str, to: Option<u32>, to_rect: Option<Rect>) -> RawAnnotation {
        RawAnnotation {
            page,
            object_id: Some((obj, 0)),
            content: content.into(),
            author: author.into(),
            rect: Rect::new(0.0, 0.0, 5.0, 5.0),
            reply_to: Some(ReplyTarget {
                object_id: to.map(|o| (o, 0)),
                rect: to_rect,
            }),
        }
    }

    #[test]
    fn ids_are_contiguous_and_replies_append() {
        let r1 = Rect::new(10.0, 10.0, 50.0, 20.0);
        let r2 = Rect::new(10.0, 100.0, 50.0, 120.0);
        let (walked, images) = doc(
            2,
            vec![
                primary(1, 10, "Alice", "Typo", r1),
                primary(2, 11, "Bob", "Wrong color", r2),
                reply(2, 12, "Carol", "Agreed", None, Some(r2)),
            ],
        );
        let out = assemble_records(&walked, &images, &ExtractionConfig::default()).unwrap();
        let ids: Vec<u32> = out.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(out.records[1].contents, vec!["Wrong color", "Agreed"]);
        assert_eq!(out.records[1].authors, vec!["Bob", "Carol"]);
        assert_eq!(out.records[1].coordinates, r2);
        assert_eq!(out.replies_merged, 1);
    }

    #[test]
    fn reply_to_reply_reaches_root() {
        let r = Rect::new(10.0, 10.0, 50.0, 20.0);
        let (walked, images) = doc(
            1,
            vec![
                primary(1, 10, "Alice", "Typo", r),
                reply(1, 11, "Bob", "Where?", Some(10), Some(r)),
                reply(1, 12, "Alice", "Line 3", Some(11), None),
                primary(1, 13, "Carol", "Logo blurry", Rect::new(0.0, 200.0, 100.0, 250.0)),
            ],
        );
        let out = assemble_records(&walked, &images, &ExtractionConfig::default()).unwrap();
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].contents, vec!["Typo", "Where?", "Line 3"]);
        assert_eq!(out.records[1].id, 2);
    }

    #[test]
    fn orphan_policies() {
        let (walked, images) = doc(
            1,
            vec![
                primary(1, 10, "Alice", "Typo", Rect::new(10.0, 10.0, 50.0, 20.0)),
                reply(1, 11, "Bob", "lost", Some(99), Some(Rect::new(1.0, 1.0, 2.0, 2.0))),
            ],
        );

        let dropped = assemble_records(&walked, &images, &ExtractionConfig::default()).unwrap();
        assert_eq!(dropped.records.len(), 1);
        assert_eq!(dropped.orphaned_replies.len(), 1);
        assert_eq!(dropped.orphaned_replies[0].author, "Bob");

        let promote = ExtractionConfig::builder().orphan_policy(OrphanPolicy::Promote).build().unwrap();
        let promoted = assemble_records(&walked, &images, &promote).unwrap();
        assert_eq!(promoted.records.len(), 2);
        assert_eq!(promoted.records[1].id, 2);
        assert_eq!(promoted.records[1].contents, vec!["lost"]);

        let fail = ExtractionConfig::builder().orphan_policy(OrphanPolicy::Fail).build().unwrap();
        let err = assemble_records(&walked, &images, &fail).unwrap_err();
        assert!(matches!(err, AnnotError::OrphanedReply { page: 1, .. }));
    }

    #[test]
    fn image_is_padded_full_width_strip() {
        let (walked, images) = doc(1, vec![primary(1, 10, "A", "x", Rect::new(10.0, 140.0, 50.0, 160.0))]);
        let config = ExtractionConfig::builder().padding(20).build().unwrap();
        let out = assemble_records(&walked, &images, &config).unwrap();
        let png = encode::decode_base64(&out.records[0].image).unwrap();
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!((img.width(), img.height()), (200, 60));
    }

    #[test]
    fn missing_page_image_is_fatal() {
        let (walked, mut images) = doc(2, vec![]);
        images.pop();
        let err = assemble_records(&walked, &images, &ExtractionConfig::default()).unwrap_err();
        assert!(matches!(err, AnnotError::PageCountMismatch { expected: 2, rendered: 1 }));
    }
}
