//! Spreadsheet export with the crop embedded in the Image column.
//!
//! Each image is scaled to 100 px wide, keeping its aspect ratio, and
//! anchored at its row's Image cell. Row heights grow to fit the image.

use crate::error::ExportError;
use crate::output::{TableRow, PNG_DATA_URI_PREFIX, TABLE_COLUMNS};
use crate::pipeline::encode::decode_base64;
use rust_xlsxwriter::{Format, Image, Workbook};

/// Displayed width of each embedded crop, in pixels.
pub const IMAGE_WIDTH_PX: f64 = 100.0;

const IMAGE_COLUMN: u16 = 1;

/// Build the workbook and return it as `.xlsx` bytes.
pub fn to_xlsx(rows: &[TableRow]) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    let header = Format::new().set_bold();
    let wrap = Format::new().set_text_wrap();

    for (col, name) in TABLE_COLUMNS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *name, &header)?;
    }
    worksheet.set_column_width(IMAGE_COLUMN, 15)?;
    worksheet.set_column_width(3, 40)?;

    for (i, row) in rows.iter().enumerate() {
        let r = i as u32 + 1;
        worksheet.write_number(r, 0, f64::from(row.annotation_id))?;
        worksheet.write_number(r, 2, row.page as f64)?;
        worksheet.write_string_with_format(r, 3, &row.content, &wrap)?;
        worksheet.write_string_with_format(r, 4, &row.author, &wrap)?;
        worksheet.write_string_with_format(r, 5, &row.coordinates, &wrap)?;
        worksheet.write_string(r, 6, &row.nature)?;
        worksheet.write_string(r, 7, &row.defect_type)?;

        let (image, height_px) = scaled_image(row)?;
        // Row height is in points.
        worksheet.set_row_height(r, height_px * 0.75)?;
        worksheet.insert_image(r, IMAGE_COLUMN, &image)?;
    }

    Ok(workbook.save_to_buffer()?)
}

/// The row's crop scaled to [`IMAGE_WIDTH_PX`], and its displayed height.
fn scaled_image(row: &TableRow) -> Result<(Image, f64), ExportError> {
    let b64 = row.image.strip_prefix(PNG_DATA_URI_PREFIX).unwrap_or(&row.image);
    let png = decode_base64(b64).map_err(|e| ExportError::Image {
        record_id: row.annotation_id,
        detail: e.to_string(),
    })?;
    let mut image = Image::new_from_buffer(&png).map_err(|e| ExportError::Image {
        record_id: row.annotation_id,
        detail: e.to_string(),
    })?;

    let (width, height) = (image.width(), image.height());
    if width <= 0.0 {
        return Ok((image, height));
    }
    let scale = IMAGE_WIDTH_PX / width;
    image = image.set_scale_width(scale).set_scale_height(scale);
    Ok((image, height * scale))
}
