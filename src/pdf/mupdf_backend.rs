//! MuPDF-backed rasterizer

use mupdf::{Colorspace, Document, Matrix, Pixmap};

use super::error::{DocumentLoadError, PageRenderError};
use super::rasterizer::{DocumentSource, Rasterizer};
use super::types::{Bitmap, PageIndex};

/// Renders pages with MuPDF. Each worker opens its own `Document`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MupdfRasterizer;

impl Rasterizer for MupdfRasterizer {
    type Document = Document;

    fn open(&self, source: &DocumentSource) -> Result<Document, DocumentLoadError> {
        let path = source.path();
        if !path.exists() {
            return Err(DocumentLoadError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Document::open(path.to_string_lossy().as_ref())
            .map_err(|e| DocumentLoadError::unreadable(path, e.to_string()))
    }

    fn page_count(&self, doc: &Document) -> usize {
        doc.page_count().map_or(0, |n| n.max(0) as usize)
    }

    fn render(
        &self,
        doc: &Document,
        page: PageIndex,
        scale: f32,
    ) -> Result<Bitmap, PageRenderError> {
        let fail = |e: mupdf::Error| PageRenderError::rasterize(page, e.to_string());

        let loaded = doc.load_page(page.zero_based() as i32).map_err(fail)?;
        let transform = Matrix::new_scale(scale, scale);
        let pixmap = loaded
            .to_pixmap(&transform, &Colorspace::device_rgb(), false, false)
            .map_err(fail)?;

        let pixels =
            pixmap_to_rgb(&pixmap).map_err(|detail| PageRenderError::rasterize(page, detail))?;
        Ok(Bitmap {
            pixels,
            width: pixmap.width(),
            height: pixmap.height(),
        })
    }
}

/// Pack pixmap rows into tight RGB8, dropping stride padding and extra channels
fn pixmap_to_rgb(pixmap: &Pixmap) -> Result<Vec<u8>, String> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(format!("unsupported pixmap format: {n} channels"));
    }

    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    let row_bytes = width * n;
    if samples.len() < stride.saturating_mul(height) || row_bytes > stride {
        return Err("pixmap buffer size mismatch".to_string());
    }

    let mut out = Vec::with_capacity(width * height * 3);
    for row in samples.chunks(stride).take(height) {
        let row = &row[..row_bytes];
        if n == 3 {
            out.extend_from_slice(row);
        } else {
            for px in row.chunks_exact(n) {
                out.extend_from_slice(&px[..3]);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = DocumentSource::new(dir.path().join("absent.pdf"));
        assert!(matches!(
            MupdfRasterizer.open(&source),
            Err(DocumentLoadError::NotFound { .. })
        ));
    }
}
