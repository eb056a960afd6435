//! Hand-off of rendered pages to whatever shows them

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;
use log::{error, info};

use super::types::{RenderedPage, TransitionDirection};

/// Receives the page to show after every completed navigation.
///
/// Compositing and the page-turn effect are the presenter's business.
pub trait ViewportPresenter {
    fn present(&mut self, page: &RenderedPage, direction: TransitionDirection);
}

/// Presenter that shows nothing
#[derive(Debug, Default)]
pub struct NullPresenter;

impl ViewportPresenter for NullPresenter {
    fn present(&mut self, _page: &RenderedPage, _direction: TransitionDirection) {}
}

/// Writes every presented page as `page-NNNN.png` into a directory
#[derive(Debug)]
pub struct PngPresenter {
    out_dir: PathBuf,
    last_written: Option<PathBuf>,
}

impl PngPresenter {
    pub fn new(out_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let out_dir = out_dir.into();
        fs::create_dir_all(&out_dir)?;
        Ok(Self {
            out_dir,
            last_written: None,
        })
    }

    #[must_use]
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Path of the most recent frame written
    #[must_use]
    pub fn last_written(&self) -> Option<&Path> {
        self.last_written.as_deref()
    }

    #[must_use]
    pub fn frame_path(&self, page: &RenderedPage) -> PathBuf {
        self.out_dir.join(format!("page-{:04}.png", page.page.get()))
    }
}

/// Encode a rendered page as PNG at `path`
pub fn save_png(page: &RenderedPage, path: &Path) -> image::ImageResult<()> {
    let bitmap = &page.bitmap;
    let img = RgbImage::from_raw(bitmap.width, bitmap.height, bitmap.pixels.clone())
        .ok_or_else(|| {
            image::ImageError::Parameter(image::error::ParameterError::from_kind(
                image::error::ParameterErrorKind::DimensionMismatch,
            ))
        })?;
    img.save(path)
}

impl ViewportPresenter for PngPresenter {
    fn present(&mut self, page: &RenderedPage, direction: TransitionDirection) {
        let path = self.frame_path(page);
        match save_png(page, &path) {
            Ok(()) => {
                info!(
                    "Presented page {} ({direction:?}) -> {}",
                    page.page,
                    path.display()
                );
                self.last_written = Some(path);
            }
            Err(e) => error!("Failed to write {}: {e}", path.display()),
        }
    }
}
