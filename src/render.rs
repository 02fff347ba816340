use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};

use crate::model::Rect;
use crate::util::ensure_parent_directory;

pub const DEFAULT_ZOOM: f64 = 2.0;
const POINTS_PER_INCH: f64 = 72.0;

/// Rasterizes a rectangular region of one page to a PNG file.
pub trait CropRenderer {
    fn render_crop(
        &self,
        document: &Path,
        page_index: usize,
        rect: Rect,
        out_path: &Path,
    ) -> Result<PathBuf>;
}

/// Renders through `pdftoppm`, cropping at the requested zoom factor.
#[derive(Debug, Clone, Copy)]
pub struct PdftoppmRenderer {
    pub zoom: f64,
}

impl Default for PdftoppmRenderer {
    fn default() -> Self {
        Self { zoom: DEFAULT_ZOOM }
    }
}

impl PdftoppmRenderer {
    pub fn new(zoom: f64) -> Self {
        Self { zoom }
    }
}

/// Pixel window `(x, y, width, height)` of `rect` at `zoom`; never narrower
/// than one pixel.
pub fn pixel_window(rect: Rect, zoom: f64) -> (i64, i64, i64, i64) {
    let x = (rect.x0 * zoom).floor().max(0.0) as i64;
    let y = (rect.y0 * zoom).floor().max(0.0) as i64;
    let width = ((rect.width() * zoom).ceil() as i64).max(1);
    let height = ((rect.height() * zoom).ceil() as i64).max(1);
    (x, y, width, height)
}

impl CropRenderer for PdftoppmRenderer {
    fn render_crop(
        &self,
        document: &Path,
        page_index: usize,
        rect: Rect,
        out_path: &Path,
    ) -> Result<PathBuf> {
        if rect.is_empty() {
            bail!(
                "refusing to render empty region on page {} of {}",
                page_index + 1,
                document.display()
            );
        }

        ensure_parent_directory(out_path)?;

        // pdftoppm appends ".png" to the output root itself.
        let output_root = out_path.with_extension("");
        let page_number = page_index + 1;
        let resolution = (POINTS_PER_INCH * self.zoom).round() as i64;
        let (x, y, width, height) = pixel_window(rect, self.zoom);

        let output = Command::new("pdftoppm")
            .arg("-f")
            .arg(page_number.to_string())
            .arg("-l")
            .arg(page_number.to_string())
            .arg("-r")
            .arg(resolution.to_string())
            .arg("-x")
            .arg(x.to_string())
            .arg("-y")
            .arg(y.to_string())
            .arg("-W")
            .arg(width.to_string())
            .arg("-H")
            .arg(height.to_string())
            .arg("-png")
            .arg("-singlefile")
            .arg(document)
            .arg(&output_root)
            .output()
            .with_context(|| format!("failed to execute pdftoppm for {}", document.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "pdftoppm returned non-zero exit status for {} page {}: {}",
                document.display(),
                page_number,
                stderr.trim()
            );
        }

        let png_path = output_root.with_extension("png");
        if !png_path.exists() {
            bail!(
                "pdftoppm did not produce {} for {} page {}",
                png_path.display(),
                document.display(),
                page_number
            );
        }

        Ok(png_path)
    }
}

/// First line of `program -v`, if the tool can be run at all. Poppler prints
/// its banner on stderr.
pub fn tool_version(program: &str) -> Option<String> {
    let output = Command::new(program).arg("-v").output().ok()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let source = if stdout.trim().is_empty() {
        stderr.trim()
    } else {
        stdout.trim()
    };

    source
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
}
