//! Visual comparison of uploaded images against reference images.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use image::{Rgba, RgbaImage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageCompareError {
    #[error("failed to decode `{}`: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to write diff image `{}`: {source}", .path.display())]
    WriteDiff {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("comparison task failed: {0}")]
    Task(String),
}

/// Decides whether two image files are visually equivalent.
pub trait ImageComparator: Send + Sync {
    /// Compares `left` with `right`, writing a diff image to `diff` when
    /// they differ.
    fn compare<'a>(
        &'a self,
        left: &'a Path,
        right: &'a Path,
        diff: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ImageCompareError>> + Send + 'a>>;
}

/// Per-pixel RGBA comparison with a tolerance for encoder noise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelComparator {
    /// Largest per-channel difference still treated as equal.
    pub channel_tolerance: u8,
    /// Largest share of differing pixels still treated as equivalent.
    pub max_diff_ratio: f64,
}

impl Default for PixelComparator {
    fn default() -> Self {
        Self {
            channel_tolerance: 16,
            max_diff_ratio: 0.001,
        }
    }
}

impl ImageComparator for PixelComparator {
    fn compare<'a>(
        &'a self,
        left: &'a Path,
        right: &'a Path,
        diff: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ImageCompareError>> + Send + 'a>> {
        let comparator = *self;
        let (left, right, diff) = (left.to_path_buf(), right.to_path_buf(), diff.to_path_buf());
        Box::pin(async move {
            tokio::task::spawn_blocking(move || comparator.compare_files(&left, &right, &diff))
                .await
                .map_err(|err| ImageCompareError::Task(err.to_string()))?
        })
    }
}

impl PixelComparator {
    pub fn compare_files(&self, left: &Path, right: &Path, diff: &Path) -> Result<bool, ImageCompareError> {
        let left_img = decode(left)?;
        let right_img = decode(right)?;

        if left_img.dimensions() != right_img.dimensions() {
            tracing::debug!(
                left = ?left_img.dimensions(),
                right = ?right_img.dimensions(),
                "image dimensions differ"
            );
            return Ok(false);
        }

        let (width, height) = left_img.dimensions();
        let mut diff_img = RgbaImage::new(width, height);
        let mut differing: u64 = 0;

        for (x, y, lp) in left_img.enumerate_pixels() {
            let rp = right_img.get_pixel(x, y);
            let differs = lp
                .0
                .iter()
                .zip(rp.0.iter())
                .any(|(l, r)| l.abs_diff(*r) > self.channel_tolerance);
            if differs {
                differing += 1;
                diff_img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            } else {
                let grey = ((u16::from(lp[0]) + u16::from(lp[1]) + u16::from(lp[2])) / 3) as u8;
                diff_img.put_pixel(x, y, Rgba([grey, grey, grey, 64]));
            }
        }

        let total = (u64::from(width) * u64::from(height)).max(1);
        let ratio = differing as f64 / total as f64;
        if differing > 0 {
            if let Some(parent) = diff.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ImageCompareError::WriteDiff {
                    path: diff.to_path_buf(),
                    source: image::ImageError::IoError(e),
                })?;
            }
            diff_img.save(diff).map_err(|source| ImageCompareError::WriteDiff {
                path: diff.to_path_buf(),
                source,
            })?;
        }

        Ok(ratio <= self.max_diff_ratio)
    }
}

fn decode(path: &Path) -> Result<RgbaImage, ImageCompareError> {
    image::open(path)
        .map(|img| img.to_rgba8())
        .map_err(|source| ImageCompareError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, width: u32, height: u32, paint: impl Fn(u32, u32) -> [u8; 4]) {
        let img = RgbaImage::from_fn(width, height, |x, y| Rgba(paint(x, y)));
        img.save(path).unwrap();
    }

    #[tokio::test]
    async fn identical_images_are_equivalent() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.png");
        let b = tmp.path().join("b.png");
        write_png(&a, 8, 8, |x, y| [x as u8 * 10, y as u8 * 10, 0, 255]);
        write_png(&b, 8, 8, |x, y| [x as u8 * 10, y as u8 * 10, 0, 255]);

        let diff = tmp.path().join("diff/a.png");
        assert!(PixelComparator::default().compare(&a, &b, &diff).await.unwrap());
        assert!(!diff.exists());
    }

    #[tokio::test]
    async fn small_noise_is_tolerated() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.png");
        let b = tmp.path().join("b.png");
        write_png(&a, 4, 4, |_, _| [100, 100, 100, 255]);
        write_png(&b, 4, 4, |_, _| [104, 98, 101, 255]);

        let diff = tmp.path().join("diff.png");
        assert!(PixelComparator::default().compare(&a, &b, &diff).await.unwrap());
    }

    #[tokio::test]
    async fn different_images_write_a_diff() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.png");
        let b = tmp.path().join("b.png");
        write_png(&a, 4, 4, |_, _| [0, 0, 0, 255]);
        write_png(&b, 4, 4, |x, _| if x < 2 { [0, 0, 0, 255] } else { [255, 255, 255, 255] });

        let diff = tmp.path().join("diff/out.png");
        assert!(!PixelComparator::default().compare(&a, &b, &diff).await.unwrap());
        assert!(diff.exists());
    }

    #[tokio::test]
    async fn different_dimensions_are_not_equivalent() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.png");
        let b = tmp.path().join("b.png");
        write_png(&a, 4, 4, |_, _| [0, 0, 0, 255]);
        write_png(&b, 4, 5, |_, _| [0, 0, 0, 255]);

        let diff = tmp.path().join("diff.png");
        assert!(!PixelComparator::default().compare(&a, &b, &diff).await.unwrap());
    }

    #[tokio::test]
    async fn undecodable_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.png");
        let b = tmp.path().join("b.png");
        std::fs::write(&a, b"not an image").unwrap();
        write_png(&b, 1, 1, |_, _| [0, 0, 0, 255]);

        let err = PixelComparator::default()
            .compare(&a, &b, &tmp.path().join("d.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageCompareError::Decode { .. }));
    }
}
