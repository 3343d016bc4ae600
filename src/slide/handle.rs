//! Opened slides and their memoized working-resolution rasters.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use image::{imageops, RgbImage};
use lru::LruCache;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::SlideError;
use crate::format::{classify_tiff, is_tiff, read_level, SlideFormat, SvsMetadata, TiffPyramid};
use crate::format::tiff::BIGTIFF_HEADER_SIZE;
use crate::io::{FileRangeReader, RangeReader};

use super::work_size::{Resolution, WorkSize};

/// Default number of distinct work sizes memoized per slide
pub const DEFAULT_THUMBNAIL_CACHE: usize = 4;

/// Options that influence how a slide is opened.
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    /// Base magnification used when the slide metadata has none
    pub base_magnification: Option<f64>,

    /// Thumbnail cache capacity (distinct work sizes)
    pub thumbnail_cache: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            base_magnification: None,
            thumbnail_cache: DEFAULT_THUMBNAIL_CACHE,
        }
    }
}

/// Dimensions and downsample of one level, for logs and reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelInfo {
    pub width: u32,
    pub height: u32,
    pub downsample: f64,
}

enum Source {
    Tiled {
        reader: Box<dyn RangeReader>,
        pyramid: TiffPyramid,
    },
    Raster(Arc<RgbImage>),
}

/// An opened slide.
///
/// `thumbnail` results are kept in an LRU keyed by the work size's canonical
/// text, so asking twice for the same resolution returns the same `Arc`.
pub struct SlideHandle {
    identifier: String,
    format: SlideFormat,
    metadata: Option<SvsMetadata>,
    base_magnification: Option<f64>,
    source: Source,
    thumbnails: RwLock<LruCache<String, Arc<RgbImage>>>,
}

impl std::fmt::Debug for SlideHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlideHandle")
            .field("identifier", &self.identifier)
            .field("format", &self.format)
            .field("base_magnification", &self.base_magnification)
            .finish_non_exhaustive()
    }
}

impl SlideHandle {
    /// Open a slide file from disk.
    pub async fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self, SlideError> {
        let reader = FileRangeReader::open(path).await?;
        Self::from_reader(Box::new(reader), options).await
    }

    /// Open a slide from any range reader.
    ///
    /// Tiled TIFFs are read tile by tile on demand; everything else is decoded
    /// whole by the `image` crate and served as a single level.
    pub async fn from_reader(
        reader: Box<dyn RangeReader>,
        options: OpenOptions,
    ) -> Result<Self, SlideError> {
        let identifier = reader.identifier().to_string();
        let probe_len = (BIGTIFF_HEADER_SIZE as u64).min(reader.size()) as usize;
        let probe = reader.read_exact_at(0, probe_len).await?;

        let (format, metadata, source) = if is_tiff(&probe) {
            let pyramid = TiffPyramid::parse(reader.as_ref()).await?;
            if pyramid.level_count() == 0 {
                debug!(slide = %identifier, "TIFF has no tiled levels; decoding as raster");
                (SlideFormat::Raster, None, decode_raster(reader.as_ref()).await?)
            } else {
                let format = classify_tiff(pyramid.description.as_deref());
                let metadata = pyramid.description.as_deref().map(SvsMetadata::parse);
                (format, metadata, Source::Tiled { reader, pyramid })
            }
        } else {
            (SlideFormat::Raster, None, decode_raster(reader.as_ref()).await?)
        };

        let base_magnification = metadata
            .as_ref()
            .and_then(|m| m.magnification)
            .or(options.base_magnification);

        let capacity =
            NonZeroUsize::new(options.thumbnail_cache).unwrap_or(NonZeroUsize::MIN);

        let handle = SlideHandle {
            identifier,
            format,
            metadata,
            base_magnification,
            source,
            thumbnails: RwLock::new(LruCache::new(capacity)),
        };

        info!(
            slide = %handle.identifier,
            format = handle.format.name(),
            levels = handle.level_count(),
            base_magnification = ?handle.base_magnification,
            "Opened slide"
        );
        Ok(handle)
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn format(&self) -> SlideFormat {
        self.format
    }

    pub fn metadata(&self) -> Option<&SvsMetadata> {
        self.metadata.as_ref()
    }

    /// Objective magnification of level 0, from metadata or the fallback.
    pub fn base_magnification(&self) -> Option<f64> {
        self.base_magnification
    }

    pub fn level_count(&self) -> usize {
        match &self.source {
            Source::Tiled { pyramid, .. } => pyramid.level_count(),
            Source::Raster(_) => 1,
        }
    }

    pub fn level_info(&self, level: usize) -> Option<LevelInfo> {
        match &self.source {
            Source::Tiled { pyramid, .. } => pyramid.level(level).map(|l| LevelInfo {
                width: l.width,
                height: l.height,
                downsample: l.downsample,
            }),
            Source::Raster(image) if level == 0 => Some(LevelInfo {
                width: image.width(),
                height: image.height(),
                downsample: 1.0,
            }),
            Source::Raster(_) => None,
        }
    }

    /// Level-0 dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        self.level_info(0)
            .map(|l| (l.width, l.height))
            .unwrap_or((0, 0))
    }

    /// The slide as an RGB raster at `work_size`, memoized per work size.
    ///
    /// The cache guard is held while rendering, so concurrent callers asking
    /// for the same work size share one raster.
    pub async fn thumbnail(&self, work_size: &WorkSize) -> Result<Arc<RgbImage>, SlideError> {
        let key = work_size.to_string();
        let mut thumbnails = self.thumbnails.write().await;
        if let Some(cached) = thumbnails.get(&key) {
            return Ok(Arc::clone(cached));
        }

        let image = Arc::new(self.render(work_size).await?);
        debug!(
            slide = %self.identifier,
            work_size = %key,
            width = image.width(),
            height = image.height(),
            "Rendered working raster"
        );

        thumbnails.put(key, Arc::clone(&image));
        Ok(image)
    }

    async fn render(&self, work_size: &WorkSize) -> Result<RgbImage, SlideError> {
        let resolution = work_size
            .resolve(self.dimensions(), self.level_count(), self.base_magnification)
            .map_err(|e| match e {
                SlideError::UnknownMagnification { spec, .. } => {
                    SlideError::UnknownMagnification {
                        slide: self.identifier.clone(),
                        spec,
                    }
                }
                other => other,
            })?;

        if let (WorkSize::Level(requested), Resolution::Level(level)) = (work_size, resolution) {
            if *requested != level {
                warn!(
                    slide = %self.identifier,
                    requested,
                    used = level,
                    "Requested level does not exist; using the last level"
                );
            }
        }

        match (&self.source, resolution) {
            (Source::Raster(image), Resolution::Level(_)) => Ok(image.as_ref().clone()),
            (Source::Raster(image), Resolution::Scaled { width, height, .. }) => {
                Ok(shrink(image, width, height))
            }
            (Source::Tiled { reader, pyramid }, Resolution::Level(level)) => {
                let level = pyramid.level(level).ok_or(SlideError::NoLevels)?;
                read_level(reader.as_ref(), level).await
            }
            (
                Source::Tiled { reader, pyramid },
                Resolution::Scaled {
                    downsample,
                    width,
                    height,
                },
            ) => {
                let level = pyramid
                    .best_level_for_downsample(downsample)
                    .ok_or(SlideError::NoLevels)?;
                debug!(
                    slide = %self.identifier,
                    level = level.level_index,
                    level_downsample = level.downsample,
                    downsample,
                    "Selected pyramid level"
                );
                let stitched = read_level(reader.as_ref(), level).await?;
                Ok(shrink(&stitched, width, height))
            }
        }
    }
}

/// Area-averaging resize; a no-op copy when the size already matches.
fn shrink(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        image.clone()
    } else {
        imageops::thumbnail(image, width, height)
    }
}

async fn decode_raster(reader: &dyn RangeReader) -> Result<Source, SlideError> {
    let bytes = reader.read_all().await?;
    let image = image::load_from_memory(&bytes).map_err(|e| SlideError::UnsupportedFormat {
        reason: format!("{}: {}", reader.identifier(), e),
    })?;
    let rgb = image.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(SlideError::NoLevels);
    }
    Ok(Source::Raster(Arc::new(rgb)))
}
