//! Tiled tie-point generation.
//!
//! Walks an area of interest tile by tile in row-major order, pulling tie
//! points from a [`TiePointSource`]. Points can be streamed to a text sink,
//! accumulated in memory, or both. Cancellation is cooperative and checked
//! once per tile.

mod sink;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::chip_match::TiePointSource;
use crate::projection::GeoTransform;
use crate::raster::PixelRect;
use crate::tie_set::TiePoint;

pub use sink::{read_ties, TieSink};

#[derive(Debug, thiserror::Error)]
pub enum TieGenError {
    #[error("No tie-point source connected")]
    NoSource,
    #[error("Tie-point stream IO failed")]
    Io(#[from] std::io::Error),
    #[error("Invalid projection header")]
    Header(#[source] serde_json::Error),
    #[error("Malformed tie-point record at line {line}: {text:?}")]
    Record { line: usize, text: String },
}

/// Shared flag requesting that a running generation stop at the next tile.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Progress after each processed tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TieGenProgress {
    pub tiles_done: usize,
    pub tiles_total: usize,
    /// Percent complete, never decreasing within a run.
    pub percent: f64,
}

/// Callback type for progress reporting.
pub type ProgressCallback = Option<Arc<dyn Fn(TieGenProgress) + Send + Sync>>;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TieGenSummary {
    pub area: PixelRect,
    pub tiles_total: usize,
    pub tiles_processed: usize,
    pub tiles_failed: usize,
    pub tie_count: usize,
    /// Records written to the stream.
    pub streamed: usize,
    pub aborted: bool,
}

/// Drives a tie-point source over an area of interest.
pub struct TieGenerator {
    source: Option<Box<dyn TiePointSource>>,
    area: Option<PixelRect>,
    tile_size: Option<(usize, usize)>,
    sink: Option<TieSink>,
    projection: Option<GeoTransform>,
    store: bool,
    ties: Vec<TiePoint>,
    abort: AbortHandle,
    progress: ProgressCallback,
    percent: f64,
}

impl Default for TieGenerator {
    fn default() -> Self {
        Self {
            source: None,
            area: None,
            tile_size: None,
            sink: None,
            projection: None,
            store: true,
            ties: Vec::new(),
            abort: AbortHandle::default(),
            progress: None,
            percent: 0.0,
        }
    }
}

impl TieGenerator {
    pub fn new(source: Box<dyn TiePointSource>) -> Self {
        Self {
            source: Some(source),
            ..Default::default()
        }
    }

    pub fn set_source(&mut self, source: Box<dyn TiePointSource>) {
        self.source = Some(source);
    }

    /// Restricts generation to `area`, clipped to the source bounds.
    pub fn set_area(&mut self, area: Option<PixelRect>) {
        self.area = area;
    }

    /// Overrides the source's natural tile size.
    pub fn set_tile_size(&mut self, tile_size: Option<(usize, usize)>) {
        self.tile_size = tile_size;
    }

    /// Streams every tie point to `sink`. `projection` goes into the header.
    pub fn set_sink(&mut self, sink: TieSink, projection: Option<GeoTransform>) {
        self.sink = Some(sink);
        self.projection = projection;
    }

    /// Whether tie points are kept in memory (default true).
    pub fn set_store(&mut self, store: bool) {
        self.store = store;
    }

    pub fn set_progress_callback(&mut self, callback: ProgressCallback) {
        self.progress = callback;
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Shares an externally owned abort flag.
    pub fn set_abort_handle(&mut self, handle: AbortHandle) {
        self.abort = handle;
    }

    pub fn percent_complete(&self) -> f64 {
        self.percent
    }

    pub fn ties(&self) -> &[TiePoint] {
        &self.ties
    }

    pub fn take_ties(&mut self) -> Vec<TiePoint> {
        std::mem::take(&mut self.ties)
    }

    /// Detaches the stream, flushing nothing further into it.
    pub fn take_sink(&mut self) -> Option<TieSink> {
        self.sink.take()
    }

    /// Runs over every tile of the area of interest.
    ///
    /// Fails only when no source is connected. Tiles whose tie points
    /// cannot be produced are logged and skipped, and a failing stream is
    /// dropped with a warning. An abort request is cleared when the run
    /// returns, so the next run starts fresh.
    pub fn run(&mut self) -> Result<TieGenSummary, TieGenError> {
        let mut source = self.source.take().ok_or(TieGenError::NoSource)?;
        let summary = self.scan(source.as_mut());
        self.source = Some(source);
        self.abort.reset();
        Ok(summary)
    }

    fn scan(&mut self, source: &mut dyn TiePointSource) -> TieGenSummary {
        self.ties.clear();
        self.percent = 0.0;

        let bounds = source.bounds();
        let area = match self.area {
            Some(area) => area.intersect(&bounds),
            None => (!bounds.is_empty()).then_some(bounds),
        };
        let Some(area) = area else {
            tracing::warn!("Area of interest does not overlap the tie-point source {}", bounds);
            self.percent = 100.0;
            return TieGenSummary::default();
        };

        let (tw, th) = self.tile_size.unwrap_or_else(|| source.tile_size());
        let mut summary = TieGenSummary {
            area,
            tiles_total: area.tile_count(tw, th),
            ..Default::default()
        };
        tracing::info!(
            "Generating tie points over {}: {} tiles of {}x{}",
            area,
            summary.tiles_total,
            tw,
            th
        );

        if let Some(sink) = self.sink.as_mut() {
            if let Err(err) = sink.write_header(self.projection.as_ref()) {
                tracing::warn!("Dropping tie-point stream: {}", err);
                self.sink = None;
            }
        }

        let mut last_milestone = 0;
        for rect in area.tiles(tw, th) {
            if self.abort.is_aborted() {
                tracing::warn!(
                    "Tie generation aborted after {} of {} tiles",
                    summary.tiles_processed,
                    summary.tiles_total
                );
                summary.aborted = true;
                break;
            }

            match source.tie_points(rect) {
                Ok(ties) => {
                    tracing::debug!("Tile {}: {} tie points", rect, ties.len());
                    summary.tie_count += ties.len();
                    if let Some(sink) = self.sink.as_mut() {
                        if let Err(err) = ties.iter().try_for_each(|t| sink.write_tie(t)) {
                            tracing::warn!("Dropping tie-point stream: {}", err);
                            self.sink = None;
                        }
                    }
                    if self.store {
                        self.ties.extend_from_slice(ties);
                    }
                }
                Err(err) => {
                    tracing::warn!("Skipping tile {}: {}", rect, err);
                    summary.tiles_failed += 1;
                }
            }

            summary.tiles_processed += 1;
            let percent = 100.0 * summary.tiles_processed as f64 / summary.tiles_total as f64;
            self.percent = self.percent.max(percent);
            if let Some(callback) = &self.progress {
                callback(TieGenProgress {
                    tiles_done: summary.tiles_processed,
                    tiles_total: summary.tiles_total,
                    percent: self.percent,
                });
            }
            let milestone = (self.percent / 25.0) as usize;
            if milestone > last_milestone {
                last_milestone = milestone;
                tracing::info!("Tie generation {:.0}% ({} ties)", self.percent, summary.tie_count);
            }
        }

        if let Some(sink) = self.sink.as_mut() {
            if let Err(err) = sink.flush() {
                tracing::warn!("Failed to flush tie-point stream: {}", err);
            }
            summary.streamed = sink.written();
        }

        tracing::info!(
            "Tie generation finished: {} ties from {} tiles",
            summary.tie_count,
            summary.tiles_processed
        );
        summary
    }
}
