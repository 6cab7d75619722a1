use std::fs::File;
use std::io::BufReader;
use std::sync::Mutex;

use common::test_utils::test_output_path;
use glam::DVec2;

use super::*;
use crate::raster::RasterError;

/// Emits one tie point at the origin of every tile and records requests.
struct GridSource {
    bounds: PixelRect,
    tile: (usize, usize),
    requests: Arc<Mutex<Vec<PixelRect>>>,
    failing: Option<PixelRect>,
    current: Vec<TiePoint>,
}

impl GridSource {
    fn new(bounds: PixelRect, tile: (usize, usize)) -> Self {
        Self {
            bounds,
            tile,
            requests: Arc::default(),
            failing: None,
            current: Vec::new(),
        }
    }
}

impl TiePointSource for GridSource {
    fn bounds(&self) -> PixelRect {
        self.bounds
    }

    fn tile_size(&self) -> (usize, usize) {
        self.tile
    }

    fn tie_points(&mut self, rect: PixelRect) -> Result<&[TiePoint], RasterError> {
        self.requests.lock().unwrap().push(rect);
        if self.failing == Some(rect) {
            return Err(RasterError::EmptyRect(rect));
        }
        self.current = vec![TiePoint::new(
            DVec2::new(rect.x0 as f64, rect.y0 as f64),
            DVec2::new(0.5, -0.25),
            0.9,
        )];
        Ok(&self.current)
    }
}

#[test]
fn test_row_major_tiles_with_clipped_edges() {
    let source = GridSource::new(PixelRect::new(0, 0, 250, 130), (100, 100));
    let requests = source.requests.clone();
    let mut generator = TieGenerator::new(Box::new(source));

    let summary = generator.run().unwrap();
    assert_eq!(summary.tiles_total, 6);
    assert_eq!(summary.tiles_processed, 6);
    assert_eq!(summary.tie_count, 6);
    assert!(!summary.aborted);
    assert_eq!(generator.percent_complete(), 100.0);

    let requests = requests.lock().unwrap();
    assert_eq!(
        *requests,
        vec![
            PixelRect::new(0, 0, 100, 100),
            PixelRect::new(100, 0, 100, 100),
            PixelRect::new(200, 0, 50, 100),
            PixelRect::new(0, 100, 100, 30),
            PixelRect::new(100, 100, 100, 30),
            PixelRect::new(200, 100, 50, 30),
        ]
    );
}

#[test]
fn test_area_clipped_to_source() {
    let source = GridSource::new(PixelRect::new(0, 0, 100, 100), (64, 64));
    let mut generator = TieGenerator::new(Box::new(source));
    generator.set_area(Some(PixelRect::new(50, 50, 200, 200)));

    let summary = generator.run().unwrap();
    assert_eq!(summary.area, PixelRect::new(50, 50, 50, 50));
    assert_eq!(summary.tiles_total, 1);

    generator.set_area(Some(PixelRect::new(500, 500, 10, 10)));
    let summary = generator.run().unwrap();
    assert_eq!(summary.tiles_total, 0);
    assert!(generator.ties().is_empty());
}

#[test]
fn test_missing_source_is_an_error() {
    let mut generator = TieGenerator::default();
    assert!(matches!(generator.run(), Err(TieGenError::NoSource)));
}

#[test]
fn test_abort_keeps_collected_points() {
    let source = GridSource::new(PixelRect::new(0, 0, 400, 400), (100, 100));
    let mut generator = TieGenerator::new(Box::new(source));
    let abort = generator.abort_handle();
    generator.set_progress_callback(Some(Arc::new(move |p: TieGenProgress| {
        if p.tiles_done == 5 {
            abort.abort();
        }
    })));

    let summary = generator.run().unwrap();
    assert!(summary.aborted);
    assert_eq!(summary.tiles_processed, 5);
    assert_eq!(generator.ties().len(), 5);
    assert!((generator.percent_complete() - 100.0 * 5.0 / 16.0).abs() < 1e-12);
}

#[test]
fn test_rerun_after_abort_covers_all_tiles() {
    let source = GridSource::new(PixelRect::new(0, 0, 400, 400), (100, 100));
    let mut generator = TieGenerator::new(Box::new(source));
    generator.abort_handle().abort();

    let first = generator.run().unwrap();
    assert!(first.aborted);
    assert_eq!(first.tiles_processed, 0);
    assert!(!generator.abort_handle().is_aborted());

    let second = generator.run().unwrap();
    assert!(!second.aborted);
    assert_eq!(second.tiles_processed, 16);
    assert_eq!(generator.ties().len(), 16);
}

#[test]
fn test_progress_is_monotonic() {
    let source = GridSource::new(PixelRect::new(0, 0, 300, 200), (64, 64));
    let mut generator = TieGenerator::new(Box::new(source));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    generator.set_progress_callback(Some(Arc::new(move |p: TieGenProgress| {
        sink.lock().unwrap().push(p.percent);
    })));

    generator.run().unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 20);
    assert!(seen.windows(2).all(|w| w[1] > w[0]));
    assert_eq!(*seen.last().unwrap(), 100.0);
}

#[test]
fn test_failed_tiles_are_skipped() {
    let mut source = GridSource::new(PixelRect::new(0, 0, 200, 200), (100, 100));
    source.failing = Some(PixelRect::new(100, 0, 100, 100));
    let mut generator = TieGenerator::new(Box::new(source));

    let summary = generator.run().unwrap();
    assert_eq!(summary.tiles_processed, 4);
    assert_eq!(summary.tiles_failed, 1);
    assert_eq!(generator.ties().len(), 3);
}

#[test]
fn test_stream_without_storage() {
    let path = test_output_path("tie_gen_stream.txt");
    let source = GridSource::new(PixelRect::new(0, 0, 300, 300), (100, 100));
    let mut generator = TieGenerator::new(Box::new(source));
    let projection = GeoTransform::north_up(DVec2::new(440_000.0, 3_750_000.0), 2.5);
    generator.set_sink(TieSink::create(&path).unwrap(), Some(projection));
    generator.set_store(false);

    let summary = generator.run().unwrap();
    assert_eq!(summary.streamed, 9);
    assert!(generator.ties().is_empty());
    drop(generator);

    let (header, ties) = read_ties(BufReader::new(File::open(&path).unwrap())).unwrap();
    assert_eq!(header, Some(projection));
    assert_eq!(ties.len(), 9);
    assert_eq!(ties[4].master, DVec2::new(100.0, 100.0));
    assert_eq!(ties[4].displacement, DVec2::new(0.5, -0.25));
    assert_eq!(ties[4].score, 0.9);
}
