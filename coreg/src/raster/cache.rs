//! Block cache in front of an image source.

use hashbrown::HashMap;

use super::{check_request, ImageSource, PixelRect, RasterError, RasterTile, ScalarType};
use crate::projection::GeoTransform;

const MAX_LEVEL: usize = 16;

type BlockKey = (i64, i64, usize);

struct CachedBlock {
    tile: RasterTile,
    last_used: u64,
}

/// Caches aligned blocks of its input and assembles requests from them.
///
/// Blocks have the input's natural tile size and are evicted least recently
/// used once `capacity` blocks are held.
pub struct TileCache<S> {
    source: S,
    block_size: (usize, usize),
    capacity: usize,
    blocks: HashMap<BlockKey, CachedBlock>,
    clock: u64,
    hits: u64,
    misses: u64,
}

impl<S: ImageSource> TileCache<S> {
    pub fn new(source: S, capacity: usize) -> Self {
        let block_size = source.tile_size();
        Self {
            source,
            block_size,
            capacity: capacity.max(1),
            blocks: HashMap::new(),
            clock: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn cached_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    fn block_rect(&self, bx: i64, by: i64) -> PixelRect {
        let (bw, bh) = self.block_size;
        PixelRect::new(bx * bw as i64, by * bh as i64, bw, bh)
    }

    fn fetch_block(&mut self, key: BlockKey) -> Result<(), RasterError> {
        self.clock += 1;
        if let Some(block) = self.blocks.get_mut(&key) {
            block.last_used = self.clock;
            self.hits += 1;
            return Ok(());
        }

        self.misses += 1;
        let rect = self.block_rect(key.0, key.1);
        let tile = self.source.tile(rect, key.2)?;
        if self.blocks.len() >= self.capacity {
            self.evict_oldest();
        }
        self.blocks.insert(
            key,
            CachedBlock {
                tile,
                last_used: self.clock,
            },
        );
        Ok(())
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .blocks
            .iter()
            .min_by_key(|(_, block)| block.last_used)
            .map(|(key, _)| *key);
        if let Some(key) = oldest {
            self.blocks.remove(&key);
        }
    }
}

impl<S: ImageSource> ImageSource for TileCache<S> {
    fn bounds(&self) -> PixelRect {
        self.source.bounds()
    }

    fn band_count(&self) -> usize {
        self.source.band_count()
    }

    fn scalar_type(&self) -> ScalarType {
        self.source.scalar_type()
    }

    fn null_value(&self, band: usize) -> f64 {
        self.source.null_value(band)
    }

    fn tile_size(&self) -> (usize, usize) {
        self.block_size
    }

    fn projection(&self) -> Option<GeoTransform> {
        self.source.projection()
    }

    fn tile(&mut self, rect: PixelRect, level: usize) -> Result<RasterTile, RasterError> {
        check_request(rect, level, MAX_LEVEL)?;

        let (bw, bh) = (self.block_size.0 as i64, self.block_size.1 as i64);
        let bx0 = rect.x0.div_euclid(bw);
        let by0 = rect.y0.div_euclid(bh);
        let bx1 = (rect.x1() - 1).div_euclid(bw);
        let by1 = (rect.y1() - 1).div_euclid(bh);

        let mut out = RasterTile::new_null(rect, self.source.scalar_type(), self.source.null_values());
        for by in by0..=by1 {
            for bx in bx0..=bx1 {
                let key = (bx, by, level);
                self.fetch_block(key)?;
                if let Some(block) = self.blocks.get(&key) {
                    out.copy_overlap(&block.tile);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::MemoryImage;
    use common::Buffer2;

    fn image() -> MemoryImage {
        MemoryImage::single_band(Buffer2::from_fn(20, 20, |x, y| (x * 1000 + y) as f64))
            .with_tile_size(8, 8)
    }

    #[test]
    fn test_assembles_across_blocks() {
        let mut cache = TileCache::new(image(), 16);
        let rect = PixelRect::new(5, 6, 6, 5);
        let tile = cache.tile(rect, 0).unwrap();

        for y in rect.y0..rect.y1() {
            for x in rect.x0..rect.x1() {
                assert_eq!(tile.get(0, x, y), Some((x * 1000 + y) as f64));
            }
        }
        assert_eq!(cache.misses(), 4);
        assert_eq!(cache.hits(), 0);
    }

    #[test]
    fn test_repeat_request_hits() {
        let mut cache = TileCache::new(image(), 16);
        let rect = PixelRect::new(1, 1, 3, 3);
        cache.tile(rect, 0).unwrap();
        cache.tile(rect, 0).unwrap();
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = TileCache::new(image(), 2);
        cache.tile(PixelRect::new(0, 0, 1, 1), 0).unwrap();
        cache.tile(PixelRect::new(8, 0, 1, 1), 0).unwrap();
        cache.tile(PixelRect::new(0, 0, 1, 1), 0).unwrap();
        cache.tile(PixelRect::new(16, 0, 1, 1), 0).unwrap();
        assert_eq!(cache.cached_blocks(), 2);

        // Block (0, 0) was touched last before the insert and must still be cached.
        let misses = cache.misses();
        cache.tile(PixelRect::new(0, 0, 1, 1), 0).unwrap();
        assert_eq!(cache.misses(), misses);
    }

    #[test]
    fn test_negative_origin_is_null_padded() {
        let mut cache = TileCache::new(image(), 16);
        let tile = cache.tile(PixelRect::new(-3, -3, 5, 5), 0).unwrap();
        assert_eq!(tile.get(0, -1, 0), None);
        assert_eq!(tile.get(0, 1, 1), Some(1001.0));
    }
}
