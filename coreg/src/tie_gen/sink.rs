//! Tab-delimited tie-point stream.
//!
//! ```text
//! # projection {"origin":[..],"col_step":[..],"row_step":[..]}
//! # master_x	master_y	dx	dy	score
//! 812	96	3.2481	-1.7523	0.99871
//! ```
//!
//! The projection line is optional. Other `#` lines are comments.

use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

use glam::DVec2;

use super::TieGenError;
use crate::projection::GeoTransform;
use crate::tie_set::TiePoint;

const PROJECTION_TAG: &str = "# projection ";
const COLUMNS: &str = "# master_x\tmaster_y\tdx\tdy\tscore";

/// Incremental writer of tie-point records.
pub struct TieSink {
    writer: BufWriter<Box<dyn Write>>,
    written: usize,
}

impl TieSink {
    pub fn new(writer: impl Write + 'static) -> Self {
        Self {
            writer: BufWriter::new(Box::new(writer)),
            written: 0,
        }
    }

    pub fn create(path: &Path) -> Result<Self, TieGenError> {
        Ok(Self::new(File::create(path)?))
    }

    pub fn write_header(&mut self, projection: Option<&GeoTransform>) -> Result<(), TieGenError> {
        if let Some(projection) = projection {
            let json = serde_json::to_string(projection).map_err(TieGenError::Header)?;
            writeln!(self.writer, "{PROJECTION_TAG}{json}")?;
        }
        writeln!(self.writer, "{COLUMNS}")?;
        Ok(())
    }

    pub fn write_tie(&mut self, tie: &TiePoint) -> Result<(), TieGenError> {
        writeln!(
            self.writer,
            "{}\t{}\t{}\t{}\t{}",
            tie.master.x, tie.master.y, tie.displacement.x, tie.displacement.y, tie.score
        )?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), TieGenError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Records written so far.
    pub fn written(&self) -> usize {
        self.written
    }
}

/// Parses a stream written by [`TieSink`].
pub fn read_ties(reader: impl BufRead) -> Result<(Option<GeoTransform>, Vec<TiePoint>), TieGenError> {
    let mut projection = None;
    let mut ties = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end();
        if let Some(json) = line.strip_prefix(PROJECTION_TAG) {
            projection = Some(serde_json::from_str(json).map_err(TieGenError::Header)?);
            continue;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let bad_record = || TieGenError::Record {
            line: index + 1,
            text: line.to_string(),
        };
        let fields = line
            .split('\t')
            .map(|f| f.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| bad_record())?;
        let [mx, my, dx, dy, score] = fields[..] else {
            return Err(bad_record());
        };
        ties.push(TiePoint::new(DVec2::new(mx, my), DVec2::new(dx, dy), score));
    }
    Ok((projection, ties))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_rejects_short_records() {
        let text = "# master_x\tmaster_y\tdx\tdy\tscore\n1\t2\t3\n";
        let result = read_ties(Cursor::new(text));
        assert!(matches!(result, Err(TieGenError::Record { line: 2, .. })));
    }

    #[test]
    fn test_rejects_non_numeric_fields() {
        let result = read_ties(Cursor::new("1\t2\tx\t4\t0.5\n"));
        assert!(matches!(result, Err(TieGenError::Record { line: 1, .. })));
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let text = "# note\n\n10\t20\t0.5\t-0.25\t0.9\n";
        let (projection, ties) = read_ties(Cursor::new(text)).unwrap();
        assert!(projection.is_none());
        assert_eq!(
            ties,
            vec![TiePoint::new(DVec2::new(10.0, 20.0), DVec2::new(0.5, -0.25), 0.9)]
        );
    }
}
