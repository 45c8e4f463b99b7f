//! Seed-point file reader
//!
//! One point per line as `x,y` in decimal; lines starting with `;` are
//! comments. A missing file is fatal (the root cannot start a campaign
//! without seeds); a malformed line is logged and skipped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::point::Point;
use crate::scalar::Ctx;

/// Errors raised by the seed reader.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    /// The seed file could not be opened.
    #[error("cannot open seed file {path}: {source}")]
    Open {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// A line could not be read.
    #[error("cannot read seed file {path}: {source}")]
    Read {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
}

/// Reads every well-formed seed point from `path`, using a line buffer of
/// `buffer` bytes.
pub fn read_starting_points(
    ctx: &Ctx,
    path: &Path,
    buffer: usize,
) -> Result<Vec<Point>, SeedError> {
    let file = File::open(path)
        .map_err(|source| SeedError::Open { path: path.to_owned(), source })?;
    let reader = BufReader::with_capacity(buffer.max(64), file);

    let mut points = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line =
            line.map_err(|source| SeedError::Read { path: path.to_owned(), source })?;
        let text = line.trim();
        if text.is_empty() || text.starts_with(';') {
            continue;
        }
        match parse_seed_line(ctx, text) {
            Some(point) => points.push(point),
            None => {
                warn!(line = index + 1, content = text, "skipping malformed seed line");
            }
        }
    }
    Ok(points)
}

/// A single comma separates `x` and `y`; parsing is locale-independent.
fn parse_seed_line(ctx: &Ctx, text: &str) -> Option<Point> {
    let (x, y) = text.split_once(',')?;
    Point::parse(ctx, x.trim(), y.trim()).ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ctx() -> Ctx {
        Ctx::new(200, "1e-20", 60).unwrap()
    }

    fn seed_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_points_and_skips_comments() {
        let c = ctx();
        let file = seed_file("; unit frame\n0,0\n0,1\n\n  -0.5 , 2.25  \n");
        let points = read_starting_points(&c, file.path(), 4096).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0], Point::from_i64(&c, 0, 0));
        assert_eq!(points[1], Point::from_i64(&c, 0, 1));
        assert_eq!(points[2], Point::parse(&c, "-0.5", "2.25").unwrap());
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let c = ctx();
        let file = seed_file("0,0\nno-comma-here\n1,banana\n3,4\n");
        let points = read_starting_points(&c, file.path(), 128).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1], Point::from_i64(&c, 3, 4));
    }

    #[test]
    fn missing_file_is_fatal() {
        let c = ctx();
        let err =
            read_starting_points(&c, Path::new("/nonexistent/seeds.txt"), 128).unwrap_err();
        assert!(matches!(err, SeedError::Open { .. }));
    }

    #[test]
    fn tiny_buffer_still_reads_whole_lines() {
        let c = ctx();
        let file = seed_file("0.12345678901234567890,-7\n");
        let points = read_starting_points(&c, file.path(), 1).unwrap();
        assert_eq!(points.len(), 1);
    }
}
