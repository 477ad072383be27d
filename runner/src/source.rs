use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

const COMMENT_PREFIX: char = '#';

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to open {}: {}", .0.display(), .1)]
    Open(PathBuf, #[source] std::io::Error),
    #[error("Failed to read {}: {}", .0.display(), .1)]
    Read(PathBuf, #[source] std::io::Error),
}

/// collect every non-empty line that does not start with `#`, in input order
pub fn parse_lines<R: BufRead>(reader: R) -> std::io::Result<Vec<String>> {
    let mut lines = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let line = line.strip_suffix('\r').unwrap_or(&line);

        if !line.is_empty() && !line.starts_with(COMMENT_PREFIX) {
            lines.push(line.to_owned());
        }
    }

    Ok(lines)
}

pub fn read_lines(path: &Path) -> Result<Vec<String>, SourceError> {
    let file = File::open(path).map_err(|error| SourceError::Open(path.to_owned(), error))?;
    let lines = parse_lines(BufReader::new(file))
        .map_err(|error| SourceError::Read(path.to_owned(), error))?;

    debug!(path = ?path, lines = lines.len(), "Loaded line source");

    Ok(lines)
}
