//! Plugin state files.
//!
//! One `<port>|<value>` pair per line. Blank lines and a terminating `\` are ignored.
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to read plugin state {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("line {line}: expected `<port>|<value>`, found {text:?}")]
    Parse { line: usize, text: String },
}

/// Parse state text into `(port, value)` pairs.
pub fn parse(text: &str) -> Result<Vec<(u32, f32)>, StateError> {
    let mut values = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line == "\\" {
            continue;
        }
        let error = || StateError::Parse {
            line: idx + 1,
            text: raw.to_owned(),
        };
        let (port, value) = line.split_once('|').ok_or_else(error)?;
        let port = port.trim().parse().map_err(|_| error())?;
        let value = value.trim().parse().map_err(|_| error())?;
        values.push((port, value));
    }
    Ok(values)
}

pub fn read(path: &Path) -> Result<Vec<(u32, f32)>, StateError> {
    let text = std::fs::read_to_string(path).map_err(|source| StateError::Io {
        path: path.to_owned(),
        source,
    })?;
    let values = parse(&text)?;
    tracing::debug!("loaded {} port values from {}", values.len(), path.display());
    Ok(values)
}
