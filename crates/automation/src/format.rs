//! The automation file format.
//!
//! One point per line: `<beat>|<port>|<value>|<index>|<plugin_uid>|<break_after>`, where
//! `break_after` is `0` or `1`. Blank lines and the `\` terminator are ignored.
use std::{
    fmt::Write,
    path::{Path, PathBuf},
};

use crate::{AtmPoint, Automation};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read automation file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("line {line}: expected 6 fields, found {found}")]
    FieldCount { line: usize, found: usize },
    #[error("line {line}: invalid {field} {text:?}")]
    Field {
        line: usize,
        field: &'static str,
        text: String,
    },
}

fn field<T: std::str::FromStr>(
    line: usize,
    field: &'static str,
    text: &str,
) -> Result<T, LoadError> {
    text.trim().parse().map_err(|_| LoadError::Field {
        line,
        field,
        text: text.to_owned(),
    })
}

fn parse_line(line: usize, text: &str) -> Result<AtmPoint, LoadError> {
    let fields: Vec<_> = text.split('|').collect();
    let [beat, port, value, index, plugin_uid, break_after] = fields[..] else {
        return Err(LoadError::FieldCount {
            line,
            found: fields.len(),
        });
    };
    let beat: f64 = field(line, "beat", beat)?;
    if !(beat.is_finite() && beat >= 0.0) {
        return Err(LoadError::Field {
            line,
            field: "beat",
            text: beat.to_string(),
        });
    }
    let value: f32 = field(line, "value", value)?;
    if !value.is_finite() {
        return Err(LoadError::Field {
            line,
            field: "value",
            text: value.to_string(),
        });
    }
    let break_after = match break_after.trim() {
        "0" => false,
        "1" => true,
        other => {
            return Err(LoadError::Field {
                line,
                field: "break_after",
                text: other.to_owned(),
            });
        }
    };
    Ok(AtmPoint {
        beat,
        value,
        port: field(line, "port", port)?,
        index: field(line, "index", index)?,
        plugin_uid: field(line, "plugin_uid", plugin_uid)?,
        break_after,
    })
}

impl Automation {
    /// Parse automation text. Any malformed line fails the whole load.
    pub fn parse(text: &str) -> Result<Self, LoadError> {
        let mut points = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line == "\\" {
                continue;
            }
            points.push(parse_line(idx + 1, line)?);
        }
        Ok(Self::from_points(points))
    }

    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_owned(),
            source,
        })?;
        let automation = Self::parse(&text)?;
        tracing::info!(
            "loaded {} automation points for {} plugins from {}",
            automation.num_points(),
            automation.plugins().len(),
            path.display()
        );
        Ok(automation)
    }

    /// Serialize in plugin, port, point order.
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for plugin in self.plugins() {
            for port in plugin.ports() {
                for p in port.points() {
                    let _ = writeln!(
                        text,
                        "{}|{}|{}|{}|{}|{}",
                        p.beat,
                        p.port,
                        p.value,
                        p.index,
                        p.plugin_uid,
                        u8::from(p.break_after)
                    );
                }
            }
        }
        text.push_str("\\\n");
        text
    }
}
