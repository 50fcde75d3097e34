//! Tiny-v1 mapping files: row-oriented, tab-separated, one record per line.
//!
//! Header: `v1<TAB>official<TAB>intermediary`. Records are `CLASS old new`,
//! `FIELD owner descriptor old new` and `METHOD owner descriptor old new`.
//! Lines starting with `#` are comments; blank lines are ignored.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use crate::remapper::{RemapError, Remapper};

const HEADER: &str = "v1\tofficial\tintermediary";

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("mapping file has no tiny header (empty file?)")]
    MissingHeader,
    #[error("malformed tiny header: {0:?}")]
    BadHeader(String),
    #[error("line {line}: {kind} record has {found} columns, expected {expected}")]
    ColumnCount {
        line: usize,
        kind: String,
        found: usize,
        expected: usize,
    },
    #[error("line {line}: unknown record kind {kind:?}")]
    UnknownKind { line: usize, kind: String },
    #[error(transparent)]
    Conflict(#[from] RemapError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Loads a tiny-v1 map into `remapper`. With `reversed` set, old and new
/// names are swapped on load, inverting a previously written map.
/// Returns the number of records loaded.
pub fn read_tiny_v1<R: BufRead>(
    reader: R,
    remapper: &mut Remapper,
    reversed: bool,
) -> Result<usize, MappingError> {
    let mut lines = reader.lines();
    let header = lines.next().ok_or(MappingError::MissingHeader)??;
    let tokens: Vec<&str> = header.split('\t').collect();
    if tokens.len() != 3 || tokens[0] != "v1" {
        return Err(MappingError::BadHeader(header));
    }

    let mut records = 0usize;
    for (idx, line) in lines.enumerate() {
        let line = line?;
        let line_no = idx + 2;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        match cols[0] {
            "CLASS" => {
                expect_columns(line_no, &cols, 3)?;
                let (old, new) = orient(cols[1], cols[2], reversed);
                remapper.remap_class(old, new)?;
            }
            "FIELD" => {
                expect_columns(line_no, &cols, 5)?;
                let (old, new) = orient(cols[3], cols[4], reversed);
                remapper.remap_field(cols[1], cols[2], old, new)?;
            }
            "METHOD" => {
                expect_columns(line_no, &cols, 5)?;
                let (old, new) = orient(cols[3], cols[4], reversed);
                remapper.remap_method(cols[1], cols[2], old, new)?;
            }
            other => {
                return Err(MappingError::UnknownKind {
                    line: line_no,
                    kind: other.to_string(),
                });
            }
        }
        records += 1;
    }
    Ok(records)
}

fn orient<'a>(first: &'a str, second: &'a str, reversed: bool) -> (&'a str, &'a str) {
    if reversed {
        (second, first)
    } else {
        (first, second)
    }
}

fn expect_columns(line: usize, cols: &[&str], expected: usize) -> Result<(), MappingError> {
    if cols.len() != expected {
        return Err(MappingError::ColumnCount {
            line,
            kind: cols[0].to_string(),
            found: cols.len(),
            expected,
        });
    }
    Ok(())
}

/// Copies a tiny-v1 map with the last two columns of each record swapped,
/// preserving comments. Returns the number of records written.
pub fn invert_tiny_v1<R: BufRead, W: Write>(
    reader: R,
    mut writer: W,
) -> Result<usize, MappingError> {
    let mut lines = reader.lines();
    let header = lines.next().ok_or(MappingError::MissingHeader)??;
    let tokens: Vec<&str> = header.split('\t').collect();
    if tokens.len() != 3 || tokens[0] != "v1" {
        return Err(MappingError::BadHeader(header));
    }
    writeln!(writer, "{header}")?;

    let mut records = 0usize;
    for line in lines {
        let line = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            writeln!(writer, "{line}")?;
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 3 {
            writeln!(writer)?;
            continue;
        }
        let mut swapped = cols.clone();
        swapped.swap(cols.len() - 2, cols.len() - 1);
        writeln!(writer, "{}", swapped.join("\t"))?;
        records += 1;
    }
    Ok(records)
}

/// Writes tiny-v1 records, one per proposed rename.
#[derive(Debug)]
pub struct MappingWriter {
    out: BufWriter<File>,
}

impl MappingWriter {
    /// Creates (or truncates) a map file and writes the header.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "{HEADER}")?;
        Ok(MappingWriter { out })
    }

    /// Opens a map file for appending; the header is written only when the
    /// file is empty.
    pub fn append(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let empty = file.metadata()?.len() == 0;
        let mut out = BufWriter::new(file);
        if empty {
            writeln!(out, "{HEADER}")?;
        }
        Ok(MappingWriter { out })
    }

    pub fn class(&mut self, old: &str, new: &str) -> std::io::Result<()> {
        writeln!(self.out, "CLASS\t{old}\t{new}")
    }

    pub fn field(
        &mut self,
        owner: &str,
        descriptor: &str,
        old: &str,
        new: &str,
    ) -> std::io::Result<()> {
        writeln!(self.out, "FIELD\t{owner}\t{descriptor}\t{old}\t{new}")
    }

    pub fn method(
        &mut self,
        owner: &str,
        descriptor: &str,
        old: &str,
        new: &str,
    ) -> std::io::Result<()> {
        writeln!(self.out, "METHOD\t{owner}\t{descriptor}\t{old}\t{new}")
    }

    pub fn finish(mut self) -> std::io::Result<()> {
        self.out.flush()
    }
}
