use std::fs::File;
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::chunk::ensure_dir;
use crate::domain::{Record, Term};
use crate::error::HarvestError;

/// Formats one term-index line, or `None` for a record with no terms.
///
/// `<pmid>|<code>::<label>[=<qcode>::<qlabel>[&...]]|...`
pub fn term_line(record: &Record) -> Option<String> {
    if record.terms.is_empty() {
        return None;
    }
    let mut line = record.pmid.to_string();
    for term in &record.terms {
        line.push('|');
        push_term(&mut line, term);
    }
    Some(line)
}

fn push_term(line: &mut String, term: &Term) {
    line.push_str(&term.code);
    line.push_str("::");
    line.push_str(&term.label);
    for (index, qualifier) in term.qualifiers.iter().enumerate() {
        line.push(if index == 0 { '=' } else { '&' });
        line.push_str(&qualifier.code);
        line.push_str("::");
        line.push_str(&qualifier.label);
    }
}

/// Gzip-compressed, append-only term index for the whole run.
pub struct TermIndexWriter {
    path: Utf8PathBuf,
    encoder: GzEncoder<BufWriter<File>>,
    lines: usize,
}

impl TermIndexWriter {
    pub fn create(path: &Utf8Path) -> Result<Self, HarvestError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            ensure_dir(parent)?;
        }
        let file = File::create(path.as_std_path())
            .map_err(|err| HarvestError::Output(format!("create {path}: {err}")))?;
        Ok(Self {
            path: path.to_path_buf(),
            encoder: GzEncoder::new(BufWriter::new(file), Compression::default()),
            lines: 0,
        })
    }

    /// Writes a line for every record that carries terms; returns how many.
    pub fn write_records(&mut self, records: &[Record]) -> Result<usize, HarvestError> {
        let mut written = 0;
        for line in records.iter().filter_map(term_line) {
            writeln!(self.encoder, "{line}")
                .map_err(|err| HarvestError::Output(format!("write {}: {err}", self.path)))?;
            written += 1;
        }
        self.lines += written;
        Ok(written)
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn finish(self) -> Result<(Utf8PathBuf, usize), HarvestError> {
        let path = self.path;
        let mut inner = self
            .encoder
            .finish()
            .map_err(|err| HarvestError::Output(format!("finish {path}: {err}")))?;
        inner
            .flush()
            .map_err(|err| HarvestError::Output(format!("flush {path}: {err}")))?;
        Ok((path, self.lines))
    }
}
