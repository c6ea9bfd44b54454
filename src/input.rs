use std::fs::File;
use std::io::{self, BufRead, BufReader};

use camino::Utf8PathBuf;

use crate::domain::Pmid;
use crate::error::HarvestError;

#[derive(Debug, Clone)]
pub enum InputSource {
    Stdin,
    File(Utf8PathBuf),
}

impl InputSource {
    pub fn open(&self) -> Result<IdentifierSource<Box<dyn BufRead>>, HarvestError> {
        let reader: Box<dyn BufRead> = match self {
            InputSource::Stdin => Box::new(BufReader::new(io::stdin())),
            InputSource::File(path) => {
                let file = File::open(path.as_std_path())
                    .map_err(|err| HarvestError::InputRead(format!("open {path}: {err}")))?;
                Box::new(BufReader::new(file))
            }
        };
        Ok(IdentifierSource::new(reader))
    }
}

/// Lazily yields one validated identifier per input line.
///
/// The first invalid line is yielded as an error and the iterator is fused
/// afterwards: callers abort the run rather than skip the line.
pub struct IdentifierSource<R> {
    reader: R,
    line: usize,
    buf: Vec<u8>,
    done: bool,
}

impl<R: BufRead> IdentifierSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: Vec::new(),
            done: false,
        }
    }

    /// 1-based number of the last line read.
    pub fn line(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for IdentifierSource<R> {
    type Item = Result<Pmid, HarvestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                self.line += 1;
                let line = self.line;
                let parsed = match std::str::from_utf8(&self.buf) {
                    Ok(text) => text.parse::<Pmid>().map_err(|err| match err {
                        HarvestError::InvalidIdentifier(reason) => {
                            HarvestError::InvalidIdentifier(format!("line {line}: {reason}"))
                        }
                        other => other,
                    }),
                    Err(_) => Err(HarvestError::InvalidIdentifier(format!(
                        "line {line}: expecting pmid (integer); found [{}]",
                        String::from_utf8_lossy(&self.buf).trim()
                    ))),
                };
                if parsed.is_err() {
                    self.done = true;
                }
                Some(parsed)
            }
            Err(err) => {
                self.done = true;
                Some(Err(HarvestError::InputRead(err.to_string())))
            }
        }
    }
}
