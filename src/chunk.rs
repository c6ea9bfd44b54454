use std::fs::{self, File};
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;

use crate::config::OutputConfig;
use crate::domain::{Batch, Pmid};
use crate::error::HarvestError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SealedChunk {
    pub path: Utf8PathBuf,
    pub first: Pmid,
    pub identifiers: usize,
    pub batches: usize,
}

struct OpenChunk {
    path: Utf8PathBuf,
    first: Pmid,
    encoder: GzEncoder<BufWriter<File>>,
    identifiers: usize,
    batches: usize,
}

enum ChunkState {
    Closed,
    Open(OpenChunk),
}

/// Owns the document archive currently being written.
///
/// Closed until the first batch arrives, then Open. Sealing writes the
/// collection closing tag, finishes the gzip stream and returns to Closed;
/// the next batch opens a fresh file named after its first identifier.
pub struct ChunkWriter {
    dir: Utf8PathBuf,
    prefix: String,
    threshold: usize,
    closing_tag: Vec<u8>,
    state: ChunkState,
    sealed: Vec<SealedChunk>,
}

impl ChunkWriter {
    pub fn new(output: &OutputConfig, threshold: usize, closing_tag: Vec<u8>) -> Self {
        Self {
            dir: output.dir.clone(),
            prefix: output.chunk_prefix.clone(),
            threshold: threshold.max(1),
            closing_tag,
            state: ChunkState::Closed,
            sealed: Vec::new(),
        }
    }

    pub fn chunk_path(&self, first: Pmid) -> Utf8PathBuf {
        self.dir.join(format!("{}{first}.xml.gz", self.prefix))
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ChunkState::Open(_))
    }

    /// Identifiers written into the open chunk so far.
    pub fn current_count(&self) -> usize {
        match &self.state {
            ChunkState::Open(chunk) => chunk.identifiers,
            ChunkState::Closed => 0,
        }
    }

    pub fn sealed(&self) -> &[SealedChunk] {
        &self.sealed
    }

    /// Makes room for `batch`: seals the open chunk if the batch would push it
    /// past the threshold, opens a new chunk if none is open. Returns whether
    /// the batch is the first one in its chunk.
    ///
    /// An empty chunk always takes the batch, so a batch larger than the
    /// threshold ends up alone in its own chunk.
    pub fn begin_batch(&mut self, batch: &Batch) -> Result<bool, HarvestError> {
        if let ChunkState::Open(chunk) = &self.state {
            if chunk.identifiers > 0 && chunk.identifiers + batch.len() > self.threshold {
                self.seal()?;
            }
        }
        if let ChunkState::Closed = self.state {
            let first = batch.first().ok_or_else(|| {
                HarvestError::Output("cannot open a chunk for an empty batch".to_string())
            })?;
            self.open(first)?;
        }
        match &self.state {
            ChunkState::Open(chunk) => Ok(chunk.batches == 0),
            ChunkState::Closed => Err(HarvestError::Output("chunk failed to open".to_string())),
        }
    }

    /// Appends stitched bytes for a batch of `identifiers` ids; seals the
    /// chunk once it holds the threshold.
    pub fn append(&mut self, identifiers: usize, bytes: &[u8]) -> Result<(), HarvestError> {
        let ChunkState::Open(chunk) = &mut self.state else {
            return Err(HarvestError::Output(
                "append called with no open chunk".to_string(),
            ));
        };
        chunk
            .encoder
            .write_all(bytes)
            .map_err(|err| HarvestError::Output(format!("write {}: {err}", chunk.path)))?;
        chunk.identifiers += identifiers;
        chunk.batches += 1;
        if chunk.identifiers >= self.threshold {
            self.seal()?;
        }
        Ok(())
    }

    /// Closes the open chunk, if any, leaving a self-contained archive.
    pub fn seal(&mut self) -> Result<Option<SealedChunk>, HarvestError> {
        let ChunkState::Open(mut chunk) = std::mem::replace(&mut self.state, ChunkState::Closed)
        else {
            return Ok(None);
        };
        let path = chunk.path.clone();
        let output_err =
            |err: std::io::Error| HarvestError::Output(format!("seal {path}: {err}"));
        chunk.encoder.write_all(&self.closing_tag).map_err(output_err)?;
        let mut inner = chunk.encoder.finish().map_err(output_err)?;
        inner.flush().map_err(output_err)?;

        let sealed = SealedChunk {
            path: chunk.path,
            first: chunk.first,
            identifiers: chunk.identifiers,
            batches: chunk.batches,
        };
        tracing::info!(
            path = %sealed.path,
            identifiers = sealed.identifiers,
            batches = sealed.batches,
            "sealed chunk"
        );
        self.sealed.push(sealed.clone());
        Ok(Some(sealed))
    }

    /// Seals the final chunk and returns every chunk written in this run.
    pub fn finish(mut self) -> Result<Vec<SealedChunk>, HarvestError> {
        self.seal()?;
        Ok(self.sealed)
    }

    fn open(&mut self, first: Pmid) -> Result<(), HarvestError> {
        ensure_dir(&self.dir)?;
        let path = self.chunk_path(first);
        let file = File::create(path.as_std_path())
            .map_err(|err| HarvestError::Output(format!("create {path}: {err}")))?;
        tracing::info!(path = %path, first = %first, "opened chunk");
        self.state = ChunkState::Open(OpenChunk {
            path,
            first,
            encoder: GzEncoder::new(BufWriter::new(file), Compression::default()),
            identifiers: 0,
            batches: 0,
        });
        Ok(())
    }
}

pub(crate) fn ensure_dir(dir: &Utf8Path) -> Result<(), HarvestError> {
    fs::create_dir_all(dir.as_std_path())
        .map_err(|err| HarvestError::Output(format!("create directory {dir}: {err}")))
}
