use std::time::Instant;

use camino::Utf8PathBuf;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::batch::{BatchAccumulator, Offer};
use crate::chunk::{ChunkWriter, SealedChunk, ensure_dir};
use crate::config::HarvestConfig;
use crate::domain::{Batch, Pmid};
use crate::error::HarvestError;
use crate::eutils::RemoteFetcher;
use crate::schedule::{Clock, Pacer, RateSchedule, SystemClock, ThreadPacer};
use crate::stitch::DocumentStitcher;
use crate::terms::TermIndexWriter;

const PROGRESS_EVERY: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct HarvestSummary {
    pub identifiers: usize,
    pub batches: usize,
    pub term_lines: usize,
    pub term_index: Utf8PathBuf,
    pub chunks: Vec<SealedChunk>,
}

struct RunState {
    identifiers: usize,
    batches: usize,
    chunks: ChunkWriter,
    terms: TermIndexWriter,
}

/// Drives a whole run: read, batch, fetch, index terms, stitch, archive.
///
/// Strictly sequential. Any error ends the run; archives already sealed stay
/// valid, the open chunk and term index are left as they are.
pub struct Harvester<F, C = SystemClock, P = ThreadPacer> {
    config: HarvestConfig,
    schedule: RateSchedule,
    stitcher: DocumentStitcher,
    fetcher: F,
    clock: C,
    pacer: P,
    rng: StdRng,
}

impl<F: RemoteFetcher> Harvester<F, SystemClock, ThreadPacer> {
    pub fn new(config: HarvestConfig, fetcher: F) -> Result<Self, HarvestError> {
        Self::with_runtime(config, fetcher, SystemClock, ThreadPacer)
    }
}

impl<F: RemoteFetcher, C: Clock, P: Pacer> Harvester<F, C, P> {
    pub fn with_runtime(
        config: HarvestConfig,
        fetcher: F,
        clock: C,
        pacer: P,
    ) -> Result<Self, HarvestError> {
        config.validate()?;
        if config.batch.normal > config.records_per_file
            || config.batch.reduced_load > config.records_per_file
        {
            tracing::warn!(
                records_per_file = config.records_per_file,
                "batch size exceeds the rotation threshold; such batches get a chunk of their own"
            );
        }
        Ok(Self {
            schedule: RateSchedule::new(&config),
            stitcher: DocumentStitcher::pubmed()?,
            config,
            fetcher,
            clock,
            pacer,
            rng: StdRng::from_entropy(),
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn pacer(&self) -> &P {
        &self.pacer
    }

    pub fn run<I>(&mut self, identifiers: I) -> Result<HarvestSummary, HarvestError>
    where
        I: IntoIterator<Item = Result<Pmid, HarvestError>>,
    {
        let output = self.config.output.clone();
        ensure_dir(&output.dir)?;
        let mut state = RunState {
            identifiers: 0,
            batches: 0,
            chunks: ChunkWriter::new(
                &output,
                self.config.records_per_file,
                self.stitcher.closing_tag(),
            ),
            terms: TermIndexWriter::create(&output.term_index_path())?,
        };
        let mut accumulator = BatchAccumulator::new(self.schedule.clone());

        for id in identifiers {
            let id = id?;
            state.identifiers += 1;
            if let Offer::Full(batch) = accumulator.offer(id, self.clock.now()) {
                self.process_batch(batch, &mut state)?;
            }
            if state.identifiers % PROGRESS_EVERY == 0 {
                tracing::info!(identifiers = state.identifiers, "progress");
            }
        }
        if let Some(batch) = accumulator.take_partial() {
            self.process_batch(batch, &mut state)?;
        }

        let chunks = state.chunks.finish()?;
        let (term_index, term_lines) = state.terms.finish()?;
        tracing::info!(
            identifiers = state.identifiers,
            batches = state.batches,
            chunks = chunks.len(),
            term_lines,
            "harvest complete"
        );
        Ok(HarvestSummary {
            identifiers: state.identifiers,
            batches: state.batches,
            term_lines,
            term_index,
            chunks,
        })
    }

    fn process_batch(&mut self, batch: Batch, state: &mut RunState) -> Result<(), HarvestError> {
        // The politeness delay separates requests; none follows the last batch.
        if state.batches > 0 {
            self.pause();
        }

        let result = self.fetcher.fetch(&batch)?;
        if result.records.len() != batch.len() {
            tracing::warn!(
                requested = batch.len(),
                returned = result.records.len(),
                first = ?batch.first(),
                "remote returned a different number of records than requested"
            );
        }
        state.terms.write_records(&result.records)?;

        let first_in_chunk = state.chunks.begin_batch(&batch)?;
        let stitched = self.stitcher.stitch(&result.raw, first_in_chunk)?;
        state.chunks.append(batch.len(), &stitched)?;
        state.batches += 1;
        Ok(())
    }

    fn pause(&mut self) {
        let now = self.clock.now();
        let delay = self.schedule.delay(now, &mut self.rng);
        if self.schedule.is_reduced_load(now) {
            tracing::debug!("reduced-load window");
        }
        let started = Instant::now();
        self.pacer.pause(delay);
        tracing::debug!(
            requested_ms = delay.as_millis() as u64,
            slept_ms = started.elapsed().as_millis() as u64,
            "end sleep"
        );
    }
}
