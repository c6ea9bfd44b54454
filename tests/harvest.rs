use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, TimeZone, Utc};
use flate2::read::GzDecoder;

use pubmed_harvest::config::HarvestConfig;
use pubmed_harvest::domain::{Batch, FetchResult, Pmid};
use pubmed_harvest::error::HarvestError;
use pubmed_harvest::eutils::RemoteFetcher;
use pubmed_harvest::harvest::Harvester;
use pubmed_harvest::parser::{PubmedXmlParser, RecordParser};
use pubmed_harvest::schedule::{Clock, Pacer};

/// Serves synthetic efetch responses; even PMIDs carry MeSH headings.
#[derive(Default)]
struct MockEutils {
    calls: Mutex<Vec<Vec<u64>>>,
    fail_on_call: Option<usize>,
}

impl MockEutils {
    fn failing_on(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Vec<u64>> {
        self.calls.lock().unwrap().clone()
    }
}

fn response_for(ids: &[u64]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" ?>\n<!DOCTYPE PubmedArticleSet PUBLIC \"-//NLM//DTD PubMedArticle, 1st January 2024//EN\" \"https://dtd.nlm.nih.gov/ncbi/pubmed/out/pubmed_240101.dtd\">\n<PubmedArticleSet>\n",
    );
    for id in ids {
        xml.push_str("<PubmedArticle><MedlineCitation Status=\"MEDLINE\" Owner=\"NLM\">");
        xml.push_str(&format!("<PMID Version=\"1\">{id}</PMID>"));
        if id % 2 == 0 {
            xml.push_str(
                "<MeshHeadingList><MeshHeading><DescriptorName UI=\"D000818\" MajorTopicYN=\"N\">Animals</DescriptorName></MeshHeading>\
                 <MeshHeading><DescriptorName UI=\"D006801\" MajorTopicYN=\"N\">Humans</DescriptorName>\
                 <QualifierName UI=\"Q000378\" MajorTopicYN=\"N\">metabolism</QualifierName></MeshHeading></MeshHeadingList>",
            );
        }
        xml.push_str("</MedlineCitation></PubmedArticle>\n");
    }
    xml.push_str("</PubmedArticleSet>\n");
    xml
}

impl RemoteFetcher for MockEutils {
    fn fetch(&self, batch: &Batch) -> Result<FetchResult, HarvestError> {
        let ids: Vec<u64> = batch.ids().iter().map(|id| id.get()).collect();
        let mut calls = self.calls.lock().unwrap();
        calls.push(ids.clone());
        if self.fail_on_call == Some(calls.len()) {
            return Err(HarvestError::RemoteStatus {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        let raw = response_for(&ids).into_bytes();
        let records = PubmedXmlParser.parse(&raw)?;
        Ok(FetchResult { records, raw })
    }
}

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Default)]
struct RecordingPacer {
    pauses: Mutex<Vec<Duration>>,
}

impl Pacer for RecordingPacer {
    fn pause(&self, duration: Duration) {
        self.pauses.lock().unwrap().push(duration);
    }
}

fn business_hours() -> FixedClock {
    // Wednesday 10:00 US Eastern
    FixedClock(Utc.with_ymd_and_hms(2024, 3, 13, 15, 0, 0).unwrap())
}

fn config(dir: &Utf8Path, batch_size: usize, records_per_file: usize) -> HarvestConfig {
    let mut config = HarvestConfig::default();
    config.output.dir = dir.to_path_buf();
    config.batch.normal = batch_size;
    config.batch.reduced_load = batch_size;
    config.records_per_file = records_per_file;
    config
}

fn ids(values: &[u64]) -> Vec<Result<Pmid, HarvestError>> {
    values.iter().map(|v| v.to_string().parse()).collect()
}

fn read_gz(path: &Utf8Path) -> String {
    let mut text = String::new();
    GzDecoder::new(File::open(path.as_std_path()).unwrap())
        .read_to_string(&mut text)
        .unwrap();
    text
}

fn temp_dir() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, dir)
}

#[test]
fn three_ids_two_per_batch_two_per_chunk() {
    let (_temp, dir) = temp_dir();
    let mut harvester = Harvester::with_runtime(
        config(&dir, 2, 2),
        MockEutils::default(),
        business_hours(),
        RecordingPacer::default(),
    )
    .unwrap()
    .with_seed(1);

    let summary = harvester.run(ids(&[1001, 1002, 1003])).unwrap();

    assert_eq!(harvester.fetcher().calls(), vec![vec![1001, 1002], vec![1003]]);
    assert_eq!(summary.identifiers, 3);
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.chunks.len(), 2);
    assert_eq!(summary.chunks[0].first.get(), 1001);
    assert_eq!(summary.chunks[0].identifiers, 2);
    assert_eq!(summary.chunks[1].first.get(), 1003);
    assert!(summary.chunks[1].path.as_str().ends_with("pubmed_xml_1003.xml.gz"));

    // one pause between the two requests, none after the last
    assert_eq!(harvester.pacer().pauses.lock().unwrap().len(), 1);

    for chunk in &summary.chunks {
        let text = read_gz(&chunk.path);
        assert_eq!(text.matches("<?xml").count(), 1);
        assert_eq!(text.matches("<PubmedArticleSet>").count(), 1);
        assert_eq!(text.matches("</PubmedArticleSet>").count(), 1);
        assert!(text.trim_end().ends_with("</PubmedArticleSet>"));
    }
}

#[test]
fn chunks_cover_every_identifier_once_in_order() {
    let (_temp, dir) = temp_dir();
    let mut harvester = Harvester::with_runtime(
        config(&dir, 3, 4),
        MockEutils::default(),
        business_hours(),
        RecordingPacer::default(),
    )
    .unwrap();

    let input: Vec<u64> = (1..=7).collect();
    let summary = harvester.run(ids(&input)).unwrap();

    assert_eq!(
        harvester.fetcher().calls(),
        vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]
    );
    assert_eq!(summary.chunks.len(), 2);
    assert_eq!(summary.chunks[1].batches, 2);

    let mut replayed = Vec::new();
    for chunk in &summary.chunks {
        assert!(chunk.identifiers <= 4);
        let text = read_gz(&chunk.path);
        let records = PubmedXmlParser.parse(text.as_bytes()).unwrap();
        assert_eq!(records.len(), chunk.identifiers);
        assert_eq!(text.matches("<!-- breakset -->").count(), chunk.batches);
        replayed.extend(records.iter().map(|record| record.pmid.get()));
    }
    assert_eq!(replayed, input);
}

#[test]
fn term_index_skips_records_without_terms() {
    let (_temp, dir) = temp_dir();
    let mut harvester = Harvester::with_runtime(
        config(&dir, 2, 100),
        MockEutils::default(),
        business_hours(),
        RecordingPacer::default(),
    )
    .unwrap();

    let summary = harvester.run(ids(&[11, 12, 13, 14])).unwrap();
    assert_eq!(summary.term_lines, 2);

    let lines: Vec<String> = BufReader::new(GzDecoder::new(
        File::open(summary.term_index.as_std_path()).unwrap(),
    ))
    .lines()
    .map(Result::unwrap)
    .collect();
    assert_eq!(
        lines,
        vec![
            "12|D000818::Animals|D006801::Humans=Q000378::metabolism",
            "14|D000818::Animals|D006801::Humans=Q000378::metabolism",
        ]
    );
}

#[test]
fn invalid_identifier_aborts_before_any_request() {
    let (_temp, dir) = temp_dir();
    let mut harvester = Harvester::with_runtime(
        config(&dir, 2, 2),
        MockEutils::default(),
        business_hours(),
        RecordingPacer::default(),
    )
    .unwrap();

    let input = vec![
        "abc".parse::<Pmid>(),
        "1001".parse::<Pmid>(),
        "1002".parse::<Pmid>(),
    ];
    let err = harvester.run(input).unwrap_err();
    assert_matches!(err, HarvestError::InvalidIdentifier(_));
    assert!(harvester.fetcher().calls().is_empty());
}

#[test]
fn remote_failure_is_fatal() {
    let (_temp, dir) = temp_dir();
    let mut harvester = Harvester::with_runtime(
        config(&dir, 2, 10),
        MockEutils::failing_on(2),
        business_hours(),
        RecordingPacer::default(),
    )
    .unwrap();

    let err = harvester.run(ids(&[1, 2, 3, 4, 5, 6])).unwrap_err();
    assert_matches!(err, HarvestError::RemoteStatus { status: 503, .. });
    assert_eq!(harvester.fetcher().calls().len(), 2);
}

#[test]
fn exactly_full_final_batch_gets_no_trailing_pause() {
    let (_temp, dir) = temp_dir();
    let mut harvester = Harvester::with_runtime(
        config(&dir, 2, 10),
        MockEutils::default(),
        business_hours(),
        RecordingPacer::default(),
    )
    .unwrap();

    harvester.run(ids(&[1, 2, 3, 4])).unwrap();
    let pauses = harvester.pacer().pauses.lock().unwrap().clone();
    assert_eq!(pauses.len(), 1);
    assert!(pauses[0] >= Duration::from_secs(2) && pauses[0] <= Duration::from_secs(8));
}

#[test]
fn reduced_load_window_uses_larger_batches() {
    let (_temp, dir) = temp_dir();
    let mut config = config(&dir, 2, 100);
    config.batch.reduced_load = 3;
    // Saturday
    let clock = FixedClock(Utc.with_ymd_and_hms(2024, 3, 16, 15, 0, 0).unwrap());
    let mut harvester =
        Harvester::with_runtime(config, MockEutils::default(), clock, RecordingPacer::default())
            .unwrap();

    harvester.run(ids(&[1, 2, 3, 4, 5])).unwrap();
    assert_eq!(harvester.fetcher().calls(), vec![vec![1, 2, 3], vec![4, 5]]);
    let pauses = harvester.pacer().pauses.lock().unwrap().clone();
    assert!(pauses[0] <= Duration::from_millis(1500));
}

#[test]
fn empty_input_writes_no_chunks() {
    let (_temp, dir) = temp_dir();
    let mut harvester = Harvester::with_runtime(
        config(&dir, 2, 2),
        MockEutils::default(),
        business_hours(),
        RecordingPacer::default(),
    )
    .unwrap();

    let summary = harvester.run(ids(&[])).unwrap();
    assert!(summary.chunks.is_empty());
    assert_eq!(summary.term_lines, 0);
    assert!(summary.term_index.exists());
}

#[test]
fn term_index_in_subdirectory_is_created() {
    let (_temp, dir) = temp_dir();
    let mut config = config(&dir, 2, 10);
    config.output.term_index_file = "mesh/pubmed.mesh.gz".to_string();
    let mut harvester = Harvester::with_runtime(
        config,
        MockEutils::default(),
        business_hours(),
        RecordingPacer::default(),
    )
    .unwrap();

    let summary = harvester.run(ids(&[2, 3])).unwrap();
    assert_eq!(summary.term_index, dir.join("mesh").join("pubmed.mesh.gz"));
    assert_eq!(summary.term_lines, 1);
    assert!(read_gz(&summary.term_index).starts_with("2|D000818::Animals"));
}
