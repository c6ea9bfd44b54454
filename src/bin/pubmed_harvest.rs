use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{ArgGroup, Parser};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use pubmed_harvest::config::{ConfigLoader, HarvestConfig};
use pubmed_harvest::error::HarvestError;
use pubmed_harvest::eutils::EutilsHttpClient;
use pubmed_harvest::harvest::Harvester;
use pubmed_harvest::input::InputSource;
use pubmed_harvest::output::JsonOutput;

#[derive(Parser)]
#[command(name = "pubmed-harvest")]
#[command(about = "Fetch PubMed records for a stream of PMIDs: MeSH term index plus rotated XML archives")]
#[command(version, author)]
#[command(group(ArgGroup::new("input").required(true).args(["stdin", "file"])))]
struct Cli {
    /// Read pmids from stdin, one per line
    #[arg(short = 'c', long)]
    stdin: bool,

    /// Input file with one pmid per line
    #[arg(short = 'f', long)]
    file: Option<Utf8PathBuf>,

    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<String>,

    /// File to write pmids and MeSH terms
    #[arg(short = 'M', long)]
    mesh_file: Option<String>,

    /// Directory for the term index and XML chunks
    #[arg(short = 'o', long)]
    output_dir: Option<Utf8PathBuf>,

    /// Number of records per output file
    #[arg(short = 'n', long)]
    records_per_file: Option<usize>,

    /// Number of records per http request
    #[arg(short = 't', long)]
    batch_size: Option<usize>,

    /// Number of records per http request in the reduced-load window
    #[arg(short = 'T', long)]
    batch_size_reduced: Option<usize>,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn apply(&self, config: &mut HarvestConfig) {
        if let Some(mesh_file) = &self.mesh_file {
            config.output.term_index_file = mesh_file.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
        if let Some(records) = self.records_per_file {
            config.records_per_file = records;
        }
        if let Some(size) = self.batch_size {
            config.batch.normal = size;
        }
        if let Some(size) = self.batch_size_reduced {
            config.batch.reduced_load = size;
        }
    }

    fn input(&self) -> InputSource {
        match &self.file {
            Some(path) if !self.stdin => InputSource::File(path.clone()),
            _ => InputSource::Stdin,
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::InvalidIdentifier(_) | HarvestError::InputRead(_) => 2,
        err if err.is_remote() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    let source = cli.input().open()?;
    let fetcher = EutilsHttpClient::new(config.remote.clone())?;
    let mut harvester = Harvester::new(config, fetcher)?;
    let summary = harvester.run(source)?;

    if cli.json {
        JsonOutput::print_summary(&summary).into_diagnostic()?;
    }
    Ok(())
}
