use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Rotation threshold: identifiers per document archive.
    pub records_per_file: usize,
    pub batch: BatchSizes,
    pub delay: DelayRanges,
    pub window: LoadWindow,
    pub remote: RemoteConfig,
    pub output: OutputConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            records_per_file: 50_000,
            batch: BatchSizes::default(),
            delay: DelayRanges::default(),
            window: LoadWindow::default(),
            remote: RemoteConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchSizes {
    pub normal: usize,
    pub reduced_load: usize,
}

impl Default for BatchSizes {
    fn default() -> Self {
        Self {
            normal: 50,
            reduced_load: 150,
        }
    }
}

/// Longest politeness delay a config may ask for: one day.
pub const MAX_DELAY_SECS: f64 = 86_400.0;

/// Inclusive range in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct DelayRange {
    pub min_secs: f64,
    pub max_secs: f64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct DelayRanges {
    pub normal: DelayRange,
    pub reduced_load: DelayRange,
}

impl Default for DelayRanges {
    fn default() -> Self {
        Self {
            normal: DelayRange {
                min_secs: 2.0,
                max_secs: 8.0,
            },
            reduced_load: DelayRange {
                min_secs: 0.25,
                max_secs: 1.5,
            },
        }
    }
}

/// Business hours of the remote service, in its own local time.
///
/// Hours in `[business_start_hour, business_end_hour)` on weekdays are the
/// normal window; everything else is the reduced-load window.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadWindow {
    pub utc_offset_hours: i32,
    pub business_start_hour: u32,
    pub business_end_hour: u32,
    pub weekends_reduced: bool,
}

impl Default for LoadWindow {
    fn default() -> Self {
        // NCBI asks for large jobs outside 9:00-18:00 US Eastern and on weekends.
        Self {
            utc_offset_hours: -5,
            business_start_hour: 9,
            business_end_hour: 18,
            weekends_reduced: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub database: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    pub api_key: Option<String>,
    pub tool: Option<String>,
    pub email: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi".to_string(),
            database: "pubmed".to_string(),
            timeout_secs: 500,
            max_retries: 3,
            retry_base_delay_ms: 200,
            api_key: None,
            tool: Some("pubmed-harvest".to_string()),
            email: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: Utf8PathBuf,
    pub term_index_file: String,
    pub chunk_prefix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: Utf8PathBuf::from("."),
            term_index_file: "pubmed.mesh.gz".to_string(),
            chunk_prefix: "pubmed_xml_".to_string(),
        }
    }
}

impl OutputConfig {
    pub fn term_index_path(&self) -> Utf8PathBuf {
        self.dir.join(&self.term_index_file)
    }
}

impl HarvestConfig {
    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.records_per_file == 0 {
            return Err(HarvestError::InvalidConfig(
                "records_per_file must be positive".to_string(),
            ));
        }
        if self.batch.normal == 0 || self.batch.reduced_load == 0 {
            return Err(HarvestError::InvalidConfig(
                "batch sizes must be positive".to_string(),
            ));
        }
        for (name, range) in [
            ("normal", self.delay.normal),
            ("reduced_load", self.delay.reduced_load),
        ] {
            if !range.max_secs.is_finite() || range.max_secs > MAX_DELAY_SECS {
                return Err(HarvestError::InvalidConfig(format!(
                    "{name} delay max_secs {} must be finite and at most {MAX_DELAY_SECS}",
                    range.max_secs
                )));
            }
            if !(range.min_secs >= 0.0 && range.min_secs <= range.max_secs) {
                return Err(HarvestError::InvalidConfig(format!(
                    "{name} delay range [{}, {}] is not a valid non-negative range",
                    range.min_secs, range.max_secs
                )));
            }
        }
        let window = &self.window;
        if window.business_start_hour > 23 || window.business_end_hour > 24 {
            return Err(HarvestError::InvalidConfig(
                "business hours must lie within 0..=24".to_string(),
            ));
        }
        if window.business_start_hour > window.business_end_hour {
            return Err(HarvestError::InvalidConfig(
                "business_start_hour must not be after business_end_hour".to_string(),
            ));
        }
        if !(-23..=23).contains(&window.utc_offset_hours) {
            return Err(HarvestError::InvalidConfig(format!(
                "utc_offset_hours {} is out of range",
                window.utc_offset_hours
            )));
        }
        Ok(())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the JSON config at `path`, or the defaults when no path is given.
    pub fn resolve(path: Option<&str>) -> Result<HarvestConfig, HarvestError> {
        let config = match path {
            Some(path) => {
                let config_path = PathBuf::from(path);
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
                Self::parse(&content)?
            }
            None => HarvestConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<HarvestConfig, HarvestError> {
        serde_json::from_str(content).map_err(|err| HarvestError::ConfigParse(err.to_string()))
    }
}
