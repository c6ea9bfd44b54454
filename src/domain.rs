use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// A PubMed identifier. Always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pmid(u64);

impl Pmid {
    pub fn new(value: u64) -> Result<Self, HarvestError> {
        if value == 0 {
            return Err(HarvestError::InvalidIdentifier(
                "pmids are positive integers; found [0]".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Pmid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Pmid {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(HarvestError::InvalidIdentifier("empty line".to_string()));
        }
        let parsed: i64 = trimmed.parse().map_err(|_| {
            HarvestError::InvalidIdentifier(format!(
                "expecting pmid (integer); found [{trimmed}]"
            ))
        })?;
        if parsed <= 0 {
            return Err(HarvestError::InvalidIdentifier(format!(
                "pmids are positive integers; found [{trimmed}]"
            )));
        }
        Ok(Self(parsed as u64))
    }
}

/// Identifiers sent together in one remote request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    ids: Vec<Pmid>,
}

impl Batch {
    pub fn new(ids: Vec<Pmid>) -> Self {
        Self { ids }
    }

    pub fn ids(&self) -> &[Pmid] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// First identifier; names the chunk when this batch opens one.
    pub fn first(&self) -> Option<Pmid> {
        self.ids.first().copied()
    }

    pub fn joined(&self, separator: &str) -> String {
        self.ids
            .iter()
            .map(Pmid::to_string)
            .collect::<Vec<_>>()
            .join(separator)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qualifier {
    pub code: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub code: String,
    pub label: String,
    pub qualifiers: Vec<Qualifier>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub pmid: Pmid,
    pub terms: Vec<Term>,
}

/// Parsed records plus the exact bytes the remote call returned.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub records: Vec<Record>,
    pub raw: Vec<u8>,
}
