//! Extraction of PMIDs and MeSH headings from efetch XML.
//!
//! Only the fields the term index needs are read; the raw payload is kept
//! verbatim elsewhere for later reprocessing.

use std::fmt::Display;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::domain::{Pmid, Qualifier, Record, Term};
use crate::error::HarvestError;

/// Turns one raw response body into structured records.
pub trait RecordParser: Send + Sync {
    fn parse(&self, raw: &[u8]) -> Result<Vec<Record>, HarvestError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PubmedXmlParser;

impl RecordParser for PubmedXmlParser {
    fn parse(&self, raw: &[u8]) -> Result<Vec<Record>, HarvestError> {
        parse_pubmed_xml(raw)
    }
}

#[derive(Default)]
struct PartialRecord {
    pmid: Option<Pmid>,
    terms: Vec<Term>,
}

pub fn parse_pubmed_xml(raw: &[u8]) -> Result<Vec<Record>, HarvestError> {
    let mut reader = Reader::from_reader(raw);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut current: Option<PartialRecord> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(malformed)? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                let parent = path.last().map(Vec::as_slice);
                if !open_element(&mut reader, &e, &name, parent, &mut current)? {
                    path.push(name);
                }
            }
            Event::End(e) => {
                path.pop();
                if e.name().as_ref() == b"PubmedArticle" {
                    if let Some(record) = current.take() {
                        let pmid = record.pmid.ok_or_else(|| {
                            HarvestError::MalformedResponse(
                                "PubmedArticle without MedlineCitation/PMID".to_string(),
                            )
                        })?;
                        records.push(Record {
                            pmid,
                            terms: record.terms,
                        });
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !path.is_empty() {
        return Err(HarvestError::MalformedResponse(
            "document ended inside an open element".to_string(),
        ));
    }
    Ok(records)
}

/// Handles one start tag. Returns true when the element was read through its
/// end tag and must not be pushed on the path.
fn open_element(
    reader: &mut Reader<&[u8]>,
    element: &BytesStart<'_>,
    name: &[u8],
    parent: Option<&[u8]>,
    current: &mut Option<PartialRecord>,
) -> Result<bool, HarvestError> {
    if name == b"PubmedArticle" {
        *current = Some(PartialRecord::default());
        return Ok(false);
    }
    let Some(record) = current.as_mut() else {
        return Ok(false);
    };
    match (parent, name) {
        (Some(b"MedlineCitation"), b"PMID") => {
            let text = read_text(reader, b"PMID")?;
            if record.pmid.is_none() {
                let pmid = text.parse::<Pmid>().map_err(|_| {
                    HarvestError::MalformedResponse(format!("PMID element holds [{text}]"))
                })?;
                record.pmid = Some(pmid);
            }
            Ok(true)
        }
        (Some(b"MeshHeadingList"), b"MeshHeading") => {
            record.terms.push(Term {
                code: String::new(),
                label: String::new(),
                qualifiers: Vec::new(),
            });
            Ok(false)
        }
        (Some(b"MeshHeading"), b"DescriptorName") => {
            let code = ui_attribute(element)?;
            let label = read_text(reader, b"DescriptorName")?;
            if let Some(term) = record.terms.last_mut() {
                term.code = code;
                term.label = label;
            }
            Ok(true)
        }
        (Some(b"MeshHeading"), b"QualifierName") => {
            let code = ui_attribute(element)?;
            let label = read_text(reader, b"QualifierName")?;
            if let Some(term) = record.terms.last_mut() {
                term.qualifiers.push(Qualifier { code, label });
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn ui_attribute(element: &BytesStart<'_>) -> Result<String, HarvestError> {
    match element.try_get_attribute(b"UI").map_err(malformed)? {
        Some(attr) => Ok(attr.unescape_value().map_err(malformed)?.into_owned()),
        None => Ok(String::new()),
    }
}

/// Collects the text content of the element whose start tag was just read.
fn read_text(reader: &mut Reader<&[u8]>, end: &[u8]) -> Result<String, HarvestError> {
    let mut text = String::new();
    let mut depth = 0usize;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(malformed)? {
            Event::Text(t) => text.push_str(&t.unescape().map_err(malformed)?),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Event::Start(e) if e.name().as_ref() == end => depth += 1,
            Event::End(e) if e.name().as_ref() == end => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Event::Eof => {
                return Err(HarvestError::MalformedResponse(format!(
                    "unterminated <{}>",
                    String::from_utf8_lossy(end)
                )));
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(text.trim().to_string())
}

fn malformed(err: impl Display) -> HarvestError {
    HarvestError::MalformedResponse(err.to_string())
}
