//! JSON payloads of the search API: studies, term list and related terms.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;

/// One study of a query result. Every field is optional upstream.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Study {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Option<String>,
    #[serde(default)]
    pub journal: Option<String>,
    #[serde(default)]
    pub year: Option<Value>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pmid: Option<Value>,
    #[serde(default, rename = "PMID")]
    pmid_upper: Option<Value>,
    #[serde(default)]
    pubmed_id: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
}

impl Study {
    /// PubMed id from the first populated of `pmid`, `PMID`, `pubmed_id`, `id`.
    pub fn pubmed_id(&self) -> Option<String> {
        [&self.pmid, &self.pmid_upper, &self.pubmed_id, &self.id]
            .into_iter()
            .flatten()
            .find_map(scalar_text)
    }

    pub fn pubmed_url(&self) -> Option<String> {
        self.pubmed_id()
            .map(|id| format!("https://pubmed.ncbi.nlm.nih.gov/{id}/"))
    }

    /// Publication year; numeric strings are accepted.
    pub fn year(&self) -> Option<i32> {
        match self.year.as_ref()? {
            Value::Number(n) => n.as_i64().map(|y| y as i32),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum YearOrder {
    NewestFirst,
    OldestFirst,
}

/// Stable sort by year; studies without a year count as year 0.
pub fn sort_studies(studies: &mut [Study], order: YearOrder) {
    studies.sort_by_key(|s| {
        let y = s.year().unwrap_or(0);
        match order {
            YearOrder::NewestFirst => -(y as i64),
            YearOrder::OldestFirst => y as i64,
        }
    });
}

#[derive(Deserialize)]
struct StudiesEnvelope {
    #[serde(default)]
    results: Option<Vec<Study>>,
}

/// Parse `{ "results": [...] }`; a missing list yields no studies.
pub fn parse_studies(json: &str) -> Result<Vec<Study>, ApiError> {
    let env: StudiesEnvelope = serde_json::from_str(json)?;
    Ok(env.results.unwrap_or_default())
}

#[derive(Deserialize)]
struct TermsEnvelope {
    #[serde(default)]
    terms: Option<Vec<String>>,
}

pub fn parse_terms(json: &str) -> Result<Vec<String>, ApiError> {
    let env: TermsEnvelope = serde_json::from_str(json)?;
    Ok(env.terms.unwrap_or_default())
}

/// A term co-occurring with the selected one.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RelatedTerm {
    pub term: String,
    #[serde(default)]
    pub co_count: Option<u64>,
    #[serde(default)]
    pub jaccard: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RelatedPayload {
    List(Vec<RelatedTerm>),
    Wrapped {
        #[serde(default)]
        related: Vec<RelatedTerm>,
    },
}

/// Accepts either a bare list or `{ "related": [...] }`.
pub fn parse_related_terms(json: &str) -> Result<Vec<RelatedTerm>, ApiError> {
    Ok(match serde_json::from_str::<RelatedPayload>(json)? {
        RelatedPayload::List(items) => items,
        RelatedPayload::Wrapped { related } => related,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelatedOrder {
    CoCount,
    Jaccard,
}

/// Descending sort by the chosen score; missing scores count as zero.
pub fn sort_related(terms: &mut [RelatedTerm], order: RelatedOrder) {
    match order {
        RelatedOrder::CoCount => terms.sort_by(|a, b| b.co_count.unwrap_or(0).cmp(&a.co_count.unwrap_or(0))),
        RelatedOrder::Jaccard => terms.sort_by(|a, b| {
            b.jaccard
                .unwrap_or(0.0)
                .total_cmp(&a.jaccard.unwrap_or(0.0))
        }),
    }
}
