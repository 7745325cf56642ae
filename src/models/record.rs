//! The vulnerability record and its severity metrics.

use chrono::{DateTime, Utc};
use clap::{builder::PossibleValue, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Represents one disclosed vulnerability entry.
///
/// The `id` is the canonical identifier assigned by the upstream authority
/// (e.g. CVE-2021-44228). It is globally unique across all feeds and never
/// changes, but every other field may be superseded by a later sync.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VulnRecord {
    /// The CVE identifier.
    /// Example: CVE-2012-6708
    pub id: String,
    /// When the CVE was published.
    pub published_at: DateTime<Utc>,
    /// When the CVE was last modified upstream.
    pub modified_at: DateTime<Utc>,
    /// The localized descriptions of the CVE.
    /// Example: [{"lang": "en", "value": "jQuery before 1.9.0 is vulnerable to [...]"}]
    pub descriptions: Vec<Description>,
    /// The reference URLs attached to the CVE, in feed order.
    pub references: Vec<Reference>,
    /// The CVSS metrics, when the feed provides them.
    pub metrics: Option<SeverityMetrics>,
    /// The CNA that assigned the identifier.
    /// Example: cve@mitre.org
    pub assigner: Option<String>,
    /// The original feed item, retained for fields not modeled explicitly.
    pub raw: serde_json::Value,
}

impl VulnRecord {
    /// Returns the description in the given language, if any.
    pub fn description(&self, lang: &str) -> Option<&str> {
        self.descriptions
            .iter()
            .find(|d| d.lang == lang)
            .map(|d| d.value.as_str())
    }

    /// The severity label derived from the CVSS metrics.
    pub fn severity(&self) -> Severity {
        self.metrics
            .as_ref()
            .map(|m| m.severity)
            .unwrap_or(Severity::Unknown)
    }

    /// The CVSS base score, if metrics are present.
    pub fn base_score(&self) -> Option<f64> {
        self.metrics.as_ref().map(|m| m.base_score)
    }
}

/// A localized description of a record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Description {
    /// The language of the description.
    /// Example: en
    pub lang: String,
    /// The content of the description.
    pub value: String,
}

/// A reference attached to a record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    /// The URL of the reference.
    pub url: Option<String>,
    /// The name of the reference, often the URL again.
    pub name: Option<String>,
}

/// The commonly queried part of the CVSS data. The scheme is version-tagged
/// since scoring schemes evolve; the full data stays in the record's raw
/// payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeverityMetrics {
    /// The version of CVSS.
    /// Example: 3.1
    pub version: String,
    /// The vector string.
    /// Example: CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:C/C:H/I:H/A:H
    pub vector: String,
    /// The base score.
    pub base_score: f64,
    /// The severity label derived from the base score.
    pub severity: Severity,
}

impl SeverityMetrics {
    /// Builds the metrics from a CVSS version, vector and base score,
    /// deriving the severity label.
    pub fn new(version: &str, vector: &str, base_score: f64) -> Self {
        Self {
            version: version.to_string(),
            vector: vector.to_string(),
            base_score,
            severity: Severity::from_score(version, base_score),
        }
    }
}

/// The severity label of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// CVSS3 score of exactly 0.0
    None,
    /// No metrics are available for the record
    Unknown,
    Low,
    Medium,
    High,
    /// CVSS3 only, score of 9.0 or above
    Critical,
}

impl Severity {
    /// Derives the label from a CVSS base score.
    ///
    /// CVSS2 only defines Low/Medium/High; the Critical band exists since
    /// CVSS3. The thresholds are the official rating scales.
    pub fn from_score(cvss_version: &str, score: f64) -> Self {
        if cvss_version.starts_with('2') {
            if score < 4.0 {
                Severity::Low
            } else if score < 7.0 {
                Severity::Medium
            } else {
                Severity::High
            }
        } else if score == 0.0 {
            Severity::None
        } else if score < 4.0 {
            Severity::Low
        } else if score < 7.0 {
            Severity::Medium
        } else if score < 9.0 {
            Severity::High
        } else {
            Severity::Critical
        }
    }

    /// The lowercase name, as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Unknown => "unknown",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Severity::None),
            "unknown" => Ok(Severity::Unknown),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

impl ValueEnum for Severity {
    /// Lists the variants available for clap
    fn value_variants<'a>() -> &'a [Self] {
        &[
            Severity::None,
            Severity::Unknown,
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ]
    }

    /// Map each value to a possible value in clap
    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(PossibleValue::new(self.as_str()))
    }
}
