//! Decode a gzipped NVD 1.1 feed body into vulnerability records.

use flate2::read::GzDecoder;
use log::{debug, trace};
use serde::Deserialize;
use std::io::Read;

use crate::error::{Error, Result};
use crate::feeds::parse_feed_date;
use crate::models::{Description, Reference, SeverityMetrics, VulnRecord};

/// Decompresses and parses a feed body.
///
/// The records are returned in feed order. Any failure leaves the caller's
/// store untouched, since the feed marker only advances after a merge.
pub fn decode(feed: &str, gz_bytes: &[u8]) -> Result<Vec<VulnRecord>> {
    let json = decompress(feed, gz_bytes)?;
    parse(feed, &json)
}

/// Gunzips a feed body.
pub fn decompress(feed: &str, gz_bytes: &[u8]) -> Result<Vec<u8>> {
    trace!("Running decoder::decompress()");
    let mut decoder = GzDecoder::new(gz_bytes);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| malformed(feed, &format!("gzip decompression failed: {}", e)))?;
    Ok(json)
}

/// Parses an uncompressed NVD 1.1 JSON feed.
pub fn parse(feed: &str, json: &[u8]) -> Result<Vec<VulnRecord>> {
    trace!("Running decoder::parse()");
    let file: FeedFile = serde_json::from_slice(json)
        .map_err(|e| malformed(feed, &format!("invalid feed JSON: {}", e)))?;

    // The feed advertises its own schema; refuse anything unexpected
    // rather than silently misparsing it.
    for (key, found, expected) in [
        ("CVE_data_type", &file.data_type, "CVE"),
        ("CVE_data_format", &file.data_format, "MITRE"),
        ("CVE_data_version", &file.data_version, "4.0"),
    ] {
        if let Some(value) = found {
            if value != expected {
                return Err(malformed(
                    feed,
                    &format!("expected {} to be {:?} but got {:?}", key, expected, value),
                ));
            }
        }
    }

    debug!("Feed {} contains {} items", feed, file.items.len());
    let mut records = Vec::with_capacity(file.items.len());
    for item_value in file.items {
        records.push(parse_item(feed, item_value)?);
    }
    Ok(records)
}

/// Parses one `CVE_Items` entry, keeping its raw payload on the record.
fn parse_item(feed: &str, item_value: serde_json::Value) -> Result<VulnRecord> {
    let item: FeedItem = serde_json::from_value(item_value.clone())
        .map_err(|e| malformed(feed, &format!("invalid feed item: {}", e)))?;

    let metrics = item.impact.as_ref().and_then(|impact| {
        if let Some(v3) = &impact.base_metric_v3 {
            Some(SeverityMetrics::new(
                &v3.cvss_v3.version,
                &v3.cvss_v3.vector_string,
                v3.cvss_v3.base_score,
            ))
        } else {
            impact.base_metric_v2.as_ref().map(|v2| {
                SeverityMetrics::new(
                    &v2.cvss_v2.version,
                    &v2.cvss_v2.vector_string,
                    v2.cvss_v2.base_score,
                )
            })
        }
    });

    let id = item.cve.data_meta.id;
    let published_at = parse_feed_date(&item.published_date)
        .map_err(|e| malformed(feed, &format!("{}: {}", id, e)))?;
    let modified_at = parse_feed_date(&item.last_modified_date)
        .map_err(|e| malformed(feed, &format!("{}: {}", id, e)))?;

    Ok(VulnRecord {
        id,
        published_at,
        modified_at,
        descriptions: item
            .cve
            .description
            .description_data
            .into_iter()
            .map(|d| Description {
                lang: d.lang,
                value: d.value,
            })
            .collect(),
        references: item
            .cve
            .references
            .reference_data
            .into_iter()
            .map(|r| Reference {
                url: r.url,
                name: r.name,
            })
            .collect(),
        metrics,
        assigner: item.cve.data_meta.assigner,
        raw: item_value,
    })
}

fn malformed(feed: &str, reason: &str) -> Error {
    Error::MalformedFeed {
        feed: feed.to_string(),
        reason: reason.to_string(),
    }
}

/// The top level of an NVD 1.1 feed file.
#[derive(Debug, Deserialize)]
struct FeedFile {
    #[serde(rename = "CVE_data_type")]
    data_type: Option<String>,
    #[serde(rename = "CVE_data_format")]
    data_format: Option<String>,
    #[serde(rename = "CVE_data_version")]
    data_version: Option<String>,
    /// The items stay as raw JSON so each record can retain its payload.
    #[serde(rename = "CVE_Items", default)]
    items: Vec<serde_json::Value>,
}

/// One entry of `CVE_Items`.
#[derive(Debug, Deserialize)]
struct FeedItem {
    cve: ItemCve,
    impact: Option<ItemImpact>,
    #[serde(rename = "publishedDate")]
    published_date: String,
    #[serde(rename = "lastModifiedDate")]
    last_modified_date: String,
}

#[derive(Debug, Deserialize)]
struct ItemCve {
    #[serde(rename = "CVE_data_meta")]
    data_meta: ItemDataMeta,
    #[serde(default)]
    description: ItemDescriptions,
    #[serde(default)]
    references: ItemReferences,
}

#[derive(Debug, Deserialize)]
struct ItemDataMeta {
    /// The CVE identifier.
    #[serde(rename = "ID")]
    id: String,
    /// The CNA that assigned the identifier.
    #[serde(rename = "ASSIGNER")]
    assigner: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ItemDescriptions {
    #[serde(default)]
    description_data: Vec<ItemDescription>,
}

#[derive(Debug, Deserialize)]
struct ItemDescription {
    lang: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct ItemReferences {
    #[serde(default)]
    reference_data: Vec<ItemReference>,
}

#[derive(Debug, Deserialize)]
struct ItemReference {
    url: Option<String>,
    name: Option<String>,
}

/// The impact block. V3 metrics are preferred when both are present.
#[derive(Debug, Deserialize)]
struct ItemImpact {
    #[serde(rename = "baseMetricV3")]
    base_metric_v3: Option<BaseMetricV3>,
    #[serde(rename = "baseMetricV2")]
    base_metric_v2: Option<BaseMetricV2>,
}

#[derive(Debug, Deserialize)]
struct BaseMetricV3 {
    #[serde(rename = "cvssV3")]
    cvss_v3: CvssData,
}

#[derive(Debug, Deserialize)]
struct BaseMetricV2 {
    #[serde(rename = "cvssV2")]
    cvss_v2: CvssData,
}

#[derive(Debug, Deserialize)]
struct CvssData {
    version: String,
    #[serde(rename = "vectorString")]
    vector_string: String,
    #[serde(rename = "baseScore")]
    base_score: f64,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::Severity;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::json;
    use std::io::Write;

    /// Gzips a byte buffer, the way the NVD publishes its feed bodies.
    pub(crate) fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    /// Builds one `CVE_Items` entry in the NVD 1.1 schema.
    pub(crate) fn feed_item(
        id: &str,
        published: &str,
        modified: &str,
        description: &str,
        score: Option<f64>,
    ) -> serde_json::Value {
        let mut item = json!({
            "cve": {
                "CVE_data_meta": {"ID": id, "ASSIGNER": "cve@mitre.org"},
                "description": {"description_data": [
                    {"lang": "en", "value": description}
                ]},
                "references": {"reference_data": [
                    {"url": format!("https://example.com/{}", id), "name": id}
                ]}
            },
            "impact": {},
            "publishedDate": published,
            "lastModifiedDate": modified
        });
        if let Some(score) = score {
            item["impact"]["baseMetricV3"] = json!({
                "cvssV3": {
                    "version": "3.1",
                    "vectorString": "CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H",
                    "baseScore": score
                }
            });
        }
        item
    }

    /// Builds a complete gzipped feed body from items.
    pub(crate) fn feed_body(items: &[serde_json::Value]) -> Vec<u8> {
        let file = json!({
            "CVE_data_type": "CVE",
            "CVE_data_format": "MITRE",
            "CVE_data_version": "4.0",
            "CVE_Items": items
        });
        gzip(file.to_string().as_bytes())
    }

    #[test]
    fn decodes_a_feed_body() {
        let items = [
            feed_item(
                "CVE-2023-0001",
                "2023-01-05T10:15Z",
                "2023-02-01T08:30Z",
                "Buffer overflow in libfoo",
                Some(9.8),
            ),
            feed_item(
                "CVE-2023-0002",
                "2023-01-06T10:15Z",
                "2023-01-06T10:15Z",
                "SQL injection in barapp",
                None,
            ),
        ];
        let records = decode("2023", &feed_body(&items)).unwrap();

        assert_eq!(records.len(), 2);
        // feed order is preserved
        assert_eq!(records[0].id, "CVE-2023-0001");
        assert_eq!(records[1].id, "CVE-2023-0002");

        let first = &records[0];
        assert_eq!(first.description("en"), Some("Buffer overflow in libfoo"));
        assert_eq!(first.assigner.as_deref(), Some("cve@mitre.org"));
        assert_eq!(first.references.len(), 1);
        assert_eq!(
            first.references[0].url.as_deref(),
            Some("https://example.com/CVE-2023-0001")
        );
        assert_eq!(first.base_score(), Some(9.8));
        assert_eq!(first.severity(), Severity::Critical);
        assert_eq!(first.metrics.as_ref().unwrap().version, "3.1");
        // the raw payload is retained as received
        assert_eq!(first.raw["cve"]["CVE_data_meta"]["ID"], "CVE-2023-0001");

        assert_eq!(records[1].severity(), Severity::Unknown);
        assert!(records[1].metrics.is_none());
    }

    #[test]
    fn prefers_cvss3_over_cvss2() {
        let mut item = feed_item(
            "CVE-2019-0001",
            "2019-01-01T00:00Z",
            "2019-01-01T00:00Z",
            "both metric versions",
            Some(5.0),
        );
        item["impact"]["baseMetricV2"] = json!({
            "cvssV2": {"version": "2.0", "vectorString": "AV:N/AC:L/Au:N/C:P/I:P/A:P", "baseScore": 7.5}
        });
        let records = decode("2019", &feed_body(&[item])).unwrap();
        assert_eq!(records[0].metrics.as_ref().unwrap().version, "3.1");
        assert_eq!(records[0].base_score(), Some(5.0));
    }

    #[test]
    fn falls_back_to_cvss2() {
        let mut item = feed_item(
            "CVE-2005-0001",
            "2005-01-01T00:00Z",
            "2005-01-01T00:00Z",
            "old school",
            None,
        );
        item["impact"]["baseMetricV2"] = json!({
            "cvssV2": {"version": "2.0", "vectorString": "AV:N/AC:L/Au:N/C:P/I:P/A:P", "baseScore": 7.5}
        });
        let records = decode("2005", &feed_body(&[item])).unwrap();
        // CVSS2 never rates Critical
        assert_eq!(records[0].severity(), Severity::High);
    }

    #[test]
    fn rejects_invalid_gzip() {
        let err = decode("2023", b"definitely not gzip").unwrap_err();
        assert!(matches!(err, Error::MalformedFeed { .. }));
    }

    #[test]
    fn rejects_invalid_json() {
        let err = decode("2023", &gzip(b"{ not json")).unwrap_err();
        assert!(matches!(err, Error::MalformedFeed { .. }));
    }

    #[test]
    fn rejects_unexpected_schema() {
        let file = json!({
            "CVE_data_type": "CVE",
            "CVE_data_format": "MITRE",
            "CVE_data_version": "5.0",
            "CVE_Items": []
        });
        let err = decode("2023", &gzip(file.to_string().as_bytes())).unwrap_err();
        assert!(matches!(err, Error::MalformedFeed { .. }));
    }

    #[test]
    fn rejects_a_broken_item() {
        let mut item = feed_item(
            "CVE-2023-0001",
            "2023-01-05T10:15Z",
            "2023-02-01T08:30Z",
            "fine",
            None,
        );
        item["publishedDate"] = json!("yesterday");
        let err = decode("2023", &feed_body(&[item])).unwrap_err();
        assert!(matches!(err, Error::MalformedFeed { .. }));
    }
}
