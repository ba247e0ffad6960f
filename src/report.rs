//! Campaign Report - What a Run Produced
//!
//! Written once per run at `{output}/{campaign}/campaign_report.json`, whether
//! or not any creative was produced.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::assets::Provenance;
use crate::compliance::ComplianceReport;
use crate::formats::AspectRatio;

pub const REPORT_FILE_NAME: &str = "campaign_report.json";

/// `{root}/{C}/{P}/{R}/{P}_{R}.jpg` with `R` written as `9x16`.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    campaign: String,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, campaign: &str) -> Self {
        Self { root: root.into(), campaign: campaign.to_string() }
    }

    pub fn campaign_dir(&self) -> PathBuf {
        self.root.join(&self.campaign)
    }

    pub fn creative_path(&self, product_id: &str, ratio: AspectRatio) -> PathBuf {
        let slug = ratio.slug();
        self.campaign_dir()
            .join(product_id)
            .join(&slug)
            .join(format!("{}_{}.jpg", product_id, slug))
    }

    pub fn report_path(&self) -> PathBuf {
        self.campaign_dir().join(REPORT_FILE_NAME)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStage {
    Resolve,
    Render,
    Evaluate,
    Write,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<AspectRatio>,
    pub stage: ErrorStage,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Completed,
    /// Some but not all ratios were produced.
    Partial,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductSummary {
    pub product_id: String,
    pub status: ProductStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub creatives: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComplianceSummary {
    /// Individual checks across all creatives.
    pub total_checks: usize,
    pub passed: usize,
    pub failed: usize,
    pub creatives_passed: usize,
    pub creatives_failed: usize,
}

impl ComplianceSummary {
    pub fn from_reports<'a>(reports: impl IntoIterator<Item = &'a ComplianceReport>) -> Self {
        reports.into_iter().fold(Self::default(), |mut acc, r| {
            acc.total_checks += r.total_checks;
            acc.passed += r.passed_checks;
            acc.failed += r.failed_checks;
            if r.passed {
                acc.creatives_passed += 1;
            } else {
                acc.creatives_failed += 1;
            }
            acc
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub run_id: String,
    pub campaign_name: String,
    pub generated_at: DateTime<Utc>,
    pub engine_version: String,
    pub generation_backend: String,
    pub brief_fingerprint: String,

    pub products_processed: usize,
    pub products_failed: usize,
    pub products_skipped: usize,
    pub creatives_generated: usize,
    #[serde(rename = "creative_paths")]
    pub creatives: Vec<String>,

    pub compliance_summary: ComplianceSummary,
    /// Keyed by creative path, in product then ratio order.
    #[serde(serialize_with = "ordered_map")]
    pub compliance_details: Vec<(String, ComplianceReport)>,

    pub products: Vec<ProductSummary>,
    pub errors: Vec<ErrorRecord>,
    pub warnings: Vec<String>,
}

impl CampaignReport {
    pub fn compliance_for(&self, creative_path: &str) -> Option<&ComplianceReport> {
        self.compliance_details
            .iter()
            .find(|(path, _)| path == creative_path)
            .map(|(_, r)| r)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write via a temp file and rename so readers never see a partial report.
    pub fn write(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        {
            let mut out = BufWriter::new(fs::File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut out, self)?;
            out.write_all(b"\n")?;
            out.flush()?;
        }
        fs::rename(&tmp, path)
    }
}

fn ordered_map<S: Serializer>(entries: &[(String, ComplianceReport)], serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (k, v) in entries {
        map.serialize_entry(k, v)?;
    }
    map.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::CheckResult;

    fn ratio(s: &str) -> AspectRatio {
        AspectRatio::parse(s).unwrap()
    }

    #[test]
    fn test_layout_paths() {
        let layout = OutputLayout::new("/out", "summer");
        assert_eq!(
            layout.creative_path("sku-1", ratio("9:16")),
            PathBuf::from("/out/summer/sku-1/9x16/sku-1_9x16.jpg")
        );
        assert_eq!(layout.report_path(), PathBuf::from("/out/summer/campaign_report.json"));
    }

    #[test]
    fn test_summary_sums_individual_checks() {
        let a = ComplianceReport::new(
            "p",
            ratio("1:1"),
            vec![CheckResult::pass("x", ""), CheckResult::fail("y", "")],
        );
        let b = ComplianceReport::new("p", ratio("16:9"), vec![CheckResult::pass("x", "")]);
        let summary = ComplianceSummary::from_reports([&a, &b]);
        assert_eq!(summary.total_checks, 3);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.creatives_passed, 1);
        assert_eq!(summary.creatives_failed, 1);
    }

    #[test]
    fn test_details_serialize_in_order() {
        let details = vec![
            ("z.jpg".to_string(), ComplianceReport::new("p", ratio("1:1"), vec![])),
            ("a.jpg".to_string(), ComplianceReport::new("p", ratio("1:1"), vec![])),
        ];
        let report = CampaignReport {
            run_id: "r".into(),
            campaign_name: "c".into(),
            generated_at: Utc::now(),
            engine_version: "1.0.0".into(),
            generation_backend: "placeholder".into(),
            brief_fingerprint: String::new(),
            products_processed: 0,
            products_failed: 0,
            products_skipped: 0,
            creatives_generated: 0,
            creatives: vec!["z.jpg".into(), "a.jpg".into()],
            compliance_summary: ComplianceSummary::default(),
            compliance_details: details,
            products: vec![],
            errors: vec![],
            warnings: vec![],
        };
        let json = report.to_json_pretty().unwrap();
        assert!(json.find("z.jpg").unwrap() < json.find("a.jpg").unwrap());
        assert!(report.compliance_for("a.jpg").is_some());

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["creative_paths"], serde_json::json!(["z.jpg", "a.jpg"]));
        assert!(value.get("creatives").is_none());
    }
}
