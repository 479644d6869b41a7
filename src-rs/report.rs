//! Defect aggregation and the persisted newline-delimited report files.

use crate::error::{AuditError, Result};
use serde_json::{json, Map, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

pub const RATIO_DIGITS: u32 = 4;

/// Per-pass tallies. `None` means "not measured by this pass", and the key
/// is left out of the report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefectCounts {
    pub element_count: usize,
    pub unlocatable_touch: Option<usize>,
    pub unlocatable_linear: Option<usize>,
    pub unlabelled: Option<usize>,
    pub assertive: Option<usize>,
    pub far_off: Option<usize>,
    pub ineffective: Option<usize>,
    pub excessive_interaction: Option<usize>,
    pub ad_library: Option<String>,
    pub ad_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Overwrite,
    Append,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefectReport {
    metrics: Map<String, Value>,
}

impl DefectReport {
    pub fn from_counts(counts: &DefectCounts) -> Result<Self> {
        if counts.element_count == 0 {
            return Err(AuditError::NoSelectableElements);
        }
        let total = counts.element_count;
        let mut metrics = Map::new();
        let mut put_ratio = |key: &str, count: Option<usize>| {
            if let Some(count) = count {
                metrics.insert(key.to_string(), json!(ratio(count, total)));
            }
        };

        put_ratio("Unlocatable Touch", counts.unlocatable_touch);
        put_ratio("Unlocatable Linear", counts.unlocatable_linear);
        put_ratio("Unlabelled Buttons", counts.unlabelled);
        put_ratio("Assertive Nodes", counts.assertive);
        put_ratio("Far-off Elements", counts.far_off);
        put_ratio("Ineffective Actions", counts.ineffective);
        put_ratio("Excessive Interaction", counts.excessive_interaction);

        if let Some(count) = counts.ineffective {
            metrics.insert("Ineffective Action".to_string(), json!(count));
        }
        if let Some(library) = &counts.ad_library {
            metrics.insert("Ad Library".to_string(), json!(library));
        }
        if let Some(ad_type) = &counts.ad_type {
            metrics.insert("Ad Type".to_string(), json!(ad_type));
        }
        Ok(Self { metrics })
    }

    pub fn metrics(&self) -> &Map<String, Value> {
        &self.metrics
    }

    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.metrics)?)
    }

    pub fn persist(&self, path: &Path, mode: WriteMode) -> Result<()> {
        ensure_parent_dir(path)?;
        let mut file = match mode {
            WriteMode::Overwrite => OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)?,
            WriteMode::Append => OpenOptions::new().create(true).append(true).open(path)?,
        };
        writeln!(file, "{}", self.to_line()?)?;
        Ok(())
    }
}

pub fn ratio(count: usize, total: usize) -> f64 {
    round_to(count as f64 / total as f64, RATIO_DIGITS)
}

fn round_to(v: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (v * factor).round() / factor
}

/// Fold every report line into one map; later lines win on shared keys.
pub fn load_merged(path: &Path) -> Result<Map<String, Value>> {
    let raw = fs::read_to_string(path)?;
    let mut merged = Map::new();
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        if let Value::Object(entry) = serde_json::from_str::<Value>(line)? {
            merged.extend(entry);
        }
    }
    Ok(merged)
}

pub fn write_jsonl(path: &Path, records: &[Value]) -> Result<()> {
    ensure_parent_dir(path)?;
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(())
}

/// `{"swipe_nums": n}` for the last reached target, `{}` when none was.
pub fn write_swipe_record(path: &Path, swipe_nums: Option<usize>) -> Result<()> {
    ensure_parent_dir(path)?;
    let record = match swipe_nums {
        Some(n) => json!({ "swipe_nums": n }),
        None => json!({}),
    };
    fs::write(path, serde_json::to_string(&record)?)?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
