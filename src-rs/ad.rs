//! Ad context of a screen: which ad network served it (from a HAR capture),
//! and which nodes make up the ad unit.

use crate::error::{AuditError, Result};
use crate::geometry::largest_rectangle;
use crate::node::{load_nodes, Bounds, Node};
use crate::snapshot::AddressBook;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

const META_ENDPOINT: &str = "https://graph.facebook.com/network_ads_common";
const APPLOVIN_ENDPOINT: &str = "https://ms4.applovin.com/1.0/mediate";
const ADMOB_ENDPOINT: &str = "https://pagead2.googlesyndication.com/pcs/activeview";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdLibrary {
    #[serde(rename = "Meta Audience")]
    MetaAudience,
    AppLovin,
    AdMob,
}

impl AdLibrary {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdLibrary::MetaAudience => "Meta Audience",
            AdLibrary::AppLovin => "AppLovin",
            AdLibrary::AdMob => "AdMob",
        }
    }
}

impl fmt::Display for AdLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdFormat {
    Native,
    Banner,
    Interstitial,
}

impl AdFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdFormat::Native => "Native",
            AdFormat::Banner => "Banner",
            AdFormat::Interstitial => "Interstitial",
        }
    }
}

impl fmt::Display for AdFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdClassification {
    pub library: AdLibrary,
    pub format: AdFormat,
}

#[derive(Debug, Deserialize)]
struct Har {
    log: HarLog,
}

#[derive(Debug, Deserialize)]
struct HarLog {
    #[serde(default)]
    entries: Vec<HarEntry>,
}

#[derive(Debug, Deserialize)]
struct HarEntry {
    request: HarRequest,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarRequest {
    #[serde(default)]
    url: String,
    #[serde(default)]
    post_data: Option<PostData>,
    #[serde(default)]
    headers: Vec<NameValue>,
    #[serde(default)]
    query_string: Vec<NameValue>,
}

#[derive(Debug, Deserialize)]
struct PostData {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct NameValue {
    name: String,
    #[serde(default)]
    value: String,
}

fn pairs(items: &[NameValue]) -> HashMap<&str, &str> {
    items
        .iter()
        .map(|nv| (nv.name.as_str(), nv.value.as_str()))
        .collect()
}

impl HarRequest {
    fn classify(&self) -> Option<AdClassification> {
        let hit = |library, format| Some(AdClassification { library, format });

        if self.url.contains(META_ENDPOINT) {
            let body = self.post_data.as_ref().map_or("", |p| p.text.as_str());
            if body.contains("PLACEMENT_TYPE=native") {
                return hit(AdLibrary::MetaAudience, AdFormat::Native);
            } else if body.contains("PLACEMENT_TYPE=banner") {
                return hit(AdLibrary::MetaAudience, AdFormat::Banner);
            } else if body.contains("interstitial") || body.contains("rewarded") {
                return hit(AdLibrary::MetaAudience, AdFormat::Interstitial);
            }
        }

        if self.url.contains(APPLOVIN_ENDPOINT) {
            let headers = pairs(&self.headers);
            let format = headers
                .get("applovin-ad-format")
                .map(|v| v.to_ascii_uppercase())
                .unwrap_or_default();
            match format.as_str() {
                "NATIVE" => return hit(AdLibrary::AppLovin, AdFormat::Native),
                "INTER" | "REWARDED" | "APPOPEN" => {
                    return hit(AdLibrary::AppLovin, AdFormat::Interstitial)
                }
                "BANNER" | "MREC" => return hit(AdLibrary::AppLovin, AdFormat::Banner),
                _ => {}
            }
        }

        let query = pairs(&self.query_string);
        if let Some(target) = query.get("url") {
            let format = if target.contains("format=379x59_as") || target.contains("format=320x50_mb")
            {
                Some(AdFormat::Banner)
            } else if target.contains("format=interstitial_mb") {
                Some(AdFormat::Interstitial)
            } else if target.contains("native_version") {
                Some(AdFormat::Native)
            } else {
                None
            };
            if let Some(format) = format.filter(|_| self.url.contains(ADMOB_ENDPOINT)) {
                return hit(AdLibrary::AdMob, format);
            }
        }
        None
    }
}

/// First ad network and format recognisable in the HAR's requests.
pub fn classify_har_str(raw: &str) -> Result<Option<AdClassification>> {
    let har: Har = serde_json::from_str(raw)?;
    Ok(har.log.entries.iter().find_map(|e| e.request.classify()))
}

pub fn classify_har(path: &Path) -> Result<Option<AdClassification>> {
    if !path.exists() {
        return Err(AuditError::MissingArtifact(path.to_path_buf()));
    }
    let found = classify_har_str(&fs::read_to_string(path)?)?;
    match &found {
        Some(c) => info!(library = %c.library, format = %c.format, "ad network identified"),
        None => info!(har = %path.display(), "no known ad network in capture"),
    }
    Ok(found)
}

/// Longest substring of the first string that every string contains. A
/// single string is its own answer; no strings give `""`.
pub fn longest_common_substring(items: &[String]) -> String {
    let Some(first) = items.first() else {
        return String::new();
    };
    if items.len() == 1 {
        return first.clone();
    }
    let chars: Vec<char> = first.chars().collect();
    let mut best = String::new();
    let mut best_len = 0;
    for start in 0..chars.len() {
        for end in (start + best_len + 1)..=chars.len() {
            let candidate: String = chars[start..end].iter().collect();
            if items[1..].iter().all(|s| s.contains(&candidate)) {
                best_len = end - start;
                best = candidate;
            } else {
                break;
            }
        }
    }
    best
}

/// Screen nodes whose xpath contains the unit's common xpath fragment.
pub fn count_ad_elements(unit_xpaths: &[String], screen_nodes: &[Node]) -> usize {
    let common = longest_common_substring(unit_xpaths);
    screen_nodes
        .iter()
        .filter(|n| n.xpath.contains(common.as_str()))
        .count()
}

#[derive(Debug, Clone, Default)]
pub struct AdUnit {
    pub nodes: Vec<Node>,
    /// Largest rectangle among the unit's nodes.
    pub region: Option<Bounds>,
}

impl AdUnit {
    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        let bounds: Vec<Bounds> = nodes.iter().map(|n| n.bounds).collect();
        Self {
            region: largest_rectangle(&bounds),
            nodes,
        }
    }

    /// Ad-unit file 1 or 2 at random when both exist, file 0 otherwise.
    pub fn load(book: &AddressBook, rng: &mut impl Rng) -> Result<Self> {
        let index = if book.ad_unit(2).exists() {
            rng.gen_range(1..=2)
        } else {
            0
        };
        debug!(index, "loading ad unit");
        Ok(Self::from_nodes(load_nodes(&book.ad_unit(index))?))
    }

    /// [`AdUnit::load`] for screens that carry an ad-unit file; `None` for
    /// screens without an ad.
    pub fn load_if_present(book: &AddressBook, rng: &mut impl Rng) -> Result<Option<Self>> {
        if book.ad_unit(0).exists() || book.ad_unit(2).exists() {
            Self::load(book, rng).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn xpaths(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.xpath.clone()).collect()
    }
}

/// The selected node that precedes the ad (the last selected node when the
/// ad comes first, or is not among the selected nodes), then the unit.
pub fn ad_candidates(selected: &[Node], unit: &AdUnit) -> Vec<Node> {
    let first_ad = unit
        .nodes
        .first()
        .and_then(|ad| selected.iter().position(|n| n.same_identity(ad)));
    let lead = match first_ad {
        Some(0) | None => selected.last(),
        Some(i) => selected.get(i - 1),
    };
    lead.into_iter().chain(unit.nodes.iter()).cloned().collect()
}

/// Everything the ad passes need to know about the screen.
#[derive(Debug, Clone)]
pub struct AdContext {
    pub classification: Option<AdClassification>,
    pub unit: Option<AdUnit>,
    /// Denominator for every ratio in the report.
    pub element_count: usize,
    pub candidates: Vec<Node>,
    /// Unlabelled nodes only count when they are part of the ad unit.
    pub unlabelled_scope: Option<HashSet<String>>,
}

impl AdContext {
    pub fn prepare(
        book: &AddressBook,
        classification: Option<AdClassification>,
        selected: Vec<Node>,
        screen_nodes: &[Node],
        rng: &mut impl Rng,
    ) -> Result<Self> {
        let format = classification.map(|c| c.format);
        match format {
            Some(AdFormat::Native | AdFormat::Banner) => {
                let unit = AdUnit::load(book, rng)?;
                let xpaths = unit.xpaths();
                let element_count = count_ad_elements(&xpaths, screen_nodes);
                Ok(Self {
                    classification,
                    candidates: ad_candidates(&selected, &unit),
                    unit: Some(unit),
                    element_count,
                    unlabelled_scope: Some(xpaths.into_iter().collect()),
                })
            }
            Some(AdFormat::Interstitial) | None => Ok(Self {
                classification,
                unit: None,
                element_count: screen_nodes.len(),
                candidates: selected,
                unlabelled_scope: None,
            }),
        }
    }

    pub fn region(&self) -> Option<Bounds> {
        self.unit.as_ref().and_then(|u| u.region)
    }

    /// Inline ads start the coverage pass past the lead node.
    pub fn is_inline(&self) -> bool {
        self.unit.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;
    use tempfile::tempdir;

    fn har(entries: serde_json::Value) -> String {
        json!({ "log": { "entries": entries } }).to_string()
    }

    fn node(xpath: &str, bounds: [i64; 4]) -> Node {
        Node {
            xpath: xpath.to_string(),
            bounds: bounds.into(),
            ..Node::default()
        }
    }

    fn write_unit(book: &AddressBook, index: usize, nodes: &[Node]) {
        fs::create_dir_all(book.actions_dir()).unwrap();
        let body: String = nodes
            .iter()
            .map(|n| serde_json::to_string(n).unwrap() + "\n")
            .collect();
        fs::write(book.ad_unit(index), body).unwrap();
    }

    #[test]
    fn meta_audience_banner_from_post_data() {
        let raw = har(json!([
            { "request": { "url": "https://example.com/other" } },
            { "request": {
                "url": "https://graph.facebook.com/network_ads_common?x=1",
                "postData": { "text": "A=1&PLACEMENT_TYPE=banner" }
            } }
        ]));
        let found = classify_har_str(&raw).unwrap().unwrap();
        assert_eq!(found.library, AdLibrary::MetaAudience);
        assert_eq!(found.format, AdFormat::Banner);
    }

    #[test]
    fn applovin_header_is_case_insensitive() {
        let raw = har(json!([{ "request": {
            "url": "https://ms4.applovin.com/1.0/mediate",
            "headers": [{ "name": "applovin-ad-format", "value": "inter" }]
        } }]));
        let found = classify_har_str(&raw).unwrap().unwrap();
        assert_eq!(found.library, AdLibrary::AppLovin);
        assert_eq!(found.format, AdFormat::Interstitial);
    }

    #[test]
    fn admob_needs_both_activeview_url_and_format() {
        let hit = har(json!([{ "request": {
            "url": "https://pagead2.googlesyndication.com/pcs/activeview?p=1",
            "queryString": [{ "name": "url", "value": "https://x/?format=320x50_mb" }]
        } }]));
        let miss = har(json!([{ "request": {
            "url": "https://elsewhere.example/pcs",
            "queryString": [{ "name": "url", "value": "https://x/?format=320x50_mb" }]
        } }]));
        assert_eq!(
            classify_har_str(&hit).unwrap().map(|c| (c.library, c.format)),
            Some((AdLibrary::AdMob, AdFormat::Banner))
        );
        assert_eq!(classify_har_str(&miss).unwrap(), None);
    }

    #[test]
    fn first_matching_entry_wins() {
        let raw = har(json!([
            { "request": {
                "url": "https://ms4.applovin.com/1.0/mediate",
                "headers": [{ "name": "applovin-ad-format", "value": "NATIVE" }]
            } },
            { "request": {
                "url": "https://graph.facebook.com/network_ads_common",
                "postData": { "text": "PLACEMENT_TYPE=banner" }
            } }
        ]));
        let found = classify_har_str(&raw).unwrap().unwrap();
        assert_eq!(found.library, AdLibrary::AppLovin);
        assert_eq!(found.format, AdFormat::Native);
    }

    #[test]
    fn common_substring_of_xpaths() {
        let xpaths = vec![
            "/root/ad[1]/button".to_string(),
            "/root/ad[1]/image".to_string(),
            "/root/ad[1]/title".to_string(),
        ];
        assert_eq!(longest_common_substring(&xpaths), "/root/ad[1]/");
        assert_eq!(longest_common_substring(&xpaths[..1]), "/root/ad[1]/button");
        assert_eq!(longest_common_substring(&[]), "");
    }

    #[test]
    fn ad_elements_counted_by_common_prefix() {
        let unit = vec!["/r/ad/a".to_string(), "/r/ad/b".to_string()];
        let screen = [
            node("/r/ad", [0, 0, 1, 1]),
            node("/r/ad/a", [0, 0, 1, 1]),
            node("/r/ad/b", [0, 0, 1, 1]),
            node("/r/menu", [0, 0, 1, 1]),
        ];
        assert_eq!(count_ad_elements(&unit, &screen), 2);
    }

    #[test]
    fn candidates_lead_with_node_before_ad() {
        let selected = vec![
            node("/menu", [0, 0, 10, 10]),
            node("/title", [0, 10, 10, 10]),
            node("/ad/a", [0, 20, 10, 10]),
        ];
        let unit = AdUnit::from_nodes(vec![
            node("/ad/a", [0, 20, 10, 10]),
            node("/ad/b", [0, 30, 50, 50]),
        ]);
        let xpaths: Vec<String> = ad_candidates(&selected, &unit)
            .into_iter()
            .map(|n| n.xpath)
            .collect();
        assert_eq!(xpaths, ["/title", "/ad/a", "/ad/b"]);
        assert_eq!(unit.region, Some(Bounds::new(0, 30, 50, 50)));

        let leading_ad = vec![node("/ad/a", [0, 0, 1, 1]), node("/footer", [0, 0, 1, 1])];
        let first: Vec<String> = ad_candidates(&leading_ad, &unit)
            .into_iter()
            .map(|n| n.xpath)
            .collect();
        assert_eq!(first[0], "/footer");
    }

    #[test]
    fn unit_file_choice() {
        let dir = tempdir().unwrap();
        let book = AddressBook::new(dir.path());
        write_unit(&book, 0, &[node("/zero", [0, 0, 1, 1])]);
        let mut rng = StdRng::seed_from_u64(7);
        let unit = AdUnit::load(&book, &mut rng).unwrap();
        assert_eq!(unit.nodes[0].xpath, "/zero");

        write_unit(&book, 1, &[node("/one", [0, 0, 1, 1])]);
        write_unit(&book, 2, &[node("/two", [0, 0, 1, 1])]);
        for _ in 0..8 {
            let unit = AdUnit::load(&book, &mut rng).unwrap();
            assert_ne!(unit.nodes[0].xpath, "/zero");
        }
    }

    #[test]
    fn screen_without_unit_file_has_no_unit() {
        let dir = tempdir().unwrap();
        let book = AddressBook::new(dir.path());
        let mut rng = StdRng::seed_from_u64(1);
        assert!(AdUnit::load_if_present(&book, &mut rng).unwrap().is_none());

        write_unit(&book, 0, &[node("/ad", [0, 0, 40, 20]), node("/ad/b", [0, 0, 5, 5])]);
        let unit = AdUnit::load_if_present(&book, &mut rng).unwrap().unwrap();
        assert_eq!(unit.region, Some(Bounds::new(0, 0, 40, 20)));
    }

    #[test]
    fn interstitial_context_uses_all_selected() {
        let dir = tempdir().unwrap();
        let book = AddressBook::new(dir.path());
        let selected = vec![node("/close", [0, 0, 1, 1]), node("/install", [0, 0, 1, 1])];
        let screen = selected.clone();
        let ctx = AdContext::prepare(
            &book,
            Some(AdClassification {
                library: AdLibrary::AdMob,
                format: AdFormat::Interstitial,
            }),
            selected.clone(),
            &screen,
            &mut StdRng::seed_from_u64(1),
        )
        .unwrap();
        assert_eq!(ctx.candidates, selected);
        assert_eq!(ctx.element_count, 2);
        assert!(ctx.region().is_none());
    }
}
