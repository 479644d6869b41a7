//! UI node model and the JSON-lines layout format.

use crate::error::{AuditError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Screen rectangle as `(x, y, width, height)`.
///
/// Serialized as a 4-element array, which is how layout dumps carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "[i64; 4]", into = "[i64; 4]")]
pub struct Bounds {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Bounds {
    pub fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i64 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> i64 {
        self.y.saturating_add(self.height)
    }

    pub fn area(&self) -> i64 {
        self.width.saturating_mul(self.height)
    }
}

impl From<[i64; 4]> for Bounds {
    fn from(raw: [i64; 4]) -> Self {
        Self::new(raw[0], raw[1], raw[2], raw[3])
    }
}

impl From<Bounds> for [i64; 4] {
    fn from(b: Bounds) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", from = "Option<String>")]
pub enum LiveRegion {
    #[default]
    None,
    Polite,
    Assertive,
}

impl From<Option<String>> for LiveRegion {
    fn from(raw: Option<String>) -> Self {
        match raw.as_deref().map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("ASSERTIVE") => LiveRegion::Assertive,
            Some(v) if v.eq_ignore_ascii_case("POLITE") => LiveRegion::Polite,
            _ => LiveRegion::None,
        }
    }
}

/// Tag set on a node right before it is dispatched to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeAction {
    Focus,
    Click,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Node {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub xpath: String,
    #[serde(default)]
    pub bounds: Bounds,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub text: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content_desc: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub class_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub resource_id: String,
    #[serde(default)]
    pub live_region: LiveRegion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<NodeAction>,
    /// Attributes this crate does not interpret, kept so the node can be
    /// handed back to the device unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl Node {
    pub fn has_identity(&self) -> bool {
        !self.xpath.is_empty()
    }

    /// Same element iff the xpaths are equal. Nodes without an xpath never
    /// match anything, including each other.
    pub fn same_identity(&self, other: &Node) -> bool {
        self.has_identity() && self.xpath == other.xpath
    }

    pub fn is_assertive(&self) -> bool {
        self.live_region == LiveRegion::Assertive
    }

    pub fn with_action(&self, action: NodeAction) -> Node {
        let mut node = self.clone();
        node.action = Some(action);
        node
    }

    fn own_label(&self) -> &str {
        let text = self.text.trim();
        if text.is_empty() {
            self.content_desc.trim()
        } else {
            text
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Text a screen reader could announce for `node`: its own label plus the
/// labels of descendants within `depth` levels, found by xpath prefix.
pub fn text_description(node: &Node, layout: &[Node], depth: usize) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let own = node.own_label();
    if !own.is_empty() {
        parts.push(own);
    }
    if node.has_identity() {
        for other in layout {
            let Some(rest) = other.xpath.strip_prefix(node.xpath.as_str()) else {
                continue;
            };
            if !rest.starts_with('/') || rest.matches('/').count() > depth {
                continue;
            }
            let label = other.own_label();
            if !label.is_empty() {
                parts.push(label);
            }
        }
    }
    parts.join(" ")
}

pub trait LayoutParser {
    fn parse_layout(&self, raw: &str) -> Result<Vec<Node>>;
}

/// One JSON node object per line; blank lines are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesLayout;

impl LayoutParser for JsonLinesLayout {
    fn parse_layout(&self, raw: &str) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let node: Node = serde_json::from_str(line).map_err(|err| AuditError::Layout {
                line: idx + 1,
                message: err.to_string(),
            })?;
            nodes.push(node);
        }
        Ok(nodes)
    }
}

pub fn load_nodes(path: &Path) -> Result<Vec<Node>> {
    if !path.exists() {
        return Err(AuditError::MissingArtifact(path.to_path_buf()));
    }
    let raw = fs::read_to_string(path)?;
    JsonLinesLayout.parse_layout(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(xpath: &str) -> Node {
        Node {
            xpath: xpath.to_string(),
            ..Node::default()
        }
    }

    #[test]
    fn parses_layout_line_with_nulls_and_extras() {
        let raw = r#"{"xpath":"/a/b","bounds":[10,20,30,40],"text":null,"content_desc":"Close","live_region":"ASSERTIVE","index":3}"#;
        let nodes = JsonLinesLayout.parse_layout(&format!("\n{raw}\n")).unwrap();
        assert_eq!(nodes.len(), 1);
        let n = &nodes[0];
        assert_eq!(n.bounds, Bounds::new(10, 20, 30, 40));
        assert_eq!(n.text, "");
        assert!(n.is_assertive());
        assert_eq!(n.extra.get("index"), Some(&json!(3)));
    }

    #[test]
    fn huge_bounds_saturate() {
        let n: Node = serde_json::from_str(
            r#"{"xpath":"/big","bounds":[9223372036854775807,1,9223372036854775807,9223372036854775807]}"#,
        )
        .unwrap();
        assert_eq!(n.bounds.right(), i64::MAX);
        assert_eq!(n.bounds.bottom(), i64::MAX);
        assert_eq!(n.bounds.area(), i64::MAX);
    }

    #[test]
    fn unknown_live_region_reads_as_none() {
        let n: Node = serde_json::from_str(r#"{"xpath":"/a","live_region":"1"}"#).unwrap();
        assert_eq!(n.live_region, LiveRegion::None);
    }

    #[test]
    fn reports_line_of_bad_layout_entry() {
        let err = JsonLinesLayout
            .parse_layout("{\"xpath\":\"/a\"}\n{broken")
            .unwrap_err();
        assert!(matches!(err, AuditError::Layout { line: 2, .. }));
    }

    #[test]
    fn empty_xpath_has_no_identity() {
        assert!(!node("").same_identity(&node("")));
        assert!(node("/a").same_identity(&node("/a")));
        assert!(!node("/a").same_identity(&node("/a/b")));
    }

    #[test]
    fn text_description_includes_shallow_descendants() {
        let parent = node("/root/button");
        let mut child = node("/root/button/label");
        child.text = "Play".to_string();
        let mut deep = node("/root/button/x/y/z");
        deep.text = "Too deep".to_string();
        let mut sibling = node("/root/buttonish");
        sibling.text = "Nope".to_string();
        let layout = vec![parent.clone(), child, deep, sibling];
        assert_eq!(text_description(&parent, &layout, 2), "Play");
    }

    #[test]
    fn action_serializes_lowercase() {
        let n = node("/a").with_action(NodeAction::Focus);
        assert_eq!(n.to_json()["action"], json!("focus"));
    }
}
