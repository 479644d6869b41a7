//! Unlocatable-element pass: ask the screen reader to focus each candidate
//! directly and record the ones it cannot locate.
//!
//! The pass also tracks assertive live regions across window changes and
//! flags candidates a screen reader would have nothing to announce for.

use crate::annotate::annotate_nodes;
use crate::command::{Command, CommandResponse, LocatableState};
use crate::controller::Controller;
use crate::logcat::LogCapture;
use crate::node::{load_nodes, text_description, Node, NodeAction};
use crate::session::Session;
use crate::snapshot::{CaptureMode, SnapshotCapture};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

pub const LABEL_DEPTH: usize = 2;

#[derive(Debug, Clone, Default)]
pub struct UnlocatableOutcome {
    pub unvisited_nodes: Vec<Node>,
    /// Controller result records for each `FAILED_LOCATE`, with the
    /// candidate's `index` and `xpath` added.
    pub issues: Vec<Value>,
    pub unlabelled: Vec<Node>,
    pub assertive_count: usize,
    /// Screenshots paired with the candidates located while each was current.
    pub frames: Vec<(PathBuf, Vec<Node>)>,
    /// The controller stopped answering before every candidate was tried.
    pub aborted: bool,
}

/// Candidates with nothing to announce. With a `scope`, only candidates
/// whose xpath is in it are considered.
pub fn unlabelled_nodes(
    candidates: &[Node],
    layout: &[Node],
    scope: Option<&HashSet<String>>,
) -> Vec<Node> {
    candidates
        .iter()
        .filter(|node| scope.map_or(true, |s| s.contains(&node.xpath)))
        .filter(|node| text_description(node, layout, LABEL_DEPTH).is_empty())
        .cloned()
        .collect()
}

fn assertive_in(nodes: &[Node]) -> Vec<Node> {
    nodes.iter().filter(|n| n.is_assertive()).cloned().collect()
}

fn same_set(a: &[Node], b: &[Node]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.xpath == y.xpath)
}

/// Run the pass over `candidates`. `screen_nodes` is the initial layout of
/// the screen.
pub fn find_unlocatable<C, L, S>(
    session: &mut Session<'_, C, L, S>,
    candidates: &[Node],
    screen_nodes: &[Node],
    unlabelled_scope: Option<&HashSet<String>>,
) -> UnlocatableOutcome
where
    C: Controller,
    L: LogCapture,
    S: SnapshotCapture,
{
    let book = session.book;
    let mut outcome = UnlocatableOutcome {
        unlabelled: unlabelled_nodes(candidates, screen_nodes, unlabelled_scope),
        frames: vec![(book.initial_screenshot(), Vec::new())],
        ..UnlocatableOutcome::default()
    };

    let mut assertive = assertive_in(screen_nodes);
    let mut assertive_index = 0;
    if !assertive.is_empty() {
        outcome.assertive_count += assertive.len();
        annotate_or_warn(book.initial_screenshot(), book.assertive_screenshot(0), &assertive);
    }

    info!(
        candidates = candidates.len(),
        mode = %session.controller.mode(),
        "unlocatable pass"
    );
    for (index, candidate) in candidates.iter().enumerate() {
        let focus = candidate.with_action(NodeAction::Focus);
        let (logs, response) = match session.dispatch(&Command::Focus(focus)) {
            Ok(pair) => pair,
            Err(err) => {
                error!(index, error = %err, "terminating unlocatable pass: transport failure");
                outcome.aborted = true;
                break;
            }
        };

        if session.window_changed(&logs) {
            let shot_index = outcome.frames.len();
            if let Some(shot) = session.snapshot(CaptureMode::Unlocatable, shot_index) {
                let layout_path = book.layout_path(CaptureMode::Unlocatable, shot_index);
                match load_nodes(&layout_path) {
                    Ok(layout) => {
                        let fresh = assertive_in(&layout);
                        if !same_set(&fresh, &assertive) {
                            assertive_index += 1;
                            if !fresh.is_empty() {
                                outcome.assertive_count += fresh.len();
                                annotate_or_warn(
                                    shot.clone(),
                                    book.assertive_screenshot(assertive_index),
                                    &fresh,
                                );
                            }
                            assertive = fresh;
                        }
                    }
                    Err(err) => warn!(error = %err, "could not read layout after window change"),
                }
                outcome.frames.push((shot, Vec::new()));
            }
        }

        let state = match response {
            Some(CommandResponse::Locatable { state, raw }) => (state, raw),
            Some(CommandResponse::Navigate { .. }) | Some(CommandResponse::Info { .. }) | None => {
                error!(index, "terminating unlocatable pass: no usable focus result");
                outcome.aborted = true;
                break;
            }
        };
        match state {
            (LocatableState::FailedLocate, raw) => {
                debug!(index, xpath = %candidate.xpath, "unlocatable");
                outcome.issues.push(issue_record(raw, index, candidate));
                outcome.unvisited_nodes.push(candidate.clone());
            }
            (LocatableState::Completed | LocatableState::Failed, _) => {
                if let Some((_, visits)) = outcome.frames.last_mut() {
                    visits.push(candidate.clone());
                }
            }
        }
    }

    info!(
        unlocatable = outcome.unvisited_nodes.len(),
        unlabelled = outcome.unlabelled.len(),
        assertive = outcome.assertive_count,
        aborted = outcome.aborted,
        "unlocatable pass finished"
    );
    outcome
}

fn issue_record(raw: Value, index: usize, node: &Node) -> Value {
    let mut record = match raw {
        Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("state".to_string(), other);
            map
        }
    };
    record.insert("index".to_string(), json!(index));
    record
        .entry("xpath")
        .or_insert_with(|| json!(node.xpath));
    Value::Object(record)
}

fn annotate_or_warn(base: PathBuf, out: PathBuf, nodes: &[Node]) {
    if let Err(err) = annotate_nodes(&base, &out, nodes) {
        warn!(out = %out.display(), error = %err, "annotation failed");
    }
}
