//! Linear (sequential) exploration state machine.
//!
//! Walks the navigation order exposed by the assistive service one step at a
//! time and classifies every pending target it meets: reached (and then
//! activated and checked for a visible effect), far-off, or excessive
//! interaction inside an ad unit. Targets never met end up unvisited.
//!
//! Phases: `Init -> SeekFirst -> Stepping -> {TargetFound | Terminated}`.

use crate::annotate::annotate_nodes;
use crate::command::{Command, CommandResponse, LocatableState};
use crate::controller::Controller;
use crate::error::Result;
use crate::geometry::is_outside;
use crate::logcat::LogCapture;
use crate::node::{Bounds, Node, NodeAction};
use crate::phash::{compare_screenshots, ActionEffect};
use crate::session::Session;
use crate::snapshot::{CaptureMode, SnapshotCapture};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

pub const FAR_OFF_STEPS: usize = 10;
pub const NONE_NODE_LIMIT: usize = 3;
pub const STEP_BUDGET: usize = 20;
pub const REVISIT_LIMIT: usize = 2;
pub const HASH_CUTOFF: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Targets met after more than this many steps are far-off.
    pub far_off_steps: usize,
    /// Identity-less navigation results tolerated in a row.
    pub none_node_limit: usize,
    pub step_budget: usize,
    pub revisit_limit: usize,
    /// Hamming distance below which an activation counts as ineffective.
    pub hash_cutoff: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            far_off_steps: FAR_OFF_STEPS,
            none_node_limit: NONE_NODE_LIMIT,
            step_budget: STEP_BUDGET,
            revisit_limit: REVISIT_LIMIT,
            hash_cutoff: HASH_CUTOFF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    NavigationError,
    NoneNodeLimitExceeded,
    RevisitLimitExceeded,
    StepBudgetExhausted,
    AllTargetsResolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    SeekFirst,
    Stepping,
    TargetFound,
    Terminated(TerminationReason),
}

/// What a pass is trying to establish.
#[derive(Debug, Clone, PartialEq)]
pub enum Goal {
    /// Reach every candidate; activate the ones reached in time.
    Sweep,
    /// Only record which candidates sequential navigation can reach.
    Coverage,
    /// Confirm one designated node can be reached.
    Target(Node),
}

impl Goal {
    fn stops_on_revisit(&self) -> bool {
        !matches!(self, Goal::Sweep)
    }

    fn capture_mode(&self) -> CaptureMode {
        match self {
            Goal::Coverage => CaptureMode::Unlocatable,
            Goal::Sweep | Goal::Target(_) => CaptureMode::FarOff,
        }
    }
}

/// How the pass positions focus before stepping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekPolicy {
    /// Focus the first candidate; its response is not checked.
    FirstCandidate,
    /// Focus candidates in order until one reports `COMPLETED`.
    FirstLocatable,
    /// Start from whatever the service already has focused.
    KeepFocused,
}

#[derive(Debug, Clone)]
pub struct ExploreOptions {
    pub goal: Goal,
    pub seek: SeekPolicy,
    /// Node focused by `SeekPolicy::FirstCandidate`; the first candidate
    /// when unset.
    pub start: Option<Node>,
    pub forward: bool,
    pub jump_mode: bool,
    /// Largest ad-unit rectangle, when exploring inside an ad.
    pub ad_region: Option<Bounds>,
    pub thresholds: Thresholds,
}

impl ExploreOptions {
    pub fn new(goal: Goal) -> Self {
        Self {
            goal,
            seek: SeekPolicy::FirstCandidate,
            start: None,
            forward: true,
            jump_mode: false,
            ad_region: None,
            thresholds: Thresholds::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExplorationState {
    pub visited_nodes: Vec<Node>,
    pub visit_count: HashMap<String, usize>,
    pub unvisited_nodes: Vec<Node>,
    pub far_off_elements: Vec<Node>,
    /// First ineffective node of the pass; later ones are not kept.
    pub ineffective_node: Option<Node>,
    pub step_counter: usize,
    pub consecutive_none_count: usize,
    pub revisit_count: usize,
    pub excessive_interactions: usize,
    /// Step at which the most recent target was reached.
    pub swipe_nums: Option<usize>,
    pub phase: Phase,
    screenshots: Vec<PathBuf>,
    screenshot_visits: Vec<Vec<Node>>,
}

impl ExplorationState {
    pub fn new(initial_screenshot: PathBuf) -> Self {
        Self {
            visited_nodes: Vec::new(),
            visit_count: HashMap::new(),
            unvisited_nodes: Vec::new(),
            far_off_elements: Vec::new(),
            ineffective_node: None,
            step_counter: 0,
            consecutive_none_count: 0,
            revisit_count: 0,
            excessive_interactions: 0,
            swipe_nums: None,
            phase: Phase::Init,
            screenshots: vec![initial_screenshot],
            screenshot_visits: vec![Vec::new()],
        }
    }

    pub fn screenshots(&self) -> &[PathBuf] {
        &self.screenshots
    }

    pub fn push_screenshot(&mut self, path: PathBuf) {
        self.screenshots.push(path);
        self.screenshot_visits.push(Vec::new());
    }

    /// Record a visit and attribute it to the current screenshot.
    pub fn record_visit(&mut self, node: &Node) {
        self.visited_nodes.push(node.clone());
        *self.visit_count.entry(node.xpath.clone()).or_insert(0) += 1;
        let current = self.screenshot_visits.len() - 1;
        let visits = &mut self.screenshot_visits[current];
        if !visits.iter().any(|n| n.same_identity(node)) {
            visits.push(node.clone());
        }
    }

    pub fn was_visited(&self, node: &Node) -> bool {
        node.has_identity() && self.visit_count.contains_key(&node.xpath)
    }

    /// Screenshots paired with the nodes visited while each was current.
    pub fn screenshot_visits(&self) -> Vec<(PathBuf, Vec<Node>)> {
        self.screenshots
            .iter()
            .cloned()
            .zip(self.screenshot_visits.iter().cloned())
            .collect()
    }

    pub fn termination(&self) -> Option<TerminationReason> {
        match self.phase {
            Phase::Terminated(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn target_found(&self) -> bool {
        self.phase == Phase::TargetFound
    }
}

enum Step {
    Continue,
    Stop(Phase),
}

/// Run one linear pass over `candidates`. A transport failure mid-pass ends
/// it as `NavigationError`; whatever was classified until then is kept.
pub fn explore_linear<C, L, S>(
    session: &mut Session<'_, C, L, S>,
    candidates: &[Node],
    options: &ExploreOptions,
) -> ExplorationState
where
    C: Controller,
    L: LogCapture,
    S: SnapshotCapture,
{
    let pending = match options.goal {
        Goal::Target(_) => Vec::new(),
        Goal::Sweep | Goal::Coverage => candidates.to_vec(),
    };
    let mut machine = Machine {
        options,
        state: ExplorationState::new(session.book.initial_screenshot()),
        pending,
        anchor: None,
    };
    if let Err(err) = machine.run(session, candidates) {
        error!(error = %err, "terminating exploration: transport failure");
        machine.transition(Phase::Terminated(TerminationReason::NavigationError));
    }
    machine.finish()
}

struct Machine<'o> {
    options: &'o ExploreOptions,
    state: ExplorationState,
    pending: Vec<Node>,
    /// Node the revisit check compares against.
    anchor: Option<Node>,
}

impl Machine<'_> {
    fn transition(&mut self, phase: Phase) {
        debug!(from = ?self.state.phase, to = ?phase, "phase");
        self.state.phase = phase;
    }

    fn run<C, L, S>(&mut self, session: &mut Session<'_, C, L, S>, candidates: &[Node]) -> Result<()>
    where
        C: Controller,
        L: LogCapture,
        S: SnapshotCapture,
    {
        let options = self.options;
        let focused = session.focused_node()?;
        if let Some(node) = focused.as_ref().filter(|n| n.has_identity()) {
            self.state.record_visit(node);
            self.anchor = Some(node.clone());
        }

        if let Goal::Target(target) = &options.goal {
            info!(target = %target.xpath, "looking for target node");
            if is_target(session, focused.as_ref(), target)? {
                info!("target already focused");
                self.transition(Phase::TargetFound);
                return Ok(());
            }
        }

        self.transition(Phase::SeekFirst);
        self.seek(session, candidates)?;

        self.transition(Phase::Stepping);
        loop {
            let resolvable = !matches!(options.goal, Goal::Target(_));
            if resolvable && self.pending.is_empty() {
                self.transition(Phase::Terminated(TerminationReason::AllTargetsResolved));
                break;
            }
            if self.state.step_counter >= options.thresholds.step_budget {
                info!(steps = self.state.step_counter, "step budget exhausted");
                self.transition(Phase::Terminated(TerminationReason::StepBudgetExhausted));
                break;
            }
            match self.step(session)? {
                Step::Continue => {}
                Step::Stop(phase) => {
                    self.transition(phase);
                    break;
                }
            }
        }
        Ok(())
    }

    fn seek<C, L, S>(&mut self, session: &mut Session<'_, C, L, S>, candidates: &[Node]) -> Result<()>
    where
        C: Controller,
        L: LogCapture,
        S: SnapshotCapture,
    {
        let options = self.options;
        match options.seek {
            SeekPolicy::KeepFocused => {}
            SeekPolicy::FirstCandidate => {
                if let Some(first) = options.start.as_ref().or(candidates.first()) {
                    let focus = first.with_action(NodeAction::Focus);
                    session.dispatch(&Command::Focus(focus))?;
                    self.anchor = Some(first.clone());
                }
            }
            SeekPolicy::FirstLocatable => {
                for candidate in candidates {
                    let focus = candidate.with_action(NodeAction::Focus);
                    let (_, response) = session.dispatch(&Command::Focus(focus))?;
                    self.anchor = Some(candidate.clone());
                    let located = matches!(
                        response,
                        Some(CommandResponse::Locatable {
                            state: LocatableState::Completed,
                            ..
                        })
                    );
                    if located {
                        self.state.record_visit(candidate);
                        break;
                    }
                    if let Some(region) = options.ad_region {
                        if !is_outside(region, candidate.bounds) {
                            self.state.excessive_interactions += 1;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn step<C, L, S>(&mut self, session: &mut Session<'_, C, L, S>) -> Result<Step>
    where
        C: Controller,
        L: LogCapture,
        S: SnapshotCapture,
    {
        let options = self.options;
        self.state.step_counter += 1;
        let command = Command::navigation(options.forward, options.jump_mode);
        let (logs, response) = session.dispatch(&command)?;

        if session.window_changed(&logs) {
            info!(step = self.state.step_counter, "window content changed");
            let index = self.state.screenshots().len();
            if let Some(shot) = session.snapshot(options.goal.capture_mode(), index) {
                self.state.push_screenshot(shot);
            }
        }

        let navigated = match response {
            Some(CommandResponse::Navigate { navigated_node }) => navigated_node,
            Some(CommandResponse::Locatable { .. }) | Some(CommandResponse::Info { .. }) | None => {
                error!("terminating exploration: problem with navigation");
                return Ok(Step::Stop(Phase::Terminated(TerminationReason::NavigationError)));
            }
        };

        let node = match navigated.filter(Node::has_identity) {
            Some(node) => {
                self.state.consecutive_none_count = 0;
                node
            }
            None => {
                self.state.consecutive_none_count += 1;
                warn!(
                    count = self.state.consecutive_none_count,
                    "navigated node is missing or has no xpath"
                );
                if self.state.consecutive_none_count > options.thresholds.none_node_limit {
                    error!("terminating exploration: too many nodes without identity");
                    return Ok(Step::Stop(Phase::Terminated(
                        TerminationReason::NoneNodeLimitExceeded,
                    )));
                }
                return Ok(Step::Continue);
            }
        };

        self.state.record_visit(&node);

        if let Goal::Target(target) = &options.goal {
            if is_target(session, Some(&node), target)? {
                info!(steps = self.state.step_counter, "target node found");
                return Ok(Step::Stop(Phase::TargetFound));
            }
        }

        match &self.anchor {
            Some(anchor) if anchor.same_identity(&node) => self.state.revisit_count += 1,
            Some(_) => {}
            None => self.anchor = Some(node.clone()),
        }

        if let Some(pos) = self.pending.iter().position(|t| t.same_identity(&node)) {
            let target = self.pending.remove(pos);
            match options.goal {
                Goal::Sweep => self.resolve_sweep_target(session, target),
                Goal::Coverage => debug!(xpath = %target.xpath, "reached"),
                Goal::Target(_) => {}
            }
        }

        if options.goal.stops_on_revisit()
            && self.state.revisit_count >= options.thresholds.revisit_limit
        {
            info!(revisits = self.state.revisit_count, "navigation cycled back to anchor");
            return Ok(Step::Stop(Phase::Terminated(
                TerminationReason::RevisitLimitExceeded,
            )));
        }
        Ok(Step::Continue)
    }

    fn resolve_sweep_target<C, L, S>(&mut self, session: &mut Session<'_, C, L, S>, target: Node)
    where
        C: Controller,
        L: LogCapture,
        S: SnapshotCapture,
    {
        let steps = self.state.step_counter;
        if steps > self.options.thresholds.far_off_steps {
            match self.options.ad_region {
                Some(region) if is_outside(region, target.bounds) => {
                    info!(xpath = %target.xpath, steps, "excessive interaction outside ad unit");
                    self.state.excessive_interactions += 1;
                }
                _ => {
                    info!(xpath = %target.xpath, steps, "far-off element");
                    self.state.far_off_elements.push(target);
                }
            }
            return;
        }

        info!(xpath = %target.xpath, steps, "reached target, activating");
        self.state.swipe_nums = Some(steps);
        let clicked = target.with_action(NodeAction::Click);
        let before = session.snapshot(CaptureMode::Ineffective, steps);
        if let Err(err) = session.dispatch(&Command::Click(clicked.clone())) {
            warn!(error = %err, "click dispatch failed");
        }
        let after = session.snapshot(CaptureMode::Ineffective, steps + 1);

        let (Some(before), Some(after)) = (before, after) else {
            warn!(xpath = %clicked.xpath, "skipping effect check: missing screenshots");
            return;
        };
        match compare_screenshots(&before, &after, self.options.thresholds.hash_cutoff) {
            Ok(diff) if diff.effect == ActionEffect::Ineffective => {
                info!(xpath = %clicked.xpath, distance = diff.distance, "ineffective action");
                if self.state.ineffective_node.is_none() {
                    let book = session.book;
                    if let Err(err) = annotate_nodes(
                        &book.initial_screenshot(),
                        &book.ineffective_screenshot(),
                        std::slice::from_ref(&clicked),
                    ) {
                        warn!(error = %err, "could not annotate ineffective node");
                    }
                    self.state.ineffective_node = Some(clicked);
                }
            }
            Ok(diff) => debug!(distance = diff.distance, "action had a visible effect"),
            Err(err) => warn!(error = %err, "visual diff failed"),
        }
    }

    fn finish(mut self) -> ExplorationState {
        let state = &mut self.state;
        if let Goal::Target(target) = &self.options.goal {
            if state.phase != Phase::TargetFound && !state.was_visited(target) {
                state.unvisited_nodes.push(target.clone());
            }
        }
        for node in self.pending.drain(..) {
            if !state.was_visited(&node) {
                state.unvisited_nodes.push(node);
            }
        }
        info!(
            reason = ?state.termination(),
            steps = state.step_counter,
            visited = state.visited_nodes.len(),
            unvisited = state.unvisited_nodes.len(),
            far_off = state.far_off_elements.len(),
            "linear exploration finished"
        );
        self.state
    }
}

/// Focused node matches `target`, or the service confirms it holds focus.
fn is_target<C, L, S>(
    session: &mut Session<'_, C, L, S>,
    focused: Option<&Node>,
    target: &Node,
) -> Result<bool>
where
    C: Controller,
    L: LogCapture,
    S: SnapshotCapture,
{
    if focused.is_some_and(|node| target.same_identity(node)) {
        return Ok(true);
    }
    session.is_focused(target)
}
