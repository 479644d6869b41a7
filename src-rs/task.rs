//! Audit tasks: sequence the passes over one screen directory, then write
//! the annotated images, GIFs, issue files and the defect report.

use crate::ad::{classify_har, AdContext, AdUnit};
use crate::adb::Adb;
use crate::annotate::{annotate_nodes, create_gif};
use crate::config::AuditConfig;
use crate::controller::{AdbController, Controller, ControllerMode};
use crate::error::AuditError;
use crate::explore::{explore_linear, ExploreOptions, Goal, SeekPolicy};
use crate::logcat::{AdbLogcat, LogCapture};
use crate::node::{load_nodes, Bounds, Node};
use crate::report::{write_jsonl, write_swipe_record, DefectCounts, DefectReport, WriteMode};
use crate::session::Session;
use crate::snapshot::{AddressBook, AdbSnapshot, SnapshotCapture};
use crate::unlocatable::find_unlocatable;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// A screen directory whose actions have been extracted.
#[derive(Debug, Clone)]
pub struct Screen {
    pub book: AddressBook,
    /// Selected actionable nodes, in extraction order.
    pub selected: Vec<Node>,
    /// Every node of the initial layout.
    pub nodes: Vec<Node>,
}

impl Screen {
    pub fn open(dir: &Path) -> Result<Self> {
        let book = AddressBook::new(dir);
        let selected_path = book.selected_actions();
        if !selected_path.exists() {
            error!(path = %selected_path.display(), "actions should be extracted first");
            bail!(
                "actions should be extracted first: missing {}",
                selected_path.display()
            );
        }
        let initial = book.initial_screenshot();
        if !initial.exists() {
            bail!("missing initial screenshot: {}", initial.display());
        }
        let selected = load_nodes(&selected_path)
            .with_context(|| format!("failed to load {}", selected_path.display()))?;
        let layout = book.initial_layout();
        let nodes = load_nodes(&layout)
            .with_context(|| format!("failed to load {}", layout.display()))?;
        book.ensure_dirs()
            .with_context(|| format!("failed to prepare {}", book.root().display()))?;
        info!(
            screen = %book.root().display(),
            selected = selected.len(),
            nodes = nodes.len(),
            "screen loaded"
        );
        Ok(Self {
            book,
            selected,
            nodes,
        })
    }
}

/// adb-backed collaborators built from one config.
pub struct AdbDevice<'c> {
    config: &'c AuditConfig,
}

impl<'c> AdbDevice<'c> {
    pub fn new(config: &'c AuditConfig) -> Self {
        Self { config }
    }

    fn adb(&self) -> Adb {
        let adb = &self.config.adb;
        Adb::new(&adb.program, adb.serial.clone(), adb.command_timeout())
    }

    pub fn controller(&self, mode: ControllerMode) -> AdbController {
        AdbController::new(self.adb(), mode, self.config.device.clone())
    }

    pub fn logcat(&self) -> AdbLogcat {
        AdbLogcat::new(self.adb(), self.config.adb.log_settle())
    }

    pub fn snapshots(&self) -> AdbSnapshot {
        AdbSnapshot::new(
            self.adb(),
            &self.config.device.layout_path,
            self.config.adb.capture_delay(),
        )
    }
}

pub fn analyze_ad_screen(config: &AuditConfig, screen_dir: &Path, har: &Path) -> Result<Value> {
    let screen = Screen::open(screen_dir)?;
    let classification =
        classify_har(har).with_context(|| format!("failed to classify {}", har.display()))?;
    let ctx = AdContext::prepare(
        &screen.book,
        classification,
        screen.selected.clone(),
        &screen.nodes,
        &mut rand::thread_rng(),
    )
    .context("failed to prepare ad context")?;

    let device = AdbDevice::new(config);
    let mut touch = device.controller(ControllerMode::TbTouch);
    let mut api = device.controller(ControllerMode::TbApi);
    audit_ad_screen(
        &screen,
        &ctx,
        &mut touch,
        &mut api,
        &mut device.logcat(),
        &mut device.snapshots(),
        config,
    )
}

/// Touch-driven unlocatable pass, then the API-driven coverage pass, then
/// a fresh report. The report is written before any image, and still carries
/// the touch metrics when the API controller cannot be set up.
pub fn audit_ad_screen<T, A, L, S>(
    screen: &Screen,
    ctx: &AdContext,
    touch: &mut T,
    api: &mut A,
    logs: &mut L,
    snapshots: &mut S,
    config: &AuditConfig,
) -> Result<Value>
where
    T: Controller,
    A: Controller,
    L: LogCapture,
    S: SnapshotCapture,
{
    if ctx.element_count == 0 {
        return Err(AuditError::NoSelectableElements.into());
    }
    let book = &screen.book;
    info!(
        candidates = ctx.candidates.len(),
        elements = ctx.element_count,
        "analyzing ad screen"
    );

    touch.setup().context("touch controller setup failed")?;
    let touch_pass = {
        let mut session = Session::new(
            &mut *touch,
            &mut *logs,
            &mut *snapshots,
            book,
            config.tags.clone(),
        );
        find_unlocatable(
            &mut session,
            &ctx.candidates,
            &screen.nodes,
            ctx.unlabelled_scope.as_ref(),
        )
    };

    let api_mode = api.mode();
    let (linear, api_failure) = match api.setup() {
        Ok(()) => {
            let mut options = ExploreOptions::new(Goal::Coverage);
            options.thresholds = config.thresholds;
            options.ad_region = ctx.region();
            let targets: &[Node] = if ctx.is_inline() {
                options.seek = SeekPolicy::FirstLocatable;
                ctx.candidates.get(1..).unwrap_or(&[])
            } else {
                options.seek = SeekPolicy::KeepFocused;
                &ctx.candidates
            };
            let mut session = Session::new(
                &mut *api,
                &mut *logs,
                &mut *snapshots,
                book,
                config.tags.clone(),
            );
            (Some(explore_linear(&mut session, targets, &options)), None)
        }
        Err(err) => {
            error!(error = %err, "api controller setup failed, reporting the touch pass only");
            (None, Some(err))
        }
    };

    let counts = DefectCounts {
        element_count: ctx.element_count,
        unlocatable_touch: Some(touch_pass.unvisited_nodes.len()),
        unlocatable_linear: linear.as_ref().map(|l| l.unvisited_nodes.len()),
        unlabelled: Some(touch_pass.unlabelled.len()),
        assertive: Some(touch_pass.assertive_count),
        excessive_interaction: linear.as_ref().map(|l| l.excessive_interactions),
        ad_library: ctx.classification.map(|c| c.library.to_string()),
        ad_type: ctx.classification.map(|c| c.format.to_string()),
        ..DefectCounts::default()
    };
    let report = DefectReport::from_counts(&counts)?;
    report.persist(&book.error_result(), WriteMode::Overwrite)?;

    write_pass_artifacts(
        book,
        touch.mode(),
        &touch_pass.issues,
        &touch_pass.unvisited_nodes,
        &touch_pass.frames,
    )?;
    if !touch_pass.unlabelled.is_empty() {
        best_effort(render(
            &book.initial_screenshot(),
            &book.unlabelled_screenshot(),
            &touch_pass.unlabelled,
        ));
    }
    if let Some(linear) = &linear {
        let unreached: Vec<Value> = linear.unvisited_nodes.iter().map(Node::to_json).collect();
        write_pass_artifacts(
            book,
            api_mode,
            &unreached,
            &linear.unvisited_nodes,
            &linear.screenshot_visits(),
        )?;
    }

    let summary = json!({
        "task": "analyze-ad",
        "screen_dir": book.root(),
        "ad": ctx.classification,
        "touch_pass_aborted": touch_pass.aborted,
        "linear_termination": linear.as_ref().and_then(|l| l.termination()),
        "steps": linear.as_ref().map(|l| l.step_counter),
        "report_path": book.error_result(),
        "report": report.metrics(),
    });
    write_run_record(book, "analyze_ad", &summary)?;
    if let Some(err) = api_failure {
        return Err(anyhow::Error::new(err).context("api controller setup failed"));
    }
    Ok(summary)
}

/// What the far-off task should explore.
#[derive(Debug, Clone, Default)]
pub struct FarOffRequest {
    /// Indices into the selected nodes; all of them when empty.
    pub actions: Vec<usize>,
    /// Search for this node instead of sweeping.
    pub target_xpath: Option<String>,
    pub jump_mode: bool,
    pub backward: bool,
}

pub fn far_off_elements(
    config: &AuditConfig,
    screen_dir: &Path,
    request: &FarOffRequest,
) -> Result<Value> {
    let screen = Screen::open(screen_dir)?;
    let ad_region = screen_ad_region(&screen.book, &mut rand::thread_rng())?;
    let device = AdbDevice::new(config);
    let mut api = device.controller(ControllerMode::TbApi);
    audit_far_off(
        &screen,
        request,
        ad_region,
        &mut api,
        &mut device.logcat(),
        &mut device.snapshots(),
        config,
    )
}

/// Sequential sweep over the requested targets (or a target search), then
/// one report line appended to the screen's report. With an `ad_region`,
/// late targets outside it count as excessive interaction.
pub fn audit_far_off<C, L, S>(
    screen: &Screen,
    request: &FarOffRequest,
    ad_region: Option<Bounds>,
    controller: &mut C,
    logs: &mut L,
    snapshots: &mut S,
    config: &AuditConfig,
) -> Result<Value>
where
    C: Controller,
    L: LogCapture,
    S: SnapshotCapture,
{
    let element_count = screen.nodes.len();
    if element_count == 0 {
        return Err(AuditError::NoSelectableElements.into());
    }
    let book = &screen.book;
    let targets = pick_actions(&screen.selected, &request.actions)?;

    let goal = match &request.target_xpath {
        Some(xpath) => Goal::Target(lookup_node(screen, xpath)),
        None => Goal::Sweep,
    };
    let searching = matches!(goal, Goal::Target(_));
    let mut options = ExploreOptions::new(goal);
    options.start = screen.selected.first().cloned();
    options.forward = !request.backward;
    options.jump_mode = request.jump_mode;
    options.thresholds = config.thresholds;
    options.ad_region = ad_region;

    controller.setup().context("controller setup failed")?;
    let state = {
        let mut session = Session::new(controller, logs, snapshots, book, config.tags.clone());
        explore_linear(&mut session, &targets, &options)
    };

    let counts = if searching {
        DefectCounts {
            element_count,
            unlocatable_linear: Some(state.unvisited_nodes.len()),
            ..DefectCounts::default()
        }
    } else {
        DefectCounts {
            element_count,
            far_off: Some(state.far_off_elements.len()),
            ineffective: Some(usize::from(state.ineffective_node.is_some())),
            excessive_interaction: ad_region.map(|_| state.excessive_interactions),
            ..DefectCounts::default()
        }
    };
    let report = DefectReport::from_counts(&counts)?;
    report.persist(&book.error_result(), WriteMode::Append)?;
    if !searching {
        write_swipe_record(&book.swipe_num(), state.swipe_nums)?;
    }

    if !state.far_off_elements.is_empty() {
        best_effort(render(
            &book.initial_screenshot(),
            &book.far_off_screenshot(),
            &state.far_off_elements,
        ));
    }
    best_effort(gif(&state.screenshot_visits(), &book.far_off_gif()));

    let xpaths = |nodes: &[Node]| nodes.iter().map(|n| n.xpath.clone()).collect::<Vec<_>>();
    let summary = json!({
        "task": "far-off",
        "screen_dir": book.root(),
        "termination": state.termination(),
        "target_found": searching.then(|| state.target_found()),
        "steps": state.step_counter,
        "swipe_nums": state.swipe_nums,
        "far_off": xpaths(&state.far_off_elements),
        "excessive_interactions": state.excessive_interactions,
        "unvisited": xpaths(&state.unvisited_nodes),
        "ineffective": state.ineffective_node.as_ref().map(|n| n.xpath.clone()),
        "report_path": book.error_result(),
        "report": report.metrics(),
    });
    write_run_record(book, "far_off", &summary)?;
    Ok(summary)
}

/// Region of the screen's ad unit, for screens that have one.
fn screen_ad_region(book: &AddressBook, rng: &mut impl Rng) -> Result<Option<Bounds>> {
    let unit = AdUnit::load_if_present(book, rng).context("failed to load ad unit")?;
    Ok(unit.and_then(|unit| unit.region))
}

fn pick_actions(selected: &[Node], indices: &[usize]) -> Result<Vec<Node>> {
    if indices.is_empty() {
        return Ok(selected.to_vec());
    }
    indices
        .iter()
        .map(|&i| match selected.get(i) {
            Some(node) => Ok(node.clone()),
            None => bail!("action index {i} out of range ({} selected)", selected.len()),
        })
        .collect()
}

fn lookup_node(screen: &Screen, xpath: &str) -> Node {
    screen
        .selected
        .iter()
        .chain(&screen.nodes)
        .find(|n| n.xpath == xpath)
        .cloned()
        .unwrap_or_else(|| Node {
            xpath: xpath.to_string(),
            ..Node::default()
        })
}

fn write_pass_artifacts(
    book: &AddressBook,
    mode: ControllerMode,
    records: &[Value],
    unvisited: &[Node],
    frames: &[(PathBuf, Vec<Node>)],
) -> Result<()> {
    write_jsonl(&book.unlocatable_result(mode), records)?;
    if !unvisited.is_empty() {
        best_effort(render(
            &book.initial_screenshot(),
            &book.unvisited_screenshot(mode),
            unvisited,
        ));
    }
    best_effort(gif(frames, &book.unlocatable_gif(mode)));
    Ok(())
}

fn render(base: &Path, out: &Path, nodes: &[Node]) -> Result<()> {
    annotate_nodes(base, out, nodes)
        .with_context(|| format!("failed to annotate {}", out.display()))
}

fn gif(frames: &[(PathBuf, Vec<Node>)], out: &Path) -> Result<()> {
    create_gif(frames, out).with_context(|| format!("failed to write {}", out.display()))
}

/// Image artifacts never fail a task; the error is logged.
fn best_effort(result: Result<()>) {
    if let Err(err) = result {
        let err = format!("{err:#}");
        warn!(error = %err, "skipping image artifact");
    }
}

fn write_run_record(book: &AddressBook, task: &str, summary: &Value) -> Result<()> {
    let path = book.results_dir().join(format!("run_{task}.json"));
    let mut record = summary.clone();
    if let Value::Object(map) = &mut record {
        map.insert("generated_at".to_string(), json!(Utc::now().to_rfc3339()));
    }
    let raw = serde_json::to_string_pretty(&record)?;
    fs::write(&path, raw).with_context(|| format!("failed to write JSON: {}", path.display()))?;
    Ok(())
}
