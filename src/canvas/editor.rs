//! The editor core: everything between runtime snapshots and runtime calls.
//!
//! [`TreeEditor`] owns the displayed snapshot, its layout, the live scene, the
//! viewport, the gesture state and the selection. Layout is two-phase: a
//! snapshot only schedules a relayout, and [`TreeEditor::update`] measures the
//! nodes and lays them out once the relayout delay has passed.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use egui::{Rect, Vec2};

use super::interaction::{InteractionConfig, InteractionContext, InteractionMachine, Intent, PointerEvent};
use super::scene::{Scene, SceneDiff, SceneFrame, node_state_color};
use super::selection::{Selection, SelectionBridge, SelectionRequest};
use super::viewport::Viewport;
use crate::api::throttle::SnapshotThrottle;
use crate::api::{BridgeEvent, CallId, RpcResponse, RuntimeClient, TransportError};
use crate::edit::translate::{self, EditPlan};
use crate::edit::{CallSequence, EditError, SequenceStep};
use crate::persistence::settings::EditorSettings;
use crate::tree_utils::drop_targets::DropTarget;
use crate::tree_utils::layout::{LayoutConfig, LayoutError, TreeLayout, layout_tree};
use crate::tree_utils::model::{NodeName, NodeRecord, NodeState, TreeSnapshot};

/// Pixel size of a node as it will be drawn.
///
/// Returns None while a node cannot be measured yet; the layout pass is then
/// retried after the relayout delay.
pub trait NodeMeasurer {
    fn measure(&mut self, node: &NodeRecord) -> Option<Vec2>;
}

/// Every node gets the same size.
#[derive(Clone, Copy, Debug)]
pub struct FixedMeasurer(pub Vec2);

impl NodeMeasurer for FixedMeasurer {
    fn measure(&mut self, _node: &NodeRecord) -> Option<Vec2> { Some(self.0) }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ActiveView {
    #[default]
    Main,
    Subtree(String),
}

type ErrorCallback = Box<dyn FnMut(&EditError)>;

pub struct TreeEditor {
    settings: EditorSettings,
    main: Option<TreeSnapshot>,
    subtrees: BTreeMap<String, TreeSnapshot>,
    // Latest per-node states keyed by tree name, laid over the snapshot colors
    state_overlay: HashMap<String, HashMap<NodeName, NodeState>>,
    view: ActiveView,
    // View change held back by the discard confirmation
    pending_view: Option<ActiveView>,
    layout: TreeLayout,
    scene: Scene,
    viewport: Viewport,
    interaction: InteractionMachine,
    selection: SelectionBridge,
    throttle: SnapshotThrottle,
    sizes: HashMap<NodeName, Vec2>,
    relayout_at: Option<Instant>,
    last_autopan: Option<Instant>,
    sequences: Vec<CallSequence>,
    connected: bool,
    on_error: Option<ErrorCallback>,
}

impl std::fmt::Debug for TreeEditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeEditor")
            .field("view", &self.view)
            .field("nodes", &self.scene.node_count())
            .field("selection", self.selection.current())
            .field("sequences", &self.sequences.len())
            .field("connected", &self.connected)
            .finish()
    }
}

impl Default for TreeEditor {
    fn default() -> Self { Self::new(EditorSettings::default()) }
}

impl TreeEditor {
    pub fn new(settings: EditorSettings) -> Self {
        let interaction = InteractionMachine::new(InteractionConfig {
            drag_threshold: settings.drag_threshold,
            autopan_boundary: settings.autopan_boundary,
            autopan_max_step: settings.autopan_max_step,
            ..InteractionConfig::default()
        });
        Self {
            main: None,
            subtrees: BTreeMap::new(),
            state_overlay: HashMap::new(),
            view: ActiveView::Main,
            pending_view: None,
            layout: TreeLayout::default(),
            scene: Scene::new(settings.animation()),
            viewport: Viewport::new(settings.min_zoom, settings.max_zoom),
            interaction,
            selection: SelectionBridge::new(),
            throttle: SnapshotThrottle::new(settings.snapshot_min_interval()),
            sizes: HashMap::new(),
            relayout_at: None,
            last_autopan: None,
            sequences: Vec::new(),
            connected: false,
            on_error: None,
            settings,
        }
    }

    /// Called once for every failed gesture.
    pub fn on_error(&mut self, callback: impl FnMut(&EditError) + 'static) {
        self.on_error = Some(Box::new(callback));
    }

    pub fn settings(&self) -> &EditorSettings { &self.settings }
    pub fn layout(&self) -> &TreeLayout { &self.layout }
    pub fn scene(&self) -> &Scene { &self.scene }
    pub fn viewport(&self) -> &Viewport { &self.viewport }
    pub fn interaction(&self) -> &InteractionMachine { &self.interaction }
    pub fn selection(&self) -> &SelectionBridge { &self.selection }
    pub fn selection_mut(&mut self) -> &mut SelectionBridge { &mut self.selection }
    pub fn is_connected(&self) -> bool { self.connected }
    pub fn active_view(&self) -> &ActiveView { &self.view }
    pub fn pending_view(&self) -> Option<&ActiveView> { self.pending_view.as_ref() }
    pub fn running_edits(&self) -> usize { self.sequences.len() }

    /// Snapshot currently on screen.
    pub fn displayed(&self) -> Option<&TreeSnapshot> {
        displayed_of(&self.view, &self.main, &self.subtrees)
    }

    pub fn published_subtrees(&self) -> impl Iterator<Item = &str> {
        self.subtrees.keys().map(String::as_str)
    }

    /// Anything that still needs frames: tweens, a scheduled relayout, a parked snapshot or auto-pan.
    pub fn needs_repaint(&self, now: Instant) -> bool {
        self.scene.is_animating(now)
            || self.relayout_at.is_some()
            || self.throttle.has_pending()
            || self.interaction.autopan_active()
    }

    /// Earliest moment `update` has work to do.
    pub fn next_wakeup(&self) -> Option<Instant> {
        match (self.relayout_at, self.throttle.next_release()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // -- runtime input -------------------------------------------------------

    pub fn push_snapshot(&mut self, snapshot: TreeSnapshot, now: Instant) {
        match self.throttle.offer(snapshot, now) {
            Some(released) => self.accept_main(released, now),
            None => log::debug!("snapshot deferred by the rate limit"),
        }
    }

    pub fn push_subtree_states(&mut self, subtrees: Vec<TreeSnapshot>, now: Instant) {
        self.subtrees = subtrees.into_iter().map(|s| (s.name.clone(), s)).collect();
        for name in self.subtrees.keys() {
            self.state_overlay.remove(name);
        }
        if let ActiveView::Subtree(name) = &self.view {
            if self.subtrees.contains_key(name) {
                self.displayed_changed(now);
            } else {
                log::warn!("subtree '{}' is no longer published, back to the main tree", name);
                self.switch_view(ActiveView::Main, now);
            }
        }
    }

    /// Recolor nodes of `tree_name` without touching the layout.
    pub fn push_node_states(&mut self, tree_name: &str, states: Vec<(NodeName, NodeState)>, now: Instant) {
        let overlay = self.state_overlay.entry(tree_name.to_string()).or_default();
        overlay.extend(states);
        if self.displayed().is_some_and(|s| s.name == tree_name) {
            self.refresh_scene(now);
        }
    }

    pub fn handle_event(&mut self, event: BridgeEvent, client: &mut dyn RuntimeClient, now: Instant) {
        match event {
            BridgeEvent::Connected => {
                log::info!("runtime bridge connected");
                self.connected = true;
            }
            BridgeEvent::Disconnected(reason) => {
                log::warn!("runtime bridge disconnected: {}", reason);
                self.connected = false;
                let in_flight: Vec<CallId> = self.sequences.iter().filter_map(CallSequence::in_flight).collect();
                for id in in_flight {
                    self.handle_response(id, Err(TransportError::Disconnected), client, now);
                }
            }
            BridgeEvent::Response { id, result } => self.handle_response(id, result, client, now),
            BridgeEvent::Tree(snapshot) => self.push_snapshot(snapshot, now),
            BridgeEvent::SubtreeStates(subtrees) => self.push_subtree_states(subtrees, now),
            BridgeEvent::NodeStates { tree_name, states } => self.push_node_states(&tree_name, states, now),
        }
    }

    pub fn handle_response(
        &mut self,
        id: CallId,
        result: Result<RpcResponse, TransportError>,
        client: &mut dyn RuntimeClient,
        now: Instant,
    ) {
        let Some(pos) = self.sequences.iter().position(|s| s.owns(id)) else {
            log::debug!("response to call {} matches no running edit", id);
            return;
        };
        let step = self.sequences[pos].on_response(id, result, client, now);
        if self.sequences[pos].is_done() {
            self.sequences.remove(pos);
        }
        if let Some(step) = step {
            self.on_step(step);
        }
    }

    /// Fail calls that have been waiting longer than the RPC timeout.
    pub fn poll_timeouts(&mut self, now: Instant) {
        let steps: Vec<SequenceStep> = self.sequences.iter_mut().filter_map(|s| s.check_timeout(now)).collect();
        self.sequences.retain(|s| !s.is_done());
        for step in steps {
            self.on_step(step);
        }
    }

    // -- frame work ----------------------------------------------------------

    /// Release parked snapshots and run a due relayout.
    pub fn update(&mut self, now: Instant, measurer: &mut dyn NodeMeasurer) {
        if let Some(snapshot) = self.throttle.poll(now) {
            self.accept_main(snapshot, now);
        }
        if self.relayout_at.is_some_and(|at| now >= at) {
            self.relayout_at = None;
            self.relayout(now, measurer);
        }
    }

    /// Measure and lay out the displayed tree right away.
    pub fn relayout(&mut self, now: Instant, measurer: &mut dyn NodeMeasurer) -> Option<SceneDiff> {
        let Some(snapshot) = displayed_of(&self.view, &self.main, &self.subtrees) else {
            self.layout = TreeLayout::default();
            self.scene.clear();
            return None;
        };

        self.sizes.retain(|name, _| snapshot.contains(name));
        for node in &snapshot.nodes {
            if let Some(size) = measurer.measure(node) {
                self.sizes.insert(node.name.clone(), size);
            }
        }

        let config = LayoutConfig { spacing: self.settings.node_spacing };
        match layout_tree(snapshot, &self.sizes, Some(&self.layout), &config) {
            Ok(layout) => {
                let frame = build_frame(&layout, snapshot, self.state_overlay.get(&snapshot.name));
                let diff = self.scene.sync(&frame, now);
                log::debug!(
                    "laid out '{}': {} node(s), +{} -{} element(s)",
                    snapshot.name,
                    layout.visible().count(),
                    diff.insert_count(),
                    diff.remove_count()
                );
                self.layout = layout;
                Some(diff)
            }
            Err(LayoutError::Unmeasured(names)) => {
                log::debug!("layout deferred, {} node(s) not measured yet", names.len());
                self.relayout_at = Some(now + self.settings.relayout_delay());
                None
            }
        }
    }

    // -- pointer input -------------------------------------------------------

    pub fn handle_pointer(&mut self, event: PointerEvent, screen: Rect, client: &mut dyn RuntimeClient, now: Instant) {
        let empty = TreeSnapshot::default();
        let snapshot = displayed_of(&self.view, &self.main, &self.subtrees).unwrap_or(&empty);
        let ctx = InteractionContext {
            snapshot,
            layout: &self.layout,
            scene: &self.scene,
            selection: self.selection.current(),
            screen,
            now,
        };
        let intents = self.interaction.handle(event, &mut self.viewport, &ctx);
        for intent in intents {
            self.apply_intent(intent, client, now);
        }
    }

    /// Feed auto-pan ticks at the configured rate while a drag hugs an edge.
    pub fn tick(&mut self, screen: Rect, client: &mut dyn RuntimeClient, now: Instant) {
        if !self.interaction.autopan_active() {
            self.last_autopan = None;
            return;
        }
        let due = self.last_autopan.is_none_or(|t| now.saturating_duration_since(t) >= self.settings.autopan_interval());
        if due {
            self.last_autopan = Some(now);
            self.handle_pointer(PointerEvent::Tick { now }, screen, client, now);
        }
    }

    fn apply_intent(&mut self, intent: Intent, client: &mut dyn RuntimeClient, now: Instant) {
        match intent {
            Intent::Select(selection) => {
                if self.selection.request(selection) == SelectionRequest::NeedsConfirmation {
                    log::debug!("selection change waits for discard confirmation");
                    // The newer request replaces a parked view change
                    self.pending_view = None;
                }
            }
            Intent::ApplyDrop { dragged, target } => {
                if !self.editable() {
                    return;
                }
                let Some(snapshot) = self.main.as_ref() else { return };
                match translate::plan_drop(snapshot, &dragged, &target) {
                    Ok(plan) => self.start(plan, client, now),
                    Err(e) => self.report(e),
                }
            }
            Intent::CreateWire(wiring) => {
                if self.editable() {
                    self.start(translate::plan_wire(&wiring), client, now);
                }
            }
            Intent::OpenSubtree(name) => {
                if let Err(e) = self.set_active_view(ActiveView::Subtree(name), now) {
                    self.report(e);
                }
            }
        }
    }

    // Subtree views mirror debug state and are read-only
    fn editable(&self) -> bool {
        if self.view != ActiveView::Main {
            log::debug!("ignoring edit in subtree view");
            return false;
        }
        true
    }

    // -- edits outside of pointer gestures -----------------------------------

    /// Unwire the selected data wiring. Returns false when no wiring is selected.
    pub fn remove_selected_wiring(&mut self, client: &mut dyn RuntimeClient, now: Instant) -> bool {
        let Some(wiring) = self.selection.current().wiring().cloned() else { return false };
        if !self.editable() {
            return false;
        }
        self.start(translate::plan_unwire(&wiring), client, now);
        true
    }

    /// Insert a brand-new node definition at an insert target of the main tree.
    pub fn drop_new_node(
        &mut self,
        definition: NodeRecord,
        target: &DropTarget,
        client: &mut dyn RuntimeClient,
        now: Instant,
    ) -> Result<(), EditError> {
        let parent = self.main.as_ref().and_then(|s| s.node(&target.reference));
        let plan = match parent {
            None => Err(EditError::UnknownNode(target.reference.clone())),
            Some(p) if !p.has_capacity() => Err(EditError::InvalidDrop(format!("'{}' cannot take more children", p.name))),
            Some(_) => translate::plan_insert_new(&definition, target),
        };
        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => {
                self.report(e.clone());
                return Err(e);
            }
        };
        if self.editable() {
            self.start(plan, client, now);
        }
        Ok(())
    }

    fn start(&mut self, plan: EditPlan, client: &mut dyn RuntimeClient, now: Instant) {
        let (sequence, step) = CallSequence::start(plan, client, now, self.settings.rpc_timeout());
        if !sequence.is_done() {
            self.sequences.push(sequence);
        }
        self.on_step(step);
    }

    fn on_step(&mut self, step: SequenceStep) {
        match step {
            SequenceStep::Dispatched(_) => {}
            SequenceStep::Completed(kind) => log::info!("{:?} edit accepted by the runtime", kind),
            SequenceStep::Failed(e) => self.report(e),
        }
    }

    fn report(&mut self, error: EditError) {
        log::warn!("edit failed: {}", error);
        if let Some(callback) = self.on_error.as_mut() {
            callback(&error);
        }
    }

    // -- views ---------------------------------------------------------------

    pub fn set_active_view(&mut self, view: ActiveView, now: Instant) -> Result<(), EditError> {
        if let ActiveView::Subtree(name) = &view {
            if !self.subtrees.contains_key(name) {
                return Err(EditError::SubtreeNotPublished(name.clone()));
            }
        }
        if view == self.view {
            return Ok(());
        }
        // Leaving the tree drops the selection, which unsaved edits have to allow first
        if self.selection.request(Selection::None) == SelectionRequest::NeedsConfirmation {
            log::debug!("switch to {:?} waits for discard confirmation", view);
            self.pending_view = Some(view);
            return Ok(());
        }
        self.switch_view(view, now);
        Ok(())
    }

    /// Drop the unsaved edits, then apply the held selection or view change.
    pub fn confirm_discard(&mut self, now: Instant) -> bool {
        if !self.selection.confirm_discard() {
            return false;
        }
        if let Some(view) = self.pending_view.take() {
            match &view {
                ActiveView::Subtree(name) if !self.subtrees.contains_key(name) => {
                    self.report(EditError::SubtreeNotPublished(name.clone()));
                }
                _ => self.switch_view(view, now),
            }
        }
        true
    }

    /// Keep editing: the held selection or view change is forgotten.
    pub fn cancel_discard(&mut self) {
        self.selection.cancel_discard();
        self.pending_view = None;
    }

    fn switch_view(&mut self, view: ActiveView, now: Instant) {
        log::info!("showing {:?}", view);
        self.view = view;
        self.pending_view = None;
        self.interaction.reset();
        self.layout = TreeLayout::default();
        self.scene.clear();
        self.selection.reset();
        self.relayout_at = Some(now);
    }

    pub fn fit_view(&mut self, screen: Rect) {
        if let Some(bounds) = self.layout.bounds() {
            self.viewport.fit(bounds, screen);
        }
    }

    pub fn reset_view(&mut self) {
        self.viewport.reset();
    }

    fn accept_main(&mut self, snapshot: TreeSnapshot, now: Instant) {
        log::debug!("applying snapshot '{}' with {} node(s)", snapshot.name, snapshot.nodes.len());
        self.state_overlay.remove(&snapshot.name);
        self.main = Some(snapshot);
        if self.view == ActiveView::Main {
            self.displayed_changed(now);
        }
    }

    fn displayed_changed(&mut self, now: Instant) {
        if let Some(snapshot) = displayed_of(&self.view, &self.main, &self.subtrees) {
            self.selection.prune(snapshot);
        }
        let due = now + self.settings.relayout_delay();
        // A steady stream of snapshots must not postpone the relayout forever
        self.relayout_at = Some(self.relayout_at.map_or(due, |at| at.min(due)));
    }

    // Restyle against the current layout, no measuring or relayout
    fn refresh_scene(&mut self, now: Instant) {
        let Some(snapshot) = displayed_of(&self.view, &self.main, &self.subtrees) else { return };
        if self.layout.is_empty() {
            return;
        }
        let frame = build_frame(&self.layout, snapshot, self.state_overlay.get(&snapshot.name));
        self.scene.sync(&frame, now);
    }
}

// Field-level lookup so callers can keep mutating the rest of the editor
fn displayed_of<'a>(
    view: &ActiveView,
    main: &'a Option<TreeSnapshot>,
    subtrees: &'a BTreeMap<String, TreeSnapshot>,
) -> Option<&'a TreeSnapshot> {
    match view {
        ActiveView::Main => main.as_ref(),
        ActiveView::Subtree(name) => subtrees.get(name),
    }
}

fn build_frame(layout: &TreeLayout, snapshot: &TreeSnapshot, overlay: Option<&HashMap<NodeName, NodeState>>) -> SceneFrame {
    let mut frame = SceneFrame::from_layout(layout, snapshot);
    for (name, state) in overlay.into_iter().flatten() {
        if let Some(node) = frame.nodes.get_mut(name) {
            node.state = *state;
            node.border = node_state_color(*state);
        }
    }
    frame
}
