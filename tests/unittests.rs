use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

use egui::{Pos2, Rect, Vec2, pos2, vec2};
use serde_json::json;

use tree_loom::api::protocol::{self, ProtocolError, Topics};
use tree_loom::api::throttle::SnapshotThrottle;
use tree_loom::api::{BridgeEvent, CallId, RpcResponse, RuntimeCall, RuntimeClient, TransportError};
use tree_loom::canvas::editor::{ActiveView, FixedMeasurer, TreeEditor};
use tree_loom::canvas::interaction::{Interaction, Modifiers, PointerEvent};
use tree_loom::canvas::scene::{Scene, SceneFrame, diff, node_state_color};
use tree_loom::canvas::selection::{Selection, SelectionBridge, SelectionRequest};
use tree_loom::canvas::viewport::Viewport;
use tree_loom::edit::translate::{self, EditKind};
use tree_loom::edit::{CallSequence, EditError, SequenceStep};
use tree_loom::gui::frontend::PointerFrame;
use tree_loom::persistence::settings::{AppSettings, EditorSettings};
use tree_loom::tree_utils::drop_targets::{DropFilter, DropSlot, DropTarget};
use tree_loom::tree_utils::layout::{LayoutConfig, LayoutError, TreeLayout, layout_tree};
use tree_loom::tree_utils::model::{
    DataPin, DataWiring, FOREST_ROOT, NodeRecord, NodeState, PinKind, TreeSnapshot, WiringEndpoint, wire_compatible,
};

// ---------------------------------------------------------------------------
// fixtures

const NODE: Vec2 = Vec2::new(100.0, 40.0);

fn node(name: &str, max_children: i32, children: &[&str]) -> NodeRecord {
    let mut n = NodeRecord::new(name, "Sequence", max_children);
    n.child_names = children.iter().map(|c| c.to_string()).collect();
    n
}

fn snap(nodes: Vec<NodeRecord>) -> TreeSnapshot {
    TreeSnapshot::new("tree", nodes)
}

fn sizes_for(snapshot: &TreeSnapshot) -> HashMap<String, Vec2> {
    snapshot.nodes.iter().map(|n| (n.name.clone(), NODE)).collect()
}

fn lay(snapshot: &TreeSnapshot) -> TreeLayout {
    layout_tree(snapshot, &sizes_for(snapshot), None, &LayoutConfig::default()).expect("all nodes are measured")
}

fn target(layout: &TreeLayout, owner: &str, slot: DropSlot) -> DropTarget {
    layout
        .drop_targets()
        .iter()
        .find(|t| t.owner == owner && t.slot == slot)
        .cloned()
        .unwrap_or_else(|| panic!("no {:?} target on {}", slot, owner))
}

#[derive(Default)]
struct MockClient {
    calls: Vec<RuntimeCall>,
    queued: VecDeque<BridgeEvent>,
}

impl RuntimeClient for MockClient {
    fn call(&mut self, call: RuntimeCall) -> CallId {
        self.calls.push(call);
        self.calls.len() as CallId
    }

    fn poll(&mut self) -> Vec<BridgeEvent> { self.queued.drain(..).collect() }
}

fn instant_settings() -> EditorSettings {
    EditorSettings { animation_ms: 0, relayout_delay_ms: 0, snapshot_min_interval_ms: 0, ..EditorSettings::default() }
}

// Editor with `snapshot` laid out and fully settled; screen space equals world space
fn editor_with(snapshot: TreeSnapshot, now: Instant) -> (TreeEditor, Rc<RefCell<Vec<EditError>>>) {
    let mut editor = TreeEditor::new(instant_settings());
    let errors: Rc<RefCell<Vec<EditError>>> = Rc::default();
    let sink = errors.clone();
    editor.on_error(move |e| sink.borrow_mut().push(e.clone()));
    editor.push_snapshot(snapshot, now);
    editor.update(now, &mut FixedMeasurer(NODE));
    (editor, errors)
}

fn screen() -> Rect {
    Rect::from_min_max(pos2(-1000.0, -1000.0), pos2(1000.0, 1000.0))
}

fn press(editor: &mut TreeEditor, client: &mut MockClient, at: Pos2, modifiers: Modifiers, now: Instant) {
    editor.handle_pointer(PointerEvent::Down { pos: at, modifiers }, screen(), client, now);
}

fn drag_to(editor: &mut TreeEditor, client: &mut MockClient, at: Pos2, now: Instant) {
    editor.handle_pointer(PointerEvent::Move { pos: at, primary_down: true }, screen(), client, now);
}

fn release(editor: &mut TreeEditor, client: &mut MockClient, at: Pos2, modifiers: Modifiers, now: Instant) {
    editor.handle_pointer(PointerEvent::Up { pos: at, modifiers }, screen(), client, now);
}

// A(children=[B, C]) with 100x40 boxes and 40 spacing:
//   A: x -50..50,   y 0..40
//   B: x -120..-20, y 80..120
//   C: x 20..120,   y 80..120
fn abc() -> TreeSnapshot {
    snap(vec![node("A", -1, &["B", "C"]), node("B", -1, &[]), node("C", -1, &[])])
}

// ---------------------------------------------------------------------------
// model

#[test]
fn wire_compatibility_rules() {
    let mut a = node("A", 0, &[]);
    a.outputs.push(DataPin::new("out", "int"));
    a.inputs.push(DataPin::new("in", "int"));
    let mut b = node("B", 0, &[]);
    b.inputs.push(DataPin::new("in", "int"));
    b.inputs.push(DataPin::new("any", "object"));
    b.inputs.push(DataPin::new("text", "str"));
    let s = snap(vec![a, b]);

    let a_out = WiringEndpoint::new("A", PinKind::Outputs, "out");
    let b_in = WiringEndpoint::new("B", PinKind::Inputs, "in");
    let wiring = wire_compatible(&s, &a_out, &b_in).expect("int -> int on different nodes");
    assert_eq!(wiring.source, a_out);
    assert_eq!(wiring.target, b_in);

    // Dragging from the input side yields the same orientation
    assert_eq!(wire_compatible(&s, &b_in, &a_out), Some(wiring));

    // Self loop
    assert!(wire_compatible(&s, &a_out, &WiringEndpoint::new("A", PinKind::Inputs, "in")).is_none());
    // object accepts anything
    assert!(wire_compatible(&s, &a_out, &WiringEndpoint::new("B", PinKind::Inputs, "any")).is_some());
    // type mismatch
    assert!(wire_compatible(&s, &a_out, &WiringEndpoint::new("B", PinKind::Inputs, "text")).is_none());
    // same kinds
    assert!(wire_compatible(&s, &b_in, &WiringEndpoint::new("A", PinKind::Inputs, "in")).is_none());
}

#[test]
fn wire_compatibility_reads_jsonpickle_type_tags() {
    let mut a = node("A", 0, &[]);
    a.outputs.push(DataPin::new("count", r#"{"py/type": "builtins.int"}"#));
    let mut b = node("B", 0, &[]);
    b.inputs.push(DataPin::new("anything", r#"{"py/type": "builtins.object"}"#));
    b.inputs.push(DataPin::new("number", r#"{"py/type": "builtins.int"}"#));
    b.inputs.push(DataPin::new("plain", "int"));
    b.inputs.push(DataPin::new("label", r#"{"py/type": "builtins.str"}"#));
    let s = snap(vec![a, b]);

    let out = WiringEndpoint::new("A", PinKind::Outputs, "count");
    assert!(wire_compatible(&s, &out, &WiringEndpoint::new("B", PinKind::Inputs, "anything")).is_some());
    assert!(wire_compatible(&s, &out, &WiringEndpoint::new("B", PinKind::Inputs, "number")).is_some());
    assert!(wire_compatible(&s, &out, &WiringEndpoint::new("B", PinKind::Inputs, "label")).is_none());
    // "builtins.int" is not the bare "int"
    assert!(wire_compatible(&s, &out, &WiringEndpoint::new("B", PinKind::Inputs, "plain")).is_none());

    assert_eq!(DataPin::new("x", r#"{"py/type": "__builtin__.object"}"#).type_name(), "__builtin__.object");
    assert!(DataPin::new("x", r#"{"py/type": "__builtin__.object"}"#).accepts_any());
    assert!(DataPin::new("x", "object").accepts_any());
}

#[test]
fn snapshot_queries() {
    let s = snap(vec![node("A", -1, &["B"]), node("B", 1, &["C"]), node("C", 0, &[])]);
    assert_eq!(s.parent_of("C").map(|(p, i)| (p.name.as_str(), i)), Some(("B", 0)));
    assert!(s.parent_of("A").is_none());
    assert_eq!(s.top_level().iter().map(|n| n.name.as_str()).collect::<Vec<_>>(), vec!["A"]);
    let d = s.descendants("A");
    assert!(d.contains("B") && d.contains("C") && !d.contains("A"));
    assert!(s.is_ancestor("A", "C"));
    assert!(!s.node("B").expect("B").has_capacity());
    assert!(s.node("A").expect("A").has_capacity());
}

#[test]
fn node_state_parses_runtime_strings() {
    let r: NodeRecord = serde_json::from_value(json!({
        "name": "n", "node_class": "Sequence", "state": "DEBUG_PRE_TICK", "max_children": -1
    }))
    .expect("record");
    assert_eq!(r.state, NodeState::DebugPreTick);
    assert!(r.state.is_debug());
    let r: NodeRecord =
        serde_json::from_value(json!({"name": "n", "node_class": "X", "state": "PAUSED"})).expect("record");
    assert_eq!(r.state, NodeState::Unknown);
}

// ---------------------------------------------------------------------------
// layout

#[test]
fn layout_single_child_scenario() {
    let s = snap(vec![node("A", -1, &["B"]), node("B", -1, &[])]);
    let layout = lay(&s);

    assert!(!layout.has_forest_root());
    assert_eq!(layout.len(), 2);
    let a = layout.get("A").expect("A");
    let b = layout.get("B").expect("B");
    assert_eq!(layout.parent("B").map(|p| p.name.as_str()), Some("A"));
    assert!(b.y >= a.y + a.size.y);
    assert!((a.x - b.x).abs() < 0.01);

    assert_eq!(layout.edges().len(), 1);
    let edge = &layout.edges()[0];
    assert_eq!(edge.key(), "A->B");
    assert_eq!(edge.from, a.bottom_center());
    assert_eq!(edge.to, b.top_center());
}

#[test]
fn layout_synthesizes_forest_root_for_multiple_tops() {
    let s = snap(vec![node("A", -1, &[]), node("B", -1, &[])]);
    let layout = lay(&s);

    assert!(layout.has_forest_root());
    assert_eq!(layout.len(), 3);
    assert_eq!(layout.root().map(|r| r.name.as_str()), Some(FOREST_ROOT));
    assert!(layout.edges().is_empty());
    assert_eq!(layout.visible().count(), 2);
    // Empty root band: both tops sit at the very top
    assert_eq!(layout.get("A").map(|n| n.y), Some(0.0));
}

#[test]
fn layout_empty_snapshot() {
    let layout = lay(&snap(vec![]));
    assert!(layout.has_forest_root());
    assert_eq!(layout.len(), 1);
    assert!(layout.bounds().is_none());
    assert!(layout.drop_targets().is_empty());
}

#[test]
fn layout_defers_unmeasured_nodes() {
    let s = snap(vec![node("A", -1, &["B"]), node("B", -1, &[])]);
    let mut sizes = sizes_for(&s);
    sizes.remove("B");
    let err = layout_tree(&s, &sizes, None, &LayoutConfig::default()).expect_err("B is unmeasured");
    assert_eq!(err, LayoutError::Unmeasured(vec!["B".to_string()]));
}

#[test]
fn layout_keeps_declared_sibling_order_and_bands() {
    let s = snap(vec![node("P", -1, &["Z", "A"]), node("Z", -1, &["Z1"]), node("A", -1, &[]), node("Z1", -1, &[])]);
    let mut sizes = sizes_for(&s);
    sizes.insert("A".into(), vec2(60.0, 90.0));
    let layout = layout_tree(&s, &sizes, None, &LayoutConfig::default()).expect("layout");

    let z = layout.get("Z").expect("Z");
    let a = layout.get("A").expect("A");
    assert!(z.x < a.x, "siblings follow child_names, not names");
    assert_eq!(z.y, a.y);
    // The next band starts below the tallest node of the band above
    let z1 = layout.get("Z1").expect("Z1");
    assert_eq!(z1.y, a.y + 90.0 + 40.0);
}

#[test]
fn layout_attaches_cycles_to_forest_root() {
    let s = snap(vec![node("A", -1, &["B"]), node("B", -1, &["A"]), node("C", -1, &[])]);
    let layout = lay(&s);
    assert_eq!(layout.visible().count(), 3);
    assert!(layout.has_forest_root());
}

#[test]
fn layout_marks_new_nodes_as_entering_from_parent() {
    let before = snap(vec![node("A", -1, &[])]);
    let previous = lay(&before);
    let after = snap(vec![node("A", -1, &["B"]), node("B", -1, &[])]);
    let layout = layout_tree(&after, &sizes_for(&after), Some(&previous), &LayoutConfig::default()).expect("layout");

    let b = layout.get("B").expect("B");
    assert!(b.entering);
    assert_eq!(b.enter_from, previous.get("A").map(|a| a.top_center()));
    assert!(!layout.get("A").expect("A").entering);
}

// ---------------------------------------------------------------------------
// drop targets

#[test]
fn bounded_parent_at_capacity_offers_no_append_target() {
    let s = snap(vec![node("D", 2, &["x", "y"]), node("x", 0, &[]), node("y", 0, &[])]);
    let layout = lay(&s);
    assert!(!layout.drop_targets().iter().any(|t| t.owner == "D" && t.slot == DropSlot::AppendChild));

    let s = snap(vec![node("F", -1, &["x", "y"]), node("x", 0, &[]), node("y", 0, &[])]);
    let layout = lay(&s);
    let append = target(&layout, "F", DropSlot::AppendChild);
    assert_eq!((append.replace, append.reference.as_str(), append.position), (false, "F", 2));
}

#[test]
fn drop_target_shapes() {
    let layout = lay(&abc());
    let before = target(&layout, "C", DropSlot::InsertBefore);
    assert_eq!((before.replace, before.reference.as_str(), before.position), (false, "A", 1));
    let after = target(&layout, "C", DropSlot::InsertAfter);
    assert_eq!(after.position, 2);
    let replace = target(&layout, "C", DropSlot::ReplaceAsParent);
    assert!(replace.is_replace_as_parent());
    assert_eq!((replace.reference.as_str(), replace.position), ("A", 1));
    let swap = target(&layout, "C", DropSlot::Swap);
    assert!(swap.is_swap());
    assert_eq!((swap.reference.as_str(), swap.position), ("C", -1));
    // The root has no parent slots
    assert!(!layout.drop_targets().iter().any(|t| t.owner == "A" && t.slot == DropSlot::InsertBefore));
}

#[test]
fn drag_filter_hides_descendants_and_own_slots() {
    let s = snap(vec![
        node("P", -1, &["a", "b", "X", "d"]),
        node("a", -1, &[]),
        node("b", -1, &[]),
        node("X", -1, &["x1"]),
        node("x1", -1, &[]),
        node("d", -1, &[]),
    ]);
    let layout = lay(&s);
    let filter = DropFilter::new(&s, "X").expect("X exists");

    assert!(filter.visible(layout.drop_targets()).iter().all(|t| t.owner != "x1" && t.owner != "X"));
    let hidden = filter.hidden_owners(layout.drop_targets());
    assert!(hidden.contains("x1") && hidden.contains("X"));

    // Both sides of X's current slot are no-ops
    assert!(!filter.allows(&target(&layout, "b", DropSlot::InsertAfter)));
    assert!(!filter.allows(&target(&layout, "d", DropSlot::InsertBefore)));
    assert!(filter.allows(&target(&layout, "d", DropSlot::InsertAfter)));
    assert!(filter.allows(&target(&layout, "a", DropSlot::InsertBefore)));
}

#[test]
fn drag_filter_respects_bounded_parents() {
    let s = snap(vec![
        node("R", -1, &["D", "Y"]),
        node("D", 2, &["p1", "p2"]),
        node("p1", 0, &[]),
        node("p2", 0, &[]),
        node("Y", 0, &[]),
    ]);
    let layout = lay(&s);

    // A stranger cannot squeeze into the full decorator
    let stranger = DropFilter::new(&s, "Y").expect("Y");
    assert!(!stranger.allows(&target(&layout, "p1", DropSlot::InsertBefore)));
    // A leaf cannot adopt a displaced node
    assert!(!stranger.allows(&target(&layout, "p1", DropSlot::ReplaceAsParent)));

    // A child reordering inside its own parent is fine
    let child = DropFilter::new(&s, "p1").expect("p1");
    assert!(child.allows(&target(&layout, "p2", DropSlot::InsertAfter)));

    // Swapping a leaf with a node that has two children would orphan them
    assert!(!stranger.allows(&target(&layout, "D", DropSlot::Swap)));
}

// ---------------------------------------------------------------------------
// structural edit translation

#[test]
fn same_parent_move_right_is_index_corrected() {
    let s = snap(vec![
        node("P", -1, &["a", "b", "X", "d", "e"]),
        node("a", -1, &[]),
        node("b", -1, &[]),
        node("X", -1, &[]),
        node("d", -1, &[]),
        node("e", -1, &[]),
    ]);
    let layout = lay(&s);
    let t = target(&layout, "e", DropSlot::InsertBefore);
    assert_eq!(t.position, 4);

    let plan = translate::plan_drop(&s, "X", &t).expect("valid drop");
    assert_eq!(plan.kind, EditKind::Insert);
    assert_eq!(plan.calls, vec![RuntimeCall::move_node("X", "P", 3)]);

    // Moving left needs no correction
    let plan = translate::plan_drop(&s, "X", &target(&layout, "a", DropSlot::InsertBefore)).expect("valid drop");
    assert_eq!(plan.calls, vec![RuntimeCall::move_node("X", "P", 0)]);
}

#[test]
fn replace_as_parent_issues_three_calls_in_order() {
    let s = snap(vec![node("A", -1, &["C", "B"]), node("C", -1, &[]), node("B", -1, &[])]);
    let layout = lay(&s);
    let plan = translate::plan_drop(&s, "C", &target(&layout, "B", DropSlot::ReplaceAsParent)).expect("valid drop");

    assert_eq!(plan.kind, EditKind::ReplaceAsParent);
    assert_eq!(
        plan.calls,
        vec![
            RuntimeCall::detach("C"),
            RuntimeCall::move_node("B", "C", 0),
            RuntimeCall::move_node("C", "A", 0),
        ]
    );
}

#[test]
fn swap_and_new_node_plans() {
    let s = abc();
    let layout = lay(&s);
    let plan = translate::plan_drop(&s, "B", &target(&layout, "C", DropSlot::Swap)).expect("valid drop");
    assert_eq!(
        plan.calls,
        vec![RuntimeCall::ReplaceNode { old_node_name: "C".into(), new_node_name: "B".into() }]
    );

    let fresh = NodeRecord::new("N", "Fallback", -1);
    let plan = translate::plan_insert_new(&fresh, &target(&layout, "A", DropSlot::AppendChild)).expect("insert");
    assert_eq!(plan.kind, EditKind::AddNew);
    match &plan.calls[0] {
        RuntimeCall::AddNodeAtIndex { parent_name, new_child_index, .. } => {
            assert_eq!((parent_name.as_str(), *new_child_index), ("A", 2));
        }
        other => panic!("unexpected call {:?}", other),
    }
    assert!(translate::plan_insert_new(&fresh, &target(&layout, "B", DropSlot::Swap)).is_err());
}

#[test]
fn dropping_onto_a_descendant_is_refused() {
    let s = snap(vec![node("A", -1, &["B"]), node("B", -1, &["C"]), node("C", -1, &[])]);
    let layout = lay(&s);
    let err = translate::plan_drop(&s, "A", &target(&layout, "C", DropSlot::Swap)).expect_err("cycle");
    assert!(matches!(err, EditError::InvalidDrop(_)));
}

// ---------------------------------------------------------------------------
// call sequencing

#[test]
fn sequence_aborts_on_first_rejection() {
    let s = snap(vec![node("A", -1, &["C", "B"]), node("C", -1, &[]), node("B", -1, &[])]);
    let layout = lay(&s);
    let plan = translate::plan_drop(&s, "C", &target(&layout, "B", DropSlot::ReplaceAsParent)).expect("plan");
    let mut client = MockClient::default();
    let t0 = Instant::now();

    let (mut seq, step) = CallSequence::start(plan, &mut client, t0, Duration::from_secs(5));
    assert_eq!(step, SequenceStep::Dispatched(1));
    assert_eq!(client.calls.len(), 1);

    // Someone else's response
    assert_eq!(seq.on_response(42, Ok(RpcResponse::ok()), &mut client, t0), None);

    assert_eq!(seq.on_response(1, Ok(RpcResponse::ok()), &mut client, t0), Some(SequenceStep::Dispatched(2)));
    let step = seq.on_response(2, Ok(RpcResponse::rejected("B is locked")), &mut client, t0);
    match step {
        Some(SequenceStep::Failed(e)) => assert_eq!(e.to_string(), "B is locked"),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(seq.is_done());
    assert_eq!(seq.remaining(), 0);
    assert_eq!(client.calls.len(), 2, "step (c) must never be sent");
}

#[test]
fn sequence_times_out_as_transport_failure() {
    let mut client = MockClient::default();
    let t0 = Instant::now();
    let plan = translate::plan_wire(&DataWiring {
        source: WiringEndpoint::new("A", PinKind::Outputs, "o"),
        target: WiringEndpoint::new("B", PinKind::Inputs, "i"),
    });
    let (mut seq, _) = CallSequence::start(plan, &mut client, t0, Duration::from_millis(100));
    assert_eq!(seq.check_timeout(t0 + Duration::from_millis(50)), None);
    match seq.check_timeout(t0 + Duration::from_millis(100)) {
        Some(SequenceStep::Failed(e)) => assert_eq!(e.to_string(), "failed to call wire_data"),
        other => panic!("expected timeout, got {:?}", other),
    }
    // The late answer finds nothing to resume
    assert_eq!(seq.on_response(1, Ok(RpcResponse::ok()), &mut client, t0), None);
}

#[test]
fn edit_error_messages() {
    assert_eq!(EditError::rejected("move_node", "").to_string(), "move_node was rejected by the runtime");
    assert_eq!(EditError::rejected("move_node", "no such parent").to_string(), "no such parent");
    assert_eq!(
        EditError::transport("replace_node", &TransportError::Disconnected).to_string(),
        "failed to call replace_node"
    );
}

// ---------------------------------------------------------------------------
// scene

#[test]
fn scene_removes_deleted_node_and_edge() {
    let t0 = Instant::now();
    let first = snap(vec![node("A", -1, &["B"]), node("B", -1, &[])]);
    let l1 = lay(&first);
    let mut scene = Scene::new(Duration::from_millis(250));
    let d = scene.sync(&SceneFrame::from_layout(&l1, &first), t0);
    assert_eq!(d.nodes.inserts.len(), 2);
    assert_eq!(d.edges.inserts.len(), 1);
    assert!(scene.has_edge("A->B"));

    let second = snap(vec![node("A", -1, &[])]);
    let l2 = layout_tree(&second, &sizes_for(&second), Some(&l1), &LayoutConfig::default()).expect("layout");
    let d = scene.sync(&SceneFrame::from_layout(&l2, &second), t0 + Duration::from_secs(1));
    assert_eq!(d.nodes.removes, vec!["B".to_string()]);
    assert_eq!(d.edges.removes, vec!["A->B".to_string()]);
    assert_eq!(scene.node_count(), 1);
    assert_eq!(scene.edge_count(), 0);
    assert!(!scene.has_node("B"));
}

#[test]
fn scene_diff_is_idempotent() {
    let t0 = Instant::now();
    let s = abc();
    let frame = SceneFrame::from_layout(&lay(&s), &s);
    let mut scene = Scene::default();
    assert!(!scene.sync(&frame, t0).is_empty());
    let again = diff(&scene, &frame);
    assert!(again.is_empty());
    assert_eq!(again.insert_count() + again.remove_count(), 0);
}

#[test]
fn entering_nodes_ignore_the_pointer_until_settled() {
    let t0 = Instant::now();
    let s = abc();
    let layout = lay(&s);
    let mut scene = Scene::new(Duration::from_millis(200));
    scene.sync(&SceneFrame::from_layout(&layout, &s), t0);

    let inside_b = layout.get("B").expect("B").rect().center();
    let early = scene.node("B", t0 + Duration::from_millis(50)).expect("B");
    assert!(!early.interactive);
    assert!(early.opacity < 1.0);
    assert!(scene.node_at(inside_b, t0 + Duration::from_millis(50)).is_none());

    let done = t0 + Duration::from_millis(200);
    assert_eq!(scene.node_at(inside_b, done).map(|n| n.key), Some("B".to_string()));
    assert!(!scene.is_animating(done));
}

#[test]
fn state_change_updates_border_only() {
    let t0 = Instant::now();
    let mut s = abc();
    let layout = lay(&s);
    let mut scene = Scene::new(Duration::ZERO);
    scene.sync(&SceneFrame::from_layout(&layout, &s), t0);

    s.node_mut("B").expect("B").state = NodeState::Failed;
    let d = scene.sync(&SceneFrame::from_layout(&layout, &s), t0);
    assert_eq!(d.nodes.updates.len(), 1);
    assert_eq!(d.nodes.updates[0].border, node_state_color(NodeState::Failed));
    assert_eq!(d.insert_count() + d.remove_count(), 0);
}

#[test]
fn data_wires_and_pins_are_keyed() {
    let mut a = node("A", -1, &["B"]);
    a.outputs.push(DataPin::new("out", "int"));
    let mut b = node("B", 0, &[]);
    b.inputs.push(DataPin::new("in", "int"));
    let mut s = snap(vec![a, b]);
    s.data_wirings.push(DataWiring {
        source: WiringEndpoint::new("A", PinKind::Outputs, "out"),
        target: WiringEndpoint::new("B", PinKind::Inputs, "in"),
    });
    let frame = SceneFrame::from_layout(&lay(&s), &s);
    assert!(frame.pins.contains_key("A/outputs/out"));
    assert!(frame.pins.contains_key("B/inputs/in"));
    assert!(frame.wires.contains_key("A/outputs/out+B/inputs/in"));

    let t0 = Instant::now();
    let mut scene = Scene::new(Duration::from_millis(250));
    scene.sync(&frame, t0);
    assert_eq!((scene.pin_count(), scene.wire_count()), (2, 1));
    assert!(scene.has_wire("A/outputs/out+B/inputs/in"));

    // Unwired on the runtime: the wire goes, the pins stay
    s.data_wirings.clear();
    scene.sync(&SceneFrame::from_layout(&lay(&s), &s), t0 + Duration::from_secs(1));
    assert_eq!((scene.pin_count(), scene.wire_count()), (2, 0));
    assert!(!scene.has_wire("A/outputs/out+B/inputs/in"));
}

// ---------------------------------------------------------------------------
// viewport

#[test]
fn zoom_keeps_anchor_fixed_and_clamps() {
    let mut vp = Viewport::new(0.5, 2.0);
    let anchor = pos2(200.0, 100.0);
    let world = vp.to_world(anchor);
    vp.zoom_at(anchor, 1.5);
    let back = vp.to_screen(world);
    assert!((back - anchor).length() < 1e-3);
    for _ in 0..10 {
        vp.zoom_at(anchor, 2.0);
    }
    assert_eq!(vp.zoom, 2.0);

    vp.fit(Rect::from_min_max(pos2(0.0, 0.0), pos2(100.0, 100.0)), Rect::from_min_max(pos2(0.0, 0.0), pos2(400.0, 300.0)));
    assert_eq!(vp.to_screen(pos2(50.0, 50.0)), pos2(200.0, 150.0));
    vp.reset();
    assert_eq!((vp.pan, vp.zoom), (Vec2::ZERO, 1.0));
}

// ---------------------------------------------------------------------------
// selection

#[test]
fn selection_listeners_run_synchronously() {
    let seen: Rc<RefCell<Vec<Selection>>> = Rc::default();
    let sink = seen.clone();
    let mut bridge = SelectionBridge::new();
    bridge.subscribe(move |s| sink.borrow_mut().push(s.clone()));

    assert_eq!(bridge.request(Selection::Node("A".into())), SelectionRequest::Applied);
    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(bridge.request(Selection::Node("A".into())), SelectionRequest::Unchanged);
    assert_eq!(seen.borrow().len(), 1);

    let wiring = DataWiring {
        source: WiringEndpoint::new("A", PinKind::Outputs, "o"),
        target: WiringEndpoint::new("B", PinKind::Inputs, "i"),
    };
    bridge.request(Selection::Wiring(wiring.clone()));
    assert_eq!(bridge.current().wiring(), Some(&wiring));
    assert!(!bridge.current().contains_node("A"));
    assert_eq!(seen.borrow().len(), 2);
}

#[test]
fn unsaved_edits_gate_selection_changes() {
    let mut bridge = SelectionBridge::new();
    bridge.request(Selection::Node("A".into()));
    bridge.set_unsaved_edits(true);

    assert_eq!(bridge.request(Selection::Node("B".into())), SelectionRequest::NeedsConfirmation);
    assert_eq!(bridge.current(), &Selection::Node("A".into()));
    bridge.cancel_discard();
    assert!(bridge.pending().is_none());

    bridge.request(Selection::None);
    assert!(bridge.confirm_discard());
    assert!(bridge.current().is_none());
    assert!(!bridge.has_unsaved_edits());
}

#[test]
fn selection_pruned_against_new_snapshot() {
    let mut bridge = SelectionBridge::new();
    bridge.request(Selection::from_names(["A".to_string(), "B".to_string()]));
    bridge.prune(&snap(vec![node("A", -1, &[])]));
    assert_eq!(bridge.current(), &Selection::Node("A".into()));
}

// ---------------------------------------------------------------------------
// editor + interaction

#[test]
fn short_press_is_a_click_not_a_drag() {
    let t0 = Instant::now();
    let (mut editor, _) = editor_with(abc(), t0);
    let mut client = MockClient::default();

    press(&mut editor, &mut client, pos2(70.0, 100.0), Modifiers::NONE, t0);
    drag_to(&mut editor, &mut client, pos2(72.0, 101.0), t0);
    release(&mut editor, &mut client, pos2(72.0, 101.0), Modifiers::NONE, t0);

    assert_eq!(editor.selection().current(), &Selection::Node("C".into()));
    assert!(client.calls.is_empty());

    // Modifier click toggles membership
    press(&mut editor, &mut client, pos2(-70.0, 100.0), Modifiers::CTRL, t0);
    release(&mut editor, &mut client, pos2(-70.0, 100.0), Modifiers::CTRL, t0);
    assert_eq!(editor.selection().current(), &Selection::from_names(["B".to_string(), "C".to_string()]));

    // Plain click on empty canvas clears
    press(&mut editor, &mut client, pos2(400.0, 400.0), Modifiers::NONE, t0);
    release(&mut editor, &mut client, pos2(400.0, 400.0), Modifiers::NONE, t0);
    assert!(editor.selection().current().is_none());
}

#[test]
fn dragging_a_node_onto_an_insert_slot_moves_it() {
    let t0 = Instant::now();
    let (mut editor, errors) = editor_with(abc(), t0);
    let mut client = MockClient::default();

    press(&mut editor, &mut client, pos2(70.0, 100.0), Modifiers::NONE, t0);
    drag_to(&mut editor, &mut client, pos2(0.0, 100.0), t0);
    assert!(matches!(editor.interaction().state(), Interaction::DraggingNode { committed: true, .. }));
    // Left strip of B
    drag_to(&mut editor, &mut client, pos2(-130.0, 100.0), t0);
    release(&mut editor, &mut client, pos2(-130.0, 100.0), Modifiers::NONE, t0);

    assert_eq!(client.calls, vec![RuntimeCall::move_node("C", "A", 0)]);
    assert_eq!(editor.running_edits(), 1);
    assert!(matches!(editor.interaction().state(), Interaction::Idle));

    editor.handle_response(1, Ok(RpcResponse::ok()), &mut client, t0);
    assert_eq!(editor.running_edits(), 0);
    assert!(errors.borrow().is_empty());
}

#[test]
fn press_and_release_in_one_frame_is_a_click() {
    let t0 = Instant::now();
    let (mut editor, _) = editor_with(abc(), t0);
    let mut client = MockClient::default();

    let frame = PointerFrame {
        pressed: true,
        released: true,
        latest: Some(pos2(70.0, 100.0)),
        hovered: true,
        ..PointerFrame::default()
    };
    let events = frame.events(false);
    assert_eq!(
        events,
        vec![
            PointerEvent::Down { pos: pos2(70.0, 100.0), modifiers: Modifiers::NONE },
            PointerEvent::Up { pos: pos2(70.0, 100.0), modifiers: Modifiers::NONE },
        ]
    );
    for event in events {
        editor.handle_pointer(event, screen(), &mut client, t0);
    }
    assert_eq!(editor.selection().current(), &Selection::Node("C".into()));
    assert_eq!(editor.interaction().state(), &Interaction::Idle);

    // Next frame: button up, nothing running, nothing to send
    let idle = PointerFrame { latest: Some(pos2(70.0, 100.0)), hovered: true, ..PointerFrame::default() };
    assert!(idle.events(false).is_empty());
    // A gesture whose release happened off-window is cancelled
    assert_eq!(PointerFrame::default().events(true), vec![PointerEvent::Cancel]);
}

#[test]
fn release_over_nothing_cancels_the_drag() {
    let t0 = Instant::now();
    let (mut editor, _) = editor_with(abc(), t0);
    let mut client = MockClient::default();

    press(&mut editor, &mut client, pos2(70.0, 100.0), Modifiers::NONE, t0);
    drag_to(&mut editor, &mut client, pos2(500.0, 500.0), t0);
    release(&mut editor, &mut client, pos2(500.0, 500.0), Modifiers::NONE, t0);
    assert!(client.calls.is_empty());
    assert!(matches!(editor.interaction().state(), Interaction::Idle));
}

#[test]
fn replace_drop_reports_rejection_and_stops() {
    let t0 = Instant::now();
    // C at A[0], B at A[1]: C spans x -120..-20, B spans x 20..120
    let s = snap(vec![node("A", -1, &["C", "B"]), node("C", -1, &[]), node("B", -1, &[])]);
    let (mut editor, errors) = editor_with(s, t0);
    let mut client = MockClient::default();

    press(&mut editor, &mut client, pos2(-70.0, 100.0), Modifiers::NONE, t0);
    drag_to(&mut editor, &mut client, pos2(0.0, 70.0), t0);
    // Strip just above B
    drag_to(&mut editor, &mut client, pos2(70.0, 70.0), t0);
    release(&mut editor, &mut client, pos2(70.0, 70.0), Modifiers::NONE, t0);

    assert_eq!(client.calls, vec![RuntimeCall::detach("C")]);
    editor.handle_response(1, Ok(RpcResponse::ok()), &mut client, t0);
    assert_eq!(client.calls.last(), Some(&RuntimeCall::move_node("B", "C", 0)));
    editor.handle_response(2, Ok(RpcResponse::rejected("B is locked")), &mut client, t0);

    assert_eq!(client.calls.len(), 2);
    assert_eq!(editor.running_edits(), 0);
    let errors = errors.borrow();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].to_string(), "B is locked");
}

#[test]
fn wire_drag_between_compatible_pins() {
    let t0 = Instant::now();
    let mut b = node("B", 0, &[]);
    b.outputs.push(DataPin::new("out", "int"));
    let mut c = node("C", 0, &[]);
    c.inputs.push(DataPin::new("in", "int"));
    let (mut editor, _) = editor_with(snap(vec![node("A", -1, &["B", "C"]), b, c]), t0);
    let mut client = MockClient::default();

    // B's output gripper sits on its right edge, C's input on its left edge
    press(&mut editor, &mut client, pos2(-20.0, 100.0), Modifiers::NONE, t0);
    let lit = editor.interaction().highlighted_pins().cloned().expect("wire drag");
    assert!(lit.contains("C/inputs/in"));
    drag_to(&mut editor, &mut client, pos2(20.0, 100.0), t0);
    release(&mut editor, &mut client, pos2(20.0, 100.0), Modifiers::NONE, t0);

    let expected = DataWiring {
        source: WiringEndpoint::new("B", PinKind::Outputs, "out"),
        target: WiringEndpoint::new("C", PinKind::Inputs, "in"),
    };
    assert_eq!(client.calls, vec![RuntimeCall::WireData { wirings: vec![expected] }]);
}

#[test]
fn box_selection_picks_fully_contained_nodes() {
    let t0 = Instant::now();
    let (mut editor, _) = editor_with(abc(), t0);
    let mut client = MockClient::default();

    press(&mut editor, &mut client, pos2(-200.0, 60.0), Modifiers::SHIFT, t0);
    assert!(matches!(editor.interaction().state(), Interaction::BoxSelecting { .. }));
    drag_to(&mut editor, &mut client, pos2(200.0, 130.0), t0);
    release(&mut editor, &mut client, pos2(200.0, 130.0), Modifiers::SHIFT, t0);

    assert_eq!(editor.selection().current(), &Selection::from_names(["B".to_string(), "C".to_string()]));
}

#[test]
fn background_drag_pans_and_wheel_zooms() {
    let t0 = Instant::now();
    let (mut editor, _) = editor_with(abc(), t0);
    let mut client = MockClient::default();

    press(&mut editor, &mut client, pos2(400.0, 400.0), Modifiers::NONE, t0);
    drag_to(&mut editor, &mut client, pos2(450.0, 420.0), t0);
    release(&mut editor, &mut client, pos2(450.0, 420.0), Modifiers::NONE, t0);
    assert_eq!(editor.viewport().pan, vec2(50.0, 20.0));

    editor.handle_pointer(PointerEvent::Wheel { pos: pos2(0.0, 0.0), delta: 100.0 }, screen(), &mut client, t0);
    assert!(editor.viewport().zoom > 1.0);
}

#[test]
fn autopan_stops_when_button_released_outside() {
    let t0 = Instant::now();
    let (mut editor, _) = editor_with(abc(), t0);
    let mut client = MockClient::default();
    let canvas = Rect::from_min_max(pos2(-200.0, -50.0), pos2(200.0, 300.0));

    editor.handle_pointer(PointerEvent::Down { pos: pos2(70.0, 100.0), modifiers: Modifiers::NONE }, canvas, &mut client, t0);
    editor.handle_pointer(PointerEvent::Move { pos: pos2(190.0, 100.0), primary_down: true }, canvas, &mut client, t0);
    assert!(editor.interaction().autopan_active());

    let before = editor.viewport().pan;
    editor.tick(canvas, &mut client, t0);
    assert!(editor.viewport().pan.x < before.x, "content scrolls toward the right edge");

    editor.handle_pointer(PointerEvent::Move { pos: pos2(190.0, 100.0), primary_down: false }, canvas, &mut client, t0);
    assert!(!editor.interaction().autopan_active());
    assert!(matches!(editor.interaction().state(), Interaction::Idle));

    let settled = editor.viewport().pan;
    editor.tick(canvas, &mut client, t0 + Duration::from_secs(1));
    assert_eq!(editor.viewport().pan, settled);
    assert!(client.calls.is_empty());
}

#[test]
fn subtree_views_require_publication() {
    let t0 = Instant::now();
    let mut s = abc();
    s.node_mut("B").expect("B").node_class = "Subtree".into();
    let (mut editor, errors) = editor_with(s, t0);
    let mut client = MockClient::default();

    editor.handle_pointer(PointerEvent::DoubleClick { pos: pos2(-70.0, 100.0) }, screen(), &mut client, t0);
    assert_eq!(editor.active_view(), &ActiveView::Main);
    assert_eq!(errors.borrow().as_slice(), &[EditError::SubtreeNotPublished("B".into())]);

    editor.push_subtree_states(vec![TreeSnapshot::new("B", vec![node("inner", 0, &[])])], t0);
    editor.handle_pointer(PointerEvent::DoubleClick { pos: pos2(-70.0, 100.0) }, screen(), &mut client, t0);
    assert_eq!(editor.active_view(), &ActiveView::Subtree("B".into()));

    editor.update(t0, &mut FixedMeasurer(NODE));
    assert!(editor.scene().has_node("inner"));
    assert!(!editor.scene().has_node("A"));

    // Unpublishing the shown subtree falls back to the main tree
    editor.push_subtree_states(Vec::new(), t0);
    assert_eq!(editor.active_view(), &ActiveView::Main);
}

#[test]
fn leaving_the_tree_waits_for_discard_confirmation() {
    let t0 = Instant::now();
    let mut s = abc();
    s.node_mut("B").expect("B").node_class = "Subtree".into();
    let (mut editor, errors) = editor_with(s, t0);
    let mut client = MockClient::default();
    editor.push_subtree_states(vec![TreeSnapshot::new("B", vec![node("inner", 0, &[])])], t0);

    press(&mut editor, &mut client, pos2(70.0, 100.0), Modifiers::NONE, t0);
    release(&mut editor, &mut client, pos2(70.0, 100.0), Modifiers::NONE, t0);
    assert_eq!(editor.selection().current(), &Selection::Node("C".into()));
    editor.selection_mut().set_unsaved_edits(true);

    // Held: still on the main tree with C selected
    editor.set_active_view(ActiveView::Subtree("B".into()), t0).expect("published");
    assert_eq!(editor.active_view(), &ActiveView::Main);
    assert_eq!(editor.pending_view(), Some(&ActiveView::Subtree("B".into())));
    assert_eq!(editor.selection().current(), &Selection::Node("C".into()));

    editor.cancel_discard();
    assert_eq!(editor.active_view(), &ActiveView::Main);
    assert!(editor.pending_view().is_none());
    assert!(editor.selection().pending().is_none());
    assert!(editor.selection().has_unsaved_edits());
    editor.update(t0, &mut FixedMeasurer(NODE));
    assert!(editor.scene().has_node("C"));

    // Double-click on the subtree node goes through the same gate
    editor.handle_pointer(PointerEvent::DoubleClick { pos: pos2(-70.0, 100.0) }, screen(), &mut client, t0);
    assert_eq!(editor.active_view(), &ActiveView::Main);
    assert_eq!(editor.pending_view(), Some(&ActiveView::Subtree("B".into())));

    assert!(editor.confirm_discard(t0));
    assert_eq!(editor.active_view(), &ActiveView::Subtree("B".into()));
    assert!(editor.pending_view().is_none());
    assert!(editor.selection().current().is_none());
    assert!(!editor.selection().has_unsaved_edits());
    assert!(errors.borrow().is_empty());
    // Nothing was held any more
    assert!(!editor.confirm_discard(t0));
}

#[test]
fn node_states_recolor_without_relayout() {
    let t0 = Instant::now();
    let (mut editor, _) = editor_with(abc(), t0);
    let mut client = MockClient::default();
    let event = BridgeEvent::NodeStates { tree_name: "tree".into(), states: vec![("B".into(), NodeState::Running)] };
    editor.handle_event(event, &mut client, t0);

    let b = editor.scene().node("B", t0).expect("B");
    assert_eq!(b.value.state, NodeState::Running);
    assert_eq!(b.value.border, node_state_color(NodeState::Running));
    assert!(!editor.needs_repaint(t0));
}

#[test]
fn snapshots_are_throttled_through_the_editor() {
    let t0 = Instant::now();
    let settings = EditorSettings { animation_ms: 0, relayout_delay_ms: 0, ..EditorSettings::default() };
    let mut editor = TreeEditor::new(settings);

    editor.push_snapshot(snap(vec![node("A", -1, &[])]), t0);
    editor.push_snapshot(snap(vec![node("B", -1, &[])]), t0 + Duration::from_millis(10));
    editor.push_snapshot(snap(vec![node("C", -1, &[])]), t0 + Duration::from_millis(20));
    editor.update(t0 + Duration::from_millis(20), &mut FixedMeasurer(NODE));
    assert!(editor.scene().has_node("A"));
    assert_eq!(editor.next_wakeup(), Some(t0 + Duration::from_millis(200)));

    editor.update(t0 + Duration::from_millis(200), &mut FixedMeasurer(NODE));
    editor.update(t0 + Duration::from_millis(200), &mut FixedMeasurer(NODE));
    assert!(editor.scene().has_node("C"));
    assert!(!editor.scene().has_node("B"), "bursts coalesce into the newest snapshot");
}

#[test]
fn delete_unwires_the_selected_wiring() {
    let t0 = Instant::now();
    let (mut editor, _) = editor_with(abc(), t0);
    let mut client = MockClient::default();
    assert!(!editor.remove_selected_wiring(&mut client, t0));

    let wiring = DataWiring {
        source: WiringEndpoint::new("B", PinKind::Outputs, "o"),
        target: WiringEndpoint::new("C", PinKind::Inputs, "i"),
    };
    editor.selection_mut().request(Selection::Wiring(wiring.clone()));
    assert!(editor.remove_selected_wiring(&mut client, t0));
    assert_eq!(client.calls, vec![RuntimeCall::UnwireData { wirings: vec![wiring] }]);
}

#[test]
fn disconnect_fails_running_edits() {
    let t0 = Instant::now();
    let (mut editor, errors) = editor_with(abc(), t0);
    let mut client = MockClient::default();
    let target = target(editor.layout(), "A", DropSlot::AppendChild);
    editor.drop_new_node(NodeRecord::new("N", "Succeeder", 0), &target, &mut client, t0).expect("insert");
    assert_eq!(editor.running_edits(), 1);

    editor.handle_event(BridgeEvent::Disconnected("socket closed".into()), &mut client, t0);
    assert_eq!(editor.running_edits(), 0);
    assert_eq!(errors.borrow()[0].to_string(), "failed to call add_node_at_index");
    assert!(!editor.is_connected());
}

// ---------------------------------------------------------------------------
// api

#[test]
fn runtime_call_names_and_args() {
    let call = RuntimeCall::move_node("X", "P", 3);
    assert_eq!(call.service("/tree_node/"), "/tree_node/move_node");
    assert_eq!(call.args(), json!({"node_name": "X", "new_parent_name": "P", "new_child_index": 3}));
    assert_eq!(RuntimeCall::detach("X").args()["new_parent_name"], "");

    let add = RuntimeCall::AddNodeAtIndex { parent_name: "P".into(), node: NodeRecord::new("N", "Sequence", -1), new_child_index: 1 };
    assert_eq!(add.operation(), "add_node_at_index");
    assert_eq!(add.args()["allow_rename"], true);
    assert_eq!(add.args()["node"]["node_class"], "Sequence");
}

#[test]
fn protocol_frames() {
    let frame: serde_json::Value =
        serde_json::from_str(&protocol::call_service(7, "/tree_node/move_node", json!({"a": 1}))).expect("json");
    assert_eq!(frame["op"], "call_service");
    assert_eq!(frame["id"], "call:7");
    assert_eq!(frame["args"]["a"], 1);

    let topics = Topics::new("/tree_node/");
    assert_eq!(topics.tree, "/tree_node/tree");
    assert_eq!(topics.node_states, "/tree_node/debug/node_states");

    let ok = r#"{"op":"service_response","id":"call:3","values":{"success":false,"error_message":"nope"},"result":true}"#;
    assert_eq!(
        protocol::decode(ok, &topics).expect("decodes"),
        Some(BridgeEvent::Response { id: 3, result: Ok(RpcResponse::rejected("nope")) })
    );

    let unreachable = r#"{"op":"service_response","id":"call:4","values":"service does not exist","result":false}"#;
    assert_eq!(
        protocol::decode(unreachable, &topics).expect("decodes"),
        Some(BridgeEvent::Response { id: 4, result: Err(TransportError::Bridge("service does not exist".into())) })
    );

    let foreign = r#"{"op":"service_response","id":"other:1","values":{},"result":true}"#;
    assert!(matches!(protocol::decode(foreign, &topics), Err(ProtocolError::ForeignId(_))));

    let states = r#"{"op":"publish","topic":"/tree_node/debug/node_states","msg":{"tree_name":"t","states":[{"node_name":"A","state":"RUNNING"}]}}"#;
    assert_eq!(
        protocol::decode(states, &topics).expect("decodes"),
        Some(BridgeEvent::NodeStates { tree_name: "t".into(), states: vec![("A".into(), NodeState::Running)] })
    );

    let other_topic = r#"{"op":"publish","topic":"/elsewhere","msg":{}}"#;
    assert_eq!(protocol::decode(other_topic, &topics).expect("decodes"), None);
    assert!(protocol::decode("not json", &topics).is_err());
}

#[test]
fn throttle_defers_and_coalesces() {
    let t0 = Instant::now();
    let ms = Duration::from_millis;
    let mut throttle = SnapshotThrottle::new(ms(200));

    assert!(throttle.offer(snap(vec![node("A", -1, &[])]), t0).is_some());
    assert!(throttle.offer(snap(vec![node("B", -1, &[])]), t0 + ms(50)).is_none());
    assert!(throttle.offer(snap(vec![node("C", -1, &[])]), t0 + ms(100)).is_none());
    assert!(throttle.has_pending());
    assert_eq!(throttle.next_release(), Some(t0 + ms(200)));
    assert!(throttle.poll(t0 + ms(150)).is_none());

    let released = throttle.poll(t0 + ms(200)).expect("due");
    assert!(released.contains("C"));
    assert!(!throttle.has_pending());
    assert!(throttle.poll(t0 + ms(1000)).is_none());
}

// ---------------------------------------------------------------------------
// settings

#[test]
fn settings_fill_defaults_and_sanitize() {
    let s = AppSettings::from_json(r#"{"namespace": "/bt/"}"#).expect("parses");
    assert_eq!(s.namespace, "/bt/");
    assert_eq!(s.bridge_url, "ws://127.0.0.1:9090");
    assert_eq!(s.editor, EditorSettings::default());

    let s = AppSettings::from_json(r#"{"editor": {"min_zoom": 2.0, "max_zoom": 1.0, "drag_threshold": 9}}"#).expect("parses");
    assert_eq!((s.editor.min_zoom, s.editor.max_zoom), (0.2, 3.0));
    assert_eq!(s.editor.drag_threshold, 9.0);
    assert_eq!(s.editor.rpc_timeout(), Duration::from_secs(5));

    assert!(AppSettings::from_json("{").is_err());
}

#[test]
fn settings_save_and_load_from_a_directory() {
    let dir = std::env::temp_dir().join(format!("tree-loom-settings-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);

    // Nothing saved yet
    assert_eq!(AppSettings::load_from(&dir).expect("defaults"), AppSettings::from_json("{}").expect("defaults"));

    let mut s = AppSettings::from_json(r#"{"bridge_url": "ws://robot:9090", "namespace": "/bt/"}"#).expect("parses");
    s.editor.drag_threshold = 7.0;
    s.save_to(&dir).expect("saves");
    assert!(dir.join("settings.json").exists());
    assert_eq!(AppSettings::load_from(&dir).expect("loads"), s);

    std::fs::remove_dir_all(&dir).expect("cleanup");
}
