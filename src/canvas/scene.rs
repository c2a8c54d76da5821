//! Virtual scene graph for the tree canvas.
//!
//! A [`SceneFrame`] is the target visual state computed from a layout. [`diff`]
//! compares it with the live [`Scene`] by key and [`Scene::apply`] turns the
//! result into transitions. Painting is left to the GUI adapter, which only
//! samples the scene.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use egui::{Color32, Pos2, Rect, pos2};

use crate::tree_utils::layout::TreeLayout;
use crate::tree_utils::model::{DataWiring, NodeState, PinKind, TreeSnapshot, WiringEndpoint};

pub const GRIPPER_RADIUS: f32 = 6.0;

/// Border color for a node in the given execution state.
pub fn node_state_color(state: NodeState) -> Color32 {
    match state {
        NodeState::Uninitialized => Color32::from_rgb(150, 150, 150),
        NodeState::Idle => Color32::from_rgb(200, 200, 200),
        NodeState::Running => Color32::from_rgb(255, 193, 7),
        NodeState::Succeeded => Color32::from_rgb(76, 175, 80),
        NodeState::Failed => Color32::from_rgb(244, 67, 54),
        NodeState::DebugPreTick | NodeState::DebugTick | NodeState::DebugPostTick => Color32::from_rgb(33, 150, 243),
        NodeState::Shutdown => Color32::from_rgb(66, 66, 66),
        NodeState::Unknown => Color32::from_rgb(156, 39, 176),
    }
}

pub trait Keyed {
    fn key(&self) -> &str;
}

pub trait Lerp: Sized {
    fn lerp(&self, to: &Self, t: f32) -> Self;
}

#[derive(Clone, Debug, PartialEq)]
pub struct VisualNode {
    pub key: String,
    pub rect: Rect,
    pub border: Color32,
    pub state: NodeState,
    pub class: String,
    pub subtree: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VisualEdge {
    pub key: String,
    pub from: Pos2,
    pub to: Pos2,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VisualPin {
    pub key: String,
    pub endpoint: WiringEndpoint,
    pub type_tag: String,
    pub pos: Pos2,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VisualWire {
    pub key: String,
    pub wiring: DataWiring,
    pub from: Pos2,
    pub to: Pos2,
}

macro_rules! keyed {
    ($($ty:ty),*) => {
        $(impl Keyed for $ty {
            fn key(&self) -> &str { &self.key }
        })*
    };
}
keyed!(VisualNode, VisualEdge, VisualPin, VisualWire);

fn lerp_f32(a: f32, b: f32, t: f32) -> f32 { a + (b - a) * t }

fn lerp_color(a: Color32, b: Color32, t: f32) -> Color32 {
    let ch = |x: u8, y: u8| lerp_f32(x as f32, y as f32, t).round().clamp(0.0, 255.0) as u8;
    Color32::from_rgba_unmultiplied(ch(a.r(), b.r()), ch(a.g(), b.g()), ch(a.b(), b.b()), ch(a.a(), b.a()))
}

fn lerp_rect(a: Rect, b: Rect, t: f32) -> Rect {
    Rect::from_min_max(a.min.lerp(b.min, t), a.max.lerp(b.max, t))
}

impl Lerp for VisualNode {
    fn lerp(&self, to: &Self, t: f32) -> Self {
        Self { rect: lerp_rect(self.rect, to.rect, t), border: lerp_color(self.border, to.border, t), ..to.clone() }
    }
}

impl Lerp for VisualEdge {
    fn lerp(&self, to: &Self, t: f32) -> Self {
        Self { from: self.from.lerp(to.from, t), to: self.to.lerp(to.to, t), ..to.clone() }
    }
}

impl Lerp for VisualPin {
    fn lerp(&self, to: &Self, t: f32) -> Self {
        Self { pos: self.pos.lerp(to.pos, t), ..to.clone() }
    }
}

impl Lerp for VisualWire {
    fn lerp(&self, to: &Self, t: f32) -> Self {
        Self { from: self.from.lerp(to.from, t), to: self.to.lerp(to.to, t), ..to.clone() }
    }
}

/// Target visual state for one layout.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneFrame {
    pub nodes: BTreeMap<String, VisualNode>,
    pub edges: BTreeMap<String, VisualEdge>,
    pub pins: BTreeMap<String, VisualPin>,
    pub wires: BTreeMap<String, VisualWire>,
    // Start position for nodes that are new in this layout
    pub enter_from: HashMap<String, Pos2>,
}

fn pin_anchor(rect: Rect, kind: PinKind, slot: usize, count: usize) -> Pos2 {
    let y = rect.top() + rect.height() * (slot as f32 + 1.0) / (count as f32 + 1.0);
    match kind {
        PinKind::Outputs => pos2(rect.right(), y),
        _ => pos2(rect.left(), y),
    }
}

impl SceneFrame {
    pub fn from_layout(layout: &TreeLayout, snapshot: &TreeSnapshot) -> Self {
        let mut frame = SceneFrame::default();
        for node in layout.visible() {
            let Some(record) = snapshot.node(&node.name) else { continue };
            let rect = node.rect();
            frame.nodes.insert(node.name.clone(), VisualNode {
                key: node.name.clone(),
                rect,
                border: node_state_color(record.state),
                state: record.state,
                class: record.node_class.clone(),
                subtree: record.is_subtree(),
            });
            if node.entering {
                if let Some(origin) = node.enter_from {
                    frame.enter_from.insert(node.name.clone(), origin);
                }
            }
            for kind in [PinKind::Inputs, PinKind::Outputs] {
                let pins = record.pins(kind);
                for (slot, pin) in pins.iter().enumerate() {
                    let endpoint = WiringEndpoint::new(&record.name, kind, &pin.key);
                    let key = endpoint.key();
                    frame.pins.insert(key.clone(), VisualPin {
                        key,
                        endpoint,
                        type_tag: pin.serialized_type.clone(),
                        pos: pin_anchor(rect, kind, slot, pins.len()),
                    });
                }
            }
        }

        for edge in layout.edges() {
            let key = edge.key();
            frame.edges.insert(key.clone(), VisualEdge { key, from: edge.from, to: edge.to });
        }

        for wiring in &snapshot.data_wirings {
            let from = frame.anchor(&wiring.source);
            let to = frame.anchor(&wiring.target);
            let (Some(from), Some(to)) = (from, to) else { continue };
            let key = wiring.key();
            frame.wires.insert(key.clone(), VisualWire { key, wiring: wiring.clone(), from, to });
        }
        frame
    }

    // Pin position, or the node body's side when the pin is not drawn
    fn anchor(&self, endpoint: &WiringEndpoint) -> Option<Pos2> {
        if let Some(pin) = self.pins.get(&endpoint.key()) {
            return Some(pin.pos);
        }
        let node = self.nodes.get(&endpoint.node_name)?;
        Some(match endpoint.data_kind {
            PinKind::Outputs => node.rect.right_center(),
            _ => node.rect.left_center(),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyedDiff<T> {
    pub inserts: Vec<T>,
    pub updates: Vec<T>,
    pub removes: Vec<String>,
}

impl<T> Default for KeyedDiff<T> {
    fn default() -> Self { Self { inserts: Vec::new(), updates: Vec::new(), removes: Vec::new() } }
}

impl<T> KeyedDiff<T> {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.removes.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneDiff {
    pub nodes: KeyedDiff<VisualNode>,
    pub edges: KeyedDiff<VisualEdge>,
    pub pins: KeyedDiff<VisualPin>,
    pub wires: KeyedDiff<VisualWire>,
    pub enter_from: HashMap<String, Pos2>,
}

impl SceneDiff {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty() && self.pins.is_empty() && self.wires.is_empty()
    }

    pub fn insert_count(&self) -> usize {
        self.nodes.inserts.len() + self.edges.inserts.len() + self.pins.inserts.len() + self.wires.inserts.len()
    }

    pub fn remove_count(&self) -> usize {
        self.nodes.removes.len() + self.edges.removes.len() + self.pins.removes.len() + self.wires.removes.len()
    }
}

fn diff_keyed<T: Keyed + Clone + PartialEq>(
    prev: &BTreeMap<String, Animated<T>>,
    next: &BTreeMap<String, T>,
) -> KeyedDiff<T> {
    let mut out = KeyedDiff::default();
    for (key, item) in next {
        match prev.get(key) {
            None => out.inserts.push(item.clone()),
            Some(live) if live.to != *item => out.updates.push(item.clone()),
            Some(_) => {}
        }
    }
    out.removes = prev.keys().filter(|k| !next.contains_key(*k)).cloned().collect();
    out
}

/// Keyed inserts, updates and removes that turn `prev` into `next`.
pub fn diff(prev: &Scene, next: &SceneFrame) -> SceneDiff {
    SceneDiff {
        nodes: diff_keyed(&prev.nodes, &next.nodes),
        edges: diff_keyed(&prev.edges, &next.edges),
        pins: diff_keyed(&prev.pins, &next.pins),
        wires: diff_keyed(&prev.wires, &next.wires),
        enter_from: next.enter_from.clone(),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Animated<T> {
    pub from: T,
    pub to: T,
    started: Instant,
    // Inserted elements fade in and ignore the pointer until they arrive
    entering: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sampled<T> {
    pub value: T,
    pub opacity: f32,
    pub interactive: bool,
}

fn ease_cubic_in_out(t: f32) -> f32 {
    if t < 0.5 { 4.0 * t * t * t } else { 1.0 - (-2.0 * t + 2.0).powi(3) * 0.5 }
}

impl<T: Lerp + Clone> Animated<T> {
    fn progress(&self, now: Instant, duration: Duration) -> f32 {
        if duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started).as_secs_f32();
        (elapsed / duration.as_secs_f32()).clamp(0.0, 1.0)
    }

    fn sample(&self, now: Instant, duration: Duration) -> Sampled<T> {
        let t = self.progress(now, duration);
        let value = if t >= 1.0 { self.to.clone() } else { self.from.lerp(&self.to, ease_cubic_in_out(t)) };
        Sampled {
            value,
            opacity: if self.entering { t } else { 1.0 },
            interactive: !self.entering || t >= 1.0,
        }
    }

    fn finished(&self, now: Instant, duration: Duration) -> bool { self.progress(now, duration) >= 1.0 }
}

fn apply_keyed<T: Keyed + Lerp + Clone>(
    live: &mut BTreeMap<String, Animated<T>>,
    diff: KeyedDiff<T>,
    now: Instant,
    duration: Duration,
    enter: impl Fn(&T) -> T,
) {
    for key in diff.removes {
        live.remove(&key);
    }
    for item in diff.updates {
        if let Some(anim) = live.get_mut(item.key()) {
            // Retarget from wherever the element is right now
            let current = anim.sample(now, duration).value;
            anim.entering = anim.entering && !anim.finished(now, duration);
            anim.from = current;
            anim.to = item;
            anim.started = now;
        }
    }
    for item in diff.inserts {
        live.insert(item.key().to_string(), Animated { from: enter(&item), to: item, started: now, entering: true });
    }
}

/// Live visual state of the canvas.
#[derive(Clone, Debug)]
pub struct Scene {
    nodes: BTreeMap<String, Animated<VisualNode>>,
    edges: BTreeMap<String, Animated<VisualEdge>>,
    pins: BTreeMap<String, Animated<VisualPin>>,
    wires: BTreeMap<String, Animated<VisualWire>>,
    duration: Duration,
}

impl Default for Scene {
    fn default() -> Self { Self::new(Duration::from_millis(250)) }
}

impl Scene {
    pub fn new(duration: Duration) -> Self {
        Self {
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            pins: BTreeMap::new(),
            wires: BTreeMap::new(),
            duration,
        }
    }

    pub fn duration(&self) -> Duration { self.duration }

    pub fn apply(&mut self, diff: SceneDiff, now: Instant) {
        let duration = self.duration;
        let origins = diff.enter_from;
        apply_keyed(&mut self.nodes, diff.nodes, now, duration, |n| {
            // Grow out of the parent's position
            let origin = origins.get(&n.key).copied().unwrap_or_else(|| n.rect.center_top());
            VisualNode { rect: Rect::from_min_max(origin, origin), ..n.clone() }
        });
        apply_keyed(&mut self.edges, diff.edges, now, duration, |e| VisualEdge { to: e.from, ..e.clone() });
        apply_keyed(&mut self.pins, diff.pins, now, duration, Clone::clone);
        apply_keyed(&mut self.wires, diff.wires, now, duration, Clone::clone);
    }

    /// Diff against `frame` and apply the result in one step.
    pub fn sync(&mut self, frame: &SceneFrame, now: Instant) -> SceneDiff {
        let d = diff(self, frame);
        self.apply(d.clone(), now);
        d
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.pins.clear();
        self.wires.clear();
    }

    pub fn is_animating(&self, now: Instant) -> bool {
        let d = self.duration;
        self.nodes.values().any(|a| !a.finished(now, d))
            || self.edges.values().any(|a| !a.finished(now, d))
            || self.pins.values().any(|a| !a.finished(now, d))
            || self.wires.values().any(|a| !a.finished(now, d))
    }

    pub fn node_count(&self) -> usize { self.nodes.len() }
    pub fn edge_count(&self) -> usize { self.edges.len() }
    pub fn pin_count(&self) -> usize { self.pins.len() }
    pub fn wire_count(&self) -> usize { self.wires.len() }
    pub fn has_node(&self, key: &str) -> bool { self.nodes.contains_key(key) }
    pub fn has_edge(&self, key: &str) -> bool { self.edges.contains_key(key) }
    pub fn has_wire(&self, key: &str) -> bool { self.wires.contains_key(key) }

    pub fn node(&self, key: &str, now: Instant) -> Option<Sampled<VisualNode>> {
        self.nodes.get(key).map(|a| a.sample(now, self.duration))
    }

    pub fn pin(&self, key: &str, now: Instant) -> Option<Sampled<VisualPin>> {
        self.pins.get(key).map(|a| a.sample(now, self.duration))
    }

    pub fn nodes(&self, now: Instant) -> impl Iterator<Item = Sampled<VisualNode>> + '_ {
        self.nodes.values().map(move |a| a.sample(now, self.duration))
    }

    pub fn edges(&self, now: Instant) -> impl Iterator<Item = Sampled<VisualEdge>> + '_ {
        self.edges.values().map(move |a| a.sample(now, self.duration))
    }

    pub fn pins(&self, now: Instant) -> impl Iterator<Item = Sampled<VisualPin>> + '_ {
        self.pins.values().map(move |a| a.sample(now, self.duration))
    }

    pub fn wires(&self, now: Instant) -> impl Iterator<Item = Sampled<VisualWire>> + '_ {
        self.wires.values().map(move |a| a.sample(now, self.duration))
    }

    // Hit testing only considers elements that have finished entering

    pub fn node_at(&self, world: Pos2, now: Instant) -> Option<VisualNode> {
        self.nodes(now)
            .filter(|s| s.interactive && s.value.rect.contains(world))
            .map(|s| s.value)
            .last()
    }

    pub fn pin_at(&self, world: Pos2, radius: f32, now: Instant) -> Option<VisualPin> {
        self.pins(now)
            .filter(|s| s.interactive)
            .map(|s| (s.value.pos.distance(world), s.value))
            .filter(|(d, _)| *d <= radius)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, p)| p)
    }

    pub fn wire_at(&self, world: Pos2, tolerance: f32, now: Instant) -> Option<VisualWire> {
        self.wires(now)
            .filter(|s| s.interactive)
            .map(|s| (point_segment_distance(world, s.value.from, s.value.to), s.value))
            .filter(|(d, _)| *d <= tolerance)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, w)| w)
    }

    /// Names of nodes whose box lies entirely inside `rect`.
    pub fn nodes_inside(&self, rect: Rect, now: Instant) -> Vec<String> {
        self.nodes(now)
            .filter(|s| s.interactive && rect.contains_rect(s.value.rect))
            .map(|s| s.value.key)
            .collect()
    }
}

pub fn point_segment_distance(p: Pos2, a: Pos2, b: Pos2) -> f32 {
    let ab = b - a;
    let ap = p - a;
    let ab_len2 = ab.x * ab.x + ab.y * ab.y;
    if ab_len2 <= f32::EPSILON {
        return ap.length();
    }
    let t = ((ap.x * ab.x + ap.y * ab.y) / ab_len2).clamp(0.0, 1.0);
    let proj = a + ab * t;
    (p - proj).length()
}
