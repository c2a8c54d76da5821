//! Pointer-driven interaction state machine for the tree canvas.
//!
//! All gesture state lives in one [`Interaction`] value. [`InteractionMachine::handle`]
//! is a reducer: it takes a pointer event plus a read-only view of the editor,
//! moves the viewport when the gesture calls for it and returns the intents the
//! editor should act on. Nothing here talks to the runtime.

use std::collections::BTreeSet;
use std::time::Instant;

use egui::{Pos2, Rect, Vec2};

use super::scene::Scene;
use super::selection::Selection;
use super::viewport::Viewport;
use crate::tree_utils::drop_targets::{DropFilter, DropTarget};
use crate::tree_utils::layout::TreeLayout;
use crate::tree_utils::model::{DataWiring, NodeName, TreeSnapshot, WiringEndpoint, wire_compatible};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers { shift: false, ctrl: false };
    pub const SHIFT: Modifiers = Modifiers { shift: true, ctrl: false };
    pub const CTRL: Modifiers = Modifiers { shift: false, ctrl: true };

    pub fn any(self) -> bool { self.shift || self.ctrl }
}

/// Pointer input in screen coordinates.
#[derive(Clone, Debug, PartialEq)]
pub enum PointerEvent {
    Down { pos: Pos2, modifiers: Modifiers },
    // primary_down is sampled on every move; a release outside the canvas is not always delivered
    Move { pos: Pos2, primary_down: bool },
    Up { pos: Pos2, modifiers: Modifiers },
    Wheel { pos: Pos2, delta: f32 },
    DoubleClick { pos: Pos2 },
    Tick { now: Instant },
    Cancel,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum Interaction {
    #[default]
    Idle,
    PanZoom {
        origin: Pos2,
        last: Pos2,
        moved: bool,
    },
    BoxSelecting {
        origin: Pos2,
        current: Pos2,
        additive: bool,
    },
    DraggingNode {
        node: NodeName,
        origin: Pos2,
        current: Pos2,
        // Stays false until the pointer leaves the click radius
        committed: bool,
        additive: bool,
        hover: Option<DropTarget>,
    },
    DraggingWire {
        origin: WiringEndpoint,
        // World position of the originating gripper
        from: Pos2,
        pointer: Pos2,
        compatible: BTreeSet<String>,
        hover: Option<WiringEndpoint>,
    },
}

impl Interaction {
    pub fn is_dragging(&self) -> bool {
        matches!(self, Interaction::DraggingNode { committed: true, .. } | Interaction::DraggingWire { .. })
    }

    pub fn pointer(&self) -> Option<Pos2> {
        match self {
            Interaction::Idle => None,
            Interaction::PanZoom { last, .. } => Some(*last),
            Interaction::BoxSelecting { current, .. } => Some(*current),
            Interaction::DraggingNode { current, .. } => Some(*current),
            Interaction::DraggingWire { pointer, .. } => Some(*pointer),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Intent {
    Select(Selection),
    ApplyDrop { dragged: NodeName, target: DropTarget },
    CreateWire(DataWiring),
    OpenSubtree(NodeName),
}

#[derive(Clone, Debug, PartialEq)]
pub struct InteractionConfig {
    pub drag_threshold: f32,
    pub autopan_boundary: f32,
    pub autopan_max_step: f32,
    pub pin_radius: f32,
    pub wire_tolerance: f32,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self { drag_threshold: 5.0, autopan_boundary: 50.0, autopan_max_step: 12.0, pin_radius: 8.0, wire_tolerance: 6.0 }
    }
}

/// Read-only view of the editor handed to the reducer.
pub struct InteractionContext<'a> {
    pub snapshot: &'a TreeSnapshot,
    pub layout: &'a TreeLayout,
    pub scene: &'a Scene,
    pub selection: &'a Selection,
    // Canvas area on screen, used for auto-pan
    pub screen: Rect,
    pub now: Instant,
}

#[derive(Clone, Debug, Default)]
pub struct InteractionMachine {
    state: Interaction,
    // Per-tick viewport nudge while the pointer hugs a canvas edge
    autopan: Option<Vec2>,
    config: InteractionConfig,
}

impl InteractionMachine {
    pub fn new(config: InteractionConfig) -> Self {
        Self { state: Interaction::Idle, autopan: None, config }
    }

    pub fn state(&self) -> &Interaction { &self.state }
    pub fn config(&self) -> &InteractionConfig { &self.config }
    pub fn autopan_active(&self) -> bool { self.autopan.is_some() }

    /// Pins to highlight while a wire is being dragged.
    pub fn highlighted_pins(&self) -> Option<&BTreeSet<String>> {
        match &self.state {
            Interaction::DraggingWire { compatible, .. } => Some(compatible),
            _ => None,
        }
    }

    /// Drop targets left visible for the node being dragged, empty otherwise.
    pub fn visible_drop_targets<'c>(&self, ctx: &InteractionContext<'c>) -> Vec<&'c DropTarget> {
        let Interaction::DraggingNode { node, committed: true, .. } = &self.state else { return Vec::new() };
        match DropFilter::new(ctx.snapshot, node) {
            Some(filter) => filter.visible(ctx.layout.drop_targets()),
            None => Vec::new(),
        }
    }

    pub fn handle(&mut self, event: PointerEvent, viewport: &mut Viewport, ctx: &InteractionContext) -> Vec<Intent> {
        match event {
            PointerEvent::Down { pos, modifiers } => {
                self.teardown();
                self.begin(pos, modifiers, viewport, ctx);
                Vec::new()
            }
            PointerEvent::Move { pos, primary_down } => {
                if !primary_down && !matches!(self.state, Interaction::Idle) {
                    log::debug!("button released outside the canvas, cancelling {:?}", self.state_name());
                    self.teardown();
                    return Vec::new();
                }
                self.track(pos, viewport, ctx);
                Vec::new()
            }
            PointerEvent::Up { pos, modifiers } => {
                self.autopan = None;
                let state = std::mem::take(&mut self.state);
                self.finish(state, pos, modifiers, viewport, ctx)
            }
            PointerEvent::Wheel { pos, delta } => {
                // Zoom is its own input channel and never disturbs a gesture
                let factor = (1.0 + delta * 0.001).clamp(0.9, 1.1);
                viewport.zoom_at(pos, factor);
                Vec::new()
            }
            PointerEvent::DoubleClick { pos } => {
                let world = viewport.to_world(pos);
                ctx.scene
                    .node_at(world, ctx.now)
                    .filter(|n| n.subtree)
                    .map(|n| vec![Intent::OpenSubtree(n.key)])
                    .unwrap_or_default()
            }
            PointerEvent::Tick { .. } => {
                self.tick(viewport, ctx);
                Vec::new()
            }
            PointerEvent::Cancel => {
                self.teardown();
                Vec::new()
            }
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            Interaction::Idle => "Idle",
            Interaction::PanZoom { .. } => "PanZoom",
            Interaction::BoxSelecting { .. } => "BoxSelecting",
            Interaction::DraggingNode { .. } => "DraggingNode",
            Interaction::DraggingWire { .. } => "DraggingWire",
        }
    }

    /// Drop whatever gesture is running, e.g. when the view changes under it.
    pub fn reset(&mut self) {
        self.teardown();
    }

    // Drag state and the auto-pan timer always go away together
    fn teardown(&mut self) {
        self.state = Interaction::Idle;
        self.autopan = None;
    }

    fn begin(&mut self, pos: Pos2, modifiers: Modifiers, viewport: &Viewport, ctx: &InteractionContext) {
        let world = viewport.to_world(pos);

        let pin_radius = self.config.pin_radius / viewport.zoom;
        if let Some(pin) = ctx.scene.pin_at(world, pin_radius, ctx.now) {
            let compatible: BTreeSet<String> = ctx
                .scene
                .pins(ctx.now)
                .filter(|p| p.interactive && wire_compatible(ctx.snapshot, &pin.endpoint, &p.value.endpoint).is_some())
                .map(|p| p.value.key)
                .collect();
            log::debug!("wire drag from {} with {} compatible pin(s)", pin.key, compatible.len());
            self.state = Interaction::DraggingWire {
                origin: pin.endpoint,
                from: pin.pos,
                pointer: pos,
                compatible,
                hover: None,
            };
            return;
        }

        // The forest root is never in the scene, so it can't be grabbed
        if let Some(node) = ctx.scene.node_at(world, ctx.now) {
            self.state = Interaction::DraggingNode {
                node: node.key,
                origin: pos,
                current: pos,
                committed: false,
                additive: modifiers.any(),
                hover: None,
            };
            return;
        }

        self.state = if modifiers.any() {
            Interaction::BoxSelecting { origin: pos, current: pos, additive: modifiers.shift }
        } else {
            Interaction::PanZoom { origin: pos, last: pos, moved: false }
        };
    }

    fn track(&mut self, pos: Pos2, viewport: &mut Viewport, ctx: &InteractionContext) {
        let threshold = self.config.drag_threshold;
        match &mut self.state {
            Interaction::Idle => {}
            Interaction::PanZoom { origin, last, moved } => {
                viewport.pan_by(pos - *last);
                *last = pos;
                *moved |= origin.distance(pos) > threshold;
            }
            Interaction::BoxSelecting { current, .. } => *current = pos,
            Interaction::DraggingNode { node, origin, current, committed, hover, .. } => {
                *current = pos;
                if !*committed && origin.distance(pos) > threshold {
                    log::debug!("drag of '{}' committed", node);
                    *committed = true;
                }
                if *committed {
                    *hover = drop_target_at(ctx, node, viewport.to_world(pos));
                }
            }
            Interaction::DraggingWire { pointer, .. } => *pointer = pos,
        }
        self.refresh_wire_hover(viewport, ctx);
        self.autopan = if self.state.is_dragging() { self.edge_push(pos, ctx.screen) } else { None };
    }

    fn tick(&mut self, viewport: &mut Viewport, ctx: &InteractionContext) {
        let Some(velocity) = self.autopan else { return };
        if !self.state.is_dragging() {
            self.autopan = None;
            return;
        }
        viewport.pan_by(-velocity);
        // The world under a resting pointer moved, so re-resolve what it hovers
        if let Interaction::DraggingNode { node, current, hover, .. } = &mut self.state {
            *hover = drop_target_at(ctx, node, viewport.to_world(*current));
        }
        self.refresh_wire_hover(viewport, ctx);
    }

    fn refresh_wire_hover(&mut self, viewport: &Viewport, ctx: &InteractionContext) {
        let pin_radius = self.config.pin_radius / viewport.zoom;
        if let Interaction::DraggingWire { pointer, compatible, hover, .. } = &mut self.state {
            *hover = ctx
                .scene
                .pin_at(viewport.to_world(*pointer), pin_radius, ctx.now)
                .filter(|p| compatible.contains(&p.key))
                .map(|p| p.endpoint);
        }
    }

    // Vector toward the nearest canvas edges, scaled by how deep the pointer is in the boundary band
    fn edge_push(&self, pos: Pos2, screen: Rect) -> Option<Vec2> {
        let band = self.config.autopan_boundary;
        if band <= 0.0 || !screen.is_positive() {
            return None;
        }
        let axis = |p: f32, lo: f32, hi: f32| -> f32 {
            if p < lo + band {
                -((lo + band - p) / band).clamp(0.0, 1.0)
            } else if p > hi - band {
                ((p - (hi - band)) / band).clamp(0.0, 1.0)
            } else {
                0.0
            }
        };
        let push = Vec2::new(axis(pos.x, screen.left(), screen.right()), axis(pos.y, screen.top(), screen.bottom()));
        if push == Vec2::ZERO {
            None
        } else {
            Some(push * self.config.autopan_max_step)
        }
    }

    fn finish(
        &mut self,
        state: Interaction,
        pos: Pos2,
        modifiers: Modifiers,
        viewport: &Viewport,
        ctx: &InteractionContext,
    ) -> Vec<Intent> {
        match state {
            Interaction::Idle => Vec::new(),
            Interaction::PanZoom { moved, .. } => {
                if moved {
                    return Vec::new();
                }
                // A click on empty canvas: pick a wire under it, otherwise clear
                let world = viewport.to_world(pos);
                let tolerance = self.config.wire_tolerance / viewport.zoom;
                match ctx.scene.wire_at(world, tolerance, ctx.now) {
                    Some(wire) => vec![Intent::Select(Selection::Wiring(wire.wiring))],
                    None => vec![Intent::Select(Selection::None)],
                }
            }
            Interaction::BoxSelecting { origin, additive, .. } => {
                let screen_rect = Rect::from_two_pos(origin, pos);
                if origin.distance(pos) <= self.config.drag_threshold {
                    // Modifier click on empty canvas keeps the selection
                    return Vec::new();
                }
                let names = ctx.scene.nodes_inside(viewport.rect_to_world(screen_rect), ctx.now);
                let selection = if additive || modifiers.shift {
                    ctx.selection.extended(names)
                } else {
                    Selection::from_names(names)
                };
                vec![Intent::Select(selection)]
            }
            Interaction::DraggingNode { node, committed, additive, .. } => {
                if !committed {
                    let selection = if additive { ctx.selection.toggled(&node) } else { Selection::Node(node) };
                    return vec![Intent::Select(selection)];
                }
                match drop_target_at(ctx, &node, viewport.to_world(pos)) {
                    Some(target) => vec![Intent::ApplyDrop { dragged: node, target }],
                    None => {
                        log::debug!("drag of '{}' released over no target", node);
                        Vec::new()
                    }
                }
            }
            Interaction::DraggingWire { origin, compatible, .. } => {
                let pin_radius = self.config.pin_radius / viewport.zoom;
                ctx.scene
                    .pin_at(viewport.to_world(pos), pin_radius, ctx.now)
                    .filter(|p| compatible.contains(&p.key))
                    .and_then(|p| wire_compatible(ctx.snapshot, &origin, &p.endpoint))
                    .map(|w| vec![Intent::CreateWire(w)])
                    .unwrap_or_default()
            }
        }
    }
}

// Smallest visible target under `world`, so edge strips win over the swap box they border
fn drop_target_at(ctx: &InteractionContext, dragged: &str, world: Pos2) -> Option<DropTarget> {
    let filter = DropFilter::new(ctx.snapshot, dragged)?;
    ctx.layout
        .drop_targets()
        .iter()
        .filter(|t| t.region.contains(world) && filter.allows(t))
        .min_by(|a, b| a.region.area().total_cmp(&b.region.area()))
        .cloned()
}
