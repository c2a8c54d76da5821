use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use eframe::egui;
use egui::{Align2, Color32, FontId, Pos2, Rect, Sense, Stroke, Vec2};
use uuid::Uuid;

use crate::api::RuntimeClient;
use crate::canvas::editor::{ActiveView, NodeMeasurer, TreeEditor};
use crate::canvas::interaction::{Interaction, Modifiers, PointerEvent};
use crate::canvas::scene::GRIPPER_RADIUS;
use crate::canvas::selection::Selection;
use crate::edit::EditError;
use crate::persistence::settings::AppSettings;
use crate::tree_utils::drop_targets::DropSlot;
use crate::tree_utils::model::{NodeRecord, PinKind};

const TITLE_FONT: f32 = 14.0;
const CLASS_FONT: f32 = 11.0;
const NODE_PAD: Vec2 = Vec2::new(10.0, 6.0);
const PIN_PITCH: f32 = 16.0;
// Below this zoom labels are skipped
const LABEL_MIN_ZOOM: f32 = 0.35;
const TOAST_SECS: u64 = 6;

// Measures node boxes from the same galleys the canvas paints
struct GalleyMeasurer<'p> {
    painter: &'p egui::Painter,
}

impl NodeMeasurer for GalleyMeasurer<'_> {
    fn measure(&mut self, node: &NodeRecord) -> Option<Vec2> {
        let title = self.painter.layout_no_wrap(node.name.clone(), FontId::proportional(TITLE_FONT), Color32::WHITE);
        let class = self.painter.layout_no_wrap(node.node_class.clone(), FontId::proportional(CLASS_FONT), Color32::WHITE);
        if title.size().y <= 0.0 {
            return None;
        }
        let text = Vec2::new(title.size().x.max(class.size().x), title.size().y + class.size().y);
        let pins = node.inputs.len().max(node.outputs.len()) as f32;
        let height = (text.y + NODE_PAD.y * 2.0).max((pins + 1.0) * PIN_PITCH);
        Some(Vec2::new(text.x + NODE_PAD.x * 2.0 + GRIPPER_RADIUS * 2.0, height))
    }
}

/// Primary-button input egui reported for one frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct PointerFrame {
    pub pressed: bool,
    pub released: bool,
    pub down: bool,
    pub double: bool,
    pub latest: Option<Pos2>,
    pub scroll: f32,
    pub hovered: bool,
    pub modifiers: Modifiers,
}

impl PointerFrame {
    /// Pointer events for this frame, in order. `busy` is whether a gesture is already running.
    pub fn events(&self, busy: bool) -> Vec<PointerEvent> {
        let mut out = Vec::new();
        let Some(pos) = self.latest else {
            // Pointer left the window and the release was never seen
            if busy && !self.down {
                out.push(PointerEvent::Cancel);
            }
            return out;
        };
        let modifiers = self.modifiers;
        if self.pressed && self.hovered {
            out.push(PointerEvent::Down { pos, modifiers });
            // Press and release can arrive in the same frame on a quick click
            if self.released {
                out.push(PointerEvent::Up { pos, modifiers });
            }
        } else if busy && self.released {
            out.push(PointerEvent::Up { pos, modifiers });
        } else if busy {
            out.push(PointerEvent::Move { pos, primary_down: self.down });
        }
        if self.double && self.hovered {
            out.push(PointerEvent::DoubleClick { pos });
        }
        if self.scroll != 0.0 && self.hovered {
            out.push(PointerEvent::Wheel { pos, delta: self.scroll });
        }
        out
    }
}

struct Toast {
    message: String,
    stamp: String,
    at: Instant,
}

fn local_stamp() -> String {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    let fmt = time::macros::format_description!("[hour]:[minute]:[second]");
    now.format(&fmt).unwrap_or_else(|_| "now".into())
}

// The runtime may still rename it on a clash
fn fresh_node_name(class: &str) -> String {
    let id = Uuid::now_v7().simple().to_string();
    format!("{}_{}", class, &id[id.len() - 6..])
}

pub struct EditorApp {
    editor: TreeEditor,
    client: Box<dyn RuntimeClient>,
    settings: AppSettings,
    errors: Rc<RefCell<Vec<Toast>>>,
    // Set by the selection listener, consumed when drawing the inspector
    selection_changed: Rc<Cell<bool>>,
    option_drafts: BTreeMap<String, String>,
    new_node_class: String,
    new_node_max_children: i32,
    fit_pending: bool,
    zoom_hud_until: Option<Instant>,
}

impl EditorApp {
    pub fn new(settings: AppSettings, client: Box<dyn RuntimeClient>) -> Self {
        let mut editor = TreeEditor::new(settings.editor.clone());

        let errors: Rc<RefCell<Vec<Toast>>> = Rc::default();
        let sink = errors.clone();
        editor.on_error(move |e: &EditError| {
            sink.borrow_mut().push(Toast { message: e.to_string(), stamp: local_stamp(), at: Instant::now() });
        });

        let selection_changed = Rc::new(Cell::new(false));
        let flag = selection_changed.clone();
        editor.selection_mut().subscribe(move |sel| {
            log::debug!("selection is now {:?}", sel);
            flag.set(true);
        });

        Self {
            editor,
            client,
            settings,
            errors,
            selection_changed,
            option_drafts: BTreeMap::new(),
            new_node_class: "Sequence".to_string(),
            new_node_max_children: -1,
            fit_pending: true,
            zoom_hud_until: None,
        }
    }

    fn pump_bridge(&mut self, now: Instant) {
        for event in self.client.poll() {
            self.editor.handle_event(event, self.client.as_mut(), now);
        }
        self.editor.poll_timeouts(now);
    }

    fn show_view(&mut self, view: ActiveView) {
        match self.editor.set_active_view(view, Instant::now()) {
            // Parked views are fitted once the discard is confirmed
            Ok(()) => self.fit_pending = self.editor.pending_view().is_none(),
            Err(e) => self.toast(e.to_string()),
        }
    }

    fn toast(&self, message: String) {
        self.errors.borrow_mut().push(Toast { message, stamp: local_stamp(), at: Instant::now() });
    }

    fn save_settings(&mut self) {
        self.settings.editor = self.editor.settings().clone();
        if let Err(e) = self.settings.save() {
            log::error!("failed to save settings: {:#}", e);
            self.toast(format!("could not save settings: {}", e));
        }
    }

    fn top_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label("Tree-Loom");
                ui.separator();
                let (dot, text) = if self.editor.is_connected() {
                    (Color32::LIGHT_GREEN, format!("connected to {}", self.settings.bridge_url))
                } else {
                    (Color32::from_rgb(230, 120, 60), "offline".to_string())
                };
                ui.colored_label(dot, "●");
                ui.label(text);
                ui.separator();
                ui.label(format!("namespace {}", self.settings.namespace));
                if self.editor.running_edits() > 0 {
                    ui.separator();
                    ui.spinner();
                    ui.label(format!("{} edit(s) in flight", self.editor.running_edits()));
                }

                ui.menu_button("Settings", |ui| {
                    if ui.button("Save connection and editor settings").clicked() {
                        self.save_settings();
                        ui.close();
                    }
                    ui.label(format!("{}", AppSettings::settings_dir().display()));
                });
                ui.menu_button("View", |ui| {
                    if ui.button("Fit to tree (F)").clicked() {
                        self.fit_pending = true;
                        ui.close();
                    }
                    if ui.button("Reset view").clicked() {
                        self.editor.reset_view();
                        ui.close();
                    }
                });
            });
        });
    }

    fn inspector(&mut self, ctx: &egui::Context) {
        egui::SidePanel::right("inspector").resizable(true).default_width(280.0).show(ctx, |ui| {
            ui.heading("Tree");
            let current = self.editor.active_view().clone();
            let subtrees: Vec<String> = self.editor.published_subtrees().map(str::to_string).collect();
            ui.horizontal_wrapped(|ui| {
                if ui.selectable_label(current == ActiveView::Main, "Main").clicked() {
                    self.show_view(ActiveView::Main);
                }
                for name in subtrees {
                    let active = current == ActiveView::Subtree(name.clone());
                    if ui.selectable_label(active, name.as_str()).clicked() {
                        self.show_view(ActiveView::Subtree(name));
                    }
                }
            });
            ui.separator();

            if self.selection_changed.replace(false) {
                self.option_drafts.clear();
            }
            egui::ScrollArea::vertical().show(ui, |ui| {
                let selection = self.editor.selection().current().clone();
                match &selection {
                    Selection::None => {
                        ui.weak("Nothing selected. Click a node or a data wire.");
                    }
                    Selection::Node(name) => self.node_panel(ui, name),
                    Selection::Nodes(names) => {
                        ui.label(format!("{} nodes selected", names.len()));
                        for n in names {
                            ui.label(n.as_str());
                        }
                    }
                    Selection::Wiring(w) => {
                        ui.label("Data wiring");
                        ui.monospace(w.source.key());
                        ui.label("→");
                        ui.monospace(w.target.key());
                        if ui.button("Remove wiring (Del)").clicked() {
                            self.editor.remove_selected_wiring(self.client.as_mut(), Instant::now());
                        }
                    }
                }
            });
        });
    }

    // Stand-in for the property editor: option drafts count as unsaved edits
    fn node_panel(&mut self, ui: &mut egui::Ui, name: &str) {
        let Some(record) = self.editor.displayed().and_then(|s| s.node(name)).cloned() else { return };
        ui.heading(record.name.as_str());
        egui::Grid::new("node_fields").num_columns(2).show(ui, |ui| {
            ui.label("class");
            ui.label(record.node_class.as_str());
            ui.end_row();
            ui.label("module");
            ui.label(record.module.as_str());
            ui.end_row();
            ui.label("state");
            ui.label(format!("{:?}", record.state));
            ui.end_row();
            ui.label("max children");
            ui.label(match record.max_children {
                m if m < 0 => "unbounded".to_string(),
                m => m.to_string(),
            });
            ui.end_row();
        });

        ui.separator();
        ui.label("Options");
        let mut edited = false;
        for pin in &record.options {
            ui.horizontal(|ui| {
                ui.label(format!("{} ({})", pin.key, pin.serialized_type));
                let draft = self.option_drafts.entry(pin.key.clone()).or_insert_with(|| pin.serialized_value.clone());
                edited |= ui.text_edit_singleline(draft).changed();
            });
        }
        if edited {
            self.editor.selection_mut().set_unsaved_edits(true);
        }
        if self.editor.selection().has_unsaved_edits() && ui.button("Discard option edits").clicked() {
            self.option_drafts.clear();
            self.editor.selection_mut().set_unsaved_edits(false);
        }

        for kind in [PinKind::Inputs, PinKind::Outputs] {
            ui.separator();
            ui.label(kind.as_str());
            for pin in record.pins(kind) {
                ui.monospace(format!("{}: {}", pin.key, pin.serialized_type));
            }
        }

        if record.has_capacity() {
            ui.separator();
            ui.label("Append a new child");
            ui.horizontal(|ui| {
                ui.text_edit_singleline(&mut self.new_node_class);
                ui.add(egui::DragValue::new(&mut self.new_node_max_children).range(-1..=16));
            });
            if ui.button("Add").clicked() {
                self.append_new_node(&record.name);
            }
        }
    }

    fn append_new_node(&mut self, parent: &str) {
        let target = self
            .editor
            .layout()
            .drop_targets()
            .iter()
            .find(|t| t.owner == parent && t.slot == DropSlot::AppendChild)
            .cloned();
        let Some(target) = target else { return };
        let class = self.new_node_class.trim();
        if class.is_empty() {
            return;
        }
        let definition = NodeRecord::new(&fresh_node_name(class), class, self.new_node_max_children);
        // Errors already reach the toast list through the editor callback
        let _ = self.editor.drop_new_node(definition, &target, self.client.as_mut(), Instant::now());
    }

    fn discard_modal(&mut self, ctx: &egui::Context) {
        if self.editor.selection().pending().is_none() {
            return;
        }
        egui::Window::new("Discard unsaved changes?")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
            .show(ctx, |ui| {
                ui.label("The selected node has option edits that were not applied.");
                ui.label("Switching the selection throws them away.");
                ui.separator();
                ui.horizontal(|ui| {
                    if ui.button(egui::RichText::new("Discard").color(Color32::RED)).clicked() {
                        self.option_drafts.clear();
                        let view = self.editor.active_view().clone();
                        self.editor.confirm_discard(Instant::now());
                        if *self.editor.active_view() != view {
                            self.fit_pending = true;
                        }
                    }
                    if ui.button("Keep editing").clicked() {
                        self.editor.cancel_discard();
                    }
                });
            });
    }

    fn canvas(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let now = Instant::now();
            let available = ui.available_rect_before_wrap();
            let resp = ui.allocate_rect(available, Sense::click_and_drag());
            let painter = ui.painter_at(available);

            self.editor.update(now, &mut GalleyMeasurer { painter: &painter });
            if self.fit_pending && self.editor.layout().bounds().is_some() {
                self.editor.fit_view(available);
                self.fit_pending = false;
            }

            self.feed_pointer(ui, &resp, available, now);
            self.paint(&painter, available, now);
        });
    }

    fn feed_pointer(&mut self, ui: &egui::Ui, resp: &egui::Response, available: Rect, now: Instant) {
        let frame = ui.input(|i| PointerFrame {
            pressed: i.pointer.primary_pressed(),
            released: i.pointer.primary_released(),
            down: i.pointer.primary_down(),
            double: i.pointer.button_double_clicked(egui::PointerButton::Primary),
            latest: i.pointer.latest_pos(),
            scroll: i.raw_scroll_delta.y,
            hovered: resp.hovered(),
            modifiers: Modifiers { shift: i.modifiers.shift, ctrl: i.modifiers.command },
        });
        let busy = !matches!(self.editor.interaction().state(), Interaction::Idle);
        let client = self.client.as_mut();
        for event in frame.events(busy) {
            if matches!(event, PointerEvent::Wheel { .. }) {
                self.zoom_hud_until = Some(now + Duration::from_millis(1000));
            }
            self.editor.handle_pointer(event, available, client, now);
        }
        self.editor.tick(available, client, now);

        if !ui.ctx().wants_keyboard_input() {
            let (escape, delete, fit) = ui.input(|i| {
                (
                    i.key_pressed(egui::Key::Escape),
                    i.key_pressed(egui::Key::Delete) || i.key_pressed(egui::Key::Backspace),
                    i.key_pressed(egui::Key::F),
                )
            });
            if escape {
                self.editor.handle_pointer(PointerEvent::Cancel, available, self.client.as_mut(), now);
            }
            if delete {
                self.editor.remove_selected_wiring(self.client.as_mut(), now);
            }
            if fit {
                self.fit_pending = true;
            }
        }
    }

    fn paint(&self, painter: &egui::Painter, available: Rect, now: Instant) {
        let editor = &self.editor;
        let vp = editor.viewport();
        let scene = editor.scene();
        let zoom = vp.zoom;
        let selection = editor.selection().current();

        painter.rect_filled(available, 0.0, Color32::from_gray(24));

        let edge_stroke = Stroke::new(1.5 * zoom.max(0.5), Color32::from_gray(130));
        for edge in scene.edges(now) {
            let color = edge_stroke.color.gamma_multiply(edge.opacity);
            painter.line_segment([vp.to_screen(edge.value.from), vp.to_screen(edge.value.to)], Stroke::new(edge_stroke.width, color));
        }

        for wire in scene.wires(now) {
            let selected = selection.wiring() == Some(&wire.value.wiring);
            let color = if selected { Color32::YELLOW } else { Color32::from_rgb(90, 160, 230) };
            let width = if selected { 3.0 } else { 1.5 };
            painter.line_segment(
                [vp.to_screen(wire.value.from), vp.to_screen(wire.value.to)],
                Stroke::new(width, color.gamma_multiply(wire.opacity)),
            );
        }

        for node in scene.nodes(now) {
            let rect = vp.rect_to_screen(node.value.rect);
            let fill = if node.value.subtree { Color32::from_rgb(44, 52, 70) } else { Color32::from_gray(48) };
            let selected = selection.contains_node(&node.value.key);
            let stroke = Stroke::new(if selected { 3.5 } else { 2.0 }, node.value.border.gamma_multiply(node.opacity));
            painter.rect_filled(rect, 4.0 * zoom, fill.gamma_multiply(node.opacity));
            painter.rect_stroke(rect, 4.0 * zoom, stroke, egui::StrokeKind::Inside);
            if selected {
                painter.rect_stroke(rect.expand(3.0), 6.0 * zoom, Stroke::new(1.0, Color32::WHITE), egui::StrokeKind::Outside);
            }
            if zoom >= LABEL_MIN_ZOOM && rect.height() > 4.0 {
                let text_col = Color32::WHITE.gamma_multiply(node.opacity);
                let top = rect.center_top() + Vec2::new(0.0, NODE_PAD.y * zoom);
                painter.text(top, Align2::CENTER_TOP, &node.value.key, FontId::proportional(TITLE_FONT * zoom), text_col);
                let class_pos = top + Vec2::new(0.0, TITLE_FONT * 1.2 * zoom);
                painter.text(class_pos, Align2::CENTER_TOP, &node.value.class, FontId::proportional(CLASS_FONT * zoom), Color32::from_gray(170).gamma_multiply(node.opacity));
            }
        }

        let highlighted = editor.interaction().highlighted_pins();
        for pin in scene.pins(now) {
            let pos = vp.to_screen(pin.value.pos);
            let lit = highlighted.is_some_and(|h| h.contains(&pin.value.key));
            let color = match pin.value.endpoint.data_kind {
                PinKind::Outputs => Color32::from_rgb(230, 160, 60),
                _ => Color32::from_rgb(120, 200, 120),
            };
            let radius = GRIPPER_RADIUS * zoom.clamp(0.5, 1.5);
            painter.circle_filled(pos, radius, color.gamma_multiply(pin.opacity));
            if lit {
                painter.circle_stroke(pos, radius + 3.0, Stroke::new(2.0, Color32::WHITE));
            }
        }

        match editor.interaction().state() {
            Interaction::BoxSelecting { origin, current, .. } => {
                let r = Rect::from_two_pos(*origin, *current);
                painter.rect_filled(r, 0.0, Color32::from_rgba_unmultiplied(120, 170, 255, 30));
                painter.rect_stroke(r, 0.0, Stroke::new(1.0, Color32::from_rgb(120, 170, 255)), egui::StrokeKind::Inside);
            }
            Interaction::DraggingNode { committed: true, current, hover, node, .. } => {
                if let Some(snapshot) = editor.displayed() {
                    let ctx = crate::canvas::interaction::InteractionContext {
                        snapshot,
                        layout: editor.layout(),
                        scene,
                        selection,
                        screen: available,
                        now,
                    };
                    for target in editor.interaction().visible_drop_targets(&ctx) {
                        let active = hover.as_ref().is_some_and(|h| h.key() == target.key());
                        let alpha = if active { 110 } else { 35 };
                        let color = match target.slot {
                            DropSlot::Swap => Color32::from_rgba_unmultiplied(230, 200, 80, alpha),
                            DropSlot::ReplaceAsParent => Color32::from_rgba_unmultiplied(230, 120, 200, alpha),
                            _ => Color32::from_rgba_unmultiplied(100, 200, 255, alpha),
                        };
                        painter.rect_filled(vp.rect_to_screen(target.region), 2.0, color);
                    }
                }
                painter.text(*current + Vec2::new(12.0, 12.0), Align2::LEFT_TOP, node, FontId::proportional(12.0), Color32::WHITE);
            }
            Interaction::DraggingWire { from, pointer, .. } => {
                painter.line_segment([vp.to_screen(*from), *pointer], Stroke::new(2.0, Color32::from_rgb(250, 220, 120)));
            }
            _ => {}
        }

        if let Some(until) = self.zoom_hud_until {
            if now < until {
                let galley = painter.layout_no_wrap(format!("{:.2}x", zoom), FontId::proportional(14.0), Color32::WHITE);
                let pad = Vec2::new(8.0, 4.0);
                let size = galley.size() + pad * 2.0;
                let pos = Pos2::new(available.center().x - size.x * 0.5, available.top() + 12.0);
                painter.rect_filled(Rect::from_min_size(pos, size), 8.0, Color32::from_rgba_premultiplied(20, 20, 20, 200));
                painter.galley(pos + pad, galley, Color32::WHITE);
            }
        }
    }

    fn toasts(&mut self, ctx: &egui::Context) {
        let mut errors = self.errors.borrow_mut();
        errors.retain(|t| t.at.elapsed() <= Duration::from_secs(TOAST_SECS));
        if errors.is_empty() {
            return;
        }
        let margin = egui::vec2(12.0, 12.0);
        egui::Area::new("bottom_right_toast".into())
            .anchor(egui::Align2::RIGHT_BOTTOM, egui::vec2(-margin.x, -margin.y))
            .interactable(false)
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style())
                    .corner_radius(egui::CornerRadius::same(8))
                    .stroke(Stroke { width: 1.5, color: Color32::from_gray(100) })
                    .fill(Color32::from_rgba_premultiplied(30, 30, 30, 230))
                    .inner_margin(egui::Margin::symmetric(12, 8))
                    .show(ui, |ui| {
                        for toast in errors.iter() {
                            ui.colored_label(Color32::from_rgb(255, 110, 100), format!("[{}] {}", toast.stamp, toast.message));
                        }
                    });
            });
    }
}

impl eframe::App for EditorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();
        self.pump_bridge(now);

        self.top_bar(ctx);
        self.inspector(ctx);
        self.discard_modal(ctx);
        self.canvas(ctx);
        self.toasts(ctx);

        let now = Instant::now();
        // Keep polling the bridge for pushes
        let mut wait = Duration::from_millis(50);
        if let Some(at) = self.editor.next_wakeup() {
            wait = wait.min(at.saturating_duration_since(now));
        }
        if self.editor.needs_repaint(now) || self.zoom_hud_until.is_some_and(|t| now < t) {
            wait = wait.min(self.editor.settings().autopan_interval());
        }
        ctx.request_repaint_after(wait);
    }
}
