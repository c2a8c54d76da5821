//! Hierarchical layout for behavior trees.
//!
//! Nodes are placed in horizontal bands, one band per depth. Every band is as
//! tall as its tallest node so edges always run between straight rows. Inside a
//! band, subtrees are packed left to right against each other's contours
//! (Reingold-Tilford style) and each parent is centered over the span of its
//! children.

use std::collections::{HashMap, HashSet};

use egui::{Pos2, Rect, Vec2, pos2};

use super::drop_targets::{self, DropTarget};
use super::model::{FOREST_ROOT, NodeName, NodeRecord, TreeSnapshot};

#[derive(Clone, Debug, PartialEq)]
pub struct LayoutConfig {
    // Gap added around every measured node footprint
    pub spacing: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self { Self { spacing: 40.0 } }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LayoutError {
    #[error("{} node(s) have not been measured yet", .0.len())]
    Unmeasured(Vec<NodeName>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LayoutNode {
    pub name: NodeName,
    // True only for the client-side forest root
    pub synthetic: bool,
    pub size: Vec2,
    // Horizontal center of the node box
    pub x: f32,
    // Top edge of the node box
    pub y: f32,
    pub depth: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub entering: bool,
    // Where an entering node animates in from
    pub enter_from: Option<Pos2>,
}

impl LayoutNode {
    pub fn rect(&self) -> Rect {
        Rect::from_min_size(pos2(self.x - self.size.x * 0.5, self.y), self.size)
    }

    pub fn top_center(&self) -> Pos2 { pos2(self.x, self.y) }
    pub fn bottom_center(&self) -> Pos2 { pos2(self.x, self.y + self.size.y) }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LayoutEdge {
    pub parent: NodeName,
    pub child: NodeName,
    pub from: Pos2,
    pub to: Pos2,
}

impl LayoutEdge {
    pub fn key(&self) -> String { format!("{}->{}", self.parent, self.child) }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TreeLayout {
    nodes: Vec<LayoutNode>,
    index: HashMap<NodeName, usize>,
    edges: Vec<LayoutEdge>,
    drop_targets: Vec<DropTarget>,
    forest_root: bool,
}

impl TreeLayout {
    pub fn root(&self) -> Option<&LayoutNode> { self.nodes.first() }
    pub fn nodes(&self) -> &[LayoutNode] { &self.nodes }
    pub fn node(&self, idx: usize) -> Option<&LayoutNode> { self.nodes.get(idx) }
    pub fn get(&self, name: &str) -> Option<&LayoutNode> { self.index.get(name).map(|&i| &self.nodes[i]) }
    pub fn edges(&self) -> &[LayoutEdge] { &self.edges }
    pub fn drop_targets(&self) -> &[DropTarget] { &self.drop_targets }
    pub fn has_forest_root(&self) -> bool { self.forest_root }
    pub fn len(&self) -> usize { self.nodes.len() }
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    pub fn parent(&self, name: &str) -> Option<&LayoutNode> {
        self.get(name).and_then(|n| n.parent).map(|p| &self.nodes[p])
    }

    /// Visible (non-synthetic) nodes.
    pub fn visible(&self) -> impl Iterator<Item = &LayoutNode> {
        self.nodes.iter().filter(|n| !n.synthetic)
    }

    /// Bounding box of all visible nodes, or None for an empty tree.
    pub fn bounds(&self) -> Option<Rect> {
        self.visible().map(LayoutNode::rect).reduce(|a, b| a.union(b))
    }
}

/// Lay out `snapshot` using measured node sizes.
///
/// Fails with [`LayoutError::Unmeasured`] when any node has no size yet; the
/// caller re-runs the pass once the missing sizes are known. `previous` is the
/// last layout shown and is only used to mark entering nodes.
pub fn layout_tree(
    snapshot: &TreeSnapshot,
    sizes: &HashMap<NodeName, Vec2>,
    previous: Option<&TreeLayout>,
    config: &LayoutConfig,
) -> Result<TreeLayout, LayoutError> {
    let mut by_name: HashMap<&str, &NodeRecord> = HashMap::with_capacity(snapshot.nodes.len());
    let mut ordered: Vec<&NodeRecord> = Vec::with_capacity(snapshot.nodes.len());
    for node in &snapshot.nodes {
        if by_name.insert(node.name.as_str(), node).is_some() {
            log::warn!("duplicate node name '{}' in snapshot '{}', keeping the first", node.name, snapshot.name);
            continue;
        }
        ordered.push(node);
    }

    let unmeasured: Vec<NodeName> = ordered
        .iter()
        .filter(|n| !sizes.contains_key(&n.name))
        .map(|n| n.name.clone())
        .collect();
    if !unmeasured.is_empty() {
        return Err(LayoutError::Unmeasured(unmeasured));
    }

    let mut nodes = build_arena(&ordered, &by_name, sizes);
    let forest_root = nodes[0].children.len() != 1;
    if !forest_root {
        nodes = strip_forest_root(nodes);
    }

    place(&mut nodes, config);

    let index: HashMap<NodeName, usize> = nodes.iter().enumerate().map(|(i, n)| (n.name.clone(), i)).collect();
    mark_entering(&mut nodes, previous);

    let edges = nodes
        .iter()
        .filter_map(|child| {
            let parent = &nodes[child.parent?];
            if parent.synthetic {
                return None;
            }
            Some(LayoutEdge {
                parent: parent.name.clone(),
                child: child.name.clone(),
                from: parent.bottom_center(),
                to: child.top_center(),
            })
        })
        .collect();

    let mut layout = TreeLayout { nodes, index, edges, drop_targets: Vec::new(), forest_root };
    layout.drop_targets = drop_targets::collect(&layout, snapshot, config.spacing);
    Ok(layout)
}

// Arena in pre-order with a synthetic root at index 0. Top-level nodes hang off
// the synthetic root, followed by anything unreachable from them (cycles).
fn build_arena(
    ordered: &[&NodeRecord],
    by_name: &HashMap<&str, &NodeRecord>,
    sizes: &HashMap<NodeName, Vec2>,
) -> Vec<LayoutNode> {
    let mut arena = vec![LayoutNode {
        name: FOREST_ROOT.to_string(),
        synthetic: true,
        size: Vec2::ZERO,
        x: 0.0,
        y: 0.0,
        depth: 0,
        parent: None,
        children: Vec::new(),
        entering: false,
        enter_from: None,
    }];
    let claimed: HashSet<&str> = ordered
        .iter()
        .flat_map(|n| n.child_names.iter().map(String::as_str))
        .filter(|c| by_name.contains_key(c))
        .collect();
    let mut visited: HashSet<&str> = HashSet::new();

    let tops = ordered.iter().filter(|n| !claimed.contains(n.name.as_str()));
    for top in tops {
        push_subtree(&mut arena, &mut visited, by_name, sizes, top.name.as_str());
    }
    for node in ordered {
        if !visited.contains(node.name.as_str()) {
            log::warn!("node '{}' is not reachable from a top-level node, attaching it to the forest root", node.name);
            push_subtree(&mut arena, &mut visited, by_name, sizes, node.name.as_str());
        }
    }
    arena
}

fn push_subtree<'a>(
    arena: &mut Vec<LayoutNode>,
    visited: &mut HashSet<&'a str>,
    by_name: &HashMap<&str, &'a NodeRecord>,
    sizes: &HashMap<NodeName, Vec2>,
    root: &'a str,
) {
    let mut stack: Vec<(&'a str, usize, usize)> = vec![(root, 0, 1)];
    while let Some((name, parent, depth)) = stack.pop() {
        if !visited.insert(name) {
            continue;
        }
        let Some(record) = by_name.get(name) else { continue };
        let idx = arena.len();
        arena.push(LayoutNode {
            name: name.to_string(),
            synthetic: false,
            size: sizes.get(name).copied().unwrap_or(Vec2::ZERO),
            x: 0.0,
            y: 0.0,
            depth,
            parent: Some(parent),
            children: Vec::new(),
            entering: false,
            enter_from: None,
        });
        arena[parent].children.push(idx);
        // Reverse so the first child pops first and siblings keep their declared order
        for child in record.child_names.iter().rev() {
            if by_name.contains_key(child.as_str()) && !visited.contains(child.as_str()) {
                stack.push((child.as_str(), idx, depth + 1));
            }
        }
    }
}

// Drop the synthetic root when exactly one real root hangs off it.
fn strip_forest_root(arena: Vec<LayoutNode>) -> Vec<LayoutNode> {
    arena
        .into_iter()
        .skip(1)
        .map(|mut n| {
            n.parent = match n.parent {
                Some(0) | None => None,
                Some(p) => Some(p - 1),
            };
            n.children.iter_mut().for_each(|c| *c -= 1);
            n.depth -= 1;
            n
        })
        .collect()
}

fn place(nodes: &mut [LayoutNode], config: &LayoutConfig) {
    let n = nodes.len();
    if n == 0 {
        return;
    }
    let max_depth = nodes.iter().map(|n| n.depth).max().unwrap_or(0);

    // Every band is as tall as its tallest node; the synthetic root's band is empty
    let mut row_height = vec![0.0_f32; max_depth + 1];
    for node in nodes.iter().filter(|n| !n.synthetic) {
        row_height[node.depth] = row_height[node.depth].max(node.size.y);
    }
    let mut row_top = vec![0.0_f32; max_depth + 1];
    let mut acc = 0.0;
    for depth in 0..=max_depth {
        row_top[depth] = acc;
        let band_empty = nodes.iter().all(|n| n.depth != depth || n.synthetic);
        if !band_empty {
            acc += row_height[depth] + config.spacing;
        }
    }

    let footprint_w: Vec<f32> = nodes
        .iter()
        .map(|n| if n.synthetic { 0.0 } else { n.size.x + config.spacing })
        .collect();

    // Post-order: the arena is pre-order, so walking it backwards visits children first.
    // contours[i][d] = (left, right) extent of i's subtree at relative depth d,
    // measured from i's own center.
    let mut contours: Vec<Vec<(f32, f32)>> = vec![Vec::new(); n];
    let mut rel_x = vec![0.0_f32; n];
    for i in (0..n).rev() {
        let half = footprint_w[i] * 0.5;
        let children = nodes[i].children.clone();
        if children.is_empty() {
            contours[i] = vec![(-half, half)];
            continue;
        }

        let mut merged: Vec<(f32, f32)> = Vec::new();
        let mut offsets = Vec::with_capacity(children.len());
        for &c in &children {
            let contour = std::mem::take(&mut contours[c]);
            let offset = if merged.is_empty() {
                0.0
            } else {
                contour
                    .iter()
                    .zip(merged.iter())
                    .map(|(&(left, _), &(_, right))| right - left)
                    .fold(f32::NEG_INFINITY, f32::max)
            };
            for (d, &(left, right)) in contour.iter().enumerate() {
                match merged.get_mut(d) {
                    Some(slot) => slot.1 = right + offset,
                    None => merged.push((left + offset, right + offset)),
                }
            }
            offsets.push(offset);
        }

        let first = offsets[0];
        let last = offsets[offsets.len() - 1];
        let mid = (first + last) * 0.5;
        for (k, &c) in children.iter().enumerate() {
            rel_x[c] = offsets[k] - mid;
        }
        let mut own = Vec::with_capacity(merged.len() + 1);
        own.push((-half, half));
        own.extend(merged.into_iter().map(|(l, r)| (l - mid, r - mid)));
        contours[i] = own;
    }

    // Pre-order: parents are resolved before their children
    for i in 0..n {
        let x = match nodes[i].parent {
            Some(p) => nodes[p].x + rel_x[i],
            None => 0.0,
        };
        nodes[i].x = x;
        nodes[i].y = row_top[nodes[i].depth];
    }
}

fn mark_entering(nodes: &mut [LayoutNode], previous: Option<&TreeLayout>) {
    let Some(previous) = previous else { return };
    for i in 0..nodes.len() {
        if nodes[i].synthetic || previous.get(&nodes[i].name).is_some() {
            continue;
        }
        // Enter from the nearest ancestor that was already on screen
        let mut origin = None;
        let mut cursor = nodes[i].parent;
        while let Some(p) = cursor {
            if let Some(prev) = previous.get(&nodes[p].name).filter(|n| !n.synthetic) {
                origin = Some(prev.top_center());
                break;
            }
            cursor = nodes[p].parent;
        }
        let fallback = match nodes[i].parent {
            Some(p) if !nodes[p].synthetic => nodes[p].top_center(),
            _ => nodes[i].top_center(),
        };
        nodes[i].entering = true;
        nodes[i].enter_from = Some(origin.unwrap_or(fallback));
    }
}
