// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Heuristic canvas layout.
//!
//! Groups are laid out post-order: every child is placed internally first, then its
//! parent arranges its own processors on a lane/row grid, places the child group
//! boxes to the right of a gutter, and finally snaps ports next to their
//! neighbours. The result is an immutable [`PlacedGroup`] tree; [`apply`] folds it
//! back into a fully positioned [`FlowSpec`].
//!
//! Explicit positions are never overridden. Placement does not guarantee an
//! overlap-free canvas; the layout checker reports what remains.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::domain::flow::{
    ConnectableKind, EndpointLookup, FlowSpec, PortSpec, Position, ProcessGroupSpec,
    ProcessorSpec,
};

/// Horizontal distance between processor lanes.
pub const LANE_WIDTH: f64 = 400.0;
/// Vertical distance between processor rows.
pub const ROW_HEIGHT: f64 = 200.0;
pub const GROUP_WIDTH: f64 = 380.0;
pub const GROUP_HEIGHT: f64 = 180.0;
const CELL_WIDTH: f64 = 500.0;
const CELL_HEIGHT: f64 = 300.0;
const PORT_STACK_OFFSET: f64 = 60.0;

/// Positions computed for one group and its descendants.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedGroup {
    pub name: String,
    /// Position of the group box inside its parent; `None` for an unpositioned root
    pub position: Option<Position>,
    pub processors: BTreeMap<String, Position>,
    pub input_ports: BTreeMap<String, Position>,
    pub output_ports: BTreeMap<String, Position>,
    /// Same order as the spec's child groups
    pub children: Vec<PlacedGroup>,
}

pub fn layout(spec: &FlowSpec) -> PlacedGroup {
    place_group(&spec.root, spec.root.position, Some(&spec.root_child_columns))
}

/// Return a copy of the spec where every component has a position.
pub fn apply(spec: &FlowSpec) -> FlowSpec {
    let placed = layout(spec);
    FlowSpec {
        root: apply_group(&spec.root, &placed),
        root_child_columns: spec.root_child_columns.clone(),
    }
}

fn apply_group(spec: &ProcessGroupSpec, placed: &PlacedGroup) -> ProcessGroupSpec {
    let processors = spec
        .processors
        .iter()
        .map(|p| ProcessorSpec {
            position: p.position.or_else(|| placed.processors.get(&p.key).copied()),
            ..p.clone()
        })
        .collect();
    let place_ports = |ports: &[PortSpec], positions: &BTreeMap<String, Position>| -> Vec<PortSpec> {
        ports
            .iter()
            .map(|p| PortSpec {
                position: p.position.or_else(|| positions.get(&p.key).copied()),
                ..p.clone()
            })
            .collect()
    };

    ProcessGroupSpec {
        name: spec.name.clone(),
        position: spec.position.or(placed.position),
        comments: spec.comments.clone(),
        processors,
        connections: spec.connections.clone(),
        input_ports: place_ports(&spec.input_ports, &placed.input_ports),
        output_ports: place_ports(&spec.output_ports, &placed.output_ports),
        child_groups: spec
            .child_groups
            .iter()
            .zip(&placed.children)
            .map(|(child, placed_child)| apply_group(child, placed_child))
            .collect(),
        auto_terminate: spec.auto_terminate.clone(),
    }
}

fn place_group(
    spec: &ProcessGroupSpec,
    position: Option<Position>,
    columns: Option<&BTreeMap<String, usize>>,
) -> PlacedGroup {
    let interiors: Vec<PlacedGroup> = spec
        .child_groups
        .iter()
        .map(|child| place_group(child, child.position, None))
        .collect();

    let mut canvas = Canvas::new(spec);
    canvas.place_routers();
    canvas.propagate();
    canvas.place_remaining();
    let child_positions = canvas.place_children(columns);
    canvas.place_child_wired(&child_positions);
    let input_ports = canvas.place_ports(&spec.input_ports, ConnectableKind::InputPort);
    let output_ports = canvas.place_ports(&spec.output_ports, ConnectableKind::OutputPort);

    PlacedGroup {
        name: spec.name.clone(),
        position,
        processors: canvas.processor_positions(),
        input_ports,
        output_ports,
        children: interiors
            .into_iter()
            .zip(child_positions)
            .map(|(interior, pos)| PlacedGroup {
                position: Some(pos),
                ..interior
            })
            .collect(),
    }
}

type Slot = (i64, i64);

fn to_slot(position: Position) -> Slot {
    (
        (position.x / LANE_WIDTH).round() as i64,
        (position.y / ROW_HEIGHT).round() as i64,
    )
}

fn slot_position(slot: Slot) -> Position {
    Position::new(slot.0 as f64 * LANE_WIDTH, slot.1 as f64 * ROW_HEIGHT)
}

/// A processor wired only to ports of a child group.
struct ChildWiring<'a> {
    child: &'a str,
    feeder: bool,
}

struct Canvas<'a> {
    group: &'a ProcessGroupSpec,
    order: Vec<&'a str>,
    successors: HashMap<&'a str, Vec<&'a str>>,
    predecessors: HashMap<&'a str, Vec<&'a str>>,
    graph_nodes: HashSet<&'a str>,
    child_wired: BTreeMap<&'a str, ChildWiring<'a>>,
    fixed: HashMap<&'a str, Position>,
    slots: HashMap<&'a str, Slot>,
    free: HashMap<&'a str, Position>,
    occupied: HashSet<Slot>,
}

impl<'a> Canvas<'a> {
    fn new(group: &'a ProcessGroupSpec) -> Self {
        let order: Vec<&str> = group.processors.iter().map(|p| p.key.as_str()).collect();
        let mut successors: HashMap<&str, Vec<&str>> =
            order.iter().map(|k| (*k, Vec::new())).collect();
        let mut predecessors: HashMap<&str, Vec<&str>> =
            order.iter().map(|k| (*k, Vec::new())).collect();
        let mut graph_nodes = HashSet::new();
        let mut child_wired = BTreeMap::new();

        for conn in &group.connections {
            let (EndpointLookup::Found(source), EndpointLookup::Found(destination)) = (
                group.resolve_endpoint(&conn.source),
                group.resolve_endpoint(&conn.destination),
            ) else {
                continue;
            };
            let source_is_processor = source.kind == ConnectableKind::Processor;
            let destination_is_processor = destination.kind == ConnectableKind::Processor;

            if source_is_processor && destination_is_processor {
                if source.key == destination.key {
                    continue;
                }
                graph_nodes.insert(source.key);
                graph_nodes.insert(destination.key);
                if let Some(out) = successors.get_mut(source.key) {
                    if !out.contains(&destination.key) {
                        out.push(destination.key);
                    }
                }
                if let Some(inc) = predecessors.get_mut(destination.key) {
                    if !inc.contains(&source.key) {
                        inc.push(source.key);
                    }
                }
            } else if let (true, Some(child)) = (source_is_processor, destination.child_group) {
                child_wired
                    .entry(source.key)
                    .or_insert(ChildWiring { child, feeder: true });
            } else if let (Some(child), true) = (source.child_group, destination_is_processor) {
                child_wired
                    .entry(destination.key)
                    .or_insert(ChildWiring { child, feeder: false });
            }
        }
        child_wired.retain(|key, _| !graph_nodes.contains(key));

        let fixed: HashMap<&str, Position> = group
            .processors
            .iter()
            .filter_map(|p| p.position.map(|pos| (p.key.as_str(), pos)))
            .collect();
        let occupied = fixed.values().map(|p| to_slot(*p)).collect();

        Self {
            group,
            order,
            successors,
            predecessors,
            graph_nodes,
            child_wired,
            fixed,
            slots: HashMap::new(),
            free: HashMap::new(),
            occupied,
        }
    }

    fn slot_of(&self, key: &str) -> Option<Slot> {
        self.slots
            .get(key)
            .copied()
            .or_else(|| self.fixed.get(key).map(|p| to_slot(*p)))
    }

    fn is_placed(&self, key: &str) -> bool {
        self.slots.contains_key(key) || self.fixed.contains_key(key) || self.free.contains_key(key)
    }

    /// Take the first free slot at or below `row` in `lane`.
    fn claim(&mut self, key: &'a str, lane: i64, row: i64) -> Slot {
        let mut row = row;
        while self.occupied.contains(&(lane, row)) {
            row += 1;
        }
        self.occupied.insert((lane, row));
        self.slots.insert(key, (lane, row));
        (lane, row)
    }

    fn next_free_row(&self) -> i64 {
        self.occupied.iter().map(|s| s.1).max().map(|r| r + 1).unwrap_or(0)
    }

    fn place_routers(&mut self) {
        for key in self.order.clone() {
            let successors = self.successors.get(key).cloned().unwrap_or_default();
            if successors.len() < 2 {
                continue;
            }
            let predecessors = self.predecessors.get(key).cloned().unwrap_or_default();
            let single_predecessor = (predecessors.len() == 1).then(|| predecessors[0]);
            let fan_out = successors.len() as i64;

            let (lane, row) = match self.slot_of(key) {
                Some(slot) => slot,
                None => {
                    let lane = match single_predecessor {
                        Some(pred) => self.slot_of(pred).map(|(l, _)| l + 1).unwrap_or(1),
                        None => 0,
                    };
                    let row = self.next_free_row() + (fan_out - 1) / 2;
                    self.claim(key, lane, row)
                }
            };

            if let Some(pred) = single_predecessor {
                if !self.is_placed(pred) {
                    self.claim(pred, lane - 1, row);
                }
            }
            for (i, succ) in successors.into_iter().enumerate() {
                if !self.is_placed(succ) {
                    self.claim(succ, lane + 1, row + i as i64 - (fan_out - 1) / 2);
                }
            }
        }
    }

    /// Pull unplaced graph nodes next to placed neighbours until nothing moves.
    fn propagate(&mut self) {
        loop {
            let mut progress = false;
            for key in self.order.clone() {
                if !self.graph_nodes.contains(key) || self.is_placed(key) {
                    continue;
                }
                let placed_preds: Vec<Slot> = self.predecessors[key]
                    .iter()
                    .filter_map(|p| self.slot_of(p))
                    .collect();
                if let Some(first) = placed_preds.first() {
                    let lane = placed_preds.iter().map(|s| s.0).max().unwrap_or(first.0) + 1;
                    self.claim(key, lane, first.1);
                    progress = true;
                    continue;
                }
                let placed_succs: Vec<Slot> = self.successors[key]
                    .iter()
                    .filter_map(|s| self.slot_of(s))
                    .collect();
                if let Some(first) = placed_succs.first() {
                    let lane = placed_succs.iter().map(|s| s.0).min().unwrap_or(first.0) - 1;
                    self.claim(key, lane, first.1);
                    progress = true;
                }
            }
            if !progress {
                break;
            }
        }
    }

    /// Longest-path columns for whatever is still unplaced; cycle members go last.
    fn place_remaining(&mut self) {
        let remaining: Vec<&'a str> = self
            .order
            .iter()
            .copied()
            .filter(|k| !self.is_placed(k) && !self.child_wired.contains_key(k))
            .collect();
        if remaining.is_empty() {
            return;
        }
        let in_scope: HashSet<&str> = remaining.iter().copied().collect();

        let mut indegree: HashMap<&str, usize> = remaining
            .iter()
            .map(|k| {
                let count = self.predecessors[k].iter().filter(|p| in_scope.contains(*p)).count();
                (*k, count)
            })
            .collect();
        let mut column: HashMap<&str, i64> = HashMap::new();
        let mut queue: VecDeque<&str> = remaining
            .iter()
            .copied()
            .filter(|k| indegree[k] == 0)
            .collect();
        for k in &queue {
            column.insert(*k, 0);
        }

        while let Some(node) = queue.pop_front() {
            let node_column = column[node];
            for succ in &self.successors[node] {
                if !in_scope.contains(succ) {
                    continue;
                }
                let entry = column.entry(*succ).or_insert(0);
                *entry = (*entry).max(node_column + 1);
                if let Some(deg) = indegree.get_mut(succ) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(*succ);
                    }
                }
            }
        }

        let cycle_column = column
            .iter()
            .filter(|(k, _)| indegree[*k] == 0)
            .map(|(_, c)| *c + 1)
            .max()
            .unwrap_or(0);

        let base_row = self.next_free_row();
        let mut rows_used: BTreeMap<i64, i64> = BTreeMap::new();
        for key in remaining {
            let lane = if indegree[key] == 0 { column[key] } else { cycle_column };
            let offset = rows_used.entry(lane).or_insert(0);
            let row = base_row + *offset;
            *offset += 1;
            self.claim(key, lane, row);
        }
    }

    fn own_extent(&self) -> Option<f64> {
        let processor_x = self
            .slots
            .values()
            .map(|s| slot_position(*s).x)
            .chain(self.fixed.values().map(|p| p.x));
        let port_x = self
            .group
            .input_ports
            .iter()
            .chain(self.group.output_ports.iter())
            .filter_map(|p| p.position.map(|pos| pos.x));
        let mut max_x = processor_x.chain(port_x).fold(None, |acc: Option<f64>, x| {
            Some(acc.map_or(x, |a| a.max(x)))
        });
        if !self.group.input_ports.is_empty() {
            max_x = Some(self.input_lane_x().max(max_x.unwrap_or(f64::MIN)));
        }
        if !self.group.output_ports.is_empty() {
            max_x = Some(self.output_lane_x().max(max_x.unwrap_or(f64::MIN)));
        }
        max_x
    }

    fn processor_x_range(&self) -> Option<(f64, f64)> {
        self.slots
            .values()
            .map(|s| slot_position(*s).x)
            .chain(self.fixed.values().map(|p| p.x))
            .fold(None, |acc, x| match acc {
                None => Some((x, x)),
                Some((lo, hi)) => Some((f64::min(lo, x), f64::max(hi, x))),
            })
    }

    fn input_lane_x(&self) -> f64 {
        self.processor_x_range().map(|(lo, _)| lo - LANE_WIDTH).unwrap_or(0.0)
    }

    fn output_lane_x(&self) -> f64 {
        self.processor_x_range()
            .map(|(_, hi)| hi + LANE_WIDTH)
            .unwrap_or(LANE_WIDTH)
    }

    /// Child boxes in a roughly square grid per column bucket, right of the gutter.
    fn place_children(&self, columns: Option<&BTreeMap<String, usize>>) -> Vec<Position> {
        let children = &self.group.child_groups;
        let has_feeders = self.child_wired.values().any(|w| w.feeder);
        let mut gutter_x = self.own_extent().map(|x| x + LANE_WIDTH).unwrap_or(0.0);
        if has_feeders {
            gutter_x += LANE_WIDTH;
        }

        let explicit: Vec<Position> = children.iter().filter_map(|c| c.position).collect();
        let mut buckets: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (idx, child) in children.iter().enumerate() {
            if child.position.is_none() {
                let bucket = columns
                    .and_then(|c| c.get(&child.name))
                    .copied()
                    .unwrap_or(0);
                buckets.entry(bucket).or_default().push(idx);
            }
        }

        let mut positions: Vec<Position> = children
            .iter()
            .map(|c| c.position.unwrap_or(Position::new(gutter_x, 0.0)))
            .collect();
        let mut block_x = gutter_x;
        for members in buckets.values() {
            let width = (members.len() as f64).sqrt().ceil().max(1.0) as usize;
            for (i, idx) in members.iter().enumerate() {
                let x = block_x + (i % width) as f64 * CELL_WIDTH;
                let mut y = (i / width) as f64 * CELL_HEIGHT;
                while explicit
                    .iter()
                    .any(|p| (p.x - x).abs() < CELL_WIDTH / 2.0 && (p.y - y).abs() < CELL_HEIGHT / 2.0)
                {
                    y += CELL_HEIGHT;
                }
                positions[*idx] = Position::new(x, y);
            }
            block_x += width as f64 * CELL_WIDTH;
        }
        positions
    }

    /// Feeders one lane left of their child box, consumers one lane right, stacked.
    fn place_child_wired(&mut self, child_positions: &[Position]) {
        let mut stacked: HashMap<(&str, bool), usize> = HashMap::new();
        let wired: Vec<(&'a str, &'a str, bool)> = self
            .child_wired
            .iter()
            .map(|(k, w)| (*k, w.child, w.feeder))
            .collect();
        let order = self.order.clone();
        for key in order {
            let Some((_, child, feeder)) = wired.iter().find(|(k, _, _)| *k == key).copied() else {
                continue;
            };
            if self.is_placed(key) {
                continue;
            }
            let Some(child_idx) = self.group.child_groups.iter().position(|c| c.name == child) else {
                continue;
            };
            let anchor = child_positions[child_idx];
            let count = stacked.entry((child, feeder)).or_insert(0);
            let x = if feeder { anchor.x - LANE_WIDTH } else { anchor.x + LANE_WIDTH };
            let y = anchor.y + *count as f64 * ROW_HEIGHT;
            *count += 1;
            self.free.insert(key, Position::new(x, y));
        }
    }

    fn position_of(&self, key: &str) -> Option<Position> {
        self.fixed
            .get(key)
            .copied()
            .or_else(|| self.slots.get(key).map(|s| slot_position(*s)))
            .or_else(|| self.free.get(key).copied())
    }

    fn port_neighbours(&self, port_key: &str, kind: ConnectableKind) -> Vec<Position> {
        self.group
            .connections
            .iter()
            .filter_map(|conn| {
                let (near, far) = match kind {
                    ConnectableKind::InputPort => (&conn.source, &conn.destination),
                    _ => (&conn.destination, &conn.source),
                };
                if near != port_key {
                    return None;
                }
                match self.group.resolve_endpoint(far) {
                    EndpointLookup::Found(e) if e.kind == ConnectableKind::Processor => {
                        self.position_of(e.key)
                    }
                    _ => None,
                }
            })
            .collect()
    }

    /// Ports snap to the row of their neighbours; ports sharing a row are stacked.
    fn place_ports(&self, ports: &[PortSpec], kind: ConnectableKind) -> BTreeMap<String, Position> {
        let x = match kind {
            ConnectableKind::InputPort => self.input_lane_x(),
            _ => self.output_lane_x(),
        };
        let mut placed = BTreeMap::new();
        let mut rows_used: BTreeMap<i64, usize> = BTreeMap::new();
        let mut detached = Vec::new();

        for port in ports {
            if let Some(pos) = port.position {
                rows_used.entry((pos.y / ROW_HEIGHT).round() as i64).or_insert(1);
                placed.insert(port.key.clone(), pos);
                continue;
            }
            let neighbours = self.port_neighbours(&port.key, kind);
            if neighbours.is_empty() {
                detached.push(port);
                continue;
            }
            let mean_y = neighbours.iter().map(|p| p.y).sum::<f64>() / neighbours.len() as f64;
            let row = (mean_y / ROW_HEIGHT).round() as i64;
            let stacked = rows_used.entry(row).or_insert(0);
            let y = row as f64 * ROW_HEIGHT + *stacked as f64 * PORT_STACK_OFFSET;
            *stacked += 1;
            placed.insert(port.key.clone(), Position::new(x, y));
        }

        let mut row = 0;
        for port in detached {
            while rows_used.contains_key(&row) {
                row += 1;
            }
            rows_used.insert(row, 1);
            placed.insert(port.key.clone(), Position::new(x, row as f64 * ROW_HEIGHT));
        }
        placed
    }

    fn processor_positions(&self) -> BTreeMap<String, Position> {
        self.order
            .iter()
            .filter_map(|k| self.position_of(k).map(|p| (k.to_string(), p)))
            .collect()
    }
}
