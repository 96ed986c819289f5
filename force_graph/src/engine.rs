//! Spring layout integrator
//!
//! One `update` call is one explicit Euler step with damping, the same scheme
//! an N-body step uses: accumulate every force from the start-of-frame
//! positions, then advance velocities and positions together.

use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};

/// Values per qubit in a Bloch packet: `[p0, p1, x, y, z, r, θ, φ]`
pub const BLOCH_STRIDE: usize = 8;

/// Distances below this count as coincident
const COINCIDENT: f32 = 1e-6;

/// Mutual information below this exerts no spring force
const MI_FLOOR: f64 = 1e-6;

/// Number of unordered pairs among `n` nodes
pub fn pair_count(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

/// Position of pair (i, j) in an upper-triangular array `[01, 02, …, 12, 13, …]`
pub fn pair_index(i: usize, j: usize, n: usize) -> Option<usize> {
    if i == j || i >= n || j >= n {
        return None;
    }
    let (row, col) = if i < j { (i, j) } else { (j, i) };
    Some(row * n - row * (row + 1) / 2 + (col - row - 1))
}

/// Layout tunables
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceParams {
    pub purity_radial_spring: f32,
    pub phase_angular_spring: f32,
    pub correlation_spring: f32,
    pub mi_spring: f32,
    pub repulsion_strength: f32,
    pub damping: f32,
    pub base_distance: f32,
    pub min_distance: f32,
    pub correlation_scaling: f32,
    pub max_biome_radius: f32,
}

impl Default for ForceParams {
    fn default() -> Self {
        Self {
            purity_radial_spring: 0.08,
            phase_angular_spring: 0.04,
            correlation_spring: 0.12,
            mi_spring: 0.18,
            repulsion_strength: 1500.0,
            damping: 0.89,
            base_distance: 120.0,
            min_distance: 15.0,
            correlation_scaling: 3.0,
            max_biome_radius: 250.0,
        }
    }
}

/// The part of a qubit's Bloch data the layout cares about
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NodeObservable {
    /// Bloch vector length, 1 for a pure single-qubit marginal
    pub bloch_radius: f32,
    /// Azimuthal angle φ of the Bloch vector
    pub phase: f32,
}

impl NodeObservable {
    /// Unpack a stride-8 Bloch packet. A trailing partial record is ignored.
    pub fn from_bloch_packet(packet: &[f64]) -> Vec<Self> {
        packet
            .chunks_exact(BLOCH_STRIDE)
            .map(|chunk| Self {
                bloch_radius: chunk[5].clamp(0.0, 1.0) as f32,
                phase: chunk[7] as f32,
            })
            .collect()
    }
}

/// Positions and velocities of one biome's nodes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeLayout {
    pub center: Vec2,
    pub positions: Vec<Vec2>,
    pub velocities: Vec<Vec2>,
    pub frozen: Vec<bool>,
}

impl NodeLayout {
    /// `count` nodes at rest on a small ring around `center`
    pub fn new(center: Vec2, count: usize) -> Self {
        let mut layout = Self {
            center,
            ..Default::default()
        };
        layout.resize(count);
        layout
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Grow or shrink to `count` nodes. Existing nodes keep their state.
    pub fn resize(&mut self, count: usize) {
        let start = self.positions.len();
        for i in start..count {
            let angle = i as f32 * 2.399_963; // golden angle
            let radius = 20.0 + 6.0 * i as f32;
            self.positions
                .push(self.center + Vec2::new(angle.cos(), angle.sin()) * radius);
        }
        self.positions.truncate(count);
        self.velocities.resize(count, Vec2::ZERO);
        self.frozen.resize(count, false);
    }

    pub fn set_frozen(&mut self, node: usize, frozen: bool) {
        if let Some(flag) = self.frozen.get_mut(node) {
            *flag = frozen;
        }
    }

    /// Positions as interleaved `[x, y, x, y, …]`
    pub fn positions_flat(&self) -> &[f32] {
        bytemuck::cast_slice(&self.positions)
    }

    /// Velocities as interleaved `[x, y, x, y, …]`
    pub fn velocities_flat(&self) -> &[f32] {
        bytemuck::cast_slice(&self.velocities)
    }

    fn is_frozen(&self, node: usize) -> bool {
        self.frozen.get(node).copied().unwrap_or(false)
    }
}

/// Observable inputs for one layout step
#[derive(Debug, Clone, Copy, Default)]
pub struct LayoutInputs<'a> {
    pub bloch_packet: &'a [f64],
    /// Pairwise mutual information, upper-triangular order
    pub mutual_information: &'a [f64],
    /// Pairwise connected ZZ correlation, upper-triangular order
    pub correlations: &'a [f64],
}

#[derive(Debug, Clone, Default)]
pub struct ForceGraphEngine {
    pub params: ForceParams,
}

impl ForceGraphEngine {
    pub fn new(params: ForceParams) -> Self {
        Self { params }
    }

    /// Advance the layout by `dt`
    pub fn update(&self, layout: &mut NodeLayout, inputs: LayoutInputs<'_>, dt: f32) {
        let n = layout.len();
        if n == 0 {
            return;
        }
        if layout.velocities.len() != n || layout.frozen.len() != n {
            layout.velocities.resize(n, Vec2::ZERO);
            layout.frozen.resize(n, false);
        }

        let nodes = NodeObservable::from_bloch_packet(inputs.bloch_packet);
        let forces: Vec<Vec2> = (0..n)
            .map(|i| {
                if layout.is_frozen(i) {
                    Vec2::ZERO
                } else {
                    self.net_force(i, layout, &nodes, &inputs)
                }
            })
            .collect();

        let damping = self.params.damping;
        for (i, force) in forces.into_iter().enumerate() {
            if layout.is_frozen(i) {
                continue;
            }
            let velocity = (layout.velocities[i] + force * dt) * damping;
            layout.velocities[i] = velocity;
            layout.positions[i] += velocity * dt;
        }

        log::trace!("layout step: {n} nodes, dt={dt}");
    }

    fn net_force(
        &self,
        i: usize,
        layout: &NodeLayout,
        nodes: &[NodeObservable],
        inputs: &LayoutInputs<'_>,
    ) -> Vec2 {
        let mut force = Vec2::ZERO;

        if let Some(node) = nodes.get(i) {
            force += self.purity_radial_force(layout.positions[i], layout.center, node);
            force += self.phase_angular_force(layout.positions[i], layout.center, node);
        }

        let n = layout.len();
        for j in 0..n {
            if j == i || layout.is_frozen(j) {
                continue;
            }
            let pair = pair_index(i, j, n);
            let mi = pair.and_then(|k| inputs.mutual_information.get(k)).copied();
            let corr = pair.and_then(|k| inputs.correlations.get(k)).copied();

            force += self.pair_force(i, layout.positions[i], layout.positions[j], mi, corr);
        }
        force
    }

    /// Pure marginals sit at the center, maximally mixed ones at the rim
    fn purity_radial_force(&self, position: Vec2, center: Vec2, node: &NodeObservable) -> Vec2 {
        let target = self.params.max_biome_radius * (1.0 - node.bloch_radius);
        let delta = position - center;
        let radius = delta.length();

        if radius < COINCIDENT {
            if target > 1.0 {
                return Vec2::X * self.params.purity_radial_spring * target;
            }
            return Vec2::ZERO;
        }
        (delta / radius) * self.params.purity_radial_spring * (target - radius)
    }

    /// Tangential pull toward the angle given by the Bloch phase
    fn phase_angular_force(&self, position: Vec2, center: Vec2, node: &NodeObservable) -> Vec2 {
        let delta = position - center;
        let radius = delta.length();
        if radius < COINCIDENT {
            return Vec2::ZERO;
        }

        let current = delta.y.atan2(delta.x);
        let mut error = (node.phase - current) % TAU;
        if error > PI {
            error -= TAU;
        } else if error < -PI {
            error += TAU;
        }

        let tangent = Vec2::new(-delta.y, delta.x) / radius;
        tangent * self.params.phase_angular_spring * error * radius
    }

    fn pair_force(
        &self,
        i: usize,
        position: Vec2,
        other: Vec2,
        mi: Option<f64>,
        correlation: Option<f64>,
    ) -> Vec2 {
        let p = &self.params;
        let delta = other - position;
        let dist = delta.length();

        if dist < COINCIDENT {
            // Deterministic kick so coincident nodes separate
            let sx = if i % 2 == 0 { 1.0 } else { -1.0 };
            let sy = if (i / 2) % 2 == 0 { 1.0 } else { -1.0 };
            return Vec2::new(sx, sy).normalize() * p.repulsion_strength;
        }
        let toward = delta / dist;
        let mut force = -toward * (p.repulsion_strength / (dist * dist));

        if let Some(mi) = mi.filter(|m| *m >= MI_FLOOR) {
            let target =
                (p.base_distance / (1.0 + p.correlation_scaling * mi as f32)).max(p.min_distance);
            force += toward * p.mi_spring * (dist - target);
        }

        // Positive correlation attracts, negative repels; bounded by base distance
        if let Some(c) = correlation.filter(|c| c.is_finite()) {
            force += toward * p.correlation_spring * c as f32 * dist.min(p.base_distance);
        }

        force
    }
}
