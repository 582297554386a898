//! Solidification tracking and casting defect criteria.
//!
//! The tracker follows each node through the solidus crossing and records
//! when it happened, how fast the node was cooling and how steep the local
//! thermal gradient was. From that it derives hotspots (last regions to
//! freeze), Niyama porosity risk and isolated pools that need feeding.
//!
//! Hotspot clusters rank nodes by a blend of late freezing and low Niyama
//! value. Each cluster gets a gate candidate on the nearest part surface.

use std::collections::VecDeque;

use log::debug;
use serde::Serialize;

use crate::error::{Result, SimError};
use crate::geom::mesh::tetrahedralize::TetrahedralMesh;
use crate::geom::tetrahedron::shape_gradients;
use crate::sim::config::{DefectCriteria, SimulationConfig};
use crate::sim::materials::Material;
use crate::sim::result::TimestepFrame;
use crate::{Point, Vector};

/// A node among the last to solidify.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotspotRecord {
    pub node_id: usize,
    pub location: Point,
    /// Time the node crossed the solidus, or the last observed time.
    pub solidification_time: f64,
    pub solidified: bool,
    pub final_temperature: f64,
}

/// A node whose Niyama value fell below the critical threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PorosityZone {
    pub node_id: usize,
    pub location: Point,
    pub niyama_value: f64,
    /// `(critical - N) / critical`, in (0, 1].
    pub severity: f64,
}

/// A connected group of hotspot nodes far from every other group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedingIssue {
    pub cluster_id: usize,
    pub node_ids: Vec<usize>,
    pub centroid: Point,
    /// Distance to the nearest other cluster centroid, in model units.
    pub isolation_distance: f64,
    pub severity: f64,
}

/// Connected nodes whose combined score is above the cluster quantile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotspotCluster {
    pub cluster_id: usize,
    pub node_ids: Vec<usize>,
    pub centroid: Point,
    /// Mean score of the members, in [0, 1].
    pub severity: f64,
}

/// Suggested gate or feeder pad on the part surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateCandidate {
    /// Surface node the pad is centred on.
    pub node_id: usize,
    pub point: Point,
    /// Unit outward normal at `point`.
    pub normal: Vector,
    pub pad_diameter: f64,
    /// `cluster_id` of the cluster this gate feeds.
    pub feeds_cluster: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShrinkageEstimate {
    pub shrinkage_percentage: f64,
    /// Casting volume in model units cubed.
    pub total_volume: f64,
    pub shrinkage_volume: f64,
}

/// Defects derived from a sequence of frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DefectSummary {
    pub hotspots: Vec<HotspotRecord>,
    pub porosity_zones: Vec<PorosityZone>,
    pub feeding_issues: Vec<FeedingIssue>,
    pub clusters: Vec<HotspotCluster>,
    pub gate_candidates: Vec<GateCandidate>,
    pub shrinkage_estimate: ShrinkageEstimate,
    /// Per-node solidification time (last observed time if never solid).
    #[serde(skip)]
    pub solidification_time: Vec<f64>,
    /// Per-node Niyama value, `None` until the node solidifies.
    #[serde(skip)]
    pub niyama: Vec<Option<f64>>,
}

impl DefectSummary {
    pub fn defect_count(&self) -> usize {
        self.hotspots.len() + self.porosity_zones.len() + self.feeding_issues.len()
    }
}

/// Per-frame defect indicators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameDefects {
    pub hotspot_nodes: Vec<usize>,
    pub porosity_risk_nodes: Vec<usize>,
}

/// Incremental solidification bookkeeping over a tet mesh.
pub struct SolidificationTracker {
    positions: Vec<Point>,
    tets: Vec<[usize; 4]>,
    /// P1 shape gradients per tet, in 1/mm.
    gradients: Vec<[Vector; 4]>,
    tet_volumes: Vec<f64>,
    node_tets: Vec<Vec<usize>>,
    neighbours: Vec<Vec<usize>>,
    /// Boundary nodes in id order with their unit outward normals.
    surface: Vec<(usize, Vector)>,
    total_volume: f64,
    material: Material,
    criteria: DefectCriteria,
    last_time: Option<f64>,
    last_temps: Vec<f64>,
    solidified_at: Vec<Option<f64>>,
    niyama: Vec<Option<f64>>,
}

impl SolidificationTracker {
    /// Prepares the geometric data. `config.length_scale` converts model
    /// units to metres; gradients are reported in K/mm.
    pub fn new(
        mesh: &TetrahedralMesh,
        material: &Material,
        config: &SimulationConfig,
    ) -> Result<Self> {
        let mm_per_unit = config.length_scale * 1000.0;
        let n = mesh.node_count();
        let mut tets = Vec::with_capacity(mesh.tetrahedra_count());
        let mut gradients = Vec::with_capacity(mesh.tetrahedra_count());
        let mut tet_volumes = Vec::with_capacity(mesh.tetrahedra_count());
        let mut node_tets = vec![Vec::new(); n];

        for (e, tet) in mesh.tetrahedra.iter().enumerate() {
            let grads = shape_gradients(mesh.points(tet))
                .ok_or_else(|| SimError::Geometry(format!("tetrahedron {e} is degenerate")))?;
            for node in tet.nodes() {
                node_tets[node].push(e);
            }
            tets.push(tet.nodes());
            gradients.push(grads.map(|g| g / mm_per_unit));
            tet_volumes.push(mesh.tet_volume(tet));
        }

        let mut normal_sums = vec![Vector::default(); n];
        let mut on_surface = vec![false; n];
        for face in mesh.boundary_faces() {
            let [a, b, c] = face.nodes.map(|i| mesh.nodes[i]);
            if let Some(normal) = Vector::normal(a, b, c) {
                for i in face.nodes {
                    normal_sums[i] += normal;
                    on_surface[i] = true;
                }
            }
        }
        let surface = (0..n)
            .filter(|&i| on_surface[i])
            .filter_map(|i| normal_sums[i].normalize().map(|v| (i, v)))
            .collect();

        Ok(Self {
            positions: mesh.nodes.clone(),
            tets,
            gradients,
            total_volume: tet_volumes.iter().sum(),
            tet_volumes,
            node_tets,
            neighbours: mesh.node_neighbours(),
            surface,
            material: material.clone(),
            criteria: config.defects,
            last_time: None,
            last_temps: Vec::new(),
            solidified_at: vec![None; n],
            niyama: vec![None; n],
        })
    }

    pub fn node_count(&self) -> usize {
        self.positions.len()
    }

    /// Feeds the temperature field at `time`. Times must strictly increase.
    pub fn observe(&mut self, time: f64, temps: &[f64]) -> Result<FrameDefects> {
        if temps.len() != self.node_count() {
            return Err(SimError::InvalidInput(format!(
                "frame at t={time} has {} temperatures, mesh has {} nodes",
                temps.len(),
                self.node_count()
            )));
        }
        if let Some(last) = self.last_time {
            if !(time > last) {
                return Err(SimError::InvalidInput(format!(
                    "frame times must increase ({time} after {last})"
                )));
            }
        }

        let solidus = self.material.solidus;
        let floor = self.criteria.min_cooling_rate;
        for i in 0..temps.len() {
            if self.solidified_at[i].is_some() || temps[i] >= solidus {
                continue;
            }
            let (t_s, rate) = match self.last_time {
                Some(t_prev) if self.last_temps[i] >= solidus => {
                    let drop = self.last_temps[i] - temps[i];
                    let span = time - t_prev;
                    let frac = (self.last_temps[i] - solidus) / drop;
                    (t_prev + frac * span, (drop / span).max(floor))
                }
                // Already below solidus when first seen
                _ => (time, floor),
            };
            let g = self.nodal_gradient(i, temps);
            self.solidified_at[i] = Some(t_s);
            self.niyama[i] = Some(g / rate.sqrt());
        }

        self.last_time = Some(time);
        self.last_temps = temps.to_vec();

        Ok(FrameDefects {
            hotspot_nodes: self.frame_hotspots(temps),
            porosity_risk_nodes: self.risk_nodes(),
        })
    }

    /// Volume-weighted average of the gradients of the tets around `node`,
    /// as a magnitude in K/mm.
    fn nodal_gradient(&self, node: usize, temps: &[f64]) -> f64 {
        let mut sum = Vector::default();
        let mut weight = 0.0;
        for &e in &self.node_tets[node] {
            let mut g = Vector::default();
            for (a, &n) in self.tets[e].iter().enumerate() {
                g += self.gradients[e][a] * temps[n];
            }
            sum += g * self.tet_volumes[e];
            weight += self.tet_volumes[e];
        }
        if weight > 0.0 {
            (sum / weight).length()
        } else {
            0.0
        }
    }

    fn frame_hotspots(&self, temps: &[f64]) -> Vec<usize> {
        let liquidus = self.material.liquidus;
        if temps.iter().all(|t| *t > liquidus) {
            return Vec::new();
        }
        (0..temps.len()).filter(|&i| temps[i] > liquidus).collect()
    }

    fn risk_nodes(&self) -> Vec<usize> {
        let critical = self.material.niyama_critical;
        self.niyama
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.filter(|v| *v < critical).map(|_| i))
            .collect()
    }

    /// Derives the defect summary from everything observed so far.
    pub fn summarize(&self) -> DefectSummary {
        let last_time = self.last_time.unwrap_or(0.0);
        let solidification_time: Vec<f64> = self
            .solidified_at
            .iter()
            .map(|t| t.unwrap_or(last_time))
            .collect();
        let hotspots = if self.last_time.is_some() {
            self.hotspots(&solidification_time)
        } else {
            Vec::new()
        };
        let hotspot_ids: Vec<usize> = hotspots.iter().map(|h| h.node_id).collect();
        let feeding_issues = self.feeding_issues(&hotspot_ids);
        let porosity_zones = self.porosity_zones();
        let clusters = if self.last_time.is_some() {
            self.scored_clusters(&solidification_time)
        } else {
            Vec::new()
        };
        let gate_candidates = self.gate_candidates(&clusters, &solidification_time);

        let pct = self.material.shrinkage_percent;
        let summary = DefectSummary {
            hotspots,
            porosity_zones,
            feeding_issues,
            clusters,
            gate_candidates,
            shrinkage_estimate: ShrinkageEstimate {
                shrinkage_percentage: pct,
                total_volume: self.total_volume,
                shrinkage_volume: self.total_volume * pct / 100.0,
            },
            solidification_time,
            niyama: self.niyama.clone(),
        };
        debug!(
            "Defects: {} hotspots, {} porosity zones, {} feeding issues, {} clusters",
            summary.hotspots.len(),
            summary.porosity_zones.len(),
            summary.feeding_issues.len(),
            summary.clusters.len()
        );
        summary
    }

    fn hotspots(&self, solidification_time: &[f64]) -> Vec<HotspotRecord> {
        let n = self.node_count();
        if n == 0 {
            return Vec::new();
        }
        let count = ((self.criteria.hotspot_fraction * n as f64).ceil() as usize).clamp(1, n);

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            match (self.solidified_at[a], self.solidified_at[b]) {
                (None, None) => self.last_temps[b].total_cmp(&self.last_temps[a]),
                (None, Some(_)) => std::cmp::Ordering::Less,
                (Some(_), None) => std::cmp::Ordering::Greater,
                (Some(ta), Some(tb)) => tb.total_cmp(&ta),
            }
            .then(a.cmp(&b))
        });

        order
            .into_iter()
            .take(count)
            .map(|i| HotspotRecord {
                node_id: i,
                location: self.positions[i],
                solidification_time: solidification_time[i],
                solidified: self.solidified_at[i].is_some(),
                final_temperature: self.last_temps[i],
            })
            .collect()
    }

    fn porosity_zones(&self) -> Vec<PorosityZone> {
        let critical = self.material.niyama_critical;
        let mut zones: Vec<PorosityZone> = self
            .risk_nodes()
            .into_iter()
            .filter_map(|i| {
                self.niyama[i].map(|value| PorosityZone {
                    node_id: i,
                    location: self.positions[i],
                    niyama_value: value,
                    severity: (critical - value) / critical,
                })
            })
            .collect();
        zones.sort_by(|a, b| {
            b.severity
                .total_cmp(&a.severity)
                .then(a.node_id.cmp(&b.node_id))
        });
        zones.truncate(self.criteria.max_porosity_zones);
        zones
    }

    /// Groups hotspot nodes connected through tet edges.
    fn clusters(&self, hotspot_ids: &[usize]) -> Vec<Vec<usize>> {
        let mut is_hot = vec![false; self.node_count()];
        for &i in hotspot_ids {
            is_hot[i] = true;
        }
        let mut seeds = hotspot_ids.to_vec();
        seeds.sort_unstable();

        let mut visited = vec![false; self.node_count()];
        let mut clusters = Vec::new();
        for seed in seeds {
            if visited[seed] {
                continue;
            }
            visited[seed] = true;
            let mut queue = VecDeque::from([seed]);
            let mut members = Vec::new();
            while let Some(node) = queue.pop_front() {
                members.push(node);
                for &nb in &self.neighbours[node] {
                    if is_hot[nb] && !visited[nb] {
                        visited[nb] = true;
                        queue.push_back(nb);
                    }
                }
            }
            members.sort_unstable();
            clusters.push(members);
        }
        clusters
    }

    fn feeding_issues(&self, hotspot_ids: &[usize]) -> Vec<FeedingIssue> {
        let clusters = self.clusters(hotspot_ids);
        if clusters.len() < 2 {
            return Vec::new();
        }
        let centroids: Vec<Point> = clusters.iter().map(|m| self.centroid(m)).collect();

        let threshold = self.criteria.feeding_isolation_distance;
        let mut issues = Vec::new();
        for (id, members) in clusters.iter().enumerate() {
            let nearest = centroids
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != id)
                .map(|(_, c)| c.distance(&centroids[id]))
                .fold(f64::INFINITY, f64::min);
            if nearest > threshold {
                issues.push(FeedingIssue {
                    cluster_id: id,
                    node_ids: members.clone(),
                    centroid: centroids[id],
                    isolation_distance: nearest,
                    severity: nearest / threshold,
                });
            }
        }
        issues
    }

    fn centroid(&self, members: &[usize]) -> Point {
        let mut sum = Vector::default();
        for &i in members {
            sum += Vector::from_a_point(self.positions[i]);
        }
        let c = sum / members.len() as f64;
        Point::new(c.dx, c.dy, c.dz)
    }

    /// Per-node score `w * late + (1 - w) * (1 - niyama)`, both terms
    /// normalized to [0, 1]. Nodes without a Niyama value count as the
    /// least porous.
    fn scores(&self, solidification_time: &[f64]) -> Vec<f64> {
        let fill = self
            .niyama
            .iter()
            .flatten()
            .copied()
            .reduce(f64::max)
            .unwrap_or(0.0);
        let niyama: Vec<f64> = self.niyama.iter().map(|v| v.unwrap_or(fill)).collect();
        let late = normalized(solidification_time);
        let porous = normalized(&niyama);
        let w = self.criteria.cluster_freeze_weight;
        late.iter()
            .zip(&porous)
            .map(|(t, n)| w * t + (1.0 - w) * (1.0 - n))
            .collect()
    }

    /// Clusters of nodes scoring at or above the cluster quantile, most
    /// severe first.
    fn scored_clusters(&self, solidification_time: &[f64]) -> Vec<HotspotCluster> {
        if self.node_count() == 0 {
            return Vec::new();
        }
        let scores = self.scores(solidification_time);
        let threshold = quantile(&scores, self.criteria.cluster_quantile);
        let selected: Vec<usize> = (0..scores.len())
            .filter(|&i| scores[i] >= threshold)
            .collect();

        let mut clusters: Vec<HotspotCluster> = self
            .clusters(&selected)
            .into_iter()
            .map(|members| HotspotCluster {
                cluster_id: 0,
                centroid: self.centroid(&members),
                severity: members.iter().map(|&i| scores[i]).sum::<f64>() / members.len() as f64,
                node_ids: members,
            })
            .collect();
        clusters.sort_by(|a, b| {
            b.severity
                .total_cmp(&a.severity)
                .then(a.node_ids[0].cmp(&b.node_ids[0]))
        });
        for (id, cluster) in clusters.iter_mut().enumerate() {
            cluster.cluster_id = id;
        }
        clusters
    }

    /// One gate per cluster, at the surface node nearest to the cluster's
    /// last-freezing node.
    fn gate_candidates(
        &self,
        clusters: &[HotspotCluster],
        solidification_time: &[f64],
    ) -> Vec<GateCandidate> {
        if self.surface.is_empty() {
            return Vec::new();
        }
        let pad_diameter = (self.criteria.min_gate_diameter * 1.2).max(5.0);
        clusters
            .iter()
            .filter_map(|cluster| {
                let source = cluster.node_ids.iter().copied().reduce(|best, i| {
                    if solidification_time[i] > solidification_time[best] {
                        i
                    } else {
                        best
                    }
                })?;
                let origin = self.positions[source];
                let (node_id, normal) = self.surface.iter().copied().reduce(|best, cand| {
                    let d_best = self.positions[best.0].distance(&origin);
                    if self.positions[cand.0].distance(&origin) < d_best {
                        cand
                    } else {
                        best
                    }
                })?;
                Some(GateCandidate {
                    node_id,
                    point: self.positions[node_id],
                    normal,
                    pad_diameter,
                    feeds_cluster: cluster.cluster_id,
                })
            })
            .collect()
    }
}

/// Min-max scaling to [0, 1].
fn normalized(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = (max - min).max(1e-9);
    values.iter().map(|v| (v - min) / span).collect()
}

/// Quantile with linear interpolation between order statistics.
fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Offline defect analysis over a stored frame sequence.
pub struct DefectAnalyzer;

impl DefectAnalyzer {
    /// Replays `frames` through a fresh tracker. Calling it twice on the same
    /// frames gives the same summary.
    pub fn analyze(
        frames: &[TimestepFrame],
        mesh: &TetrahedralMesh,
        material: &Material,
        config: &SimulationConfig,
    ) -> Result<DefectSummary> {
        if frames.is_empty() {
            return Err(SimError::InvalidInput(
                "defect analysis needs at least one frame".to_string(),
            ));
        }
        let mut tracker = SolidificationTracker::new(mesh, material, config)?;
        for frame in frames {
            tracker.observe(frame.time, &frame.temperature)?;
        }
        Ok(tracker.summarize())
    }
}
