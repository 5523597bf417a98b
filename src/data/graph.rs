//! Graph blocks over entities (spots or cells).
//!
//! Edges are kept host-side for construction and sampling, and mirrored as an
//! `[2, E]` index tensor (row 0 = source, row 1 = target) on the model device.

use std::collections::BTreeSet;

use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::Rng;
use tch::{Device, Kind, Tensor};
use tracing::debug;

use crate::error::{Result, StandsError};

/// Directed graph over `num_nodes` entities, messages flow source -> target
#[derive(Debug)]
pub struct GraphBlock {
    sources: Vec<i64>,
    targets: Vec<i64>,
    weights: Option<Vec<f32>>,
    num_nodes: i64,
    edge_index: Tensor,
    edge_weight: Option<Tensor>,
}

impl Clone for GraphBlock {
    fn clone(&self) -> Self {
        Self {
            sources: self.sources.clone(),
            targets: self.targets.clone(),
            weights: self.weights.clone(),
            num_nodes: self.num_nodes,
            edge_index: self.edge_index.shallow_clone(),
            edge_weight: self.edge_weight.as_ref().map(Tensor::shallow_clone),
        }
    }
}

impl GraphBlock {
    /// Build a graph from parallel source / target lists.
    pub fn from_edges(
        sources: &[i64],
        targets: &[i64],
        num_nodes: i64,
        device: Device,
    ) -> Result<Self> {
        Self::build(sources.to_vec(), targets.to_vec(), None, num_nodes, device)
    }

    /// Build a weighted graph; one weight per edge.
    pub fn from_weighted_edges(
        sources: &[i64],
        targets: &[i64],
        weights: &[f32],
        num_nodes: i64,
        device: Device,
    ) -> Result<Self> {
        if weights.len() != sources.len() {
            return Err(StandsError::InvalidGraph(format!(
                "{} edge weights for {} edges",
                weights.len(),
                sources.len()
            )));
        }
        Self::build(
            sources.to_vec(),
            targets.to_vec(),
            Some(weights.to_vec()),
            num_nodes,
            device,
        )
    }

    /// Spatial k-nearest-neighbour graph over spot coordinates.
    ///
    /// Every spot is linked in both directions to its `k` closest spots
    /// (Euclidean), and self loops are added.
    pub fn knn_from_coordinates(coords: &Array2<f64>, k: usize, device: Device) -> Result<Self> {
        let n = coords.nrows();
        if n == 0 {
            return Err(StandsError::InvalidGraph("no coordinates".to_string()));
        }

        let mut edges = BTreeSet::new();
        for i in 0..n {
            let mut dists_with_idx: Vec<(usize, f64)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| {
                    let d: f64 = coords
                        .row(i)
                        .iter()
                        .zip(coords.row(j).iter())
                        .map(|(a, b)| (a - b).powi(2))
                        .sum();
                    (j, d)
                })
                .collect();

            dists_with_idx.sort_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.0.cmp(&b.0))
            });

            for (j, _) in dists_with_idx.iter().take(k) {
                edges.insert((*j as i64, i as i64));
                edges.insert((i as i64, *j as i64));
            }
        }

        let (sources, targets): (Vec<i64>, Vec<i64>) = edges.into_iter().unzip();
        debug!("kNN graph: {} nodes, {} edges (k={})", n, sources.len(), k);

        Self::build(sources, targets, None, n as i64, device).map(|g| g.with_self_loops())
    }

    fn build(
        sources: Vec<i64>,
        targets: Vec<i64>,
        weights: Option<Vec<f32>>,
        num_nodes: i64,
        device: Device,
    ) -> Result<Self> {
        if sources.len() != targets.len() {
            return Err(StandsError::InvalidGraph(format!(
                "{} sources but {} targets",
                sources.len(),
                targets.len()
            )));
        }
        if num_nodes <= 0 {
            return Err(StandsError::InvalidGraph(format!(
                "graph must contain at least one node, got {}",
                num_nodes
            )));
        }
        if let Some(bad) = sources
            .iter()
            .chain(targets.iter())
            .find(|&&idx| idx < 0 || idx >= num_nodes)
        {
            return Err(StandsError::InvalidGraph(format!(
                "edge references node {} but only {} nodes exist",
                bad, num_nodes
            )));
        }

        Ok(Self::assemble(sources, targets, weights, num_nodes, device))
    }

    fn assemble(
        sources: Vec<i64>,
        targets: Vec<i64>,
        weights: Option<Vec<f32>>,
        num_nodes: i64,
        device: Device,
    ) -> Self {
        let edge_index = Tensor::stack(
            &[Tensor::from_slice(&sources), Tensor::from_slice(&targets)],
            0,
        )
        .to_device(device);
        let edge_weight = weights
            .as_ref()
            .map(|w| Tensor::from_slice(w).to_kind(Kind::Float).to_device(device));

        Self {
            sources,
            targets,
            weights,
            num_nodes,
            edge_index,
            edge_weight,
        }
    }

    /// Same graph with one self loop per node (existing self loops are replaced).
    pub fn with_self_loops(&self) -> Self {
        let mut sources = Vec::with_capacity(self.sources.len() + self.num_nodes as usize);
        let mut targets = Vec::with_capacity(sources.capacity());
        let mut weights = self.weights.as_ref().map(|_| Vec::with_capacity(sources.capacity()));

        for (e, (&s, &t)) in self.sources.iter().zip(&self.targets).enumerate() {
            if s == t {
                continue;
            }
            sources.push(s);
            targets.push(t);
            if let (Some(out), Some(w)) = (weights.as_mut(), self.weights.as_ref()) {
                out.push(w[e]);
            }
        }
        for node in 0..self.num_nodes {
            sources.push(node);
            targets.push(node);
            if let Some(out) = weights.as_mut() {
                out.push(1.0);
            }
        }

        Self::assemble(sources, targets, weights, self.num_nodes, self.device())
    }

    /// Keep at most `fanout` uniformly sampled incoming edges per node.
    ///
    /// Kept edges preserve their original order, so a seeded `rng` always
    /// yields the same block.
    pub fn sample_neighbors<R: Rng + ?Sized>(&self, fanout: usize, rng: &mut R) -> Self {
        let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); self.num_nodes as usize];
        for (e, &t) in self.targets.iter().enumerate() {
            incoming[t as usize].push(e);
        }

        let mut kept: Vec<usize> = incoming
            .iter()
            .flat_map(|edges| {
                if edges.len() <= fanout {
                    edges.clone()
                } else {
                    edges.choose_multiple(rng, fanout).copied().collect()
                }
            })
            .collect();
        kept.sort_unstable();

        let sources = kept.iter().map(|&e| self.sources[e]).collect();
        let targets = kept.iter().map(|&e| self.targets[e]).collect();
        let weights = self
            .weights
            .as_ref()
            .map(|w| kept.iter().map(|&e| w[e]).collect());

        Self::assemble(sources, targets, weights, self.num_nodes, self.device())
    }

    /// Copy the block to another device
    pub fn to_device(&self, device: Device) -> Self {
        Self {
            sources: self.sources.clone(),
            targets: self.targets.clone(),
            weights: self.weights.clone(),
            num_nodes: self.num_nodes,
            edge_index: self.edge_index.to_device(device),
            edge_weight: self.edge_weight.as_ref().map(|w| w.to_device(device)),
        }
    }

    pub fn num_nodes(&self) -> i64 {
        self.num_nodes
    }

    pub fn num_edges(&self) -> usize {
        self.sources.len()
    }

    /// `[2, E]` int64 edge index
    pub fn edge_index(&self) -> &Tensor {
        &self.edge_index
    }

    /// `[E]` float edge weights, if any
    pub fn edge_weight(&self) -> Option<&Tensor> {
        self.edge_weight.as_ref()
    }

    pub fn device(&self) -> Device {
        self.edge_index.device()
    }

    /// Number of incoming edges per node
    pub fn in_degrees(&self) -> Vec<usize> {
        let mut degrees = vec![0; self.num_nodes as usize];
        for &t in &self.targets {
            degrees[t as usize] += 1;
        }
        degrees
    }

    /// Host-side `(source, target)` pairs
    pub fn edges(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.sources.iter().copied().zip(self.targets.iter().copied())
    }
}
