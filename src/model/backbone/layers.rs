//! Building blocks shared by the extractors.

use tch::{nn, nn::Module, Tensor};

use crate::data::GraphBlock;

/// Graph Convolutional Layer.
///
/// Implements: H' = D^(-1/2) A D^(-1/2) H W + b over the block's edges,
/// where A carries the edge weights (1 when unweighted) and D is the
/// weighted in-degree. Self loops are taken from the block itself.
#[derive(Debug)]
pub struct GraphConvLayer {
    linear: nn::Linear,
    bias: Tensor,
}

impl GraphConvLayer {
    /// Create a new GCN layer.
    pub fn new(vs: &nn::Path, in_features: i64, out_features: i64) -> Self {
        let linear = nn::linear(
            vs / "linear",
            in_features,
            out_features,
            nn::LinearConfig {
                bias: false,
                ..Default::default()
            },
        );
        let bias = vs.zeros("bias", &[out_features]);
        Self { linear, bias }
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// * `x` - Node features [num_nodes, in_features]
    /// * `graph` - Block whose edges carry the messages
    pub fn forward(&self, x: &Tensor, graph: &GraphBlock) -> Tensor {
        let num_nodes = x.size()[0];
        let h = x.apply(&self.linear);

        let edge_index = graph.edge_index();
        let source = edge_index.select(0, 0);
        let target = edge_index.select(0, 1);

        let weights = match graph.edge_weight() {
            Some(w) => w.to_kind(h.kind()),
            None => Tensor::ones([source.size()[0]], (h.kind(), h.device())),
        };

        // Isolated nodes keep degree 1 so the scaling stays finite
        let degree = Tensor::zeros([num_nodes], (h.kind(), h.device()))
            .scatter_add(0, &target, &weights)
            .clamp_min(1.0);
        let degree_inv_sqrt = degree.pow_tensor_scalar(-0.5);

        let norm = weights * degree_inv_sqrt.index_select(0, &source) * degree_inv_sqrt.index_select(0, &target);
        let messages = h.index_select(0, &source) * norm.unsqueeze(-1);

        let target_expanded = target.unsqueeze(-1).expand_as(&messages);
        let aggregated = Tensor::zeros([num_nodes, h.size()[1]], (h.kind(), h.device()))
            .scatter_add(0, &target_expanded, &messages);

        aggregated + &self.bias
    }
}

/// Stack of linear layers with LeakyReLU between them (none after the last).
#[derive(Debug)]
pub struct DenseBlock {
    layers: Vec<nn::Linear>,
}

impl DenseBlock {
    /// `dims` lists the widths, e.g. `[in, hidden, out]` builds two layers.
    pub fn new(vs: &nn::Path, dims: &[i64]) -> Self {
        let layers = dims
            .windows(2)
            .enumerate()
            .map(|(i, w)| nn::linear(vs / format!("fc{}", i + 1), w[0], w[1], Default::default()))
            .collect();
        Self { layers }
    }
}

impl Module for DenseBlock {
    fn forward(&self, xs: &Tensor) -> Tensor {
        let last = self.layers.len().saturating_sub(1);
        self.layers.iter().enumerate().fold(xs.shallow_clone(), |x, (i, layer)| {
            let x = x.apply(layer);
            if i < last {
                x.leaky_relu()
            } else {
                x
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    fn scalar(t: &Tensor) -> f64 {
        t.sum(Kind::Double).double_value(&[])
    }

    fn path_graph() -> GraphBlock {
        GraphBlock::from_edges(&[0, 1, 2, 3], &[1, 2, 3, 4], 5, Device::Cpu).unwrap()
    }

    #[test]
    fn test_gcn_layer() {
        let vs = nn::VarStore::new(Device::Cpu);
        let layer = GraphConvLayer::new(&vs.root(), 10, 32);

        let x = Tensor::randn([5, 10], (Kind::Float, Device::Cpu));
        let output = layer.forward(&x, &path_graph());
        assert_eq!(output.size(), vec![5, 32]);
    }

    #[test]
    fn test_gcn_node_without_incoming_edges_gets_bias_only() {
        let vs = nn::VarStore::new(Device::Cpu);
        let layer = GraphConvLayer::new(&vs.root(), 4, 3);

        let x = Tensor::randn([5, 4], (Kind::Float, Device::Cpu));
        let output = layer.forward(&x, &path_graph());
        // Node 0 is never a target and the bias starts at zero
        assert_eq!(scalar(&output.get(0).abs()), 0.0);
    }

    #[test]
    fn test_gcn_uses_edge_weights() {
        let vs = nn::VarStore::new(Device::Cpu);
        let layer = GraphConvLayer::new(&vs.root(), 4, 3);
        let x = Tensor::randn([2, 4], (Kind::Float, Device::Cpu));

        let zero = GraphBlock::from_weighted_edges(&[0], &[1], &[0.0], 2, Device::Cpu).unwrap();
        let output = layer.forward(&x, &zero);
        assert_eq!(scalar(&output.abs()), 0.0);
    }

    #[test]
    fn test_dense_block_shapes() {
        let vs = nn::VarStore::new(Device::Cpu);
        let block = DenseBlock::new(&vs.root(), &[10, 16, 4]);
        let x = Tensor::randn([3, 10], (Kind::Float, Device::Cpu));
        assert_eq!(block.forward(&x).size(), vec![3, 4]);
        assert_eq!(vs.trainable_variables().len(), 4);
    }
}
