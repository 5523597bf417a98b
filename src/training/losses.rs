//! Loss functions for adversarial reconstruction training
//!
//! Implements the Wasserstein critic/generator losses, the gradient-penalised
//! critic objective and the reconstruction terms the generators are trained on.

use tch::{Kind, Reduction, Tensor};

use crate::error::{Result, StandsError};

/// Wasserstein loss for the generator
///
/// Generator loss: -E[D(G(x))]
pub fn generator_loss_wasserstein(fake_output: &Tensor) -> Tensor {
    -fake_output.mean(Kind::Float)
}

/// Wasserstein loss for the critic
///
/// Critic loss: E[D(G(x))] - E[D(x)]
pub fn critic_loss_wasserstein(real_output: &Tensor, fake_output: &Tensor) -> Tensor {
    fake_output.mean(Kind::Float) - real_output.mean(Kind::Float)
}

/// WGAN-GP critic objective: E[D(G(x))] - E[D(x)] + λ·GP
///
/// # Arguments
///
/// * `real_output` - Critic scores on real samples
/// * `fake_output` - Critic scores on reconstructed samples
/// * `penalty` - Scalar from [`gradient_penalty`](super::gradient_penalty)
/// * `lambda_gp` - Penalty weight
pub fn critic_loss_with_penalty(
    real_output: &Tensor,
    fake_output: &Tensor,
    penalty: &Tensor,
    lambda_gp: f64,
) -> Tensor {
    critic_loss_wasserstein(real_output, fake_output) + penalty * lambda_gp
}

/// Mean squared reconstruction error over every element
pub fn reconstruction_loss(reconstructed: &Tensor, target: &Tensor) -> Result<Tensor> {
    if reconstructed.size() != target.size() {
        return Err(StandsError::shape(
            "reconstruction",
            &target.size(),
            &reconstructed.size(),
        ));
    }
    Ok(reconstructed.mse_loss(target, Reduction::Mean))
}

/// Per-entity anomaly score: mean squared error of each row, shape `[N]`
///
/// Every non-batch dimension is averaged, so image patches score the same
/// way gene vectors do.
pub fn anomaly_score(reconstructed: &Tensor, target: &Tensor) -> Result<Tensor> {
    let size = target.size();
    if reconstructed.size() != size || size.is_empty() {
        return Err(StandsError::shape("anomaly score", &size, &reconstructed.size()));
    }
    if size[0] == 0 {
        return Err(StandsError::EmptyBatch("anomaly score"));
    }
    Ok((reconstructed - target)
        .square()
        .f_reshape([size[0], -1])?
        .mean_dim(1, false, Kind::Float))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tch::Device;

    #[test]
    fn test_wasserstein_losses() {
        let real_output = Tensor::full([4, 1], 2.0, (Kind::Float, Device::Cpu));
        let fake_output = Tensor::full([4, 1], -1.0, (Kind::Float, Device::Cpu));

        // A critic separating real from fake has negative loss
        let critic = critic_loss_wasserstein(&real_output, &fake_output);
        assert_abs_diff_eq!(critic.double_value(&[]), -3.0);

        let generator = generator_loss_wasserstein(&fake_output);
        assert_abs_diff_eq!(generator.double_value(&[]), 1.0);
    }

    #[test]
    fn test_penalty_is_weighted() {
        let real_output = Tensor::zeros([4, 1], (Kind::Float, Device::Cpu));
        let fake_output = Tensor::zeros([4, 1], (Kind::Float, Device::Cpu));
        let penalty = Tensor::from(0.5f32);

        let loss = critic_loss_with_penalty(&real_output, &fake_output, &penalty, 10.0);
        assert_eq!(loss.size(), Vec::<i64>::new());
        assert_abs_diff_eq!(loss.double_value(&[]), 5.0, epsilon = 1e-6);
    }

    #[test]
    fn test_reconstruction_loss() {
        let target = Tensor::zeros([3, 2], (Kind::Float, Device::Cpu));
        let reconstructed = Tensor::full([3, 2], 2.0, (Kind::Float, Device::Cpu));
        let loss = reconstruction_loss(&reconstructed, &target).unwrap();
        assert_abs_diff_eq!(loss.double_value(&[]), 4.0);

        let wrong = Tensor::zeros([3, 3], (Kind::Float, Device::Cpu));
        assert!(reconstruction_loss(&wrong, &target).is_err());
    }

    #[test]
    fn test_anomaly_score_per_row() {
        let target = Tensor::zeros([2, 2, 2], (Kind::Float, Device::Cpu));
        let reconstructed = Tensor::cat(
            &[
                Tensor::zeros([1, 2, 2], (Kind::Float, Device::Cpu)),
                Tensor::ones([1, 2, 2], (Kind::Float, Device::Cpu)),
            ],
            0,
        );

        let scores = anomaly_score(&reconstructed, &target).unwrap();
        assert_eq!(scores.size(), vec![2]);
        assert_abs_diff_eq!(scores.double_value(&[0]), 0.0);
        assert_abs_diff_eq!(scores.double_value(&[1]), 1.0);
    }

    #[test]
    fn test_anomaly_score_rejects_empty_batch() {
        let empty = Tensor::zeros([0, 5], (Kind::Float, Device::Cpu));
        assert!(matches!(
            anomaly_score(&empty, &empty),
            Err(StandsError::EmptyBatch(_))
        ));
    }
}
