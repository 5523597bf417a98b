//! WGAN-GP gradient penalty
//!
//! The critic is scored on random interpolations between real and generated
//! samples, and the penalty pushes the norm of its input gradient towards 1.
//! The gradient is taken with `create_graph`, so the returned penalty can be
//! backpropagated into the critic's parameters.

use tch::{Kind, Tensor};

use crate::error::{Result, StandsError};

/// Discriminator-like scoring function
///
/// Every entry point returns one score per sample (or any tensor whose sum
/// is differentiable with respect to its inputs).
pub trait Critic {
    /// Score tabular / feature-space samples
    fn score_tabular(&self, x: &Tensor) -> Result<Tensor>;

    /// Score latent codes
    fn score_latent(&self, _z: &Tensor) -> Result<Tensor> {
        Err(StandsError::UnsupportedMode {
            mode: "latent",
            modality: "tabular-only critic",
        })
    }

    /// Score a pair of modalities jointly
    fn score_joint(&self, _x_a: &Tensor, _x_b: &Tensor) -> Result<Tensor> {
        Err(StandsError::UnsupportedMode {
            mode: "joint",
            modality: "single-modality critic",
        })
    }
}

/// Any closure over one tensor scores both tabular samples and latents
impl<F> Critic for F
where
    F: Fn(&Tensor) -> Tensor,
{
    fn score_tabular(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self(x))
    }

    fn score_latent(&self, z: &Tensor) -> Result<Tensor> {
        Ok(self(z))
    }
}

/// Which critic entry point scores the interpolated samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreMode {
    Tabular,
    Latent,
    /// Requires [`PenaltyInput::Dual`]
    Joint,
}

/// Real / generated samples, for one or two modalities
#[derive(Debug, Clone, Copy)]
pub enum PenaltyInput<'a> {
    Single {
        real: &'a Tensor,
        fake: &'a Tensor,
    },
    Dual {
        real_a: &'a Tensor,
        fake_a: &'a Tensor,
        real_b: &'a Tensor,
        fake_b: &'a Tensor,
    },
}

/// Per-sample convex combination `η·real + (1-η)·fake`, `η ~ U[0, 1)`.
///
/// One `η` per leading index, broadcast over the remaining dimensions and
/// drawn from libtorch's seeded RNG. The result is detached from both inputs
/// and requires grad.
pub fn interpolate(real: &Tensor, fake: &Tensor) -> Result<Tensor> {
    let size = real.size();
    if size != fake.size() {
        return Err(StandsError::shape("interpolation", &size, &fake.size()));
    }
    match size.first() {
        None => return Err(StandsError::shape("interpolation", &[-1], &size)),
        Some(0) => return Err(StandsError::EmptyBatch("interpolation")),
        Some(_) => {}
    }

    let mut eta_shape = vec![1i64; size.len()];
    eta_shape[0] = size[0];
    let eta = Tensor::rand(eta_shape.as_slice(), (real.kind(), real.device()));

    let real = real.detach();
    let fake = fake.detach();
    let mixed = &fake + eta * (&real - &fake);
    Ok(mixed.set_requires_grad(true))
}

fn score_single<C: Critic + ?Sized>(critic: &C, mode: ScoreMode, x: &Tensor) -> Result<Tensor> {
    match mode {
        ScoreMode::Tabular => critic.score_tabular(x),
        ScoreMode::Latent => critic.score_latent(x),
        ScoreMode::Joint => Err(StandsError::UnsupportedMode {
            mode: "joint",
            modality: "single-modality input",
        }),
    }
}

/// `mean((‖∇ critic(x̂)‖₂ − 1)²)` over the batch
///
/// The norm is taken over every non-batch dimension of the gradient with
/// respect to the first interpolated input. `Tabular` and `Latent` scoring
/// of a [`PenaltyInput::Dual`] use the first modality only.
pub fn gradient_penalty<C: Critic + ?Sized>(
    critic: &C,
    input: PenaltyInput<'_>,
    mode: ScoreMode,
) -> Result<Tensor> {
    let (inputs, score) = match (mode, input) {
        (
            ScoreMode::Joint,
            PenaltyInput::Dual {
                real_a,
                fake_a,
                real_b,
                fake_b,
            },
        ) => {
            let x_a = interpolate(real_a, fake_a)?;
            let x_b = interpolate(real_b, fake_b)?;
            if x_a.size()[0] != x_b.size()[0] {
                return Err(StandsError::shape("second modality", &[x_a.size()[0]], &x_b.size()));
            }
            let score = critic.score_joint(&x_a, &x_b)?;
            (vec![x_a, x_b], score)
        }
        (
            mode,
            PenaltyInput::Single { real, fake }
            | PenaltyInput::Dual {
                real_a: real,
                fake_a: fake,
                ..
            },
        ) => {
            let x = interpolate(real, fake)?;
            let score = score_single(critic, mode, &x)?;
            (vec![x], score)
        }
    };

    let grads = Tensor::f_run_backward(&[score.sum(Kind::Float)], inputs.as_slice(), true, true)?;
    let grad = &grads[0];
    let n = grad.size()[0];
    let norms = grad.f_reshape([n, -1])?.norm_scalaropt_dim(2.0, [1i64], false);

    Ok((norms - 1.0).square().mean(Kind::Float))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tch::{nn, nn::Module, Device};

    #[test]
    fn test_interpolate_is_between_inputs() {
        let real = Tensor::randn([8, 3, 2], (Kind::Float, Device::Cpu));
        let fake = Tensor::randn([8, 3, 2], (Kind::Float, Device::Cpu));
        let mixed = interpolate(&real, &fake).unwrap();

        assert_eq!(mixed.size(), real.size());
        assert!(mixed.requires_grad());

        let lo = real.minimum(&fake) - 1e-6;
        let hi = real.maximum(&fake) + 1e-6;
        assert_eq!(mixed.ge_tensor(&lo).all().int64_value(&[]), 1);
        assert_eq!(mixed.le_tensor(&hi).all().int64_value(&[]), 1);
    }

    #[test]
    fn test_interpolate_rejects_shape_mismatch() {
        let real = Tensor::zeros([4, 3], (Kind::Float, Device::Cpu));
        let fake = Tensor::zeros([4, 2], (Kind::Float, Device::Cpu));
        assert!(matches!(
            interpolate(&real, &fake),
            Err(StandsError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_unit_gradient_gives_zero_penalty() {
        // Linear critic with a unit-norm weight has gradient norm 1 everywhere
        let w = Tensor::from_slice(&[1.0f32, 0.0, 0.0, 0.0]).view([4, 1]);
        let critic = move |x: &Tensor| x.matmul(&w);

        let real = Tensor::randn([6, 4], (Kind::Float, Device::Cpu));
        let fake = Tensor::randn([6, 4], (Kind::Float, Device::Cpu));
        let gp = gradient_penalty(&critic, PenaltyInput::Single { real: &real, fake: &fake }, ScoreMode::Tabular)
            .unwrap();

        assert_eq!(gp.size(), Vec::<i64>::new());
        assert_abs_diff_eq!(gp.double_value(&[]), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_penalty_is_nonnegative_and_matches_norm() {
        // Gradient is 3·ones over 4 features, norm 6, penalty 25
        let critic = |x: &Tensor| (x * 3.0).sum_dim_intlist(-1, false, Kind::Float);
        let real = Tensor::randn([5, 4], (Kind::Float, Device::Cpu));
        let fake = Tensor::randn([5, 4], (Kind::Float, Device::Cpu));

        let gp = gradient_penalty(&critic, PenaltyInput::Single { real: &real, fake: &fake }, ScoreMode::Latent)
            .unwrap();
        assert_abs_diff_eq!(gp.double_value(&[]), 25.0, epsilon = 1e-4);
    }

    #[test]
    fn test_norm_spans_every_feature_dimension() {
        // Gradient is 2·ones over 3×2 features, norm 2·√6
        let critic = |x: &Tensor| (x * 2.0).flatten(1, -1).sum_dim_intlist(-1, false, Kind::Float);
        let real = Tensor::randn([4, 3, 2], (Kind::Float, Device::Cpu));
        let fake = Tensor::randn([4, 3, 2], (Kind::Float, Device::Cpu));

        let gp = gradient_penalty(&critic, PenaltyInput::Single { real: &real, fake: &fake }, ScoreMode::Tabular)
            .unwrap();
        let expected = (2.0 * 6f64.sqrt() - 1.0).powi(2);
        assert_abs_diff_eq!(gp.double_value(&[]), expected, epsilon = 1e-4);
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        let critic = |x: &Tensor| x.sum_dim_intlist(-1, false, Kind::Float);
        let real = Tensor::zeros([0, 4], (Kind::Float, Device::Cpu));
        let fake = Tensor::zeros([0, 4], (Kind::Float, Device::Cpu));

        assert!(matches!(interpolate(&real, &fake), Err(StandsError::EmptyBatch(_))));
        let result = gradient_penalty(&critic, PenaltyInput::Single { real: &real, fake: &fake }, ScoreMode::Tabular);
        assert!(matches!(result, Err(StandsError::EmptyBatch(_))));
    }

    #[test]
    fn test_penalty_backpropagates_into_critic() {
        let vs = nn::VarStore::new(Device::Cpu);
        let linear = nn::linear(vs.root() / "critic", 4, 1, Default::default());
        let critic = |x: &Tensor| linear.forward(x);

        let real = Tensor::randn([6, 4], (Kind::Float, Device::Cpu));
        let fake = Tensor::randn([6, 4], (Kind::Float, Device::Cpu));
        let gp = gradient_penalty(&critic, PenaltyInput::Single { real: &real, fake: &fake }, ScoreMode::Tabular)
            .unwrap();
        gp.backward();

        assert!(linear.ws.grad().defined());
    }

    struct SumCritic;

    impl Critic for SumCritic {
        fn score_tabular(&self, x: &Tensor) -> Result<Tensor> {
            Ok(x.sum_dim_intlist(-1, false, Kind::Float))
        }

        fn score_joint(&self, x_a: &Tensor, x_b: &Tensor) -> Result<Tensor> {
            Ok(x_a.sum_dim_intlist(-1, false, Kind::Float) + x_b.sum_dim_intlist(-1, false, Kind::Float))
        }
    }

    #[test]
    fn test_joint_scoring_uses_both_modalities() {
        let real_a = Tensor::randn([3, 1], (Kind::Float, Device::Cpu));
        let fake_a = Tensor::randn([3, 1], (Kind::Float, Device::Cpu));
        let real_b = Tensor::randn([3, 2], (Kind::Float, Device::Cpu));
        let fake_b = Tensor::randn([3, 2], (Kind::Float, Device::Cpu));
        let input = PenaltyInput::Dual {
            real_a: &real_a,
            fake_a: &fake_a,
            real_b: &real_b,
            fake_b: &fake_b,
        };

        // One feature in modality a: the gradient norm is exactly 1
        let gp = gradient_penalty(&SumCritic, input, ScoreMode::Joint).unwrap();
        assert_abs_diff_eq!(gp.double_value(&[]), 0.0, epsilon = 1e-10);

        let gp = gradient_penalty(&SumCritic, input, ScoreMode::Tabular).unwrap();
        assert_abs_diff_eq!(gp.double_value(&[]), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_joint_scoring_requires_two_modalities() {
        let real = Tensor::randn([3, 2], (Kind::Float, Device::Cpu));
        let fake = Tensor::randn([3, 2], (Kind::Float, Device::Cpu));
        let result = gradient_penalty(&SumCritic, PenaltyInput::Single { real: &real, fake: &fake }, ScoreMode::Joint);
        assert!(matches!(result, Err(StandsError::UnsupportedMode { .. })));

        let result = gradient_penalty(&SumCritic, PenaltyInput::Single { real: &real, fake: &fake }, ScoreMode::Latent);
        assert!(matches!(result, Err(StandsError::UnsupportedMode { .. })));
    }
}
