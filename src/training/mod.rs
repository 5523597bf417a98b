//! Training signals
//!
//! This module provides:
//! - Interpolation and the WGAN-GP gradient penalty
//! - Wasserstein and reconstruction losses

mod gradient_penalty;
mod losses;

pub use gradient_penalty::{gradient_penalty, interpolate, Critic, PenaltyInput, ScoreMode};
pub use losses::{
    anomaly_score, critic_loss_wasserstein, critic_loss_with_penalty, generator_loss_wasserstein,
    reconstruction_loss,
};
