//! Belief representations: discrete distributions over detections and
//! particle clouds over box trajectories, plus the fitted mixtures they are
//! drawn from.

pub mod discrete;
pub mod mixture;
pub mod normalize;
pub mod particles;

pub use discrete::{DiscreteBelief, DiscreteEvidence, FailureMode};
pub use mixture::{GaussianMixture, MixtureParams};
pub use particles::{FrameParticles, ParticleCloud, TrackBelief};
