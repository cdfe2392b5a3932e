//! Particle-cloud beliefs over per-frame bounding boxes.
//!
//! Weights are unnormalized log-densities. Every operation returns a new
//! cloud; the only operation that moves particles is [`ParticleCloud::smeared`].

use rand::Rng;
use rand_distr::StandardNormal;

use super::mixture::GaussianMixture;
use super::normalize::{argmax, log_sum_exp};
use crate::core::errors::{Result, RqsError};
use crate::geometry::{BBox, IOU_CORRECT_THRESHOLD, calc_frame_iou};

/// Particles for a single frame: parallel location and log-weight arrays.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameParticles {
    /// Particle boxes as `[x, y, w, h]`.
    pub locs: Vec<[f64; 4]>,
    /// Unnormalized log-weight per particle.
    pub log_weights: Vec<f64>,
}

impl FrameParticles {
    /// Number of particles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locs.len()
    }

    /// Whether the frame holds no particles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locs.is_empty()
    }

    /// Maximum-weight particle as a box.
    #[must_use]
    pub fn best_box(&self) -> Option<BBox> {
        argmax(&self.log_weights).map(|idx| BBox::from_array(self.locs[idx]))
    }
}

/// A weighted sample approximation of a box trajectory.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParticleCloud {
    /// One particle set per video frame.
    pub frames: Vec<FrameParticles>,
}

impl ParticleCloud {
    /// Draw `n` particles per frame, weighted by their own log-density.
    pub fn draw<R: Rng + ?Sized>(mixtures: &[GaussianMixture], n: usize, rng: &mut R) -> Self {
        let frames = mixtures
            .iter()
            .map(|gmm| {
                let locs = gmm.sample(n, rng);
                let log_weights = gmm.log_density_batch(&locs);
                FrameParticles { locs, log_weights }
            })
            .collect();
        Self { frames }
    }

    /// Copy with Gaussian noise added to every location and weights
    /// re-evaluated under the originating mixtures.
    #[must_use]
    pub fn smeared<R: Rng + ?Sized>(
        &self,
        mixtures: &[GaussianMixture],
        stdevs: [f64; 4],
        rng: &mut R,
    ) -> Self {
        let frames = self
            .frames
            .iter()
            .zip(mixtures)
            .map(|(frame, gmm)| {
                let locs: Vec<[f64; 4]> = frame
                    .locs
                    .iter()
                    .map(|loc| {
                        std::array::from_fn(|i| {
                            let z: f64 = rng.sample(StandardNormal);
                            stdevs[i].mul_add(z, loc[i])
                        })
                    })
                    .collect();
                let log_weights = gmm.log_density_batch(&locs);
                FrameParticles { locs, log_weights }
            })
            .collect();
        Self { frames }
    }

    /// Initial cloud for fusion: `n / 2` drawn particles plus `n - n / 2`
    /// smeared copies, so fused weights have spread to work with.
    pub fn drawn_and_smeared<R: Rng + ?Sized>(
        mixtures: &[GaussianMixture],
        n: usize,
        stdevs: [f64; 4],
        rng: &mut R,
    ) -> Result<Self> {
        let mut base = Self::draw(mixtures, n - n / 2, rng);
        let smeared = base.smeared(mixtures, stdevs, rng);
        for frame in &mut base.frames {
            frame.locs.truncate(n / 2);
            frame.log_weights.truncate(n / 2);
        }
        base.concat(smeared)
    }

    /// Per-frame concatenation of two clouds over the same frames.
    pub fn concat(mut self, other: Self) -> Result<Self> {
        if self.frames.len() != other.frames.len() {
            return Err(RqsError::Runtime {
                details: format!(
                    "cannot concatenate clouds with {} and {} frames",
                    self.frames.len(),
                    other.frames.len()
                ),
            });
        }
        for (frame, extra) in self.frames.iter_mut().zip(other.frames) {
            frame.locs.extend(extra.locs);
            frame.log_weights.extend(extra.log_weights);
        }
        Ok(self)
    }

    /// Bayesian fusion: multiply each particle's weight by its density under
    /// another source's mixtures.
    #[must_use]
    pub fn fused(&self, mixtures: &[GaussianMixture]) -> Self {
        let frames = self
            .frames
            .iter()
            .zip(mixtures)
            .map(|(frame, gmm)| FrameParticles {
                locs: frame.locs.clone(),
                log_weights: frame
                    .locs
                    .iter()
                    .zip(&frame.log_weights)
                    .map(|(loc, w)| w + gmm.log_density(loc))
                    .collect(),
            })
            .collect();
        Self { frames }
    }

    /// Pool `n` particles from each member and weight every particle by its
    /// mean density across all members.
    pub fn ensemble_mean<R: Rng + ?Sized>(
        members: &[&[GaussianMixture]],
        n: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let Some(first) = members.first() else {
            return Err(RqsError::Runtime {
                details: "ensemble needs at least one member".to_string(),
            });
        };
        let frame_count = first.len();
        if members.iter().any(|m| m.len() != frame_count) {
            return Err(RqsError::Runtime {
                details: "ensemble members disagree on frame count".to_string(),
            });
        }

        let ln_members = (members.len() as f64).ln();
        let mut frames = Vec::with_capacity(frame_count);
        for f in 0..frame_count {
            let locs: Vec<[f64; 4]> = members
                .iter()
                .flat_map(|member| member[f].sample(n, rng))
                .collect();
            let log_weights = locs
                .iter()
                .map(|loc| {
                    let per_member: Vec<f64> =
                        members.iter().map(|m| m[f].log_density(loc)).collect();
                    log_sum_exp(&per_member) - ln_members
                })
                .collect();
            frames.push(FrameParticles { locs, log_weights });
        }
        Ok(Self { frames })
    }

    /// Degenerate cloud holding exactly one box per frame.
    #[must_use]
    pub fn point_mass(boxes: &[BBox]) -> Self {
        let frames = boxes
            .iter()
            .map(|b| FrameParticles {
                locs: vec![b.to_array()],
                log_weights: vec![0.0],
            })
            .collect();
        Self { frames }
    }

    /// Number of frames.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Maximum-weight box per frame. Empty frames yield `None`.
    #[must_use]
    pub fn best_boxes(&self) -> Vec<Option<BBox>> {
        self.frames.iter().map(FrameParticles::best_box).collect()
    }

    /// Per-frame IoU of the best box against ground truth.
    #[must_use]
    pub fn frame_ious(&self, ground_truth: &[BBox]) -> Vec<f64> {
        self.best_boxes()
            .into_iter()
            .zip(ground_truth)
            .map(|(best, gt)| best.map_or(0.0, |b| calc_frame_iou(*gt, b)))
            .collect()
    }

    /// Mean per-frame IoU of the best box against ground truth.
    #[must_use]
    pub fn mean_iou(&self, ground_truth: &[BBox]) -> f64 {
        mean(&self.frame_ious(ground_truth))
    }

    /// Fraction of frames whose best box localizes the target (IoU ≥ 0.5).
    #[must_use]
    pub fn localized_fraction(&self, ground_truth: &[BBox]) -> f64 {
        let ious = self.frame_ious(ground_truth);
        if ious.is_empty() {
            return 0.0;
        }
        ious.iter().filter(|iou| **iou >= IOU_CORRECT_THRESHOLD).count() as f64 / ious.len() as f64
    }
}

/// A video's current belief and the source it was first drawn from.
///
/// Ensemble policies pool the originating source with the fresh draws, so
/// the origin travels with the cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackBelief {
    /// Particles over every frame of the video.
    pub cloud: ParticleCloud,
    /// Index into the video's source list.
    pub origin: usize,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
