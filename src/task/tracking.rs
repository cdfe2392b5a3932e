use rand::rngs::StdRng;

use super::pick_source;
use crate::belief::{ParticleCloud, TrackBelief};
use crate::core::config::TrackingConfig;
use crate::core::errors::{Result, RqsError};
use crate::deferral::DeferralTask;
use crate::policy::{PolicyKind, ReplacementPolicy, Update, tracking};
use crate::scoring::sampled_iou_score;
use crate::store::{ItemKey, TrackedVideo};

/// Tracked videos whose beliefs are particle clouds over per-frame boxes.
///
/// Evidence is an annotator index; the annotator's fitted mixtures stand in
/// for a fresh re-annotation.
#[derive(Debug, Clone, Copy)]
pub struct TrackingTask<'a> {
    videos: &'a [TrackedVideo],
    params: &'a TrackingConfig,
}

impl<'a> TrackingTask<'a> {
    /// Task over the given videos and particle parameters.
    #[must_use]
    pub const fn new(videos: &'a [TrackedVideo], params: &'a TrackingConfig) -> Self {
        Self { videos, params }
    }
}

impl DeferralTask for TrackingTask<'_> {
    type Belief = TrackBelief;
    type Evidence = usize;

    fn label(&self) -> &'static str {
        "track"
    }

    fn item_count(&self) -> usize {
        self.videos.len()
    }

    fn item_key(&self, item: usize) -> &ItemKey {
        &self.videos[item].key
    }

    fn draw_evidence(&self, item: usize, rng: &mut StdRng) -> Result<usize> {
        let video = &self.videos[item];
        pick_source(&video.key, video.sources.len(), rng)
    }

    fn initial_belief(
        &self,
        item: usize,
        source: usize,
        policy: ReplacementPolicy,
        rng: &mut StdRng,
    ) -> Result<TrackBelief> {
        let video = &self.videos[item];
        let frames = video
            .sources
            .get(source)
            .map(|s| s.frames.as_slice())
            .ok_or_else(|| RqsError::Runtime {
                details: format!("video {} has no source #{source}", video.key),
            })?;
        let n = self.params.num_particles;
        let cloud = if policy.kind() == PolicyKind::Combined {
            ParticleCloud::drawn_and_smeared(frames, n, self.params.smear_stdevs, rng)?
        } else {
            ParticleCloud::draw(frames, n, rng)
        };
        Ok(TrackBelief {
            cloud,
            origin: source,
        })
    }

    fn score(&self, _item: usize, belief: &TrackBelief, rng: &mut StdRng) -> Result<f64> {
        sampled_iou_score(&belief.cloud, self.params.num_score_samples, rng)
    }

    fn item_error(&self, item: usize, belief: &TrackBelief) -> f64 {
        1.0 - belief.cloud.mean_iou(&self.videos[item].ground_truth)
    }

    fn item_accuracy(&self, item: usize, belief: &TrackBelief) -> f64 {
        belief.cloud.localized_fraction(&self.videos[item].ground_truth)
    }

    fn replace(
        &self,
        policy: ReplacementPolicy,
        item: usize,
        current: &TrackBelief,
        current_score: f64,
        evidence: Vec<usize>,
        rng: &mut StdRng,
    ) -> Result<Update<TrackBelief>> {
        tracking::apply(
            policy,
            &self.videos[item],
            current,
            current_score,
            evidence,
            self.params,
            rng,
        )
    }

    fn oracle_error(&self, item: usize, rng: &mut StdRng) -> Result<f64> {
        let video = &self.videos[item];
        if video.sources.is_empty() {
            return Err(RqsError::DataUnavailable {
                item: video.key.to_string(),
            });
        }
        let best = video
            .sources
            .iter()
            .map(|source| {
                ParticleCloud::draw(&source.frames, self.params.num_particles, rng)
                    .mean_iou(&video.ground_truth)
            })
            .fold(0.0, f64::max);
        Ok(1.0 - best)
    }
}
