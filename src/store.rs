//! Read-only evidence stores, loaded once per process.
//!
//! Both stores are JSON documents produced by the fitting/export pipeline.
//! Keys are parsed and every shape invariant is checked at load time, so the
//! simulation never re-validates per access.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::belief::{DiscreteEvidence, GaussianMixture};
use crate::core::errors::{Result, RqsError};
use crate::geometry::BBox;

/// Stable identifier of an item (a video or a referring target).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKey(pub String);

/// Identifier of one independent evidence source for an item (an annotator,
/// a model seed).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceKey(pub String);

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ──────────────────── tracking ────────────────────

#[derive(Debug, Deserialize)]
struct RawTrackingStore {
    videos: BTreeMap<ItemKey, RawVideo>,
}

#[derive(Debug, Deserialize)]
struct RawVideo {
    ground_truth: Vec<BBox>,
    #[serde(default)]
    sources: BTreeMap<SourceKey, Vec<GaussianMixture>>,
}

/// One fitted source for a video: a mixture per frame, in frame order.
#[derive(Debug, Clone)]
pub struct TrackSource {
    /// Annotator or model seed.
    pub key: SourceKey,
    /// Fitted mixture per frame.
    pub frames: Vec<GaussianMixture>,
}

/// A tracked video with its ground truth and every annotator's fit.
#[derive(Debug, Clone)]
pub struct TrackedVideo {
    /// Video name.
    pub key: ItemKey,
    /// Ground-truth box per frame.
    pub ground_truth: Vec<BBox>,
    /// Annotators, sorted by key.
    pub sources: Vec<TrackSource>,
}

/// All videos, sorted by key.
#[derive(Debug, Clone, Default)]
pub struct TrackingStore {
    /// Videos sorted by key.
    pub videos: Vec<TrackedVideo>,
}

impl TrackingStore {
    /// Load and validate a tracking store.
    pub fn load(path: &Path) -> Result<Self> {
        let raw: RawTrackingStore = read_json(path)?;
        let store = Self::from_raw(raw)?;
        tracing::info!(
            path = %path.display(),
            videos = store.videos.len(),
            sources = store.videos.iter().map(|v| v.sources.len()).sum::<usize>(),
            "loaded tracking store"
        );
        Ok(store)
    }

    /// Validate a tracking store held in memory.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Self::from_raw(serde_json::from_str(raw)?)
    }

    fn from_raw(raw: RawTrackingStore) -> Result<Self> {
        let mut videos = Vec::with_capacity(raw.videos.len());
        for (key, video) in raw.videos {
            if video.ground_truth.is_empty() {
                return Err(RqsError::store(
                    format!("video {key}"),
                    "ground truth has no frames",
                ));
            }
            let mut sources = Vec::with_capacity(video.sources.len());
            for (source_key, frames) in video.sources {
                if frames.len() != video.ground_truth.len() {
                    return Err(RqsError::store(
                        format!("video {key} source {source_key}"),
                        format!(
                            "{} fitted frames but {} ground-truth frames",
                            frames.len(),
                            video.ground_truth.len()
                        ),
                    ));
                }
                sources.push(TrackSource {
                    key: source_key,
                    frames,
                });
            }
            if sources.is_empty() {
                tracing::warn!(video = %key, "video has no evidence sources");
            }
            videos.push(TrackedVideo {
                key,
                ground_truth: video.ground_truth,
                sources,
            });
        }
        Ok(Self { videos })
    }
}

// ──────────────────── referring expressions ────────────────────

#[derive(Debug, Deserialize)]
struct RawReferringStore {
    splits: BTreeMap<String, BTreeMap<ItemKey, RawTarget>>,
}

#[derive(Debug, Deserialize)]
struct RawTarget {
    ground_truth: BBox,
    detections: Vec<BBox>,
    #[serde(default)]
    evidence: Vec<DiscreteEvidence>,
}

/// A referring-expression target with its candidate detections and every
/// available model output.
#[derive(Debug, Clone)]
pub struct RefTarget {
    /// Target id.
    pub key: ItemKey,
    /// Annotated target box.
    pub ground_truth: BBox,
    /// Candidate boxes the probabilities range over.
    pub detections: Vec<BBox>,
    /// One model output per source.
    pub evidence: Vec<DiscreteEvidence>,
}

/// Targets grouped by dataset split, each split sorted by key.
#[derive(Debug, Clone, Default)]
pub struct ReferringStore {
    splits: BTreeMap<String, Vec<RefTarget>>,
}

impl ReferringStore {
    /// Load and validate a referring store.
    pub fn load(path: &Path) -> Result<Self> {
        let raw: RawReferringStore = read_json(path)?;
        let store = Self::from_raw(raw)?;
        tracing::info!(
            path = %path.display(),
            splits = store.splits.len(),
            "loaded referring-expression store"
        );
        Ok(store)
    }

    /// Validate a referring store held in memory.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Self::from_raw(serde_json::from_str(raw)?)
    }

    fn from_raw(raw: RawReferringStore) -> Result<Self> {
        let mut splits = BTreeMap::new();
        for (split, targets) in raw.splits {
            let mut loaded = Vec::with_capacity(targets.len());
            for (key, target) in targets {
                for (idx, row) in target.evidence.iter().enumerate() {
                    if row.probabilities.len() != target.detections.len() {
                        return Err(RqsError::store(
                            format!("{split}/{key} evidence {idx}"),
                            format!(
                                "{} probabilities for {} detections",
                                row.probabilities.len(),
                                target.detections.len()
                            ),
                        ));
                    }
                }
                loaded.push(RefTarget {
                    key,
                    ground_truth: target.ground_truth,
                    detections: target.detections,
                    evidence: target.evidence,
                });
            }
            splits.insert(split, loaded);
        }
        Ok(Self { splits })
    }

    /// Targets of one split. A missing or empty split is unavailable data.
    pub fn split(&self, name: &str) -> Result<&[RefTarget]> {
        match self.splits.get(name) {
            Some(targets) if !targets.is_empty() => Ok(targets),
            _ => Err(RqsError::DataUnavailable {
                item: format!("split {name}"),
            }),
        }
    }

    /// Split names in sorted order.
    pub fn split_names(&self) -> impl Iterator<Item = &str> {
        self.splits.keys().map(String::as_str)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|err| RqsError::io(path, err))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACKING: &str = r#"{
        "videos": {
            "Crossing": {
                "ground_truth": [{"x": 0, "y": 0, "w": 10, "h": 10}],
                "sources": {
                    "b": [{"weights": [1.0], "means": [[0, 0, 10, 10]],
                           "covariances": [[[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]]]}],
                    "a": [{"weights": [1.0], "means": [[1, 1, 10, 10]],
                           "covariances": [[[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]]]}]
                }
            },
            "Basketball": {
                "ground_truth": [{"x": 0, "y": 0, "w": 10, "h": 10}]
            }
        }
    }"#;

    #[test]
    fn tracking_store_sorts_items_and_sources() {
        let store = TrackingStore::from_json_str(TRACKING).expect("store");
        let keys: Vec<_> = store.videos.iter().map(|v| v.key.0.as_str()).collect();
        assert_eq!(keys, vec!["Basketball", "Crossing"]);
        assert!(store.videos[0].sources.is_empty());
        let sources: Vec<_> = store.videos[1].sources.iter().map(|s| s.key.0.as_str()).collect();
        assert_eq!(sources, vec!["a", "b"]);
    }

    #[test]
    fn tracking_frame_mismatch_is_rejected() {
        let raw = r#"{"videos": {"Crossing": {
            "ground_truth": [{"x": 0, "y": 0, "w": 10, "h": 10}, {"x": 1, "y": 0, "w": 10, "h": 10}],
            "sources": {"a": [{"weights": [1.0], "means": [[1, 1, 10, 10]],
                "covariances": [[[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]]]}]}
        }}}"#;
        let err = TrackingStore::from_json_str(raw).unwrap_err();
        assert_eq!(err.code(), "RQS-2001");
    }

    #[test]
    fn referring_store_validates_probability_length() {
        let raw = r#"{"splits": {"testA": {"t1": {
            "ground_truth": {"x": 0, "y": 0, "w": 5, "h": 5},
            "detections": [{"x": 0, "y": 0, "w": 5, "h": 5}],
            "evidence": [{"probabilities": [0.5, 0.5], "failure_mode": "correct"}]
        }}}}"#;
        assert!(ReferringStore::from_json_str(raw).is_err());
    }

    #[test]
    fn missing_split_is_data_unavailable() {
        let raw = r#"{"splits": {"val": {}}}"#;
        let store = ReferringStore::from_json_str(raw).expect("store");
        let err = store.split("val").unwrap_err();
        assert!(matches!(err, RqsError::DataUnavailable { .. }));
        assert!(store.split("testB").is_err());
        assert_eq!(store.split_names().collect::<Vec<_>>(), vec!["val"]);
    }
}
