//! The two task instantiations of [`DeferralTask`](crate::deferral::DeferralTask).

mod referring;
mod tracking;

pub use referring::ReferringTask;
pub use tracking::TrackingTask;

use rand::Rng;

use crate::core::errors::{Result, RqsError};
use crate::store::ItemKey;

/// Uniform draw (with replacement) among `count` sources of `item`.
pub(crate) fn pick_source<R: Rng + ?Sized>(item: &ItemKey, count: usize, rng: &mut R) -> Result<usize> {
    if count == 0 {
        return Err(RqsError::DataUnavailable {
            item: item.to_string(),
        });
    }
    Ok(rng.random_range(0..count))
}
