//! Provider selection

use crate::types::StorageProvider;
use keyhaven_core::{Address, KeyhavenError, KeyhavenResult};
use std::cmp::Reverse;

/// Pick `count` providers from `all`
///
/// Inactive and excluded providers are skipped. The rest are ordered by descending
/// reputation, then ascending price, then ascending address, so identical inputs
/// always give the identical ordered result.
pub fn select_providers(
    all: &[StorageProvider],
    exclude: &[Address],
    count: usize,
) -> KeyhavenResult<Vec<StorageProvider>> {
    let mut eligible: Vec<&StorageProvider> = all
        .iter()
        .filter(|p| p.is_active && !exclude.contains(&p.address))
        .collect();
    if eligible.len() < count {
        return Err(KeyhavenError::insufficient_providers(eligible.len(), count));
    }
    eligible.sort_by_key(|p| (Reverse(p.reputation_score), p.price, p.address));
    Ok(eligible.into_iter().take(count).cloned().collect())
}
