//! Target selection policy.
//!
//! Pure functions over inventory snapshots. Randomness comes from the caller's
//! RNG so a seeded RNG reproduces the same choice.

use std::collections::{BTreeSet, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::warn;

use chaos_core::{CombinationKey, DomainAxis, ResourceRecord};

use crate::error::SelectionError;

/// How many of `len` resources a percentage covers: `floor(p / 100 * len)`.
/// An absent or zero percentage covers the whole population.
pub fn percentage_count(len: usize, percentage: Option<f64>) -> usize {
    match percentage {
        Some(p) if p > 0.0 => ((p * len as f64) / 100.0).floor().min(len as f64) as usize,
        _ => len,
    }
}

/// Shuffle the population and cut it into batches of `percentage_count`.
/// The batches are disjoint and together cover the whole population; the
/// last one may be short. No batches when the count rounds down to zero.
pub fn percentage_batches<T, R>(population: &[T], percentage: Option<f64>, rng: &mut R) -> Vec<Vec<T>>
where
    T: Clone,
    R: Rng + ?Sized,
{
    let count = percentage_count(population.len(), percentage);
    if count == 0 {
        return Vec::new();
    }
    let mut shuffled = population.to_vec();
    shuffled.shuffle(rng);
    shuffled.chunks(count).map(<[T]>::to_vec).collect()
}

/// The first draw of [`percentage_batches`].
pub fn percentage_select<T, R>(population: &[T], percentage: Option<f64>, rng: &mut R) -> Vec<T>
where
    T: Clone,
    R: Rng + ?Sized,
{
    percentage_batches(population, percentage, rng)
        .into_iter()
        .next()
        .unwrap_or_default()
}

/// Uniform pick of one element.
pub fn random_one<'a, T, R>(population: &'a [T], rng: &mut R) -> Result<&'a T, SelectionError>
where
    R: Rng + ?Sized,
{
    population
        .choose(rng)
        .ok_or_else(|| SelectionError::EmptyPopulation(format!("{} candidates", population.len())))
}

/// Records whose store key is not in `recent_keys`.
pub fn exclude_recent(population: &[ResourceRecord], recent_keys: &HashSet<String>) -> Vec<ResourceRecord> {
    if recent_keys.is_empty() {
        return population.to_vec();
    }
    population
        .iter()
        .filter(|r| r.key().map_or(true, |k| !recent_keys.contains(&k)))
        .cloned()
        .collect()
}

/// The domain number of a record on the given axis.
pub fn domain_of(record: &ResourceRecord, axis: DomainAxis) -> Option<u32> {
    match axis {
        DomainAxis::Fault => record.fault_domain,
        DomainAxis::Update => record.update_domain,
    }
}

/// Every `(availability set, domain)` combination present in `records`.
pub fn domain_combinations(records: &[ResourceRecord], axis: DomainAxis) -> BTreeSet<CombinationKey> {
    let mut combinations = BTreeSet::new();
    for record in records {
        let (Some(set_id), Some(domain)) = (record.availability_set_id.as_deref(), domain_of(record, axis)) else {
            continue;
        };
        match CombinationKey::availability_set(set_id, axis, domain) {
            Ok(key) => {
                combinations.insert(key);
            }
            Err(e) => warn!(id = %record.id, error = %e, "skipping record with unusable availability set id"),
        }
    }
    combinations
}

/// Every `(region, zone)` combination present in `records`, restricted to
/// `regions` (case-insensitive) when that list is non-empty.
pub fn zone_combinations(records: &[ResourceRecord], regions: &[String]) -> BTreeSet<CombinationKey> {
    let mut combinations = BTreeSet::new();
    for record in records {
        let Some(zone) = record.availability_zone.as_deref().filter(|z| !z.is_empty()) else {
            continue;
        };
        if !regions.is_empty() && !regions.iter().any(|r| r.eq_ignore_ascii_case(&record.region_name)) {
            continue;
        }
        match CombinationKey::availability_zone(&record.region_name.to_ascii_lowercase(), zone) {
            Ok(key) => {
                combinations.insert(key);
            }
            Err(e) => warn!(id = %record.id, error = %e, "skipping record with unusable zone"),
        }
    }
    combinations
}

/// Pick one combination that was not used recently. `None` when every
/// candidate of the requested axis is recent.
pub fn select_combination<R>(
    candidates: &BTreeSet<CombinationKey>,
    recent: &HashSet<CombinationKey>,
    axis: Option<DomainAxis>,
    rng: &mut R,
) -> Option<CombinationKey>
where
    R: Rng + ?Sized,
{
    let remaining: Vec<&CombinationKey> = candidates
        .iter()
        .filter(|c| c.axis() == axis && !recent.contains(*c))
        .collect();
    random_one(&remaining, rng).ok().map(|c| (*c).clone())
}
