//! Weekly clustering: ISO-week feature aggregation plus seeded k-means.
//!
//! Daily values are averaged into ISO (year, week) buckets, standardized per
//! feature across weeks, and clustered with k-means. Seeding is fully
//! deterministic: identical input and seed always reproduce the same
//! week-to-cluster assignments.

use crate::core::{DateRange, SeriesAccessor};
use crate::error::{InsightError, Result};
use crate::utils::stats;
use chrono::Datelike;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Allowed cluster-count bounds.
pub const MIN_CLUSTERS: usize = 2;
pub const MAX_CLUSTERS: usize = 10;

/// Default k-means seed.
pub const DEFAULT_SEED: u64 = 42;

const MAX_ITER: usize = 100;

/// Cluster membership of one ISO week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyClusterAssignment {
    pub iso_year: i32,
    pub iso_week: u32,
    pub cluster: usize,
}

/// Weekly clustering output: one assignment per complete week, plus the
/// per-cluster mean of each feature in original units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyClusterResult {
    pub weeks: Vec<WeeklyClusterAssignment>,
    pub cluster_profiles: BTreeMap<usize, BTreeMap<String, f64>>,
}

/// Cluster ISO weeks by their mean feature values.
///
/// Weeks missing any requested feature entirely are dropped. The returned
/// cluster id set always has exactly `n_clusters` members.
pub fn weekly_clusters<A>(
    accessor: &A,
    features: &[&str],
    n_clusters: usize,
    seed: u64,
    range: &DateRange,
) -> Result<WeeklyClusterResult>
where
    A: SeriesAccessor + ?Sized,
{
    if features.is_empty() {
        return Err(InsightError::InvalidParameter(
            "at least one feature is required".to_string(),
        ));
    }
    if !(MIN_CLUSTERS..=MAX_CLUSTERS).contains(&n_clusters) {
        return Err(InsightError::InvalidParameter(format!(
            "n_clusters must be within [{MIN_CLUSTERS}, {MAX_CLUSTERS}], got {n_clusters}"
        )));
    }

    // Weekly mean per (feature, ISO week).
    let mut week_sums: Vec<BTreeMap<(i32, u32), (f64, usize)>> = vec![BTreeMap::new(); features.len()];
    for (feature, sums) in features.iter().zip(week_sums.iter_mut()) {
        let series = accessor.get_series(feature, range)?;
        for (date, value) in series.observed() {
            let iso = date.iso_week();
            let entry = sums.entry((iso.year(), iso.week())).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }

    // Keep weeks observed in every feature, in calendar order.
    let week_keys: Vec<(i32, u32)> = week_sums[0]
        .keys()
        .filter(|k| week_sums.iter().all(|s| s.contains_key(k)))
        .copied()
        .collect();
    if week_keys.len() < n_clusters {
        return Err(InsightError::InsufficientData {
            needed: n_clusters,
            got: week_keys.len(),
        });
    }

    let raw_rows: Vec<Vec<f64>> = week_keys
        .iter()
        .map(|k| {
            week_sums
                .iter()
                .map(|sums| {
                    let (sum, count) = sums[k];
                    sum / count as f64
                })
                .collect()
        })
        .collect();

    let standardized = standardize(&raw_rows);
    let labels = kmeans(&standardized, n_clusters, seed);

    let weeks: Vec<WeeklyClusterAssignment> = week_keys
        .iter()
        .zip(labels.iter())
        .map(|(&(iso_year, iso_week), &cluster)| WeeklyClusterAssignment {
            iso_year,
            iso_week,
            cluster,
        })
        .collect();

    // Profiles come from the raw (unstandardized) weekly means.
    let mut cluster_profiles = BTreeMap::new();
    for cluster in 0..n_clusters {
        let members: Vec<&Vec<f64>> = raw_rows
            .iter()
            .zip(labels.iter())
            .filter(|(_, &l)| l == cluster)
            .map(|(row, _)| row)
            .collect();
        let mut profile = BTreeMap::new();
        for (j, feature) in features.iter().enumerate() {
            let mean = members.iter().map(|row| row[j]).sum::<f64>() / members.len() as f64;
            profile.insert(feature.to_string(), mean);
        }
        cluster_profiles.insert(cluster, profile);
    }

    debug!(
        features = features.len(),
        weeks = weeks.len(),
        n_clusters,
        "weekly clustering"
    );
    Ok(WeeklyClusterResult {
        weeks,
        cluster_profiles,
    })
}

/// Z-score each feature column across weeks. A zero-variance column is
/// zeroed out instead of divided by zero, so it contributes no distance.
fn standardize(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n_features = rows.first().map_or(0, |r| r.len());
    let mut out = vec![vec![0.0; n_features]; rows.len()];
    for j in 0..n_features {
        let column: Vec<f64> = rows.iter().map(|r| r[j]).collect();
        let mean = stats::mean(&column);
        let std = stats::std_dev(&column);
        if std.is_finite() && std > 1e-10 {
            for (i, row) in rows.iter().enumerate() {
                out[i][j] = (row[j] - mean) / std;
            }
        }
    }
    out
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

fn nearest_centroid(point: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let dist = squared_distance(point, c);
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    best
}

/// Seeded k-means over standardized rows; requires `k <= rows.len()`.
fn kmeans(rows: &[Vec<f64>], k: usize, seed: u64) -> Vec<usize> {
    let n = rows.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = init_centroids(rows, k, &mut rng);
    let mut labels = vec![0usize; n];

    for _ in 0..MAX_ITER {
        let next: Vec<usize> = rows.iter().map(|r| nearest_centroid(r, &centroids)).collect();
        if next == labels {
            break;
        }
        labels = next;
        update_centroids(rows, &labels, &mut centroids);
    }

    rebalance_empty_clusters(rows, &mut labels, k);
    labels
}

/// k-means++ style initialization: later centroids are sampled with
/// probability proportional to their squared distance from the nearest
/// already-chosen centroid.
fn init_centroids(rows: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = rows.len();
    let mut centroids = Vec::with_capacity(k);
    centroids.push(rows[rng.gen_range(0..n)].clone());

    while centroids.len() < k {
        let distances: Vec<f64> = rows
            .iter()
            .map(|r| {
                centroids
                    .iter()
                    .map(|c| squared_distance(r, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = distances.iter().sum();
        let pick = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = n - 1;
            for (i, &d) in distances.iter().enumerate() {
                target -= d;
                if target <= 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        } else {
            // All points coincide with existing centroids.
            rng.gen_range(0..n)
        };
        centroids.push(rows[pick].clone());
    }
    centroids
}

fn update_centroids(rows: &[Vec<f64>], labels: &[usize], centroids: &mut [Vec<f64>]) {
    let n_features = rows.first().map_or(0, |r| r.len());
    for (cluster, centroid) in centroids.iter_mut().enumerate() {
        let members: Vec<&Vec<f64>> = rows
            .iter()
            .zip(labels.iter())
            .filter(|(_, &l)| l == cluster)
            .map(|(r, _)| r)
            .collect();
        if members.is_empty() {
            // Re-seed an empty cluster with the point farthest from its
            // current centroid; the next assignment pass claims it.
            if let Some((idx, _)) = rows
                .iter()
                .enumerate()
                .map(|(i, r)| (i, squared_distance(r, &centroids_snapshot(rows, labels, i))))
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            {
                *centroid = rows[idx].clone();
            }
            continue;
        }
        for j in 0..n_features {
            centroid[j] = members.iter().map(|r| r[j]).sum::<f64>() / members.len() as f64;
        }
    }
}

/// Distance proxy used when re-seeding: each point's distance to the mean of
/// its own cluster.
fn centroids_snapshot(rows: &[Vec<f64>], labels: &[usize], index: usize) -> Vec<f64> {
    let cluster = labels[index];
    let members: Vec<&Vec<f64>> = rows
        .iter()
        .zip(labels.iter())
        .filter(|(_, &l)| l == cluster)
        .map(|(r, _)| r)
        .collect();
    let n_features = rows[index].len();
    (0..n_features)
        .map(|j| members.iter().map(|r| r[j]).sum::<f64>() / members.len() as f64)
        .collect()
}

/// Guarantee every cluster id in `0..k` has at least one member by moving
/// the farthest point out of the largest cluster into each empty one.
fn rebalance_empty_clusters(rows: &[Vec<f64>], labels: &mut [usize], k: usize) {
    loop {
        let mut sizes = vec![0usize; k];
        for &l in labels.iter() {
            sizes[l] += 1;
        }
        let Some(empty) = sizes.iter().position(|&s| s == 0) else {
            return;
        };
        // Donor: the largest cluster; move its farthest-from-center member.
        let donor = sizes
            .iter()
            .enumerate()
            .max_by_key(|(_, &s)| s)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let center = {
            let members: Vec<&Vec<f64>> = rows
                .iter()
                .zip(labels.iter())
                .filter(|(_, &l)| l == donor)
                .map(|(r, _)| r)
                .collect();
            let n_features = rows[0].len();
            (0..n_features)
                .map(|j| members.iter().map(|r| r[j]).sum::<f64>() / members.len() as f64)
                .collect::<Vec<f64>>()
        };
        let moved = rows
            .iter()
            .enumerate()
            .filter(|(i, _)| labels[*i] == donor)
            .max_by(|(_, a), (_, b)| {
                squared_distance(a, &center)
                    .partial_cmp(&squared_distance(b, &center))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i);
        match moved {
            Some(i) => labels[i] = empty,
            None => return,
        }
    }
}
