use log::debug;
use logging_timer::time;

use crate::config::ClusterParams;
use crate::fiducials::CandidatePoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Unvisited,
    Noise,
    Cluster(usize),
}

/// Density-based cluster labels over candidate points: a point is a core
/// point when at least `min_samples` candidates (itself included) lie
/// within `eps`; clusters grow from core points, and points reachable
/// from no core point are noise (`None`).
pub fn cluster_labels(points: &[CandidatePoint], params: &ClusterParams) -> Vec<Option<usize>> {
    let eps_sq = params.eps * params.eps;
    let neighbors_of = |i: usize| -> Vec<usize> {
        let a = &points[i];
        points
            .iter()
            .enumerate()
            .filter(|(_, b)| {
                let dx = (a.x - b.x) as f64;
                let dy = (a.y - b.y) as f64;
                dx * dx + dy * dy <= eps_sq
            })
            .map(|(j, _)| j)
            .collect()
    };

    let mut labels = vec![Label::Unvisited; points.len()];
    let mut next_cluster = 0;

    for i in 0..points.len() {
        if labels[i] != Label::Unvisited {
            continue;
        }
        let seeds = neighbors_of(i);
        if seeds.len() < params.min_samples {
            labels[i] = Label::Noise;
            continue;
        }

        let cluster = next_cluster;
        next_cluster += 1;
        labels[i] = Label::Cluster(cluster);

        let mut queue = seeds;
        let mut head = 0;
        while head < queue.len() {
            let j = queue[head];
            head += 1;
            if labels[j] == Label::Noise {
                // border point reached from a core point
                labels[j] = Label::Cluster(cluster);
            }
            if labels[j] != Label::Unvisited {
                continue;
            }
            labels[j] = Label::Cluster(cluster);
            let j_neighbors = neighbors_of(j);
            if j_neighbors.len() >= params.min_samples {
                queue.extend(j_neighbors);
            }
        }
    }

    labels
        .into_iter()
        .map(|label| match label {
            Label::Cluster(c) => Some(c),
            _ => None,
        })
        .collect()
}

/// Keeps only the members of the largest cluster, in their original
/// order. Ties go to the first cluster index reaching the maximum count.
/// Returns `None` when every point is noise.
#[time]
pub fn largest_cluster(
    points: &[CandidatePoint],
    params: &ClusterParams,
) -> Option<Vec<CandidatePoint>> {
    let labels = cluster_labels(points, params);

    let cluster_count = labels.iter().flatten().max().map_or(0, |&m| m + 1);
    let mut counts = vec![0usize; cluster_count];
    for label in labels.iter().flatten() {
        counts[*label] += 1;
    }

    let mut best: Option<(usize, usize)> = None;
    for (cluster, &count) in counts.iter().enumerate() {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((cluster, count));
        }
    }
    let (winner, count) = best?;
    debug!(
        "isolated main grid: cluster {} with {} of {} points",
        winner,
        count,
        points.len()
    );

    Some(
        points
            .iter()
            .zip(labels.iter())
            .filter(|(_, label)| **label == Some(winner))
            .map(|(p, _)| *p)
            .collect(),
    )
}
