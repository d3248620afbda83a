//! Greedy modularity community detection (Clauset–Newman–Moore).
//!
//! Operates on an undirected weighted projection given as node count plus
//! edge list. Starts from singletons and repeatedly merges the pair of
//! adjacent communities with the largest modularity gain until no merge
//! improves modularity. Pairs are scanned in index order and only a strictly
//! larger gain replaces the current best, so results are deterministic.

use std::collections::BTreeMap;

/// Partition nodes `0..n` into communities.
///
/// Parallel edges accumulate weight; self-loops are ignored. Returned
/// communities have sorted members and are ordered by size descending,
/// then by smallest member.
pub fn greedy_modularity(n: usize, edges: &[(usize, usize, f64)]) -> Vec<Vec<usize>> {
    // Community adjacency: w[a][b] = total edge weight between a and b.
    let mut w: BTreeMap<usize, BTreeMap<usize, f64>> = (0..n).map(|i| (i, BTreeMap::new())).collect();
    let mut total = 0.0;
    for &(a, b, weight) in edges {
        if a == b || a >= n || b >= n || weight <= 0.0 {
            continue;
        }
        *w.entry(a).or_default().entry(b).or_insert(0.0) += weight;
        *w.entry(b).or_default().entry(a).or_insert(0.0) += weight;
        total += weight;
    }

    let mut members: BTreeMap<usize, Vec<usize>> = (0..n).map(|i| (i, vec![i])).collect();
    if total > 0.0 {
        // a[i]: fraction of edge endpoints attached to community i.
        let mut a: BTreeMap<usize, f64> = w
            .iter()
            .map(|(&i, nbrs)| (i, nbrs.values().sum::<f64>() / (2.0 * total)))
            .collect();

        loop {
            let mut best: Option<(f64, usize, usize)> = None;
            for (&i, nbrs) in &w {
                for (&j, &wij) in nbrs.range(i + 1..) {
                    let gain = wij / total - 2.0 * share(&a, i) * share(&a, j);
                    if best.is_none_or(|(g, _, _)| gain > g) {
                        best = Some((gain, i, j));
                    }
                }
            }
            let Some((gain, keep, absorb)) = best else {
                break;
            };
            if gain <= 0.0 {
                break;
            }
            merge(&mut w, &mut a, &mut members, keep, absorb);
        }
    }

    let mut communities: Vec<Vec<usize>> = members
        .into_values()
        .map(|mut m| {
            m.sort_unstable();
            m
        })
        .collect();
    communities.sort_by(|x, y| y.len().cmp(&x.len()).then_with(|| x[0].cmp(&y[0])));
    communities
}

fn share(a: &BTreeMap<usize, f64>, i: usize) -> f64 {
    a.get(&i).copied().unwrap_or(0.0)
}

fn merge(
    w: &mut BTreeMap<usize, BTreeMap<usize, f64>>,
    a: &mut BTreeMap<usize, f64>,
    members: &mut BTreeMap<usize, Vec<usize>>,
    keep: usize,
    absorb: usize,
) {
    let absorbed = w.remove(&absorb).unwrap_or_default();
    for (nbr, weight) in absorbed {
        if nbr == keep {
            continue;
        }
        if let Some(row) = w.get_mut(&nbr) {
            row.remove(&absorb);
            *row.entry(keep).or_insert(0.0) += weight;
        }
        *w.entry(keep).or_default().entry(nbr).or_insert(0.0) += weight;
    }
    if let Some(row) = w.get_mut(&keep) {
        row.remove(&absorb);
    }

    let absorbed_a = a.remove(&absorb).unwrap_or(0.0);
    *a.entry(keep).or_insert(0.0) += absorbed_a;

    let moved = members.remove(&absorb).unwrap_or_default();
    members.entry(keep).or_default().extend(moved);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clique(nodes: &[usize]) -> Vec<(usize, usize, f64)> {
        let mut edges = Vec::new();
        for (i, &a) in nodes.iter().enumerate() {
            for &b in &nodes[i + 1..] {
                edges.push((a, b, 1.0));
            }
        }
        edges
    }

    #[test]
    fn two_bridged_cliques_split() {
        let mut edges = clique(&[0, 1, 2, 3, 4]);
        edges.extend(clique(&[5, 6, 7, 8, 9]));
        edges.push((4, 5, 1.0));

        let communities = greedy_modularity(10, &edges);
        assert_eq!(communities.len(), 2);
        assert_eq!(communities[0], vec![0, 1, 2, 3, 4]);
        assert_eq!(communities[1], vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn isolated_nodes_stay_singletons() {
        let mut edges = clique(&[0, 1, 2]);
        edges.push((0, 0, 5.0));
        let communities = greedy_modularity(5, &edges);
        assert_eq!(communities[0], vec![0, 1, 2]);
        assert_eq!(communities[1], vec![3]);
        assert_eq!(communities[2], vec![4]);
    }

    #[test]
    fn no_edges_means_singletons() {
        let communities = greedy_modularity(3, &[]);
        assert_eq!(communities, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn deterministic_across_runs() {
        let mut edges = clique(&[0, 1, 2, 3]);
        edges.extend(clique(&[4, 5, 6, 7]));
        edges.push((3, 4, 1.0));
        edges.push((0, 7, 1.0));
        assert_eq!(greedy_modularity(8, &edges), greedy_modularity(8, &edges));
    }
}
