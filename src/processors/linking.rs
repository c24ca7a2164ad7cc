//! Frame-to-frame linking of region centroids into trajectories.
//!
//! The linker follows the classic nearest-neighbour tracking scheme:
//! - `kiddo` KD-tree radius queries find candidate links between the last
//!   known position of each live track and the points of the next frame
//! - candidate links are grouped into independent subnetworks
//! - each subnetwork is solved exactly, minimizing total squared displacement
//! - subnetworks too large to solve are split by shrinking the search range
//!   (`adaptive_step`) until they fit, or until the range would fall below
//!   `adaptive_stop`, which is reported as [`LinkError::SubnetOversize`]
//!
//! # Example
//!
//! ```no_run
//! use grain_tracks::config::LinkingConfig;
//! use grain_tracks::processors::linking::Linker;
//!
//! let frames = vec![vec![vec![1.0, 1.0]], vec![vec![2.0, 2.0]]];
//! let linker = Linker::new(LinkingConfig::default()).unwrap();
//! let ids = linker.link(&frames).unwrap();
//! assert_eq!(ids, vec![vec![0], vec![0]]);
//! ```

use std::collections::HashMap;

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use thiserror::Error;

use crate::config::LinkingConfig;

/// Largest number of spatial axes the linker accepts.
pub const MAX_SPATIAL_DIMS: usize = 3;

/// Errors that can occur while linking frames.
#[derive(Error, Debug)]
pub enum LinkError {
    /// Adaptive search could not split an ambiguous subnetwork.
    #[error(
        "subnetwork of {sources} tracks at frame {frame} is too complex to link \
         (search range would drop below {adaptive_stop})"
    )]
    SubnetOversize {
        frame: usize,
        sources: usize,
        adaptive_stop: f64,
    },

    #[error("points with {ndim} spatial dimensions are not supported (1 to {MAX_SPATIAL_DIMS})")]
    UnsupportedDimensionality { ndim: usize },

    #[error("frame {frame} has a {found}-dimensional point, expected {expected}")]
    InconsistentDimensionality {
        frame: usize,
        expected: usize,
        found: usize,
    },

    #[error("invalid linking parameters: {0}")]
    InvalidConfig(String),
}

/// Result type for linking operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// A track that may still receive points.
#[derive(Debug, Clone)]
struct LiveTrack<const K: usize> {
    id: u64,
    position: [f64; K],
    last_frame: usize,
}

/// Candidate links of one source track: `(point index, squared distance)`,
/// nearest first.
type Candidates = Vec<(usize, f64)>;

/// Nearest-neighbour linker with adaptive search range.
#[derive(Debug, Clone)]
pub struct Linker {
    config: LinkingConfig,
}

impl Linker {
    /// Create a linker, validating its parameters.
    pub fn new(config: LinkingConfig) -> Result<Self> {
        if !(config.search_range > 0.0) {
            return Err(LinkError::InvalidConfig(format!(
                "search_range must be positive, got {}",
                config.search_range
            )));
        }
        if !(config.adaptive_step > 0.0 && config.adaptive_step < 1.0) {
            return Err(LinkError::InvalidConfig(format!(
                "adaptive_step must be in (0, 1), got {}",
                config.adaptive_step
            )));
        }
        if config.max_subnet_size == 0 {
            return Err(LinkError::InvalidConfig(
                "max_subnet_size must be at least 1".to_string(),
            ));
        }
        Ok(Self { config })
    }

    /// Parameters this linker was built with.
    pub fn config(&self) -> &LinkingConfig {
        &self.config
    }

    /// Link per-frame point sets into tracks.
    ///
    /// `frames[t]` holds the points of frame `t`, each with one coordinate per
    /// spatial axis. The result has the same shape: `ids[t][i]` is the track
    /// id of `frames[t][i]`. Ids are assigned from 0 in order of first
    /// appearance. Frames without points are allowed.
    ///
    /// # Errors
    ///
    /// - [`LinkError::SubnetOversize`] if an ambiguous subnetwork cannot be
    ///   split by the adaptive search
    /// - [`LinkError::UnsupportedDimensionality`] for points with no axes or
    ///   more than [`MAX_SPATIAL_DIMS`]
    /// - [`LinkError::InconsistentDimensionality`] if point lengths differ
    pub fn link(&self, frames: &[Vec<Vec<f64>>]) -> Result<Vec<Vec<u64>>> {
        let ndim = spatial_dims(frames)?;
        log::debug!("linking {} frames of {}-d points", frames.len(), ndim);

        // One tree axis per spatial axis, never a constant one
        match ndim {
            1 => self.link_points::<1>(frames),
            2 => self.link_points::<2>(frames),
            3 => self.link_points::<3>(frames),
            // No points in any frame
            _ => Ok(frames.iter().map(|_| Vec::new()).collect()),
        }
    }

    fn link_points<const K: usize>(&self, frames: &[Vec<Vec<f64>>]) -> Result<Vec<Vec<u64>>> {
        let mut live: Vec<LiveTrack<K>> = Vec::new();
        let mut next_id: u64 = 0;
        let mut all_ids = Vec::with_capacity(frames.len());

        for (t, frame) in frames.iter().enumerate() {
            let points: Vec<[f64; K]> = frame
                .iter()
                .map(|p| std::array::from_fn(|axis| p[axis]))
                .collect();
            let mut ids: Vec<Option<u64>> = vec![None; points.len()];

            if !points.is_empty() && !live.is_empty() {
                let assignment = self.link_frame(t, &live, &points)?;
                for (track, target) in live.iter_mut().zip(assignment) {
                    if let Some(p) = target {
                        ids[p] = Some(track.id);
                        track.position = points[p];
                        track.last_frame = t;
                    }
                }
            }

            // Unmatched points start new tracks, in point order
            let mut frame_ids = Vec::with_capacity(points.len());
            for (p, id) in ids.into_iter().enumerate() {
                let id = id.unwrap_or_else(|| {
                    let id = next_id;
                    next_id += 1;
                    live.push(LiveTrack {
                        id,
                        position: points[p],
                        last_frame: t,
                    });
                    id
                });
                frame_ids.push(id);
            }

            // Tracks unmatched for longer than `memory` frames end here
            let memory = self.config.memory;
            live.retain(|track| t - track.last_frame <= memory);

            all_ids.push(frame_ids);
        }

        log::info!("linked {} frames into {} tracks", frames.len(), next_id);
        Ok(all_ids)
    }

    /// Assign points of frame `t` to live tracks.
    ///
    /// Returns, per live track, the index of its point or `None`.
    fn link_frame<const K: usize>(
        &self,
        t: usize,
        live: &[LiveTrack<K>],
        points: &[[f64; K]],
    ) -> Result<Vec<Option<usize>>> {
        let range = self.config.search_range;
        let tree: ImmutableKdTree<f64, K> = ImmutableKdTree::new_from_slice(points);

        let candidates: Vec<Candidates> = live
            .iter()
            .map(|track| {
                let mut found: Candidates = tree
                    .within::<SquaredEuclidean>(&track.position, range * range)
                    .iter()
                    .map(|nn| (nn.item as usize, nn.distance))
                    .filter(|&(_, d2)| d2 <= range * range)
                    .collect();
                found.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
                found
            })
            .collect();

        let sources: Vec<usize> = (0..live.len()).collect();
        let mut assignment = vec![None; live.len()];
        self.resolve(t, &sources, &candidates, range, &mut assignment)?;
        Ok(assignment)
    }

    /// Split `sources` into subnetworks at `range` and solve each one,
    /// shrinking the range for subnetworks that are too large.
    fn resolve(
        &self,
        t: usize,
        sources: &[usize],
        candidates: &[Candidates],
        range: f64,
        assignment: &mut [Option<usize>],
    ) -> Result<()> {
        for group in subnetworks(sources, candidates, range) {
            if group.len() <= self.config.max_subnet_size {
                solve_subnet(&group, candidates, range, assignment);
                continue;
            }

            let next_range = range * self.config.adaptive_step;
            if next_range < self.config.adaptive_stop {
                return Err(LinkError::SubnetOversize {
                    frame: t,
                    sources: group.len(),
                    adaptive_stop: self.config.adaptive_stop,
                });
            }
            log::debug!(
                "frame {}: subnetwork of {} tracks, retrying at search range {}",
                t,
                group.len(),
                next_range
            );
            self.resolve(t, &group, candidates, next_range, assignment)?;
        }
        Ok(())
    }
}

/// Number of spatial axes shared by every point.
fn spatial_dims(frames: &[Vec<Vec<f64>>]) -> Result<usize> {
    let mut ndim: Option<usize> = None;
    for (t, frame) in frames.iter().enumerate() {
        for point in frame {
            match ndim {
                None => ndim = Some(point.len()),
                Some(expected) if expected != point.len() => {
                    return Err(LinkError::InconsistentDimensionality {
                        frame: t,
                        expected,
                        found: point.len(),
                    });
                }
                Some(_) => {}
            }
        }
    }

    match ndim {
        None => Ok(0),
        Some(ndim) if ndim == 0 || ndim > MAX_SPATIAL_DIMS => {
            Err(LinkError::UnsupportedDimensionality { ndim })
        }
        Some(ndim) => Ok(ndim),
    }
}

/// Group sources that compete for points within `range`.
///
/// Groups are returned in order of their first source.
fn subnetworks(sources: &[usize], candidates: &[Candidates], range: f64) -> Vec<Vec<usize>> {
    let range_sq = range * range;
    let n = sources.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    // Point index -> first source (position in `sources`) that reaches it
    let mut owner: HashMap<usize, usize> = HashMap::new();
    for (i, &src) in sources.iter().enumerate() {
        for &(p, d2) in &candidates[src] {
            if d2 > range_sq {
                break;
            }
            match owner.get(&p) {
                Some(&j) => {
                    let ri = find(&mut parent, i);
                    let rj = find(&mut parent, j);
                    if ri != rj {
                        parent[ri.max(rj)] = ri.min(rj);
                    }
                }
                None => {
                    owner.insert(p, i);
                }
            }
        }
    }

    let mut group_index: HashMap<usize, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (i, &src) in sources.iter().enumerate() {
        let root = find(&mut parent, i);
        let g = *group_index.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[g].push(src);
    }
    groups
}

/// Solve one subnetwork exactly.
///
/// Every source either takes one of its candidate points within `range` or
/// stays unlinked at a cost of `range²`; each point is taken at most once.
/// The assignment with the lowest total squared displacement wins, ties
/// going to the first one found (nearest candidates are tried first).
fn solve_subnet(
    group: &[usize],
    candidates: &[Candidates],
    range: f64,
    assignment: &mut [Option<usize>],
) {
    let range_sq = range * range;
    let options: Vec<&[(usize, f64)]> = group
        .iter()
        .map(|&src| {
            let c = &candidates[src];
            let end = c.partition_point(|&(_, d2)| d2 <= range_sq);
            &c[..end]
        })
        .collect();

    struct Search<'a> {
        options: &'a [&'a [(usize, f64)]],
        null_cost: f64,
        used: Vec<usize>,
        current: Vec<Option<usize>>,
        best: Vec<Option<usize>>,
        best_cost: f64,
    }

    impl Search<'_> {
        fn visit(&mut self, depth: usize, cost: f64) {
            if cost >= self.best_cost {
                return;
            }
            if depth == self.options.len() {
                self.best_cost = cost;
                self.best.clone_from(&self.current);
                return;
            }
            for &(p, d2) in self.options[depth] {
                if self.used.contains(&p) {
                    continue;
                }
                self.used.push(p);
                self.current[depth] = Some(p);
                self.visit(depth + 1, cost + d2);
                self.current[depth] = None;
                self.used.pop();
            }
            self.visit(depth + 1, cost + self.null_cost);
        }
    }

    let mut search = Search {
        options: &options,
        null_cost: range_sq,
        used: Vec::with_capacity(group.len()),
        current: vec![None; group.len()],
        best: vec![None; group.len()],
        best_cost: f64::INFINITY,
    };
    search.visit(0, 0.0);

    for (&src, choice) in group.iter().zip(search.best) {
        assignment[src] = choice;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linker() -> Linker {
        Linker::new(LinkingConfig::default()).unwrap()
    }

    /// Deterministic values in [0, 1).
    fn next_unit(seed: &mut u64) -> f64 {
        *seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (*seed >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Grain-like centroids: a 30 x 20 lattice with 40 px spacing, each
    /// point jittered by up to 10 px.
    fn scattered_centroids(seed: u64) -> Vec<Vec<f64>> {
        let mut seed = seed;
        let mut points = Vec::new();
        for row in 0..30 {
            for col in 0..20 {
                let y = row as f64 * 40.0 + 10.0 * next_unit(&mut seed);
                let x = col as f64 * 40.0 + 10.0 * next_unit(&mut seed);
                points.push(vec![y, x]);
            }
        }
        points
    }

    #[test]
    fn test_single_moving_point() {
        let frames = vec![
            vec![vec![1.0, 1.0]],
            vec![vec![2.0, 2.5]],
            vec![vec![3.0, 4.0]],
            vec![vec![4.5, 5.0]],
        ];
        let ids = linker().link(&frames).unwrap();
        assert_eq!(ids, vec![vec![0], vec![0], vec![0], vec![0]]);
    }

    #[test]
    fn test_two_disjoint_tracks_stay_separate() {
        let frames = vec![
            vec![vec![10.0, 10.0], vec![50.0, 50.0]],
            vec![vec![51.0, 50.0], vec![11.0, 11.0]],
            vec![vec![12.0, 12.0], vec![52.0, 50.0]],
        ];
        let ids = linker().link(&frames).unwrap();
        assert_eq!(ids[0], vec![0, 1]);
        assert_eq!(ids[1], vec![1, 0]);
        assert_eq!(ids[2], vec![0, 1]);
    }

    #[test]
    fn test_prefers_lowest_total_displacement() {
        // Greedy nearest-first would give point (0, 1) to the track at 1.5
        let frames = vec![
            vec![vec![0.0, 1.5], vec![0.0, 0.0]],
            vec![vec![0.0, 1.0], vec![0.0, 3.5]],
        ];
        let ids = linker().link(&frames).unwrap();
        assert_eq!(ids[1], vec![1, 0]);
    }

    #[test]
    fn test_out_of_range_point_starts_new_track() {
        let frames = vec![vec![vec![0.0, 0.0]], vec![vec![20.0, 20.0]]];
        let ids = linker().link(&frames).unwrap();
        assert_eq!(ids, vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_empty_frame_ends_tracks_without_memory() {
        let frames = vec![vec![vec![0.0, 0.0]], vec![], vec![vec![0.5, 0.0]]];
        let ids = linker().link(&frames).unwrap();
        assert_eq!(ids, vec![vec![0], vec![], vec![1]]);
    }

    #[test]
    fn test_memory_bridges_gap() {
        let config = LinkingConfig {
            memory: 1,
            ..LinkingConfig::default()
        };
        let frames = vec![vec![vec![0.0, 0.0]], vec![], vec![vec![0.5, 0.0]]];
        let ids = Linker::new(config).unwrap().link(&frames).unwrap();
        assert_eq!(ids, vec![vec![0], vec![], vec![0]]);
    }

    #[test]
    fn test_adaptive_search_splits_subnetwork() {
        let config = LinkingConfig {
            max_subnet_size: 1,
            ..LinkingConfig::default()
        };
        let frames = vec![
            vec![vec![0.0, 0.0], vec![0.0, 5.0]],
            vec![vec![0.0, 1.0], vec![0.0, 6.0]],
        ];
        let ids = Linker::new(config).unwrap().link(&frames).unwrap();
        assert_eq!(ids[1], vec![0, 1]);
    }

    #[test]
    fn test_subnet_oversize_is_reported() {
        let config = LinkingConfig {
            max_subnet_size: 1,
            ..LinkingConfig::default()
        };
        let frames = vec![
            vec![vec![0.0, 0.0], vec![0.0, 0.2]],
            vec![vec![0.0, 0.1], vec![0.0, 0.3]],
        ];
        let result = Linker::new(config).unwrap().link(&frames);
        match result {
            Err(LinkError::SubnetOversize { frame, sources, .. }) => {
                assert_eq!(frame, 1);
                assert_eq!(sources, 2);
            }
            other => panic!("Expected SubnetOversize, got {:?}", other),
        }
    }

    #[test]
    fn test_links_hundreds_of_scattered_2d_points() {
        let first = scattered_centroids(7);
        let shifted = |dy: f64, dx: f64| -> Vec<Vec<f64>> {
            first.iter().map(|p| vec![p[0] + dy, p[1] + dx]).collect()
        };
        let frames = vec![first.clone(), shifted(1.5, -1.0), shifted(3.0, -2.0)];

        let ids = linker().link(&frames).unwrap();

        let expected: Vec<u64> = (0..600).collect();
        assert_eq!(ids[0], expected);
        assert_eq!(ids[1], expected);
        assert_eq!(ids[2], expected);
    }

    #[test]
    fn test_links_over_a_thousand_points_in_any_point_order() {
        let mut first = scattered_centroids(11);
        // A second lattice in the gaps of the first, at least 14 px away
        let interleaved = scattered_centroids(13)
            .into_iter()
            .map(|p| vec![p[0] + 20.0, p[1] + 20.0]);
        first.extend(interleaved);
        let second: Vec<Vec<f64>> = first
            .iter()
            .rev()
            .map(|p| vec![p[0] - 0.5, p[1] + 0.5])
            .collect();

        let ids = linker().link(&[first.clone(), second]).unwrap();

        let n = first.len() as u64;
        let reversed: Vec<u64> = (0..n).rev().collect();
        assert_eq!(ids[1], reversed);
    }

    #[test]
    fn test_dense_subnetwork_at_size_limit_is_solved_exactly() {
        // Eight tracks 1 px apart on a line, all moving +0.6 px. The nearest
        // point of every track but the first is its left neighbour's (0.4 px),
        // so the eight form one subnetwork whose lowest total cost is still
        // the identity assignment.
        let config = LinkingConfig {
            search_range: 1.5,
            max_subnet_size: 8,
            ..LinkingConfig::default()
        };
        let first: Vec<Vec<f64>> = (0..8).map(|i| vec![i as f64]).collect();
        let second: Vec<Vec<f64>> = (0..8).map(|i| vec![i as f64 + 0.6]).collect();

        let ids = Linker::new(config).unwrap().link(&[first, second]).unwrap();

        let expected: Vec<u64> = (0..8).collect();
        assert_eq!(ids[1], expected);
    }

    #[test]
    fn test_dense_subnetwork_groups_every_source() {
        let range: f64 = 1.5;
        let targets: Vec<f64> = (0..8).map(|i| i as f64 + 0.6).collect();
        let candidates: Vec<Candidates> = (0..8)
            .map(|i| {
                let mut found: Candidates = targets
                    .iter()
                    .enumerate()
                    .map(|(p, &x)| (p, (x - i as f64).powi(2)))
                    .filter(|&(_, d2)| d2 <= range * range)
                    .collect();
                found.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
                found
            })
            .collect();
        let sources: Vec<usize> = (0..8).collect();

        let groups = subnetworks(&sources, &candidates, range);
        assert_eq!(groups, vec![sources.clone()]);

        let mut assignment = vec![None; 8];
        solve_subnet(&sources, &candidates, range, &mut assignment);
        let expected: Vec<Option<usize>> = (0..8).map(Some).collect();
        assert_eq!(assignment, expected);
    }

    #[test]
    fn test_one_dimensional_points() {
        let frames = vec![vec![vec![0.0], vec![10.0]], vec![vec![10.5], vec![0.5]]];
        let ids = linker().link(&frames).unwrap();
        assert_eq!(ids[1], vec![1, 0]);
    }

    #[test]
    fn test_zero_dimensional_points_are_rejected() {
        let frames = vec![vec![Vec::new()]];
        assert!(matches!(
            linker().link(&frames),
            Err(LinkError::UnsupportedDimensionality { ndim: 0 })
        ));
    }

    #[test]
    fn test_all_empty_frames() {
        let frames: Vec<Vec<Vec<f64>>> = vec![vec![], vec![]];
        let ids = linker().link(&frames).unwrap();
        assert_eq!(ids, vec![Vec::<u64>::new(), Vec::new()]);
    }

    #[test]
    fn test_unsupported_dimensionality() {
        let frames = vec![vec![vec![0.0; 4]]];
        assert!(matches!(
            linker().link(&frames),
            Err(LinkError::UnsupportedDimensionality { ndim: 4 })
        ));
    }

    #[test]
    fn test_inconsistent_dimensionality() {
        let frames = vec![vec![vec![0.0, 0.0]], vec![vec![0.0]]];
        assert!(matches!(
            linker().link(&frames),
            Err(LinkError::InconsistentDimensionality { frame: 1, .. })
        ));
    }

    #[test]
    fn test_invalid_adaptive_step() {
        let config = LinkingConfig {
            adaptive_step: 1.0,
            ..LinkingConfig::default()
        };
        assert!(matches!(
            Linker::new(config),
            Err(LinkError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_solve_subnet_respects_null_cost() {
        // One point, two sources: the closer source takes it
        let candidates = vec![vec![(0usize, 4.0)], vec![(0usize, 1.0)]];
        let mut assignment = vec![None; 2];
        solve_subnet(&[0, 1], &candidates, 8.0, &mut assignment);
        assert_eq!(assignment, vec![None, Some(0)]);
    }
}
