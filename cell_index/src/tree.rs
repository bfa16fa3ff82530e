//! Implementation of kd-tree creation and querying over cell centroids
use byteorder::{ByteOrder, BigEndian};
use log::{debug, info};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::geometry::Point;
use crate::io::{self, GetNode, NodePager, RecordPager, TreeParts};
use crate::layout;
use crate::node::{Axis, InternalNode, PagePointer};
use crate::page::RecordPage;

/// Row position of a cell in its dataset.
pub type CellIndex = u64;

pub const DEFAULT_LEAF_CAPACITY: usize = 64;

#[derive(Debug, PartialEq, Clone)]
pub struct TreeRecord {
    pub index: CellIndex,
    pub point: Point,
}

impl TreeRecord {

    pub fn new(index: CellIndex, point: Point) -> Self {
        return Self { index, point };
    }

    fn coordinate(&self, axis: Axis) -> f64 {

        return match axis {
            Axis::X => self.point.x,
            Axis::Y => self.point.y,
        };
    }

    pub fn from_slice(record_slice: &[u8]) -> Result<Self> {

        if record_slice.len() < layout::RECORD_SIZE {
            return Err(Error::IndexFormat("record is truncated".to_string()));
        }

        let index = BigEndian::read_u64(&record_slice[layout::INDEX_START..layout::INDEX_START + layout::INDEX_SIZE]);
        let x = BigEndian::read_f64(&record_slice[layout::X_START..layout::X_START + layout::X_SIZE]);
        let y = BigEndian::read_f64(&record_slice[layout::Y_START..layout::Y_START + layout::Y_SIZE]);

        return Ok(Self { index, point: Point::new(x, y) });
    }

    pub fn to_arr(&self) -> [u8; layout::RECORD_SIZE] {

        let mut arr = [0u8; layout::RECORD_SIZE];

        BigEndian::write_u64(&mut arr[layout::INDEX_START..layout::INDEX_START + layout::INDEX_SIZE], self.index);
        BigEndian::write_f64(&mut arr[layout::X_START..layout::X_START + layout::X_SIZE], self.point.x);
        BigEndian::write_f64(&mut arr[layout::Y_START..layout::Y_START + layout::Y_SIZE], self.point.y);

        return arr;
    }
}

/// A query hit: cell id and its Euclidean distance from the query point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: CellIndex,
    pub distance: f64,
}

///struct for keeping N- top closest points
///
///handles distance sorting and truncating to N items
#[derive(Debug)]
pub struct TopHits {
    pub max_length: usize,
    pub distances: Vec<f64>,
    pub records: Vec<Option<CellIndex>>,
}

impl TopHits {

    ///Distances are initially set to max f64 value
    pub fn new(max_length: usize) -> Self {

        return Self {
            max_length,
            distances: vec![f64::MAX; max_length],
            records: vec![None; max_length],
        }
    }

    ///Public method to be called on every record for consideration as a neighbor
    pub fn try_add(&mut self, distance: f64, index: CellIndex) {

        if self.max_length == 0 || distance >= self.get_highest_dist() {
            return;
        }

        //find insertion point
        let insert_index = self.distances.iter().position(|d| *d > distance).unwrap_or(self.max_length - 1);

        self.distances.insert(insert_index, distance);
        self.records.insert(insert_index, Some(index));

        //trim to correct size
        self.distances.truncate(self.max_length);
        self.records.truncate(self.max_length);
    }

    ///the highest distance of the list (e.g. the Nth highest distance where N=`max_length`)
    pub fn get_highest_dist(&self) -> f64 {

        return match self.distances.last() {
            Some(x) => *x,
            None => f64::MAX,
        };
    }

    pub fn into_neighbors(self) -> Vec<Neighbor> {

        return self.records.into_iter()
            .zip(self.distances)
            .filter_map(|(record, distance)| record.map(|index| Neighbor { index, distance }))
            .collect();
    }
}

#[derive(Debug)]
pub enum Direction {
    Left,
    Right,
}

#[derive(Debug)]
pub enum NodeAction {
    CheckIgnoredBranch,
    Descend,
}

/// Balanced kd-tree over the 2-D centroids of one dataset.
///
/// Internal nodes hold no points, only a split and pointers to their children. Leaf pages hold up
/// to `leaf_capacity` records. The tree is immutable once built; a dataset reload builds a new
/// one.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    pub node_handler: NodePager,
    pub record_handler: RecordPager,
    pub root: PagePointer,
    pub leaf_capacity: usize,
    num_points: usize,
}

impl SpatialIndex {

    /// Builds a tree over `points`; each point's id is its position in the slice.
    ///
    /// All points start in one page. Any page holding more than `leaf_capacity` records is split
    /// at the median of the axis for its depth, which keeps the tree balanced whatever the input
    /// order. Expected O(n log n).
    pub fn build(points: &[Point], leaf_capacity: usize) -> Result<Self> {

        let leaf_capacity = leaf_capacity.max(1);
        let start = Instant::now();

        let mut records: Vec<TreeRecord> = Vec::with_capacity(points.len());
        for (i, point) in points.iter().enumerate() {

            if !point.x.is_finite() || !point.y.is_finite() {
                return Err(Error::Data(format!("cell {} has non-finite coordinates ({}, {})", i, point.x, point.y)));
            }

            records.push(TreeRecord::new(i as CellIndex, *point));
        }

        let mut record_handler = RecordPager::new();
        let root = record_handler.add_page(RecordPage::from_records(records, leaf_capacity));

        let mut tree = Self {
            node_handler: NodePager::new(),
            record_handler,
            root,
            leaf_capacity,
            num_points: points.len(),
        };

        //(page to split, parent node and whether the page is its left child, depth)
        let mut to_split: Vec<(PagePointer, Option<(usize, bool)>, usize)> = vec![(root, None, 0)];

        while let Some((pointer, parent, depth)) = to_split.pop() {

            let index = match pointer {
                PagePointer::Leaf(x) => x,
                PagePointer::Node(_) => continue,
            };

            if !tree.record_handler.get_record_page(&index)?.is_overfull() {
                continue;
            }

            let (node_index, right_pointer) = tree.split(index, parent, depth)?;

            to_split.push((pointer, Some((node_index, true)), depth + 1));
            to_split.push((right_pointer, Some((node_index, false)), depth + 1));
        }

        info!("built spatial index over {} points: {} nodes, {} pages in {:.3}s",
              tree.num_points, tree.node_handler.len(), tree.record_handler.len(), start.elapsed().as_secs_f64());

        return Ok(tree);
    }

    ///Internal method to take a single overfull RecordPage, find its median on the axis for this
    ///depth, and split the records along that median. This is the only place where internal
    ///nodes are created. The left half stays at the page's address, the right half gets a new
    ///page, and the parent (or root) is repointed at the new node.
    fn split(&mut self, index: usize, parent: Option<(usize, bool)>, depth: usize) -> Result<(usize, PagePointer)> {

        let split_axis = Axis::for_depth(depth);

        let page = self.record_handler.take_page(&index)?;
        let mut records = page.records;

        let mid = records.len() / 2;
        records.select_nth_unstable_by(mid, |a, b| a.coordinate(split_axis).total_cmp(&b.coordinate(split_axis)));

        //everything in [..mid] is <= split_value and everything in [mid..] is >= split_value
        let split_value = records[mid].coordinate(split_axis);
        let right_records = records.split_off(mid);

        self.record_handler.update_page(RecordPage::from_records(records, self.leaf_capacity), &index)?;
        let right_pointer = self.record_handler.add_page(RecordPage::from_records(right_records, self.leaf_capacity));

        let this_pointer = PagePointer::Leaf(index);
        let node = InternalNode {
            left_child_pointer: this_pointer,
            right_child_pointer: right_pointer,
            split_axis,
            split_value,
        };

        let pointer = self.node_handler.add_node(&node);
        let node_index = match pointer {
            PagePointer::Node(x) => x,
            PagePointer::Leaf(_) => return Err(Error::IndexFormat("node pager returned a leaf".to_string())),
        };

        match parent {
            Some((parent_index, last_was_left)) => {

                let mut updated_node = self.node_handler.get_node(&parent_index)?.clone();

                match last_was_left {
                    true => updated_node.left_child_pointer = pointer,
                    false => updated_node.right_child_pointer = pointer,
                }

                self.node_handler.update_node(&parent_index, &updated_node)?;
            },
            None => {},
        }

        if self.root == this_pointer {
            self.root = pointer;
        }

        return Ok((node_index, right_pointer));
    }

    pub fn len(&self) -> usize {
        return self.num_points;
    }

    pub fn is_empty(&self) -> bool {
        return self.num_points == 0;
    }

    pub fn num_nodes(&self) -> usize {
        return self.node_handler.len();
    }

    pub fn num_pages(&self) -> usize {
        return self.record_handler.len();
    }

    /// Longest root-to-leaf path, counted in nodes.
    pub fn depth(&self) -> Result<usize> {

        let mut deepest: usize = 0;
        let mut nodes_to_check: Vec<(PagePointer, usize)> = vec![(self.root, 0)];

        while let Some((pointer, count_so_far)) = nodes_to_check.pop() {

            match pointer {
                PagePointer::Leaf(_) => deepest = deepest.max(count_so_far),
                PagePointer::Node(index) => {
                    let node = self.node_handler.get_node(&index)?;
                    nodes_to_check.push((node.left_child_pointer, count_so_far + 1));
                    nodes_to_check.push((node.right_child_pointer, count_so_far + 1));
                },
            }
        }

        return Ok(deepest);
    }

    fn dist_to_axis(split_axis: Axis, split_value: f64, query: &Point) -> f64 {

        let value = match split_axis {
            Axis::X => query.x,
            Axis::Y => query.y,
        };

        return (value - split_value).abs()
    }

    /// Closest cell to (x, y), or `None` when the index is empty.
    pub fn nearest(&self, x: f64, y: f64) -> Result<Option<Neighbor>> {

        let hits = self.nearest_k(x, y, 1)?;

        return Ok(hits.into_iter().next());
    }

    ///Returns the `n` nearest neighbors of (x, y), closest first
    ///
    ///Performance worsens as `n` grows, as fewer branches of the tree can be pruned with more
    ///distant already-found points
    pub fn nearest_k(&self, x: f64, y: f64, n: usize) -> Result<Vec<Neighbor>> {

        let query = Point::new(x, y);
        let mut hits = TopHits::new(n);

        if n == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut num_nodes_visited: usize = 0;
        let mut num_record_pages_visited: usize = 0;

        //direction is the one we go if we pass!!!
        let mut nodes_to_check: VecDeque<(PagePointer, NodeAction, Option<Direction>)> = VecDeque::new();

        nodes_to_check.push_front((self.root, NodeAction::Descend, None));

        while let Some((curr_pointer, action, direction)) = nodes_to_check.pop_front() {

            match action {

                NodeAction::Descend => {

                    match curr_pointer {
                        PagePointer::Leaf(index) => {

                            num_record_pages_visited += 1;

                            let page = self.record_handler.get_record_page(&index)?;

                            for record in page.get_records() {
                                hits.try_add(query.distance(&record.point), record.index);
                            }
                        },
                        PagePointer::Node(index) => {

                            num_nodes_visited += 1;

                            let node = self.node_handler.get_node(&index)?;

                            let this_value = match node.split_axis {
                                Axis::X => query.x,
                                Axis::Y => query.y,
                            };

                            match this_value <= node.split_value {

                                true => {
                                    nodes_to_check.push_front((node.left_child_pointer, NodeAction::Descend, None));
                                    nodes_to_check.push_back((curr_pointer, NodeAction::CheckIgnoredBranch, Some(Direction::Right)));
                                },
                                false => {
                                    nodes_to_check.push_front((node.right_child_pointer, NodeAction::Descend, None));
                                    nodes_to_check.push_back((curr_pointer, NodeAction::CheckIgnoredBranch, Some(Direction::Left)));
                                },
                            }
                        },
                    }
                },

                NodeAction::CheckIgnoredBranch => {

                    let index = match curr_pointer {
                        PagePointer::Leaf(_) => return Err(Error::IndexFormat("ignored branch recorded on a leaf".to_string())),
                        PagePointer::Node(index) => index,
                    };

                    let node = self.node_handler.get_node(&index)?;

                    let dist = Self::dist_to_axis(node.split_axis, node.split_value, &query);

                    if dist < hits.get_highest_dist() { //we have to visit the supplied direction
                        let descend_pointer = match direction {
                            Some(Direction::Left) => node.left_child_pointer,
                            Some(Direction::Right) => node.right_child_pointer,
                            None => return Err(Error::IndexFormat("ignored branch without a direction".to_string())),
                        };
                        nodes_to_check.push_front((descend_pointer, NodeAction::Descend, None));
                    }
                },
            }
        }

        debug!("nearest: {} nodes, {} record pages visited", num_nodes_visited, num_record_pages_visited);

        return Ok(hits.into_neighbors());
    }

    /// Ids of every cell within distance `r` of (x, y), boundary included, in no particular order.
    /// A negative or NaN radius matches nothing.
    pub fn radius(&self, x: f64, y: f64, r: f64) -> Result<Vec<CellIndex>> {

        let mut hits: Vec<CellIndex> = Vec::new();

        if !(r >= 0.0) || self.is_empty() {
            return Ok(hits);
        }

        let query = Point::new(x, y);
        let r_sq = r * r;

        let mut nodes_to_check: Vec<PagePointer> = vec![self.root];

        while let Some(curr_pointer) = nodes_to_check.pop() {

            match curr_pointer {
                PagePointer::Leaf(index) => {

                    let page = self.record_handler.get_record_page(&index)?;

                    for record in page.get_records() {
                        let dx = record.point.x - query.x;
                        let dy = record.point.y - query.y;
                        if dx * dx + dy * dy <= r_sq {
                            hits.push(record.index);
                        }
                    }
                },
                PagePointer::Node(index) => {

                    let node = self.node_handler.get_node(&index)?;

                    let this_value = match node.split_axis {
                        Axis::X => query.x,
                        Axis::Y => query.y,
                    };

                    if this_value - r <= node.split_value {
                        nodes_to_check.push(node.left_child_pointer);
                    }

                    if this_value + r >= node.split_value {
                        nodes_to_check.push(node.right_child_pointer);
                    }
                },
            }
        }

        return Ok(hits);
    }

    pub fn count_within(&self, x: f64, y: f64, r: f64) -> Result<usize> {
        return Ok(self.radius(x, y, r)?.len());
    }

    /// Persists the tree to `path` atomically.
    pub fn to_file(&self, path: &Path) -> Result<()> {

        let parts = TreeParts {
            leaf_capacity: self.leaf_capacity,
            num_points: self.num_points,
            root: self.root,
            node_handler: self.node_handler.clone(),
            record_handler: self.record_handler.clone(),
        };

        io::write_atomic(path, &io::tree_to_vec(&parts))?;

        info!("wrote spatial index with {} points to {}", self.num_points, path.display());

        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self> {

        let data = fs::read(path)?;
        let parts = io::tree_from_slice(&data)?;

        info!("read spatial index with {} points from {}", parts.num_points, path.display());

        return Ok(Self {
            node_handler: parts.node_handler,
            record_handler: parts.record_handler,
            root: parts.root,
            leaf_capacity: parts.leaf_capacity.max(1),
            num_points: parts.num_points,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::Rng;

    fn random_points(n: usize) -> Vec<Point> {

        let mut rng = rand::thread_rng();

        return (0..n)
            .map(|_| Point::new(rng.gen_range(0.0..1000.0), rng.gen_range(0.0..1000.0)))
            .collect();
    }

    fn brute_force_radius(points: &[Point], query: &Point, r: f64) -> Vec<CellIndex> {

        return points.iter()
            .enumerate()
            .filter(|(_, p)| {
                let dx = p.x - query.x;
                let dy = p.y - query.y;
                dx * dx + dy * dy <= r * r
            })
            .map(|(i, _)| i as CellIndex)
            .collect();
    }

    fn sorted(mut v: Vec<CellIndex>) -> Vec<CellIndex> {
        v.sort();
        return v;
    }

    fn scenario_points() -> Vec<Point> {

        return vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(5.0, 5.0),
            Point::new(5.0, 6.0),
        ];
    }

    #[test]
    fn five_cell_scenario() {

        for capacity in [1, 2, 64] {

            let tree = SpatialIndex::build(&scenario_points(), capacity).unwrap();

            let hits = sorted(tree.radius(0.0, 0.0, 1.5).unwrap());
            assert_eq!(hits, vec![0, 1, 2]);

            let nn = tree.nearest(4.9, 5.1).unwrap().unwrap();
            assert_eq!(nn.index, 3);
            assert_approx_eq!(nn.distance, (0.02f64).sqrt());
        }
    }

    #[test]
    fn empty_tree_answers_nothing() {

        let tree = SpatialIndex::build(&[], 8).unwrap();

        assert!(tree.is_empty());
        assert_eq!(tree.nearest(1.0, 1.0).unwrap(), None);
        assert!(tree.radius(0.0, 0.0, 100.0).unwrap().is_empty());
        assert!(tree.nearest_k(0.0, 0.0, 5).unwrap().is_empty());
    }

    #[test]
    fn zero_radius_finds_the_cell_itself() {

        let points = random_points(2000);
        let tree = SpatialIndex::build(&points, 16).unwrap();

        for (i, p) in points.iter().enumerate().step_by(97) {
            let hits = tree.radius(p.x, p.y, 0.0).unwrap();
            assert!(hits.contains(&(i as CellIndex)));
        }
    }

    #[test]
    fn negative_or_nan_radius_is_empty() {

        let tree = SpatialIndex::build(&scenario_points(), 2).unwrap();

        assert!(tree.radius(0.0, 0.0, -1.0).unwrap().is_empty());
        assert!(tree.radius(0.0, 0.0, f64::NAN).unwrap().is_empty());
    }

    #[test]
    fn non_finite_points_are_rejected() {

        let points = vec![Point::new(0.0, 0.0), Point::new(f64::NAN, 1.0)];
        assert!(matches!(SpatialIndex::build(&points, 4), Err(Error::Data(_))));
    }

    #[test]
    fn radius_matches_brute_force() {

        let mut rng = rand::thread_rng();
        let points = random_points(5000);
        let tree = SpatialIndex::build(&points, 32).unwrap();

        for _ in 0..100 {
            let query = Point::new(rng.gen_range(-50.0..1050.0), rng.gen_range(-50.0..1050.0));
            let r = rng.gen_range(0.0..150.0);

            let hits = sorted(tree.radius(query.x, query.y, r).unwrap());
            assert_eq!(hits, brute_force_radius(&points, &query, r));
        }
    }

    #[test]
    fn nearest_matches_brute_force() {

        let mut rng = rand::thread_rng();
        let points = random_points(3000);
        let tree = SpatialIndex::build(&points, 8).unwrap();

        for _ in 0..200 {
            let query = Point::new(rng.gen_range(0.0..1000.0), rng.gen_range(0.0..1000.0));

            let best = points.iter().map(|p| query.distance(p)).fold(f64::MAX, f64::min);

            let nn = tree.nearest(query.x, query.y).unwrap().unwrap();
            assert_approx_eq!(nn.distance, best);
            assert_approx_eq!(query.distance(&points[nn.index as usize]), best);
        }
    }

    #[test]
    fn nearest_k_is_sorted_and_exact() {

        let points = random_points(1000);
        let tree = SpatialIndex::build(&points, 8).unwrap();
        let query = Point::new(500.0, 500.0);

        let hits = tree.nearest_k(query.x, query.y, 10).unwrap();
        assert_eq!(hits.len(), 10);

        let mut all: Vec<f64> = points.iter().map(|p| query.distance(p)).collect();
        all.sort_by(|a, b| a.total_cmp(b));

        for (hit, expected) in hits.iter().zip(all.iter()) {
            assert_approx_eq!(hit.distance, *expected);
        }

        let more = tree.nearest_k(query.x, query.y, 5000).unwrap();
        assert_eq!(more.len(), 1000);
    }

    #[test]
    fn duplicate_coordinates_still_split() {

        let points = vec![Point::new(3.0, 3.0); 500];
        let tree = SpatialIndex::build(&points, 4).unwrap();

        assert!(tree.num_pages() > 1);
        assert_eq!(tree.radius(3.0, 3.0, 0.0).unwrap().len(), 500);
        assert_approx_eq!(tree.nearest(0.0, 0.0).unwrap().unwrap().distance, (18.0f64).sqrt());
    }

    #[test]
    fn sorted_input_builds_balanced_tree() {

        let points: Vec<Point> = (0..4096).map(|i| Point::new(i as f64, 0.0)).collect();
        let tree = SpatialIndex::build(&points, 16).unwrap();

        for page in tree.record_handler.pages.iter() {
            assert!(page.len() <= 16);
        }

        //4096 / 16 = 256 leaves, so a balanced tree is 8 levels deep
        assert_eq!(tree.depth().unwrap(), 8);
    }

    #[test]
    fn persist_and_reload_gives_same_answers() {

        let mut rng = rand::thread_rng();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spatial_index.bin");

        let points = random_points(4000);
        let tree = SpatialIndex::build(&points, 32).unwrap();
        tree.to_file(&path).unwrap();

        let reloaded = SpatialIndex::from_file(&path).unwrap();
        assert_eq!(reloaded.len(), tree.len());
        assert_eq!(reloaded.num_nodes(), tree.num_nodes());

        for _ in 0..50 {
            let query = Point::new(rng.gen_range(0.0..1000.0), rng.gen_range(0.0..1000.0));
            let r = rng.gen_range(0.0..100.0);

            assert_eq!(sorted(tree.radius(query.x, query.y, r).unwrap()),
                       sorted(reloaded.radius(query.x, query.y, r).unwrap()));
        }
    }

    #[test]
    fn top_hits_keeps_smallest() {

        let mut hits = TopHits::new(3);
        for (i, d) in [5.0, 1.0, 4.0, 2.0, 3.0].iter().enumerate() {
            hits.try_add(*d, i as CellIndex);
        }

        let neighbors = hits.into_neighbors();
        let distances: Vec<f64> = neighbors.iter().map(|n| n.distance).collect();
        assert_eq!(distances, vec![1.0, 2.0, 3.0]);
        assert_eq!(neighbors[0].index, 1);
    }
}
