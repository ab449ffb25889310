//! Spatial index for reverse geocoding
//!
//! An R-tree over the representative points of leaf address nodes, built
//! lazily on the first reverse lookup and persisted next to the dataset
//! for reuse across process restarts. Query-time candidates are the
//! vertices of the Delaunay triangle enclosing the query point, ranked by
//! ellipsoidal geodesic distance.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use geo::{GeodesicDistance, Point};
use rayon::prelude::*;
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::address::AddressLevel;
use crate::error::{GeocodeError, Result};
use crate::storage::{AddressNode, NodesSegment};

const INDEX_FILE: &str = "rtree.idx";
const INDEX_FORMAT_VERSION: u32 = 1;

/// Nearest points retrieved per query before triangle selection.
const K_NEAREST: usize = 20;

/// One indexed representative point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedPoint {
    pub point: [f64; 2],
    pub id: u32,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.point[0] - point[0];
        let dy = self.point[1] - point[1];
        dx * dx + dy * dy
    }
}

/// A candidate node with its geodesic distance from the query point.
#[derive(Debug, Clone)]
pub struct NodeDist {
    pub dist: f64,
    pub node: AddressNode,
}

/// Geodesic (WGS84 ellipsoid) distance between two lon/lat points, in
/// meters.
pub fn distance(lon0: f64, lat0: f64, lon1: f64, lat1: f64) -> f64 {
    Point::new(lon0, lat0).geodesic_distance(&Point::new(lon1, lat1))
}

/// The built R-tree index.
pub struct ReverseIndex {
    rtree: RTree<IndexedPoint>,
}

impl ReverseIndex {
    /// Load a persisted index, or build it from the store and persist it.
    ///
    /// A reloaded index is spot-checked against the store; on mismatch
    /// (the dataset was replaced underneath) the stale files are removed
    /// and the index is rebuilt.
    pub fn open_or_build(dir: &Path, store: &NodesSegment) -> Result<Self> {
        let path = dir.join(INDEX_FILE);

        if path.exists() {
            match Self::load(&path) {
                Ok(index) => {
                    if index.spot_check(store) {
                        tracing::info!("Loaded reverse index from {:?}", path);
                        return Ok(index);
                    }
                    tracing::warn!(
                        "Reverse index exists but does not match the address data; rebuilding"
                    );
                    let _ = std::fs::remove_file(&path);
                }
                Err(e) => {
                    tracing::warn!("Can't load the reverse index ({}); rebuilding", e);
                    let _ = std::fs::remove_file(&path);
                }
            }
        }

        let index = Self::build(store)?;
        index.save(&path)?;
        Ok(index)
    }

    /// Build the index from every coordinate-bearing leaf node.
    pub fn build(store: &NodesSegment) -> Result<Self> {
        tracing::info!("Building reverse index for {} records...", store.count());

        let count = store.count() as u32;
        let mut points: Vec<IndexedPoint> = (0..count)
            .into_par_iter()
            .filter_map(|id| {
                let node = store.try_get(id)?;
                if node.level <= AddressLevel::WARD
                    || !node.is_leaf()
                    || !node.has_valid_coordinates()
                {
                    return None;
                }
                Some(IndexedPoint {
                    point: [node.x, node.y],
                    id,
                })
            })
            .collect();

        // Nodes sharing one representative point would make degenerate
        // triangles; keep the first of each coordinate.
        let mut seen = HashSet::new();
        points.retain(|p| seen.insert((p.point[0].to_bits(), p.point[1].to_bits())));

        tracing::info!("Reverse index holds {} points", points.len());
        Ok(Self {
            rtree: RTree::bulk_load(points),
        })
    }

    fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let (version, rtree): (u32, RTree<IndexedPoint>) = bincode::deserialize_from(reader)?;
        if version != INDEX_FORMAT_VERSION {
            return Err(GeocodeError::InvalidFormat(format!(
                "Unsupported reverse index version: {}",
                version
            )));
        }
        Ok(Self { rtree })
    }

    fn save(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(
            File::create(path).map_err(|e| GeocodeError::IndexBuild(e.to_string()))?,
        );
        bincode::serialize_into(writer, &(INDEX_FORMAT_VERSION, &self.rtree))
            .map_err(|e| GeocodeError::IndexBuild(e.to_string()))?;
        tracing::info!("Persisted reverse index to {:?}", path);
        Ok(())
    }

    /// Verify a loaded index against the store: the representative point
    /// of some leaf node must be present in the index.
    fn spot_check(&self, store: &NodesSegment) -> bool {
        let count = store.count() as u32;
        let mut id = count / 2;
        let probe = loop {
            if id >= count {
                return true; // nothing to check against
            }
            match store.try_get(id) {
                Some(node)
                    if node.level > AddressLevel::WARD
                        && node.is_leaf()
                        && node.has_valid_coordinates() =>
                {
                    break node;
                }
                _ => id += 1,
            }
        };

        match self.rtree.nearest_neighbor(&[probe.x, probe.y]) {
            Some(point) => point.point == [probe.x, probe.y],
            None => false,
        }
    }

    /// Nearest candidates around a query point.
    ///
    /// Retrieves the surrounding points, selects the smallest Delaunay
    /// triangle enclosing the query point and returns its vertices mapped
    /// up to the requested level, ascending geodesic distance. Outside
    /// triangulated coverage the nearest available points are returned
    /// instead; this is a documented approximation, not a guarantee of
    /// enclosure.
    pub fn nearest(
        &self,
        store: &NodesSegment,
        x: f64,
        y: f64,
        level: Option<i8>,
    ) -> Result<Vec<NodeDist>> {
        let level = level.unwrap_or(AddressLevel::AZA);

        let mut node_dists: Vec<NodeDist> = Vec::new();
        for point in self.rtree.nearest_neighbor_iter(&[x, y]).take(K_NEAREST) {
            let node = store.get(point.id)?;
            if !node.has_valid_coordinates() {
                continue;
            }
            let dist = distance(node.x, node.y, x, y);
            node_dists.push(NodeDist { dist, node });
        }
        node_dists.sort_by(|a, b| a.dist.total_cmp(&b.dist));

        if node_dists.is_empty() {
            return Ok(Vec::new());
        }

        // If the query point coincides with the nearest point (within
        // 1 cm) the triangle may exclude it by rounding; fall back to
        // plain distance order.
        let selected = if node_dists.len() <= 3 || node_dists[0].dist < 1.0e-2 {
            node_dists.truncate(3);
            node_dists
        } else {
            delaunay::select(x, y, &node_dists)
        };

        // Map each vertex up the parent chain to the requested level
        let mut results: Vec<NodeDist> = Vec::new();
        let mut registered: HashSet<u32> = HashSet::new();
        for entry in selected {
            let mut node = entry.node;
            while node.level > level {
                match store.parent_of(&node)? {
                    Some(parent) => node = parent,
                    None => break,
                }
            }
            if !registered.insert(node.id) {
                continue;
            }
            results.push(NodeDist {
                dist: entry.dist,
                node,
            });
        }

        Ok(results)
    }
}

/// Delaunay triangle selection over the candidate points.
mod delaunay {
    use super::NodeDist;

    type P = (f64, f64);

    /// Whether point p lies inside the triangle (p0, p1, p2).
    fn contains(p: P, p0: P, p1: P, p2: P) -> bool {
        let mut area = -p1.1 * p2.0 + p0.1 * (-p1.0 + p2.0) + p0.0 * (p1.1 - p2.1) + p1.0 * p2.1;
        let mut s = p0.1 * p2.0 - p0.0 * p2.1 + (p2.1 - p0.1) * p.0 + (p0.0 - p2.0) * p.1;
        let mut t = p0.0 * p1.1 - p0.1 * p1.0 + (p0.1 - p1.1) * p.0 + (p1.0 - p0.0) * p.1;

        if area < 0.0 {
            area = -area;
            s = -s;
            t = -t;
        }

        0.0 < s && s < area && 0.0 < t && t < area && 0.0 < area - s - t && area - s - t < area
    }

    /// Circumcenter and squared radius of the triangle (p0, p1, p2).
    fn circumcircle(p0: P, p1: P, p2: P) -> (f64, f64, f64) {
        let xt = (p2.1 - p0.1) * (p1.0 * p1.0 - p0.0 * p0.0 + p1.1 * p1.1 - p0.1 * p0.1)
            + (p0.1 - p1.1) * (p2.0 * p2.0 - p0.0 * p0.0 + p2.1 * p2.1 - p0.1 * p0.1);
        let yt = (p0.0 - p2.0) * (p1.0 * p1.0 - p0.0 * p0.0 + p1.1 * p1.1 - p0.1 * p0.1)
            + (p1.0 - p0.0) * (p2.0 * p2.0 - p0.0 * p0.0 + p2.1 * p2.1 - p0.1 * p0.1);
        let c = 2.0 * ((p1.0 - p0.0) * (p2.1 - p0.1) - (p1.1 - p0.1) * (p2.0 - p0.0));

        let x = xt / c;
        let y = yt / c;
        let r2 = (x - p0.0) * (x - p0.0) + (y - p0.1) * (y - p0.1);
        (x, y, r2)
    }

    /// Whether point p lies inside the circumcircle of (p0, p1, p2).
    fn in_circumcircle(p: P, p0: P, p1: P, p2: P) -> bool {
        let (cx, cy, r2) = circumcircle(p0, p1, p2);
        let pr2 = (p.0 - cx) * (p.0 - cx) + (p.1 - cy) * (p.1 - cy);
        pr2 < r2
    }

    fn kval(t: &[usize; 3]) -> (usize, usize, usize) {
        let mut sorted = *t;
        sorted.sort_unstable();
        (sorted[0], sorted[1], sorted[2])
    }

    fn pt(nodes: &[NodeDist], i: usize) -> P {
        (nodes[i].node.x, nodes[i].node.y)
    }

    /// Outer product of vector ab and vector ap.
    fn side(ab: P, ap: P) -> f64 {
        ab.0 * ap.1 - ab.1 * ap.0
    }

    /// Select the 3 nodes making the smallest triangle surrounding the
    /// target point. When no such triangle exists (coastline, island),
    /// the two nearest points are returned instead.
    pub fn select(x: f64, y: f64, nodes: &[NodeDist]) -> Vec<NodeDist> {
        let a = pt(nodes, 0);
        let ap = (x - a.0, y - a.1);

        // Find point b that does not fall on the line through p and a
        let mut p1 = 1;
        let mut ab = (0.0, 0.0);
        let mut side_p = 0.0;
        let mut found_b = false;
        for cand in 1..nodes.len().saturating_sub(2) {
            p1 = cand;
            let b = pt(nodes, cand);
            ab = (b.0 - a.0, b.1 - a.1);
            side_p = side(ab, ap);
            if side_p.abs() > 1.0e-10 {
                found_b = true;
                break;
            }
        }

        // Find q where triangle abq surrounds point p
        let mut triangle: Option<[usize; 3]> = None;
        if found_b {
            for p2 in p1 + 1..nodes.len() {
                let q = pt(nodes, p2);
                let aq = (q.0 - a.0, q.1 - a.1);
                let side_q = side(ab, aq);
                if side_p * side_q < 0.0
                    || (side_p < 0.0 && side_q > side_p)
                    || (side_p > 0.0 && side_q < side_p)
                {
                    continue;
                }
                if contains((x, y), a, pt(nodes, p1), q) {
                    triangle = Some([0, p1, p2]);
                    break;
                }
            }
        }

        let mut triangle = match triangle {
            Some(t) => t,
            // No enclosing triangle; the two nearest points will do
            None => return nodes[..2.min(nodes.len())].to_vec(),
        };

        // Flip edges until the triangle satisfies the Delaunay condition
        let mut processed = std::collections::HashSet::new();
        processed.insert(kval(&triangle));
        let mut i = 0;
        while i < nodes.len() {
            if triangle.contains(&i) {
                i += 1;
                continue;
            }

            if in_circumcircle(
                pt(nodes, i),
                pt(nodes, triangle[0]),
                pt(nodes, triangle[1]),
                pt(nodes, triangle[2]),
            ) {
                let mut new_triangle = None;
                for j in 0..3 {
                    let mut tt = triangle;
                    tt[j] = i;
                    if processed.contains(&kval(&tt)) {
                        continue;
                    }
                    if contains(
                        (x, y),
                        pt(nodes, tt[0]),
                        pt(nodes, tt[1]),
                        pt(nodes, tt[2]),
                    ) {
                        new_triangle = Some(tt);
                        break;
                    }
                }

                if let Some(tt) = new_triangle {
                    triangle = tt;
                    processed.insert(kval(&triangle));
                    i = 0;
                    continue;
                }
            }

            i += 1;
        }

        triangle.iter().map(|&i| nodes[i].clone()).collect()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geodesic_distance() {
        // Tokyo Metropolitan Government to Shinjuku Station, roughly 800 m
        let d = distance(139.6917, 35.6896, 139.7006, 35.6900);
        assert!(d > 500.0 && d < 1200.0, "unexpected distance {}", d);

        // Zero distance for identical points
        assert!(distance(139.0, 35.0, 139.0, 35.0) < 1.0e-9);
    }
}
