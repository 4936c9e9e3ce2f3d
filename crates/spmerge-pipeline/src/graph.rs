//! The region graph: regions keyed by id, their adjacency, and the
//! merge operation that contracts one edge.
//!
//! # Ownership
//!
//! The graph owns every [`Region`] in a map keyed by [`RegionId`]. A
//! merge removes the absorbed region from the map, so any id held by a
//! caller can go stale at any time. Every lookup therefore returns
//! `Option`, and merge strategies treat `None` as "this region was
//! absorbed, skip it".

use std::collections::{BTreeSet, HashMap};

use petgraph::graph::{NodeIndex, UnGraph};

use crate::edge_table::{EdgeTable, RegionEdge};
use crate::region::{Region, Uniformity};
use crate::tags::{MAX_TAG, RESERVED_TAG, TagBuffer};
use crate::types::{Coord, Dimensions, RegionId, RgbImage, SegmentError};

/// Regions smaller than this are ignored when looking for unusually
/// large regions.
pub const LARGE_REGION_MIN_SIZE: usize = 10;

/// Size spread below which no region is considered unusually large.
const LARGE_REGION_MIN_STDDEV: f32 = 100.0;

/// The two sides of a contracted edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The surviving region.
    pub dst: RegionId,
    /// The absorbed region. Its id is now dead.
    pub src: RegionId,
}

/// Regions of an over-segmented image plus their adjacency.
#[derive(Debug, Clone)]
pub struct SuperpixelGraph {
    dimensions: Dimensions,
    ids: Vec<RegionId>,
    regions: HashMap<RegionId, Region>,
    edges: EdgeTable,
    merge_count: usize,
}

impl SuperpixelGraph {
    /// Build the graph from a tag buffer.
    ///
    /// Each distinct tag `t` becomes region `t + 1`; its pixels are
    /// recorded in row-major order. Two regions are neighbors when any of
    /// their pixels are 8-connected.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::ReservedTag`] if a pixel carries
    /// `0x00FFFFFF`, [`SegmentError::InvalidConfig`] for any other tag
    /// above [`MAX_TAG`], and [`SegmentError::Internal`] if a region ends up with no
    /// neighbor while others exist.
    pub fn parse(tags: &TagBuffer) -> Result<Self, SegmentError> {
        let dimensions = tags.dimensions();
        let mut regions: HashMap<RegionId, Region> = HashMap::new();
        let mut owners = Vec::with_capacity(dimensions.pixel_count());

        for (coord, tag) in tags.iter() {
            if tag == RESERVED_TAG {
                return Err(SegmentError::ReservedTag {
                    x: coord.x,
                    y: coord.y,
                });
            }
            if tag > MAX_TAG {
                return Err(SegmentError::InvalidConfig(format!(
                    "tag {tag:#x} at ({}, {}) exceeds the largest tag {MAX_TAG:#x}",
                    coord.x, coord.y
                )));
            }
            let id = RegionId::new(tag + 1);
            regions
                .entry(id)
                .or_insert_with(|| Region::new(id))
                .push_coord(coord);
            owners.push(id);
        }

        let mut edges = EdgeTable::new();
        for &id in regions.keys() {
            edges.insert_region(id);
        }

        // Forward half of the 8-neighborhood; links are symmetric.
        let (w, h) = (dimensions.width as usize, dimensions.height as usize);
        for y in 0..h {
            for x in 0..w {
                let here = owners[y * w + x];
                let mut forward = Vec::with_capacity(4);
                if x + 1 < w {
                    forward.push(y * w + x + 1);
                }
                if y + 1 < h {
                    forward.push((y + 1) * w + x);
                    if x + 1 < w {
                        forward.push((y + 1) * w + x + 1);
                    }
                    if x > 0 {
                        forward.push((y + 1) * w + x - 1);
                    }
                }
                for i in forward {
                    let there = owners[i];
                    if there != here {
                        edges.link(here, there);
                    }
                }
            }
        }

        let mut ids: Vec<RegionId> = regions.keys().copied().collect();
        ids.sort_unstable();

        if ids.len() > 1 {
            for &id in &ids {
                if edges.neighbors(id).is_none_or(BTreeSet::is_empty) {
                    return Err(SegmentError::Internal(format!(
                        "region {id} has no neighbors"
                    )));
                }
            }
        }

        log::debug!(
            "parsed {}x{} tag buffer into {} regions, {} edges",
            dimensions.width,
            dimensions.height,
            ids.len(),
            edges.edges().len()
        );

        Ok(Self {
            dimensions,
            ids,
            regions,
            edges,
            merge_count: 0,
        })
    }

    // -----------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------

    /// Image dimensions the graph was parsed from.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Live region ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> &[RegionId] {
        &self.ids
    }

    /// Number of live regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if the graph has no regions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of merges performed since parsing.
    #[must_use]
    pub const fn merge_count(&self) -> usize {
        self.merge_count
    }

    /// Returns `true` if `id` is live.
    #[must_use]
    pub fn contains(&self, id: RegionId) -> bool {
        self.regions.contains_key(&id)
    }

    /// The region for `id`, or `None` if it was never created or has
    /// been merged away.
    #[must_use]
    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(&id)
    }

    /// Mutable access to a region's weight history.
    pub fn region_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.regions.get_mut(&id)
    }

    /// Pixel count of `id`.
    #[must_use]
    pub fn pixel_count(&self, id: RegionId) -> Option<usize> {
        self.regions.get(&id).map(Region::len)
    }

    /// Neighbors of `id` in ascending order.
    #[must_use]
    pub fn neighbors(&self, id: RegionId) -> Option<&BTreeSet<RegionId>> {
        self.edges.neighbors(id)
    }

    /// Neighbors of `id` as an owned list, empty for a dead id.
    ///
    /// Strategies iterate this copy while merging, since a merge
    /// rewrites the live neighbor sets.
    #[must_use]
    pub fn neighbor_list(&self, id: RegionId) -> Vec<RegionId> {
        self.edges
            .neighbors(id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The adjacency table.
    #[must_use]
    pub const fn edges(&self) -> &EdgeTable {
        &self.edges
    }

    pub(crate) const fn edges_mut(&mut self) -> &mut EdgeTable {
        &mut self.edges
    }

    /// Live ids ordered by descending pixel count, ties by ascending id.
    #[must_use]
    pub fn sorted_by_size(&self) -> Vec<RegionId> {
        let mut ids = self.ids.clone();
        ids.sort_by(|a, b| {
            let (la, lb) = (self.region_len(*a), self.region_len(*b));
            lb.cmp(&la).then(a.cmp(b))
        });
        ids
    }

    /// The largest live region for which `keep` returns `true`. Ties go
    /// to the smaller id.
    pub fn largest_where(&self, mut keep: impl FnMut(RegionId) -> bool) -> Option<RegionId> {
        let mut best: Option<(usize, RegionId)> = None;
        for &id in &self.ids {
            if !keep(id) {
                continue;
            }
            let len = self.region_len(id);
            if best.is_none_or(|(best_len, _)| len > best_len) {
                best = Some((len, id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// The smallest live region for which `keep` returns `true`. Ties go
    /// to the smaller id.
    pub fn smallest_where(&self, mut keep: impl FnMut(RegionId) -> bool) -> Option<RegionId> {
        let mut best: Option<(usize, RegionId)> = None;
        for &id in &self.ids {
            if !keep(id) {
                continue;
            }
            let len = self.region_len(id);
            if best.is_none_or(|(best_len, _)| len < best_len) {
                best = Some((len, id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// Regions whose size is an upward outlier among regions of at
    /// least `min_size` pixels, largest first.
    ///
    /// A region qualifies when its size exceeds `mean + 1.5 * stddev`.
    /// When the sizes barely vary (`stddev < 100`) nothing qualifies.
    #[must_use]
    pub fn scan_largest(&self, min_size: usize) -> Vec<RegionId> {
        #[allow(clippy::cast_precision_loss)]
        let sizes: Vec<f32> = self
            .ids
            .iter()
            .map(|&id| self.region_len(id))
            .filter(|&len| len >= min_size)
            .map(|len| len as f32)
            .collect();
        let (mean, stddev) = crate::stats::mean_stddev(&sizes);
        if stddev < LARGE_REGION_MIN_STDDEV {
            return Vec::new();
        }
        let upper = stddev.mul_add(1.5, mean);
        self.sorted_by_size()
            .into_iter()
            .filter(|&id| {
                #[allow(clippy::cast_precision_loss)]
                let len = self.region_len(id) as f32;
                len > upper
            })
            .collect()
    }

    fn region_len(&self, id: RegionId) -> usize {
        self.regions.get(&id).map_or(0, Region::len)
    }

    // -----------------------------------------------------------------
    // Merging
    // -----------------------------------------------------------------

    /// Contract the edge between `a` and `b`.
    ///
    /// The larger region survives (`a` on a tie). The survivor gains the
    /// absorbed region's pixels, weight histories and neighbors; cached
    /// strengths of both regions' edges are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::Internal`] if `a == b` or either id is
    /// not live.
    pub fn merge_edge(&mut self, a: RegionId, b: RegionId) -> Result<MergeOutcome, SegmentError> {
        if a == b {
            return Err(SegmentError::Internal(format!(
                "cannot merge region {a} with itself"
            )));
        }
        let (len_a, len_b) = match (self.pixel_count(a), self.pixel_count(b)) {
            (Some(la), Some(lb)) => (la, lb),
            _ => {
                return Err(SegmentError::Internal(format!(
                    "merge of {a} and {b} references a dead region"
                )));
            }
        };
        let (dst, src) = if len_a >= len_b { (a, b) } else { (b, a) };

        let src_region = self
            .regions
            .remove(&src)
            .ok_or_else(|| SegmentError::Internal(format!("region {src} vanished")))?;
        self.regions
            .get_mut(&dst)
            .ok_or_else(|| SegmentError::Internal(format!("region {dst} vanished")))?
            .absorb(src_region);

        if let Ok(pos) = self.ids.binary_search(&src) {
            self.ids.remove(pos);
        }

        self.edges.invalidate(dst);
        let src_neighbors = self.neighbor_list(src);
        self.edges.remove_region(src);
        for n in src_neighbors {
            if n != dst {
                self.edges.link(dst, n);
            }
        }

        self.merge_count += 1;
        log::trace!("merged region {src} into {dst}");
        Ok(MergeOutcome { dst, src })
    }

    // -----------------------------------------------------------------
    // Identical-color merging
    // -----------------------------------------------------------------

    /// Whether every pixel of `id` has the same color in `image`.
    ///
    /// The answer is cached on the region until its next merge.
    pub fn is_all_same(&mut self, image: &RgbImage, id: RegionId) -> Option<bool> {
        let region = self.regions.get_mut(&id)?;
        if region.uniformity == Uniformity::Unknown {
            let mut colors = region.coords().iter().map(|c| image.get_pixel(c.x, c.y).0);
            let first = colors.next();
            let same = first.is_some_and(|f| colors.all(|c| c == f));
            region.uniformity = if same {
                Uniformity::AllSame
            } else {
                Uniformity::Mixed
            };
        }
        Some(region.uniformity == Uniformity::AllSame)
    }

    fn first_color(&self, image: &RgbImage, id: RegionId) -> Option<[u8; 3]> {
        let c = self.regions.get(&id)?.coords().first()?;
        Some(image.get_pixel(c.x, c.y).0)
    }

    /// Merge every uniform region with each uniform neighbor of exactly
    /// the same color, until no such pair remains.
    ///
    /// Returns the number of merges performed.
    ///
    /// # Errors
    ///
    /// Propagates [`merge_edge`](Self::merge_edge) invariant failures.
    pub fn merge_identical(&mut self, image: &RgbImage) -> Result<usize, SegmentError> {
        self.merge_identical_with(image, |_, _| {})
    }

    /// [`merge_identical`](Self::merge_identical), calling `on_merge`
    /// after every contraction.
    ///
    /// # Errors
    ///
    /// Propagates [`merge_edge`](Self::merge_edge) invariant failures.
    pub fn merge_identical_with(
        &mut self,
        image: &RgbImage,
        mut on_merge: impl FnMut(&Self, MergeOutcome),
    ) -> Result<usize, SegmentError> {
        let mut total = 0;
        loop {
            let mut merges = 0;
            for id in self.ids.clone() {
                if self.is_all_same(image, id) != Some(true) {
                    continue;
                }
                let Some(color) = self.first_color(image, id) else {
                    continue;
                };
                for n in self.neighbor_list(id) {
                    if self.is_all_same(image, n) != Some(true)
                        || self.first_color(image, n) != Some(color)
                    {
                        continue;
                    }
                    let outcome = self.merge_edge(id, n)?;
                    if let Some(dst) = self.regions.get_mut(&outcome.dst) {
                        dst.uniformity = Uniformity::AllSame;
                    }
                    on_merge(self, outcome);
                    merges += 1;
                    if outcome.src == id {
                        break;
                    }
                }
            }
            total += merges;
            if merges == 0 {
                break;
            }
        }
        log::debug!(
            "identical-color merge: {total} merges, {} regions remain",
            self.len()
        );
        Ok(total)
    }

    // -----------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------

    /// Owning region of every pixel, row-major.
    #[must_use]
    pub fn owner_map(&self) -> Vec<RegionId> {
        let mut owners = vec![RegionId::new(0); self.dimensions.pixel_count()];
        for (&id, region) in &self.regions {
            for &c in region.coords() {
                owners[self.dimensions.index(c)] = id;
            }
        }
        owners
    }

    /// Tag buffer holding each pixel's region id.
    ///
    /// # Errors
    ///
    /// Only fails for a graph with zero-sized dimensions, which
    /// [`parse`](Self::parse) never produces.
    pub fn to_tag_buffer(&self) -> Result<TagBuffer, SegmentError> {
        let tags = self.owner_map().into_iter().map(RegionId::get).collect();
        TagBuffer::from_raw(self.dimensions, tags)
    }

    /// Pixel lists of every live region, ascending id order.
    pub fn region_coords(&self) -> impl Iterator<Item = (RegionId, &[Coord])> + '_ {
        self.ids
            .iter()
            .filter_map(|id| self.regions.get(id).map(|r| (*id, r.coords())))
    }

    /// Mean color of a region's pixels.
    #[must_use]
    pub fn mean_color(&self, image: &RgbImage, id: RegionId) -> Option<[u8; 3]> {
        let region = self.regions.get(&id)?;
        if region.is_empty() {
            return None;
        }
        let mut sums = [0_u64; 3];
        for c in region.coords() {
            let px = image.get_pixel(c.x, c.y).0;
            for (sum, v) in sums.iter_mut().zip(px) {
                *sum += u64::from(v);
            }
        }
        let n = region.len() as u64;
        let mean = sums.map(|s| u8::try_from(s / n).unwrap_or(u8::MAX));
        Some(mean)
    }

    /// Export the adjacency as a `petgraph` graph with one node per
    /// live region, in ascending id order.
    #[must_use]
    pub fn adjacency_graph(&self) -> UnGraph<RegionId, ()> {
        let mut graph = UnGraph::with_capacity(self.ids.len(), 0);
        let index: HashMap<RegionId, NodeIndex> = self
            .ids
            .iter()
            .map(|&id| (id, graph.add_node(id)))
            .collect();
        for edge in self.edges.edges() {
            if let (Some(&a), Some(&b)) = (index.get(&edge.a()), index.get(&edge.b())) {
                graph.add_edge(a, b, ());
            }
        }
        graph
    }

    /// Every live adjacency once.
    #[must_use]
    pub fn edge_list(&self) -> Vec<RegionEdge> {
        self.edges.edges()
    }

    // -----------------------------------------------------------------
    // Invariants
    // -----------------------------------------------------------------

    /// Verify the structural invariants of the graph.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::Internal`] describing the first violation.
    pub fn check_invariants(&self) -> Result<(), SegmentError> {
        let fail = |msg: String| Err(SegmentError::Internal(msg));

        if !self.ids.windows(2).all(|w| w[0] < w[1]) {
            return fail("id list is not strictly ascending".to_string());
        }
        if self.ids.len() != self.regions.len() {
            return fail(format!(
                "{} ids but {} regions",
                self.ids.len(),
                self.regions.len()
            ));
        }
        if !self.edges.is_symmetric() {
            return fail("adjacency is not symmetric".to_string());
        }
        if !self.edges.strengths_are_live() {
            return fail("cached strength for a missing edge".to_string());
        }

        let mut seen = vec![false; self.dimensions.pixel_count()];
        for &id in &self.ids {
            let Some(region) = self.regions.get(&id) else {
                return fail(format!("id {id} has no region"));
            };
            let Some(neighbors) = self.edges.neighbors(id) else {
                return fail(format!("id {id} has no neighbor set"));
            };
            if self.ids.len() > 1 && neighbors.is_empty() {
                return fail(format!("region {id} has no neighbors"));
            }
            if let Some(n) = neighbors.iter().find(|n| !self.regions.contains_key(n)) {
                return fail(format!("region {id} lists dead neighbor {n}"));
            }
            for &c in region.coords() {
                let i = self.dimensions.index(c);
                if seen[i] {
                    return fail(format!("pixel ({}, {}) owned twice", c.x, c.y));
                }
                seen[i] = true;
            }
        }
        if let Some(i) = seen.iter().position(|s| !s) {
            return fail(format!("pixel index {i} has no owner"));
        }
        Ok(())
    }
}

/// Pixels of `id` that touch a pixel owned by another region.
pub(crate) fn region_border_coords(
    graph: &SuperpixelGraph,
    owners: &[RegionId],
    id: RegionId,
) -> Vec<Coord> {
    let dims = graph.dimensions();
    graph
        .region(id)
        .map(|r| {
            r.coords()
                .iter()
                .copied()
                .filter(|c| c.neighbors8(dims).any(|n| owners[dims.index(n)] != id))
                .collect()
        })
        .unwrap_or_default()
}
