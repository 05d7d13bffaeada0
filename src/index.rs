//! Feature index: deep sort and wildcard retrieval over all feature vectors.
//!
//! [`FeatureIndex::deep_sort`] orders unit ids lexicographically by a list
//! of features. [`FeatureIndex::retrieve`] then narrows a query to a
//! contiguous range of that order by binary search on the longest leading
//! run of sort keys the query does not wildcard, and filters the range on
//! the remaining features. Without a usable prefix it scans every vector;
//! the result is the same either way.
//!
//! Vectors never change after construction, so the sort is parallel and
//! lookups need no locking.

use std::{cmp::Ordering, ops::Range, sync::Arc};

use rayon::prelude::*;
use tracing::debug;

use crate::error::{Error, Result};
use crate::features::{FeatureFile, FeatureSchema, FeatureVector};

// ─────────────────────────────────────────────────────────────────────────────
// Wildcard mask
// ─────────────────────────────────────────────────────────────────────────────

/// Per-feature flag: `true` means "match anything".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardMask(Vec<bool>);

impl WildcardMask {
    pub fn new(flags: Vec<bool>) -> Self {
        Self(flags)
    }

    /// Every feature is a wildcard.
    pub fn all(width: usize) -> Self {
        Self(vec![true; width])
    }

    /// No feature is a wildcard: exact match on the whole vector.
    pub fn none(width: usize) -> Self {
        Self(vec![false; width])
    }

    /// Only the named features are compared; everything else is a wildcard.
    pub fn only(schema: &FeatureSchema, names: &[&str]) -> Result<Self> {
        let mut flags = vec![true; schema.len()];
        for name in names {
            flags[schema.feature_index(name)?] = false;
        }
        Ok(Self(flags))
    }

    pub fn is_wildcard(&self, index: usize) -> bool {
        self.0[index]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Index
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory index over every feature vector of a database.
#[derive(Debug, Clone)]
pub struct FeatureIndex {
    schema: Arc<FeatureSchema>,
    vectors: Vec<FeatureVector>,
    /// Positions into `vectors`, ordered by `sort_keys`.
    order: Vec<u32>,
    sort_keys: Vec<usize>,
}

impl FeatureIndex {
    /// Vector `i` must describe unit `i`.
    pub fn new(schema: Arc<FeatureSchema>, vectors: Vec<FeatureVector>) -> Result<Self> {
        for (i, v) in vectors.iter().enumerate() {
            if v.unit_id() as usize != i {
                return Err(Error::InvalidState(format!(
                    "vector at position {i} describes unit {}",
                    v.unit_id()
                )));
            }
            schema.check(v)?;
        }
        let order = (0..vectors.len() as u32).collect();
        Ok(Self { schema, vectors, order, sort_keys: Vec::new() })
    }

    pub fn from_file(file: FeatureFile) -> Result<Self> {
        Self::new(Arc::new(file.schema), file.vectors)
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn vector(&self, unit_id: u32) -> Result<&FeatureVector> {
        self.vectors.get(unit_id as usize).ok_or_else(|| {
            Error::OutOfRange(format!("unit {unit_id} not in index of {}", self.vectors.len()))
        })
    }

    /// Unit ids in the current sort order.
    pub fn sorted_ids(&self) -> &[u32] {
        &self.order
    }

    /// Feature indices of the last [`deep_sort`](Self::deep_sort).
    pub fn sort_keys(&self) -> &[usize] {
        &self.sort_keys
    }

    /// Order all vectors by `names`, each name breaking the ties of the
    /// previous one. Remaining ties keep ascending unit id order.
    pub fn deep_sort(&mut self, names: &[&str]) -> Result<()> {
        let keys = names
            .iter()
            .map(|n| self.schema.feature_index(n))
            .collect::<Result<Vec<_>>>()?;

        let vectors = &self.vectors;
        let mut order: Vec<u32> = (0..vectors.len() as u32).collect();
        order.par_sort_by(|&a, &b| compare_on(&vectors[a as usize], &vectors[b as usize], &keys));

        debug!(units = order.len(), keys = ?names, "feature index sorted");
        self.order = order;
        self.sort_keys = keys;
        Ok(())
    }

    /// All unit ids whose vector equals `target` on every feature not marked
    /// in `mask`, ascending. An empty result means "no matching unit".
    pub fn retrieve(&self, target: &FeatureVector, mask: &WildcardMask) -> Result<Vec<u32>> {
        let width = self.schema.len();
        if target.len() != width || mask.len() != width {
            return Err(Error::UnknownFeature(format!(
                "query of width {} (mask {}) against schema of width {width}",
                target.len(),
                mask.len()
            )));
        }

        let prefix: Vec<usize> = self
            .sort_keys
            .iter()
            .copied()
            .take_while(|&k| !mask.is_wildcard(k))
            .collect();
        let residual: Vec<usize> = (0..width)
            .filter(|&k| !mask.is_wildcard(k) && !prefix.contains(&k))
            .collect();

        let range = self.equal_range(target, &prefix);
        let mut ids: Vec<u32> = self.order[range]
            .iter()
            .copied()
            .filter(|&id| {
                let v = &self.vectors[id as usize];
                residual.iter().all(|&k| v.get(k) == target.get(k))
            })
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Named query: the given `(feature, value)` pairs must match, all other
    /// features are wildcards.
    pub fn retrieve_where(&self, conditions: &[(&str, &str)]) -> Result<Vec<u32>> {
        let target = self.schema.vector_from_values(u32::MAX, conditions)?;
        let names: Vec<&str> = conditions.iter().map(|&(n, _)| n).collect();
        let mask = WildcardMask::only(&self.schema, &names)?;
        self.retrieve(&target, &mask)
    }

    /// Range of `order` whose vectors equal `target` on `keys`, which must
    /// be a prefix of the current sort keys.
    fn equal_range(&self, target: &FeatureVector, keys: &[usize]) -> Range<usize> {
        if keys.is_empty() {
            return 0..self.order.len();
        }
        let cmp = |id: &u32| compare_on(&self.vectors[*id as usize], target, keys);
        let lo = self.order.partition_point(|id| cmp(id) == Ordering::Less);
        let hi = self.order.partition_point(|id| cmp(id) != Ordering::Greater);
        lo..hi
    }
}

fn compare_on(a: &FeatureVector, b: &FeatureVector, keys: &[usize]) -> Ordering {
    keys.iter()
        .map(|&k| a.get(k).cmp(&b.get(k)))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureDef;

    fn schema() -> Arc<FeatureSchema> {
        let def = |name: &str, n: usize| FeatureDef {
            name: name.into(),
            values: (0..n).map(|i| format!("{name}{i}")).collect(),
        };
        Arc::new(FeatureSchema::new(vec![def("phone", 5), def("stress", 2), def("next", 4)]).unwrap())
    }

    /// Deterministic pseudo-random vectors covering repeated combinations.
    fn index(n: u32) -> FeatureIndex {
        let vectors = (0..n)
            .map(|i| {
                let x = i.wrapping_mul(2_654_435_761);
                FeatureVector::new(i, vec![(x % 5) as u8, ((x >> 7) % 2) as u8, ((x >> 13) % 4) as u8])
            })
            .collect();
        FeatureIndex::new(schema(), vectors).unwrap()
    }

    fn brute_force(idx: &FeatureIndex, target: &FeatureVector, mask: &WildcardMask) -> Vec<u32> {
        (0..idx.len() as u32)
            .filter(|&id| {
                let v = idx.vector(id).unwrap();
                (0..target.len()).all(|k| mask.is_wildcard(k) || v.get(k) == target.get(k))
            })
            .collect()
    }

    fn all_masks(width: usize) -> Vec<WildcardMask> {
        (0..1u32 << width)
            .map(|bits| WildcardMask::new((0..width).map(|k| bits & (1 << k) != 0).collect()))
            .collect()
    }

    #[test]
    fn test_deep_sort_is_lexicographic() {
        let mut idx = index(200);
        idx.deep_sort(&["phone", "next"]).unwrap();
        let ids = idx.sorted_ids();
        for pair in ids.windows(2) {
            let a = idx.vector(pair[0]).unwrap();
            let b = idx.vector(pair[1]).unwrap();
            let ka = (a.get(0), a.get(2), pair[0]);
            let kb = (b.get(0), b.get(2), pair[1]);
            assert!(ka < kb, "{ka:?} !< {kb:?}");
        }
    }

    #[test]
    fn test_deep_sort_unknown_feature() {
        let mut idx = index(10);
        assert!(matches!(idx.deep_sort(&["phone", "tone"]), Err(Error::UnknownFeature(_))));
    }

    #[test]
    fn test_retrieve_matches_brute_force() {
        let mut idx = index(300);
        let targets: Vec<FeatureVector> = (0..5u8)
            .flat_map(|p| (0..2u8).map(move |s| FeatureVector::new(0, vec![p, s, (p + s) % 4])))
            .collect();

        for sort in [&[][..], &["phone"][..], &["phone", "stress"][..], &["next", "phone", "stress"][..]] {
            idx.deep_sort(sort).unwrap();
            for target in &targets {
                for mask in all_masks(3) {
                    assert_eq!(
                        idx.retrieve(target, &mask).unwrap(),
                        brute_force(&idx, target, &mask),
                        "sort {sort:?}, target {:?}, mask {mask:?}",
                        target.codes()
                    );
                }
            }
        }
    }

    #[test]
    fn test_all_wildcard_returns_everything() {
        let mut idx = index(57);
        idx.deep_sort(&["stress"]).unwrap();
        let target = FeatureVector::new(0, vec![0, 0, 0]);
        let ids = idx.retrieve(&target, &WildcardMask::all(3)).unwrap();
        assert_eq!(ids, (0..57).collect::<Vec<u32>>());
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        let vectors = vec![FeatureVector::new(0, vec![1, 0, 0]), FeatureVector::new(1, vec![2, 0, 0])];
        let idx = FeatureIndex::new(schema(), vectors).unwrap();
        let target = FeatureVector::new(0, vec![4, 0, 0]);
        assert!(idx.retrieve(&target, &WildcardMask::none(3)).unwrap().is_empty());
    }

    #[test]
    fn test_retrieve_where() {
        let mut idx = index(100);
        idx.deep_sort(&["phone"]).unwrap();
        let got = idx.retrieve_where(&[("phone", "phone2")]).unwrap();
        let want: Vec<u32> = (0..100).filter(|&i| idx.vector(i).unwrap().get(0) == 2).collect();
        assert_eq!(got, want);
        assert!(matches!(idx.retrieve_where(&[("phone", "phone9")]), Err(Error::UnknownFeature(_))));
    }

    #[test]
    fn test_width_mismatch() {
        let idx = index(5);
        let target = FeatureVector::new(0, vec![0, 0]);
        assert!(matches!(idx.retrieve(&target, &WildcardMask::all(3)), Err(Error::UnknownFeature(_))));
    }
}
