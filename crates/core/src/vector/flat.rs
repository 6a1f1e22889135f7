//! Brute-force vector index over a contiguous code arena.
//!
//! Vectors are stored back to back in one `Vec<Q::Code>`; removal moves the
//! last vector into the freed slot. A scan decodes each stored vector into a
//! single scratch buffer and offers its score to a bounded top-K buffer.

use super::distance::DistanceMetric;
use super::quantization::{QuantizationKind, Quantizer, BF16, F16, F8, NoQuantization};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scan results in best-first order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub ids: Vec<u64>,
    pub scores: Vec<f32>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, f32)> + '_ {
        self.ids.iter().copied().zip(self.scores.iter().copied())
    }
}

/// Bounded, insertion-sorted buffer of the best `k` candidates.
///
/// Equal scores rank by ascending id.
pub(crate) struct TopK {
    metric: DistanceMetric,
    k: usize,
    items: Vec<(u64, f32)>,
}

impl TopK {
    pub(crate) fn new(metric: DistanceMetric, k: usize) -> Self {
        Self {
            metric,
            k,
            items: Vec::with_capacity(k.min(1024) + 1),
        }
    }

    #[inline]
    fn ahead(&self, a: (u64, f32), b: (u64, f32)) -> bool {
        self.metric.is_better(a.1, b.1) || (a.1 == b.1 && a.0 < b.0)
    }

    pub(crate) fn offer(&mut self, id: u64, score: f32) {
        if self.k == 0 || score.is_nan() {
            return;
        }
        if self.items.len() == self.k {
            if let Some(&worst) = self.items.last() {
                if !self.ahead((id, score), worst) {
                    return;
                }
            }
        }
        let pos = self
            .items
            .partition_point(|&existing| self.ahead(existing, (id, score)));
        self.items.insert(pos, (id, score));
        self.items.truncate(self.k);
    }

    pub(crate) fn into_result_set(self) -> ResultSet {
        let (ids, scores) = self.items.into_iter().unzip();
        ResultSet { ids, scores }
    }
}

/// Operations every per-collection vector index supports.
pub trait VectorSpace: Send + Sync {
    fn dim(&self) -> usize;

    fn metric(&self) -> DistanceMetric;

    fn quantization(&self) -> QuantizationKind;

    /// Store `vector` under `id`, replacing any previous vector.
    fn insert(&mut self, id: u64, vector: &[f32]) -> Result<()>;

    /// Replace the vector of an existing `id`. Returns `false` if absent.
    fn update(&mut self, id: u64, vector: &[f32]) -> Result<bool>;

    /// Returns `false` if `id` was absent.
    fn remove(&mut self, id: u64) -> bool;

    /// The stored (dequantized) vector of `id`.
    fn get(&self, id: u64) -> Option<Vec<f32>>;

    fn contains(&self, id: u64) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ids(&self) -> Vec<u64>;

    /// Best `top_k` matches for `target` under the index's metric.
    fn full_scan(&self, target: &[f32], top_k: usize) -> Result<ResultSet>;

    /// Serialize the whole index. See [`load_space`].
    fn snapshot(&self) -> Result<Vec<u8>>;
}

/// Flat index parameterized by its quantizer.
pub struct FlatIndex<Q: Quantizer> {
    dim: usize,
    metric: DistanceMetric,
    codes: Vec<Q::Code>,
    ids: Vec<u64>,
    slots: HashMap<u64, usize>,
}

#[derive(Serialize, Deserialize)]
struct SpaceHeader {
    dim: usize,
    metric: DistanceMetric,
    quantization: QuantizationKind,
}

#[derive(Serialize, Deserialize)]
struct SpaceBody<C> {
    ids: Vec<u64>,
    codes: Vec<C>,
}

pub(crate) fn check_vector(dim: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != dim {
        return Err(Error::DimensionMismatch {
            expected: dim,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(Error::InvalidArgument(
            "vector contains NaN or infinite values".into(),
        ));
    }
    Ok(())
}

impl<Q: Quantizer> FlatIndex<Q> {
    pub fn new(dim: usize, metric: DistanceMetric) -> Self {
        Self {
            dim,
            metric,
            codes: Vec::new(),
            ids: Vec::new(),
            slots: HashMap::new(),
        }
    }

    fn codes_at(&self, slot: usize) -> &[Q::Code] {
        &self.codes[slot * self.dim..(slot + 1) * self.dim]
    }

    fn write_slot(&mut self, slot: usize, vector: &[f32]) {
        let dim = self.dim;
        for (dst, &v) in self.codes[slot * dim..(slot + 1) * dim]
            .iter_mut()
            .zip(vector)
        {
            *dst = Q::encode(v);
        }
    }

    fn from_body(header: SpaceHeader, body: &[u8]) -> Result<Self> {
        let body: SpaceBody<Q::Code> = bincode::deserialize(body)?;
        if body.codes.len() != body.ids.len() * header.dim {
            return Err(Error::Corrupted(format!(
                "vector snapshot holds {} codes for {} vectors of dimension {}",
                body.codes.len(),
                body.ids.len(),
                header.dim
            )));
        }
        let slots = body
            .ids
            .iter()
            .enumerate()
            .map(|(slot, &id)| (id, slot))
            .collect();
        Ok(Self {
            dim: header.dim,
            metric: header.metric,
            codes: body.codes,
            ids: body.ids,
            slots,
        })
    }
}

impl<Q: Quantizer> VectorSpace for FlatIndex<Q> {
    fn dim(&self) -> usize {
        self.dim
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn quantization(&self) -> QuantizationKind {
        Q::KIND
    }

    fn insert(&mut self, id: u64, vector: &[f32]) -> Result<()> {
        check_vector(self.dim, vector)?;
        if let Some(&slot) = self.slots.get(&id) {
            self.write_slot(slot, vector);
            return Ok(());
        }
        self.slots.insert(id, self.ids.len());
        self.ids.push(id);
        Q::encode_into(vector, &mut self.codes);
        Ok(())
    }

    fn update(&mut self, id: u64, vector: &[f32]) -> Result<bool> {
        check_vector(self.dim, vector)?;
        match self.slots.get(&id) {
            Some(&slot) => {
                self.write_slot(slot, vector);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove(&mut self, id: u64) -> bool {
        let Some(slot) = self.slots.remove(&id) else {
            return false;
        };
        let last = self.ids.len() - 1;
        if slot != last {
            let dim = self.dim;
            let (head, tail) = self.codes.split_at_mut(last * dim);
            head[slot * dim..(slot + 1) * dim].copy_from_slice(&tail[..dim]);
            let moved = self.ids[last];
            self.ids[slot] = moved;
            self.slots.insert(moved, slot);
        }
        self.ids.truncate(last);
        self.codes.truncate(last * self.dim);
        true
    }

    fn get(&self, id: u64) -> Option<Vec<f32>> {
        let &slot = self.slots.get(&id)?;
        let mut out = vec![0.0; self.dim];
        Q::decode_into(self.codes_at(slot), &mut out);
        Some(out)
    }

    fn contains(&self, id: u64) -> bool {
        self.slots.contains_key(&id)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn ids(&self) -> Vec<u64> {
        self.ids.clone()
    }

    fn full_scan(&self, target: &[f32], top_k: usize) -> Result<ResultSet> {
        check_vector(self.dim, target)?;
        let mut top = TopK::new(self.metric, top_k);
        if top_k == 0 {
            return Ok(top.into_result_set());
        }
        let mut scratch = vec![0.0f32; self.dim];
        for (slot, &id) in self.ids.iter().enumerate() {
            Q::decode_into(self.codes_at(slot), &mut scratch);
            top.offer(id, self.metric.compute(target, &scratch));
        }
        Ok(top.into_result_set())
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        let header = SpaceHeader {
            dim: self.dim,
            metric: self.metric,
            quantization: Q::KIND,
        };
        let body = bincode::serialize(&SpaceBody {
            ids: self.ids.clone(),
            codes: self.codes.clone(),
        })?;
        Ok(bincode::serialize(&(header, body))?)
    }
}

/// Empty index for the given configuration.
pub fn new_space(
    dim: usize,
    metric: DistanceMetric,
    quantization: QuantizationKind,
) -> Box<dyn VectorSpace> {
    match quantization {
        QuantizationKind::None => Box::new(FlatIndex::<NoQuantization>::new(dim, metric)),
        QuantizationKind::F8 => Box::new(FlatIndex::<F8>::new(dim, metric)),
        QuantizationKind::F16 => Box::new(FlatIndex::<F16>::new(dim, metric)),
        QuantizationKind::BF16 => Box::new(FlatIndex::<BF16>::new(dim, metric)),
    }
}

/// Rebuild an index from [`VectorSpace::snapshot`] bytes.
pub fn load_space(bytes: &[u8]) -> Result<Box<dyn VectorSpace>> {
    let (header, body): (SpaceHeader, Vec<u8>) = bincode::deserialize(bytes)?;
    Ok(match header.quantization {
        QuantizationKind::None => Box::new(FlatIndex::<NoQuantization>::from_body(header, &body)?),
        QuantizationKind::F8 => Box::new(FlatIndex::<F8>::from_body(header, &body)?),
        QuantizationKind::F16 => Box::new(FlatIndex::<F16>::from_body(header, &body)?),
        QuantizationKind::BF16 => Box::new(FlatIndex::<BF16>::from_body(header, &body)?),
    })
}
