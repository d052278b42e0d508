//! Distance kernels and vector element types.
//!
//! All graph traversal compares squared L2 distances, which preserves the
//! nearest-neighbor ordering of L2. Maximum-inner-product search is reduced
//! to L2 up front: base vectors are scaled so their norms are at most one and
//! extended by one coordinate that restores unit norm, queries are extended
//! by a zero (Neyshabur & Srebro, "On Symmetric and Asymmetric LSHs for
//! Inner Product Search"). After the transform only L2 is ever computed.
//!
//! Storage rounds the dimension up to a multiple of 8 and zero-pads the
//! tail, so kernels may run over the padded length without changing the
//! result.

/// Distance metric requested by the caller.
///
/// `InnerProduct` exists only at the boundary; see the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Euclidean (L2) distance.
    L2,
    /// Maximum inner product, served via the norm-augmenting transform.
    InnerProduct,
}

/// Vector element type stored in the index.
///
/// Distances accumulate in `f32` regardless of the element type; labels and
/// tags are always 32-bit.
pub trait Element: Copy + Default + Send + Sync + 'static {
    /// Name used in metadata and file headers.
    const NAME: &'static str;

    fn to_f32(self) -> f32;

    /// Inverse of [`Element::to_f32`], rounding and saturating for integer
    /// element types.
    fn from_f32(v: f32) -> Self;
}

impl Element for f32 {
    const NAME: &'static str = "float";

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

impl Element for i8 {
    const NAME: &'static str = "int8";

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.round().clamp(i8::MIN as f32, i8::MAX as f32) as i8
    }
}

impl Element for u8 {
    const NAME: &'static str = "uint8";

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.round().clamp(0.0, u8::MAX as f32) as u8
    }
}

/// Squared L2 distance between two equally sized slices.
#[inline]
#[must_use]
pub fn l2_squared<T: Element>(a: &[T], b: &[T]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x.to_f32() - y.to_f32();
            d * d
        })
        .sum()
}

/// L2 norm of a vector.
#[inline]
#[must_use]
pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Transform base vectors for inner-product search.
///
/// Scales every vector by the reciprocal of the largest norm and appends
/// `sqrt(1 - ||x||^2)`, so each result has unit norm and L2 distance to an
/// augmented query orders candidates by descending inner product. Returns
/// the augmented vectors and the scaling norm.
pub fn augment_base(vectors: &[Vec<f32>]) -> (Vec<Vec<f32>>, f32) {
    let max_norm = vectors.iter().map(|v| norm(v)).fold(0.0_f32, f32::max);
    if max_norm == 0.0 {
        let out = vectors.iter().map(|v| pad_one(v, 1.0)).collect();
        return (out, 0.0);
    }
    let out = vectors
        .iter()
        .map(|v| {
            let scaled: Vec<f32> = v.iter().map(|x| x / max_norm).collect();
            let res = (1.0 - scaled.iter().map(|x| x * x).sum::<f32>()).max(0.0);
            pad_one(&scaled, res.sqrt())
        })
        .collect();
    (out, max_norm)
}

/// Extend a query with the zero coordinate that pairs with [`augment_base`].
#[must_use]
pub fn augment_query(query: &[f32]) -> Vec<f32> {
    pad_one(query, 0.0)
}

fn pad_one(v: &[f32], last: f32) -> Vec<f32> {
    let mut out = Vec::with_capacity(v.len() + 1);
    out.extend_from_slice(v);
    out.push(last);
    out
}

/// Round a dimension up to the multiple of 8 used by aligned storage.
#[inline]
#[must_use]
pub fn aligned_dim(dim: usize) -> usize {
    dim.div_ceil(8) * 8
}
