//! Dense, dynamically-sized `f32` matrix.
//!
//! [`Matrix`] is the numeric foundation of every hypothesis: means and
//! variances are stored as `STATE_LEN × 1` column vectors.  Every algebraic
//! operation checks operand shapes first and reports
//! [`TritonError::ShapeMismatch`] instead of truncating.  Nothing resizes
//! implicitly.
//!
//! # Binary layout
//!
//! | field | encoding |
//! |---|---|
//! | rows | `u64` little-endian |
//! | cols | `u64` little-endian |
//! | payload | `rows * cols` × `f32` little-endian, row-major |
//!
//! # Example
//!
//! ```rust
//! use triton_estimation::matrix::Matrix;
//!
//! let a = Matrix::from_rows(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
//! let i = Matrix::from_rows(2, 2, vec![1.0, 0.0, 0.0, 1.0]).unwrap();
//! let p = a.mul(&i).unwrap();
//! assert_eq!(p, a);
//!
//! let back = Matrix::from_bytes(&a.to_bytes()).unwrap();
//! assert_eq!(back, a);
//! ```

use std::io::{Read, Write};

use triton_types::TritonError;

/// Upper bound on the element count accepted when decoding, so a corrupt
/// header cannot trigger a huge allocation.
const MAX_DECODED_ELEMENTS: usize = 1 << 20;

/// A row-major matrix of `f32` values with explicit row and column counts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// A `rows × cols` matrix filled with zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Build a matrix from a row-major literal.
    ///
    /// Fails with [`TritonError::ShapeMismatch`] when `data` does not hold
    /// exactly `rows * cols` values.
    pub fn from_rows(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, TritonError> {
        if data.len() != rows * cols {
            return Err(TritonError::ShapeMismatch {
                left: (rows, cols),
                right: (data.len(), 1),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// An `n × 1` column vector holding `values`.
    pub fn column(values: &[f32]) -> Self {
        Self {
            rows: values.len(),
            cols: 1,
            data: values.to_vec(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Row-major view of the payload.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    // ── Element access ──────────────────────────────────────────────────────

    pub fn get(&self, row: usize, col: usize) -> Result<f32, TritonError> {
        let i = self.offset(row, col)?;
        Ok(self.data[i])
    }

    pub fn get_flat(&self, index: usize) -> Result<f32, TritonError> {
        self.data
            .get(index)
            .copied()
            .ok_or(TritonError::IndexOutOfRange {
                index,
                bound: self.data.len(),
            })
    }

    /// Overwrite the element at `(row, col)` and return the previous value.
    pub fn set(&mut self, row: usize, col: usize, value: f32) -> Result<f32, TritonError> {
        let i = self.offset(row, col)?;
        Ok(std::mem::replace(&mut self.data[i], value))
    }

    /// Overwrite the element at flat `index` and return the previous value.
    pub fn set_flat(&mut self, index: usize, value: f32) -> Result<f32, TritonError> {
        let bound = self.data.len();
        let slot = self
            .data
            .get_mut(index)
            .ok_or(TritonError::IndexOutOfRange { index, bound })?;
        Ok(std::mem::replace(slot, value))
    }

    // ── Algebra ─────────────────────────────────────────────────────────────

    /// Matrix product `self · rhs`; requires `self.cols == rhs.rows`.
    pub fn mul(&self, rhs: &Matrix) -> Result<Matrix, TritonError> {
        if self.cols != rhs.rows {
            return Err(TritonError::ShapeMismatch {
                left: self.shape(),
                right: rhs.shape(),
            });
        }
        let mut out = Matrix::zeros(self.rows, rhs.cols);
        for r in 0..self.rows {
            for k in 0..self.cols {
                let a = self.data[r * self.cols + k];
                for c in 0..rhs.cols {
                    out.data[r * rhs.cols + c] += a * rhs.data[k * rhs.cols + c];
                }
            }
        }
        Ok(out)
    }

    /// Element-wise sum; shapes must match exactly.
    pub fn add(&self, rhs: &Matrix) -> Result<Matrix, TritonError> {
        let mut out = self.clone();
        out.add_assign(rhs)?;
        Ok(out)
    }

    /// Element-wise difference; shapes must match exactly.
    pub fn sub(&self, rhs: &Matrix) -> Result<Matrix, TritonError> {
        let mut out = self.clone();
        out.sub_assign(rhs)?;
        Ok(out)
    }

    /// In-place product.  `self` takes the shape of the result.
    pub fn mul_assign(&mut self, rhs: &Matrix) -> Result<&mut Matrix, TritonError> {
        *self = self.mul(rhs)?;
        Ok(self)
    }

    pub fn add_assign(&mut self, rhs: &Matrix) -> Result<&mut Matrix, TritonError> {
        self.zip_in_place(rhs, |a, b| a + b)?;
        Ok(self)
    }

    pub fn sub_assign(&mut self, rhs: &Matrix) -> Result<&mut Matrix, TritonError> {
        self.zip_in_place(rhs, |a, b| a - b)?;
        Ok(self)
    }

    /// Multiply every element by `factor`.
    pub fn scale(&mut self, factor: f32) -> &mut Matrix {
        self.data.iter_mut().for_each(|v| *v *= factor);
        self
    }

    /// Euclidean norm: square root of the sum of squared elements.
    pub fn magnitude(&self) -> f32 {
        self.data
            .iter()
            .map(|&v| f64::from(v) * f64::from(v))
            .sum::<f64>()
            .sqrt() as f32
    }

    // ── Serialization ───────────────────────────────────────────────────────

    /// Append the binary record to `out`.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<(), TritonError> {
        out.write_all(&(self.rows as u64).to_le_bytes())?;
        out.write_all(&(self.cols as u64).to_le_bytes())?;
        let payload: Vec<u8> = self.data.iter().flat_map(|v| v.to_le_bytes()).collect();
        out.write_all(&payload)?;
        Ok(())
    }

    /// Decode one binary record from `input`.
    ///
    /// A short read or an implausible header is reported as
    /// [`TritonError::CorruptData`].
    pub fn read_from<R: Read>(input: &mut R) -> Result<Matrix, TritonError> {
        let rows = read_u64(input, "row count")?;
        let cols = read_u64(input, "column count")?;
        let len = rows
            .checked_mul(cols)
            .filter(|&n| n <= MAX_DECODED_ELEMENTS as u64)
            .ok_or_else(|| {
                TritonError::CorruptData(format!("implausible matrix shape {rows}x{cols}"))
            })? as usize;

        let mut payload = vec![0u8; len * 4];
        input
            .read_exact(&mut payload)
            .map_err(|e| TritonError::CorruptData(format!("truncated matrix payload: {e}")))?;
        let data = payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Matrix {
            rows: rows as usize,
            cols: cols as usize,
            data,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + self.data.len() * 4);
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut buf);
        buf
    }

    /// Decode a buffer holding exactly one record; trailing bytes are corrupt.
    pub fn from_bytes(bytes: &[u8]) -> Result<Matrix, TritonError> {
        let mut cursor = bytes;
        let m = Matrix::read_from(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(TritonError::CorruptData(format!(
                "{} trailing bytes after matrix record",
                cursor.len()
            )));
        }
        Ok(m)
    }

    // ── Internal helpers ────────────────────────────────────────────────────

    fn offset(&self, row: usize, col: usize) -> Result<usize, TritonError> {
        if row >= self.rows {
            return Err(TritonError::IndexOutOfRange {
                index: row,
                bound: self.rows,
            });
        }
        if col >= self.cols {
            return Err(TritonError::IndexOutOfRange {
                index: col,
                bound: self.cols,
            });
        }
        Ok(row * self.cols + col)
    }

    fn zip_in_place(
        &mut self,
        rhs: &Matrix,
        op: impl Fn(f32, f32) -> f32,
    ) -> Result<(), TritonError> {
        if self.shape() != rhs.shape() {
            return Err(TritonError::ShapeMismatch {
                left: self.shape(),
                right: rhs.shape(),
            });
        }
        for (a, &b) in self.data.iter_mut().zip(&rhs.data) {
            *a = op(*a, b);
        }
        Ok(())
    }
}

impl From<Vec<f32>> for Matrix {
    fn from(values: Vec<f32>) -> Self {
        Self {
            rows: values.len(),
            cols: 1,
            data: values,
        }
    }
}

fn read_u64<R: Read>(input: &mut R, what: &str) -> Result<u64, TritonError> {
    let mut buf = [0u8; 8];
    input
        .read_exact(&mut buf)
        .map_err(|e| TritonError::CorruptData(format!("missing {what}: {e}")))?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn m(rows: usize, cols: usize, data: &[f32]) -> Matrix {
        Matrix::from_rows(rows, cols, data.to_vec()).unwrap()
    }

    #[test]
    fn zeros_has_requested_shape() {
        let z = Matrix::zeros(3, 2);
        assert_eq!(z.shape(), (3, 2));
        assert!(z.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn from_rows_rejects_wrong_length() {
        let err = Matrix::from_rows(2, 2, vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, TritonError::ShapeMismatch { .. }));
    }

    #[test]
    fn element_access_two_d_and_flat() {
        let mut a = m(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(a.get(1, 2).unwrap(), 6.0);
        assert_eq!(a.get_flat(4).unwrap(), 5.0);

        let prev = a.set(0, 1, 9.0).unwrap();
        assert_eq!(prev, 2.0);
        assert_eq!(a.get_flat(1).unwrap(), 9.0);

        a.set_flat(5, -1.0).unwrap();
        assert_eq!(a.get(1, 2).unwrap(), -1.0);
    }

    #[test]
    fn out_of_range_access_is_reported() {
        let mut a = Matrix::zeros(2, 2);
        assert!(matches!(
            a.get(2, 0),
            Err(TritonError::IndexOutOfRange { index: 2, bound: 2 })
        ));
        assert!(matches!(
            a.get(0, 5),
            Err(TritonError::IndexOutOfRange { index: 5, bound: 2 })
        ));
        assert!(a.get_flat(4).is_err());
        assert!(a.set_flat(4, 1.0).is_err());
        assert!(a.set(1, 2, 1.0).is_err());
    }

    #[test]
    fn multiply_checks_inner_dimension() {
        let a = m(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = m(3, 1, &[1.0, 0.0, -1.0]);
        let p = a.mul(&b).unwrap();
        assert_eq!(p.shape(), (2, 1));
        assert_eq!(p.as_slice(), &[-2.0, -2.0]);

        let err = b.mul(&a).unwrap_err();
        assert!(matches!(
            err,
            TritonError::ShapeMismatch { left: (3, 1), right: (2, 3) }
        ));
    }

    #[test]
    fn multiply_propagates_nan_through_zero_factors() {
        let zeros = m(1, 2, &[0.0, 0.0]);
        let bad = m(2, 2, &[f32::INFINITY, 1.0, f32::NAN, 1.0]);
        let p = zeros.mul(&bad).unwrap();
        assert!(p.as_slice()[0].is_nan());
        assert_eq!(p.as_slice()[1], 0.0);
    }

    #[test]
    fn add_and_sub_require_identical_shapes() {
        let a = m(2, 1, &[1.0, 2.0]);
        let b = m(2, 1, &[0.5, 0.5]);
        assert_eq!(a.add(&b).unwrap().as_slice(), &[1.5, 2.5]);
        assert_eq!(a.sub(&b).unwrap().as_slice(), &[0.5, 1.5]);

        let row = m(1, 2, &[1.0, 2.0]);
        assert!(a.add(&row).is_err());
        assert!(a.sub(&row).is_err());
    }

    #[test]
    fn compound_assignment_mutates_and_returns_self() {
        let mut a = m(2, 1, &[1.0, 2.0]);
        let b = m(2, 1, &[1.0, 1.0]);
        let out = a.add_assign(&b).unwrap().as_slice().to_vec();
        assert_eq!(out, vec![2.0, 3.0]);
        a.sub_assign(&b).unwrap();
        assert_eq!(a.as_slice(), &[1.0, 2.0]);

        let mut sq = m(2, 2, &[1.0, 1.0, 0.0, 1.0]);
        sq.mul_assign(&m(2, 2, &[1.0, 1.0, 0.0, 1.0])).unwrap();
        assert_eq!(sq.as_slice(), &[1.0, 2.0, 0.0, 1.0]);

        // A failing compound op leaves the value untouched.
        let before = a.clone();
        assert!(a.add_assign(&Matrix::zeros(3, 1)).is_err());
        assert_eq!(a, before);
    }

    #[test]
    fn magnitude_is_euclidean_norm() {
        let v = Matrix::column(&[3.0, 4.0]);
        assert_relative_eq!(v.magnitude(), 5.0);
        assert_eq!(Matrix::zeros(0, 0).magnitude(), 0.0);
    }

    #[test]
    fn binary_round_trip_is_bit_exact() {
        let a = m(2, 3, &[1.5, -0.0, f32::MIN_POSITIVE, 1e30, -7.25, 0.1]);
        let bytes = a.to_bytes();
        assert_eq!(bytes.len(), 16 + 6 * 4);
        let back = Matrix::from_bytes(&bytes).unwrap();
        assert_eq!(back.shape(), a.shape());
        for (x, y) in a.as_slice().iter().zip(back.as_slice()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn truncated_input_is_corrupt() {
        let bytes = m(2, 2, &[1.0, 2.0, 3.0, 4.0]).to_bytes();
        for cut in [0, 7, 15, 17, bytes.len() - 1] {
            let err = Matrix::from_bytes(&bytes[..cut]).unwrap_err();
            assert!(matches!(err, TritonError::CorruptData(_)), "cut at {cut}");
        }
    }

    #[test]
    fn implausible_header_is_corrupt() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        bytes.extend_from_slice(&2u64.to_le_bytes());
        assert!(matches!(
            Matrix::from_bytes(&bytes),
            Err(TritonError::CorruptData(_))
        ));
    }

    #[test]
    fn trailing_bytes_are_corrupt() {
        let mut bytes = Matrix::column(&[1.0]).to_bytes();
        bytes.push(0);
        assert!(Matrix::from_bytes(&bytes).is_err());
    }
}
