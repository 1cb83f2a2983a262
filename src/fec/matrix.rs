use crate::error::FecError;
use crate::fec::gf_tables::{
    gf_inv, gf_mul, gf_mul_slice, gf_muladd_slice, gf_pow, init_gf_tables,
};
use crate::optimize;
use rayon::prelude::*;

/// Systematic generator matrix for one group geometry.
///
/// The matrix has `data_shards + parity_shards` rows of `data_shards`
/// coefficients each. Row `r` maps the data vector to shard `r` of the
/// group; the top square is the identity, so data shards pass through
/// verbatim and only the parity rows cost arithmetic.
pub struct CodingMatrix {
    data_shards: usize,
    parity_shards: usize,
    rows: Vec<Vec<u8>>,
}

impl CodingMatrix {
    /// Build the matrix for a `data_shards` + `parity_shards` geometry.
    ///
    /// Starts from a Vandermonde matrix over distinct evaluation points and
    /// multiplies by the inverse of its top square. Any `data_shards` rows
    /// of the result stay linearly independent, which is what makes every
    /// loss pattern of at most `parity_shards` shards recoverable.
    pub fn systematic(data_shards: usize, parity_shards: usize) -> Result<Self, FecError> {
        if data_shards == 0 || parity_shards == 0 {
            return Err(FecError::Config(
                "data_shards and parity_shards must both be at least 1".into(),
            ));
        }
        let total = data_shards + parity_shards;
        if total > 256 {
            return Err(FecError::Config(format!(
                "data_shards + parity_shards must not exceed 256, got {}",
                total
            )));
        }
        init_gf_tables();

        let vandermonde: Vec<Vec<u8>> = (0..total)
            .map(|r| (0..data_shards).map(|c| gf_pow(r as u8, c)).collect())
            .collect();
        let top = vandermonde[..data_shards].to_vec();
        // The top square is Vandermonde over distinct points, so this
        // cannot fail for a valid geometry.
        let top_inv = invert(top).ok_or(FecError::SingularMatrix)?;
        let rows = mat_mul(&vandermonde, &top_inv);

        Ok(Self {
            data_shards,
            parity_shards,
            rows,
        })
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    /// Coefficient row for shard index `r` within the group.
    pub fn row(&self, r: usize) -> &[u8] {
        &self.rows[r]
    }

    /// Fill `parity` from `data`. All slices must share one length; the
    /// caller pads shorter bodies beforehand.
    pub fn encode_parity(&self, data: &[&[u8]], parity: &mut [&mut [u8]]) {
        debug_assert_eq!(data.len(), self.data_shards);
        debug_assert_eq!(parity.len(), self.parity_shards);
        let d = self.data_shards;
        let rows = &self.rows;
        let fill = |i: usize, out: &mut [u8]| {
            let row = &rows[d + i];
            gf_mul_slice(row[0], data[0], out);
            for c in 1..d {
                gf_muladd_slice(row[c], data[c], out);
            }
        };
        optimize::dispatch(|policy| {
            let wide = policy.as_any().is::<optimize::Avx2>()
                || policy.as_any().is::<optimize::Neon>();
            if wide && parity.len() > 1 {
                parity
                    .par_iter_mut()
                    .enumerate()
                    .for_each(|(i, out)| fill(i, out));
            } else {
                for (i, out) in parity.iter_mut().enumerate() {
                    fill(i, out);
                }
            }
        });
    }

    /// Solve for the missing data shards of a group.
    ///
    /// `present` holds exactly `data_shards` surviving shards as
    /// `(shard index within group, padded body)`. `missing` lists the data
    /// indices to recover, ascending, with one output buffer each. Fails
    /// only if the surviving rows do not form an invertible system, which
    /// the construction rules out for distinct indices.
    pub fn reconstruct_data(
        &self,
        present: &[(usize, &[u8])],
        missing: &[usize],
        out: &mut [&mut [u8]],
    ) -> Result<(), FecError> {
        debug_assert_eq!(present.len(), self.data_shards);
        debug_assert_eq!(missing.len(), out.len());

        let sub: Vec<Vec<u8>> = present
            .iter()
            .map(|&(r, _)| self.rows[r].clone())
            .collect();
        let inv = invert(sub).ok_or(FecError::SingularMatrix)?;

        for (&m, out_buf) in missing.iter().zip(out.iter_mut()) {
            let row = &inv[m];
            gf_mul_slice(row[0], present[0].1, out_buf);
            for c in 1..self.data_shards {
                gf_muladd_slice(row[c], present[c].1, out_buf);
            }
        }
        Ok(())
    }
}

/// Gauss-Jordan inversion of a square matrix over GF(2^8). Returns `None`
/// when the matrix is singular.
fn invert(mut m: Vec<Vec<u8>>) -> Option<Vec<Vec<u8>>> {
    let n = m.len();
    let mut inv: Vec<Vec<u8>> = (0..n)
        .map(|i| {
            let mut row = vec![0u8; n];
            row[i] = 1;
            row
        })
        .collect();

    for i in 0..n {
        let mut pivot = i;
        while pivot < n && m[pivot][i] == 0 {
            pivot += 1;
        }
        if pivot == n {
            return None;
        }
        m.swap(i, pivot);
        inv.swap(i, pivot);

        let scale = gf_inv(m[i][i]);
        for c in 0..n {
            m[i][c] = gf_mul(m[i][c], scale);
            inv[i][c] = gf_mul(inv[i][c], scale);
        }

        for r in 0..n {
            if r == i || m[r][i] == 0 {
                continue;
            }
            let factor = m[r][i];
            for c in 0..n {
                let t = gf_mul(factor, m[i][c]);
                m[r][c] ^= t;
                let t = gf_mul(factor, inv[i][c]);
                inv[r][c] ^= t;
            }
        }
    }
    Some(inv)
}

fn mat_mul(a: &[Vec<u8>], b: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let rows = a.len();
    let inner = b.len();
    let cols = b[0].len();
    let mut out = vec![vec![0u8; cols]; rows];
    for (i, a_row) in a.iter().enumerate() {
        for k in 0..inner {
            let v = a_row[k];
            if v == 0 {
                continue;
            }
            for j in 0..cols {
                let t = gf_mul(v, b[k][j]);
                out[i][j] ^= t;
            }
        }
    }
    out
}
