#![forbid(unsafe_code)]

//! Hines solver for the tree-structured linear system arising from the
//! implicit-Euler discretization of the cable equation.
//!
//! The matrix is symmetric positive definite with one off-diagonal entry per
//! non-root CV, stored on the child row (`u`). Assembly and solve proceed
//! cell by cell; CVs of a cell are contiguous and postordered so that every
//! parent index is smaller than the child index.
//!
//! Units: `d`, `u` in µS; `rhs` in nA; capacitance in pF; area in µm²;
//! current density in A/m²; conductivity in (A/m²)/mV; dt in ms.

use cable_core::NO_PARENT;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SolverError {
    #[error("cv parent vector and cell partition disagree: {0} CVs, partition ends at {1}")]
    PartitionMismatch(usize, usize),
    #[error("cv {cv} has parent {parent} not preceding it")]
    BadParent { cv: usize, parent: i32 },
    #[error("vector {name} has length {got}, expected {expected}")]
    BadLength {
        name: &'static str,
        got: usize,
        expected: usize,
    },
}

/// Tree-sparse matrix state for one cell group.
#[derive(Debug, Clone)]
pub struct HinesMatrix {
    parent_index: Vec<i32>,
    cell_cv_divs: Vec<u32>,
    cell_to_intdom: Vec<u32>,
    cv_capacitance: Vec<f64>,
    cv_area: Vec<f64>,
    /// Face-conductance contributions that do not change between steps.
    invariant_d: Vec<f64>,
    u: Vec<f64>,
    d: Vec<f64>,
    rhs: Vec<f64>,
}

impl HinesMatrix {
    pub fn new(
        parent_index: Vec<i32>,
        cell_cv_divs: Vec<u32>,
        cv_capacitance: Vec<f64>,
        face_conductance: Vec<f64>,
        cv_area: Vec<f64>,
        cell_to_intdom: Vec<u32>,
    ) -> Result<Self, SolverError> {
        let n = parent_index.len();
        if cell_cv_divs.last().copied().unwrap_or(0) as usize != n {
            return Err(SolverError::PartitionMismatch(
                n,
                cell_cv_divs.last().copied().unwrap_or(0) as usize,
            ));
        }
        for (name, len) in [
            ("cv_capacitance", cv_capacitance.len()),
            ("face_conductance", face_conductance.len()),
            ("cv_area", cv_area.len()),
        ] {
            if len != n {
                return Err(SolverError::BadLength {
                    name,
                    got: len,
                    expected: n,
                });
            }
        }

        let mut invariant_d = vec![0.0; n];
        let mut u = vec![0.0; n];
        for i in 0..n {
            let p = parent_index[i];
            if p == NO_PARENT {
                continue;
            }
            if p < 0 || p as usize >= i {
                return Err(SolverError::BadParent { cv: i, parent: p });
            }
            let gij = face_conductance[i];
            u[i] = -gij;
            invariant_d[i] += gij;
            invariant_d[p as usize] += gij;
        }

        Ok(Self {
            parent_index,
            cell_cv_divs,
            cell_to_intdom,
            cv_capacitance,
            cv_area,
            invariant_d,
            u,
            d: vec![0.0; n],
            rhs: vec![0.0; n],
        })
    }

    pub fn size(&self) -> usize {
        self.parent_index.len()
    }

    /// Assemble the per-step system. Cells whose intdom has `dt == 0` are
    /// frozen: the row is cleared and `rhs` holds the voltage unchanged.
    pub fn assemble(
        &mut self,
        dt_intdom: &[f64],
        voltage: &[f64],
        current_density: &[f64],
        conductivity: &[f64],
    ) {
        let ncell = self.cell_cv_divs.len().saturating_sub(1);
        for cell in 0..ncell {
            let lo = self.cell_cv_divs[cell] as usize;
            let hi = self.cell_cv_divs[cell + 1] as usize;
            let dt = dt_intdom[self.cell_to_intdom[cell] as usize];
            if dt > 0.0 {
                // 1e-3 aligns pF/ms with µS and µm²·A/m² with nA.
                let oodt_factor = 1e-3 / dt;
                for i in lo..hi {
                    let area_factor = 1e-3 * self.cv_area[i];
                    let gi = oodt_factor * self.cv_capacitance[i] + area_factor * conductivity[i];
                    self.d[i] = gi + self.invariant_d[i];
                    self.rhs[i] = gi * voltage[i] - area_factor * current_density[i];
                }
            } else {
                for i in lo..hi {
                    self.d[i] = 0.0;
                    self.rhs[i] = voltage[i];
                }
            }
        }
    }

    /// Two-pass Hines solve, writing the solution into `voltage`.
    pub fn solve(&mut self, voltage: &mut [f64]) {
        let ncell = self.cell_cv_divs.len().saturating_sub(1);
        for cell in 0..ncell {
            let lo = self.cell_cv_divs[cell] as usize;
            let hi = self.cell_cv_divs[cell + 1] as usize;
            if lo == hi {
                continue;
            }
            if self.d[lo] != 0.0 {
                // Backward sweep: eliminate each child entry into its parent.
                for i in (lo + 1..hi).rev() {
                    let factor = self.u[i] / self.d[i];
                    let p = self.parent_index[i] as usize;
                    self.d[p] -= factor * self.u[i];
                    self.rhs[p] -= factor * self.rhs[i];
                }
                self.rhs[lo] /= self.d[lo];
                // Forward sweep, root first.
                for i in lo + 1..hi {
                    let p = self.parent_index[i] as usize;
                    self.rhs[i] -= self.u[i] * self.rhs[p];
                    self.rhs[i] /= self.d[i];
                }
            }
            voltage[lo..hi].copy_from_slice(&self.rhs[lo..hi]);
        }
    }

    pub fn rhs(&self) -> &[f64] {
        &self.rhs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_cv_chain_solves_exactly() {
        // d·V = rhs on a two-CV cable with one coupling conductance.
        let mut m = HinesMatrix::new(
            vec![NO_PARENT, 0],
            vec![0, 2],
            vec![10.0, 10.0],
            vec![0.0, 0.05],
            vec![100.0, 100.0],
            vec![0],
        )
        .unwrap();

        let dt = [0.025];
        let mut v = [-65.0, -60.0];
        let current = [0.0, 0.0];
        let conductivity = [0.0, 0.0];
        m.assemble(&dt, &v, &current, &conductivity);

        // Dense reference for the same 2×2 system.
        let g = 0.05;
        let a = 1e-3 / 0.025 * 10.0;
        let d0 = a + g;
        let d1 = a + g;
        let b0 = a * v[0];
        let b1 = a * v[1];
        let det = d0 * d1 - g * g;
        let exact0 = (b0 * d1 + g * b1) / det;
        let exact1 = (d0 * b1 + g * b0) / det;

        m.solve(&mut v);
        assert!((v[0] - exact0).abs() < 1e-12);
        assert!((v[1] - exact1).abs() < 1e-12);
    }

    #[test]
    fn frozen_cell_keeps_voltage() {
        let mut m = HinesMatrix::new(
            vec![NO_PARENT, 0],
            vec![0, 2],
            vec![10.0, 10.0],
            vec![0.0, 0.05],
            vec![100.0, 100.0],
            vec![0],
        )
        .unwrap();
        let dt = [0.0];
        let mut v = [-65.0, -60.0];
        m.assemble(&dt, &v, &[1.0, 1.0], &[0.0, 0.0]);
        m.solve(&mut v);
        assert_eq!(v, [-65.0, -60.0]);
    }

    #[test]
    fn bad_parent_is_rejected() {
        let err = HinesMatrix::new(
            vec![NO_PARENT, 1],
            vec![0, 2],
            vec![1.0, 1.0],
            vec![0.0, 1.0],
            vec![1.0, 1.0],
            vec![0],
        );
        assert!(matches!(
            err,
            Err(SolverError::BadParent { cv: 1, parent: 1 })
        ));
    }
}
