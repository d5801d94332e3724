//! FVM discretization: per-CV geometry and electrical quantities derived
//! from a cell's painted parameters and its CV policy.

use crate::geometry::{append_divs, CvGeometry};
use crate::LayoutError;
use cable_cell::{CableCell, CableParams, GlobalProperties};
use cable_core::NO_PARENT;
use cable_morph::{pw_over_cable, Cable, CvPolicy, PwOverCable};

/// Discretization of one or more cells: geometry plus area, capacitance,
/// face conductance, initial potential, temperature and diameter per CV,
/// and the per-branch axial resistivity profile used by interpolants.
#[derive(Debug, Clone, Default)]
pub struct CvDiscretization {
    pub geometry: CvGeometry,
    /// µS, conductance to the parent CV; zero at roots.
    pub face_conductance: Vec<f64>,
    /// µm².
    pub cv_area: Vec<f64>,
    /// pF.
    pub cv_capacitance: Vec<f64>,
    /// mV.
    pub init_membrane_potential: Vec<f64>,
    /// K.
    pub temperature: Vec<f64>,
    /// µm.
    pub diam_um: Vec<f64>,
    /// Per cell, per branch: piecewise axial resistivity [Ω·cm].
    pub axial_resistivity: Vec<Vec<PwOverCable>>,
}

fn first_some(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    a.or(b)
}

impl CvDiscretization {
    pub fn size(&self) -> usize {
        self.geometry.size()
    }

    pub fn n_cell(&self) -> usize {
        self.geometry.n_cell()
    }

    pub fn append(&mut self, right: &CvDiscretization) {
        self.geometry.append(&right.geometry);
        self.face_conductance
            .extend_from_slice(&right.face_conductance);
        self.cv_area.extend_from_slice(&right.cv_area);
        self.cv_capacitance.extend_from_slice(&right.cv_capacitance);
        self.init_membrane_potential
            .extend_from_slice(&right.init_membrane_potential);
        self.temperature.extend_from_slice(&right.temperature);
        self.diam_um.extend_from_slice(&right.diam_um);
        self.axial_resistivity
            .extend(right.axial_resistivity.iter().cloned());
    }

    /// A digest over the discretized quantities, for determinism checks.
    pub fn config_digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"CABLE:FVM:CFG");
        update_u32(&mut hasher, self.size() as u32);
        update_u32(&mut hasher, self.n_cell() as u32);
        for (i, &p) in self.geometry.cv_parent.iter().enumerate() {
            update_u32(&mut hasher, p as u32);
            update_f64(&mut hasher, self.face_conductance[i]);
            update_f64(&mut hasher, self.cv_area[i]);
            update_f64(&mut hasher, self.cv_capacitance[i]);
            update_f64(&mut hasher, self.init_membrane_potential[i]);
            update_f64(&mut hasher, self.temperature[i]);
            update_f64(&mut hasher, self.diam_um[i]);
        }
        *hasher.finalize().as_bytes()
    }
}

fn update_u32(hasher: &mut blake3::Hasher, value: u32) {
    hasher.update(&value.to_le_bytes());
}

fn update_f64(hasher: &mut blake3::Hasher, value: f64) {
    hasher.update(&value.to_bits().to_le_bytes());
}

/// Discretize a single cell against the global parameter defaults.
pub fn discretize_cell(
    cell: &CableCell,
    global: &GlobalProperties,
) -> Result<CvDiscretization, LayoutError> {
    let dflt: &CableParams = cell.defaults();
    let gdflt = &global.default_parameters;

    let policy = dflt
        .discretization
        .clone()
        .or_else(|| gdflt.discretization.clone())
        .unwrap_or(CvPolicy::EverySegment);

    let m = cell.morphology();
    let embedding = cell.embedding();
    let boundaries = policy.boundary_points(m, embedding);

    let mut d = CvDiscretization {
        geometry: CvGeometry::new(cell, &boundaries),
        ..Default::default()
    };
    if d.geometry.is_empty() {
        return Ok(d);
    }

    let n_cv = d.geometry.size();
    d.face_conductance = vec![0.0; n_cv];
    d.cv_area = vec![0.0; n_cv];
    d.cv_capacitance = vec![0.0; n_cv];
    d.init_membrane_potential = vec![0.0; n_cv];
    d.temperature = vec![0.0; n_cv];
    d.diam_um = vec![0.0; n_cv];

    let dflt_resistivity = first_some(dflt.axial_resistivity, gdflt.axial_resistivity)
        .ok_or(LayoutError::IncompleteGlobalProperties("axial_resistivity"))?;
    let dflt_capacitance = first_some(dflt.membrane_capacitance, gdflt.membrane_capacitance)
        .ok_or(LayoutError::IncompleteGlobalProperties("membrane_capacitance"))?;
    let dflt_potential = first_some(dflt.init_membrane_potential, gdflt.init_membrane_potential)
        .ok_or(LayoutError::IncompleteGlobalProperties(
            "init_membrane_potential",
        ))?;
    let dflt_temperature = first_some(dflt.temperature, gdflt.temperature)
        .ok_or(LayoutError::IncompleteGlobalProperties("temperature"))?;

    let asg = cell.assignments();

    let n_branch = m.num_branches();
    let mut resistivity = Vec::with_capacity(n_branch);
    for b in 0..n_branch {
        resistivity.push(pw_over_cable(
            &asg.axial_resistivity,
            Cable::new(b as u32, 0.0, 1.0),
            dflt_resistivity,
            |v| *v,
        ));
    }

    for i in 0..n_cv {
        let cv_cables = d.geometry.cables(i);

        // Face conductance: flux between adjacent CVs with the voltage taken
        // as exact at a reference point per CV; the midpoint for unbranched
        // CVs, the fork point for branched ones.
        let p = d.geometry.cv_parent[i];
        if p != NO_PARENT {
            let parent_cables = d.geometry.cables(p as usize);
            let bid = cv_cables[0].branch;
            let mut parent_refpt = 0.0;
            let mut cv_refpt = 1.0;

            if cv_cables.len() == 1 {
                let c = cv_cables[0];
                cv_refpt = 0.5 * (c.prox_pos + c.dist_pos);
            }
            if parent_cables.len() == 1 {
                let c = parent_cables[0];
                // A trivial parent CV may sit on a different branch.
                if c.branch == bid {
                    parent_refpt = 0.5 * (c.prox_pos + c.dist_pos);
                }
            }

            let restricted = crate::clip_pw(&resistivity[bid as usize], parent_refpt, cv_refpt);
            let resistance = embedding.integrate_ixa_pw(bid, &restricted);
            if resistance > 0.0 {
                d.face_conductance[i] = 100.0 / resistance; // 100 scales to µS.
            }
        }

        let mut cv_length = 0.0;
        for &c in cv_cables {
            d.cv_area[i] += embedding.integrate_area(c);
            d.cv_capacitance[i] += embedding.integrate_area_pw(
                c.branch,
                &pw_over_cable(&asg.membrane_capacitance, c, dflt_capacitance, |v| *v),
            );
            d.init_membrane_potential[i] += embedding.integrate_area_pw(
                c.branch,
                &pw_over_cable(&asg.init_membrane_potential, c, dflt_potential, |v| *v),
            );
            d.temperature[i] += embedding.integrate_area_pw(
                c.branch,
                &pw_over_cable(&asg.temperature, c, dflt_temperature, |v| *v),
            );
            cv_length += embedding.integrate_length(c);
        }

        if d.cv_area[i] > 0.0 {
            let oo_area = 1.0 / d.cv_area[i];
            d.init_membrane_potential[i] *= oo_area;
            d.temperature[i] *= oo_area;

            // A trivial root parent inherits from its first non-trivial
            // child; deeper trivial CVs are handled below.
            if p != NO_PARENT
                && d.geometry.cv_parent[p as usize] == NO_PARENT
                && d.cv_area[p as usize] == 0.0
            {
                d.init_membrane_potential[p as usize] = d.init_membrane_potential[i];
                d.temperature[p as usize] = d.temperature[i];
            }
        } else if p != NO_PARENT {
            d.init_membrane_potential[i] = d.init_membrane_potential[p as usize];
            d.temperature[i] = d.temperature[p as usize];
        }

        if cv_length > 0.0 {
            d.diam_um[i] = d.cv_area[i] / (cv_length * std::f64::consts::PI);
        }
    }

    // Capacitance stays as the area integral: F/m²·µm² = pF.
    d.axial_resistivity = vec![resistivity];
    Ok(d)
}

/// Discretize a list of cells and concatenate the results, offsetting CV
/// and cell indices.
pub fn discretize(
    cells: &[CableCell],
    global: &GlobalProperties,
) -> Result<CvDiscretization, LayoutError> {
    let mut combined = CvDiscretization::default();
    for cell in cells {
        let d = discretize_cell(cell, global)?;
        if combined.n_cell() == 0 {
            combined = d;
        } else {
            combined.append(&d);
        }
    }
    log::debug!(
        "discretized {} cells into {} CVs",
        combined.n_cell(),
        combined.size()
    );
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cable_cell::{Decor, Paintable};
    use cable_morph::{Location, Morphology, Point, Region, SegmentTree};

    fn cylinder_cell(len: f64, r: f64, policy: CvPolicy) -> CableCell {
        let mut tree = SegmentTree::new();
        tree.append(
            None,
            Point::new(0.0, 0.0, 0.0, r),
            Point::new(len, 0.0, 0.0, r),
            1,
        )
        .unwrap();
        let m = Morphology::try_from_tree(tree).unwrap();
        let mut params = CableParams::default();
        params.discretization = Some(policy);
        CableCell::new(m, Decor::new().set_default(params)).unwrap()
    }

    #[test]
    fn area_partitions_across_cvs() {
        let cell = cylinder_cell(100.0, 1.0, CvPolicy::FixedPerBranch(4));
        let global = GlobalProperties::neuron_defaults();
        let d = discretize_cell(&cell, &global).unwrap();
        assert_eq!(d.size(), 4);
        let total: f64 = d.cv_area.iter().sum();
        let expect = 2.0 * std::f64::consts::PI * 100.0;
        assert!((total - expect).abs() < 1e-9 * expect);
        for &a in &d.cv_area {
            assert!((a - expect / 4.0).abs() < 1e-9 * expect);
        }
    }

    #[test]
    fn face_conductance_between_midpoints() {
        let cell = cylinder_cell(100.0, 1.0, CvPolicy::FixedPerBranch(2));
        let global = GlobalProperties::neuron_defaults();
        let d = discretize_cell(&cell, &global).unwrap();
        assert_eq!(d.size(), 2);
        assert_eq!(d.face_conductance[0], 0.0);
        // Span between CV midpoints is 50 µm of 1 µm-radius cable at
        // 35.4 Ω·cm: g = 100·π·r²/(ρ·L).
        let expect = 100.0 * std::f64::consts::PI / (35.4 * 50.0);
        assert!((d.face_conductance[1] - expect).abs() < 1e-12);
    }

    #[test]
    fn painted_potential_is_area_weighted() {
        let mut tree = SegmentTree::new();
        tree.append(
            None,
            Point::new(0.0, 0.0, 0.0, 1.0),
            Point::new(100.0, 0.0, 0.0, 1.0),
            1,
        )
        .unwrap();
        let m = Morphology::try_from_tree(tree).unwrap();
        let mut params = CableParams::default();
        params.discretization = Some(CvPolicy::FixedPerBranch(1));
        let decor = Decor::new()
            .set_default(params)
            .paint(
                Region::Cable(cable_morph::Cable::new(0, 0.0, 0.25)),
                Paintable::InitMembranePotential(-80.0),
            );
        let cell = CableCell::new(m, decor).unwrap();
        let global = GlobalProperties::neuron_defaults();
        let d = discretize_cell(&cell, &global).unwrap();
        // Quarter of the area at -80, the rest at the -65 default.
        let expect = 0.25 * -80.0 + 0.75 * -65.0;
        assert!((d.init_membrane_potential[0] - expect).abs() < 1e-9);
    }

    #[test]
    fn digest_is_deterministic() {
        let cell = cylinder_cell(100.0, 1.0, CvPolicy::FixedPerBranch(4));
        let global = GlobalProperties::neuron_defaults();
        let a = discretize_cell(&cell, &global).unwrap();
        let b = discretize_cell(&cell, &global).unwrap();
        assert_eq!(a.config_digest(), b.config_digest());
    }

    #[test]
    fn missing_default_is_reported() {
        let cell = cylinder_cell(10.0, 1.0, CvPolicy::Single);
        let mut global = GlobalProperties::neuron_defaults();
        global.default_parameters.temperature = None;
        let err = discretize_cell(&cell, &global);
        assert!(matches!(
            err,
            Err(LayoutError::IncompleteGlobalProperties("temperature"))
        ));
    }

    #[test]
    fn location_roundtrip_on_multicell() {
        let cells = vec![
            cylinder_cell(100.0, 1.0, CvPolicy::FixedPerBranch(2)),
            cylinder_cell(100.0, 1.0, CvPolicy::FixedPerBranch(2)),
        ];
        let global = GlobalProperties::neuron_defaults();
        let d = discretize(&cells, &global).unwrap();
        assert_eq!(d.n_cell(), 2);
        let cv = d.geometry.location_cv(
            1,
            Location::new(0, 0.75),
            crate::geometry::CvPrefer::Nonempty,
        );
        assert!(d.geometry.cell_cvs(1).contains(&(cv as usize)));
    }
}
