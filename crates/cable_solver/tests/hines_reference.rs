use cable_core::NO_PARENT;
use cable_solver::HinesMatrix;
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

// Dense Gaussian elimination with partial pivoting, as the reference.
fn dense_solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Vec<f64> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().partial_cmp(&a[j][col].abs()).unwrap())
            .unwrap();
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let f = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= f * a[col][k];
            }
            b[row] -= f * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut acc = b[row];
        for k in row + 1..n {
            acc -= a[row][k] * x[k];
        }
        x[row] = acc / a[row][row];
    }
    x
}

fn random_tree(rng: &mut ChaCha8Rng, n: usize) -> Vec<i32> {
    let mut parent = vec![NO_PARENT; n];
    for i in 1..n {
        parent[i] = rng.gen_range(0..i) as i32;
    }
    parent
}

#[test]
fn random_spd_tree_matches_dense_reference() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);

    for trial in 0..20 {
        let n = 2 + (trial % 9) * 7;
        let parent = random_tree(&mut rng, n);

        let capacitance: Vec<f64> = (0..n).map(|_| rng.gen_range(1.0..50.0)).collect();
        let area: Vec<f64> = (0..n).map(|_| rng.gen_range(10.0..1000.0)).collect();
        let mut face: Vec<f64> = (0..n).map(|_| rng.gen_range(0.01..2.0)).collect();
        face[0] = 0.0;
        let voltage: Vec<f64> = (0..n).map(|_| rng.gen_range(-80.0..40.0)).collect();
        let current: Vec<f64> = (0..n).map(|_| rng.gen_range(-5.0..5.0)).collect();
        let conductivity: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..1.0)).collect();
        let dt = rng.gen_range(0.005..0.1);

        let mut m = HinesMatrix::new(
            parent.clone(),
            vec![0, n as u32],
            capacitance.clone(),
            face.clone(),
            area.clone(),
            vec![0],
        )
        .unwrap();
        m.assemble(&[dt], &voltage, &current, &conductivity);

        // Build the equivalent dense SPD system.
        let mut a = vec![vec![0.0; n]; n];
        let mut b = vec![0.0; n];
        for i in 0..n {
            let oodt = 1e-3 / dt;
            let area_factor = 1e-3 * area[i];
            let gi = oodt * capacitance[i] + area_factor * conductivity[i];
            a[i][i] += gi;
            b[i] = gi * voltage[i] - area_factor * current[i];
            if parent[i] != NO_PARENT {
                let p = parent[i] as usize;
                a[i][i] += face[i];
                a[p][p] += face[i];
                a[i][p] -= face[i];
                a[p][i] -= face[i];
            }
        }
        let expect = dense_solve(a, b);

        let mut solved = voltage.clone();
        m.solve(&mut solved);

        let norm: f64 = expect.iter().map(|x| x * x).sum::<f64>().sqrt();
        let err: f64 = solved
            .iter()
            .zip(&expect)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt();
        assert!(
            err <= 1e-10 * norm.max(1.0),
            "trial {trial}: relative error {}",
            err / norm
        );
    }
}
