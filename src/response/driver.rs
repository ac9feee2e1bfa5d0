use crate::defaults::PRINT_LEVEL_VERBOSE;
use crate::io::checkpoint::{ediff_path, write_array2};
use crate::io::settings::{ReadMode, ResponseConfig};
use crate::response::indices::select_active_space;
use crate::response::logging::*;
use crate::response::results::{combine_channels, form_results};
use crate::response::{
    make_masked_mat, ActiveSpace, Basis, Convergence, DiagonalPolicy, FragmentTable, MatVec,
    MoBasis, Occupations, OperatorSpec, ResponseError, ResponseResults, ResponseSolver,
};
use crate::utils::Timer;
use log::info;
use ndarray::prelude::*;
use rayon::prelude::*;

/// The converged reference state in the AO basis.
#[derive(Clone, Copy)]
pub struct ReferenceState<'a> {
    /// MO coefficients `[nden, nbasis, norb]`.
    pub coefficients: ArrayView3<'a, f64>,
    /// AO Fock matrices `[nden, nbasis, nbasis]`.
    pub fock: ArrayView3<'a, f64>,
    /// AO overlap `[nbasis, nbasis]`.
    pub overlap: ArrayView2<'a, f64>,
    /// `[nocc_alph, nvirt_alph, nocc_beta, nvirt_beta]`
    pub occupations: &'a [usize],
    pub fragments: &'a FragmentTable,
}

/// Solve the frequency-dependent linear response equations
///
/// (ediff - ω) X + G(X) = V
///
/// of all operators at all frequencies. The gradients V are formed from the AO
/// integrals of the operators, the coupling G is provided by `matvec` and the
/// iterations are done by `solver`. The response vectors of the operators hold the
/// solution of the last frequency afterwards.
///
/// Returns the response tensor `[ncomp_tot, ncomp_tot, nfreq]` (closed shell: alpha
/// tensor, open shell: 2 (alpha + beta)) and the convergence status of every operator
/// at every frequency.
pub fn solve_linear_response(
    matvec: &dyn MatVec,
    solver: &mut dyn ResponseSolver,
    reference: &ReferenceState,
    omega: &[f64],
    operators: &mut [OperatorSpec],
    config: &ResponseConfig,
) -> Result<ResponseResults, ResponseError> {
    if omega.is_empty() {
        return Err(ResponseError::NoFrequencies);
    }
    if operators.is_empty() {
        return Err(ResponseError::NoOperators);
    }
    let timer: Timer = Timer::start();
    let verbose: bool = config.print_level >= PRINT_LEVEL_VERBOSE;

    let (nden, _nbasis, norb) = reference.coefficients.dim();
    let occupations: Occupations = Occupations::new(reference.occupations, norb)?;
    reference.fragments.check(&occupations)?;
    let basis: MoBasis = MoBasis::new(
        reference.coefficients,
        reference.overlap,
        reference.fock,
        occupations,
        config.do_orthogonalization_canonical,
    )?;
    if config.print_level >= 1 {
        print_response_init(
            config,
            nden,
            &occupations,
            reference.fragments,
            omega,
            operators,
        );
    }
    if verbose {
        for &spin in basis.spins() {
            print_matrix(&format!("MO overlap ({})", spin), basis.sigma[spin.index()].view());
            print_matrix(&format!("MO Fock matrix ({})", spin), basis.fock[spin.index()].view());
        }
        if let Some(s_inv) = basis.s_inv.as_ref() {
            print_matrix("pseudo-inverse of the AO overlap", s_inv.view());
        }
        if let Some(sigma_inv) = basis.sigma_inv.as_ref() {
            for (spin, mat) in basis.spins().iter().zip(sigma_inv.iter()) {
                print_matrix(&format!("pseudo-inverse of the MO overlap ({})", spin), mat.view());
            }
        }
    }

    // Active rotations of every channel and the (masked) energy differences.
    let active: Vec<ActiveSpace> = basis
        .spins()
        .iter()
        .map(|&spin| {
            select_active_space(reference.fragments, &occupations, spin, config.frgm_response_idx)
        })
        .collect::<Result<Vec<ActiveSpace>, ResponseError>>()?;
    let mut ediff: Vec<Array2<f64>> = Vec::with_capacity(nden);
    for (&spin, active_s) in basis.spins().iter().zip(active.iter()) {
        let mut ediff_s: Array2<f64> = basis.ediff(spin);
        if verbose {
            print_matrix(&format!("energy differences ({})", spin), ediff_s.view());
            print_active_space(spin, active_s);
        }
        if config.mask_ediff_mo {
            ediff_s = make_masked_mat(
                ediff_s.view(),
                active_s,
                0.0,
                DiagonalPolicy::Sentinel(config.mask_ediff_sentinel),
            )?;
            if verbose {
                print_matrix(
                    &format!("masked energy differences ({})", spin),
                    ediff_s.view(),
                );
            }
        }
        if config.save > 0 {
            write_array2(&ediff_path(&config.prefix, spin), "ediff", ediff_s.view())?;
        }
        ediff.push(ediff_s);
    }

    // Gradients of all operators.
    operators
        .par_iter_mut()
        .map(|op| op.form_rhs(&basis))
        .collect::<Result<Vec<()>, ResponseError>>()?;

    // The checkpoint is read once, the loaded vectors start the first frequency.
    let mut needs_guess: Vec<bool> = vec![true; operators.len()];
    let checkpoint: Option<Basis> = match config.read {
        ReadMode::Compute => None,
        ReadMode::MolecularOrbital => Some(Basis::Mo),
        ReadMode::AtomicOrbital => Some(Basis::Ao),
    };
    if let Some(kind) = checkpoint {
        for (op, needs) in operators.iter_mut().zip(needs_guess.iter_mut()) {
            if op.do_response {
                op.load_rspvecs(kind, &config.prefix, &basis)?;
                info!("response vectors of {} are read from the checkpoint", op.label);
                *needs = false;
            }
        }
    }

    solver.set_orbital_occupations(occupations);
    solver.set_fragment_occupations(reference.fragments);

    let results_mask: Option<&[ActiveSpace]> = if config.mask_form_results_mo {
        Some(active.as_slice())
    } else {
        None
    };
    let labels: Vec<String> = component_labels(operators);
    let ncomp_tot: usize = labels.len();
    let mut tensor: Array3<f64> = Array3::zeros((ncomp_tot, ncomp_tot, omega.len()));
    let mut convergence: Vec<Vec<Convergence>> = Vec::with_capacity(omega.len());

    for (idx, &frequency) in omega.iter().enumerate() {
        if config.print_level >= 1 {
            print_frequency_header(idx, frequency);
        }
        // 1. Uncoupled guess.
        for (op, &needs) in operators.iter_mut().zip(needs_guess.iter()) {
            if needs || !op.do_response {
                for (&spin, ediff_s) in basis.spins().iter().zip(ediff.iter()) {
                    op.form_guess_rspvec(spin, ediff_s.view(), frequency);
                }
                if config.save > 0 {
                    op.save_guess(&config.prefix, &basis)?;
                }
            }
        }
        // 2. Uncoupled response tensor.
        if config.print_level >= 1 {
            let uncoupled: Array2<f64> =
                combine_channels(form_results(operators, nden, results_mask).view());
            print_tensor("uncoupled response tensor", uncoupled.view(), &labels);
        }

        // 3. Iterative solution.
        solver.init(&ediff, frequency, config.maxiter, config.threshold())?;
        let statuses: Vec<Convergence> = solver.run(operators, matvec)?;
        print_convergence(operators, &statuses);

        // 4. Response tensor of this frequency.
        let tensor_w: Array2<f64> =
            combine_channels(form_results(operators, nden, results_mask).view());
        if config.print_level >= 1 {
            print_tensor("response tensor", tensor_w.view(), &labels);
        }
        tensor.index_axis_mut(Axis(2), idx).assign(&tensor_w);

        // 5. Checkpoint.
        if config.save > 0 {
            for op in operators.iter() {
                op.save_solution(&config.prefix, config.save, &basis)?;
            }
        }
        convergence.push(statuses);
    }
    if config.print_level >= 1 {
        print_response_end(&timer);
    }

    Ok(ResponseResults {
        tensor,
        frequencies: omega.to_vec(),
        convergence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::checkpoint::{checkpoint_path, RHSVECS_TAG, RSPVECS_GUESS_TAG, RSPVECS_TAG};
    use crate::response::{build_solver, Spin, Uncoupled};
    use crate::response::solvers::SolverKind;
    use crate::utils::tests::*;
    use itertools::iproduct;

    fn quiet_config() -> ResponseConfig {
        ResponseConfig {
            print_level: 0,
            conv: 10,
            ..Default::default()
        }
    }

    #[test]
    fn zero_coupling_gives_uncoupled_response() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (norb, nocc) = (5, 2);
        let model = closed_shell_reference(norb, nocc);
        let (c, s, f) = model.spin_blocks(1);
        let occ = [nocc, norb - nocc, nocc, norb - nocc];
        let fragments = FragmentTable::empty();
        let reference = ReferenceState {
            coefficients: c.view(),
            fock: f.view(),
            overlap: s.view(),
            occupations: &occ,
            fragments: &fragments,
        };
        let mut operators = vec![dipole_operator(norb)];
        let omega = [0.0, 0.1];
        let mut config = quiet_config();
        config.print_level = 1;
        let mut solver = build_solver(SolverKind::Diis);
        let results = solve_linear_response(
            &Uncoupled,
            solver.as_mut(),
            &reference,
            &omega,
            &mut operators,
            &config,
        )
        .unwrap();

        assert_eq!(results.tensor.dim(), (3, 3, 2));
        assert!(results.converged());
        // T_pq = Σ_ia g_ia,p g_ia,q / (ε_a - ε_i - ω)
        let orbe = orbital_energies(norb, nocc);
        let g = &operators[0].rhsvecs[0];
        for (idx, &w) in omega.iter().enumerate() {
            let denominator: Array1<f64> = Array1::from_shape_fn(nocc * (norb - nocc), |ia| {
                let (i, a) = (ia / (norb - nocc), nocc + ia % (norb - nocc));
                orbe[a] - orbe[i] - w
            });
            let x: Array2<f64> = g / &denominator.insert_axis(Axis(1));
            let expected: Array2<f64> = g.t().dot(&x);
            assert!(
                results.at(idx).abs_diff_eq(&expected, 1e-10),
                "response: {} uncoupled: {}",
                results.at(idx),
                expected
            );
        }
    }

    #[test]
    fn missing_frequencies_and_operators_are_usage_errors() {
        // the reference is invalid, but the usage errors are reported first
        let c: Array3<f64> = Array3::zeros((3, 2, 2));
        let f: Array3<f64> = Array3::zeros((3, 2, 2));
        let s: Array2<f64> = Array2::zeros((2, 2));
        let occ = [1, 1];
        let fragments = FragmentTable::empty();
        let reference = ReferenceState {
            coefficients: c.view(),
            fock: f.view(),
            overlap: s.view(),
            occupations: &occ,
            fragments: &fragments,
        };
        let mut solver = build_solver(SolverKind::Diis);
        let mut operators = vec![dipole_operator(2)];
        let err = solve_linear_response(
            &Uncoupled,
            solver.as_mut(),
            &reference,
            &[],
            &mut operators,
            &quiet_config(),
        )
        .unwrap_err();
        assert_eq!(err, ResponseError::NoFrequencies);
        let err = solve_linear_response(
            &Uncoupled,
            solver.as_mut(),
            &reference,
            &[0.1],
            &mut [],
            &quiet_config(),
        )
        .unwrap_err();
        assert_eq!(err, ResponseError::NoOperators);
        let err = solve_linear_response(
            &Uncoupled,
            solver.as_mut(),
            &reference,
            &[0.1],
            &mut operators,
            &quiet_config(),
        )
        .unwrap_err();
        assert_eq!(err, ResponseError::MalformedOccupations(2));
    }

    #[test]
    fn single_active_pair_reduces_to_scalar_equation() {
        let _ = env_logger::builder().is_test(true).try_init();
        // fragment 1: 1 occupied + 1 virtual orbital, fragment 2: 1 occupied orbital;
        // fragment 1 alone owns the single rotation 0
        let (norb, nocc) = (3, 2);
        let model = non_orthogonal_reference(norb, nocc);
        let (c, s, f) = model.spin_blocks(1);
        let occ = [nocc, 1, nocc, 1];
        let fragments = FragmentTable::from_rows(&[[0, 2, 1, 1], [1, 1, 1, 1]]).unwrap();
        let reference = ReferenceState {
            coefficients: c.view(),
            fock: f.view(),
            overlap: s.view(),
            occupations: &occ,
            fragments: &fragments,
        };
        let basis = MoBasis::new(
            c.view(),
            s.view(),
            f.view(),
            Occupations::new(&occ, norb).unwrap(),
            false,
        )
        .unwrap();
        let e00: f64 = basis.ediff(Spin::Alpha)[[0, 0]];

        let mut operators = vec![dipole_operator(norb)];
        let mut config = quiet_config();
        config.frgm_response_idx = 1;
        config.mask_ediff_mo = true;
        config.print_level = 10;
        let w: f64 = 0.05;
        for (kind, mask_results) in iproduct!(
            [SolverKind::Diis, SolverKind::Krylov],
            [true, false]
        ) {
            config.solver = kind;
            config.mask_form_results_mo = mask_results;
            let mut solver = build_solver(kind);
            let results = solve_linear_response(
                &Uncoupled,
                solver.as_mut(),
                &reference,
                &[w],
                &mut operators,
                &config,
            )
            .unwrap();

            let g0: ArrayView1<f64> = operators[0].rhsvecs[0].row(0);
            let g1: ArrayView1<f64> = operators[0].rhsvecs[0].row(1);
            // the excluded rotation only sees the sentinel on the diagonal
            let x1 = operators[0].rspvecs[0].row(1);
            assert!(x1.abs_diff_eq(&(&g1 / (config.mask_ediff_sentinel - w)), 1e-14));
            for p in 0..3 {
                for q in 0..3 {
                    let mut expected: f64 = g0[p] * g0[q] / (e00 - w);
                    if !mask_results {
                        expected += g1[p] * g1[q] / (config.mask_ediff_sentinel - w);
                    }
                    assert!(
                        (results.tensor[[p, q, 0]] - expected).abs() < 1e-10,
                        "{:?} (masked results: {}) T[{}, {}] = {}, expected {}",
                        kind,
                        mask_results,
                        p,
                        q,
                        results.tensor[[p, q, 0]],
                        expected
                    );
                }
            }
        }
    }

    #[test]
    fn masked_ediff_without_result_mask_decouples_excluded_pairs() {
        // fragment 2 owns the occupied orbital 1, i.e. the rotations 2 and 3
        let (norb, nocc) = (4, 2);
        let model = closed_shell_reference(norb, nocc);
        let (c, s, f) = model.spin_blocks(1);
        let occ = [nocc, 2, nocc, 2];
        let fragments = FragmentTable::from_rows(&[[0, 2, 1, 1], [1, 2, 1, 1]]).unwrap();
        let reference = ReferenceState {
            coefficients: c.view(),
            fock: f.view(),
            overlap: s.view(),
            occupations: &occ,
            fragments: &fragments,
        };
        let mut operators = vec![dipole_operator(norb)];
        let mut config = quiet_config();
        config.frgm_response_idx = 2;
        config.mask_ediff_mo = true;
        let w: f64 = 0.1;
        let mut solver = build_solver(SolverKind::Diis);
        let results = solve_linear_response(
            &Uncoupled,
            solver.as_mut(),
            &reference,
            &[w],
            &mut operators,
            &config,
        )
        .unwrap();

        let orbe = orbital_energies(norb, nocc);
        let g: &Array2<f64> = &operators[0].rhsvecs[0];
        let active: Array2<f64> = g.select(Axis(0), &[2, 3]);
        let denominator: Array1<f64> = array![orbe[2] - orbe[1] - w, orbe[3] - orbe[1] - w];
        let expected: Array2<f64> = active.t().dot(&(&active / &denominator.insert_axis(Axis(1))));
        assert!(
            results.at(0).abs_diff_eq(&expected, 1e-8),
            "response: {} active pairs only: {}",
            results.at(0),
            expected
        );
    }

    #[test]
    fn open_shell_with_identical_channels_is_four_times_closed_shell() {
        let (norb, nocc) = (6, 2);
        let model = closed_shell_reference(norb, nocc);
        let occ = [nocc, norb - nocc, nocc, norb - nocc];
        let fragments = FragmentTable::empty();
        let operators = vec![dipole_operator(norb)];
        let coupling: Array2<f64> = generate_diagonal_dominant(nocc * (norb - nocc), 0.01) * 0.01;
        let mut tensors: Vec<Array3<f64>> = Vec::new();
        for nden in [1, 2] {
            let (c, s, f) = model.spin_blocks(nden);
            let reference = ReferenceState {
                coefficients: c.view(),
                fock: f.view(),
                overlap: s.view(),
                occupations: &occ,
                fragments: &fragments,
            };
            let mut ops = operators.clone();
            let mut solver = build_solver(SolverKind::Krylov);
            let results = solve_linear_response(
                &coupling,
                solver.as_mut(),
                &reference,
                &[0.02],
                &mut ops,
                &quiet_config(),
            )
            .unwrap();
            tensors.push(results.tensor);
        }
        assert!(tensors[1].abs_diff_eq(&(4.0 * &tensors[0]), 1e-8));
    }

    #[test]
    fn checkpoint_restart_in_mo_and_ao_basis() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = scratch_dir("driver");
        let prefix: String = format!("{}/h2o_", dir.display());
        let (norb, nocc) = (5, 2);
        let model = non_orthogonal_reference(norb, nocc);
        let (c, s, f) = model.spin_blocks(2);
        let occ = [nocc, norb - nocc, nocc, norb - nocc];
        let fragments = FragmentTable::empty();
        let reference = ReferenceState {
            coefficients: c.view(),
            fock: f.view(),
            overlap: s.view(),
            occupations: &occ,
            fragments: &fragments,
        };
        let coupling: Array2<f64> = generate_diagonal_dominant(nocc * (norb - nocc), 0.01) * 0.01;
        let mut config = quiet_config();
        config.save = 2;
        config.prefix = prefix.clone();
        config.do_orthogonalization_canonical = true;
        let mut operators = vec![dipole_operator(norb)];
        let mut solver = build_solver(SolverKind::Krylov);
        let first = solve_linear_response(
            &coupling,
            solver.as_mut(),
            &reference,
            &[0.03],
            &mut operators,
            &config,
        )
        .unwrap();
        assert!(first.converged());
        for &spin in [Spin::Alpha, Spin::Beta].iter() {
            assert!(ediff_path(&prefix, spin).exists());
            for tag in [RSPVECS_TAG, RSPVECS_GUESS_TAG, RHSVECS_TAG] {
                assert!(checkpoint_path(&prefix, tag, "dipole", Basis::Mo, spin).exists());
            }
            assert!(checkpoint_path(&prefix, RSPVECS_TAG, "dipole", Basis::Ao, spin).exists());
        }

        // restart from the converged vectors: no iteration is needed
        for read in [ReadMode::MolecularOrbital, ReadMode::AtomicOrbital] {
            let mut restart_config = config.clone();
            restart_config.save = 0;
            restart_config.read = read;
            restart_config.maxiter = 0;
            let mut ops = vec![operators[0].clone()];
            let restart = solve_linear_response(
                &coupling,
                solver.as_mut(),
                &reference,
                &[0.03],
                &mut ops,
                &restart_config,
            )
            .unwrap();
            assert!(restart.converged(), "{:?}: {:?}", read, restart.convergence);
            assert!(restart.tensor.abs_diff_eq(&first.tensor, 1e-9));
        }
    }

    #[test]
    fn missing_checkpoint_is_reported() {
        let dir = scratch_dir("driver_missing");
        let (norb, nocc) = (4, 1);
        let model = closed_shell_reference(norb, nocc);
        let (c, s, f) = model.spin_blocks(1);
        let occ = [nocc, norb - nocc, nocc, norb - nocc];
        let fragments = FragmentTable::empty();
        let reference = ReferenceState {
            coefficients: c.view(),
            fock: f.view(),
            overlap: s.view(),
            occupations: &occ,
            fragments: &fragments,
        };
        let mut config = quiet_config();
        config.read = ReadMode::MolecularOrbital;
        config.prefix = format!("{}/", dir.display());
        let mut operators = vec![dipole_operator(norb)];
        let mut solver = build_solver(SolverKind::Diis);
        let err = solve_linear_response(
            &Uncoupled,
            solver.as_mut(),
            &reference,
            &[0.0],
            &mut operators,
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, ResponseError::Checkpoint { ref operator, .. } if operator == "dipole"));
    }

    #[test]
    fn exhausted_iterations_are_returned_as_status() {
        let (norb, nocc) = (6, 3);
        let model = non_orthogonal_reference(norb, nocc);
        let (c, s, f) = model.spin_blocks(1);
        let occ = [nocc, norb - nocc, nocc, norb - nocc];
        let fragments = FragmentTable::empty();
        let reference = ReferenceState {
            coefficients: c.view(),
            fock: f.view(),
            overlap: s.view(),
            occupations: &occ,
            fragments: &fragments,
        };
        let coupling: Array2<f64> = generate_diagonal_dominant(nocc * (norb - nocc), 0.05) * 0.1;
        let mut config = quiet_config();
        config.maxiter = 1;
        config.conv = 14;
        let mut operators = vec![dipole_operator(norb)];
        let mut solver = build_solver(SolverKind::Diis);
        let results = solve_linear_response(
            &coupling,
            solver.as_mut(),
            &reference,
            &[0.0],
            &mut operators,
            &config,
        )
        .unwrap();
        assert!(!results.converged());
        assert!(matches!(
            results.convergence[0][0],
            Convergence::NotConverged { iterations: 1, .. }
        ));
    }

    #[test]
    fn fragment_index_out_of_range() {
        let (norb, nocc) = (4, 2);
        let model = closed_shell_reference(norb, nocc);
        let (c, s, f) = model.spin_blocks(1);
        let occ = [nocc, norb - nocc, nocc, norb - nocc];
        let fragments = FragmentTable::from_rows(&[[0, 2, 1, 1], [1, 2, 1, 1]]).unwrap();
        let reference = ReferenceState {
            coefficients: c.view(),
            fock: f.view(),
            overlap: s.view(),
            occupations: &occ,
            fragments: &fragments,
        };
        let mut config = quiet_config();
        config.frgm_response_idx = 3;
        let mut operators = vec![dipole_operator(norb)];
        let mut solver = build_solver(SolverKind::Diis);
        let err = solve_linear_response(
            &Uncoupled,
            solver.as_mut(),
            &reference,
            &[0.0],
            &mut operators,
            &config,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ResponseError::FragmentOutOfRange {
                index: 3,
                n_fragments: 2
            }
        );
    }
}
