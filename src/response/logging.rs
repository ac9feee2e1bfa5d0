use crate::io::settings::ResponseConfig;
use crate::response::{
    ActiveSpace, Convergence, FragmentTable, Occupations, OperatorSpec, Spin,
};
use crate::utils::Timer;
use log::{debug, info, warn};
use ndarray::prelude::*;

pub fn print_response_init(
    config: &ResponseConfig,
    nden: usize,
    occupations: &Occupations,
    fragments: &FragmentTable,
    frequencies: &[f64],
    operators: &[OperatorSpec],
) {
    info!("{:^80}", "");
    info!("{: ^80}", "Linear Response");
    info!("{:-^80}", "");
    info!("{: <35} {:?}", "solver:", config.solver);
    info!("{: <35} {}", "hamiltonian:", config.hamiltonian);
    info!("{: <35} {}", "spin:", config.spin);
    info!("{: <35} {}", "max. iterations:", config.maxiter);
    info!("{: <35} {:4.2e}", "convergence threshold:", config.threshold());
    info!("{: <35} {}", "spin channels:", nden);
    for &spin in Spin::channels(nden) {
        info!(
            "{: <35} {} occ. {} virt.",
            format!("{} orbitals:", spin),
            occupations.nocc(spin),
            occupations.nvirt(spin)
        );
    }
    for line in fragment_lines(fragments, nden).iter() {
        info!("{}", line);
    }
    if config.do_orthogonalization_canonical {
        info!("{: <35} {}", "canonical orthogonalization:", "on");
    }
    if config.mask_ediff_mo || config.mask_form_results_mo {
        info!(
            "{: <35} ediff: {} results: {} fragment: {}",
            "fragment masking:",
            config.mask_ediff_mo,
            config.mask_form_results_mo,
            config.frgm_response_idx
        );
    }
    info!("{: <35} {:?}", "frequencies (a.u.):", frequencies);
    for op in operators.iter() {
        info!(
            "{: <35} {} components, response: {}",
            format!("operator {}:", op.label),
            op.n_components(),
            op.do_response
        );
    }
    info!("{:-^80}", "");
}

/// One line per fragment with the fragment id and the local orbitals of every channel.
pub fn fragment_lines(fragments: &FragmentTable, nden: usize) -> Vec<String> {
    fragments
        .iter()
        .map(|frag| {
            let channels: Vec<String> = Spin::channels(nden)
                .iter()
                .map(|&spin| format!("{}: {}/{}", spin, frag.nocc(spin), frag.nvirt(spin)))
                .collect();
            format!(
                "{: <35} {} orbitals, occ./virt. {}",
                format!("fragment {}:", frag.id),
                frag.norb,
                channels.join(" ")
            )
        })
        .collect()
}

pub fn print_frequency_header(idx: usize, frequency: f64) {
    info!("{:^80}", "");
    info!(
        "{: ^80}",
        format!("Frequency {}: {:.8} a.u.", idx + 1, frequency)
    );
    info!("{:-^80}", "");
}

/// Intermediate matrices, only shown at the debug level.
pub fn print_matrix(name: &str, mat: ArrayView2<f64>) {
    debug!("{}:", name);
    debug!("{:>12.8}", mat);
}

pub fn print_active_space(spin: Spin, active: &ActiveSpace) {
    debug!(
        "active rotations ({}): {} of {}",
        spin,
        active.len(),
        active.dim()
    );
    debug!("{:?}", active.indices());
}

/// Labels `<operator>_<component>` of all rows/columns of the response tensor.
pub fn component_labels(operators: &[OperatorSpec]) -> Vec<String> {
    operators
        .iter()
        .flat_map(|op| {
            (0..op.n_components()).map(move |idx| format!("{}_{}", op.label, op.component_label(idx)))
        })
        .collect()
}

pub fn print_tensor(title: &str, tensor: ArrayView2<f64>, labels: &[String]) {
    info!("{:^80}", "");
    info!("{: <80}", title);
    let header: String = labels.iter().map(|l| format!("{:>16}", l)).collect();
    info!("{:>16}{}", "", header);
    for (label, row) in labels.iter().zip(tensor.outer_iter()) {
        let values: String = row.iter().map(|x| format!("{:>16.8}", x)).collect();
        info!("{:>16}{}", label, values);
    }
}

pub fn print_convergence(operators: &[OperatorSpec], statuses: &[Convergence]) {
    for (op, status) in operators.iter().zip(statuses.iter()) {
        match status {
            Convergence::Converged {
                iterations,
                residual,
            } => info!(
                "{: <20} converged after {} iterations, residual: {:4.2e}",
                op.label, iterations, residual
            ),
            Convergence::NotConverged {
                iterations,
                residual,
            } => warn!(
                "Response vectors of {} are not converged after {} iterations, residual: {:4.2e}",
                op.label, iterations, residual
            ),
            Convergence::Skipped => info!("{: <20} uncoupled response", op.label),
        }
    }
}

pub fn print_response_end(timer: &Timer) {
    info!("{:-^80}", "");
    info!("{}", timer);
    info!("{:^80}", "");
}
