use anyhow::{Context, Result};
use clap::{crate_name, crate_version, Arg, Command};
use env_logger::Builder;
use linresp::defaults::INPUT_FILE_NAME;
use linresp::io::{read_input, write_footer, write_header, write_results, InputData, ResponseConfig};
use linresp::response::logging::component_labels;
use linresp::response::{
    build_solver, solve_linear_response, MatVec, ReferenceState, ResponseResults,
    ResponseSolver, Uncoupled,
};
use linresp::utils::Timer;
use log::{warn, LevelFilter};
use std::io::Write;
use std::path::Path;

fn main() -> Result<()> {
    // Input.
    let matches = Command::new(crate_name!())
        .version(crate_version!())
        .about("frequency-dependent linear response of one-electron properties")
        .arg(
            Arg::new("input-File")
                .help("Sets the input file to use")
                .index(1),
        )
        .get_matches();
    let input_file: &str = matches.value_of("input-File").unwrap_or(INPUT_FILE_NAME);
    let (mut input, config): (InputData, ResponseConfig) = read_input(Path::new(input_file))?;

    // Multithreading.
    rayon::ThreadPoolBuilder::new()
        .num_threads(input.number_of_cores)
        .build_global()
        .context("Unable to build the thread pool")?;

    // Logging.
    // The log level follows the print level of the response settings.
    let log_level: LevelFilter = match config.print_level {
        i32::MIN..=0 => LevelFilter::Warn,
        1..=9 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    Builder::new()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .filter(None, log_level)
        .init();

    write_header();
    let timer: Timer = Timer::start();

    // Computations.
    let matvec: Box<dyn MatVec> = match input.hessian.take() {
        Some(hessian) => Box::new(hessian),
        None => Box::new(Uncoupled),
    };
    let mut solver: Box<dyn ResponseSolver> = build_solver(config.solver);
    let reference = ReferenceState {
        coefficients: input.coefficients.view(),
        fock: input.fock.view(),
        overlap: input.overlap.view(),
        occupations: &input.occupations,
        fragments: &input.fragments,
    };
    let results: ResponseResults = solve_linear_response(
        matvec.as_ref(),
        solver.as_mut(),
        &reference,
        &input.frequencies,
        &mut input.operators,
        &config,
    )?;
    if !results.converged() {
        warn!("Not all response vectors are converged, see the iteration log above.");
    }

    // Output.
    let labels: Vec<String> = component_labels(&input.operators);
    write_results(&config.prefix, &results, &labels)?;

    write_footer(timer);
    Ok(())
}
