//! QAP Reform - Command Line Interface
//!
//! Generates and imports QAP instances and compares MILP reformulations on them.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use qap_reform::bounds::BoundConfig;
use qap_reform::error::QapError;
use qap_reform::formulation::{SolveLimits, Variant};
use qap_reform::generator::{generate, GeneratorConfig};
use qap_reform::harness::{ComparisonHarness, ComparisonReport, HarnessOptions};
use qap_reform::instance::QapInstance;
use qap_reform::oracle::{GurobiConfig, GurobiOracle, MicrolpOracle, SolverOracle};
use qap_reform::qaplib::load_qaplib;

use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "qap-reform")]
#[command(author = "M2 AI2D Student")]
#[command(version = "1.0")]
#[command(about = "Builds and compares exact MILP reformulations of the QAP")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a random instance
    Generate {
        /// Number of facilities
        #[arg(short = 'n', long, default_value = "5")]
        size: usize,

        /// Same number of locations as facilities
        #[arg(short = 'q', long, default_value_t = true, action = ArgAction::Set)]
        square: bool,

        /// Generator version (1 = random plane, 2 = two-aisle warehouse)
        #[arg(short = 'v', long, default_value = "1")]
        version: u8,

        /// Random seed
        #[arg(short = 'r', long, default_value = "42")]
        seed: u64,

        /// Instance name, also the output file stem
        #[arg(long, default_value = "generated")]
        name: String,

        /// Output folder
        #[arg(long, default_value = "instances")]
        folder: PathBuf,
    },

    /// Convert a QAPLIB file into an instance file
    ImportQaplib {
        /// Path to the QAPLIB `.dat` file
        file: PathBuf,

        /// Output folder
        #[arg(long, default_value = "instances")]
        folder: PathBuf,
    },

    /// Solve an instance with one or more formulations and compare them
    Solve {
        /// Path to the instance file
        instance: PathBuf,

        /// Comma separated formulations
        #[arg(short, long, default_value = "quadratic,linearized,fischetti,xiayuan,zhang")]
        models: String,

        /// Number of best solutions to collect per formulation
        #[arg(short, long, default_value = "1")]
        pool: usize,

        /// Collapse interchangeable facilities before solving
        #[arg(long)]
        merge: bool,

        /// Forward the solver log and print instance statistics
        #[arg(long)]
        verbose: bool,

        /// Time limit of the master solve in seconds (-1 = unlimited)
        #[arg(short, long, default_value = "-1", allow_negative_numbers = true)]
        time_limit: f64,

        /// Solver threads
        #[arg(long)]
        threads: Option<usize>,

        /// Solver backend
        #[arg(long, value_enum, default_value = "microlp")]
        solver: Solver,

        /// Compute bounds on a single thread
        #[arg(long)]
        sequential_bounds: bool,

        /// Export per-formulation rows to CSV
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Save the full report as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum Solver {
    /// Pure Rust simplex / branch and bound
    Microlp,
    /// Gurobi (requires the `gurobi` feature)
    Gurobi,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate { size, square, version, seed, name, folder } => {
            let config = GeneratorConfig { size, square, version, seed, name };
            generate_instance(&config, &folder);
        }
        Commands::ImportQaplib { file, folder } => {
            import_qaplib(&file, &folder);
        }
        Commands::Solve {
            instance,
            models,
            pool,
            merge,
            verbose,
            time_limit,
            threads,
            solver,
            sequential_bounds,
            csv,
            json,
        } => {
            let options = HarnessOptions {
                merge_equivalent: merge,
                limits: SolveLimits {
                    time_limit: if time_limit < 0.0 { None } else { Some(time_limit) },
                    threads,
                    pool_size: pool,
                    verbose,
                },
                bounds: BoundConfig {
                    parallel: !sequential_bounds,
                    show_progress: verbose,
                },
            };
            solve_instance(&instance, &models, solver, options, csv, json);
        }
    }
}

fn fail(context: &str, e: QapError) -> ! {
    eprintln!("{}: {}", context, e);
    std::process::exit(1);
}

fn write_instance(instance: &QapInstance, folder: &Path) {
    if let Err(e) = std::fs::create_dir_all(folder) {
        fail("Failed to create output folder", e.into());
    }
    let path = folder.join(format!("{}.json", instance.name));
    match instance.save(&path) {
        Ok(()) => println!("Instance saved to {:?}", path),
        Err(e) => fail("Failed to save instance", e),
    }
}

fn generate_instance(config: &GeneratorConfig, folder: &Path) {
    let instance = generate(config).unwrap_or_else(|e| fail("Error generating instance", e));
    println!("{}", instance.statistics());
    write_instance(&instance, folder);
}

fn import_qaplib(file: &Path, folder: &Path) {
    println!("Importing QAPLIB file {:?}...", file);
    let instance = load_qaplib(file).unwrap_or_else(|e| fail("Error importing QAPLIB file", e));
    write_instance(&instance, folder);
}

fn solve_instance(
    path: &Path,
    models: &str,
    solver: Solver,
    options: HarnessOptions,
    csv: Option<PathBuf>,
    json: Option<PathBuf>,
) {
    println!("Loading instance from {:?}...", path);
    let instance = QapInstance::from_file(path).unwrap_or_else(|e| fail("Error loading instance", e));
    let variants = Variant::parse_list(models).unwrap_or_else(|e| fail("Invalid --models", e));

    if options.limits.verbose {
        println!("{}", instance.statistics());
    }

    let oracle: Box<dyn SolverOracle> = match solver {
        Solver::Microlp => Box::new(MicrolpOracle::new()),
        Solver::Gurobi => Box::new(GurobiOracle::new(GurobiConfig {
            verbose: options.limits.verbose,
            ..Default::default()
        })),
    };

    println!(
        "Solving with {} formulation(s) on {}...",
        variants.len(),
        oracle.name()
    );
    let start = Instant::now();
    let harness = ComparisonHarness::new(oracle.as_ref(), options);
    let report = harness
        .run(&instance, &variants)
        .unwrap_or_else(|e| fail("Comparison failed", e));

    print_report(&report);
    println!("Total time: {:.4}s", start.elapsed().as_secs_f64());

    if let Some(csv_path) = csv {
        match report.export_to_csv(&csv_path) {
            Ok(()) => println!("Results exported to {:?}", csv_path),
            Err(e) => fail("Failed to export CSV", e),
        }
    }
    if let Some(json_path) = json {
        match report.save_json(&json_path) {
            Ok(()) => println!("Report saved to {:?}", json_path),
            Err(e) => fail("Failed to save report", e),
        }
    }

    if !report.agreement {
        std::process::exit(2);
    }
}

fn print_report(report: &ComparisonReport) {
    println!("\n========== Results ==========");
    println!("Instance: {} ({} facilities, {} locations)", report.instance, report.facilities, report.locations);
    if let Some(classes) = report.reduced_facilities {
        println!("Merged into {} equivalence classes", classes);
    }
    println!("{}", "-".repeat(96));
    println!(
        "{:<12} {:<12} {:>14} {:>14} {:>10} {:>10} {:>6} {:>8}",
        "Model", "Status", "Reported", "Recomputed", "Bound(s)", "Solve(s)", "Pool", "Unique"
    );
    println!("{}", "-".repeat(96));

    let fmt_obj = |o: Option<f64>| o.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string());
    for record in &report.records {
        println!(
            "{:<12} {:<12} {:>14} {:>14} {:>10.3} {:>10.3} {:>6} {:>8}",
            record.variant.to_string(),
            record.status.map(|s| s.to_string()).unwrap_or_else(|| "error".to_string()),
            fmt_obj(record.reported_objective),
            fmt_obj(record.recomputed_objective),
            record.bound_time,
            record.solve_time,
            record.pool_size,
            record.unique_optimum
        );
        if let Some(error) = &record.error {
            println!("  ! {}", error);
        }
    }
    println!("{}", "-".repeat(96));

    print_placements(report);
    println!("Agreement: {}", if report.agreement { "yes" } else { "NO" });
    if !report.assignments_agree {
        println!("Placements differ between models (alternative optima or a wrong model)");
    }
}

/// One row per facility with its location under every model, marked when
/// all models agree.
fn print_placements(report: &ComparisonReport) {
    println!("Solution:");
    for (f, name) in report.facility_ids.iter().enumerate() {
        let mut line = format!("{:<6}: ", name);
        for record in &report.records {
            let at = record
                .placement
                .as_ref()
                .and_then(|p| p.get(f))
                .map(|locations| {
                    locations
                        .iter()
                        .map(|&l| report.location_ids.get(l).map(String::as_str).unwrap_or("?"))
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_else(|| "-".to_string());
            line.push_str(&format!("{:<12} {:>7} | ", record.variant.to_string(), at));
        }
        if report.facility_agreement.get(f).copied().unwrap_or(false) {
            line.push_str("same");
        }
        println!("{}", line);
    }
    println!("{}", "-".repeat(96));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_short_flag() {
        let cli = Cli::try_parse_from(["qap-reform", "solve", "inst.json", "-p", "3", "-m", "zhang"]).unwrap();
        match cli.command {
            Commands::Solve { pool, models, .. } => {
                assert_eq!(pool, 3);
                assert_eq!(models, "zhang");
            }
            _ => panic!("expected the solve command"),
        }
    }
}
