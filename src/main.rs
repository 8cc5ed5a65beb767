#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use crimecrf::admm::AdmmConfig;
use crimecrf::evaluate::{EvaluationConfig, LeaveOneOutReport, evaluate_leave_one_out};
use crimecrf::model::{CrfModel, Estimator};
use crimecrf::pairwise::{build_joint_design, build_pairwise_design};
use crimecrf::progress::{EvaluationStage, FoldProgressObserver};
use crimecrf::shared::files::{export_pairwise, load_dataset_dir};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

#[derive(Parser)]
#[command(
    name = "crimecrf",
    version,
    about = "L1 conditional random field model for regional crime rates",
    long_about = "Fits a two-clique L1 model on unit features and pairwise relations \
                 (distance and flow), and evaluates it with leave-one-out validation."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit unit and pairwise coefficients on the full dataset
    #[command(about = "Fit the model on all units (outputs: crf_model.toml)")]
    Fit(FitArgs),

    /// Hold out every unit once and report prediction errors
    #[command(about = "Run leave-one-out evaluation")]
    Evaluate(EvaluateArgs),

    /// Write the pairwise design matrices for external optimisers
    #[command(about = "Export pairwise matrices (outputs: F.csv, Yp.csv)")]
    Export(ExportArgs),
}

#[derive(Args)]
struct SolverArgs {
    /// Maximum number of ADMM iterations per regression
    #[arg(long, value_name = "N")]
    max_iterations: Option<usize>,

    /// Stopping threshold on the summed absolute primal residual
    #[arg(long, value_name = "T")]
    tolerance: Option<f64>,

    /// ADMM penalty parameter
    #[arg(long, value_name = "R")]
    rho: Option<f64>,
}

impl SolverArgs {
    fn apply(&self, config: &mut AdmmConfig) {
        if let Some(max_iterations) = self.max_iterations {
            config.max_iterations = max_iterations;
        }
        if let Some(tolerance) = self.tolerance {
            config.tolerance = tolerance;
        }
        if let Some(rho) = self.rho {
            config.rho = rho;
        }
    }
}

#[derive(Args)]
struct FitArgs {
    /// Directory holding X.csv, Y.csv, F_dist.csv and F_flow.csv
    #[arg(value_name = "DATA_DIR")]
    data_dir: PathBuf,

    /// Where to write the fitted model
    #[arg(long, default_value = "crf_model.toml")]
    output: PathBuf,

    #[command(flatten)]
    solver: SolverArgs,
}

#[derive(Args)]
struct EvaluateArgs {
    /// Directory holding X.csv, Y.csv, F_dist.csv and F_flow.csv
    #[arg(value_name = "DATA_DIR")]
    data_dir: PathBuf,

    /// TOML evaluation settings; command-line flags take precedence
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(flatten)]
    solver: SolverArgs,

    /// Run folds one after another instead of on the thread pool
    #[arg(long)]
    sequential: bool,

    /// Write the per-fold report as TOML
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

#[derive(Args)]
struct ExportArgs {
    /// Directory holding X.csv, Y.csv, F_dist.csv and F_flow.csv
    #[arg(value_name = "DATA_DIR")]
    data_dir: PathBuf,

    /// Output directory; defaults to DATA_DIR
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Also write the joint design F_joint.csv
    #[arg(long)]
    joint: bool,
}

/// Renders fold completion on stderr when it is a terminal.
struct FoldProgressBar {
    bar: ProgressBar,
}

impl FoldProgressBar {
    fn new() -> Self {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(0), draw_target);
        let style = ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .map(|style| style.progress_chars("█▉▊▋▌▍▎▏  "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar }
    }
}

impl FoldProgressObserver for FoldProgressBar {
    fn on_stage_start(&self, stage: EvaluationStage, total: usize) {
        if stage == EvaluationStage::Folds {
            self.bar.set_length(total as u64);
            self.bar.set_position(0);
            self.bar.set_message(stage.to_string());
        }
    }

    fn on_fold_finished(&self, unit: usize, succeeded: bool) {
        if !succeeded {
            self.bar.println(format!("> Fold for unit {unit} failed"));
        }
        self.bar.inc(1);
    }

    fn on_stage_finish(&self, stage: EvaluationStage) {
        if stage == EvaluationStage::Folds {
            self.bar.finish_and_clear();
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Fit(args)) => run_fit(args),
        Some(Commands::Evaluate(args)) => run_evaluate(args),
        Some(Commands::Export(args)) => run_export(args),
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AdmmConfig::default();
    args.solver.apply(&mut config);
    config.validate()?;

    println!("Loading dataset from: {}", args.data_dir.display());
    let dataset = load_dataset_dir(&args.data_dir)?;
    println!(
        "Loaded {} units with {} features",
        dataset.num_units(),
        dataset.num_features()
    );

    let model = CrfModel::fit(&dataset, &config)?;
    println!("alpha = {}", model.alpha);
    println!("w     = {}", model.w);
    println!(
        "ADMM iterations: unit {}, pairwise {}",
        model.diagnostics.unit_iterations, model.diagnostics.pairwise_iterations
    );

    model.save(&args.output)?;
    println!("Model saved to: {}", args.output.display());
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => EvaluationConfig::load(path)?,
        None => EvaluationConfig::default(),
    };
    args.solver.apply(&mut config.admm);
    if args.sequential {
        config.parallel = false;
    }

    let dataset = load_dataset_dir(&args.data_dir)?;
    println!(
        "Evaluating {} units ({} features) with leave-one-out",
        dataset.num_units(),
        dataset.num_features()
    );

    let start = Instant::now();
    let progress = FoldProgressBar::new();
    let report = evaluate_leave_one_out(&dataset, &config, &progress)?;
    print_report(&report);
    println!("Finished in {:.2?}", start.elapsed());

    if let Some(path) = &args.report {
        report.save(path)?;
        println!("Report saved to: {}", path.display());
    }
    Ok(())
}

fn print_report(report: &LeaveOneOutReport) {
    let failed = report.failed_units();
    if !failed.is_empty() {
        println!(
            "{} of {} folds failed (units {:?}); summaries cover the rest",
            failed.len(),
            report.units,
            failed
        );
    }
    for estimator in Estimator::ALL {
        if let Some(summary) = report.summary(estimator) {
            println!(
                "Use {} mae {:.6} std {:.6} mre {:.6}",
                estimator.describe(),
                summary.mean_absolute_error,
                summary.std_absolute_error,
                summary.mean_relative_error
            );
        }
    }
}

fn run_export(args: ExportArgs) -> Result<(), Box<dyn std::error::Error>> {
    let dataset = load_dataset_dir(&args.data_dir)?;
    let design = build_pairwise_design(&dataset);
    let joint = args.joint.then(|| build_joint_design(&dataset));

    let output_dir = args.output_dir.as_ref().unwrap_or(&args.data_dir);
    let written = export_pairwise(output_dir, &design, joint.as_ref().map(|j| j.view()))?;
    for path in written {
        println!("Wrote {}", path.display());
    }
    Ok(())
}
