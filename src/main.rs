mod io;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ksatcal::config;
use ksatcal::evaluate::Evaluator;
use ksatcal::objective::ObjectiveScore;
use ksatcal::runfile::RunFile;
use ksatcal::search::{GridSearch, RegulaFalsi, SearchStatus};
use ksatcal::CalibError;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SCHEMA_VERSION: &str = "1.0.0";

#[derive(Parser, Debug)]
#[command(name = "ksatcal")]
#[command(version)]
#[command(about = "Calibrate the openLISEM Ksat factor against an observed hydrograph")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Path to TOML settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// History CSV path (a JSON bundle is written next to it)
    #[arg(short, long, global = true)]
    out: Option<PathBuf>,

    /// openLISEM executable, overrides simulator.executable
    #[arg(long, global = true)]
    simulator: Option<PathBuf>,

    /// Template runfile, overrides simulator.runfile
    #[arg(long, global = true)]
    runfile: Option<PathBuf>,

    /// Observed discharge table, overrides observation.path
    #[arg(long, global = true)]
    observed: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Grid refinement maximizing NSE
    Grid {
        /// Generate JSON result bundle
        #[arg(long)]
        json: bool,
    },
    /// Regula falsi on the percentage bias
    Falsi {
        /// Generate JSON result bundle
        #[arg(long)]
        json: bool,
    },
    /// Run and score a single Ksat value
    Run {
        /// Ksat calibration factor
        #[arg(long)]
        k: f64,
        /// Generate JSON result bundle
        #[arg(long)]
        json: bool,
    },
    /// List the assignments of the template runfile
    Show,
    /// Validate a settings file
    Validate,
    /// Print version information
    Version,
}

// ============================================================================
// JSON Output Structures
// ============================================================================

#[derive(Serialize)]
struct Manifest {
    schema_version: String,
    tool_version: String,
    timestamp_unix: u64,
    platform: String,
    runfile_hash: String,
    settings_snapshot: config::Root,
}

#[derive(Serialize)]
struct ResultBundle<'a, T: Serialize> {
    manifest: Manifest,
    method: &'a str,
    wall_time_ms: f64,
    outcome: &'a T,
}

#[derive(Serialize)]
struct SingleRun {
    k: f64,
    score: ObjectiveScore,
}

// ============================================================================
// Helper Functions
// ============================================================================

fn compute_hash(data: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn create_manifest(cfg: &config::Root, template: &RunFile) -> Manifest {
    Manifest {
        schema_version: SCHEMA_VERSION.to_string(),
        tool_version: VERSION.to_string(),
        timestamp_unix: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
        platform: std::env::consts::OS.to_string(),
        runfile_hash: compute_hash(&template.serialize()),
        settings_snapshot: cfg.clone(),
    }
}

fn write_bundle<T: Serialize>(
    out_path: &Path,
    cfg: &config::Root,
    template: &RunFile,
    method: &str,
    wall_time_ms: f64,
    outcome: &T,
) -> Result<PathBuf> {
    let bundle = ResultBundle {
        manifest: create_manifest(cfg, template),
        method,
        wall_time_ms,
        outcome,
    };
    let json_path = out_path.with_extension("json");
    if let Some(dir) = json_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(&json_path, serde_json::to_string_pretty(&bundle)?)?;
    println!("[ksatcal] JSON bundle: {}", json_path.display());
    Ok(json_path)
}

fn load_settings(args: &Args) -> Result<config::Root> {
    let mut cfg = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings {}", path.display()))?;
            config::Root::from_toml(&text)
                .with_context(|| format!("failed to parse settings {}", path.display()))?
        }
        None => config::Root::default(),
    };
    if let Some(p) = &args.simulator {
        cfg.simulator.executable = Some(p.clone());
    }
    if let Some(p) = &args.runfile {
        cfg.simulator.runfile = Some(p.clone());
    }
    if let Some(p) = &args.observed {
        cfg.observation.path = Some(p.clone());
    }
    cfg.validate()?;
    Ok(cfg)
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();
}

fn status_name(status: SearchStatus) -> &'static str {
    match status {
        SearchStatus::Converged => "converged",
        SearchStatus::Exhausted => "budget exhausted",
    }
}

// ============================================================================
// Commands
// ============================================================================

fn run_grid(cfg: &config::Root, out_path: &Path, json_output: bool) -> Result<()> {
    let evaluator = Evaluator::from_config(cfg)?;
    let search = GridSearch::new(cfg.grid.clone())?;

    println!(
        "[ksatcal] grid refinement: k=[{},{}] steps={} target NSE={} workers={}",
        cfg.grid.min_k, cfg.grid.max_k, cfg.grid.steps, cfg.grid.target_nse, cfg.grid.workers
    );

    let start = Instant::now();
    let outcome = match search.run(|c| evaluator.evaluate(&c.label(), c.k)) {
        Ok(outcome) => outcome,
        Err(CalibError::NoViableCandidate { round, best }) => {
            match best {
                Some((k, nse)) => println!(
                    "[ksatcal] round {} produced no score; best so far k={:.4} NSE={:.4}",
                    round, k, nse
                ),
                None => println!("[ksatcal] round {} produced no score", round),
            }
            bail!("grid refinement stopped: no viable candidate in round {}", round);
        }
        Err(e) => return Err(e.into()),
    };
    let wall_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    let mut w = io::CsvWriter::create(out_path)?;
    w.write_header()?;
    for e in &outcome.history {
        w.write_evaluation("grid", e)?;
    }
    w.flush()?;

    println!(
        "[ksatcal] {} after {} rounds: k_opt={:.4} {}",
        status_name(outcome.status),
        outcome.rounds,
        outcome.best_k,
        outcome.best_score
    );
    println!("[ksatcal] history CSV: {}", out_path.display());

    if json_output {
        write_bundle(out_path, cfg, evaluator.template(), "grid", wall_time_ms, &outcome)?;
    }
    Ok(())
}

fn run_falsi(cfg: &config::Root, out_path: &Path, json_output: bool) -> Result<()> {
    let evaluator = Evaluator::from_config(cfg)?;
    let search = RegulaFalsi::new(cfg.regula_falsi.clone())?;

    println!(
        "[ksatcal] regula falsi: k=[{},{}] eps={} max_iter={}",
        cfg.regula_falsi.min_k, cfg.regula_falsi.max_k, cfg.regula_falsi.epsilon, cfg.regula_falsi.max_iter
    );

    let start = Instant::now();
    let outcome = match search.run(|c| evaluator.bias(&c.label(), c.k)) {
        Ok(outcome) => outcome,
        Err(e @ CalibError::InvalidBracket { .. }) => {
            println!("[ksatcal] {}; widen regula_falsi.min_k/max_k", e);
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };
    let wall_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    let mut w = io::CsvWriter::create(out_path)?;
    w.write_header()?;
    for step in &outcome.history {
        w.write_step(step)?;
    }
    w.flush()?;

    println!(
        "[ksatcal] {} after {} iterations: k_opt={:.4} pBias={:.3}% bracket=[{:.4},{:.4}]",
        status_name(outcome.status),
        outcome.iterations,
        outcome.root,
        outcome.bias,
        outcome.bracket.0,
        outcome.bracket.1
    );
    println!("[ksatcal] history CSV: {}", out_path.display());

    if json_output {
        write_bundle(out_path, cfg, evaluator.template(), "regula_falsi", wall_time_ms, &outcome)?;
    }
    Ok(())
}

fn run_single(cfg: &config::Root, k: f64, out_path: Option<&Path>, json_output: bool) -> Result<()> {
    let evaluator = Evaluator::from_config(cfg)?;

    let start = Instant::now();
    let score = evaluator.evaluate("single", k)?;
    let wall_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    println!("[ksatcal] k={} {}", k, score);

    if json_output {
        let out_path = out_path.unwrap_or_else(|| Path::new("results/single.csv"));
        write_bundle(out_path, cfg, evaluator.template(), "single", wall_time_ms, &SingleRun { k, score })?;
    }
    Ok(())
}

fn show_runfile(cfg: &config::Root) -> Result<()> {
    let path = cfg
        .simulator
        .runfile
        .as_deref()
        .context("--runfile or simulator.runfile required")?;
    let mut runfile = RunFile::load(path, cfg.runfile.format)
        .with_context(|| format!("failed to load runfile {}", path.display()))?;
    for (alias, key) in &cfg.runfile.aliases {
        runfile.add_alias(alias, key);
    }

    println!("[ksatcal] {} ({} assignments)", path.display(), runfile.len());
    for (key, value) in runfile.items() {
        println!("  {} = {}", key, value);
    }
    if let Ok(k) = runfile.ksat() {
        println!("[ksatcal] current Ksat calibration: {}", k);
    }
    Ok(())
}

fn validate_config(cfg: &config::Root, path: &Path) {
    println!("[ksatcal] settings valid: {}", path.display());
    println!("  project: {}", cfg.project.name);
    println!(
        "  simulator: executable={:?} runfile={:?} headless={} timeout={:?}s keep_results={}",
        cfg.simulator.executable,
        cfg.simulator.runfile,
        cfg.simulator.process.headless,
        cfg.simulator.process.timeout_secs,
        cfg.simulator.keep_results
    );
    println!(
        "  output: {} time col={} discharge col={} skip={}",
        cfg.output.file_name, cfg.output.time_column, cfg.output.discharge_column, cfg.output.skip_rows
    );
    println!("  observation: {:?}", cfg.observation.path);
    println!(
        "  grid: k=[{},{}]x{} target NSE={} rounds={} workers={}",
        cfg.grid.min_k, cfg.grid.max_k, cfg.grid.steps, cfg.grid.target_nse, cfg.grid.max_rounds, cfg.grid.workers
    );
    println!(
        "  regula_falsi: k=[{},{}] eps={} max_iter={}",
        cfg.regula_falsi.min_k, cfg.regula_falsi.max_k, cfg.regula_falsi.epsilon, cfg.regula_falsi.max_iter
    );
}

fn print_version() {
    println!("ksatcal - openLISEM Ksat calibration driver");
    println!();
    println!("  Version:           {}", VERSION);
    println!("  Schema Version:    {}", SCHEMA_VERSION);
    println!("  Platform:          {}", std::env::consts::OS);
    println!("  Architecture:      {}", std::env::consts::ARCH);
    println!();
    println!("Search methods:");
    println!("  - grid:  coarse-to-fine refinement maximizing NSE");
    println!("  - falsi: regula falsi root of the percentage bias");
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    if let Commands::Version = args.command {
        print_version();
        return Ok(());
    }

    init_logging();
    let cfg = load_settings(&args)?;

    match args.command {
        Commands::Grid { json } => {
            let out_path = args.out.unwrap_or_else(|| PathBuf::from("results/grid_history.csv"));
            run_grid(&cfg, &out_path, json)
        }
        Commands::Falsi { json } => {
            let out_path = args.out.unwrap_or_else(|| PathBuf::from("results/falsi_history.csv"));
            run_falsi(&cfg, &out_path, json)
        }
        Commands::Run { k, json } => run_single(&cfg, k, args.out.as_deref(), json),
        Commands::Show => show_runfile(&cfg),
        Commands::Validate => {
            let path = args.config.as_deref().context("--config required for validate")?;
            validate_config(&cfg, path);
            Ok(())
        }
        Commands::Version => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksatcal::search::regula_falsi::FalsiStep;
    use ksatcal::search::{Candidate, Evaluation};

    const SETTINGS: &str = r#"
[simulator]
executable = "/opt/lisem/Lisem"
runfile = "run/run1.run"

[observation]
path = "obs/observation.csv"
"#;

    fn write_settings(dir: &Path) -> PathBuf {
        let path = dir.join("ksatcal.toml");
        fs::write(&path, SETTINGS).unwrap();
        path
    }

    #[test]
    fn settings_file_values_are_used_without_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(dir.path());
        let args = Args::try_parse_from(["ksatcal", "--config", path.to_str().unwrap(), "show"]).unwrap();

        let cfg = load_settings(&args).unwrap();
        assert_eq!(cfg.simulator.executable, Some(PathBuf::from("/opt/lisem/Lisem")));
        assert_eq!(cfg.simulator.runfile, Some(PathBuf::from("run/run1.run")));
        assert_eq!(cfg.observation.path, Some(PathBuf::from("obs/observation.csv")));
    }

    #[test]
    fn path_flags_override_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(dir.path());
        let args = Args::try_parse_from([
            "ksatcal",
            "grid",
            "--config",
            path.to_str().unwrap(),
            "--simulator",
            "/usr/local/bin/lisem",
            "--runfile",
            "alt/run2.run",
            "--observed",
            "alt/obs.csv",
        ])
        .unwrap();

        let cfg = load_settings(&args).unwrap();
        assert_eq!(cfg.simulator.executable, Some(PathBuf::from("/usr/local/bin/lisem")));
        assert_eq!(cfg.simulator.runfile, Some(PathBuf::from("alt/run2.run")));
        assert_eq!(cfg.observation.path, Some(PathBuf::from("alt/obs.csv")));
    }

    #[test]
    fn history_csv_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("history.csv");

        let ok = Evaluation::scored(
            Candidate { round: 0, index: 1, k: 5.0 },
            ObjectiveScore { nse: 0.95, pbias: -2.5 },
        );
        let failed = Evaluation::failed(
            Candidate { round: 0, index: 2, k: 10.0 },
            &CalibError::SimulationFailed {
                name: "ksat_r00_c02".to_string(),
                reason: "exited, code 2".to_string(),
            },
        );
        let step = FalsiStep {
            candidate: Candidate { round: 1, index: 0, k: 7.25 },
            bias: 0.125,
        };

        let mut w = io::CsvWriter::create(&path).unwrap();
        w.write_header().unwrap();
        w.write_evaluation("grid", &ok).unwrap();
        w.write_evaluation("grid", &failed).unwrap();
        w.write_step(&step).unwrap();
        w.flush().unwrap();
        drop(w);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["method", "round", "index", "k", "nse", "pbias", "error"]
        );

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);

        assert_eq!(&rows[0][0], "grid");
        assert_eq!(rows[0][3].parse::<f64>().unwrap(), 5.0);
        assert_eq!(rows[0][4].parse::<f64>().unwrap(), 0.95);
        assert_eq!(&rows[0][6], "");

        assert_eq!(&rows[1][4], "");
        assert_eq!(&rows[1][6], "simulation 'ksat_r00_c02' failed: exited, code 2");

        assert_eq!(&rows[2][0], "regula_falsi");
        assert_eq!(&rows[2][1], "1");
        assert_eq!(rows[2][5].parse::<f64>().unwrap(), 0.125);
    }

    #[test]
    fn bundle_carries_manifest_and_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config::Root::from_toml(SETTINGS).unwrap();
        let template = RunFile::parse("Ksat calibration=1.0\nResult Directory=res/\n", Default::default());
        let outcome = SingleRun {
            k: 5.0,
            score: ObjectiveScore { nse: 1.0, pbias: 0.0 },
        };

        let json_path =
            write_bundle(&dir.path().join("single.csv"), &cfg, &template, "single", 12.5, &outcome).unwrap();
        assert_eq!(json_path, dir.path().join("single.json"));

        let v: serde_json::Value = serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(v["method"], "single");
        assert_eq!(v["outcome"]["k"], 5.0);
        assert_eq!(v["outcome"]["score"]["nse"], 1.0);
        assert_eq!(v["manifest"]["schema_version"], SCHEMA_VERSION);
        assert_eq!(v["manifest"]["runfile_hash"], compute_hash(&template.serialize()));
        assert_eq!(v["manifest"]["settings_snapshot"]["simulator"]["executable"], "/opt/lisem/Lisem");
    }
}
