//! F1 Predict CLI - Command-line interface for race simulations

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use f1predict::config::{parse_circuit_encoding, PipelineConfig};
use f1predict::data::{ArchiveRow, ArchiveSpec, HistoricalArchive, HistoricalLedger};
use f1predict::predictor::{PodiumClassifier, UnifiedPredictor};
use f1predict::simulation::{
    error_class_counts, ErrorClass, HistoryScope, RaceSimulator, SeasonReport, SimulationOutcome,
};
use f1predict::source::{
    ArchiveSource, CachedSource, DirCache, ErgastClient, RawRecordSource, WithWeather,
};
use f1predict::{Classification, Classifier, FeatureVector, Predictor};

/// Last round considered by a backtest when none is given
const DEFAULT_LAST_ROUND: u32 = 24;

#[derive(Parser)]
#[command(name = "f1predict")]
#[command(author, version, about = "Formula 1 race simulation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Run in interactive mode
    #[arg(short, long)]
    interactive: bool,

    /// Configuration file (TOML)
    #[arg(short, long, env = "F1_CONFIG")]
    config: Option<PathBuf>,

    /// Historical archive CSV, optionally with a season: PATH or PATH@SEASON (repeatable)
    #[arg(long = "archive", value_parser = parse_archive_arg)]
    archives: Vec<ArchiveSpec>,

    /// Finishing-position model (.json or .onnx)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Serve races from the archives instead of the live provider
    #[arg(long)]
    offline: bool,

    /// Build features without weather columns
    #[arg(long)]
    no_weather: bool,

    /// Circuit encoding: round or categorical
    #[arg(long)]
    encoding: Option<String>,

    /// Compute form from the race's own season only
    #[arg(long)]
    same_season: bool,

    /// Print JSON instead of tables
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate one race and compare with the actual result
    Simulate {
        #[arg(short, long)]
        season: i32,

        #[arg(short, long)]
        round: u32,
    },

    /// Simulate a range of rounds and report aggregate accuracy
    Backtest {
        #[arg(short, long)]
        season: i32,

        /// First round
        #[arg(long, default_value = "1")]
        from: u32,

        /// Last round (unpublished rounds are skipped)
        #[arg(long, default_value_t = DEFAULT_LAST_ROUND)]
        to: u32,
    },

    /// Show the feature vectors built for a race
    Features {
        #[arg(short, long)]
        season: i32,

        #[arg(short, long)]
        round: u32,
    },

    /// Podium probability per driver
    Podium {
        #[arg(short, long)]
        season: i32,

        #[arg(short, long)]
        round: u32,

        /// Only this driver
        #[arg(short, long)]
        driver: Option<String>,

        /// Podium classifier (.json)
        #[arg(long)]
        classifier: Option<PathBuf>,
    },

    /// List circuits known to the archives with their categorical codes
    Circuits,
}

/// PATH or PATH@SEASON
fn parse_archive_arg(value: &str) -> Result<ArchiveSpec, String> {
    match value.rsplit_once('@') {
        Some((path, season)) => {
            let season: i32 = season
                .parse()
                .map_err(|_| format!("invalid season in '{}'", value))?;
            Ok(ArchiveSpec::new(path).with_season(season))
        }
        None => Ok(ArchiveSpec::new(value)),
    }
}

/// Everything a command needs, loaded once
struct Pipeline {
    config: PipelineConfig,
    ledger: HistoricalLedger,
    source: Box<dyn RawRecordSource>,
    simulator: RaceSimulator,
    json: bool,
}

impl Pipeline {
    fn load(cli: &Cli) -> Result<Self> {
        let mut config = PipelineConfig::load(cli.config.as_deref())
            .context("Failed to load configuration")?;

        // CLI flags win over file and environment
        config.archives.extend(cli.archives.iter().cloned());
        if let Some(model) = &cli.model {
            config.model.path = Some(model.clone());
        }
        if cli.no_weather {
            config.features.include_weather = false;
        }
        if let Some(encoding) = &cli.encoding {
            config.features.circuit_encoding = parse_circuit_encoding(encoding)?;
        }
        if cli.same_season {
            config.features.history_scope = HistoryScope::SameSeason;
        }

        let rows = load_archives(&config.archives)?;
        let ledger = HistoricalLedger::from_records(rows.iter().map(|r| r.record.clone()));
        info!(
            "Historical ledger: {} records over seasons {:?}",
            ledger.len(),
            ledger.seasons()
        );
        let archive_source = ArchiveSource::from_rows(rows);
        info!("Archive source: {} races", archive_source.races().count());

        let source: Box<dyn RawRecordSource> = if cli.offline {
            Box::new(archive_source)
        } else {
            let client = ErgastClient::new(config.provider.clone())?;
            let live: Box<dyn RawRecordSource> = match &config.cache_dir {
                Some(dir) => {
                    let cache = DirCache::new(dir);
                    info!("Caching provider responses in {:?}", cache.cache_dir());
                    Box::new(CachedSource::new(client, Box::new(cache)))
                }
                None => Box::new(client),
            };
            // The results API has no weather; archives may
            Box::new(WithWeather::new(live, archive_source))
        };

        let simulator = RaceSimulator::new(config.features.simulation_config());

        Ok(Self {
            config,
            ledger,
            source,
            simulator,
            json: cli.json,
        })
    }

    fn predictor(&self) -> UnifiedPredictor {
        UnifiedPredictor::load_or_fallback(self.config.model.path.as_deref())
    }
}

fn load_archives(specs: &[ArchiveSpec]) -> Result<Vec<ArchiveRow>> {
    let mut rows = Vec::new();
    for spec in specs {
        let archive = HistoricalArchive::load(spec)
            .with_context(|| format!("Failed to load archive {:?}", spec.path))?;
        info!("Loaded {} records from {}", archive.len(), archive.source());
        rows.extend(archive.into_rows());
    }
    Ok(rows)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON on stdout stays clean
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    if !cli.json {
        println!("{}", format!("F1 Predict v{}", env!("CARGO_PKG_VERSION")).cyan().bold());
        println!();
    }

    if cli.interactive {
        let pipeline = Pipeline::load(&cli)?;
        run_interactive(&pipeline)?;
    } else if let Some(command) = &cli.command {
        let pipeline = Pipeline::load(&cli)?;
        match command {
            Commands::Simulate { season, round } => run_simulate(&pipeline, *season, *round)?,
            Commands::Backtest { season, from, to } => {
                run_backtest(&pipeline, *season, *from, *to)?
            }
            Commands::Features { season, round } => run_features(&pipeline, *season, *round)?,
            Commands::Podium {
                season,
                round,
                driver,
                classifier,
            } => run_podium(
                &pipeline,
                *season,
                *round,
                driver.as_deref(),
                classifier.clone(),
            )?,
            Commands::Circuits => run_circuits(&pipeline)?,
        }
    } else {
        println!("Use --help for usage information or --interactive for interactive mode.");
    }

    Ok(())
}

fn spinner(message: String) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(pb)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

fn run_simulate(pipeline: &Pipeline, season: i32, round: u32) -> Result<()> {
    let predictor = pipeline.predictor();

    let pb = spinner(format!("Simulating {} round {}...", season, round))?;
    let outcome = pipeline
        .simulator
        .run(&pipeline.source, &pipeline.ledger, &predictor, season, round);
    pb.finish_and_clear();

    let outcome =
        outcome.with_context(|| format!("Simulation of {} round {} failed", season, round))?;

    if pipeline.json {
        return print_json(&outcome);
    }
    print_outcome(&outcome, predictor.name());
    Ok(())
}

fn class_label(class: ErrorClass) -> colored::ColoredString {
    match class {
        ErrorClass::Accurate => class.label().green(),
        ErrorClass::Close => class.label().yellow(),
        ErrorClass::Off => class.label().red(),
    }
}

fn print_outcome(outcome: &SimulationOutcome, predictor: &str) {
    println!(
        "{}: {} {} / {} ({})",
        "Simulated".green(),
        outcome.season,
        outcome.race_name,
        outcome.circuit,
        outcome.date
    );
    println!("Predictor: {}", predictor);
    println!();

    println!(
        "{:>4} {:<24} {:<16} {:>4} {:>8} {:>6} {:>5} {:<8}",
        "Pos", "Driver", "Team", "Grid", "Pred", "Actual", "Err", "Class"
    );
    println!("{}", "-".repeat(84));

    for r in &outcome.results {
        let actual = r
            .actual_position
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let error = r
            .error
            .map(|e| format!("{:+}", e))
            .unwrap_or_else(|| "-".to_string());
        let class = r
            .error
            .map(|e| class_label(ErrorClass::from_error(e)).to_string())
            .unwrap_or_default();

        println!(
            "{:>4} {:<24} {:<16} {:>4} {:>8.2} {:>6} {:>5} {:<8}",
            r.simulated_finish,
            truncate_name(&r.driver, 24),
            truncate_name(r.constructor.as_deref().unwrap_or("-"), 16),
            r.grid,
            r.predicted_position,
            actual,
            error,
            class
        );
    }

    if let Some(m) = &outcome.metrics {
        println!("{}", "-".repeat(84));
        println!(
            "MAE: {:.2}  RMSE: {:.2}  Exact: {}/{}  ±1: {:.1}%  ±3: {:.1}%",
            m.mae,
            m.rmse,
            m.exact,
            m.scored,
            m.within_1_rate() * 100.0,
            m.within_3_rate() * 100.0
        );
        println!(
            "Winner: {}  Podium overlap: {}/3  Spearman: {}",
            if m.winner_correct {
                "correct".green()
            } else {
                "missed".red()
            },
            m.podium_overlap,
            m.spearman
                .map(|s| format!("{:.3}", s))
                .unwrap_or_else(|| "-".to_string())
        );

        let counts = error_class_counts(&outcome.results);
        let summary: Vec<String> = counts
            .iter()
            .map(|(class, n)| format!("{} {}", class_label(*class), n))
            .collect();
        println!("{}", summary.join("  "));
    } else {
        println!();
        println!("{}", "No actual results yet.".dimmed());
    }
}

fn run_backtest(pipeline: &Pipeline, season: i32, from: u32, to: u32) -> Result<()> {
    if to < from {
        bail!("--to ({}) must not be before --from ({})", to, from);
    }
    let predictor = pipeline.predictor();

    let pb = ProgressBar::new((to - from + 1) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message(format!("Backtesting {}", season));

    let report = pipeline.simulator.backtest_with_progress(
        &pipeline.source,
        &pipeline.ledger,
        &predictor,
        season,
        from..=to,
        |round| {
            pb.set_message(format!("round {}", round));
            pb.inc(1);
        },
    );
    pb.finish_and_clear();

    let report = report.with_context(|| format!("Backtest of {} failed", season))?;

    if pipeline.json {
        return print_json(&report);
    }
    print_report(&report, predictor.name());
    Ok(())
}

fn print_report(report: &SeasonReport, predictor: &str) {
    println!("\n{}", "=".repeat(70));
    println!("BACKTEST RESULTS {}", report.season);
    println!("{}", "=".repeat(70));
    println!("Predictor: {}", predictor);
    println!(
        "{:>5} {:<32} {:>6} {:>6} {:>6} {:>7} {:>8}",
        "Round", "Race", "MAE", "±1", "±3", "Winner", "Podium"
    );
    println!("{}", "-".repeat(70));

    for outcome in &report.outcomes {
        match &outcome.metrics {
            Some(m) => println!(
                "{:>5} {:<32} {:>6.2} {:>5.0}% {:>5.0}% {:>7} {:>6}/3",
                outcome.round,
                truncate_name(&outcome.race_name, 32),
                m.mae,
                m.within_1_rate() * 100.0,
                m.within_3_rate() * 100.0,
                if m.winner_correct { "yes" } else { "no" },
                m.podium_overlap
            ),
            None => println!(
                "{:>5} {:<32} {}",
                outcome.round,
                truncate_name(&outcome.race_name, 32),
                "no results".dimmed()
            ),
        }
    }

    if !report.skipped.is_empty() {
        println!("{}", "-".repeat(70));
        let rounds: Vec<String> = report.skipped.iter().map(|s| s.round.to_string()).collect();
        println!("{} {}", "Skipped rounds:".dimmed(), rounds.join(", "));
    }

    let m = &report.metrics;
    println!("{}", "-".repeat(70));
    println!("Races scored: {} ({} drivers)", m.races, m.drivers);
    println!("MAE: {:.2}  RMSE: {:.2}", m.mae, m.rmse);
    println!(
        "Exact: {:.1}%  ±1: {:.1}%  ±3: {:.1}%",
        m.exact_rate * 100.0,
        m.within_1_rate * 100.0,
        m.within_3_rate * 100.0
    );
    println!(
        "Winners: {}/{} ({:.1}%)  Avg podium overlap: {:.2}",
        m.winners_correct,
        m.races,
        m.winner_rate() * 100.0,
        m.avg_podium_overlap
    );
    if let Some(s) = m.avg_spearman {
        println!("Avg Spearman: {:.3}", s);
    }
    println!("{}", "=".repeat(70));
}

fn run_features(pipeline: &Pipeline, season: i32, round: u32) -> Result<()> {
    let features = pipeline
        .simulator
        .features_for(&pipeline.source, &pipeline.ledger, season, round)
        .with_context(|| format!("Failed to build features for {} round {}", season, round))?;

    if pipeline.json {
        return print_json(&features);
    }

    let names = pipeline.simulator.config.features.feature_names();
    println!("{}", format!("Features: {} round {}", season, round).yellow().bold());
    print!("{:<24}", "Driver");
    for name in &names {
        print!(" {:>16}", name);
    }
    println!();
    println!("{}", "-".repeat(24 + 17 * names.len()));

    for f in &features {
        print!("{:<24}", truncate_name(&f.driver, 24));
        for name in &names {
            match f.value(name) {
                Some(v) => print!(" {:>16.3}", v),
                None => print!(" {:>16}", "-"),
            }
        }
        println!();
    }
    Ok(())
}

fn run_podium(
    pipeline: &Pipeline,
    season: i32,
    round: u32,
    driver: Option<&str>,
    classifier_path: Option<PathBuf>,
) -> Result<()> {
    let path = classifier_path.or_else(|| pipeline.config.model.podium_path.clone());
    let classifier = PodiumClassifier::load_or_fallback(path.as_deref());

    let features = pipeline
        .simulator
        .for_model(classifier.uses_weather())
        .features_for(&pipeline.source, &pipeline.ledger, season, round)
        .with_context(|| format!("Failed to build features for {} round {}", season, round))?;

    let selected: Vec<&FeatureVector> = features
        .iter()
        .filter(|f| driver.map_or(true, |d| f.driver.eq_ignore_ascii_case(d)))
        .collect();
    if selected.is_empty() {
        bail!("Driver {:?} not found in {} round {}", driver.unwrap_or(""), season, round);
    }

    let mut predictions: Vec<(&FeatureVector, Classification)> = selected
        .into_iter()
        .map(|f| {
            pipeline
                .simulator
                .predict_single(f, &classifier)
                .map(|c| (f, c))
        })
        .collect::<Result<_, _>>()?;
    predictions.sort_by(|a, b| b.1.probability.total_cmp(&a.1.probability));

    if pipeline.json {
        let rows: Vec<serde_json::Value> = predictions
            .iter()
            .map(|(f, c)| {
                serde_json::json!({
                    "driver": f.driver,
                    "podium": c.label,
                    "probability": c.probability,
                })
            })
            .collect();
        return print_json(&rows);
    }

    println!("{}", format!("Podium: {} round {}", season, round).yellow().bold());
    println!("{:<24} {:>6} {:>10}", "Driver", "Podium", "Prob");
    println!("{}", "-".repeat(42));
    for (f, c) in &predictions {
        let label = if c.label { "yes".green() } else { "no".normal() };
        println!(
            "{:<24} {:>6} {:>9.1}%",
            truncate_name(&f.driver, 24),
            label,
            c.probability * 100.0
        );
    }
    Ok(())
}

fn run_circuits(pipeline: &Pipeline) -> Result<()> {
    let circuits = pipeline.ledger.circuits();
    if pipeline.json {
        return print_json(&circuits);
    }
    if circuits.is_empty() {
        println!("{}", "No archives loaded. Use --archive or a config file.".red());
        return Ok(());
    }
    println!("{:>4} {}", "Code", "Circuit");
    println!("{}", "-".repeat(40));
    for (code, circuit) in circuits.iter().enumerate() {
        println!("{:>4} {}", code, circuit);
    }
    Ok(())
}

fn run_interactive(pipeline: &Pipeline) -> Result<()> {
    println!("{}", "Interactive mode".green().bold());
    println!();

    let theme = ColorfulTheme::default();

    loop {
        let options = vec!["Simulate a race", "Backtest a season", "Podium odds", "Quit"];

        let selection = Select::with_theme(&theme)
            .with_prompt("What would you like to do?")
            .items(&options)
            .default(0)
            .interact()?;

        match selection {
            0 | 2 => {
                let season: i32 = Input::with_theme(&theme)
                    .with_prompt("Season")
                    .interact_text()?;
                let round: u32 = Input::with_theme(&theme)
                    .with_prompt("Round")
                    .interact_text()?;

                println!();
                let result = if selection == 0 {
                    run_simulate(pipeline, season, round)
                } else {
                    run_podium(pipeline, season, round, None, None)
                };
                // Keep the session alive on a bad round
                if let Err(e) = result {
                    println!("{} {:#}", "Error:".red(), e);
                }
                println!();
            }
            1 => {
                let season: i32 = Input::with_theme(&theme)
                    .with_prompt("Season")
                    .interact_text()?;
                let to: u32 = Input::with_theme(&theme)
                    .with_prompt("Last round")
                    .default(DEFAULT_LAST_ROUND)
                    .interact_text()?;

                println!();
                if let Err(e) = run_backtest(pipeline, season, 1, to) {
                    println!("{} {:#}", "Error:".red(), e);
                }
                println!();
            }
            3 => {
                println!("Goodbye!");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}

/// Truncate name to fit in column
fn truncate_name(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        name.to_string()
    } else {
        name.chars().take(max_len - 1).collect::<String>() + "…"
    }
}
