use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use hcscore::data::population::ExemplarSet;
use hcsdf::data::config::EngineConfig;
use hcsdf::data::store::WellCoordinate;
use hcsdf::engine::Engine;
use log::info;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "hcsdf")]
#[command(about = "Population classification and aggregation over a high-content-screening dataset.", long_about = None)]
struct Cli {
    /// Dataset directory holding config.json, columns/ and optionally wells.tab.
    #[arg(short = 'd', long = "dataset", value_name = "DIR")]
    dataset: PathBuf,

    /// Engine configuration as JSON, defaults apply to missing fields.
    #[arg(long = "engine-config", value_name = "FILE")]
    engine_config: Option<PathBuf>,

    /// Worker threads, 0 uses every core.
    #[arg(short = 't', long = "threads", value_name = "N")]
    threads: Option<usize>,

    /// Increase logging, -v for info and -vv for debug.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Selection {
    /// Features the classifier uses, as a JSON list. Empty means all.
    #[arg(short = 'f', long = "features", value_name = "JSON", default_value = "[]")]
    features: String,

    /// Exemplars as a JSON object of population id to object ids, e.g. {"0":[1,2],"1":[50]}.
    #[arg(short = 'e', long = "exemplars", value_name = "JSON", default_value = "{}")]
    exemplars: String,
}

impl Selection {
    fn parse(&self) -> Result<(Vec<String>, ExemplarSet), serde_json::Error> {
        Ok((serde_json::from_str(&self.features)?, serde_json::from_str(&self.exemplars)?))
    }
}

#[derive(Subcommand)]
enum Command {
    /// Label tables, object count and feature list.
    Info,
    /// Features ordered by correlation structure.
    Order,
    /// Objects grouped by assigned population.
    Classify(Selection),
    /// Per population histograms of every feature.
    Histograms {
        #[command(flatten)]
        selection: Selection,
        #[arg(short = 'b', long = "bins", value_name = "N")]
        bins: Option<usize>,
    },
    /// Per population contour maps of every selected feature pair.
    Contours {
        #[command(flatten)]
        selection: Selection,
        #[arg(short = 'b', long = "bins", value_name = "N")]
        bins: Option<usize>,
    },
    /// Population shares per well.
    Wells(Selection),
    /// Objects of a well plus all exemplars.
    Objects {
        #[command(flatten)]
        selection: Selection,
        /// Well as plate_column_row.
        #[arg(short = 'w', long = "well", value_name = "WELL")]
        well: Option<String>,
    },
    /// Like objects, with the scaled value of every feature.
    Values {
        #[command(flatten)]
        selection: Selection,
        #[arg(short = 'w', long = "well", value_name = "WELL")]
        well: Option<String>,
    },
}

fn print<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_well(well: &Option<String>) -> Result<Option<WellCoordinate>, Box<dyn Error>> {
    Ok(match well {
        Some(well) => Some(well.parse::<WellCoordinate>()?),
        None => None,
    })
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    let mut config = match &cli.engine_config {
        Some(path) => serde_json::from_reader(BufReader::new(File::open(path)?))?,
        None => EngineConfig::default(),
    };
    if let Some(threads) = cli.threads {
        config.num_threads = threads;
    }

    let id = cli
        .dataset
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("dataset")
        .to_string();

    let mut engine = Engine::new(config)?;
    engine.open_dataset(&id, &cli.dataset)?;
    info!("Running on dataset {}", id);

    match &cli.command {
        Command::Info => print(&engine.dataset_info(&id)?),
        Command::Order => print(&*engine.feature_ordering(&id)?),
        Command::Classify(selection) => {
            let (features, exemplars) = selection.parse()?;
            print(&engine.population_table(&id, &features, &exemplars)?)
        }
        Command::Histograms { selection, bins } => {
            let (features, exemplars) = selection.parse()?;
            print(&*engine.feature_histograms(&id, &features, &exemplars, *bins)?)
        }
        Command::Contours { selection, bins } => {
            let (features, exemplars) = selection.parse()?;
            print(&*engine.contour_matrix(&id, &features, &exemplars, *bins)?)
        }
        Command::Wells(selection) => {
            let (features, exemplars) = selection.parse()?;
            print(&*engine.well_cluster_shares(&id, &features, &exemplars)?)
        }
        Command::Objects { selection, well } => {
            let (features, exemplars) = selection.parse()?;
            let well = parse_well(well)?;
            print(&engine.object_info(&id, &features, &exemplars, well.as_ref())?)
        }
        Command::Values { selection, well } => {
            let (features, exemplars) = selection.parse()?;
            let well = parse_well(well)?;
            print(&engine.object_feature_values(&id, &features, &exemplars, well.as_ref())?)
        }
    }
}
