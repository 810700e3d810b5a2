use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use rs_phylosens::method::sensitivity::Sensitivity;
use rs_phylosens::model::dataset::Dataset;
use rs_phylosens::model::fit::{EvolutionModel, ModelOptions};
use rs_phylosens::model::formula::{ModelSpec, Transform, Variable};
use rs_phylosens::model::params::{
    Distribution, Params, Plan, DEFAULT_ALPHA, DEFAULT_BREAKS, DEFAULT_CLADE_MIN_SIZE, DEFAULT_CUTOFF,
    DEFAULT_NULL_TIMES, DEFAULT_SAMPLING_TIMES,
};
use rs_phylosens::model::tree::{Phylogeny, Tree};
use rs_phylosens::stats::gls::PhyloGls;
use rs_phylosens::util::hash::describe_input;
use rs_phylosens::util::progress::{BarProgress, NoProgress, Progress};

#[derive(Parser, Debug)]
#[command(author, version, about = "Sensitivity analysis for phylogenetic regression.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Leave out each taxon in turn
    Influence {
        #[command(flatten)]
        common: CommonArgs,
        /// Standardised deviation above which a taxon is influential
        #[arg(long, default_value_t = DEFAULT_CUTOFF)]
        cutoff: f64,
    },
    /// Leave out random fractions of the taxa
    Sampling {
        #[command(flatten)]
        common: CommonArgs,
        /// Fractions of taxa to remove
        #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_BREAKS.to_vec())]
        breaks: Vec<f64>,
        /// Repetitions per fraction
        #[arg(long, default_value_t = DEFAULT_SAMPLING_TIMES)]
        times: usize,
    },
    /// Leave out each clade and compare against size-matched random removals
    Clade {
        #[command(flatten)]
        common: CommonArgs,
        /// Categorical column naming the clade of each taxon
        #[arg(long)]
        column: String,
        #[arg(long, default_value_t = DEFAULT_CLADE_MIN_SIZE)]
        min_size: usize,
        /// Random removals per clade
        #[arg(long, default_value_t = DEFAULT_NULL_TIMES)]
        times: usize,
    },
    /// Refit across the trees of an ensemble
    Tree {
        #[command(flatten)]
        common: CommonArgs,
        /// Trees to draw, defaults to 2
        #[arg(long)]
        times: Option<usize>,
    },
    /// Refit on values redrawn from their uncertainty columns
    Intra {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long, default_value_t = DEFAULT_SAMPLING_TIMES)]
        times: usize,
        #[arg(long, value_enum, default_value_t = Distribution::Normal)]
        distribution: Distribution,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Delimited file with a header row, taxon names in the first column
    #[arg(short, long)]
    data: PathBuf,

    /// Newick file holding one tree, or several for an ensemble
    #[arg(short, long)]
    tree: PathBuf,

    /// Response column
    #[arg(short, long)]
    response: String,

    /// Predictor columns
    #[arg(short, long, required = true, num_args = 1..)]
    predictor: Vec<String>,

    /// Uncertainty column of a model variable, as COLUMN=SD_COLUMN
    #[arg(long, value_parser = parse_pair)]
    uncertainty: Vec<(String, String)>,

    /// Transform of a model variable, as COLUMN=log|log10|sqrt
    #[arg(long, value_parser = parse_pair)]
    transform: Vec<(String, String)>,

    #[arg(long, default_value_t = ',')]
    delimiter: char,

    #[arg(long, value_enum, default_value_t = EvolutionModel::Lambda)]
    model: EvolutionModel,

    #[arg(long, default_value_t = 1)]
    cpus: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Significance level for the share of significant refits
    #[arg(long, default_value_t = DEFAULT_ALPHA)]
    alpha: f64,

    /// Write the JSON report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long)]
    no_progress: bool,
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() && !v.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected COLUMN=VALUE, got '{}'", s)),
    }
}

impl CommonArgs {
    fn variable(&self, column: &str) -> Result<Variable> {
        let mut variable = Variable::new(column);
        if let Some((_, sd)) = self.uncertainty.iter().find(|(c, _)| c == column) {
            variable = variable.with_uncertainty(sd);
        }
        if let Some((_, name)) = self.transform.iter().find(|(c, _)| c == column) {
            let transform = <Transform as clap::ValueEnum>::from_str(name, true)
                .map_err(|e| anyhow::anyhow!("invalid transform for '{}': {}", column, e))?;
            variable = variable.with_transform(transform);
        }
        Ok(variable)
    }

    fn spec(&self) -> Result<ModelSpec> {
        let predictors = self.predictor.iter().map(|p| self.variable(p)).collect::<Result<Vec<_>>>()?;
        Ok(ModelSpec::new(self.variable(&self.response)?, predictors))
    }
}

fn main() -> Result<()> {
    let total_time_start = Instant::now();
    let cli = Cli::parse();

    let log_level = cli.log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Warning: Invalid log level '{}' provided. Defaulting to info.", cli.log_level);
        log::LevelFilter::Info
    });
    env_logger::Builder::new().filter_level(log_level).format_timestamp_millis().init();

    let (common, plan) = match cli.command {
        Command::Influence { common, cutoff } => (common, Plan::Influence { cutoff }),
        Command::Sampling { common, breaks, times } => (common, Plan::Sampling { breaks, times }),
        Command::Clade { common, column, min_size, times } => (common, Plan::Clade { column, min_size, times }),
        Command::Tree { common, times } => (common, Plan::Tree { times }),
        Command::Intra { common, times, distribution } => (common, Plan::Intraspecific { times, distribution }),
    };
    if !common.delimiter.is_ascii() {
        bail!("The delimiter must be a single ASCII character.");
    }

    let spec = common.spec()?;
    let data = Dataset::read(&common.data, common.delimiter as u8)
        .with_context(|| format!("Unable to read data from {}", common.data.display()))?;
    let mut trees = Tree::read_newick_path(&common.tree)
        .with_context(|| format!("Unable to read trees from {}", common.tree.display()))?;
    let phylogeny = match trees.len() {
        0 => bail!("No trees found in {}", common.tree.display()),
        1 => Phylogeny::Single(trees.remove(0)),
        n => {
            info!("Read an ensemble of {} trees.", n);
            Phylogeny::Ensemble(trees)
        }
    };
    info!("Read {} taxa and {} columns.", data.len(), data.columns.len());

    let mut params = Params::new(plan)
        .with_cpus(common.cpus)
        .with_seed(common.seed)
        .with_options(ModelOptions { model: common.model });
    params.alpha = common.alpha;

    let progress: Box<dyn Progress> =
        if common.no_progress { Box::new(NoProgress) } else { Box::new(BarProgress::new("Refitting")) };

    let sensitivity = Sensitivity::new(spec, data, phylogeny);
    let mut report = sensitivity.run(&params, &PhyloGls, progress.as_ref())?;
    report.inputs = vec![describe_input(&common.data)?, describe_input(&common.tree)?];

    let json = report.to_json()?;
    match &common.output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Unable to write {}", path.display()))?;
            info!("Wrote report to {}", path.display());
        }
        None => println!("{}", json),
    }

    info!("Done in {:?}.", total_time_start.elapsed());
    Ok(())
}
