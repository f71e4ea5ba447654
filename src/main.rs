use polars::prelude::*;
use std::{env, path::PathBuf};

use anyhow::Context;
use ccpi_xsec::{
    candidate::CandidateSource,
    config::{AnalysisConfig, SignalKind},
    normalize::{ConstantFlux, FluxProvider, TabulatedFlux},
    pipeline::{
        extract_cross_sections, make_mc_inputs, resolve_input, run_cutflow, write_tsv,
        write_toy_samples, SampleFiles, DEFAULT_SAMPLE_DIR,
    },
    store::HistogramStore,
    xsec::summary_frame,
};
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(long, global = true, value_name = "LEVEL", default_value_t = tracing::Level::INFO)]
    log_level: tracing::Level,
    /// Analysis configuration (TOML); defaults to the nominal analysis
    #[arg(short, long, global = true, value_name = "CONFIG")]
    config: Option<PathBuf>,
    /// Signal definition, overriding the configuration
    #[arg(long, global = true, value_enum)]
    signal: Option<SignalKind>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a toy playlist of simulated and measured candidates
    Generate {
        #[arg(short, long, value_name = "DIR", default_value = DEFAULT_SAMPLE_DIR)]
        output: PathBuf,
        #[arg(short, long, value_name = "PLAYLIST", default_value = "ME1A")]
        playlist: String,
        #[arg(long, value_name = "NMC", default_value_t = 20000)]
        n_mc: usize,
        #[arg(long, value_name = "NDATA", default_value_t = 5000)]
        n_data: usize,
        #[arg(short, long, value_name = "SEED", default_value_t = 0)]
        seed: u64,
    },
    /// Fill and persist every simulation histogram of one playlist
    McInputs {
        #[arg(short, long, value_name = "PLAYLIST", default_value = "ME1A")]
        playlist: String,
        #[arg(long)]
        no_systematics: bool,
        /// Also fill efficiency denominators from generated signal
        #[arg(long)]
        truth: bool,
        /// Grid job: the sample directory must be given explicitly
        #[arg(long)]
        grid: bool,
        #[arg(short, long, value_name = "DIR")]
        input: Option<PathBuf>,
        #[arg(short, long, value_name = "RUN", default_value_t = 0)]
        run: u32,
        #[arg(short, long, value_name = "TAG", default_value = "nominal")]
        tag: String,
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },
    /// Extract cross sections from data against persisted MC inputs
    Xsec {
        prior: PathBuf,
        #[arg(short, long, value_name = "PLAYLIST", default_value = "ME1A")]
        playlist: String,
        #[arg(short, long, value_name = "DIR")]
        input: Option<PathBuf>,
        /// Tabulated flux (e_lo, e_hi, flux, flux_<band>_<i>)
        #[arg(short, long, value_name = "FLUX")]
        flux: Option<PathBuf>,
        #[arg(short, long, value_name = "OUTPUT", default_value = "xsec.json")]
        output: PathBuf,
        #[arg(short, long, value_name = "SUMMARY")]
        summary: Option<PathBuf>,
    },
    /// Print the cut-flow efficiency and purity table
    Cutflow {
        #[arg(short, long, value_name = "PLAYLIST", default_value = "ME1A")]
        playlist: String,
        #[arg(short, long, value_name = "DIR")]
        input: Option<PathBuf>,
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },
}

fn load_config(
    path: Option<&PathBuf>,
    signal: Option<SignalKind>,
) -> anyhow::Result<AnalysisConfig> {
    let mut config = match path {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(kind) = signal {
        config.signal.kind = kind;
    }
    config.validate()?;
    Ok(config)
}

fn print_table(df: &DataFrame) {
    env::set_var("POLARS_FMT_TABLE_ROUNDED_CORNERS", "1");
    env::set_var("POLARS_FMT_MAX_COLS", "-1");
    env::set_var("POLARS_FMT_MAX_ROWS", "-1");
    env::set_var("POLARS_FMT_STR_LEN", "50");
    println!("{}", df);
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .init();
    match cli.command {
        Some(Commands::Generate {
            output,
            playlist,
            n_mc,
            n_data,
            seed,
        }) => {
            std::fs::create_dir_all(&output)
                .with_context(|| format!("creating {}", output.display()))?;
            let files = SampleFiles::for_playlist(&output, &playlist);
            write_toy_samples(&files, n_mc, n_data, seed)?;
        }
        Some(Commands::McInputs {
            playlist,
            no_systematics,
            truth,
            grid,
            input,
            run,
            tag,
            output,
        }) => {
            let mut config = load_config(cli.config.as_ref(), cli.signal)?;
            if no_systematics {
                config.systematics.enabled = false;
            }
            let dir = resolve_input(grid, input.as_deref())?;
            let files = SampleFiles::for_playlist(&dir, &playlist);
            let exposure = files.read_exposure()?;
            let mc = files.load_mc()?;
            let truth_table = if truth { Some(files.load_truth()?) } else { None };
            let (store, _) = make_mc_inputs(
                &config,
                &mc,
                truth_table.as_ref().map(|t| t as &dyn CandidateSource),
                exposure.mc_pot,
            )?;
            let output = output.unwrap_or_else(|| {
                PathBuf::from(format!("mc_inputs_{run}_{playlist}_{tag}.json"))
            });
            info!(objects = store.len(), path = %output.display(), "writing MC inputs");
            store.save(&output)?;
        }
        Some(Commands::Xsec {
            prior,
            playlist,
            input,
            flux,
            output,
            summary,
        }) => {
            let config = load_config(cli.config.as_ref(), cli.signal)?;
            let prior = HistogramStore::load(&prior)
                .with_context(|| format!("loading MC inputs from {}", prior.display()))?;
            let dir = resolve_input(false, input.as_deref())?;
            let files = SampleFiles::for_playlist(&dir, &playlist);
            let exposure = files.read_exposure()?;
            let data = files.load_data()?;
            let flux: Box<dyn FluxProvider> = match flux {
                Some(path) => Box::new(TabulatedFlux::from_csv(&path)?),
                None => {
                    warn!("no flux table given, using unit flux");
                    Box::new(ConstantFlux(1.0))
                }
            };
            let result =
                extract_cross_sections(&config, &prior, &data, exposure.data_pot, flux.as_ref())?;
            result.store.save(&output)?;
            let mut table = summary_frame(&result.results)?;
            print_table(&table);
            if let Some(out_path) = summary {
                println!("Writing summary to {:?}", out_path);
                write_tsv(&mut table, &out_path)?;
            }
        }
        Some(Commands::Cutflow {
            playlist,
            input,
            output,
        }) => {
            let config = load_config(cli.config.as_ref(), cli.signal)?;
            let dir = resolve_input(false, input.as_deref())?;
            let files = SampleFiles::for_playlist(&dir, &playlist);
            let mc = files.load_mc()?;
            let truth = files.load_truth()?;
            let data = files.load_data()?;
            let flow = run_cutflow(&config, &mc, Some(&truth as &dyn CandidateSource), &data)?;
            let mut table = flow.to_frame()?;
            print_table(&table);
            if let Some(out_path) = output {
                println!("Writing result to {:?}", out_path);
                write_tsv(&mut table, &out_path)?;
            }
        }
        None => Cli::command().print_help()?,
    }
    Ok(())
}
