//! Command-line front-end for the subject store.
//!
//! - `subject-store inspect <inputs>...` – ingest and summarise
//! - `subject-store convert <inputs>... -o <dir> [--mat]` – re-save as
//!   `subject<i>.npy` (plus the preparation record) or `.mat`
//! - `subject-store list <dir>` – show the files a directory input resolves to

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use subject_store::data::listing::list_dir;
use subject_store::data::loader::RECOGNIZED_EXTENSIONS;
use subject_store::{Input, Store, StoreOptions};

#[derive(Parser)]
#[command(name = "subject-store")]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON file with store options
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// MATLAB field holding the data
    #[arg(long, global = true)]
    field: Option<String>,

    /// Directory for backing files
    #[arg(long, global = true, value_name = "DIR")]
    store_dir: Option<PathBuf>,

    /// Inputs are (channels, samples) rather than (samples, channels)
    #[arg(long, global = true)]
    channels_first: bool,

    /// Sampling frequency in Hz
    #[arg(long, global = true)]
    sampling_frequency: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest inputs and print subject shapes
    Inspect {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Ingest inputs and write them out one file per subject
    Convert {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,

        /// Write MATLAB files instead of .npy
        #[arg(long)]
        mat: bool,
    },

    /// List the data files a directory resolves to
    List { dir: PathBuf },
}

impl Cli {
    fn options(&self) -> Result<StoreOptions> {
        let mut options = match &self.config {
            Some(path) => StoreOptions::from_json_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => StoreOptions::default(),
        };
        if let Some(field) = &self.field {
            options.data_field = field.clone();
        }
        if let Some(dir) = &self.store_dir {
            options.store_dir = dir.clone();
        }
        if self.channels_first {
            options.time_axis_first = false;
        }
        if self.sampling_frequency.is_some() {
            options.sampling_frequency = self.sampling_frequency;
        }
        options.progress = true;
        Ok(options)
    }
}

/// A single path stays a path so that a store directory keeps its
/// preparation record.
fn to_input(mut inputs: Vec<PathBuf>) -> Input {
    if inputs.len() == 1 {
        Input::Path(inputs.remove(0))
    } else {
        inputs.into()
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Inspect { inputs } => {
            let store = Store::open(to_input(inputs.clone()), cli.options()?)
                .context("opening store")?;
            println!(
                "{} subjects, {} channels ({:?})",
                store.n_subjects(),
                store.n_channels(),
                store.state()
            );
            if let Some(fs) = store.sampling_frequency() {
                println!("sampling frequency: {fs} Hz");
            }
            if let Some(record) = store.preparation() {
                println!(
                    "n_embeddings: {}, n_pca_components: {:?}",
                    record.n_embeddings,
                    record.n_pca_components()
                );
            }
            for (i, subject) in store.subjects().enumerate() {
                let (samples, channels) = subject.dim();
                println!("  subject {i}: {samples} samples x {channels} channels");
            }
        }
        Commands::Convert {
            inputs,
            output,
            mat,
        } => {
            let options = cli.options()?;
            let field = options.data_field.clone();
            let store =
                Store::open(to_input(inputs.clone()), options).context("opening store")?;
            let written = if *mat {
                store.save_mat(output, &field)
            } else {
                store.save(output)
            }
            .with_context(|| format!("saving to {}", output.display()))?;
            println!("wrote {} files to {}", written.len(), output.display());
        }
        Commands::List { dir } => {
            let files = list_dir(dir, Some(&RECOGNIZED_EXTENSIONS[..]))
                .with_context(|| format!("listing {}", dir.display()))?;
            for file in files {
                println!("{}", file.display());
            }
        }
    }
    Ok(())
}
