use std::f64::consts::PI;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use subject_store::data::matlab::level5::write_mat;
use subject_store::data::matlab::MatValue;
use subject_store::data::npy::write_npy;

/// Write synthetic multi-subject recordings as .npy and .mat files.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Output directory; `npy/` and `mat/` are created inside it
    #[arg(short, long, default_value = "sample_data")]
    output: PathBuf,

    #[arg(long, default_value_t = 3)]
    subjects: usize,

    #[arg(long, default_value_t = 64)]
    channels: usize,

    #[arg(long, default_value_t = 5000)]
    samples: usize,

    /// Sampling frequency in Hz
    #[arg(long, default_value_t = 250.0)]
    fs: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Box-Muller transform for normal distribution
fn gauss(rng: &mut StdRng, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(1e-15);
    let u2: f64 = rng.gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    mean + std_dev * z
}

/// `(samples, channels)`: every channel mixes an alpha-band and a beta-band
/// oscillation with its own phase, plus white noise.
fn generate_subject(args: &Args, rng: &mut StdRng) -> Array2<f32> {
    let channel_params: Vec<(f64, f64, f64)> = (0..args.channels)
        .map(|_| {
            (
                rng.gen_range(8.0..12.0),
                rng.gen_range(15.0..30.0),
                rng.gen_range(0.0..2.0 * PI),
            )
        })
        .collect();

    let mut data = Array2::zeros((args.samples, args.channels));
    for ((t, c), value) in data.indexed_iter_mut() {
        let (alpha, beta, phase) = channel_params[c];
        let time = t as f64 / args.fs;
        let signal = (2.0 * PI * alpha * time + phase).sin()
            + 0.5 * (2.0 * PI * beta * time + phase).sin();
        *value = (signal + gauss(rng, 0.0, 0.3)) as f32;
    }
    data
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);

    let npy_dir = args.output.join("npy");
    let mat_dir = args.output.join("mat");
    for dir in [&npy_dir, &mat_dir] {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let width = args.subjects.to_string().len();
    for i in 0..args.subjects {
        let data = generate_subject(&args, &mut rng);
        let name = format!("subject{i:0width$}");

        write_npy(&npy_dir.join(format!("{name}.npy")), data.view())
            .with_context(|| format!("writing {name}.npy"))?;
        // MATLAB users conventionally store (channels, samples).
        let transposed = data.t().as_standard_layout().into_owned();
        write_mat(
            &mat_dir.join(format!("{name}.mat")),
            &[("X", &MatValue::from_array(transposed.view()))],
        )
        .with_context(|| format!("writing {name}.mat"))?;
    }

    println!(
        "Wrote {} subjects ({} samples x {} channels) to {}",
        args.subjects,
        args.samples,
        args.channels,
        args.output.display()
    );
    Ok(())
}
