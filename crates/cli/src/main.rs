//! changedet CLI - multivariate change detection for satellite image series

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use changedet_algorithms::classification::{pca, PcaParams};
use changedet_algorithms::imagery::{
    db_to_linear, omnibus, radcalbatch, run_mad, BandCalibration, CovarianceLayout, ImadParams,
    OmnibusParams, RadcalParams,
};
use changedet_algorithms::statistics::chi2_survival;
use changedet_core::io::{read_geotiff, read_image, write_geotiff, write_image};
use changedet_core::{Image, Raster, Region};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "changedet")]
#[command(author, version, about = "Multivariate change detection for satellite image series", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// IR-MAD between two images
    Mad {
        /// Bands of the first image, comma separated
        #[arg(long)]
        image1: String,
        /// Bands of the second image, comma separated
        #[arg(long)]
        image2: String,
        /// Number of iterations
        #[arg(short, long, default_value = "50")]
        iterations: usize,
        /// Region of interest: min_x,min_y,max_x,max_y
        #[arg(long)]
        region: Option<String>,
        /// Output directory
        #[arg(short, long)]
        output_dir: PathBuf,
    },
    /// Radiometric normalization of an image series against a reference
    Radcal {
        /// Bands of one image, comma separated (repeat for each image)
        #[arg(long = "image", required = true)]
        images: Vec<String>,
        /// Position of the reference in the image list
        #[arg(short, long, default_value = "0")]
        reference: usize,
        /// IR-MAD iterations per target
        #[arg(short, long, default_value = "50")]
        iterations: usize,
        /// Invariant pixels satisfy chi2 CDF below this value
        #[arg(short, long, default_value = "0.05")]
        significance: f64,
        /// Minimum invariant pixels per band
        #[arg(long, default_value = "30")]
        min_pixels: usize,
        /// Region of interest: min_x,min_y,max_x,max_y
        #[arg(long)]
        region: Option<String>,
        /// Output directory
        #[arg(short, long)]
        output_dir: PathBuf,
    },
    /// Sequential omnibus change detection over a SAR series
    Omnibus {
        /// Bands of one image, comma separated (repeat for each time step)
        #[arg(long = "image", required = true)]
        images: Vec<String>,
        /// Significance level of each test
        #[arg(short, long, default_value = "0.01")]
        significance: f64,
        /// Equivalent number of looks
        #[arg(long, default_value = "4.9")]
        enl: f64,
        /// Apply a 3x3 median filter to the change probabilities
        #[arg(long)]
        median: bool,
        /// Band layout of the covariance matrices
        #[arg(long, value_enum, default_value = "diagonal")]
        layout: LayoutArg,
        /// Inputs are in decibels
        #[arg(long)]
        db: bool,
        /// Output directory
        #[arg(short, long)]
        output_dir: PathBuf,
    },
    /// Chi-square no-change probability of a chi2 raster
    Chi2 {
        /// Input chi-square raster
        input: PathBuf,
        /// Output probability raster
        output: PathBuf,
        /// Degrees of freedom (number of bands)
        #[arg(short, long)]
        dof: usize,
    },
    /// Principal components of an image
    Pca {
        /// Bands of the image, comma separated
        #[arg(long)]
        image: String,
        /// Number of components to keep
        #[arg(short = 'n', long)]
        components: Option<usize>,
        /// Output directory
        #[arg(short, long)]
        output_dir: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutArg {
    /// Independent intensity bands
    Diagonal,
    /// C11, C22, Re(C12), Im(C12)
    Dualpol,
}

impl From<LayoutArg> for CovarianceLayout {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::Diagonal => CovarianceLayout::Diagonal,
            LayoutArg::Dualpol => CovarianceLayout::DualPolFull,
        }
    }
}

// ─── Reports ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct MadReport {
    iterations: usize,
    converged_at: Option<usize>,
    rhos: Vec<Vec<f64>>,
}

#[derive(Serialize)]
struct TargetReport {
    id: String,
    invariant_pixels: usize,
    rhos: Vec<f64>,
    coefficients: Vec<BandCalibration>,
}

#[derive(Serialize)]
struct RadcalReport {
    reference: String,
    params: RadcalParams,
    targets: Vec<TargetReport>,
    log: Vec<String>,
}

#[derive(Serialize)]
struct OmnibusReport {
    images: usize,
    params: OmnibusParams,
    changed_pixels: usize,
    changes_per_interval: Vec<usize>,
}

#[derive(Serialize)]
struct PcaReport {
    eigenvalues: Vec<f64>,
    variance_explained: Vec<f64>,
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn parse_band_list(list: &str) -> Result<Vec<PathBuf>> {
    let paths: Vec<PathBuf> = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect();
    if paths.is_empty() {
        bail!("Empty band list: '{}'", list);
    }
    Ok(paths)
}

fn parse_region(s: &str) -> Result<Region> {
    let v: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("Invalid region '{}'", s))?;
    if v.len() != 4 {
        bail!("Region needs 4 values (min_x,min_y,max_x,max_y), got {}", v.len());
    }
    Ok(Region::new(v[0], v[1], v[2], v[3]))
}

/// Image id: stem of the first band file
fn image_id(paths: &[PathBuf]) -> String {
    paths
        .first()
        .and_then(|p| p.file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

fn load_image(list: &str) -> Result<Image> {
    let paths = parse_band_list(list)?;
    let pb = spinner("Reading image...");
    let image = read_image(&paths)
        .with_context(|| format!("Failed to read image '{}'", list))?
        .with_id(image_id(&paths));
    pb.finish_and_clear();
    let (rows, cols) = image.shape();
    info!("Input {}: {} bands, {} x {}", image_id(&paths), image.nbands(), cols, rows);
    Ok(image)
}

fn load_series(lists: &[String]) -> Result<Vec<Image>> {
    lists.iter().map(|l| load_image(l)).collect()
}

fn save_image(image: &Image, dir: &Path, prefix: &str) -> Result<()> {
    let pb = spinner("Writing output...");
    write_image(image, dir, prefix).context("Failed to write output image")?;
    pb.finish_and_clear();
    Ok(())
}

fn save_raster<T: changedet_core::RasterElement>(raster: &Raster<T>, path: &Path) -> Result<()> {
    write_geotiff(raster, path).with_context(|| format!("Failed to write {}", path.display()))
}

fn save_report<T: Serialize>(report: &T, dir: &Path) -> Result<()> {
    let path = dir.join("report.json");
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        // ── Info ─────────────────────────────────────────────────────
        Commands::Info { input } => {
            let pb = spinner("Reading raster...");
            let raster: Raster<f64> = read_geotiff(&input).context("Failed to read raster")?;
            pb.finish_and_clear();

            let (rows, cols) = raster.shape();
            let bounds = raster.bounds();
            let stats = raster.statistics();

            println!("File: {}", input.display());
            println!("Dimensions: {} x {} ({} cells)", cols, rows, raster.len());
            println!("Cell size: {}", raster.resolution());
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                bounds.0, bounds.1, bounds.2, bounds.3
            );
            if let Some(crs) = raster.crs() {
                println!("CRS: {}", crs);
            }
            println!("\nStatistics:");
            if let (Some(min), Some(max)) = (stats.min, stats.max) {
                println!("  Min: {:.6}", min);
                println!("  Max: {:.6}", max);
            }
            if let Some(mean) = stats.mean {
                println!("  Mean: {:.6}", mean);
            }
            println!("  Valid cells: {}", stats.valid_count);
        }

        // ── IR-MAD ───────────────────────────────────────────────────
        Commands::Mad {
            image1,
            image2,
            iterations,
            region,
            output_dir,
        } => {
            let a = load_image(&image1)?;
            let b = load_image(&image2)?;
            let params = ImadParams {
                iterations,
                region: region.as_deref().map(parse_region).transpose()?,
                ..Default::default()
            };

            let start = Instant::now();
            let pb = spinner("Running IR-MAD...");
            let result = run_mad(&a, &b, params).context("IR-MAD failed")?;
            pb.finish_and_clear();
            let elapsed = start.elapsed();
            info!("Canonical correlations: {:?}", result.rhos());

            std::fs::create_dir_all(&output_dir)?;
            save_image(&result.mad, &output_dir, "")?;
            save_raster(&result.chi2, &output_dir.join("chi2.tif"))?;
            let no_change = chi2_survival(&result.chi2, a.nbands())?;
            save_raster(&no_change, &output_dir.join("no_change_probability.tif"))?;
            save_report(
                &MadReport {
                    iterations: result.iterations(),
                    converged_at: result.converged_at,
                    rhos: result.all_rhos.clone(),
                },
                &output_dir,
            )?;
            done("IR-MAD", &output_dir, elapsed);
        }

        // ── Radiometric normalization ────────────────────────────────
        Commands::Radcal {
            images,
            reference,
            iterations,
            significance,
            min_pixels,
            region,
            output_dir,
        } => {
            let series = load_series(&images)?;
            let params = RadcalParams {
                significance,
                min_invariant_pixels: min_pixels,
                imad: ImadParams {
                    iterations,
                    region: region.as_deref().map(parse_region).transpose()?,
                    ..Default::default()
                },
            };

            let start = Instant::now();
            let pb = spinner("Normalizing images...");
            let batch = radcalbatch(&series, reference, params).context("Normalization failed")?;
            pb.finish_and_clear();
            let elapsed = start.elapsed();

            std::fs::create_dir_all(&output_dir)?;
            for (i, image) in batch.images.iter().enumerate() {
                let id = image.id().map(str::to_string).unwrap_or_else(|| format!("image{}", i));
                let prefix = if i == 0 { format!("{}_", id) } else { format!("{}_norm_", id) };
                save_image(image, &output_dir, &prefix)?;
            }

            let reference_id = batch
                .images
                .first()
                .and_then(Image::id)
                .unwrap_or("reference")
                .to_string();
            let targets = batch
                .targets
                .iter()
                .map(|t| TargetReport {
                    id: t.normalized.id().unwrap_or("target").to_string(),
                    invariant_pixels: t.invariant_pixels,
                    rhos: t.rhos.clone(),
                    coefficients: t.coefficients.clone(),
                })
                .collect();
            for line in &batch.log {
                println!("{}", line);
            }
            save_report(
                &RadcalReport {
                    reference: reference_id,
                    params,
                    targets,
                    log: batch.log,
                },
                &output_dir,
            )?;
            done("Normalized images", &output_dir, elapsed);
        }

        // ── Omnibus ──────────────────────────────────────────────────
        Commands::Omnibus {
            images,
            significance,
            enl,
            median,
            layout,
            db,
            output_dir,
        } => {
            let mut series = load_series(&images)?;
            if db {
                series = series.iter().map(db_to_linear).collect();
            }
            let params = OmnibusParams {
                significance,
                use_median: median,
                enl,
                layout: layout.into(),
            };

            let start = Instant::now();
            let pb = spinner("Running omnibus test...");
            let maps = omnibus(&series, params).context("Omnibus test failed")?;
            pb.finish_and_clear();
            let elapsed = start.elapsed();

            std::fs::create_dir_all(&output_dir)?;
            save_raster(&maps.cmap, &output_dir.join("cmap.tif"))?;
            save_raster(&maps.smap, &output_dir.join("smap.tif"))?;
            save_raster(&maps.fmap, &output_dir.join("fmap.tif"))?;
            for (b, band) in maps.bmap.iter().enumerate() {
                save_raster(band, &output_dir.join(format!("bmap_{}_{}.tif", b + 1, b + 2)))?;
            }

            let changed_pixels = maps.fmap.data().iter().filter(|&&v| v > 0).count();
            let changes_per_interval = maps
                .bmap
                .iter()
                .map(|b| b.data().iter().filter(|&&v| v > 0).count())
                .collect();
            info!("{} pixels changed at least once", changed_pixels);
            save_report(
                &OmnibusReport {
                    images: series.len(),
                    params,
                    changed_pixels,
                    changes_per_interval,
                },
                &output_dir,
            )?;
            done("Change maps", &output_dir, elapsed);
        }

        // ── Chi-square ───────────────────────────────────────────────
        Commands::Chi2 { input, output, dof } => {
            let chi2: Raster<f64> = read_geotiff(&input).context("Failed to read raster")?;
            let start = Instant::now();
            let prob = chi2_survival(&chi2, dof)?;
            let elapsed = start.elapsed();
            save_raster(&prob, &output)?;
            done("No-change probability", &output, elapsed);
        }

        // ── PCA ──────────────────────────────────────────────────────
        Commands::Pca {
            image,
            components,
            output_dir,
        } => {
            let img = load_image(&image)?;
            let start = Instant::now();
            let result = pca(&img, PcaParams { n_components: components }).context("PCA failed")?;
            let elapsed = start.elapsed();

            std::fs::create_dir_all(&output_dir)?;
            save_image(&result.components, &output_dir, "")?;
            for (k, v) in result.variance_explained.iter().enumerate() {
                println!("  PC{}: {:.2}% of variance", k + 1, v * 100.0);
            }
            save_report(
                &PcaReport {
                    eigenvalues: result.eigenvalues,
                    variance_explained: result.variance_explained,
                },
                &output_dir,
            )?;
            done("PCA", &output_dir, elapsed);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_band_list() {
        let paths = parse_band_list("a_b1.tif, a_b2.tif,").unwrap();
        assert_eq!(paths, vec![PathBuf::from("a_b1.tif"), PathBuf::from("a_b2.tif")]);
        assert!(parse_band_list(" , ").is_err());
        assert_eq!(image_id(&paths), "a_b1");
    }

    #[test]
    fn test_parse_region() {
        let r = parse_region("10,20,30,40").unwrap();
        assert_eq!(r.bounds(), (10.0, 20.0, 30.0, 40.0));
        assert!(parse_region("1,2,3").is_err());
        assert!(parse_region("a,b,c,d").is_err());
    }

    #[test]
    fn test_cli_parses_omnibus() {
        let cli = Cli::try_parse_from([
            "changedet", "omnibus", "--image", "t1_vv.tif,t1_vh.tif", "--image",
            "t2_vv.tif,t2_vh.tif", "--median", "--db", "-o", "out",
        ])
        .unwrap();
        match cli.command {
            Commands::Omnibus { images, median, db, .. } => {
                assert_eq!(images.len(), 2);
                assert!(median && db);
            }
            _ => panic!("expected omnibus"),
        }
    }
}
