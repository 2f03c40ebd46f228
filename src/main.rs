//! Load a DICOM volume and save one of its slices as an image.
use std::path::PathBuf;

use clap::Parser;
use dicom_voxels::{
    CancellationToken, LoaderConfig, Orientation, VolumeLoader, VolumeLoaderError,
};
use log::{debug, error, info};

/// Decode a DICOM file, or the series it belongs to, into a voxel volume
#[derive(Debug, Parser)]
struct App {
    /// Path to a multi-frame DICOM file or any file of a series
    file: PathBuf,

    /// Loader configuration (TOML)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Save a slice of the volume to this image file
    #[arg(short = 'o', long = "out")]
    output: Option<PathBuf>,

    /// Axis of the saved slice
    #[arg(short = 'a', long = "axis", value_enum, default_value = "axial")]
    axis: Orientation,

    /// Slice index in the padded grid (default is the middle of the data)
    #[arg(short = 'i', long = "index")]
    index: Option<usize>,

    /// Print more information about the volume
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let app = App::parse();

    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if app.verbose { "debug" } else { "info" }),
    )
    .format_timestamp_secs()
    .try_init();

    if let Err(e) = run(app).await {
        error!("{e}");
        std::process::exit(-1);
    }
}

async fn run(app: App) -> Result<(), VolumeLoaderError> {
    let config = match &app.config {
        Some(path) => LoaderConfig::load_from_file(path)?,
        None => LoaderConfig::default(),
    };
    let loader = VolumeLoader::new(config)?;
    let mut allocator = loader.config().allocator();

    let mut last_reported = 0;
    let mut progress = |fraction: f32| {
        let percent = (fraction * 100.0) as u32;
        if percent >= last_reported + 10 {
            last_reported = percent;
            debug!("{percent}%");
        }
    };
    let loaded = loader
        .load_from_file_async(
            &app.file,
            &mut allocator,
            &mut progress,
            &CancellationToken::new(),
        )
        .await?;
    let volume = &loaded.volume;

    let [nx, ny, nz] = volume.true_dim;
    let [px, py, pz] = volume.dim();
    info!(
        "{nx}x{ny}x{nz} {} volume from {} file(s), padded to {px}x{py}x{pz}",
        volume.format,
        loaded.files.len()
    );
    if app.verbose {
        let [dx, dy, dz] = volume.spacing;
        println!("spacing: {dx} x {dy} x {dz}");
        if let Some((min, max)) = volume.value_range {
            println!("value range: [{min}, {max}]");
        }
        if let Some(modality) = &loaded.info.modality {
            println!("modality: {modality}");
        }
        for path in &loaded.files {
            println!("  {}", path.display());
        }
    }

    if let Some(output) = &app.output {
        let index = app.index.unwrap_or_else(|| volume.center_index(app.axis));
        match volume.get_image_from_axis(index, app.axis) {
            Some(image) => match image.save(output) {
                Ok(()) => info!("slice {index} saved to {}", output.display()),
                Err(e) => error!("could not save {}: {e}", output.display()),
            },
            None => error!("no {:?} slice at index {index}", app.axis),
        }
    }
    Ok(())
}
