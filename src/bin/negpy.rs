//! CLI entry point (spec.md §6): batch-processes every expanded input
//! through [`negpy::Engine::render_export`] and writes the result as TIFF
//! or JPEG. Exits 0 when every input succeeds, 1 if any fails; progress
//! and per-file errors go to stderr, keeping stdout free for the tool's
//! actual output.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use image::{ImageBuffer as EncodeBuffer, Rgb};
use negpy::cli::{self, Cli, OutputFormat};
use negpy::engine::{DEFAULT_TILE_HALO, DEFAULT_TILE_SIZE};
use negpy::{Engine, ImageBuffer};

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(failures) if failures == 0 => std::process::exit(0),
        Ok(_) => std::process::exit(1),
        Err(e) => {
            eprintln!("negpy: {e:?}");
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<usize> {
    let inputs = cli::expand_inputs(&cli.inputs).context("expanding input paths")?;
    if inputs.is_empty() {
        eprintln!("negpy: no matching input files found");
        return Ok(1);
    }

    let base_config = cli::load_base_config(cli.settings.as_ref())?;
    let config = cli::apply_overrides(cli, base_config);

    let mut engine = Engine::new();
    if !cli.no_gpu {
        engine.enable_gpu();
    }

    let mut failures = 0usize;
    for input_path in &inputs {
        eprintln!("processing {}", input_path.display());
        if let Err(e) = process_one(&engine, &config, cli, input_path) {
            eprintln!("negpy: failed on {}: {e:?}", input_path.display());
            failures += 1;
        }
        engine.cleanup();
    }

    Ok(failures)
}

fn process_one(engine: &Engine, config: &negpy::WorkspaceConfig, cli: &Cli, input_path: &Path) -> Result<()> {
    let (buffer, _exif, hint) =
        negpy::loader::load(input_path).with_context(|| format!("loading {}", input_path.display()))?;

    let rendered = engine
        .render_export(&buffer, config, hint, DEFAULT_TILE_SIZE, DEFAULT_TILE_HALO)
        .with_context(|| format!("rendering {}", input_path.display()))?;

    let extension = match cli.format {
        OutputFormat::Tiff => "tiff",
        OutputFormat::Jpeg => "jpg",
    };
    let filename = cli::render_filename(&cli.filename_template, input_path, extension);
    let output_dir = cli.output_dir.clone().unwrap_or_else(|| {
        input_path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."))
    });
    std::fs::create_dir_all(&output_dir).with_context(|| format!("creating output directory {}", output_dir.display()))?;
    let output_path = output_dir.join(filename);

    write_output(&rendered, &output_path, cli.format)
        .with_context(|| format!("writing {}", output_path.display()))?;

    Ok(())
}

/// Encodes the linear-float render to the requested container. TIFF keeps
/// full 16-bit precision; JPEG quantizes to 8-bit, matching spec.md §6's
/// "tiff default, jpeg alt" framing (JPEG is a lossy preview export, not a
/// fidelity-preserving format).
fn write_output(buffer: &ImageBuffer, path: &Path, format: OutputFormat) -> Result<()> {
    let (w, h) = (buffer.width(), buffer.height());
    match format {
        OutputFormat::Tiff => {
            let mut data = Vec::with_capacity((w * h * 3) as usize);
            for px in buffer.data().chunks_exact(3) {
                for &c in px {
                    data.push((c.clamp(0.0, 1.0) * 65535.0).round() as u16);
                }
            }
            let image: EncodeBuffer<Rgb<u16>, Vec<u16>> =
                EncodeBuffer::from_raw(w, h, data).context("assembling 16-bit output buffer")?;
            image.save_with_format(path, image::ImageFormat::Tiff)?;
        }
        OutputFormat::Jpeg => {
            let mut data = Vec::with_capacity((w * h * 3) as usize);
            for px in buffer.data().chunks_exact(3) {
                for &c in px {
                    data.push((c.clamp(0.0, 1.0) * 255.0).round() as u8);
                }
            }
            let image: EncodeBuffer<Rgb<u8>, Vec<u8>> =
                EncodeBuffer::from_raw(w, h, data).context("assembling 8-bit output buffer")?;
            image.save_with_format(path, image::ImageFormat::Jpeg)?;
        }
    }
    Ok(())
}
