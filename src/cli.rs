//! Command-line surface (spec.md §6): positional file/directory inputs,
//! recursively expanded against [`crate::loader::known_extensions`], plus
//! flags covering overrides, output shape, and GPU control.
//!
//! Grounded on the clap `derive` + `anyhow::Context` convention in
//! `Niedzwiedzw-hoolamike`'s `main.rs` (`#[derive(Parser)]` struct, one
//! `Context`-wrapped call chain per subcommand), adapted to a single batch
//! command rather than that tool's subcommand set, since spec.md names no
//! subcommands — just one "process these files" invocation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use walkdir::WalkDir;

use crate::config::{ExportConfig, IccTag, OutputSizePolicy, WorkspaceConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Tiff,
    Jpeg,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Tiff
    }
}

/// Parsed command-line invocation (spec.md §6).
#[derive(Debug, Parser)]
#[command(name = "negpy", version, about = "Deterministic film-negative processing pipeline")]
pub struct Cli {
    /// Files or directories to process; directories are expanded
    /// recursively against the known loader extension set.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Directory exported files are written into; defaults to alongside
    /// each input.
    #[arg(long, short = 'o')]
    pub output_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Tiff)]
    pub format: OutputFormat,

    /// Optional JSON `WorkspaceConfig` (or [`crate::preset::Preset`]) file;
    /// per-flag overrides below are applied on top of it.
    #[arg(long)]
    pub settings: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub color_space: Option<IccTagArg>,

    #[arg(long)]
    pub density: Option<f32>,

    #[arg(long)]
    pub grade: Option<f32>,

    #[arg(long)]
    pub sharpen: Option<f32>,

    #[arg(long)]
    pub dpi: Option<u32>,

    /// Print size in centimeters, formatted `WIDTHxHEIGHT` (e.g. `20x30`).
    #[arg(long, value_parser = parse_print_size)]
    pub print_size_cm: Option<(u32, u32)>,

    /// Export at the source's native resolution regardless of print size.
    #[arg(long)]
    pub original_resolution: bool,

    /// Output filename template; `{stem}` is replaced with the input's
    /// file stem.
    #[arg(long, default_value = "{stem}")]
    pub filename_template: String,

    #[arg(long)]
    pub no_gpu: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IccTagArg {
    Srgb,
    AdobeRgb,
    ProPhoto,
    DisplayP3,
    Rec2020,
    WideGamut,
    Greyscale,
}

impl From<IccTagArg> for IccTag {
    fn from(value: IccTagArg) -> Self {
        match value {
            IccTagArg::Srgb => Self::Srgb,
            IccTagArg::AdobeRgb => Self::AdobeRgb,
            IccTagArg::ProPhoto => Self::ProPhoto,
            IccTagArg::DisplayP3 => Self::DisplayP3,
            IccTagArg::Rec2020 => Self::Rec2020,
            IccTagArg::WideGamut => Self::WideGamut,
            IccTagArg::Greyscale => Self::Greyscale,
        }
    }
}

fn parse_print_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s.split_once('x').ok_or_else(|| format!("expected WIDTHxHEIGHT, got `{s}`"))?;
    let width = w.parse::<u32>().map_err(|e| e.to_string())?;
    let height = h.parse::<u32>().map_err(|e| e.to_string())?;
    Ok((width, height))
}

/// Recursively expands `inputs` (files pass through verbatim, directories
/// are walked) against the known loader extension set (spec.md §6).
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let known = crate::loader::known_extensions();
    let mut files = Vec::new();

    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input).into_iter().filter_map(std::result::Result::ok) {
                let path = entry.path();
                let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();
                if entry.file_type().is_file() && known.contains(&ext.as_str()) {
                    files.push(path.to_path_buf());
                }
            }
        } else {
            files.push(input.clone());
        }
    }
    files.sort();
    Ok(files)
}

/// Applies the CLI's per-flag overrides on top of a base config (loaded
/// from `--settings` or [`WorkspaceConfig::default`]).
pub fn apply_overrides(cli: &Cli, mut config: WorkspaceConfig) -> WorkspaceConfig {
    let exposure = &mut config.exposure;
    if let Some(density) = cli.density {
        exposure.density = density;
    }
    if let Some(grade) = cli.grade {
        exposure.grade = grade;
    }
    apply_sharpen_override(cli, &mut config);
    apply_export_overrides(cli, &mut config.export);
    config
}

fn apply_sharpen_override(cli: &Cli, config: &mut WorkspaceConfig) {
    if let Some(sharpen) = cli.sharpen {
        config.lab.sharpen_amount = sharpen;
    }
}

fn apply_export_overrides(cli: &Cli, export: &mut ExportConfig) {
    if let Some(color_space) = cli.color_space {
        export.color_space = color_space.into();
    }
    if let Some(dpi) = cli.dpi {
        export.dpi = dpi;
    }
    if cli.original_resolution {
        export.size_policy = OutputSizePolicy::OriginalResolution;
    } else if let Some((width_cm, height_cm)) = cli.print_size_cm {
        export.size_policy = OutputSizePolicy::PrintSizeCm { width_cm, height_cm, dpi: cli.dpi.unwrap_or(export.dpi) };
    }
}

/// Renders `cli.filename_template` against one input path, substituting
/// `{stem}`.
#[must_use]
pub fn render_filename(template: &str, input: &std::path::Path, extension: &str) -> String {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    format!("{}.{extension}", template.replace("{stem}", stem))
}

/// Loads the base config from `--settings`, tolerating both a bare
/// `WorkspaceConfig` and a wrapped [`crate::preset::Preset`] document.
pub fn load_base_config(settings: Option<&PathBuf>) -> Result<WorkspaceConfig> {
    let Some(path) = settings else {
        return Ok(WorkspaceConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading settings file {}", path.display()))?;
    if let Ok(preset) = crate::preset::Preset::from_json(&text) {
        return Ok(preset.config);
    }
    serde_json::from_str(&text).with_context(|| format!("parsing settings file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_size_parses_dimensions() {
        assert_eq!(parse_print_size("20x30"), Ok((20, 30)));
        assert!(parse_print_size("bogus").is_err());
    }

    #[test]
    fn filename_template_substitutes_stem() {
        let path = std::path::Path::new("/tmp/roll12_frame04.tif");
        assert_eq!(render_filename("{stem}_graded", path, "tiff"), "roll12_frame04_graded.tiff");
    }

    #[test]
    fn overrides_apply_on_top_of_default() {
        let cli = Cli {
            inputs: vec![],
            output_dir: None,
            format: OutputFormat::Tiff,
            settings: None,
            color_space: None,
            density: Some(0.7),
            grade: Some(3.0),
            sharpen: None,
            dpi: Some(600),
            print_size_cm: None,
            original_resolution: true,
            filename_template: "{stem}".into(),
            no_gpu: false,
        };
        let config = apply_overrides(&cli, WorkspaceConfig::default());
        assert!((config.exposure.density - 0.7).abs() < 1e-6);
        assert!((config.exposure.grade - 3.0).abs() < 1e-6);
        assert_eq!(config.export.dpi, 600);
    }
}
