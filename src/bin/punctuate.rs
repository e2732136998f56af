use std::path::{Path, PathBuf};

use clap::{ArgGroup, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use punctcap_rs::postprocess::{fix_decimals, make_intact_sentence};
use punctcap_rs::{Punctuator, PunctuatorBuilder, PunctuatorConfig, RestoreConfig};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[path = "punctuate/io_formats.rs"]
mod io_formats;

#[derive(Debug, Parser)]
#[command(name = "punctuate")]
#[command(about = "Restore punctuation and capitalization in texts of any length")]
#[command(group(ArgGroup::new("input").required(true).args(["input_manifest", "input_text"])))]
#[command(group(ArgGroup::new("output").required(true).args(["output_manifest", "output_text"])))]
struct Args {
    /// JSON lines manifest; `pred_text` is used if the first record has it, else `text`.
    #[arg(long, short = 'm', env = "PUNCTCAP_INPUT_MANIFEST")]
    input_manifest: Option<PathBuf>,
    /// Plain text file with one query per line.
    #[arg(long, short = 't', env = "PUNCTCAP_INPUT_TEXT")]
    input_text: Option<PathBuf>,
    #[arg(
        long,
        short = 'M',
        env = "PUNCTCAP_OUTPUT_MANIFEST",
        requires = "input_manifest"
    )]
    output_manifest: Option<PathBuf>,
    #[arg(long, short = 'T', env = "PUNCTCAP_OUTPUT_TEXT")]
    output_text: Option<PathBuf>,
    /// Directory with `model.safetensors`, `config.json` and `tokenizer.json`.
    #[arg(long, env = "PUNCTCAP_MODEL_DIR", default_value = "models/punctuation_bert")]
    model_dir: PathBuf,
    /// Segment length, including [CLS] and [SEP] unless they are disabled.
    #[arg(long, short = 'L', env = "PUNCTCAP_MAX_SEQ_LENGTH", default_value_t = RestoreConfig::DEFAULT_MAX_LENGTH)]
    max_seq_length: usize,
    /// Distance between the starts of consecutive segments.
    #[arg(long, short = 's', env = "PUNCTCAP_STEP", default_value_t = RestoreConfig::DEFAULT_STEP)]
    step: usize,
    /// Outputs discarded at each inner segment border.
    #[arg(long, short = 'g', env = "PUNCTCAP_MARGIN", default_value_t = RestoreConfig::DEFAULT_MARGIN)]
    margin: usize,
    /// Segments per model call.
    #[arg(long, short = 'b', env = "PUNCTCAP_BATCH_SIZE", default_value_t = RestoreConfig::DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    #[arg(long, short = 'B', env = "PUNCTCAP_SAVE_LABELS", default_value_t = false)]
    save_labels_instead_of_text: bool,
    #[arg(long, env = "PUNCTCAP_NO_CLS_SEP", default_value_t = false)]
    not_add_cls_and_sep_tokens: bool,
    /// `auto` picks CUDA, then Metal, when compiled in and available.
    #[arg(
        long,
        short = 'd',
        env = "PUNCTCAP_DEVICE",
        default_value = "auto",
        value_parser = ["auto", "cpu", "cuda", "metal"]
    )]
    device: String,
    /// Strip leading punctuation, capitalize the first letter and end every
    /// query with sentence-final punctuation.
    #[arg(
        long,
        env = "PUNCTCAP_INTACT_SENTENCES",
        default_value_t = false,
        conflicts_with = "save_labels_instead_of_text"
    )]
    make_queries_contain_intact_sentences: bool,
    /// Rewrite spoken decimals such as `3 point 5` as `3.5`.
    #[arg(
        long,
        env = "PUNCTCAP_FIX_DECIMALS",
        default_value_t = false,
        conflicts_with = "save_labels_instead_of_text"
    )]
    fix_decimals: bool,
}

impl Args {
    fn restore_config(&self) -> RestoreConfig {
        RestoreConfig {
            max_length: self.max_seq_length,
            step: self.step,
            margin: self.margin,
            batch_size: self.batch_size,
            add_cls_and_sep_tokens: !self.not_add_cls_and_sep_tokens,
        }
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    if let Err(err) = run() {
        tracing::error!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = Args::parse();
    let restore_config = args.restore_config();
    restore_config
        .validate()
        .map_err(|err| format!("Invalid windowing parameters: {err}"))?;

    let manifest = match &args.input_manifest {
        Some(path) => Some(io_formats::read_manifest(path)?),
        None => None,
    };
    let texts = match (&manifest, &args.input_text) {
        (Some(manifest), _) => manifest.texts()?,
        (None, Some(path)) => io_formats::read_lines(path)?,
        (None, None) => return Err("One of --input-manifest or --input-text is required.".into()),
    };
    tracing::info!(queries = texts.len(), "loaded input");

    let punctuator = build_punctuator(&args.model_dir, &args.device, restore_config)?;
    let mut processed = restore_with_progress(&punctuator, &texts, &args)?;

    if args.make_queries_contain_intact_sentences {
        processed = processed.iter().map(|t| make_intact_sentence(t)).collect();
    }
    if args.fix_decimals {
        processed = processed.iter().map(|t| fix_decimals(t)).collect();
    }

    match (manifest, &args.output_manifest, &args.output_text) {
        (Some(manifest), Some(path), _) => io_formats::write_manifest(path, manifest, &processed),
        (_, _, Some(path)) => io_formats::write_lines(path, &processed),
        _ => Err("One of --output-manifest or --output-text is required.".into()),
    }
}

fn build_punctuator(
    model_dir: &Path,
    device: &str,
    restore_config: RestoreConfig,
) -> Result<Punctuator, String> {
    for (file, what) in [
        ("model.safetensors", "model weights"),
        ("config.json", "model config"),
        ("tokenizer.json", "tokenizer"),
    ] {
        require_path_exists(&model_dir.join(file), &format!("Missing {what} ({file})."))?;
    }

    let config = PunctuatorConfig {
        model_path: model_dir
            .join("model.safetensors")
            .to_string_lossy()
            .into_owned(),
        config_path: model_dir.join("config.json").to_string_lossy().into_owned(),
        tokenizer_path: model_dir
            .join("tokenizer.json")
            .to_string_lossy()
            .into_owned(),
        device: device.to_string(),
    };
    PunctuatorBuilder::new(config)
        .with_restore_config(restore_config)
        .build()
        .map_err(|err| format!("Failed to build Punctuator: {err}"))
}

/// Queries are independent, so restoring them in chunks only changes how
/// often the progress bar moves.
fn restore_with_progress(
    punctuator: &Punctuator,
    texts: &[String],
    args: &Args,
) -> Result<Vec<String>, String> {
    let progress = ProgressBar::new(texts.len() as u64);
    progress.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    progress.set_message("restoring");

    let mut out = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(args.batch_size.max(1)) {
        let restored = if args.save_labels_instead_of_text {
            punctuator.restore_labels(chunk)
        } else {
            punctuator.restore(chunk)
        }
        .map_err(|err| {
            progress.abandon_with_message("failed");
            format!("Restoration failed: {err}")
        })?;
        out.extend(restored);
        progress.inc(chunk.len() as u64);
    }
    progress.finish_with_message("done");
    Ok(out)
}

fn require_path_exists(path: &Path, message: &str) -> Result<(), String> {
    if path.exists() {
        return Ok(());
    }
    Err(format!("{message} Missing path: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        let mut argv = vec!["punctuate", "-t", "in.txt", "-T", "out.txt"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)
    }

    #[test]
    fn text_postprocessing_is_rejected_in_label_mode() {
        let err = parse(&["-B", "--make-queries-contain-intact-sentences"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
        let err = parse(&["-B", "--fix-decimals"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
        assert!(parse(&["--make-queries-contain-intact-sentences", "--fix-decimals"]).is_ok());
    }

    #[test]
    fn output_manifest_requires_input_manifest() {
        let err = Args::try_parse_from(["punctuate", "-t", "in.txt", "-M", "out.jsonl"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn defaults_match_restore_config() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.device, "auto");
        assert_eq!(args.restore_config(), RestoreConfig::default());
    }
}
