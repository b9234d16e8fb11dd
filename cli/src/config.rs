use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use core_codes::{CodeShape, ComputeContext, EncodeMode, EncodeOptions};
use model_learner::TableKind;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use trainer::TrainerConfig;

/// Device and seed shared by every command.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ComputeSettings {
    /// Use the first CUDA device when one is available.
    #[serde(default)]
    pub accelerator: bool,
    /// Seed for parameter initialisation, Gumbel noise and random table rows.
    #[serde(default = "ComputeSettings::default_seed")]
    pub seed: u64,
    /// `false` ignores `seed` and draws every random stream from OS entropy.
    #[serde(default = "ComputeSettings::default_seeded")]
    pub seeded: bool,
}

impl ComputeSettings {
    fn default_seed() -> u64 {
        42
    }

    fn default_seeded() -> bool {
        true
    }

    pub fn context(&self) -> Result<ComputeContext> {
        let ctx = ComputeContext::select(self.accelerator)?;
        Ok(if self.seeded {
            ctx.with_seed(self.seed)
        } else {
            ctx
        })
    }
}

impl Default for ComputeSettings {
    fn default() -> Self {
        Self {
            accelerator: false,
            seed: Self::default_seed(),
            seeded: Self::default_seeded(),
        }
    }
}

/// Dimensions of a freshly initialised learner.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelSettings {
    #[serde(default = "ModelSettings::default_emb_size")]
    pub emb_size: usize,
    #[serde(default = "ModelSettings::default_m")]
    pub m: usize,
    #[serde(default = "ModelSettings::default_k")]
    pub k: usize,
    /// Defaults to `M * K / 2`.
    #[serde(default)]
    pub hidden_size: Option<usize>,
}

impl ModelSettings {
    fn default_emb_size() -> usize {
        300
    }

    fn default_m() -> usize {
        32
    }

    fn default_k() -> usize {
        16
    }

    pub fn shape(&self) -> Result<CodeShape> {
        Ok(CodeShape::new(self.emb_size, self.m, self.k, self.hidden_size)?)
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            emb_size: Self::default_emb_size(),
            m: Self::default_m(),
            k: Self::default_k(),
            hidden_size: None,
        }
    }
}

/// How the inference commands discretise codes.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CodingSettings {
    /// `hard` (default) picks the argmax of a fresh noise-perturbed sample, so repeated runs
    /// may differ; `deterministic` picks the argmax of `alpha` and always repeats.
    #[serde(default = "CodingSettings::default_mode")]
    pub mode: EncodeMode,
    #[serde(default)]
    pub options: EncodeOptions,
    #[serde(default = "CodingSettings::default_batch_size")]
    pub batch_size: usize,
}

impl CodingSettings {
    fn default_mode() -> EncodeMode {
        EncodeMode::Hard
    }

    fn default_batch_size() -> usize {
        512
    }
}

impl Default for CodingSettings {
    fn default() -> Self {
        Self {
            mode: Self::default_mode(),
            options: EncodeOptions::default(),
            batch_size: Self::default_batch_size(),
        }
    }
}

/// Settings driving the `train` command.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrainSettings {
    /// GloVe-style text embeddings to reproduce.
    #[serde(default = "TrainSettings::default_embeddings")]
    pub embeddings: PathBuf,
    /// Final checkpoint, holding the best weights seen during training.
    #[serde(default = "TrainSettings::default_checkpoint")]
    pub checkpoint: PathBuf,
    /// Per-epoch statistics as JSON.
    #[serde(default = "TrainSettings::default_report")]
    pub report: Option<PathBuf>,
    /// Flamegraph destination; the CPU profiler only runs when set.
    #[serde(default)]
    pub profile_output: Option<PathBuf>,
    #[serde(default)]
    pub compute: ComputeSettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub trainer: TrainerConfig,
}

impl TrainSettings {
    fn default_embeddings() -> PathBuf {
        PathBuf::from("data/glove.42B.300d.txt")
    }

    fn default_checkpoint() -> PathBuf {
        PathBuf::from("checkpoints/code_learner.safetensors")
    }

    fn default_report() -> Option<PathBuf> {
        Some(PathBuf::from("reports/train_report.json"))
    }
}

impl Default for TrainSettings {
    fn default() -> Self {
        Self {
            embeddings: Self::default_embeddings(),
            checkpoint: Self::default_checkpoint(),
            report: Self::default_report(),
            profile_output: None,
            compute: ComputeSettings::default(),
            model: ModelSettings::default(),
            trainer: TrainerConfig::default(),
        }
    }
}

/// Which rows the assembled table holds for words found in the embeddings.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TableSource {
    #[default]
    Coded,
    Baseline,
}

impl From<TableSource> for TableKind {
    fn from(source: TableSource) -> Self {
        match source {
            TableSource::Coded => TableKind::Coded,
            TableSource::Baseline => TableKind::Baseline,
        }
    }
}

/// Settings for the `assemble` command.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AssembleSettings {
    /// Learner checkpoint; unused for baseline tables.
    #[serde(default = "AssembleSettings::default_checkpoint")]
    pub checkpoint: PathBuf,
    #[serde(default = "AssembleSettings::default_embeddings")]
    pub embeddings: PathBuf,
    /// Newline separated task vocabulary; `<unk>` and `<pad>` are prepended.
    #[serde(default = "AssembleSettings::default_vocabulary")]
    pub vocabulary: PathBuf,
    #[serde(default = "AssembleSettings::default_output")]
    pub output: PathBuf,
    #[serde(default)]
    pub source: TableSource,
    /// Half-width of the uniform range used for words without an embedding.
    #[serde(default = "AssembleSettings::default_init_range")]
    pub init_range: f32,
    #[serde(default)]
    pub profile_output: Option<PathBuf>,
    #[serde(default)]
    pub compute: ComputeSettings,
    #[serde(default)]
    pub coding: CodingSettings,
}

impl AssembleSettings {
    fn default_checkpoint() -> PathBuf {
        TrainSettings::default_checkpoint()
    }

    fn default_embeddings() -> PathBuf {
        TrainSettings::default_embeddings()
    }

    fn default_vocabulary() -> PathBuf {
        PathBuf::from("data/vocab.txt")
    }

    fn default_output() -> PathBuf {
        PathBuf::from("tables/embedding_table.safetensors")
    }

    fn default_init_range() -> f32 {
        model_learner::TableAssembler::DEFAULT_INIT_RANGE
    }
}

impl Default for AssembleSettings {
    fn default() -> Self {
        Self {
            checkpoint: Self::default_checkpoint(),
            embeddings: Self::default_embeddings(),
            vocabulary: Self::default_vocabulary(),
            output: Self::default_output(),
            source: TableSource::default(),
            init_range: Self::default_init_range(),
            profile_output: None,
            compute: ComputeSettings::default(),
            coding: CodingSettings::default(),
        }
    }
}

/// Settings for the `export-codes` command.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExportSettings {
    #[serde(default = "ExportSettings::default_checkpoint")]
    pub checkpoint: PathBuf,
    #[serde(default = "ExportSettings::default_embeddings")]
    pub embeddings: PathBuf,
    #[serde(default = "ExportSettings::default_output")]
    pub output: PathBuf,
    #[serde(default)]
    pub profile_output: Option<PathBuf>,
    #[serde(default)]
    pub compute: ComputeSettings,
    #[serde(default)]
    pub coding: CodingSettings,
}

impl ExportSettings {
    fn default_checkpoint() -> PathBuf {
        TrainSettings::default_checkpoint()
    }

    fn default_embeddings() -> PathBuf {
        TrainSettings::default_embeddings()
    }

    fn default_output() -> PathBuf {
        PathBuf::from("codes/codebook.parquet")
    }
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            checkpoint: Self::default_checkpoint(),
            embeddings: Self::default_embeddings(),
            output: Self::default_output(),
            profile_output: None,
            compute: ComputeSettings::default(),
            coding: CodingSettings::default(),
        }
    }
}

/// Settings powering the `eval` command.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EvalSettings {
    #[serde(default = "EvalSettings::default_checkpoint")]
    pub checkpoint: PathBuf,
    #[serde(default = "EvalSettings::default_embeddings")]
    pub embeddings: PathBuf,
    /// Path where the evaluation report is written.
    #[serde(default = "EvalSettings::default_report")]
    pub report: PathBuf,
    /// Neighbours compared before and after coding.
    #[serde(default = "EvalSettings::default_neighbours")]
    pub neighbours: usize,
    #[serde(default)]
    pub profile_output: Option<PathBuf>,
    #[serde(default)]
    pub compute: ComputeSettings,
    #[serde(default)]
    pub coding: CodingSettings,
}

impl EvalSettings {
    fn default_checkpoint() -> PathBuf {
        TrainSettings::default_checkpoint()
    }

    fn default_embeddings() -> PathBuf {
        TrainSettings::default_embeddings()
    }

    fn default_report() -> PathBuf {
        PathBuf::from("reports/code_quality.txt")
    }

    fn default_neighbours() -> usize {
        10
    }
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            checkpoint: Self::default_checkpoint(),
            embeddings: Self::default_embeddings(),
            report: Self::default_report(),
            neighbours: Self::default_neighbours(),
            profile_output: None,
            compute: ComputeSettings::default(),
            coding: CodingSettings::default(),
        }
    }
}

/// Loads TOML settings for the requested command, falling back to defaults when missing.
pub fn load_settings<T>(command: &str, explicit: Option<PathBuf>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let (candidate, explicit_provided) = match explicit {
        Some(path) => (path, true),
        None => (PathBuf::from(format!("{command}.toml")), false),
    };

    if candidate.exists() {
        let raw = std::fs::read_to_string(&candidate).with_context(|| {
            format!(
                "failed to read configuration for `{command}` from {}",
                candidate.display()
            )
        })?;
        let parsed = toml::from_str(&raw).with_context(|| {
            format!(
                "failed to parse TOML configuration for `{command}` at {}",
                candidate.display()
            )
        })?;
        Ok(parsed)
    } else if explicit_provided {
        bail!(
            "configuration file for `{command}` not found at {}",
            candidate.display()
        );
    } else {
        Ok(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn load_settings_returns_default_when_missing() {
        let settings: EvalSettings =
            load_settings("eval-missing", None).expect("default settings");
        assert_eq!(settings, EvalSettings::default());
        assert_eq!(settings.coding.mode, EncodeMode::Hard);
    }

    #[test]
    fn load_settings_errors_for_missing_explicit_path() {
        let result: Result<TrainSettings> =
            load_settings("train", Some(PathBuf::from("definitely_missing.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn load_settings_parses_toml_payload() {
        let file = NamedTempFile::new().expect("temp file");
        let path = file.into_temp_path();
        std::fs::write(
            &path,
            r#"embeddings = "data/glove.6B.50d.txt"
profile_output = "profiles/demo.svg"

[model]
emb_size = 50
m = 8
k = 8

[trainer]
epochs = 3
tau_min = 0.5
"#,
        )
        .expect("write config");

        let settings: TrainSettings =
            load_settings("train", Some(path.to_path_buf())).expect("parsed settings");
        assert_eq!(settings.embeddings, PathBuf::from("data/glove.6B.50d.txt"));
        assert_eq!(
            settings.profile_output,
            Some(PathBuf::from("profiles/demo.svg"))
        );
        let shape = settings.model.shape().expect("valid shape");
        assert_eq!((shape.emb_size(), shape.m(), shape.k()), (50, 8, 8));
        assert_eq!(shape.hidden_size(), 32);
        assert_eq!(settings.trainer.epochs, 3);
        assert_eq!(settings.trainer.batch_size, TrainerConfig::default().batch_size);
        assert_eq!(settings.compute.context().unwrap().seed(), Some(42));
    }

    #[test]
    fn coding_mode_and_table_source_parse_from_snake_case() {
        let settings: AssembleSettings = toml::from_str(
            r#"source = "baseline"

[coding]
mode = "hard"
options = { tau = 0.5, eps = 1e-12 }
"#,
        )
        .expect("parsed settings");
        assert_eq!(settings.source, TableSource::Baseline);
        assert_eq!(TableKind::from(settings.source), TableKind::Baseline);
        assert_eq!(settings.coding.mode, EncodeMode::Hard);
        assert_eq!(settings.coding.options.tau, 0.5);
        assert_eq!(settings.coding.batch_size, 512);
    }

    #[test]
    fn encode_options_fill_missing_fields_from_defaults() {
        let settings: ExportSettings = toml::from_str(
            r#"[coding]
mode = "deterministic"
options = { tau = 0.5 }
"#,
        )
        .expect("parsed settings");
        assert_eq!(settings.coding.mode, EncodeMode::Deterministic);
        assert_eq!(settings.coding.options.tau, 0.5);
        assert_eq!(settings.coding.options.eps, core_codes::DEFAULT_EPS);
    }

    #[test]
    fn seeding_can_be_switched_off() {
        let settings: AssembleSettings = toml::from_str(
            r#"[compute]
seed = 7
"#,
        )
        .expect("parsed settings");
        assert_eq!(settings.compute.context().unwrap().seed(), Some(7));

        let settings: AssembleSettings = toml::from_str(
            r#"[compute]
seeded = false
"#,
        )
        .expect("parsed settings");
        assert_eq!(settings.compute.context().unwrap().seed(), None);
    }
}
