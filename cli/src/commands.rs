use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use datasets::{Vocabulary, read_text_embeddings, read_word_list};
use evalbench::evaluate_codes;
use model_enc::EmbeddingTable;
use model_learner::{CodeLearner, Codebook, TableAssembler, TableKind};
use pprof::ProfilerGuard;
use tracing::info;
use trainer::{ReconstructionTrainer, TrainingReport};

use crate::config::{
    AssembleSettings, EvalSettings, ExportSettings, TrainSettings, load_settings,
};
use crate::telemetry::{init_telemetry, write_profile};

pub fn run_train(config_path: Option<PathBuf>) -> Result<()> {
    let settings = load_settings::<TrainSettings>("train", config_path)?;
    let profiler_guard = init_telemetry(settings.profile_output.is_some());
    info!(?settings.model, ?settings.trainer, "training configuration");

    let table = load_embeddings(&settings.embeddings)?;
    let shape = settings.model.shape()?;
    ensure!(
        table.dimension() == shape.emb_size(),
        "{} holds {}-dimensional embeddings but the model expects emb_size = {}",
        settings.embeddings.display(),
        table.dimension(),
        shape.emb_size()
    );

    let ctx = settings.compute.context()?;
    let learner = CodeLearner::new(shape, &ctx)?;
    let trainer = ReconstructionTrainer::new(settings.trainer.clone())?;
    let report = trainer.fit(&learner, &table)?;

    if let Some(best) = &report.best_checkpoint {
        learner
            .load_into(best)
            .with_context(|| format!("failed to restore best checkpoint {}", best.display()))?;
        info!(path = %best.display(), "restored best checkpoint");
    }
    ensure_parent(&settings.checkpoint)?;
    learner
        .save(&settings.checkpoint)
        .with_context(|| format!("failed to write {}", settings.checkpoint.display()))?;
    println!("Training summary:\n{}", render_training(&report));
    println!("Checkpoint written to {}", settings.checkpoint.display());

    if let Some(report_path) = &settings.report {
        let body = serde_json::to_string_pretty(&report)?;
        write_text_file(report_path, &body)?;
        println!("Training report written to {}", report_path.display());
    }

    finish_profile(profiler_guard, settings.profile_output.as_deref())
}

pub fn run_assemble(config_path: Option<PathBuf>) -> Result<()> {
    let settings = load_settings::<AssembleSettings>("assemble", config_path)?;
    let profiler_guard = init_telemetry(settings.profile_output.is_some());

    let source = load_embeddings(&settings.embeddings)?;
    let words = read_word_list(&settings.vocabulary).with_context(|| {
        format!(
            "failed to read vocabulary from {}",
            settings.vocabulary.display()
        )
    })?;
    let vocab = Vocabulary::from_words(words);
    let ctx = settings.compute.context()?;
    let assembler = TableAssembler::new(&ctx)
        .with_init_range(settings.init_range)
        .with_batch_size(settings.coding.batch_size);

    let kind = TableKind::from(settings.source);
    let table = match kind {
        TableKind::Baseline => assembler.assemble_baseline(vocab.words(), &source),
        TableKind::Coded => {
            let learner = load_learner(&settings.checkpoint, &ctx)?;
            assembler.assemble_coded(
                vocab.words(),
                &source,
                &learner,
                &settings.coding.options,
                settings.coding.mode,
            )?
        }
    };
    info!(
        kind = kind.as_str(),
        words = table.rows(),
        hits = table.hits(),
        misses = table.misses(),
        "embedding table assembled"
    );

    ensure_parent(&settings.output)?;
    table
        .to_snapshot(kind)?
        .write(&settings.output)
        .with_context(|| format!("failed to write {}", settings.output.display()))?;
    println!(
        "{} table with {} rows ({} found, {} random) written to {}",
        kind.as_str(),
        table.rows(),
        table.hits(),
        table.misses(),
        settings.output.display()
    );

    finish_profile(profiler_guard, settings.profile_output.as_deref())
}

pub fn run_export_codes(config_path: Option<PathBuf>) -> Result<()> {
    let settings = load_settings::<ExportSettings>("export-codes", config_path)?;
    let profiler_guard = init_telemetry(settings.profile_output.is_some());

    let ctx = settings.compute.context()?;
    let learner = load_learner(&settings.checkpoint, &ctx)?;
    let source = load_embeddings(&settings.embeddings)?;
    let codebook = Codebook::build(
        &learner,
        &source,
        &settings.coding.options,
        settings.coding.mode,
        settings.coding.batch_size,
    )?;

    ensure_parent(&settings.output)?;
    codebook
        .write(&settings.output)
        .with_context(|| format!("failed to write {}", settings.output.display()))?;
    println!(
        "{} codes of {}x{} written to {} ({} shared)",
        codebook.len(),
        codebook.m(),
        codebook.k(),
        settings.output.display(),
        codebook.collisions()
    );

    finish_profile(profiler_guard, settings.profile_output.as_deref())
}

pub fn run_eval(config_path: Option<PathBuf>) -> Result<()> {
    let settings = load_settings::<EvalSettings>("eval", config_path)?;
    let profiler_guard = init_telemetry(settings.profile_output.is_some());

    let ctx = settings.compute.context()?;
    let learner = load_learner(&settings.checkpoint, &ctx)?;
    let table = load_embeddings(&settings.embeddings)?;
    let report = evaluate_codes(
        &learner,
        &table,
        &settings.coding.options,
        settings.coding.mode,
        settings.neighbours,
    )?;
    let report_text = report.render();
    println!("Code quality:\n{report_text}");

    let report_body = format!("# Code quality\n{report_text}");
    write_text_file(&settings.report, &report_body)?;
    println!("Evaluation report written to {}", settings.report.display());

    finish_profile(profiler_guard, settings.profile_output.as_deref())
}

fn load_embeddings(path: &Path) -> Result<EmbeddingTable> {
    read_text_embeddings(path)
        .with_context(|| format!("failed to load embeddings from {}", path.display()))
}

fn load_learner(path: &Path, ctx: &core_codes::ComputeContext) -> Result<CodeLearner> {
    let learner = CodeLearner::load(path, ctx)
        .with_context(|| format!("failed to load checkpoint {}", path.display()))?;
    let shape = learner.shape();
    info!(
        path = %path.display(),
        emb_size = shape.emb_size(),
        m = shape.m(),
        k = shape.k(),
        "checkpoint loaded"
    );
    Ok(learner)
}

fn render_training(report: &TrainingReport) -> String {
    let mut lines = vec![format!("steps = {}", report.steps)];
    if let Some(last) = report.final_epoch() {
        lines.push(format!("epochs = {}", last.epoch));
        lines.push(format!("final_train_loss = {:.6}", last.train_loss));
        if let Some(loss) = last.validation_loss {
            lines.push(format!("final_validation_loss = {loss:.6}"));
        }
        lines.push(format!("final_tau = {:.4}", last.tau));
    }
    if let (Some(epoch), Some(loss)) = (report.best_epoch, report.best_loss) {
        lines.push(format!("best = epoch {epoch} ({loss:.6})"));
    }
    lines.join("\n")
}

fn finish_profile(guard: Option<ProfilerGuard<'static>>, output: Option<&Path>) -> Result<()> {
    if let (Some(guard), Some(profile_path)) = (guard, output) {
        ensure_parent(profile_path)?;
        write_profile(guard, profile_path);
        println!("CPU profile written to {}", profile_path.display());
    }
    Ok(())
}

fn write_text_file(path: &Path, contents: &str) -> Result<()> {
    ensure_parent(path)?;
    let mut body = contents.to_string();
    if !body.ends_with('\n') {
        body.push('\n');
    }
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_learner::{CheckpointSchema, EmbeddingSnapshot};
    use tempfile::tempdir;

    const EMBEDDINGS: &str = "\
great 0.9 0.1 -0.3 0.4
awful -0.8 0.3 0.5 -0.1
film 0.0 -0.5 0.2 0.2
plot 0.3 0.3 -0.6 0.1
actor -0.2 0.7 0.1 -0.4
";

    fn write_config(dir: &Path, name: &str, body: String) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn commands_chain_from_training_to_evaluation() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let embeddings = root.join("vectors.txt");
        fs::write(&embeddings, EMBEDDINGS).unwrap();
        fs::write(root.join("vocab.txt"), "great\nfilm\nunseen\n").unwrap();
        let checkpoint = root.join("out/learner.safetensors");
        let root_str = root.display();

        let train = write_config(
            root,
            "train.toml",
            format!(
                r#"embeddings = "{root_str}/vectors.txt"
checkpoint = "{root_str}/out/learner.safetensors"
report = "{root_str}/out/report.json"

[model]
emb_size = 4
m = 2
k = 3

[trainer]
epochs = 2
batch_size = 2
validation_fraction = 0.0
checkpoint_dir = "{root_str}/out/epochs"
"#
            ),
        );
        run_train(Some(train)).unwrap();
        assert_eq!(CheckpointSchema::read(&checkpoint).unwrap().shape.m(), 2);
        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(root.join("out/report.json")).unwrap())
                .unwrap();
        assert_eq!(report["epochs"].as_array().unwrap().len(), 2);

        let assemble = write_config(
            root,
            "assemble.toml",
            format!(
                r#"checkpoint = "{root_str}/out/learner.safetensors"
embeddings = "{root_str}/vectors.txt"
vocabulary = "{root_str}/vocab.txt"
output = "{root_str}/out/table.safetensors"
"#
            ),
        );
        run_assemble(Some(assemble)).unwrap();
        let snapshot = EmbeddingSnapshot::read(root.join("out/table.safetensors")).unwrap();
        assert_eq!(snapshot.kind(), TableKind::Coded);
        // <unk>, <pad>, great, film, unseen
        assert_eq!((snapshot.rows(), snapshot.dims()), (5, 4));

        let export = write_config(
            root,
            "export.toml",
            format!(
                r#"checkpoint = "{root_str}/out/learner.safetensors"
embeddings = "{root_str}/vectors.txt"
output = "{root_str}/out/codes.parquet"
"#
            ),
        );
        run_export_codes(Some(export)).unwrap();
        let codebook = Codebook::read(root.join("out/codes.parquet")).unwrap();
        assert_eq!((codebook.len(), codebook.m(), codebook.k()), (5, 2, 3));

        let eval = write_config(
            root,
            "eval.toml",
            format!(
                r#"checkpoint = "{root_str}/out/learner.safetensors"
embeddings = "{root_str}/vectors.txt"
report = "{root_str}/out/quality.txt"
neighbours = 2
"#
            ),
        );
        run_eval(Some(eval)).unwrap();
        let quality = fs::read_to_string(root.join("out/quality.txt")).unwrap();
        assert!(quality.starts_with("# Code quality"));
        assert!(quality.contains("code = 2x3"));
    }

    #[test]
    fn training_rejects_embeddings_of_the_wrong_width() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("vectors.txt"), EMBEDDINGS).unwrap();
        let root_str = root.display();
        let config = write_config(
            root,
            "train.toml",
            format!(
                r#"embeddings = "{root_str}/vectors.txt"
checkpoint = "{root_str}/learner.safetensors"

[model]
emb_size = 6
"#
            ),
        );
        let err = run_train(Some(config)).unwrap_err();
        assert!(err.to_string().contains("emb_size = 6"));
        assert!(!root.join("learner.safetensors").exists());
    }
}
