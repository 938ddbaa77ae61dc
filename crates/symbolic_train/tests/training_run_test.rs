use std::fs;
use std::io;
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use symbolic_train::logging::setup_logging;
use symbolic_train::train::checkpoint::{read_manifest, CheckpointError};
use symbolic_train::train::session::run_with;
use symbolic_train::train::{run, TrainArgs};
use tempfile::tempdir;

const STORY: &str = "the cat sat on the mat and the dog ran to the park.";

fn write_dataset(dir: &Path) -> Result<String> {
    let path = dir.join("stories.txt");
    let body = (0..24)
        .map(|i| format!("{STORY} story {i}."))
        .collect::<Vec<_>>()
        .join("\n\n");
    fs::write(&path, body)?;
    Ok(path.display().to_string())
}

fn tiny_args(dataset: &str, output_dir: &Path, extra: &[&str]) -> TrainArgs {
    let output = output_dir.display().to_string();
    let mut argv = vec![
        "train_symbolic",
        "--dataset",
        dataset,
        "--tokenizer-type",
        "character",
        "--preset",
        "tiny",
        "--n-layer",
        "1",
        "--n-head",
        "2",
        "--block-size",
        "8",
        "--batch-size",
        "8",
        "--dropout",
        "0.0",
        "--log-interval",
        "1",
        "--device",
        "cpu",
        "--generation-max-len",
        "4",
        "--output-dir",
        &output,
    ];
    if !extra.contains(&"--n-embd") {
        argv.extend_from_slice(&["--n-embd", "8"]);
    }
    argv.extend_from_slice(extra);
    TrainArgs::parse_from(argv)
}

#[test]
fn test_fresh_run_then_resume_continues_epoch_numbering() -> Result<()> {
    let dir = tempdir()?;
    let dataset = write_dataset(dir.path())?;
    let out_dir = dir.path().join("out");
    let logs_dir = out_dir.join("logs");
    fs::create_dir_all(&logs_dir)?;

    // Fresh run: 2 epochs.
    let args = tiny_args(&dataset, &out_dir, &["--num-epochs", "2", "--skip-generation"]);
    let summary = run_with(&args, &logs_dir, "run1", &mut io::sink())?;
    assert_eq!(summary.start_epoch, 0);
    assert_eq!(summary.training_result.epochs_completed, 2);
    for epoch in 0..2 {
        let manifest = read_manifest(&out_dir.join(format!("checkpoint_epoch_{epoch}.json")))?;
        assert_eq!(manifest.epoch, Some(epoch));
    }
    let final_manifest = read_manifest(&summary.model_path)?;
    assert_eq!(summary.model_path, out_dir.join("symbolic_model.json"));
    assert_eq!(final_manifest.epoch, Some(1));
    assert_eq!(
        final_manifest.training_result.map(|r| r.epochs_completed),
        Some(2)
    );
    assert!(final_manifest.tokenizer.is_some());

    // Resume to 4 epochs from the last per-epoch checkpoint.
    let resume_from = out_dir.join("checkpoint_epoch_1.json").display().to_string();
    let args = tiny_args(
        &dataset,
        &out_dir,
        &[
            "--num-epochs",
            "4",
            "--skip-generation",
            "--resume-from-checkpoint",
            &resume_from,
        ],
    );
    let summary = run_with(&args, &logs_dir, "run2", &mut io::sink())?;
    assert_eq!(summary.start_epoch, 2);
    assert_eq!(summary.training_result.epochs_completed, 2);
    for epoch in 2..4 {
        let manifest = read_manifest(&out_dir.join(format!("checkpoint_epoch_{epoch}.json")))?;
        assert_eq!(manifest.epoch, Some(epoch));
    }
    assert!(!out_dir.join("checkpoint_epoch_4.json").exists());
    assert_eq!(read_manifest(&summary.model_path)?.epoch, Some(3));
    Ok(())
}

#[test]
fn test_resume_past_configured_epochs_trains_nothing() -> Result<()> {
    let dir = tempdir()?;
    let dataset = write_dataset(dir.path())?;
    let out_dir = dir.path().join("out");
    let logs_dir = out_dir.join("logs");
    fs::create_dir_all(&logs_dir)?;

    let args = tiny_args(&dataset, &out_dir, &["--num-epochs", "1", "--skip-generation"]);
    run_with(&args, &logs_dir, "run1", &mut io::sink())?;

    let resume_from = out_dir.join("checkpoint_epoch_0.json").display().to_string();
    let args = tiny_args(
        &dataset,
        &out_dir,
        &[
            "--num-epochs",
            "1",
            "--skip-generation",
            "--resume-from-checkpoint",
            &resume_from,
        ],
    );
    let summary = run_with(&args, &logs_dir, "run2", &mut io::sink())?;
    assert_eq!(summary.start_epoch, 1);
    assert_eq!(summary.training_result.epochs_completed, 0);
    assert_eq!(summary.training_result.final_loss, 0.0);
    assert_eq!(summary.training_result.training_time, 0.0);
    assert!(!out_dir.join("checkpoint_epoch_1.json").exists());
    Ok(())
}

#[test]
fn test_final_model_keeps_restored_epoch_when_fewer_epochs_requested() -> Result<()> {
    let dir = tempdir()?;
    let dataset = write_dataset(dir.path())?;
    let out_dir = dir.path().join("out");
    let logs_dir = out_dir.join("logs");
    fs::create_dir_all(&logs_dir)?;

    let args = tiny_args(&dataset, &out_dir, &["--num-epochs", "4", "--skip-generation"]);
    run_with(&args, &logs_dir, "run1", &mut io::sink())?;

    let resume_from = out_dir.join("checkpoint_epoch_3.json").display().to_string();
    let args = tiny_args(
        &dataset,
        &out_dir,
        &[
            "--num-epochs",
            "2",
            "--skip-generation",
            "--resume-from-checkpoint",
            &resume_from,
        ],
    );
    let summary = run_with(&args, &logs_dir, "run2", &mut io::sink())?;
    assert_eq!(summary.start_epoch, 4);
    assert_eq!(summary.training_result.epochs_completed, 0);

    // The weights went through epoch 3, so the final manifest says so.
    let final_manifest = read_manifest(&summary.model_path)?;
    assert_eq!(final_manifest.epoch, Some(3));
    assert_eq!(final_manifest.loss, None);
    Ok(())
}

#[test]
fn test_generation_checks_write_transcript() -> Result<()> {
    let dir = tempdir()?;
    let dataset = write_dataset(dir.path())?;
    let out_dir = dir.path().join("out");
    let logs_dir = out_dir.join("logs");
    fs::create_dir_all(&logs_dir)?;

    let args = tiny_args(&dataset, &out_dir, &["--num-epochs", "1", "--test-generation"]);
    let mut console = Vec::new();
    let summary = run_with(&args, &logs_dir, "gen", &mut console)?;

    let transcript = summary.interpretability_log.expect("transcript written");
    assert_eq!(transcript, logs_dir.join("symbolic_interpretability_gen.log"));
    let text = fs::read_to_string(transcript)?;
    assert_eq!(text.matches("Generating 20 tokens:").count(), 3);

    let console = String::from_utf8(console)?;
    assert!(console.contains("SYMBOLIC TRANSFORMER TRAINING COMPLETED!"));
    assert!(console.contains("TESTING SYMBOLIC INTERPRETABILITY"));
    Ok(())
}

#[test]
fn test_resume_with_other_architecture_is_fatal() -> Result<()> {
    let dir = tempdir()?;
    let dataset = write_dataset(dir.path())?;
    let out_dir = dir.path().join("out");
    let logs_dir = out_dir.join("logs");
    fs::create_dir_all(&logs_dir)?;

    let args = tiny_args(&dataset, &out_dir, &["--num-epochs", "1", "--skip-generation"]);
    run_with(&args, &logs_dir, "run1", &mut io::sink())?;

    let resume_from = out_dir.join("checkpoint_epoch_0.json").display().to_string();
    let args = tiny_args(
        &dataset,
        &out_dir,
        &[
            "--num-epochs",
            "2",
            "--skip-generation",
            "--n-embd",
            "16",
            "--resume-from-checkpoint",
            &resume_from,
        ],
    );
    let err = run_with(&args, &logs_dir, "run2", &mut io::sink()).unwrap_err();
    let checkpoint_err = err
        .downcast_ref::<CheckpointError>()
        .expect("checkpoint error");
    assert!(checkpoint_err.is_fatal());
    Ok(())
}

#[test]
fn test_missing_text_column_aborts() -> Result<()> {
    let dir = tempdir()?;
    let dataset = dir.path().join("records.jsonl");
    fs::write(&dataset, "{\"id\": 1, \"score\": 2}\n{\"id\": 2, \"score\": 3}\n")?;
    let out_dir = dir.path().join("out");
    let logs_dir = out_dir.join("logs");
    fs::create_dir_all(&logs_dir)?;

    let args = tiny_args(
        &dataset.display().to_string(),
        &out_dir,
        &["--num-epochs", "1", "--skip-generation"],
    );
    let err = run_with(&args, &logs_dir, "bad", &mut io::sink()).unwrap_err();
    assert!(err.to_string().contains("Could not find text column"));
    assert!(!out_dir.join("symbolic_model.json").exists());
    Ok(())
}

#[test]
fn test_session_run_mirrors_console_into_output_log() -> Result<()> {
    let dir = tempdir()?;
    let dataset = write_dataset(dir.path())?;
    let out_dir = dir.path().join("out");
    let mut session = setup_logging(&out_dir)?;

    let args = tiny_args(&dataset, &out_dir, &["--num-epochs", "1", "--skip-generation"]);
    run(&args, &mut session)?;

    let mirror = fs::read_to_string(session.tee.path())?;
    assert!(mirror.contains(&format!(
        "Console output log:        {}",
        session.tee.path().display()
    )));
    assert!(mirror.contains("SYMBOLIC TRANSFORMER TRAINING COMPLETED!"));
    Ok(())
}
