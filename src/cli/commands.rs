//! CLI Command Implementations
//!
//! Each command decodes its inputs, hands them to the orchestrator, polls for
//! progress, and writes the results back out.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::device::accelerator_summary;
use crate::dsp::CompressionParams;
use crate::engine::{export_audio, import_audio, ExportFormat};
use crate::jobs::{JobId, JobOrchestrator, JobSnapshot, JobState};

/// How often a command polls job status
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// `song.wav` → `song_compressed.wav`, optionally in another directory
pub fn default_output_path(input: &Path, out_dir: Option<&Path>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = format!("{}_compressed.wav", stem);
    match out_dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

/// Compress one file and write the result
pub async fn process_file(
    engine: &JobOrchestrator,
    input: &Path,
    output: &Path,
    params: CompressionParams,
    format: ExportFormat,
) -> anyhow::Result<JobSnapshot> {
    let audio = import_audio(input).with_context(|| format!("reading {}", input.display()))?;
    let id = engine.submit(audio, params)?;
    info!(job_id = %id, input = %input.display(), "submitted");

    let snapshot = poll_until_done(engine, id, &input.display().to_string()).await?;
    write_result(engine, &snapshot, output, format)?;
    Ok(snapshot)
}

/// Compress every `.wav` file under `dir`
///
/// All files are submitted up front; the orchestrator decides how many run at
/// once. Returns the number of files that failed.
pub async fn process_dir(
    engine: &JobOrchestrator,
    dir: &Path,
    out_dir: Option<&Path>,
    params: CompressionParams,
    format: ExportFormat,
) -> anyhow::Result<usize> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    if let Some(out) = out_dir {
        std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    }

    let inputs: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .map(|ext| ext.eq_ignore_ascii_case("wav"))
                .unwrap_or(false)
        })
        .collect();

    if inputs.is_empty() {
        println!("No WAV files found in {}", dir.display());
        return Ok(0);
    }

    let mut submitted = Vec::with_capacity(inputs.len());
    let mut failures = 0;
    for input in inputs {
        match import_audio(&input) {
            Ok(audio) => {
                let id = engine.submit(audio, params)?;
                submitted.push((input, id));
            }
            Err(e) => {
                warn!(input = %input.display(), error = %e, "skipping unreadable file");
                failures += 1;
            }
        }
    }

    for (input, id) in submitted {
        let snapshot = engine.wait(id).await?;
        let output = default_output_path(&input, out_dir);
        match write_result(engine, &snapshot, &output, format) {
            Ok(()) => println!("{} -> {}", input.display(), output.display()),
            Err(e) => {
                println!("{}: {:#}", input.display(), e);
                failures += 1;
            }
        }
        engine.reclaim(id)?;
    }

    Ok(failures)
}

/// Print accelerator and engine status
pub fn probe(engine: &JobOrchestrator) -> anyhow::Result<()> {
    println!("{}", accelerator_summary());
    println!();
    println!("{}", serde_json::to_string_pretty(&engine.health())?);
    Ok(())
}

async fn poll_until_done(engine: &JobOrchestrator, id: JobId, label: &str) -> anyhow::Result<JobSnapshot> {
    let mut stderr = std::io::stderr();
    loop {
        let snapshot = engine.status(id)?;
        write!(
            stderr,
            "\r{} [{:<8}] {:>5.1}%",
            label,
            snapshot.state.to_string(),
            snapshot.progress * 100.0
        )?;
        stderr.flush()?;
        if snapshot.state.is_terminal() {
            writeln!(stderr)?;
            return Ok(snapshot);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn write_result(
    engine: &JobOrchestrator,
    snapshot: &JobSnapshot,
    output: &Path,
    format: ExportFormat,
) -> anyhow::Result<()> {
    if snapshot.state != JobState::Completed {
        // surfaces the recorded JobError
        engine.result(snapshot.id)?;
        bail!("job {} ended in state {}", snapshot.id, snapshot.state);
    }
    let result = engine.result(snapshot.id)?;
    export_audio(&result, output, format).with_context(|| format!("writing {}", output.display()))?;

    if snapshot.degraded {
        warn!(job_id = %snapshot.id, "accelerator faulted; finished on the reference path");
    }
    info!(
        job_id = %snapshot.id,
        output = %output.display(),
        realtime_factor = snapshot.realtime_factor().unwrap_or_default(),
        fingerprint = snapshot.result_fingerprint.as_deref().unwrap_or(""),
        "result written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::device::DeviceDispatch;
    use crate::engine::signal::sine;
    use tempfile::tempdir;
    use tokio::runtime::Handle;

    fn engine() -> JobOrchestrator {
        let config = EngineConfig {
            chunk_duration_s: 0.1,
            overlap_s: 0.01,
            ..Default::default()
        };
        JobOrchestrator::with_dispatch(config, DeviceDispatch::reference(), Handle::current()).unwrap()
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("/music/song.wav"), None),
            PathBuf::from("/music/song_compressed.wav")
        );
        assert_eq!(
            default_output_path(Path::new("/music/song.wav"), Some(Path::new("/out"))),
            PathBuf::from("/out/song_compressed.wav")
        );
    }

    #[tokio::test]
    async fn test_process_file_writes_output() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("tone.wav");
        let output = dir.path().join("tone_out.wav");
        let tone = sine(1000.0, -6.0, 0.3, 8000, 2).unwrap();
        export_audio(&tone, &input, ExportFormat::new(32)).unwrap();

        let engine = engine();
        let snapshot = process_file(&engine, &input, &output, CompressionParams::default(), ExportFormat::new(32))
            .await
            .unwrap();

        assert_eq!(snapshot.state, JobState::Completed);
        let written = import_audio(&output).unwrap();
        assert_eq!(written.len(), tone.len());
        assert!(written.rms_db(0) < tone.rms_db(0) - 3.0);
    }

    #[tokio::test]
    async fn test_process_dir() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        for name in ["a.wav", "b.WAV"] {
            let tone = sine(440.0, -3.0, 0.1, 8000, 1).unwrap();
            export_audio(&tone, &dir.path().join(name), ExportFormat::default()).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "not audio").unwrap();

        let failures = process_dir(&engine(), dir.path(), Some(&out), CompressionParams::default(), ExportFormat::default())
            .await
            .unwrap();

        assert_eq!(failures, 0);
        assert!(out.join("a_compressed.wav").exists());
        assert!(out.join("b_compressed.wav").exists());
    }

    #[tokio::test]
    async fn test_process_dir_rejects_files() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("x.wav");
        std::fs::write(&file, b"").unwrap();
        assert!(process_dir(&engine(), &file, None, CompressionParams::default(), ExportFormat::default())
            .await
            .is_err());
    }
}
