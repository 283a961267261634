use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use texproject_core::ProjectClient;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::{ServerConfig, UploadConfig};
use crate::upload::{
    Admission, BatchReport, BatchState, ConflictDecision, ConflictSet, FileStatus,
    FileTreeSnapshot, FolderId, HttpEffects, HttpTransport, PendingFile, ProjectTree,
    UploadCoordinator, UploadEvent,
};

#[derive(Debug, Parser)]
#[command(name = "texupload", about = "Upload files and folders into an editor project")]
pub struct Args {
    /// Project id; falls back to TEXUPLOAD_PROJECT_ID.
    #[arg(long)]
    pub project: Option<String>,
    /// Target folder id; defaults to the project root.
    #[arg(long)]
    pub folder: Option<String>,
    /// Project tree JSON used to detect name conflicts.
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
    /// Overwrite conflicting entries without asking.
    #[arg(long, conflicts_with = "cancel_on_conflict")]
    pub overwrite: bool,
    /// Give up without asking when anything conflicts.
    #[arg(long)]
    pub cancel_on_conflict: bool,
    #[arg(long)]
    pub max_file_size: Option<u64>,
    #[arg(long)]
    pub concurrency: Option<usize>,
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

/// Turns command-line paths into pending files.
///
/// Directories are walked; their files carry a relative path rooted at the
/// directory name, like a folder dropped onto the tree.
pub fn collect_files(paths: &[PathBuf]) -> anyhow::Result<Vec<PendingFile>> {
    let mut files = Vec::new();
    for path in paths {
        let metadata =
            std::fs::metadata(path).with_context(|| format!("cannot read {}", path.display()))?;
        if metadata.is_file() {
            files.push(PendingFile::from_path(
                file_name(path)?,
                path.clone(),
                metadata.len(),
            ));
            continue;
        }

        let root_name = file_name(path)?;
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let inner = entry.path().strip_prefix(path)?;
            let mut relative = root_name.clone();
            for component in inner.components() {
                relative.push('/');
                relative.push_str(&component.as_os_str().to_string_lossy());
            }
            let size = entry.metadata()?.len();
            files.push(
                PendingFile::from_path(file_name(entry.path())?, entry.path().to_path_buf(), size)
                    .with_relative_path(relative),
            );
        }
    }
    Ok(files)
}

fn file_name(path: &Path) -> anyhow::Result<String> {
    let name = path
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .with_context(|| format!("{} has no file name", path.display()))?;
    Ok(name)
}

pub fn describe_conflicts(conflicts: &ConflictSet) -> Vec<String> {
    let mut lines = Vec::new();
    for entity in conflicts.file_conflicts() {
        lines.push(format!("file already exists: {}", entity.name));
    }
    for entity in conflicts.folder_conflicts() {
        lines.push(format!("folder already exists: {}", entity.name));
    }
    lines
}

/// Prints the conflicts and reads a yes/no answer; anything but yes cancels.
pub fn ask_overwrite<R: BufRead, W: Write>(
    conflicts: &ConflictSet,
    mut input: R,
    mut output: W,
) -> io::Result<ConflictDecision> {
    for line in describe_conflicts(conflicts) {
        writeln!(output, "  {line}")?;
    }
    write!(output, "Overwrite? [y/N] ")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ConflictDecision::Overwrite,
        _ => ConflictDecision::Cancel,
    })
}

pub async fn run(args: Args) -> anyhow::Result<BatchReport> {
    let server = ServerConfig::from_env()?;
    let mut config = UploadConfig::from_env();
    if let Some(max) = args.max_file_size {
        config.max_file_size = Some(max);
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency_limit = concurrency.max(1);
    }

    let project_id = args
        .project
        .clone()
        .or(server.project_id.clone())
        .context("no project id: pass --project or set TEXUPLOAD_PROJECT_ID")?;
    let tree = match &args.snapshot {
        Some(path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("cannot read snapshot {}", path.display()))?;
            ProjectTree::from_json(&json).context("snapshot is not a project tree")?
        }
        None => ProjectTree::new(args.folder.clone().unwrap_or_default()),
    };
    let default_folder = args
        .folder
        .clone()
        .map(FolderId::new)
        .unwrap_or_else(|| tree.root_folder_id());

    let client = ProjectClient::with_base_url(&server.base_url, server.csrf_token.clone())?;
    let effects = Arc::new(HttpEffects::new(client.clone(), project_id.clone()));
    let mut coordinator = UploadCoordinator::new(
        config,
        Arc::new(HttpTransport::new(client, project_id.clone())),
        default_folder.clone(),
    )
    .with_telemetry(effects.clone())
    .with_metadata_refresher(effects);

    let files = collect_files(&args.paths)?;
    info!(project = %project_id, folder = %default_folder, files = files.len(), "uploading");
    let admission = admit_and_start(&mut coordinator, files, &tree)?;
    if admission.filtered > 0 {
        println!("skipped {} system file(s)", admission.filtered);
    }

    if admission.state == BatchState::AwaitingConflictResolution {
        println!("Some uploads collide with existing entries:");
        let decision = if args.overwrite {
            ConflictDecision::Overwrite
        } else if args.cancel_on_conflict {
            ConflictDecision::Cancel
        } else {
            let conflicts = coordinator.conflicts().clone();
            tokio::task::spawn_blocking(move || {
                ask_overwrite(&conflicts, io::stdin().lock(), io::stdout())
            })
            .await??
        };
        coordinator.resolve(decision)?;
    }

    while let Some(event) = coordinator.next_event().await {
        match event {
            UploadEvent::FileSent { index } => debug!(index, "sent"),
            UploadEvent::FileSucceeded { index, .. } => {
                if let Some(file) = coordinator.files().get(index) {
                    println!("uploaded {}", display_name(file));
                }
            }
            UploadEvent::FileFailed { index, error } => {
                if let Some(file) = coordinator.files().get(index) {
                    println!("failed {}: {error}", display_name(file));
                }
            }
            UploadEvent::Finished(_) => {}
        }
    }
    Ok(coordinator.report())
}

/// Admits the files and starts the batch when auto-start left it staged.
pub fn admit_and_start(
    coordinator: &mut UploadCoordinator,
    files: Vec<PendingFile>,
    tree: &dyn FileTreeSnapshot,
) -> anyhow::Result<Admission> {
    let offered = files.len();
    let mut admission = coordinator.admit(files, tree)?;
    if admission.accepted == 0 {
        anyhow::bail!("nothing to upload: all {offered} file(s) were filtered out");
    }
    if admission.state == BatchState::Admitting {
        debug!("auto-start disabled, starting batch explicitly");
        admission.state = coordinator.start(tree)?;
    }
    Ok(admission)
}

fn display_name(file: &PendingFile) -> &str {
    file.relative_path.as_deref().unwrap_or(&file.name)
}

pub fn summarize(report: &BatchReport) -> String {
    let skipped = report
        .files
        .iter()
        .filter(|f| f.status == FileStatus::Skipped)
        .count();
    let mut summary = format!(
        "{}: {} uploaded, {} failed, {} skipped",
        report.state,
        report.succeeded(),
        report.failed(),
        skipped
    );
    if let Some(error) = &report.current_error {
        summary.push_str(&format!(" (last error: {error})"));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::{FileReport, UploadError, UploadOutcome};
    use texproject_core::EntityType;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn staged_coordinator(base_url: &str) -> UploadCoordinator {
        let config = UploadConfig {
            auto_start: false,
            ..UploadConfig::default()
        };
        let client = ProjectClient::with_base_url(base_url, "csrf").unwrap();
        UploadCoordinator::new(
            config,
            Arc::new(HttpTransport::new(client, "p1")),
            FolderId::new("root"),
        )
    }

    #[test]
    fn parses_flags_and_paths() {
        let args = Args::try_parse_from([
            "texupload",
            "--project",
            "p1",
            "--overwrite",
            "main.tex",
            "figures",
        ])
        .unwrap();
        assert_eq!(args.project.as_deref(), Some("p1"));
        assert!(args.overwrite);
        assert_eq!(args.paths.len(), 2);
    }

    #[test]
    fn overwrite_and_cancel_flags_conflict() {
        assert!(
            Args::try_parse_from(["texupload", "--overwrite", "--cancel-on-conflict", "a.tex"])
                .is_err()
        );
        assert!(Args::try_parse_from(["texupload"]).is_err());
    }

    #[test]
    fn collects_loose_files_and_folder_contents() {
        let dir = tempfile::tempdir().unwrap();
        let loose = dir.path().join("main.tex");
        std::fs::write(&loose, b"\\begin{document}").unwrap();
        let proj = dir.path().join("thesis");
        std::fs::create_dir_all(proj.join("chapters")).unwrap();
        std::fs::write(proj.join("refs.bib"), b"@book{}").unwrap();
        std::fs::write(proj.join("chapters/intro.tex"), b"intro").unwrap();

        let files = collect_files(&[loose, proj]).unwrap();
        let described: Vec<(String, Option<String>, u64)> = files
            .iter()
            .map(|f| (f.name.clone(), f.relative_path.clone(), f.size_bytes))
            .collect();
        assert_eq!(
            described,
            vec![
                ("main.tex".to_string(), None, 16),
                (
                    "intro.tex".to_string(),
                    Some("thesis/chapters/intro.tex".to_string()),
                    5
                ),
                (
                    "refs.bib".to_string(),
                    Some("thesis/refs.bib".to_string()),
                    7
                ),
            ]
        );
    }

    #[test]
    fn missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_files(&[dir.path().join("nope.tex")]).is_err());
    }

    #[test]
    fn prompt_accepts_yes_only() {
        let tree = ProjectTree::new("root").with_doc("root", "d1", "a.tex");
        let candidates = [PendingFile::from_bytes("a.tex", vec![])];
        let conflicts = crate::upload::detect(&candidates, &tree, &tree.root_folder_id());

        let mut out = Vec::new();
        let decision = ask_overwrite(&conflicts, &b"y\n"[..], &mut out).unwrap();
        assert_eq!(decision, ConflictDecision::Overwrite);
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("file already exists: a.tex"));

        let decision = ask_overwrite(&conflicts, &b"\n"[..], Vec::new()).unwrap();
        assert_eq!(decision, ConflictDecision::Cancel);
    }

    #[tokio::test]
    async fn staged_batch_is_started_after_admission() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/project/p1/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "entity_id": "e1",
                "entity_type": "file"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut coordinator = staged_coordinator(&server.uri());
        let admission = admit_and_start(
            &mut coordinator,
            vec![PendingFile::from_bytes("logo.png", vec![1, 2, 3])],
            &ProjectTree::new("root"),
        )
        .unwrap();
        assert_eq!(admission.state, BatchState::Uploading);

        let report = coordinator.run_to_completion().await;
        assert_eq!(report.state, BatchState::Completed);
    }

    #[tokio::test]
    async fn staged_batch_still_stops_on_conflicts() {
        let mut coordinator = staged_coordinator("http://127.0.0.1:9");
        let tree = ProjectTree::new("root").with_doc("root", "d1", "a.tex");
        let admission = admit_and_start(
            &mut coordinator,
            vec![PendingFile::from_bytes("a.tex", vec![])],
            &tree,
        )
        .unwrap();
        assert_eq!(admission.state, BatchState::AwaitingConflictResolution);
        assert_eq!(coordinator.conflicts().len(), 1);
    }

    #[tokio::test]
    async fn fully_filtered_input_is_an_error() {
        let mut coordinator = staged_coordinator("http://127.0.0.1:9");
        let result = admit_and_start(
            &mut coordinator,
            vec![PendingFile::from_bytes(".DS_Store", vec![])],
            &ProjectTree::new("root"),
        );
        assert!(result.is_err());
        assert_eq!(coordinator.state(), BatchState::Admitting);
    }

    #[test]
    fn summary_mentions_last_error() {
        let report = BatchReport {
            state: BatchState::FinishedWithErrors,
            files: vec![
                FileReport {
                    name: "a.tex".into(),
                    relative_path: None,
                    status: FileStatus::Done(UploadOutcome::Success {
                        entity_id: "e1".into(),
                        entity_type: EntityType::Doc,
                    }),
                },
                FileReport {
                    name: "b.tex".into(),
                    relative_path: None,
                    status: FileStatus::Done(UploadOutcome::Failure {
                        reason: UploadError::RateLimited,
                    }),
                },
            ],
            current_error: Some(UploadError::RateLimited),
            close_requested: false,
        };
        assert_eq!(
            summarize(&report),
            "finished with errors: 1 uploaded, 1 failed, 0 skipped (last error: rate-limit-hit)"
        );
    }
}
