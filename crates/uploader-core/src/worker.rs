//! Directory poller.
//!
//! Each cycle lists the `.mp3` files in the watch directory and pushes the
//! selected episodes through metadata → upload → normalize → write result,
//! then deletes the episode's inputs. The result is written before anything
//! is deleted, so a crash can at worst leave both behind; the next cycle sees
//! the result and consumes the inputs without uploading again.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::client::{UploadClient, UploadRequest};
use crate::episode::{EpisodeId, PendingEpisode};
use crate::error::UploadError;
use crate::metadata::{read_metadata, EpisodeMetadata};
use crate::result::{MediaKind, UploadResult};
use crate::scan::pending_audio_files;
use crate::writer::{clear_stale_temp, write_result};
use crate::{CancellationToken, CycleReport, RunSummary, ScanMode, WorkerControl, WorkerOptions};

/// What happened to an episode that went through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpisodeOutcome {
    Uploaded { kind: MediaKind, file_id: String },
    /// `<id>.txt` was already there; inputs consumed, nothing sent
    Recovered,
}

/// Memory of earlier failures, keyed by episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    /// Failed before anything was stored remotely; retried after fresh episodes.
    Retry,
    /// The upload went through but its result could not be recorded. Sending it
    /// again would duplicate it, so it waits for an operator.
    Hold,
}

/// Run one episode through the pipeline.
pub fn process_episode<C>(episode: &PendingEpisode, client: &C) -> Result<EpisodeOutcome, UploadError>
where
    C: UploadClient + ?Sized,
{
    if episode.result_path.exists() {
        clear_stale_temp(&episode.result_path);
        consume_inputs(episode);
        return Ok(EpisodeOutcome::Recovered);
    }

    let metadata = read_metadata(&episode.metadata_path)?;
    let request = UploadRequest::audio(episode.audio_path.clone(), metadata);

    tracing::info!(
        episode = %episode.id,
        title = %request.title,
        performer = %request.performer,
        "Uploading episode"
    );
    let message = client.upload(&request)?;

    let result = UploadResult::try_from(message)?;
    let kind = result.kind();
    let normalized = result.normalize()?;
    let file_id = normalized
        .file_id
        .ok_or(UploadError::MissingFileId { kind })?;

    write_result(&episode.result_path, &file_id)?;
    consume_inputs(episode);

    tracing::info!(
        episode = %episode.id,
        kind = %kind,
        file_id = %file_id,
        file_name = normalized.file_name.as_deref().unwrap_or_default(),
        file_size = normalized.file_size,
        mime_type = %normalized.mime_type,
        "Episode uploaded"
    );
    Ok(EpisodeOutcome::Uploaded { kind, file_id })
}

/// Remove the audio file and its sidecar. The result is already on disk, so a
/// failure here only means the next cycle will take the recovery path.
fn consume_inputs(episode: &PendingEpisode) {
    for path in [&episode.audio_path, &episode.metadata_path] {
        remove_input(&episode.id, path);
    }
}

/// Whether `<x>_data.txt`, the result file of `<x>_data`, is still needed as
/// the sidecar of episode `<x>`: either `<x>.mp3` is pending, or the file
/// holds a metadata line written ahead of its audio.
fn shares_live_sidecar(episode: &PendingEpisode, pending: &HashSet<&str>) -> bool {
    let Some(owner) = episode.sidecar_owner() else {
        return false;
    };
    if pending.contains(owner) {
        return true;
    }
    fs::read_to_string(&episode.result_path)
        .is_ok_and(|text| EpisodeMetadata::parse_line(&text).is_ok())
}

fn remove_input(id: &EpisodeId, path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(episode = %id, path = %path.display(), error = %e, "Failed to remove input file");
        }
    }
}

/// Single-threaded polling worker over one directory.
pub struct Worker<C> {
    options: WorkerOptions,
    client: C,
    failures: HashMap<EpisodeId, Failure>,
}

impl<C: UploadClient> Worker<C> {
    pub fn new(options: WorkerOptions, client: C) -> Self {
        Self {
            options,
            client,
            failures: HashMap::new(),
        }
    }

    /// Poll until cancelled or `max_cycles` is reached, sleeping
    /// `poll_interval` after every cycle.
    pub fn run(&mut self, control: &WorkerControl) -> RunSummary {
        tracing::info!(
            dir = %self.options.dir.display(),
            mode = %self.options.mode,
            poll_interval_ms = self.options.poll_interval.as_millis() as u64,
            max_cycles = ?control.max_cycles,
            "Worker started"
        );

        let mut summary = RunSummary::default();
        loop {
            if control.is_cancelled() || control.limit_reached(summary.cycles) {
                break;
            }

            let report = self.run_cycle(control.cancel_token.as_ref());
            summary.cycles += 1;
            summary.totals += report;

            if control.limit_reached(summary.cycles) {
                break;
            }

            let slept = match &control.cancel_token {
                Some(token) => token.sleep(self.options.poll_interval),
                None => {
                    std::thread::sleep(self.options.poll_interval);
                    true
                }
            };
            if !slept {
                break;
            }
        }

        tracing::info!(
            cycles = summary.cycles,
            uploaded = summary.totals.uploaded,
            recovered = summary.totals.recovered,
            failed = summary.totals.failed,
            "Worker stopped"
        );
        summary
    }

    /// One enumeration of the directory and the episodes it selects.
    pub fn run_cycle(&mut self, cancel_token: Option<&CancellationToken>) -> CycleReport {
        let mut report = CycleReport::default();

        let files = match pending_audio_files(&self.options.dir) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(dir = %self.options.dir.display(), error = %e, "Cannot list watch directory");
                return report;
            }
        };
        report.found = files.len() as u64;

        let mut episodes = Vec::with_capacity(files.len());
        for path in &files {
            match PendingEpisode::from_audio_path(path) {
                Ok(episode) => episodes.push(episode),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping file");
                    report.skipped += 1;
                }
            }
        }

        // Forget episodes that are gone from the directory.
        self.failures
            .retain(|id, _| episodes.iter().any(|ep| &ep.id == id));

        // `<x>_data` waits until `<x>` no longer needs `<x>_data.txt`.
        let pending: HashSet<&str> = episodes.iter().map(|ep| ep.id.as_str()).collect();
        let deferred: Vec<bool> = episodes
            .iter()
            .map(|ep| shares_live_sidecar(ep, &pending))
            .collect();
        let mut ready = Vec::with_capacity(episodes.len());
        for (episode, deferred) in episodes.into_iter().zip(deferred) {
            if deferred {
                tracing::debug!(episode = %episode.id, "Result path is another episode's sidecar, deferring");
                report.skipped += 1;
            } else if self.failures.get(&episode.id) == Some(&Failure::Hold) {
                report.skipped += 1;
            } else {
                ready.push(episode);
            }
        }

        // Episodes that failed before go after fresh ones; the sort is stable.
        ready.sort_by_key(|ep| self.failures.contains_key(&ep.id));
        if self.options.mode == ScanMode::Single {
            ready.truncate(1);
        }

        for episode in ready {
            if cancel_token.is_some_and(|t| t.is_cancelled()) {
                break;
            }

            match process_episode(&episode, &self.client) {
                Ok(EpisodeOutcome::Uploaded { .. }) => {
                    self.failures.remove(&episode.id);
                    report.uploaded += 1;
                }
                Ok(EpisodeOutcome::Recovered) => {
                    tracing::info!(episode = %episode.id, "Result already present, inputs consumed without upload");
                    self.failures.remove(&episode.id);
                    report.recovered += 1;
                }
                Err(e) => {
                    let failure = if e.is_post_upload() {
                        Failure::Hold
                    } else {
                        Failure::Retry
                    };
                    tracing::error!(
                        episode = %episode.id,
                        error = %e,
                        held = failure == Failure::Hold,
                        "Episode failed, inputs left in place"
                    );
                    self.failures.insert(episode.id.clone(), failure);
                    report.failed += 1;
                }
            }
        }

        tracing::debug!(
            found = report.found,
            uploaded = report.uploaded,
            recovered = report.recovered,
            failed = report.failed,
            skipped = report.skipped,
            "Cycle finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::time::Duration;

    use tempfile::{tempdir, TempDir};

    use crate::error::ClientError;
    use crate::result::{FileDescriptor, SentMessage};

    /// Records every request; replies from a script, then with a document
    /// whose id is derived from the uploaded file name.
    #[derive(Default)]
    struct StubClient {
        requests: RefCell<Vec<UploadRequest>>,
        script: RefCell<VecDeque<Result<SentMessage, ClientError>>>,
    }

    impl StubClient {
        fn scripted(replies: Vec<Result<SentMessage, ClientError>>) -> Self {
            Self {
                script: RefCell::new(replies.into()),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    impl UploadClient for StubClient {
        fn upload(&self, request: &UploadRequest) -> Result<SentMessage, ClientError> {
            self.requests.borrow_mut().push(request.clone());
            if let Some(reply) = self.script.borrow_mut().pop_front() {
                return reply;
            }
            let stem = request.file_path.file_stem().unwrap().to_string_lossy();
            Ok(document(&format!("id-{}", stem)))
        }
    }

    fn document(file_id: &str) -> SentMessage {
        SentMessage {
            document: Some(FileDescriptor::with_id(file_id)),
            ..SentMessage::default()
        }
    }

    fn add_episode(dir: &Path, id: &str, metadata: &str) {
        fs::write(dir.join(format!("{}.mp3", id)), b"ID3 audio").unwrap();
        fs::write(dir.join(format!("{}_data.txt", id)), metadata).unwrap();
    }

    fn setup(mode: ScanMode) -> (TempDir, WorkerOptions) {
        let dir = tempdir().unwrap();
        let options = WorkerOptions {
            dir: dir.path().to_path_buf(),
            mode,
            poll_interval: Duration::ZERO,
        };
        (dir, options)
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_single_episode_end_to_end() {
        let (dir, options) = setup(ScanMode::Batch);
        add_episode(dir.path(), "ep1", "Ep Title::Host Name::thumb1");
        let client = StubClient::scripted(vec![Ok(document("F1"))]);
        let mut worker = Worker::new(options, &client);

        let report = worker.run_cycle(None);

        assert_eq!(report.uploaded, 1);
        assert_eq!(file_names(dir.path()), vec!["ep1.txt"]);
        assert_eq!(fs::read_to_string(dir.path().join("ep1.txt")).unwrap(), "F1");

        let requests = client.requests.borrow();
        assert_eq!(
            requests[0],
            UploadRequest {
                peer: crate::Peer::SelfChat,
                file_path: dir.path().join("ep1.mp3"),
                title: "Ep Title".to_string(),
                performer: "Host Name".to_string(),
                voice: false,
                thumbnail_ref: "thumb1".to_string(),
            }
        );
    }

    #[test]
    fn test_batch_mode_processes_all() {
        let (dir, options) = setup(ScanMode::Batch);
        for id in ["a", "b", "c"] {
            add_episode(dir.path(), id, "T::A::R");
        }
        let client = StubClient::default();
        let mut worker = Worker::new(options, &client);

        let report = worker.run_cycle(None);

        assert_eq!(report.found, 3);
        assert_eq!(report.uploaded, 3);
        assert_eq!(client.calls(), 3);
        assert_eq!(file_names(dir.path()), vec!["a.txt", "b.txt", "c.txt"]);
        assert_eq!(fs::read_to_string(dir.path().join("b.txt")).unwrap(), "id-b");
    }

    #[test]
    fn test_single_mode_one_per_cycle() {
        let (dir, options) = setup(ScanMode::Single);
        for id in ["a", "b", "c"] {
            add_episode(dir.path(), id, "T::A::R");
        }
        let client = StubClient::default();
        let mut worker = Worker::new(options, &client);

        for expected in 1..=3 {
            worker.run_cycle(None);
            assert_eq!(client.calls(), expected);
        }
        worker.run_cycle(None);
        assert_eq!(client.calls(), 3);

        let order: Vec<PathBuf> = client.requests.borrow().iter().map(|r| r.file_path.clone()).collect();
        assert_eq!(
            order,
            vec![dir.path().join("a.mp3"), dir.path().join("b.mp3"), dir.path().join("c.mp3")]
        );
    }

    #[test]
    fn test_failed_episode_does_not_stop_others() {
        let (dir, options) = setup(ScanMode::Batch);
        add_episode(dir.path(), "a", "no delimiters here");
        add_episode(dir.path(), "b", "T::A::R");
        let client = StubClient::default();
        let mut worker = Worker::new(options, &client);

        let report = worker.run_cycle(None);

        assert_eq!(report.failed, 1);
        assert_eq!(report.uploaded, 1);
        assert_eq!(client.calls(), 1);
        assert_eq!(file_names(dir.path()), vec!["a.mp3", "a_data.txt", "b.txt"]);
    }

    #[test]
    fn test_missing_sidecar_is_retried() {
        let (dir, options) = setup(ScanMode::Batch);
        fs::write(dir.path().join("late.mp3"), b"audio").unwrap();
        let client = StubClient::default();
        let mut worker = Worker::new(options, &client);

        assert_eq!(worker.run_cycle(None).failed, 1);
        assert_eq!(client.calls(), 0);

        fs::write(dir.path().join("late_data.txt"), "T::A::R").unwrap();
        assert_eq!(worker.run_cycle(None).uploaded, 1);
        assert_eq!(file_names(dir.path()), vec!["late.txt"]);
    }

    #[test]
    fn test_client_error_keeps_inputs_and_retries() {
        let (dir, options) = setup(ScanMode::Batch);
        add_episode(dir.path(), "ep1", "T::A::R");
        let client = StubClient::scripted(vec![Err(ClientError::Api {
            code: 429,
            description: "Too Many Requests".to_string(),
        })]);
        let mut worker = Worker::new(options, &client);

        let report = worker.run_cycle(None);
        assert_eq!(report.failed, 1);
        assert_eq!(file_names(dir.path()), vec!["ep1.mp3", "ep1_data.txt"]);

        let report = worker.run_cycle(None);
        assert_eq!(report.uploaded, 1);
        assert_eq!(client.calls(), 2);
        assert_eq!(file_names(dir.path()), vec!["ep1.txt"]);
    }

    #[test]
    fn test_ambiguous_result_is_held() {
        let (dir, options) = setup(ScanMode::Batch);
        add_episode(dir.path(), "ep1", "T::A::R");
        let mut both = document("D1");
        both.audio = Some(FileDescriptor::with_id("A1"));
        let client = StubClient::scripted(vec![Ok(both)]);
        let mut worker = Worker::new(options, &client);

        assert_eq!(worker.run_cycle(None).failed, 1);
        assert_eq!(file_names(dir.path()), vec!["ep1.mp3", "ep1_data.txt"]);

        // Not sent a second time.
        let report = worker.run_cycle(None);
        assert_eq!(report.skipped, 1);
        assert_eq!(client.calls(), 1);
    }

    #[test]
    fn test_photo_without_name_is_held() {
        let (dir, options) = setup(ScanMode::Batch);
        add_episode(dir.path(), "ep1", "T::A::R");
        let photo = SentMessage {
            photo: Some(vec![FileDescriptor {
                file_size: Some(200),
                ..FileDescriptor::default()
            }]),
            ..SentMessage::default()
        };
        let client = StubClient::scripted(vec![Ok(photo)]);
        let mut worker = Worker::new(options, &client);

        worker.run_cycle(None);

        assert!(!dir.path().join("ep1.txt").exists());
        assert_eq!(worker.run_cycle(None).skipped, 1);
        assert_eq!(client.calls(), 1);
    }

    #[test]
    fn test_existing_result_consumes_inputs_without_upload() {
        let (dir, options) = setup(ScanMode::Batch);
        add_episode(dir.path(), "ep1", "T::A::R");
        fs::write(dir.path().join("ep1.txt"), "F0").unwrap();
        let client = StubClient::default();
        let mut worker = Worker::new(options, &client);

        let report = worker.run_cycle(None);

        assert_eq!(report.recovered, 1);
        assert_eq!(client.calls(), 0);
        assert_eq!(file_names(dir.path()), vec!["ep1.txt"]);
        assert_eq!(fs::read_to_string(dir.path().join("ep1.txt")).unwrap(), "F0");
    }

    #[test]
    fn test_single_mode_prefers_fresh_episode_over_failed() {
        let (dir, options) = setup(ScanMode::Single);
        add_episode(dir.path(), "a", "broken");
        add_episode(dir.path(), "b", "T::A::R");
        let client = StubClient::default();
        let mut worker = Worker::new(options, &client);

        assert_eq!(worker.run_cycle(None).failed, 1);
        assert_eq!(worker.run_cycle(None).uploaded, 1);
        assert!(dir.path().join("b.txt").exists());

        // Only the broken one is left; it is retried.
        assert_eq!(worker.run_cycle(None).failed, 1);
    }

    #[test]
    fn test_episode_named_like_sidecar_is_uploaded() {
        let (dir, options) = setup(ScanMode::Batch);
        add_episode(dir.path(), "Big_data", "Big data::Pod::t");
        let client = StubClient::default();
        let mut worker = Worker::new(options, &client);

        let report = worker.run_cycle(None);

        assert_eq!(report.uploaded, 1);
        assert_eq!(client.requests.borrow()[0].title, "Big data");
        assert_eq!(file_names(dir.path()), vec!["Big_data.txt"]);
        assert_eq!(fs::read_to_string(dir.path().join("Big_data.txt")).unwrap(), "id-Big_data");
    }

    #[test]
    fn test_sidecar_collision_waits_for_owner() {
        let (dir, options) = setup(ScanMode::Batch);
        add_episode(dir.path(), "Big", "Big::Pod::t");
        add_episode(dir.path(), "Big_data", "Big data::Pod::t");
        let client = StubClient::default();
        let mut worker = Worker::new(options, &client);

        let report = worker.run_cycle(None);
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(fs::read_to_string(dir.path().join("Big.txt")).unwrap(), "id-Big");
        assert!(dir.path().join("Big_data.mp3").exists());

        let report = worker.run_cycle(None);
        assert_eq!(report.uploaded, 1);
        assert_eq!(client.calls(), 2);
        assert_eq!(file_names(dir.path()), vec!["Big.txt", "Big_data.txt"]);
        assert_eq!(fs::read_to_string(dir.path().join("Big_data.txt")).unwrap(), "id-Big_data");
    }

    #[test]
    fn test_sidecar_written_ahead_of_audio_is_not_taken_as_result() {
        let (dir, options) = setup(ScanMode::Batch);
        add_episode(dir.path(), "Big_data", "Big data::Pod::t");
        // Sidecar of `Big`, whose audio is still downloading.
        fs::write(dir.path().join("Big_data.txt"), "Big::Pod::t").unwrap();
        let client = StubClient::default();
        let mut worker = Worker::new(options, &client);

        let report = worker.run_cycle(None);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.recovered, 0);
        assert_eq!(client.calls(), 0);
        assert_eq!(
            fs::read_to_string(dir.path().join("Big_data.txt")).unwrap(),
            "Big::Pod::t"
        );

        fs::write(dir.path().join("Big.mp3"), b"ID3 audio").unwrap();
        worker.run_cycle(None);
        let report = worker.run_cycle(None);
        assert_eq!(report.uploaded, 1);
        assert_eq!(file_names(dir.path()), vec!["Big.txt", "Big_data.txt"]);
    }

    #[test]
    fn test_result_write_failure_is_held() {
        let (dir, options) = setup(ScanMode::Batch);
        add_episode(dir.path(), "ep1", "T::A::R");
        // A directory where the temp file goes makes the write fail.
        fs::create_dir(dir.path().join(".ep1.txt.tmp")).unwrap();
        let client = StubClient::default();
        let mut worker = Worker::new(options, &client);

        let report = worker.run_cycle(None);
        assert_eq!(report.failed, 1);
        assert!(!dir.path().join("ep1.txt").exists());
        assert!(dir.path().join("ep1.mp3").exists());
        assert!(dir.path().join("ep1_data.txt").exists());

        let report = worker.run_cycle(None);
        assert_eq!(report.skipped, 1);
        assert_eq!(client.calls(), 1);
    }

    #[test]
    fn test_recovery_clears_stale_temp() {
        let (dir, options) = setup(ScanMode::Batch);
        add_episode(dir.path(), "ep1", "T::A::R");
        fs::write(dir.path().join("ep1.txt"), "F0").unwrap();
        fs::write(dir.path().join(".ep1.txt.tmp"), "F").unwrap();
        let client = StubClient::default();
        let mut worker = Worker::new(options, &client);

        assert_eq!(worker.run_cycle(None).recovered, 1);
        assert_eq!(file_names(dir.path()), vec!["ep1.txt"]);
    }

    #[test]
    fn test_missing_dir_is_empty_cycle() {
        let (dir, mut options) = setup(ScanMode::Batch);
        options.dir = dir.path().join("not-yet");
        let client = StubClient::default();
        let mut worker = Worker::new(options, &client);

        assert_eq!(worker.run_cycle(None), CycleReport::default());
    }

    #[test]
    fn test_run_stops_after_max_cycles() {
        let (dir, options) = setup(ScanMode::Single);
        for id in ["a", "b", "c"] {
            add_episode(dir.path(), id, "T::A::R");
        }
        let client = StubClient::default();
        let mut worker = Worker::new(options, &client);

        let summary = worker.run(&WorkerControl::new().with_max_cycles(2));

        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.totals.uploaded, 2);
        assert_eq!(client.calls(), 2);
    }

    #[test]
    fn test_run_with_zero_cycles_does_nothing() {
        let (dir, options) = setup(ScanMode::Batch);
        add_episode(dir.path(), "ep1", "T::A::R");
        let client = StubClient::default();
        let mut worker = Worker::new(options, &client);

        let summary = worker.run(&WorkerControl::new().with_max_cycles(0));

        assert_eq!(summary, RunSummary::default());
        assert_eq!(client.calls(), 0);
        assert!(dir.path().join("ep1.mp3").exists());
    }

    #[test]
    fn test_run_returns_when_cancelled() {
        let (dir, options) = setup(ScanMode::Batch);
        add_episode(dir.path(), "ep1", "T::A::R");
        let client = StubClient::default();
        let mut worker = Worker::new(options, &client);

        let token = CancellationToken::new();
        token.cancel();
        let summary = worker.run(&WorkerControl::new().with_cancel_token(token));

        assert_eq!(summary, RunSummary::default());
        assert_eq!(client.calls(), 0);
    }

    #[test]
    fn test_cancel_between_episodes() {
        struct CancellingClient {
            token: CancellationToken,
            inner: StubClient,
        }
        impl UploadClient for CancellingClient {
            fn upload(&self, request: &UploadRequest) -> Result<SentMessage, ClientError> {
                self.token.cancel();
                self.inner.upload(request)
            }
        }

        let (dir, options) = setup(ScanMode::Batch);
        for id in ["a", "b"] {
            add_episode(dir.path(), id, "T::A::R");
        }
        let token = CancellationToken::new();
        let client = CancellingClient {
            token: token.clone(),
            inner: StubClient::default(),
        };
        let mut worker = Worker::new(options, client);

        let summary = worker.run(&WorkerControl::new().with_cancel_token(token));

        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.totals.uploaded, 1);
        assert!(dir.path().join("b.mp3").exists());
    }
}
