//! Orchestrated multi-segment runs: speak-all, save-all and save-split.
//!
//! One run at a time per session. Every run switches the backend voice per
//! segment as needed and puts the original voice back when it ends, however
//! it ends.

use crate::audio;
use crate::backend::{Output, TtsBackend};
use crate::error::{Result, SpeechError, TtsError};
use crate::prosody::ProsodySettings;
use crate::segment::Segment;
use crate::tags;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{watch, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const TEST_PHRASE: &str = "This is a test of the selected voice.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Aborted(AbortReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    Cancelled,
    /// Synthesis of the chunk at `index` failed.
    Failed { index: usize },
}

/// Outcome of one orchestrated run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub state: RunState,
    /// Chunks synthesized successfully.
    pub completed: usize,
    /// Chunks handed to the backend, including failed ones.
    pub attempted: usize,
    /// Files produced, in order.
    pub outputs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnFailure {
    Abort,
    Skip,
}

/// One unit of synthesis work.
#[derive(Debug, Clone)]
struct Job {
    /// Chunk position in the source text.
    index: usize,
    text: String,
    voice: Option<String>,
    prosody: ProsodySettings,
}

/// Pairs chunk `i` with segment `i`; the shorter list wins and empty
/// chunks are skipped.
fn plan(segments: &[Segment], source_text: &str, global: &ProsodySettings) -> Vec<Job> {
    tags::split_chunks(source_text)
        .into_iter()
        .zip(segments)
        .enumerate()
        .filter(|(_, (text, _))| !text.is_empty())
        .map(|(index, (text, segment))| Job {
            index,
            text: text.to_string(),
            voice: Some(segment.voice.clone()),
            prosody: segment.effective_prosody(global),
        })
        .collect()
}

fn plan_unvoiced(source_text: &str, global: &ProsodySettings) -> Vec<Job> {
    tags::split_chunks(source_text)
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.is_empty())
        .map(|(index, text)| Job {
            index,
            text: text.to_string(),
            voice: None,
            prosody: global.clone(),
        })
        .collect()
}

/// Text spoken in one go: no tags of either kind.
fn whole_text(text: &str) -> String {
    tags::remove_voice_tags(&tags::strip_split_tags(text))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Holds the single-flight guard for the length of a run.
struct ActiveRun<'a> {
    session: &'a Session,
    token: CancellationToken,
    _guard: MutexGuard<'a, ()>,
}

impl ActiveRun<'_> {
    fn publish(&self, state: &RunState) {
        self.session.state.send_replace(state.clone());
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        // a run dropped mid-flight never reached a final state
        self.session.state.send_if_modified(|state| {
            if *state == RunState::Running {
                *state = RunState::Aborted(AbortReason::Cancelled);
                true
            } else {
                false
            }
        });
    }
}

/// Puts the voice that was active before a run back on drop.
struct VoiceRestore<'a> {
    backend: &'a dyn TtsBackend,
    previous: Option<String>,
}

impl Drop for VoiceRestore<'_> {
    fn drop(&mut self) {
        if let Some(voice) = self.previous.take() {
            debug!(voice = %voice, "restoring voice");
            self.backend.select_voice(&voice);
        }
    }
}

struct Driven {
    state: RunState,
    attempted: usize,
    /// Job index and where its audio went, for each success.
    produced: Vec<(usize, Output)>,
}

pub struct Session {
    backend: Arc<dyn TtsBackend>,
    run_lock: tokio::sync::Mutex<()>,
    state: watch::Sender<RunState>,
    cancel: Mutex<CancellationToken>,
    /// Parent of per-run scratch directories; the system temp dir when unset.
    scratch_root: Option<PathBuf>,
}

impl Session {
    pub fn new(backend: Arc<dyn TtsBackend>) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            backend,
            run_lock: tokio::sync::Mutex::new(()),
            state,
            cancel: Mutex::new(CancellationToken::new()),
            scratch_root: None,
        }
    }

    /// Creates scratch directories for intermediate WAV files under `dir`.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(dir.into());
        self
    }

    fn scratch(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("speechcraft");
        match &self.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn TtsBackend> {
        &self.backend
    }

    pub fn state(&self) -> RunState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Stops the active run, including the synthesis call in flight.
    pub fn cancel(&self) {
        info!("cancelling run");
        self.cancel.lock().cancel();
        self.backend.cancel_current();
    }

    fn begin(&self) -> Result<ActiveRun<'_>> {
        let guard = self.run_lock.try_lock().map_err(|_| SpeechError::Busy)?;
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        self.state.send_replace(RunState::Running);
        Ok(ActiveRun {
            session: self,
            token,
            _guard: guard,
        })
    }

    async fn drive<F>(
        &self,
        run: &ActiveRun<'_>,
        jobs: &[Job],
        on_failure: OnFailure,
        mut output_for: F,
    ) -> Driven
    where
        F: FnMut(&Job) -> Output,
    {
        let available = self.backend.list_voices().await;
        let _restore = VoiceRestore {
            backend: self.backend.as_ref(),
            previous: self.backend.current_voice(),
        };

        info!(segments = jobs.len(), backend = self.backend.name(), "starting run");
        let mut driven = Driven {
            state: RunState::Completed,
            attempted: 0,
            produced: Vec::new(),
        };

        for (n, job) in jobs.iter().enumerate() {
            if run.token.is_cancelled() {
                info!(done = n, "run cancelled");
                driven.state = RunState::Aborted(AbortReason::Cancelled);
                break;
            }

            if let Some(voice) = &job.voice {
                if available.iter().any(|v| v == voice) {
                    debug!(voice = %voice, "switching voice");
                    self.backend.select_voice(voice);
                } else {
                    debug!(voice = %voice, "voice not available, keeping current");
                }
            }

            info!("segment {} of {}", n + 1, jobs.len());
            debug!(text = %job.text, "segment text");

            let output = output_for(job);
            driven.attempted += 1;
            let result = tokio::select! {
                result = self.backend.synthesize(&job.text, &job.prosody, &output) => result,
                _ = run.token.cancelled() => Err(TtsError::Cancelled),
            };

            match result {
                Ok(()) => driven.produced.push((job.index, output)),
                Err(TtsError::Cancelled) => {
                    info!(done = n, "run cancelled");
                    driven.state = RunState::Aborted(AbortReason::Cancelled);
                    break;
                }
                Err(e) => match on_failure {
                    OnFailure::Abort => {
                        error!(index = job.index, "segment failed: {}", e);
                        driven.state = RunState::Aborted(AbortReason::Failed { index: job.index });
                        break;
                    }
                    OnFailure::Skip => warn!(index = job.index, "segment failed, skipping: {}", e),
                },
            }
        }
        driven
    }

    /// Speaks every segment in order with its own voice and prosody.
    ///
    /// Without segments the whole text is spoken once with the current voice.
    pub async fn speak_all(
        &self,
        segments: &[Segment],
        source_text: &str,
        global: &ProsodySettings,
    ) -> Result<RunReport> {
        let run = self.begin()?;
        let jobs = if segments.is_empty() {
            let text = whole_text(source_text);
            if text.is_empty() {
                Vec::new()
            } else {
                vec![Job {
                    index: 0,
                    text,
                    voice: None,
                    prosody: global.clone(),
                }]
            }
        } else {
            plan(segments, source_text, global)
        };

        let driven = self
            .drive(&run, &jobs, OnFailure::Abort, |_| Output::Playback)
            .await;
        run.publish(&driven.state);
        Ok(RunReport {
            state: driven.state,
            completed: driven.produced.len(),
            attempted: driven.attempted,
            outputs: Vec::new(),
        })
    }

    /// Speaks a single segment with its voice, then restores the previous one.
    pub async fn speak_segment(
        &self,
        segments: &[Segment],
        source_text: &str,
        index: usize,
        global: &ProsodySettings,
    ) -> Result<RunReport> {
        let segment = segments.get(index).ok_or(SpeechError::NoSegments)?;
        let run = self.begin()?;
        let text = tags::split_chunks(source_text)
            .get(index)
            .map(|chunk| chunk.to_string())
            .unwrap_or_else(|| segment.text.clone());
        let jobs = if text.is_empty() {
            Vec::new()
        } else {
            vec![Job {
                index,
                text,
                voice: Some(segment.voice.clone()),
                prosody: segment.effective_prosody(global),
            }]
        };

        let driven = self
            .drive(&run, &jobs, OnFailure::Abort, |_| Output::Playback)
            .await;
        run.publish(&driven.state);
        Ok(RunReport {
            state: driven.state,
            completed: driven.produced.len(),
            attempted: driven.attempted,
            outputs: Vec::new(),
        })
    }

    /// Synthesizes every segment and joins the results into one file at `out`.
    ///
    /// Whatever was produced before a cancel or failure is still joined.
    /// An `.mp3` target is converted from the joined WAV.
    pub async fn save_all(
        &self,
        segments: &[Segment],
        source_text: &str,
        global: &ProsodySettings,
        out: &Path,
    ) -> Result<RunReport> {
        if segments.is_empty() {
            return Err(SpeechError::NoSegments);
        }
        let run = self.begin()?;
        let scratch = self.scratch()?;
        let jobs = plan(segments, source_text, global);

        let driven = self
            .drive(&run, &jobs, OnFailure::Abort, |job| {
                Output::file(scratch.path().join(format!("part_{:03}.wav", job.index)))
            })
            .await;
        run.publish(&driven.state);

        let parts: Vec<PathBuf> = driven
            .produced
            .iter()
            .filter_map(|(_, output)| match output {
                Output::File(path) => Some(path.clone()),
                Output::Playback => None,
            })
            .collect();

        let mut outputs = Vec::new();
        if parts.is_empty() {
            warn!("nothing was synthesized, no output written");
        } else {
            if audio::is_mp3(out) {
                let combined = scratch.path().join("combined.wav");
                audio::concat_wavs(&parts, &combined)?;
                audio::convert_to_mp3(&combined, out).await?;
            } else {
                audio::concat_wavs(&parts, out)?;
            }
            outputs.push(out.to_path_buf());
        }

        if let Err(e) = scratch.close() {
            debug!("temp cleanup failed: {}", e);
        }

        Ok(RunReport {
            state: driven.state,
            completed: parts.len(),
            attempted: driven.attempted,
            outputs,
        })
    }

    /// Writes chunk `i` to `{stem}_{i+1:03}.{ext}` next to `base`.
    ///
    /// With segments, each chunk takes its segment's voice and prosody.
    /// Without, every chunk uses the current voice and `global`.
    /// Failed chunks are skipped, leaving a gap in the numbering.
    pub async fn save_split(
        &self,
        segments: &[Segment],
        source_text: &str,
        global: &ProsodySettings,
        base: &Path,
    ) -> Result<RunReport> {
        let run = self.begin()?;
        let jobs = if segments.is_empty() {
            plan_unvoiced(source_text, global)
        } else {
            plan(segments, source_text, global)
        };

        let mp3 = audio::is_mp3(base);
        let scratch = if mp3 {
            Some(self.scratch()?)
        } else {
            None
        };
        let ext = base
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("wav")
            .to_string();

        let driven = self
            .drive(&run, &jobs, OnFailure::Skip, |job| match &scratch {
                Some(dir) => Output::file(dir.path().join(format!("part_{:03}.wav", job.index))),
                None => Output::file(audio::numbered_path(base, job.index + 1, &ext)),
            })
            .await;
        run.publish(&driven.state);

        let mut outputs = Vec::new();
        for (index, output) in &driven.produced {
            let Output::File(path) = output else { continue };
            if mp3 {
                let target = audio::numbered_path(base, index + 1, "mp3");
                match audio::convert_to_mp3(path, &target).await {
                    Ok(()) => outputs.push(target),
                    Err(e) => warn!(index, "conversion failed, skipping: {}", e),
                }
            } else {
                outputs.push(path.clone());
            }
        }

        if let Some(dir) = scratch {
            if let Err(e) = dir.close() {
                debug!("temp cleanup failed: {}", e);
            }
        }

        info!(files = outputs.len(), "split save finished");
        Ok(RunReport {
            state: driven.state,
            completed: outputs.len(),
            attempted: driven.attempted,
            outputs,
        })
    }

    /// Speaks `text` in one go with the current voice. Tags are dropped.
    pub async fn speak_text(&self, text: &str, global: &ProsodySettings) -> Result<RunReport> {
        self.single(whole_text(text), global, None).await
    }

    /// Saves `text` in one go with the current voice.
    pub async fn save_text(
        &self,
        text: &str,
        global: &ProsodySettings,
        out: &Path,
    ) -> Result<RunReport> {
        self.single(whole_text(text), global, Some(out)).await
    }

    pub async fn test_voice(&self, global: &ProsodySettings) -> Result<RunReport> {
        self.single(TEST_PHRASE.to_string(), global, None).await
    }

    async fn single(
        &self,
        text: String,
        global: &ProsodySettings,
        out: Option<&Path>,
    ) -> Result<RunReport> {
        let run = self.begin()?;
        let jobs = if text.is_empty() {
            Vec::new()
        } else {
            vec![Job {
                index: 0,
                text,
                voice: None,
                prosody: global.clone(),
            }]
        };

        let scratch = match out {
            Some(path) if audio::is_mp3(path) => {
                Some(self.scratch()?)
            }
            _ => None,
        };
        let target = match (&scratch, out) {
            (Some(dir), _) => Output::file(dir.path().join("speech.wav")),
            (None, Some(path)) => Output::file(path),
            (None, None) => Output::Playback,
        };

        let driven = self
            .drive(&run, &jobs, OnFailure::Abort, |_| target.clone())
            .await;
        run.publish(&driven.state);

        let mut outputs = Vec::new();
        if let (Some(out), false) = (out, driven.produced.is_empty()) {
            if let (Some(_), Output::File(wav)) = (&scratch, &target) {
                audio::convert_to_mp3(wav, out).await?;
            }
            outputs.push(out.to_path_buf());
        }

        if let Some(dir) = scratch {
            if let Err(e) = dir.close() {
                debug!("temp cleanup failed: {}", e);
            }
        }

        Ok(RunReport {
            state: driven.state,
            completed: driven.produced.len(),
            attempted: driven.attempted,
            outputs,
        })
    }
}

#[cfg(test)]
mod plan_tests {
    use super::*;
    use crate::segment::MarkerId;

    fn segment(voice: &str, prosody: Option<ProsodySettings>) -> Segment {
        Segment {
            start: 0.0,
            end: 1.0,
            voice: voice.to_string(),
            text: String::new(),
            prosody,
            marker: MarkerId::new(),
        }
    }

    #[test]
    fn shorter_list_wins() {
        let segments = vec![segment("A", None), segment("B", None), segment("C", None)];
        let jobs = plan(&segments, "one <split> two", &ProsodySettings::default());
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].text, "two");
        assert_eq!(jobs[1].voice.as_deref(), Some("B"));

        let jobs = plan(&segments[..1], "one <split> two", &ProsodySettings::default());
        assert_eq!(jobs.len(), 1);
    }

    #[test]
    fn segment_prosody_overrides_global() {
        let own = ProsodySettings {
            rate_percent: 40,
            ..Default::default()
        };
        let segments = vec![segment("A", Some(own.clone())), segment("B", None)];
        let global = ProsodySettings {
            pitch_semitones: -2,
            ..Default::default()
        };
        let jobs = plan(&segments, "a <split> b", &global);
        assert_eq!(jobs[0].prosody, own);
        assert_eq!(jobs[1].prosody, global);
    }

    #[test]
    fn empty_text_plans_nothing() {
        let segments = vec![segment("A", None)];
        assert!(plan(&segments, "  <split>  ", &ProsodySettings::default()).is_empty());
        assert!(plan_unvoiced("", &ProsodySettings::default()).is_empty());
    }

    #[test]
    fn empty_chunk_consumes_its_segment() {
        let segments = vec![segment("A", None), segment("B", None), segment("C", None)];
        let jobs = plan(&segments, "A <split> <split> C", &ProsodySettings::default());
        let planned: Vec<_> = jobs
            .iter()
            .map(|j| (j.index, j.voice.as_deref(), j.text.as_str()))
            .collect();
        assert_eq!(planned, vec![(0, Some("A"), "A"), (2, Some("C"), "C")]);
    }

    #[test]
    fn whole_text_drops_tags() {
        assert_eq!(whole_text("<voice=1>Hi <split> there"), "Hi there");
    }
}
