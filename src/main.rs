mod args;

use anyhow::{anyhow, Context};
use args::{Args, Commands, Provider};
use clap::Parser;
use serde_json::json;
use speechcraft::cloud::{CloudBackend, CloudConfig};
use speechcraft::local::{LocalBackend, LocalConfig};
use speechcraft::session::{RunReport, RunState, Session};
use speechcraft::{ssml, tags, Timeline, TtsBackend};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let prosody = args.prosody.settings();
    debug!(?prosody, "global prosody");

    let text = match (&args.text, &args.file) {
        (Some(text), _) => Some(text.clone()),
        (None, Some(path)) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?,
        ),
        (None, None) => None,
    };

    let backend = build_backend(&args)?;
    let voices = backend.list_voices().await;
    info!("Using {} with {} voices", backend.name(), voices.len());

    let require_text = || text.as_deref().ok_or_else(|| anyhow!("no input text: pass --text or --file"));

    match &args.command {
        Commands::Voices => {
            let current = backend.current_voice();
            for voice in &voices {
                let mark = if current.as_deref() == Some(voice.as_str()) { "*" } else { " " };
                println!("{} {}", mark, voice);
            }
            if voices.is_empty() {
                warn!("No voices reported by {}", backend.name());
            }
        }
        Commands::Tags { json } => {
            let text = require_text()?;
            let runs = tags::parse_voice_segments(text, &voices);
            let processed = tags::process_voice_tags(text, &voices);
            if *json {
                let out = json!({ "segments": runs, "processed": processed });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                for run in &runs {
                    println!("[{}] {}: {}", run.voice_index + 1, run.voice_name, run.text);
                }
                println!("{}", processed);
            }
        }
        Commands::Segments { json } => {
            let timeline = Timeline::from_tagged_text(require_text()?, voices.clone(), args.duration);
            if *json {
                let out = json!({ "markers": timeline.markers(), "segments": timeline.segments() });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                for (i, segment) in timeline.segments().iter().enumerate() {
                    println!(
                        "{:>3}  {:>7.2}-{:<7.2} {:<24} {}",
                        i, segment.start, segment.end, segment.voice, segment.text
                    );
                }
            }
        }
        Commands::Ssml => {
            let timeline = Timeline::from_tagged_text(require_text()?, voices.clone(), args.duration);
            println!("{}", ssml::preview(timeline.source_text(), timeline.segments(), &prosody));
        }
        Commands::Speak { segment } => {
            let timeline = Timeline::from_tagged_text(require_text()?, voices.clone(), args.duration);
            let session = Session::new(backend.clone());
            let report = match segment {
                Some(index) => {
                    let run = session.speak_segment(timeline.segments(), timeline.source_text(), *index, &prosody);
                    cancel_on_ctrl_c(&session, run).await?
                }
                None => {
                    let run = session.speak_all(timeline.segments(), timeline.source_text(), &prosody);
                    cancel_on_ctrl_c(&session, run).await?
                }
            };
            finish(&report)?;
        }
        Commands::Save { out, single } => {
            let text = require_text()?;
            let session = Session::new(backend.clone());
            let report = if *single {
                let run = session.save_text(text, &prosody, out);
                cancel_on_ctrl_c(&session, run).await?
            } else {
                let timeline = Timeline::from_tagged_text(text, voices.clone(), args.duration);
                let run = session.save_all(timeline.segments(), timeline.source_text(), &prosody, out);
                cancel_on_ctrl_c(&session, run).await?
            };
            finish(&report)?;
        }
        Commands::SaveSplit { out } => {
            let timeline = Timeline::from_tagged_text(require_text()?, voices.clone(), args.duration);
            let session = Session::new(backend.clone());
            let run = session.save_split(timeline.segments(), timeline.source_text(), &prosody, out);
            let report = cancel_on_ctrl_c(&session, run).await?;
            finish(&report)?;
        }
        Commands::TestVoice => {
            let session = Session::new(backend.clone());
            let report = cancel_on_ctrl_c(&session, session.test_voice(&prosody)).await?;
            finish(&report)?;
        }
    }

    Ok(())
}

fn build_backend(args: &Args) -> anyhow::Result<Arc<dyn TtsBackend>> {
    let backend: Arc<dyn TtsBackend> = match args.provider {
        Provider::Local => Arc::new(LocalBackend::new(LocalConfig {
            program: args.engine.clone(),
            voices: args.voices.clone(),
            voice: args.voice.clone(),
        })),
        Provider::Cloud => {
            let api_key = args
                .api_key
                .clone()
                .ok_or_else(|| anyhow!("cloud provider needs --api-key or SPEECHCRAFT_API_KEY"))?;
            let backend = CloudBackend::new(CloudConfig {
                api_key,
                player: Some(args.player.clone()),
                ..CloudConfig::default()
            })?;
            if let Some(voice) = &args.voice {
                backend.select_voice(voice);
            }
            Arc::new(backend)
        }
    };
    Ok(backend)
}

/// Drives a session run, cancelling it on Ctrl-C and waiting for it to wind down.
async fn cancel_on_ctrl_c<F>(session: &Session, run: F) -> anyhow::Result<RunReport>
where
    F: Future<Output = speechcraft::Result<RunReport>>,
{
    tokio::pin!(run);
    let report = tokio::select! {
        report = &mut run => report?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping");
            session.cancel();
            run.await?
        }
    };
    Ok(report)
}

fn finish(report: &RunReport) -> anyhow::Result<()> {
    for path in &report.outputs {
        info!("Wrote {}", path.display());
    }
    match &report.state {
        RunState::Completed => info!(
            "Done: {} of {} segments",
            report.completed, report.attempted
        ),
        RunState::Aborted(reason) => warn!(
            ?reason,
            "Stopped after {} of {} segments", report.completed, report.attempted
        ),
        state => debug!(?state, "run finished"),
    }
    if report.completed == 0 {
        error!("Nothing was produced");
        anyhow::bail!("nothing was produced");
    }
    Ok(())
}
