//! CLI entry points.
//!
//! Each `run_*` function drives the [`App`] through the same [`UiAction`]s
//! the HTTP front end uses and prints the outcome. Results go to stdout;
//! progress and prompts go to stderr.

use anyhow::{bail, Result};
use std::path::Path;

use crate::catalog::ALL_CATEGORIES;
use crate::config::Config;
use crate::controller::{App, UiAction, UiOutcome};
use crate::models::ParamAxis;
use crate::orchestrator::JobState;

/// Options of `research generate`.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub area: String,
    pub topic: String,
    pub depth: Option<String>,
    pub rigor: Option<String>,
    pub focus: Option<String>,
}

fn fail_on_alert(outcome: UiOutcome) -> Result<UiOutcome> {
    match outcome {
        UiOutcome::Alert { message } => bail!(message),
        other => Ok(other),
    }
}

/// `research topics`
pub fn run_topics(config: &Config) -> Result<()> {
    for entry in &config.taxonomy {
        println!("{}", entry.area);
        for topic in &entry.topics {
            println!("  {}", topic);
        }
    }
    Ok(())
}

/// `research list`
pub async fn run_list(app: &App, category: Option<String>, search: Option<String>) -> Result<()> {
    app.handle(UiAction::SetCategory(
        category.unwrap_or_else(|| ALL_CATEGORIES.to_string()),
    ))
    .await;
    let outcome = app
        .handle(UiAction::SetSearch(search.unwrap_or_default()))
        .await;

    if let UiOutcome::Listed { list } = fail_on_alert(outcome)? {
        println!("{}", list.to_text());
    }
    Ok(())
}

/// `research view <id>`: prints the markdown, or the rendered HTML.
pub async fn run_view(app: &App, id: &str, html: bool) -> Result<()> {
    match fail_on_alert(app.handle(UiAction::View(id.to_string())).await)? {
        UiOutcome::Viewer { document } => {
            if html {
                println!("{}", document.html);
            } else {
                println!("# {}\n", document.title);
                println!("{}", document.markdown);
            }
            Ok(())
        }
        _ => bail!("document not found: {}", id),
    }
}

/// `research export <id>`
pub async fn run_export(app: &App, id: &str, out_dir: &Path) -> Result<()> {
    match fail_on_alert(app.handle(UiAction::Download(id.to_string())).await)? {
        UiOutcome::Exported { file, .. } => {
            let path = file.save_in(out_dir)?;
            println!("{}", path.display());
            Ok(())
        }
        _ => bail!("document not found: {}", id),
    }
}

/// `research delete <id>`
pub async fn run_delete(app: &App, id: &str) -> Result<()> {
    match fail_on_alert(app.handle(UiAction::Delete(id.to_string())).await)? {
        UiOutcome::Listed { list } => {
            println!("Deleted {}. {} document(s) remain.", id, list.len());
        }
        _ => eprintln!("Delete cancelled."),
    }
    Ok(())
}

/// `research generate`: submits a job and waits for it to finish. Ctrl-C
/// stops tracking the job.
pub async fn run_generate(app: &App, options: GenerateOptions) -> Result<()> {
    fail_on_alert(app.handle(UiAction::SelectArea(options.area.clone())).await)?;
    fail_on_alert(app.handle(UiAction::SelectTopic(options.topic.clone())).await)?;
    for (axis, value) in [
        (ParamAxis::Depth, options.depth),
        (ParamAxis::Rigor, options.rigor),
        (ParamAxis::Focus, options.focus),
    ] {
        if let Some(value) = value {
            fail_on_alert(app.handle(UiAction::ChooseSegment { axis, value }).await)?;
        }
    }
    eprintln!("{}", app.form().summary());

    let mut states = app.orchestrator.subscribe();
    match fail_on_alert(app.handle(UiAction::Create).await)? {
        UiOutcome::JobStarted { job_id } => eprintln!("Submitted job {}", job_id),
        _ => bail!("select both an area and a topic"),
    }

    while *states.borrow_and_update() != JobState::Idle {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                app.handle(UiAction::CancelJob).await;
            }
        }
    }

    match app.orchestrator.last_outcome() {
        Some(JobState::Completed) => {
            let list = app.list(ALL_CATEGORIES, &options.topic);
            println!("{}", list.to_text());
            Ok(())
        }
        Some(JobState::Cancelled) => bail!("research generation cancelled"),
        Some(JobState::TimedOut) => bail!("research generation timed out"),
        _ => bail!("research generation failed"),
    }
}
