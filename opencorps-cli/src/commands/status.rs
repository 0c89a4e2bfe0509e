//! `opencorps status`: onboarding progress per stored project.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use opencorps_core::{Project, ProjectKey, StoreExt};
use opencorps_sync::{status_payload, Stage};

use super::open_store;

/// Arguments for `opencorps status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only show this project (`owner/repo`).
    #[arg(long, short = 'p')]
    pub project: Option<ProjectKey>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let store = open_store()?;
        let filter = self.project.clone();
        let projects = store
            .query::<Project>(|p| filter.as_ref().map_or(true, |key| p.key == *key))
            .context("failed to load projects")?;

        if self.json {
            return print_json(&projects);
        }
        print_table(&projects);
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusReportJson {
    summary: StatusSummaryJson,
    projects: Vec<Value>,
}

#[derive(Serialize)]
struct StatusSummaryJson {
    projects: usize,
    complete: usize,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "project")]
    project: String,
    #[tabled(rename = "stage")]
    stage: String,
    #[tabled(rename = "failures")]
    failures: u32,
    #[tabled(rename = "pending merges")]
    pending: usize,
    #[tabled(rename = "message")]
    message: String,
}

fn is_settled(project: &Project) -> bool {
    project.progress.init_complete && project.pending_merges.is_empty()
}

fn stage_label(project: &Project) -> String {
    if is_settled(project) {
        "complete".to_owned()
    } else {
        Stage::next(project).to_string()
    }
}

fn print_json(projects: &[Project]) -> Result<()> {
    let payload = StatusReportJson {
        summary: StatusSummaryJson {
            projects: projects.len(),
            complete: projects.iter().filter(|p| p.progress.init_complete).count(),
        },
        projects: projects
            .iter()
            .map(|p| {
                let mut entry = status_payload(p);
                entry["stage"] = Value::String(stage_label(p));
                entry
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(projects: &[Project]) {
    println!(
        "OpenCorps v{} | {} projects | {} complete",
        env!("CARGO_PKG_VERSION"),
        projects.len(),
        projects.iter().filter(|p| p.progress.init_complete).count(),
    );

    if projects.is_empty() {
        println!("No projects registered.");
        return;
    }

    let rows: Vec<StatusTableRow> = projects
        .iter()
        .map(|p| StatusTableRow {
            project: p.key.to_string(),
            stage: colored_stage(p),
            failures: p.failure_count,
            pending: p.pending_merges.len(),
            message: p.system_message.clone(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn colored_stage(project: &Project) -> String {
    let label = stage_label(project);
    if is_settled(project) {
        label.green().to_string()
    } else if project.progress.fork_config_invalid() || project.failure_count > 0 {
        label.red().to_string()
    } else if !project.progress.has_webhook {
        label.bright_black().to_string()
    } else {
        label.yellow().to_string()
    }
}
