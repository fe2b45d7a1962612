//! End-of-run summaries.

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use tplsync_core::models::{
    ApplyOutcome, BatchOutcome, ChangeStatus, ObjectStatus, PublishOutcome,
};

use crate::style;

pub fn print_publish(outcome: &PublishOutcome) {
    println!();
    println!("{}", style::header(&format!("{} publish", style::publish_label())));
    println!();

    let Some(sha) = &outcome.commit else {
        println!("{}", style::success("No changes found, nothing committed"));
        return;
    };

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Change", "File"]);
    for change in &outcome.changes {
        let cell = match change.status {
            ChangeStatus::Added => Cell::new("+ added").fg(Color::Green),
            ChangeStatus::Modified => Cell::new("~ updated").fg(Color::Yellow),
            ChangeStatus::Removed => Cell::new("- removed").fg(Color::Red),
            ChangeStatus::Unchanged => Cell::new("unchanged"),
        };
        table.add_row(vec![cell, Cell::new(&change.path)]);
    }
    println!("{table}");
    println!();

    let short = &sha[..sha.len().min(10)];
    println!(
        "{}",
        style::success(&format!(
            "Committed {} change(s) as {short}",
            outcome.changes.len()
        ))
    );
    if outcome.pushed {
        println!("{}", style::success("Pushed to origin"));
    } else {
        println!("{}", style::warn("Push disabled, commit kept locally"));
    }
}

pub fn print_apply(outcome: &ApplyOutcome) {
    println!();
    println!("{}", style::header(&format!("{} apply", style::apply_label())));
    if let Some(checkpoint) = &outcome.checkpoint {
        println!("{}", style::dim(&format!("from commit {checkpoint}")));
    }
    println!();

    if outcome.removals.is_empty() && outcome.imports.is_empty() {
        println!("{}", style::success("Remote already matches the repository"));
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Phase", "Template", "Result", "Detail"]);
    add_rows(&mut table, "remove", &outcome.removals);
    add_rows(&mut table, "import", &outcome.imports);
    println!("{table}");
    println!();

    if !outcome.waves.is_empty() {
        println!(
            "{}",
            style::dim(&format!("imported in {} wave(s)", outcome.waves.len()))
        );
    }
    let line = format!(
        "removed {}, imported {}, skipped {}, failed {}",
        outcome.removals.applied(),
        outcome.imports.applied(),
        outcome.removals.skipped() + outcome.imports.skipped(),
        outcome.removals.failed() + outcome.imports.failed(),
    );
    if outcome.has_failures() {
        println!("{}", style::error(&line));
    } else {
        println!("{}", style::success(&line));
    }
}

fn add_rows(table: &mut Table, phase: &str, batch: &BatchOutcome) {
    for outcome in &batch.outcomes {
        let (result, detail) = match &outcome.status {
            ObjectStatus::Applied => (Cell::new("✓ done").fg(Color::Green), ""),
            ObjectStatus::Skipped { reason } => {
                (Cell::new("○ skipped").fg(Color::Yellow), reason.as_str())
            }
            ObjectStatus::Failed { error } => {
                (Cell::new("✗ failed").fg(Color::Red), error.as_str())
            }
        };
        table.add_row(vec![
            Cell::new(phase),
            Cell::new(&outcome.name),
            result,
            Cell::new(detail),
        ]);
    }
}
