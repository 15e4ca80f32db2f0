//! Table rendering for reports, sources and alias groups.

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use authcheck_core::aliases::Group;
use authcheck_core::config::ErrorPolicy;
use authcheck_core::models::Status;
use authcheck_core::report::{Report, ResultCell};
use authcheck_core::AdapterRegistry;

use crate::style;

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn result_cell(cell: Option<&ResultCell>) -> Cell {
    let Some(cell) = cell else {
        return Cell::new("—");
    };
    let glyph = style::glyph(cell.status);
    match cell.status {
        Status::Found => Cell::new(glyph).fg(Color::Green),
        Status::NotFound => Cell::new(glyph).fg(Color::Red),
        Status::Error => Cell::new(glyph).fg(Color::Yellow),
    }
}

/// One row per identity or alias group, one column per source.
pub fn report_table(report: &Report) -> Table {
    let mut table = new_table();

    let mut header = vec![Cell::new("User")];
    header.extend(report.sources.iter().map(|s| Cell::new(&s.display_name)));
    table.set_header(header);

    for row in &report.rows {
        let label = match (&row.display_name, row.grouped) {
            (Some(name), _) => format!("{}\n{}", name, row.members.join("\n")),
            (None, true) => row.members.join("\n"),
            (None, false) => row.key.clone(),
        };
        let mut cells = vec![Cell::new(label)];
        cells.extend(
            report
                .sources
                .iter()
                .map(|s| result_cell(row.results.get(&s.id))),
        );
        table.add_row(cells);
    }

    // Totals row: found / enumerated per source.
    let mut totals = vec![Cell::new("Found")];
    totals.extend(report.sources.iter().map(|s| {
        let counts = report.counts(&s.id).cloned().unwrap_or_default();
        match counts.enumerated {
            Some(active) => Cell::new(format!("{} / {} active", counts.found, active)),
            None => Cell::new(counts.found),
        }
    }));
    table.add_row(totals);

    table
}

/// Print the grid plus error details and any notes about missing columns.
pub fn print_report(report: &Report) {
    if report.sources.is_empty() {
        println!("{}", style::warn("No identity sources are active."));
    }

    println!();
    println!("{}", report_table(report));

    let errors: Vec<(String, &str)> = report
        .rows
        .iter()
        .flat_map(|row| {
            row.results.iter().filter_map(move |(source, cell)| {
                cell.reason
                    .as_deref()
                    .map(|reason| (format!("{} @ {}", row.key, source), reason))
            })
        })
        .collect();
    if !errors.is_empty() {
        println!();
        println!("{}", style::header("Errors"));
        for (at, reason) in &errors {
            println!("  {} {}", style::error(at), style::dim(reason));
        }
    }

    for (source, reason) in &report.enumeration_failures {
        println!(
            "{}",
            style::warn(&format!("could not list users from {}: {}", source, reason))
        );
    }
    for excluded in &report.excluded_sources {
        println!(
            "{}",
            style::warn(&format!("{} is not active: {}", excluded.id, excluded.reason))
        );
    }
    if report.error_policy == ErrorPolicy::TreatAsNotFound && report.errors_coerced > 0 {
        println!(
            "{}",
            style::dim(&format!(
                "{} error(s) shown as not found (error_policy = treat_as_not_found)",
                report.errors_coerced
            ))
        );
    }

    println!();
    println!(
        "{} row(s), {} identit{} checked  {}",
        report.rows.len(),
        report.identity_count,
        if report.identity_count == 1 { "y" } else { "ies" },
        style::dim("✓ found  ✗ not found  ! error")
    );
}

/// Registered and excluded sources.
pub fn sources_table(registry: &AdapterRegistry) -> Table {
    let mut table = new_table();
    table.set_header(vec!["ID", "Name", "Enumeration", "Status"]);

    for adapter in registry.all() {
        table.add_row(vec![
            Cell::new(adapter.id()),
            Cell::new(adapter.display_name()),
            Cell::new(if adapter.supports_enumeration() { "yes" } else { "no" }),
            Cell::new("active").fg(Color::Green),
        ]);
    }
    for excluded in registry.excluded() {
        table.add_row(vec![
            Cell::new(&excluded.id),
            Cell::new("—"),
            Cell::new("—"),
            Cell::new(format!("excluded: {}", excluded.reason)).fg(Color::Red),
        ]);
    }

    table
}

/// Alias groups in store order.
pub fn groups_table(groups: &[Group]) -> Table {
    let mut table = new_table();
    table.set_header(vec!["Group", "Name", "Members"]);

    for group in groups {
        table.add_row(vec![
            Cell::new(&group.id),
            Cell::new(group.display_name.as_deref().unwrap_or("—")),
            Cell::new(group.members.join("\n")),
        ]);
    }

    table
}
