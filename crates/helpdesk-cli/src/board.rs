use std::fmt::Write as _;

use helpdesk_api::Board;
use helpdesk_core::{Priority, Ticket, TicketStats, TicketStatus};

pub const EMPTY_BOARD_MESSAGE: &str = "No tickets yet. Create your first ticket above!";
pub const EDIT_HINT: &str = "Edit status and priority with `hd ticket update`, or edit the \
     sheet from `hd board export --out <file>` and run `hd board apply --edits <file>`.";

const ISSUE_COLUMN_MAX: usize = 48;
const STATUS_BAR_WIDTH: usize = 40;
const PRIORITY_STRIP_WIDTH: usize = 40;
const HEADERS: [&str; 5] = ["ID", "Issue", "Status", "Priority", "Date Submitted"];

pub fn render_board(board: &Board) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Existing tickets");
    let _ = writeln!(out, "Number of tickets: {}", board.snapshot.len());

    if board.snapshot.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{EMPTY_BOARD_MESSAGE}");
        return out;
    }

    let _ = writeln!(out, "{EDIT_HINT}");
    let _ = writeln!(out);
    out.push_str(&render_ticket_table(board.snapshot.tickets()));
    let _ = writeln!(out);
    let _ = writeln!(out, "Statistics");
    let _ = writeln!(out, "{}", render_metrics(&board.stats));
    let _ = writeln!(out);
    let _ = writeln!(out, "Ticket status distribution");
    out.push_str(&render_status_chart(&board.stats));
    let _ = writeln!(out);
    let _ = writeln!(out, "Priority distribution");
    out.push_str(&render_priority_chart(&board.stats));
    out
}

pub fn render_ticket_table(tickets: &[Ticket]) -> String {
    let rows = tickets
        .iter()
        .map(|ticket| {
            [
                ticket.id.to_string(),
                clip(&single_line(&ticket.issue), ISSUE_COLUMN_MAX),
                ticket.status.to_string(),
                ticket.priority.to_string(),
                ticket.date_submitted.clone(),
            ]
        })
        .collect::<Vec<_>>();

    let mut widths = HEADERS.map(|header| header.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, &HEADERS.map(str::to_string), &widths);
    let separator = widths.map(|width| "-".repeat(width));
    push_row(&mut out, &separator, &widths);
    for row in &rows {
        push_row(&mut out, row, &widths);
    }
    out
}

pub fn render_metrics(stats: &TicketStats) -> String {
    format!(
        "Open tickets: {}   In Progress: {}   Closed tickets: {}",
        stats.status_count(TicketStatus::Open),
        stats.status_count(TicketStatus::InProgress),
        stats.status_count(TicketStatus::Closed),
    )
}

/// Horizontal bar per status, scaled so the largest count fills the chart width.
pub fn render_status_chart(stats: &TicketStats) -> String {
    let label_width =
        stats.by_status.iter().map(|entry| entry.status.as_str().len()).max().unwrap_or(0);
    let max_count = stats.by_status.iter().map(|entry| entry.count).max().unwrap_or(0);

    let mut out = String::new();
    for entry in &stats.by_status {
        let cells = scaled(entry.count, max_count, STATUS_BAR_WIDTH);
        let _ = writeln!(
            out,
            "{:<label_width$} | {}{} {}",
            entry.status.as_str(),
            "█".repeat(cells),
            if cells == 0 { "" } else { " " },
            entry.count,
        );
    }
    out
}

/// Share of each priority as a segmented strip plus a legend with percentages.
pub fn render_priority_chart(stats: &TicketStats) -> String {
    let total = stats.by_priority.iter().map(|entry| entry.count).sum::<usize>();
    let counts = stats.by_priority.iter().map(|entry| entry.count).collect::<Vec<_>>();
    let segments = apportion(&counts, PRIORITY_STRIP_WIDTH);

    let mut strip = String::new();
    for (entry, cells) in stats.by_priority.iter().zip(&segments) {
        strip.push_str(&priority_glyph(entry.priority).to_string().repeat(*cells));
    }

    let mut out = String::new();
    let _ = writeln!(out, "[{strip}]");
    for entry in &stats.by_priority {
        let _ = writeln!(
            out,
            "  {} {:<6} {:>4}  ({})",
            priority_glyph(entry.priority),
            entry.priority.as_str(),
            entry.count,
            percent(entry.count, total),
        );
    }
    out
}

fn priority_glyph(priority: Priority) -> char {
    match priority {
        Priority::High => '█',
        Priority::Medium => '▓',
        Priority::Low => '░',
    }
}

fn push_row(out: &mut String, cells: &[String; 5], widths: &[usize; 5]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}", width = *width))
        .collect::<Vec<_>>()
        .join("  ");
    let _ = writeln!(out, "{}", line.trim_end());
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut clipped = text.chars().take(max_chars.saturating_sub(1)).collect::<String>();
    clipped.push('…');
    clipped
}

fn scaled(count: usize, max_count: usize, width: usize) -> usize {
    if max_count == 0 {
        return 0;
    }
    // Any non-zero count stays visible.
    (count * width / max_count).max(usize::from(count > 0))
}

// Largest-remainder split of `width` cells so segments always sum to the full strip.
fn apportion(counts: &[usize], width: usize) -> Vec<usize> {
    let total = counts.iter().sum::<usize>();
    if total == 0 {
        return vec![0; counts.len()];
    }

    let mut cells = counts.iter().map(|count| count * width / total).collect::<Vec<_>>();
    let mut remainders = counts
        .iter()
        .enumerate()
        .map(|(index, count)| (count * width % total, index))
        .collect::<Vec<_>>();
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let assigned = cells.iter().sum::<usize>();
    for (_, index) in remainders.into_iter().take(width - assigned) {
        cells[index] += 1;
    }
    cells
}

fn percent(count: usize, total: usize) -> String {
    if total == 0 {
        return "0.0%".to_string();
    }
    let tenths = (count * 1000 + total / 2) / total;
    format!("{}.{}%", tenths / 10, tenths % 10)
}
