use rvm_core::report::RunReport;
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

pub fn print_report(report: &RunReport, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(report);
    }

    println!("run {} for {}", report.run_id, report.bundle);
    println!();

    let headers = ["ACCOUNT", "OPERATION", "OUTCOME", "DURATION", "DETAIL"];
    let rows: Vec<Vec<String>> = report
        .results
        .iter()
        .map(|r| {
            vec![
                r.account_id.to_string(),
                r.kind.to_string(),
                r.outcome.to_string(),
                format!("{:.1}s", r.duration.as_secs_f64()),
                r.detail.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&headers, rows);

    println!();
    println!(
        "{} succeeded, {} failed, {} skipped, {} timed out",
        report.succeeded(),
        report.failed(),
        report.skipped(),
        report.timed_out()
    );
    Ok(())
}

fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let header_row: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    println!("{}", header_row.join("  "));

    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", sep.join("  "));

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:width$}", cell, width = w)
            })
            .collect();
        println!("{}", cells.join("  "));
    }
}
