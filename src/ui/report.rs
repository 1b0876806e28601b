//! Histogram reporting: console table, CSV export and PNG chart
//!
//! Pure presentation over a `StatsSnapshot`; nothing here touches the
//! sampling thread.

use std::io::{self, Error, ErrorKind};
use std::path::Path;

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};

use crate::stats::{StatsSnapshot, BUCKET_COUNT, BUCKET_WIDTH_SECONDS};

/// Build the bucket table: one row per non-empty bucket with its interval,
/// count and share of recorded samples. The overflow row shows the largest
/// observed interval instead of the bucket's nominal value.
pub fn histogram_table(snapshot: &StatsSnapshot) -> Table {
    let mut total = snapshot.recorded_samples();
    if total == 0 {
        total = 1;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Seconds", "Count", "%"]);

    for (i, &count) in snapshot.histogram.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let seconds = if i == BUCKET_COUNT - 1 {
            format!("{:.4} (max)", snapshot.max_observed_interval)
        } else {
            format!("{:.4}", i as f64 * BUCKET_WIDTH_SECONDS)
        };
        let percent = count as f64 * 100.0 / total as f64;
        table.add_row(vec![
            seconds,
            count.to_string(),
            format!("{percent:.2}"),
        ]);
    }
    table
}

/// Print the run summary and the bucket table to the console.
pub fn print_report(snapshot: &StatsSnapshot) {
    println!();
    println!("{}", "Run Statistics".bold().yellow());
    println!("━━━━━━━━━━━━━━");
    println!(
        "   Average period:   {:.4} s",
        snapshot.running_average_period
    );
    println!(
        "   Max interval:     {:.4} s",
        snapshot.max_observed_interval
    );
    println!("   Total samples:    {}", snapshot.total_sample_count);
    println!("   Recorded samples: {}", snapshot.recorded_samples());
    println!();
    if snapshot.recorded_samples() > 0 {
        println!("{}", histogram_table(snapshot));
    } else {
        println!("{}", "No samples survived warm-up.".bold().red());
    }
}

/// Export every non-empty bucket to a CSV file.
pub fn write_csv(snapshot: &StatsSnapshot, path: &Path) -> io::Result<()> {
    let mut total = snapshot.recorded_samples();
    if total == 0 {
        total = 1;
    }

    let mut writer =
        csv::Writer::from_path(path).map_err(|e| Error::new(ErrorKind::Other, e))?;
    writer
        .write_record(["bucket_seconds", "count", "percent"])
        .map_err(|e| Error::new(ErrorKind::Other, e))?;
    for (i, &count) in snapshot.histogram.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let seconds = if i == BUCKET_COUNT - 1 {
            snapshot.max_observed_interval
        } else {
            i as f64 * BUCKET_WIDTH_SECONDS
        };
        writer
            .write_record([
                format!("{seconds:.4}"),
                count.to_string(),
                format!("{:.2}", count as f64 * 100.0 / total as f64),
            ])
            .map_err(|e| Error::new(ErrorKind::Other, e))?;
    }
    writer.flush()
}

/// Render the histogram to a PNG chart. Chart rendering needs system fonts
/// for labels, so callers treat a failure here as a warning, not an error.
pub fn render_chart(snapshot: &StatsSnapshot, path: &Path) -> io::Result<()> {
    use plotters::prelude::*;

    let max_count = snapshot.histogram.iter().copied().max().unwrap_or(0).max(1);
    let root = BitMapBackend::new(path, (1024, 480)).into_drawing_area();
    let draw = || -> Result<(), Box<dyn std::error::Error>> {
        root.fill(&WHITE)?;
        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .caption("Inter-sample interval distribution", ("sans-serif", 22))
            .build_cartesian_2d(
                (0u32..BUCKET_COUNT as u32).into_segmented(),
                0u64..max_count,
            )?;
        chart
            .configure_mesh()
            .x_desc("bucket (0.1 ms)")
            .y_desc("samples")
            .draw()?;
        chart.draw_series(
            Histogram::vertical(&chart).style(BLUE.filled()).data(
                snapshot
                    .histogram
                    .iter()
                    .enumerate()
                    .filter(|(_, &count)| count > 0)
                    .map(|(i, &count)| (i as u32, count)),
            ),
        )?;
        root.present()?;
        Ok(())
    };
    draw().map_err(|e| Error::new(ErrorKind::Other, e.to_string()))
}
