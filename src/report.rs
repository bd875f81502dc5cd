// src/report.rs

//! Tabular rendering of a grid search: one row per C value, one column per
//! gamma value, each cell the cross-validated accuracy at that point.

use log::info;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{PcaError, Result};
use crate::search::ScoredPoint;

/// Label of the top-left cell.
pub const CORNER_LABEL: &str = "C\\G";

/// Digits shown after the decimal point for each accuracy.
pub const DISPLAY_DECIMALS: usize = 2;

/// How `save_to_path` treats an existing file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Add the report after whatever the file already holds.
    Append,
    #[default]
    Overwrite,
}

/// Accuracy grid laid out for display.
#[derive(Clone, Debug, PartialEq)]
pub struct AccuracyReport {
    c_values: Vec<f64>,
    gamma_values: Vec<f64>,
    /// `cells[i][j]` is the accuracy at `(c_values[i], gamma_values[j])`.
    cells: Vec<Vec<Option<f64>>>,
}

impl AccuracyReport {
    /// Lays `results` out over the square grid `2^log_from ..= 2^log_to`.
    ///
    /// Cells are keyed by the `(c_log, gamma_log)` exponents of each result;
    /// a point with no result stays empty.
    pub fn new(results: &[ScoredPoint], log_from: i32, log_to: i32) -> Self {
        let exponents: Vec<i32> = (log_from..=log_to).collect();
        let cells = exponents
            .iter()
            .map(|&c_log| {
                exponents
                    .iter()
                    .map(|&gamma_log| {
                        results
                            .iter()
                            .find(|r| r.c_log == c_log && r.gamma_log == gamma_log)
                            .map(|r| r.accuracy)
                    })
                    .collect()
            })
            .collect();
        let axis: Vec<f64> = exponents.iter().map(|&e| 2f64.powi(e)).collect();
        AccuracyReport {
            c_values: axis.clone(),
            gamma_values: axis,
            cells,
        }
    }

    pub fn c_values(&self) -> &[f64] {
        &self.c_values
    }

    pub fn gamma_values(&self) -> &[f64] {
        &self.gamma_values
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<f64> {
        self.cells.get(row).and_then(|r| r.get(column)).copied().flatten()
    }

    /// Header line followed by one line per C value.
    pub fn records(&self) -> Vec<Vec<String>> {
        let mut records = Vec::with_capacity(self.c_values.len() + 1);
        let mut header = Vec::with_capacity(self.gamma_values.len() + 1);
        header.push(CORNER_LABEL.to_string());
        header.extend(self.gamma_values.iter().map(|g| g.to_string()));
        records.push(header);

        for (c, row) in self.c_values.iter().zip(&self.cells) {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(c.to_string());
            record.extend(row.iter().map(|cell| match cell {
                Some(accuracy) => format!("{:.*}", DISPLAY_DECIMALS, accuracy),
                None => String::new(),
            }));
            records.push(record);
        }
        records
    }

    pub fn write_to<W: Write>(&self, sink: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(sink);
        for record in self.records() {
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// The report as CSV text.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        String::from_utf8(buffer).map_err(|e| PcaError::Serialization(e.to_string()))
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, path: P, mode: WriteMode) -> Result<()> {
        let path = path.as_ref();
        let file = match mode {
            WriteMode::Append => OpenOptions::new().create(true).append(true).open(path)?,
            WriteMode::Overwrite => OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)?,
        };
        let mut sink = BufWriter::new(file);
        self.write_to(&mut sink)?;
        sink.flush()?;
        info!(
            "Wrote {}x{} accuracy report to {}.",
            self.c_values.len(),
            self.gamma_values.len(),
            path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::search::GridPoint;

    fn scored(c_log: i32, gamma_log: i32, accuracy: f64) -> ScoredPoint {
        ScoredPoint {
            point: GridPoint::from_exponents(c_log, gamma_log),
            c_log,
            gamma_log,
            accuracy,
        }
    }

    fn full_grid(log_from: i32, log_to: i32) -> Vec<ScoredPoint> {
        let mut results = Vec::new();
        for c in log_from..=log_to {
            for g in log_from..=log_to {
                results.push(scored(c, g, 0.5));
            }
        }
        results
    }

    #[test]
    fn report_has_header_and_one_row_per_c_value() {
        let (log_from, log_to) = (-1, 2);
        let report = AccuracyReport::new(&full_grid(log_from, log_to), log_from, log_to);
        let text = report.render().unwrap();
        let lines: Vec<&str> = text.lines().collect();
        let width = (log_to - log_from + 2) as usize;

        assert_eq!(lines.len(), (log_to - log_from + 1) as usize + 1);
        assert_eq!(lines[0], "C\\G,0.5,1,2,4");
        for line in &lines {
            assert_eq!(line.split(',').count(), width);
        }
        assert_eq!(lines[1], "0.5,0.50,0.50,0.50,0.50");
    }

    #[test]
    fn accuracies_are_rounded_for_display_only() {
        let results = vec![scored(0, 0, 0.8765), scored(0, 1, 1.0)];
        let report = AccuracyReport::new(&results, 0, 1);
        assert_eq!(report.cell(0, 0), Some(0.8765));
        let text = report.render().unwrap();
        assert_eq!(text.lines().nth(1), Some("1,0.88,1.00"));
    }

    #[test]
    fn tiny_grid_values_keep_their_own_cells() {
        let mut results = Vec::new();
        let mut accuracy = 0.1;
        for c in -15..=-13 {
            for g in -15..=-13 {
                results.push(scored(c, g, accuracy));
                accuracy += 0.1;
            }
        }
        let report = AccuracyReport::new(&results, -15, -13);
        let text = report.render().unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "0.000030517578125,0.10,0.20,0.30");
        assert_eq!(lines[2], "0.00006103515625,0.40,0.50,0.60");
        assert_eq!(lines[3], "0.0001220703125,0.70,0.80,0.90");
    }

    #[test]
    fn missing_points_render_as_empty_cells() {
        let results = vec![scored(0, 0, 0.25)];
        let report = AccuracyReport::new(&results, 0, 1);
        assert_eq!(report.cell(1, 1), None);
        let text = report.render().unwrap();
        assert_eq!(text.lines().nth(2), Some("2,,"));
    }

    #[test]
    fn append_mode_keeps_earlier_reports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.csv");
        let report = AccuracyReport::new(&full_grid(0, 0), 0, 0);

        report.save_to_path(&path, WriteMode::Overwrite).unwrap();
        report.save_to_path(&path, WriteMode::Append).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 4);

        report.save_to_path(&path, WriteMode::Overwrite).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
