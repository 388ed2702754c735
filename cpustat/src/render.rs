//! Text rendering of decoded records
//!
//! One header line, then one fixed-width row per record, in the same
//! column layout as `/proc/stat` readers expect.

use cpustat_common::CpuStat;
use std::io::{self, Write};

use crate::poll_loop::RecordSink;

const HEADER: [&str; 11] = [
    "CPU",
    "USER",
    "NICE",
    "SYS",
    "IDLE",
    "IOWAIT",
    "IRQ",
    "SOFTIRQ",
    "STEAL",
    "GUEST",
    "GUEST_NICE",
];

const CPU_WIDTH: usize = 10;
const COUNTER_WIDTH: usize = 15;

/// Writes records as a left-aligned table
pub struct TableRenderer<W: Write> {
    out: W,
    header_written: bool,
}

impl<W: Write> TableRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out, header_written: false }
    }

    /// Print the column header (once)
    ///
    /// # Errors
    /// Propagates write errors from the underlying writer
    pub fn write_header(&mut self) -> io::Result<()> {
        if self.header_written {
            return Ok(());
        }
        self.header_written = true;
        let mut line = format!("{:<CPU_WIDTH$}", HEADER[0]);
        for name in &HEADER[1..] {
            line.push_str(&format!(" {name:<COUNTER_WIDTH$}"));
        }
        writeln!(self.out, "{}", line.trim_end())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Format one record as a table row (no trailing newline)
#[must_use]
pub fn format_row(record: &CpuStat) -> String {
    let mut line = format!("{:<CPU_WIDTH$}", record.cpu_id);
    for value in record.counters() {
        line.push_str(&format!(" {value:<COUNTER_WIDTH$}"));
    }
    line.trim_end().to_string()
}

impl<W: Write> RecordSink for TableRenderer<W> {
    fn render(&mut self, record: &CpuStat) -> io::Result<()> {
        self.write_header()?;
        writeln!(self.out, "{}", format_row(record))?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_columns() {
        let rec = CpuStat { cpu_id: 0, user: 100, sys: 50, idle: 9000, ..CpuStat::default() };
        let row = format_row(&rec);
        let cols: Vec<&str> = row.split_whitespace().collect();
        assert_eq!(cols, ["0", "100", "0", "50", "9000", "0", "0", "0", "0", "0", "0"]);
        assert_eq!(&row[CPU_WIDTH + 1..CPU_WIDTH + 4], "100");
    }

    #[test]
    fn test_header_written_once() {
        let mut renderer = TableRenderer::new(Vec::new());
        renderer.write_header().unwrap();
        renderer.render(&CpuStat::default()).unwrap();
        renderer.render(&CpuStat { cpu_id: 1, ..CpuStat::default() }).unwrap();

        let text = String::from_utf8(renderer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("CPU"));
        assert!(lines[0].ends_with("GUEST_NICE"));
        assert!(lines[2].starts_with('1'));
    }
}
