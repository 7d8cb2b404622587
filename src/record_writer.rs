/*
 psbench
 Copyright 2022-2023 Peter Pearson.
 Licensed under the Apache License, Version 2.0 (the "License");
 You may not use this file except in compliance with the License.
 You may obtain a copy of the License at
 http://www.apache.org/licenses/LICENSE-2.0
 Unless required by applicable law or agreed to in writing, software
 distributed under the License is distributed on an "AS IS" BASIS,
 WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 See the License for the specific language governing permissions and
 limitations under the License.
 ---------
*/

use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};

use crate::benchmark_record::{BenchmarkRecord, ReportMode};

pub fn print_benchmark_records<W: Write>(records: &[BenchmarkRecord], writer: &mut W, head: bool, mode: ReportMode) -> io::Result<()> {
    if head {
        writeln!(writer, "{}", BenchmarkRecord::header())?;
    }
    for record in records {
        writeln!(writer, "{}", record.to_tsv(mode))?;
    }
    Ok(())
}

/// Writes records to the file at `path`, truncating it unless `append` is set.
pub fn write_benchmark_records(records: &[BenchmarkRecord], path: &Path, head: bool, append: bool, mode: ReportMode) -> io::Result<()> {
    let mut file = open_report_file(path, append)?;
    print_benchmark_records(records, &mut file, head, mode)?;
    file.flush()
}

fn open_report_file(path: &Path, append: bool) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
}

/// Append-only destination for one real-time line per sampling tick.
///
/// The file is truncated and gets the header when the sink is opened; every
/// line is flushed as soon as it is written so the file can be tailed.
pub struct RealTimeSink {
    path:   PathBuf,
    writer: LineWriter<File>,
}

impl RealTimeSink {
    pub fn create(path: &Path) -> io::Result<RealTimeSink> {
        let mut writer = LineWriter::new(open_report_file(path, false)?);
        print_benchmark_records(&[], &mut writer, true, ReportMode::RealTime)?;
        Ok(RealTimeSink { path: path.to_path_buf(), writer })
    }

    pub fn append(&mut self, record: &BenchmarkRecord) -> io::Result<()> {
        print_benchmark_records(std::slice::from_ref(record), &mut self.writer, false, ReportMode::RealTime)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
