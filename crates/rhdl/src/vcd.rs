use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::HashMap;

/// Change-only VCD waveform writer over a fixed signal list. Values are
/// pulled through a resolver closure at dump time, so the writer has no
/// reference to any simulator.
pub struct VcdWriter {
    writer: BufWriter<File>,
    signals: Vec<(String, usize, String)>,
    last_values: HashMap<String, u64>,
    timestamp: u64,
}

impl VcdWriter {
    pub fn new<P: AsRef<Path>>(path: P, signals: &[(String, usize)]) -> std::io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writeln!(writer, "$date")?;
        writeln!(writer, "  {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(writer, "$end")?;
        writeln!(writer, "$version")?;
        writeln!(writer, "  rhdl")?;
        writeln!(writer, "$end")?;
        writeln!(writer, "$timescale 1ns $end")?;

        writeln!(writer, "$scope module top $end")?;
        let mut ids = Vec::with_capacity(signals.len());
        for (num, (name, width)) in signals.iter().enumerate() {
            let id = Self::vcd_id(num);
            writeln!(writer, "$var wire {width} {id} {name} $end")?;
            ids.push((name.clone(), *width, id));
        }
        writeln!(writer, "$upscope $end")?;
        writeln!(writer, "$enddefinitions $end")?;
        writeln!(writer, "$dumpvars")?;
        writeln!(writer, "$end")?;

        Ok(Self {
            writer,
            signals: ids,
            last_values: HashMap::default(),
            timestamp: 0,
        })
    }

    /// Identifier codes use the printable ASCII range 33..=126, shortest
    /// first.
    fn vcd_id(num: usize) -> String {
        let mut id = String::new();
        let mut n = num;
        loop {
            id.push(((n % 94) + 33) as u8 as char);
            if n < 94 {
                break;
            }
            n = (n / 94) - 1;
        }
        id.chars().rev().collect()
    }

    /// Emits one timestep, writing only the signals whose value changed.
    pub fn dump(
        &mut self,
        timestamp: u64,
        get_value: impl Fn(&str) -> u64,
    ) -> std::io::Result<()> {
        if timestamp > self.timestamp || timestamp == 0 {
            writeln!(self.writer, "#{timestamp}")?;
            self.timestamp = timestamp;
        }
        for (name, width, id) in &self.signals {
            let value = get_value(name);
            if self.last_values.get(name) != Some(&value) {
                if *width == 1 {
                    writeln!(self.writer, "{value}{id}")?;
                } else {
                    writeln!(self.writer, "b{value:b} {id}")?;
                }
                self.last_values.insert(name.clone(), value);
            }
        }
        self.writer.flush()
    }
}
