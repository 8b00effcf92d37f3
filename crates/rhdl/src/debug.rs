use crate::sim::Simulator;

/// Which signals a [`TraceCapture`] records. The default records every port
/// of every component plus the clock generators.
#[derive(Debug, Clone, Default)]
pub struct TraceOptions {
    pub signals: Option<Vec<String>>,
}

impl TraceOptions {
    pub fn only(signals: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { signals: Some(signals.into_iter().map(Into::into).collect()) }
    }
}

/// Step-indexed value history, the hook consumed by waveform and debug
/// front-ends. One row per `capture` call.
#[derive(Debug, Clone)]
pub struct TraceCapture {
    signals: Vec<String>,
    rows: Vec<(u64, Vec<u64>)>,
}

impl TraceCapture {
    pub fn new(sim: &Simulator, options: &TraceOptions) -> Self {
        let signals = match &options.signals {
            Some(list) => list.clone(),
            None => sim.trace_signals().into_iter().map(|(n, _)| n).collect(),
        };
        Self { signals, rows: Vec::new() }
    }

    pub fn signals(&self) -> &[String] {
        &self.signals
    }

    pub fn capture(&mut self, sim: &Simulator) {
        let values = self
            .signals
            .iter()
            .map(|name| sim.peek(name).unwrap_or(0))
            .collect();
        self.rows.push((sim.steps(), values));
    }

    pub fn rows(&self) -> &[(u64, Vec<u64>)] {
        &self.rows
    }

    /// Most recent value of one signal, if it was captured.
    pub fn last(&self, signal: &str) -> Option<u64> {
        let idx = self.signals.iter().position(|s| s == signal)?;
        self.rows.last().map(|(_, values)| values[idx])
    }

    /// Value history of one signal across all captured rows.
    pub fn history(&self, signal: &str) -> Option<Vec<u64>> {
        let idx = self.signals.iter().position(|s| s == signal)?;
        Some(self.rows.iter().map(|(_, values)| values[idx]).collect())
    }
}
