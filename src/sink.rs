//! Output boundary: where each tick's features go.
//!
//! Delivery is a direct synchronous call, once per tick. There is no queue;
//! a sink that falls behind just sees the next tick's value.

use anyhow::{Context, Result};
use std::io::Write;

use crate::fusion::GlobalFeatures;

pub trait FeatureSink: Send {
    fn publish(&mut self, features: &GlobalFeatures) -> Result<()>;
}

/// Writes a debug-level log line per tick.
#[derive(Debug, Default)]
pub struct LogSink;

impl FeatureSink for LogSink {
    fn publish(&mut self, f: &GlobalFeatures) -> Result<()> {
        log::debug!(
            "features: people={} energy={:.2} stationary={:.2} device_use={:.2} bands={}/{}/{}",
            f.total_people,
            f.movement_energy,
            f.stationary_ratio,
            f.device_use_ratio,
            f.slow_count,
            f.medium_count,
            f.fast_count
        );
        Ok(())
    }
}

/// One JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> FeatureSink for JsonLinesSink<W> {
    fn publish(&mut self, features: &GlobalFeatures) -> Result<()> {
        serde_json::to_writer(&mut self.out, features).context("serialize features")?;
        self.out.write_all(b"\n")?;
        self.out.flush().context("flush feature output")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_sink_writes_one_object_per_tick() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.publish(&GlobalFeatures::default()).unwrap();
        sink.publish(&GlobalFeatures {
            total_people: 2,
            movement_energy: 1.5,
            slow_count: 1,
            ..GlobalFeatures::default()
        })
        .unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["total_people"], 2);
        assert_eq!(second["movement_energy"], 1.5);
        assert_eq!(second["slow_count"], 1);
        assert_eq!(second["device_use_ratio"], 0.0);
    }

    #[test]
    fn log_sink_never_fails() {
        assert!(LogSink.publish(&GlobalFeatures::default()).is_ok());
    }
}
