//! Statistics writer (spec.md §4.I): periodic vector snapshots and a
//! terminal scalar summary, written to append-only sinks that may be
//! transparently gzip-compressed by filename.
//!
//! Grounded in the original meter's `outputfile.h`/
//! `gStatisticsWriter.writeVectorStatistics`/`writeScalarStatistics`
//! (`examples/original_source/`). Compressed output was the explicit
//! external-collaborator cut in spec.md §1 ("a sink with
//! open/append-line/close semantics"); `StatsSink` is that seam, and
//! `flate2` (the gzip crate this corpus's networking/logging tools reach
//! for -- see `other_examples/manifests/vectordotdev-vector/Cargo.toml`)
//! backs the compressed variant, replacing the original's bzip2 choice.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::flow::FlowSpec;

/// Append-only output sink. `open`/`append_line`/`close` mirror spec.md
/// §1's explicit interface for the file-writing collaborator.
pub trait StatsSink: Send {
    fn append_line(&mut self, line: &str) -> io::Result<()>;
    fn close(&mut self) -> io::Result<()>;
}

enum Writer {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

/// Plain-text or gzip-compressed append-only sink, chosen by whether
/// `path` ends in `.gz` (spec.md §6: "may be transparently compressed,
/// decided by filename").
pub struct FileSink {
    writer: Writer,
}

impl FileSink {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let buffered = BufWriter::new(file);
        let writer = if path.extension().and_then(|e| e.to_str()) == Some("gz") {
            Writer::Gzip(GzEncoder::new(buffered, Compression::default()))
        } else {
            Writer::Plain(buffered)
        };
        Ok(Self { writer })
    }
}

impl StatsSink for FileSink {
    fn append_line(&mut self, line: &str) -> io::Result<()> {
        match &mut self.writer {
            Writer::Plain(w) => {
                w.write_all(line.as_bytes())?;
                w.write_all(b"\n")
            }
            Writer::Gzip(w) => {
                w.write_all(line.as_bytes())?;
                w.write_all(b"\n")
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match &mut self.writer {
            Writer::Plain(w) => w.flush(),
            Writer::Gzip(w) => w.try_finish(),
        }
    }
}

/// In-memory sink for tests: avoids touching the filesystem while
/// exercising the same `StatsSink` seam.
#[derive(Default)]
pub struct MemorySink {
    pub lines: Vec<String>,
    pub closed: bool,
}

impl StatsSink for MemorySink {
    fn append_line(&mut self, line: &str) -> io::Result<()> {
        self.lines.push(line.to_string());
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Default snapshot period (spec.md §4.I: "default 1 s").
pub const DEFAULT_SNAPSHOT_PERIOD_MICROS: u64 = 1_000_000;

/// Owns the two optional sinks and the next-snapshot deadline the
/// scheduler merges into its own deadline computation (spec.md §4.I/§4.E).
pub struct StatisticsWriter {
    vector: Option<Box<dyn StatsSink>>,
    scalar: Option<Box<dyn StatsSink>>,
    period: u64,
    pub next_event: u64,
}

impl StatisticsWriter {
    pub fn new(
        vector: Option<Box<dyn StatsSink>>,
        scalar: Option<Box<dyn StatsSink>>,
        period: u64,
    ) -> Self {
        Self {
            vector,
            scalar,
            period,
            next_event: u64::MAX,
        }
    }

    pub fn start(&mut self, now: u64) {
        if self.vector.is_some() {
            self.next_event = now + self.period;
        } else {
            self.next_event = u64::MAX;
        }
    }

    /// One self-describing ASCII line per flow per tick, to the vector
    /// sink (spec.md §4.I). Advances counter deltas on every flow.
    pub fn snapshot(&mut self, flows: &mut dyn Iterator<Item = &mut FlowSpec>, now: u64) -> io::Result<()> {
        if let Some(sink) = self.vector.as_mut() {
            for flow in flows {
                let (d_tx_bytes, d_tx_frames, d_rx_bytes, d_rx_frames) = flow.counters.take_deltas();
                let line = format!(
                    "t={now} measurement={} flow={} stream={} tx_bytes={d_tx_bytes} tx_frames={d_tx_frames} rx_bytes={d_rx_bytes} rx_frames={d_rx_frames}",
                    flow.measurement_id, flow.flow_id, flow.stream_id,
                );
                sink.append_line(&line)?;
            }
        }
        self.next_event = if self.vector.is_some() {
            now + self.period
        } else {
            u64::MAX
        };
        Ok(())
    }

    /// One summary line per flow at stop time (spec.md §4.I/§3.5).
    pub fn write_scalar_summary(&mut self, flows: &mut dyn Iterator<Item = &FlowSpec>) -> io::Result<()> {
        if let Some(sink) = self.scalar.as_mut() {
            for flow in flows {
                let c = &flow.counters;
                let line = format!(
                    "measurement={} flow={} stream={} description={:?} tx_bytes={} tx_packets={} tx_frames={} rx_bytes={} rx_packets={} rx_frames={} first_tx={} last_tx={} first_rx={} last_rx={}",
                    flow.measurement_id, flow.flow_id, flow.stream_id, flow.description,
                    c.tx_bytes, c.tx_packets, c.tx_frames,
                    c.rx_bytes, c.rx_packets, c.rx_frames,
                    c.first_transmission, c.last_transmission,
                    c.first_reception, c.last_reception,
                );
                sink.append_line(&line)?;
            }
        }
        Ok(())
    }

    pub fn close(&mut self) -> io::Result<()> {
        if let Some(s) = self.vector.as_mut() {
            s.close()?;
        }
        if let Some(s) = self.scalar.as_mut() {
            s.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Distribution;
    use crate::flow::{Protocol, RateSize};

    fn flow() -> FlowSpec {
        FlowSpec::new(
            1,
            1,
            0,
            "t".into(),
            Protocol::ReliableStream,
            RateSize {
                rate: Distribution::Constant(10.0),
                size: Distribution::Constant(100.0),
            },
            RateSize {
                rate: Distribution::Constant(10.0),
                size: Distribution::Constant(100.0),
            },
            0.0,
            0.0,
            vec![],
        )
    }

    #[test]
    fn snapshot_writes_one_line_per_flow_and_reschedules() {
        let sink = Box::new(MemorySink::default());
        let mut writer = StatisticsWriter::new(Some(sink), None, DEFAULT_SNAPSHOT_PERIOD_MICROS);
        writer.start(0);
        assert_eq!(writer.next_event, DEFAULT_SNAPSHOT_PERIOD_MICROS);

        let mut f = flow();
        f.counters.tx_bytes = 1000;
        f.counters.tx_frames = 10;
        let mut flows = vec![f];
        writer
            .snapshot(&mut flows.iter_mut(), DEFAULT_SNAPSHOT_PERIOD_MICROS)
            .unwrap();
        assert_eq!(writer.next_event, 2 * DEFAULT_SNAPSHOT_PERIOD_MICROS);
    }

    #[test]
    fn without_vector_sink_next_event_is_infinite() {
        let mut writer = StatisticsWriter::new(None, None, DEFAULT_SNAPSHOT_PERIOD_MICROS);
        writer.start(0);
        assert_eq!(writer.next_event, u64::MAX);
    }

    #[test]
    fn scalar_summary_emits_one_line_at_stop() {
        let scalar = Box::new(MemorySink::default());
        let mut writer = StatisticsWriter::new(None, Some(scalar), DEFAULT_SNAPSHOT_PERIOD_MICROS);
        let f = flow();
        let flows = vec![f];
        writer.write_scalar_summary(&mut flows.iter()).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn gz_extension_selects_gzip_writer() {
        let dir = std::env::temp_dir().join(format!("netmeter-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("vector.gz");
        let mut sink = FileSink::open(&path).unwrap();
        sink.append_line("hello").unwrap();
        sink.close().unwrap();
        let contents = std::fs::read(&path).unwrap();
        // Gzip magic bytes.
        assert_eq!(&contents[0..2], &[0x1f, 0x8b]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn plain_extension_writes_plain_text() {
        let dir = std::env::temp_dir().join(format!("netmeter-test-plain-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("vector.txt");
        let mut sink = FileSink::open(&path).unwrap();
        sink.append_line("hello").unwrap();
        sink.close().unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "hello\n");
        std::fs::remove_dir_all(&dir).ok();
    }
}
