use clap::ValueEnum;
use std::io::{self, Write};

use super::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SampleFormat {
    /// `<timestamp_ns> <power_mw>` per line, no header.
    #[default]
    Plain,
    /// `timestamp,power_mw` header followed by one row per sample.
    Csv,
    /// One JSON object per line.
    Json,
}

enum Encoder {
    Plain(Box<dyn Write + Send>),
    Csv(csv::Writer<Box<dyn Write + Send>>),
    Json(Box<dyn Write + Send>),
}

/// Destination of the sample stream. Every record is flushed as soon as it is
/// written so a consumer can tail the output live.
pub struct SampleSink {
    encoder: Encoder,
}

impl SampleSink {
    pub fn new(out: Box<dyn Write + Send>, format: SampleFormat) -> Self {
        let encoder = match format {
            SampleFormat::Plain => Encoder::Plain(out),
            SampleFormat::Csv => Encoder::Csv(csv::Writer::from_writer(out)),
            SampleFormat::Json => Encoder::Json(out),
        };
        SampleSink { encoder }
    }

    pub fn stdout(format: SampleFormat) -> Self {
        Self::new(Box::new(io::stdout()), format)
    }

    pub fn write(&mut self, sample: &Sample) -> io::Result<()> {
        match &mut self.encoder {
            Encoder::Plain(out) => {
                writeln!(out, "{} {}", sample.timestamp, sample.power_mw)?;
                out.flush()
            }
            Encoder::Csv(writer) => {
                writer.serialize(sample).map_err(io::Error::other)?;
                writer.flush()
            }
            Encoder::Json(out) => {
                serde_json::to_writer(&mut *out, sample)?;
                out.write_all(b"\n")?;
                out.flush()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn render(format: SampleFormat, samples: &[Sample]) -> String {
        let buf = SharedBuf::default();
        let mut sink = SampleSink::new(Box::new(buf.clone()), format);
        for sample in samples {
            sink.write(sample).unwrap();
        }
        buf.text()
    }

    const SAMPLES: [Sample; 2] = [
        Sample {
            timestamp: 1_700_000_000_000_000_000,
            power_mw: 45_210,
        },
        Sample {
            timestamp: 1_700_000_000_010_000_000,
            power_mw: 61_004,
        },
    ];

    #[test]
    fn plain_is_space_separated_without_header() {
        assert_eq!(
            render(SampleFormat::Plain, &SAMPLES),
            "1700000000000000000 45210\n1700000000010000000 61004\n"
        );
    }

    #[test]
    fn csv_writes_header_once() {
        assert_eq!(
            render(SampleFormat::Csv, &SAMPLES),
            "timestamp,power_mw\n1700000000000000000,45210\n1700000000010000000,61004\n"
        );
    }

    #[test]
    fn json_is_one_object_per_line() {
        let out = render(SampleFormat::Json, &SAMPLES[..1]);
        assert_eq!(out, "{\"timestamp\":1700000000000000000,\"power_mw\":45210}\n");
    }

    #[test]
    fn records_are_visible_before_sink_is_dropped() {
        let buf = SharedBuf::default();
        let mut sink = SampleSink::new(Box::new(buf.clone()), SampleFormat::Csv);
        sink.write(&SAMPLES[0]).unwrap();
        assert_eq!(buf.text().lines().count(), 2);
    }
}
