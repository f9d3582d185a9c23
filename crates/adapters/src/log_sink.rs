//! Line-oriented output shared by the JSON logger and the metric sink.

use std::io::Write;

/// Destination for complete, newline-terminated lines.
pub trait LogSink: Send + Sync {
    /// Write one line. Implementations must not interleave concurrent lines.
    fn write_line(&self, line: &str);
}

/// Writes to stdout, where the platform collects function logs.
#[derive(Debug, Default)]
pub struct StdoutLogSink;

impl LogSink for StdoutLogSink {
    fn write_line(&self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        if let Err(error) = stdout.write_all(line.as_bytes()) {
            eprintln!("stdout log sink: {error}");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::LogSink;
    use serde_json::Value;
    use std::sync::Mutex;

    /// Collects lines in memory.
    #[derive(Debug, Default)]
    pub struct LineBuffer {
        lines: Mutex<Vec<String>>,
    }

    impl LineBuffer {
        pub fn drain(&self) -> Vec<String> {
            std::mem::take(&mut *self.lines.lock().expect("line buffer lock"))
        }

        pub fn drain_json(&self) -> Result<Vec<Value>, serde_json::Error> {
            self.drain()
                .iter()
                .map(|line| serde_json::from_str(line.trim_end()))
                .collect()
        }
    }

    impl LogSink for LineBuffer {
        fn write_line(&self, line: &str) {
            self.lines
                .lock()
                .expect("line buffer lock")
                .push(line.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LogSink;
    use super::testing::LineBuffer;
    use std::sync::Arc;

    #[test]
    fn concurrent_writers_keep_lines_whole() {
        let buffer = Arc::new(LineBuffer::default());
        let sink: Arc<dyn LogSink> = buffer.clone();

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let sink = Arc::clone(&sink);
                scope.spawn(move || sink.write_line(&format!("{{\"worker\":{worker}}}\n")));
            }
        });

        let mut lines = buffer.drain();
        lines.sort();
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|line| line.ends_with("}\n")));
    }
}
