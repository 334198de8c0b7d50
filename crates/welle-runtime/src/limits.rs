//! Resource limits and shared engine context
//!
//! Both engines run against the same `EngineCtx`: a redirectable output
//! writer (so `print` can be captured by the spectest harness and the REPL)
//! and a memory meter. A limit of `0` means unlimited throughout.

use crate::value::RuntimeError;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Shared, thread-safe output writer. Default implementation writes to
/// stdout.
pub type OutputWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Construct a writer that goes to real stdout (the default).
pub fn stdout_writer() -> OutputWriter {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .expect("output buffer poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Construct a writer backed by an in-memory buffer, returning both the
/// writer and a handle to read what was written.
pub fn buffer_writer() -> (OutputWriter, Arc<Mutex<Vec<u8>>>) {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let writer: OutputWriter = Arc::new(Mutex::new(Box::new(SharedBuffer(buffer.clone()))));
    (writer, buffer)
}

/// Drain a buffer handle into a string.
pub fn buffer_contents(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8_lossy(&buffer.lock().expect("output buffer poisoned")).into_owned()
}

/// Allocation budget.
///
/// Charges accrue when allocating values are constructed and are never
/// credited back on release, biasing the budget toward peak allocation.
#[derive(Debug, Clone)]
pub struct MemoryMeter {
    limit: u64,
    used: u64,
}

impl MemoryMeter {
    /// `limit == 0` disables the budget.
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn set_limit(&mut self, limit: u64) {
        self.limit = limit;
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn charge(&mut self, bytes: u64) -> Result<(), RuntimeError> {
        self.used = self.used.saturating_add(bytes);
        if self.limit > 0 && self.used > self.limit {
            Err(RuntimeError::MemoryLimit(self.limit))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryMeter {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Execution context shared between an engine and the builtins it invokes.
pub struct EngineCtx {
    pub output: OutputWriter,
    pub meter: MemoryMeter,
}

impl EngineCtx {
    pub fn new() -> Self {
        Self {
            output: stdout_writer(),
            meter: MemoryMeter::unlimited(),
        }
    }

    pub fn with_output(output: OutputWriter) -> Self {
        Self {
            output,
            meter: MemoryMeter::unlimited(),
        }
    }

    /// Write a line of program output.
    pub fn print_line(&mut self, text: &str) {
        let mut out = self.output.lock().expect("output writer poisoned");
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }
}

impl Default for EngineCtx {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_unlimited_never_trips() {
        let mut meter = MemoryMeter::unlimited();
        assert!(meter.charge(u64::MAX / 2).is_ok());
    }

    #[test]
    fn test_meter_reports_limit_not_usage() {
        let mut meter = MemoryMeter::new(10);
        let err = meter.charge(100).unwrap_err();
        assert_eq!(err.to_string(), "max memory exceeded (10 bytes)");
    }

    #[test]
    fn test_meter_accumulates() {
        let mut meter = MemoryMeter::new(100);
        assert!(meter.charge(60).is_ok());
        assert!(meter.charge(60).is_err());
    }

    #[test]
    fn test_buffer_writer_captures_print() {
        let (writer, buffer) = buffer_writer();
        let mut ctx = EngineCtx::with_output(writer);
        ctx.print_line("hello");
        assert_eq!(buffer_contents(&buffer), "hello\n");
    }
}
