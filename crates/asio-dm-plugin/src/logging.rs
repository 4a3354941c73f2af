//! Trace output to the debugger channel.
//!
//! The plugin runs inside a DAW without a console, so formatted events go
//! to `OutputDebugStringW` (visible in DebugView or an attached debugger),
//! one call per event, each prefixed with [`PREFIX`].

use std::io;

use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Marks every line written by the plugin.
pub const PREFIX: &str = "[ASIO-DM]";

/// Writer factory handing out one buffer per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugOutput;

impl<'a> MakeWriter<'a> for DebugOutput {
    type Writer = DebugLine;

    fn make_writer(&'a self) -> Self::Writer {
        DebugLine::default()
    }
}

/// Collects one formatted event and emits it when dropped.
#[derive(Debug, Default)]
pub struct DebugLine {
    buf: Vec<u8>,
}

impl io::Write for DebugLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for DebugLine {
    fn drop(&mut self) {
        if let Some(line) = format_line(&self.buf) {
            emit(&line);
        }
    }
}

fn format_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_end();
    (!text.is_empty()).then(|| format!("{PREFIX} {text}\n"))
}

#[cfg(windows)]
#[allow(unsafe_code)]
fn emit(line: &str) {
    use widestring::U16CString;
    use windows::Win32::System::Diagnostics::Debug::OutputDebugStringW;
    use windows::core::PCWSTR;

    let wide = U16CString::from_str_truncate(line);
    // SAFETY: `wide` is NUL-terminated and outlives the call.
    unsafe { OutputDebugStringW(PCWSTR(wide.as_ptr())) };
}

#[cfg(not(windows))]
fn emit(line: &str) {
    eprint!("{line}");
}

/// Install the global subscriber. Later calls, or a host that already
/// installed one, leave the existing subscriber in place.
pub fn init(level: &str) {
    let (filter, invalid) = match EnvFilter::try_new(level) {
        Ok(filter) => (filter, None),
        Err(e) => (EnvFilter::new("info"), Some(e)),
    };

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(true)
        .with_writer(DebugOutput)
        .try_init()
        .is_ok();

    if let Some(e) = invalid {
        warn!(level, error = %e, "Invalid log level, using info");
    }
    if !installed {
        tracing::debug!("Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_lines_are_prefixed_and_trimmed() {
        assert_eq!(
            format_line(b" INFO asio_dm: Hello\n").as_deref(),
            Some("[ASIO-DM]  INFO asio_dm: Hello\n")
        );
    }

    #[test]
    fn test_empty_events_are_dropped() {
        assert_eq!(format_line(b""), None);
        assert_eq!(format_line(b"\r\n"), None);
    }

    #[test]
    fn test_writer_buffers_until_dropped() {
        let mut line = DebugOutput.make_writer();
        line.write_all(b"part one, ").expect("write");
        line.write_all(b"part two\n").expect("write");
        assert_eq!(line.buf, b"part one, part two\n");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init("debug");
        init("not a [valid filter");
    }
}
