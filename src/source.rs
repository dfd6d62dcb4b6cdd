//! Log source abstraction.
//!
//! The driver thread blocks on [`LogSource::next_line`], which for a live
//! `varnishlog` pipe can block indefinitely. Every source therefore hands out
//! a [`SourceCloser`] that the [`Manager`](crate::manager::Manager) uses to
//! close the source from another thread, forcing a blocked read to return.

use std::{
    io::{
        self,
        BufRead,
        BufReader,
    },
    process::{
        Child,
        ChildStdout,
        Command,
        Stdio,
    },
    sync::{
        Arc,
        Mutex,
    },
};

/// Blocking, line-oriented log input.
pub trait LogSource: Send {
    /// Read the next raw line, blocking until one is available.
    /// `Ok(None)` means the source is exhausted at the transport level.
    fn next_line(&mut self) -> io::Result<Option<String>>;

    /// Handle that closes this source from another thread.
    fn closer(&self) -> SourceCloser {
        SourceCloser::noop()
    }
}

/// Clonable handle that closes a [`LogSource`] out-of-band.
#[derive(Debug, Clone, Default)]
pub struct SourceCloser {
    child: Option<Arc<Mutex<Child>>>,
}

impl SourceCloser {
    pub fn noop() -> Self {
        Self::default()
    }

    /// Close the underlying source. For a command source this kills the
    /// child process so the reader sees end-of-stream; for readers it is a
    /// no-op and shutdown relies on the stream ending.
    pub fn close(&self) {
        if let Some(child) = &self.child {
            let mut child = child.lock().unwrap();
            if let Err(err) = child.kill() {
                debug!(%err, "log source child already gone");
            }
            let _ = child.wait();
        }
    }
}

/// Log source backed by the stdout of a spawned command, typically a live
/// `varnishlog` invocation.
#[derive(Debug)]
pub struct CommandSource {
    reader: BufReader<ChildStdout>,
    child: Arc<Mutex<Child>>,
}

impl CommandSource {
    /// Spawn `command` through the shell and consume its stdout.
    pub fn spawn(command: &str) -> io::Result<Self> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stdin(Stdio::null())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child has no stdout"))?;
        info!(command, pid = child.id(), "spawned log source");
        Ok(Self {
            reader: BufReader::new(stdout),
            child: Arc::new(Mutex::new(child)),
        })
    }
}

impl LogSource for CommandSource {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        read_line(&mut self.reader)
    }

    fn closer(&self) -> SourceCloser {
        SourceCloser {
            child: Some(self.child.clone()),
        }
    }
}

impl Drop for CommandSource {
    fn drop(&mut self) {
        self.closer().close();
    }
}

/// Log source over any buffered reader: a log file, stdin, or an in-memory
/// cursor in tests.
#[derive(Debug)]
pub struct ReaderSource<R> {
    reader: R,
}

impl<R: BufRead + Send> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead + Send> LogSource for ReaderSource<R> {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        read_line(&mut self.reader)
    }
}

fn read_line(reader: &mut impl BufRead) -> io::Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    #[test]
    fn reader_source_yields_lines_then_none() {
        let mut source = ReaderSource::new(Cursor::new("one\r\ntwo\n"));
        assert_eq!(source.next_line().unwrap(), Some("one".to_string()));
        assert_eq!(source.next_line().unwrap(), Some("two".to_string()));
        assert_eq!(source.next_line().unwrap(), None);
    }

    #[test]
    fn command_source_close_unblocks_reader() {
        let mut source = CommandSource::spawn("printf 'a\\nb\\n'; exec sleep 60").unwrap();
        let closer = source.closer();
        assert_eq!(source.next_line().unwrap(), Some("a".to_string()));
        assert_eq!(source.next_line().unwrap(), Some("b".to_string()));
        closer.close();
        assert_eq!(source.next_line().unwrap(), None);
    }
}
