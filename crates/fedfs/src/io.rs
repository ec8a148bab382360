//! Streams handed out by controllers and the buffers behind them.

use crate::controller::resource::StreamControl;
use crate::error::{FsError, FsResult};
use log::warn;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use tempfile::SpooledTempFile;

/// Hands out [`IoBuffer`]s which keep up to `threshold` bytes in memory.
#[derive(Debug, Clone, Copy)]
pub struct IoBufferPool {
    threshold: usize,
}

impl IoBufferPool {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn allocate(&self) -> IoBuffer {
        IoBuffer {
            file: SpooledTempFile::new(self.threshold),
            len: 0,
        }
    }
}

impl Default for IoBufferPool {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

/// Scratch storage which spills to a temporary file once it grows large.
#[derive(Debug)]
pub struct IoBuffer {
    file: SpooledTempFile,
    len: u64,
}

impl IoBuffer {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_spilled(&self) -> bool {
        self.file.is_rolled()
    }

    /// Rewind for reading back what has been written.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0)).map(|_| ())
    }
}

impl Read for IoBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for IoBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        let end = self.file.stream_position()?;
        self.len = self.len.max(end);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for IoBuffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

fn closed_error(err: FsError) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, err)
}

/// Stream of entry content.
pub struct InputStream {
    inner: Box<dyn Read + Send>,
    control: Option<Arc<StreamControl>>,
}

impl InputStream {
    pub fn new<R: Read + Send + 'static>(inner: R) -> Self {
        Self {
            inner: Box::new(inner),
            control: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(io::empty())
    }

    pub(crate) fn accounted(mut self, control: Arc<StreamControl>) -> Self {
        self.control = Some(control);
        self
    }

    /// Read everything that is left.
    pub fn read_to_vec(mut self) -> FsResult<Vec<u8>> {
        let mut data = Vec::new();
        self.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl Read for InputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(control) = &self.control {
            if control.is_closed() {
                return Err(closed_error(FsError::InputClosed));
            }
        }
        self.inner.read(buf)
    }
}

impl Drop for InputStream {
    fn drop(&mut self) {
        if let Some(control) = self.control.take() {
            control.close_with(|_| ());
        }
    }
}

impl fmt::Debug for InputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputStream")
            .field("accounted", &self.control.is_some())
            .finish()
    }
}

/// Destination of an [`OutputStream`]: buffers content and commits it.
pub trait EntrySink: Write + Send {
    /// Make the written content visible.
    fn commit(self: Box<Self>) -> FsResult<()>;

    /// Throw the written content away.
    fn discard(self: Box<Self>) {}
}

/// Stream which writes entry content.
///
/// Nothing is visible before [`finish`](OutputStream::finish) succeeds.
/// Dropping the stream without finishing it discards the content.
pub struct OutputStream {
    name: String,
    sink: Option<Box<dyn EntrySink>>,
    control: Option<Arc<StreamControl>>,
}

impl OutputStream {
    pub fn new(name: impl Into<String>, sink: Box<dyn EntrySink>) -> Self {
        Self {
            name: name.into(),
            sink: Some(sink),
            control: None,
        }
    }

    pub(crate) fn accounted(mut self, control: Arc<StreamControl>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Commit the content.
    pub fn finish(mut self) -> FsResult<()> {
        let sink = self.sink.take().ok_or(FsError::OutputClosed)?;
        match self.control.take() {
            None => sink.commit(),
            Some(control) => control.close_with(|forced| {
                if forced {
                    sink.discard();
                    Err(FsError::OutputClosed)
                } else {
                    sink.commit()
                }
            }),
        }
    }

    /// Throw the content away.
    pub fn discard(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let sink = self.sink.take();
        match self.control.take() {
            Some(control) => control.close_with(|_| {
                if let Some(sink) = sink {
                    sink.discard();
                }
            }),
            None => {
                if let Some(sink) = sink {
                    sink.discard();
                }
            }
        }
    }
}

impl Write for OutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(control) = &self.control {
            if control.is_closed() {
                return Err(closed_error(FsError::OutputClosed));
            }
        }
        match self.sink.as_mut() {
            Some(sink) => sink.write(buf),
            None => Err(closed_error(FsError::OutputClosed)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        if self.sink.is_some() {
            warn!("output stream for {} dropped without finish, discarding", self.name);
            self.release();
        }
    }
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStream")
            .field("name", &self.name)
            .field("open", &self.sink.is_some())
            .finish()
    }
}

/// Sink collecting content in memory, handing it to a closure on commit.
pub struct VecSink<F: FnOnce(Vec<u8>) -> FsResult<()> + Send> {
    data: Vec<u8>,
    on_commit: F,
}

impl<F: FnOnce(Vec<u8>) -> FsResult<()> + Send> VecSink<F> {
    pub fn new(on_commit: F) -> Self {
        Self {
            data: Vec::new(),
            on_commit,
        }
    }
}

impl<F: FnOnce(Vec<u8>) -> FsResult<()> + Send> Write for VecSink<F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<F: FnOnce(Vec<u8>) -> FsResult<()> + Send> EntrySink for VecSink<F> {
    fn commit(self: Box<Self>) -> FsResult<()> {
        let this = *self;
        (this.on_commit)(this.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn io_buffer_spills_past_threshold() {
        let pool = IoBufferPool::new(8);
        let mut buffer = pool.allocate();
        buffer.write_all(b"0123").unwrap();
        assert!(!buffer.is_spilled());
        buffer.write_all(b"456789abcdef").unwrap();
        assert!(buffer.is_spilled());
        assert_eq!(buffer.len(), 16);

        buffer.rewind().unwrap();
        let mut back = String::new();
        buffer.read_to_string(&mut back).unwrap();
        assert_eq!(back, "0123456789abcdef");
    }

    #[test]
    fn finish_commits_and_drop_discards() {
        let committed = Arc::new(Mutex::new(Vec::new()));

        let sink = {
            let committed = Arc::clone(&committed);
            VecSink::new(move |data| {
                committed.lock().push(data);
                Ok(())
            })
        };
        let mut out = OutputStream::new("kept", Box::new(sink));
        out.write_all(b"kept").unwrap();
        out.finish().unwrap();

        let sink = {
            let committed = Arc::clone(&committed);
            VecSink::new(move |data| {
                committed.lock().push(data);
                Ok(())
            })
        };
        let mut out = OutputStream::new("lost", Box::new(sink));
        out.write_all(b"lost").unwrap();
        drop(out);

        assert_eq!(*committed.lock(), vec![b"kept".to_vec()]);
    }

    #[test]
    fn input_stream_reads_to_vec() {
        let stream = InputStream::new(io::Cursor::new(b"abc".to_vec()));
        assert_eq!(stream.read_to_vec().unwrap(), b"abc");
    }
}
