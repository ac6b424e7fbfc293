//! Exact-transfer I/O primitives.
//!
//! Both forwarding threads move whole frames, so every transfer is
//! all-or-nothing: the caller either gets the full buffer, a clean
//! end-of-stream (reads only), or a hard error. Short counts never leak
//! out, and interrupted syscalls are retried here rather than at each
//! call site.

use std::io::{self, Read, Write};
use std::time::Duration;

/// Delay before retrying a zero-byte write on the shared transport.
///
/// The host side of the virtio port can report a zero-byte write while it
/// is not draining; the reference protocol treats this as "wait and try
/// again", not as an error.
const WRITE_BACKOFF: Duration = Duration::from_secs(1);

/// Outcome of [`read_exact_or_eof`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The buffer was completely filled.
    Filled,
    /// The peer orderly-closed before the first byte was read.
    Eof,
}

/// Read exactly `buf.len()` bytes, or detect a clean end-of-stream.
///
/// Returns [`ReadOutcome::Eof`] only when the stream ends before the first
/// byte; an EOF mid-buffer is an [`io::ErrorKind::UnexpectedEof`] error.
/// Retries transparently on [`io::ErrorKind::Interrupted`].
pub fn read_exact_or_eof<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
) -> io::Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(ReadOutcome::Eof),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed mid-transfer",
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(ReadOutcome::Filled)
}

/// Write all of `buf`, backing off on a zero-byte write.
///
/// Retries transparently on [`io::ErrorKind::Interrupted`]; fails only on
/// a genuine I/O error.
pub fn write_exact<W: Write + ?Sized>(writer: &mut W, buf: &[u8]) -> io::Result<()> {
    write_exact_with_backoff(writer, buf, WRITE_BACKOFF)
}

fn write_exact_with_backoff<W: Write + ?Sized>(
    writer: &mut W,
    buf: &[u8],
    backoff: Duration,
) -> io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        match writer.write(&buf[written..]) {
            Ok(0) => {
                tracing::debug!(
                    target: "p9-tunnel::io",
                    remaining = buf.len() - written,
                    "peer not draining, backing off"
                );
                std::thread::sleep(backoff);
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Cursor;

    /// Reader that yields a scripted sequence of results.
    struct Scripted {
        steps: VecDeque<io::Result<Vec<u8>>>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    /// Writer that accepts at most `chunk` bytes per call, with optional
    /// scripted zero-byte writes.
    struct Trickle {
        chunk: usize,
        stalls: usize,
        written: Vec<u8>,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.stalls > 0 {
                self.stalls -= 1;
                return Ok(0);
            }
            let n = buf.len().min(self.chunk);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn read_fills_across_partial_reads() {
        let mut reader = Scripted {
            steps: VecDeque::from([Ok(b"ab".to_vec()), Ok(b"c".to_vec()), Ok(b"de".to_vec())]),
        };
        let mut buf = [0u8; 5];
        assert_eq!(
            read_exact_or_eof(&mut reader, &mut buf).unwrap(),
            ReadOutcome::Filled
        );
        assert_eq!(&buf, b"abcde");
    }

    #[test]
    fn read_reports_clean_eof_before_first_byte() {
        let mut reader = Cursor::new(Vec::<u8>::new());
        let mut buf = [0u8; 4];
        assert_eq!(
            read_exact_or_eof(&mut reader, &mut buf).unwrap(),
            ReadOutcome::Eof
        );
    }

    #[test]
    fn read_rejects_eof_mid_buffer() {
        let mut reader = Cursor::new(b"ab".to_vec());
        let mut buf = [0u8; 4];
        let err = read_exact_or_eof(&mut reader, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn read_retries_after_interruption() {
        let mut reader = Scripted {
            steps: VecDeque::from([
                Err(io::Error::from(io::ErrorKind::Interrupted)),
                Ok(b"ok".to_vec()),
            ]),
        };
        let mut buf = [0u8; 2];
        assert_eq!(
            read_exact_or_eof(&mut reader, &mut buf).unwrap(),
            ReadOutcome::Filled
        );
        assert_eq!(&buf, b"ok");
    }

    #[test]
    fn read_of_empty_buffer_is_filled() {
        let mut reader = Cursor::new(Vec::<u8>::new());
        let mut buf = [0u8; 0];
        assert_eq!(
            read_exact_or_eof(&mut reader, &mut buf).unwrap(),
            ReadOutcome::Filled
        );
    }

    #[test]
    fn write_completes_across_partial_and_stalled_writes() {
        let mut writer = Trickle {
            chunk: 3,
            stalls: 2,
            written: Vec::new(),
        };
        write_exact_with_backoff(&mut writer, b"hello world", Duration::ZERO).unwrap();
        assert_eq!(writer.written, b"hello world");
    }

    #[test]
    fn write_surfaces_hard_errors() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::from(io::ErrorKind::BrokenPipe))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let err = write_exact(&mut Broken, b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
