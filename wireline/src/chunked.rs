//! Chunked transfer-encoding filter pair.
//!
//! Wire format: `<hex-length>\r\n<data>\r\n` repeated, terminated by
//! `0\r\n\r\n`. The decoder accepts case-insensitive hex with an optional
//! `0x` prefix; the encoder always emits uppercase hex, unprefixed.
//!
//! Both stages are [`Source`] filters: they wrap an upstream source and
//! expose the same pull operation downstream, so they compose with any
//! other filter or terminal transport.

use std::task::{Context, Poll, ready};

use bytes::Bytes;

use crate::buffer::BufList;
use crate::error::StreamError;
use crate::metrics;
use crate::reader::StreamReader;
use crate::stream::Source;

const CRLF: &[u8] = b"\r\n";

// ── Decoder ──────────────────────────────────────────────────────

enum DecodeState {
    /// Scanning for the CRLF-terminated hex length line.
    ReadLength,
    /// Moving exactly `remaining` payload bytes downstream.
    ReadData { remaining: usize, last: bool },
    /// Expecting the CRLF that follows every chunk's data.
    ReadTrailingCrlf { last: bool },
    /// Terminal chunk seen; pulls report end-of-stream.
    Done,
}

/// Streaming decoder for chunked transfer-encoding.
///
/// Payload bytes move downstream zero-copy; only length lines are copied
/// out for parsing.
pub struct ChunkDecoder<S> {
    reader: StreamReader<S>,
    state: DecodeState,
}

impl<S: Source> ChunkDecoder<S> {
    /// Wrap an upstream source of encoded bytes.
    pub fn new(source: S) -> Self {
        Self {
            reader: StreamReader::new(source),
            state: DecodeState::ReadLength,
        }
    }

    /// True once the terminal chunk has been fully consumed.
    pub fn is_done(&self) -> bool {
        matches!(self.state, DecodeState::Done)
    }

    /// Unwrap into the upstream source and any bytes pulled past the
    /// terminal chunk (pipelined remainder).
    pub fn into_parts(self) -> (S, BufList) {
        self.reader.into_parts()
    }
}

impl<S: Source> Source for ChunkDecoder<S> {
    fn poll_pull(
        &mut self,
        cx: &mut Context<'_>,
        out: &mut BufList,
    ) -> Poll<Result<bool, StreamError>> {
        let before = out.remaining();
        loop {
            match self.state {
                DecodeState::ReadLength => {
                    if let Some(line) = self.reader.scan_crlf() {
                        let size = parse_chunk_size(&line.copy_to_vec())?;
                        self.state = DecodeState::ReadData {
                            remaining: size,
                            last: size == 0,
                        };
                    } else if self.reader.is_eos() {
                        return Poll::Ready(Err(StreamError::Protocol(
                            "stream ended before chunk length".into(),
                        )));
                    } else {
                        // Return what was already emitted before risking a
                        // Pending; data left in `out` across a Pending would
                        // go unnoticed.
                        if out.remaining() > before {
                            return Poll::Ready(Ok(true));
                        }
                        ready!(self.reader.poll_fill(cx))?;
                    }
                }
                DecodeState::ReadData { remaining, last } => {
                    if remaining == 0 {
                        self.state = DecodeState::ReadTrailingCrlf { last };
                        continue;
                    }
                    let buffered = self.reader.pending().remaining();
                    if buffered > 0 {
                        let n = remaining.min(buffered);
                        if let Some(mut data) = self.reader.read_exact(n) {
                            data.move_all_into(out);
                        }
                        self.state = DecodeState::ReadData {
                            remaining: remaining - n,
                            last,
                        };
                    } else if self.reader.is_eos() {
                        return Poll::Ready(Err(StreamError::TruncatedStream(
                            "read ended before chunk completed",
                        )));
                    } else {
                        if out.remaining() > before {
                            return Poll::Ready(Ok(true));
                        }
                        ready!(self.reader.poll_fill(cx))?;
                    }
                }
                DecodeState::ReadTrailingCrlf { last } => {
                    if let Some(crlf) = self.reader.read_exact(2) {
                        if crlf.copy_to_vec() != CRLF {
                            return Poll::Ready(Err(StreamError::Protocol(
                                "CRLF expected following data chunk".into(),
                            )));
                        }
                        metrics::FRAMES_DECODED.increment();
                        if last {
                            self.state = DecodeState::Done;
                        } else {
                            self.state = DecodeState::ReadLength;
                        }
                    } else if self.reader.is_eos() {
                        return Poll::Ready(Err(StreamError::Protocol(
                            "CRLF expected following data chunk".into(),
                        )));
                    } else {
                        if out.remaining() > before {
                            return Poll::Ready(Ok(true));
                        }
                        ready!(self.reader.poll_fill(cx))?;
                    }
                }
                DecodeState::Done => return Poll::Ready(Ok(false)),
            }
        }
    }
}

/// Parse a chunk length line: case-insensitive hex, optional `0x` prefix,
/// surrounding ASCII whitespace tolerated.
fn parse_chunk_size(line: &[u8]) -> Result<usize, StreamError> {
    let trimmed = line.trim_ascii();
    let digits = match trimmed {
        [b'0', b'x', rest @ ..] | [b'0', b'X', rest @ ..] => rest,
        other => other,
    };
    let invalid = || {
        StreamError::Protocol(format!(
            "invalid chunk length: {}",
            String::from_utf8_lossy(line)
        ))
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_hexdigit) {
        return Err(invalid());
    }
    let text = std::str::from_utf8(digits).map_err(|_| invalid())?;
    usize::from_str_radix(text, 16).map_err(|_| invalid())
}

// ── Encoder ──────────────────────────────────────────────────────

enum EncodeState {
    /// Framing upstream bursts.
    Streaming,
    /// Upstream done; terminal frame not yet emitted.
    Terminal,
    /// Terminal frame emitted.
    Done,
}

/// Streaming encoder for chunked transfer-encoding.
///
/// Each non-empty upstream burst becomes one frame; empty bursts are
/// skipped so a zero-length frame is only ever the terminal one.
pub struct ChunkEncoder<S> {
    source: S,
    state: EncodeState,
}

impl<S: Source> ChunkEncoder<S> {
    /// Wrap an upstream source of raw bytes.
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: EncodeState::Streaming,
        }
    }

    /// Unwrap the upstream source.
    pub fn into_inner(self) -> S {
        self.source
    }

    fn emit_frame(&self, burst: &mut BufList, out: &mut BufList) {
        let header = format!("{:X}\r\n", burst.remaining());
        out.push(Bytes::from(header.into_bytes()));
        burst.move_all_into(out);
        out.push(Bytes::from_static(CRLF));
        metrics::FRAMES_ENCODED.increment();
    }
}

impl<S: Source> Source for ChunkEncoder<S> {
    fn poll_pull(
        &mut self,
        cx: &mut Context<'_>,
        out: &mut BufList,
    ) -> Poll<Result<bool, StreamError>> {
        loop {
            match self.state {
                EncodeState::Streaming => {
                    let mut burst = BufList::new();
                    let more = ready!(self.source.poll_pull(cx, &mut burst))?;
                    if !more {
                        self.state = EncodeState::Terminal;
                    }
                    if burst.is_empty() {
                        if more {
                            return Poll::Ready(Ok(true));
                        }
                        continue;
                    }
                    self.emit_frame(&mut burst, out);
                    return Poll::Ready(Ok(true));
                }
                EncodeState::Terminal => {
                    out.push(Bytes::from_static(b"0\r\n\r\n"));
                    metrics::FRAMES_ENCODED.increment();
                    self.state = EncodeState::Done;
                    return Poll::Ready(Ok(false));
                }
                EncodeState::Done => return Poll::Ready(Ok(false)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::BurstSource;
    use std::task::Waker;

    fn pull_to_end<S: Source>(source: &mut S) -> Result<Vec<u8>, StreamError> {
        let mut cx = Context::from_waker(Waker::noop());
        let mut out = BufList::new();
        loop {
            match source.poll_pull(&mut cx, &mut out) {
                Poll::Ready(Ok(true)) => {}
                Poll::Ready(Ok(false)) => return Ok(out.copy_to_vec()),
                Poll::Ready(Err(e)) => return Err(e),
                Poll::Pending => panic!("unexpected Pending"),
            }
        }
    }

    fn decode_all(input: &'static [u8]) -> Result<Vec<u8>, StreamError> {
        pull_to_end(&mut ChunkDecoder::new(BurstSource::single(input)))
    }

    #[test]
    fn decode_simple() {
        let payload = decode_all(b"5\r\nhello\r\n0\r\n\r\n").unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn decode_empty_body() {
        let payload = decode_all(b"0\r\n\r\n").unwrap();
        assert_eq!(payload, b"");
    }

    #[test]
    fn decode_multiple_chunks() {
        let payload = decode_all(b"3\r\nfoo\r\n4\r\nbarb\r\n0\r\n\r\n").unwrap();
        assert_eq!(payload, b"foobarb");
    }

    #[test]
    fn decode_hex_case_and_prefix() {
        let payload = decode_all(b"A\r\n0123456789\r\n0\r\n\r\n").unwrap();
        assert_eq!(payload, b"0123456789");
        let payload = decode_all(b"0xa\r\n0123456789\r\n0\r\n\r\n").unwrap();
        assert_eq!(payload, b"0123456789");
        let payload = decode_all(b"0XA\r\n0123456789\r\n0\r\n\r\n").unwrap();
        assert_eq!(payload, b"0123456789");
    }

    #[test]
    fn decode_truncated_data_fails() {
        let err = decode_all(b"5\r\nhel").unwrap_err();
        assert!(matches!(err, StreamError::TruncatedStream(_)), "{err}");
    }

    #[test]
    fn decode_invalid_hex_fails() {
        let err = decode_all(b"zz\r\nwhatever").unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)), "{err}");
        assert!(err.to_string().contains("invalid chunk length"));
    }

    #[test]
    fn decode_signed_length_fails() {
        // from_str_radix would accept a sign; the wire format does not.
        let err = decode_all(b"+5\r\nhello\r\n0\r\n\r\n").unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)), "{err}");
    }

    #[test]
    fn decode_eof_before_length_fails() {
        let err = decode_all(b"5").unwrap_err();
        assert!(err.to_string().contains("before chunk length"), "{err}");
    }

    #[test]
    fn decode_missing_trailing_crlf_fails() {
        let err = decode_all(b"5\r\nhelloXX0\r\n\r\n").unwrap_err();
        assert!(err.to_string().contains("CRLF expected"), "{err}");
    }

    #[test]
    fn decode_eof_at_trailing_crlf_fails() {
        let err = decode_all(b"5\r\nhello").unwrap_err();
        assert!(err.to_string().contains("CRLF expected"), "{err}");
    }

    #[test]
    fn decode_byte_dribble() {
        let wire = b"5\r\nhello\r\n3\r\nwor\r\n0\r\n\r\n";
        let bursts: Vec<Bytes> = wire.iter().map(|b| Bytes::copy_from_slice(&[*b])).collect();
        let mut decoder = ChunkDecoder::new(BurstSource::new(bursts));
        assert_eq!(pull_to_end(&mut decoder).unwrap(), b"hellowor");
    }

    #[test]
    fn decode_preserves_pipelined_remainder() {
        let mut decoder = ChunkDecoder::new(BurstSource::single(&b"0\r\n\r\nextra"[..]));
        assert_eq!(pull_to_end(&mut decoder).unwrap(), b"");
        assert!(decoder.is_done());
        let (_, leftover) = decoder.into_parts();
        assert_eq!(leftover.copy_to_vec(), b"extra");
    }

    #[test]
    fn encode_single_burst() {
        let mut encoder = ChunkEncoder::new(BurstSource::single(&b"hello"[..]));
        assert_eq!(pull_to_end(&mut encoder).unwrap(), b"5\r\nhello\r\n0\r\n\r\n");
    }

    #[test]
    fn encode_uppercase_hex() {
        let data: Vec<u8> = (0..26).map(|i| b'a' + i).collect();
        let mut encoder = ChunkEncoder::new(BurstSource::new([Bytes::from(data)]));
        let wire = pull_to_end(&mut encoder).unwrap();
        assert!(wire.starts_with(b"1A\r\n"), "{:?}", wire);
    }

    #[test]
    fn encode_empty_source_emits_terminal_only() {
        let mut encoder = ChunkEncoder::new(BurstSource::empty());
        assert_eq!(pull_to_end(&mut encoder).unwrap(), b"0\r\n\r\n");
    }

    #[test]
    fn encode_skips_empty_bursts() {
        let mut encoder = ChunkEncoder::new(BurstSource::new([
            &b"ab"[..],
            &b""[..],
            &b""[..],
            &b"cd"[..],
        ]));
        let wire = pull_to_end(&mut encoder).unwrap();
        assert_eq!(wire, b"2\r\nab\r\n2\r\ncd\r\n0\r\n\r\n");
    }

    #[test]
    fn encode_terminal_emitted_once() {
        let mut encoder = ChunkEncoder::new(BurstSource::empty());
        let mut cx = Context::from_waker(Waker::noop());
        let mut out = BufList::new();
        loop {
            if let Poll::Ready(Ok(false)) = encoder.poll_pull(&mut cx, &mut out) {
                break;
            }
        }
        assert_eq!(out.copy_to_vec(), b"0\r\n\r\n");
        // Pulls past end-of-stream stay silent.
        assert!(matches!(
            encoder.poll_pull(&mut cx, &mut out),
            Poll::Ready(Ok(false))
        ));
        assert_eq!(out.copy_to_vec(), b"0\r\n\r\n");
    }

    #[test]
    fn round_trip_arbitrary_splits() {
        let bursts = [
            &b"The quick brown "[..],
            &b"fox"[..],
            &b""[..],
            &b" jumps over 13 lazy dogs."[..],
        ];
        let expected: Vec<u8> = bursts.concat();

        let mut encoder = ChunkEncoder::new(BurstSource::new(bursts));
        let wire = pull_to_end(&mut encoder).unwrap();

        // Re-split the wire bytes on odd boundaries before decoding.
        let rechunked: Vec<Bytes> = wire.chunks(7).map(Bytes::copy_from_slice).collect();
        let mut decoder = ChunkDecoder::new(BurstSource::new(rechunked));
        assert_eq!(pull_to_end(&mut decoder).unwrap(), expected);
    }

    #[test]
    fn parse_chunk_size_rejects_garbage() {
        assert!(parse_chunk_size(b"").is_err());
        assert!(parse_chunk_size(b"0x").is_err());
        assert!(parse_chunk_size(b"-1").is_err());
        assert!(parse_chunk_size(b"ffffffffffffffffffff").is_err());
        assert_eq!(parse_chunk_size(b" 1f ").unwrap(), 31);
    }
}
