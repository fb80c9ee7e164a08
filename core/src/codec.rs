//! The codec pipeline: transparently splicing streaming encoders/decoders
//! into a socket's receive and send paths.
//!
//! Repointing the socket's buffer pointers directly doesn't translate
//! cleanly into safe Rust. Instead, [`Socket::recv_view`]/
//! [`Socket::send_view`] present the server's `check_request` (and
//! whatever writes into the send buffer) with either the raw buffer or
//! the codec's buffer, chosen by whether a codec is attached. The
//! reactor is responsible for pumping bytes through the codec
//! before/after invoking the server callbacks; see
//! [`pump_receive`]/[`pump_send`].

use crate::socket::{Buffer, Socket, MAX_BUFFER_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Encoder,
    Decoder,
}

/// Result of one `code()` call: the caller repeatedly invokes `code`,
/// growing the output buffer whenever it reports `NeedMoreOutput`.
pub enum CodeOutcome {
    /// Consumed `consumed` input bytes, produced `produced` output bytes.
    Progress { consumed: usize, produced: usize },
    /// The output slice was too small; grow it and call again.
    NeedMoreOutput,
    /// No more input to process right now.
    Done,
}

/// A streaming transform splicable into a socket's receive or send path.
pub trait Codec: Send {
    /// Transforms as much of `input` as fits into `output`.
    fn code(&mut self, input: &[u8], output: &mut [u8]) -> CodeOutcome;

    /// Runs on FLUSH/FINISH; flushes any buffered state into `output`.
    fn finalize(&mut self, output: &mut [u8]) -> CodeOutcome {
        let _ = output;
        CodeOutcome::Done
    }

    /// Compression ratio for logging, if meaningful for this codec.
    fn ratio(&self) -> Option<f64> {
        None
    }

    fn description(&self) -> &str;

    fn kind(&self) -> CodecKind;

    /// Magic bytes this codec's input starts with, used for receive-side
    /// auto-detection. Empty means "not auto-detectable".
    fn detection(&self) -> &[u8] {
        &[]
    }
}

/// Codec lifecycle state flags. Hand-rolled for the same reason as
/// `SocketFlags`: a single use site doesn't justify a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodecState(u8);

impl CodecState {
    pub const INIT: CodecState = CodecState(1 << 0);
    pub const READY: CodecState = CodecState(1 << 1);
    pub const CODE: CodecState = CodecState(1 << 2);
    pub const FINISH: CodecState = CodecState(1 << 3);
    pub const FLUSH: CodecState = CodecState(1 << 4);

    #[inline]
    pub fn contains(self, other: CodecState) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn set(&mut self, flag: CodecState) {
        self.0 |= flag.0;
    }

    #[inline]
    pub fn clear(&mut self, flag: CodecState) {
        self.0 &= !flag.0;
    }
}

/// Per-codec-instance state spliced into a socket. Lifetime is strictly
/// nested inside the owning socket.
pub struct CodecInstance {
    pub state: CodecState,
    pub in_size: usize,
    pub out_size: usize,
    pub codec: Box<dyn Codec>,
    /// The pre-decode (receive side) or pre-encode (send side) buffer
    /// exposed to the server via `Socket::recv_view`/`send_view`.
    pub output: Buffer,
}

impl CodecInstance {
    pub fn new(codec: Box<dyn Codec>) -> CodecInstance {
        CodecInstance {
            state: CodecState::INIT,
            in_size: 0,
            out_size: 0,
            codec,
            output: Buffer::new(crate::socket::DEFAULT_RECV_BUFFER_SIZE, MAX_BUFFER_SIZE),
        }
    }
}

/// Splices a decoder into `socket`'s receive path. No need to swap
/// `check_request`/`disconnected_socket` here, since `recv_view` already
/// redirects the server to the codec's output; see the module doc.
pub fn attach_decoder(socket: &mut Socket, codec: Box<dyn Codec>) {
    debug_assert_eq!(codec.kind(), CodecKind::Decoder);
    socket.recv_codec = Some(CodecInstance::new(codec));
}

/// Splices an encoder into `socket`'s send path.
pub fn attach_encoder(socket: &mut Socket, codec: Box<dyn Codec>) {
    debug_assert_eq!(codec.kind(), CodecKind::Encoder);
    socket.send_codec = Some(CodecInstance::new(codec));
}

/// Drains raw network bytes accumulated in `socket.recv_buffer` through
/// the attached decoder and appends the result to the codec's output
/// buffer, growing it on `NeedMoreOutput` (capped by `MAX_BUFFER_SIZE`).
/// Called by the reactor immediately before `check_request`.
pub fn pump_receive(socket: &mut Socket) {
    let codec = match &mut socket.recv_codec {
        Some(c) => c,
        None => return,
    };

    loop {
        let input = socket.recv_buffer.filled_slice();
        if input.is_empty() {
            break;
        }

        let outcome = {
            let output = codec.output.free_slice();
            codec.codec.code(input, output)
        };

        match outcome {
            CodeOutcome::Progress { consumed, produced } => {
                codec.in_size += consumed;
                codec.out_size += produced;
                codec.output.commit(produced);
                socket.recv_buffer.reduce(consumed);
                if consumed == 0 && produced == 0 {
                    break;
                }
            }
            CodeOutcome::NeedMoreOutput => {
                if !codec.output.grow() {
                    break;
                }
            }
            CodeOutcome::Done => break,
        }
    }
}

/// Symmetric to [`pump_receive`]: drains the encoder's pre-encode buffer
/// (what the server wrote via `send_view_mut`) into the real network
/// `send_buffer`. Called by the reactor immediately before `write_socket`.
pub fn pump_send(socket: &mut Socket) {
    let codec = match &mut socket.send_codec {
        Some(c) => c,
        None => return,
    };

    loop {
        let input = codec.output.filled_slice();
        if input.is_empty() {
            break;
        }

        let outcome = {
            let output = socket.send_buffer.free_slice();
            codec.codec.code(input, output)
        };

        match outcome {
            CodeOutcome::Progress { consumed, produced } => {
                codec.in_size += consumed;
                codec.out_size += produced;
                socket.send_buffer.commit(produced);
                codec.output.reduce(consumed);
                if consumed == 0 && produced == 0 {
                    break;
                }
            }
            CodeOutcome::NeedMoreOutput => {
                if !socket.send_buffer.grow() {
                    break;
                }
            }
            CodeOutcome::Done => break,
        }
    }
}

/// Checks the first bytes of `socket.recv_buffer` against `codec`'s magic
/// and reports whether it matches.
pub fn detects(codec: &dyn Codec, buffer: &Buffer) -> bool {
    let magic = codec.detection();
    !magic.is_empty() && buffer.filled_slice().starts_with(magic)
}

/// A trivial, self-contained codec family used for tests and demos: XORs
/// every byte with a fixed key. Not a real compression/encryption scheme
/// — it exists to exercise the splicing machinery end to end without
/// pulling in a codec crate the rest of the workspace has no other use
/// for.
pub mod xor {
    use super::*;

    pub struct XorCodec {
        key: u8,
        kind: CodecKind,
    }

    impl XorCodec {
        pub fn encoder(key: u8) -> XorCodec {
            XorCodec { key, kind: CodecKind::Encoder }
        }

        pub fn decoder(key: u8) -> XorCodec {
            XorCodec { key, kind: CodecKind::Decoder }
        }
    }

    const MAGIC: [u8; 2] = [0xDE, 0xAD];

    impl Codec for XorCodec {
        fn code(&mut self, input: &[u8], output: &mut [u8]) -> CodeOutcome {
            if output.is_empty() {
                return CodeOutcome::NeedMoreOutput;
            }
            let n = input.len().min(output.len());
            if n == 0 {
                return CodeOutcome::Done;
            }
            for i in 0..n {
                output[i] = input[i] ^ self.key;
            }
            CodeOutcome::Progress { consumed: n, produced: n }
        }

        fn description(&self) -> &str {
            "xor"
        }

        fn kind(&self) -> CodecKind {
            self.kind
        }

        fn detection(&self) -> &[u8] {
            &MAGIC
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::{Handle, Proto, Socket, SocketKind};
    use std::os::unix::io::RawFd;

    fn dummy_socket() -> Socket {
        Socket::new(1, SocketKind::Stream, Proto::TCP, Handle::Raw(-1 as RawFd), serveez_log::discard())
    }

    #[test]
    fn round_trip_through_encoder_then_decoder() {
        let plaintext = b"hello, codec pipeline";

        // Encode "on the wire": push plaintext straight through the xor
        // transform using a throwaway buffer pair (standing in for the
        // send-side splice without needing a live socket on both ends).
        let mut encoder = xor::XorCodec::encoder(0x42);
        let mut wire = vec![0u8; plaintext.len()];
        match encoder.code(plaintext, &mut wire) {
            CodeOutcome::Progress { consumed, produced } => {
                assert_eq!(consumed, plaintext.len());
                assert_eq!(produced, plaintext.len());
            }
            _ => panic!("expected progress"),
        }

        // Decode through the real receive-path splice.
        let mut socket = dummy_socket();
        attach_decoder(&mut socket, Box::new(xor::XorCodec::decoder(0x42)));
        socket.recv_buffer.append(&wire);
        pump_receive(&mut socket);

        assert_eq!(socket.recv_view().filled_slice(), plaintext);
    }

    #[test]
    fn detection_matches_magic_prefix() {
        let codec = xor::XorCodec::decoder(0x42);
        let mut buf = Buffer::new(16, 64);
        buf.append(&[0xDE, 0xAD, 1, 2, 3]);
        assert!(detects(&codec, &buf));

        let mut other = Buffer::new(16, 64);
        other.append(&[0, 0, 0]);
        assert!(!detects(&codec, &other));
    }
}
