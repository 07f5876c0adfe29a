//! Framing for the inbound control channel.
//!
//! [`CommandCollector`] accumulates raw transport bytes, carries partial
//! lines across read boundaries, and yields complete [`Command`]s in arrival
//! order. Lines end with CRLF, but a bare LF is tolerated because plenty of
//! clients send one. Telnet IAC sequences are stripped; a doubled `0xFF`
//! stays as a literal byte.

use bytes::BytesMut;

use crate::{command::Command, encoding::TextEncoding};

const IAC: u8 = 0xFF;

/// Accumulates transport bytes and splits them into commands.
///
/// Decoding happens at the moment a line completes, with the encoding the
/// caller passes in, so an `OPTS UTF8 ON` processed between two chunks
/// affects every line collected afterwards.
#[derive(Debug, Default)]
pub struct CommandCollector {
    buffer: BytesMut,
}

impl CommandCollector {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Append `data` and return every command completed by it.
    pub fn collect(&mut self, data: &[u8], encoding: TextEncoding) -> Vec<Command> {
        self.buffer.extend_from_slice(data);

        let mut commands = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line = self.buffer.split_to(newline + 1);
            // Drop the LF and an optional preceding CR.
            line.truncate(newline);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }

            let raw = strip_telnet(&line);
            if let Some(command) = Command::parse(&encoding.decode(&raw)) {
                commands.push(command);
            }
        }

        commands
    }

    /// Bytes of a partial line still waiting for their terminator.
    #[must_use]
    pub fn pending(&self) -> usize { self.buffer.len() }
}

fn strip_telnet(line: &[u8]) -> Vec<u8> {
    if !line.contains(&IAC) {
        return line.to_vec();
    }

    let mut out = Vec::with_capacity(line.len());
    let mut bytes = line.iter().copied();
    while let Some(b) = bytes.next() {
        if b == IAC {
            match bytes.next() {
                Some(IAC) => out.push(IAC),
                // IAC plus one command byte, silently dropped.
                Some(_) | None => {}
            }
        } else {
            out.push(b);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::CommandCollector;
    use crate::encoding::TextEncoding;

    fn verbs(commands: &[crate::command::Command]) -> Vec<String> {
        commands.iter().map(|c| c.verb().to_owned()).collect()
    }

    #[test]
    fn splits_multiple_commands_in_one_chunk() {
        let mut collector = CommandCollector::new();
        let commands = collector.collect(b"USER anonymous\r\nPASS -\r\nPWD\r\n", TextEncoding::Ascii);
        assert_eq!(verbs(&commands), ["USER", "PASS", "PWD"]);
    }

    #[rstest]
    #[case(&[b"NO".as_slice(), b"OP\r".as_slice(), b"\nSYST\r\n".as_slice()])]
    #[case(&[b"NOOP".as_slice(), b"\r\nSYST".as_slice(), b"\r\n".as_slice()])]
    fn reassembles_lines_across_chunks(#[case] chunks: &[&[u8]]) {
        let mut collector = CommandCollector::new();
        let mut all = Vec::new();
        for chunk in chunks {
            all.extend(collector.collect(chunk, TextEncoding::Ascii));
        }
        assert_eq!(verbs(&all), ["NOOP", "SYST"]);
        assert_eq!(collector.pending(), 0);
    }

    #[test]
    fn tolerates_bare_line_feed() {
        let mut collector = CommandCollector::new();
        let commands = collector.collect(b"NOOP\nSYST\n", TextEncoding::Ascii);
        assert_eq!(verbs(&commands), ["NOOP", "SYST"]);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut collector = CommandCollector::new();
        let commands = collector.collect(b"\r\n\r\nNOOP\r\n", TextEncoding::Ascii);
        assert_eq!(verbs(&commands), ["NOOP"]);
    }

    #[test]
    fn decodes_with_the_encoding_current_per_line() {
        let mut collector = CommandCollector::new();
        let ascii = collector.collect(b"CWD caf\xc3\xa9\r\n", TextEncoding::Ascii);
        assert_eq!(ascii[0].argument(), "caf??");

        let utf8 = collector.collect(b"CWD caf\xc3\xa9\r\n", TextEncoding::Utf8);
        assert_eq!(utf8[0].argument(), "café");
    }

    #[test]
    fn strips_telnet_interrupt_sequences() {
        let mut collector = CommandCollector::new();
        let commands = collector.collect(b"\xff\xf4ABOR\r\n", TextEncoding::Ascii);
        assert_eq!(verbs(&commands), ["ABOR"]);
    }

    #[test]
    fn doubled_iac_stays_literal() {
        let mut collector = CommandCollector::new();
        let commands = collector.collect(b"CWD a\xff\xffb\r\n", TextEncoding::Latin1);
        assert_eq!(commands[0].argument(), "a\u{ff}b");
    }
}
