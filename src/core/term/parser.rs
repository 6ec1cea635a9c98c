//! Escape sequence decoder
//!
//! Classifies the sequence at the head of a decoded input tail. The decoder is
//! stateless: callers hand it everything from the escape marker onward and get
//! back either a complete sequence with its exact length, or `Incomplete` when
//! more input is needed.

/// Escape marker
pub const ESC: char = '\x1b';

/// Longest string payload scanned before a terminator is assumed missing
pub const MAX_STRING_LEN: usize = 4096;

/// Longest CSI sequence scanned before it is discarded
pub const MAX_CSI_LEN: usize = 256;

/// Reply that needs to be written back to the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Device status report: ESC [ 0 n
    StatusOk,
    /// Cursor position report: ESC [ row ; col R
    CursorPosition(usize, usize),
    /// Primary device attributes
    DeviceAttributes,
    /// Secondary device attributes
    SecondaryDeviceAttributes,
}

impl Response {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::StatusOk => b"\x1b[0n".to_vec(),
            Response::CursorPosition(row, col) => format!("\x1b[{};{}R", row, col).into_bytes(),
            Response::DeviceAttributes => {
                // VT220 response
                b"\x1b[?62;c".to_vec()
            }
            Response::SecondaryDeviceAttributes => b"\x1b[>1;10;0c".to_vec(),
        }
    }
}

/// Parsed control sequence: ESC [ marker params intermediates final
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsiSequence {
    /// `?` prefix (DEC private)
    pub private: bool,
    /// Other parameter prefix (`>`, `=`, `<`)
    pub marker: Option<char>,
    /// Numeric parameters; empty slots are 0
    pub params: Vec<u16>,
    pub intermediates: Vec<char>,
    pub final_byte: char,
}

impl CsiSequence {
    /// Parameter `index`, or `default` when absent
    pub fn param(&self, index: usize, default: u16) -> u16 {
        self.params.get(index).copied().unwrap_or(default)
    }

    /// Count parameter: absent or zero means one
    pub fn count(&self, index: usize) -> usize {
        self.param(index, 1).max(1) as usize
    }
}

/// Kind of a string-valued sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringKind {
    /// ESC ]
    Osc,
    /// ESC P
    Dcs,
    /// ESC X, ESC ^, ESC _
    Other,
}

/// Classified escape sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sequence {
    Csi(CsiSequence),
    Str { kind: StringKind, payload: String },
    /// ESC 7
    SaveCursor,
    /// ESC 8
    RestoreCursor,
    /// ESC c
    FullReset,
    /// ESC D
    Index,
    /// ESC M
    ReverseIndex,
    /// ESC E
    NextLine,
    /// Recognized but cosmetic (charset selection, keypad modes, ...)
    Ignored,
    /// Unrecognized two-byte sequence
    Unknown(char),
}

/// Result of decoding one sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    /// A whole sequence; `consumed` counts chars including the marker
    Complete { sequence: Sequence, consumed: usize },
    /// The tail ends before the sequence does
    Incomplete,
}

impl Parsed {
    fn complete(sequence: Sequence, consumed: usize) -> Self {
        Parsed::Complete { sequence, consumed }
    }
}

/// Decode the escape sequence at the head of `input`.
///
/// `input[0]` must be [`ESC`]. A `Complete` result always consumes at least
/// one char and never more than `input.len()`.
pub fn parse_escape(input: &[char]) -> Parsed {
    debug_assert_eq!(input.first(), Some(&ESC));

    let Some(&next) = input.get(1) else {
        return Parsed::Incomplete;
    };

    match next {
        '[' => parse_csi(input),
        ']' => parse_string(input, StringKind::Osc),
        'P' => parse_string(input, StringKind::Dcs),
        'X' | '^' | '_' => parse_string(input, StringKind::Other),
        '7' => Parsed::complete(Sequence::SaveCursor, 2),
        '8' => Parsed::complete(Sequence::RestoreCursor, 2),
        'c' => Parsed::complete(Sequence::FullReset, 2),
        'D' => Parsed::complete(Sequence::Index, 2),
        'M' => Parsed::complete(Sequence::ReverseIndex, 2),
        'E' => Parsed::complete(Sequence::NextLine, 2),
        // Charset designation, S7C1T/S8C1T, DEC line attributes, character set
        '(' | ')' | '*' | '+' | '-' | '.' | '/' | ' ' | '#' | '%' => match input.get(2) {
            None => Parsed::Incomplete,
            Some(c) if (' '..='~').contains(c) => Parsed::complete(Sequence::Ignored, 3),
            // Malformed: drop the two-byte prefix, let the caller handle the rest
            Some(_) => Parsed::complete(Sequence::Ignored, 2),
        },
        c if (' '..='~').contains(&c) => Parsed::complete(Sequence::Unknown(c), 2),
        // A control char, another ESC or non-ASCII after the marker: drop the
        // marker alone so the following char is processed normally
        _ => Parsed::complete(Sequence::Ignored, 1),
    }
}

fn parse_csi(input: &[char]) -> Parsed {
    let mut private = false;
    let mut marker = None;
    let mut params = Vec::new();
    let mut intermediates = Vec::new();
    let mut current: Option<u16> = None;
    let mut seen_param = false;
    // Private-marker bytes past the first position are valid but unsupported
    let mut malformed = false;

    let mut i = 2;
    if let Some(&c) = input.get(i) {
        match c {
            '?' => {
                private = true;
                i += 1;
            }
            '>' | '=' | '<' => {
                marker = Some(c);
                i += 1;
            }
            _ => {}
        }
    }

    while i < input.len() {
        if i >= MAX_CSI_LEN {
            tracing::debug!("Discarding overlong CSI sequence ({} chars)", i);
            return Parsed::complete(Sequence::Ignored, i);
        }

        let c = input[i];
        match c {
            '0'..='9' if intermediates.is_empty() => {
                let digit = c as u16 - '0' as u16;
                current = Some(current.unwrap_or(0).saturating_mul(10).saturating_add(digit));
                seen_param = true;
            }
            // Sub-parameter separator is treated like ';'
            ';' | ':' if intermediates.is_empty() => {
                params.push(current.take().unwrap_or(0));
                seen_param = true;
            }
            '<'..='?' => malformed = true,
            ' '..='/' => intermediates.push(c),
            '@'..='~' if malformed => {
                tracing::debug!("Discarding malformed CSI sequence ending in {:?}", c);
                return Parsed::complete(Sequence::Ignored, i + 1);
            }
            '@'..='~' => {
                if seen_param {
                    params.push(current.take().unwrap_or(0));
                }
                let sequence = Sequence::Csi(CsiSequence {
                    private,
                    marker,
                    params,
                    intermediates,
                    final_byte: c,
                });
                return Parsed::complete(sequence, i + 1);
            }
            _ => {
                // Not part of any CSI grammar; abort without eating it
                tracing::debug!("Aborted CSI sequence at {:?}", c);
                return Parsed::complete(Sequence::Ignored, i);
            }
        }
        i += 1;
    }

    Parsed::Incomplete
}

fn parse_string(input: &[char], kind: StringKind) -> Parsed {
    let mut i = 2;
    while i < input.len() {
        if i - 2 >= MAX_STRING_LEN {
            tracing::debug!("Discarding unterminated string sequence ({} chars)", i);
            return Parsed::complete(Sequence::Ignored, i);
        }

        match input[i] {
            '\x07' | '\u{9c}' => {
                let payload = input[2..i].iter().collect();
                return Parsed::complete(Sequence::Str { kind, payload }, i + 1);
            }
            ESC => match input.get(i + 1) {
                None => return Parsed::Incomplete,
                Some('\\') => {
                    let payload = input[2..i].iter().collect();
                    return Parsed::complete(Sequence::Str { kind, payload }, i + 2);
                }
                // A new sequence cuts the string short
                Some(_) => {
                    let payload = input[2..i].iter().collect();
                    return Parsed::complete(Sequence::Str { kind, payload }, i);
                }
            },
            _ => {}
        }
        i += 1;
    }

    Parsed::Incomplete
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn complete(s: &str) -> (Sequence, usize) {
        match parse_escape(&chars(s)) {
            Parsed::Complete { sequence, consumed } => (sequence, consumed),
            Parsed::Incomplete => panic!("incomplete: {:?}", s),
        }
    }

    #[test]
    fn test_csi_params() {
        let (seq, consumed) = complete("\x1b[5;10Hrest");
        assert_eq!(consumed, 7);
        let Sequence::Csi(csi) = seq else {
            panic!("expected CSI");
        };
        assert_eq!(csi.params, vec![5, 10]);
        assert_eq!(csi.final_byte, 'H');
        assert!(!csi.private);
    }

    #[test]
    fn test_csi_private_and_empty_params() {
        let (seq, _) = complete("\x1b[?1049h");
        let Sequence::Csi(csi) = seq else {
            panic!("expected CSI");
        };
        assert!(csi.private);
        assert_eq!(csi.params, vec![1049]);

        let (seq, _) = complete("\x1b[;5H");
        let Sequence::Csi(csi) = seq else {
            panic!("expected CSI");
        };
        assert_eq!(csi.params, vec![0, 5]);

        let (seq, _) = complete("\x1b[m");
        let Sequence::Csi(csi) = seq else {
            panic!("expected CSI");
        };
        assert!(csi.params.is_empty());
        assert_eq!(csi.count(0), 1);
    }

    #[test]
    fn test_csi_private_byte_after_params() {
        assert_eq!(complete("\x1b[1;?hrest"), (Sequence::Ignored, 6));
        assert_eq!(complete("\x1b[>1;<2mX"), (Sequence::Ignored, 8));
    }

    #[test]
    fn test_csi_secondary_marker() {
        let (seq, _) = complete("\x1b[>c");
        let Sequence::Csi(csi) = seq else {
            panic!("expected CSI");
        };
        assert_eq!(csi.marker, Some('>'));
        assert_eq!(csi.final_byte, 'c');
    }

    #[test]
    fn test_incomplete_sequences() {
        for tail in ["\x1b", "\x1b[", "\x1b[31", "\x1b]0;title", "\x1b]0;t\x1b", "\x1b("] {
            assert_eq!(parse_escape(&chars(tail)), Parsed::Incomplete, "{:?}", tail);
        }
    }

    #[test]
    fn test_osc_terminators() {
        let (seq, consumed) = complete("\x1b]0;hello\x07x");
        assert_eq!(consumed, 10);
        assert_eq!(
            seq,
            Sequence::Str {
                kind: StringKind::Osc,
                payload: "0;hello".into()
            }
        );

        let (_, consumed) = complete("\x1b]2;hi\x1b\\x");
        assert_eq!(consumed, 8);
    }

    #[test]
    fn test_two_and_three_byte_sequences() {
        assert_eq!(complete("\x1b7"), (Sequence::SaveCursor, 2));
        assert_eq!(complete("\x1bM"), (Sequence::ReverseIndex, 2));
        assert_eq!(complete("\x1b(B"), (Sequence::Ignored, 3));
        assert_eq!(complete("\x1b#8"), (Sequence::Ignored, 3));
        assert_eq!(complete("\x1b="), (Sequence::Unknown('='), 2));
        assert_eq!(complete("\x1b\x1b[A"), (Sequence::Ignored, 1));
    }

    #[test]
    fn test_aborted_csi_keeps_following_char() {
        assert_eq!(complete("\x1b[12\nabc"), (Sequence::Ignored, 4));
    }

    #[test]
    fn test_unterminated_string_is_bounded() {
        let tail = format!("\x1b]{}", "a".repeat(MAX_STRING_LEN + 10));
        let (seq, consumed) = complete(&tail);
        assert_eq!(seq, Sequence::Ignored);
        assert!(consumed <= tail.chars().count());
    }

    proptest! {
        #[test]
        fn prop_decoder_makes_progress(tail in "\\PC{0,40}", prefix in prop::sample::select(vec!["", "[", "]", "P", "(", "[?", "_"])) {
            let input: Vec<char> = format!("\x1b{}{}", prefix, tail).chars().collect();
            if let Parsed::Complete { consumed, .. } = parse_escape(&input) {
                prop_assert!(consumed >= 1);
                prop_assert!(consumed <= input.len());
            }
        }
    }
}
