//! Text command protocol
//!
//! Commands are short ASCII lines terminated by `;`, `\r` or `\n`:
//!
//! | Command        | Meaning                                          |
//! |----------------|--------------------------------------------------|
//! | `V<float>`     | hold a velocity                                  |
//! | `R<float>`     | hold a rotation count (whole revolutions)        |
//! | `R<float>V<float>` | rotation count with a velocity limit (sign ignored) |
//! | `T<note>`      | set the PWM carrier to a musical note            |
//! | `s`            | status report                                    |

use core::fmt;

use heapless::{String, Vec};

use crate::params::COMMAND_BUFFER_LEN;

const TERMINATORS: [char; 3] = [';', '\r', '\n'];

/// Command parse errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// Nothing before the terminator
    Empty,
    /// First character is not a known command
    UnknownCommand(char),
    /// A command letter without its number
    MissingValue,
    /// Payload is not a number
    InvalidNumber,
    /// Number is not acceptable for this command
    OutOfRange,
    /// Buffer filled up before a terminator arrived
    TooLong,
    /// Line is not valid UTF-8
    Encoding,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty command"),
            Self::UnknownCommand(c) => write!(f, "unknown command '{}'", c),
            Self::MissingValue => f.write_str("missing value"),
            Self::InvalidNumber => f.write_str("invalid number"),
            Self::OutOfRange => f.write_str("value out of range"),
            Self::TooLong => write!(f, "command longer than {} bytes", COMMAND_BUFFER_LEN),
            Self::Encoding => f.write_str("invalid characters"),
        }
    }
}

/// Musical note for the `T` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Note {
    C,
    D,
    E,
    F,
    G,
    A,
    B,
}

impl Note {
    /// Unknown letters fall back to `B`
    pub fn from_char(c: char) -> Self {
        match c {
            'c' => Self::C,
            'd' => Self::D,
            'e' => Self::E,
            'f' => Self::F,
            'g' => Self::G,
            'a' => Self::A,
            _ => Self::B,
        }
    }

    /// PWM carrier frequency [Hz]
    pub const fn frequency_hz(self) -> u32 {
        match self {
            Self::C => 4186,
            Self::D => 4699,
            Self::E => 5274,
            Self::F => 5588,
            Self::G => 6272,
            Self::A => 7040,
            Self::B => 7902,
        }
    }
}

/// A parsed terminal command
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    SetVelocity(f32),
    SetRotations(u32),
    SetRotationsCapped { rotations: u32, max_velocity: f32 },
    Tone(Note),
    Status,
}

impl Command {
    /// Parse one command. Anything from the first terminator on is ignored.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let body = match line.find(&TERMINATORS[..]) {
            Some(end) => &line[..end],
            None => line,
        };
        let body = body.trim();

        let mut chars = body.chars();
        let first = chars.next().ok_or(ParseError::Empty)?;
        let rest = chars.as_str();

        match first {
            'V' => Ok(Self::SetVelocity(parse_velocity(rest)?)),
            'R' => match rest.split_once('V') {
                Some((rotations, velocity)) => Ok(Self::SetRotationsCapped {
                    rotations: parse_rotations(rotations)?,
                    max_velocity: libm::fabsf(parse_velocity(velocity)?),
                }),
                None => Ok(Self::SetRotations(parse_rotations(rest)?)),
            },
            'T' => {
                let note = rest.chars().next().ok_or(ParseError::MissingValue)?;
                Ok(Self::Tone(Note::from_char(note)))
            }
            's' => Ok(Self::Status),
            other => Err(ParseError::UnknownCommand(other)),
        }
    }
}

fn parse_number(text: &str) -> Result<f32, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::MissingValue);
    }
    text.parse::<f32>().map_err(|_| ParseError::InvalidNumber)
}

fn parse_velocity(text: &str) -> Result<f32, ParseError> {
    let value = parse_number(text)?;
    if !value.is_finite() {
        return Err(ParseError::OutOfRange);
    }
    Ok(value)
}

/// Whole revolutions; a fractional part is dropped
fn parse_rotations(text: &str) -> Result<u32, ParseError> {
    let value = parse_number(text)?;
    if !value.is_finite() || value < 0.0 || value > u32::MAX as f32 {
        return Err(ParseError::OutOfRange);
    }
    Ok(value as u32)
}

/// A complete command line, terminator stripped
pub type Line = String<COMMAND_BUFFER_LEN>;

/// Collects terminal bytes into command lines
pub struct LineBuffer {
    buf: Vec<u8, COMMAND_BUFFER_LEN>,
    /// Dropping the rest of an over-long line until its terminator
    discarding: bool,
}

impl LineBuffer {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            discarding: false,
        }
    }

    /// Feed one received byte.
    ///
    /// Returns a line once a terminator arrives, or `TooLong` when the
    /// buffer fills first. An over-long line is dropped up to and including
    /// its terminator. Empty lines are skipped.
    pub fn push(&mut self, byte: u8) -> Option<Result<Line, ParseError>> {
        let terminator = TERMINATORS.contains(&(byte as char));
        if self.discarding {
            if terminator {
                self.discarding = false;
            }
            return None;
        }

        if terminator {
            if self.buf.is_empty() {
                return None;
            }
            let bytes = core::mem::take(&mut self.buf);
            return Some(String::from_utf8(bytes).map_err(|_| ParseError::Encoding));
        }

        // capacity is checked right below, so this push cannot fail
        let _ = self.buf.push(byte);
        if self.buf.is_full() {
            self.buf.clear();
            self.discarding = true;
            return Some(Err(ParseError::TooLong));
        }
        None
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(buffer: &mut LineBuffer, text: &str) -> Option<Result<Line, ParseError>> {
        let mut last = None;
        for &b in text.as_bytes() {
            if let Some(result) = buffer.push(b) {
                last = Some(result);
            }
        }
        last
    }

    #[test]
    fn test_parse_velocity() {
        assert_eq!(Command::parse("V55.0;"), Ok(Command::SetVelocity(55.0)));
        assert_eq!(Command::parse("V-12.5"), Ok(Command::SetVelocity(-12.5)));
    }

    #[test]
    fn test_parse_rotations() {
        assert_eq!(Command::parse("R10;"), Ok(Command::SetRotations(10)));
        assert_eq!(Command::parse("R2.9\r"), Ok(Command::SetRotations(2)));
    }

    #[test]
    fn test_parse_combined_discards_sign() {
        assert_eq!(
            Command::parse("R10V-3.5;"),
            Ok(Command::SetRotationsCapped {
                rotations: 10,
                max_velocity: 3.5
            })
        );
    }

    #[test]
    fn test_parse_ignores_after_terminator() {
        assert_eq!(Command::parse("V1;V2;;;;"), Ok(Command::SetVelocity(1.0)));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Command::parse(""), Err(ParseError::Empty));
        assert_eq!(Command::parse(";"), Err(ParseError::Empty));
        assert_eq!(Command::parse("X1;"), Err(ParseError::UnknownCommand('X')));
        assert_eq!(Command::parse("V;"), Err(ParseError::MissingValue));
        assert_eq!(Command::parse("R10V;"), Err(ParseError::MissingValue));
        assert_eq!(Command::parse("V5x;"), Err(ParseError::InvalidNumber));
        assert_eq!(Command::parse("RV5;"), Err(ParseError::MissingValue));
        assert_eq!(Command::parse("R-1;"), Err(ParseError::OutOfRange));
        assert_eq!(Command::parse("Vinf;"), Err(ParseError::OutOfRange));
        assert_eq!(Command::parse("RNaN;"), Err(ParseError::OutOfRange));
    }

    #[test]
    fn test_parse_tone_and_status() {
        assert_eq!(Command::parse("Tc"), Ok(Command::Tone(Note::C)));
        assert_eq!(Command::parse("Tg;"), Ok(Command::Tone(Note::G)));
        assert_eq!(Command::parse("Tz"), Ok(Command::Tone(Note::B)));
        assert_eq!(Command::parse("T"), Err(ParseError::MissingValue));
        assert_eq!(Command::parse("s"), Ok(Command::Status));
        assert_eq!(Note::A.frequency_hz(), 7040);
    }

    #[test]
    fn test_line_buffer_terminators() {
        let mut buffer = LineBuffer::new();
        let line = feed(&mut buffer, "V5\r").unwrap().unwrap();
        assert_eq!(line.as_str(), "V5");
        assert!(buffer.is_empty());

        // \r\n leaves an empty line behind, which is skipped
        assert!(buffer.push(b'\n').is_none());

        let line = feed(&mut buffer, "R3V1;").unwrap().unwrap();
        assert_eq!(Command::parse(&line), Ok(Command::SetRotationsCapped { rotations: 3, max_velocity: 1.0 }));
    }

    #[test]
    fn test_line_buffer_overflow() {
        let mut buffer = LineBuffer::new();
        for _ in 0..COMMAND_BUFFER_LEN - 1 {
            assert!(buffer.push(b'1').is_none());
        }
        assert_eq!(buffer.push(b'1'), Some(Err(ParseError::TooLong)));
        assert_eq!(buffer.len(), 0);

        // rest of the long line, then a normal one
        assert!(feed(&mut buffer, "11;").is_none());
        let line = feed(&mut buffer, "V2\n").unwrap().unwrap();
        assert_eq!(Command::parse(&line), Ok(Command::SetVelocity(2.0)));
    }

    #[test]
    fn test_long_line_tail_is_dropped() {
        let mut buffer = LineBuffer::new();
        let mut text = std::string::String::from("R");
        text.extend(core::iter::repeat('9').take(47));
        text.push_str("V900;");

        let results: std::vec::Vec<_> = text.bytes().filter_map(|b| buffer.push(b)).collect();
        assert_eq!(results, [Err(ParseError::TooLong)]);
        assert!(buffer.is_empty());

        let line = feed(&mut buffer, "V1;").unwrap().unwrap();
        assert_eq!(Command::parse(&line), Ok(Command::SetVelocity(1.0)));
    }

    #[test]
    fn test_clear_ends_discarding() {
        let mut buffer = LineBuffer::new();
        for _ in 0..COMMAND_BUFFER_LEN {
            buffer.push(b'x');
        }
        buffer.clear();
        let line = feed(&mut buffer, "s\r").unwrap().unwrap();
        assert_eq!(line.as_str(), "s");
    }

    #[test]
    fn test_line_buffer_encoding() {
        let mut buffer = LineBuffer::new();
        buffer.push(b'V');
        buffer.push(0xff);
        assert_eq!(buffer.push(b';'), Some(Err(ParseError::Encoding)));
    }
}
