use crate::input::Input;
use rand::Rng;
use thiserror::Error;

/// Alphabet used by the letter-or-digit and random-string insertions.
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
/// Symbols are drawn from the whole 7-bit range, control characters included.
const ASCII_RANGE_END: u8 = 128;
/// Exclusive upper bound on the length of a string produced by `insert_string`.
const MAX_INSERTED_STRING_LEN: usize = 50;
/// Bits 0..8 of a character's code point are candidates for `flip_bit`.
const FLIPPABLE_BITS: u32 = 8;

/// Errors raised by a single mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// The operator picks a character index and cannot work on an empty string.
    #[error("Operator '{0}' requires a non-empty input")]
    EmptyInput(&'static str),
}

/// A `Mutator` transforms an `Input` into a new, potentially modified `Input`.
///
/// # Type Parameters
/// * `I`: The type of `Input` this mutator operates on.
/// * `R`: The type of random number generator used for mutation decisions.
pub trait Mutator<I: Input, R: Rng + ?Sized> {
    /// Applies one mutation to `input` and returns the result.
    ///
    /// Every random decision is drawn from `rng`, so a seeded generator
    /// makes the whole sequence of mutations reproducible.
    fn mutate(&mut self, input: &I, rng: &mut R) -> Result<I, MutationError>;
}

/// The fixed catalog of string mutation operators.
///
/// Each variant is a single, independent edit. Index and offset draws are
/// uniform over the current number of chars in the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationOperator {
    /// Insert one char from code points `0..128` at an offset in `[0, len]`.
    InsertAsciiSymbol,
    /// Insert one char from `[a-zA-Z0-9]` at an offset in `[0, len]`.
    InsertLetterOrDigit,
    /// Insert a string of 0 to 49 chars from `[a-zA-Z0-9]` at an offset in `[0, len]`.
    InsertString,
    /// Remove the char at an index in `[0, len)`.
    DeleteChar,
    /// XOR one of the low 8 bits of a char's code point.
    FlipBit,
    /// Concatenate the whole input with itself.
    DuplicateChar,
    /// Insert a copy of a char right after it.
    RepeatChar,
    /// Overwrite a char with one from code points `0..128`.
    ReplaceChar,
    /// Lowercase an uppercase char, uppercase anything else.
    SwitchCase,
    /// Reverse the input.
    ReverseAll,
}

impl MutationOperator {
    /// All operators, in catalog order.
    pub const ALL: [MutationOperator; 10] = [
        MutationOperator::InsertAsciiSymbol,
        MutationOperator::InsertLetterOrDigit,
        MutationOperator::InsertString,
        MutationOperator::DeleteChar,
        MutationOperator::FlipBit,
        MutationOperator::DuplicateChar,
        MutationOperator::RepeatChar,
        MutationOperator::ReplaceChar,
        MutationOperator::SwitchCase,
        MutationOperator::ReverseAll,
    ];

    /// The stable identifier used in weight lists and reports.
    pub fn name(&self) -> &'static str {
        match self {
            MutationOperator::InsertAsciiSymbol => "insert_ascii_symbol",
            MutationOperator::InsertLetterOrDigit => "insert_letter_or_digit",
            MutationOperator::InsertString => "insert_string",
            MutationOperator::DeleteChar => "delete_char",
            MutationOperator::FlipBit => "flip_bit",
            MutationOperator::DuplicateChar => "duplicate_char",
            MutationOperator::RepeatChar => "repeat_char",
            MutationOperator::ReplaceChar => "replace_char",
            MutationOperator::SwitchCase => "switch_case",
            MutationOperator::ReverseAll => "reverse_all",
        }
    }

    /// Looks an operator up by name. `duplicate` is accepted for `duplicate_char`.
    pub fn from_name(name: &str) -> Option<Self> {
        if name == "duplicate" {
            return Some(MutationOperator::DuplicateChar);
        }
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    /// Relative weight used when no weight list is configured.
    pub fn default_weight(&self) -> u32 {
        match self {
            MutationOperator::InsertAsciiSymbol => 10,
            MutationOperator::InsertLetterOrDigit => 5,
            MutationOperator::InsertString => 5,
            MutationOperator::DeleteChar => 10,
            MutationOperator::FlipBit => 10,
            MutationOperator::DuplicateChar => 5,
            MutationOperator::RepeatChar => 5,
            MutationOperator::ReplaceChar => 10,
            MutationOperator::SwitchCase => 10,
            MutationOperator::ReverseAll => 1,
        }
    }

    /// Whether the operator needs at least one char to pick an index from.
    pub fn requires_non_empty(&self) -> bool {
        matches!(
            self,
            MutationOperator::DeleteChar
                | MutationOperator::FlipBit
                | MutationOperator::RepeatChar
                | MutationOperator::ReplaceChar
                | MutationOperator::SwitchCase
        )
    }

    /// Applies this operator to `input`.
    ///
    /// Index-based operators return [`MutationError::EmptyInput`] for an empty
    /// string before drawing anything from `rng`.
    pub fn apply<R: Rng + ?Sized>(&self, input: &str, rng: &mut R) -> Result<String, MutationError> {
        let char_count = input.chars().count();
        if char_count == 0 && self.requires_non_empty() {
            return Err(MutationError::EmptyInput(self.name()));
        }

        let mut output = input.to_string();
        match self {
            MutationOperator::InsertAsciiSymbol => {
                let insertion = random_ascii(rng);
                let offset = rng.random_range(0..=char_count);
                output.insert(byte_offset(input, offset), insertion);
            }
            MutationOperator::InsertLetterOrDigit => {
                let insertion = random_alphanumeric(rng);
                let offset = rng.random_range(0..=char_count);
                output.insert(byte_offset(input, offset), insertion);
            }
            MutationOperator::InsertString => {
                let length = rng.random_range(0..MAX_INSERTED_STRING_LEN);
                let insertion: String = (0..length).map(|_| random_alphanumeric(rng)).collect();
                let offset = rng.random_range(0..=char_count);
                output.insert_str(byte_offset(input, offset), &insertion);
            }
            MutationOperator::DeleteChar => {
                let index = rng.random_range(0..char_count);
                output.remove(byte_offset(input, index));
            }
            MutationOperator::FlipBit => {
                let index = rng.random_range(0..char_count);
                let bit = rng.random_range(0..FLIPPABLE_BITS);
                let (start, original) = char_at(input, index);
                // Bits 0..8 never move a scalar value into the surrogate range.
                let flipped = char::from_u32(original as u32 ^ (1 << bit)).unwrap_or(original);
                replace_char_at(&mut output, start, original, flipped);
            }
            MutationOperator::DuplicateChar => {
                output.push_str(input);
            }
            MutationOperator::RepeatChar => {
                let index = rng.random_range(0..char_count);
                let (start, repeated) = char_at(input, index);
                output.insert(start + repeated.len_utf8(), repeated);
            }
            MutationOperator::ReplaceChar => {
                let replacement = random_ascii(rng);
                let index = rng.random_range(0..char_count);
                let (start, original) = char_at(input, index);
                replace_char_at(&mut output, start, original, replacement);
            }
            MutationOperator::SwitchCase => {
                let index = rng.random_range(0..char_count);
                let (start, original) = char_at(input, index);
                replace_char_at(&mut output, start, original, switch_case(original));
            }
            MutationOperator::ReverseAll => {
                output = input.chars().rev().collect();
            }
        }
        Ok(output)
    }
}

impl std::fmt::Display for MutationOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl<R: Rng + ?Sized> Mutator<String, R> for MutationOperator {
    fn mutate(&mut self, input: &String, rng: &mut R) -> Result<String, MutationError> {
        self.apply(input, rng)
    }
}

/// The full catalog with its default weights, in catalog order.
pub fn default_weights() -> Vec<(MutationOperator, u32)> {
    MutationOperator::ALL
        .into_iter()
        .map(|op| (op, op.default_weight()))
        .collect()
}

fn random_ascii<R: Rng + ?Sized>(rng: &mut R) -> char {
    rng.random_range(0..ASCII_RANGE_END) as char
}

fn random_alphanumeric<R: Rng + ?Sized>(rng: &mut R) -> char {
    ALPHANUMERIC[rng.random_range(0..ALPHANUMERIC.len())] as char
}

/// Byte offset of the `char_index`-th char, or the string length past the end.
fn byte_offset(s: &str, char_index: usize) -> usize {
    s.char_indices()
        .nth(char_index)
        .map_or(s.len(), |(offset, _)| offset)
}

/// Byte offset and value of the `char_index`-th char. The index must be in bounds.
fn char_at(s: &str, char_index: usize) -> (usize, char) {
    s.char_indices()
        .nth(char_index)
        .unwrap_or((s.len(), '\0'))
}

fn replace_char_at(s: &mut String, start: usize, original: char, replacement: char) {
    let mut buf = [0u8; 4];
    s.replace_range(
        start..start + original.len_utf8(),
        replacement.encode_utf8(&mut buf),
    );
}

fn switch_case(c: char) -> char {
    if c.is_uppercase() {
        single_char(c.to_lowercase(), c)
    } else {
        single_char(c.to_uppercase(), c)
    }
}

// Mappings that expand to several chars (e.g. 'ß' -> "SS") keep the original.
fn single_char(mut mapped: impl Iterator<Item = char>, fallback: char) -> char {
    match (mapped.next(), mapped.next()) {
        (Some(m), None) => m,
        _ => fallback,
    }
}
