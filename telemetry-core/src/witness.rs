//! ZoKrates witness formatting.
//!
//! A signed 64-byte message becomes 21 space-separated decimal tokens:
//!
//! ```text
//! R.x R.y S A.x A.y  M0[0..8]  M1[0..8]
//! ```
//!
//! `M0` and `M1` are the two 32-byte halves of the message, each split into
//! eight big-endian 32-bit words.

use crate::crypto::Signature;
use crate::curve::CurvePoint;
use crate::field::Scalar;
use std::fmt;
use thiserror::Error;

/// Tokens in one witness line.
pub const TOKEN_COUNT: usize = 21;

/// Message length the circuit accepts.
pub const MESSAGE_LEN: usize = 64;

const WORDS_PER_HALF: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("Message must be {MESSAGE_LEN} bytes, got {0}")]
    MessageLength(usize),

    #[error("Expected {TOKEN_COUNT} tokens, got {0}")]
    TokenCount(usize),

    #[error("Token {index} is not a decimal integer: {token:?}")]
    InvalidToken { index: usize, token: String },
}

/// The 21 decimal tokens of one attestation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessTokens {
    tokens: Vec<String>,
}

impl WitnessTokens {
    /// Render a signature, public key and message as witness tokens.
    pub fn format(
        signature: &Signature,
        public: &CurvePoint,
        message: &[u8],
    ) -> Result<Self, FormatError> {
        if message.len() != MESSAGE_LEN {
            return Err(FormatError::MessageLength(message.len()));
        }

        let mut tokens = Vec::with_capacity(TOKEN_COUNT);
        tokens.push(signature.r.x().to_decimal());
        tokens.push(signature.r.y().to_decimal());
        tokens.push(signature.s.to_decimal());
        tokens.push(public.x().to_decimal());
        tokens.push(public.y().to_decimal());
        tokens.extend(message.chunks_exact(4).map(|word| {
            let word = [word[0], word[1], word[2], word[3]];
            u32::from_be_bytes(word).to_string()
        }));
        Ok(Self { tokens })
    }

    /// Parse a space-separated witness line.
    pub fn parse(line: &str) -> Result<Self, FormatError> {
        let tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if tokens.len() != TOKEN_COUNT {
            return Err(FormatError::TokenCount(tokens.len()));
        }
        for (index, token) in tokens.iter().enumerate() {
            let word_limit_ok = index < 5 || token.parse::<u32>().is_ok();
            if !token.bytes().all(|b| b.is_ascii_digit()) || !word_limit_ok {
                return Err(FormatError::InvalidToken {
                    index,
                    token: token.clone(),
                });
            }
        }
        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn r(&self) -> &[String] {
        &self.tokens[0..2]
    }

    pub fn s(&self) -> &str {
        &self.tokens[2]
    }

    pub fn public_key(&self) -> &[String] {
        &self.tokens[3..5]
    }

    pub fn m0(&self) -> &[String] {
        &self.tokens[5..5 + WORDS_PER_HALF]
    }

    pub fn m1(&self) -> &[String] {
        &self.tokens[5 + WORDS_PER_HALF..]
    }

    /// The signed message, reassembled from the sixteen word tokens.
    pub fn message(&self) -> Vec<u8> {
        self.tokens[5..]
            .iter()
            .flat_map(|word| word.parse::<u32>().unwrap_or_default().to_be_bytes())
            .collect()
    }

    /// Signature and public key, each point checked against the curve.
    pub fn signature(&self) -> Result<(Signature, CurvePoint), FormatError> {
        let invalid = |index: usize| FormatError::InvalidToken {
            index,
            token: self.tokens[index].clone(),
        };
        let point = |index: usize| {
            CurvePoint::from_decimal(&self.tokens[index], &self.tokens[index + 1])
                .map_err(|_| invalid(index))
        };

        let r = point(0)?;
        let s = Scalar::from_decimal(&self.tokens[2]).map_err(|_| invalid(2))?;
        let public = point(3)?;
        Ok((Signature { r, s }, public))
    }
}

impl fmt::Display for WitnessTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens.join(" "))
    }
}

/// Several attestations laid out group by group, one value per line:
/// every `R`, then every `S`, `A`, `M0` and `M1`.
#[derive(Debug, Clone, Default)]
pub struct WitnessBatch {
    entries: Vec<WitnessTokens>,
}

impl WitnessBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tokens: WitnessTokens) {
        self.entries.push(tokens);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn grouped_lines(&self) -> Vec<String> {
        let groups: [fn(&WitnessTokens) -> Vec<&str>; 5] = [
            |t| t.r().iter().map(String::as_str).collect(),
            |t| vec![t.s()],
            |t| t.public_key().iter().map(String::as_str).collect(),
            |t| t.m0().iter().map(String::as_str).collect(),
            |t| t.m1().iter().map(String::as_str).collect(),
        ];

        let mut lines = Vec::with_capacity(self.entries.len() * TOKEN_COUNT);
        for group in groups {
            for entry in &self.entries {
                lines.extend(group(entry).into_iter().map(str::to_string));
            }
        }
        lines
    }
}
