use std::path::Path;

use tokenizers::Tokenizer;

use crate::error::{ModelError, Result};

/// Token ids and attention mask for one piece of text, both exactly
/// `max_length` long.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedText {
    pub ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
}

/// Wraps the pretrained subword tokenizer and applies the shared text
/// normalization.
///
/// Training and inference must go through the same `TextEncoder`; nothing at
/// runtime checks that the normalization matches the one the checkpoint was
/// trained with, so a mismatch silently degrades prediction quality.
pub struct TextEncoder {
    tokenizer: Tokenizer,
    pad_id: u32,
}

impl TextEncoder {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path.as_ref())
            .map_err(|e| ModelError::Tokenizer(e.to_string()))?;
        let pad_id = tokenizer
            .token_to_id("<pad>")
            .or_else(|| tokenizer.token_to_id("[PAD]"))
            .unwrap_or(0);
        Ok(Self { tokenizer, pad_id })
    }

    /// Lowercase and collapse whitespace. Vietnamese compound words are left
    /// to the subword tokenizer; punctuation is spaced out so it forms its
    /// own tokens.
    pub fn normalize(text: &str) -> String {
        let mut spaced = String::with_capacity(text.len());
        for ch in text.chars() {
            if matches!(ch, ',' | '.' | '?' | '!' | ';' | ':') {
                spaced.push(' ');
                spaced.push(ch);
                spaced.push(' ');
            } else {
                spaced.push(ch);
            }
        }
        spaced
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Encode `text` into ids + mask of exactly `max_length`, truncating and
    /// right-padding deterministically.
    pub fn encode(&self, text: &str, max_length: usize) -> Result<EncodedText> {
        let normalized = Self::normalize(text);
        let encoding = self
            .tokenizer
            .encode(normalized, true)
            .map_err(|e| ModelError::Tokenizer(e.to_string()))?;
        Ok(Self::pad_or_truncate(
            encoding.get_ids(),
            max_length,
            self.pad_id,
        ))
    }

    fn pad_or_truncate(ids: &[u32], max_length: usize, pad_id: u32) -> EncodedText {
        let take = ids.len().min(max_length);
        let mut out_ids = Vec::with_capacity(max_length);
        out_ids.extend_from_slice(&ids[..take]);
        let mut mask = vec![1u32; take];
        out_ids.resize(max_length, pad_id);
        mask.resize(max_length, 0);
        EncodedText {
            ids: out_ids,
            attention_mask: mask,
        }
    }
}
