//! Value masking strategies.
//!
//! ## Strategies
//!
//! | Strategy   | Description                          | Reversible |
//! |------------|--------------------------------------|------------|
//! | Redact     | Pattern-aware partial redaction      | No         |
//! | Hash       | SHA-256 one-way hash                 | No         |
//! | Tokenize   | Deterministic BLAKE3 token           | No         |
//! | Truncate   | Keep first N characters              | No         |
//! | Constant   | Replace with fixed text              | No         |
//! | Null       | Replace with `null`                  | No         |
//!
//! A strategy that cannot interpret its input (an SSN with eight digits, an
//! email without `@`, an object) produces `null`. The original value is never
//! passed through on failure.
//!
//! ```
//! use rowguard_field::masking::{mask_email, mask_ssn};
//! use serde_json::json;
//!
//! assert_eq!(mask_ssn()(&json!("123-45-6789")), json!("***-**-6789"));
//! assert_eq!(mask_email()(&json!("john@example.com")), json!("j***@example.com"));
//! assert_eq!(mask_email()(&json!("not-an-email")), json!(null));
//! ```

use std::fmt::Write as _;
use std::sync::Arc;

use rowguard_types::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Function turning a hidden value into what the caller sees.
pub type MaskFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a strategy could not mask a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MaskingError {
    #[error("Value does not match expected pattern for {pattern:?}: {reason}")]
    PatternMismatch {
        pattern: RedactPattern,
        reason: String,
    },

    #[error("Value of type {kind} cannot be masked as text")]
    NotText { kind: &'static str },
}

// ---------------------------------------------------------------------------
// Strategy types
// ---------------------------------------------------------------------------

/// Pattern for partial redaction of known data formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RedactPattern {
    /// SSN: `***-**-6789` (last 4 visible).
    Ssn,
    /// Phone: `***-***-1234` (last 4 visible).
    Phone,
    /// Email: `j***@example.com` (first char + domain visible).
    Email,
    /// Credit card: `****-****-****-1234` (last 4 visible).
    CreditCard,
}

/// Strategy used to mask a field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaskingStrategy {
    Redact(RedactPattern),
    /// SHA-256, hex-encoded.
    Hash,
    /// `tok_` followed by the first 16 hex chars of a BLAKE3 hash.
    Tokenize,
    /// Keep the first `max_chars` characters, then `"..."`.
    Truncate { max_chars: usize },
    /// Fixed replacement text.
    Constant(String),
    Null,
}

impl MaskingStrategy {
    /// Masks `value`, reporting why it could not be masked.
    ///
    /// `null` inputs stay `null` for every strategy except `Constant`.
    pub fn try_apply(&self, value: &Value) -> Result<Value, MaskingError> {
        let masked = match self {
            MaskingStrategy::Constant(text) => return Ok(Value::String(text.clone())),
            MaskingStrategy::Null => return Ok(Value::Null),
            _ if value.is_null() => return Ok(Value::Null),
            MaskingStrategy::Redact(pattern) => redact(&text_of(value)?, *pattern)?,
            MaskingStrategy::Hash => hash(&text_of(value)?),
            MaskingStrategy::Tokenize => tokenize(&text_of(value)?),
            MaskingStrategy::Truncate { max_chars } => truncate(&text_of(value)?, *max_chars),
        };
        Ok(Value::String(masked))
    }

    /// Masks `value`, producing `null` when the strategy does not apply.
    pub fn apply(&self, value: &Value) -> Value {
        self.try_apply(value).unwrap_or(Value::Null)
    }

    pub fn into_mask_fn(self) -> MaskFn {
        Arc::new(move |value: &Value| self.apply(value))
    }
}

// ---------------------------------------------------------------------------
// Ready-made mask functions
// ---------------------------------------------------------------------------

pub fn mask_email() -> MaskFn {
    MaskingStrategy::Redact(RedactPattern::Email).into_mask_fn()
}

pub fn mask_ssn() -> MaskFn {
    MaskingStrategy::Redact(RedactPattern::Ssn).into_mask_fn()
}

pub fn mask_phone() -> MaskFn {
    MaskingStrategy::Redact(RedactPattern::Phone).into_mask_fn()
}

pub fn mask_credit_card() -> MaskFn {
    MaskingStrategy::Redact(RedactPattern::CreditCard).into_mask_fn()
}

/// SHA-256 hex digest of the value's text.
pub fn mask_hash() -> MaskFn {
    MaskingStrategy::Hash.into_mask_fn()
}

/// Deterministic `tok_…` token; equal inputs give equal tokens.
pub fn mask_token() -> MaskFn {
    MaskingStrategy::Tokenize.into_mask_fn()
}

/// Keeps the first `max_chars` characters and appends `...`.
///
/// Values of at most `max_chars` characters come back unchanged, yet the
/// field is still reported in [`MaskedRow::masked_fields`]. Not suitable
/// for short secrets.
///
/// [`MaskedRow::masked_fields`]: crate::MaskedRow::masked_fields
pub fn mask_truncate(max_chars: usize) -> MaskFn {
    MaskingStrategy::Truncate { max_chars }.into_mask_fn()
}

pub fn mask_constant(text: impl Into<String>) -> MaskFn {
    MaskingStrategy::Constant(text.into()).into_mask_fn()
}

// ---------------------------------------------------------------------------
// Strategy implementations
// ---------------------------------------------------------------------------

fn text_of(value: &Value) -> Result<String, MaskingError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(_) => Err(MaskingError::NotText { kind: "bool" }),
        Value::Array(_) => Err(MaskingError::NotText { kind: "array" }),
        Value::Object(_) => Err(MaskingError::NotText { kind: "object" }),
        Value::Null => Err(MaskingError::NotText { kind: "null" }),
    }
}

fn digits_of(text: &str) -> String {
    text.chars().filter(char::is_ascii_digit).collect()
}

fn redact(text: &str, pattern: RedactPattern) -> Result<String, MaskingError> {
    let mismatch = |reason: String| MaskingError::PatternMismatch { pattern, reason };

    match pattern {
        RedactPattern::Ssn => {
            let digits = digits_of(text);
            if digits.len() != 9 {
                return Err(mismatch(format!(
                    "expected 9 digits for SSN, found {}",
                    digits.len()
                )));
            }
            Ok(format!("***-**-{}", &digits[5..9]))
        }
        RedactPattern::Phone => {
            let digits = digits_of(text);
            if digits.len() < 10 {
                return Err(mismatch(format!(
                    "expected at least 10 digits for phone, found {}",
                    digits.len()
                )));
            }
            Ok(format!("***-***-{}", &digits[digits.len() - 4..]))
        }
        RedactPattern::Email => match text.split_once('@') {
            Some((local, domain)) if !domain.is_empty() && !domain.contains('@') => {
                let Some(first) = local.chars().next() else {
                    return Err(mismatch("empty local part".to_string()));
                };
                Ok(format!("{first}***@{domain}"))
            }
            _ => Err(mismatch("invalid email format".to_string())),
        },
        RedactPattern::CreditCard => {
            let digits = digits_of(text);
            if !(13..=19).contains(&digits.len()) {
                return Err(mismatch(format!(
                    "expected 13-19 digits for credit card, found {}",
                    digits.len()
                )));
            }
            Ok(format!("****-****-****-{}", &digits[digits.len() - 4..]))
        }
    }
}

fn hash(text: &str) -> String {
    use sha2::Digest;

    let digest = sha2::Sha256::digest(text.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    debug_assert_eq!(hex.len(), 64, "SHA-256 hex must be 64 characters");
    hex
}

fn tokenize(text: &str) -> String {
    let hex = blake3::hash(text.as_bytes()).to_hex();
    let token = format!("tok_{}", &hex[..16]);
    debug_assert_eq!(token.len(), 20, "Token must be exactly 20 characters");
    token
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}...")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
