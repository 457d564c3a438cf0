// 📐 Shape Layer - field validation for incoming commands
// Collects every problem in one pass so callers can report them together.

use rust_decimal::Decimal;

use crate::commands::EntryFields;
use crate::error::{AipError, FieldError, Result};

pub const MAX_DESCRIPTION_LEN: usize = 1000;
pub const MAX_OUTPUT_LEN: usize = 2000;

fn finish(errors: Vec<FieldError>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AipError::Invalid(errors))
    }
}

/// Description of a PPA or plan title.
pub fn validate_description(field: &str, value: &str) -> Result<()> {
    let mut errors = Vec::new();
    let trimmed = value.trim();

    if trimmed.is_empty() {
        errors.push(FieldError::new(field, "must not be empty"));
    } else if trimmed.chars().count() > MAX_DESCRIPTION_LEN {
        errors.push(FieldError::new(
            field,
            format!("must be at most {} characters", MAX_DESCRIPTION_LEN),
        ));
    }

    finish(errors)
}

/// Schedule, output text, and every monetary field of an entry.
pub fn validate_entry_fields(fields: &EntryFields) -> Result<()> {
    let mut errors = Vec::new();

    for (name, value) in fields.amounts.fields() {
        if value < Decimal::ZERO {
            errors.push(FieldError::new(
                name,
                format!("must be non-negative, got {}", value),
            ));
        }
    }

    if let (Some(start), Some(end)) = (fields.start_date, fields.end_date) {
        if end < start {
            errors.push(FieldError::new(
                "end_date",
                format!("{} is before start date {}", end, start),
            ));
        }
    }

    if let Some(output) = &fields.expected_output {
        if output.chars().count() > MAX_OUTPUT_LEN {
            errors.push(FieldError::new(
                "expected_output",
                format!("must be at most {} characters", MAX_OUTPUT_LEN),
            ));
        }
    }

    finish(errors)
}
