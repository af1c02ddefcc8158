//! Bidirectional mapping between transaction records and spreadsheet rows,
//! plus the sync fingerprint both sides are compared by.

use crate::models::{RemoteRecord, SheetRow, TransactionRecord};
use crate::sheets::SheetError;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

/// Fixed column schema of the transactions tab. Row 1 carries exactly these
/// headers; data starts at row 2.
pub const HEADER: [&str; 8] = [
    "Date",
    "Description",
    "Amount",
    "Category",
    "Subcategory",
    "Confidence",
    "Confirmed",
    "Notes",
];

/// Field separator for fingerprint input. A control byte so that cell
/// content cannot collide with the field boundaries.
const FP_SEPARATOR: char = '\x1f';

/// Pure, total mapping between [`TransactionRecord`] and the fixed column
/// schema. Stateless; all functions are associated.
pub struct RowMapper;

impl RowMapper {
    pub fn header_row() -> Vec<String> {
        HEADER.iter().map(|h| h.to_string()).collect()
    }

    /// Check an existing header row against the expected column list.
    pub fn validate_header(header: &SheetRow) -> Result<(), SheetError> {
        let found: Vec<String> = header.cells.iter().map(|c| c.trim().to_string()).collect();
        let expected: Vec<String> = Self::header_row();
        if found != expected {
            return Err(SheetError::SchemaMismatch { expected, found });
        }
        Ok(())
    }

    /// Render a record as one sheet row, in header order.
    pub fn to_row(record: &TransactionRecord) -> Vec<String> {
        vec![
            record.transaction_date.format("%Y-%m-%d").to_string(),
            record.description.clone(),
            format_amount(record.amount),
            record.category.clone(),
            record.subcategory.clone().unwrap_or_default(),
            record
                .confidence_score
                .map(|c| format!("{:.2}", c))
                .unwrap_or_default(),
            if record.user_confirmed { "TRUE" } else { "FALSE" }.to_string(),
            record.user_notes.clone().unwrap_or_default(),
        ]
    }

    /// Parse one data row. Total: empty or malformed cells map to the
    /// documented defaults, never to an error.
    pub fn from_row(row: &SheetRow) -> RemoteRecord {
        RemoteRecord {
            row_index: row.row_index,
            transaction_date: parse_date(row.cell(0)),
            description: row.cell(1).trim().to_string(),
            amount: parse_amount(row.cell(2)),
            category: row.cell(3).trim().to_string(),
            subcategory: non_empty(row.cell(4)),
            confidence_score: row.cell(5).trim().parse::<f64>().ok(),
            user_confirmed: parse_bool(row.cell(6)),
            user_notes: non_empty(row.cell(7)),
        }
    }

    /// Stable hash of a record's sync-relevant fields: date, description,
    /// amount (2-decimal), category, subcategory, confirmed, notes.
    /// Excludes id, confidence and timestamps.
    pub fn fingerprint(record: &TransactionRecord) -> String {
        fingerprint_fields(
            Some(record.transaction_date),
            &record.description,
            record.amount,
            &record.category,
            record.subcategory.as_deref(),
            record.user_confirmed,
            record.user_notes.as_deref(),
        )
    }

    /// Fingerprint of a parsed sheet row, over the same canonical encoding
    /// so that local and remote state are directly comparable.
    pub fn fingerprint_remote(remote: &RemoteRecord) -> String {
        fingerprint_fields(
            remote.transaction_date,
            &remote.description,
            remote.amount,
            &remote.category,
            remote.subcategory.as_deref(),
            remote.user_confirmed,
            remote.user_notes.as_deref(),
        )
    }

    /// First-link identity used when a record has no remote row reference
    /// yet: description + date + amount.
    pub fn identity_key(
        date: Option<NaiveDate>,
        description: &str,
        amount: Decimal,
    ) -> String {
        format!(
            "{}{}{}{}{}",
            description.trim(),
            FP_SEPARATOR,
            date.map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            FP_SEPARATOR,
            format_amount(amount)
        )
    }
}

fn fingerprint_fields(
    date: Option<NaiveDate>,
    description: &str,
    amount: Decimal,
    category: &str,
    subcategory: Option<&str>,
    confirmed: bool,
    notes: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    let input = format!(
        "{}{sep}{}{sep}{}{sep}{}{sep}{}{sep}{}{sep}{}",
        date.map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        description.trim(),
        format_amount(amount),
        category.trim(),
        subcategory.unwrap_or("").trim(),
        confirmed,
        notes.unwrap_or("").trim(),
        sep = FP_SEPARATOR,
    );
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fixed 2-decimal rendering so amounts compare stably across the boundary.
pub fn format_amount(amount: Decimal) -> String {
    let mut rounded = amount.round_dp(2);
    rounded.rescale(2);
    rounded.to_string()
}

fn parse_amount(cell: &str) -> Decimal {
    let cleaned: String = cell
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse::<Decimal>().unwrap_or(Decimal::ZERO)
}

fn parse_date(cell: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(cell.trim(), "%Y-%m-%d").ok()
}

fn parse_bool(cell: &str) -> bool {
    matches!(
        cell.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "1"
    )
}

fn non_empty(cell: &str) -> Option<String> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
