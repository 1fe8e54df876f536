use chrono::{DateTime, Utc};
use rand::Rng;

/// Collision budget for the random invoice-number suffix. Creation retries a
/// fresh suffix on a uniqueness violation up to this many times.
pub const INVOICE_NUMBER_ATTEMPTS: u32 = 5;

/// `QTN-YYYYMMDD-NNNN`. The sequence counts every quotation ever created,
/// soft-deleted ones included, so numbers stay monotonic.
pub fn quotation_number(at: DateTime<Utc>, sequence: u32) -> String {
    format!("QTN-{}-{:04}", at.format("%Y%m%d"), sequence)
}

/// `INV-YYYYMMDDHHMMSS-DDDD` with a random four-digit suffix. Uniqueness is
/// enforced by the store; collisions are handled by retrying with a new
/// suffix.
pub fn invoice_number(at: DateTime<Utc>) -> String {
    invoice_number_with_suffix(at, rand::thread_rng().gen_range(0..10_000))
}

fn invoice_number_with_suffix(at: DateTime<Utc>, suffix: u16) -> String {
    format!("INV-{}-{:04}", at.format("%Y%m%d%H%M%S"), suffix)
}
