//! Calendar and text helpers.

pub mod datetime;
pub mod text;

pub use datetime::{date_to_days, days_in_month, days_to_date, format_asctime, is_leap_year};
