use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Reporting window. Quarter and month only narrow the window when a year
/// is also given.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsQuery {
    pub year: Option<i32>,
    pub quarter: Option<u32>,
    pub month: Option<u32>,
    pub doctor_id: Option<i64>,
}

impl StatsQuery {
    pub fn validate(&self) -> Result<(), StatsError> {
        if let Some(quarter) = self.quarter {
            if !(1..=4).contains(&quarter) {
                return Err(StatsError::ValidationError("Quarter must be between 1 and 4".to_string()));
            }
        }
        if let Some(month) = self.month {
            if !(1..=12).contains(&month) {
                return Err(StatsError::ValidationError("Month must be between 1 and 12".to_string()));
            }
        }
        Ok(())
    }

    /// Half-open `[start, end)` date range, `None` when no year is given.
    ///
    /// When both quarter and month are set the range is their overlap,
    /// which is empty if the month lies outside the quarter.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let year = self.year?;
        let mut start = first_of_month(year, 1)?;
        let mut end = first_of_month(year + 1, 1)?;

        if let Some(quarter) = self.quarter {
            let first_month = (quarter - 1) * 3 + 1;
            start = start.max(first_of_month(year, first_month)?);
            end = end.min(month_after(year, first_month + 2)?);
        }
        if let Some(month) = self.month {
            start = start.max(first_of_month(year, month)?);
            end = end.min(month_after(year, month)?);
        }

        Some((start, end.max(start)))
    }

    pub fn granularity(&self) -> Granularity {
        match (self.year, self.quarter, self.month) {
            (Some(_), _, Some(_)) => Granularity::Month,
            (Some(_), Some(_), None) => Granularity::Quarter,
            _ => Granularity::Year,
        }
    }
}

fn first_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn month_after(year: i32, month: u32) -> Option<NaiveDate> {
    if month == 12 {
        first_of_month(year + 1, 1)
    } else {
        first_of_month(year, month + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Year,
    Quarter,
    Month,
}

/// A PostgREST embed that may come back as one object or as an array,
/// depending on whether the foreign key is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Embedded<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Embedded<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Embedded::Many(items) => items,
            Embedded::One(item) => vec![item],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceAmount {
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRating {
    pub rating: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorName {
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialtyName {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorRef {
    pub user: Option<DoctorName>,
    pub specialty: Option<SpecialtyName>,
}

/// A completed appointment with its invoice, review and doctor embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedVisit {
    pub appointment_id: i64,
    pub doctor_id: i64,
    pub appointment_time: NaiveDateTime,
    pub invoice: Option<Embedded<InvoiceAmount>>,
    pub review: Option<Embedded<ReviewRating>>,
    pub doctor: Option<DoctorRef>,
}

impl CompletedVisit {
    pub fn invoiced_amount(&self) -> Option<f64> {
        let invoices = self.invoice.clone()?.into_vec();
        if invoices.is_empty() {
            None
        } else {
            Some(invoices.iter().map(|i| i.amount).sum())
        }
    }

    pub fn ratings(&self) -> Vec<i32> {
        self.review
            .clone()
            .map(|r| r.into_vec().into_iter().map(|r| r.rating).collect())
            .unwrap_or_default()
    }

    pub fn quarter(&self) -> u32 {
        (self.appointment_time.month() - 1) / 3 + 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoctorStats {
    pub doctor_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub specialty_name: Option<String>,
    pub appointment_count: i64,
    pub total_revenue: f64,
    /// `None` when none of the doctor's visits were reviewed.
    pub average_rating: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevenueBucket {
    pub year: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarter: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    pub appointment_count: i64,
    pub total_revenue: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum StatsError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
