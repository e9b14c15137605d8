use std::collections::BTreeMap;

use chrono::Datelike;
use tracing::debug;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{CompletedVisit, DoctorStats, Granularity, RevenueBucket, StatsError, StatsQuery};

const VISIT_SELECT: &str = "appointment_id,doctor_id,appointment_time,\
invoice:invoices(amount),review:reviews(rating),\
doctor:doctors(user:users(first_name,last_name),specialty:specialties(name))";

pub struct StatsService {
    supabase: SupabaseClient,
}

impl StatsService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Visits and revenue per doctor over completed, invoiced appointments.
    pub async fn get_appointment_stats(&self, query: &StatsQuery) -> Result<Vec<DoctorStats>, StatsError> {
        query.validate()?;
        let visits = self.completed_visits(query, query.doctor_id).await?;
        Ok(aggregate_doctor_stats(&visits))
    }

    /// Revenue grouped by year, by quarter or by month depending on which
    /// period fields are set.
    pub async fn get_revenue_by_time_period(&self, query: &StatsQuery) -> Result<Vec<RevenueBucket>, StatsError> {
        query.validate()?;
        let visits = self.completed_visits(query, None).await?;
        Ok(aggregate_revenue(&visits, query.granularity()))
    }

    async fn completed_visits(
        &self,
        query: &StatsQuery,
        doctor_id: Option<i64>,
    ) -> Result<Vec<CompletedVisit>, StatsError> {
        let mut path = format!("/rest/v1/appointments?select={}&status=eq.Completed", VISIT_SELECT);

        if let Some((start, end)) = query.date_range() {
            if start == end {
                return Ok(Vec::new());
            }
            path.push_str(&format!(
                "&appointment_time=gte.{}&appointment_time=lt.{}",
                start.format("%Y-%m-%d"),
                end.format("%Y-%m-%d")
            ));
        }
        if let Some(doctor_id) = doctor_id {
            path.push_str(&format!("&doctor_id=eq.{}", doctor_id));
        }

        debug!("Loading completed visits: {}", path);
        self.supabase
            .select(&path)
            .await
            .map_err(|e| StatsError::DatabaseError(e.to_string()))
    }
}

/// Group invoiced visits per doctor, busiest revenue first.
pub fn aggregate_doctor_stats(visits: &[CompletedVisit]) -> Vec<DoctorStats> {
    let mut per_doctor: BTreeMap<i64, (DoctorStats, Vec<i32>)> = BTreeMap::new();

    for visit in visits {
        let Some(amount) = visit.invoiced_amount() else {
            continue;
        };

        let (stats, ratings) = per_doctor.entry(visit.doctor_id).or_insert_with(|| {
            let doctor = visit.doctor.as_ref();
            let name = doctor.and_then(|d| d.user.as_ref());
            (
                DoctorStats {
                    doctor_id: visit.doctor_id,
                    first_name: name.map(|n| n.first_name.clone()).unwrap_or_default(),
                    last_name: name.map(|n| n.last_name.clone()).unwrap_or_default(),
                    specialty_name: doctor.and_then(|d| d.specialty.as_ref()).map(|s| s.name.clone()),
                    appointment_count: 0,
                    total_revenue: 0.0,
                    average_rating: None,
                },
                Vec::new(),
            )
        });

        stats.appointment_count += 1;
        stats.total_revenue += amount;
        ratings.extend(visit.ratings());
    }

    let mut result: Vec<DoctorStats> = per_doctor
        .into_values()
        .map(|(mut stats, ratings)| {
            if !ratings.is_empty() {
                let sum: i32 = ratings.iter().sum();
                stats.average_rating = Some(sum as f64 / ratings.len() as f64);
            }
            stats
        })
        .collect();

    result.sort_by(|a, b| {
        b.total_revenue
            .total_cmp(&a.total_revenue)
            .then(a.doctor_id.cmp(&b.doctor_id))
    });
    result
}

/// Bucket invoiced visits by period, in chronological order.
pub fn aggregate_revenue(visits: &[CompletedVisit], granularity: Granularity) -> Vec<RevenueBucket> {
    let mut buckets: BTreeMap<(i32, u32), RevenueBucket> = BTreeMap::new();

    for visit in visits {
        let Some(amount) = visit.invoiced_amount() else {
            continue;
        };

        let year = visit.appointment_time.year();
        let (sub_period, quarter, month) = match granularity {
            Granularity::Year => (0, None, None),
            Granularity::Quarter => (visit.quarter(), Some(visit.quarter()), None),
            Granularity::Month => {
                let month = visit.appointment_time.month();
                (month, None, Some(month))
            }
        };

        let bucket = buckets.entry((year, sub_period)).or_insert(RevenueBucket {
            year,
            quarter,
            month,
            appointment_count: 0,
            total_revenue: 0.0,
        });
        bucket.appointment_count += 1;
        bucket.total_revenue += amount;
    }

    buckets.into_values().collect()
}
