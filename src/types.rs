use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepairStatus {
    Completed,
    InProgress,
    Pending,
}

impl RepairStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RepairStatus::Completed => "completed",
            RepairStatus::InProgress => "in-progress",
            RepairStatus::Pending => "pending",
        }
    }
}

impl FromStr for RepairStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(RepairStatus::Completed),
            "in-progress" => Ok(RepairStatus::InProgress),
            "pending" => Ok(RepairStatus::Pending),
            x => Err(format!("Unknown repair status {}", x)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleDetails {
    pub make: String,
    pub model: String,
    pub year: u16,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repair {
    pub id: String,
    pub service: String,
    #[serde(default)]
    pub parts: Vec<String>,
    pub cost: u64,
    pub technician: String,
    pub status: RepairStatus,
    pub timestamp: String,
    pub invoice_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_details: Option<VehicleDetails>,
}

/// One shop visit. `date` is an ISO `YYYY-MM-DD` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visit {
    pub date: String,
    pub visit_number: u32,
    pub repairs: Vec<Repair>,
    /// Derived from `repairs` when read back from the database.
    #[serde(default)]
    pub total_cost: u64,
}

/// Aggregates over a plate's history, newest visit first.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub visits: usize,
    pub services: usize,
    pub total_spent: u64,
    pub average_per_visit: u64,
    pub latest_service: String,
    pub first_service: String,
    pub customer_since: Option<i32>,
    pub vehicle_year: Option<u16>,
}

impl HistorySummary {
    pub fn from_visits(visits: &[Visit]) -> Option<HistorySummary> {
        let latest = visits.first()?;
        let first = visits.last()?;
        let total_spent: u64 = visits.iter().map(|v| v.total_cost).sum();
        let count = visits.len() as u64;
        Some(HistorySummary {
            visits: visits.len(),
            services: visits.iter().map(|v| v.repairs.len()).sum(),
            total_spent,
            average_per_visit: (total_spent + count / 2) / count,
            latest_service: latest.date.clone(),
            first_service: first.date.clone(),
            customer_since: first.date.get(..4).and_then(|y| y.parse().ok()),
            vehicle_year: latest
                .repairs
                .first()
                .and_then(|r| r.vehicle_details.as_ref())
                .map(|v| v.year),
        })
    }
}
