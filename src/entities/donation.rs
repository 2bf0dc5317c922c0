use super::single_table_entity;
use crate::core::{TableName, date_start};
use crate::store::{CacheStore, StoreKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    #[serde(default)]
    pub id: String,
    pub donation_type: String,
    pub item_name: String,
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub donor: Option<String>,
    pub donated_on: NaiveDate,
}

impl Donation {
    pub fn new(
        donation_type: impl Into<String>,
        item_name: impl Into<String>,
        quantity: f64,
        donated_on: NaiveDate,
    ) -> Self {
        Self {
            id: String::new(),
            donation_type: donation_type.into(),
            item_name: item_name.into(),
            quantity,
            unit: None,
            donor: None,
            donated_on,
        }
    }
}

single_table_entity!(Donation, StoreKind::Donations, TableName::Donations, |d| {
    date_start(d.donated_on)
});

impl CacheStore<Donation> {
    /// Total quantity of `donation_type` received on `date`.
    pub fn total_on(&self, donation_type: &str, date: NaiveDate) -> f64 {
        self.filter(|d| d.donated_on == date && d.donation_type == donation_type)
            .iter()
            .map(|d| d.quantity)
            .sum()
    }
}
