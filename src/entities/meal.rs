use super::single_table_entity;
use crate::core::{TableName, date_start};
use crate::store::{CacheStore, StoreKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Meal attendance sub-kinds, all stored in one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealKind {
    Guest,
    Rv,
    DayWorker,
    Shelter,
    UnitedEffort,
    Extra,
    LunchBag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<String>,
    pub meal_type: MealKind,
    pub quantity: u32,
    pub served_on: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picked_up_by_proxy_id: Option<String>,
}

impl MealRecord {
    pub fn for_guest(guest_id: impl Into<String>, served_on: NaiveDate, quantity: u32) -> Self {
        Self {
            id: String::new(),
            guest_id: Some(guest_id.into()),
            meal_type: MealKind::Guest,
            quantity,
            served_on,
            picked_up_by_proxy_id: None,
        }
    }

    pub fn bulk(meal_type: MealKind, served_on: NaiveDate, quantity: u32) -> Self {
        Self {
            id: String::new(),
            guest_id: None,
            meal_type,
            quantity,
            served_on,
            picked_up_by_proxy_id: None,
        }
    }
}

single_table_entity!(MealRecord, StoreKind::Meals, TableName::MealAttendance, |m| {
    date_start(m.served_on)
});

impl CacheStore<MealRecord> {
    /// Meals served on `date`, optionally limited to one sub-kind.
    pub fn servings_on(&self, date: NaiveDate, kind: Option<MealKind>) -> u32 {
        self.filter(|m| m.served_on == date && kind.is_none_or(|k| m.meal_type == k))
            .iter()
            .map(|m| m.quantity)
            .sum()
    }

    pub fn guest_meals_on(&self, guest_id: &str, date: NaiveDate) -> Vec<MealRecord> {
        self.filter(|m| m.served_on == date && m.guest_id.as_deref() == Some(guest_id))
    }
}
