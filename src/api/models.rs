//! REST resource models.
//!
//! Tasks, budget and script use the backend's camelCase keys; scenes keep the
//! backend's snake_case analysis keys.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Producer,
    #[serde(rename = "Production Manager")]
    ProductionManager,
    Director,
    Crew,
    #[serde(rename = "VFX")]
    Vfx,
    #[serde(rename = "Distribution Manager")]
    DistributionManager,
    #[serde(other)]
    Other,
}

impl Role {
    /// Roles that only see tasks assigned to them.
    pub fn sees_only_assigned_tasks(&self) -> bool {
        matches!(self, Role::Crew | Role::Vfx)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Producer => "Producer",
            Role::ProductionManager => "Production Manager",
            Role::Director => "Director",
            Role::Crew => "Crew",
            Role::Vfx => "VFX",
            Role::DistributionManager => "Distribution Manager",
            Role::Other => "Other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub assignee: String,
    #[serde(default)]
    pub assignee_id: String,
    #[serde(default)]
    pub due_date: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub estimated_hours: f64,
}

pub fn tasks_by_status(tasks: &[Task], status: TaskStatus) -> Vec<&Task> {
    tasks.iter().filter(|t| t.status == status).collect()
}

pub fn tasks_by_assignee<'a>(tasks: &'a [Task], assignee_id: &str) -> Vec<&'a Task> {
    tasks.iter().filter(|t| t.assignee_id == assignee_id).collect()
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetCategory {
    pub name: String,
    pub budgeted: f64,
    pub spent: f64,
    #[serde(default)]
    pub remaining: f64,
}

impl BudgetCategory {
    /// Spent as a percentage of budgeted; zero when nothing was budgeted.
    pub fn utilization(&self) -> f64 {
        if self.budgeted > 0.0 {
            self.spent / self.budgeted * 100.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetHistory {
    pub date: String,
    pub amount: f64,
    pub category: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetForecast {
    #[serde(default)]
    pub projected_total: f64,
    #[serde(default)]
    pub over_budget: f64,
    #[serde(default)]
    pub risk_factors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub total: f64,
    pub spent: f64,
    #[serde(default)]
    pub remaining: f64,
    #[serde(default)]
    pub categories: Vec<BudgetCategory>,
    #[serde(default)]
    pub history: Vec<BudgetHistory>,
    #[serde(default)]
    pub forecast: BudgetForecast,
}

impl Budget {
    pub fn utilization(&self) -> f64 {
        if self.total > 0.0 {
            self.spent / self.total * 100.0
        } else {
            0.0
        }
    }

    /// How far the forecast exceeds the total, or zero.
    pub fn over_budget_amount(&self) -> f64 {
        (self.forecast.projected_total - self.total).max(0.0)
    }

    pub fn category(&self, name: &str) -> Option<&BudgetCategory> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn category_utilization(&self, name: &str) -> Option<f64> {
        self.category(name).map(BudgetCategory::utilization)
    }
}

// ---------------------------------------------------------------------------
// Script
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    #[serde(default)]
    pub scene_number: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub int_ext: String,
    #[serde(default)]
    pub day_night: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub estimated_runtime_minutes: f64,
    #[serde(default)]
    pub scene_description: String,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub vfx_required: bool,
    #[serde(default)]
    pub vfx_details: String,
    #[serde(default)]
    pub scene_complexity: Option<String>,
    #[serde(default)]
    pub scene_status: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Breakdown lists (props, wardrobe, ...) and legacy keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Scene {
    pub fn status(&self) -> &str {
        self.scene_status.as_deref().unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub last_modified: String,
    #[serde(default)]
    pub scenes: Vec<Scene>,
    #[serde(default)]
    pub total_estimated_duration: f64,
    #[serde(default)]
    pub total_scenes: u32,
    #[serde(default)]
    pub vfx_scenes: u32,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub characters: Vec<String>,
}

impl Script {
    pub fn vfx_scenes(&self) -> Vec<&Scene> {
        self.scenes.iter().filter(|s| s.vfx_required).collect()
    }

    pub fn scenes_by_status(&self, status: &str) -> Vec<&Scene> {
        self.scenes.iter().filter(|s| s.status() == status).collect()
    }

    /// Sum of per-scene runtimes in minutes.
    pub fn total_duration(&self) -> f64 {
        self.scenes.iter().map(|s| s.estimated_runtime_minutes).sum()
    }

    pub fn unique_locations(&self) -> BTreeSet<&str> {
        self.scenes
            .iter()
            .map(|s| s.location.as_str())
            .filter(|l| !l.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptMetrics {
    #[serde(default)]
    pub total_scenes: u32,
    #[serde(default)]
    pub total_estimated_duration: f64,
    #[serde(default)]
    pub vfx_scenes: u32,
    #[serde(default)]
    pub total_locations: u32,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub approved_scenes: u32,
    #[serde(default)]
    pub status_breakdown: BTreeMap<String, u32>,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub script_title: Option<String>,
    #[serde(default)]
    pub script_version: Option<String>,
}
