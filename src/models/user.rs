//! The built-in operator roster.
//!
//! The source of truth for users is the backend staff directory; this
//! collection only mirrors the accounts the client can act as, with a seed
//! roster for offline runs.
//!
//! Collection contract: insertion order, locally generated ids `USRxxx`
//! (seeded accounts keep their staff ids), capped at 200.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, OrderPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "CUSTOMER_SERVICE")]
    CustomerService,
    #[serde(rename = "SALES")]
    Sales,
    #[serde(rename = "OPERATOR")]
    Operator,
    #[serde(rename = "MANAGER")]
    Manager,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub department: String,
    pub role: Role,
    /// Short role-level code shown next to the name (CS, SALES, OP, MGR).
    pub level: String,
    #[serde(rename = "createdAt", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.name, self.department)
    }
}

impl Entity for User {
    const KIND: &'static str = "users";
    const ID_PREFIX: &'static str = "USR";
    const MAX_RETAINED: usize = 200;
    const ORDERING: OrderPolicy = OrderPolicy::Insertion;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn stamp_created(&mut self, at: DateTime<Utc>) {
        self.created_at = at;
        self.updated_at = at;
    }

    fn stamp_updated(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    fn label(&self) -> String {
        self.name.clone()
    }

    fn seed() -> Vec<Self> {
        [
            ("CS001", "Amy Zhang", "Customer Service Center", Role::CustomerService, "CS"),
            ("CS002", "Lily Li", "Customer Service Center", Role::CustomerService, "CS"),
            ("SALES001", "Frank Wang", "Sales", Role::Sales, "SALES"),
            ("OP001", "Mark Ma", "Air Ops", Role::Operator, "OP"),
            ("OP002", "Fang Lin", "Ocean Ops", Role::Operator, "OP"),
            ("OP008", "Grace Gao", "West Region Ops", Role::Operator, "OP"),
            ("MGR001", "Victor Liu", "Management", Role::Manager, "MGR"),
        ]
        .into_iter()
        .map(|(id, name, department, role, level)| {
            let now = Utc::now();
            User {
                id: id.to_string(),
                name: name.to_string(),
                department: department.to_string(),
                role,
                level: level.to_string(),
                created_at: now,
                updated_at: now,
            }
        })
        .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_seed_roster_has_unique_ids() {
        let seeds = User::seed();
        assert_eq!(seeds.len(), 7);

        let ids: HashSet<&str> = seeds.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids.len(), seeds.len());
    }

    #[test]
    fn test_role_wire_format() {
        let seeds = User::seed();
        let value = serde_json::to_value(&seeds[0]).expect("serialize");
        assert_eq!(value["role"], "CUSTOMER_SERVICE");

        let parsed: User = serde_json::from_value(value).expect("parse");
        assert_eq!(parsed.role, Role::CustomerService);
    }

    #[test]
    fn test_display_name_includes_department() {
        let user = &User::seed()[3];
        assert_eq!(user.display_name(), "Mark Ma (Air Ops)");
    }
}
