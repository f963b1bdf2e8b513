//! Internal commission protocols.
//!
//! A protocol binds a service code and business type to commission rates
//! for the departments it applies to. The dispatch page asks for the
//! protocols matching an operator's department and the service being
//! assigned; recommended protocols sort first, then higher total rate.
//!
//! Collection contract: insertion order, ids `PROTOxxx`, capped at 500,
//! active/inactive status toggle.

use std::cmp::Ordering;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, OrderPolicy, StatusToggle};
use crate::manager::EntityCacheManager;

/// Wildcard service/business code: the protocol applies to any service.
pub const SERVICE_ALL: &str = "ALL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "INACTIVE")]
    Inactive,
}

impl std::fmt::Display for ProtocolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolStatus::Active => write!(f, "Active"),
            ProtocolStatus::Inactive => write!(f, "Inactive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    #[serde(rename = "protocolId", default)]
    pub id: String,
    #[serde(rename = "protocolName")]
    pub name: String,
    #[serde(rename = "serviceCode", default = "wildcard")]
    pub service_code: String,
    #[serde(rename = "businessType", default = "wildcard")]
    pub business_type: String,
    #[serde(rename = "baseCommissionRate", default)]
    pub base_commission_rate: f64,
    #[serde(rename = "bonusCommissionRate", default)]
    pub bonus_commission_rate: f64,
    #[serde(rename = "totalCommissionRate", default)]
    pub total_commission_rate: f64,
    #[serde(rename = "applicableDepartments", default)]
    pub applicable_departments: Vec<String>,
    #[serde(rename = "slaHours", default)]
    pub sla_hours: u32,
    #[serde(default)]
    pub recommended: bool,
    #[serde(default = "default_status")]
    pub status: ProtocolStatus,
    #[serde(rename = "effectiveDate")]
    pub effective_date: NaiveDate,
    #[serde(rename = "expiryDate")]
    pub expiry_date: NaiveDate,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "createdAt", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn wildcard() -> String {
    SERVICE_ALL.to_string()
}

fn default_status() -> ProtocolStatus {
    ProtocolStatus::Active
}

impl Protocol {
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        self.effective_date <= date && date <= self.expiry_date
    }

    pub fn is_effective(&self) -> bool {
        self.is_effective_on(Utc::now().date_naive())
    }

    /// Matching rule used by dispatch: active, within its effective window,
    /// applicable to the operator's department, and covering the service
    /// (exactly or via the `ALL` wildcard).
    pub fn matches(&self, department: &str, service_code: &str) -> bool {
        self.matches_on(department, service_code, Utc::now().date_naive())
    }

    pub fn matches_on(&self, department: &str, service_code: &str, date: NaiveDate) -> bool {
        self.status == ProtocolStatus::Active
            && self.is_effective_on(date)
            && self.applicable_departments.iter().any(|d| d == department)
            && (self.service_code == service_code || self.service_code == SERVICE_ALL)
    }

    /// Ordering for match results: recommended protocols first, then higher
    /// total commission rate.
    pub fn match_compare(a: &Protocol, b: &Protocol) -> Ordering {
        b.recommended.cmp(&a.recommended).then_with(|| {
            b.total_commission_rate
                .partial_cmp(&a.total_commission_rate)
                .unwrap_or(Ordering::Equal)
        })
    }
}

/// Protocols matching an operator department and service code, best first.
pub fn matching_protocols(
    manager: &EntityCacheManager<Protocol>,
    department: &str,
    service_code: &str,
) -> Vec<Protocol> {
    manager.query(
        |p| p.matches(department, service_code),
        Protocol::match_compare,
    )
}

impl Entity for Protocol {
    const KIND: &'static str = "protocols";
    const ID_PREFIX: &'static str = "PROTO";
    const MAX_RETAINED: usize = 500;
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
        let ocean = &["Ocean Ops"][..];
        let air = &["Air Ops"][..];
        let all = &["Ocean Ops", "Air Ops", "West Region Ops"][..];

        vec![
            seed_protocol(
                "PROTO001",
                "Ocean MBL Processing Standard",
                "MBL_PROCESSING",
                "OCEAN",
                15.0,
                5.0,
                ocean,
                48,
                true,
                "Standard protocol for ocean master bill processing, covering full business terms and commission rules.",
            ),
            seed_protocol(
                "PROTO002",
                "Ocean HBL Processing",
                "HBL_PROCESSING",
                "OCEAN",
                12.0,
                4.0,
                ocean,
                24,
                true,
                "Dedicated protocol for house bill handling: cargo sorting, labeling, and delivery confirmation.",
            ),
            seed_protocol(
                "PROTO003",
                "Ocean Booking Service",
                "BOOKING",
                "OCEAN",
                10.0,
                3.0,
                ocean,
                12,
                true,
                "Ocean booking protocol covering slot reservation, sailing confirmation, and manifest management.",
            ),
            seed_protocol(
                "PROTO004",
                "Container Loading Operations",
                "CONTAINER_LOADING",
                "OCEAN",
                8.0,
                2.0,
                ocean,
                6,
                true,
                "Container stuffing protocol: loading, seal management, and packing-list confirmation.",
            ),
            seed_protocol(
                "PROTO005",
                "Air Freight Operations",
                "AWB_PROCESSING",
                "AIR",
                18.0,
                7.0,
                air,
                24,
                true,
                "Air-freight protocol with tight SLAs and the highest commission rates.",
            ),
            seed_protocol(
                "PROTO006",
                "Customs Clearance Standard",
                "CUSTOMS_CLEARANCE",
                SERVICE_ALL,
                14.0,
                4.0,
                all,
                48,
                true,
                "Standard customs protocol for import/export declarations, document preparation, and clearance tracking.",
            ),
            seed_protocol(
                "PROTO007",
                "General Transportation Service",
                "TRANSPORTATION",
                SERVICE_ALL,
                10.0,
                3.0,
                all,
                24,
                true,
                "General transportation protocol for delivery and tracking across transport modes.",
            ),
            seed_protocol(
                "PROTO008",
                "General Cargo Loading",
                "CARGO_LOADING",
                SERVICE_ALL,
                8.0,
                2.0,
                all,
                8,
                false,
                "General loading protocol for cargo handling across departments.",
            ),
            seed_protocol(
                "PROTO009",
                "General Freight Forwarding",
                SERVICE_ALL,
                SERVICE_ALL,
                12.0,
                3.0,
                all,
                72,
                false,
                "Catch-all forwarding protocol; flexible but lower-rate, intended as the fallback choice.",
            ),
        ]
    }
}

impl StatusToggle for Protocol {
    fn flip_status(&mut self) -> bool {
        self.status = match self.status {
            ProtocolStatus::Active => ProtocolStatus::Inactive,
            ProtocolStatus::Inactive => ProtocolStatus::Active,
        };
        self.status == ProtocolStatus::Active
    }
}

#[allow(clippy::too_many_arguments)]
fn seed_protocol(
    id: &str,
    name: &str,
    service_code: &str,
    business_type: &str,
    base: f64,
    bonus: f64,
    departments: &[&str],
    sla_hours: u32,
    recommended: bool,
    description: &str,
) -> Protocol {
    let now = Utc::now();
    let year = now.year();
    // Seed protocols stay inside their window for the current and next year
    let effective = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or_default();
    let expiry = NaiveDate::from_ymd_opt(year + 1, 12, 31).unwrap_or_default();

    Protocol {
        id: id.to_string(),
        name: name.to_string(),
        service_code: service_code.to_string(),
        business_type: business_type.to_string(),
        base_commission_rate: base,
        bonus_commission_rate: bonus,
        total_commission_rate: base + bonus,
        applicable_departments: departments.iter().map(|d| d.to_string()).collect(),
        sla_hours,
        recommended,
        status: ProtocolStatus::Active,
        effective_date: effective,
        expiry_date: expiry,
        description: description.to_string(),
        created_at: now,
        updated_at: now,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ChangeBus;
    use crate::store::FileStore;
    use std::collections::HashSet;

    fn sample(dept: &str, service: &str, recommended: bool, rate: f64) -> Protocol {
        let mut protocol = seed_protocol(
            "PROTO001",
            "sample",
            service,
            "OCEAN",
            rate,
            0.0,
            &[dept],
            24,
            recommended,
            "",
        );
        protocol.total_commission_rate = rate;
        protocol
    }

    #[test]
    fn test_effective_window_is_inclusive() {
        let protocol = sample("Ocean Ops", "BOOKING", true, 10.0);
        assert!(protocol.is_effective_on(protocol.effective_date));
        assert!(protocol.is_effective_on(protocol.expiry_date));
        assert!(!protocol.is_effective_on(
            protocol.effective_date.pred_opt().unwrap_or(protocol.effective_date)
        ));
    }

    #[test]
    fn test_matches_requires_department_and_service() {
        let protocol = sample("Ocean Ops", "BOOKING", true, 10.0);
        assert!(protocol.matches("Ocean Ops", "BOOKING"));
        assert!(!protocol.matches("Air Ops", "BOOKING"));
        assert!(!protocol.matches("Ocean Ops", "CUSTOMS_CLEARANCE"));
    }

    #[test]
    fn test_wildcard_service_matches_anything() {
        let protocol = sample("Ocean Ops", SERVICE_ALL, false, 10.0);
        assert!(protocol.matches("Ocean Ops", "BOOKING"));
        assert!(protocol.matches("Ocean Ops", "CUSTOMS_CLEARANCE"));
    }

    #[test]
    fn test_inactive_protocol_never_matches() {
        let mut protocol = sample("Ocean Ops", "BOOKING", true, 10.0);
        protocol.status = ProtocolStatus::Inactive;
        assert!(!protocol.matches("Ocean Ops", "BOOKING"));
    }

    #[test]
    fn test_recommended_sorts_before_higher_rate() {
        let recommended = sample("A", "S", true, 10.0);
        let better_paid = sample("A", "S", false, 20.0);

        let mut matched = vec![better_paid.clone(), recommended.clone()];
        matched.sort_by(Protocol::match_compare);

        assert!(matched[0].recommended);
        assert_eq!(matched[0].total_commission_rate, 10.0);
        assert_eq!(matched[1].total_commission_rate, 20.0);
    }

    #[tokio::test]
    async fn test_matching_protocols_via_manager() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = EntityCacheManager::<Protocol>::new(
            FileStore::new(dir.path()).expect("store"),
            ChangeBus::new(),
        );
        manager.load().await; // offline: seeds

        let matched = matching_protocols(&manager, "Air Ops", "AWB_PROCESSING");
        assert!(!matched.is_empty());
        // The dedicated air protocol outranks the generic fallbacks
        assert_eq!(matched[0].id, "PROTO005");
        assert!(matched
            .windows(2)
            .all(|w| Protocol::match_compare(&w[0], &w[1]) != Ordering::Greater));
    }

    #[test]
    fn test_seed_ids_are_unique_and_effective() {
        let seeds = Protocol::seed();
        assert_eq!(seeds.len(), 9);

        let ids: HashSet<&str> = seeds.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids.len(), seeds.len());
        assert!(seeds.iter().all(|p| p.is_effective()));
        assert!(seeds
            .iter()
            .all(|p| p.total_commission_rate == p.base_commission_rate + p.bonus_commission_rate));
    }

    #[test]
    fn test_status_toggle_round_trip() {
        let mut protocol = sample("Ocean Ops", "BOOKING", true, 10.0);
        assert!(!protocol.flip_status());
        assert_eq!(protocol.status, ProtocolStatus::Inactive);
        assert!(protocol.flip_status());
        assert_eq!(protocol.status, ProtocolStatus::Active);
    }

    #[test]
    fn test_wire_format_uses_camel_case() {
        let protocol = sample("Ocean Ops", "BOOKING", true, 10.0);
        let value = serde_json::to_value(&protocol).expect("serialize");
        assert!(value.get("protocolId").is_some());
        assert!(value.get("baseCommissionRate").is_some());
        assert!(value.get("applicableDepartments").is_some());
        assert_eq!(value["status"], "ACTIVE");
    }
}
