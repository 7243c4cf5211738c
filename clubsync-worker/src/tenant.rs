use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clubsync_sink::SinkClient;

use crate::error::WorkerError;

const CLUB_TYPE_ID: i64 = 5;

/// One subscribing organisation. Provisioned on first sight, reused on
/// restart; deactivated administratively rather than deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: i64,
    pub created: DateTime<Utc>,
    pub display_name: String,
    pub active: bool,
}

/// Queries the sink for active clubs (`organizations` where
/// `type_id = 5`), subtracts `exclude_tenants`, and merges in the
/// explicit `groups_as_clubs_mapping` entries (non-club organisations an
/// operator has opted to treat as clubs for sync purposes).
pub async fn discover_tenants(
    sink: &SinkClient,
    exclude_tenants: &[i64],
    groups_as_clubs_mapping: &std::collections::HashMap<i64, String>,
) -> Result<Vec<Tenant>, WorkerError> {
    #[derive(Deserialize)]
    struct OrgBody {
        #[serde(default)]
        type_id: Option<i64>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        created: Option<DateTime<Utc>>,
        #[serde(default)]
        active: Option<bool>,
    }

    let where_clause = serde_json::json!({ "type_id": CLUB_TYPE_ID, "active": true });
    let result = sink
        .list::<OrgBody>("organizations", Some(&where_clause), None, 100_000)
        .await?;

    let mut tenants: Vec<Tenant> = result
        .items
        .into_iter()
        .filter_map(|record| {
            let tenant_id: i64 = record.id.parse().ok()?;
            if exclude_tenants.contains(&tenant_id) {
                return None;
            }
            Some(Tenant {
                tenant_id,
                created: record.body.created.unwrap_or_else(Utc::now),
                display_name: record.body.name.unwrap_or_else(|| tenant_id.to_string()),
                active: record.body.active.unwrap_or(true),
            })
        })
        .collect();

    for (&tenant_id, display_name) in groups_as_clubs_mapping {
        if exclude_tenants.contains(&tenant_id) {
            continue;
        }
        if tenants.iter().any(|t| t.tenant_id == tenant_id) {
            continue;
        }
        tenants.push(Tenant {
            tenant_id,
            created: Utc::now(),
            display_name: display_name.clone(),
            active: true,
        });
    }

    Ok(tenants)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_serializes_round_trip() {
        let tenant = Tenant {
            tenant_id: 7,
            created: Utc::now(),
            display_name: "FC Example".to_string(),
            active: true,
        };
        let json = serde_json::to_string(&tenant).unwrap();
        let back: Tenant = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tenant_id, 7);
        assert_eq!(back.display_name, "FC Example");
    }
}
