// Append-only audit trail. Writes are best-effort: a failed audit insert is
// logged and never fails the surrounding request.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::audit_logs;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = audit_logs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AuditLog {
    pub id: Uuid,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = audit_logs)]
pub struct NewAuditLog {
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
}

impl NewAuditLog {
    pub fn new(action: &str, entity_type: &str) -> Self {
        Self {
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: None,
            user_id: None,
            details: None,
            ip_address: None,
        }
    }

    pub fn entity(mut self, id: Uuid) -> Self {
        self.entity_id = Some(id);
        self
    }

    pub fn user(mut self, id: Uuid) -> Self {
        self.user_id = Some(id);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn ip(mut self, ip: Option<String>) -> Self {
        self.ip_address = ip;
        self
    }
}

impl AuditLog {
    /// Best-effort append; errors are swallowed after logging
    pub async fn record(conn: &mut AsyncPgConnection, entry: NewAuditLog) {
        use crate::schema::audit_logs::dsl::*;

        if let Err(e) = diesel::insert_into(audit_logs)
            .values(&entry)
            .execute(conn)
            .await
        {
            tracing::warn!(action = %entry.action, "Failed to write audit log: {}", e);
        }
    }

    pub async fn list(
        conn: &mut AsyncPgConnection,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, diesel::result::Error> {
        use crate::schema::audit_logs::dsl::*;

        audit_logs
            .order(created_at.desc())
            .limit(limit)
            .offset(offset)
            .load::<AuditLog>(conn)
            .await
    }

    pub async fn count(conn: &mut AsyncPgConnection) -> Result<i64, diesel::result::Error> {
        use crate::schema::audit_logs::dsl::*;

        audit_logs.count().get_result(conn).await
    }
}
