//! # QuietHours Repository

use chrono::Utc;
use chrono_tz::Tz;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, IntoActiveModel, Set};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::quiet_hours::{
    ActiveModel as QuietHoursActiveModel, Entity as QuietHours, Model as QuietHoursModel,
};
use crate::pipeline::quiet_hours::parse_time_of_day;

/// Request data for setting a tenant's quiet hours
#[derive(Debug, Clone)]
pub struct UpsertQuietHoursRequest {
    pub start_time: String,
    pub end_time: String,
    /// Defaults to `UTC`
    pub timezone: Option<String>,
    pub quiet_weekends: Option<bool>,
}

pub struct QuietHoursRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> QuietHoursRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn get_quiet_hours_config(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<QuietHoursModel>, RepositoryError> {
        QuietHours::find_by_id(tenant_id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Creates or replaces the tenant's configuration.
    pub async fn upsert_quiet_hours_config(
        &self,
        tenant_id: Uuid,
        request: UpsertQuietHoursRequest,
    ) -> Result<QuietHoursModel, RepositoryError> {
        let start = parse_time_of_day(&request.start_time).ok_or_else(|| {
            RepositoryError::validation_error("start_time must be HH:MM")
        })?;
        let end = parse_time_of_day(&request.end_time)
            .ok_or_else(|| RepositoryError::validation_error("end_time must be HH:MM"))?;

        let timezone = request.timezone.unwrap_or_else(|| "UTC".to_string());
        if timezone.parse::<Tz>().is_err() {
            return Err(RepositoryError::validation_error(format!(
                "Unknown timezone '{timezone}'"
            )));
        }

        let now = Utc::now().fixed_offset();
        let start_time = start.format("%H:%M").to_string();
        let end_time = end.format("%H:%M").to_string();

        match self.get_quiet_hours_config(tenant_id).await? {
            Some(existing) => {
                let quiet_weekends = request.quiet_weekends.unwrap_or(existing.quiet_weekends);
                let mut active = existing.into_active_model();
                active.start_time = Set(start_time);
                active.end_time = Set(end_time);
                active.timezone = Set(timezone);
                active.quiet_weekends = Set(quiet_weekends);
                active.updated_at = Set(now);
                active
                    .update(self.db)
                    .await
                    .map_err(RepositoryError::database_error)
            }
            None => QuietHoursActiveModel {
                tenant_id: Set(tenant_id),
                start_time: Set(start_time),
                end_time: Set(end_time),
                timezone: Set(timezone),
                quiet_weekends: Set(request.quiet_weekends.unwrap_or(false)),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(self.db)
            .await
            .map_err(RepositoryError::database_error),
        }
    }

    /// Returns false when the tenant had no configuration.
    pub async fn delete_quiet_hours_config(&self, tenant_id: Uuid) -> Result<bool, RepositoryError> {
        let result = QuietHours::delete_by_id(tenant_id)
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::repositories::tenant::{CreateTenantRequest, TenantRepository};

    fn request(start: &str, end: &str, tz: Option<&str>) -> UpsertQuietHoursRequest {
        UpsertQuietHoursRequest {
            start_time: start.to_string(),
            end_time: end.to_string(),
            timezone: tz.map(str::to_string),
            quiet_weekends: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_delete() {
        let db = connect_in_memory().await.unwrap();
        let tenant = TenantRepository::new(&db)
            .create_tenant(CreateTenantRequest::default())
            .await
            .unwrap();
        let repo = QuietHoursRepository::new(&db);

        assert!(repo.get_quiet_hours_config(tenant.id).await.unwrap().is_none());

        let created = repo
            .upsert_quiet_hours_config(tenant.id, request("22:00", "6:00", None))
            .await
            .unwrap();
        assert_eq!(created.end_time, "06:00");
        assert_eq!(created.timezone, "UTC");

        let updated = repo
            .upsert_quiet_hours_config(tenant.id, request("21:30", "07:00", Some("Europe/Berlin")))
            .await
            .unwrap();
        assert_eq!(updated.start_time, "21:30");
        assert_eq!(updated.timezone, "Europe/Berlin");

        assert!(repo.delete_quiet_hours_config(tenant.id).await.unwrap());
        assert!(!repo.delete_quiet_hours_config(tenant.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let db = connect_in_memory().await.unwrap();
        let repo = QuietHoursRepository::new(&db);
        let tenant_id = Uuid::new_v4();

        assert!(repo
            .upsert_quiet_hours_config(tenant_id, request("late", "06:00", None))
            .await
            .is_err());
        assert!(repo
            .upsert_quiet_hours_config(tenant_id, request("22:00", "06:00", Some("Nowhere/Town")))
            .await
            .is_err());
    }
}
