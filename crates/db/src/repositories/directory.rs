use async_trait::async_trait;
use sqlx::Row;

use granta_core::domain::practitioner::{
    Practitioner, PractitionerType, Specialty, UserId,
};
use granta_core::errors::StoreError;
use granta_core::ports::Directory;

use super::{backend, decode};
use crate::DbPool;

pub struct SqlDirectory {
    pool: DbPool,
}

impl SqlDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or replace a directory entry. Directory data is synced from
    /// the portal's staff records.
    pub async fn save(&self, practitioner: &Practitioner) -> Result<(), StoreError> {
        let additional = serde_json::to_string(
            &practitioner
                .additional_specialties
                .iter()
                .map(|s| s.0.as_str())
                .collect::<Vec<_>>(),
        )
        .map_err(|err| decode(format!("could not encode specialties: {err}")))?;

        sqlx::query(
            "INSERT INTO practitioner (id, display_name, practitioner_type, primary_specialty,
                                       additional_specialties, can_approve, committee_member,
                                       medical_director, manager_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 practitioner_type = excluded.practitioner_type,
                 primary_specialty = excluded.primary_specialty,
                 additional_specialties = excluded.additional_specialties,
                 can_approve = excluded.can_approve,
                 committee_member = excluded.committee_member,
                 medical_director = excluded.medical_director,
                 manager_id = excluded.manager_id",
        )
        .bind(&practitioner.id.0)
        .bind(&practitioner.display_name)
        .bind(practitioner_type_as_str(practitioner.practitioner_type))
        .bind(practitioner.primary_specialty.as_ref().map(|s| s.0.as_str()))
        .bind(additional)
        .bind(practitioner.can_approve)
        .bind(practitioner.committee_member)
        .bind(practitioner.medical_director)
        .bind(practitioner.manager_id.as_ref().map(|id| id.0.as_str()))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

fn parse_practitioner_type(raw: &str) -> Result<PractitionerType, StoreError> {
    match raw {
        "general_practitioner" => Ok(PractitionerType::GeneralPractitioner),
        "consultant" => Ok(PractitionerType::Consultant),
        other => Err(decode(format!("unknown practitioner type `{other}`"))),
    }
}

pub(crate) fn practitioner_type_as_str(practitioner_type: PractitionerType) -> &'static str {
    match practitioner_type {
        PractitionerType::GeneralPractitioner => "general_practitioner",
        PractitionerType::Consultant => "consultant",
    }
}

pub(crate) fn row_to_practitioner(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<Practitioner, StoreError> {
    let id: String = row.try_get("id").map_err(|e| decode(e.to_string()))?;
    let display_name: String =
        row.try_get("display_name").map_err(|e| decode(e.to_string()))?;
    let practitioner_type: String =
        row.try_get("practitioner_type").map_err(|e| decode(e.to_string()))?;
    let primary_specialty: Option<String> =
        row.try_get("primary_specialty").map_err(|e| decode(e.to_string()))?;
    let additional_raw: String =
        row.try_get("additional_specialties").map_err(|e| decode(e.to_string()))?;
    let can_approve: bool =
        row.try_get("can_approve").map_err(|e| decode(e.to_string()))?;
    let committee_member: bool =
        row.try_get("committee_member").map_err(|e| decode(e.to_string()))?;
    let medical_director: bool =
        row.try_get("medical_director").map_err(|e| decode(e.to_string()))?;
    let manager_id: Option<String> =
        row.try_get("manager_id").map_err(|e| decode(e.to_string()))?;

    let additional: Vec<String> = serde_json::from_str(&additional_raw)
        .map_err(|err| decode(format!("invalid specialty list: {err}")))?;

    Ok(Practitioner {
        id: UserId(id),
        display_name,
        practitioner_type: parse_practitioner_type(&practitioner_type)?,
        primary_specialty: primary_specialty.map(Specialty),
        additional_specialties: additional.into_iter().map(Specialty).collect(),
        can_approve,
        committee_member,
        medical_director,
        manager_id: manager_id.map(UserId),
    })
}

const SELECT_COLUMNS: &str = "SELECT id, display_name, practitioner_type, primary_specialty,
        additional_specialties, can_approve, committee_member, medical_director, manager_id
 FROM practitioner";

#[async_trait]
impl Directory for SqlDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<Practitioner>, StoreError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.as_ref().map(row_to_practitioner).transpose()
    }

    async fn consultants(
        &self,
        preferred_specialty: Option<&Specialty>,
    ) -> Result<Vec<Practitioner>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE practitioner_type = 'consultant' AND can_approve = 1
             ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut consultants =
            rows.iter().map(row_to_practitioner).collect::<Result<Vec<_>, _>>()?;
        // Specialty matching includes additional specialties, which live in a
        // JSON column, so the preference ordering happens here.
        if let Some(specialty) = preferred_specialty {
            consultants.sort_by_key(|p| !p.has_specialty(specialty));
        }
        Ok(consultants)
    }

    async fn committee_members(&self) -> Result<Vec<Practitioner>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE committee_member = 1 AND can_approve = 1 ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_practitioner).collect()
    }

    async fn medical_directors(&self) -> Result<Vec<Practitioner>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE medical_director = 1 AND can_approve = 1 ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_practitioner).collect()
    }

    async fn manager_of(&self, id: &UserId) -> Result<Option<Practitioner>, StoreError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE id = (SELECT manager_id FROM practitioner WHERE id = ?)"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(row_to_practitioner).transpose()
    }
}
