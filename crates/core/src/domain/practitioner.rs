use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Specialty(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PractitionerType {
    GeneralPractitioner,
    Consultant,
}

/// A directory entry for a member of staff. Immutable input to requirement
/// resolution and approver enumeration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Practitioner {
    pub id: UserId,
    pub display_name: String,
    pub practitioner_type: PractitionerType,
    pub primary_specialty: Option<Specialty>,
    pub additional_specialties: Vec<Specialty>,
    /// General approval capability; without it a user may never act.
    pub can_approve: bool,
    pub committee_member: bool,
    pub medical_director: bool,
    pub manager_id: Option<UserId>,
}

impl Practitioner {
    pub fn is_consultant(&self) -> bool {
        self.practitioner_type == PractitionerType::Consultant
    }

    /// Whether this practitioner's declared specialty set covers `specialty`.
    pub fn has_specialty(&self, specialty: &Specialty) -> bool {
        self.primary_specialty.as_ref() == Some(specialty)
            || self.additional_specialties.contains(specialty)
    }
}
