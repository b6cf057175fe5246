//! Approval rule table and requirement resolution.
//!
//! The table maps a typed (privilege type, practitioner type, same-specialty)
//! key to the approval requirement for that configuration. Absence of a row
//! is a configuration gap recovered with the most restrictive requirement.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalRequirement;
use crate::domain::practitioner::{PractitionerType, Specialty};
use crate::domain::request::{Privilege, PrivilegeType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleKey {
    pub privilege_type: PrivilegeType,
    pub practitioner_type: PractitionerType,
    pub same_specialty: bool,
}

/// One configured rule, as it appears under `[[rules]]` in granta.toml.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub privilege_type: PrivilegeType,
    pub practitioner_type: PractitionerType,
    pub same_specialty: bool,
    pub required_consultants: u32,
    pub requires_committee_review: bool,
    pub requires_director_approval: bool,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, Default)]
pub struct RuleTable {
    rules: HashMap<RuleKey, ApprovalRequirement>,
}

impl RuleTable {
    /// Later entries for the same key replace earlier ones, keeping the
    /// one-requirement-per-key invariant.
    pub fn from_entries(entries: Vec<RuleEntry>) -> Self {
        let rules = entries
            .into_iter()
            .map(|entry| {
                let key = RuleKey {
                    privilege_type: entry.privilege_type,
                    practitioner_type: entry.practitioner_type,
                    same_specialty: entry.same_specialty,
                };
                let requirement = ApprovalRequirement {
                    required_consultants: entry.required_consultants,
                    requires_committee_review: entry.requires_committee_review,
                    requires_director_approval: entry.requires_director_approval,
                    auto_approve: entry.auto_approve,
                    description: entry.description,
                };
                (key, requirement)
            })
            .collect();
        Self { rules }
    }

    pub fn lookup(&self, key: &RuleKey) -> Option<&ApprovalRequirement> {
        self.rules.get(key)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// The requirement resolved for a request, with how it was arrived at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedRequirement {
    pub requirement: ApprovalRequirement,
    pub same_specialty: bool,
    /// True when no rule matched and the most restrictive fallback applied.
    pub fell_back: bool,
}

#[derive(Clone, Debug, Default)]
pub struct RequirementResolver {
    table: RuleTable,
}

impl RequirementResolver {
    pub fn new(table: RuleTable) -> Self {
        Self { table }
    }

    /// A privilege with no required specialty always matches. A
    /// specialty-bearing privilege matches only an applicant whose primary
    /// or additional specialties cover it. The request is same-specialty
    /// only when every requested privilege matches.
    pub fn same_specialty(
        privileges: &[Privilege],
        primary: Option<&Specialty>,
        additional: &[Specialty],
    ) -> bool {
        privileges.iter().all(|privilege| match &privilege.required_specialty {
            None => true,
            Some(required) => {
                primary == Some(required) || additional.contains(required)
            }
        })
    }

    pub fn resolve(
        &self,
        practitioner_type: PractitionerType,
        privilege_type: PrivilegeType,
        privileges: &[Privilege],
        primary: Option<&Specialty>,
        additional: &[Specialty],
    ) -> ResolvedRequirement {
        let same_specialty = Self::same_specialty(privileges, primary, additional);
        self.resolve_key(RuleKey { privilege_type, practitioner_type, same_specialty })
    }

    /// Resolve for an already-classified key. Absence never under-requires:
    /// the fallback demands the full approval chain.
    pub fn resolve_key(&self, key: RuleKey) -> ResolvedRequirement {
        match self.table.lookup(&key) {
            Some(requirement) => ResolvedRequirement {
                requirement: requirement.clone(),
                same_specialty: key.same_specialty,
                fell_back: false,
            },
            None => {
                tracing::warn!(
                    privilege_type = ?key.privilege_type,
                    practitioner_type = ?key.practitioner_type,
                    same_specialty = key.same_specialty,
                    "no approval rule configured, applying most restrictive fallback"
                );
                ResolvedRequirement {
                    requirement: ApprovalRequirement::most_restrictive(),
                    same_specialty: key.same_specialty,
                    fell_back: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RequirementResolver, RuleEntry, RuleKey, RuleTable};
    use crate::domain::approval::ApprovalRequirement;
    use crate::domain::practitioner::{PractitionerType, Specialty};
    use crate::domain::request::{Privilege, PrivilegeType};

    fn privilege(required_specialty: Option<&str>) -> Privilege {
        Privilege {
            id: "priv-1".to_string(),
            name: "Endoscopy".to_string(),
            category: PrivilegeType::NonCore,
            required_specialty: required_specialty.map(|s| Specialty(s.to_string())),
        }
    }

    fn resolver() -> RequirementResolver {
        RequirementResolver::new(RuleTable::from_entries(vec![RuleEntry {
            privilege_type: PrivilegeType::NonCore,
            practitioner_type: PractitionerType::Consultant,
            same_specialty: true,
            required_consultants: 1,
            requires_committee_review: false,
            requires_director_approval: true,
            auto_approve: false,
            description: "same-specialty consultant, non-core".to_string(),
        }]))
    }

    #[test]
    fn privilege_without_required_specialty_is_always_same_specialty() {
        assert!(RequirementResolver::same_specialty(&[privilege(None)], None, &[]));
    }

    #[test]
    fn specialty_matches_primary_or_additional() {
        let gastro = Specialty("gastroenterology".to_string());
        let cardio = Specialty("cardiology".to_string());

        assert!(RequirementResolver::same_specialty(
            &[privilege(Some("gastroenterology"))],
            Some(&gastro),
            &[],
        ));
        assert!(RequirementResolver::same_specialty(
            &[privilege(Some("gastroenterology"))],
            Some(&cardio),
            &[gastro.clone()],
        ));
        assert!(!RequirementResolver::same_specialty(
            &[privilege(Some("gastroenterology"))],
            Some(&cardio),
            &[],
        ));
    }

    #[test]
    fn applicant_without_specialty_never_matches_specialty_bearing_privilege() {
        assert!(!RequirementResolver::same_specialty(
            &[privilege(Some("gastroenterology"))],
            None,
            &[],
        ));
    }

    #[test]
    fn any_mismatch_makes_the_whole_request_different_specialty() {
        let gastro = Specialty("gastroenterology".to_string());
        let privileges = [privilege(None), privilege(Some("cardiology"))];
        assert!(!RequirementResolver::same_specialty(&privileges, Some(&gastro), &[]));
    }

    #[test]
    fn matching_rule_is_returned_without_fallback() {
        let resolved = resolver().resolve(
            PractitionerType::Consultant,
            PrivilegeType::NonCore,
            &[privilege(Some("gastroenterology"))],
            Some(&Specialty("gastroenterology".to_string())),
            &[],
        );

        assert!(!resolved.fell_back);
        assert!(resolved.same_specialty);
        assert_eq!(resolved.requirement.required_consultants, 1);
        assert!(!resolved.requirement.requires_committee_review);
        assert!(resolved.requirement.requires_director_approval);
    }

    #[test]
    fn absent_keys_resolve_to_most_restrictive_fallback() {
        let resolver = resolver();
        for privilege_type in
            [PrivilegeType::Core, PrivilegeType::NonCore, PrivilegeType::Extra]
        {
            for practitioner_type in
                [PractitionerType::GeneralPractitioner, PractitionerType::Consultant]
            {
                for same_specialty in [true, false] {
                    let key = RuleKey { privilege_type, practitioner_type, same_specialty };
                    if resolver.table.lookup(&key).is_some() {
                        continue;
                    }
                    let resolved = resolver.resolve_key(key);
                    assert!(resolved.fell_back);
                    assert_eq!(
                        resolved.requirement,
                        ApprovalRequirement::most_restrictive()
                    );
                    assert_eq!(resolved.requirement.required_consultants, 2);
                    assert!(resolved.requirement.requires_committee_review);
                    assert!(resolved.requirement.requires_director_approval);
                    assert!(!resolved.requirement.auto_approve);
                }
            }
        }
    }

    #[test]
    fn non_core_different_specialty_without_rule_requires_full_chain() {
        let resolved = resolver().resolve(
            PractitionerType::GeneralPractitioner,
            PrivilegeType::NonCore,
            &[privilege(Some("gastroenterology"))],
            None,
            &[],
        );

        assert!(resolved.fell_back);
        assert!(!resolved.same_specialty);
        assert_eq!(resolved.requirement, ApprovalRequirement::most_restrictive());
    }

    #[test]
    fn later_entries_replace_earlier_ones_for_the_same_key() {
        let entry = |count: u32| RuleEntry {
            privilege_type: PrivilegeType::Core,
            practitioner_type: PractitionerType::GeneralPractitioner,
            same_specialty: true,
            required_consultants: count,
            requires_committee_review: false,
            requires_director_approval: false,
            auto_approve: false,
            description: String::new(),
        };
        let table = RuleTable::from_entries(vec![entry(3), entry(1)]);

        assert_eq!(table.len(), 1);
        let key = RuleKey {
            privilege_type: PrivilegeType::Core,
            practitioner_type: PractitionerType::GeneralPractitioner,
            same_specialty: true,
        };
        assert_eq!(table.lookup(&key).map(|r| r.required_consultants), Some(1));
    }

    #[test]
    fn keys_differing_only_in_practitioner_type_index_separate_rows() {
        let entry = |practitioner_type, count: u32| RuleEntry {
            privilege_type: PrivilegeType::NonCore,
            practitioner_type,
            same_specialty: false,
            required_consultants: count,
            requires_committee_review: true,
            requires_director_approval: true,
            auto_approve: false,
            description: String::new(),
        };
        let table = RuleTable::from_entries(vec![
            entry(PractitionerType::Consultant, 1),
            entry(PractitionerType::GeneralPractitioner, 2),
        ]);

        assert_eq!(table.len(), 2);
        let key = |practitioner_type| RuleKey {
            privilege_type: PrivilegeType::NonCore,
            practitioner_type,
            same_specialty: false,
        };
        assert_eq!(
            table.lookup(&key(PractitionerType::Consultant)).map(|r| r.required_consultants),
            Some(1)
        );
        assert_eq!(
            table
                .lookup(&key(PractitionerType::GeneralPractitioner))
                .map(|r| r.required_consultants),
            Some(2)
        );
    }
}
