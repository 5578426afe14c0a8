use super::model::{DataVisibility, LocationOfInterest, Role, Source, Survey, User};

/// Identity used by local/dev hosts where no session layer exists; it holds
/// the highest role on every survey.
pub const LOCAL_OWNER_ID: &str = "owner";

/// The caller's effective role on a survey, looked up by verified email.
pub fn role_of(user: &User, survey: &Survey) -> Option<Role> {
    if user.id == LOCAL_OWNER_ID {
        return Some(Role::Owner);
    }
    survey.acl.get(&user.email).copied()
}

pub fn can_export(user: &User, survey: &Survey) -> bool {
    role_of(user, survey).is_some()
}

pub fn can_import(user: &User, survey: &Survey) -> bool {
    matches!(role_of(user, survey), Some(role) if role >= Role::SurveyOrganizer)
}

/// Whether an LOI may leave the store for the given viewer.
///
/// Under owner-only visibility, imported LOIs are shared survey data and
/// stay visible to everyone; field-collected ones belong to their collector.
/// `owner_id` of `None` means the caller may see all records.
pub fn is_accessible_loi(
    survey: &Survey,
    loi: &LocationOfInterest,
    owner_id: Option<&str>,
) -> bool {
    match survey.data_visibility {
        DataVisibility::AllSurveyParticipants => true,
        DataVisibility::ContributorAndOrganizers => {
            if loi.source == Source::Imported {
                return true;
            }
            match owner_id {
                None => true,
                Some(owner_id) => loi.owner_id.as_deref() == Some(owner_id),
            }
        }
    }
}
