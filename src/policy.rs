use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Faculty,
    Registrar,
    Student,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "faculty" => Some(Role::Faculty),
            "registrar" => Some(Role::Registrar),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ManageTerms,
    ManageCurriculum,
    ManageOfferings,
    ApproveStudents,
    UploadGrades,
    EnterGrades,
    ViewAnyGrades,
    ViewOwnGrades,
    AllowLegacyGrade,
    ManageSchedule,
    ManageAnnouncements,
    ManageBackups,
}

/// The one place role/action pairs are decided. Handlers never compare role
/// strings inline.
pub fn can(role: Role, action: Action) -> bool {
    use Action::*;
    use Role::*;
    match action {
        ManageTerms | ApproveStudents | AllowLegacyGrade => {
            matches!(role, Admin | Registrar)
        }
        ManageCurriculum | ManageOfferings | UploadGrades | EnterGrades | ViewAnyGrades => {
            matches!(role, Admin | Faculty | Registrar)
        }
        ViewOwnGrades => matches!(role, Student),
        ManageSchedule | ManageBackups => matches!(role, Admin),
        ManageAnnouncements => matches!(role, Admin | Registrar),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roles() {
        assert_eq!(Role::parse(" Admin "), Some(Role::Admin));
        assert_eq!(Role::parse("REGISTRAR"), Some(Role::Registrar));
        assert_eq!(Role::parse("dean"), None);
    }

    #[test]
    fn students_only_see_their_own_grades() {
        assert!(can(Role::Student, Action::ViewOwnGrades));
        assert!(!can(Role::Student, Action::ViewAnyGrades));
        assert!(!can(Role::Student, Action::EnterGrades));
        assert!(!can(Role::Student, Action::UploadGrades));
        assert!(!can(Role::Admin, Action::ViewOwnGrades));
    }

    #[test]
    fn schedule_and_backup_writes_are_admin_only() {
        assert!(can(Role::Admin, Action::ManageSchedule));
        assert!(!can(Role::Registrar, Action::ManageSchedule));
        assert!(!can(Role::Faculty, Action::ManageSchedule));
        assert!(can(Role::Admin, Action::ManageBackups));
        assert!(!can(Role::Registrar, Action::ManageBackups));
    }

    #[test]
    fn legacy_override_excludes_faculty() {
        assert!(can(Role::Admin, Action::AllowLegacyGrade));
        assert!(can(Role::Registrar, Action::AllowLegacyGrade));
        assert!(!can(Role::Faculty, Action::AllowLegacyGrade));
    }
}
