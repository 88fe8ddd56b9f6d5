use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Present,
    Absent,
}

impl Status {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub roll_number: String,
    pub class_id: Option<String>,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub subject: Option<String>,
    /// The class this teacher is assigned to, if any.
    pub class_id: Option<String>,
}

impl Teacher {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    pub name: String,
    pub standard: String,
    pub teacher_id: Option<String>,
    /// Member student ids in assignment order.
    pub students: Vec<String>,
}

impl Class {
    /// Returns the reason this class cannot be deleted, if any.
    pub fn deletion_blocker(&self) -> Option<&'static str> {
        if self.teacher_id.is_some() {
            return Some("Cannot delete class with assigned teacher");
        }
        if !self.students.is_empty() {
            return Some("Cannot delete class with assigned students");
        }
        None
    }

    pub fn has_student(&self, student_id: &str) -> bool {
        self.students.iter().any(|s| s == student_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub class_id: String,
    /// `YYYY-MM-DD`
    pub date: String,
    pub attendance: BTreeMap<String, Status>,
    pub marked_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(teacher: Option<&str>, students: &[&str]) -> Class {
        Class {
            id: "c1".into(),
            name: "Class A".into(),
            standard: "5th Standard".into(),
            teacher_id: teacher.map(|t| t.to_string()),
            students: students.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn deletion_blocked_by_teacher_before_students() {
        assert_eq!(
            class(Some("t1"), &["s1"]).deletion_blocker(),
            Some("Cannot delete class with assigned teacher")
        );
        assert_eq!(
            class(None, &["s1"]).deletion_blocker(),
            Some("Cannot delete class with assigned students")
        );
        assert_eq!(class(None, &[]).deletion_blocker(), None);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Status::Present).unwrap(), "\"present\"");
        assert_eq!(Status::parse("absent"), Some(Status::Absent));
        assert_eq!(Status::parse("Present"), None);
    }
}
