use crate::model::{AttendanceRecord, Class, Status, Student};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

pub const PRESENT_COLOR: &str = "#00ACC1";
pub const ABSENT_COLOR: &str = "#EF5350";

/// Which classes a caller may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Teacher(String),
}

/// `round(present / total * 100)`, 0 when there is nothing to count.
pub fn attendance_rate(present: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((present as f64 / total as f64) * 100.0).round() as u32
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub present: usize,
    pub absent: usize,
}

impl Tally {
    pub fn of(record: &AttendanceRecord) -> Self {
        let mut t = Tally::default();
        for status in record.attendance.values() {
            t.add(*status);
        }
        t
    }

    pub fn add(&mut self, status: Status) {
        match status {
            Status::Present => self.present += 1,
            Status::Absent => self.absent += 1,
        }
    }

    pub fn merge(&mut self, other: Tally) {
        self.present += other.present;
        self.absent += other.absent;
    }

    pub fn total(&self) -> usize {
        self.present + self.absent
    }

    pub fn rate(&self) -> u32 {
        attendance_rate(self.present, self.total())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PieSlice {
    pub name: &'static str,
    pub value: usize,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDay {
    pub class_id: String,
    pub name: String,
    pub present: usize,
    pub absent: usize,
    pub total: usize,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub date: String,
    pub total_students: usize,
    pub total_classes: usize,
    pub present_today: usize,
    pub absent_today: usize,
    pub total_today: usize,
    pub today_rate: u32,
    pub overall_attendance_rate: u32,
    pub today_pie_data: Vec<PieSlice>,
    pub class_wise_today: Vec<ClassDay>,
}

pub fn scoped_classes<'a>(scope: &Scope, classes: &'a [Class]) -> Vec<&'a Class> {
    match scope {
        Scope::All => classes.iter().collect(),
        Scope::Teacher(teacher_id) => classes
            .iter()
            .filter(|c| c.teacher_id.as_deref() == Some(teacher_id.as_str()))
            .collect(),
    }
}

fn scoped_student_count(scope: &Scope, in_scope: &[&Class], students: &[Student]) -> usize {
    match scope {
        Scope::All => students.len(),
        Scope::Teacher(_) => {
            let ids: HashSet<&str> = in_scope
                .iter()
                .flat_map(|c| c.students.iter().map(String::as_str))
                .collect();
            students.iter().filter(|s| ids.contains(s.id.as_str())).count()
        }
    }
}

pub fn dashboard(
    date: &str,
    scope: &Scope,
    classes: &[Class],
    students: &[Student],
    records: &[AttendanceRecord],
) -> DashboardStats {
    let in_scope = scoped_classes(scope, classes);
    let scope_ids: HashSet<&str> = in_scope.iter().map(|c| c.id.as_str()).collect();

    let todays: HashMap<&str, &AttendanceRecord> = records
        .iter()
        .filter(|r| r.date == date && scope_ids.contains(r.class_id.as_str()))
        .map(|r| (r.class_id.as_str(), r))
        .collect();

    let mut today = Tally::default();
    let mut class_wise_today = Vec::new();
    for class in &in_scope {
        let Some(record) = todays.get(class.id.as_str()) else {
            continue;
        };
        let t = Tally::of(record);
        today.merge(t);
        class_wise_today.push(ClassDay {
            class_id: class.id.clone(),
            name: class.name.clone(),
            present: t.present,
            absent: t.absent,
            total: t.total(),
            percentage: t.rate(),
        });
    }

    let mut overall = Tally::default();
    for record in records
        .iter()
        .filter(|r| scope_ids.contains(r.class_id.as_str()))
    {
        overall.merge(Tally::of(record));
    }

    DashboardStats {
        date: date.to_string(),
        total_students: scoped_student_count(scope, &in_scope, students),
        total_classes: in_scope.len(),
        present_today: today.present,
        absent_today: today.absent,
        total_today: today.total(),
        today_rate: today.rate(),
        overall_attendance_rate: overall.rate(),
        today_pie_data: vec![
            PieSlice {
                name: "Present",
                value: today.present,
                color: PRESENT_COLOR,
            },
            PieSlice {
                name: "Absent",
                value: today.absent,
                color: ABSENT_COLOR,
            },
        ],
        class_wise_today,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub student_id: String,
    pub class_id: Option<String>,
    pub class_name: Option<String>,
    pub total_days: usize,
    pub present_days: usize,
    pub absent_days: usize,
    pub attendance_rate: u32,
    /// date -> status for every record of the class that marks this student.
    pub days: BTreeMap<String, Status>,
}

/// Per-student summary over the first class that lists the student.
pub fn student_summary(
    student_id: &str,
    classes: &[Class],
    records: &[AttendanceRecord],
) -> StudentSummary {
    let class = classes.iter().find(|c| c.has_student(student_id));
    let mut days = BTreeMap::new();
    let mut tally = Tally::default();
    if let Some(class) = class {
        for record in records.iter().filter(|r| r.class_id == class.id) {
            if let Some(status) = record.attendance.get(student_id) {
                days.insert(record.date.clone(), *status);
                tally.add(*status);
            }
        }
    }
    StudentSummary {
        student_id: student_id.to_string(),
        class_id: class.map(|c| c.id.clone()),
        class_name: class.map(|c| c.name.clone()),
        total_days: tally.total(),
        present_days: tally.present,
        absent_days: tally.absent,
        attendance_rate: tally.rate(),
        days,
    }
}

pub const NO_TEACHER: &str = "No Teacher";

/// One row of the teacher dashboard's student table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub class_id: String,
    /// `"<name> - <standard>"`
    pub class_name: String,
    pub teacher_name: String,
    pub student_id: String,
    pub student_name: String,
    pub present: usize,
    pub absent: usize,
    pub total: usize,
    pub attendance_rate: u32,
}

/// Present/absent totals across every date for each student on an
/// in-scope roster, in class order then roster order. Roster ids with no
/// student row are skipped.
pub fn class_student_rows(
    scope: &Scope,
    classes: &[Class],
    students: &[Student],
    teacher_names: &HashMap<String, String>,
    records: &[AttendanceRecord],
) -> Vec<StudentRow> {
    let by_id: HashMap<&str, &Student> = students.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut rows = Vec::new();
    for class in scoped_classes(scope, classes) {
        let teacher_name = class
            .teacher_id
            .as_ref()
            .and_then(|t| teacher_names.get(t))
            .cloned()
            .unwrap_or_else(|| NO_TEACHER.to_string());
        let class_records: Vec<&AttendanceRecord> =
            records.iter().filter(|r| r.class_id == class.id).collect();

        for student_id in &class.students {
            let Some(student) = by_id.get(student_id.as_str()) else {
                continue;
            };
            let mut tally = Tally::default();
            for record in &class_records {
                if let Some(status) = record.attendance.get(student_id) {
                    tally.add(*status);
                }
            }
            rows.push(StudentRow {
                class_id: class.id.clone(),
                class_name: format!("{} - {}", class.name, class.standard),
                teacher_name: teacher_name.clone(),
                student_id: student.id.clone(),
                student_name: student.display_name(),
                present: tally.present,
                absent: tally.absent,
                total: tally.total(),
                attendance_rate: tally.rate(),
            });
        }
    }
    rows
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub date: String,
    pub day: u32,
    /// 0 = Sunday .. 6 = Saturday
    pub weekday: u32,
    pub status: Option<Status>,
}

pub fn month_calendar(
    year: i32,
    month: u32,
    days: &BTreeMap<String, Status>,
) -> Vec<CalendarDay> {
    let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
        return Vec::new();
    };
    first
        .iter_days()
        .take_while(|d| d.month() == month)
        .map(|d| {
            let date = d.format("%Y-%m-%d").to_string();
            CalendarDay {
                status: days.get(&date).copied(),
                day: d.day(),
                weekday: d.weekday().num_days_from_sunday(),
                date,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub date: String,
    pub present: usize,
    pub absent: usize,
    pub total: usize,
    pub rate: u32,
}

/// One point per calendar day in `from..=to`, summed over in-scope classes.
pub fn trend(
    scope: &Scope,
    classes: &[Class],
    records: &[AttendanceRecord],
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<TrendPoint> {
    let scope_ids: HashSet<&str> = scoped_classes(scope, classes)
        .into_iter()
        .map(|c| c.id.as_str())
        .collect();
    let mut by_date: HashMap<&str, Tally> = HashMap::new();
    for record in records
        .iter()
        .filter(|r| scope_ids.contains(r.class_id.as_str()))
    {
        by_date
            .entry(record.date.as_str())
            .or_default()
            .merge(Tally::of(record));
    }

    from.iter_days()
        .take_while(|d| *d <= to)
        .map(|d| {
            let date = d.format("%Y-%m-%d").to_string();
            let t = by_date.get(date.as_str()).copied().unwrap_or_default();
            TrendPoint {
                present: t.present,
                absent: t.absent,
                total: t.total(),
                rate: t.rate(),
                date,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(id: &str, name: &str, teacher: Option<&str>, students: &[&str]) -> Class {
        Class {
            id: id.into(),
            name: name.into(),
            standard: "5th Standard".into(),
            teacher_id: teacher.map(|t| t.to_string()),
            students: students.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn student(id: &str) -> Student {
        Student {
            id: id.into(),
            first_name: "F".into(),
            last_name: "L".into(),
            email: format!("{id}@example.com"),
            roll_number: id.to_uppercase(),
            class_id: None,
        }
    }

    fn record(class_id: &str, date: &str, marks: &[(&str, Status)]) -> AttendanceRecord {
        AttendanceRecord {
            id: format!("{class_id}_{date}"),
            class_id: class_id.into(),
            date: date.into(),
            attendance: marks.iter().map(|(s, st)| (s.to_string(), *st)).collect(),
            marked_at: "2025-01-01T00:00:00.000Z".into(),
        }
    }

    #[test]
    fn rate_rounds_and_guards_zero() {
        assert_eq!(attendance_rate(8, 10), 80);
        assert_eq!(attendance_rate(0, 0), 0);
        assert_eq!(attendance_rate(5, 5), 100);
        assert_eq!(attendance_rate(2, 3), 67);
        assert_eq!(attendance_rate(1, 8), 13);
        assert_eq!(attendance_rate(1, 3), 33);
    }

    #[test]
    fn admin_dashboard_tallies_selected_date() {
        use Status::*;
        let classes = vec![
            class("c1", "Class A", Some("t1"), &["s1", "s2"]),
            class("c2", "Class B", Some("t2"), &["s3"]),
        ];
        let students = vec![student("s1"), student("s2"), student("s3")];
        let records = vec![
            record("c1", "2025-03-03", &[("s1", Present), ("s2", Absent)]),
            record("c2", "2025-03-03", &[("s3", Present)]),
            record("c1", "2025-03-04", &[("s1", Absent), ("s2", Absent)]),
        ];

        let d = dashboard("2025-03-03", &Scope::All, &classes, &students, &records);
        assert_eq!(d.total_students, 3);
        assert_eq!(d.total_classes, 2);
        assert_eq!(d.present_today, 2);
        assert_eq!(d.absent_today, 1);
        assert_eq!(d.total_today, 3);
        assert_eq!(d.today_rate, 67);
        // 2 present of 5 marks across both days.
        assert_eq!(d.overall_attendance_rate, 40);
        assert_eq!(d.class_wise_today.len(), 2);
        assert_eq!(d.class_wise_today[0].name, "Class A");
        assert_eq!(d.class_wise_today[0].percentage, 50);
        assert_eq!(d.today_pie_data[1].value, 1);
    }

    #[test]
    fn teacher_scope_only_sees_own_classes() {
        use Status::*;
        let classes = vec![
            class("c1", "Class A", Some("t1"), &["s1"]),
            class("c2", "Class B", Some("t2"), &["s2", "s3"]),
        ];
        let students = vec![student("s1"), student("s2"), student("s3")];
        let records = vec![
            record("c1", "2025-03-03", &[("s1", Absent)]),
            record("c2", "2025-03-03", &[("s2", Present), ("s3", Present)]),
        ];

        let d = dashboard(
            "2025-03-03",
            &Scope::Teacher("t2".into()),
            &classes,
            &students,
            &records,
        );
        assert_eq!(d.total_classes, 1);
        assert_eq!(d.total_students, 2);
        assert_eq!(d.present_today, 2);
        assert_eq!(d.total_today, 2);
        assert_eq!(d.overall_attendance_rate, 100);
    }

    #[test]
    fn empty_day_yields_zero_rates() {
        let classes = vec![class("c1", "Class A", None, &[])];
        let d = dashboard("2025-03-03", &Scope::All, &classes, &[], &[]);
        assert_eq!(d.total_today, 0);
        assert_eq!(d.today_rate, 0);
        assert_eq!(d.overall_attendance_rate, 0);
        assert!(d.class_wise_today.is_empty());
    }

    #[test]
    fn student_summary_uses_first_class_membership() {
        use Status::*;
        let classes = vec![class("c1", "Class A", None, &["s1", "s2"])];
        let records = vec![
            record("c1", "2025-03-03", &[("s1", Present), ("s2", Absent)]),
            record("c1", "2025-03-04", &[("s1", Absent)]),
            record("c1", "2025-03-05", &[("s2", Present)]),
        ];
        let s = student_summary("s1", &classes, &records);
        assert_eq!(s.class_id.as_deref(), Some("c1"));
        assert_eq!(s.total_days, 2);
        assert_eq!(s.present_days, 1);
        assert_eq!(s.absent_days, 1);
        assert_eq!(s.attendance_rate, 50);

        let none = student_summary("s9", &classes, &records);
        assert_eq!(none.class_id, None);
        assert_eq!(none.attendance_rate, 0);
    }

    #[test]
    fn student_rows_total_every_date_for_the_teachers_roster() {
        use Status::*;
        let classes = vec![
            class("c1", "Class A", Some("t1"), &["s2", "s1", "ghost"]),
            class("c2", "Class B", None, &["s3"]),
        ];
        let students = vec![student("s1"), student("s2"), student("s3")];
        let teachers: HashMap<String, String> =
            [("t1".to_string(), "Ada Byron".to_string())].into_iter().collect();
        let records = vec![
            record("c1", "2025-03-03", &[("s1", Present), ("s2", Absent)]),
            record("c1", "2025-03-04", &[("s1", Present)]),
            record("c2", "2025-03-04", &[("s3", Absent), ("s1", Absent)]),
        ];

        let rows = class_student_rows(
            &Scope::Teacher("t1".into()),
            &classes,
            &students,
            &teachers,
            &records,
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].student_id, "s2");
        assert_eq!((rows[0].present, rows[0].absent), (0, 1));
        assert_eq!(rows[1].student_id, "s1");
        assert_eq!((rows[1].present, rows[1].absent), (2, 0));
        assert_eq!(rows[1].attendance_rate, 100);
        assert_eq!(rows[1].class_name, "Class A - 5th Standard");
        assert_eq!(rows[1].teacher_name, "Ada Byron");
        assert_eq!(rows[1].student_name, "F L");

        let all = class_student_rows(&Scope::All, &classes, &students, &teachers, &records);
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].teacher_name, NO_TEACHER);
        assert_eq!((all[2].present, all[2].absent), (0, 1));
    }

    #[test]
    fn month_calendar_covers_whole_month() {
        let mut days = BTreeMap::new();
        days.insert("2024-02-29".to_string(), Status::Present);
        let cal = month_calendar(2024, 2, &days);
        assert_eq!(cal.len(), 29);
        // 2024-02-01 was a Thursday.
        assert_eq!(cal[0].weekday, 4);
        assert_eq!(cal[28].status, Some(Status::Present));
        assert_eq!(cal[0].status, None);
    }

    #[test]
    fn trend_fills_missing_days_with_zero() {
        use Status::*;
        let classes = vec![class("c1", "Class A", None, &["s1"])];
        let records = vec![record("c1", "2025-03-04", &[("s1", Present)])];
        let from = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let to = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        let points = trend(&Scope::All, &classes, &records, from, to);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].total, 0);
        assert_eq!(points[1].rate, 100);
        assert_eq!(points[2].date, "2025-03-05");
    }
}
