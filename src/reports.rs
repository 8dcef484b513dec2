//! Classroom report model built on top of the calculators. Display names are
//! enrichment lookups and degrade to `None`; grade figures never do.

use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use crate::calc::{self, CalcContext, MomentResult};
use crate::config::GradingConfig;
use crate::directory;
use crate::error::EngineError;
use crate::model::Outcome;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentLine {
    pub student_id: String,
    pub display_name: Option<String>,
    pub moments: Vec<MomentResult>,
    pub total_bonus: f64,
    pub final_grade: Outcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectReport {
    pub assignment_id: String,
    pub subject_name: Option<String>,
    pub teacher: Option<String>,
    pub non_quantitative: bool,
    pub students: Vec<StudentLine>,
    /// Mean of numeric finals, one decimal, half-up.
    pub class_average: Option<f64>,
    pub graded_count: usize,
    pub not_available_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomReport {
    pub classroom_id: String,
    pub classroom_name: String,
    pub pending: bool,
    pub subjects: Vec<SubjectReport>,
}

pub fn class_average(finals: &[Outcome]) -> Option<f64> {
    let values: Vec<f64> = finals.iter().filter_map(|o| o.numeric()).collect();
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some(calc::round_off_1_decimal(mean))
}

fn subject_report(conn: &Connection, cfg: &GradingConfig, assignment_id: &str) -> Result<SubjectReport, EngineError> {
    let ctx = CalcContext::new(conn, cfg, assignment_id)?;
    let students = directory::enrolled_students(conn, &ctx.assignment)?;

    let mut lines = Vec::with_capacity(students.len());
    for st in &students {
        let breakdown = ctx.breakdown(&st.id)?;
        lines.push(StudentLine {
            student_id: st.id.clone(),
            display_name: directory::student_display_name(conn, &st.id),
            moments: breakdown.moments,
            total_bonus: breakdown.total_bonus,
            final_grade: breakdown.final_grade,
        });
    }

    let finals: Vec<Outcome> = lines.iter().map(|l| l.final_grade).collect();
    let graded_count = finals.iter().filter(|o| o.is_available()).count();
    Ok(SubjectReport {
        assignment_id: ctx.assignment.id.clone(),
        subject_name: directory::subject_display_name(conn, assignment_id),
        teacher: ctx.assignment.teacher.clone(),
        non_quantitative: ctx.non_quantitative,
        class_average: class_average(&finals),
        graded_count,
        not_available_count: finals.len() - graded_count,
        students: lines,
    })
}

pub fn classroom_report(conn: &Connection, cfg: &GradingConfig, classroom_id: &str) -> Result<ClassroomReport, EngineError> {
    let classroom = directory::load_classroom(conn, classroom_id)?;
    let assignments = directory::list_assignments(conn, classroom_id)?;
    let subjects = assignments
        .iter()
        .map(|a| subject_report(conn, cfg, &a.id))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(classroom_id, subjects = subjects.len(), "classroom report built");
    Ok(ClassroomReport {
        classroom_id: classroom.id,
        classroom_name: classroom.name,
        pending: classroom.pending,
        subjects,
    })
}
