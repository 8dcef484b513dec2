use rusqlite::Connection;
use serde::Serialize;

use crate::bonus;
use crate::config::GradingConfig;
use crate::directory::{self, AssignmentInfo};
use crate::error::EngineError;
use crate::model::{BonusSlot, GradeValue, Moment, Outcome, FINAL_MAX, FINAL_MIN};

/// Tolerance for weighted sums that land a hair under an exact half.
const HALF_EPSILON: f64 = 1e-9;

/// Half-up rounding to an integer: `floor(x) + (frac >= 0.5 - 1e-9 ? 1 : 0)`.
/// Fractions within `HALF_EPSILON` below one half round up, so 12.4999999995
/// gives 13. Never rounds half to even.
pub fn round_half_up(x: f64) -> f64 {
    let whole = x.floor();
    if x - whole >= 0.5 - HALF_EPSILON {
        whole + 1.0
    } else {
        whole
    }
}

/// Same half-up rule, tolerance included, at one decimal.
pub fn round_off_1_decimal(x: f64) -> f64 {
    round_half_up(10.0 * x) / 10.0
}

pub fn clamp_final(x: f64) -> f64 {
    x.clamp(FINAL_MIN, FINAL_MAX)
}

/// One graded activity as seen by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MomentEntry {
    pub weight: f64,
    pub value: GradeValue,
    pub recorded_seq: i64,
}

/// Per-moment result for one student.
///
/// Quantitative subjects: `sum(value * weight / 100)` over numeric entries,
/// without re-normalizing by count. Non-quantitative subjects: the most
/// recently written entry verbatim, integer-rounded if numeric.
pub fn moment_average(non_quantitative: bool, entries: &[MomentEntry]) -> Outcome {
    if non_quantitative {
        return match entries.iter().max_by_key(|e| e.recorded_seq) {
            None => Outcome::NotAvailable,
            Some(e) => match e.value {
                GradeValue::Numeric(v) => Outcome::Value(GradeValue::Numeric(round_half_up(v))),
                other => Outcome::Value(other),
            },
        };
    }

    let mut graded = 0usize;
    let mut sum = 0.0;
    for e in entries {
        if let GradeValue::Numeric(v) = e.value {
            graded += 1;
            sum += v * e.weight;
        }
    }
    if graded == 0 {
        return Outcome::NotAvailable;
    }
    Outcome::Value(GradeValue::Numeric(sum / 100.0))
}

/// Final grade from moment results in chronological order.
///
/// Quantitative: mean of the available moments plus the total bonus, clamped
/// to [0,20] and then rounded half-up. Non-quantitative: the last available
/// moment, no bonus.
pub fn final_grade(non_quantitative: bool, moments: &[Outcome], total_bonus: f64) -> Outcome {
    if non_quantitative {
        return moments
            .iter()
            .rev()
            .find(|o| o.is_available())
            .copied()
            .unwrap_or(Outcome::NotAvailable);
    }
    match raw_final(moments, total_bonus) {
        Some(raw) => Outcome::Value(GradeValue::Numeric(round_half_up(clamp_final(raw)))),
        None => Outcome::NotAvailable,
    }
}

fn raw_final(moments: &[Outcome], total_bonus: f64) -> Option<f64> {
    let values: Vec<f64> = moments.iter().filter_map(|o| o.numeric()).collect();
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some(mean + total_bonus)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MomentResult {
    pub moment: Moment,
    pub average: Outcome,
    pub bonus: f64,
    /// Average plus the moment's own bonus, clamped to [0,20]. Reporting
    /// only; never feeds the final grade.
    pub adjusted: Outcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalBreakdown {
    pub assignment_id: String,
    pub student_id: String,
    pub non_quantitative: bool,
    pub moments: Vec<MomentResult>,
    pub total_bonus: f64,
    /// Mean plus total bonus before clamping and rounding.
    pub raw: Option<f64>,
    pub final_grade: Outcome,
}

/// Read-only view over one assignment. Lock state is never consulted.
pub struct CalcContext<'a> {
    pub conn: &'a Connection,
    pub assignment: AssignmentInfo,
    pub non_quantitative: bool,
}

impl<'a> CalcContext<'a> {
    pub fn new(conn: &'a Connection, cfg: &GradingConfig, assignment_id: &str) -> Result<Self, EngineError> {
        let assignment = directory::load_assignment(conn, assignment_id)?;
        let non_quantitative = cfg.is_non_quantitative(&assignment.subject_name);
        Ok(CalcContext {
            conn,
            assignment,
            non_quantitative,
        })
    }

    pub fn require_enrolled(&self, student_id: &str) -> Result<(), EngineError> {
        if !directory::is_enrolled(self.conn, &self.assignment, student_id)? {
            return Err(EngineError::not_found("enrollment", student_id));
        }
        Ok(())
    }

    fn moment_entries(&self, student_id: &str, moment: Moment) -> Result<Vec<MomentEntry>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT a.weight, g.mode, g.numeric_value, g.letter_value, g.recorded_seq
             FROM activities a
             JOIN grade_entries g ON g.activity_id = a.id
             WHERE a.assignment_id = ? AND a.moment = ? AND g.student_id = ?
             ORDER BY g.recorded_seq",
        )?;
        let rows = stmt
            .query_map((&self.assignment.id, moment.get(), student_id), |r| {
                let mode: String = r.get(1)?;
                let numeric_value: Option<f64> = r.get(2)?;
                let letter_value: Option<String> = r.get(3)?;
                let value = GradeValue::from_columns(&mode, numeric_value, letter_value.as_deref())
                    .ok_or_else(|| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            Box::new(EngineError::validation(
                                format!("unreadable grade value with mode {}", mode),
                                None,
                            )),
                        )
                    })?;
                Ok(MomentEntry {
                    weight: r.get(0)?,
                    value,
                    recorded_seq: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn moment_average(&self, student_id: &str, moment: Moment) -> Result<Outcome, EngineError> {
        let entries = self.moment_entries(student_id, moment)?;
        Ok(moment_average(self.non_quantitative, &entries))
    }

    pub fn breakdown(&self, student_id: &str) -> Result<FinalBreakdown, EngineError> {
        let mut moments = Vec::new();
        for &moment in Moment::tracked(self.assignment.pending_section) {
            let average = self.moment_average(student_id, moment)?;
            let bonus = bonus::stored_points(
                self.conn,
                &self.assignment.id,
                BonusSlot::Moment(moment),
                student_id,
            )?;
            let adjusted = match average {
                Outcome::Value(GradeValue::Numeric(v)) if !self.non_quantitative => {
                    Outcome::Value(GradeValue::Numeric(clamp_final(v + bonus)))
                }
                other => other,
            };
            moments.push(MomentResult {
                moment,
                average,
                bonus,
                adjusted,
            });
        }

        let averages: Vec<Outcome> = moments.iter().map(|m| m.average).collect();
        let (total_bonus, raw) = if self.non_quantitative {
            (0.0, None)
        } else {
            let total = bonus::stored_points(
                self.conn,
                &self.assignment.id,
                BonusSlot::Total,
                student_id,
            )?;
            (total, raw_final(&averages, total))
        };

        Ok(FinalBreakdown {
            assignment_id: self.assignment.id.clone(),
            student_id: student_id.to_string(),
            non_quantitative: self.non_quantitative,
            final_grade: final_grade(self.non_quantitative, &averages, total_bonus),
            moments,
            total_bonus,
            raw,
        })
    }
}

pub fn compute_moment_average(
    conn: &Connection,
    cfg: &GradingConfig,
    assignment_id: &str,
    student_id: &str,
    moment: Moment,
) -> Result<Outcome, EngineError> {
    let ctx = CalcContext::new(conn, cfg, assignment_id)?;
    ctx.require_enrolled(student_id)?;
    ctx.moment_average(student_id, moment)
}

pub fn compute_final_grade(
    conn: &Connection,
    cfg: &GradingConfig,
    assignment_id: &str,
    student_id: &str,
) -> Result<FinalBreakdown, EngineError> {
    let ctx = CalcContext::new(conn, cfg, assignment_id)?;
    ctx.require_enrolled(student_id)?;
    ctx.breakdown(student_id)
}
