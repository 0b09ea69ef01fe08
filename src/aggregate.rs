use std::collections::HashMap;

use tracing::debug;

use crate::duration::{format_duration, parse_duration};
use crate::models::{CategoryHours, ParticipationRecord, ParticipationStats, StudentStatistics};

/// Running totals for one student while folding participation rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentAggregate {
    pub student_id: i64,
    pub name: String,
    pub email: String,
    pub class_name: String,
    pub activity_count: u64,
    pub attendance_count: u64,
    pub total_duration_seconds: i64,
}

impl StudentAggregate {
    fn from_row(row: &ParticipationRecord) -> Self {
        Self {
            student_id: row.student_id,
            name: row.student_name.clone(),
            email: row.email.clone(),
            class_name: row.class_name.clone(),
            activity_count: 0,
            attendance_count: 0,
            total_duration_seconds: 0,
        }
    }
}

/// Groups rows by student. Identity fields come from the first row seen for
/// each student.
pub fn fold_participation<'a, I>(rows: I) -> HashMap<i64, StudentAggregate>
where
    I: IntoIterator<Item = &'a ParticipationRecord>,
{
    let mut aggregates: HashMap<i64, StudentAggregate> = HashMap::new();

    for row in rows {
        let entry = aggregates
            .entry(row.student_id)
            .or_insert_with(|| StudentAggregate::from_row(row));

        entry.activity_count += 1;
        if row.attended {
            entry.attendance_count += 1;
        }
        entry.total_duration_seconds = entry
            .total_duration_seconds
            .saturating_add(parse_duration(&row.duration_text));
    }

    aggregates
}

/// Fixed 60/40 real-vs-simulated split of a total, subdivided by category.
///
/// Every share is floored independently; remainders are not redistributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoursAllocation {
    pub total: i64,
    pub real: i64,
    pub simulated: i64,
    pub activities_real: i64,
    pub shifts: i64,
    pub practices_real: i64,
    pub certificates_real: i64,
    pub activities_simulated: i64,
    pub practices_simulated: i64,
    pub certificates_simulated: i64,
}

impl HoursAllocation {
    pub fn from_total(total_seconds: i64) -> Self {
        let total = total_seconds.max(0);
        let real = floor_share(total, 60);
        let simulated = floor_share(total, 40);

        Self {
            total,
            real,
            simulated,
            activities_real: floor_share(real, 40),
            shifts: floor_share(real, 25),
            practices_real: floor_share(real, 20),
            certificates_real: floor_share(real, 15),
            activities_simulated: floor_share(simulated, 50),
            practices_simulated: floor_share(simulated, 35),
            certificates_simulated: floor_share(simulated, 15),
        }
    }

    #[cfg(test)]
    pub fn real_categories_sum(&self) -> i64 {
        self.activities_real + self.shifts + self.practices_real + self.certificates_real
    }

    #[cfg(test)]
    pub fn simulated_categories_sum(&self) -> i64 {
        self.activities_simulated + self.practices_simulated + self.certificates_simulated
    }

    pub fn percent_real(&self) -> f64 {
        percent(self.real as f64, self.total as f64)
    }

    pub fn percent_simulated(&self) -> f64 {
        percent(self.simulated as f64, self.total as f64)
    }

    fn categories(&self) -> CategoryHours {
        CategoryHours {
            activities_real: format_duration(self.activities_real),
            activities_simulated: format_duration(self.activities_simulated),
            shifts: format_duration(self.shifts),
            practices_real: format_duration(self.practices_real),
            practices_simulated: format_duration(self.practices_simulated),
            certificates_real: format_duration(self.certificates_real),
            certificates_simulated: format_duration(self.certificates_simulated),
        }
    }
}

/// `floor(value * percent / 100)` in integer arithmetic.
fn floor_share(value: i64, percent: i64) -> i64 {
    let scaled = i128::from(value) * i128::from(percent) / 100;
    i64::try_from(scaled).unwrap_or(i64::MAX)
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Percentage of `part` in `whole`, rounded to one decimal; zero when `whole` is zero.
pub fn percent(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        round1(part / whole * 100.0)
    }
}

pub fn statistics_for(aggregate: StudentAggregate) -> StudentStatistics {
    let allocation = HoursAllocation::from_total(aggregate.total_duration_seconds);

    StudentStatistics {
        student_id: aggregate.student_id,
        name: aggregate.name,
        email: aggregate.email,
        class_name: aggregate.class_name,
        total_duration: format_duration(allocation.total),
        real_duration: format_duration(allocation.real),
        simulated_duration: format_duration(allocation.simulated),
        percent_real: allocation.percent_real(),
        percent_simulated: allocation.percent_simulated(),
        categories: allocation.categories(),
        participation: ParticipationStats {
            activity_count: aggregate.activity_count,
            attendance_count: aggregate.attendance_count,
            attendance_rate_percent: percent(
                aggregate.attendance_count as f64,
                aggregate.activity_count as f64,
            ),
        },
    }
}

/// Folds participation rows into one statistics record per student, ordered
/// by ascending student id.
pub fn aggregate_by_student(rows: &[ParticipationRecord]) -> Vec<StudentStatistics> {
    let aggregates = fold_participation(rows);

    let mut students: Vec<StudentStatistics> =
        aggregates.into_values().map(statistics_for).collect();
    students.sort_by_key(|student| student.student_id);

    debug!(
        rows = rows.len(),
        students = students.len(),
        "aggregated participation rows"
    );
    students
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EvaluationStatus;
    use proptest::prelude::*;

    fn row(student_id: i64, attended: bool, duration: &str, grade: Option<f64>) -> ParticipationRecord {
        ParticipationRecord {
            student_id,
            student_name: format!("Student {student_id}"),
            email: format!("student{student_id}@example.com"),
            class_name: "Nursing A".to_string(),
            activity_name: "Ward round".to_string(),
            activity_type: "practice".to_string(),
            attended,
            duration_text: duration.to_string(),
            grade,
            concept: None,
            status: EvaluationStatus::from_grade(grade),
        }
    }

    #[test]
    fn two_rows_for_one_student_fold_into_one_record() {
        let rows = vec![
            row(1, true, "01:00:00", Some(7.0)),
            row(1, false, "00:30:00", None),
        ];

        let stats = aggregate_by_student(&rows);
        assert_eq!(stats.len(), 1);
        let student = &stats[0];
        assert_eq!(student.student_id, 1);
        assert_eq!(student.participation.activity_count, 2);
        assert_eq!(student.participation.attendance_count, 1);
        assert_eq!(student.total_duration, "01:30:00");
        assert_eq!(student.participation.attendance_rate_percent, 50.0);
        assert_eq!(student.real_duration, "00:54:00");
        assert_eq!(student.simulated_duration, "00:36:00");
        assert_eq!(student.percent_real, 60.0);
        assert_eq!(student.percent_simulated, 40.0);
    }

    #[test]
    fn output_is_sorted_by_student_id() {
        let rows = vec![
            row(12, true, "00:10:00", None),
            row(3, true, "00:10:00", None),
            row(7, false, "", None),
            row(3, false, "00:05:00", None),
        ];

        let ids: Vec<i64> = aggregate_by_student(&rows).iter().map(|s| s.student_id).collect();
        assert_eq!(ids, vec![3, 7, 12]);
    }

    #[test]
    fn first_row_supplies_identity_fields() {
        let mut first = row(5, true, "00:10:00", None);
        first.student_name = "Avery Lee".to_string();
        let mut second = row(5, true, "00:10:00", None);
        second.student_name = "Avery L.".to_string();
        second.class_name = "Nursing B".to_string();

        let stats = aggregate_by_student(&[first, second]);
        assert_eq!(stats[0].name, "Avery Lee");
        assert_eq!(stats[0].class_name, "Nursing A");
    }

    #[test]
    fn zero_duration_student_has_zero_allocation() {
        let stats = aggregate_by_student(&[row(9, false, "", None)]);
        let student = &stats[0];

        assert_eq!(student.total_duration, "00:00:00");
        assert_eq!(student.percent_real, 0.0);
        assert_eq!(student.percent_simulated, 0.0);
        assert_eq!(student.participation.activity_count, 1);
        assert_eq!(student.participation.attendance_rate_percent, 0.0);
        for value in [
            &student.categories.activities_real,
            &student.categories.activities_simulated,
            &student.categories.shifts,
            &student.categories.practices_real,
            &student.categories.practices_simulated,
            &student.categories.certificates_real,
            &student.categories.certificates_simulated,
        ] {
            assert_eq!(value, "00:00:00");
        }
    }

    #[test]
    fn malformed_duration_counts_as_zero() {
        let stats = aggregate_by_student(&[row(2, true, "abc", None), row(2, true, "00:00:30", None)]);
        assert_eq!(stats[0].total_duration, "00:00:30");
    }

    #[test]
    fn independent_flooring_may_lose_a_second() {
        // Accepted approximation: 60% and 40% of 1s both floor to zero.
        let allocation = HoursAllocation::from_total(1);
        assert_eq!(allocation.real, 0);
        assert_eq!(allocation.simulated, 0);

        let allocation = HoursAllocation::from_total(7);
        assert_eq!(allocation.real, 4);
        assert_eq!(allocation.simulated, 2);
        assert_eq!(allocation.total - (allocation.real + allocation.simulated), 1);
    }

    #[test]
    fn category_split_matches_fixed_shares() {
        let allocation = HoursAllocation::from_total(10_000);
        assert_eq!(allocation.real, 6_000);
        assert_eq!(allocation.simulated, 4_000);
        assert_eq!(allocation.activities_real, 2_400);
        assert_eq!(allocation.shifts, 1_500);
        assert_eq!(allocation.practices_real, 1_200);
        assert_eq!(allocation.certificates_real, 900);
        assert_eq!(allocation.activities_simulated, 2_000);
        assert_eq!(allocation.practices_simulated, 1_400);
        assert_eq!(allocation.certificates_simulated, 600);
    }

    proptest! {
        #[test]
        fn category_sums_never_exceed_their_side(total in 0i64..10_000_000_000i64) {
            let allocation = HoursAllocation::from_total(total);
            prop_assert!(allocation.real + allocation.simulated <= total);
            prop_assert!(total - (allocation.real + allocation.simulated) <= 1);
            prop_assert!(allocation.real_categories_sum() <= allocation.real);
            prop_assert!(allocation.simulated_categories_sum() <= allocation.simulated);
        }

        #[test]
        fn fold_is_order_independent(
            entries in prop::collection::vec((1i64..6, any::<bool>(), 0i64..20_000), 1..40),
            seed in any::<u64>(),
        ) {
            let rows: Vec<ParticipationRecord> = entries
                .iter()
                .map(|(id, attended, secs)| row(*id, *attended, &format_duration(*secs), None))
                .collect();

            let mut shuffled = rows.clone();
            let len = shuffled.len();
            let mut state = seed;
            for i in (1..len).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state >> 33) as usize % (i + 1);
                shuffled.swap(i, j);
            }

            let original = fold_participation(&rows);
            let permuted = fold_participation(&shuffled);
            prop_assert_eq!(original.len(), permuted.len());
            for (id, aggregate) in &original {
                let other = &permuted[id];
                prop_assert_eq!(aggregate.activity_count, other.activity_count);
                prop_assert_eq!(aggregate.attendance_count, other.attendance_count);
                prop_assert_eq!(aggregate.total_duration_seconds, other.total_duration_seconds);
            }
        }
    }
}
