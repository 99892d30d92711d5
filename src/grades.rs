use std::{collections::HashSet, fs::File, path::Path};

use eyre::{bail, eyre, WrapErr};
use itertools::Itertools;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use tracing::info;

use crate::{
    aggregate::Column,
    analysis::{summarize, ColumnSummary},
    trend::{predict_next, Prediction},
    utils::RunningMean,
};

pub const DEFAULT_SUBJECTS: [&str; 6] = [
    "korean", "english", "math", "history", "social", "science",
];
pub const DEFAULT_STUDENTS: usize = 150;
pub const DEFAULT_EXAMS: usize = 10;
pub const ROW_KEY: &str = "student";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentScores {
    pub label: String,
    /// Subject-major: `scores[subject_ix * exams + (exam - 1)]`.
    pub scores: Vec<Option<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSheet {
    pub subjects: Vec<String>,
    pub exams: usize,
    pub students: Vec<StudentScores>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub students: usize,
    pub columns: usize,
    pub missing: usize,
}

/// One student's scores in a subject, exam by exam; `None` where absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectTrend {
    pub subject: String,
    pub scores: Vec<Option<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectPrediction {
    pub subject: String,
    pub next_exam: usize,
    pub prediction: Prediction,
}

pub fn column_name(subject: &str, exam: usize) -> String {
    format!("{subject}_{exam}")
}

fn parse_column(name: &str) -> eyre::Result<(&str, usize)> {
    let (subject, exam) = name
        .rsplit_once('_')
        .ok_or_else(|| eyre!("column '{name}' is not <subject>_<exam>"))?;
    let exam: usize = exam
        .parse()
        .wrap_err_with(|| format!("column '{name}' has no exam index"))?;

    if subject.is_empty() || exam == 0 {
        bail!("column '{name}' is not <subject>_<exam>");
    }
    Ok((subject, exam))
}

pub fn generate(students: usize, subjects: &[&str], exams: usize, seed: u64) -> ScoreSheet {
    let mut rng = StdRng::seed_from_u64(seed);

    let students = (1..=students)
        .map(|id| StudentScores {
            label: format!("{ROW_KEY}_{id}"),
            scores: (0..subjects.len() * exams)
                .map(|_| Some(rng.gen_range(0..=100u8)))
                .collect(),
        })
        .collect();

    ScoreSheet {
        subjects: subjects.iter().map(|s| s.to_string()).collect(),
        exams,
        students,
    }
}

impl ScoreSheet {
    pub fn columns(&self) -> Vec<String> {
        self.subjects
            .iter()
            .flat_map(|subject| (1..=self.exams).map(move |exam| column_name(subject, exam)))
            .collect()
    }

    pub fn student(&self, label: &str) -> Option<&StudentScores> {
        self.students.iter().find(|s| s.label == label)
    }

    fn subject_index(&self, subject: &str) -> Option<usize> {
        self.subjects.iter().position(|s| s == subject)
    }

    /// `(exam, score)` for the exams this student actually sat.
    pub fn subject_scores(&self, student: &StudentScores, subject: &str) -> Vec<(usize, u8)> {
        let Some(ix) = self.subject_index(subject) else {
            return Vec::new();
        };

        student.scores[ix * self.exams..(ix + 1) * self.exams]
            .iter()
            .enumerate()
            .filter_map(|(offset, score)| score.map(|s| (offset + 1, s)))
            .collect()
    }

    pub fn overview(&self) -> Overview {
        Overview {
            students: self.students.len(),
            columns: self.subjects.len() * self.exams,
            missing: self
                .students
                .iter()
                .map(|s| s.scores.iter().filter(|v| v.is_none()).count())
                .sum(),
        }
    }

    /// Per exam column statistics over every student.
    pub fn describe(&self) -> Vec<ColumnSummary> {
        self.subjects
            .iter()
            .enumerate()
            .flat_map(|(ix, subject)| (1..=self.exams).map(move |exam| (ix, subject, exam)))
            .filter_map(|(ix, subject, exam)| {
                let offset = ix * self.exams + exam - 1;
                summarize(&Column {
                    name: column_name(subject, exam),
                    values: self
                        .students
                        .iter()
                        .map(|s| s.scores[offset].map(f64::from))
                        .collect(),
                })
            })
            .collect()
    }

    pub fn score_trend(&self, label: &str) -> eyre::Result<Vec<SubjectTrend>> {
        let student = self
            .student(label)
            .ok_or_else(|| eyre!("no student labelled '{label}'"))?;

        Ok(self
            .subjects
            .iter()
            .zip(student.scores.chunks(self.exams.max(1)))
            .map(|(subject, scores)| SubjectTrend {
                subject: subject.clone(),
                scores: scores.to_vec(),
            })
            .collect())
    }

    pub fn subject_averages(&self, label: &str) -> eyre::Result<Vec<(String, Option<f64>)>> {
        let student = self
            .student(label)
            .ok_or_else(|| eyre!("no student labelled '{label}'"))?;

        Ok(self
            .subjects
            .iter()
            .map(|subject| {
                let mean: RunningMean = self
                    .subject_scores(student, subject)
                    .into_iter()
                    .map(|(_, score)| score as f64)
                    .collect();
                (subject.clone(), mean.avg())
            })
            .collect())
    }

    pub fn predict_student(&self, label: &str) -> eyre::Result<Vec<SubjectPrediction>> {
        let student = self
            .student(label)
            .ok_or_else(|| eyre!("no student labelled '{label}'"))?;
        let next_exam = self.exams + 1;

        Ok(self
            .subjects
            .iter()
            .map(|subject| {
                let points = self
                    .subject_scores(student, subject)
                    .into_iter()
                    .map(|(exam, score)| (exam as f64, score as f64))
                    .collect_vec();

                SubjectPrediction {
                    subject: subject.clone(),
                    next_exam,
                    prediction: predict_next(&points, next_exam as f64),
                }
            })
            .collect())
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> eyre::Result<()> {
        let path = path.as_ref();
        let file =
            File::create(path).wrap_err_with(|| format!("cannot create {}", path.display()))?;
        let mut writer = csv::Writer::from_writer(file);

        writer.write_record(std::iter::once(ROW_KEY.to_string()).chain(self.columns()))?;

        for student in &self.students {
            let cells = student
                .scores
                .iter()
                .map(|score| score.map(|s| s.to_string()).unwrap_or_default());
            writer.write_record(std::iter::once(student.label.clone()).chain(cells))?;
        }

        writer.flush()?;
        info!(path = %path.display(), students = self.students.len(), "score sheet written");
        Ok(())
    }

    pub fn read_csv(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).wrap_err_with(|| format!("cannot open {}", path.display()))?;
        let mut reader = csv::Reader::from_reader(file);
        let headers = reader.headers()?.clone();

        if headers.get(0).map(str::trim) != Some(ROW_KEY) {
            bail!("{}: first column must be '{ROW_KEY}'", path.display());
        }

        let mut subjects: Vec<String> = Vec::new();
        let mut layout = Vec::new();
        for name in headers.iter().skip(1) {
            let (subject, exam) = parse_column(name.trim())?;
            let ix = match subjects.iter().position(|s| s == subject) {
                Some(ix) => ix,
                None => {
                    subjects.push(subject.to_string());
                    subjects.len() - 1
                }
            };
            if layout.contains(&(ix, exam)) {
                bail!("{}: column '{}' appears twice", path.display(), name.trim());
            }
            layout.push((ix, exam));
        }
        let exams = layout.iter().map(|(_, exam)| *exam).max().unwrap_or(0);

        let mut seen = HashSet::new();
        let mut students = Vec::new();

        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let label = record.get(0).unwrap_or_default().trim().to_string();

            if label.is_empty() || !seen.insert(label.clone()) {
                bail!("row {}: missing or duplicate student label '{label}'", line + 2);
            }

            let mut scores = vec![None; subjects.len() * exams];
            for ((ix, exam), cell) in layout.iter().zip(record.iter().skip(1)) {
                let cell = cell.trim();
                if cell.is_empty() {
                    continue;
                }
                let score: f64 = cell
                    .parse()
                    .wrap_err_with(|| format!("row {}: bad score '{cell}'", line + 2))?;
                if !(0.0..=100.0).contains(&score) {
                    bail!("row {}: score {score} outside 0..=100", line + 2);
                }
                scores[ix * exams + exam - 1] = Some(score.round() as u8);
            }

            students.push(StudentScores { label, scores });
        }

        Ok(Self {
            subjects,
            exams,
            students,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{column_name, generate, ScoreSheet, DEFAULT_SUBJECTS};
    use crate::trend::Prediction;

    #[test]
    fn unittest_generate_shape_and_range() {
        let sheet = generate(5, &DEFAULT_SUBJECTS, 10, 7);

        assert_eq!(sheet.students.len(), 5);
        assert_eq!(sheet.columns().len(), 60);
        assert_eq!(sheet.columns()[0], "korean_1");
        assert_eq!(sheet.columns()[59], "science_10");
        assert!(sheet.students[4].label == "student_5");
        assert!(sheet
            .students
            .iter()
            .flat_map(|s| s.scores.iter())
            .all(|s| s.map_or(false, |v| v <= 100)));
        assert_eq!(sheet, generate(5, &DEFAULT_SUBJECTS, 10, 7));
    }

    #[test]
    fn unittest_csv_keeps_labels_and_columns() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("student_scores.csv");
        let sheet = generate(3, &["math", "social_studies"], 4, 1);

        sheet.write_csv(&path)?;
        let back = ScoreSheet::read_csv(&path)?;

        assert_eq!(back, sheet);
        assert_eq!(column_name("social_studies", 4), "social_studies_4");
        Ok(())
    }

    #[test]
    fn unittest_read_blank_cells_and_bad_rows() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("s.csv");
        fs::write(&path, "student,math_1,math_2,math_3\na,50,,70\nb,90,98,100\n")?;

        let sheet = ScoreSheet::read_csv(&path)?;
        assert_eq!(sheet.overview().missing, 1);
        assert_eq!(
            sheet.subject_averages("a")?,
            vec![("math".to_string(), Some(60.0))]
        );

        let predictions = sheet.predict_student("b")?;
        assert_eq!(predictions[0].next_exam, 4);
        assert_eq!(predictions[0].prediction.value(), Some(100.0));

        let a = sheet.predict_student("a")?;
        assert!((a[0].prediction.value().unwrap() - 80.0).abs() < 1e-9);

        fs::write(&path, "student,math_1\na,50\na,60\n")?;
        assert!(ScoreSheet::read_csv(&path).is_err());

        fs::write(&path, "student,math_1\na,150\n")?;
        assert!(ScoreSheet::read_csv(&path).is_err());

        fs::write(&path, "name,math_1\na,50\n")?;
        assert!(ScoreSheet::read_csv(&path).is_err());
        Ok(())
    }

    #[test]
    fn unittest_repeated_exam_column_rejected() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("s.csv");

        fs::write(&path, "student,math_1,math_2,math_1\na,50,60,70\n")?;
        let err = ScoreSheet::read_csv(&path).unwrap_err();
        assert!(err.to_string().contains("math_1"));
        Ok(())
    }

    #[test]
    fn unittest_describe_and_trend() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("s.csv");
        fs::write(
            &path,
            "student,math_1,math_2,art_1,art_2\na,40,,10,20\nb,60,80,30,\n",
        )?;
        let sheet = ScoreSheet::read_csv(&path)?;

        let stats = sheet.describe();
        assert_eq!(
            stats.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["math_1", "math_2", "art_1", "art_2"]
        );
        assert_eq!(stats[0].count, 2);
        assert_eq!(stats[0].mean, 50.0);
        assert_eq!(stats[1].count, 1);
        assert_eq!(stats[1].std, None);

        let trend = sheet.score_trend("a")?;
        assert_eq!(trend[0].subject, "math");
        assert_eq!(trend[0].scores, vec![Some(40), None]);
        assert_eq!(trend[1].scores, vec![Some(10), Some(20)]);
        assert!(sheet.score_trend("z").is_err());
        Ok(())
    }

    #[test]
    fn unittest_single_exam_not_predictable() -> eyre::Result<()> {
        let sheet = generate(1, &["math"], 1, 3);
        let predictions = sheet.predict_student("student_1")?;

        assert!(matches!(predictions[0].prediction, Prediction::NotPossible(_)));
        assert!(sheet.predict_student("nobody").is_err());
        Ok(())
    }
}
