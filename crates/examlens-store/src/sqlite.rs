use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use examlens_core::{
    FactCounts, FeedbackMap, GroupLevel, GroupTally, HierarchyPath, Misconception,
    MisconceptionFact, QuestionFact, QuestionKey, Scope, TallyKey, TestKey, feedback_id,
    misconception_id, normalize_class_id, push_unique,
};
use rusqlite::{Connection, OptionalExtension, params};

use super::{FactStore, StoreError, UpsertedQuestion};

/// `(subject, chapter, topic, opted answer)` of one question row.
type QuestionLabels = (String, String, String, Option<String>);

/// Feedback authored for one answer option of a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionFeedbackRecord {
    pub option_index: u32,
    pub option_label: String,
    pub option_text: String,
    pub feedback_text: String,
}

/// Relational store: one flattened row per (class, test, question) with the
/// hierarchy labels denormalized onto it.
pub struct SqliteFactStore {
    conn: Mutex<Connection>,
}

impl SqliteFactStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|err| StoreError::LockPoisoned(err.to_string()))
    }

    /// Replaces the authored per-option feedback for a question.
    pub fn author_option_feedback(
        &self,
        question: &QuestionKey,
        options: &[OptionFeedbackRecord],
    ) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            DELETE FROM question_options
            WHERE class_id = ?1 AND test_number = ?2 AND question_number = ?3
            "#,
            params![
                question.test.class_id,
                question.test.test_number,
                question.question_number
            ],
        )?;

        for option in options {
            tx.execute(
                r#"
                INSERT INTO question_options (
                    class_id, test_number, question_number,
                    option_index, option_label, option_text, feedback_text
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(class_id, test_number, question_number, option_index) DO UPDATE SET
                    option_label = excluded.option_label,
                    option_text = excluded.option_text,
                    feedback_text = excluded.feedback_text
                "#,
                params![
                    question.test.class_id,
                    question.test.test_number,
                    question.question_number,
                    option.option_index,
                    option.option_label,
                    option.option_text,
                    option.feedback_text,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn question_exists(conn: &Connection, question: &QuestionKey) -> Result<bool, StoreError> {
        let exists = conn
            .query_row(
                r#"
                SELECT 1 FROM question_facts
                WHERE class_id = ?1 AND test_number = ?2 AND question_number = ?3
                "#,
                params![
                    question.test.class_id,
                    question.test.test_number,
                    question.question_number
                ],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }

    fn count_scoped(conn: &Connection, sql: &str, scope: &Scope) -> Result<u64, StoreError> {
        let count: i64 =
            conn.query_row(sql, params![scope.class_id, scope.test_number], |row| {
                row.get(0)
            })?;
        Ok(count.max(0) as u64)
    }
}

impl FactStore for SqliteFactStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn upsert_path(
        &self,
        fact: &QuestionFact,
        test_date: Option<&str>,
    ) -> Result<UpsertedQuestion, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO tests (class_id, test_number, test_date)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(class_id, test_number) DO NOTHING
            "#,
            params![fact.key.test.class_id, fact.key.test.test_number, test_date],
        )?;

        let existed = Self::question_exists(&tx, &fact.key)?;

        tx.execute(
            r#"
            INSERT INTO question_facts (
                class_id, test_number, question_number,
                subject, chapter, topic, subtopic,
                question_text, correct_answer, opted_answer, is_correct, was_attempted,
                question_type, importance
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(class_id, test_number, question_number) DO UPDATE SET
                correct_answer = excluded.correct_answer,
                opted_answer = excluded.opted_answer,
                is_correct = excluded.is_correct,
                was_attempted = excluded.was_attempted,
                question_type = excluded.question_type
            "#,
            params![
                fact.key.test.class_id,
                fact.key.test.test_number,
                fact.key.question_number,
                fact.path.subject,
                fact.path.chapter,
                fact.path.topic,
                fact.path.subtopic,
                fact.text,
                fact.correct_answer,
                fact.opted_answer,
                fact.is_correct,
                fact.is_attempted(),
                fact.question_type,
                fact.importance,
            ],
        )?;

        tx.commit()?;

        Ok(UpsertedQuestion {
            key: fact.key.clone(),
            created: !existed,
        })
    }

    fn attach_misconception(
        &self,
        question: &QuestionKey,
        misconception: &Misconception,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        if !Self::question_exists(&conn, question)? {
            return Err(StoreError::QuestionNotFound(question.id_material()));
        }

        let inserted = conn.execute(
            r#"
            INSERT INTO misconceptions (
                misconception_id, class_id, test_number, question_number, error_type, description
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(misconception_id) DO NOTHING
            "#,
            params![
                misconception_id(question, misconception),
                question.test.class_id,
                question.test.test_number,
                question.question_number,
                misconception.error_type,
                misconception.description,
            ],
        )?;

        Ok(inserted > 0)
    }

    fn attach_feedback(&self, question: &QuestionKey, text: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        if !Self::question_exists(&conn, question)? {
            return Err(StoreError::QuestionNotFound(question.id_material()));
        }

        let inserted = conn.execute(
            r#"
            INSERT INTO feedback (
                feedback_id, class_id, test_number, question_number, feedback_text
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(feedback_id) DO NOTHING
            "#,
            params![
                feedback_id(question, text),
                question.test.class_id,
                question.test.test_number,
                question.question_number,
                text,
            ],
        )?;

        Ok(inserted > 0)
    }

    fn delete_test(&self, test: &TestKey) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        for table in ["feedback", "misconceptions", "question_options", "question_facts"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE class_id = ?1 AND test_number = ?2"),
                params![test.class_id, test.test_number],
            )?;
        }
        let removed = tx.execute(
            "DELETE FROM tests WHERE class_id = ?1 AND test_number = ?2",
            params![test.class_id, test.test_number],
        )?;

        tx.commit()?;

        if removed > 0 {
            tracing::debug!(
                class_id = %test.class_id,
                test_number = test.test_number,
                "removed test rows from sqlite"
            );
        }
        Ok(removed > 0)
    }

    fn delete_class(&self, class_id: &str) -> Result<u64, StoreError> {
        let class_id = normalize_class_id(class_id)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        for table in ["feedback", "misconceptions", "question_options", "question_facts"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE class_id = ?1"),
                params![class_id],
            )?;
        }
        let removed = tx.execute("DELETE FROM tests WHERE class_id = ?1", params![class_id])?;

        tx.commit()?;
        Ok(removed as u64)
    }

    fn test_date(&self, test: &TestKey) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        let date = conn
            .query_row(
                "SELECT test_date FROM tests WHERE class_id = ?1 AND test_number = ?2",
                params![test.class_id, test.test_number],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(date)
    }

    fn questions(&self, scope: &Scope) -> Result<Vec<QuestionFact>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT
                class_id, test_number, question_number,
                subject, chapter, topic, subtopic,
                question_text, correct_answer, opted_answer, is_correct,
                question_type, importance
            FROM question_facts
            WHERE class_id = ?1
              AND (?2 IS NULL OR test_number = ?2)
            ORDER BY test_number ASC, question_number ASC
            "#,
        )?;

        let rows = stmt.query_map(params![scope.class_id, scope.test_number], |row| {
            Ok(QuestionFact {
                key: QuestionKey {
                    test: TestKey {
                        class_id: row.get(0)?,
                        test_number: row.get(1)?,
                    },
                    question_number: row.get(2)?,
                },
                path: HierarchyPath {
                    subject: row.get(3)?,
                    chapter: row.get(4)?,
                    topic: row.get(5)?,
                    subtopic: row.get(6)?,
                },
                text: row.get(7)?,
                correct_answer: row.get(8)?,
                opted_answer: row.get(9)?,
                is_correct: row.get(10)?,
                question_type: row.get(11)?,
                importance: row.get(12)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn tests_taken(&self, scope: &Scope) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        Self::count_scoped(
            &conn,
            r#"
            SELECT COUNT(*) FROM tests
            WHERE class_id = ?1 AND (?2 IS NULL OR test_number = ?2)
            "#,
            scope,
        )
    }

    fn tallies(&self, scope: &Scope, level: GroupLevel) -> Result<Vec<GroupTally>, StoreError> {
        let (select_labels, group_columns) = match level {
            GroupLevel::Test => ("NULL, NULL, NULL", "test_number"),
            GroupLevel::SubjectTopic => ("subject, NULL, topic", "subject, topic, test_number"),
            GroupLevel::Chapter => ("subject, chapter, NULL", "subject, chapter, test_number"),
            GroupLevel::Topic => (
                "subject, chapter, topic",
                "subject, chapter, topic, test_number",
            ),
        };

        let sql = format!(
            r#"
            SELECT
                {select_labels},
                test_number,
                SUM(CASE WHEN is_correct = 1 THEN 1 ELSE 0 END) AS correct,
                COUNT(*) AS attempted
            FROM question_facts
            WHERE class_id = ?1
              AND (?2 IS NULL OR test_number = ?2)
              AND was_attempted = 1
            GROUP BY {group_columns}
            ORDER BY {group_columns}
            "#
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![scope.class_id, scope.test_number], |row| {
            Ok(GroupTally {
                key: TallyKey {
                    subject: row.get(0)?,
                    chapter: row.get(1)?,
                    topic: row.get(2)?,
                    test_number: row.get(3)?,
                },
                correct: row.get::<_, i64>(4)?.max(0) as u64,
                attempted: row.get::<_, i64>(5)?.max(0) as u64,
            })
        })?;

        let mut tallies = rows.collect::<Result<Vec<_>, _>>()?;
        tallies.sort_by(|left, right| left.key.cmp(&right.key));
        Ok(tallies)
    }

    fn feedback_map(&self, scope: &Scope) -> Result<FeedbackMap, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT
                q.test_number, q.question_number,
                q.subject, q.chapter, q.topic, q.opted_answer,
                o.option_index, o.option_label, o.option_text, o.feedback_text
            FROM question_facts q
            JOIN question_options o
              ON o.class_id = q.class_id
             AND o.test_number = q.test_number
             AND o.question_number = q.question_number
            WHERE q.class_id = ?1
              AND (?2 IS NULL OR q.test_number = ?2)
              AND q.was_attempted = 1
            ORDER BY q.test_number ASC, q.question_number ASC, o.option_index ASC
            "#,
        )?;

        let rows = stmt.query_map(params![scope.class_id, scope.test_number], |row| {
            Ok((
                (row.get::<_, u32>(0)?, row.get::<_, u32>(1)?),
                (
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ),
                OptionFeedbackRecord {
                    option_index: row.get(6)?,
                    option_label: row.get(7)?,
                    option_text: row.get(8)?,
                    feedback_text: row.get(9)?,
                },
            ))
        })?;

        let mut per_question: BTreeMap<(u32, u32), (QuestionLabels, Vec<OptionFeedbackRecord>)> =
            BTreeMap::new();
        for row in rows {
            let (question, labels, option) = row?;
            per_question
                .entry(question)
                .or_insert_with(|| (labels, Vec::new()))
                .1
                .push(option);
        }

        let mut map = FeedbackMap::new();
        for ((subject, chapter, topic, opted_answer), options) in per_question.into_values() {
            let Some(opted_answer) = opted_answer else {
                continue;
            };
            let Some(selected) = select_option(&opted_answer, &options) else {
                continue;
            };
            if selected.feedback_text.trim().is_empty() {
                continue;
            }

            let texts = map
                .entry(subject)
                .or_default()
                .entry(chapter)
                .or_default()
                .entry(topic)
                .or_default();
            push_unique(texts, selected.feedback_text.clone());
        }

        Ok(map)
    }

    fn misconceptions(&self, scope: &Scope) -> Result<Vec<MisconceptionFact>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT
                q.class_id, q.test_number, q.question_number,
                q.subject, q.chapter, q.topic, q.subtopic,
                m.error_type, m.description
            FROM misconceptions m
            JOIN question_facts q
              ON q.class_id = m.class_id
             AND q.test_number = m.test_number
             AND q.question_number = m.question_number
            WHERE q.class_id = ?1
              AND (?2 IS NULL OR q.test_number = ?2)
            ORDER BY q.test_number ASC, q.question_number ASC, m.rowid ASC
            "#,
        )?;

        let rows = stmt.query_map(params![scope.class_id, scope.test_number], |row| {
            Ok(MisconceptionFact {
                question: QuestionKey {
                    test: TestKey {
                        class_id: row.get(0)?,
                        test_number: row.get(1)?,
                    },
                    question_number: row.get(2)?,
                },
                path: HierarchyPath {
                    subject: row.get(3)?,
                    chapter: row.get(4)?,
                    topic: row.get(5)?,
                    subtopic: row.get(6)?,
                },
                misconception: Misconception {
                    error_type: row.get(7)?,
                    description: row.get(8)?,
                },
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn fact_counts(&self, scope: &Scope) -> Result<FactCounts, StoreError> {
        let conn = self.lock()?;
        let distinct = |columns: &str| -> Result<u64, StoreError> {
            Self::count_scoped(
                &conn,
                &format!(
                    r#"
                    SELECT COUNT(*) FROM (
                        SELECT DISTINCT test_number, {columns}
                        FROM question_facts
                        WHERE class_id = ?1 AND (?2 IS NULL OR test_number = ?2)
                    )
                    "#
                ),
                scope,
            )
        };
        let rows_in = |table: &str| -> Result<u64, StoreError> {
            Self::count_scoped(
                &conn,
                &format!(
                    "SELECT COUNT(*) FROM {table} WHERE class_id = ?1 AND (?2 IS NULL OR test_number = ?2)"
                ),
                scope,
            )
        };

        Ok(FactCounts {
            tests: rows_in("tests")?,
            subjects: distinct("subject")?,
            chapters: distinct("subject, chapter")?,
            topics: distinct("subject, chapter, topic")?,
            subtopics: distinct("subject, chapter, topic, subtopic")?,
            questions: rows_in("question_facts")?,
            misconceptions: rows_in("misconceptions")?,
            feedback: rows_in("feedback")?,
        })
    }
}

/// Maps an opted answer such as `B`, `(b)`, `b)` or `2` to a zero-based option
/// index.
pub fn option_index_for_answer(answer: &str) -> Option<u32> {
    let trimmed = answer
        .trim()
        .trim_start_matches(['(', '['])
        .trim_end_matches([')', ']', '.']);

    let mut chars = trimmed.chars();
    let first = chars.next()?;
    if chars.next().is_none() && first.is_ascii_alphabetic() {
        return Some(u32::from(first.to_ascii_lowercase()) - u32::from('a'));
    }

    trimmed
        .parse::<u32>()
        .ok()
        .filter(|number| *number > 0)
        .map(|number| number - 1)
}

fn select_option<'a>(
    opted_answer: &str,
    options: &'a [OptionFeedbackRecord],
) -> Option<&'a OptionFeedbackRecord> {
    let opted = opted_answer.trim();
    if opted.is_empty() {
        return None;
    }

    options
        .iter()
        .find(|option| option.option_text.trim().eq_ignore_ascii_case(opted))
        .or_else(|| {
            options
                .iter()
                .find(|option| option.option_label.trim().eq_ignore_ascii_case(opted))
        })
        .or_else(|| {
            let index = option_index_for_answer(opted)?;
            options.iter().find(|option| option.option_index == index)
        })
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tests (
            class_id TEXT NOT NULL,
            test_number INTEGER NOT NULL,
            test_date TEXT,
            PRIMARY KEY (class_id, test_number)
        );

        CREATE TABLE IF NOT EXISTS question_facts (
            class_id TEXT NOT NULL,
            test_number INTEGER NOT NULL,
            question_number INTEGER NOT NULL,
            subject TEXT NOT NULL,
            chapter TEXT NOT NULL,
            topic TEXT NOT NULL,
            subtopic TEXT NOT NULL,
            question_text TEXT NOT NULL,
            correct_answer TEXT,
            opted_answer TEXT,
            is_correct INTEGER,
            was_attempted INTEGER NOT NULL,
            question_type TEXT NOT NULL,
            importance TEXT,
            PRIMARY KEY (class_id, test_number, question_number)
        );

        CREATE INDEX IF NOT EXISTS idx_question_facts_scope
            ON question_facts (class_id, test_number, was_attempted);

        CREATE TABLE IF NOT EXISTS misconceptions (
            misconception_id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            test_number INTEGER NOT NULL,
            question_number INTEGER NOT NULL,
            error_type TEXT NOT NULL,
            description TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS feedback (
            feedback_id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            test_number INTEGER NOT NULL,
            question_number INTEGER NOT NULL,
            feedback_text TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS question_options (
            class_id TEXT NOT NULL,
            test_number INTEGER NOT NULL,
            question_number INTEGER NOT NULL,
            option_index INTEGER NOT NULL,
            option_label TEXT NOT NULL,
            option_text TEXT NOT NULL,
            feedback_text TEXT NOT NULL,
            PRIMARY KEY (class_id, test_number, question_number, option_index)
        );
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use examlens_core::CoreError;
    use tempfile::tempdir;

    use super::*;

    fn fact(test_number: u32, question_number: u32, opted: Option<&str>) -> QuestionFact {
        QuestionFact {
            key: QuestionKey {
                test: TestKey::new("class-1", test_number).expect("test key"),
                question_number,
            },
            path: HierarchyPath {
                subject: "Physics".to_owned(),
                chapter: "Kinematics".to_owned(),
                topic: "Velocity".to_owned(),
                subtopic: "Average".to_owned(),
            },
            text: "Average velocity?".to_owned(),
            correct_answer: Some("B".to_owned()),
            opted_answer: opted.map(str::to_owned),
            is_correct: opted.map(|answer| answer == "B"),
            question_type: "MCQ".to_owned(),
            importance: Some("high".to_owned()),
        }
    }

    fn options() -> Vec<OptionFeedbackRecord> {
        ["10 m/s", "20 m/s", "30 m/s"]
            .iter()
            .enumerate()
            .map(|(index, text)| OptionFeedbackRecord {
                option_index: index as u32,
                option_label: ((b'A' + index as u8) as char).to_string(),
                option_text: (*text).to_owned(),
                feedback_text: format!("feedback for option {index}"),
            })
            .collect()
    }

    #[test]
    fn store_persists_facts_across_reopen_without_duplicates() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("facts.sqlite");

        let store = SqliteFactStore::open(&path).expect("open store");
        assert!(
            store
                .upsert_path(&fact(1, 1, Some("A")), Some("2024-03-01"))
                .expect("insert")
                .created
        );
        assert!(
            !store
                .upsert_path(&fact(1, 1, Some("B")), Some("2024-04-01"))
                .expect("update")
                .created
        );
        drop(store);

        let reopened = SqliteFactStore::open(&path).expect("reopen store");
        let scope = Scope::class("class-1").expect("scope");
        let questions = reopened.questions(&scope).expect("questions");
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].opted_answer.as_deref(), Some("B"));
        assert_eq!(questions[0].is_correct, Some(true));
        assert_eq!(questions[0].importance.as_deref(), Some("high"));
        assert_eq!(
            reopened
                .test_date(&TestKey::new("class-1", 1).expect("test key"))
                .expect("test date")
                .as_deref(),
            Some("2024-03-01")
        );
    }

    #[test]
    fn tallies_group_attempted_rows_only() {
        let store = SqliteFactStore::open_in_memory().expect("open store");
        store.upsert_path(&fact(1, 1, Some("B")), None).expect("q1");
        store.upsert_path(&fact(1, 2, Some("A")), None).expect("q2");
        store.upsert_path(&fact(1, 3, None), None).expect("q3");
        store.upsert_path(&fact(2, 1, Some("B")), None).expect("q4");

        let scope = Scope::class("class-1").expect("scope");
        let by_test = store.tallies(&scope, GroupLevel::Test).expect("tallies");
        assert_eq!(by_test.len(), 2);
        assert_eq!((by_test[0].correct, by_test[0].attempted), (1, 2));
        assert_eq!((by_test[1].correct, by_test[1].attempted), (1, 1));

        let by_chapter = store
            .tallies(&Scope::test("class-1", 2).expect("scope"), GroupLevel::Chapter)
            .expect("chapter tallies");
        assert_eq!(by_chapter.len(), 1);
        assert_eq!(by_chapter[0].key.chapter.as_deref(), Some("Kinematics"));
        assert_eq!(by_chapter[0].key.topic, None);
    }

    #[test]
    fn feedback_map_resolves_selected_option() {
        let store = SqliteFactStore::open_in_memory().expect("open store");
        let q1 = store
            .upsert_path(&fact(1, 1, Some("(b)")), None)
            .expect("q1")
            .key;
        let q2 = store
            .upsert_path(&fact(1, 2, Some("30 m/s")), None)
            .expect("q2")
            .key;
        let q3 = store.upsert_path(&fact(1, 3, None), None).expect("q3").key;
        for question in [&q1, &q2, &q3] {
            store
                .author_option_feedback(question, &options())
                .expect("author options");
        }

        let map = store
            .feedback_map(&Scope::class("class-1").expect("scope"))
            .expect("feedback map");
        let texts = &map["Physics"]["Kinematics"]["Velocity"];
        assert_eq!(
            texts,
            &vec![
                "feedback for option 1".to_owned(),
                "feedback for option 2".to_owned()
            ]
        );
    }

    #[test]
    fn delete_test_removes_all_rows_for_the_test() {
        let store = SqliteFactStore::open_in_memory().expect("open store");
        let question = store
            .upsert_path(&fact(1, 1, Some("A")), None)
            .expect("insert")
            .key;
        store.attach_feedback(&question, "check units").expect("feedback");
        store
            .attach_misconception(
                &question,
                &Misconception {
                    error_type: "Calculation".to_owned(),
                    description: "Forgot to divide".to_owned(),
                },
            )
            .expect("misconception");
        store.upsert_path(&fact(2, 1, Some("B")), None).expect("other test");

        assert!(store.delete_test(&question.test).expect("delete"));
        assert!(!store.delete_test(&question.test).expect("delete again"));

        let counts = store
            .fact_counts(&Scope::test("class-1", 1).expect("scope"))
            .expect("counts");
        assert_eq!(counts, FactCounts::default());
        assert_eq!(
            store
                .tests_taken(&Scope::class("class-1").expect("scope"))
                .expect("tests taken"),
            1
        );
    }

    #[test]
    fn delete_class_trims_and_rejects_blank_ids() {
        let store = SqliteFactStore::open_in_memory().expect("open store");
        for test_number in [1, 2] {
            store.upsert_path(&fact(test_number, 1, Some("A")), None).expect("upsert");
        }

        assert!(matches!(
            store.delete_class(""),
            Err(StoreError::Core(CoreError::InvalidScope(_)))
        ));
        assert_eq!(store.delete_class("  class-1\t").expect("delete class"), 2);
        assert_eq!(
            store
                .tests_taken(&Scope::class("class-1").expect("scope"))
                .expect("tests taken"),
            0
        );
    }

    #[test]
    fn option_index_for_answer_handles_common_label_styles() {
        assert_eq!(option_index_for_answer("A"), Some(0));
        assert_eq!(option_index_for_answer("(c)"), Some(2));
        assert_eq!(option_index_for_answer("d)"), Some(3));
        assert_eq!(option_index_for_answer("2"), Some(1));
        assert_eq!(option_index_for_answer("0"), None);
        assert_eq!(option_index_for_answer("twelve"), None);
        assert_eq!(option_index_for_answer("  "), None);
    }
}
