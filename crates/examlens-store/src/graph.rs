use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use examlens_core::{
    FactCounts, FeedbackMap, GroupLevel, GroupTally, HierarchyPath, Misconception,
    MisconceptionFact, QuestionFact, QuestionKey, Scope, TallyKey, TestKey, feedback_id,
    misconception_id, normalize_class_id, push_unique,
};
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::{Dfs, EdgeRef};

use super::{FactStore, StoreError, UpsertedQuestion};

#[derive(Debug, Clone)]
enum HierarchyNode {
    Test {
        key: TestKey,
        date: Option<String>,
    },
    Subject(String),
    Chapter(String),
    Topic(String),
    Subtopic(String),
    Question(QuestionFact),
    Misconception {
        id: String,
        misconception: Misconception,
    },
    Feedback {
        id: String,
        text: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HierarchyEdge {
    Contains,
    HasMisconception,
    HasFeedback,
}

#[derive(Debug, Clone, Copy)]
enum Level {
    Subject,
    Chapter,
    Topic,
    Subtopic,
}

impl Level {
    fn node(self, name: &str) -> HierarchyNode {
        let name = name.to_owned();
        match self {
            Self::Subject => HierarchyNode::Subject(name),
            Self::Chapter => HierarchyNode::Chapter(name),
            Self::Topic => HierarchyNode::Topic(name),
            Self::Subtopic => HierarchyNode::Subtopic(name),
        }
    }

    fn name_of(self, node: &HierarchyNode) -> Option<&str> {
        match (self, node) {
            (Self::Subject, HierarchyNode::Subject(name))
            | (Self::Chapter, HierarchyNode::Chapter(name))
            | (Self::Topic, HierarchyNode::Topic(name))
            | (Self::Subtopic, HierarchyNode::Subtopic(name)) => Some(name.as_str()),
            _ => None,
        }
    }
}

/// A question reached by walking Test→Subject→Chapter→Topic→Subtopic→Question.
struct QuestionVisit<'a> {
    index: NodeIndex,
    path: HierarchyPath,
    fact: &'a QuestionFact,
}

#[derive(Debug, Default)]
struct HierarchyGraph {
    graph: StableGraph<HierarchyNode, HierarchyEdge>,
    tests: HashMap<TestKey, NodeIndex>,
    questions: HashMap<QuestionKey, NodeIndex>,
}

impl HierarchyGraph {
    fn ensure_test(&mut self, key: &TestKey, date: Option<&str>) -> NodeIndex {
        if let Some(index) = self.tests.get(key) {
            return *index;
        }

        let index = self.graph.add_node(HierarchyNode::Test {
            key: key.clone(),
            date: date.map(str::to_owned),
        });
        self.tests.insert(key.clone(), index);
        index
    }

    fn ensure_child(&mut self, parent: NodeIndex, level: Level, name: &str) -> NodeIndex {
        let existing = self
            .graph
            .neighbors_directed(parent, Direction::Outgoing)
            .find(|child| {
                self.graph
                    .node_weight(*child)
                    .and_then(|node| level.name_of(node))
                    .is_some_and(|child_name| child_name == name)
            });
        if let Some(index) = existing {
            return index;
        }

        let index = self.graph.add_node(level.node(name));
        self.graph.add_edge(parent, index, HierarchyEdge::Contains);
        index
    }

    fn children(&self, parent: NodeIndex, edge: HierarchyEdge) -> Vec<NodeIndex> {
        let mut children = self
            .graph
            .edges_directed(parent, Direction::Outgoing)
            .filter(|edge_ref| *edge_ref.weight() == edge)
            .map(|edge_ref| edge_ref.target())
            .collect::<Vec<_>>();
        children.sort();
        children
    }

    fn named_children(&self, parent: NodeIndex, level: Level) -> Vec<(NodeIndex, &str)> {
        let mut children = self
            .children(parent, HierarchyEdge::Contains)
            .into_iter()
            .filter_map(|child| {
                self.graph
                    .node_weight(child)
                    .and_then(|node| level.name_of(node))
                    .map(|name| (child, name))
            })
            .collect::<Vec<_>>();
        children.sort_by(|left, right| left.1.cmp(right.1));
        children
    }

    fn scoped_tests(&self, scope: &Scope) -> Vec<(&TestKey, NodeIndex)> {
        let mut tests = self
            .tests
            .iter()
            .filter(|(key, _)| scope.contains(key))
            .map(|(key, index)| (key, *index))
            .collect::<Vec<_>>();
        tests.sort_by(|left, right| left.0.cmp(right.0));
        tests
    }

    fn walk_questions(&self, scope: &Scope) -> Vec<QuestionVisit<'_>> {
        let mut visits = Vec::new();

        for (_, test_index) in self.scoped_tests(scope) {
            for (subject_index, subject) in self.named_children(test_index, Level::Subject) {
                for (chapter_index, chapter) in self.named_children(subject_index, Level::Chapter)
                {
                    for (topic_index, topic) in self.named_children(chapter_index, Level::Topic) {
                        for (subtopic_index, subtopic) in
                            self.named_children(topic_index, Level::Subtopic)
                        {
                            let mut questions = self
                                .children(subtopic_index, HierarchyEdge::Contains)
                                .into_iter()
                                .filter_map(|index| match self.graph.node_weight(index) {
                                    Some(HierarchyNode::Question(fact)) => Some((index, fact)),
                                    _ => None,
                                })
                                .collect::<Vec<_>>();
                            questions.sort_by_key(|(_, fact)| fact.key.question_number);

                            for (index, fact) in questions {
                                visits.push(QuestionVisit {
                                    index,
                                    path: HierarchyPath {
                                        subject: subject.to_owned(),
                                        chapter: chapter.to_owned(),
                                        topic: topic.to_owned(),
                                        subtopic: subtopic.to_owned(),
                                    },
                                    fact,
                                });
                            }
                        }
                    }
                }
            }
        }

        visits.sort_by(|left, right| left.fact.key.cmp(&right.fact.key));
        visits
    }

    fn remove_test(&mut self, key: &TestKey) -> bool {
        let Some(test_index) = self.tests.remove(key) else {
            return false;
        };

        let mut subtree = Vec::new();
        let mut dfs = Dfs::new(&self.graph, test_index);
        while let Some(index) = dfs.next(&self.graph) {
            subtree.push(index);
        }

        for index in subtree {
            if let Some(HierarchyNode::Question(fact)) = self.graph.remove_node(index) {
                self.questions.remove(&fact.key);
            }
        }

        true
    }
}

/// In-memory property graph of the exam hierarchy.
///
/// All mutations take the write lock for their whole duration, so a cascade
/// delete is never observed half-applied.
#[derive(Debug, Default)]
pub struct GraphFactStore {
    inner: RwLock<HierarchyGraph>,
}

impl GraphFactStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HierarchyGraph>, StoreError> {
        self.inner
            .read()
            .map_err(|err| StoreError::LockPoisoned(err.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HierarchyGraph>, StoreError> {
        self.inner
            .write()
            .map_err(|err| StoreError::LockPoisoned(err.to_string()))
    }
}

impl FactStore for GraphFactStore {
    fn backend_name(&self) -> &'static str {
        "graph"
    }

    fn upsert_path(
        &self,
        fact: &QuestionFact,
        test_date: Option<&str>,
    ) -> Result<UpsertedQuestion, StoreError> {
        let mut inner = self.write()?;

        if let Some(index) = inner.questions.get(&fact.key).copied() {
            if let Some(HierarchyNode::Question(existing)) = inner.graph.node_weight_mut(index) {
                existing.opted_answer = fact.opted_answer.clone();
                existing.is_correct = fact.is_correct;
                existing.correct_answer = fact.correct_answer.clone();
                existing.question_type = fact.question_type.clone();
            }
            return Ok(UpsertedQuestion {
                key: fact.key.clone(),
                created: false,
            });
        }

        let test = inner.ensure_test(&fact.key.test, test_date);
        let subject = inner.ensure_child(test, Level::Subject, &fact.path.subject);
        let chapter = inner.ensure_child(subject, Level::Chapter, &fact.path.chapter);
        let topic = inner.ensure_child(chapter, Level::Topic, &fact.path.topic);
        let subtopic = inner.ensure_child(topic, Level::Subtopic, &fact.path.subtopic);

        let question = inner.graph.add_node(HierarchyNode::Question(fact.clone()));
        inner
            .graph
            .add_edge(subtopic, question, HierarchyEdge::Contains);
        inner.questions.insert(fact.key.clone(), question);

        Ok(UpsertedQuestion {
            key: fact.key.clone(),
            created: true,
        })
    }

    fn attach_misconception(
        &self,
        question: &QuestionKey,
        misconception: &Misconception,
    ) -> Result<bool, StoreError> {
        let mut inner = self.write()?;
        let question_index = inner
            .questions
            .get(question)
            .copied()
            .ok_or_else(|| StoreError::QuestionNotFound(question.id_material()))?;

        let id = misconception_id(question, misconception);
        let exists = inner
            .children(question_index, HierarchyEdge::HasMisconception)
            .into_iter()
            .any(|child| {
                matches!(
                    inner.graph.node_weight(child),
                    Some(HierarchyNode::Misconception { id: existing, .. }) if *existing == id
                )
            });
        if exists {
            return Ok(false);
        }

        let node = inner.graph.add_node(HierarchyNode::Misconception {
            id,
            misconception: misconception.clone(),
        });
        inner
            .graph
            .add_edge(question_index, node, HierarchyEdge::HasMisconception);
        Ok(true)
    }

    fn attach_feedback(&self, question: &QuestionKey, text: &str) -> Result<bool, StoreError> {
        let mut inner = self.write()?;
        let question_index = inner
            .questions
            .get(question)
            .copied()
            .ok_or_else(|| StoreError::QuestionNotFound(question.id_material()))?;

        let id = feedback_id(question, text);
        let exists = inner
            .children(question_index, HierarchyEdge::HasFeedback)
            .into_iter()
            .any(|child| {
                matches!(
                    inner.graph.node_weight(child),
                    Some(HierarchyNode::Feedback { id: existing, .. }) if *existing == id
                )
            });
        if exists {
            return Ok(false);
        }

        let node = inner.graph.add_node(HierarchyNode::Feedback {
            id,
            text: text.to_owned(),
        });
        inner
            .graph
            .add_edge(question_index, node, HierarchyEdge::HasFeedback);
        Ok(true)
    }

    fn delete_test(&self, test: &TestKey) -> Result<bool, StoreError> {
        let mut inner = self.write()?;
        let removed = inner.remove_test(test);
        if removed {
            tracing::debug!(
                class_id = %test.class_id,
                test_number = test.test_number,
                "removed test subtree from graph"
            );
        }
        Ok(removed)
    }

    fn delete_class(&self, class_id: &str) -> Result<u64, StoreError> {
        let class_id = normalize_class_id(class_id)?;
        let mut inner = self.write()?;
        let keys = inner
            .tests
            .keys()
            .filter(|key| key.class_id == class_id)
            .cloned()
            .collect::<Vec<_>>();

        let mut removed = 0u64;
        for key in keys {
            if inner.remove_test(&key) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn questions(&self, scope: &Scope) -> Result<Vec<QuestionFact>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .walk_questions(scope)
            .into_iter()
            .map(|visit| QuestionFact {
                path: visit.path,
                ..visit.fact.clone()
            })
            .collect())
    }

    fn test_date(&self, test: &TestKey) -> Result<Option<String>, StoreError> {
        let inner = self.read()?;
        let date = inner
            .tests
            .get(test)
            .and_then(|index| inner.graph.node_weight(*index))
            .and_then(|node| match node {
                HierarchyNode::Test { key, date } if key == test => date.clone(),
                _ => None,
            });
        Ok(date)
    }

    fn tests_taken(&self, scope: &Scope) -> Result<u64, StoreError> {
        let inner = self.read()?;
        Ok(inner.scoped_tests(scope).len() as u64)
    }

    fn tallies(&self, scope: &Scope, level: GroupLevel) -> Result<Vec<GroupTally>, StoreError> {
        let inner = self.read()?;
        let mut grouped: BTreeMap<TallyKey, (u64, u64)> = BTreeMap::new();

        for visit in inner.walk_questions(scope) {
            if !visit.fact.is_attempted() {
                continue;
            }
            let key = level.key_for(visit.fact.key.test.test_number, &visit.path);
            let entry = grouped.entry(key).or_insert((0, 0));
            if visit.fact.is_correct_attempt() {
                entry.0 += 1;
            }
            entry.1 += 1;
        }

        Ok(grouped
            .into_iter()
            .map(|(key, (correct, attempted))| GroupTally {
                key,
                correct,
                attempted,
            })
            .collect())
    }

    fn feedback_map(&self, scope: &Scope) -> Result<FeedbackMap, StoreError> {
        let inner = self.read()?;
        let mut map = FeedbackMap::new();

        for visit in inner.walk_questions(scope) {
            if !visit.fact.is_attempted() {
                continue;
            }
            for child in inner.children(visit.index, HierarchyEdge::HasFeedback) {
                if let Some(HierarchyNode::Feedback { text, .. }) = inner.graph.node_weight(child)
                {
                    let texts = map
                        .entry(visit.path.subject.clone())
                        .or_default()
                        .entry(visit.path.chapter.clone())
                        .or_default()
                        .entry(visit.path.topic.clone())
                        .or_default();
                    push_unique(texts, text.clone());
                }
            }
        }

        Ok(map)
    }

    fn misconceptions(&self, scope: &Scope) -> Result<Vec<MisconceptionFact>, StoreError> {
        let inner = self.read()?;
        let mut facts = Vec::new();

        for visit in inner.walk_questions(scope) {
            for child in inner.children(visit.index, HierarchyEdge::HasMisconception) {
                if let Some(HierarchyNode::Misconception { misconception, .. }) =
                    inner.graph.node_weight(child)
                {
                    facts.push(MisconceptionFact {
                        question: visit.fact.key.clone(),
                        path: visit.path.clone(),
                        misconception: misconception.clone(),
                    });
                }
            }
        }

        Ok(facts)
    }

    fn fact_counts(&self, scope: &Scope) -> Result<FactCounts, StoreError> {
        let inner = self.read()?;
        let mut counts = FactCounts::default();

        for (_, test_index) in inner.scoped_tests(scope) {
            let mut dfs = Dfs::new(&inner.graph, test_index);
            while let Some(index) = dfs.next(&inner.graph) {
                match inner.graph.node_weight(index) {
                    Some(HierarchyNode::Test { .. }) => counts.tests += 1,
                    Some(HierarchyNode::Subject(_)) => counts.subjects += 1,
                    Some(HierarchyNode::Chapter(_)) => counts.chapters += 1,
                    Some(HierarchyNode::Topic(_)) => counts.topics += 1,
                    Some(HierarchyNode::Subtopic(_)) => counts.subtopics += 1,
                    Some(HierarchyNode::Question(_)) => counts.questions += 1,
                    Some(HierarchyNode::Misconception { .. }) => counts.misconceptions += 1,
                    Some(HierarchyNode::Feedback { .. }) => counts.feedback += 1,
                    None => {}
                }
            }
        }

        Ok(counts)
    }
}
