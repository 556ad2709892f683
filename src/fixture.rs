//! Rehearsal site.
//!
//! A JSON file describes one or more courses and their tasks; `FixtureSite`
//! plays every external collaborator against it. The current location and
//! the in-page state are written to `.waypoint/site-state.json` after every
//! change, so a transition really does survive the end of the process and the
//! next `waypoint recover` picks up where the site was left.
//!
//! ```json
//! {
//!   "courses": [
//!     {
//!       "name": "Rivers 101",
//!       "tasks": [
//!         {
//!           "title": "Week 1 Quiz",
//!           "locator": "/learn/rivers/quiz/w1",
//!           "text": "Graded Quiz",
//!           "steps": [[{ "text": "Longest river?", "options": ["Nile", "Thames"], "answer": [0] }]]
//!         }
//!       ]
//!     }
//!   ]
//! }
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::collaborators::{
    AnswerChoice, AnswerService, ContentExtractor, Instructions, Navigator, Question,
    SubmissionChannels, TaskPage, View,
};
use crate::errors::ServiceError;
use crate::executor::artifact::Artifact;
use crate::task::{RawTaskDescriptor, task_id};

pub const SITE_STATE_FILE: &str = "site-state.json";
pub const DOWNLOADS_DIR: &str = "downloads";

/// Parsed site description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteFile {
    pub courses: Vec<CourseEntry>,
    #[serde(default)]
    pub answer_service: AnswerServiceEntry,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourseEntry {
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
    /// When set, reading the task list fails with this message
    #[serde(default)]
    pub discovery_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskEntry {
    pub title: String,
    #[serde(default)]
    pub locator: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub grade: Option<String>,
    /// Quiz steps, each a list of questions
    #[serde(default)]
    pub steps: Vec<Vec<QuestionEntry>>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub rubric: Option<String>,
    #[serde(default)]
    pub channels: SubmissionChannels,
    /// Transitions to this task never land
    #[serde(default)]
    pub unreachable: bool,
    #[serde(default = "default_true")]
    pub submit_control: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionEntry {
    pub text: String,
    pub options: Vec<String>,
    /// Option indices the rehearsal answer service picks
    #[serde(default)]
    pub answer: Vec<usize>,
    #[serde(default)]
    pub multi_select: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerServiceEntry {
    #[serde(default = "default_true")]
    pub configured: bool,
    #[serde(default = "default_response")]
    pub response: String,
}

fn default_true() -> bool {
    true
}

fn default_response() -> String {
    "This response addresses each point raised in the instructions in turn.".to_string()
}

impl Default for AnswerServiceEntry {
    fn default() -> Self {
        Self {
            configured: true,
            response: default_response(),
        }
    }
}

impl SiteFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read site file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse site file: {}", path.display()))
    }
}

/// Where the rehearsal browser is and what has happened on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteState {
    pub course: usize,
    pub view: View,
    /// Current quiz step on the open task
    #[serde(default)]
    pub step: usize,
    /// Questions answered on the current step
    #[serde(default)]
    pub answered: BTreeSet<usize>,
    /// Every page action, in order
    #[serde(default)]
    pub events: Vec<String>,
}

impl Default for SiteState {
    fn default() -> Self {
        Self {
            course: 0,
            view: View::Discovery,
            step: 0,
            answered: BTreeSet::new(),
            events: Vec::new(),
        }
    }
}

impl SiteState {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read site state: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse site state: {}", path.display()))
    }
}

/// Every collaborator, played against a `SiteFile`.
pub struct FixtureSite {
    site: SiteFile,
    state: Mutex<SiteState>,
    state_path: PathBuf,
    downloads_dir: PathBuf,
}

impl FixtureSite {
    /// Open `site_path`, restoring the location persisted under
    /// `waypoint_dir`.
    pub fn open(site_path: &Path, waypoint_dir: &Path) -> Result<Self> {
        let site = SiteFile::load(site_path)?;
        Self::with_site(site, waypoint_dir)
    }

    pub fn with_site(site: SiteFile, waypoint_dir: &Path) -> Result<Self> {
        let state_path = waypoint_dir.join(SITE_STATE_FILE);
        let state = SiteState::load(&state_path)?;
        Ok(Self {
            site,
            state: Mutex::new(state),
            state_path,
            downloads_dir: waypoint_dir.join(DOWNLOADS_DIR),
        })
    }

    pub fn state(&self) -> Result<SiteState> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SiteState>> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("site state lock poisoned"))
    }

    /// Apply `change` to the state and write it out.
    fn update<T>(&self, change: impl FnOnce(&mut SiteState) -> T) -> Result<T> {
        let mut state = self.lock()?;
        let result = change(&mut state);

        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&*state).context("Failed to serialize site state")?;
        std::fs::write(&self.state_path, json)
            .with_context(|| format!("Failed to write site state: {}", self.state_path.display()))?;
        Ok(result)
    }

    fn course(&self, state: &SiteState) -> Result<&CourseEntry> {
        self.site
            .courses
            .get(state.course)
            .with_context(|| format!("Site has no course {}", state.course))
    }

    fn find_task(&self, state: &SiteState, locator: &str) -> Option<&TaskEntry> {
        let id = task_id(locator);
        self.course(state).ok()?.tasks.iter().find(|task| {
            task.locator
                .as_deref()
                .is_some_and(|l| task_id(l) == id)
        })
    }

    /// The task whose page is open.
    fn open_task(&self, state: &SiteState) -> Result<(String, TaskEntry)> {
        let View::Task(locator) = &state.view else {
            anyhow::bail!("No task page is open");
        };
        let task = self
            .find_task(state, locator)
            .with_context(|| format!("Unknown task page: {}", locator))?;
        Ok((locator.clone(), task.clone()))
    }

    fn question_entry(&self, question_text: &str) -> Result<Option<QuestionEntry>> {
        let state = self.lock()?;
        let Ok((_, task)) = self.open_task(&state) else {
            return Ok(None);
        };
        Ok(task
            .steps
            .iter()
            .flatten()
            .find(|q| q.text == question_text)
            .cloned())
    }
}

#[async_trait]
impl Navigator for FixtureSite {
    async fn current_view(&self) -> Result<View> {
        Ok(self.lock()?.view.clone())
    }

    async fn transition_to(&self, locator: &str) -> Result<()> {
        let unreachable = {
            let state = self.lock()?;
            self.find_task(&state, locator).is_none_or(|task| task.unreachable)
        };

        self.update(|state| {
            if unreachable {
                state.events.push(format!("unreachable {}", locator));
            } else {
                state.view = View::Task(locator.to_string());
                state.step = 0;
                state.answered.clear();
                state.events.push(format!("open {}", locator));
            }
        })
    }

    async fn transition_to_discovery_view(&self) -> Result<()> {
        self.update(|state| {
            state.view = View::Discovery;
            state.events.push("open discovery".to_string());
        })
    }

    async fn transition_to_next_course(&self) -> Result<bool> {
        let courses = self.site.courses.len();
        self.update(|state| {
            if state.course + 1 >= courses {
                return false;
            }
            state.course += 1;
            state.view = View::Discovery;
            state.events.push(format!("open course {}", state.course));
            true
        })
    }
}

#[async_trait]
impl ContentExtractor for FixtureSite {
    async fn discover(&self) -> Result<Vec<RawTaskDescriptor>> {
        let state = self.lock()?;
        let course = self.course(&state)?;
        if let Some(message) = &course.discovery_error {
            anyhow::bail!("{}", message);
        }

        Ok(course
            .tasks
            .iter()
            .map(|task| RawTaskDescriptor {
                title: task.title.clone(),
                locator: task.locator.clone(),
                text: task.text.clone(),
                grade_text: task.grade.clone(),
            })
            .collect())
    }

    async fn extract_instructions(&self) -> Result<Instructions> {
        let state = self.lock()?;
        let (_, task) = self.open_task(&state)?;
        Ok(Instructions {
            text: task.instructions,
            rubric: task.rubric,
        })
    }
}

#[async_trait]
impl TaskPage for FixtureSite {
    async fn unanswered_questions(&self) -> Result<Vec<Question>> {
        let state = self.lock()?;
        let (_, task) = self.open_task(&state)?;
        let Some(step) = task.steps.get(state.step) else {
            return Ok(Vec::new());
        };

        Ok(step
            .iter()
            .enumerate()
            .filter(|(index, _)| !state.answered.contains(index))
            .map(|(index, q)| Question {
                index,
                text: q.text.clone(),
                options: q.options.clone(),
                multi_select: q.multi_select,
            })
            .collect())
    }

    async fn select_answers(&self, question: &Question, indices: &[usize]) -> Result<()> {
        let locator = self.open_task(&*self.lock()?)?.0;
        self.update(|state| {
            state.answered.insert(question.index);
            state.events.push(format!(
                "select {} step{} q{} {:?}",
                locator, state.step, question.index, indices
            ));
        })
    }

    async fn advance(&self) -> Result<bool> {
        let steps = self.open_task(&*self.lock()?)?.1.steps.len();
        self.update(|state| {
            if state.step + 1 >= steps {
                return false;
            }
            state.step += 1;
            state.answered.clear();
            true
        })
    }

    async fn submit(&self) -> Result<bool> {
        let (locator, task) = self.open_task(&*self.lock()?)?;
        if !task.submit_control {
            return Ok(false);
        }
        self.update(|state| {
            state.events.push(format!("submit {}", locator));
            true
        })
    }

    async fn submission_channels(&self) -> Result<SubmissionChannels> {
        Ok(self.open_task(&*self.lock()?)?.1.channels)
    }

    async fn enter_text(&self, text: &str) -> Result<bool> {
        let (locator, task) = self.open_task(&*self.lock()?)?;
        if !task.channels.text_entry {
            return Ok(false);
        }
        self.update(|state| {
            state
                .events
                .push(format!("text {} {} chars", locator, text.chars().count()));
            true
        })
    }

    async fn upload(&self, artifact: &Artifact) -> Result<bool> {
        let (locator, task) = self.open_task(&*self.lock()?)?;
        if !task.channels.file_upload {
            return Ok(false);
        }
        self.update(|state| {
            state
                .events
                .push(format!(
                    "upload {} {} ({})",
                    locator,
                    artifact.file_name,
                    artifact.format.mime_type()
                ));
            true
        })
    }

    async fn offer_download(&self, artifact: &Artifact) -> Result<()> {
        std::fs::create_dir_all(&self.downloads_dir)
            .with_context(|| format!("Failed to create {}", self.downloads_dir.display()))?;
        let path = self.downloads_dir.join(&artifact.file_name);
        std::fs::write(&path, &artifact.content)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        self.update(|state| {
            state.events.push(format!("download {}", artifact.file_name));
        })
    }
}

#[async_trait]
impl AnswerService for FixtureSite {
    async fn answer_question(&self, question: &Question) -> Result<AnswerChoice, ServiceError> {
        if !self.site.answer_service.configured {
            return Err(ServiceError::CredentialMissing("rehearsal answer service".into()));
        }
        let entry = self
            .question_entry(&question.text)
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(AnswerChoice {
            selected: entry
                .map(|q| q.answer)
                .filter(|answer| !answer.is_empty())
                .unwrap_or_else(|| vec![0]),
            confidence: 100,
            explanation: String::new(),
        })
    }

    async fn generate_text(&self, _prompt: &str) -> Result<String, ServiceError> {
        if !self.site.answer_service.configured {
            return Err(ServiceError::CredentialMissing("rehearsal answer service".into()));
        }
        Ok(self.site.answer_service.response.clone())
    }
}
