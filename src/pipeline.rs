//! Session Orchestrator
//!
//! Runs one user request end to end, strictly in source order:
//!
//! ```text
//! acquire ──▶ decode ──▶ load ──▶ (per store) query agent ──▶ answer
//! ```
//!
//! Every failure is turned into a [`SessionEvent::Notice`] and the affected file
//! or store is dropped; the session always runs to [`SessionEvent::Done`]. The
//! session workspace is removed before `Done` is sent, on every path.

use std::path::{Path, PathBuf};

use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use crate::agents::{run_query, AgentSettings, AgentStep};
use crate::config::Config;
use crate::decode::{self, DecodedTable};
use crate::llm::LLM;
use crate::sources::{self, Acquisition, OriginKind, SourceDescriptor, UploadedFile};
use crate::store::{self, SessionWorkspace};
use crate::types::{AppError, AppResult, Notice};

/// Where the files for a session come from
#[derive(Debug, Clone)]
pub enum SourceRequest {
    Upload(Vec<UploadedFile>),
    Folder(PathBuf),
    UrlList(String),
    FixedRemote,
}

#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub api_key: Option<String>,
    pub source: SourceRequest,
    pub question: String,
}

impl SessionRequest {
    pub fn source_kind(&self) -> OriginKind {
        match self.source {
            SourceRequest::Upload(_) => OriginKind::Upload,
            SourceRequest::Folder(_) => OriginKind::Folder,
            SourceRequest::UrlList(_) => OriginKind::UrlList,
            SourceRequest::FixedRemote => OriginKind::FixedRemote,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Notice(Notice),
    Loaded {
        file_name: String,
        table: String,
        store: String,
        rows: usize,
        columns: Vec<String>,
    },
    Step {
        table: String,
        step: AgentStep,
    },
    Answer {
        table: String,
        answer: String,
        stopped_early: bool,
    },
    Done {
        loaded: usize,
        answered: usize,
    },
}

impl SessionEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Notice(_) => "notice",
            SessionEvent::Loaded { .. } => "loaded",
            SessionEvent::Step { .. } => "step",
            SessionEvent::Answer { .. } => "answer",
            SessionEvent::Done { .. } => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub loaded: usize,
    pub answered: usize,
}

/// A store created during this session
#[derive(Debug, Clone)]
struct LoadedStore {
    table: String,
    path: PathBuf,
}

fn emit(events: &UnboundedSender<SessionEvent>, event: SessionEvent) {
    // A closed receiver means the client went away; the session still finishes and cleans up
    let _ = events.send(event);
}

fn emit_notices(events: &UnboundedSender<SessionEvent>, notices: Vec<Notice>) {
    for notice in notices {
        emit(events, SessionEvent::Notice(notice));
    }
}

pub struct SessionRunner {
    config: Config,
    http: Client,
    llm: Option<LLM>,
}

impl SessionRunner {
    pub fn new(config: Config, http: Client) -> Self {
        Self { config, http, llm: None }
    }

    /// Use this model handle instead of building one from the request's key
    pub fn with_llm(mut self, llm: LLM) -> Self {
        self.llm = Some(llm);
        self
    }

    async fn acquire(&self, source: SourceRequest) -> Acquisition {
        match source {
            SourceRequest::Upload(files) => sources::from_uploads(files),
            SourceRequest::Folder(path) => match sources::scan_folder(&path).await {
                Ok(acquisition) => acquisition,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Folder scan failed");
                    Acquisition {
                        descriptors: Vec::new(),
                        notices: vec![Notice::from(&e)],
                    }
                }
            },
            SourceRequest::UrlList(urls) => sources::fetch_url_list(&self.http, &urls).await,
            SourceRequest::FixedRemote => sources::fetch_fixed_remote(&self.http, &self.config.remote).await,
        }
    }

    async fn decode_off_thread(descriptor: &SourceDescriptor, scratch_dir: &Path) -> AppResult<DecodedTable> {
        let owned = descriptor.clone();
        let scratch_dir = scratch_dir.to_path_buf();
        tokio::task::spawn_blocking(move || decode::decode(&owned, &scratch_dir))
            .await
            .map_err(|e| AppError::decode(descriptor.file_name.clone(), e))?
    }

    async fn load_all(
        &self,
        descriptors: &[SourceDescriptor],
        workspace: &SessionWorkspace,
        events: &UnboundedSender<SessionEvent>,
    ) -> Vec<LoadedStore> {
        let mut stores: Vec<LoadedStore> = Vec::new();

        for descriptor in descriptors {
            let table = match Self::decode_off_thread(descriptor, workspace.path()).await {
                Ok(table) => table,
                Err(e) => {
                    error!(file = %descriptor.file_name, error = %e, "Error processing file");
                    emit(
                        events,
                        SessionEvent::Notice(Notice::error(format!(
                            "Error processing {}: {}",
                            descriptor.file_name, e
                        ))),
                    );
                    continue;
                }
            };

            let table_name = descriptor.base_name().to_string();
            let mut path = workspace.store_path(descriptor);
            let mut attempt = 1;
            while stores.iter().any(|s| s.path == path && s.table != table_name) {
                attempt += 1;
                path = workspace.numbered_store_path(descriptor, attempt);
            }
            let mut notices = Vec::new();
            let loaded = store::load_table(&table, &path, &table_name, &mut notices).await;
            emit_notices(events, notices);
            if !loaded {
                continue;
            }

            // Same path now implies same table name, so the load replaced it
            if stores.iter().any(|s| s.path == path) {
                emit(
                    events,
                    SessionEvent::Notice(Notice::info(format!(
                        "{} replaced the earlier table {}",
                        descriptor.file_name, table_name
                    ))),
                );
                stores.retain(|s| s.path != path);
            }
            stores.push(LoadedStore {
                table: table_name.clone(),
                path: path.clone(),
            });

            emit(
                events,
                SessionEvent::Loaded {
                    file_name: descriptor.file_name.clone(),
                    table: table_name,
                    store: path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    rows: table.row_count(),
                    columns: table.column_names().into_iter().map(str::to_string).collect(),
                },
            );
        }

        stores
    }

    fn resolve_llm(&self, api_key: Option<&str>) -> AppResult<LLM> {
        if let Some(llm) = &self.llm {
            return Ok(llm.clone());
        }
        let key = self.config.llm.resolve_api_key(api_key).ok_or_else(|| {
            AppError::AgentConstruction("Please enter your OpenAI API key.".to_string())
        })?;
        LLM::from_config(&self.config.llm, key)
    }

    async fn query_all(
        &self,
        stores: &[LoadedStore],
        question: &str,
        llm: &LLM,
        events: &UnboundedSender<SessionEvent>,
    ) -> usize {
        let settings = AgentSettings::from_config(&self.config.llm, &self.config.agent);
        let mut answered = 0;

        for store in stores {
            info!(table = %store.table, "Querying store");
            let on_step = |step: &AgentStep| {
                emit(
                    events,
                    SessionEvent::Step {
                        table: store.table.clone(),
                        step: step.clone(),
                    },
                )
            };

            match run_query(&store.path, question, llm.clone(), settings.clone(), on_step).await {
                Ok(outcome) => {
                    answered += 1;
                    emit(
                        events,
                        SessionEvent::Answer {
                            table: store.table.clone(),
                            answer: outcome.answer,
                            stopped_early: outcome.stopped_early,
                        },
                    );
                }
                Err(e) => {
                    error!(table = %store.table, error = %e, "Error querying database");
                    emit(
                        events,
                        SessionEvent::Notice(Notice::error(format!(
                            "Error querying {}: {}",
                            store.table, e
                        ))),
                    );
                }
            }
        }

        answered
    }

    /// Run a whole session, streaming progress to `events`.
    pub async fn run(&self, request: SessionRequest, events: UnboundedSender<SessionEvent>) -> SessionSummary {
        let summary = self.run_inner(request, &events).await;
        info!(loaded = summary.loaded, answered = summary.answered, "Session finished");
        emit(
            &events,
            SessionEvent::Done {
                loaded: summary.loaded,
                answered: summary.answered,
            },
        );
        summary
    }

    async fn run_inner(&self, request: SessionRequest, events: &UnboundedSender<SessionEvent>) -> SessionSummary {
        let mut summary = SessionSummary::default();

        let acquisition = self.acquire(request.source).await;
        let descriptors = acquisition.descriptors;
        emit_notices(events, acquisition.notices);
        if descriptors.is_empty() {
            return summary;
        }

        let workspace = match SessionWorkspace::create(&self.config.storage.work_dir) {
            Ok(workspace) => workspace,
            Err(e) => {
                error!(error = %e, "Could not create session workspace");
                emit(events, SessionEvent::Notice(Notice::from(&e)));
                return summary;
            }
        };
        info!(session = %workspace.id(), files = descriptors.len(), "Session started");

        let stores = self.load_all(&descriptors, &workspace, events).await;
        summary.loaded = stores.len();

        let question = request.question.trim();
        if stores.is_empty() {
            // nothing to ask
        } else if question.is_empty() {
            emit(
                events,
                SessionEvent::Notice(Notice::warning("Enter a question to query the loaded data.")),
            );
        } else {
            match self.resolve_llm(request.api_key.as_deref()) {
                Ok(llm) => summary.answered = self.query_all(&stores, question, &llm, events).await,
                Err(e) => emit(events, SessionEvent::Notice(Notice::from(&e))),
            }
        }

        let session = workspace.id();
        if let Err(e) = workspace.close() {
            warn!(session = %session, error = %e, "Failed to remove session workspace");
        }
        summary
    }
}
