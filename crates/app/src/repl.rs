use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use querent_api::{AuthBackend, Credentials, DataSourceConfig};
use querent_session::{
    ActiveSession, CacheEvent, ChatMessage, ChatSession, DataSourceDirectory, DirectQueryRunner,
    MessageHandler, SendOutcome, SessionCache, SessionRef, Sender, SwitchOutcome, latest_results,
    rows_to_csv,
};
use snafu::{OptionExt, ResultExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use super::command::{Command, HELP};
use super::error::{
    AppResult, LoginSnafu, NoDataSourceSelectedSnafu, NothingToExportSnafu, ReadInputSnafu,
    SessionSnafu, WriteExportSnafu,
};
use super::settings::SettingsStore;

/// Tracks how much of the open chat has been printed.
#[derive(Debug, Default)]
struct Transcript {
    session: Option<SessionRef>,
    shown: usize,
}

impl Transcript {
    /// Messages not yet printed; a different session starts from the top.
    fn unseen(&mut self, active: Option<&ActiveSession>) -> Vec<ChatMessage> {
        let Some(active) = active else {
            self.session = None;
            self.shown = 0;
            return Vec::new();
        };
        let session = active.session_ref();
        if self.session != Some(session) {
            self.session = Some(session);
            self.shown = 0;
        }
        let unseen = active.messages().iter().skip(self.shown).cloned().collect();
        self.shown = active.messages().len();
        unseen
    }

    /// Keeps the printed position when a pending chat is committed under a server id.
    fn follow(&mut self, session: SessionRef) {
        self.session = Some(session);
    }
}

pub struct Repl {
    settings: Arc<SettingsStore>,
    auth: Arc<dyn AuthBackend>,
    directory: Arc<DataSourceDirectory>,
    cache: Arc<SessionCache>,
    handler: MessageHandler,
    direct: DirectQueryRunner,
    transcript: Transcript,
    last_direct: Option<ChatMessage>,
}

impl Repl {
    pub fn new(
        settings: Arc<SettingsStore>,
        auth: Arc<dyn AuthBackend>,
        directory: Arc<DataSourceDirectory>,
        handler: MessageHandler,
        direct: DirectQueryRunner,
    ) -> Self {
        let cache = handler.cache().clone();
        Self {
            settings,
            auth,
            directory,
            cache,
            handler,
            direct,
            transcript: Transcript::default(),
            last_direct: None,
        }
    }

    /// Loads data sources and the chats of the preferred one.
    pub async fn bootstrap(&mut self, preferred: Option<querent_api::DataSourceId>) {
        self.directory.refresh().await;
        if let Some(data_source_id) = preferred {
            if let Err(error) = self.directory.select(data_source_id).await {
                tracing::warn!(data_source_id = %data_source_id, error = %error, "preferred data source unavailable");
            }
        }

        match self.directory.selected().await {
            Some(source) => {
                println!("Using data source {}", format_source(&source));
                self.cache.load_sessions(source.id).await;
            }
            None => println!("No data sources available yet."),
        }
        self.print_banners().await;
    }

    pub async fn run(&mut self) -> AppResult<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("Type a question, or /help for commands.");

        loop {
            prompt();
            let Some(line) = lines.next_line().await.context(ReadInputSnafu {
                stage: "read-command-line",
            })?
            else {
                break;
            };

            let command = match Command::parse(&line) {
                Ok(command) => command,
                Err(error) => {
                    println!("{error}");
                    continue;
                }
            };
            if command == Command::Quit {
                break;
            }
            if let Err(error) = self.execute(command).await {
                println!("{error}");
            }
            self.print_banners().await;
        }
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> AppResult<()> {
        match command {
            Command::Empty | Command::Quit => {}
            Command::Help => println!("{HELP}"),
            Command::Sources => self.list_sources().await,
            Command::Use(data_source_id) => {
                let source = self
                    .directory
                    .select(data_source_id)
                    .await
                    .context(SessionSnafu { stage: "use-data-source" })?;
                println!("Using data source {}", format_source(&source));
                self.remember_data_source(&source);
                self.cache.load_sessions(source.id).await;
                self.list_sessions().await;
            }
            Command::Sessions => self.list_sessions().await,
            Command::Switch(session_id) => {
                match self.cache.switch_session(session_id).await {
                    SwitchOutcome::UnknownSession => println!("No chat {session_id} for this data source."),
                    SwitchOutcome::AlreadyLoading => println!("Chat {session_id} is still loading."),
                    SwitchOutcome::Applied | SwitchOutcome::Superseded | SwitchOutcome::Failed => {}
                }
                self.print_unseen().await;
            }
            Command::New => {
                self.cache.start_new_chat().await;
                self.transcript = Transcript::default();
                println!("New chat. Your next question starts it.");
            }
            Command::Delete(session_id) => {
                self.cache.delete_session(session_id).await;
                if self.cache.session(session_id).await.is_none() {
                    println!("Deleted chat {session_id}.");
                }
            }
            Command::Retry => {
                let outcome = self
                    .handler
                    .retry_last()
                    .await
                    .context(SessionSnafu { stage: "retry-question" })?;
                self.after_send(outcome).await;
            }
            Command::Direct(question) => self.run_direct(&question).await?,
            Command::Test => {
                let source = self.require_source().await?;
                self.directory
                    .test_connection(source.id)
                    .await
                    .context(SessionSnafu { stage: "test-connection" })?;
                println!("Connection to {} succeeded.", source.name);
            }
            Command::Create(input) => {
                let name = input.name.clone();
                self.directory
                    .create(input)
                    .await
                    .context(SessionSnafu { stage: "create-data-source" })?;
                println!("Created data source {name}.");
                self.list_sources().await;
            }
            Command::Login { username, password } => self.login(username, password).await?,
            Command::Export(path) => self.export(&path).await?,
            Command::Show => {
                self.transcript = Transcript::default();
                match self.cache.active_session().await {
                    Some(active) => println!("# {}", active.title()),
                    None => println!("No chat is open."),
                }
                self.print_unseen().await;
            }
            Command::Ask(question) => {
                let data_source_id = self.directory.selected_id().await;
                let outcome = self
                    .handler
                    .send_message(data_source_id, &question)
                    .await
                    .context(SessionSnafu { stage: "send-question" })?;
                self.after_send(outcome).await;
            }
        }
        Ok(())
    }

    async fn after_send(&mut self, outcome: SendOutcome) {
        if let SendOutcome::SessionCreated { session_id, .. } = &outcome {
            self.transcript.follow(SessionRef::Committed(*session_id));
        }
        self.print_unseen().await;
        if let SendOutcome::Failed { .. } = outcome {
            println!("(use /retry to resend)");
        }
    }

    async fn run_direct(&mut self, question: &str) -> AppResult<()> {
        let selected = self.require_source().await?;
        let source = self
            .directory
            .details(selected.id)
            .await
            .context(SessionSnafu { stage: "direct-data-source" })?;
        let reply = self
            .direct
            .run(question, &source)
            .await
            .context(SessionSnafu { stage: "direct-query" })?;
        println!("{}", format_message(&reply));
        self.last_direct = Some(reply);
        Ok(())
    }

    async fn login(&mut self, username: String, password: String) -> AppResult<()> {
        let token = self
            .auth
            .login(Credentials::new(username.as_str(), password))
            .await
            .context(LoginSnafu { stage: "login" })?;

        let mut settings = (*self.settings.settings()).clone();
        settings.backend.access_token = Some(token.token);
        if let Err(error) = self.settings.update(settings) {
            tracing::warn!(error = %error, "failed to remember access token");
        }
        println!("Signed in as {username}.");

        let selected = self.directory.selected_id().await;
        self.bootstrap(selected).await;
        Ok(())
    }

    /// Writes the newest result rows of the open chat, or of the last direct query when no chat is open.
    async fn export(&self, path: &Path) -> AppResult<()> {
        let active = self.cache.active_session().await;
        let (rows, csv) = export_csv(active.as_ref(), self.last_direct.as_ref())
            .context(NothingToExportSnafu { stage: "export-results" })?;

        std::fs::write(path, csv).context(WriteExportSnafu {
            stage: "export-results",
            path: path.to_path_buf(),
        })?;
        println!("Wrote {rows} rows to {}.", path.display());
        Ok(())
    }

    async fn require_source(&self) -> AppResult<DataSourceConfig> {
        self.directory
            .selected()
            .await
            .context(NoDataSourceSelectedSnafu {
                stage: "require-data-source",
            })
    }

    fn remember_data_source(&self, source: &DataSourceConfig) {
        let mut settings = (*self.settings.settings()).clone();
        if settings.default_data_source == Some(source.id) {
            return;
        }
        settings.default_data_source = Some(source.id);
        if let Err(error) = self.settings.update(settings) {
            tracing::warn!(error = %error, "failed to remember data source");
        }
    }

    async fn list_sources(&self) {
        let selected = self.directory.selected_id().await;
        let sources = self.directory.sources().await;
        if sources.is_empty() {
            println!("No data sources.");
        }
        for source in sources {
            let marker = if Some(source.id) == selected { '*' } else { ' ' };
            println!("{marker} {}", format_source(&source));
        }
    }

    async fn list_sessions(&self) {
        let active = self
            .cache
            .active_session()
            .await
            .and_then(|active| active.committed_id());
        let sessions = self.cache.sessions().await;
        if sessions.is_empty() {
            println!("No chats yet.");
        }
        for session in sessions {
            println!("{}", format_session(&session, Some(session.id) == active));
        }
    }

    async fn print_unseen(&mut self) {
        let active = self.cache.active_session().await;
        for message in self.transcript.unseen(active.as_ref()) {
            println!("{}", format_message(&message));
        }
    }

    async fn print_banners(&self) {
        if let Some(error) = self.cache.error().await {
            println!("! {error}");
            self.cache.dismiss_error().await;
        }
        if let Some(error) = self.directory.error().await {
            println!("! {error}");
            self.directory.dismiss_error().await;
        }
    }
}

/// Mirrors cache notifications into the debug log.
pub async fn trace_cache_events(mut events: broadcast::Receiver<CacheEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => tracing::debug!(event = ?event, "cache event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "cache event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Row count and CSV text of the rows `/export` would write.
fn export_csv(
    active: Option<&ActiveSession>,
    last_direct: Option<&ChatMessage>,
) -> Option<(usize, String)> {
    let metadata = match active {
        Some(active) => latest_results(active.messages()),
        None => last_direct.and_then(|reply| latest_results(std::slice::from_ref(reply))),
    }?;
    rows_to_csv(&metadata.results).map(|csv| (metadata.row_count, csv))
}

fn prompt() {
    print!("> ");
    // A failed flush only delays the prompt.
    let _ = std::io::stdout().flush();
}

fn format_source(source: &DataSourceConfig) -> String {
    format!(
        "{}  {} ({} {})",
        source.id,
        source.name,
        source.database_type.driver_name(),
        source.address()
    )
}

fn format_session(session: &ChatSession, active: bool) -> String {
    let marker = if active { '*' } else { ' ' };
    let count = session.message_count();
    let unit = if count == 1 { "message" } else { "messages" };
    format!(
        "{marker} {}  {}  ({count} {unit}, {})",
        session.id,
        session.title,
        session.last_activity.format("%Y-%m-%d %H:%M")
    )
}

fn format_message(message: &ChatMessage) -> String {
    match message.sender {
        Sender::User => format!("you> {}", message.body),
        Sender::Bot => format!("querent>\n{}\n", message.body),
    }
}
