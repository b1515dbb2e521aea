use crate::error::{AssistError, SearchError};
use crate::history::reconstruct_turns;
use crate::index::{IndexManager, DEFAULT_TOP_K};
use crate::llm::{with_deadline, CompletionRequest, LanguageModel};
use crate::models::{Document, Message, NewMessage, Role, ScoredPassage, Session, Turn};
use crate::store::{ConversationStore, DocumentStore};
use chrono::Utc;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_FALLBACK_ANSWER: &str =
    "Sorry, question answering is not available for this document right now.";
pub const DEFAULT_SESSION_TITLE: &str = "Chat Session";

const ANSWER_SYSTEM_PROMPT: &str = "Use the context below to answer the user's final question. \
If you don't know the answer, say that you don't know instead of making one up. \
Keep the answer as short and to the point as possible.";

const TITLE_SYSTEM_PROMPT: &str = "You are a helpful assistant that generates a very short, \
concise title (3-7 words) for a given user query or statement. The title should capture the \
main topic of the query. Respond only with the title itself, nothing else.";

#[derive(Debug, Clone)]
pub struct ConversationSettings {
    pub top_k: usize,
    pub fallback_answer: String,
    pub default_title: String,
    pub answer_temperature: f32,
    pub answer_max_tokens: Option<u32>,
    pub title_temperature: f32,
    pub title_max_tokens: u32,
    pub model_timeout: Duration,
    pub title_timeout: Duration,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            fallback_answer: DEFAULT_FALLBACK_ANSWER.to_string(),
            default_title: DEFAULT_SESSION_TITLE.to_string(),
            answer_temperature: 0.7,
            answer_max_tokens: None,
            title_temperature: 0.3,
            title_max_tokens: 20,
            model_timeout: Duration::from_secs(60),
            title_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub session: Session,
    pub question: Message,
    pub answer: Message,
    /// False when the fallback answer was recorded instead of a model answer.
    pub grounded: bool,
    /// The fallback was caused by the model or embedding service being unreachable.
    pub upstream_failure: bool,
    pub passages: Vec<ScoredPassage>,
}

/// Answers questions about one document per session, grounding each answer in the
/// document's own index and the session's earlier turns.
pub struct ConversationOrchestrator {
    documents: Arc<dyn DocumentStore>,
    conversations: Arc<dyn ConversationStore>,
    index: Arc<IndexManager>,
    model: Arc<dyn LanguageModel>,
    title_model: Option<Arc<dyn LanguageModel>>,
    settings: ConversationSettings,
}

impl ConversationOrchestrator {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        conversations: Arc<dyn ConversationStore>,
        index: Arc<IndexManager>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            documents,
            conversations,
            index,
            model,
            title_model: None,
            settings: ConversationSettings::default(),
        }
    }

    pub fn with_title_model(mut self, title_model: Arc<dyn LanguageModel>) -> Self {
        self.title_model = Some(title_model);
        self
    }

    pub fn with_settings(mut self, settings: ConversationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Session identifiers are handed out before any row exists.
    pub fn new_session_id(&self) -> Uuid {
        Uuid::new_v4()
    }

    pub async fn ask(
        &self,
        user_id: &str,
        document_id: Uuid,
        session_id: Uuid,
        question: &str,
    ) -> Result<AskOutcome, AssistError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AssistError::InvalidArgument("question is empty".to_string()));
        }

        let document = self.owned_document(user_id, document_id).await?;
        let (existing, prior) = match self.conversations.get_session(session_id).await? {
            Some(session) => {
                check_session(&session, user_id, document_id)?;
                let prior = self.conversations.list_messages(session_id).await?;
                (Some(session), prior)
            }
            None => (None, Vec::new()),
        };
        let history = reconstruct_turns(&prior);

        let mut question_message = NewMessage {
            session_id,
            role: Role::User,
            content: question.to_string(),
            timestamp: Utc::now(),
        };
        let (session, question_message) = match existing {
            Some(session) => {
                let stored = self.conversations.append_message(question_message).await?;
                (session, stored)
            }
            None => {
                let mut session = self
                    .new_session(user_id, document_id, session_id, question)
                    .await;
                question_message.timestamp = session.created_at;
                let stored = self
                    .conversations
                    .open_session(&session, question_message)
                    .await?;
                session.updated_at = session.updated_at.max(stored.timestamp);
                info!(session_id = %session_id, title = %session.title, "session created");
                (session, stored)
            }
        };

        let mut upstream_failure = false;
        let (answer, grounded, passages) = match self.answer(&document, &history, question).await {
            Ok((answer, passages)) => (answer, true, passages),
            Err(error) => {
                upstream_failure = error.is_upstream();
                warn!(
                    document_id = %document_id,
                    session_id = %session_id,
                    error = %error,
                    upstream = upstream_failure,
                    "answering failed, recording fallback"
                );
                (self.settings.fallback_answer.clone(), false, Vec::new())
            }
        };

        let answer_message = self
            .conversations
            .append_message(NewMessage {
                session_id,
                role: Role::Assistant,
                content: answer,
                timestamp: Utc::now(),
            })
            .await?;

        info!(
            session_id = %session_id,
            turns = history.len() + 1,
            grounded,
            "turn recorded"
        );

        Ok(AskOutcome {
            session,
            question: question_message,
            answer: answer_message,
            grounded,
            upstream_failure,
            passages,
        })
    }

    async fn answer(
        &self,
        document: &Document,
        history: &[Turn],
        question: &str,
    ) -> Result<(String, Vec<ScoredPassage>), SearchError> {
        let handle = match (&document.index_handle, document.processed) {
            (Some(handle), true) => handle,
            _ => {
                return Err(SearchError::IndexNotFound(format!(
                    "document {} is not processed yet",
                    document.document_id
                )))
            }
        };

        let passages = self
            .index
            .retrieve(handle, question, self.settings.top_k)
            .await?;

        let mut request = CompletionRequest::new(
            ANSWER_SYSTEM_PROMPT,
            build_answer_prompt(&passages, history, question),
        )
        .with_temperature(self.settings.answer_temperature);
        if let Some(max_tokens) = self.settings.answer_max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        let answer = with_deadline(
            self.settings.model_timeout,
            self.model.complete(&request),
            SearchError::ModelUnavailable,
        )
        .await?;

        Ok((answer, passages))
    }

    /// The session row only exists once its first message is stored with it.
    async fn new_session(
        &self,
        user_id: &str,
        document_id: Uuid,
        session_id: Uuid,
        first_question: &str,
    ) -> Session {
        let now = Utc::now();
        Session {
            session_id,
            document_id,
            user_id: user_id.to_string(),
            title: self.session_title(first_question).await,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        }
    }

    /// Never fails: any problem with the title model yields the default title.
    pub async fn session_title(&self, first_question: &str) -> String {
        let Some(model) = &self.title_model else {
            return self.settings.default_title.clone();
        };

        let request = CompletionRequest::new(
            TITLE_SYSTEM_PROMPT,
            format!("Generate a short title for this query: \"{first_question}\""),
        )
        .with_temperature(self.settings.title_temperature)
        .with_max_tokens(self.settings.title_max_tokens);

        match with_deadline(
            self.settings.title_timeout,
            model.complete(&request),
            SearchError::ModelUnavailable,
        )
        .await
        {
            Ok(raw) => clean_title(&raw).unwrap_or_else(|| self.settings.default_title.clone()),
            Err(error) => {
                warn!(error = %error, "title generation failed, using default");
                self.settings.default_title.clone()
            }
        }
    }

    pub async fn sessions(&self, user_id: &str, document_id: Uuid) -> Result<Vec<Session>, AssistError> {
        self.owned_document(user_id, document_id).await?;
        Ok(self.conversations.list_sessions(user_id, document_id).await?)
    }

    /// Messages of a session in order; empty for an identifier with no row yet.
    pub async fn transcript(
        &self,
        user_id: &str,
        document_id: Uuid,
        session_id: Uuid,
    ) -> Result<Vec<Message>, AssistError> {
        self.owned_document(user_id, document_id).await?;
        match self.conversations.get_session(session_id).await? {
            Some(session) if !session.is_deleted => {
                check_session(&session, user_id, document_id)?;
                Ok(self.conversations.list_messages(session_id).await?)
            }
            _ => Ok(Vec::new()),
        }
    }

    pub async fn turns(
        &self,
        user_id: &str,
        document_id: Uuid,
        session_id: Uuid,
    ) -> Result<Vec<Turn>, AssistError> {
        let messages = self.transcript(user_id, document_id, session_id).await?;
        Ok(reconstruct_turns(&messages))
    }

    pub async fn delete_session(
        &self,
        user_id: &str,
        document_id: Uuid,
        session_id: Uuid,
    ) -> Result<(), AssistError> {
        let session = self
            .conversations
            .get_session(session_id)
            .await?
            .ok_or_else(|| AssistError::InvalidArgument(format!("unknown session {session_id}")))?;
        check_session(&session, user_id, document_id)?;
        Ok(self.conversations.soft_delete_session(session_id).await?)
    }

    async fn owned_document(&self, user_id: &str, document_id: Uuid) -> Result<Document, AssistError> {
        self.documents
            .get_document(document_id)
            .await?
            .filter(|document| document.is_owned_by(user_id))
            .ok_or_else(|| AssistError::DocumentNotFound(document_id.to_string()))
    }
}

fn check_session(session: &Session, user_id: &str, document_id: Uuid) -> Result<(), AssistError> {
    if session.user_id != user_id || session.document_id != document_id {
        return Err(AssistError::InvalidArgument(format!(
            "session {} does not belong to document {document_id}",
            session.session_id
        )));
    }
    if session.is_deleted {
        return Err(AssistError::InvalidArgument(format!(
            "session {} was deleted",
            session.session_id
        )));
    }
    Ok(())
}

fn build_answer_prompt(passages: &[ScoredPassage], history: &[Turn], question: &str) -> String {
    let mut prompt = String::from("Context:\n");
    for (position, hit) in passages.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "[{}] (pages {}-{})\n{}\n",
            position + 1,
            hit.passage.page_start,
            hit.passage.page_end,
            hit.passage.text
        );
    }

    if !history.is_empty() {
        prompt.push_str("Conversation so far:\n");
        for turn in history {
            let _ = writeln!(prompt, "User: {}\nAssistant: {}", turn.question, turn.answer);
        }
        prompt.push('\n');
    }

    let _ = write!(prompt, "Question: {question}\n\nHelpful answer:");
    prompt
}

fn clean_title(raw: &str) -> Option<String> {
    let mut title = raw.trim();
    for quote in ['"', '\''] {
        if title.len() >= 2 && title.starts_with(quote) && title.ends_with(quote) {
            title = title[1..title.len() - 1].trim();
        }
    }
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::{Fingerprint, Passage};
    use crate::stores::{MemoryIndex, SqliteStore};
    use crate::StoreError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingModel {
        requests: Mutex<Vec<CompletionRequest>>,
        reply: Option<String>,
    }

    impl RecordingModel {
        fn replying(reply: &str) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                reply: Some(reply.to_string()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|request| request.user.clone())
                .collect()
        }
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, SearchError> {
            self.requests.lock().unwrap().push(request.clone());
            self.reply
                .clone()
                .ok_or_else(|| SearchError::ModelUnavailable("down".to_string()))
        }
    }

    struct Fixture {
        store: Arc<SqliteStore>,
        index: Arc<IndexManager>,
        document: Document,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let index = Arc::new(IndexManager::new(
            Arc::new(MemoryIndex::new()),
            Arc::new(CharacterNgramEmbedder::default()),
        ));
        let document = Document::new("alice", "lease.txt", Fingerprint::from_hex("f1"));
        store.create_document(&document).await.unwrap();
        Fixture {
            store,
            index,
            document,
        }
    }

    async fn process(fixture: &mut Fixture) {
        let passage = Passage {
            passage_id: "p0".to_string(),
            document_id: fixture.document.document_id,
            chunk_index: 0,
            page_start: 1,
            page_end: 1,
            text: "The monthly rent is 500 euros.".to_string(),
        };
        let handle = fixture.index.build(&fixture.document, &[passage]).await.unwrap();
        fixture
            .store
            .mark_processed(fixture.document.document_id, &handle)
            .await
            .unwrap();
        fixture.document = fixture
            .store
            .get_document(fixture.document.document_id)
            .await
            .unwrap()
            .unwrap();
    }

    fn orchestrator(fixture: &Fixture, model: Arc<RecordingModel>) -> ConversationOrchestrator {
        ConversationOrchestrator::new(
            fixture.store.clone(),
            fixture.store.clone(),
            fixture.index.clone(),
            model,
        )
    }

    #[tokio::test]
    async fn unprocessed_document_records_fallback_turn() {
        let fixture = fixture().await;
        let model = Arc::new(RecordingModel::replying("unused"));
        let orchestrator = orchestrator(&fixture, model.clone());
        let session_id = orchestrator.new_session_id();

        assert!(fixture.store.get_session(session_id).await.unwrap().is_none());
        let outcome = orchestrator
            .ask("alice", fixture.document.document_id, session_id, "What is the rent?")
            .await
            .unwrap();

        assert!(!outcome.grounded);
        assert!(!outcome.upstream_failure);
        assert_eq!(outcome.answer.content, DEFAULT_FALLBACK_ANSWER);
        assert_eq!(outcome.session.title, DEFAULT_SESSION_TITLE);
        assert!(model.prompts().is_empty());

        let turns = orchestrator
            .turns("alice", fixture.document.document_id, session_id)
            .await
            .unwrap();
        assert_eq!(turns, vec![Turn::new("What is the rent?", DEFAULT_FALLBACK_ANSWER)]);
    }

    #[tokio::test]
    async fn grounded_answers_carry_passages_and_history() {
        let mut fixture = fixture().await;
        process(&mut fixture).await;
        let model = Arc::new(RecordingModel::replying("500 euros."));
        let orchestrator = orchestrator(&fixture, model.clone());
        let session_id = orchestrator.new_session_id();
        let document_id = fixture.document.document_id;

        let first = orchestrator
            .ask("alice", document_id, session_id, "What is the rent?")
            .await
            .unwrap();
        assert!(first.grounded);
        assert_eq!(first.answer.content, "500 euros.");
        assert_eq!(first.passages.len(), 1);

        orchestrator
            .ask("alice", document_id, session_id, "Per month?")
            .await
            .unwrap();

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("The monthly rent is 500 euros."));
        assert!(!prompts[0].contains("Conversation so far"));
        assert!(prompts[1].contains("User: What is the rent?\nAssistant: 500 euros."));
        assert!(prompts[1].ends_with("Question: Per month?\n\nHelpful answer:"));
    }

    #[tokio::test]
    async fn model_failure_still_persists_turn() {
        let mut fixture = fixture().await;
        process(&mut fixture).await;
        let orchestrator = orchestrator(&fixture, Arc::new(RecordingModel::default()));
        let session_id = orchestrator.new_session_id();

        let outcome = orchestrator
            .ask("alice", fixture.document.document_id, session_id, "Rent?")
            .await
            .unwrap();
        assert!(!outcome.grounded);
        assert!(outcome.upstream_failure);

        let transcript = fixture.store.list_messages(session_id).await.unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(transcript[1].content, DEFAULT_FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn title_comes_from_title_model_once() {
        let mut fixture = fixture().await;
        process(&mut fixture).await;
        let title_model = Arc::new(RecordingModel::replying("\"Monthly Rent Amount\""));
        let orchestrator = orchestrator(&fixture, Arc::new(RecordingModel::replying("ok")))
            .with_title_model(title_model.clone());
        let session_id = orchestrator.new_session_id();
        let document_id = fixture.document.document_id;

        let first = orchestrator.ask("alice", document_id, session_id, "Rent?").await.unwrap();
        orchestrator.ask("alice", document_id, session_id, "Deposit?").await.unwrap();

        assert_eq!(first.session.title, "Monthly Rent Amount");
        assert_eq!(title_model.prompts().len(), 1);
        let sessions = orchestrator.sessions("alice", document_id).await.unwrap();
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn failing_title_model_uses_default_title() {
        let fixture = fixture().await;
        let orchestrator = orchestrator(&fixture, Arc::new(RecordingModel::replying("ok")))
            .with_title_model(Arc::new(RecordingModel::default()));

        let outcome = orchestrator
            .ask("alice", fixture.document.document_id, Uuid::new_v4(), "Rent?")
            .await
            .unwrap();
        assert_eq!(outcome.session.title, DEFAULT_SESSION_TITLE);
    }

    #[tokio::test]
    async fn other_users_cannot_ask() {
        let fixture = fixture().await;
        let orchestrator = orchestrator(&fixture, Arc::new(RecordingModel::replying("ok")));
        let result = orchestrator
            .ask("mallory", fixture.document.document_id, Uuid::new_v4(), "Rent?")
            .await;
        assert!(matches!(result, Err(AssistError::DocumentNotFound(_))));
    }

    /// Conversation store whose session creation always fails.
    struct RefusingSessions(Arc<SqliteStore>);

    #[async_trait]
    impl ConversationStore for RefusingSessions {
        async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
            self.0.get_session(session_id).await
        }

        async fn upsert_session(&self, session: &Session) -> Result<(), StoreError> {
            self.0.upsert_session(session).await
        }

        async fn open_session(
            &self,
            _session: &Session,
            _first_message: NewMessage,
        ) -> Result<Message, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }

        async fn list_sessions(
            &self,
            user_id: &str,
            document_id: Uuid,
        ) -> Result<Vec<Session>, StoreError> {
            self.0.list_sessions(user_id, document_id).await
        }

        async fn soft_delete_session(&self, session_id: Uuid) -> Result<(), StoreError> {
            self.0.soft_delete_session(session_id).await
        }

        async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError> {
            self.0.append_message(message).await
        }

        async fn list_messages(&self, session_id: Uuid) -> Result<Vec<Message>, StoreError> {
            self.0.list_messages(session_id).await
        }
    }

    #[tokio::test]
    async fn failed_session_creation_leaves_nothing_behind() {
        let fixture = fixture().await;
        let orchestrator = ConversationOrchestrator::new(
            fixture.store.clone(),
            Arc::new(RefusingSessions(fixture.store.clone())),
            fixture.index.clone(),
            Arc::new(RecordingModel::replying("ok")),
        );
        let session_id = orchestrator.new_session_id();
        let document_id = fixture.document.document_id;

        let result = orchestrator.ask("alice", document_id, session_id, "Rent?").await;
        assert!(matches!(result, Err(AssistError::Store(_))));
        assert!(fixture.store.get_session(session_id).await.unwrap().is_none());
        assert!(fixture.store.list_messages(session_id).await.unwrap().is_empty());
        assert!(orchestrator.sessions("alice", document_id).await.unwrap().is_empty());
    }

    #[test]
    fn titles_lose_wrapping_quotes() {
        assert_eq!(clean_title("  'Lease Terms' "), Some("Lease Terms".to_string()));
        assert_eq!(clean_title("\"\""), None);
        assert_eq!(clean_title("Plain"), Some("Plain".to_string()));
    }
}
