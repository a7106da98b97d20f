//! Shared application state handed to every request handler.

use std::sync::Arc;

use thiserror::Error;

use crate::auth::JwtKeys;
use crate::config::Config;
use crate::db::{probe_trigram_index, Database, DatabaseError};
use crate::icd::{CodeResolver, CodingAuthority, WhoApiClient};
use crate::mailer::{HttpMailer, LogMailer, Mailer};
use crate::transcription::{HttpSpeechClient, SpeechTranscriber};

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub jwt: JwtKeys,
    pub resolver: CodeResolver,
    /// Concrete authority handle, kept so the startup code can spawn the
    /// token-refresh loop. `None` when credentials are not configured.
    pub authority: Option<Arc<WhoApiClient>>,
    pub speech: Option<Arc<dyn SpeechTranscriber>>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    /// Wire up the database, integrations and resolver from configuration.
    pub fn new(config: Config) -> Result<Self, StartupError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db = Database::init(&config.db_path())?;

        let trigram = {
            let conn = db.connect()?;
            probe_trigram_index(&conn)
        };

        let authority = config.icd.as_ref().map(|c| Arc::new(WhoApiClient::new(c)));
        let resolver = CodeResolver::new(
            db.clone(),
            authority
                .clone()
                .map(|a| a as Arc<dyn CodingAuthority>),
            trigram,
        );

        let speech: Option<Arc<dyn SpeechTranscriber>> = config
            .speech
            .as_ref()
            .map(|c| Arc::new(HttpSpeechClient::new(c)) as Arc<dyn SpeechTranscriber>);

        let mailer: Arc<dyn Mailer> = match config.mail.as_ref() {
            Some(c) => Arc::new(HttpMailer::new(c)),
            None => Arc::new(LogMailer),
        };

        let jwt = JwtKeys::new(config.jwt_secret.as_bytes(), config.jwt_ttl_secs);

        Ok(Self {
            config,
            db,
            jwt,
            resolver,
            authority,
            speech,
            mailer,
        })
    }
}
