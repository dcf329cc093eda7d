use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::auth::CredentialCodec;
use crate::catalog::CatalogService;
use crate::config::Config;
use crate::feed::FeedComposer;
use crate::identity::IdentityService;
use crate::store::{DynStore, SqliteStore};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Shared handles every handler receives. Holds no per-request state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub codec: CredentialCodec,
    pub identity: Arc<IdentityService>,
    pub catalog: Arc<CatalogService>,
}

impl AppState {
    /// Wire the use cases to one SQLite-backed store.
    pub fn new(config: Config, pool: DbPool) -> Self {
        let store: DynStore = Arc::new(SqliteStore::new(pool));
        let codec = CredentialCodec::new(&config.auth.jwt_secret);

        let identity = IdentityService::new(
            store.clone(),
            codec.clone(),
            config.auth.password_secret.clone(),
        );
        let catalog = CatalogService::new(
            store,
            FeedComposer::from_config(&config.feed),
            config.catalog.ownership,
        );

        Self {
            config,
            codec,
            identity: Arc::new(identity),
            catalog: Arc::new(catalog),
        }
    }
}
