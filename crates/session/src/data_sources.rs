use std::sync::Arc;

use querent_api::{DataSourceBackend, DataSourceConfig, DataSourceId, NewDataSource};
use snafu::{OptionExt, ResultExt};
use tokio::sync::RwLock;

use super::error::{BackendSnafu, SessionResult, UnknownDataSourceSnafu};

pub const FETCH_DATA_SOURCES_FAILED: &str = "Failed to fetch data sources";

#[derive(Debug, Default)]
struct DirectoryState {
    sources: Vec<DataSourceConfig>,
    selected: Option<DataSourceId>,
    error: Option<String>,
}

/// Owned data sources plus the one the chat is pointed at.
pub struct DataSourceDirectory {
    backend: Arc<dyn DataSourceBackend>,
    state: RwLock<DirectoryState>,
}

impl DataSourceDirectory {
    pub fn new(backend: Arc<dyn DataSourceBackend>) -> Self {
        Self {
            backend,
            state: RwLock::new(DirectoryState::default()),
        }
    }

    /// Reloads owned sources; keeps the selection when it survives, else falls back to the first.
    pub async fn refresh(&self) {
        let result = self.backend.list_owned().await;

        let mut state = self.state.write().await;
        match result {
            Ok(sources) => {
                let selected = state
                    .selected
                    .filter(|selected| sources.iter().any(|source| source.id == *selected))
                    .or_else(|| sources.first().map(|source| source.id));
                tracing::info!(count = sources.len(), "loaded data sources");
                state.sources = sources;
                state.selected = selected;
                state.error = None;
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to fetch data sources");
                state.sources.clear();
                state.selected = None;
                state.error = Some(FETCH_DATA_SOURCES_FAILED.to_string());
            }
        }
    }

    pub async fn select(&self, data_source_id: DataSourceId) -> SessionResult<DataSourceConfig> {
        let mut state = self.state.write().await;
        let source = state
            .sources
            .iter()
            .find(|source| source.id == data_source_id)
            .cloned()
            .context(UnknownDataSourceSnafu {
                stage: "select-data-source",
                id: data_source_id,
            })?;
        state.selected = Some(data_source_id);
        tracing::info!(data_source_id = %data_source_id, name = %source.name, "selected data source");
        Ok(source)
    }

    pub async fn selected(&self) -> Option<DataSourceConfig> {
        let state = self.state.read().await;
        let selected = state.selected?;
        state
            .sources
            .iter()
            .find(|source| source.id == selected)
            .cloned()
    }

    pub async fn selected_id(&self) -> Option<DataSourceId> {
        self.state.read().await.selected
    }

    pub async fn sources(&self) -> Vec<DataSourceConfig> {
        self.state.read().await.sources.clone()
    }

    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    pub async fn dismiss_error(&self) {
        self.state.write().await.error = None;
    }

    /// Full configuration, including schema definitions, straight from the backend.
    pub async fn details(&self, data_source_id: DataSourceId) -> SessionResult<DataSourceConfig> {
        self.backend
            .get(data_source_id)
            .await
            .context(BackendSnafu {
                stage: "data-source-details",
            })
    }

    pub async fn create(&self, input: NewDataSource) -> SessionResult<()> {
        let name = input.name.clone();
        self.backend.create(input).await.context(BackendSnafu {
            stage: "create-data-source",
        })?;
        tracing::info!(name = %name, "created data source");
        self.refresh().await;
        Ok(())
    }

    pub async fn test_connection(&self, data_source_id: DataSourceId) -> SessionResult<()> {
        self.backend
            .test_connection(data_source_id)
            .await
            .context(BackendSnafu {
                stage: "test-connection",
            })
    }
}
