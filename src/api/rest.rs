use std::convert::Infallible;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::catalog::{MaterialCatalog, ProcedureCatalog};
use crate::composer::{ProcedureSelection, VisitComposer};
use crate::config::ApiConfig;
use crate::models::{
    ClientId, ClientUpdate, MaterialFilter, MaterialId, MaterialUpdate, NewClient, NewMaterial, NewProcedure,
    NewVisit, Paging, ProcedureFilter, ProcedureId, ProcedureUpdate, StockMovement, VisitFilter, VisitId,
    VisitUpdate, MAX_PAGE_LIMIT,
};
use crate::storage::persistence::PersistenceManager;
use crate::storage::{ClinicStore, StoreError};

const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub termo: String,
}

#[derive(Debug, Deserialize)]
pub struct StockAdjustmentQuery {
    pub quantidade: f64,
    pub tipo: StockMovement,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StockAdjustmentResponse {
    pub message: String,
    pub available_quantity: f64,
}

fn default_threshold() -> f64 {
    0.8
}

#[derive(Debug, Deserialize)]
pub struct SimilarQuery {
    pub nome: String,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComposeRequest {
    pub selections: Vec<ProcedureSelection>,
}

/// Shared by every handler: the store and, when configured, where to
/// snapshot it after writes
pub struct ApiState {
    store: Arc<ClinicStore>,
    persistence: Option<PersistenceManager>,
}

impl ApiState {
    /// Saves the store off the async workers; failures are logged, the write
    /// itself already succeeded in memory
    async fn sync(&self) {
        let Some(persistence) = self.persistence.clone() else {
            return;
        };
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || persistence.save_store(&store)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "failed to persist store after write"),
            Err(e) => tracing::error!(error = %e, "persist task did not complete"),
        }
    }

    fn reply<T: Serialize>(&self, result: Result<T, StoreError>, status: StatusCode) -> Response {
        match result {
            Ok(body) => warp::reply::with_status(warp::reply::json(&body), status).into_response(),
            Err(err) => error_reply(&err),
        }
    }

    async fn reply_write<T: Serialize + Send>(&self, result: Result<T, StoreError>, status: StatusCode) -> Response {
        if result.is_ok() {
            self.sync().await;
        }
        self.reply(result, status)
    }

    async fn reply_deleted(&self, result: Result<(), StoreError>) -> Response {
        match result {
            Ok(()) => {
                self.sync().await;
                StatusCode::NO_CONTENT.into_response()
            }
            Err(err) => error_reply(&err),
        }
    }
}

fn status_for(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::InsufficientStock { .. } | StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
        StoreError::Conflict(_) => StatusCode::CONFLICT,
        StoreError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn detail_reply(detail: String, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(&ErrorBody { detail }), status).into_response()
}

fn error_reply(err: &StoreError) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    } else {
        tracing::debug!(error = %err, %status, "request rejected");
    }
    detail_reply(err.to_string(), status)
}

/// CORS policy for the configured origins, any origin when none are listed
pub fn cors(config: &ApiConfig) -> warp::cors::Builder {
    let builder = warp::cors()
        .allow_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allow_header("content-type");

    if config.allowed_origins.is_empty() {
        builder.allow_any_origin()
    } else {
        builder.allow_origins(config.allowed_origins.iter().map(String::as_str))
    }
}

/// Turns filter rejections into the same `{"detail": ...}` body the
/// handlers use
pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, detail) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid body: {}", e))
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, format!("Invalid query: {}", e))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        tracing::error!(rejection = ?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
    };
    Ok(detail_reply(detail, status))
}

pub struct RestApi {
    state: Arc<ApiState>,
}

impl RestApi {
    pub fn new(store: Arc<ClinicStore>, persistence: Option<PersistenceManager>) -> Self {
        RestApi {
            state: Arc::new(ApiState { store, persistence }),
        }
    }

    pub fn routes(&self) -> impl Filter<Extract = impl warp::Reply, Error = Infallible> + Clone {
        self.health()
            .or(self.clients())
            .or(self.procedures())
            .or(self.materials())
            .or(self.visits())
            .recover(handle_rejection)
    }

    fn with_state(&self) -> impl Filter<Extract = (Arc<ApiState>,), Error = Infallible> + Clone {
        let state = Arc::clone(&self.state);
        warp::any().map(move || Arc::clone(&state))
    }

    fn json_body<T>() -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone
    where
        T: for<'de> Deserialize<'de> + Send,
    {
        warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
    }

    fn health(&self) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        warp::path!("health").and(warp::get()).map(|| {
            warp::reply::json(&HealthResponse {
                status: "ok".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            })
        })
    }

    fn clients(&self) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let list = warp::path!("api" / "v1" / "clientes")
            .and(warp::get())
            .and(warp::query::<Paging>())
            .and(self.with_state())
            .and_then(|paging: Paging, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply(Ok(state.store.list_clients(paging)), StatusCode::OK))
            });

        let create = warp::path!("api" / "v1" / "clientes")
            .and(warp::post())
            .and(Self::json_body::<NewClient>())
            .and(self.with_state())
            .and_then(|new: NewClient, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply_write(state.store.create_client(new), StatusCode::CREATED).await)
            });

        let search = warp::path!("api" / "v1" / "clientes" / "busca")
            .and(warp::get())
            .and(warp::query::<SearchQuery>())
            .and(self.with_state())
            .and_then(|query: SearchQuery, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply(Ok(state.store.search_clients(&query.termo)), StatusCode::OK))
            });

        let get = warp::path!("api" / "v1" / "clientes" / ClientId)
            .and(warp::get())
            .and(self.with_state())
            .and_then(|id: ClientId, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply(state.store.get_client(id), StatusCode::OK))
            });

        let update = warp::path!("api" / "v1" / "clientes" / ClientId)
            .and(warp::put())
            .and(Self::json_body::<ClientUpdate>())
            .and(self.with_state())
            .and_then(|id: ClientId, update: ClientUpdate, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply_write(state.store.update_client(id, update), StatusCode::OK).await)
            });

        let delete = warp::path!("api" / "v1" / "clientes" / ClientId)
            .and(warp::delete())
            .and(self.with_state())
            .and_then(|id: ClientId, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply_deleted(state.store.delete_client(id)).await)
            });

        list.or(create).or(search).or(get).or(update).or(delete)
    }

    fn procedures(&self) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let list = warp::path!("api" / "v1" / "procedimentos")
            .and(warp::get())
            .and(warp::query::<ProcedureFilter>())
            .and(self.with_state())
            .and_then(|filter: ProcedureFilter, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply(Ok(state.store.list_procedures(filter)), StatusCode::OK))
            });

        let create = warp::path!("api" / "v1" / "procedimentos")
            .and(warp::post())
            .and(Self::json_body::<NewProcedure>())
            .and(self.with_state())
            .and_then(|new: NewProcedure, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply_write(state.store.create_procedure(new), StatusCode::CREATED).await)
            });

        let get = warp::path!("api" / "v1" / "procedimentos" / ProcedureId)
            .and(warp::get())
            .and(self.with_state())
            .and_then(|id: ProcedureId, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply(state.store.get_procedure(id), StatusCode::OK))
            });

        let defaults = warp::path!("api" / "v1" / "procedimentos" / ProcedureId / "materiais-padrao")
            .and(warp::get())
            .and(self.with_state())
            .and_then(|id: ProcedureId, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply(state.store.procedure_default_materials(id), StatusCode::OK))
            });

        let update = warp::path!("api" / "v1" / "procedimentos" / ProcedureId)
            .and(warp::put())
            .and(Self::json_body::<ProcedureUpdate>())
            .and(self.with_state())
            .and_then(|id: ProcedureId, update: ProcedureUpdate, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply_write(state.store.update_procedure(id, update), StatusCode::OK).await)
            });

        let delete = warp::path!("api" / "v1" / "procedimentos" / ProcedureId)
            .and(warp::delete())
            .and(self.with_state())
            .and_then(|id: ProcedureId, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply_deleted(state.store.delete_procedure(id)).await)
            });

        list.or(create).or(get).or(defaults).or(update).or(delete)
    }

    fn materials(&self) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let list = warp::path!("api" / "v1" / "materiais")
            .and(warp::get())
            .and(warp::query::<MaterialFilter>())
            .and(self.with_state())
            .and_then(|filter: MaterialFilter, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply(Ok(state.store.list_materials(filter)), StatusCode::OK))
            });

        let create = warp::path!("api" / "v1" / "materiais")
            .and(warp::post())
            .and(Self::json_body::<NewMaterial>())
            .and(self.with_state())
            .and_then(|new: NewMaterial, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply_write(state.store.create_material(new), StatusCode::CREATED).await)
            });

        let create_or_find = warp::path!("api" / "v1" / "materiais" / "criar-ou-buscar")
            .and(warp::post())
            .and(Self::json_body::<NewMaterial>())
            .and(self.with_state())
            .and_then(|new: NewMaterial, state: Arc<ApiState>| async move {
                let response = match state.store.create_or_find_material(new) {
                    Ok((material, true)) => state.reply_write(Ok(material), StatusCode::CREATED).await,
                    Ok((material, false)) => state.reply_write(Ok(material), StatusCode::OK).await,
                    Err(err) => error_reply(&err),
                };
                Ok::<_, Infallible>(response)
            });

        let low_stock = warp::path!("api" / "v1" / "materiais" / "estoque" / "baixo")
            .and(warp::get())
            .and(self.with_state())
            .and_then(|state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply(Ok(state.store.low_stock_materials()), StatusCode::OK))
            });

        let similar = warp::path!("api" / "v1" / "materiais" / "buscar" / "similares")
            .and(warp::get())
            .and(warp::query::<SimilarQuery>())
            .and(self.with_state())
            .and_then(|query: SimilarQuery, state: Arc<ApiState>| async move {
                let response = if (0.0..=1.0).contains(&query.threshold) {
                    state.reply(Ok(state.store.similar_materials(&query.nome, query.threshold)), StatusCode::OK)
                } else {
                    detail_reply("threshold must be between 0 and 1".to_string(), StatusCode::BAD_REQUEST)
                };
                Ok::<_, Infallible>(response)
            });

        let get = warp::path!("api" / "v1" / "materiais" / MaterialId)
            .and(warp::get())
            .and(self.with_state())
            .and_then(|id: MaterialId, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply(state.store.get_material(id), StatusCode::OK))
            });

        let adjust = warp::path!("api" / "v1" / "materiais" / MaterialId / "ajustar-estoque")
            .and(warp::post())
            .and(warp::query::<StockAdjustmentQuery>())
            .and(self.with_state())
            .and_then(|id: MaterialId, query: StockAdjustmentQuery, state: Arc<ApiState>| async move {
                let result = state
                    .store
                    .adjust_stock(id, query.quantidade, query.tipo)
                    .map(|material| StockAdjustmentResponse {
                        message: format!("Stock adjusted. New quantity: {}", material.available_quantity),
                        available_quantity: material.available_quantity,
                    });
                Ok::<_, Infallible>(state.reply_write(result, StatusCode::OK).await)
            });

        let update = warp::path!("api" / "v1" / "materiais" / MaterialId)
            .and(warp::put())
            .and(Self::json_body::<MaterialUpdate>())
            .and(self.with_state())
            .and_then(|id: MaterialId, update: MaterialUpdate, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply_write(state.store.update_material(id, update), StatusCode::OK).await)
            });

        let delete = warp::path!("api" / "v1" / "materiais" / MaterialId)
            .and(warp::delete())
            .and(self.with_state())
            .and_then(|id: MaterialId, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply_deleted(state.store.delete_material(id)).await)
            });

        list.or(create)
            .or(create_or_find)
            .or(low_stock)
            .or(similar)
            .or(get)
            .or(adjust)
            .or(update)
            .or(delete)
    }

    fn visits(&self) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let list = warp::path!("api" / "v1" / "atendimentos")
            .and(warp::get())
            .and(warp::query::<VisitFilter>())
            .and(self.with_state())
            .and_then(|filter: VisitFilter, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply(Ok(state.store.list_visits(&filter)), StatusCode::OK))
            });

        let create = warp::path!("api" / "v1" / "atendimentos")
            .and(warp::post())
            .and(Self::json_body::<NewVisit>())
            .and(self.with_state())
            .and_then(|new: NewVisit, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply_write(state.store.create_visit(new), StatusCode::CREATED).await)
            });

        let summary = warp::path!("api" / "v1" / "atendimentos" / "estatisticas" / "resumo")
            .and(warp::get())
            .and(self.with_state())
            .and_then(|state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply(Ok(state.store.visit_summary(Utc::now())), StatusCode::OK))
            });

        let compose = warp::path!("api" / "v1" / "atendimentos" / "compor")
            .and(warp::post())
            .and(Self::json_body::<ComposeRequest>())
            .and(self.with_state())
            .and_then(|request: ComposeRequest, state: Arc<ApiState>| async move {
                let procedures = state.store.list_procedures(ProcedureFilter {
                    active: Some(true),
                    limit: Some(MAX_PAGE_LIMIT),
                    ..ProcedureFilter::default()
                });
                let materials = state.store.list_materials(MaterialFilter {
                    active: Some(true),
                    limit: Some(MAX_PAGE_LIMIT),
                    ..MaterialFilter::default()
                });
                let report = VisitComposer::compose(
                    &request.selections,
                    &ProcedureCatalog::new(procedures.procedures),
                    &MaterialCatalog::new(materials.materials),
                );
                Ok::<_, Infallible>(state.reply(Ok(report), StatusCode::OK))
            });

        let get = warp::path!("api" / "v1" / "atendimentos" / VisitId)
            .and(warp::get())
            .and(self.with_state())
            .and_then(|id: VisitId, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply(state.store.get_visit(id), StatusCode::OK))
            });

        let update = warp::path!("api" / "v1" / "atendimentos" / VisitId)
            .and(warp::put())
            .and(Self::json_body::<VisitUpdate>())
            .and(self.with_state())
            .and_then(|id: VisitId, update: VisitUpdate, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply_write(state.store.update_visit(id, update), StatusCode::OK).await)
            });

        let delete = warp::path!("api" / "v1" / "atendimentos" / VisitId)
            .and(warp::delete())
            .and(self.with_state())
            .and_then(|id: VisitId, state: Arc<ApiState>| async move {
                Ok::<_, Infallible>(state.reply_deleted(state.store.delete_visit(id)).await)
            });

        list.or(create).or(summary).or(compose).or(get).or(update).or(delete)
    }
}
