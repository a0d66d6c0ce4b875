use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use serde::Deserialize;

use crate::mapping::{ForwardAddr, ListenAddr, Mapping, MappingType};

use super::ApiState;
use super::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRequest {
    pub listen_addr: String,
    pub forward_addr: String,
    pub mapping_type: String,

    /// Keep the mapping out of the mapping store.
    #[serde(default)]
    pub temp: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteParams {
    pub listen_addr: String,
    pub mapping_type: String,
}

fn listen_addr(s: &str) -> Result<ListenAddr, ApiError> {
    s.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid listenAddr '{s}': {e}")))
}

fn forward_addr(s: &str) -> Result<ForwardAddr, ApiError> {
    s.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid forwardAddr '{s}': {e}")))
}

pub async fn add_mapping(
    State(state): State<ApiState>,
    request: Result<Json<AddRequest>, JsonRejection>,
) -> Result<Json<Mapping>, ApiError> {
    let Json(request) = request?;

    let listen = listen_addr(&request.listen_addr)?;
    let forward = forward_addr(&request.forward_addr)?;
    let mapping_type: MappingType = request.mapping_type.parse()?;

    let mapping = state
        .controller
        .add(listen, forward, mapping_type, !request.temp)
        .await?;

    Ok(Json(mapping))
}

pub async fn delete_mapping(
    State(state): State<ApiState>,
    params: Result<Query<DeleteParams>, QueryRejection>,
) -> Result<Json<Mapping>, ApiError> {
    let Query(params) = params?;

    let listen = listen_addr(&params.listen_addr)?;
    let mapping_type: MappingType = params.mapping_type.parse()?;

    let mapping = state.controller.delete(listen, mapping_type).await?;
    Ok(Json(mapping))
}

pub async fn query_mappings(State(state): State<ApiState>) -> Json<Vec<Mapping>> {
    Json(state.controller.query())
}
