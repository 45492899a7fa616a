//! In-memory IDS server for tests and local experiments.
//!
//! # Design
//! Implements the service's `/ids/*` endpoints over a single `Store` behind an
//! `RwLock`. Storage tiers are modelled by a per-datafile flag that `archive`
//! and `restore` flip immediately. A download of several datafiles is the
//! concatenation of their contents in id order rather than a zip archive.
//! Errors use the service's `{"code": ..., "message": ...}` body shape.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Form, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio::{net::TcpListener, sync::RwLock};
use tracing::info;
use uuid::Uuid;

/// Session id the server always rejects.
pub const INVALID_SESSION: &str = "invalid-session";

/// Size of the pieces a download is streamed in.
const STREAM_PIECE: usize = 16 * 1024;

pub type Params = HashMap<String, String>;

#[derive(Clone, Debug)]
pub struct Datafile {
    pub name: String,
    pub dataset_id: i64,
    pub content: Vec<u8>,
    pub online: bool,
}

#[derive(Clone, Debug)]
struct Prepared {
    ids: Vec<i64>,
}

#[derive(Debug, Default)]
pub struct Store {
    next_id: i64,
    /// dataset id -> investigation id
    datasets: HashMap<i64, i64>,
    datafiles: BTreeMap<i64, Datafile>,
    prepared: HashMap<String, Prepared>,
    /// Report a wrong checksum for every upload.
    pub corrupt_checksums: bool,
}

impl Store {
    /// Datasets 10 and 11 in investigation 1, dataset 20 in investigation 2.
    pub fn seeded() -> Self {
        let mut store = Store {
            next_id: 1,
            ..Store::default()
        };
        store.add_dataset(10, 1);
        store.add_dataset(11, 1);
        store.add_dataset(20, 2);
        store
    }

    pub fn add_dataset(&mut self, dataset_id: i64, investigation_id: i64) {
        self.datasets.insert(dataset_id, investigation_id);
    }

    pub fn datafile(&self, id: i64) -> Option<&Datafile> {
        self.datafiles.get(&id)
    }

    fn resolve(&self, params: &Params) -> Result<Vec<i64>, Fault> {
        let datafile_ids = parse_ids(params, "datafileIds")?;
        let dataset_ids = parse_ids(params, "datasetIds")?;
        let investigation_ids = parse_ids(params, "investigationIds")?;
        if datafile_ids.is_empty() && dataset_ids.is_empty() && investigation_ids.is_empty() {
            return Err(Fault::bad_request("No datafiles, datasets or investigations specified"));
        }

        let mut ids = Vec::new();
        for id in datafile_ids {
            if !self.datafiles.contains_key(&id) {
                return Err(Fault::not_found(format!("Datafile {id} not found")));
            }
            ids.push(id);
        }
        for ds in dataset_ids {
            if !self.datasets.contains_key(&ds) {
                return Err(Fault::not_found(format!("Dataset {ds} not found")));
            }
            ids.extend(self.datafiles.iter().filter(|(_, df)| df.dataset_id == ds).map(|(id, _)| *id));
        }
        for inv in investigation_ids {
            if !self.datasets.values().any(|i| *i == inv) {
                return Err(Fault::not_found(format!("Investigation {inv} not found")));
            }
            ids.extend(
                self.datafiles
                    .iter()
                    .filter(|(_, df)| self.datasets.get(&df.dataset_id) == Some(&inv))
                    .map(|(id, _)| *id),
            );
        }
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// Resolve either a prepared id or a session plus id selection.
    fn resolve_any(&self, params: &Params) -> Result<Vec<i64>, Fault> {
        match params.get("preparedId") {
            Some(prepared_id) => self
                .prepared
                .get(prepared_id)
                .map(|p| p.ids.clone())
                .ok_or_else(|| Fault::not_found(format!("The preparedId {prepared_id} is not known"))),
            None => {
                check_session(params)?;
                self.resolve(params)
            }
        }
    }

    /// Look up every id; a prepared id can outlive the files it lists.
    fn files(&self, ids: &[i64]) -> Result<Vec<&Datafile>, Fault> {
        ids.iter()
            .map(|id| {
                self.datafiles
                    .get(id)
                    .ok_or_else(|| Fault::not_found(format!("Datafile {id} not found")))
            })
            .collect()
    }

    fn status_of(&self, ids: &[i64]) -> Result<&'static str, Fault> {
        let files = self.files(ids)?;
        let online = files.iter().filter(|df| df.online).count();
        Ok(if online == files.len() {
            "ONLINE"
        } else if online == 0 {
            "ARCHIVED"
        } else {
            "INCOMPLETE"
        })
    }

    fn require_online(&self, ids: &[i64]) -> Result<(), Fault> {
        let files = self.files(ids)?;
        match ids.iter().zip(files).find(|(_, df)| !df.online) {
            Some((id, _)) => Err(Fault::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "DataNotOnlineException",
                format!("Datafile {id} is not online"),
            )),
            None => Ok(()),
        }
    }
}

pub type Db = Arc<RwLock<Store>>;

/// An error response in the service's JSON shape.
#[derive(Debug)]
pub struct Fault {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl Fault {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BadRequestException", message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NotFoundException", message)
    }
}

impl IntoResponse for Fault {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"code": self.code, "message": self.message}))).into_response()
    }
}

pub fn app() -> Router {
    app_with(Store::seeded())
}

pub fn app_with(store: Store) -> Router {
    let db: Db = Arc::new(RwLock::new(store));
    Router::new()
        .route("/ids/ping", get(|| async { "IdsOK" }))
        .route("/ids/getApiVersion", get(|| async { "1.9.0" }))
        .route("/ids/isReadOnly", get(|| async { "false" }))
        .route("/ids/isTwoLevel", get(|| async { "true" }))
        .route("/ids/getServiceStatus", get(get_service_status))
        .route("/ids/getStatus", get(get_status))
        .route("/ids/archive", post(archive))
        .route("/ids/restore", post(restore))
        .route("/ids/prepareData", post(prepare_data))
        .route("/ids/isPrepared", get(is_prepared))
        .route("/ids/getData", get(get_data))
        .route("/ids/getDatafileIds", get(get_datafile_ids))
        .route("/ids/getLink", post(get_link))
        .route("/ids/getSize", get(get_size))
        .route("/ids/delete", delete(delete_data))
        .route("/ids/put", put(put_datafile))
        .layer(DefaultBodyLimit::max(256 * 1024 * 1024))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with(listener, Store::seeded()).await
}

pub async fn run_with(listener: TcpListener, store: Store) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(store)).await
}

fn check_session(params: &Params) -> Result<(), Fault> {
    match params.get("sessionId").map(String::as_str) {
        None | Some("") => Err(Fault::bad_request("sessionId is not set")),
        Some(INVALID_SESSION) => Err(Fault::new(
            StatusCode::FORBIDDEN,
            "InsufficientPrivilegesException",
            "Session id is not valid",
        )),
        Some(_) => Ok(()),
    }
}

fn parse_ids(params: &Params, name: &str) -> Result<Vec<i64>, Fault> {
    match params.get(name) {
        None => Ok(Vec::new()),
        Some(list) => list
            .split(',')
            .map(|id| {
                id.trim()
                    .parse()
                    .map_err(|_| Fault::bad_request(format!("The {name} parameter '{list}' is not a valid list of ids")))
            })
            .collect(),
    }
}

fn required<'p>(params: &'p Params, name: &str) -> Result<&'p str, Fault> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Fault::bad_request(format!("{name} is not set")))
}

fn required_number(params: &Params, name: &str) -> Result<i64, Fault> {
    required(params, name)?
        .parse()
        .map_err(|_| Fault::bad_request(format!("{name} is not a number")))
}

#[derive(Serialize)]
struct IdList {
    ids: Vec<i64>,
}

async fn get_service_status(State(db): State<Db>, Query(params): Query<Params>) -> Result<Response, Fault> {
    check_session(&params)?;
    let store = db.read().await;
    let prep: Vec<_> = store.prepared.keys().map(|id| json!({"preparedId": id})).collect();
    Ok(Json(json!({"opsQueue": [], "prepQueue": prep, "lockedDs": []})).into_response())
}

async fn get_status(State(db): State<Db>, Query(params): Query<Params>) -> Result<&'static str, Fault> {
    let store = db.read().await;
    let ids = store.resolve_any(&params)?;
    store.status_of(&ids)
}

async fn set_online(db: &Db, params: &Params, online: bool) -> Result<(), Fault> {
    check_session(params)?;
    let mut store = db.write().await;
    let ids = store.resolve(params)?;
    for id in &ids {
        if let Some(df) = store.datafiles.get_mut(id) {
            df.online = online;
        }
    }
    info!(?ids, online, "storage tier changed");
    Ok(())
}

async fn archive(State(db): State<Db>, Form(params): Form<Params>) -> Result<(), Fault> {
    set_online(&db, &params, false).await
}

async fn restore(State(db): State<Db>, Form(params): Form<Params>) -> Result<(), Fault> {
    set_online(&db, &params, true).await
}

async fn prepare_data(State(db): State<Db>, Form(params): Form<Params>) -> Result<String, Fault> {
    check_session(&params)?;
    let mut store = db.write().await;
    let ids = store.resolve(&params)?;
    let prepared_id = Uuid::new_v4().to_string();
    store.prepared.insert(prepared_id.clone(), Prepared { ids });
    info!(%prepared_id, "data prepared");
    Ok(prepared_id)
}

async fn is_prepared(State(db): State<Db>, Query(params): Query<Params>) -> Result<&'static str, Fault> {
    let prepared_id = required(&params, "preparedId")?;
    let store = db.read().await;
    let prepared = store
        .prepared
        .get(prepared_id)
        .ok_or_else(|| Fault::not_found(format!("The preparedId {prepared_id} is not known")))?;
    let ready = prepared.ids.iter().all(|id| store.datafiles.get(id).is_some_and(|df| df.online));
    Ok(if ready { "true" } else { "false" })
}

/// Parse `bytes=<offset>-`, the only range form the client sends.
fn range_offset(headers: &HeaderMap) -> Result<Option<usize>, Fault> {
    let Some(range) = headers.get(header::RANGE) else {
        return Ok(None);
    };
    let range = range.to_str().unwrap_or_default();
    range
        .strip_prefix("bytes=")
        .and_then(|r| r.strip_suffix('-'))
        .and_then(|r| r.parse().ok())
        .map(Some)
        .ok_or_else(|| Fault::bad_request(format!("Unsupported range {range}")))
}

async fn get_data(State(db): State<Db>, Query(params): Query<Params>, headers: HeaderMap) -> Result<Response, Fault> {
    let content = {
        let store = db.read().await;
        let ids = store.resolve_any(&params)?;
        store.require_online(&ids)?;
        let content: Vec<u8> = store.files(&ids)?.iter().flat_map(|df| df.content.clone()).collect();
        content
    };

    let total = content.len();
    let (status, body, content_range) = match range_offset(&headers)? {
        None => (StatusCode::OK, content, None),
        Some(offset) if offset <= total => (
            StatusCode::PARTIAL_CONTENT,
            content[offset..].to_vec(),
            Some(format!("bytes {offset}-{}/{total}", total.saturating_sub(1))),
        ),
        Some(offset) => {
            return Err(Fault::new(
                StatusCode::RANGE_NOT_SATISFIABLE,
                "BadRequestException",
                format!("Offset {offset} is beyond the end of the data ({total} bytes)"),
            ))
        }
    };

    // Stream without a length so clients see a chunked body.
    let pieces: Vec<Result<Vec<u8>, std::io::Error>> = body.chunks(STREAM_PIECE).map(|c| Ok(c.to_vec())).collect();
    let mut response = Response::new(Body::from_stream(futures::stream::iter(pieces)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/octet-stream"));
    if let Some(content_range) = content_range {
        if let Ok(value) = header::HeaderValue::from_str(&content_range) {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
    }
    Ok(response)
}

async fn get_datafile_ids(State(db): State<Db>, Query(params): Query<Params>) -> Result<Json<IdList>, Fault> {
    let store = db.read().await;
    let ids = store.resolve_any(&params)?;
    Ok(Json(IdList { ids }))
}

async fn get_link(State(db): State<Db>, Form(params): Form<Params>) -> Result<String, Fault> {
    check_session(&params)?;
    let datafile_id = required_number(&params, "datafileId")?;
    let username = required(&params, "username")?;
    let store = db.read().await;
    let df = store
        .datafiles
        .get(&datafile_id)
        .ok_or_else(|| Fault::not_found(format!("Datafile {datafile_id} not found")))?;
    store.require_online(&[datafile_id])?;
    Ok(format!("/links/{username}/{datafile_id}/{}", df.name))
}

async fn get_size(State(db): State<Db>, Query(params): Query<Params>) -> Result<String, Fault> {
    check_session(&params)?;
    let store = db.read().await;
    let ids = store.resolve(&params)?;
    let size: usize = store.files(&ids)?.iter().map(|df| df.content.len()).sum();
    Ok(size.to_string())
}

async fn delete_data(State(db): State<Db>, Query(params): Query<Params>) -> Result<(), Fault> {
    check_session(&params)?;
    let mut store = db.write().await;
    let ids = store.resolve(&params)?;
    store.require_online(&ids)?;
    for id in &ids {
        store.datafiles.remove(id);
    }
    info!(?ids, "datafiles deleted");
    Ok(())
}

async fn put_datafile(
    State(db): State<Db>,
    Query(params): Query<Params>,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), Fault> {
    check_session(&params)?;
    let name = required(&params, "name")?.to_string();
    let dataset_id = required_number(&params, "datasetId")?;
    required_number(&params, "datafileFormatId")?;

    let mut store = db.write().await;
    if !store.datasets.contains_key(&dataset_id) {
        return Err(Fault::not_found(format!("Dataset {dataset_id} not found")));
    }
    if store.datafiles.values().any(|df| df.dataset_id == dataset_id && df.name == name) {
        return Err(Fault::bad_request(format!("Datafile {name} already exists in dataset {dataset_id}")));
    }

    let mut checksum = u64::from(crc32fast::hash(&body));
    if store.corrupt_checksums {
        checksum ^= 1;
    }

    let id = store.next_id;
    store.next_id += 1;
    store.datafiles.insert(
        id,
        Datafile {
            name,
            dataset_id,
            content: body.to_vec(),
            online: true,
        },
    );
    info!(id, bytes = body.len(), "datafile stored");
    Ok((StatusCode::CREATED, Json(json!({"id": id, "checksum": checksum}))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn store_with_files() -> Store {
        let mut store = Store::seeded();
        for (id, ds) in [(1, 10), (2, 11), (3, 20)] {
            store.datafiles.insert(
                id,
                Datafile {
                    name: format!("f{id}"),
                    dataset_id: ds,
                    content: vec![id as u8; 4],
                    online: true,
                },
            );
        }
        store
    }

    #[test]
    fn resolve_unions_and_sorts() {
        let store = store_with_files();
        let ids = store
            .resolve(&params(&[("datafileIds", "3"), ("investigationIds", "1")]))
            .unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn resolve_rejects_empty_selection() {
        let err = store_with_files().resolve(&params(&[])).unwrap_err();
        assert_eq!(err.code, "BadRequestException");
    }

    #[test]
    fn resolve_rejects_unknown_ids() {
        let err = store_with_files().resolve(&params(&[("datafileIds", "99")])).unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn bad_id_list_is_bad_request() {
        let err = parse_ids(&params(&[("datasetIds", "1,x")]), "datasetIds").unwrap_err();
        assert_eq!(err.code, "BadRequestException");
    }

    #[test]
    fn status_aggregates_tiers() {
        let mut store = store_with_files();
        assert_eq!(store.status_of(&[1, 2]).unwrap(), "ONLINE");
        store.datafiles.get_mut(&1).unwrap().online = false;
        assert_eq!(store.status_of(&[1, 2]).unwrap(), "INCOMPLETE");
        assert_eq!(store.status_of(&[1]).unwrap(), "ARCHIVED");
    }

    #[test]
    fn deleted_files_are_not_found() {
        let mut store = store_with_files();
        store.datafiles.remove(&2);
        assert_eq!(store.status_of(&[1, 2]).unwrap_err().status, StatusCode::NOT_FOUND);
        assert_eq!(store.require_online(&[2]).unwrap_err().code, "NotFoundException");
    }

    #[test]
    fn session_rules() {
        assert!(check_session(&params(&[("sessionId", "s")])).is_ok());
        assert_eq!(check_session(&params(&[])).unwrap_err().code, "BadRequestException");
        assert_eq!(
            check_session(&params(&[("sessionId", INVALID_SESSION)])).unwrap_err().code,
            "InsufficientPrivilegesException"
        );
    }
}
