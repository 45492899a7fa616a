//! Typed operations of the IDS service.
//!
//! # Design
//! `IdsClient` holds only an immutable `ClientConfig`. Every operation is a
//! thin composition: encode parameters, build the request, execute it over a
//! fresh connection, classify the response, then materialize the body in
//! the declared shape. Download operations hand back the live body so large
//! files are never buffered.
//!
//! The prepared-data workflow is stateless here: `prepare_data` returns a
//! `PreparedId`, and the polling and fetching calls take it back. Waiting for
//! readiness is left to the caller.

use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::IdsError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, RequestBuilder, ResponseBody};
use crate::params::{self, CallParameters, DataOptions, DataSelection, Flags};
use crate::response;
use crate::transport;
use crate::types::{DatafileIds, PreparedId, PutResponse, ServiceStatus, Status};
use crate::upload::UploadSummary;

/// Reply body of a healthy `ping`.
const PING_REPLY: &str = "IdsOK";

/// Client for one IDS server. Cheap to clone and safe to share across threads.
#[derive(Debug, Clone)]
pub struct IdsClient {
    config: ClientConfig,
}

impl IdsClient {
    /// Create a client for the server at `base_url`, e.g.
    /// `https://example.com:8181`. Requests go to `<base_url path>/ids/`.
    pub fn new(base_url: &str) -> Result<Self, IdsError> {
        Ok(Self {
            config: ClientConfig::from_url(base_url)?,
        })
    }

    /// Apply `timeout` to connecting, reading and writing on every call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.set_timeout(timeout);
        self
    }

    /// Replace the default TLS configuration, e.g. to trust a private CA.
    pub fn with_tls_config(mut self, tls: Arc<rustls::ClientConfig>) -> Self {
        self.config.set_tls(tls);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Server information
    // -----------------------------------------------------------------------

    /// Check that the server is alive and is an IDS server.
    pub fn ping(&self) -> Result<(), IdsError> {
        let reply = response::read_text(self.call("ping", HttpMethod::Get, CallParameters::new())?)?;
        if reply != PING_REPLY {
            return Err(IdsError::not_found(format!("Server gave invalid response: {reply}")));
        }
        Ok(())
    }

    pub fn get_api_version(&self) -> Result<String, IdsError> {
        response::read_text(self.call("getApiVersion", HttpMethod::Get, CallParameters::new())?)
    }

    pub fn is_read_only(&self) -> Result<bool, IdsError> {
        response::read_bool(self.call("isReadOnly", HttpMethod::Get, CallParameters::new())?)
    }

    /// Whether the server runs with an archive tier behind its online storage.
    pub fn is_two_level(&self) -> Result<bool, IdsError> {
        response::read_bool(self.call("isTwoLevel", HttpMethod::Get, CallParameters::new())?)
    }

    pub fn get_service_status(&self, session_id: &str) -> Result<ServiceStatus, IdsError> {
        let mut params = CallParameters::new();
        params.insert("sessionId", session_id);
        response::read_json(self.call("getServiceStatus", HttpMethod::Get, params)?)
    }

    // -----------------------------------------------------------------------
    // Status and storage tier management
    // -----------------------------------------------------------------------

    /// Status of a selection. Some servers allow anonymous status queries,
    /// hence the optional session.
    pub fn get_status(&self, session_id: Option<&str>, selection: &DataSelection) -> Result<Status, IdsError> {
        let params = params::session_selection(session_id, selection);
        response::read_text(self.call("getStatus", HttpMethod::Get, params)?)?.parse()
    }

    pub fn get_prepared_status(&self, prepared_id: &PreparedId) -> Result<Status, IdsError> {
        let params = params::prepared(prepared_id.as_str());
        response::read_text(self.call("getStatus", HttpMethod::Get, params)?)?.parse()
    }

    /// Ask the server to move a selection to archive storage.
    pub fn archive(&self, session_id: &str, selection: &DataSelection) -> Result<(), IdsError> {
        let params = params::session_selection(Some(session_id), selection);
        self.call_and_drain("archive", HttpMethod::Post, params)
    }

    /// Ask the server to bring a selection back to online storage.
    pub fn restore(&self, session_id: &str, selection: &DataSelection) -> Result<(), IdsError> {
        let params = params::session_selection(Some(session_id), selection);
        self.call_and_drain("restore", HttpMethod::Post, params)
    }

    pub fn delete(&self, session_id: &str, selection: &DataSelection) -> Result<(), IdsError> {
        let params = params::session_selection(Some(session_id), selection);
        self.call_and_drain("delete", HttpMethod::Delete, params)
    }

    /// Total size in bytes of the selected datafiles.
    pub fn get_size(&self, session_id: &str, selection: &DataSelection) -> Result<u64, IdsError> {
        let params = params::session_selection(Some(session_id), selection);
        response::read_number(self.call("getSize", HttpMethod::Get, params)?)
    }

    pub fn get_datafile_ids(&self, session_id: &str, selection: &DataSelection) -> Result<Vec<i64>, IdsError> {
        let params = params::session_selection(Some(session_id), selection);
        let ids: DatafileIds = response::read_json(self.call("getDatafileIds", HttpMethod::Get, params)?)?;
        Ok(ids.ids)
    }

    /// Filesystem path of a link to a datafile, created for `username`.
    pub fn get_link(&self, session_id: &str, datafile_id: i64, username: &str) -> Result<String, IdsError> {
        let mut params = CallParameters::new();
        params.insert("sessionId", session_id);
        params.insert_number("datafileId", datafile_id);
        params.insert("username", username);
        response::read_text(self.call("getLink", HttpMethod::Post, params)?)
    }

    // -----------------------------------------------------------------------
    // Direct download
    // -----------------------------------------------------------------------

    /// Stream the selected data. A non-zero `options.offset` resumes from that
    /// byte via a `Range` header.
    pub fn get_data(
        &self,
        session_id: &str,
        selection: &DataSelection,
        options: &DataOptions,
    ) -> Result<ResponseBody, IdsError> {
        let params = data_params(session_id, selection, options);
        self.download(params, options.offset)
    }

    /// URL that downloads the same data as `get_data`, for handing to other
    /// tools. No request is made.
    pub fn get_data_url(
        &self,
        session_id: &str,
        selection: &DataSelection,
        options: &DataOptions,
    ) -> Result<String, IdsError> {
        let params = data_params(session_id, selection, options);
        Ok(self.request("getData", HttpMethod::Get, params).build()?.url)
    }

    // -----------------------------------------------------------------------
    // Prepared data
    // -----------------------------------------------------------------------

    /// Ask the server to assemble a selection for later retrieval.
    pub fn prepare_data(&self, session_id: &str, selection: &DataSelection, flags: Flags) -> Result<PreparedId, IdsError> {
        let mut params = params::session_selection(Some(session_id), selection);
        params.insert_flags(flags);
        let id = response::read_text(self.call("prepareData", HttpMethod::Post, params)?)?;
        Ok(PreparedId::from(id))
    }

    /// Whether prepared data is ready to fetch. Never waits.
    pub fn is_prepared(&self, prepared_id: &PreparedId) -> Result<bool, IdsError> {
        let params = params::prepared(prepared_id.as_str());
        response::read_bool(self.call("isPrepared", HttpMethod::Get, params)?)
    }

    pub fn get_prepared_data(
        &self,
        prepared_id: &PreparedId,
        outname: Option<&str>,
        offset: u64,
    ) -> Result<ResponseBody, IdsError> {
        let params = prepared_data_params(prepared_id, outname);
        self.download(params, offset)
    }

    pub fn get_prepared_data_url(&self, prepared_id: &PreparedId, outname: Option<&str>) -> Result<String, IdsError> {
        let params = prepared_data_params(prepared_id, outname);
        Ok(self.request("getData", HttpMethod::Get, params).build()?.url)
    }

    /// Datafile ids covered by prepared data.
    pub fn get_prepared_datafile_ids(&self, prepared_id: &PreparedId) -> Result<Vec<i64>, IdsError> {
        let params = params::prepared(prepared_id.as_str());
        let ids: DatafileIds = response::read_json(self.call("getDatafileIds", HttpMethod::Get, params)?)?;
        Ok(ids.ids)
    }

    // -----------------------------------------------------------------------
    // Upload
    // -----------------------------------------------------------------------

    /// Upload a new datafile and return its id.
    ///
    /// The content is streamed with chunked encoding while a CRC-32 is
    /// computed over the bytes sent. If the checksum the server reports
    /// differs, the upload fails with `InternalException` even though the
    /// server accepted it.
    pub fn put(&self, session_id: &str, upload: PutRequest<'_>) -> Result<i64, IdsError> {
        let Some(source) = upload.source else {
            return Err(IdsError::bad_request("Input stream is null"));
        };

        let mut params = CallParameters::new();
        params.insert("sessionId", session_id);
        params.insert("name", upload.name.as_str());
        params.insert_number("datasetId", upload.dataset_id);
        params.insert_number("datafileFormatId", upload.datafile_format_id);
        params.insert_opt("description", upload.description.as_deref());
        params.insert_opt("doi", upload.doi.as_deref());
        if let Some(millis) = upload.create_time {
            params.insert_number("datafileCreateTime", millis);
        }
        if let Some(millis) = upload.mod_time {
            params.insert_number("datafileModTime", millis);
        }

        let request = self.request("put", HttpMethod::Put, params).streaming().build()?;
        let (response, summary) = self.send(&request, Some(source))?;
        let summary = summary.ok_or_else(|| IdsError::internal("upload finished without a summary"))?;
        let reply: PutResponse = response::read_json(response)?;
        verify_upload(&reply, &summary)?;
        debug!(id = reply.id, bytes = summary.bytes, "datafile stored");
        Ok(reply.id)
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    fn request<'a>(&'a self, operation: &'a str, method: HttpMethod, params: CallParameters) -> RequestBuilder<'a> {
        RequestBuilder::new(&self.config, operation, method).params(params)
    }

    fn send(
        &self,
        request: &HttpRequest,
        upload: Option<&mut dyn Read>,
    ) -> Result<(HttpResponse, Option<UploadSummary>), IdsError> {
        debug!(method = %request.method, target = %request.target, url_len = request.url.len(), "sending request");
        let (response, summary) = transport::execute(&self.config, request, upload)?;
        Ok((response::check_status(response)?, summary))
    }

    fn call(&self, operation: &str, method: HttpMethod, params: CallParameters) -> Result<HttpResponse, IdsError> {
        let request = self.request(operation, method, params).build()?;
        let (response, _) = self.send(&request, None)?;
        Ok(response)
    }

    fn call_and_drain(&self, operation: &str, method: HttpMethod, params: CallParameters) -> Result<(), IdsError> {
        let mut body = self.call(operation, method, params)?.body;
        std::io::copy(&mut body, &mut std::io::sink())?;
        Ok(())
    }

    fn download(&self, params: CallParameters, offset: u64) -> Result<ResponseBody, IdsError> {
        let mut builder = self.request("getData", HttpMethod::Get, params);
        if offset > 0 {
            builder = builder.header("Range", format!("bytes={offset}-"));
        }
        let (response, _) = self.send(&builder.build()?, None)?;
        if offset > 0 {
            check_resumed(&response, offset)?;
        }
        Ok(response.body)
    }
}

/// A resumed download must start at `offset`; a server that ignored the
/// `Range` header would hand back the data from byte 0.
fn check_resumed(response: &HttpResponse, offset: u64) -> Result<(), IdsError> {
    let starts_at_offset = response
        .header("Content-Range")
        .map_or(true, |range| range.starts_with(&format!("bytes {offset}-")));
    if response.status != 206 || !starts_at_offset {
        warn!(
            status = response.status,
            content_range = response.header("Content-Range"),
            offset,
            "server did not honour the download offset"
        );
        return Err(IdsError::internal(format!(
            "Server did not resume the download at offset {offset} (HTTP status {})",
            response.status
        )));
    }
    Ok(())
}

fn data_params(session_id: &str, selection: &DataSelection, options: &DataOptions) -> CallParameters {
    let mut params = params::session_selection(Some(session_id), selection);
    params.insert_flags(options.flags);
    params.insert_opt("outname", options.outname.as_deref());
    params
}

fn prepared_data_params(prepared_id: &PreparedId, outname: Option<&str>) -> CallParameters {
    let mut params = params::prepared(prepared_id.as_str());
    params.insert_opt("outname", outname);
    params
}

fn verify_upload(reply: &PutResponse, summary: &UploadSummary) -> Result<(), IdsError> {
    if reply.checksum != u64::from(summary.crc32) {
        warn!(
            expected = summary.crc32,
            reported = reply.checksum,
            bytes = summary.bytes,
            "upload checksum mismatch"
        );
        return Err(IdsError::internal("Error uploading - the checksum was not as expected"));
    }
    Ok(())
}

/// A datafile to upload with `IdsClient::put`.
///
/// Times are milliseconds since the Unix epoch.
pub struct PutRequest<'a> {
    name: String,
    dataset_id: i64,
    datafile_format_id: i64,
    description: Option<String>,
    doi: Option<String>,
    create_time: Option<i64>,
    mod_time: Option<i64>,
    source: Option<&'a mut dyn Read>,
}

impl<'a> PutRequest<'a> {
    pub fn new(name: impl Into<String>, dataset_id: i64, datafile_format_id: i64) -> Self {
        Self {
            name: name.into(),
            dataset_id,
            datafile_format_id,
            description: None,
            doi: None,
            create_time: None,
            mod_time: None,
            source: None,
        }
    }

    /// Bytes to upload. The source is read to its end by the upload call and
    /// by nothing else while it runs.
    pub fn source(mut self, source: &'a mut dyn Read) -> Self {
        self.source = Some(source);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn doi(mut self, doi: impl Into<String>) -> Self {
        self.doi = Some(doi.into());
        self
    }

    pub fn create_time(mut self, millis: i64) -> Self {
        self.create_time = Some(millis);
        self
    }

    pub fn mod_time(mut self, millis: i64) -> Self {
        self.mod_time = Some(millis);
        self
    }
}

impl fmt::Debug for PutRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutRequest")
            .field("name", &self.name)
            .field("dataset_id", &self.dataset_id)
            .field("datafile_format_id", &self.datafile_format_id)
            .field("description", &self.description)
            .field("doi", &self.doi)
            .field("create_time", &self.create_time)
            .field("mod_time", &self.mod_time)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}
