//! Blocking client for the IDS data-archival service.
//!
//! # Overview
//! Wraps the service's HTTP interface in typed operations: status queries,
//! archive and restore requests, streamed upload with CRC-32 verification,
//! streamed and resumable download, and the prepare/poll/fetch workflow for
//! bulk retrieval.
//!
//! # Design
//! - `IdsClient` is immutable after construction and opens one connection
//!   per call; clones and concurrent calls share nothing mutable.
//! - Parameter encoding (`params`), request building (`http`), transport
//!   (`transport`) and response classification (`response`) are separate
//!   layers, so everything up to the socket is testable without a server.
//! - Every failure is an `IdsError` whose `kind` mirrors the service's
//!   error codes.
//! - Logging goes through `tracing`; no subscriber is installed here.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod params;
pub mod response;
mod transport;
pub mod types;
pub mod upload;

pub use client::{IdsClient, PutRequest};
pub use config::ClientConfig;
pub use error::{ErrorKind, IdsError};
pub use http::{HttpMethod, HttpRequest, HttpResponse, RequestBody, RequestBuilder, ResponseBody, MAX_URL_LENGTH};
pub use params::{CallParameters, DataOptions, DataSelection, Flags};
pub use types::{PreparedId, ServiceStatus, Status};
pub use upload::{ChunkedWriter, UploadSummary};
