//! Transport seams: HTTP execution, link state, and memory pressure.
//!
//! The controller never talks to a socket directly. It issues one request at
//! a time through [`TransportClient`] and consults [`LinkMonitor`] and
//! [`MemoryGauge`] before anything expensive. The concrete network stack
//! (TLS included) lives behind these traits and is out of scope here.

use thiserror::Error;

/// HTTP method of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET request.
    Get,
    /// POST request.
    Post,
    /// PATCH request.
    Patch,
    /// PUT request.
    Put,
    /// DELETE request.
    Delete,
}

impl HttpMethod {
    /// Wire form of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// One HTTP request as the controller sees it.
///
/// `secure` requests are encrypted end-to-end and are the ones subject to
/// memory admission control and mandatory spacing in the broker.
#[derive(Debug, Clone)]
pub struct HttpRequest<'a> {
    /// Request method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: &'a str,
    /// Request body; empty for body-less methods.
    pub body: &'a str,
    /// Content type header value.
    pub content_type: &'a str,
    /// Whether the request must use the encrypted transport.
    pub secure: bool,
    /// Transport-level response deadline; timeouts surface as
    /// [`TransportError::RequestFailed`], never as asynchronous interrupts.
    pub timeout_ms: u32,
}

/// Status and body of a completed request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body, possibly empty.
    pub body: String,
}

impl HttpResponse {
    /// Whether the status is in the 2xx range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Failure to execute a request at the transport layer.
///
/// These are the only failures the transport reports; HTTP error statuses are
/// returned as ordinary [`HttpResponse`] values for the caller to classify.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be set up at all.
    #[error("http_begin_failed")]
    BeginFailed,

    /// The connection was set up but the request did not complete.
    #[error("http_request_failed")]
    RequestFailed,
}

/// Executes one HTTP(S) request to completion.
pub trait TransportClient {
    /// Performs the request, returning status and body or a transport failure.
    fn perform(&mut self, request: &HttpRequest<'_>) -> Result<HttpResponse, TransportError>;
}

/// Reports whether the network link is currently associated.
pub trait LinkMonitor {
    /// True when the link is up and traffic can be attempted.
    fn is_connected(&self) -> bool;
}

/// Reports free-memory conditions ahead of expensive allocations.
pub trait MemoryGauge {
    /// Total free heap in bytes.
    fn free_bytes(&self) -> u32;

    /// Largest contiguous free block in bytes.
    fn largest_free_block_bytes(&self) -> u32;
}

/// Gauge for hosted environments where heap exhaustion is not a concern.
#[derive(Debug, Default)]
pub struct HostedMemoryGauge;

impl MemoryGauge for HostedMemoryGauge {
    fn free_bytes(&self) -> u32 {
        u32::MAX
    }

    fn largest_free_block_bytes(&self) -> u32 {
        u32::MAX
    }
}
