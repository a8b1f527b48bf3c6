//! Side effects the platform shell performs on behalf of the core.
//!
//! The core never opens sockets itself; it builds requests and hands them to
//! whatever [`HttpClient`] the shell injects.

mod http;

pub use self::http::{
    HttpClient, HttpError, HttpRequest, HttpResponse, ValidatedUrl, DEFAULT_TIMEOUT_MS,
    MAX_RESPONSE_BODY_SIZE, MAX_TIMEOUT_MS, MAX_URL_LENGTH,
};
