//! Minimal HTTP client abstraction for talking to the indexer.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

/// HTTP client trait for sending raw HTTP requests.
#[trait_variant::make(Send)]
pub trait HttpClient {
    /// Error type returned by the HTTP client
    type Error: std::error::Error + Display + Send + Sync + 'static;

    /// Send an HTTP request and return the response.
    fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> impl Future<Output = core::result::Result<http::Response<Vec<u8>>, Self::Error>>;
}

/// Transport failure from the reqwest-backed client
#[cfg(feature = "reqwest-client")]
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum TransportError {
    /// Request failed to send or the body failed to read
    #[error("request failed: {0}")]
    #[diagnostic(code(naam::transport::request))]
    Request(#[from] reqwest::Error),

    /// Response could not be rebuilt as an `http::Response`
    #[error("malformed response: {0}")]
    #[diagnostic(code(naam::transport::response))]
    Response(#[from] http::Error),
}

#[cfg(feature = "reqwest-client")]
impl HttpClient for reqwest::Client {
    type Error = TransportError;

    async fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> core::result::Result<http::Response<Vec<u8>>, Self::Error> {
        // Convert http::Request to reqwest::Request
        let (parts, body) = request.into_parts();

        let mut req = self.request(parts.method, parts.uri.to_string()).body(body);

        // Copy headers
        for (name, value) in parts.headers.iter() {
            req = req.header(name.as_str(), value.as_bytes());
        }

        let resp = req.send().await?;

        // Convert reqwest::Response to http::Response
        let mut builder = http::Response::builder().status(resp.status());

        for (name, value) in resp.headers().iter() {
            builder = builder.header(name.as_str(), value.as_bytes());
        }

        let body = resp.bytes().await?.to_vec();

        Ok(builder.body(body)?)
    }
}

impl<T: HttpClient + Sync> HttpClient for Arc<T> {
    type Error = T::Error;

    fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> impl Future<Output = core::result::Result<http::Response<Vec<u8>>, Self::Error>> + Send
    {
        self.as_ref().send_http(request)
    }
}
