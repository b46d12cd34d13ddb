//! Contains a remote implementation using HTTP to interact with the shape API.

use reqwest::StatusCode;
use serde::de::IgnoredAny;
use shapesync_types::protocol::{self, Offset, ShapeHandle, params};

/// Errors of a single shape request.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The request could not be sent or the response body could not be read.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server responded with a status other than `200` or `204`.
    #[error("unexpected status {0}")]
    Status(StatusCode),

    /// A header required to continue the shape is missing.
    #[error("response is missing the `{0}` header")]
    MissingHeader(&'static str),
}

/// Query parameters of one request to the shape endpoint.
#[derive(Clone, Debug)]
pub struct ShapeRequest {
    offset: Offset,
    shape_id: Option<String>,
    live: bool,
    filter: String,
}

impl ShapeRequest {
    /// Loads the shape selected by `filter` from the beginning of its log.
    pub fn initial(filter: impl Into<String>) -> Self {
        Self {
            offset: Offset::before_all(),
            shape_id: None,
            live: false,
            filter: filter.into(),
        }
    }

    /// Long-polls a loaded shape for changes after the handle's offset.
    pub fn live(handle: &ShapeHandle, filter: impl Into<String>) -> Self {
        Self {
            offset: handle.offset.clone(),
            shape_id: Some(handle.shape_id.clone()),
            live: true,
            filter: filter.into(),
        }
    }

    /// Continues subsequent requests from `offset`.
    pub fn advance(&mut self, offset: Offset) {
        self.offset = offset;
    }

    /// The offset this request continues from.
    pub fn offset(&self) -> &Offset {
        &self.offset
    }

    /// The `where` predicate of this request.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Returns the query parameters in the order they are sent.
    pub fn query(&self) -> Vec<(&'static str, &str)> {
        let mut query = vec![(params::OFFSET, self.offset.as_str())];
        if let Some(shape_id) = &self.shape_id {
            query.push((params::SHAPE_ID, shape_id.as_str()));
        }
        if self.live {
            query.push((params::LIVE, "true"));
        }
        query.push((params::WHERE, self.filter.as_str()));
        query
    }
}

/// The successful response to a [`ShapeRequest`].
#[derive(Debug)]
pub struct ShapeResponse {
    /// Either `200 OK` or `204 No Content`.
    pub status: StatusCode,
    /// Value of the shape ID header, if present.
    pub shape_id: Option<String>,
    /// Value of the chunk last offset header, if present.
    pub last_offset: Option<Offset>,
    /// Size of the response body.
    pub bytes: u64,
    /// Number of messages if the body is a JSON array, otherwise zero.
    pub messages: u64,
}

impl ShapeResponse {
    /// Returns the handle needed to follow this shape in live mode.
    pub fn handle(&self) -> Result<ShapeHandle, RequestError> {
        let shape_id = self
            .shape_id
            .clone()
            .ok_or(RequestError::MissingHeader(protocol::SHAPE_ID_HEADER))?;
        let offset = self
            .last_offset
            .clone()
            .ok_or(RequestError::MissingHeader(protocol::CHUNK_LAST_OFFSET_HEADER))?;

        Ok(ShapeHandle { shape_id, offset })
    }
}

/// A remote implementation using HTTP to interact with the shape API.
#[derive(Debug)]
pub struct HttpRemote {
    /// Base URL of the API, without a trailing slash.
    remote: String,
    /// The client shared by all simulated users.
    client: reqwest::Client,
}

impl HttpRemote {
    /// Creates a new `HttpRemote` instance with the given remote URL and a default client.
    pub fn new(remote: impl Into<String>) -> Self {
        let mut remote = remote.into();
        while remote.ends_with('/') {
            remote.pop();
        }

        Self {
            remote,
            client: reqwest::Client::new(),
        }
    }

    /// Returns the URL of the shape endpoint for `table`.
    pub fn shape_url(&self, table: &str) -> String {
        format!("{}{}", self.remote, protocol::shape_path(table))
    }

    /// Issues one GET request to the shape endpoint and reads the full response.
    pub async fn fetch(
        &self,
        table: &str,
        request: &ShapeRequest,
    ) -> Result<ShapeResponse, RequestError> {
        let response = self
            .client
            .get(self.shape_url(table))
            .query(&request.query())
            .send()
            .await?;

        let status = response.status();
        if !protocol::is_success(status.as_u16()) {
            return Err(RequestError::Status(status));
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        };
        let shape_id = header(protocol::SHAPE_ID_HEADER);
        let last_offset = header(protocol::CHUNK_LAST_OFFSET_HEADER).map(Offset::new);

        let body = response.bytes().await?;
        let messages = serde_json::from_slice::<Vec<IgnoredAny>>(&body).map_or(0, |m| m.len());

        Ok(ShapeResponse {
            status,
            shape_id,
            last_offset,
            bytes: body.len() as u64,
            messages: messages as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_query() {
        let request = ShapeRequest::initial("id>='1' and id<='2'");
        assert_eq!(
            request.query(),
            [("offset", "-1"), ("where", "id>='1' and id<='2'")]
        );
    }

    #[test]
    fn live_query_follows_offset() {
        let handle = ShapeHandle {
            shape_id: "shape-1".to_owned(),
            offset: Offset::new("0_0"),
        };
        let mut request = ShapeRequest::live(&handle, "id>='1' and id<'2'");
        assert_eq!(
            request.query(),
            [
                ("offset", "0_0"),
                ("shape_id", "shape-1"),
                ("live", "true"),
                ("where", "id>='1' and id<'2'"),
            ]
        );

        request.advance(Offset::new("1_0"));
        assert_eq!(request.offset().as_str(), "1_0");
        assert_eq!(request.query()[0], ("offset", "1_0"));
    }

    #[test]
    fn handle_requires_headers() {
        let mut response = ShapeResponse {
            status: StatusCode::OK,
            shape_id: Some("shape-1".to_owned()),
            last_offset: None,
            bytes: 0,
            messages: 0,
        };
        assert!(matches!(
            response.handle(),
            Err(RequestError::MissingHeader(protocol::CHUNK_LAST_OFFSET_HEADER))
        ));

        response.last_offset = Some(Offset::new("0_0"));
        let handle = response.handle().unwrap();
        assert_eq!(handle.shape_id, "shape-1");
        assert_eq!(handle.offset, Offset::new("0_0"));
    }

    #[test]
    fn trims_trailing_slashes() {
        let remote = HttpRemote::new("http://localhost:3000//");
        assert_eq!(remote.shape_url("issue"), "http://localhost:3000/v1/shape/issue");
    }
}
