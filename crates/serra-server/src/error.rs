use axum::{
    extract::Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use serde::Serialize;

use serra::device::DeviceId;
use serra_controller::error::{Error as ControllerError, ErrorKind};

// The body of an error response.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<String>,
}

/// All server errors.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ServerError {
    /// A controller operation failed.
    #[error(transparent)]
    Controller(#[from] ControllerError),
    /// A device identifier is not a valid topic segment.
    #[error("`{0}` is not a valid device identifier")]
    InvalidDevice(String),
    /// No `GPS` fix has been received from a device yet.
    #[error("No GPS fix received from `{0}`")]
    NoGpsFix(DeviceId),
    /// The server socket failed.
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Controller(e) => match e.kind() {
                ErrorKind::Validation | ErrorKind::MalformedMessage => StatusCode::BAD_REQUEST,
                ErrorKind::Transport => StatusCode::BAD_GATEWAY,
                ErrorKind::Persistence | ErrorKind::Config => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::InvalidDevice(_) => StatusCode::BAD_REQUEST,
            Self::NoGpsFix(_) => StatusCode::NOT_FOUND,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody<'static> {
        match self {
            Self::Controller(e) => ErrorBody {
                error: match e.kind() {
                    ErrorKind::Validation | ErrorKind::MalformedMessage => "Invalid Data",
                    _ => "Internal",
                },
                description: e.kind().to_string(),
                info: Some(e.description().to_string()),
            },
            Self::InvalidDevice(_) => ErrorBody {
                error: "Invalid Data",
                description: self.to_string(),
                info: None,
            },
            Self::NoGpsFix(_) => ErrorBody {
                error: "Not Found",
                description: self.to_string(),
                info: None,
            },
            Self::Io(e) => ErrorBody {
                error: "Internal",
                description: "Server I/O error".into(),
                info: Some(e.to_string()),
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
