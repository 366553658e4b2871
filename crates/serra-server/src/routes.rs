use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
};

use futures_util::{Stream, StreamExt, future};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use serra::actuator::ActuatorPatch;
use serra::device::DeviceId;
use serra::events::{ControlEvent, GpsUpdate};

use serra_controller::bus::Publisher;
use serra_controller::controller::Controller;
use serra_controller::record::ControlRecord;
use serra_controller::store::ControlStore;

use tokio_util::sync::CancellationToken;

use tower_http::trace::TraceLayer;

use tracing::debug;

use crate::error::ServerError;

// The state shared by all routes.
pub(crate) struct AppState<S: ControlStore, P: Publisher> {
    controller: Arc<Controller<S, P>>,
    default_device: DeviceId,
    shutdown: CancellationToken,
}

impl<S: ControlStore, P: Publisher> Clone for AppState<S, P> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            default_device: self.default_device.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S: ControlStore, P: Publisher> AppState<S, P> {
    pub(crate) const fn new(
        controller: Arc<Controller<S, P>>,
        default_device: DeviceId,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            controller,
            default_device,
            shutdown,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DeviceQuery {
    device: Option<String>,
}

impl DeviceQuery {
    fn device(self, default_device: &DeviceId) -> Result<DeviceId, ServerError> {
        match self.device {
            None => Ok(default_device.clone()),
            Some(device) => DeviceId::new(device.as_str()).ok_or(ServerError::InvalidDevice(device)),
        }
    }
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CommandAccepted {
    message: String,
    command_id: u64,
}

pub(crate) fn router<S: ControlStore, P: Publisher>(state: AppState<S, P>) -> Router {
    Router::new()
        .route("/get-control", get(get_control::<S, P>))
        .route("/set-control", post(set_control::<S, P>))
        .route("/gps-latest", get(gps_latest::<S, P>))
        .route("/events", get(events::<S, P>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn get_control<S: ControlStore, P: Publisher>(
    State(state): State<AppState<S, P>>,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<ControlRecord>, ServerError> {
    let device = query.device(&state.default_device)?;
    Ok(Json(state.controller.control(&device).await?))
}

async fn set_control<S: ControlStore, P: Publisher>(
    State(state): State<AppState<S, P>>,
    Query(query): Query<DeviceQuery>,
    Json(patch): Json<ActuatorPatch>,
) -> Result<Json<CommandAccepted>, ServerError> {
    let device = query.device(&state.default_device)?;
    let command_id = state.controller.submit(&device, &patch).await?;

    Ok(Json(CommandAccepted {
        message: format!("Command {command_id} sent to `{device}`"),
        command_id,
    }))
}

async fn gps_latest<S: ControlStore, P: Publisher>(
    State(state): State<AppState<S, P>>,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<GpsUpdate>, ServerError> {
    let device = query.device(&state.default_device)?;
    match state.controller.latest_gps(&device).await {
        Some(update) => Ok(Json(update)),
        None => Err(ServerError::NoGpsFix(device)),
    }
}

// The payload of an event, without its name.
fn event_data(event: &ControlEvent) -> Result<Value, serde_json::Error> {
    let mut value = serde_json::to_value(event)?;
    Ok(value.get_mut("data").map(Value::take).unwrap_or_default())
}

fn sse_event(event: &ControlEvent) -> Result<Event, axum::Error> {
    let data = event_data(event).map_err(axum::Error::new)?;
    Event::default().event(event.name()).json_data(data)
}

// Dashboards receiving events, optionally restricted to a single device.
//
// The stream ends when the server shuts down.
async fn events<S: ControlStore, P: Publisher>(
    State(state): State<AppState<S, P>>,
    Query(query): Query<DeviceQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>> + Send + 'static>, ServerError> {
    let device = match query.device {
        Some(device) => Some(DeviceId::new(device.as_str()).ok_or(ServerError::InvalidDevice(device))?),
        None => None,
    };

    debug!("Dashboard connected");

    let stream = state
        .controller
        .events()
        .filter(move |event| {
            future::ready(device.as_ref().is_none_or(|device| event.device() == device))
        })
        .map(|event| sse_event(&event))
        .take_until(state.shutdown.cancelled_owned());

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
