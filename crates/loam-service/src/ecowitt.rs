//! Ecowitt weather station ingestion.
//!
//! Ecowitt-compatible stations (GW1000/GW2000 gateways and friends) push
//! form-encoded readings in imperial units to a configurable path. This
//! module maps the station's field names onto measurement names and, in
//! metric mode, converts the values before handing them to storage.
//!
//! Stations expect plain-text responses: the literal body `success` on
//! 200, anything else on failure.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{Form, Router, extract::State, http::StatusCode, routing::post};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::Units;
use crate::state::AppState;

/// Station field name, stored measurement name, and the imperial-to-metric
/// conversion (when one applies).
type FieldMapping = (&'static str, &'static str, Option<fn(f64) -> f64>);

/// Known station fields. Later entries win when two map to the same
/// measurement name, so the piezo rain gauge overrides the classic one.
const FIELD_MAPPINGS: &[FieldMapping] = &[
    ("tempf", "temperature", Some(fahrenheit_to_celsius)),
    ("humidity", "humidity", None),
    ("baromrelin", "pressure", Some(inhg_to_hpa)),
    ("baromabsin", "pressure_absolute", Some(inhg_to_hpa)),
    ("windspeedmph", "wind_speed", Some(mph_to_ms)),
    ("winddir", "wind_direction", None),
    ("windgustmph", "wind_gust", Some(mph_to_ms)),
    ("maxdailygust", "wind_gust_max_daily", Some(mph_to_ms)),
    ("solarradiation", "solar_radiation", None),
    ("uv", "uv_index", None),
    ("rainratein", "rain_rate", Some(inches_to_mm)),
    ("rrain_piezo", "rain_rate", Some(inches_to_mm)),
    ("dailyrainin", "rain_daily", Some(inches_to_mm)),
    ("drain_piezo", "rain_daily", Some(inches_to_mm)),
    ("hrain_piezo", "rain_hourly", Some(inches_to_mm)),
    ("wrain_piezo", "rain_weekly", Some(inches_to_mm)),
    ("mrain_piezo", "rain_monthly", Some(inches_to_mm)),
    ("yrain_piezo", "rain_yearly", Some(inches_to_mm)),
    ("tempinf", "temperature_indoor", Some(fahrenheit_to_celsius)),
    ("humidityin", "humidity_indoor", None),
    ("wh90batt", "battery_wh90", None),
    ("wh65batt", "battery_wh65", None),
];

/// Router for the station push endpoint, mounted at the configured path.
pub fn router(path: &str) -> Router<Arc<AppState>> {
    Router::new().route(path, post(receive_ecowitt))
}

async fn receive_ecowitt(
    State(state): State<Arc<AppState>>,
    Form(raw): Form<HashMap<String, String>>,
) -> (StatusCode, &'static str) {
    if raw.is_empty() {
        warn!("Received empty Ecowitt push");
        return (StatusCode::BAD_REQUEST, "error: no data");
    }

    let client_id = client_id(&raw, state.config.ecowitt.client_name.as_deref());
    let payload = map_fields(&raw, state.config.ecowitt.units);

    match state.storage.store(&client_id, payload) {
        Ok(()) => {
            info!("Stored Ecowitt data from {client_id}");
            (StatusCode::OK, "success")
        }
        Err(e) => {
            warn!("Failed to store Ecowitt data from {client_id}: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "error")
        }
    }
}

/// Configured client name when set, otherwise an id derived from the
/// station's PASSKEY.
fn client_id(raw: &HashMap<String, String>, configured: Option<&str>) -> String {
    if let Some(name) = configured {
        return name.to_string();
    }
    let passkey = raw.get("PASSKEY").map(String::as_str).unwrap_or("unknown");
    format!("ecowitt-{passkey}")
}

/// Build a storable payload from the station's form fields. Unknown
/// fields are ignored; known fields with non-numeric values are skipped.
fn map_fields(raw: &HashMap<String, String>, units: Units) -> Map<String, Value> {
    let mut payload = Map::new();

    // Stations report "dateutc" as naive UTC "YYYY-MM-DD HH:MM:SS".
    if let Some(dateutc) = raw.get("dateutc") {
        payload.insert("timestamp".to_string(), Value::String(dateutc.clone()));
    }

    for (field, name, conversion) in FIELD_MAPPINGS {
        let Some(text) = raw.get(*field) else {
            continue;
        };
        let Ok(value) = text.parse::<f64>() else {
            debug!("Skipping non-numeric Ecowitt field {field}={text}");
            continue;
        };
        let value = match conversion {
            Some(convert) if units == Units::Metric => convert(value),
            _ => value,
        };
        payload.insert((*name).to_string(), Value::from(value));
    }

    payload
}

fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    round2((fahrenheit - 32.0) * 5.0 / 9.0)
}

fn inhg_to_hpa(inhg: f64) -> f64 {
    round2(inhg * 33.8639)
}

fn mph_to_ms(mph: f64) -> f64 {
    round2(mph * 0.44704)
}

fn inches_to_mm(inches: f64) -> f64 {
    round2(inches * 25.4)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
