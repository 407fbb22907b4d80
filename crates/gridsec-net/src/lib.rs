//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "HTTP, WebSocket and message-bus surfaces over the engine."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Network surfaces for gridsec: the dashboard HTTP/JSON API, the WebSocket
//! observer stream and the MQTT adapter feeding the hardware ingestor.

pub mod adapters;
pub mod rest;
pub mod websocket;

pub use adapters::mqtt::{mqtt_transport, MqttBus, MqttLink};
pub use rest::{ApiError, ApiServerBuilder, ApiServerHandle, OPERATOR_HEADER};
