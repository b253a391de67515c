//! Firmware core for remotely-activated sensor/actuator nodes.
//!
//! A node samples or actuates one physical quantity and talks to a central
//! controller over MQTT. The pieces, leaves first:
//!
//! - [`debounce`]: per-input settle-window edge detection
//! - [`actuator`]: non-blocking timed pulses (buzzer, relays)
//! - [`thresholds`]: runtime-updatable alert limits
//! - [`activation`]: the remote on/off gate and shared node context
//! - [`commands`]: inbound payload → typed command → effects
//! - [`connectivity`]: broker connection state machine
//! - [`alerting`]: threshold comparison and alert payloads
//! - [`control`]: the loop that ties them together

pub mod activation;
pub mod actuator;
pub mod alerting;
pub mod channels;
pub mod commands;
pub mod config;
pub mod connectivity;
pub mod control;
pub mod debounce;
pub mod error;
pub mod indicator;
pub mod inputs;
pub mod mqtt;
pub mod outputs;
pub mod sensor;
#[cfg(feature = "sim")]
pub mod sim;
pub mod thresholds;
pub mod variant;
