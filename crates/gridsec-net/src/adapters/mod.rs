//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Field transport adapters."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Transports implementing [`gridsec_core::BusClient`] and
//! [`gridsec_core::OutboundLink`].

pub mod mqtt;
