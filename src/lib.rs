// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Open-loop fan control for single-board computers.
//!
//! Temperature is mapped to a PWM duty value through a piecewise-linear
//! curve, operators can override the mapping with fixed modes, and the
//! commanded value is published to a JSON document that a separate
//! actuator process applies to hardware.
//!
//! All shared state lives in two small JSON documents written with
//! temp-file-then-rename. Every reader reloads them before deciding, so
//! no locks are needed between the operator tool and the auto service.

pub mod config;
pub mod curve;
pub mod mode;
pub mod sensor;
pub mod service;
pub mod state;
pub mod store;
