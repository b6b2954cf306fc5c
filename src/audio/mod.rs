//! Audio side of the unit host
//!
//! - Runtime-loaded audio units (`unit`)
//! - Lock-free control queue into the audio callback
//! - Real-time render pipeline with output limiting
//! - Pitch detection on the unit's output
//! - Arpeggiator and keyboard routing (`midi`)
//! - Device selection and optional live input

pub mod device;
pub mod engine;
pub mod input;
pub mod message;
pub mod midi;
pub mod perf;
pub mod pitch;
pub mod queue;
pub mod render;
pub mod unit;

pub use engine::{EngineOptions, RenderEngine};
pub use message::ControlMessage;
pub use unit::{AudioUnit, UnitInfo, UnitModule};
