//! UI Module - operator console and AppController
//!
//! The controller owns application state and is driven by messages; the
//! console is one front end that produces `UserAction`s and renders
//! `PanelEvent`s. Another front end only has to speak the same two enums.

pub mod console;
pub mod controller;

pub use controller::{
    AppController, ControlMessage, ControllerInbox, Flow, PanelEvent, ParamList, TaskSignal, UserAction,
    PANEL_EVENT_CAPACITY, TASK_CAPACITY,
};
