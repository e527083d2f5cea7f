//! Serialisable types crossing thread and process boundaries.
//!
//! `messages` is the capture → control wire format; `events` is what the
//! engine publishes to hosts (CLI, UI).

pub mod events;
pub mod messages;
