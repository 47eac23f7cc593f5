//! Frame streaming for serially attached LED strips.
//!
//! Image rows are paced out of a [`source::FrameSource`] by the
//! [`streamer::Streamer`], written to the controller by the
//! [`sender::FrameSender`] and steered at runtime through the
//! [`server::ControlServer`].

pub mod control;
pub mod envelope;
pub mod pixels;
pub mod protocol;
pub mod sender;
pub mod server;
pub mod source;
pub mod streamer;
pub mod transport;
