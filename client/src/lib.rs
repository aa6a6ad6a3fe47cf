//! # Chat Client Library
//!
//! Interactive client for the NUL-framed TCP chat. It keeps one connection
//! to the server and does two things concurrently: a background task decodes
//! incoming broadcasts and prints them, while the foreground loop reads
//! stdin lines and sends each as a NUL-terminated frame.
//!
//! Typing `.exit` sends the disconnect command and quits. The session also
//! ends when the server closes the connection or echoes an `.exit` frame
//! back (the sharded server rebroadcasts exit commands).
//!
//! Incoming messages are printed line by line. The in-place terminal redraw
//! tricks some chat clients play (cursor save/restore around the prompt)
//! are deliberately not part of this crate.

pub mod network;
