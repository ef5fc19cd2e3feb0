//! Terminal user interface built on [ratatui](https://github.com/ratatui-org/ratatui).
//!
//! The UI is organized into three layers:
//!
//! - **[`app`]**: application state, keyboard event loop, pane focus and the
//!   background run thread
//! - **[`panes`]**: render functions for each visible pane (source, log, GC
//!   chart, IL, native code, status bar)
//! - **[`theme`]**: centralized color palette used by all panes
//!
//! The entry point for consumers is [`App`]: construct it with a
//! [`DiagnosticEngine`] whose sink is a [`LogChannel`], hand it the channel's
//! receiver, and call [`App::run`] to start the event loop.
//!
//! [`DiagnosticEngine`]: crate::engine::DiagnosticEngine
//! [`LogChannel`]: crate::log::LogChannel
//! [`App::run`]: app::App::run

pub mod app;
pub mod panes;
pub mod theme;

pub use app::App;
