// Logging primitives shared across the musique workspace.
//
// Wraps the `log` facade with a small amount of structure (which
// component emitted a line, and an optional scoping path) instead of
// handing every module a bare `log::info!` call.

use std::fmt;

/// Which part of the system emitted a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Router,
    Rpc,
    Discovery,
    Gossip,
    TimeSync,
    Trigger,
    Node,
    Cli,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::Router => "router",
            Component::Rpc => "rpc",
            Component::Discovery => "discovery",
            Component::Gossip => "gossip",
            Component::TimeSync => "timesync",
            Component::Trigger => "trigger",
            Component::Node => "node",
            Component::Cli => "cli",
        };
        write!(f, "{name}")
    }
}

/// A cheap, cloneable logger scoped to a [`Component`] and an optional path
/// (a peer address, a handler name, ...). Every line is prefixed with
/// `[component:path]` or `[component]`.
#[derive(Debug, Clone)]
pub struct Logger {
    component: Component,
    path: Option<String>,
}

impl Logger {
    pub fn new_root(component: Component) -> Self {
        Self {
            component,
            path: None,
        }
    }

    /// Derive a child logger scoped to an additional path segment.
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self {
            component: self.component,
            path: Some(path.into()),
        }
    }

    fn prefix(&self) -> String {
        match &self.path {
            Some(path) => format!("[{}:{}]", self.component, path),
            None => format!("[{}]", self.component),
        }
    }

    pub fn debug(&self, message: impl fmt::Display) {
        log::debug!("{} {}", self.prefix(), message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        log::info!("{} {}", self.prefix(), message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        log::warn!("{} {}", self.prefix(), message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        log::error!("{} {}", self.prefix(), message);
    }
}

/// Implemented by context objects (handler contexts, facade calls) that
/// carry a [`Logger`] and can report which component they belong to.
pub trait LoggingContext {
    fn component(&self) -> Component;
    fn logger(&self) -> &Logger;
}
