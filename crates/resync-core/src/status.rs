//! HTTP outcome classification with edge-triggered user notification.

use parking_lot::Mutex;
use tracing::warn;

use crate::host::Host;

/// How a response status is treated by the sync cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusClass {
    Ok,
    /// 401: the session token is missing or stale.
    AuthRequired,
    /// Any other 4xx.
    ClientError,
    /// 5xx and anything unexpected.
    ServerError,
}

impl StatusClass {
    pub fn classify(status_code: u16) -> Self {
        match status_code {
            200 => StatusClass::Ok,
            401 => StatusClass::AuthRequired,
            400..=499 => StatusClass::ClientError,
            _ => StatusClass::ServerError,
        }
    }

    pub fn is_ok(self) -> bool {
        self == StatusClass::Ok
    }
}

#[derive(Default)]
struct Edges {
    login_requested: bool,
    warning_shown: bool,
}

/// Remembers whether the current failure streak was already surfaced, so the
/// user sees one prompt/warning per transition into a failing state.
#[derive(Default)]
pub struct StatusGate {
    edges: Mutex<Edges>,
}

impl StatusGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a response, notify the user on a new failure streak, and
    /// return the class. `context` prefixes the logged message.
    pub fn check<H: Host>(
        &self,
        host: &H,
        project: &H::Project,
        status_code: u16,
        status_description: &str,
        context: &str,
    ) -> StatusClass {
        let class = StatusClass::classify(status_code);
        let mut edges = self.edges.lock();
        match class {
            StatusClass::Ok => {
                edges.login_requested = false;
                edges.warning_shown = false;
                return class;
            }
            StatusClass::AuthRequired => {
                host.prompt_login(project, !edges.login_requested);
                edges.login_requested = true;
                edges.warning_shown = true;
            }
            StatusClass::ClientError | StatusClass::ServerError => {}
        }

        let message = format!("{context}{status_code} {status_description}");
        warn!(project = ?project, "{message}");
        if !edges.warning_shown {
            let shown = if class == StatusClass::ClientError {
                format!("Network request fail: {message}")
            } else {
                format!("Server internal error. Please, try again later.\n{message}")
            };
            host.show_warning(project, &shown);
            edges.warning_shown = true;
        }
        class
    }
}
