use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Success,
    Error,
}

/// A short user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub level: ToastLevel,
    pub title: String,
    pub description: String,
}

impl Toast {
    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self { level: ToastLevel::Success, title: title.into(), description: description.into() }
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self { level: ToastLevel::Error, title: title.into(), description: description.into() }
    }
}

/// Where toasts are shown.
pub trait Notifier: Send + Sync {
    fn notify(&self, toast: Toast);
}

/// Writes toasts to the log. Used when no UI is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, toast: Toast) {
        match toast.level {
            ToastLevel::Success => info!(title = %toast.title, description = %toast.description, "Toast"),
            ToastLevel::Error => warn!(title = %toast.title, description = %toast.description, "Toast"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every toast for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub(crate) toasts: Mutex<Vec<Toast>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, toast: Toast) {
            self.toasts.lock().unwrap().push(toast);
        }
    }

    #[test]
    fn test_toast_constructors() {
        let ok = Toast::success("Scan completed!", "Found 2 vulnerabilities");
        assert_eq!(ok.level, ToastLevel::Success);
        let err = Toast::error("Scan failed", "Please try again");
        assert_eq!(err.level, ToastLevel::Error);
        assert_eq!(err.description, "Please try again");
    }

    #[test]
    fn test_tracing_notifier_accepts_toasts() {
        TracingNotifier.notify(Toast::success("Scan completed!", "Found 0 vulnerabilities"));
    }
}
