//! Navigation facility invoked when a session ends

/// Sends the user somewhere else, typically the login screen
pub trait Navigator: Send + Sync {
    fn redirect_to(&self, path: &str);
}

/// Headless navigator that only records the redirect in the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNavigator;

impl Navigator for TracingNavigator {
    fn redirect_to(&self, path: &str) {
        warn!(path, "Session ended, redirect requested");
    }
}

impl<F> Navigator for F
where
    F: Fn(&str) + Send + Sync,
{
    fn redirect_to(&self, path: &str) {
        self(path);
    }
}
